//! End-to-end command scenarios.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cohort::{
    Commander, EventSink, ExecutionError, GroupTransport, HandlerError, Member, RemoteErrorKind,
};
use futures::StreamExt;
use serde_json::{json, Value};

use super::harness::{TestGroup, GROUP, WAIT};
use super::invariants::{assert_complete, collect};

fn register_sum(commander: &Commander) {
    commander.register_fn("sum", |_: &Member, (a, b): (i64, i64)| Ok::<_, HandlerError>(a + b));
}

#[tokio::test]
async fn test_sum_is_computed_by_every_member() {
    let group = TestGroup::start(2).await;
    for commander in &group.commanders {
        register_sum(commander);
    }

    let mut execution = group.commanders[0]
        .execute([], "sum", vec![json!(3), json!(4)])
        .await
        .unwrap();
    let outcomes = collect(&mut execution).await;

    assert_complete(&outcomes, &group.members());
    for member in group.members() {
        assert_eq!(outcomes.value(&member), Some(&json!(7)));
    }
}

#[tokio::test]
async fn test_addressed_execution_reaches_only_recipients() {
    let group = TestGroup::start(3).await;
    let calls = Arc::new(Mutex::new(Vec::new()));
    for commander in &group.commanders {
        let me = commander.local_member();
        let calls = calls.clone();
        commander.register("mark", move |_, _| {
            calls.lock().unwrap().push(me);
            Ok(Value::Null)
        });
    }

    let target = group.member(2);
    let mut execution = group.commanders[0]
        .execute([target], "mark", vec![])
        .await
        .unwrap();
    let outcomes = collect(&mut execution).await;

    assert_complete(&outcomes, &[target]);
    assert_eq!(outcomes.value(&target), Some(&Value::Null));
    assert_eq!(*calls.lock().unwrap(), vec![target]);
}

#[tokio::test]
async fn test_broadcast_excludes_members_joining_after_send() {
    let mut group = TestGroup::start(3).await;
    for commander in &group.commanders {
        register_sum(commander);
    }
    let original = group.members();

    let mut execution = group.commanders[0]
        .execute([], "sum", vec![json!(1), json!(1)])
        .await
        .unwrap();
    let late = group.join().await;
    register_sum(&group.commanders[3]);

    let outcomes = collect(&mut execution).await;
    assert_complete(&outcomes, &original);
    assert!(outcomes.value(&late).is_none());
}

#[tokio::test]
async fn test_leave_during_wait_completes_without_error() {
    let group = TestGroup::start(3).await;
    let (a, b) = (group.member(0), group.member(1));

    for commander in &group.commanders {
        let me = commander.local_member();
        let cluster = group.cluster.clone();
        commander.register("work", move |_, _| {
            if me == a {
                // Crash before answering
                cluster.kill(me);
            }
            Ok(json!(me.to_string()))
        });
    }

    let caller = &group.commanders[2];
    let mut execution = caller.execute([a, b], "work", vec![]).await.unwrap();
    let outcomes = collect(&mut execution).await;

    assert_complete(&outcomes, &[b]);
    assert_eq!(outcomes.value(&b), Some(&json!(b.to_string())));
    assert_eq!(caller.in_flight(), 0);
}

#[tokio::test]
async fn test_exception_then_resume() {
    let group = TestGroup::start(2).await;
    let (x, y) = (group.member(0), group.member(1));

    for commander in &group.commanders {
        let me = commander.local_member();
        commander.register("check", move |_, _| {
            if me == x {
                Err(HandlerError::new("CheckFailed", "x is unhappy"))
            } else {
                Ok(json!("OK"))
            }
        });
    }

    let mut execution = group.commanders[1].execute([], "check", vec![]).await.unwrap();
    let outcomes = collect(&mut execution).await;

    assert_complete(&outcomes, &[x, y]);
    let err = outcomes.error(&x).expect("x failed");
    assert_eq!(err.kind, RemoteErrorKind::Handler);
    assert_eq!(err.type_name, "CheckFailed");
    assert_eq!(err.message, "x is unhappy");
    assert_eq!(outcomes.value(&y), Some(&json!("OK")));
}

#[tokio::test]
async fn test_missing_command_is_reported_per_member() {
    let group = TestGroup::start(2).await;
    register_sum(&group.commanders[0]);

    let mut execution = group.commanders[0]
        .execute([], "sum", vec![json!(2), json!(2)])
        .await
        .unwrap();
    let outcomes = collect(&mut execution).await;

    assert_eq!(outcomes.value(&group.member(0)), Some(&json!(4)));
    let err = outcomes.error(&group.member(1)).expect("member 1 has no sum");
    assert_eq!(err.kind, RemoteErrorKind::CommandNotFound);
}

#[tokio::test]
async fn test_wait_all_reports_ignored_errors() {
    let group = TestGroup::start(2).await;
    let failing = group.member(1);
    for commander in &group.commanders {
        let me = commander.local_member();
        commander.register("maybe", move |_, _| {
            if me == failing {
                Err(HandlerError::new("Nope", "refused"))
            } else {
                Ok(Value::Null)
            }
        });
    }

    let caller = &group.commanders[0];
    let mut ignored = caller.execute([], "maybe", vec![]).await.unwrap();
    assert!(!ignored.wait_all(true).await.unwrap());

    let mut strict = caller.execute([], "maybe", vec![]).await.unwrap();
    let mut first_error = None;
    loop {
        match strict.wait_all(false).await {
            Ok(_) => break,
            Err(ExecutionError::Remote(err)) => first_error = Some(err),
            Err(err) => panic!("fatal: {}", err),
        }
    }
    assert_eq!(first_error.map(|e| e.origin), Some(failing));

    let mut clean = caller.execute([group.member(0)], "maybe", vec![]).await.unwrap();
    assert!(clean.wait_all(false).await.unwrap());
}

#[tokio::test]
async fn test_stream_yields_errors_and_continues() {
    let group = TestGroup::start(3).await;
    register_sum(&group.commanders[0]);
    register_sum(&group.commanders[2]);

    let execution = group.commanders[0]
        .execute([], "sum", vec![json!(5), json!(6)])
        .await
        .unwrap();
    let items: Vec<_> = tokio::time::timeout(WAIT, execution.into_stream().collect())
        .await
        .unwrap();

    assert_eq!(items.len(), 3);
    let values: Vec<i64> = items
        .iter()
        .filter_map(|item| item.as_ref().ok())
        .map(|response| response.decode::<i64>().unwrap())
        .collect();
    assert_eq!(values, vec![11, 11]);
    assert_eq!(items.iter().filter(|item| item.is_err()).count(), 1);
}

#[tokio::test]
async fn test_dropped_member_does_not_block_broadcasts() {
    let mut group = TestGroup::start(2).await;
    for commander in &group.commanders {
        register_sum(commander);
    }
    let gone = group.member(1);

    // Dropped without shutdown
    drop(group.commanders.pop());
    assert_eq!(group.cluster.members(GROUP), vec![group.member(0)]);

    let mut execution = group.commanders[0]
        .execute([], "sum", vec![json!(1), json!(2)])
        .await
        .unwrap();
    let outcomes = collect(&mut execution).await;

    assert_complete(&outcomes, &[group.member(0)]);
    assert!(outcomes.value(&gone).is_none());
    group.settle().await;
    assert_eq!(group.commanders[0].members(), vec![group.member(0)]);
}

#[tokio::test]
async fn test_discard_stops_tracking() {
    let group = TestGroup::start(1).await;
    let commander = &group.commanders[0];
    commander.register("noop", |_, _| Ok(Value::Null));

    // A member with no router never answers
    let silent = group.cluster.transport(99);
    let (sink, _silent_events) = EventSink::channel();
    silent.connect(GROUP, sink).await.unwrap();
    group.settle().await;

    let mut execution = commander.execute([], "noop", vec![]).await.unwrap();
    execution.next_response().await.unwrap().unwrap();
    assert_eq!(commander.in_flight(), 1);

    execution.discard();
    execution.discard();
    assert_eq!(commander.in_flight(), 0);
    assert!(execution.next_response().await.unwrap().is_none());
}

#[tokio::test]
async fn test_discard_from_another_task_wakes_waiter() {
    let group = TestGroup::start(1).await;
    let commander = &group.commanders[0];

    let silent = group.cluster.transport(99);
    let (sink, _silent_events) = EventSink::channel();
    silent.connect(GROUP, sink).await.unwrap();
    group.settle().await;

    // Only the silent member is addressed
    let mut execution = commander
        .execute([silent.member()], "noop", vec![])
        .await
        .unwrap();
    let handle = execution.discard_handle();

    let waiter = tokio::spawn(async move { execution.next_response().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.discard();

    let result = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap();
    assert!(matches!(result, Ok(None)));
    assert_eq!(commander.in_flight(), 0);
}

#[tokio::test]
async fn test_dropping_execution_releases_entry() {
    let group = TestGroup::start(1).await;
    let commander = &group.commanders[0];

    let execution = commander.execute([], "anything", vec![]).await.unwrap();
    assert_eq!(commander.in_flight(), 1);
    drop(execution);
    assert_eq!(commander.in_flight(), 0);
}

#[tokio::test]
async fn test_notify_runs_without_tracking() {
    let group = TestGroup::start(3).await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    for commander in &group.commanders {
        let me = commander.local_member();
        let seen = seen.clone();
        commander.register("record", move |sender, args| {
            seen.lock().unwrap().push((me, *sender, args));
            Ok(Value::Null)
        });
        commander.register("barrier", |_, _| Ok(Value::Null));
    }

    let caller = &group.commanders[0];
    caller.notify([], "record", vec![json!("hello")]).await.unwrap();
    assert_eq!(caller.in_flight(), 0);

    // Commands from one sender are processed in order everywhere
    caller.execute([], "barrier", vec![]).await.unwrap().wait_all(false).await.unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 3);
    for (_, sender, args) in seen.iter() {
        assert_eq!(*sender, caller.local_member());
        assert_eq!(args, &vec![json!("hello")]);
    }
}

#[tokio::test]
async fn test_membership_subscription() {
    let mut group = TestGroup::start(1).await;
    let mut changes = group.commanders[0].subscribe_membership();

    let joiner = group.join().await;
    let change = tokio::time::timeout(WAIT, changes.recv()).await.unwrap().unwrap();
    assert_eq!(change.joined, vec![joiner]);
    assert_eq!(change.members, vec![group.member(0), joiner]);

    group.commanders[1].shutdown().await.unwrap();
    let change = tokio::time::timeout(WAIT, changes.recv()).await.unwrap().unwrap();
    assert_eq!(change.left, vec![joiner]);
    assert_eq!(change.members, vec![group.member(0)]);
}
