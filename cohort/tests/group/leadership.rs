//! Leadership across a live group.

use std::collections::BTreeSet;

use super::harness::{TestGroup, WAIT};

#[tokio::test]
async fn test_exactly_one_leader_in_stable_group() {
    let group = TestGroup::start(4).await;

    let mut leaders = 0;
    let mut positions = BTreeSet::new();
    for commander in &group.commanders {
        if tokio::time::timeout(WAIT, commander.is_leader()).await.unwrap() {
            leaders += 1;
        }
        positions.insert(commander.leader_position().unwrap());
    }

    assert_eq!(leaders, 1);
    assert_eq!(positions, (0..4).collect::<BTreeSet<usize>>());
    assert!(group.commanders[0].is_leader().await);
}

#[tokio::test]
async fn test_oldest_survivor_takes_over() {
    let group = TestGroup::start(3).await;

    group.commanders[0].shutdown().await.unwrap();
    group.settle().await;

    assert!(group.commanders[1].is_leader().await);
    assert!(!group.commanders[2].is_leader().await);
    assert_eq!(group.commanders[2].leader_position(), Some(1));
    assert_eq!(
        group.commanders[1].leadership_pool(),
        vec![group.member(1), group.member(2)]
    );
}

#[tokio::test]
async fn test_crashed_leader_is_replaced() {
    let group = TestGroup::start(3).await;

    group.cluster.kill(group.member(0));
    group.settle().await;

    assert!(group.commanders[1].is_leader().await);
    assert_eq!(group.commanders[1].members(), vec![group.member(1), group.member(2)]);
}
