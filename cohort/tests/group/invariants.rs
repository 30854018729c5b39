//! Outcome collection and completeness checks.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use cohort::{Execution, ExecutionError, Member, RemoteError, Response};
use serde_json::Value;

use super::harness::WAIT;

/// Terminal outcome of one responder.
#[derive(Debug, Clone)]
pub enum Outcome {
    Value(Value),
    Failed(RemoteError),
}

/// Everything an execution yielded, in pull order.
#[derive(Debug, Default)]
pub struct Outcomes {
    pub order: Vec<Member>,
    pub by_member: BTreeMap<Member, Outcome>,
}

impl Outcomes {
    pub fn responders(&self) -> BTreeSet<Member> {
        self.by_member.keys().copied().collect()
    }

    pub fn value(&self, member: &Member) -> Option<&Value> {
        match self.by_member.get(member) {
            Some(Outcome::Value(value)) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self, member: &Member) -> Option<&RemoteError> {
        match self.by_member.get(member) {
            Some(Outcome::Failed(err)) => Some(err),
            _ => None,
        }
    }

    pub fn errors(&self) -> usize {
        self.by_member
            .values()
            .filter(|o| matches!(o, Outcome::Failed(_)))
            .count()
    }
}

/// Pull until end of stream, resuming after remote errors.
///
/// Panics on fatal errors, on a member answering twice, or if the execution
/// does not finish in time.
pub async fn collect(execution: &mut Execution) -> Outcomes {
    tokio::time::timeout(WAIT, async {
        let mut outcomes = Outcomes::default();
        loop {
            let (member, outcome) = match execution.next_response().await {
                Ok(Some(Response { sender, value })) => (sender, Outcome::Value(value)),
                Ok(None) => return outcomes,
                Err(ExecutionError::Remote(err)) => (err.origin, Outcome::Failed(err)),
                Err(err) => panic!("fatal execution error: {}", err),
            };
            assert!(
                outcomes.by_member.insert(member, outcome).is_none(),
                "member {} answered twice",
                member
            );
            outcomes.order.push(member);
        }
    })
    .await
    .expect("execution did not complete")
}

/// Every member of `expected` produced exactly one outcome, and nobody else
/// did.
pub fn assert_complete(outcomes: &Outcomes, expected: &[Member]) {
    let expected: BTreeSet<Member> = expected.iter().copied().collect();
    assert_eq!(
        outcomes.responders(),
        expected,
        "responders differ from the expected set"
    );
    assert_eq!(outcomes.order.len(), expected.len());
}
