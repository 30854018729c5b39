//! Test group setup over a [`LocalCluster`].

#![allow(dead_code)] // Not every scenario uses every helper

use std::time::Duration;

use cohort::{Commander, CommanderConfig, LocalCluster, Member};
use tokio::sync::broadcast::error::RecvError;

pub const GROUP: &str = "test-group";

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub fn config() -> CommanderConfig {
    CommanderConfig::for_group(GROUP).expect("valid config")
}

/// Commanders sharing one cluster, in join order.
pub struct TestGroup {
    pub cluster: LocalCluster,
    pub commanders: Vec<Commander>,
}

impl TestGroup {
    /// Start `size` commanders and wait until each has seen all of them.
    pub async fn start(size: usize) -> Self {
        init_tracing();
        let mut group = Self {
            cluster: LocalCluster::new(),
            commanders: Vec::new(),
        };
        for _ in 0..size {
            group.join().await;
        }
        group.settle().await;
        group
    }

    /// Add one commander on its own node.
    pub async fn join(&mut self) -> Member {
        let node_id = self.commanders.len() as u32 + 1;
        let commander = Commander::connect(self.cluster.transport(node_id), config())
            .await
            .expect("connect");
        let member = commander.local_member();
        self.commanders.push(commander);
        member
    }

    /// Wait until every live commander reports the cluster's membership.
    pub async fn settle(&self) {
        let expected = self.cluster.members(GROUP);
        let live: Vec<&Commander> = self
            .commanders
            .iter()
            .filter(|c| expected.contains(&c.local_member()))
            .collect();

        tokio::time::timeout(WAIT, async {
            for commander in live {
                // Subscribe before reading so no change slips between the two
                let mut changes = commander.subscribe_membership();
                while commander.members() != expected {
                    match changes.recv().await {
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => panic!("{} stopped dispatching", commander.local_member()),
                    }
                }
            }
        })
        .await
        .expect("group did not settle");
    }

    pub fn member(&self, index: usize) -> Member {
        self.commanders[index].local_member()
    }

    pub fn members(&self) -> Vec<Member> {
        self.commanders.iter().map(Commander::local_member).collect()
    }
}
