//! Test infrastructure.
//!
//! [`SimulatedDeployment`] stands in for both the process launcher and the
//! command client, so replica sets and sharded topologies can be driven end
//! to end without a mongod binary. The helpers below build members and
//! options with timings short enough for tests.

pub mod simulation;

use std::time::Duration;

pub use simulation::{RecordedCommand, SimulatedDeployment};

use crate::config::BackoffPolicy;
use crate::node::{NodeOptions, NodeSettings};
use crate::replset::{MemberSpec, ReplicaSetOptions};
use crate::sharded::ShardedOptions;

/// A member on 127.0.0.1 with a data directory named after its port.
pub fn local_member(port: u16) -> MemberSpec {
    MemberSpec::new(local_node(port))
}

pub fn local_node(port: u16) -> NodeOptions {
    NodeOptions::new("127.0.0.1", port).with_dbpath(format!("/data/db-{port}"))
}

pub fn quick_node_settings() -> NodeSettings {
    NodeSettings {
        start_timeout: Duration::from_secs(2),
        probe_interval: Duration::from_millis(5),
        stop_grace: Duration::from_secs(1),
    }
}

pub fn quick_backoff() -> BackoffPolicy {
    BackoffPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(2),
        max_delay: Duration::from_millis(10),
    }
}

pub fn quick_replica_set_options(set_name: &str) -> ReplicaSetOptions {
    let mut options = ReplicaSetOptions::new(set_name);
    options.election_timeout = Duration::from_millis(500);
    options.poll_interval = Duration::from_millis(5);
    options.reconfigure_retry = quick_backoff();
    options.node = quick_node_settings();
    options
}

pub fn quick_sharded_options() -> ShardedOptions {
    ShardedOptions {
        node: quick_node_settings(),
        router_retry: quick_backoff(),
        ..ShardedOptions::default()
    }
}

/// Install a test subscriber honouring `RUST_LOG`; repeated calls are fine.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
