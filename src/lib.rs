//! mongo-topology Library
//!
//! Provisions ephemeral MongoDB topologies for exercising client and driver
//! code against real cluster dynamics: elections, online reconfiguration and
//! shard routing.
//!
//! # Components
//!
//! - [`Node`]: one mongod or mongos process with start, stop, purge and a
//!   version probe
//! - [`ReplicaSet`]: initiation, role discovery, membership changes, stepdown
//!   and maintenance mode
//! - [`ConfigServerSet`]: the legacy three-server metadata topology
//! - [`Router`]: a mongos bound to the metadata topology
//! - [`ShardedTopology`]: composes shards, one metadata topology and routers,
//!   and sequences their startup and shutdown
//!
//! Components reach processes and servers only through [`Services`]: a
//! [`Launcher`] for processes and an
//! [`admin_command::CommandClient`] for administrative commands. The
//! [`testing`] module provides an in-memory implementation of both.
//!
//! # CLI Usage
//!
//! ```bash
//! # Print the version and TLS support of the mongod binary
//! mongo-topology discover --mongod /opt/mongodb/bin/mongod
//!
//! # Bring a topology up until Ctrl+C
//! mongo-topology up --topology sharded.yaml
//!
//! # Clear every data directory of a topology
//! mongo-topology purge --topology sharded.yaml
//! ```

pub mod config;
pub mod config_servers;
pub mod deployment;
pub mod discover;
pub mod error;
pub mod event;
pub mod node;
mod phase;
pub mod replset;
pub mod router;
pub mod services;
pub mod sharded;
pub mod testing;

pub use admin_command::{Credentials, HostPort};
pub use config::{BackoffPolicy, TopologyFile};
pub use config_servers::ConfigServerSet;
pub use deployment::Deployment;
pub use error::{Result, TopologyError};
pub use event::{LifecycleState, Notifier, StateEvent};
pub use node::{
    Launcher, Node, NodeOptions, NodeSettings, NodeState, TlsFiles, TlsFlags, TokioLauncher,
};
pub use replset::{
    MaintenanceOptions, MemberRole, MemberSpec, ReconfigureOptions, ReplicaSet, ReplicaSetConfig,
    ReplicaSetOptions, ReplicaSetState, StepDownOptions,
};
pub use router::{ExecuteOptions, Router};
pub use server_version::{MetadataShape, ServerBuild, ServerVersion};
pub use services::Services;
pub use sharded::{
    MetadataTopology, ShardCollectionOptions, ShardedOptions, ShardedTopology, TopologyState,
};
