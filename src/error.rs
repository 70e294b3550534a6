//! Error taxonomy for topology lifecycle operations.

use std::time::Duration;

use admin_command::CommandError;
use server_version::VersionError;
use thiserror::Error;

/// Failure of a topology lifecycle operation.
#[derive(Error, Debug)]
pub enum TopologyError {
    /// A server process failed to spawn or to answer within its start timeout.
    #[error("failed to start {target}: {reason}")]
    ProcessStart { target: String, reason: String },

    /// `--version` output did not contain a usable version.
    #[error("could not determine version of '{binary}': {source}")]
    VersionParse {
        binary: String,
        #[source]
        source: VersionError,
    },

    /// Components were registered or started in the wrong order.
    #[error("{0}")]
    ConfigOrder(String),

    /// A convergence condition (election, reconfigure, maintenance) did not
    /// hold within its bound.
    #[error("replica set '{set_name}' did not reach {waiting_for} within {waited:?}")]
    ElectionTimeout {
        set_name: String,
        waiting_for: String,
        waited: Duration,
    },

    /// A retryable condition persisted through every retry.
    #[error("'{command}' on {target} still failing after {attempts} attempts: {source}")]
    TransientCommand {
        command: String,
        target: String,
        attempts: usize,
        #[source]
        source: CommandError,
    },

    /// The primary refused a new replica set configuration.
    #[error("reconfigure of replica set '{set_name}' rejected: {source}")]
    ReconfigureRejected {
        set_name: String,
        #[source]
        source: CommandError,
    },

    #[error("{address} is not a member of replica set '{set_name}'")]
    MemberNotFound { set_name: String, address: String },

    #[error("cannot purge {address} while its process is running")]
    PurgeConflict { address: String },

    #[error("invalid topology configuration: {0}")]
    InvalidConfig(String),

    #[error("no router registered in the sharded topology")]
    NoRouter,

    /// A non-retryable administrative command failure.
    #[error("'{command}' on {target} failed: {source}")]
    Command {
        command: String,
        target: String,
        #[source]
        source: CommandError,
    },

    #[error("I/O error while {action}: {source}")]
    Io {
        action: String,
        #[source]
        source: std::io::Error,
    },

    /// Several independent operations of one phase failed.
    #[error("{} operations failed: {}", .0.len(), join_messages(.0))]
    Aggregate(Vec<TopologyError>),
}

pub type Result<T> = std::result::Result<T, TopologyError>;

impl TopologyError {
    pub(crate) fn io(action: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            action: action.into(),
            source,
        }
    }

    /// The underlying command error, for command-level failures.
    pub fn command_error(&self) -> Option<&CommandError> {
        match self {
            Self::Command { source, .. }
            | Self::TransientCommand { source, .. }
            | Self::ReconfigureRejected { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn join_messages(errors: &[TopologyError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
