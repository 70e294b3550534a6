//! Server error codes the manager recognizes, and their retry classification.

use crate::CommandError;

pub const HOST_UNREACHABLE: i32 = 6;
pub const HOST_NOT_FOUND: i32 = 7;
pub const ALREADY_INITIALIZED: i32 = 23;
pub const SHARD_NOT_FOUND: i32 = 70;
pub const NODE_NOT_FOUND: i32 = 74;
pub const INVALID_REPLICA_SET_CONFIG: i32 = 93;
pub const NOT_YET_INITIALIZED: i32 = 94;
pub const NEW_REPLICA_SET_CONFIGURATION_INCOMPATIBLE: i32 = 103;
pub const CONFIGURATION_IN_PROGRESS: i32 = 109;
pub const CONFLICTING_OPERATION_IN_PROGRESS: i32 = 117;
pub const FAILED_TO_SATISFY_READ_PREFERENCE: i32 = 133;
pub const PRIMARY_STEPPED_DOWN: i32 = 189;
pub const NETWORK_INTERFACE_EXCEEDED_TIME_LIMIT: i32 = 202;
pub const NOT_WRITABLE_PRIMARY: i32 = 10107;
pub const INTERRUPTED_DUE_TO_REPL_STATE_CHANGE: i32 = 11602;
pub const NOT_PRIMARY_NO_SECONDARY_OK: i32 = 13435;
pub const NOT_PRIMARY_OR_SECONDARY: i32 = 13436;

const REPLICATION_TRANSIENT: &[i32] = &[
    NOT_WRITABLE_PRIMARY,
    NOT_PRIMARY_NO_SECONDARY_OK,
    NOT_PRIMARY_OR_SECONDARY,
    INTERRUPTED_DUE_TO_REPL_STATE_CHANGE,
    PRIMARY_STEPPED_DOWN,
    CONFIGURATION_IN_PROGRESS,
    CONFLICTING_OPERATION_IN_PROGRESS,
];

const ROUTER_DISCOVERY_TRANSIENT: &[i32] = &[
    HOST_UNREACHABLE,
    HOST_NOT_FOUND,
    SHARD_NOT_FOUND,
    FAILED_TO_SATISFY_READ_PREFERENCE,
    NETWORK_INTERFACE_EXCEEDED_TIME_LIMIT,
];

const ROUTER_DISCOVERY_MESSAGES: &[&str] = &[
    "could not find host matching read preference",
    "no such shard",
];

/// A replica-set mutation failed because of a primary/stepdown race and may
/// succeed when retried.
pub fn is_replication_transient(err: &CommandError) -> bool {
    match err {
        CommandError::Transport(_) => true,
        CommandError::Server { code, .. } => REPLICATION_TRANSIENT.contains(code),
    }
}

/// The router has not yet learned about a shard (or its hosts) that was
/// registered moments ago.
pub fn is_router_discovery_transient(err: &CommandError) -> bool {
    match err {
        CommandError::Transport(_) => false,
        CommandError::Server { code, message, .. } => {
            let message = message.to_ascii_lowercase();
            ROUTER_DISCOVERY_TRANSIENT.contains(code)
                || ROUTER_DISCOVERY_MESSAGES.iter().any(|m| message.contains(m))
        }
    }
}
