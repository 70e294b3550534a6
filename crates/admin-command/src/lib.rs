//! Administrative command surface for mongod and mongos processes.
//!
//! The topology manager talks to running servers exclusively through the
//! [`CommandClient`] trait: one request document in, one reply document or a
//! [`CommandError`] out. This crate provides:
//!
//! - `HostPort` addresses and `Credentials`
//! - builders for every command the manager issues (`commands`)
//! - the typed `isMaster` reply used for role discovery (`IsMasterReply`)
//! - classification of the transient server conditions that make a command
//!   eligible for retry (`codes`)
//! - `MongoCommandClient`, the production client built on the `mongodb` driver

mod address;
pub mod codes;
pub mod commands;
mod error;
mod mongo;
mod reply;

pub use address::{AddressParseError, HostPort};
pub use error::CommandError;
pub use mongo::{ClientSettings, ClientTls, MongoCommandClient};
pub use reply::IsMasterReply;

pub use bson::{doc, Bson, Document};

/// User credentials for authenticated deployments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    /// Authentication database, `admin` when unset.
    pub source: Option<String>,
}

/// Sends one administrative command to one server.
///
/// Implementations connect directly to `target` (no topology discovery), so
/// commands reach secondaries, arbiters and routers alike.
#[async_trait::async_trait]
pub trait CommandClient: Send + Sync {
    /// Run `command` against database `db` on `target`.
    ///
    /// A reply with `ok: 0` is reported as [`CommandError::Server`]; failure to
    /// reach the server at all is [`CommandError::Transport`].
    async fn run_command(
        &self,
        target: &HostPort,
        db: &str,
        command: Document,
        credentials: Option<&Credentials>,
    ) -> Result<Document, CommandError>;
}

/// Database name of a command namespace such as `admin.$cmd`.
pub fn command_database(namespace: &str) -> &str {
    namespace.strip_suffix(".$cmd").unwrap_or(namespace)
}
