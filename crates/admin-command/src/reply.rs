use bson::Document;
use serde::Deserialize;

use crate::CommandError;

/// The fields of an `isMaster` reply the manager inspects.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsMasterReply {
    #[serde(default, rename = "ismaster")]
    pub is_master: bool,
    #[serde(default)]
    pub secondary: bool,
    #[serde(default)]
    pub arbiter_only: bool,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub passive: bool,
    pub set_name: Option<String>,
    pub set_version: Option<i64>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub passives: Vec<String>,
    #[serde(default)]
    pub arbiters: Vec<String>,
    pub primary: Option<String>,
    pub me: Option<String>,
    /// `isdbgrid` on a router.
    pub msg: Option<String>,
}

impl IsMasterReply {
    pub fn from_document(reply: Document) -> Result<Self, CommandError> {
        bson::from_document(reply)
            .map_err(|e| CommandError::Transport(format!("malformed isMaster reply: {e}")))
    }

    /// Every member address this server lists, in any role.
    pub fn members(&self) -> impl Iterator<Item = &String> {
        self.hosts
            .iter()
            .chain(self.passives.iter())
            .chain(self.arbiters.iter())
    }

    pub fn lists_member(&self, address: &str) -> bool {
        self.members().any(|m| m == address)
    }
}
