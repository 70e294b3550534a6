//! Replica set member specs and configuration documents.

use std::collections::{BTreeMap, HashSet};
use std::ops::Not;

use admin_command::Document;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TopologyError};
use crate::node::NodeOptions;

/// A member to launch, with the role attributes it gets in the set config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemberSpec {
    #[serde(flatten)]
    pub options: NodeOptions,
    #[serde(default)]
    pub arbiter: bool,
    #[serde(default)]
    pub priority: Option<f64>,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub votes: Option<i32>,
    #[serde(default)]
    pub tags: Option<BTreeMap<String, String>>,
}

impl MemberSpec {
    pub fn new(options: NodeOptions) -> Self {
        Self {
            options,
            arbiter: false,
            priority: None,
            hidden: false,
            votes: None,
            tags: None,
        }
    }

    pub fn arbiter(mut self) -> Self {
        self.arbiter = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn with_priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_votes(mut self, votes: i32) -> Self {
        self.votes = Some(votes);
        self
    }

    /// Config entry for this member under `_id` `id`.
    pub fn member_config(&self, id: i32) -> MemberConfig {
        let priority = if self.arbiter || self.hidden {
            0.0
        } else {
            self.priority.unwrap_or(1.0)
        };
        MemberConfig {
            id,
            host: self.options.address().to_string(),
            arbiter_only: self.arbiter,
            priority,
            hidden: self.hidden,
            votes: self.votes.unwrap_or(1),
            build_indexes: true,
            tags: self.tags.clone(),
        }
    }
}

/// One entry of `members` in a replica set configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberConfig {
    #[serde(rename = "_id")]
    pub id: i32,
    pub host: String,
    #[serde(default, skip_serializing_if = "Not::not")]
    pub arbiter_only: bool,
    #[serde(default = "default_priority")]
    pub priority: f64,
    #[serde(default, skip_serializing_if = "Not::not")]
    pub hidden: bool,
    #[serde(default = "default_votes")]
    pub votes: i32,
    #[serde(default = "default_build_indexes", skip_serializing_if = "is_true")]
    pub build_indexes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

impl MemberConfig {
    pub fn can_vote(&self) -> bool {
        self.votes > 0
    }

    pub fn is_electable(&self) -> bool {
        !self.arbiter_only && !self.hidden && self.priority > 0.0
    }
}

fn default_priority() -> f64 {
    1.0
}
fn default_votes() -> i32 {
    1
}
fn default_build_indexes() -> bool {
    true
}
fn is_true(value: &bool) -> bool {
    *value
}

/// A replica set configuration document (`replSetGetConfig().config`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaSetConfig {
    #[serde(rename = "_id")]
    pub id: String,
    pub version: i64,
    #[serde(default, skip_serializing_if = "Not::not")]
    pub configsvr: bool,
    #[serde(
        rename = "protocolVersion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub protocol_version: Option<i64>,
    pub members: Vec<MemberConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Document>,
}

impl ReplicaSetConfig {
    /// Initial (version 1) configuration, `_id`s in registration order.
    pub fn initial(set_name: &str, specs: &[MemberSpec], configsvr: bool) -> Self {
        Self {
            id: set_name.to_string(),
            version: 1,
            configsvr,
            protocol_version: None,
            members: specs
                .iter()
                .enumerate()
                .map(|(i, spec)| spec.member_config(i as i32))
                .collect(),
            settings: None,
        }
    }

    pub fn member(&self, host: &str) -> Option<&MemberConfig> {
        self.members.iter().find(|m| m.host == host)
    }

    pub fn next_member_id(&self) -> i32 {
        self.members.iter().map(|m| m.id + 1).max().unwrap_or(0)
    }

    pub fn arbiter_count(&self) -> usize {
        self.members.iter().filter(|m| m.arbiter_only).count()
    }

    pub fn voting_count(&self) -> usize {
        self.members.iter().filter(|m| m.can_vote()).count()
    }

    /// Member `_id`s and hosts must be unique and the set non-empty.
    pub fn validate(&self) -> Result<()> {
        if self.members.is_empty() {
            return Err(TopologyError::InvalidConfig(format!(
                "replica set '{}' has no members",
                self.id
            )));
        }
        let mut ids = HashSet::new();
        let mut hosts = HashSet::new();
        for member in &self.members {
            if !ids.insert(member.id) {
                return Err(TopologyError::InvalidConfig(format!(
                    "duplicate member _id {} in replica set '{}'",
                    member.id, self.id
                )));
            }
            if !hosts.insert(member.host.as_str()) {
                return Err(TopologyError::InvalidConfig(format!(
                    "duplicate member host {} in replica set '{}'",
                    member.host, self.id
                )));
            }
        }
        Ok(())
    }

    pub fn to_document(&self) -> Result<Document> {
        bson::to_document(self).map_err(|e| {
            TopologyError::InvalidConfig(format!("cannot encode config of '{}': {e}", self.id))
        })
    }

    pub fn from_document(document: Document) -> Result<Self> {
        bson::from_document(document)
            .map_err(|e| TopologyError::InvalidConfig(format!("malformed replica set config: {e}")))
    }
}
