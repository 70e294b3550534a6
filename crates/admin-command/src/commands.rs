//! Builders for the command documents the manager sends.

use bson::{doc, Document};

/// Role probe understood by every server generation.
pub fn is_master() -> Document {
    doc! { "isMaster": 1 }
}

pub fn repl_set_initiate(config: Document) -> Document {
    doc! { "replSetInitiate": config }
}

pub fn repl_set_get_config() -> Document {
    doc! { "replSetGetConfig": 1 }
}

pub fn repl_set_reconfig(config: Document, force: bool) -> Document {
    doc! { "replSetReconfig": config, "force": force }
}

pub fn repl_set_step_down(step_down_secs: u64, force: bool) -> Document {
    doc! { "replSetStepDown": step_down_secs as i64, "force": force }
}

pub fn repl_set_maintenance(enable: bool) -> Document {
    doc! { "replSetMaintenance": enable }
}

pub fn add_shard(shard_url: &str) -> Document {
    doc! { "addShard": shard_url }
}

pub fn enable_sharding(db: &str) -> Document {
    doc! { "enableSharding": db }
}

pub fn shard_collection(namespace: &str, key: Document, unique: bool) -> Document {
    let mut command = doc! { "shardCollection": namespace, "key": key };
    if unique {
        command.insert("unique", true);
    }
    command
}

/// Name of a command document (its first key).
pub fn command_name(command: &Document) -> Option<&str> {
    command.keys().next().map(String::as_str)
}
