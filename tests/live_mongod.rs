//! Tests against real mongod binaries.
//!
//! Ignored by default. Run with `cargo test --test live_mongod -- --ignored`
//! with `mongod` on `PATH`, or point `MONGOD_BINARY` at one.

use std::time::Duration;

use admin_command::ClientSettings;
use mongo_topology::testing::init_tracing;
use mongo_topology::{
    MemberSpec, NodeOptions, ReplicaSet, ReplicaSetOptions, Services, StepDownOptions,
};

fn mongod_binary() -> String {
    std::env::var("MONGOD_BINARY").unwrap_or_else(|_| "mongod".to_string())
}

fn live_options(set_name: &str) -> ReplicaSetOptions {
    let mut options = ReplicaSetOptions::new(set_name);
    options.binary = mongod_binary();
    options
}

fn live_member(dir: &tempfile::TempDir, port: u16) -> MemberSpec {
    MemberSpec::new(
        NodeOptions::new("127.0.0.1", port)
            .with_dbpath(dir.path().join(format!("db-{port}")))
            .with_logpath(dir.path().join(format!("mongod-{port}.log"))),
    )
}

#[tokio::test]
#[ignore = "requires a mongod binary"]
async fn test_live_discover() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let set = ReplicaSet::new(
        Services::production(ClientSettings::default()),
        live_options("live-discover"),
        vec![live_member(&dir, 37017)],
    )?;

    let build = set.discover().await?;
    assert!(build.version.major >= 3);
    Ok(())
}

#[tokio::test]
#[ignore = "requires a mongod binary"]
async fn test_live_replica_set_lifecycle() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let mut set = ReplicaSet::new(
        Services::production(ClientSettings::default()),
        live_options("live"),
        vec![
            live_member(&dir, 37018),
            live_member(&dir, 37019),
            live_member(&dir, 37020).arbiter(),
        ],
    )?;

    set.purge().await?;
    let started = set.start().await;
    if let Err(e) = started {
        set.stop().await?;
        return Err(e.into());
    }

    let old = set.wait_for_primary(Duration::from_secs(60)).await?;
    let new = set
        .step_down_primary(
            false,
            StepDownOptions {
                step_down_secs: 10,
                force: true,
            },
        )
        .await?;
    assert!(new.is_some_and(|address| address != old));

    set.stop().await?;
    Ok(())
}
