//! Sharded topology lifecycle against the simulated deployment.

use admin_command::{codes, doc, CommandError};
use mongo_topology::testing::{
    init_tracing, local_member, local_node, quick_replica_set_options, quick_sharded_options,
    SimulatedDeployment,
};
use mongo_topology::{
    HostPort, LifecycleState, MetadataShape, MetadataTopology, ShardCollectionOptions,
    ShardedTopology, TlsFiles, TopologyError, TopologyState,
};

fn three_members(base_port: u16) -> Vec<mongo_topology::MemberSpec> {
    (0..3).map(|i| local_member(base_port + i)).collect()
}

/// Three shards, a three-member metadata topology and two routers.
async fn cluster(sim: &SimulatedDeployment) -> Result<ShardedTopology, Box<dyn std::error::Error>> {
    let mut topology = ShardedTopology::new(sim.services(), quick_sharded_options());
    for (i, base_port) in [31000u16, 31100, 31200].into_iter().enumerate() {
        topology.add_shard(
            quick_replica_set_options(&format!("rs{i}")),
            three_members(base_port),
        )?;
    }
    topology
        .add_configuration_servers(quick_replica_set_options("cfg"), three_members(32000))
        .await?;
    topology.add_proxies(vec![local_node(27017), local_node(27018)])?;
    Ok(topology)
}

#[tokio::test]
async fn test_proxies_require_metadata_topology() {
    let sim = SimulatedDeployment::new();
    let mut topology = ShardedTopology::new(sim.services(), quick_sharded_options());

    let result = topology.add_proxies(vec![local_node(27017)]);
    assert!(matches!(result, Err(TopologyError::ConfigOrder(_))));
    assert!(topology.routers().is_empty());
}

#[tokio::test]
async fn test_start_registers_every_shard() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let sim = SimulatedDeployment::new();
    let mut topology = cluster(&sim).await?;
    let mut events = topology.subscribe();

    topology.start().await?;
    assert_eq!(topology.state(), TopologyState::Running);
    assert_eq!(topology.url(), "mongodb://127.0.0.1:27017,127.0.0.1:27018/");

    let add_shards = sim.commands_named("addShard");
    assert_eq!(add_shards.len(), 3);
    let first_router = HostPort::new("127.0.0.1", 27017);
    assert!(add_shards.iter().all(|c| c.target == first_router));
    let urls: Vec<&str> = add_shards
        .iter()
        .filter_map(|c| c.command.get_str("addShard").ok())
        .collect();
    assert_eq!(
        urls,
        vec![
            "rs0/127.0.0.1:31000,127.0.0.1:31001,127.0.0.1:31002",
            "rs1/127.0.0.1:31100,127.0.0.1:31101,127.0.0.1:31102",
            "rs2/127.0.0.1:31200,127.0.0.1:31201,127.0.0.1:31202",
        ]
    );
    assert_eq!(sim.registered_shards(), vec!["rs0", "rs1", "rs2"]);
    // 9 shard members, 3 config servers, 2 routers
    assert_eq!(sim.running_count(), 14);

    let events: Vec<_> = std::iter::from_fn(|| events.try_recv().ok()).collect();
    assert!(events.iter().any(|e| {
        e.component == "sharded/rs0/127.0.0.1:31000" && e.state == LifecycleState::Running
    }));
    let last = events.last().ok_or("no events")?;
    assert_eq!(last.component, "sharded");
    assert_eq!(last.state, LifecycleState::Running);

    topology.stop().await?;
    assert_eq!(topology.state(), TopologyState::Stopped);
    assert_eq!(sim.running_count(), 0);

    // Already stopped.
    topology.stop().await?;
    assert_eq!(topology.state(), TopologyState::Stopped);
    Ok(())
}

#[tokio::test]
async fn test_replicated_metadata_for_modern_servers() -> Result<(), Box<dyn std::error::Error>> {
    let sim = SimulatedDeployment::new();
    sim.set_version_output("db version v3.2.1\n");
    let mut topology = ShardedTopology::new(sim.services(), quick_sharded_options());

    let shape = topology
        .add_configuration_servers(quick_replica_set_options("cfg"), three_members(32000))
        .await?;
    topology.add_proxies(vec![local_node(27017)])?;

    assert_eq!(shape, MetadataShape::Replicated);
    assert!(matches!(
        topology.metadata(),
        Some(MetadataTopology::Replicated(_))
    ));
    assert_eq!(
        topology.routers()[0].configdb(),
        "cfg/127.0.0.1:32000,127.0.0.1:32001,127.0.0.1:32002"
    );
    Ok(())
}

#[tokio::test]
async fn test_legacy_metadata_for_old_servers() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let sim = SimulatedDeployment::new();
    sim.set_version_output("db version v3.0.9\n");
    let mut topology = ShardedTopology::new(sim.services(), quick_sharded_options());
    topology.add_shard(quick_replica_set_options("rs0"), three_members(31000))?;

    let shape = topology
        .add_configuration_servers(quick_replica_set_options("cfg"), three_members(32000))
        .await?;
    topology.add_proxies(vec![local_node(27017)])?;

    assert_eq!(shape, MetadataShape::Legacy);
    let Some(MetadataTopology::Legacy(servers)) = topology.metadata() else {
        return Err("expected legacy config servers".into());
    };
    assert_eq!(servers.nodes().len(), 3);
    assert_eq!(
        topology.routers()[0].configdb(),
        "127.0.0.1:32000,127.0.0.1:32001,127.0.0.1:32002"
    );

    topology.start().await?;
    assert_eq!(sim.registered_shards(), vec!["rs0"]);
    // Legacy config servers never join a replica set.
    assert!(sim.config_of("cfg").is_none());
    topology.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_legacy_metadata_needs_three_servers() {
    let sim = SimulatedDeployment::new();
    sim.set_version_output("db version v3.0.9\n");
    let mut topology = ShardedTopology::new(sim.services(), quick_sharded_options());

    let result = topology
        .add_configuration_servers(quick_replica_set_options("cfg"), vec![local_member(32000)])
        .await;
    assert!(matches!(result, Err(TopologyError::InvalidConfig(_))));
    assert!(topology.metadata().is_none());
}

#[tokio::test]
async fn test_restart_is_stop_then_start() -> Result<(), Box<dyn std::error::Error>> {
    let sim = SimulatedDeployment::new();
    let mut topology = cluster(&sim).await?;

    topology.start().await?;
    topology.restart().await?;

    assert_eq!(topology.state(), TopologyState::Running);
    assert_eq!(sim.commands_named("addShard").len(), 6);
    assert_eq!(sim.registered_shards(), vec!["rs0", "rs1", "rs2"]);
    assert_eq!(sim.running_count(), 14);

    topology.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_stop_after_failed_start_cleans_up() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let sim = SimulatedDeployment::new();
    sim.exit_on_start(HostPort::new("127.0.0.1", 27018));
    let mut topology = cluster(&sim).await?;

    let result = topology.start().await;
    assert!(result.is_err());
    assert_eq!(topology.state(), TopologyState::Stopped);
    assert!(sim.running_count() > 0);

    topology.stop().await?;
    assert_eq!(sim.running_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_enable_sharding_and_shard_collection() -> Result<(), Box<dyn std::error::Error>> {
    let sim = SimulatedDeployment::new();
    let mut topology = cluster(&sim).await?;
    topology.start().await?;

    let unsharded = topology
        .shard_collection(
            "app",
            "users",
            doc! { "_id": "hashed" },
            ShardCollectionOptions::default(),
            None,
        )
        .await;
    let code = unsharded
        .err()
        .and_then(|e| e.command_error().and_then(|c| c.code()));
    assert_eq!(code, Some(20));

    topology.enable_sharding("app", None).await?;
    let reply = topology
        .shard_collection(
            "app",
            "users",
            doc! { "email": 1 },
            ShardCollectionOptions { unique: true },
            None,
        )
        .await?;
    assert_eq!(reply.get_str("collectionsharded")?, "app.users");

    let sent = sim.commands_named("shardCollection");
    let last = sent.last().ok_or("shardCollection not sent")?;
    assert_eq!(last.db, "admin");
    assert!(last.command.get_bool("unique")?);

    topology.stop().await?;
    Ok(())
}

/// Position of the first and last launch whose arguments contain `flag`.
fn launch_span(launches: &[Vec<String>], flag: &str) -> Option<(usize, usize)> {
    let positions: Vec<usize> = launches
        .iter()
        .enumerate()
        .filter(|(_, args)| args.iter().any(|arg| arg == flag))
        .map(|(i, _)| i)
        .collect();
    Some((*positions.first()?, *positions.last()?))
}

#[tokio::test]
async fn test_start_phases_run_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let sim = SimulatedDeployment::new();
    let mut topology = cluster(&sim).await?;
    topology.start().await?;

    let launches = sim.launches();
    let (_, last_shard) = launch_span(&launches, "--shardsvr").ok_or("no shard launched")?;
    let (first_config, last_config) =
        launch_span(&launches, "--configsvr").ok_or("no config server launched")?;
    let (first_router, _) = launch_span(&launches, "--configdb").ok_or("no router launched")?;
    assert!(last_shard < first_config, "{launches:?}");
    assert!(last_config < first_router, "{launches:?}");
    assert_eq!(launches.len(), 14);

    // Shard data is cleared before the config servers'.
    let purged: Vec<String> = sim
        .purged_paths()
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    let last_shard_purge = purged
        .iter()
        .rposition(|p| p.starts_with("/data/db-31"))
        .ok_or("shards not purged")?;
    let first_config_purge = purged
        .iter()
        .position(|p| p.starts_with("/data/db-32"))
        .ok_or("config servers not purged")?;
    assert!(last_shard_purge < first_config_purge);

    // Shards are registered only once both routers answer.
    let commands = sim.commands();
    let first_add_shard = commands
        .iter()
        .position(|c| c.name == "addShard")
        .ok_or("no addShard")?;
    let second_router = HostPort::new("127.0.0.1", 27018);
    assert!(commands[..first_add_shard]
        .iter()
        .any(|c| c.target == second_router && c.name == "isMaster"));

    topology.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_start_re_executes_add_shard_until_router_knows_it(
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let sim = SimulatedDeployment::new();
    sim.fail_command(
        &HostPort::new("127.0.0.1", 27017),
        "addShard",
        1,
        CommandError::server(codes::SHARD_NOT_FOUND, "ShardNotFound", "no such shard rs0"),
    );
    let mut topology = cluster(&sim).await?;

    topology.start().await?;

    assert_eq!(topology.state(), TopologyState::Running);
    assert_eq!(sim.commands_named("addShard").len(), 4);
    assert_eq!(sim.registered_shards(), vec!["rs0", "rs1", "rs2"]);
    topology.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_legacy_topology_launches_with_ssl_flags() -> Result<(), Box<dyn std::error::Error>> {
    let sim = SimulatedDeployment::new();
    sim.set_version_output("db version v3.0.9\n");
    let tls = TlsFiles {
        certificate_key_file: "/ssl/server.pem".into(),
        ca_file: None,
        allow_invalid_certificates: false,
    };
    let mut topology = ShardedTopology::new(sim.services(), quick_sharded_options());
    topology.add_shard(quick_replica_set_options("rs0"), three_members(31000))?;
    let config_servers = (0..3)
        .map(|i| {
            let mut member = local_member(32000 + i);
            member.options = member.options.with_tls(tls.clone());
            member
        })
        .collect();
    topology
        .add_configuration_servers(quick_replica_set_options("cfg"), config_servers)
        .await?;
    topology.add_proxies(vec![local_node(27017).with_tls(tls)])?;

    topology.start().await?;

    let launches = sim.launches();
    let secured: Vec<&Vec<String>> = launches
        .iter()
        .filter(|args| args.iter().any(|a| a == "--sslMode"))
        .collect();
    assert_eq!(secured.len(), 4);
    assert!(launches.iter().all(|args| !args.iter().any(|a| a == "--tlsMode")));
    // The version was probed once, when the metadata shape was chosen.
    assert_eq!(sim.version_probes(), 1);

    topology.stop().await?;
    Ok(())
}
