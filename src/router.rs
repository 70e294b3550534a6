//! A mongos query router bound to the metadata topology.

use admin_command::{codes, command_database, commands, Credentials, Document, HostPort};
use tracing::{debug, info};

use crate::config::BackoffPolicy;
use crate::error::{Result, TopologyError};
use crate::event::Notifier;
use crate::node::{Node, NodeOptions};
use crate::phase::retry_transient;
use crate::services::Services;
use crate::sharded::ShardedOptions;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Re-execute while the router has not yet learned about a new shard.
    pub re_execute_on_error: bool,
}

pub struct Router {
    node: Node,
    configdb: String,
    retry: BackoffPolicy,
}

impl Router {
    /// `options` is pointed at `configdb` before the node is created.
    pub fn new(
        services: Services,
        notifier: &Notifier,
        options: NodeOptions,
        configdb: String,
        sharded: &ShardedOptions,
    ) -> Self {
        let options = options.routing_to(configdb.clone());
        let node = Node::new(
            services,
            notifier.scoped(options.address().to_string()),
            sharded.mongos_binary.clone(),
            options,
            sharded.node,
            sharded.credentials.clone(),
        );
        Self {
            node,
            configdb,
            retry: sharded.router_retry,
        }
    }

    pub fn address(&self) -> HostPort {
        self.node.address()
    }

    /// The `--configdb` target this router was launched with.
    pub fn configdb(&self) -> &str {
        &self.configdb
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Starting router at {} for {}", self.address(), self.configdb);
        self.node.start().await
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.node.stop().await
    }

    pub async fn purge(&self) -> Result<()> {
        self.node.purge().await
    }

    /// Run `command` against the database of `namespace` (e.g. `admin.$cmd`).
    pub async fn execute_command(
        &self,
        namespace: &str,
        command: Document,
        credentials: Option<&Credentials>,
        options: ExecuteOptions,
    ) -> Result<Document> {
        let db = command_database(namespace);
        let name = commands::command_name(&command)
            .unwrap_or("command")
            .to_string();
        let target = self.address().to_string();
        debug!("Executing '{name}' on router {target}");

        let once = || {
            let command = command.clone();
            let name = name.clone();
            let target = target.clone();
            async move {
                self.node
                    .run_command_as(db, command, credentials.or(self.node.credentials()))
                    .await
                    .map_err(|source| TopologyError::Command {
                        command: name,
                        target,
                        source,
                    })
            }
        };

        if options.re_execute_on_error {
            retry_transient(&self.retry, codes::is_router_discovery_transient, once).await
        } else {
            once().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{quick_sharded_options, SimulatedDeployment};
    use admin_command::{doc, CommandError};
    use std::time::Duration;

    fn router(sim: &SimulatedDeployment) -> Router {
        let sharded = ShardedOptions {
            router_retry: BackoffPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..quick_sharded_options()
        };
        Router::new(
            sim.services(),
            &Notifier::root("test"),
            NodeOptions::new("127.0.0.1", 51000).with_dbpath("/data/mongos"),
            "csrs/127.0.0.1:35000".to_string(),
            &sharded,
        )
    }

    fn shard_not_found() -> CommandError {
        CommandError::server(codes::SHARD_NOT_FOUND, "ShardNotFound", "no such shard rs0")
    }

    #[test]
    fn test_router_has_no_data_directory() {
        let sim = SimulatedDeployment::new();
        let router = router(&sim);
        assert_eq!(router.node().options().dbpath, None);
        assert!(router
            .node()
            .options()
            .to_args()
            .windows(2)
            .any(|w| w[0] == "--configdb" && w[1] == "csrs/127.0.0.1:35000"));
    }

    #[tokio::test]
    async fn test_re_execute_until_shard_is_known() {
        let sim = SimulatedDeployment::new();
        sim.register_shard("rs0");
        let mut router = router(&sim);
        router.start().await.unwrap();
        sim.fail_command(&router.address(), "enableSharding", 2, shard_not_found());

        let reply = router
            .execute_command(
                "admin.$cmd",
                doc! { "enableSharding": "app" },
                None,
                ExecuteOptions {
                    re_execute_on_error: true,
                },
            )
            .await;
        let reply = tokio_test::assert_ok!(reply);
        assert_eq!(reply.get_f64("ok").unwrap(), 1.0);
        assert_eq!(sim.commands_named("enableSharding").len(), 3);
        router.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_without_re_execute_fails_immediately() {
        let sim = SimulatedDeployment::new();
        let mut router = router(&sim);
        router.start().await.unwrap();
        sim.fail_command(&router.address(), "enableSharding", 1, shard_not_found());

        let result = router
            .execute_command(
                "admin.$cmd",
                doc! { "enableSharding": "app" },
                None,
                ExecuteOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(TopologyError::Command { .. })));
        assert_eq!(sim.commands_named("enableSharding").len(), 1);
        router.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_re_execute_budget_is_bounded() {
        let sim = SimulatedDeployment::new();
        let mut router = router(&sim);
        router.start().await.unwrap();
        sim.fail_command(&router.address(), "enableSharding", 10, shard_not_found());

        let result = router
            .execute_command(
                "admin.$cmd",
                doc! { "enableSharding": "app" },
                None,
                ExecuteOptions {
                    re_execute_on_error: true,
                },
            )
            .await;
        assert!(matches!(
            result,
            Err(TopologyError::TransientCommand { attempts: 3, .. })
        ));
        router.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_other_errors_are_not_re_executed() {
        let sim = SimulatedDeployment::new();
        let mut router = router(&sim);
        router.start().await.unwrap();
        sim.fail_command(
            &router.address(),
            "enableSharding",
            1,
            CommandError::server(13, "Unauthorized", "not authorized on admin"),
        );

        let result = router
            .execute_command(
                "admin.$cmd",
                doc! { "enableSharding": "app" },
                None,
                ExecuteOptions {
                    re_execute_on_error: true,
                },
            )
            .await;
        assert!(matches!(result, Err(TopologyError::Command { .. })));
        assert_eq!(sim.commands_named("enableSharding").len(), 1);
        router.stop().await.unwrap();
    }
}
