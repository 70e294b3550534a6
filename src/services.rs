use std::sync::Arc;

use admin_command::{ClientSettings, CommandClient, MongoCommandClient};

use crate::node::{Launcher, TokioLauncher};

/// The external capabilities every component consumes: a process launcher
/// and an administrative command client.
#[derive(Clone)]
pub struct Services {
    pub launcher: Arc<dyn Launcher>,
    pub client: Arc<dyn CommandClient>,
}

impl Services {
    pub fn new(launcher: Arc<dyn Launcher>, client: Arc<dyn CommandClient>) -> Self {
        Self { launcher, client }
    }

    /// Real processes and the MongoDB driver.
    pub fn production(settings: ClientSettings) -> Self {
        Self::new(
            Arc::new(TokioLauncher),
            Arc::new(MongoCommandClient::new(settings)),
        )
    }
}
