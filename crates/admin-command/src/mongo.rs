//! `CommandClient` backed by the official MongoDB driver.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use bson::Document;
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, Credential, ServerAddress, Tls, TlsOptions};
use mongodb::Client;
use tracing::debug;

use crate::{CommandClient, CommandError, Credentials, HostPort};

/// TLS settings for connecting to servers started with `--tlsMode requireTLS`.
#[derive(Debug, Clone, Default)]
pub struct ClientTls {
    pub ca_file: Option<PathBuf>,
    pub certificate_key_file: Option<PathBuf>,
    pub allow_invalid_certificates: bool,
}

/// Connection settings shared by every per-server client.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub connect_timeout: Duration,
    pub server_selection_timeout: Duration,
    pub tls: Option<ClientTls>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            server_selection_timeout: Duration::from_secs(5),
            tls: None,
        }
    }
}

type ClientKey = (HostPort, Option<Credentials>);

/// Runs commands over direct connections, one cached driver client per
/// address and credential pair.
pub struct MongoCommandClient {
    settings: ClientSettings,
    clients: Mutex<HashMap<ClientKey, Client>>,
}

impl MongoCommandClient {
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(
        &self,
        target: &HostPort,
        credentials: Option<&Credentials>,
    ) -> Result<Client, CommandError> {
        let key = (target.clone(), credentials.cloned());
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| CommandError::Transport("client cache poisoned".to_string()))?;
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let client = Client::with_options(self.client_options(target, credentials))
            .map_err(|e| {
                CommandError::Transport(format!("failed to build client for {target}: {e}"))
            })?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn client_options(
        &self,
        target: &HostPort,
        credentials: Option<&Credentials>,
    ) -> ClientOptions {
        let mut options = ClientOptions::default();
        options.hosts = vec![ServerAddress::Tcp {
            host: target.host.clone(),
            port: Some(target.port),
        }];
        options.direct_connection = Some(true);
        options.connect_timeout = Some(self.settings.connect_timeout);
        options.server_selection_timeout = Some(self.settings.server_selection_timeout);
        options.app_name = Some("mongo-topology".to_string());

        if let Some(credentials) = credentials {
            let mut credential = Credential::default();
            credential.username = Some(credentials.username.clone());
            credential.password = Some(credentials.password.clone());
            credential.source = Some(
                credentials
                    .source
                    .clone()
                    .unwrap_or_else(|| "admin".to_string()),
            );
            options.credential = Some(credential);
        }

        if let Some(tls) = &self.settings.tls {
            let mut tls_options = TlsOptions::default();
            tls_options.ca_file_path = tls.ca_file.clone();
            tls_options.cert_key_file_path = tls.certificate_key_file.clone();
            tls_options.allow_invalid_certificates = Some(tls.allow_invalid_certificates);
            options.tls = Some(Tls::Enabled(tls_options));
        }

        options
    }
}

impl Default for MongoCommandClient {
    fn default() -> Self {
        Self::new(ClientSettings::default())
    }
}

#[async_trait::async_trait]
impl CommandClient for MongoCommandClient {
    async fn run_command(
        &self,
        target: &HostPort,
        db: &str,
        command: Document,
        credentials: Option<&Credentials>,
    ) -> Result<Document, CommandError> {
        let client = self.client_for(target, credentials)?;
        debug!("Running {command} against {target}/{db}");

        client
            .database(db)
            .run_command(command)
            .await
            .map_err(classify_driver_error)
    }
}

fn classify_driver_error(err: mongodb::error::Error) -> CommandError {
    match err.kind.as_ref() {
        ErrorKind::Command(command_error) => CommandError::Server {
            code: command_error.code,
            code_name: command_error.code_name.clone(),
            message: command_error.message.clone(),
        },
        _ => CommandError::Transport(err.to_string()),
    }
}
