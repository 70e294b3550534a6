//! Launch options of a single server process.

use std::collections::BTreeMap;
use std::path::PathBuf;

use admin_command::HostPort;
use serde::Deserialize;
use server_version::ServerVersion;

/// TLS files handed to a server started in required TLS mode.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TlsFiles {
    pub certificate_key_file: PathBuf,
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub allow_invalid_certificates: bool,
}

/// Spelling of the TLS launch flags. Servers before 4.2 only accept the
/// `--ssl*` family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsFlags {
    #[default]
    Tls,
    Ssl,
}

impl TlsFlags {
    pub fn for_version(version: &ServerVersion) -> Self {
        if *version >= ServerVersion::new(4, 2, 0) {
            Self::Tls
        } else {
            Self::Ssl
        }
    }

    fn render(self, tls: &TlsFiles, args: &mut Vec<String>) {
        let (mode, mode_value, key_file, ca_file, allow_invalid) = match self {
            Self::Tls => (
                "--tlsMode",
                "requireTLS",
                "--tlsCertificateKeyFile",
                "--tlsCAFile",
                "--tlsAllowInvalidCertificates",
            ),
            Self::Ssl => (
                "--sslMode",
                "requireSSL",
                "--sslPEMKeyFile",
                "--sslCAFile",
                "--sslAllowInvalidCertificates",
            ),
        };
        args.push(mode.to_string());
        args.push(mode_value.to_string());
        args.push(key_file.to_string());
        args.push(tls.certificate_key_file.display().to_string());
        if let Some(path) = &tls.ca_file {
            args.push(ca_file.to_string());
            args.push(path.display().to_string());
        }
        if tls.allow_invalid_certificates {
            args.push(allow_invalid.to_string());
        }
    }
}

/// Value-typed launch options for a mongod or mongos process.
///
/// Built once by the caller; components that need a variation (a replica set
/// name, the config server switch, a router target) derive a new value with
/// the consuming `with_*`/`in_*` methods.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeOptions {
    #[serde(default = "default_bind_ip")]
    pub bind_ip: String,
    pub port: u16,
    /// Data directory; routers have none.
    #[serde(default)]
    pub dbpath: Option<PathBuf>,
    #[serde(default)]
    pub logpath: Option<PathBuf>,
    #[serde(default)]
    pub repl_set: Option<String>,
    #[serde(default)]
    pub config_server: bool,
    #[serde(default)]
    pub shard_server: bool,
    /// Metadata topology a router connects to.
    #[serde(default)]
    pub configdb: Option<String>,
    #[serde(default)]
    pub tls: Option<TlsFiles>,
    /// Flag family for `tls`. Left unset, a node picks it from the version
    /// of its binary when it starts.
    #[serde(default)]
    pub tls_flags: Option<TlsFlags>,
    /// Additional `--flag value` pairs; a `None` value renders a bare `--flag`.
    #[serde(default)]
    pub extra: BTreeMap<String, Option<String>>,
}

fn default_bind_ip() -> String {
    "127.0.0.1".to_string()
}

impl NodeOptions {
    pub fn new(bind_ip: impl Into<String>, port: u16) -> Self {
        Self {
            bind_ip: bind_ip.into(),
            port,
            dbpath: None,
            logpath: None,
            repl_set: None,
            config_server: false,
            shard_server: false,
            configdb: None,
            tls: None,
            tls_flags: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> HostPort {
        HostPort::new(self.bind_ip.clone(), self.port)
    }

    pub fn with_dbpath(mut self, dbpath: impl Into<PathBuf>) -> Self {
        self.dbpath = Some(dbpath.into());
        self
    }

    pub fn with_logpath(mut self, logpath: impl Into<PathBuf>) -> Self {
        self.logpath = Some(logpath.into());
        self
    }

    pub fn with_tls(mut self, tls: TlsFiles) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_tls_flags(mut self, flags: TlsFlags) -> Self {
        self.tls_flags = Some(flags);
        self
    }

    pub fn with_flag(mut self, name: impl Into<String>, value: Option<String>) -> Self {
        self.extra.insert(name.into(), value);
        self
    }

    pub fn in_replica_set(mut self, set_name: impl Into<String>) -> Self {
        self.repl_set = Some(set_name.into());
        self
    }

    pub fn as_config_server(mut self) -> Self {
        self.config_server = true;
        self
    }

    pub fn as_shard_server(mut self) -> Self {
        self.shard_server = true;
        self
    }

    /// Router variant: targets `configdb` and carries no data directory.
    pub fn routing_to(mut self, configdb: impl Into<String>) -> Self {
        self.configdb = Some(configdb.into());
        self.dbpath = None;
        self
    }

    /// Command line arguments in a stable order.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--bind_ip".to_string(),
            self.bind_ip.clone(),
            "--port".to_string(),
            self.port.to_string(),
        ];

        if let Some(dbpath) = &self.dbpath {
            args.push("--dbpath".to_string());
            args.push(dbpath.display().to_string());
        }
        if let Some(logpath) = &self.logpath {
            args.push("--logpath".to_string());
            args.push(logpath.display().to_string());
        }
        if let Some(set_name) = &self.repl_set {
            args.push("--replSet".to_string());
            args.push(set_name.clone());
        }
        if self.config_server {
            args.push("--configsvr".to_string());
        }
        if self.shard_server {
            args.push("--shardsvr".to_string());
        }
        if let Some(configdb) = &self.configdb {
            args.push("--configdb".to_string());
            args.push(configdb.clone());
        }
        if let Some(tls) = &self.tls {
            self.tls_flags.unwrap_or_default().render(tls, &mut args);
        }
        for (name, value) in &self.extra {
            args.push(format!("--{name}"));
            if let Some(value) = value {
                args.push(value.clone());
            }
        }

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_member_args() {
        let args = NodeOptions::new("127.0.0.1", 31000)
            .with_dbpath("/data/db/31000")
            .in_replica_set("rs")
            .as_shard_server()
            .to_args();

        assert_eq!(
            args,
            vec![
                "--bind_ip",
                "127.0.0.1",
                "--port",
                "31000",
                "--dbpath",
                "/data/db/31000",
                "--replSet",
                "rs",
                "--shardsvr",
            ]
        );
    }

    #[test]
    fn test_router_args_drop_dbpath() {
        let args = NodeOptions::new("localhost", 51000)
            .with_dbpath("/ignored")
            .routing_to("csrs/localhost:35000,localhost:35001")
            .to_args();

        assert!(!args.contains(&"--dbpath".to_string()));
        let configdb = args.iter().position(|a| a == "--configdb").unwrap();
        assert_eq!(args[configdb + 1], "csrs/localhost:35000,localhost:35001");
    }

    #[test]
    fn test_tls_and_extra_flags() {
        let args = NodeOptions::new("127.0.0.1", 31000)
            .with_tls(TlsFiles {
                certificate_key_file: "/ssl/server.pem".into(),
                ca_file: None,
                allow_invalid_certificates: true,
            })
            .with_flag("nojournal", None)
            .with_flag("oplogSize", Some("64".to_string()))
            .to_args();

        let tail: Vec<&str> = args[4..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "--tlsMode",
                "requireTLS",
                "--tlsCertificateKeyFile",
                "/ssl/server.pem",
                "--tlsAllowInvalidCertificates",
                "--nojournal",
                "--oplogSize",
                "64",
            ]
        );
    }

    #[test]
    fn test_ssl_flags_for_older_servers() {
        let flags = TlsFlags::for_version(&ServerVersion::new(3, 0, 9));
        assert_eq!(flags, TlsFlags::Ssl);

        let args = NodeOptions::new("127.0.0.1", 31000)
            .with_tls(TlsFiles {
                certificate_key_file: "/ssl/server.pem".into(),
                ca_file: Some("/ssl/ca.pem".into()),
                allow_invalid_certificates: true,
            })
            .with_tls_flags(flags)
            .to_args();

        let tail: Vec<&str> = args[4..].iter().map(String::as_str).collect();
        assert_eq!(
            tail,
            vec![
                "--sslMode",
                "requireSSL",
                "--sslPEMKeyFile",
                "/ssl/server.pem",
                "--sslCAFile",
                "/ssl/ca.pem",
                "--sslAllowInvalidCertificates",
            ]
        );
    }

    #[test]
    fn test_tls_flags_from_4_2() {
        assert_eq!(TlsFlags::for_version(&ServerVersion::new(4, 0, 28)), TlsFlags::Ssl);
        assert_eq!(TlsFlags::for_version(&ServerVersion::new(4, 2, 0)), TlsFlags::Tls);
        assert_eq!(TlsFlags::for_version(&ServerVersion::new(6, 0, 1)), TlsFlags::Tls);

        let options: NodeOptions =
            serde_yaml::from_str("port: 31000\ntls_flags: ssl").unwrap();
        assert_eq!(options.tls_flags, Some(TlsFlags::Ssl));
    }

    #[test]
    fn test_deserialize_defaults_bind_ip() {
        let options: NodeOptions = serde_yaml::from_str("port: 31000\ndbpath: /tmp/db").unwrap();
        assert_eq!(options.address(), HostPort::new("127.0.0.1", 31000));
        assert_eq!(options.dbpath, Some(PathBuf::from("/tmp/db")));
    }
}
