//! Detect the mongod server version from `--version` output.
//!
//! The topology manager runs `mongod --version` once before laying out a
//! sharded cluster. The version decides the shape of the metadata topology:
//! servers from 3.2 onwards run their config servers as a replica set, older
//! servers use three independent mirrored config servers.
//!
//! Example outputs:
//!
//! - `db version v3.0.9\ngit version: ...` -> 3.0.9, no TLS
//! - `db version v4.4.6\nBuild Info: { "openssl": { ... } }` -> 4.4.6, TLS

use semver::Version;
use thiserror::Error;

/// Errors raised while interpreting version output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("no major.minor.patch version found in server output")]
    NotFound,

    #[error("invalid server version '{version}': {message}")]
    Invalid { version: String, message: String },
}

/// A `major.minor.patch` server version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ServerVersion {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The version as `[major, minor, patch]`.
    pub fn triple(&self) -> [u64; 3] {
        [self.major, self.minor, self.patch]
    }

    /// Whether config servers must run as a replica set (3.2 and later).
    pub fn has_replicated_config_servers(&self) -> bool {
        *self >= REPLICATED_CONFIG_SINCE
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl From<&Version> for ServerVersion {
    fn from(v: &Version) -> Self {
        Self::new(v.major, v.minor, v.patch)
    }
}

/// First version whose config servers are a replica set.
pub const REPLICATED_CONFIG_SINCE: ServerVersion = ServerVersion::new(3, 2, 0);

/// What a single `--version` probe tells us about a server binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerBuild {
    pub version: ServerVersion,
    /// The binary was built with TLS support.
    pub tls: bool,
}

/// Shape of the metadata (config server) topology of a sharded cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataShape {
    /// A config server replica set (3.2+).
    Replicated,
    /// Three independent config servers (pre 3.2).
    Legacy,
}

impl MetadataShape {
    pub fn for_version(version: &ServerVersion) -> Self {
        if version.has_replicated_config_servers() {
            Self::Replicated
        } else {
            Self::Legacy
        }
    }
}

impl std::fmt::Display for MetadataShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Replicated => write!(f, "replicated"),
            Self::Legacy => write!(f, "legacy"),
        }
    }
}

/// Parse the captured stdout/stderr of `mongod --version`.
///
/// The version is the first `major.minor.patch` triple on stdout. TLS support
/// is reported when either stream mentions "ssl" in any case.
pub fn parse_version_output(stdout: &str, stderr: &str) -> Result<ServerBuild, VersionError> {
    let token = find_version_triple(stdout).ok_or(VersionError::NotFound)?;

    tracing::debug!("Parsing mongod version string: '{token}'");

    let parsed = Version::parse(token).map_err(|e| VersionError::Invalid {
        version: token.to_string(),
        message: e.to_string(),
    })?;

    let tls = mentions_ssl(stdout) || mentions_ssl(stderr);
    let version = ServerVersion::from(&parsed);

    tracing::info!("Detected mongod server version: {version} (tls: {tls})");

    Ok(ServerBuild { version, tls })
}

/// Locate the leftmost `digits.digits.digits` run in `text`.
pub fn find_version_triple(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    (0..bytes.len())
        .filter(|&start| bytes[start].is_ascii_digit())
        .find_map(|start| match_triple(bytes, start).map(|end| &text[start..end]))
}

fn match_triple(bytes: &[u8], start: usize) -> Option<usize> {
    let mut pos = start;
    for part in 0..3 {
        let digits = bytes[pos..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return None;
        }
        pos += digits;
        if part < 2 {
            if bytes.get(pos) != Some(&b'.') {
                return None;
            }
            pos += 1;
        }
    }
    Some(pos)
}

fn mentions_ssl(text: &str) -> bool {
    text.to_ascii_lowercase().contains("ssl")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_legacy_output() {
        let build = parse_version_output("db version v3.0.9\ngit version: abc", "").unwrap();
        assert_eq!(build.version.triple(), [3, 0, 9]);
        assert!(!build.tls);
        assert_eq!(MetadataShape::for_version(&build.version), MetadataShape::Legacy);
    }

    #[test]
    fn test_parse_replicated_without_tls() {
        let build = parse_version_output("db version v3.2.1", "").unwrap();
        assert_eq!(build.version.triple(), [3, 2, 1]);
        assert!(!build.tls);
        assert_eq!(
            MetadataShape::for_version(&build.version),
            MetadataShape::Replicated
        );
    }

    #[test]
    fn test_tls_marker_on_stdout() {
        let out = "db version v4.4.6\nBuild Info: {\n  \"openssl\": { \"running\": \"OpenSSL 1.1.1f\" }\n}";
        let build = parse_version_output(out, "").unwrap();
        assert!(build.tls);
    }

    #[test]
    fn test_tls_marker_on_stderr() {
        let build =
            parse_version_output("db version v3.4.2", "warning: SSL not configured").unwrap();
        assert!(build.tls);
    }

    #[test]
    fn test_newer_major_is_replicated() {
        let build = parse_version_output("db version v7.0.12", "").unwrap();
        assert!(build.version.has_replicated_config_servers());
    }

    #[test]
    fn test_missing_version() {
        let err = parse_version_output("mongod: command not understood", "").unwrap_err();
        assert_eq!(err, VersionError::NotFound);
    }

    #[test]
    fn test_leading_zero_is_invalid() {
        let err = parse_version_output("db version v3.02.1", "").unwrap_err();
        assert!(matches!(err, VersionError::Invalid { .. }));
    }

    #[test]
    fn test_find_version_triple_skips_partial_runs() {
        assert_eq!(find_version_triple("build 12.4 then 3.6.23-rc1"), Some("3.6.23"));
        assert_eq!(find_version_triple("1.2.3.4"), Some("1.2.3"));
        assert_eq!(find_version_triple("no digits"), None);
        assert_eq!(find_version_triple("1.2."), None);
    }

    #[test]
    fn test_version_display_and_order() {
        let v = ServerVersion::new(3, 2, 0);
        assert_eq!(v.to_string(), "3.2.0");
        assert!(ServerVersion::new(3, 1, 99) < v);
        assert_eq!(MetadataShape::Legacy.to_string(), "legacy");
    }
}
