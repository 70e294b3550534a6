use std::str::FromStr;

use thiserror::Error;

/// A `host:port` server address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid server address '{0}': expected host:port")]
pub struct AddressParseError(pub String);

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Join addresses as a comma separated seed list.
    pub fn join(addresses: &[HostPort]) -> String {
        addresses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostPort {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| AddressParseError(s.to_string()))?;
        if host.is_empty() {
            return Err(AddressParseError(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| AddressParseError(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let addr: HostPort = "127.0.0.1:31000".parse().unwrap();
        assert_eq!(addr, HostPort::new("127.0.0.1", 31000));
        assert_eq!(addr.to_string(), "127.0.0.1:31000");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("localhost".parse::<HostPort>().is_err());
        assert!(":27017".parse::<HostPort>().is_err());
        assert!("localhost:notaport".parse::<HostPort>().is_err());
    }

    #[test]
    fn test_join() {
        let seeds = [HostPort::new("a", 1), HostPort::new("b", 2)];
        assert_eq!(HostPort::join(&seeds), "a:1,b:2");
    }
}
