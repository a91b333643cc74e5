//! Startup dependency gate
//!
//! Blocks boot until every backing service accepts TCP connections. This runs
//! once before the listener opens; there is no retry once serving started.

use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{info, warn};

/// Default port of the relational store
pub const DEFAULT_MYSQL_PORT: u16 = 3306;
/// Default port of the search index
pub const DEFAULT_SEARCH_PORT: u16 = 9200;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProbeTargetError {
    #[error("connection string is empty")]
    EmptyDsn,
    #[error("host not found in connection string")]
    MissingHost,
    #[error("empty host")]
    EmptyHost,
    #[error("invalid host specification {0:?}: {1}")]
    InvalidHost(String, String),
}

#[derive(Debug, thiserror::Error)]
pub enum ReadinessError {
    #[error("{name} not reachable at {addr} after {attempts} attempts")]
    Unreachable {
        name: String,
        addr: String,
        attempts: u32,
    },
}

/// A backing service to wait for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub name: String,
    /// `host:port`, with IPv6 hosts in brackets
    pub addr: String,
}

impl ProbeTarget {
    pub fn new(name: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addr: addr.into(),
        }
    }
}

/// Retry policy of the gate
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Connection attempts per target
    pub attempts: u32,
    /// Pause after a failed attempt
    pub delay: Duration,
    /// Bound on a single connection attempt
    pub connect_timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            attempts: 30,
            delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
        }
    }
}

fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Resolve `host:port` from a `mysql:host=..;port=..;dbname=..` connection string.
pub fn mysql_address(dsn: &str) -> Result<String, ProbeTargetError> {
    let dsn = dsn.trim();
    if dsn.is_empty() {
        return Err(ProbeTargetError::EmptyDsn);
    }

    let mut host = "";
    let mut port = DEFAULT_MYSQL_PORT.to_string();
    for part in dsn.trim_start_matches("mysql:").split(';') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "host" => host = value,
            "port" if !value.is_empty() => port = value.to_string(),
            _ => {}
        }
    }

    if host.is_empty() {
        return Err(ProbeTargetError::MissingHost);
    }
    Ok(join_host_port(host, &port))
}

/// Resolve `host:port` from a bare `host[:port]` or a URL.
pub fn host_port(value: &str, default_port: u16) -> Result<String, ProbeTargetError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ProbeTargetError::EmptyHost);
    }

    if value.contains("://") {
        let parsed = url::Url::parse(value)
            .map_err(|e| ProbeTargetError::InvalidHost(value.to_string(), e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ProbeTargetError::InvalidHost(value.to_string(), "no host".into()))?;
        let port = parsed.port().unwrap_or(default_port);
        return Ok(join_host_port(host, &port.to_string()));
    }

    match value.split_once(':') {
        Some((host, port)) => Ok(join_host_port(host, port)),
        None => Ok(join_host_port(value, &default_port.to_string())),
    }
}

/// Wait for one target, giving up after `config.attempts` failures.
pub async fn wait_for_tcp(target: &ProbeTarget, config: &GateConfig) -> Result<(), ReadinessError> {
    for attempt in 1..=config.attempts {
        match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&target.addr)).await {
            Ok(Ok(_stream)) => {
                info!(name = %target.name, addr = %target.addr, "Dependency reachable");
                return Ok(());
            }
            Ok(Err(e)) => {
                warn!(
                    name = %target.name,
                    addr = %target.addr,
                    attempt,
                    attempts = config.attempts,
                    error = %e,
                    "Dependency not ready"
                );
            }
            Err(_) => {
                warn!(
                    name = %target.name,
                    addr = %target.addr,
                    attempt,
                    attempts = config.attempts,
                    "Dependency not ready (connect timeout)"
                );
            }
        }
        if attempt < config.attempts {
            tokio::time::sleep(config.delay).await;
        }
    }

    Err(ReadinessError::Unreachable {
        name: target.name.clone(),
        addr: target.addr.clone(),
        attempts: config.attempts,
    })
}

/// Wait for every target in order.
pub async fn wait_for_all(targets: &[ProbeTarget], config: &GateConfig) -> Result<(), ReadinessError> {
    for target in targets {
        wait_for_tcp(target, config).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn fast_gate(attempts: u32) -> GateConfig {
        GateConfig {
            attempts,
            delay: Duration::from_millis(10),
            connect_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_mysql_address() {
        assert_eq!(
            mysql_address("mysql:host=db;port=3307;dbname=atom;charset=utf8mb4").unwrap(),
            "db:3307"
        );
        assert_eq!(mysql_address("host=db;dbname=atom").unwrap(), "db:3306");
        assert_eq!(mysql_address("mysql:host=db;port=;dbname=atom").unwrap(), "db:3306");
        assert_eq!(mysql_address(" mysql: host = db ; junk ").unwrap(), "db:3306");
        assert_eq!(mysql_address("mysql:host=::1").unwrap(), "[::1]:3306");
    }

    #[test]
    fn test_mysql_address_errors() {
        assert_eq!(mysql_address(""), Err(ProbeTargetError::EmptyDsn));
        assert_eq!(
            mysql_address("mysql:dbname=atom"),
            Err(ProbeTargetError::MissingHost)
        );
    }

    #[test]
    fn test_host_port_bare() {
        assert_eq!(host_port("es", 9200).unwrap(), "es:9200");
        assert_eq!(host_port("es:9201", 9200).unwrap(), "es:9201");
        assert_eq!(host_port("", 9200), Err(ProbeTargetError::EmptyHost));
    }

    #[test]
    fn test_host_port_url() {
        assert_eq!(host_port("http://es:9300", 9200).unwrap(), "es:9300");
        assert_eq!(host_port("https://search.internal/", 9200).unwrap(), "search.internal:9200");
        assert_eq!(host_port("http://[::1]:9201", 9200).unwrap(), "[::1]:9201");
    }

    #[tokio::test]
    async fn test_wait_for_reachable_target() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let target = ProbeTarget::new("mysql", addr.to_string());

        wait_for_tcp(&target, &fast_gate(3)).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_unreachable_target() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let targets = vec![ProbeTarget::new("elasticsearch", addr.to_string())];
        let err = wait_for_all(&targets, &fast_gate(2)).await.unwrap_err();
        let ReadinessError::Unreachable { name, attempts, .. } = &err;
        assert_eq!(name, "elasticsearch");
        assert_eq!(*attempts, 2);
        assert!(err.to_string().contains("elasticsearch not reachable"));
    }

    #[tokio::test]
    async fn test_wait_for_all_stops_at_first_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let up = listener.local_addr().unwrap();
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let down = closed.local_addr().unwrap();
        drop(closed);

        let targets = vec![
            ProbeTarget::new("mysql", up.to_string()),
            ProbeTarget::new("elasticsearch", down.to_string()),
        ];
        let err = wait_for_all(&targets, &fast_gate(1)).await.unwrap_err();
        assert!(err.to_string().starts_with("elasticsearch"));
    }
}
