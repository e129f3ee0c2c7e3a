//! Client configuration.

use std::time::Duration;

use mssql_driver_pool::{ConnectionTargetKey, PoolConfig};
use tds_session::{Credentials, SessionTarget, TdsVersion};

use crate::error::{Error, Result};

/// Default SQL Server port.
pub const DEFAULT_PORT: u16 = 1433;

/// Smallest packet size the server accepts.
const MIN_PACKET_SIZE: u16 = 512;

/// Largest packet size the server accepts.
const MAX_PACKET_SIZE: u16 = 32767;

/// Configuration for connecting to SQL Server.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future releases without breaking semver. Use [`Config::default()`]
/// or [`Config::from_connection_string()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Config {
    /// Server hostname or IP address.
    pub host: String,

    /// Server port (default: 1433).
    pub port: u16,

    /// Instance name (for named instances).
    pub instance: Option<String>,

    /// Database name.
    pub database: Option<String>,

    /// Authentication credentials.
    pub credentials: Credentials,

    /// Application name (shown in SQL Server management tools).
    pub application_name: String,

    /// Login timeout. Zero waits indefinitely.
    pub connect_timeout: Duration,

    /// TDS packet size.
    pub packet_size: u16,

    /// Requested TDS protocol version.
    ///
    /// Every pool is bound to one version; sessions for it come from the
    /// factory registered for that version.
    pub tds_version: TdsVersion,

    /// Whether connections draw sessions from a pool (default: true).
    pub pooling: bool,

    /// Sessions kept warm once the pool is first used (default: 0).
    pub min_pool_size: u32,

    /// Hard cap on sessions per pool (default: 100).
    pub max_pool_size: u32,

    /// How long `open()` waits for a session when the pool is exhausted.
    ///
    /// Zero (the default) fails immediately.
    pub pool_timeout: Duration,

    /// Maximum age of a pooled session before it is evicted on release.
    pub connection_lifetime: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            instance: None,
            database: None,
            credentials: Credentials::sql_server("", ""),
            application_name: "mssql-client".to_string(),
            connect_timeout: Duration::from_secs(15),
            packet_size: 4096,
            tds_version: TdsVersion::V7_4,
            pooling: true,
            min_pool_size: 0,
            max_pool_size: 100,
            pool_timeout: Duration::ZERO,
            connection_lifetime: None,
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a connection string into configuration.
    ///
    /// Supports ADO.NET-style connection strings:
    /// ```text
    /// Server=localhost;Database=mydb;User Id=sa;Password=secret;Max Pool Size=20;
    /// ```
    ///
    /// Keys are case-insensitive and accept the usual spelling variants.
    /// Unknown keys are ignored.
    pub fn from_connection_string(conn_str: &str) -> Result<Self> {
        let mut config = Self::default();
        let mut username: Option<String> = None;
        let mut password: Option<String> = None;
        let mut integrated = false;

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" | "address" | "addr" | "network address" | "host" => {
                    // host,port or host\instance
                    if let Some((host, port)) = value.split_once(',') {
                        config.host = host.trim().to_string();
                        config.port = parse_number(&key, port.trim())?;
                    } else if let Some((host, instance)) = value.split_once('\\') {
                        config.host = host.trim().to_string();
                        config.instance = Some(instance.trim().to_string());
                    } else {
                        config.host = value.to_string();
                    }
                }
                "port" => {
                    config.port = parse_number(&key, value)?;
                }
                "database" | "initial catalog" => {
                    config.database = Some(value.to_string()).filter(|db| !db.is_empty());
                }
                "user id" | "uid" | "user" => {
                    username = Some(value.to_string());
                }
                "password" | "pwd" => {
                    password = Some(value.to_string());
                }
                "integrated security" | "trusted_connection" => {
                    integrated = value.eq_ignore_ascii_case("sspi") || parse_bool(&key, value)?;
                }
                "application name" | "app" => {
                    config.application_name = value.to_string();
                }
                "connect timeout" | "connection timeout" | "timeout" => {
                    config.connect_timeout = Duration::from_secs(parse_number(&key, value)?);
                }
                "packet size" => {
                    config.packet_size = parse_number(&key, value)?;
                }
                "pooling" => {
                    config.pooling = parse_bool(&key, value)?;
                }
                "min pool size" => {
                    config.min_pool_size = parse_number(&key, value)?;
                }
                "max pool size" => {
                    config.max_pool_size = parse_number(&key, value)?;
                }
                "pool timeout" => {
                    config.pool_timeout = Duration::from_secs(parse_number(&key, value)?);
                }
                "connection lifetime" | "load balance timeout" => {
                    let secs: u64 = parse_number(&key, value)?;
                    config.connection_lifetime = (secs > 0).then(|| Duration::from_secs(secs));
                }
                "tdsversion" | "tds version" | "protocolversion" | "protocol version" => {
                    // Supports: "7.2", "7.3", "7.3A", "7.3B", "7.4", "8.0"
                    config.tds_version = TdsVersion::parse(value).ok_or_else(|| {
                        Error::Config(format!(
                            "invalid TDS version: {value}. Supported values: 7.2, 7.3, 7.3A, 7.3B, 7.4, 8.0"
                        ))
                    })?;
                }
                _ => {
                    // Ignore unknown options for forward compatibility
                    tracing::debug!(key = key, "ignoring unknown connection string option");
                }
            }
        }

        config.credentials = if integrated {
            Credentials::Integrated
        } else {
            Credentials::sql_server(username.unwrap_or_default(), password.unwrap_or_default())
        };

        config.validate()?;
        Ok(config)
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the named instance.
    #[must_use]
    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the credentials.
    #[must_use]
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// Set the application name.
    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the packet size.
    #[must_use]
    pub fn packet_size(mut self, size: u16) -> Self {
        self.packet_size = size;
        self
    }

    /// Set the TDS protocol version.
    #[must_use]
    pub fn tds_version(mut self, version: TdsVersion) -> Self {
        self.tds_version = version;
        self
    }

    /// Enable or disable pooling.
    #[must_use]
    pub fn pooling(mut self, enabled: bool) -> Self {
        self.pooling = enabled;
        self
    }

    /// Set the minimum and maximum pool size.
    #[must_use]
    pub fn pool_size(mut self, min: u32, max: u32) -> Self {
        self.min_pool_size = min;
        self.max_pool_size = max;
        self
    }

    /// Set how long `open()` waits on an exhausted pool.
    #[must_use]
    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = timeout;
        self
    }

    /// Set the maximum age of pooled sessions.
    #[must_use]
    pub fn connection_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.connection_lifetime = lifetime;
        self
    }

    /// Check the configuration for values the server or the pool would
    /// reject.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("server must not be empty".into()));
        }
        if !(MIN_PACKET_SIZE..=MAX_PACKET_SIZE).contains(&self.packet_size) {
            return Err(Error::Config(format!(
                "packet size {} outside {MIN_PACKET_SIZE}..={MAX_PACKET_SIZE}",
                self.packet_size
            )));
        }
        if self.max_pool_size == 0 {
            return Err(Error::Config("max pool size must be greater than 0".into()));
        }
        if self.min_pool_size > self.max_pool_size {
            return Err(Error::Config(format!(
                "min pool size ({}) cannot exceed max pool size ({})",
                self.min_pool_size, self.max_pool_size
            )));
        }
        Ok(())
    }

    /// Server name as reported by [`Connection::data_source`](crate::Connection::data_source).
    #[must_use]
    pub fn data_source(&self) -> String {
        match &self.instance {
            Some(instance) => format!("{}\\{instance}", self.host),
            None if self.port != DEFAULT_PORT => format!("{},{}", self.host, self.port),
            None => self.host.clone(),
        }
    }

    /// Session target for this configuration.
    #[must_use]
    pub fn session_target(&self) -> SessionTarget {
        SessionTarget {
            host: self.host.clone(),
            port: self.port,
            instance: self.instance.clone(),
            database: self.database.clone(),
            application_name: self.application_name.clone(),
            packet_size: self.packet_size,
            connect_timeout: self.connect_timeout,
            version: self.tds_version,
        }
    }

    /// Normalized pool key.
    ///
    /// Configurations that differ only in spelling yield equal keys.
    #[must_use]
    pub fn target_key(&self) -> ConnectionTargetKey {
        ConnectionTargetKey::new(
            self.session_target(),
            self.credentials.identity(),
            self.pool_config(),
        )
    }

    /// Sizing for the pool this configuration draws from.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new()
            .min_connections(self.min_pool_size)
            .max_connections(self.max_pool_size)
            .acquire_timeout(self.pool_timeout)
            .max_lifetime(self.connection_lifetime)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("invalid {key}: {value}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(Error::Config(format!("invalid {key}: {value}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use tds_session::CredentialIdentity;

    #[test]
    fn test_connection_string_parsing() {
        let config = Config::from_connection_string(
            "Server=localhost;Database=test;User Id=sa;Password=secret;",
        )
        .unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.database, Some("test".to_string()));
        assert_eq!(config.credentials.username(), Some("sa"));
        assert!(config.pooling);
    }

    #[test]
    fn test_connection_string_with_port() {
        let config =
            Config::from_connection_string("Server=localhost,1434;Database=test;").unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1434);
        assert_eq!(config.data_source(), "localhost,1434");
    }

    #[test]
    fn test_connection_string_with_instance() {
        let config =
            Config::from_connection_string("Server=localhost\\SQLEXPRESS;Database=test;").unwrap();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.instance, Some("SQLEXPRESS".to_string()));
        assert_eq!(config.data_source(), "localhost\\SQLEXPRESS");
    }

    #[test]
    fn test_password_before_user() {
        let config = Config::from_connection_string("Pwd=secret;Uid=app;").unwrap();
        match &config.credentials {
            Credentials::SqlServer { username, password } => {
                assert_eq!(username, "app");
                assert_eq!(password, "secret");
            }
            Credentials::Integrated => panic!("expected SQL credentials"),
        }
    }

    #[test]
    fn test_integrated_security() {
        let config =
            Config::from_connection_string("Server=db;Integrated Security=SSPI;").unwrap();
        assert!(!config.credentials.is_sql_auth());
        assert_eq!(config.target_key().identity(), &CredentialIdentity::Integrated);
    }

    #[test]
    fn test_pool_options() {
        let config = Config::from_connection_string(
            "Server=db;Min Pool Size=2;Max Pool Size=8;Pool Timeout=5;Connection Lifetime=60;Pooling=yes",
        )
        .unwrap();

        assert_eq!(config.min_pool_size, 2);
        assert_eq!(config.max_pool_size, 8);
        let pool = config.pool_config();
        assert_eq!(pool.min_connections, 2);
        assert_eq!(pool.max_connections, 8);
        assert_eq!(pool.acquire_timeout, Duration::from_secs(5));
        assert_eq!(pool.max_lifetime, Some(Duration::from_secs(60)));

        let config = Config::from_connection_string("Server=db;Connection Lifetime=0").unwrap();
        assert_eq!(config.connection_lifetime, None);

        let config = Config::from_connection_string("Server=db;Pooling=false").unwrap();
        assert!(!config.pooling);
    }

    #[test]
    fn test_malformed_values_fail() {
        for bad in [
            "Server=db;Port=abc",
            "Server=db,notaport",
            "Server=db;Pooling=maybe",
            "Server=db;Max Pool Size=-1",
            "Server=db;Max Pool Size=0",
            "Server=db;Min Pool Size=5;Max Pool Size=2",
            "Server=db;Packet Size=100",
            "Server=db;Connect Timeout=soon",
            "Server=;Database=x",
            "Server=db;NoEqualsSign",
        ] {
            let result = Config::from_connection_string(bad);
            assert!(
                matches!(result, Err(Error::Config(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config =
            Config::from_connection_string("Server=db;Encrypt=strict;Mars=true;").unwrap();
        assert_eq!(config.host, "db");
    }

    #[test]
    fn test_key_normalization() {
        let a = Config::from_connection_string(
            "Server=DB1;Database=Sales;User Id=app;Password=pw;Max Pool Size=10",
        )
        .unwrap();
        let b = Config::from_connection_string(
            "  max pool size = 10 ; PWD=pw; initial catalog=Sales;uid=app ; Data Source= db1 ",
        )
        .unwrap();
        assert_eq!(a.target_key(), b.target_key());

        let c = Config::from_connection_string(
            "Server=db1;Database=Sales;User Id=app;Password=other;Max Pool Size=10",
        )
        .unwrap();
        assert_ne!(a.target_key(), c.target_key());
    }

    #[test]
    fn test_local_aliases_share_a_key() {
        let dot = Config::from_connection_string("Server=.;Database=x").unwrap();
        let local = Config::from_connection_string("Server=(local);Database=x").unwrap();
        let localhost = Config::from_connection_string("Server=LOCALHOST;Database=x").unwrap();
        assert_eq!(dot.target_key(), local.target_key());
        assert_eq!(dot.target_key(), localhost.target_key());
    }

    #[test]
    fn test_tds_version_parsing() {
        let config = Config::from_connection_string("Server=localhost;TDSVersion=7.3;").unwrap();
        assert_eq!(config.tds_version, TdsVersion::V7_3A);

        let config = Config::from_connection_string("Server=localhost;TDSVersion=7.3B;").unwrap();
        assert_eq!(config.tds_version, TdsVersion::V7_3B);

        let config =
            Config::from_connection_string("Server=localhost;Protocol Version=8.0;").unwrap();
        assert_eq!(config.tds_version, TdsVersion::V8_0);
        assert_eq!(config.target_key().version(), TdsVersion::V8_0);

        assert!(Config::from_connection_string("Server=localhost;TDSVersion=9.0;").is_err());
    }

    #[test]
    fn test_builder() {
        let config = Config::new()
            .host("db")
            .database("app")
            .pool_size(1, 4)
            .pooling(false)
            .tds_version(TdsVersion::V7_3B);

        assert_eq!(config.database.as_deref(), Some("app"));
        assert!(!config.pooling);
        assert_eq!(config.session_target().version, TdsVersion::V7_3B);
        assert!(config.validate().is_ok());
        assert!(config.pool_size(3, 1).validate().is_err());
    }
}
