//! Connection target keys.

use std::time::Duration;

use tds_session::{CredentialIdentity, SessionTarget, TdsVersion};

use crate::config::PoolConfig;

/// Normalized identity of a connection target.
///
/// Two configurations that differ only in spelling (host case, surrounding
/// whitespace, option order in the source string) produce equal keys and
/// therefore share a pool. Pool settings are part of the key, so two
/// configurations that size or age their sessions differently never share
/// one. The password is part of the key through [`CredentialIdentity`],
/// which keeps it out of `Debug` output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionTargetKey {
    target: SessionTarget,
    identity: CredentialIdentity,
    pool: PoolConfig,
}

impl ConnectionTargetKey {
    /// Build a key, normalizing the target.
    pub fn new(
        mut target: SessionTarget,
        identity: CredentialIdentity,
        pool: PoolConfig,
    ) -> Self {
        target.host = normalize_host(&target.host);
        target.instance = target
            .instance
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase);
        target.database = target
            .database
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);
        target.application_name = target.application_name.trim().to_owned();

        Self {
            target,
            identity,
            pool,
        }
    }

    /// The session target sessions of this pool connect to.
    #[must_use]
    pub fn target(&self) -> &SessionTarget {
        &self.target
    }

    /// Credential identity.
    #[must_use]
    pub fn identity(&self) -> &CredentialIdentity {
        &self.identity
    }

    /// Host, lower-cased.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.target.host
    }

    /// Port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.target.port
    }

    /// Packet size.
    #[must_use]
    pub fn packet_size(&self) -> u16 {
        self.target.packet_size
    }

    /// Login timeout.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.target.connect_timeout
    }

    /// Protocol version the pool's sessions speak.
    #[must_use]
    pub fn version(&self) -> TdsVersion {
        self.target.version
    }

    /// Settings of the pool this key selects.
    #[must_use]
    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool
    }
}

impl std::fmt::Display for ConnectionTargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.target.host, self.target.port)?;
        if let Some(instance) = &self.target.instance {
            write!(f, "\\{instance}")?;
        }
        if let Some(database) = &self.target.database {
            write!(f, "/{database}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_key(host: &str, min: u32, max: u32) -> ConnectionTargetKey {
    ConnectionTargetKey::new(
        mssql_testing::session_target(host),
        CredentialIdentity::Integrated,
        PoolConfig::new().min_connections(min).max_connections(max),
    )
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    match host.as_str() {
        "." | "(local)" => "localhost".to_owned(),
        _ => host,
    }
}
