//! Test fixture utilities.

use std::time::Duration;

use tds_session::{Credentials, SessionTarget, TdsVersion};

/// A session target on the default port with a `test` database.
#[must_use]
pub fn session_target(host: &str) -> SessionTarget {
    SessionTarget {
        host: host.to_owned(),
        port: 1433,
        instance: None,
        database: Some("test".into()),
        application_name: "mssql-testing".into(),
        packet_size: 4096,
        connect_timeout: Duration::from_secs(15),
        version: TdsVersion::V7_4,
    }
}

/// SQL credentials used throughout the tests.
#[must_use]
pub fn credentials() -> Credentials {
    Credentials::sql_server("sa", "Password123!")
}
