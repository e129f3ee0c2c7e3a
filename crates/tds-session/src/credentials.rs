//! Credential types for session login.

use std::borrow::Cow;
use std::fmt;

/// Credentials presented by a session at login.
#[derive(Clone)]
pub enum Credentials {
    /// SQL Server authentication with username and password.
    SqlServer {
        /// Username.
        username: Cow<'static, str>,
        /// Password.
        password: Cow<'static, str>,
    },

    /// Integrated (operating-system) authentication.
    Integrated,
}

impl Credentials {
    /// Create SQL Server credentials.
    pub fn sql_server(
        username: impl Into<Cow<'static, str>>,
        password: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::SqlServer {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Check if these credentials use SQL authentication.
    #[must_use]
    pub fn is_sql_auth(&self) -> bool {
        matches!(self, Self::SqlServer { .. })
    }

    /// Get the login name, if any.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        match self {
            Self::SqlServer { username, .. } => Some(username),
            Self::Integrated => None,
        }
    }

    /// Get the authentication method name.
    #[must_use]
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::SqlServer { .. } => "SQL Server Authentication",
            Self::Integrated => "Integrated Authentication",
        }
    }

    /// Derive the identity used to tell pools apart.
    ///
    /// Two credential sets map to the same identity exactly when login and
    /// password are equal.
    #[must_use]
    pub fn identity(&self) -> CredentialIdentity {
        match self {
            Self::SqlServer { username, password } => CredentialIdentity::Sql {
                username: username.to_string(),
                secret: Secret(password.to_string()),
            },
            Self::Integrated => CredentialIdentity::Integrated,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SqlServer { username, .. } => f
                .debug_struct("SqlServer")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Self::Integrated => f.write_str("Integrated"),
        }
    }
}

/// Identity derived from [`Credentials`], used in lookup keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CredentialIdentity {
    /// SQL login.
    Sql {
        /// Login name, compared exactly.
        username: String,
        /// The password, opaque and redacted from `Debug`.
        secret: Secret,
    },
    /// Integrated authentication.
    Integrated,
}

/// A password held for comparison only.
///
/// The value cannot be read back and never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Secret(String);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::sql_server("sa", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("sa"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_identity_matches_for_equal_credentials() {
        let a = Credentials::sql_server("sa", "secret");
        let b = Credentials::sql_server(String::from("sa"), String::from("secret"));
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_identity_differs_by_password() {
        let a = Credentials::sql_server("sa", "one");
        let b = Credentials::sql_server("sa", "two");
        assert_ne!(a.identity(), b.identity());
        assert_ne!(a.identity(), Credentials::Integrated.identity());
    }

    #[test]
    fn test_identity_debug_redacts_password() {
        let identity = Credentials::sql_server("sa", "hunter2").identity();
        let debug = format!("{identity:?}");
        assert!(debug.contains("sa"));
        assert!(!debug.contains("hunter2"));
    }
}
