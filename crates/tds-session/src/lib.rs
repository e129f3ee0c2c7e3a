//! # tds-session
//!
//! The boundary between the pooling layer and the wire protocol.
//!
//! Nothing in this crate speaks TDS. It defines what the pool and the
//! connection facade need from a protocol session: log in, run a statement,
//! walk a forward-only cursor, and report whether the transport is still
//! usable. Concrete protocol implementations plug in through
//! [`SessionFactory`], selected once per connection target by
//! [`ProtocolFactories`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tds_session::{ProtocolFactories, TdsVersion};
//!
//! let factories = ProtocolFactories::new(Arc::new(Tds74Factory))
//!     .with_version(TdsVersion::V8_0, Arc::new(StrictTlsFactory));
//!
//! let factory = factories.select(TdsVersion::V8_0);
//! let mut session = factory.create(&target);
//! session.connect(&credentials).await?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod credentials;
pub mod error;
pub mod session;
pub mod value;
pub mod version;

pub use credentials::{CredentialIdentity, Credentials, Secret};
pub use error::SessionError;
pub use session::{ProtocolFactories, ProtocolSession, SessionFactory, SessionTarget, drain};
pub use value::SqlValue;
pub use version::TdsVersion;
