//! Dirgate Core Library
//!
//! Configuration, error handling and attribute mapping shared by the
//! Dirgate LDAP-to-SQL gateway crates.

pub mod config;
pub mod error;
pub mod mapping;

pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use mapping::AttributeMapping;

/// Dirgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default plain LDAP port
pub const DEFAULT_LDAP_PORT: u16 = 1389;

/// Conventional LDAPS port
pub const DEFAULT_LDAPS_PORT: u16 = 1636;

/// Placeholder replaced by the column list in templated search queries
pub const PROJECTION_PLACEHOLDER: &str = "%s";
