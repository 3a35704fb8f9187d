//! Error types for Dirgate

use ldap3_proto::proto::LdapResultCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Protocol input errors
    #[error("dn must have a prefix of '{prefix}' and suffix of '{suffix}'")]
    MalformedDn { prefix: String, suffix: String },

    #[error("invalid rdn '{got}', should be '{expected}'")]
    InvalidRdn { expected: String, got: String },

    #[error("filter '{0}' not supported")]
    UnsupportedFilter(String),

    #[error("Invalid credentials for '{0}'")]
    InvalidCredentials(String),

    #[error("Unsupported authentication method: {0}")]
    UnsupportedAuthMethod(String),

    #[error("Search base '{0}' is outside the served subtree")]
    OutOfScope(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("not a key value pair: {0}")]
    NotAKeyValuePair(String),

    // Backend errors
    #[error("Database error: {0}")]
    Database(String),

    // TLS errors
    #[error("TLS error: {0}")]
    Tls(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// LDAP result code reported to a client for this error
    pub fn result_code(&self) -> LdapResultCode {
        match self {
            Error::MalformedDn { .. }
            | Error::InvalidCredentials(_)
            | Error::UnsupportedAuthMethod(_) => LdapResultCode::InvalidCredentials,
            Error::InvalidRdn { .. } | Error::UnsupportedFilter(_) => {
                LdapResultCode::NoSuchAttribute
            }
            Error::OutOfScope(_) => LdapResultCode::NoSuchObject,
            Error::Protocol(_) => LdapResultCode::ProtocolError,
            Error::Database(_) => LdapResultCode::OperationsError,
            Error::InvalidConfig(_)
            | Error::NotAKeyValuePair(_)
            | Error::Tls(_)
            | Error::Io(_)
            | Error::Other(_) => LdapResultCode::Other,
        }
    }
}
