//! LDAP protocol frontend for Dirgate
//!
//! Translates bind and search operations into directory backend lookups and
//! serves them over plain TCP or TLS.

pub mod codec;
pub mod frontend;
pub mod server;
pub mod session;
pub mod tls;

pub use codec::GatewayCodec;
pub use frontend::{BindCredential, BindRequest, Frontend, SearchRequest, SearchResponse};
pub use server::GatewayServer;
pub use tls::TlsAcceptor;
