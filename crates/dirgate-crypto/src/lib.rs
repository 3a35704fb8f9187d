//! Password hash verification for Dirgate
//!
//! Stored hashes are opaque strings carrying their own scheme tag
//! (`{SSHA}...`, `$argon2i$...`, `$s2$...`). Only this crate decodes them.

pub mod hash;

pub use hash::{hash_password, verify, HashError, HashScheme};
