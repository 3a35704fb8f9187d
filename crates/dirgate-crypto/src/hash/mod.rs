//! Hash scheme detection, verification and generation

mod kdf;
mod salted;

use sha1::Sha1;
use sha2::{Sha256, Sha512};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Hashing errors
#[derive(Debug, Error)]
pub enum HashError {
    #[error("Unknown hash scheme: {0}")]
    UnknownScheme(String),

    #[error("Hashing failed: {0}")]
    HashingFailed(String),
}

/// Supported password hash schemes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashScheme {
    /// `{SSHA}` salted SHA-1
    Ssha,
    /// `{SSHA256}` salted SHA-256
    Ssha256,
    /// `{SSHA512}` salted SHA-512
    Ssha512,
    /// `$argon2i$`, `$argon2d$` or `$argon2id$` PHC string
    Argon2,
    /// `$s2$N$r$p$salt$hash` scrypt
    Scrypt,
}

impl HashScheme {
    /// Identify the scheme of a stored hash from its leading tag
    pub fn detect(hash: &str) -> Option<Self> {
        // Tags are brace-terminated, so {SSHA} never matches {SSHA256}
        if hash.starts_with(salted::SSHA_TAG) {
            Some(Self::Ssha)
        } else if hash.starts_with(salted::SSHA256_TAG) {
            Some(Self::Ssha256)
        } else if hash.starts_with(salted::SSHA512_TAG) {
            Some(Self::Ssha512)
        } else if kdf::ARGON2_TAGS.iter().any(|tag| hash.starts_with(tag)) {
            Some(Self::Argon2)
        } else if hash.starts_with(kdf::SCRYPT_TAG) {
            Some(Self::Scrypt)
        } else {
            None
        }
    }

    /// Check `plaintext` against a hash of this scheme
    pub fn verify(self, plaintext: &str, hash: &str) -> bool {
        match self {
            Self::Ssha => salted::verify::<Sha1>(salted::SSHA_TAG, plaintext, hash),
            Self::Ssha256 => salted::verify::<Sha256>(salted::SSHA256_TAG, plaintext, hash),
            Self::Ssha512 => salted::verify::<Sha512>(salted::SSHA512_TAG, plaintext, hash),
            Self::Argon2 => kdf::verify_argon2(plaintext, hash),
            Self::Scrypt => kdf::verify_scrypt(plaintext, hash),
        }
    }

    /// Encode `plaintext` with a fresh random salt
    pub fn hash(self, plaintext: &str) -> Result<String, HashError> {
        match self {
            Self::Ssha => Ok(salted::hash::<Sha1>(salted::SSHA_TAG, plaintext)),
            Self::Ssha256 => Ok(salted::hash::<Sha256>(salted::SSHA256_TAG, plaintext)),
            Self::Ssha512 => Ok(salted::hash::<Sha512>(salted::SSHA512_TAG, plaintext)),
            Self::Argon2 => kdf::hash_argon2(plaintext),
            Self::Scrypt => kdf::hash_scrypt(plaintext),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssha => "ssha",
            Self::Ssha256 => "ssha256",
            Self::Ssha512 => "ssha512",
            Self::Argon2 => "argon2",
            Self::Scrypt => "scrypt",
        }
    }
}

impl fmt::Display for HashScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashScheme {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ssha" => Ok(Self::Ssha),
            "ssha256" => Ok(Self::Ssha256),
            "ssha512" => Ok(Self::Ssha512),
            "argon2" | "argon2id" => Ok(Self::Argon2),
            "scrypt" | "s2" => Ok(Self::Scrypt),
            other => Err(HashError::UnknownScheme(other.to_string())),
        }
    }
}

/// Check a plaintext password against a stored hash.
///
/// Unknown schemes and malformed hashes never match.
pub fn verify(plaintext: &str, hash: &str) -> bool {
    match HashScheme::detect(hash) {
        Some(scheme) => scheme.verify(plaintext, hash),
        None => {
            debug!("Stored hash has no recognized scheme tag");
            false
        }
    }
}

/// Hash a password for storage in the backend
pub fn hash_password(plaintext: &str, scheme: HashScheme) -> Result<String, HashError> {
    scheme.hash(plaintext)
}
