//! Memory-hard KDF hashes: argon2 PHC strings and `$s2$` scrypt strings

use super::HashError;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD},
    Engine,
};
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::debug;

pub(super) const ARGON2_TAGS: [&str; 3] = ["$argon2i$", "$argon2d$", "$argon2id$"];
pub(super) const SCRYPT_TAG: &str = "$s2$";

/// Memory ceiling for a single verification, in bytes
const MAX_MEMORY: u64 = 1 << 30;

/// Largest accepted argon2 iteration count
const ARGON2_MAX_T_COST: u32 = 32;
/// Largest accepted argon2 lane count
const ARGON2_MAX_P_COST: u32 = 16;

/// Largest accepted scrypt cost exponent
const SCRYPT_MAX_LOG_N: u32 = 20;
/// Largest accepted scrypt parallelization factor
const SCRYPT_MAX_P: u32 = 16;

const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const SCRYPT_SALT_LEN: usize = 16;
const SCRYPT_KEY_LEN: usize = 32;

pub(super) fn verify_argon2(plaintext: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    let Ok(params) = Params::try_from(&parsed) else {
        return false;
    };

    if !argon2_cost_allowed(&params) {
        debug!(
            m_cost = params.m_cost(),
            t_cost = params.t_cost(),
            p_cost = params.p_cost(),
            "Refusing argon2 hash with excessive cost"
        );
        return false;
    }

    Argon2::default()
        .verify_password(plaintext.as_bytes(), &parsed)
        .is_ok()
}

/// `m_cost` is in KiB
fn argon2_cost_allowed(params: &Params) -> bool {
    u64::from(params.m_cost()) * 1024 <= MAX_MEMORY
        && params.t_cost() <= ARGON2_MAX_T_COST
        && params.p_cost() <= ARGON2_MAX_P_COST
}

pub(super) fn hash_argon2(plaintext: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(plaintext.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| HashError::HashingFailed(e.to_string()))
}

/// Parsed `$s2$N$r$p$salt$hash`
struct ScryptHash {
    log_n: u8,
    r: u32,
    p: u32,
    salt: Vec<u8>,
    key: Vec<u8>,
}

impl ScryptHash {
    fn parse(hash: &str) -> Option<Self> {
        let mut fields = hash.strip_prefix(SCRYPT_TAG)?.split('$');

        let n: u64 = fields.next()?.parse().ok()?;
        let r: u32 = fields.next()?.parse().ok()?;
        let p: u32 = fields.next()?.parse().ok()?;
        let salt = decode_b64(fields.next()?)?;
        let key = decode_b64(fields.next()?)?;

        if fields.next().is_some() || !n.is_power_of_two() || n < 2 || key.is_empty() {
            return None;
        }

        // ROMix keeps 128 * r * N bytes alive
        let log_n = n.trailing_zeros();
        if log_n > SCRYPT_MAX_LOG_N
            || p > SCRYPT_MAX_P
            || 128 * u64::from(r) * n > MAX_MEMORY
        {
            debug!(n, r, p, "Refusing scrypt hash with excessive cost");
            return None;
        }

        Some(Self {
            log_n: log_n as u8,
            r,
            p,
            salt,
            key,
        })
    }
}

fn decode_b64(value: &str) -> Option<Vec<u8>> {
    if value.is_empty() {
        return None;
    }

    STANDARD
        .decode(value)
        .or_else(|_| STANDARD_NO_PAD.decode(value))
        .or_else(|_| URL_SAFE.decode(value))
        .or_else(|_| URL_SAFE_NO_PAD.decode(value))
        .ok()
}

pub(super) fn verify_scrypt(plaintext: &str, hash: &str) -> bool {
    let Some(parsed) = ScryptHash::parse(hash) else {
        return false;
    };

    let Ok(params) = scrypt::Params::new(parsed.log_n, parsed.r, parsed.p, parsed.key.len())
    else {
        return false;
    };

    let mut derived = vec![0u8; parsed.key.len()];
    if scrypt::scrypt(plaintext.as_bytes(), &parsed.salt, &params, &mut derived).is_err() {
        return false;
    }

    derived.ct_eq(&parsed.key).into()
}

pub(super) fn hash_scrypt(plaintext: &str) -> Result<String, HashError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, SCRYPT_KEY_LEN)
        .map_err(|e| HashError::HashingFailed(e.to_string()))?;

    let mut salt = [0u8; SCRYPT_SALT_LEN];
    rand::rng().fill_bytes(&mut salt);

    let mut key = [0u8; SCRYPT_KEY_LEN];
    scrypt::scrypt(plaintext.as_bytes(), &salt, &params, &mut key)
        .map_err(|e| HashError::HashingFailed(e.to_string()))?;

    Ok(format!(
        "{}{}${}${}${}${}",
        SCRYPT_TAG,
        1u64 << SCRYPT_LOG_N,
        SCRYPT_R,
        SCRYPT_P,
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(key)
    ))
}
