//! `{SSHA}`, `{SSHA256}` and `{SSHA512}` salted digests
//!
//! Payload layout: base64(digest(password || salt) || salt).

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine,
};
use digest::Digest;
use rand::RngCore;
use subtle::ConstantTimeEq;

pub(super) const SSHA_TAG: &str = "{SSHA}";
pub(super) const SSHA256_TAG: &str = "{SSHA256}";
pub(super) const SSHA512_TAG: &str = "{SSHA512}";

const SALT_LEN: usize = 8;

pub(super) fn verify<D: Digest>(tag: &str, plaintext: &str, hash: &str) -> bool {
    let Some(payload) = hash.strip_prefix(tag) else {
        return false;
    };

    let raw = match STANDARD
        .decode(payload.trim())
        .or_else(|_| STANDARD_NO_PAD.decode(payload.trim()))
    {
        Ok(raw) => raw,
        Err(_) => return false,
    };

    let digest_len = <D as Digest>::output_size();
    if raw.len() <= digest_len {
        return false;
    }

    let (expected, salt) = raw.split_at(digest_len);
    let actual = digest_with_salt::<D>(plaintext, salt);

    actual.ct_eq(expected).into()
}

pub(super) fn hash<D: Digest>(tag: &str, plaintext: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);

    let mut raw = digest_with_salt::<D>(plaintext, &salt);
    raw.extend_from_slice(&salt);

    format!("{}{}", tag, STANDARD.encode(raw))
}

fn digest_with_salt<D: Digest>(plaintext: &str, salt: &[u8]) -> Vec<u8> {
    let mut hasher = D::new();
    hasher.update(plaintext.as_bytes());
    hasher.update(salt);
    hasher.finalize().to_vec()
}
