//! Password hashing for the settings surface.
//!
//! Hashes are stored as `pbkdf2_sha256$<iterations>$<salt>$<hex>` so they
//! survive round trips through the settings file and environment overrides.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use subtle::ConstantTimeEq;

/// Default PBKDF2 iteration count for newly created hashes.
pub const DEFAULT_ITERATIONS: u32 = 210_000;

const SCHEME: &str = "pbkdf2_sha256";
const DIGEST_BYTES: usize = 32;

/// Hash a password with a fresh random salt.
#[must_use]
pub fn hash_password(password: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    hash_password_with(password, &salt, DEFAULT_ITERATIONS)
}

/// Hash a password with an explicit salt and iteration count.
#[must_use]
pub fn hash_password_with(password: &str, salt: &str, iterations: u32) -> String {
    let mut digest = [0u8; DIGEST_BYTES];
    pbkdf2_hmac::<Sha256>(
        password.as_bytes(),
        salt.as_bytes(),
        iterations,
        &mut digest,
    );
    format!("{SCHEME}${iterations}${salt}${}", hex::encode(digest))
}

/// Verify a password against a stored hash.
///
/// Malformed hashes, unknown schemes, and empty hashes all fail closed.
#[must_use]
pub fn verify_password(password: &str, encoded: &str) -> bool {
    if encoded.is_empty() {
        return false;
    }
    let mut parts = encoded.splitn(4, '$');
    let (Some(scheme), Some(iterations), Some(salt), Some(_)) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != SCHEME {
        return false;
    }
    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let computed = hash_password_with(password, salt, iterations);
    computed.as_bytes().ct_eq(encoded.as_bytes()).into()
}

/// Constant-time string equality for usernames.
#[must_use]
pub fn names_match(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
