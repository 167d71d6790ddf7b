use argon2::Argon2;
use argon2::password_hash::{
    PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng,
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const AUTH_FLAG: &str = "auth";

/// Raw API-key secrets are 43 chars; the first 8 are stored in clear as a
/// lookup prefix, the rest only as a hash.
const API_KEY_LEN: usize = 43;
pub const API_KEY_PREFIX_LEN: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    id: i64,
    flag: String,
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| Error::Internal(format!("password hashing failed: {err}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Bearer tokens are HS256 JWTs carrying only the user id and an `auth`
/// flag. They do not expire.
pub fn generate_token(user_id: i64, secret_key: &str) -> Result<String> {
    let claims = Claims {
        id: user_id,
        flag: AUTH_FLAG.to_string(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret_key.as_bytes()),
    )
    .map_err(|err| Error::Internal(format!("token signing failed: {err}")))
}

/// Returns the user id carried by a valid auth token, or None when the
/// signature or the flag does not check out.
pub fn verify_token(token: &str, secret_key: &str) -> Option<i64> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret_key.as_bytes()),
        &validation,
    )
    .ok()?;

    if data.claims.flag != AUTH_FLAG {
        tracing::debug!("Token verification error: invalid flag");
        return None;
    }

    Some(data.claims.id)
}

pub struct GeneratedApiKey {
    /// Shown to the caller exactly once.
    pub raw: String,
    pub prefix: String,
    pub hash: String,
}

pub fn generate_api_key() -> Result<GeneratedApiKey> {
    let raw: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_LEN)
        .map(char::from)
        .collect();

    let prefix = raw[..API_KEY_PREFIX_LEN].to_string();
    let hash = hash_password(&raw)?;

    Ok(GeneratedApiKey { raw, prefix, hash })
}

pub fn verify_api_key(raw: &str, hash: &str) -> bool {
    verify_password(raw, hash)
}
