// Password hashing and opaque bearer tokens.
//
// Tokens have the form `"{row_id}|{secret}"`. Only the sha256 of the secret is
// stored.

use anyhow::anyhow;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::model::User;

const TOKEN_SECRET_LEN: usize = 40;

pub fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| anyhow!("failed to encode password salt: {e}"))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("failed to hash password: {e}"))?;
    Ok(hash.to_string())
}

/// `false` for a wrong password or an unparseable stored hash.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            debug!("stored password hash is not a PHC string: {e}");
            false
        }
    }
}

/// Lowercase hex sha256.
pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

/// Constant-time string equality.
pub fn secure_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Split `"{id}|{secret}"`.
pub fn parse_token(token: &str) -> Option<(i64, &str)> {
    let (id, secret) = token.split_once('|')?;
    let id = id.parse().ok()?;
    if secret.is_empty() {
        return None;
    }
    Some((id, secret))
}

/// Create a token row for the user and return the plain-text token.
pub fn issue_token(db: &Database, user_id: i64) -> AppResult<String> {
    let secret = random_token(TOKEN_SECRET_LEN);
    let id = db.insert_access_token(user_id, &sha256_hex(&secret), Utc::now())?;
    Ok(format!("{id}|{secret}"))
}

/// Resolve a bearer token to its user and the token row id.
pub fn authenticate(db: &Database, token: &str) -> AppResult<(User, i64)> {
    let (token_id, secret) = parse_token(token).ok_or(AppError::Unauthorized)?;
    let (user_id, stored) = db
        .get_access_token(token_id)?
        .ok_or(AppError::Unauthorized)?;
    if !secure_eq(&sha256_hex(secret), &stored) {
        return Err(AppError::Unauthorized);
    }
    let user = db.get_user(user_id)?.ok_or(AppError::Unauthorized)?;
    db.touch_access_token(token_id, Utc::now())?;
    Ok((user, token_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{seed_user, test_db};
    use crate::model::Role;

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn sha256_is_lowercase_hex() {
        assert_eq!(
            sha256_hex("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn parse_token_requires_id_and_secret() {
        assert_eq!(parse_token("12|abc"), Some((12, "abc")));
        assert_eq!(parse_token("12|"), None);
        assert_eq!(parse_token("x|abc"), None);
        assert_eq!(parse_token("abc"), None);
    }

    #[test]
    fn issued_token_authenticates() {
        let db = test_db();
        let user = seed_user(&db, "ana", Role::Client);

        let token = issue_token(&db, user.id).unwrap();
        let (found, token_id) = authenticate(&db, &token).unwrap();
        assert_eq!(found.id, user.id);

        db.delete_access_token(token_id).unwrap();
        assert!(matches!(authenticate(&db, &token), Err(AppError::Unauthorized)));
    }

    #[test]
    fn tampered_secret_is_rejected() {
        let db = test_db();
        let user = seed_user(&db, "ana", Role::Client);
        let token = issue_token(&db, user.id).unwrap();
        let (id, _) = parse_token(&token).unwrap();

        let forged = format!("{id}|{}", random_token(TOKEN_SECRET_LEN));
        assert!(matches!(authenticate(&db, &forged), Err(AppError::Unauthorized)));
    }
}
