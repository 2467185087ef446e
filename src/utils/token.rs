//! Session tokens (HS256 JWT) and single-use password reset tokens.
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Reset links stay valid for ten minutes.
pub const RESET_TOKEN_TTL_MINUTES: i64 = 10;

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id
    pub sub: String,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Expiry, seconds since the epoch
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token has expired")]
    Expired,
    #[error("token is malformed or its signature does not match")]
    Invalid,
    #[error("token could not be created: {0}")]
    Creation(jsonwebtoken::errors::Error),
}

pub fn create_token(
    user_id: &str,
    secret: &[u8],
    expires_in_seconds: i64,
) -> Result<String, TokenError> {
    create_token_at(user_id, secret, Utc::now(), expires_in_seconds)
}

/// Like [`create_token`] with an explicit issue time.
pub fn create_token_at(
    user_id: &str,
    secret: &[u8],
    issued_at: DateTime<Utc>,
    expires_in_seconds: i64,
) -> Result<String, TokenError> {
    if user_id.is_empty() {
        return Err(TokenError::Creation(ErrorKind::InvalidSubject.into()));
    }

    let claims = TokenClaims {
        sub: user_id.to_string(),
        iat: issued_at.timestamp(),
        exp: (issued_at + Duration::seconds(expires_in_seconds)).timestamp(),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .map_err(TokenError::Creation)
}

/// Verify signature and expiry. A token is accepted up to and including
/// its `exp` second.
pub fn decode_token(token: &str, secret: &[u8]) -> Result<TokenClaims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    decode::<TokenClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        })
}

/// A freshly issued reset token. Only `hashed` is ever stored.
pub struct ResetToken {
    pub raw: String,
    pub hashed: String,
    pub expires_at: DateTime<Utc>,
}

pub fn create_reset_token() -> ResetToken {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let raw = hex::encode(bytes);

    ResetToken {
        hashed: hash_reset_token(&raw),
        raw,
        expires_at: Utc::now() + Duration::minutes(RESET_TOKEN_TTL_MINUTES),
    }
}

pub fn hash_reset_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn round_trip_keeps_subject_and_times() {
        let token = create_token("42", SECRET, 60).unwrap();
        let claims = decode_token(&token, SECRET).unwrap();
        assert_eq!(claims.sub, "42");
        assert_eq!(claims.exp - claims.iat, 60);
    }

    #[test]
    fn expired_tokens_are_distinguished_from_invalid_ones() {
        let issued = Utc::now() - Duration::seconds(120);
        let token = create_token_at("42", SECRET, issued, 60).unwrap();
        assert!(matches!(decode_token(&token, SECRET), Err(TokenError::Expired)));

        let token = create_token("42", SECRET, 60).unwrap();
        assert!(matches!(
            decode_token(&token, b"another-secret"),
            Err(TokenError::Invalid)
        ));
        assert!(matches!(
            decode_token("not.a.token", SECRET),
            Err(TokenError::Invalid)
        ));
    }

    #[test]
    fn token_is_valid_until_its_expiry() {
        let issued = Utc::now() - Duration::seconds(30);
        let token = create_token_at("42", SECRET, issued, 60).unwrap();
        assert!(decode_token(&token, SECRET).is_ok());
    }

    #[test]
    fn empty_subject_is_rejected() {
        assert!(matches!(
            create_token("", SECRET, 60),
            Err(TokenError::Creation(_))
        ));
    }

    #[test]
    fn reset_tokens_store_only_the_digest() {
        let token = create_reset_token();
        assert_eq!(token.raw.len(), 64);
        assert_ne!(token.raw, token.hashed);
        assert_eq!(hash_reset_token(&token.raw), token.hashed);
        assert!(token.expires_at > Utc::now());
    }
}
