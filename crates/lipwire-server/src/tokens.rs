//! Bearer credentials.
//!
//! Tokens are Ed25519-signed JSON claims in the compact form
//! `base64url(claims) "." base64url(signature)`. Access tokens are
//! short-lived and carry no server-side state; refresh tokens carry a `jti`
//! tracked in the store's revocation set. Rotation is rotate-and-revoke: a
//! successful `rotate` atomically consumes the presented `jti` and publishes
//! a replacement, so replaying the old refresh token yields `REVOKED`.

use std::path::Path;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use lipwire_shared::types::UserId;
use lipwire_store::{RefreshTokenRecord, Store, StoreError};

use crate::error::codes;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Malformed token")]
    Malformed,

    #[error("Invalid token signature")]
    InvalidSignature,

    #[error("Token expired")]
    Expired,

    #[error("Wrong token type")]
    WrongType,

    #[error("Token revoked")]
    Revoked,

    #[error("Token does not match this user")]
    UserMismatch,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl TokenError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Malformed | Self::InvalidSignature => codes::INVALID_SIGNATURE,
            Self::Expired => codes::EXPIRED,
            Self::WrongType => codes::WRONG_TYPE,
            Self::Revoked => codes::REVOKED,
            Self::UserMismatch => codes::USER_MISMATCH,
            Self::Store(_) => codes::STORAGE_ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: UserId,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl Claims {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

#[derive(Clone)]
pub struct TokenService {
    signing: Arc<SigningKey>,
    verifying: VerifyingKey,
    store: Arc<Store>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(
        signing: SigningKey,
        store: Arc<Store>,
        access_ttl_minutes: i64,
        refresh_ttl_days: i64,
    ) -> Self {
        let verifying = signing.verifying_key();
        Self {
            signing: Arc::new(signing),
            verifying,
            store,
            access_ttl: Duration::minutes(access_ttl_minutes),
            refresh_ttl: Duration::days(refresh_ttl_days),
        }
    }

    /// Issue a fresh access + refresh pair and record the refresh `jti` as
    /// valid.
    pub fn issue(&self, user: UserId) -> Result<TokenPair, TokenError> {
        let now = Utc::now();
        let access = self.encode(&Claims {
            sub: user,
            kind: TokenKind::Access,
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            jti: None,
        });

        let jti = Uuid::new_v4().to_string();
        let expires_at = now + self.refresh_ttl;
        let refresh = self.encode(&Claims {
            sub: user,
            kind: TokenKind::Refresh,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Some(jti.clone()),
        });

        self.store
            .insert_refresh_token(&RefreshTokenRecord::new(jti, user, now, expires_at))?;

        Ok(TokenPair { access, refresh })
    }

    /// Check signature, type, expiry, and user-id match of an access token.
    pub fn verify_access(&self, token: &str, expected_user: UserId) -> Result<Claims, TokenError> {
        let claims = self.decode(token, TokenKind::Access)?;
        if claims.sub != expected_user {
            return Err(TokenError::UserMismatch);
        }
        Ok(claims)
    }

    /// Exchange a refresh token for a new pair, revoking the presented `jti`.
    /// On any failure no tokens are issued.
    pub fn rotate(&self, refresh: &str) -> Result<(UserId, TokenPair), TokenError> {
        let claims = match self.decode(refresh, TokenKind::Refresh) {
            Ok(claims) => claims,
            Err(TokenError::Expired) => {
                // Revoke the record so a clock-skewed replica can't honor it.
                if let Ok(stale) = self.decode_unchecked_expiry(refresh, TokenKind::Refresh) {
                    if let Some(jti) = stale.jti {
                        let _ = self.store.revoke_refresh_token(&jti);
                    }
                }
                return Err(TokenError::Expired);
            }
            Err(other) => return Err(other),
        };
        let old_jti = claims.jti.ok_or(TokenError::Malformed)?;
        let user = claims.sub;

        let now = Utc::now();
        let new_jti = Uuid::new_v4().to_string();
        let expires_at = now + self.refresh_ttl;
        let replacement = RefreshTokenRecord::new(new_jti.clone(), user, now, expires_at);

        if !self.store.rotate_refresh_token(&old_jti, &replacement, now)? {
            return Err(TokenError::Revoked);
        }

        let access = self.encode(&Claims {
            sub: user,
            kind: TokenKind::Access,
            iat: now.timestamp(),
            exp: (now + self.access_ttl).timestamp(),
            jti: None,
        });
        let refresh = self.encode(&Claims {
            sub: user,
            kind: TokenKind::Refresh,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            jti: Some(new_jti),
        });

        Ok((user, TokenPair { access, refresh }))
    }

    /// Revoke every outstanding refresh token for `user` (logout).
    pub fn revoke_all(&self, user: UserId) -> Result<usize, TokenError> {
        Ok(self.store.revoke_all_refresh_tokens(user)?)
    }

    fn encode(&self, claims: &Claims) -> String {
        // Claims are our own struct; serialization cannot fail.
        let body = serde_json::to_vec(claims).expect("claims serialize");
        let signature = self.signing.sign(&body);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&body),
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        )
    }

    fn decode(&self, token: &str, expected: TokenKind) -> Result<Claims, TokenError> {
        let claims = self.decode_unchecked_expiry(token, expected)?;
        if claims.exp <= Utc::now().timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }

    fn decode_unchecked_expiry(
        &self,
        token: &str,
        expected: TokenKind,
    ) -> Result<Claims, TokenError> {
        let (body_b64, sig_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let body = URL_SAFE_NO_PAD
            .decode(body_b64)
            .map_err(|_| TokenError::Malformed)?;
        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::Malformed)?;
        let signature =
            Signature::from_slice(&sig_bytes).map_err(|_| TokenError::InvalidSignature)?;

        self.verifying
            .verify(&body, &signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims = serde_json::from_slice(&body).map_err(|_| TokenError::Malformed)?;
        if claims.kind != expected {
            return Err(TokenError::WrongType);
        }
        Ok(claims)
    }
}

/// Load the signing key from a hex-encoded 32-byte seed file, or generate an
/// ephemeral one when no path is configured.
pub fn load_signing_key(path: Option<&Path>) -> std::io::Result<SigningKey> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let bytes = hex::decode(text.trim()).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
            })?;
            let seed: [u8; 32] = bytes.try_into().map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "token key must be 32 bytes of hex",
                )
            })?;
            Ok(SigningKey::from_bytes(&seed))
        }
        None => {
            tracing::warn!(
                "No token signing key configured; generating an ephemeral key \
                 (issued tokens will not survive a restart)"
            );
            Ok(SigningKey::generate(&mut OsRng))
        }
    }
}
