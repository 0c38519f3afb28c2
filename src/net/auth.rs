//! Bearer token verification (compact JWT, HS256)
//!
//! The account service issues the tokens; the server only checks the signature,
//! the expiry and that a `userId` claim is present.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ring::hmac;
use serde::{Deserialize, Serialize};

use crate::store::AccountId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("No token provided")]
    MissingToken,
    #[error("Malformed token")]
    Malformed,
    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Invalid token signature")]
    BadSignature,
    #[error("Token expired")]
    Expired,
    #[error("Token has no userId claim")]
    MissingUserId,
    #[error("First message must be Authenticate")]
    NotAuthenticated,
    #[error("Account not found")]
    UnknownAccount,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId", default)]
    pub user_id: Option<AccountId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Expiry, unix seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Verified identity extracted from a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    pub account_id: AccountId,
    pub username: Option<String>,
}

pub struct TokenVerifier {
    key: hmac::Key,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    /// Check `token` at `now_secs` (unix seconds)
    pub fn verify(&self, token: &str, now_secs: u64) -> Result<AuthClaims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }

        let mut parts = token.split('.');
        let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };

        let header: Header = decode_segment(header_b64)?;
        if header.alg != "HS256" {
            return Err(AuthError::UnsupportedAlgorithm(header.alg));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::Malformed)?;
        let signing_input = &token[..header_b64.len() + 1 + payload_b64.len()];
        hmac::verify(&self.key, signing_input.as_bytes(), &signature)
            .map_err(|_| AuthError::BadSignature)?;

        let claims: Claims = decode_segment(payload_b64)?;
        if matches!(claims.exp, Some(exp) if exp <= now_secs) {
            return Err(AuthError::Expired);
        }

        match claims.user_id {
            Some(account_id) if !account_id.is_empty() => Ok(AuthClaims {
                account_id,
                username: claims.username,
            }),
            _ => Err(AuthError::MissingUserId),
        }
    }

    /// Issue a token for `claims`; used by tests and local tooling
    pub fn sign(&self, claims: &Claims) -> Result<String, serde_json::Error> {
        let header = serde_json::to_vec(&Header {
            alg: "HS256".to_string(),
            typ: Some("JWT".to_string()),
        })?;
        let payload = serde_json::to_vec(claims)?;

        let mut token = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let tag = hmac::sign(&self.key, token.as_bytes());
        token.push('.');
        token.push_str(&URL_SAFE_NO_PAD.encode(tag.as_ref()));
        Ok(token)
    }
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AuthError::Malformed)?;
    serde_json::from_slice(&bytes).map_err(|_| AuthError::Malformed)
}
