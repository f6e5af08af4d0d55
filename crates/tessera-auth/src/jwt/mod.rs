//! Session token infrastructure.
//!
//! ```text
//!  compact token ──► inspect (unverified header/payload)
//!                         │ kid, alg, iss
//!                         ▼
//!                    KeyProvider ──► IdentityAuthority (GET keys)
//!                         │ SigningKeySet
//!                         ▼
//!                    TokenVerifier ──► Session
//! ```
//!
//! # Modules
//!
//! - `keys` - signing key cache with single-flight loads and rotation grace
//! - `verifier` - signature, lifetime and issuer verification

pub mod keys;
pub mod verifier;

pub use keys::{KeyProvider, SigningKey, SigningKeySet};
pub use verifier::TokenVerifier;

use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AuthError, Result};

/// Algorithms a session token may be signed with.
///
/// Only asymmetric algorithms: the authority publishes public keys, so a
/// symmetric `alg` would turn the published key into a shared secret.
pub const ALLOWED_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
    Algorithm::ES256,
    Algorithm::ES384,
    Algorithm::EdDSA,
];

/// Token header fields read before the signature is checked
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenHeader {
    pub alg: String,
    #[serde(default)]
    pub kid: Option<String>,
}

/// Untrusted view of a compact token.
#[derive(Debug, Clone)]
pub(crate) struct UnverifiedToken {
    pub header: TokenHeader,
    pub issuer: Option<String>,
}

/// Parse the structure of a compact token without trusting any of it.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] unless the token has three
/// dot-separated segments whose first two decode to JSON objects.
pub(crate) fn inspect(token: &str) -> Result<UnverifiedToken> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AuthError::MalformedToken("expected 3 segments".into()));
    };
    if header.is_empty() || payload.is_empty() || signature.is_empty() {
        return Err(AuthError::MalformedToken("empty segment".into()));
    }

    let header: TokenHeader = decode_segment(header, "header")
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| AuthError::MalformedToken(format!("invalid header: {e}")))
        })?;

    let payload = decode_segment(payload, "payload")?;
    let issuer = payload
        .get("iss")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(UnverifiedToken { header, issuer })
}

fn decode_segment(segment: &str, name: &str) -> Result<Value> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::MalformedToken(format!("invalid {name} encoding: {e}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::MalformedToken(format!("invalid {name} JSON: {e}")))?;
    if !value.is_object() {
        return Err(AuthError::MalformedToken(format!("{name} is not an object")));
    }
    Ok(value)
}

/// Resolve a declared `alg` against [`ALLOWED_ALGORITHMS`].
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] for `none`, symmetric and
/// unknown algorithms.
pub(crate) fn parse_algorithm(alg: &str) -> Result<Algorithm> {
    Algorithm::from_str(alg)
        .ok()
        .filter(|algorithm| ALLOWED_ALGORITHMS.contains(algorithm))
        .ok_or_else(|| AuthError::UnsupportedAlgorithm(alg.to_string()))
}

/// Extract the project id from an issuer claim.
///
/// Accepts both a bare project id (`P123`) and an issuer URL whose last
/// path segment is the project id (`https://api.tessera.dev/P123`).
pub fn project_id_from_issuer(issuer: &str) -> &str {
    let trimmed = issuer.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Whether a project id is safe to place in an authority URL path.
///
/// Project ids are non-empty and made of ASCII letters, digits, `_` and `-`.
pub fn is_valid_project_id(project_id: &str) -> bool {
    !project_id.is_empty()
        && project_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}
