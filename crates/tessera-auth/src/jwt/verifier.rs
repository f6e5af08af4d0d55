//! Session token verification.
//!
//! [`TokenVerifier::verify`] checks, in order: token structure, declared
//! algorithm, issuer, then signature (with one key refresh when the key id is
//! unknown) and expiry and not-before within the clock-skew tolerance. Only a
//! fully verified payload becomes a [`Session`].

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, TokenData, Validation, decode};
use tracing::{debug, warn};

use super::keys::{KeyProvider, SigningKeySet};
use super::{inspect, is_valid_project_id, parse_algorithm, project_id_from_issuer};
use crate::error::{AuthError, Result};
use crate::session::{Claims, Session};

/// Verifies compact session tokens against a project's published keys.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    keys: KeyProvider,
    clock_skew: Duration,
}

impl TokenVerifier {
    /// Create a verifier.
    ///
    /// `clock_skew` is applied to both `exp` and `nbf`.
    pub fn new(keys: KeyProvider, clock_skew: Duration) -> Self {
        Self { keys, clock_skew }
    }

    /// Key provider backing this verifier
    pub fn keys(&self) -> &KeyProvider {
        &self.keys
    }

    /// Configured clock-skew tolerance
    pub fn clock_skew(&self) -> Duration {
        self.clock_skew
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.leeway = self.clock_skew.as_secs();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation
    }

    /// Verify a compact token and build a [`Session`] from its claims.
    ///
    /// `expected_issuer` may be a bare project id or an issuer URL; either form
    /// matches either form in the token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] for unparsable tokens or missing claims
    /// - [`AuthError::UnsupportedAlgorithm`] for `none`, symmetric or unknown algorithms
    /// - [`AuthError::KeyFetch`] if the key set cannot be loaded
    /// - [`AuthError::InvalidSignature`] if no key verifies the signature
    /// - [`AuthError::ExpiredToken`] / [`AuthError::TokenNotYetValid`] outside the tolerance
    /// - [`AuthError::IssuerMismatch`] if `expected_issuer` does not match
    pub async fn verify(&self, token: &str, expected_issuer: Option<&str>) -> Result<Session> {
        let unverified = inspect(token)?;
        let algorithm = parse_algorithm(&unverified.header.alg).inspect_err(|_| {
            warn!(algorithm = %unverified.header.alg, "Rejected token algorithm");
        })?;

        let issuer = unverified
            .issuer
            .as_deref()
            .ok_or_else(|| AuthError::MalformedToken("missing required claim: iss".into()))?;
        let project_id = project_id_from_issuer(issuer);
        if !is_valid_project_id(project_id) {
            warn!("Token issuer is not a valid project id");
            return Err(AuthError::MalformedToken("invalid issuer".into()));
        }

        // Keys are only ever fetched for the expected project
        if let Some(expected) = expected_issuer
            && project_id_from_issuer(expected) != project_id
        {
            warn!(expected, actual = issuer, "Token issuer mismatch");
            return Err(AuthError::IssuerMismatch {
                expected: expected.to_string(),
                actual: issuer.to_string(),
            });
        }

        let kid = unverified.header.kid.as_deref();
        let keys = self.resolve_keys(project_id, kid).await?;
        let token_data = self.decode_with(&keys, token, kid, algorithm)?;

        let session = Session::from_verified(token.to_string(), token_data.claims)?;
        debug!(
            project_id = %session.project_id(),
            kid = ?kid,
            algorithm = ?algorithm,
            "Session token verified"
        );
        Ok(session)
    }

    /// Load the key set, refetching once if the token names an unknown key id.
    ///
    /// A failed refetch is reported as [`AuthError::InvalidSignature`]: the
    /// token cites a key the authority never confirmed.
    async fn resolve_keys(&self, project_id: &str, kid: Option<&str>) -> Result<Arc<SigningKeySet>> {
        let keys = self.keys.get_keys(project_id).await?;

        let Some(kid) = kid else {
            return Ok(keys);
        };
        if keys.contains_kid(kid) || self.keys.is_pinned(project_id) {
            return Ok(keys);
        }

        warn!(project_id, kid, "Unknown key id, refreshing signing keys");
        match self.keys.refresh_keys(project_id).await {
            Ok(refreshed) => Ok(refreshed),
            Err(e) => {
                warn!(project_id, kid, error = %e, "Key refresh failed during rotation retry");
                Err(AuthError::InvalidSignature)
            }
        }
    }

    fn decode_with(
        &self,
        keys: &SigningKeySet,
        token: &str,
        kid: Option<&str>,
        algorithm: Algorithm,
    ) -> Result<TokenData<Claims>> {
        let candidates = keys.candidates(kid, algorithm);
        if candidates.is_empty() {
            warn!(kid = ?kid, algorithm = ?algorithm, "No signing key matches token");
            return Err(AuthError::InvalidSignature);
        }

        let validation = self.validation(algorithm);
        let mut last_error = AuthError::InvalidSignature;
        for key in candidates {
            match decode::<Claims>(token, key.decoding_key(), &validation) {
                Ok(data) => return Ok(data),
                Err(e) => {
                    let err = AuthError::from(e);
                    if err != AuthError::InvalidSignature {
                        debug!(kid = ?key.kid(), error = %err, "Token rejected");
                        return Err(err);
                    }
                    last_error = err;
                }
            }
        }

        debug!(kid = ?kid, "Token signature did not verify");
        Err(last_error)
    }
}
