//! Signing key resolution and caching.
//!
//! [`KeyProvider`] resolves the public keys for a project. Results are cached
//! per project until explicitly invalidated; concurrent misses for the same
//! project are coalesced into a single authority call.
//!
//! # Rotation
//!
//! When a token names a key id the cached set does not know, the verifier
//! calls [`KeyProvider::refresh_keys`] once. Keys that disappear from the
//! refreshed set are kept as *retired* for the configured grace period so
//! tokens signed just before the rotation keep verifying.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{Jwk, JwkSet, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use moka::future::Cache;
use tracing::{debug, info, warn};

use super::ALLOWED_ALGORITHMS;
use crate::authority::IdentityAuthority;
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};

/// Upper bound on distinct projects held in the key cache
const MAX_CACHED_PROJECTS: u64 = 1_000;

/// Window in which concurrent rotation refetches for a project share one result
const ROTATION_COALESCE_WINDOW: Duration = Duration::from_secs(1);

/// One public verification key.
#[derive(Clone)]
pub struct SigningKey {
    kid: Option<String>,
    algorithm: Option<Algorithm>,
    key: DecodingKey,
    retired_until: Option<Instant>,
}

impl SigningKey {
    fn from_jwk(jwk: &Jwk) -> std::result::Result<Self, String> {
        let algorithm = match &jwk.common.key_algorithm {
            Some(declared) => {
                let name = serde_json::to_value(declared)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_default();
                let algorithm = Algorithm::from_str(&name)
                    .ok()
                    .filter(|alg| ALLOWED_ALGORITHMS.contains(alg))
                    .ok_or_else(|| format!("key algorithm {name:?} is not a signature algorithm"))?;
                Some(algorithm)
            }
            None => None,
        };
        let key = DecodingKey::from_jwk(jwk).map_err(|e| e.to_string())?;

        Ok(Self {
            kid: jwk.common.key_id.clone(),
            algorithm,
            key,
            retired_until: None,
        })
    }

    /// Key id, if the authority published one
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Algorithm the key is restricted to, if declared
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Whether the key was rotated out and only survives for its grace period
    pub fn is_retired(&self) -> bool {
        self.retired_until.is_some()
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    fn is_usable_at(&self, now: Instant) -> bool {
        self.retired_until.is_none_or(|until| now < until)
    }

    fn accepts(&self, algorithm: Algorithm) -> bool {
        self.algorithm.is_none_or(|declared| declared == algorithm)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("retired", &self.is_retired())
            .finish_non_exhaustive()
    }
}

/// Public keys published for one project.
///
/// Holds at most one active key per key id.
#[derive(Debug, Clone, Default)]
pub struct SigningKeySet {
    keys: Vec<SigningKey>,
}

impl SigningKeySet {
    /// Build a key set from a JWK set.
    ///
    /// Encryption keys, keys declaring an algorithm outside
    /// [`ALLOWED_ALGORITHMS`] and keys that cannot be parsed are skipped.
    /// Later duplicates of a key id are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error message when no usable signing key remains.
    pub fn from_jwks(jwks: &JwkSet) -> std::result::Result<Self, String> {
        let mut keys: Vec<SigningKey> = Vec::with_capacity(jwks.keys.len());

        for jwk in &jwks.keys {
            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                continue;
            }
            match SigningKey::from_jwk(jwk) {
                Ok(key) => {
                    if key.kid.is_some() && keys.iter().any(|existing| existing.kid == key.kid) {
                        warn!(kid = ?key.kid, "Ignoring duplicate key id");
                        continue;
                    }
                    keys.push(key);
                }
                Err(e) => warn!(kid = ?jwk.common.key_id, error = %e, "Skipping unusable key"),
            }
        }

        if keys.is_empty() {
            return Err("no usable signing keys published".to_string());
        }
        Ok(Self { keys })
    }

    /// Number of keys, including retired ones
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// All keys, including retired ones
    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    /// Whether a usable key with this id is present
    pub fn contains_kid(&self, kid: &str) -> bool {
        let now = Instant::now();
        self.keys
            .iter()
            .any(|key| key.kid.as_deref() == Some(kid) && key.is_usable_at(now))
    }

    /// Keys that may verify a token with the given key id and algorithm.
    ///
    /// With a key id only the matching key is returned; without one every
    /// usable key is a candidate.
    pub(crate) fn candidates(&self, kid: Option<&str>, algorithm: Algorithm) -> Vec<&SigningKey> {
        let now = Instant::now();
        self.keys
            .iter()
            .filter(|key| key.is_usable_at(now) && key.accepts(algorithm))
            .filter(|key| kid.is_none() || key.kid.as_deref() == kid)
            .collect()
    }

    /// Combine a freshly fetched set with the one it replaces.
    ///
    /// Keys of `previous` whose id is absent from `self` are retained until
    /// `grace` elapses. A key already retired keeps its original deadline.
    fn with_retired(mut self, previous: &SigningKeySet, grace: Duration) -> Self {
        let now = Instant::now();
        let retired: Vec<SigningKey> = previous
            .keys
            .iter()
            .filter(|old| old.kid.is_some() && old.is_usable_at(now))
            .filter(|old| !self.keys.iter().any(|new| new.kid == old.kid))
            .map(|old| SigningKey {
                retired_until: Some(old.retired_until.unwrap_or(now + grace)),
                ..old.clone()
            })
            .collect();

        if !retired.is_empty() {
            debug!(retired = retired.len(), "Retaining rotated-out keys");
        }
        self.keys.extend(retired);
        self
    }
}

/// Parse pinned key material: a JWK set or a single JWK.
pub(crate) fn parse_public_key(json: &str) -> std::result::Result<SigningKeySet, String> {
    let jwks = match serde_json::from_str::<JwkSet>(json) {
        Ok(set) => set,
        Err(_) => {
            let jwk: Jwk = serde_json::from_str(json).map_err(|e| e.to_string())?;
            JwkSet { keys: vec![jwk] }
        }
    };
    SigningKeySet::from_jwks(&jwks)
}

/// Per-project signing key cache backed by the identity authority.
#[derive(Clone)]
pub struct KeyProvider {
    authority: Arc<dyn IdentityAuthority>,
    cache: Cache<String, Arc<SigningKeySet>>,
    // Rotation refetches run here so the last good set stays readable in `cache`
    rotations: Cache<String, Arc<SigningKeySet>>,
    pinned: Option<(String, Arc<SigningKeySet>)>,
    grace_period: Duration,
}

impl fmt::Debug for KeyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyProvider")
            .field("authority", &self.authority)
            .field("cached_projects", &self.cache.entry_count())
            .field("pinned", &self.pinned.as_ref().map(|(project, _)| project))
            .field("grace_period", &self.grace_period)
            .finish()
    }
}

impl KeyProvider {
    /// Create a key provider.
    ///
    /// When `config.public_key` is set, that key set is served for
    /// `config.project_id` and never fetched.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the pinned key cannot be parsed.
    pub fn new(authority: Arc<dyn IdentityAuthority>, config: &AuthConfig) -> Result<Self> {
        let pinned = config
            .public_key
            .as_deref()
            .map(|json| {
                parse_public_key(json)
                    .map(|set| (config.project_id.clone(), Arc::new(set)))
                    .map_err(|e| AuthError::Configuration(format!("invalid public key: {e}")))
            })
            .transpose()?;

        Ok(Self {
            authority,
            cache: Cache::builder().max_capacity(MAX_CACHED_PROJECTS).build(),
            rotations: Cache::builder()
                .max_capacity(MAX_CACHED_PROJECTS)
                .time_to_live(ROTATION_COALESCE_WINDOW)
                .build(),
            pinned,
            grace_period: config.key_grace_period,
        })
    }

    fn pinned_for(&self, project_id: &str) -> Option<Arc<SigningKeySet>> {
        self.pinned
            .as_ref()
            .filter(|(pinned_project, _)| pinned_project == project_id)
            .map(|(_, set)| Arc::clone(set))
    }

    /// Whether keys for this project are pinned rather than fetched
    pub fn is_pinned(&self, project_id: &str) -> bool {
        self.pinned_for(project_id).is_some()
    }

    /// Get the key set for a project, fetching it on a cache miss.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyFetch`] if the authority is unreachable or
    /// publishes no usable key.
    pub async fn get_keys(&self, project_id: &str) -> Result<Arc<SigningKeySet>> {
        if let Some(pinned) = self.pinned_for(project_id) {
            return Ok(pinned);
        }

        if let Some(cached) = self.cache.get(project_id).await {
            debug!(project_id, key_count = cached.len(), "Using cached signing keys");
            return Ok(cached);
        }

        self.load(project_id, None).await
    }

    /// Replace the cached key set with a fresh fetch.
    ///
    /// Used once per verification when a token names an unknown key id.
    /// Keys dropped by the authority stay usable for the grace period. The
    /// current set keeps serving other verifications while the refetch is in
    /// flight and is left untouched if the refetch fails. Concurrent refetches
    /// for one project share a single authority call.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyFetch`] if the refetch fails.
    pub async fn refresh_keys(&self, project_id: &str) -> Result<Arc<SigningKeySet>> {
        if let Some(pinned) = self.pinned_for(project_id) {
            return Ok(pinned);
        }

        let previous = self.cache.get(project_id).await;
        let keys = self
            .rotations
            .try_get_with(project_id.to_string(), self.fetch(project_id, previous))
            .await
            .map_err(Arc::unwrap_or_clone)?;

        self.cache
            .insert(project_id.to_string(), Arc::clone(&keys))
            .await;
        Ok(keys)
    }

    /// Drop the cached key set for a project
    pub async fn invalidate(&self, project_id: &str) {
        self.cache.invalidate(project_id).await;
        self.rotations.invalidate(project_id).await;
        debug!(project_id, "Signing key cache invalidated");
    }

    async fn load(
        &self,
        project_id: &str,
        previous: Option<Arc<SigningKeySet>>,
    ) -> Result<Arc<SigningKeySet>> {
        self.cache
            .try_get_with(project_id.to_string(), self.fetch(project_id, previous))
            .await
            .map_err(Arc::unwrap_or_clone)
    }

    /// Fetch and parse a project's keys, retaining `previous` keys the new set dropped
    fn fetch(
        &self,
        project_id: &str,
        previous: Option<Arc<SigningKeySet>>,
    ) -> impl Future<Output = Result<Arc<SigningKeySet>>> + Send + 'static {
        let authority = Arc::clone(&self.authority);
        let grace = self.grace_period;
        let owned_project = project_id.to_string();

        async move {
            let jwks = authority.fetch_signing_keys(&owned_project).await?;
            let mut set = SigningKeySet::from_jwks(&jwks).map_err(|reason| AuthError::KeyFetch {
                project_id: owned_project.clone(),
                reason,
            })?;
            if let Some(previous) = previous {
                set = set.with_retired(&previous, grace);
            }
            info!(
                project_id = %owned_project,
                key_count = set.len(),
                "Cached signing keys"
            );
            Ok(Arc::new(set))
        }
    }
}
