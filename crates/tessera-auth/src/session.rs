//! Validated session model.
//!
//! A [`Session`] is only ever built by the token verifier from claims whose
//! signature, issuer and lifetime have already been checked. It is immutable;
//! everything beyond subject, project and expiry is read through typed
//! accessors over the private claim mapping.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AuthError, Result};
use crate::jwt::project_id_from_issuer;

/// Private token claims, keyed by claim name.
pub type Claims = Map<String, Value>;

/// Claim holding the mapping from tenant id to tenant-scoped attributes
pub const CLAIM_TENANTS: &str = "tenants";
/// Authentication methods reference claim (ordered factor identifiers)
pub const CLAIM_AUTH_FACTORS: &str = "amr";
/// Claim listing project-level roles, also used inside tenant attributes
pub const CLAIM_ROLES: &str = "roles";
/// Claim listing project-level permissions, also used inside tenant attributes
pub const CLAIM_PERMISSIONS: &str = "permissions";
/// Custom-claims namespace folded into the top-level mapping
pub const CLAIM_NAMESPACE: &str = "nsec";

const REGISTERED_CLAIMS: &[&str] = &["iss", "sub", "aud", "exp", "nbf", "iat", "jti"];

/// Authentication factor recorded in the `amr` claim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthFactor {
    /// Email one-time code or magic link
    Email,
    /// SMS one-time code
    Sms,
    /// SAML / federated login
    Federated,
    /// OAuth provider
    OAuth,
    /// WebAuthn credential
    WebAuthn,
    /// Time-based one-time password
    Totp,
    /// Generic second factor
    Mfa,
    /// Any factor this crate does not name
    Other(String),
}

impl AuthFactor {
    /// Identifier as it appears in the claim
    pub fn as_str(&self) -> &str {
        match self {
            AuthFactor::Email => "email",
            AuthFactor::Sms => "sms",
            AuthFactor::Federated => "fed",
            AuthFactor::OAuth => "oauth",
            AuthFactor::WebAuthn => "webauthn",
            AuthFactor::Totp => "totp",
            AuthFactor::Mfa => "mfa",
            AuthFactor::Other(other) => other,
        }
    }
}

impl From<&str> for AuthFactor {
    fn from(value: &str) -> Self {
        match value {
            "email" => AuthFactor::Email,
            "sms" => AuthFactor::Sms,
            "fed" => AuthFactor::Federated,
            "oauth" => AuthFactor::OAuth,
            "webauthn" => AuthFactor::WebAuthn,
            "totp" => AuthFactor::Totp,
            "mfa" => AuthFactor::Mfa,
            other => AuthFactor::Other(other.to_string()),
        }
    }
}

impl From<String> for AuthFactor {
    fn from(value: String) -> Self {
        AuthFactor::from(value.as_str())
    }
}

impl From<AuthFactor> for String {
    fn from(factor: AuthFactor) -> Self {
        factor.as_str().to_string()
    }
}

impl fmt::Display for AuthFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated session token.
#[derive(Clone, PartialEq)]
pub struct Session {
    subject: String,
    project_id: String,
    expires_at: u64,
    token: String,
    claims: Claims,
}

impl Session {
    /// Build a session from the payload of a token that already passed verification.
    ///
    /// Registered claims are lifted into dedicated fields; the `nsec`
    /// namespace is merged into the remaining claims without overriding them.
    pub(crate) fn from_verified(token: String, mut claims: Claims) -> Result<Self> {
        let subject = claims
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::MalformedToken("missing required claim: sub".into()))?
            .to_string();
        let issuer = claims
            .get("iss")
            .and_then(Value::as_str)
            .ok_or_else(|| AuthError::MalformedToken("missing required claim: iss".into()))?;
        let project_id = project_id_from_issuer(issuer).to_string();
        let expires_at = claims
            .get("exp")
            .and_then(|exp| exp.as_u64().or_else(|| exp.as_f64().map(|f| f as u64)))
            .ok_or_else(|| AuthError::MalformedToken("missing required claim: exp".into()))?;

        for name in REGISTERED_CLAIMS {
            claims.remove(*name);
        }

        if let Some(Value::Object(namespace)) = claims.remove(CLAIM_NAMESPACE) {
            for (key, value) in namespace {
                claims.entry(key).or_insert(value);
            }
        }

        Ok(Self {
            subject,
            project_id,
            expires_at,
            token,
            claims,
        })
    }

    /// Subject (user) id
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Project id the token was issued for
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Expiry as unix seconds
    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    /// Raw compact token
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Private claims (registered claims removed, custom namespace merged)
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Look up an arbitrary claim by name
    pub fn custom_claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Deserialize a claim into a concrete type.
    ///
    /// Returns `None` when the claim is absent or has a different shape.
    pub fn custom_claim_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.claims
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    fn tenant_map(&self) -> Option<&Map<String, Value>> {
        self.claims.get(CLAIM_TENANTS).and_then(Value::as_object)
    }

    /// Tenant ids the session is authorized for, in claim order
    pub fn tenants(&self) -> Vec<&str> {
        self.tenant_map()
            .map(|tenants| tenants.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// A single tenant-scoped attribute
    pub fn tenant_value(&self, tenant: &str, key: &str) -> Option<&Value> {
        self.tenant_map()?.get(tenant)?.as_object()?.get(key)
    }

    /// Authentication factors used to establish the session, in claim order.
    ///
    /// Non-string entries are skipped.
    pub fn auth_factors(&self) -> Vec<AuthFactor> {
        let Some(factors) = self.claims.get(CLAIM_AUTH_FACTORS) else {
            return Vec::new();
        };
        match factors.as_array() {
            Some(entries) => entries
                .iter()
                .filter_map(Value::as_str)
                .map(AuthFactor::from)
                .collect(),
            None => {
                tracing::debug!("Ignoring non-array authentication methods claim");
                Vec::new()
            }
        }
    }

    /// Whether more than one factor was used
    pub fn is_mfa(&self) -> bool {
        self.auth_factors().len() > 1
    }

    /// Project-level roles
    pub fn roles(&self) -> Vec<&str> {
        string_list(self.claims.get(CLAIM_ROLES))
    }

    /// Project-level permissions
    pub fn permissions(&self) -> Vec<&str> {
        string_list(self.claims.get(CLAIM_PERMISSIONS))
    }

    /// Roles granted within a tenant
    pub fn tenant_roles(&self, tenant: &str) -> Vec<&str> {
        string_list(self.tenant_value(tenant, CLAIM_ROLES))
    }

    /// Permissions granted within a tenant
    pub fn tenant_permissions(&self, tenant: &str) -> Vec<&str> {
        string_list(self.tenant_value(tenant, CLAIM_PERMISSIONS))
    }

    /// Check if the session has a project-level role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles().contains(&role)
    }

    /// Check if the session has a project-level permission
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions().contains(&permission)
    }

    /// Check if the session has a role within a tenant
    pub fn has_tenant_role(&self, tenant: &str, role: &str) -> bool {
        self.tenant_roles(tenant).contains(&role)
    }

    /// Check if the session has a permission within a tenant
    pub fn has_tenant_permission(&self, tenant: &str, permission: &str) -> bool {
        self.tenant_permissions(tenant).contains(&permission)
    }
}

fn string_list(value: Option<&Value>) -> Vec<&str> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("subject", &self.subject)
            .field("project_id", &self.project_id)
            .field("expires_at", &self.expires_at)
            .field("token", &"[REDACTED]")
            .field("claims", &self.claims)
            .finish()
    }
}

/// Long-lived token used only to mint new session tokens.
///
/// Single use: the authority rotates it on every refresh.
#[derive(Clone)]
pub struct RefreshToken {
    /// Project the token belongs to
    pub project_id: String,
    token: SecretString,
    /// Expiry as unix seconds, when known
    pub expires_at: Option<u64>,
}

impl RefreshToken {
    /// Wrap a raw refresh token
    pub fn new(project_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            token: SecretString::new(token.into()),
            expires_at: None,
        }
    }

    /// Attach a known expiry
    #[must_use]
    pub fn with_expires_at(mut self, expires_at: u64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Raw token value, for sending to the authority or writing a cookie
    pub fn expose(&self) -> &str {
        self.token.expose_secret()
    }
}

impl fmt::Debug for RefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshToken")
            .field("project_id", &self.project_id)
            .field("token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Per-call options for a new authentication request.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginOptions {
    /// Re-authenticate an existing session to prove a stronger factor
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stepup: bool,
    /// Add a factor to an existing session
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub mfa: bool,
    /// Claims the authority should embed in the minted session token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_claims: Option<Claims>,
}

impl LoginOptions {
    /// Options for a step-up login
    pub fn stepup() -> Self {
        Self {
            stepup: true,
            ..Self::default()
        }
    }

    /// Options for an MFA login
    pub fn mfa() -> Self {
        Self {
            mfa: true,
            ..Self::default()
        }
    }

    /// Embed a custom claim
    #[must_use]
    pub fn with_custom_claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.custom_claims
            .get_or_insert_with(Map::new)
            .insert(name.into(), value);
        self
    }

    /// Whether the request must carry the caller's current session credential
    pub fn requires_session_credential(&self) -> bool {
        self.stepup || self.mfa
    }
}

/// User profile snapshot returned alongside minted tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserResponse {
    /// User id
    pub user_id: String,
    /// Display name
    pub name: String,
    /// Email address
    pub email: String,
    /// Phone number
    pub phone: String,
    /// External login ids
    pub external_ids: Vec<String>,
    /// Whether the email address is verified
    pub verified_email: bool,
    /// Whether the phone number is verified
    pub verified_phone: bool,
}

/// Result of a successful authentication or verification.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticationInfo {
    /// Validated session
    pub session: Session,
    /// User snapshot, when the authority sent one
    pub user: Option<UserResponse>,
    /// Whether this was the user's first login
    pub first_seen: bool,
}
