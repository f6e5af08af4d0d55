//! Authentication error types.
//!
//! Every failure in the session lifecycle surfaces as an [`AuthError`]. Only
//! [`AuthError::ExpiredToken`] is ever recovered from internally (by a refresh);
//! everything else is terminal for the call and handed back to the caller.

use thiserror::Error;

/// Session lifecycle errors.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]` so new variants can be added in
/// minor releases. Downstream match expressions must include a wildcard arm.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// The compact token could not be parsed (bad segments, encoding, JSON or claims).
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Signature verification failed, or no key in the set can verify the token.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token declares `none`, a symmetric algorithm, or an unknown algorithm.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The token expired beyond the configured clock-skew tolerance.
    ///
    /// This is the only error eligible for automatic refresh.
    #[error("Token expired")]
    ExpiredToken,

    /// The token's `nbf` claim lies in the future beyond the clock-skew tolerance.
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// The token was issued for another project.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// Issuer the caller expected.
        expected: String,
        /// Issuer carried by the token.
        actual: String,
    },

    /// Signing keys could not be fetched, or the authority published none.
    #[error("Failed to fetch signing keys for project {project_id}: {reason}")]
    KeyFetch {
        /// Project whose keys were requested.
        project_id: String,
        /// Human-readable cause.
        reason: String,
    },

    /// Refreshing the session failed.
    #[error(transparent)]
    Refresh(#[from] RefreshError),

    /// A step-up or MFA login was requested without a current session credential.
    #[error("Step-up authentication requires a current session credential")]
    MissingStepupCredential,

    /// The client configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The authority answered successfully but the body was unusable.
    #[error("Unexpected authority response: {0}")]
    AuthorityResponse(String),

    /// The authority rejected a (non-refresh) request with a structured error.
    #[error("Authority returned {status}: {code}")]
    Authority {
        /// HTTP status code.
        status: u16,
        /// Machine-readable error code.
        code: String,
        /// Optional human-readable description.
        description: Option<String>,
    },

    /// The authority could not be reached for a (non-refresh) request.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The host cancelled the call before it finished.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Refresh failures, split by whether the caller should treat the user as logged out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RefreshError {
    /// The authority reported the refresh token as expired, revoked or unknown.
    ///
    /// Terminal: the session is gone and must not be retried automatically.
    #[error("Refresh rejected: {code}")]
    Rejected {
        /// Machine-readable error code from the authority (empty if none was sent).
        code: String,
        /// Optional human-readable description.
        description: Option<String>,
    },

    /// The authority could not be reached (timeout, connection failure, 5xx).
    ///
    /// The caller's retry policy may try again; this crate never does.
    #[error("Refresh unavailable: {reason}")]
    Unavailable {
        /// Human-readable cause.
        reason: String,
    },
}

impl AuthError {
    /// Whether this failure can be recovered by refreshing the session.
    pub fn is_refreshable(&self) -> bool {
        matches!(self, AuthError::ExpiredToken)
    }

    /// Whether this failure is a network-category fault a caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AuthError::KeyFetch { .. }
                | AuthError::Transport(_)
                | AuthError::Refresh(RefreshError::Unavailable { .. })
        )
    }

    /// Whether the user should be treated as logged out.
    pub fn is_logged_out(&self) -> bool {
        matches!(
            self,
            AuthError::ExpiredToken | AuthError::Refresh(RefreshError::Rejected { .. })
        )
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
            ErrorKind::ImmatureSignature => AuthError::TokenNotYetValid,
            // The resolved key cannot verify the declared algorithm family.
            ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidEcdsaKey
            | ErrorKind::InvalidRsaKey(_) => AuthError::InvalidSignature,
            ErrorKind::MissingRequiredClaim(claim) => {
                AuthError::MalformedToken(format!("missing required claim: {claim}"))
            }
            _ => AuthError::MalformedToken(format!("JWT error: {err}")),
        }
    }
}

/// Result type alias for session lifecycle operations.
pub type Result<T> = std::result::Result<T, AuthError>;
