//! # Tessera Auth - Session Token Lifecycle Engine
//!
//! Client-side half of delegated authentication: the identity authority runs
//! the login flows, this crate verifies the session tokens it issues,
//! refreshes them transparently and keeps request cookies in step.
//!
//! ## Architecture
//!
//! - [`jwt::KeyProvider`] - per-project signing key cache (single-flight, rotation grace)
//! - [`jwt::TokenVerifier`] - signature, lifetime and issuer checks producing a [`Session`]
//! - [`session`] - the validated [`Session`] and its typed claim accessors
//! - [`refresh::RefreshCoordinator`] - one refresh call per expiry, verified before use
//! - [`binder::SessionBinder`] - token extraction from requests and cookie propagation
//! - [`authority`] - the [`IdentityAuthority`] seam and its HTTP implementation
//! - [`AuthClient`] - everything above wired from one [`AuthConfig`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tessera_auth::{AuthClient, AuthConfig, SessionValidation};
//!
//! # async fn handle(headers: http::HeaderMap) -> tessera_auth::Result<()> {
//! let client = AuthClient::new(AuthConfig::new("P2abc"))?;
//!
//! let mut response_headers = http::HeaderMap::new();
//! match client.validate_and_propagate(&headers, Some(&mut response_headers)).await {
//!     SessionValidation::Valid { session, .. } => {
//!         if session.has_tenant_role("T1", "admin") {
//!             println!("{} administers T1", session.subject());
//!         }
//!     }
//!     SessionValidation::Anonymous => println!("not logged in"),
//!     SessionValidation::Invalid(e) => println!("rejected: {e}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `middleware` (default) - Tower [`SessionLayer`](crate::tower::SessionLayer)
//! - `tower` - alias for `middleware`

pub mod authority;
pub mod binder;
pub mod client;
pub mod config;
pub mod error;
pub mod jwt;
pub mod refresh;
pub mod session;

#[cfg(feature = "middleware")]
pub mod tower;

#[doc(inline)]
pub use authority::{AuthorityErrorBody, HttpAuthority, IdentityAuthority, JwtResponse};
#[doc(inline)]
pub use binder::{InboundTokens, MintedTokens, SessionBinder, SessionValidation};
#[doc(inline)]
pub use client::AuthClient;
#[doc(inline)]
pub use config::{AuthConfig, CookieConfig, SameSite};
#[doc(inline)]
pub use error::{AuthError, RefreshError, Result};
#[doc(inline)]
pub use jwt::{KeyProvider, SigningKey, SigningKeySet, TokenVerifier, project_id_from_issuer};
#[doc(inline)]
pub use refresh::{CookieMetadata, RefreshCoordinator, RefreshedTokens};
#[doc(inline)]
pub use session::{
    AuthFactor, AuthenticationInfo, Claims, LoginOptions, RefreshToken, Session, UserResponse,
};
