//! Tessera demo server
//!
//! A small axum application whose `/me` route sits behind the session
//! middleware. Expired sessions are refreshed transparently and the new
//! cookies ride back on the response.
//!
//! ```text
//! TESSERA_PROJECT_ID=P2abc cargo run -p tessera-demo -- --port 8080
//! curl -H "Authorization: Bearer <session>:<refresh>" localhost:8080/me
//! ```

use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use clap::Parser;
use http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tessera_auth::tower::SessionLayer;
use tessera_auth::{AuthClient, AuthConfig, AuthError, LoginOptions, Session};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "tessera-demo", about = "Session-protected axum demo")]
struct Args {
    /// Project whose sessions are accepted
    #[arg(long, env = "TESSERA_PROJECT_ID")]
    project_id: String,

    /// Identity authority base URL
    #[arg(long, env = "TESSERA_BASE_URL")]
    base_url: Option<String>,

    /// Pinned JWK or JWK set; disables key fetching
    #[arg(long, env = "TESSERA_PUBLIC_KEY")]
    public_key: Option<String>,

    /// Port to listen on
    #[arg(long, short, default_value_t = 8080)]
    port: u16,
}

impl Args {
    fn config(&self) -> AuthConfig {
        let mut config = AuthConfig::new(&self.project_id);
        if let Some(base_url) = &self.base_url {
            config = config.with_base_url(base_url);
        }
        if let Some(public_key) = &self.public_key {
            config = config.with_public_key(public_key);
        }
        config
    }
}

/// Maps session errors onto HTTP responses
struct ApiError(AuthError);

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            AuthError::MissingStepupCredential => StatusCode::FORBIDDEN,
            AuthError::Authority { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            err if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::AuthorityResponse(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::UNAUTHORIZED,
        };
        warn!(status = status.as_u16(), error = %self.0, "Request failed");
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn me(Extension(session): Extension<Session>) -> Json<serde_json::Value> {
    Json(json!({
        "subject": session.subject(),
        "projectId": session.project_id(),
        "expiresAt": session.expires_at(),
        "tenants": session.tenants(),
        "roles": session.roles(),
        "authFactors": session.auth_factors(),
        "mfa": session.is_mfa(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginQuery {
    redirect_url: Option<String>,
    #[serde(default)]
    stepup: bool,
}

async fn login(
    State(client): State<AuthClient>,
    Path(provider): Path<String>,
    Query(query): Query<LoginQuery>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, ApiError> {
    let options = if query.stepup {
        LoginOptions::stepup()
    } else {
        LoginOptions::default()
    };
    let url = client
        .start_oauth(&provider, query.redirect_url.as_deref(), &options, &headers)
        .await?;
    Ok(Json(json!({ "url": url })))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: String,
}

async fn callback(
    State(client): State<AuthClient>,
    Query(query): Query<CallbackQuery>,
) -> Result<(HeaderMap, Json<serde_json::Value>), ApiError> {
    let mut cookies = HeaderMap::new();
    let info = client
        .exchange_oauth_code(&query.code, Some(&mut cookies))
        .await?;
    Ok((
        cookies,
        Json(json!({
            "subject": info.session.subject(),
            "email": info.user.as_ref().map(|user| user.email.as_str()),
            "firstSeen": info.first_seen,
        })),
    ))
}

async fn logout(
    State(client): State<AuthClient>,
    headers: HeaderMap,
) -> (StatusCode, HeaderMap) {
    let mut cookies = HeaderMap::new();
    if let Err(e) = client.logout(&headers, Some(&mut cookies)).await {
        warn!(error = %e, "Session revocation failed");
    }
    (StatusCode::NO_CONTENT, cookies)
}

fn app(client: AuthClient) -> Router {
    let protected = Router::new()
        .route("/me", get(me))
        .route_layer(SessionLayer::from_client(&client));

    Router::new()
        .route("/health", get(health))
        .route("/login/{provider}", get(login))
        .route("/oauth/callback", get(callback))
        .route("/logout", post(logout))
        .merge(protected)
        .with_state(client)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Gracefully shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let client = AuthClient::new(args.config()).context("Failed to create session client")?;

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, project_id = %args.project_id, "Listening");

    axum::serve(listener, app(client))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
