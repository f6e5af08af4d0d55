//! Common test utilities for integration tests
//!
//! Provides a wiremock-backed identity authority, Ed25519 signing keys and
//! helpers for building session tokens and request headers.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey as Ed25519Key;
use http::{HeaderMap, HeaderValue};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rand_core::OsRng;
use serde_json::{Value, json};
use tessera_auth::{AuthClient, AuthConfig, HttpAuthority};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path},
};

pub const PROJECT_ID: &str = "P2test";

/// Current unix time in seconds
pub fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Ed25519 key pair usable both for signing tokens and publishing a JWK
#[derive(Clone)]
pub struct TestKey {
    pub kid: String,
    pkcs8_der: Vec<u8>,
    public_x: String,
}

impl TestKey {
    pub fn generate(kid: &str) -> Self {
        let signing_key = Ed25519Key::generate(&mut OsRng);
        let public_x = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());

        let mut pkcs8_der = vec![
            0x30, 0x2e, // SEQUENCE, 46 bytes
            0x02, 0x01, 0x00, // INTEGER version 0
            0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
            0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
            0x04, 0x22, // OCTET STRING, 34 bytes
            0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
        ];
        pkcs8_der.extend_from_slice(&signing_key.to_bytes());

        Self {
            kid: kid.to_string(),
            pkcs8_der,
            public_x,
        }
    }

    /// Public JWK for this key
    pub fn jwk(&self) -> Value {
        json!({
            "kty": "OKP",
            "crv": "Ed25519",
            "x": self.public_x,
            "kid": self.kid,
            "alg": "EdDSA",
            "use": "sig",
        })
    }

    /// Sign claims with this key, naming it in the `kid` header
    pub fn sign(&self, claims: &Value) -> String {
        self.sign_as(claims, Some(&self.kid))
    }

    /// Sign claims with this key under an arbitrary (or no) `kid`
    pub fn sign_as(&self, claims: &Value, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = kid.map(str::to_string);
        let key = EncodingKey::from_ed_der(&self.pkcs8_der);
        jsonwebtoken::encode(&header, claims, &key).expect("Failed to encode test JWT")
    }
}

/// JWK set JSON for a list of keys
pub fn jwks(keys: &[&TestKey]) -> Value {
    json!({ "keys": keys.iter().map(|k| k.jwk()).collect::<Vec<_>>() })
}

/// Session claims for `PROJECT_ID` expiring `ttl_secs` from now (negative: already expired)
pub fn session_claims(subject: &str, ttl_secs: i64) -> Value {
    let now = now() as i64;
    json!({
        "iss": format!("https://api.tessera.dev/{PROJECT_ID}"),
        "sub": subject,
        "iat": now - 60,
        "exp": now + ttl_secs,
    })
}

/// Request headers carrying tokens in cookies
pub fn cookie_headers(session: Option<&str>, refresh: Option<&str>) -> HeaderMap {
    let mut parts = Vec::new();
    if let Some(session) = session {
        parts.push(format!("DS={session}"));
    }
    if let Some(refresh) = refresh {
        parts.push(format!("DSR={refresh}"));
    }
    let mut headers = HeaderMap::new();
    if !parts.is_empty() {
        headers.insert(
            http::header::COOKIE,
            HeaderValue::from_str(&parts.join("; ")).unwrap(),
        );
    }
    headers
}

/// Request headers carrying tokens in `Authorization: Bearer <session>[:<refresh>]`
pub fn bearer_headers(session: &str, refresh: Option<&str>) -> HeaderMap {
    let value = match refresh {
        Some(refresh) => format!("Bearer {session}:{refresh}"),
        None => format!("Bearer {session}"),
    };
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::AUTHORIZATION,
        HeaderValue::from_str(&value).unwrap(),
    );
    headers
}

/// All `Set-Cookie` values of a header map
pub fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(http::header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// Identity authority mock
pub struct MockAuthority {
    pub server: MockServer,
}

impl MockAuthority {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn config(&self) -> AuthConfig {
        AuthConfig::new(PROJECT_ID)
            .with_base_url(self.server.uri())
            .with_request_timeout(Duration::from_secs(2))
    }

    pub fn client(&self) -> AuthClient {
        self.client_with(self.config())
    }

    pub fn client_with(&self, config: AuthConfig) -> AuthClient {
        let authority = Arc::new(HttpAuthority::new(&config).unwrap());
        AuthClient::with_authority(config, authority).unwrap()
    }

    fn keys_path() -> String {
        format!("/v2/keys/{PROJECT_ID}")
    }

    /// Serve a key set, expecting exactly `calls` fetches
    pub async fn mock_keys(&self, keys: &[&TestKey], calls: u64) {
        Mock::given(method("GET"))
            .and(path(Self::keys_path()))
            .and(header("authorization", format!("Bearer {PROJECT_ID}").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(keys)))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Serve a key set for the next fetch only; later fetches fall through to other mocks
    pub async fn mock_keys_once(&self, keys: &[&TestKey]) {
        Mock::given(method("GET"))
            .and(path(Self::keys_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks(keys)))
            .up_to_n_times(1)
            .expect(1)
            .mount(&self.server)
            .await;
    }

    /// Serve a key set with a response delay, expecting exactly `calls` fetches
    pub async fn mock_keys_delayed(&self, keys: &[&TestKey], delay: Duration, calls: u64) {
        Mock::given(method("GET"))
            .and(path(Self::keys_path()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks(keys))
                    .set_delay(delay),
            )
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Fail key fetches with a status, expecting exactly `calls` fetches
    pub async fn mock_keys_error(&self, status: u16, calls: u64) {
        Mock::given(method("GET"))
            .and(path(Self::keys_path()))
            .respond_with(ResponseTemplate::new(status))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Answer refreshes of `refresh_jwt` with a new token pair and cookie metadata
    pub async fn mock_refresh(&self, refresh_jwt: &str, response: Value, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/auth/refresh"))
            .and(header(
                "authorization",
                format!("Bearer {PROJECT_ID}:{refresh_jwt}").as_str(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(response))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Fail refreshes with a status and error code
    pub async fn mock_refresh_error(&self, status: u16, code: &str, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/auth/refresh"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "errorCode": code,
                "errorDescription": "Refresh token is not valid",
            })))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Delay refresh responses beyond any reasonable timeout
    pub async fn mock_refresh_hang(&self, delay: Duration) {
        Mock::given(method("POST"))
            .and(path("/v1/auth/refresh"))
            .respond_with(ResponseTemplate::new(200).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Answer OAuth starts with a redirect URL, expecting exactly `calls` requests
    pub async fn mock_oauth_start(&self, url: &str, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/auth/oauth/authorize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "url": url })))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Answer code exchanges with a token response
    pub async fn mock_exchange(&self, response: Value, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/auth/oauth/exchange"))
            .respond_with(ResponseTemplate::new(200).set_body_json(response))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Accept logouts, expecting exactly `calls` requests
    pub async fn mock_logout(&self, calls: u64) {
        Mock::given(method("POST"))
            .and(path("/v1/auth/logout"))
            .respond_with(ResponseTemplate::new(200))
            .expect(calls)
            .mount(&self.server)
            .await;
    }
}

/// Token response body as the authority sends it
pub fn jwt_response(session_jwt: &str, refresh_jwt: &str) -> Value {
    json!({
        "sessionJwt": session_jwt,
        "refreshJwt": refresh_jwt,
        "cookieDomain": "app.example.com",
        "cookiePath": "/",
        "cookieMaxAge": 3600,
        "cookieExpiration": 1_900_000_000,
        "user": {"userId": "U1", "email": "ada@example.com", "verifiedEmail": true},
        "firstSeen": false,
    })
}
