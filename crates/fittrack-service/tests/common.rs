//! Common test utilities for fittrack integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue};
use axum::Router;
use axum_test::{TestRequest, TestServer};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};

use fittrack_core::UserId;
use fittrack_service::crypto::hmac_sha256_hex;
use fittrack_service::{create_router, AppState, ServiceConfig};
use fittrack_store::MemoryStore;

pub const JWT_SECRET: &str = "test-jwt-secret";
pub const SERVICE_API_KEY: &str = "test-service-key";
pub const ADMIN_API_KEY: &str = "test-admin-key";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// The backing store, for direct inspection.
    pub store: Arc<MemoryStore>,
    /// A test user ID for authenticated requests.
    pub test_user_id: UserId,
}

impl TestHarness {
    /// Create a harness with no external services configured.
    pub fn new() -> Self {
        Self::with_config(ServiceConfig::default())
    }

    /// Create a harness whose OpenAI and wearable clients point at `mock_uri`.
    pub fn with_mock(mock_uri: &str) -> Self {
        Self::with_config(ServiceConfig {
            openai_api_key: Some("test-openai-key".into()),
            openai_base_url: mock_uri.to_string(),
            wearable_api_url: Some(mock_uri.to_string()),
            external_timeout_seconds: 5,
            ..ServiceConfig::default()
        })
    }

    fn with_config(base: ServiceConfig) -> Self {
        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            auth_jwt_secret: Some(JWT_SECRET.into()),
            service_api_key: Some(SERVICE_API_KEY.into()),
            admin_api_key: Some(ADMIN_API_KEY.into()),
            wearable_webhook_secret: Some(WEBHOOK_SECRET.into()),
            ..base
        };

        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), config);
        let router: Router = create_router(state);

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            store,
            test_user_id: UserId::generate(),
        }
    }

    /// A signed HS256 JWT for `user_id`.
    pub fn jwt_for(user_id: UserId) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = json!({ "sub": user_id.to_string(), "iat": now, "exp": now + 3600 });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .expect("Failed to sign JWT")
    }

    /// Get the authorization header value for the test user.
    pub fn user_auth_header(&self) -> String {
        format!("Bearer {}", Self::jwt_for(self.test_user_id))
    }

    /// Attach the test user's bearer token.
    pub fn as_user(&self, request: TestRequest) -> TestRequest {
        with_header(request, "authorization", &self.user_auth_header())
    }

    /// Attach another user's bearer token.
    pub fn as_other(request: TestRequest, user_id: UserId) -> TestRequest {
        with_header(
            request,
            "authorization",
            &format!("Bearer {}", Self::jwt_for(user_id)),
        )
    }

    /// Attach the service API key.
    pub fn as_service(request: TestRequest) -> TestRequest {
        with_header(request, "x-api-key", SERVICE_API_KEY)
    }

    /// Attach the admin API key.
    pub fn as_admin(request: TestRequest) -> TestRequest {
        with_header(request, "x-admin-key", ADMIN_API_KEY)
    }

    /// Create the test user's token account; returns the response body.
    pub async fn create_account(&self) -> Value {
        let response = self
            .as_user(self.server.post("/v1/tokens/account"))
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        response.json()
    }

    /// Current balance of the test user.
    pub async fn balance(&self) -> i64 {
        let response = self.as_user(self.server.get("/v1/tokens/balance")).await;
        response.assert_status_ok();
        let body: Value = response.json();
        body["balance"].as_i64().expect("balance is a number")
    }

    /// Grant tokens to the test user through the admin endpoint.
    pub async fn grant(&self, amount: i64) {
        Self::as_admin(self.server.post("/v1/tokens/grant"))
            .json(&json!({
                "user_id": self.test_user_id.to_string(),
                "amount": amount,
                "reason": "test top-up"
            }))
            .await
            .assert_status_ok();
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Add a header to a request.
pub fn with_header(request: TestRequest, name: &'static str, value: &str) -> TestRequest {
    request.add_header(
        HeaderName::from_static(name),
        HeaderValue::from_str(value).expect("valid header value"),
    )
}

/// `x-wearable-signature` value for a webhook body.
pub fn webhook_signature(body: &[u8]) -> String {
    format!("sha256={}", hmac_sha256_hex(WEBHOOK_SECRET, body))
}

/// A multipart body with an audio `file` part and an optional `language`
/// part. Returns the body and its content type.
pub fn multipart_audio(audio: &[u8], language: Option<&str>) -> (Vec<u8>, String) {
    const BOUNDARY: &str = "fittrack-test-boundary";

    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"clip.webm\"\r\nContent-Type: audio/webm\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(audio);
    body.extend_from_slice(b"\r\n");
    if let Some(language) = language {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"language\"\r\n\r\n{language}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    (body, format!("multipart/form-data; boundary={BOUNDARY}"))
}
