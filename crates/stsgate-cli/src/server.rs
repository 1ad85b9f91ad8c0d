//! HTTP endpoint: `POST /exchange`, `POST /validate`, `GET /health`.

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use stsgate_auth::TokenExchange;
use stsgate_core::{Error, ExchangeResponse, VerifiedIdentity};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, info, info_span};
use uuid::Uuid;

use crate::events::{TokenRequest, error_body};

/// State shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub exchange: TokenExchange,
}

impl AppState {
    pub fn new(exchange: TokenExchange) -> Self {
        Self { exchange }
    }
}

pub fn build_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/exchange", post(exchange))
        .route("/validate", post(validate))
        .route("/health", get(health))
        .layer(middleware::from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(exchange: TokenExchange, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, build_app(Arc::new(AppState::new(exchange))))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Shutting down");
}

/// Tag each request with an id, both in the logs and in the response.
async fn request_id(request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let span = info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path()
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// A terminal error rendered as `{"error": CODE}`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        if self.0.is_policy_denial() {
            StatusCode::FORBIDDEN
        } else if self.0.is_client_error() {
            StatusCode::UNAUTHORIZED
        } else if matches!(self.0, Error::Config(_)) {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::BAD_GATEWAY
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(error_body(&self.0))).into_response()
    }
}

async fn exchange(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<ExchangeResponse>, ApiError> {
    let request = TokenRequest::parse(&body)?;
    Ok(Json(state.exchange.exchange(&request.token).await?))
}

async fn validate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<VerifiedIdentity>, ApiError> {
    let request = TokenRequest::parse(&body)?;
    Ok(Json(state.exchange.validate(&request.token).await?))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::Method;
    use chrono::Utc;
    use serde_json::{Value, json};
    use std::time::Duration;
    use stsgate_auth::testing::{TestSigner, key_set};
    use stsgate_auth::{
        CredentialIssuer, IssueRequest, KeySet, KeySetCache, KeySource, ProviderError,
        SignatureVerifier, ValidationPipeline,
    };
    use stsgate_core::{AssumedRoleUser, ClaimRule, TemporaryCredentials};
    use tower::ServiceExt;

    struct FixedSource(Option<KeySet>);

    #[async_trait]
    impl KeySource for FixedSource {
        async fn fetch(&self) -> stsgate_core::Result<KeySet> {
            self.0
                .clone()
                .ok_or_else(|| Error::KeySourceUnreachable("HTTP 503".into()))
        }

        fn describe(&self) -> String {
            "fixed".into()
        }
    }

    struct StubIssuer;

    #[async_trait]
    impl CredentialIssuer for StubIssuer {
        async fn issue(&self, request: &IssueRequest) -> Result<ExchangeResponse, ProviderError> {
            Ok(ExchangeResponse {
                credentials: TemporaryCredentials {
                    access_key_id: "ASIAEXAMPLE".into(),
                    secret_access_key: "secret".into(),
                    session_token: "session".into(),
                    expiration: None,
                },
                assumed_role_user: AssumedRoleUser {
                    arn: format!("arn:aws:sts::123456789012:assumed-role/deploy/{}", request.session_name),
                    assumed_role_id: "AROAEXAMPLE:session".into(),
                },
            })
        }
    }

    fn app(keys: Option<KeySet>) -> Router {
        let cache = KeySetCache::new(Arc::new(FixedSource(keys)), Duration::ZERO);
        let pipeline = ValidationPipeline::new(
            Arc::new(cache),
            SignatureVerifier::new("https://issuer.example", "sts.example"),
            vec![ClaimRule::new("sub", "repo:org/x:refs/heads/main").unwrap()],
        );
        let exchange = TokenExchange::new(
            pipeline,
            Arc::new(StubIssuer),
            "arn:aws:iam::123456789012:role/deploy",
        );
        build_app(Arc::new(AppState::new(exchange)))
    }

    fn token(signer: &TestSigner, sub: &str) -> String {
        signer.sign(&json!({
            "iss": "https://issuer.example",
            "aud": "sts.example",
            "sub": sub,
            "actor": "octocat",
            "exp": Utc::now().timestamp() + 300
        }))
    }

    async fn post(app: Router, path: &str, body: String) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert!(response.headers().contains_key("x-request-id"));

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_exchange_success() {
        let signer = TestSigner::rsa("abc123");
        let body = json!({ "token": token(&signer, "repo:org/x:refs/heads/main") }).to_string();

        let (status, body) = post(app(Some(key_set(&[&signer]))), "/exchange", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["Credentials"]["AccessKeyId"], "ASIAEXAMPLE");
        assert_eq!(
            body["AssumedRoleUser"]["Arn"],
            "arn:aws:sts::123456789012:assumed-role/deploy/GITHUB_octocat"
        );
    }

    #[tokio::test]
    async fn test_validate_returns_identity() {
        let signer = TestSigner::rsa("abc123");
        let body = json!({ "token": token(&signer, "repo:org/x:refs/heads/main") }).to_string();

        let (status, body) = post(app(Some(key_set(&[&signer]))), "/validate", body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["claims"]["sub"], "repo:org/x:refs/heads/main");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let signer = TestSigner::rsa("abc123");
        let keys = Some(key_set(&[&signer]));

        let cases = [
            (app(keys.clone()), "not json".to_string(), StatusCode::UNAUTHORIZED, "MALFORMED_TOKEN"),
            (
                app(keys.clone()),
                json!({ "token": TestSigner::rsa("other").sign(&json!({})) }).to_string(),
                StatusCode::UNAUTHORIZED,
                "NO_MATCHING_KEY",
            ),
            (
                app(keys.clone()),
                json!({ "token": token(&signer, "repo:org/x:refs/heads/main-evil") }).to_string(),
                StatusCode::FORBIDDEN,
                "CLAIM_MISMATCH",
            ),
            (
                app(None),
                json!({ "token": token(&signer, "repo:org/x:refs/heads/main") }).to_string(),
                StatusCode::BAD_GATEWAY,
                "KEY_SOURCE_UNREACHABLE",
            ),
        ];

        for (app, body, expected_status, code) in cases {
            let (status, body) = post(app, "/exchange", body).await;
            assert_eq!(status, expected_status, "{code}");
            assert_eq!(body, json!({ "error": code }));
        }
    }

    #[tokio::test]
    async fn test_health() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app(None).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
