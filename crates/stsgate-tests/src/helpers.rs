//! Test helper functions and utilities.

use reqwest::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use stsgate_auth::testing::{TestSigner, key_set};
use stsgate_auth::{GatewayConfig, TokenExchange};
use stsgate_cli::{AppState, build_app};
use stsgate_core::ClaimRule;
use tokio::net::TcpListener;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::fixtures::{AUDIENCE, ISSUER, ROLE_ARN};

pub const JWKS_PATH: &str = "/.well-known/jwks";

/// A mock issuer key set endpoint.
pub struct JwksServer {
    server: MockServer,
}

impl JwksServer {
    /// Serve the given signers' keys.
    pub async fn start(signers: &[&TestSigner]) -> Self {
        let body = serde_json::to_value(key_set(signers)).expect("serialize key set");
        Self::start_with(ResponseTemplate::new(200).set_body_json(body)).await
    }

    pub async fn start_with(response: ResponseTemplate) -> Self {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response)
            .mount(&server)
            .await;
        Self { server }
    }

    /// Replace whatever the endpoint serves.
    pub async fn respond_with(&self, response: ResponseTemplate) {
        self.server.reset().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(response)
            .mount(&self.server)
            .await;
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.server.uri(), JWKS_PATH)
    }

    /// Number of key set fetches served so far.
    pub async fn fetches(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or_default()
    }

    /// Configuration pointing at this endpoint.
    pub fn config(&self, rules: Vec<ClaimRule>) -> GatewayConfig {
        GatewayConfig::new(ROLE_ARN, rules)
            .with_issuer(ISSUER)
            .with_audience(AUDIENCE)
            .with_jwks_url(self.url())
    }
}

/// Start the HTTP endpoint for testing and return its address.
pub async fn start_test_server(
    exchange: TokenExchange,
) -> anyhow::Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    let app = build_app(Arc::new(AppState::new(exchange)));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });

    Ok((addr, handle))
}

/// Create an HTTP client for testing.
pub fn test_client() -> Client {
    Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .expect("Failed to create test client")
}

/// API test client with base URL.
pub struct ApiTestClient {
    client: Client,
    base_url: String,
}

impl ApiTestClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            client: test_client(),
            base_url: format!("http://{}", addr),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Result<reqwest::Response> {
        self.client.get(self.url(path)).send().await
    }

    pub async fn post<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> reqwest::Result<reqwest::Response> {
        self.client.post(self.url(path)).json(body).send().await
    }

    /// Check health endpoint.
    pub async fn health(&self) -> anyhow::Result<bool> {
        let resp = self.get("/health").await?;
        Ok(resp.status().is_success())
    }
}
