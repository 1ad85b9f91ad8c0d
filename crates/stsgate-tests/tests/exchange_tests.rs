//! Token exchange over the HTTP endpoint with a stub credential issuer.

use serde_json::{Value, json};
use std::sync::Arc;
use stsgate_auth::TokenExchange;
use stsgate_auth::testing::TestSigner;
use stsgate_core::Error;
use stsgate_tests::*;

fn exchange_for(server: &JwksServer, issuer: Arc<StubIssuer>) -> TokenExchange {
    TokenExchange::from_config(&server.config(RulesFixture::main_branch()), issuer).unwrap()
}

#[tokio::test]
async fn test_exchange_returns_credentials_shape() {
    let signer = TestSigner::rsa("abc123");
    let jwks = JwksServer::start(&[&signer]).await;
    let issuer = Arc::new(StubIssuer::new());
    let (addr, _handle) = start_test_server(exchange_for(&jwks, issuer.clone())).await.unwrap();
    let client = ApiTestClient::new(addr);
    assert!(client.health().await.unwrap());

    let response = client
        .post("/exchange", &json!({ "token": signer.sign(&ClaimsFixture::main_branch()) }))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["Credentials"]["AccessKeyId"], "ASIAEXAMPLE");
    assert!(body["Credentials"]["SessionToken"].is_string());
    assert_eq!(
        body["AssumedRoleUser"]["Arn"],
        "arn:aws:sts::123456789012:assumed-role/deploy/GITHUB_octocat"
    );

    let requests = issuer.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].role_arn, ROLE_ARN);
    assert_eq!(requests[0].session_name, "GITHUB_octocat");
    assert_eq!(requests[0].duration_secs, 3600);
}

#[tokio::test]
async fn test_denied_token_never_reaches_issuer() {
    let signer = TestSigner::rsa("abc123");
    let jwks = JwksServer::start(&[&signer]).await;
    let issuer = Arc::new(StubIssuer::new());
    let (addr, _handle) = start_test_server(exchange_for(&jwks, issuer.clone())).await.unwrap();
    let client = ApiTestClient::new(addr);

    let claims = ClaimsFixture::for_subject("repo:org/x:refs/heads/feature");
    let response = client
        .post("/exchange", &json!({ "token": signer.sign(&claims) }))
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({"error": "CLAIM_MISMATCH"}));
    assert!(issuer.requests().is_empty());
}

#[tokio::test]
async fn test_issuer_failure_is_bad_gateway() {
    let signer = TestSigner::rsa("abc123");
    let jwks = JwksServer::start(&[&signer]).await;
    let issuer = Arc::new(StubIssuer::failing("AccessDenied: not authorized to perform sts:AssumeRole"));
    let exchange = exchange_for(&jwks, issuer);

    let err = exchange
        .exchange(&signer.sign(&ClaimsFixture::main_branch()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CredentialIssuance(ref msg) if msg.contains("AccessDenied")));

    let (addr, _handle) = start_test_server(exchange).await.unwrap();
    let response = ApiTestClient::new(addr)
        .post("/exchange", &json!({ "token": signer.sign(&ClaimsFixture::main_branch()) }))
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    assert_eq!(
        response.json::<Value>().await.unwrap(),
        json!({"error": "CREDENTIAL_ISSUANCE_ERROR"})
    );
}

#[tokio::test]
async fn test_validate_endpoint() {
    let signer = TestSigner::rsa("abc123");
    let jwks = JwksServer::start(&[&signer]).await;
    let issuer = Arc::new(StubIssuer::new());
    let (addr, _handle) = start_test_server(exchange_for(&jwks, issuer.clone())).await.unwrap();
    let client = ApiTestClient::new(addr);

    let response = client
        .post("/validate", &json!({ "token": signer.sign(&ClaimsFixture::main_branch()) }))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["claims"]["sub"], MAIN_SUBJECT);
    assert!(issuer.requests().is_empty());

    let response = client.post("/validate", &json!({ "token": "a.b" })).await.unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({"error": "MALFORMED_TOKEN"}));
}
