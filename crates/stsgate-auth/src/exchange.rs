//! Token exchange: validate the caller's token, then ask the credential
//! issuer for credentials in the identity's name.

use std::sync::Arc;
use stsgate_core::{ExchangeResponse, Result, VerifiedIdentity};
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::pipeline::ValidationPipeline;
use crate::providers::{CredentialIssuer, IssueRequest};

#[derive(Clone)]
pub struct TokenExchange {
    pipeline: ValidationPipeline,
    issuer: Arc<dyn CredentialIssuer>,
    role_arn: String,
    session_name_prefix: String,
    session_duration_secs: u32,
}

impl TokenExchange {
    pub fn new(
        pipeline: ValidationPipeline,
        issuer: Arc<dyn CredentialIssuer>,
        role_arn: impl Into<String>,
    ) -> Self {
        Self {
            pipeline,
            issuer,
            role_arn: role_arn.into(),
            session_name_prefix: "GITHUB_".to_string(),
            session_duration_secs: 3600,
        }
    }

    /// Exchange configured from `config`, which is validated first.
    pub fn from_config(config: &GatewayConfig, issuer: Arc<dyn CredentialIssuer>) -> Result<Self> {
        Ok(Self::new(config.pipeline()?, issuer, &config.role_arn)
            .with_session_name_prefix(&config.session_name_prefix)
            .with_session_duration(config.session_duration_secs))
    }

    pub fn with_session_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.session_name_prefix = prefix.into();
        self
    }

    pub fn with_session_duration(mut self, secs: u32) -> Self {
        self.session_duration_secs = secs;
        self
    }

    pub fn pipeline(&self) -> &ValidationPipeline {
        &self.pipeline
    }

    /// Validate only; no credentials are issued.
    pub async fn validate(&self, token: &str) -> Result<VerifiedIdentity> {
        self.pipeline.validate(token).await
    }

    pub async fn exchange(&self, token: &str) -> Result<ExchangeResponse> {
        let identity = self.pipeline.validate(token).await?;

        let request = IssueRequest {
            role_arn: self.role_arn.clone(),
            session_name: identity.session_name(&self.session_name_prefix),
            duration_secs: self.session_duration_secs,
        };

        match self.issuer.issue(&request).await {
            Ok(response) => {
                info!(
                    sub = identity.subject(),
                    session_name = %request.session_name,
                    role_arn = %request.role_arn,
                    "Issued credentials"
                );
                Ok(response)
            }
            Err(err) => {
                warn!(
                    sub = identity.subject(),
                    session_name = %request.session_name,
                    error = %err,
                    "Credential issuance failed"
                );
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::KeySetCache;
    use crate::jwks::{KeySet, KeySource};
    use crate::providers::ProviderError;
    use crate::testing::{TestSigner, key_set};
    use crate::verifier::SignatureVerifier;
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use stsgate_core::{AssumedRoleUser, ClaimRule, Error, TemporaryCredentials};

    const ROLE_ARN: &str = "arn:aws:iam::123456789012:role/deploy";

    struct FixedSource(KeySet);

    #[async_trait]
    impl KeySource for FixedSource {
        async fn fetch(&self) -> Result<KeySet> {
            Ok(self.0.clone())
        }

        fn describe(&self) -> String {
            "fixed".into()
        }
    }

    #[derive(Default)]
    struct RecordingIssuer {
        requests: Mutex<Vec<IssueRequest>>,
        fail: bool,
    }

    #[async_trait]
    impl CredentialIssuer for RecordingIssuer {
        async fn issue(&self, request: &IssueRequest) -> std::result::Result<ExchangeResponse, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(ProviderError::AssumeRole("AccessDenied".into()));
            }
            Ok(ExchangeResponse {
                credentials: TemporaryCredentials {
                    access_key_id: "ASIAEXAMPLE".into(),
                    secret_access_key: "secret".into(),
                    session_token: "session".into(),
                    expiration: None,
                },
                assumed_role_user: AssumedRoleUser {
                    arn: format!("{}/{}", request.role_arn, request.session_name),
                    assumed_role_id: "AROAEXAMPLE:session".into(),
                },
            })
        }
    }

    fn exchange(signer: &TestSigner, issuer: Arc<RecordingIssuer>) -> TokenExchange {
        let cache = KeySetCache::new(Arc::new(FixedSource(key_set(&[signer]))), Duration::ZERO);
        let pipeline = ValidationPipeline::new(
            Arc::new(cache),
            SignatureVerifier::new("https://issuer.example", "sts.example"),
            vec![ClaimRule::new("repository", "org/x").unwrap()],
        );
        TokenExchange::new(pipeline, issuer, ROLE_ARN)
    }

    fn token(signer: &TestSigner, repository: &str) -> String {
        signer.sign(&json!({
            "iss": "https://issuer.example",
            "aud": "sts.example",
            "sub": format!("repo:{repository}:ref:refs/heads/main"),
            "repository": repository,
            "actor": "octo cat",
            "exp": Utc::now().timestamp() + 300
        }))
    }

    #[tokio::test]
    async fn test_exchange_issues_for_actor() {
        let signer = TestSigner::rsa("abc123");
        let issuer = Arc::new(RecordingIssuer::default());
        let exchange = exchange(&signer, issuer.clone());

        let response = exchange.exchange(&token(&signer, "org/x")).await.unwrap();
        assert_eq!(response.credentials.access_key_id, "ASIAEXAMPLE");

        let requests = issuer.requests.lock().unwrap();
        assert_eq!(
            *requests,
            vec![IssueRequest {
                role_arn: ROLE_ARN.into(),
                session_name: "GITHUB_octo-cat".into(),
                duration_secs: 3600,
            }]
        );
    }

    #[tokio::test]
    async fn test_rejected_token_never_reaches_issuer() {
        let signer = TestSigner::rsa("abc123");
        let issuer = Arc::new(RecordingIssuer::default());
        let exchange = exchange(&signer, issuer.clone());

        let err = exchange.exchange(&token(&signer, "org/other")).await.unwrap_err();
        assert!(matches!(err, Error::ClaimMismatch { .. }));
        assert!(issuer.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_issuer_failure_propagates() {
        let signer = TestSigner::rsa("abc123");
        let issuer = Arc::new(RecordingIssuer {
            fail: true,
            ..Default::default()
        });
        let exchange = exchange(&signer, issuer).with_session_name_prefix("CI_");

        let err = exchange.exchange(&token(&signer, "org/x")).await.unwrap_err();
        assert!(matches!(err, Error::CredentialIssuance(msg) if msg.contains("AccessDenied")));
    }

    #[tokio::test]
    async fn test_validate_skips_issuer() {
        let signer = TestSigner::rsa("abc123");
        let issuer = Arc::new(RecordingIssuer::default());
        let exchange = exchange(&signer, issuer.clone());

        let identity = exchange.validate(&token(&signer, "org/x")).await.unwrap();
        assert_eq!(identity.claim("repository"), Some(&json!("org/x")));
        assert!(issuer.requests.lock().unwrap().is_empty());
    }
}
