//! Test fixtures for tokens, rules and credentials.

use async_trait::async_trait;
use chrono::Duration;
use std::sync::Mutex;
use stsgate_auth::{CredentialIssuer, IssueRequest, ProviderError};
use stsgate_core::{AssumedRoleUser, ClaimRule, ExchangeResponse, OidcClaims, TemporaryCredentials};

pub const ISSUER: &str = "https://issuer.example";
pub const AUDIENCE: &str = "sts.example";
pub const ROLE_ARN: &str = "arn:aws:iam::123456789012:role/deploy";
pub const MAIN_SUBJECT: &str = "repo:org/x:refs/heads/main";

/// Factory for token claims.
pub struct ClaimsFixture;

impl ClaimsFixture {
    /// A fresh token for `org/x` on `main`, valid for five minutes.
    pub fn main_branch() -> OidcClaims {
        Self::for_subject(MAIN_SUBJECT)
    }

    pub fn for_subject(subject: &str) -> OidcClaims {
        OidcClaims::builder(ISSUER, subject, AUDIENCE)
            .repository("org/x")
            .git_ref("refs/heads/main")
            .job_workflow_ref("org/x/.github/workflows/deploy.yml@refs/heads/main")
            .run_id("4242")
            .actor("octocat")
            .build()
    }

    /// Issued ten minutes ago with a five minute lifetime.
    pub fn expired() -> OidcClaims {
        OidcClaims::builder(ISSUER, MAIN_SUBJECT, AUDIENCE)
            .issued_offset(Duration::minutes(-10))
            .actor("octocat")
            .build()
    }

    /// Issued two minutes in the future.
    pub fn not_yet_valid() -> OidcClaims {
        OidcClaims::builder(ISSUER, MAIN_SUBJECT, AUDIENCE)
            .issued_offset(Duration::minutes(2))
            .actor("octocat")
            .build()
    }
}

/// Factory for claim rule sets.
pub struct RulesFixture;

impl RulesFixture {
    /// Only `org/x` on `main`.
    pub fn main_branch() -> Vec<ClaimRule> {
        vec![ClaimRule::new("sub", "repo:org/x:refs/heads/main").expect("valid rule")]
    }

    /// `main_branch` plus a repository and workflow pin.
    pub fn pinned_workflow() -> Vec<ClaimRule> {
        let mut rules = Self::main_branch();
        rules.push(ClaimRule::new("repository", "org/x").expect("valid rule"));
        rules.push(
            ClaimRule::new("job_workflow_ref", r"org/x/\.github/workflows/deploy\.yml@.*")
                .expect("valid rule"),
        );
        rules
    }
}

/// Credential issuer that records requests instead of calling AWS.
#[derive(Default)]
pub struct StubIssuer {
    requests: Mutex<Vec<IssueRequest>>,
    failure: Option<String>,
}

impl StubIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    /// An issuer that refuses every request with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            failure: Some(message.into()),
        }
    }

    pub fn requests(&self) -> Vec<IssueRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait]
impl CredentialIssuer for StubIssuer {
    async fn issue(&self, request: &IssueRequest) -> Result<ExchangeResponse, ProviderError> {
        self.requests.lock().expect("requests lock").push(request.clone());
        if let Some(message) = &self.failure {
            return Err(ProviderError::AssumeRole(message.clone()));
        }

        Ok(ExchangeResponse {
            credentials: TemporaryCredentials {
                access_key_id: "ASIAEXAMPLE".into(),
                secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".into(),
                session_token: "FwoGZXIvYXdzEXAMPLE".into(),
                expiration: Some(chrono::Utc::now() + Duration::hours(1)),
            },
            assumed_role_user: AssumedRoleUser {
                arn: format!(
                    "arn:aws:sts::123456789012:assumed-role/deploy/{}",
                    request.session_name
                ),
                assumed_role_id: format!("AROAEXAMPLE:{}", request.session_name),
            },
        })
    }
}
