//! Credential issuers: the collaborator that turns a verified identity into
//! temporary cloud credentials.

pub mod aws;

use async_trait::async_trait;
use stsgate_core::{Error, ExchangeResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Role assumption failed: {0}")]
    AssumeRole(String),
    #[error("Incomplete response: {0}")]
    InvalidResponse(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        Error::CredentialIssuance(err.to_string())
    }
}

/// What the caller is asking credentials for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub role_arn: String,
    pub session_name: String,
    pub duration_secs: u32,
}

/// Issues temporary credentials for a role.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, request: &IssueRequest) -> Result<ExchangeResponse, ProviderError>;
}
