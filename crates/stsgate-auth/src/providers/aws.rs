//! AWS STS credential issuer.

use super::{CredentialIssuer, IssueRequest, ProviderError};
use async_trait::async_trait;
use aws_sdk_sts::error::DisplayErrorContext;
use chrono::DateTime;
use stsgate_core::{AssumedRoleUser, ExchangeResponse, TemporaryCredentials};
use tracing::debug;

/// Calls STS `AssumeRole` with the process's own AWS credentials.
#[derive(Debug, Clone)]
pub struct StsCredentialIssuer {
    client: aws_sdk_sts::Client,
}

impl StsCredentialIssuer {
    pub fn new(client: aws_sdk_sts::Client) -> Self {
        Self { client }
    }

    /// Issuer using the default AWS credential chain and region.
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_sts::Client::new(&config))
    }
}

#[async_trait]
impl CredentialIssuer for StsCredentialIssuer {
    async fn issue(&self, request: &IssueRequest) -> Result<ExchangeResponse, ProviderError> {
        debug!(
            role_arn = %request.role_arn,
            session_name = %request.session_name,
            "Assuming role"
        );

        let duration = i32::try_from(request.duration_secs).map_err(|_| {
            ProviderError::InvalidConfig(format!("duration {} is too long", request.duration_secs))
        })?;

        let output = self
            .client
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .duration_seconds(duration)
            .send()
            .await
            .map_err(|e| ProviderError::AssumeRole(DisplayErrorContext(&e).to_string()))?;

        let creds = output
            .credentials()
            .ok_or_else(|| ProviderError::InvalidResponse("no credentials".into()))?;
        let user = output
            .assumed_role_user()
            .ok_or_else(|| ProviderError::InvalidResponse("no assumed role user".into()))?;

        Ok(ExchangeResponse {
            credentials: TemporaryCredentials {
                access_key_id: creds.access_key_id().to_string(),
                secret_access_key: creds.secret_access_key().to_string(),
                session_token: creds.session_token().to_string(),
                expiration: DateTime::from_timestamp(creds.expiration().secs(), 0),
            },
            assumed_role_user: AssumedRoleUser {
                arn: user.arn().to_string(),
                assumed_role_id: user.assumed_role_id().to_string(),
            },
        })
    }
}
