//! Credentials returned to the caller after a successful exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Temporary AWS credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TemporaryCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expiration: Option<DateTime<Utc>>,
}

impl fmt::Debug for TemporaryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// The identity the credentials were issued for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssumedRoleUser {
    pub arn: String,
    pub assumed_role_id: String,
}

/// Result of a successful token exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExchangeResponse {
    pub credentials: TemporaryCredentials,
    pub assumed_role_user: AssumedRoleUser,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> TemporaryCredentials {
        TemporaryCredentials {
            access_key_id: "ASIAEXAMPLE".into(),
            secret_access_key: "very-secret".into(),
            session_token: "session-token".into(),
            expiration: Some(Utc::now() + chrono::Duration::hours(1)),
        }
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let rendered = format!("{:?}", credentials());
        assert!(rendered.contains("ASIAEXAMPLE"));
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("session-token"));
    }

    #[test]
    fn test_response_shape() {
        let response = ExchangeResponse {
            credentials: credentials(),
            assumed_role_user: AssumedRoleUser {
                arn: "arn:aws:sts::123456789012:assumed-role/ci/GITHUB_octocat".into(),
                assumed_role_id: "AROAEXAMPLE:GITHUB_octocat".into(),
            },
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["Credentials"]["AccessKeyId"], "ASIAEXAMPLE");
        assert_eq!(json["AssumedRoleUser"]["AssumedRoleId"], "AROAEXAMPLE:GITHUB_octocat");
    }
}
