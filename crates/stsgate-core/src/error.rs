//! Error types for stsgate.
//!
//! Every variant is terminal for the call that produced it and is surfaced
//! verbatim at the invocation boundary. Variants carry only diagnostic
//! context that is safe to log: never raw tokens, signatures or secrets.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Key source errors
    #[error("Key source unreachable: {0}")]
    KeySourceUnreachable(String),

    // Structural errors
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    // Key lookup errors
    #[error("No signing key matches key id {key_id:?}")]
    NoMatchingKey { key_id: String },

    #[error("Key id {key_id:?} matches {matches} signing keys")]
    AmbiguousKey { key_id: String, matches: usize },

    // Signature errors
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    // Standard claim errors
    #[error("Token expired at {exp}")]
    TokenExpired { exp: i64 },

    #[error("Token not valid before {not_before} ({claim})")]
    TokenNotYetValid { claim: &'static str, not_before: i64 },

    #[error("Issuer mismatch: got {found:?}")]
    IssuerMismatch { found: Option<String> },

    #[error("Audience mismatch: got {found:?}")]
    AudienceMismatch { found: Option<String> },

    // Policy errors
    #[error("Claim rule {rule_index} failed for claim {claim:?}")]
    ClaimMismatch { rule_index: usize, claim: String },

    // Downstream errors
    #[error("Credential issuance failed: {0}")]
    CredentialIssuance(String),

    // Startup errors
    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable wire code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::KeySourceUnreachable(_) => "KEY_SOURCE_UNREACHABLE",
            Error::MalformedToken(_) => "MALFORMED_TOKEN",
            Error::NoMatchingKey { .. } => "NO_MATCHING_KEY",
            Error::AmbiguousKey { .. } => "AMBIGUOUS_KEY",
            Error::SignatureInvalid(_) => "SIGNATURE_INVALID",
            Error::TokenExpired { .. } => "TOKEN_EXPIRED",
            Error::TokenNotYetValid { .. } => "TOKEN_NOT_YET_VALID",
            Error::IssuerMismatch { .. } => "ISSUER_MISMATCH",
            Error::AudienceMismatch { .. } => "AUDIENCE_MISMATCH",
            Error::ClaimMismatch { .. } => "CLAIM_MISMATCH",
            Error::CredentialIssuance(_) => "CREDENTIAL_ISSUANCE_ERROR",
            Error::Config(_) => "INVALID_CONFIGURATION",
        }
    }

    /// Whether the caller's token caused this error, as opposed to an
    /// upstream or local fault.
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Error::KeySourceUnreachable(_) | Error::CredentialIssuance(_) | Error::Config(_)
        )
    }

    /// Whether the token was authentic but its claims were refused.
    pub fn is_policy_denial(&self) -> bool {
        matches!(self, Error::ClaimMismatch { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedToken(err.to_string())
    }
}
