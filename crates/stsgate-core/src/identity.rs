//! The identity produced by a successful validation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::claims::{Audience, OidcClaims};
use crate::error::{Error, Result};

/// Longest role session name STS accepts.
pub const MAX_SESSION_NAME_LEN: usize = 64;

/// Claims of a token whose signature, standard claims and claim rules have
/// all been verified.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedIdentity {
    claims: OidcClaims,
    payload: Map<String, Value>,
}

impl VerifiedIdentity {
    /// Wrap a verified payload. Fails if registered claims are missing or
    /// have the wrong type.
    pub fn from_payload(payload: Map<String, Value>) -> Result<Self> {
        let claims: OidcClaims = serde_json::from_value(Value::Object(payload.clone()))
            .map_err(|e| Error::MalformedToken(format!("unexpected claim shape: {e}")))?;
        Ok(Self { claims, payload })
    }

    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    pub fn issuer(&self) -> &str {
        &self.claims.iss
    }

    pub fn audience(&self) -> &Audience {
        &self.claims.aud
    }

    pub fn actor(&self) -> Option<&str> {
        self.claims.actor.as_deref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.claims.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Typed view of the well-known claims.
    pub fn claims(&self) -> &OidcClaims {
        &self.claims
    }

    /// Every claim of the payload, including ones without a typed field.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// Role session name derived from the actor, falling back to the subject.
    ///
    /// Characters outside `[A-Za-z0-9_+=,.@-]` are replaced with `-` and the
    /// result is cut to [`MAX_SESSION_NAME_LEN`].
    pub fn session_name(&self, prefix: &str) -> String {
        let seed = self.actor().unwrap_or_else(|| self.subject());
        let mut name: String = format!("{prefix}{seed}")
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || "_+=,.@-".contains(c) {
                    c
                } else {
                    '-'
                }
            })
            .take(MAX_SESSION_NAME_LEN)
            .collect();
        while name.len() < 2 {
            name.push('-');
        }
        name
    }
}
