//! OIDC claim types and claim rules.

use chrono::{Duration, Utc};
use regex::Regex;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{Error, Result};

/// The `aud` claim, which issuers may send as a string or an array.
///
/// Non-string array entries can never equal an audience and are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(aud) => Ok(Audience::One(aud)),
            Value::Array(items) => Ok(Audience::Many(
                items
                    .into_iter()
                    .filter_map(|item| match item {
                        Value::String(aud) => Some(aud),
                        _ => None,
                    })
                    .collect(),
            )),
            other => Err(de::Error::custom(format!(
                "expected a string or an array of strings, got {other}"
            ))),
        }
    }
}

impl Audience {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Audience::One(aud) => aud == audience,
            Audience::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Audience::One(aud) => f.write_str(aud),
            Audience::Many(auds) => f.write_str(&auds.join(",")),
        }
    }
}

/// A NumericDate claim as seconds. Fractional values are truncated.
pub fn numeric_date(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| value.as_f64().map(|v| v as i64))
}

fn date<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    numeric_date(&value).ok_or_else(|| de::Error::custom(format!("expected a numeric date, got {value}")))
}

fn optional_date<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<i64>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => numeric_date(&value)
            .map(Some)
            .ok_or_else(|| de::Error::custom(format!("expected a numeric date, got {value}"))),
    }
}

/// Scalars read as their text, the same way claim rules see them. Arrays and
/// objects have no typed form and stay in the raw payload only.
fn scalar<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => Some(text),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    })
}

/// Claims issued by a CI provider's OIDC token service.
///
/// Only the registered claims are required. The CI-specific claims are
/// optional since issuers add and drop them over time; anything not listed
/// here is still available through [`crate::VerifiedIdentity::claims`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OidcClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    #[serde(deserialize_with = "date")]
    pub exp: i64,
    #[serde(default, deserialize_with = "optional_date", skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, deserialize_with = "optional_date", skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub repository_owner: Option<String>,
    #[serde(
        rename = "ref",
        default,
        deserialize_with = "scalar",
        skip_serializing_if = "Option::is_none"
    )]
    pub git_ref: Option<String>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub ref_type: Option<String>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub job_workflow_ref: Option<String>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(default, deserialize_with = "scalar", skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

impl OidcClaims {
    /// Create a new builder for OIDC claims.
    pub fn builder(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        audience: impl Into<String>,
    ) -> OidcClaimsBuilder {
        OidcClaimsBuilder::new(issuer, subject, audience)
    }
}

/// Builder for OIDC claims, mostly useful for minting test tokens.
pub struct OidcClaimsBuilder {
    issuer: String,
    subject: String,
    audience: String,
    ttl: Duration,
    issued_offset: Duration,
    repository: Option<String>,
    git_ref: Option<String>,
    job_workflow_ref: Option<String>,
    run_id: Option<String>,
    actor: Option<String>,
}

impl OidcClaimsBuilder {
    pub fn new(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            subject: subject.into(),
            audience: audience.into(),
            ttl: Duration::minutes(5),
            issued_offset: Duration::zero(),
            repository: None,
            git_ref: None,
            job_workflow_ref: None,
            run_id: None,
            actor: None,
        }
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Shift `iat`/`nbf` relative to now; negative values backdate the token.
    pub fn issued_offset(mut self, offset: Duration) -> Self {
        self.issued_offset = offset;
        self
    }

    pub fn repository(mut self, repo: impl Into<String>) -> Self {
        self.repository = Some(repo.into());
        self
    }

    pub fn git_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.git_ref = Some(git_ref.into());
        self
    }

    pub fn job_workflow_ref(mut self, workflow_ref: impl Into<String>) -> Self {
        self.job_workflow_ref = Some(workflow_ref.into());
        self
    }

    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn build(self) -> OidcClaims {
        let issued = Utc::now() + self.issued_offset;
        let exp = issued + self.ttl;

        OidcClaims {
            iss: self.issuer,
            sub: self.subject,
            aud: Audience::One(self.audience),
            exp: exp.timestamp(),
            iat: Some(issued.timestamp()),
            nbf: Some(issued.timestamp()),
            jti: None,
            repository: self.repository,
            repository_owner: None,
            git_ref: self.git_ref,
            ref_type: None,
            sha: None,
            workflow: None,
            job_workflow_ref: self.job_workflow_ref,
            run_id: self.run_id,
            actor: self.actor,
            event_name: None,
            environment: None,
        }
    }
}

/// A claim that must be present and whose value must fully match a pattern.
///
/// Patterns are always anchored at both ends, so `repo:org/.*` never matches
/// a value that merely contains it.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "ClaimRuleDef", into = "ClaimRuleDef")]
pub struct ClaimRule {
    claim: String,
    pattern: String,
    regex: Regex,
}

#[derive(Serialize, Deserialize)]
struct ClaimRuleDef {
    claim: String,
    pattern: String,
}

impl ClaimRule {
    pub fn new(claim: impl Into<String>, pattern: impl Into<String>) -> Result<Self> {
        let claim = claim.into();
        let pattern = pattern.into();
        if claim.is_empty() {
            return Err(Error::Config("claim rule has an empty claim name".into()));
        }
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
            Error::Config(format!("invalid pattern for claim {claim:?}: {e}"))
        })?;

        Ok(Self {
            claim,
            pattern,
            regex,
        })
    }

    pub fn claim(&self) -> &str {
        &self.claim
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether the whole value matches the pattern.
    pub fn matches(&self, value: &str) -> bool {
        self.regex.is_match(value)
    }
}

impl fmt::Debug for ClaimRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimRule")
            .field("claim", &self.claim)
            .field("pattern", &self.pattern)
            .finish()
    }
}

impl TryFrom<ClaimRuleDef> for ClaimRule {
    type Error = Error;

    fn try_from(def: ClaimRuleDef) -> Result<Self> {
        ClaimRule::new(def.claim, def.pattern)
    }
}

impl From<ClaimRule> for ClaimRuleDef {
    fn from(rule: ClaimRule) -> Self {
        Self {
            claim: rule.claim,
            pattern: rule.pattern,
        }
    }
}
