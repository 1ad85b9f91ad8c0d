//! Gateway configuration.

use config::{Config, Environment};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use stsgate_core::{ClaimRule, Error, Result};
use url::Url;

use crate::cache::KeySetCache;
use crate::jwks::{HttpKeySource, KeyIdSource};
use crate::pipeline::ValidationPipeline;
use crate::verifier::SignatureVerifier;

/// Prefix of every environment variable read by [`GatewayConfig::from_env`].
pub const ENV_PREFIX: &str = "STSGATE";

/// Role ARN variable honored when `STSGATE_ROLE_ARN` is unset.
pub const LEGACY_ROLE_ARN_ENV: &str = "GITHUB_ACTIONS_ROLE_ARN";

/// Everything the gateway needs to validate tokens and request credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Expected `iss` claim.
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// Key set endpoint. Derived from the issuer when unset.
    #[serde(default)]
    pub jwks_url: Option<String>,
    /// Expected `aud` claim.
    #[serde(default = "default_audience")]
    pub audience: String,
    /// Role assumed on behalf of validated callers.
    pub role_arn: String,
    /// Rules every token must satisfy, as a list of `{claim, pattern}` or a
    /// `claim: pattern` mapping. Either form may also be given as JSON text.
    #[serde(deserialize_with = "deserialize_rules")]
    pub claim_rules: Vec<ClaimRule>,
    #[serde(default = "default_algorithms")]
    pub allowed_algorithms: Vec<Algorithm>,
    #[serde(default)]
    pub key_id_source: KeyIdSource,
    /// Zero refreshes the key set on every validation.
    #[serde(default)]
    pub jwks_cache_ttl_secs: u64,
    #[serde(default)]
    pub serve_stale_on_error: bool,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default)]
    pub leeway_secs: u64,
    #[serde(default = "default_true")]
    pub enforce_certificate_validity: bool,
    #[serde(default = "default_session_name_prefix")]
    pub session_name_prefix: String,
    #[serde(default = "default_session_duration")]
    pub session_duration_secs: u32,
}

fn default_issuer() -> String {
    "https://token.actions.githubusercontent.com".to_string()
}

fn default_audience() -> String {
    "sts.amazonaws.com".to_string()
}

fn default_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

fn default_http_timeout() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_session_name_prefix() -> String {
    "GITHUB_".to_string()
}

fn default_session_duration() -> u32 {
    3600
}

#[derive(Deserialize)]
struct RuleRepr {
    claim: String,
    pattern: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RulesRepr {
    List(Vec<RuleRepr>),
    Map(std::collections::BTreeMap<String, String>),
    Json(String),
}

impl RulesRepr {
    fn into_rules(self) -> Result<Vec<ClaimRule>> {
        match self {
            RulesRepr::List(rules) => rules
                .into_iter()
                .map(|rule| ClaimRule::new(rule.claim, rule.pattern))
                .collect(),
            RulesRepr::Map(map) => map
                .into_iter()
                .map(|(claim, pattern)| ClaimRule::new(claim, pattern))
                .collect(),
            RulesRepr::Json(text) => {
                let repr: RulesRepr = serde_json::from_str(&text)
                    .map_err(|e| Error::Config(format!("claim_rules is not valid JSON: {e}")))?;
                match repr {
                    RulesRepr::Json(_) => Err(Error::Config(
                        "claim_rules must be a list or a mapping".into(),
                    )),
                    repr => repr.into_rules(),
                }
            }
        }
    }
}

fn deserialize_rules<'de, D>(deserializer: D) -> std::result::Result<Vec<ClaimRule>, D::Error>
where
    D: Deserializer<'de>,
{
    RulesRepr::deserialize(deserializer)?
        .into_rules()
        .map_err(|err| match err {
            Error::Config(msg) => serde::de::Error::custom(msg),
            other => serde::de::Error::custom(other),
        })
}

impl GatewayConfig {
    /// Configuration with defaults for everything but the role and rules.
    pub fn new(role_arn: impl Into<String>, claim_rules: Vec<ClaimRule>) -> Self {
        Self {
            issuer: default_issuer(),
            jwks_url: None,
            audience: default_audience(),
            role_arn: role_arn.into(),
            claim_rules,
            allowed_algorithms: default_algorithms(),
            key_id_source: KeyIdSource::default(),
            jwks_cache_ttl_secs: 0,
            serve_stale_on_error: false,
            http_timeout_secs: default_http_timeout(),
            leeway_secs: 0,
            enforce_certificate_validity: true,
            session_name_prefix: default_session_name_prefix(),
            session_duration_secs: default_session_duration(),
        }
    }

    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = Some(url.into());
        self
    }

    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = audience.into();
        self
    }

    /// Load from the process environment (`STSGATE_*` variables).
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of environment-style variables.
    pub fn from_vars(vars: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let legacy_role = vars.get(LEGACY_ROLE_ARN_ENV).cloned();

        let environment = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("allowed_algorithms")
            .source(Some(vars.into_iter().collect()));

        let mut builder = Config::builder();
        if let Some(role_arn) = legacy_role {
            builder = builder
                .set_default("role_arn", role_arn)
                .map_err(|e| Error::Config(e.to_string()))?;
        }

        builder
            .add_source(environment)
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// The key set endpoint, explicit or derived from the issuer.
    pub fn jwks_url(&self) -> String {
        self.jwks_url
            .clone()
            .unwrap_or_else(|| format!("{}/.well-known/jwks", self.issuer.trim_end_matches('/')))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn jwks_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_ttl_secs)
    }

    /// Reject configurations that could not validate tokens safely.
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.issuer)
            .map_err(|e| Error::Config(format!("issuer is not a URL: {e}")))?;
        let jwks_url = self.parsed_jwks_url()?;
        if jwks_url.scheme() != "https" && !is_loopback(&jwks_url) {
            return Err(Error::Config(format!("key set URL must use https: {jwks_url}")));
        }

        if self.audience.is_empty() {
            return Err(Error::Config("audience is empty".into()));
        }
        if self.role_arn.is_empty() {
            return Err(Error::Config("role_arn is empty".into()));
        }
        if self.claim_rules.is_empty() {
            return Err(Error::Config(
                "claim_rules is empty; every token of the issuer would be accepted".into(),
            ));
        }

        if self.allowed_algorithms.is_empty() {
            return Err(Error::Config("allowed_algorithms is empty".into()));
        }
        if let Some(alg) = self
            .allowed_algorithms
            .iter()
            .find(|alg| matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
        {
            return Err(Error::Config(format!("{alg:?} cannot be verified with a public key")));
        }

        if self.http_timeout_secs == 0 {
            return Err(Error::Config("http_timeout_secs must be positive".into()));
        }
        if !(900..=43_200).contains(&self.session_duration_secs) {
            return Err(Error::Config(format!(
                "session_duration_secs {} is outside 900..=43200",
                self.session_duration_secs
            )));
        }

        Ok(())
    }

    pub fn key_source(&self) -> Result<HttpKeySource> {
        HttpKeySource::new(self.parsed_jwks_url()?, self.http_timeout())
    }

    pub fn key_set_cache(&self) -> Result<KeySetCache> {
        Ok(KeySetCache::new(Arc::new(self.key_source()?), self.jwks_cache_ttl())
            .with_serve_stale_on_error(self.serve_stale_on_error))
    }

    pub fn verifier(&self) -> SignatureVerifier {
        SignatureVerifier::new(&self.issuer, &self.audience)
            .with_allowed_algorithms(self.allowed_algorithms.clone())
            .with_key_id_source(self.key_id_source)
            .with_leeway(self.leeway_secs)
            .with_certificate_validity(self.enforce_certificate_validity)
    }

    /// Validate the configuration and assemble the pipeline it describes.
    pub fn pipeline(&self) -> Result<ValidationPipeline> {
        self.validate()?;
        Ok(ValidationPipeline::new(
            Arc::new(self.key_set_cache()?),
            self.verifier(),
            self.claim_rules.clone(),
        ))
    }

    fn parsed_jwks_url(&self) -> Result<Url> {
        Url::parse(&self.jwks_url()).map_err(|e| Error::Config(format!("key set URL is invalid: {e}")))
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
