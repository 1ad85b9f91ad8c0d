//! Token validation pipeline.
//!
//! ```text
//! Start -> KeysFetched -> Decoded -> SignatureVerified -> ClaimsChecked -> Done
//! ```
//!
//! Any stage may fail, which ends the call. Nothing is retried.

use std::fmt;
use std::sync::Arc;
use stsgate_core::{ClaimRule, Error, Result, VerifiedIdentity};
use tracing::{Instrument, debug, info_span, warn};

use crate::cache::KeySetCache;
use crate::policy;
use crate::token;
use crate::verifier::SignatureVerifier;

/// Last stage a validation call completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    KeysFetched,
    Decoded,
    SignatureVerified,
    ClaimsChecked,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::KeysFetched => "keys_fetched",
            Stage::Decoded => "decoded",
            Stage::SignatureVerified => "signature_verified",
            Stage::ClaimsChecked => "claims_checked",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Turns a raw token into a [`VerifiedIdentity`] or a terminal [`Error`].
///
/// Shareable across tasks: the key set cache is the only shared state.
#[derive(Clone)]
pub struct ValidationPipeline {
    keys: Arc<KeySetCache>,
    verifier: SignatureVerifier,
    rules: Arc<[ClaimRule]>,
}

impl ValidationPipeline {
    pub fn new(keys: Arc<KeySetCache>, verifier: SignatureVerifier, rules: Vec<ClaimRule>) -> Self {
        Self {
            keys,
            verifier,
            rules: rules.into(),
        }
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    pub fn rules(&self) -> &[ClaimRule] {
        &self.rules
    }

    pub async fn validate(&self, token: &str) -> Result<VerifiedIdentity> {
        let span = info_span!("validate_token", kid = tracing::field::Empty, alg = tracing::field::Empty);
        self.run(token).instrument(span).await
    }

    async fn run(&self, token: &str) -> Result<VerifiedIdentity> {
        let mut stage = Stage::Start;
        let mut header_fields = HeaderFields::default();

        let result = self.advance(token, &mut stage, &mut header_fields).await;
        if let Err(err) = &result {
            let (rule_index, claim) = match err {
                Error::ClaimMismatch { rule_index, claim } => (Some(*rule_index), Some(claim.as_str())),
                _ => (None, None),
            };
            warn!(
                stage = %stage,
                kid = header_fields.key_id.as_deref(),
                alg = header_fields.alg.as_deref(),
                rule_index,
                claim,
                error_code = err.code(),
                error = %err,
                "Token validation failed"
            );
        }
        result
    }

    async fn advance(
        &self,
        token: &str,
        stage: &mut Stage,
        header_fields: &mut HeaderFields,
    ) -> Result<VerifiedIdentity> {
        let keys = self.keys.get().await?;
        *stage = Stage::KeysFetched;
        debug!(keys = keys.len(), "Key set ready");

        let decoded = token::decode(token)?;
        *stage = Stage::Decoded;
        header_fields.key_id = decoded
            .header_str(self.verifier.key_id_source().field())
            .map(str::to_string);
        header_fields.alg = decoded.header_str("alg").map(str::to_string);
        let span = tracing::Span::current();
        span.record("kid", header_fields.key_id.as_deref());
        span.record("alg", header_fields.alg.as_deref());

        let payload = self.verifier.verify(decoded, &keys)?;
        *stage = Stage::SignatureVerified;
        debug!("Signature and standard claims verified");

        policy::check(&payload, &self.rules)?;
        *stage = Stage::ClaimsChecked;

        let identity = VerifiedIdentity::from_payload(payload)?;
        *stage = Stage::Done;
        debug!(sub = identity.subject(), "Token validated");
        Ok(identity)
    }
}

impl fmt::Debug for ValidationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationPipeline")
            .field("verifier", &self.verifier)
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}

/// Untrusted header fields kept only for failure diagnostics.
#[derive(Default)]
struct HeaderFields {
    key_id: Option<String>,
    alg: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwks::{KeySet, KeySource};
    use crate::testing::{TestSigner, forge, key_set};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::time::Duration;

    const ISSUER: &str = "https://issuer.example";
    const AUDIENCE: &str = "sts.example";

    struct StaticSource {
        keys: Mutex<Option<KeySet>>,
    }

    impl StaticSource {
        fn new(keys: Option<KeySet>) -> Arc<Self> {
            Arc::new(Self {
                keys: Mutex::new(keys),
            })
        }
    }

    #[async_trait]
    impl KeySource for StaticSource {
        async fn fetch(&self) -> Result<KeySet> {
            self.keys
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| Error::KeySourceUnreachable("HTTP 500".into()))
        }

        fn describe(&self) -> String {
            "static".into()
        }
    }

    fn pipeline(source: Arc<StaticSource>, rules: Vec<ClaimRule>) -> ValidationPipeline {
        let cache = Arc::new(KeySetCache::new(source, Duration::ZERO));
        ValidationPipeline::new(cache, SignatureVerifier::new(ISSUER, AUDIENCE), rules)
    }

    fn claims(sub: &str) -> Value {
        json!({
            "iss": ISSUER,
            "aud": AUDIENCE,
            "sub": sub,
            "actor": "octocat",
            "exp": Utc::now().timestamp() + 300
        })
    }

    fn main_branch_rule() -> Vec<ClaimRule> {
        vec![ClaimRule::new("sub", "repo:org/x:refs/heads/main").unwrap()]
    }

    #[tokio::test]
    async fn test_reaches_done() {
        let signer = TestSigner::rsa("abc123");
        let pipeline = pipeline(StaticSource::new(Some(key_set(&[&signer]))), main_branch_rule());

        let identity = pipeline
            .validate(&signer.sign(&claims("repo:org/x:refs/heads/main")))
            .await
            .unwrap();
        assert_eq!(identity.subject(), "repo:org/x:refs/heads/main");
        assert_eq!(identity.issuer(), ISSUER);
        assert!(identity.audience().contains(AUDIENCE));
        assert_eq!(identity.actor(), Some("octocat"));
    }

    #[tokio::test]
    async fn test_key_source_failure_is_first() {
        let pipeline = pipeline(StaticSource::new(None), main_branch_rule());

        let err = pipeline.validate("not-a-token").await.unwrap_err();
        assert!(matches!(err, Error::KeySourceUnreachable(_)));
    }

    #[tokio::test]
    async fn test_malformed_token() {
        let signer = TestSigner::rsa("abc123");
        let pipeline = pipeline(StaticSource::new(Some(key_set(&[&signer]))), main_branch_rule());

        let err = pipeline.validate("a.b").await.unwrap_err();
        assert!(matches!(err, Error::MalformedToken(_)));
    }

    #[tokio::test]
    async fn test_rules_run_only_after_signature() {
        let signer = TestSigner::rsa("abc123");
        let pipeline = pipeline(StaticSource::new(Some(key_set(&[&signer]))), main_branch_rule());

        // Payload would satisfy the rule, but the signature is garbage.
        let token = forge(
            &json!({"alg": "RS256", "kid": "abc123"}),
            &claims("repo:org/x:refs/heads/main"),
            b"forged",
        );
        let err = pipeline.validate(&token).await.unwrap_err();
        assert!(matches!(err, Error::SignatureInvalid(_)));
    }

    #[tokio::test]
    async fn test_claim_mismatch() {
        let signer = TestSigner::rsa("abc123");
        let pipeline = pipeline(StaticSource::new(Some(key_set(&[&signer]))), main_branch_rule());

        let token = signer.sign(&claims("repo:org/x:refs/heads/main-evil"));
        let err = pipeline.validate(&token).await.unwrap_err();
        assert!(matches!(err, Error::ClaimMismatch { rule_index: 0, .. }));
    }

    #[tokio::test]
    async fn test_missing_subject_is_malformed() {
        let signer = TestSigner::rsa("abc123");
        let pipeline = pipeline(StaticSource::new(Some(key_set(&[&signer]))), vec![]);

        let mut claims = claims("unused");
        claims.as_object_mut().unwrap().remove("sub");
        let err = pipeline.validate(&signer.sign(&claims)).await.unwrap_err();
        assert!(matches!(err, Error::MalformedToken(_)));
    }

    #[tokio::test]
    async fn test_numeric_run_id_reaches_done() {
        let signer = TestSigner::rsa("abc123");
        let rules = vec![ClaimRule::new("run_id", r"\d+").unwrap()];
        let pipeline = pipeline(StaticSource::new(Some(key_set(&[&signer]))), rules);

        let mut claims = claims("repo:org/x:refs/heads/main");
        claims["run_id"] = json!(42);
        let identity = pipeline.validate(&signer.sign(&claims)).await.unwrap();
        assert_eq!(identity.claims().run_id.as_deref(), Some("42"));
        assert_eq!(identity.claim("run_id"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_fractional_exp_reaches_done() {
        let signer = TestSigner::rsa("abc123");
        let pipeline = pipeline(StaticSource::new(Some(key_set(&[&signer]))), main_branch_rule());

        let exp = Utc::now().timestamp() + 300;
        let mut claims = claims("repo:org/x:refs/heads/main");
        claims["exp"] = json!(exp as f64 + 0.5);
        claims["iat"] = json!(Utc::now().timestamp() as f64 - 0.25);
        let identity = pipeline.validate(&signer.sign(&claims)).await.unwrap();
        assert_eq!(identity.expires_at().timestamp(), exp);
    }

    #[tokio::test]
    async fn test_mixed_audience_array_reaches_done() {
        let signer = TestSigner::rsa("abc123");
        let pipeline = pipeline(StaticSource::new(Some(key_set(&[&signer]))), main_branch_rule());

        let mut claims = claims("repo:org/x:refs/heads/main");
        claims["aud"] = json!([AUDIENCE, 7]);
        let identity = pipeline.validate(&signer.sign(&claims)).await.unwrap();
        assert!(identity.audience().contains(AUDIENCE));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::SignatureVerified.to_string(), "signature_verified");
        assert_eq!(Stage::Done.to_string(), "done");
    }
}
