//! Signature and standard-claim verification.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde_json::{Map, Value};
use std::str::FromStr;
use stsgate_core::claims::numeric_date;
use stsgate_core::{Error, Result};
use tracing::debug;
use x509_parser::public_key::PublicKey;

use crate::jwks::{KeyIdSource, KeySet, SigningKey};
use crate::token::DecodedToken;

/// Kind of public key a verification key was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    EcP256,
    EcP384,
}

impl KeyFamily {
    /// Algorithm assumed when the JWK declares none.
    pub fn implied_algorithm(self) -> Algorithm {
        match self {
            KeyFamily::Rsa => Algorithm::RS256,
            KeyFamily::EcP256 => Algorithm::ES256,
            KeyFamily::EcP384 => Algorithm::ES384,
        }
    }

    pub fn supports(self, algorithm: Algorithm) -> bool {
        use Algorithm::*;
        match self {
            KeyFamily::Rsa => matches!(algorithm, RS256 | RS384 | RS512 | PS256 | PS384 | PS512),
            KeyFamily::EcP256 => algorithm == ES256,
            KeyFamily::EcP384 => algorithm == ES384,
        }
    }
}

/// A public key ready for signature checks.
pub struct VerificationKey {
    key: DecodingKey,
    family: KeyFamily,
}

impl VerificationKey {
    /// Build the verification key a JWK publishes.
    ///
    /// The first `x5c` certificate wins; `n`/`e` or `x`/`y` are used only
    /// when no chain is published. With `enforce_validity`, a certificate
    /// outside its validity window at `now` is refused.
    pub fn from_jwk(jwk: &SigningKey, now: i64, enforce_validity: bool) -> Result<Self> {
        match jwk.signing_certificate() {
            Some(certificate) => Self::from_certificate(certificate, now, enforce_validity),
            None => Self::from_components(jwk),
        }
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    fn from_certificate(certificate: &str, now: i64, enforce_validity: bool) -> Result<Self> {
        let der = STANDARD
            .decode(certificate)
            .map_err(|e| Error::SignatureInvalid(format!("x5c is not base64: {e}")))?;
        let (_, cert) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| Error::SignatureInvalid(format!("x5c is not a certificate: {e}")))?;

        if enforce_validity {
            let validity = cert.validity();
            let not_before = validity.not_before.timestamp();
            let not_after = validity.not_after.timestamp();
            if now < not_before || now > not_after {
                return Err(Error::SignatureInvalid(format!(
                    "signing certificate valid only from {not_before} to {not_after}"
                )));
            }
        }

        let spki = cert.public_key();
        let bits: &[u8] = &spki.subject_public_key.data;
        match spki.parsed() {
            Ok(PublicKey::RSA(_)) => Ok(Self {
                key: DecodingKey::from_rsa_der(bits),
                family: KeyFamily::Rsa,
            }),
            Ok(PublicKey::EC(_)) => {
                let family = match bits.len() {
                    65 => KeyFamily::EcP256,
                    97 => KeyFamily::EcP384,
                    len => {
                        return Err(Error::SignatureInvalid(format!(
                            "unsupported EC point length {len}"
                        )));
                    }
                };
                Ok(Self {
                    key: DecodingKey::from_ec_der(bits),
                    family,
                })
            }
            _ => Err(Error::SignatureInvalid(
                "unsupported certificate key type".into(),
            )),
        }
    }

    fn from_components(jwk: &SigningKey) -> Result<Self> {
        let invalid = |e: jsonwebtoken::errors::Error| {
            Error::SignatureInvalid(format!("unusable key parameters: {e}"))
        };

        match (jwk.kty.as_str(), jwk.crv.as_deref()) {
            ("RSA", _) => {
                let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
                    return Err(Error::SignatureInvalid("RSA key lacks n/e".into()));
                };
                Ok(Self {
                    key: DecodingKey::from_rsa_components(n, e).map_err(invalid)?,
                    family: KeyFamily::Rsa,
                })
            }
            ("EC", Some(crv @ ("P-256" | "P-384"))) => {
                let (Some(x), Some(y)) = (&jwk.x, &jwk.y) else {
                    return Err(Error::SignatureInvalid("EC key lacks x/y".into()));
                };
                let family = if crv == "P-256" {
                    KeyFamily::EcP256
                } else {
                    KeyFamily::EcP384
                };
                Ok(Self {
                    key: DecodingKey::from_ec_components(x, y).map_err(invalid)?,
                    family,
                })
            }
            (kty, crv) => Err(Error::SignatureInvalid(format!(
                "unsupported key type {kty} {}",
                crv.unwrap_or_default()
            ))),
        }
    }
}

/// Verifies a decoded token against the issuer's key set and the expected
/// issuer and audience.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    issuer: String,
    audience: String,
    allowed_algorithms: Vec<Algorithm>,
    key_id_source: KeyIdSource,
    leeway_secs: i64,
    enforce_certificate_validity: bool,
}

impl SignatureVerifier {
    /// Verifier accepting only RS256, selecting keys by `kid`.
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            allowed_algorithms: vec![Algorithm::RS256],
            key_id_source: KeyIdSource::Kid,
            leeway_secs: 0,
            enforce_certificate_validity: true,
        }
    }

    pub fn with_allowed_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    pub fn with_key_id_source(mut self, source: KeyIdSource) -> Self {
        self.key_id_source = source;
        self
    }

    /// Clock skew tolerated on `exp`, `nbf` and `iat`.
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = i64::try_from(leeway_secs).unwrap_or(i64::MAX);
        self
    }

    pub fn with_certificate_validity(mut self, enforce: bool) -> Self {
        self.enforce_certificate_validity = enforce;
        self
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn key_id_source(&self) -> KeyIdSource {
        self.key_id_source
    }

    /// Verify at the current time.
    pub fn verify(&self, token: DecodedToken, keys: &KeySet) -> Result<Map<String, Value>> {
        self.verify_at(token, keys, Utc::now())
    }

    /// Verify the signature, then the standard claims, at `now`. Returns the
    /// payload, which is trusted from here on.
    pub fn verify_at(
        &self,
        token: DecodedToken,
        keys: &KeySet,
        now: DateTime<Utc>,
    ) -> Result<Map<String, Value>> {
        let algorithm = self.token_algorithm(&token)?;
        let jwk = self.select_key(&token, keys)?;
        if jwk.key_use.as_deref().is_some_and(|key_use| key_use != "sig") {
            return Err(Error::SignatureInvalid("key is not published for signing".into()));
        }
        let key = VerificationKey::from_jwk(jwk, now.timestamp(), self.enforce_certificate_validity)?;

        let key_algorithm = match jwk.alg.as_deref() {
            Some(alg) => Algorithm::from_str(alg)
                .map_err(|_| Error::SignatureInvalid(format!("key declares unknown algorithm {alg}")))?,
            None => key.family().implied_algorithm(),
        };
        if !key.family().supports(key_algorithm) {
            return Err(Error::SignatureInvalid(format!(
                "key declares {key_algorithm:?} for a {:?} key",
                key.family()
            )));
        }
        if algorithm != key_algorithm {
            return Err(Error::SignatureInvalid(format!(
                "token algorithm {algorithm:?} does not match key algorithm {key_algorithm:?}"
            )));
        }

        let signature = URL_SAFE_NO_PAD.encode(token.signature());
        let valid = jsonwebtoken::crypto::verify(&signature, token.signed_content(), &key.key, algorithm)
            .map_err(|e| Error::SignatureInvalid(format!("verification error: {e}")))?;
        if !valid {
            return Err(Error::SignatureInvalid("signature does not verify".into()));
        }
        debug!(alg = ?algorithm, "Signature verified");

        let payload = token.into_payload();
        self.check_standard_claims(&payload, now.timestamp())?;
        Ok(payload)
    }

    fn token_algorithm(&self, token: &DecodedToken) -> Result<Algorithm> {
        let alg = token
            .header_str("alg")
            .ok_or_else(|| Error::SignatureInvalid("header has no alg".into()))?;
        let algorithm = Algorithm::from_str(alg)
            .map_err(|_| Error::SignatureInvalid(format!("algorithm {alg:?} is not supported")))?;
        if !self.allowed_algorithms.contains(&algorithm) {
            return Err(Error::SignatureInvalid(format!("algorithm {alg} is not allowed")));
        }
        Ok(algorithm)
    }

    fn select_key<'k>(&self, token: &DecodedToken, keys: &'k KeySet) -> Result<&'k SigningKey> {
        let key_id = token.header_str(self.key_id_source.field()).unwrap_or_default();
        if key_id.is_empty() {
            return Err(Error::NoMatchingKey {
                key_id: String::new(),
            });
        }

        let matching = keys.matching(key_id, self.key_id_source);
        match matching.as_slice() {
            [key] => Ok(*key),
            [] => Err(Error::NoMatchingKey {
                key_id: key_id.to_string(),
            }),
            many => Err(Error::AmbiguousKey {
                key_id: key_id.to_string(),
                matches: many.len(),
            }),
        }
    }

    fn check_standard_claims(&self, payload: &Map<String, Value>, now: i64) -> Result<()> {
        let exp = numeric_claim(payload, "exp")?
            .ok_or_else(|| Error::MalformedToken("missing exp claim".into()))?;
        if exp.saturating_add(self.leeway_secs) <= now {
            return Err(Error::TokenExpired { exp });
        }
        for claim in ["nbf", "iat"] {
            if let Some(not_before) = numeric_claim(payload, claim)? {
                if not_before > now.saturating_add(self.leeway_secs) {
                    return Err(Error::TokenNotYetValid { claim, not_before });
                }
            }
        }

        let issuer = payload.get("iss").and_then(Value::as_str);
        if issuer != Some(self.issuer.as_str()) {
            return Err(Error::IssuerMismatch {
                found: issuer.map(str::to_string),
            });
        }

        let audience_ok = match payload.get("aud") {
            Some(Value::String(aud)) => aud == &self.audience,
            Some(Value::Array(auds)) => auds.iter().any(|aud| aud.as_str() == Some(&self.audience)),
            _ => false,
        };
        if !audience_ok {
            return Err(Error::AudienceMismatch {
                found: payload.get("aud").map(Value::to_string),
            });
        }

        Ok(())
    }
}

fn numeric_claim(payload: &Map<String, Value>, name: &'static str) -> Result<Option<i64>> {
    match payload.get(name) {
        None => Ok(None),
        Some(value) => numeric_date(value)
            .map(Some)
            .ok_or_else(|| Error::MalformedToken(format!("{name} claim is not a number"))),
    }
}
