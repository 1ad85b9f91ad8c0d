//! Published signing keys and the endpoint they are fetched from.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use stsgate_core::{Error, Result};
use tracing::debug;
use url::Url;

/// Which JWK/header field identifies a signing key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyIdSource {
    /// The `kid` field.
    #[default]
    Kid,
    /// The `x5t` certificate thumbprint.
    X5t,
}

impl KeyIdSource {
    pub fn field(&self) -> &'static str {
        match self {
            KeyIdSource::Kid => "kid",
            KeyIdSource::X5t => "x5t",
        }
    }
}

impl FromStr for KeyIdSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "kid" => Ok(KeyIdSource::Kid),
            "x5t" => Ok(KeyIdSource::X5t),
            other => Err(Error::Config(format!("unknown key id source: {other}"))),
        }
    }
}

impl fmt::Display for KeyIdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field())
    }
}

/// A JSON Web Key as published by the issuer.
///
/// Key material is kept in its published form and only turned into a
/// verification key once a token selects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKey {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    /// Certificate chain, standard base64 DER; the first entry signs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5c: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x5t: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl SigningKey {
    pub fn key_id(&self, source: KeyIdSource) -> Option<&str> {
        match source {
            KeyIdSource::Kid => self.kid.as_deref(),
            KeyIdSource::X5t => self.x5t.as_deref(),
        }
    }

    /// The signing certificate, if the key publishes a chain.
    pub fn signing_certificate(&self) -> Option<&str> {
        self.x5c.as_ref().and_then(|chain| chain.first()).map(String::as_str)
    }
}

/// JSON Web Key Set: the issuer's keys at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySet {
    keys: Vec<SigningKey>,
}

impl KeySet {
    pub fn new(keys: Vec<SigningKey>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[SigningKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Every key whose identifier equals `key_id`, in published order.
    pub fn matching(&self, key_id: &str, source: KeyIdSource) -> Vec<&SigningKey> {
        self.keys
            .iter()
            .filter(|key| key.key_id(source) == Some(key_id))
            .collect()
    }
}

/// Where key sets come from.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the current key set. Every failure is `KeySourceUnreachable`.
    async fn fetch(&self) -> Result<KeySet>;

    /// Source description for logging.
    fn describe(&self) -> String;
}

/// Largest key set body read from the network.
pub const MAX_KEY_SET_BYTES: usize = 256 * 1024;

/// Fetches the key set from a fixed HTTPS endpoint. Redirects are refused.
pub struct HttpKeySource {
    url: Url,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpKeySource {
    pub fn new(url: Url, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .user_agent(concat!("stsgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            url,
            client,
            timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<KeySet> {
        debug!(url = %self.url, "Fetching signing keys");

        let request = async {
            let mut response = self
                .client
                .get(self.url.clone())
                .header(ACCEPT, "application/json")
                .send()
                .await
                .map_err(|e| Error::KeySourceUnreachable(format!("request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(Error::KeySourceUnreachable(format!(
                    "key endpoint returned HTTP {status}"
                )));
            }

            if response
                .content_length()
                .is_some_and(|len| len > MAX_KEY_SET_BYTES as u64)
            {
                return Err(Error::KeySourceUnreachable(format!(
                    "key set exceeds {MAX_KEY_SET_BYTES} bytes"
                )));
            }

            // Content-Length may be absent or wrong, so the cap holds while reading too.
            let mut body = Vec::new();
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| Error::KeySourceUnreachable(format!("failed to read body: {e}")))?
            {
                if body.len() + chunk.len() > MAX_KEY_SET_BYTES {
                    return Err(Error::KeySourceUnreachable(format!(
                        "key set exceeds {MAX_KEY_SET_BYTES} bytes"
                    )));
                }
                body.extend_from_slice(&chunk);
            }

            serde_json::from_slice::<KeySet>(&body)
                .map_err(|e| Error::KeySourceUnreachable(format!("malformed key set: {e}")))
        };

        let keys = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                Error::KeySourceUnreachable(format!("timed out after {:?}", self.timeout))
            })??;

        debug!(url = %self.url, keys = keys.len(), "Fetched signing keys");
        Ok(keys)
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}
