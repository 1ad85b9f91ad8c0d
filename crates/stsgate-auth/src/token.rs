//! Structural decoding of compact JWS tokens.
//!
//! Nothing here is trusted: the decoder only splits and parses. The header
//! and payload stay untrusted until [`crate::verifier::SignatureVerifier`]
//! has checked the signature over [`DecodedToken::signed_content`].

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Map, Value};
use stsgate_core::{Error, Result};

/// A token split into its parts.
#[derive(Debug, Clone)]
pub struct DecodedToken {
    header: Map<String, Value>,
    payload: Map<String, Value>,
    signed_content: Vec<u8>,
    signature: Vec<u8>,
}

impl DecodedToken {
    pub fn header(&self) -> &Map<String, Value> {
        &self.header
    }

    /// String-valued header field.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header.get(name).and_then(Value::as_str)
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn into_payload(self) -> Map<String, Value> {
        self.payload
    }

    /// `header.payload` exactly as transmitted.
    pub fn signed_content(&self) -> &[u8] {
        &self.signed_content
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }
}

/// Decode a compact token without making any trust decision.
pub fn decode(token: &str) -> Result<DecodedToken> {
    let token = token.trim();
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(Error::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let header = decode_object(segments[0], "header")?;
    let payload = decode_object(segments[1], "payload")?;
    let signature = decode_segment(segments[2], "signature")?;

    let signed_len = segments[0].len() + 1 + segments[1].len();
    let signed_content = token.as_bytes()[..signed_len].to_vec();

    Ok(DecodedToken {
        header,
        payload,
        signed_content,
        signature,
    })
}

fn decode_segment(segment: &str, part: &str) -> Result<Vec<u8>> {
    if segment.is_empty() {
        return Err(Error::MalformedToken(format!("empty {part} segment")));
    }
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| Error::MalformedToken(format!("{part} is not base64url: {e}")))
}

fn decode_object(segment: &str, part: &str) -> Result<Map<String, Value>> {
    let bytes = decode_segment(segment, part)?;
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(Error::MalformedToken(format!("{part} is not a JSON object"))),
        Err(e) => Err(Error::MalformedToken(format!("{part} is not JSON: {e}"))),
    }
}
