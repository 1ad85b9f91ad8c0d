//! Token validation and credential exchange for stsgate.
//!
//! A token is only trusted after every stage of the [`ValidationPipeline`]
//! has passed: the issuer's key set is fetched, the token is decoded, its
//! signature and standard claims are verified against exactly one published
//! key, and the configured claim rules hold. [`TokenExchange`] then hands the
//! resulting identity to a [`CredentialIssuer`].

pub mod cache;
pub mod config;
pub mod exchange;
pub mod jwks;
pub mod pipeline;
pub mod policy;
pub mod providers;
pub mod token;
pub mod verifier;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use cache::KeySetCache;
pub use config::GatewayConfig;
pub use exchange::TokenExchange;
pub use jwks::{HttpKeySource, KeyIdSource, KeySet, KeySource, MAX_KEY_SET_BYTES, SigningKey};
pub use pipeline::{Stage, ValidationPipeline};
pub use providers::{
    CredentialIssuer, IssueRequest, ProviderError,
    aws::StsCredentialIssuer,
};
pub use token::{DecodedToken, decode};
pub use verifier::{KeyFamily, SignatureVerifier, VerificationKey};
