//! stsgate core
//!
//! Shared vocabulary for the token exchange: the closed error taxonomy,
//! claim rules, the verified identity handed to credential issuers, and
//! the credential types they return. This crate has minimal dependencies
//! and performs no I/O.

pub mod claims;
pub mod credentials;
pub mod error;
pub mod identity;

pub use claims::{ClaimRule, OidcClaims};
pub use credentials::{AssumedRoleUser, ExchangeResponse, TemporaryCredentials};
pub use error::{Error, Result};
pub use identity::VerifiedIdentity;
