//! Integration test infrastructure for stsgate.
//!
//! Mock key set endpoints, token fixtures and a stub credential issuer, for
//! driving the full validation pipeline without network access or AWS.
//!
//! # Usage
//!
//! ```ignore
//! use stsgate_tests::{ClaimsFixture, JwksServer};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let server = JwksServer::start(&[&signer]).await;
//!     let pipeline = server.config(rules).pipeline().unwrap();
//! }
//! ```

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;

/// Initialize test logging (call once per test binary).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,stsgate_auth=debug")),
        )
        .with_test_writer()
        .try_init();
}
