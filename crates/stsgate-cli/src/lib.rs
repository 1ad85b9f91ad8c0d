//! Invocation transports for stsgate: one-shot events and the HTTP endpoint.

pub mod events;
pub mod server;

pub use events::{TokenRequest, error_body};
pub use server::{AppState, build_app, serve};
