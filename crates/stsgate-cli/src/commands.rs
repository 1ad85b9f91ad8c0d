//! CLI command definitions.

use clap::{Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Exchange a token for temporary credentials
    Exchange {
        /// Event file containing {"token": "..."}, or - for stdin
        #[arg(short, long, default_value = "-")]
        event: PathBuf,
    },

    /// Validate a token without requesting credentials
    Validate {
        /// Event file containing {"token": "..."}, or - for stdin
        #[arg(short, long, default_value = "-")]
        event: PathBuf,
    },

    /// Serve the HTTP endpoint
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
