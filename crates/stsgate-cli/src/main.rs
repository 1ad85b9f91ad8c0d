//! stsgate entrypoint.

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use stsgate_auth::{GatewayConfig, StsCredentialIssuer, TokenExchange};
use stsgate_cli::{TokenRequest, error_body};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Commands, LogFormat};

#[derive(Parser)]
#[command(name = "stsgate")]
#[command(author, version, about = "Exchange CI identity tokens for temporary AWS credentials", long_about = None)]
struct Cli {
    /// YAML configuration file; STSGATE_* environment variables are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path),
        None => GatewayConfig::from_env(),
    }
    .context("failed to load configuration")?;

    match cli.command {
        Commands::Exchange { event } => {
            let exchange = build_exchange(&config).await?;
            let result = match read_event(&event)? {
                Ok(token) => exchange.exchange(&token).await,
                Err(err) => Err(err),
            };
            Ok(respond(result))
        }
        Commands::Validate { event } => {
            let pipeline = config.pipeline().context("invalid configuration")?;
            let result = match read_event(&event)? {
                Ok(token) => pipeline.validate(&token).await,
                Err(err) => Err(err),
            };
            Ok(respond(result))
        }
        Commands::Serve { bind } => {
            let exchange = build_exchange(&config).await?;
            stsgate_cli::serve(exchange, bind).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout carries the result; logs go to stderr.
    match format {
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

async fn build_exchange(config: &GatewayConfig) -> anyhow::Result<TokenExchange> {
    let issuer = Arc::new(StsCredentialIssuer::from_env().await);
    TokenExchange::from_config(config, issuer).context("invalid configuration")
}

/// Read the event payload from a file or, for `-`, from stdin. The outer
/// error is an I/O failure; the inner one a payload without a usable token.
fn read_event(path: &Path) -> anyhow::Result<stsgate_core::Result<String>> {
    let body = if path == Path::new("-") {
        let mut body = Vec::new();
        std::io::stdin()
            .read_to_end(&mut body)
            .context("failed to read event from stdin")?;
        body
    } else {
        std::fs::read(path).with_context(|| format!("failed to read event from {}", path.display()))?
    };
    Ok(TokenRequest::parse(&body).map(|request| request.token))
}

/// Print the result (or `{"error": CODE}`) to stdout.
fn respond<T: Serialize>(result: stsgate_core::Result<T>) -> ExitCode {
    let (body, code) = match result {
        Ok(value) => (serde_json::to_value(value), ExitCode::SUCCESS),
        Err(err) => (Ok(error_body(&err)), ExitCode::FAILURE),
    };
    match body {
        Ok(body) => {
            println!("{body}");
            code
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize result");
            ExitCode::FAILURE
        }
    }
}
