//! Command-line interface for the gatelock service

use anyhow::{anyhow, Context};
use base64::{engine::general_purpose, Engine as _};
use clap::{Parser, Subcommand};
use rand::RngCore;
use std::sync::Arc;

use crate::app_state::AppState;
use crate::clock::SystemClock;
use crate::config::load_config;
use crate::gateweb::build_gateway_router;
use crate::stage_token::StageClaims;
use crate::token_cipher::{derive_token_key, open};

/// Top-level CLI interface for gatelock
#[derive(Parser)]
#[command(
    name = "gatelock",
    version = "0.1.0",
    about = "Gateway session and stage-progression service"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API (gateway routes, health endpoints)
    Serve {
        /// Host/IP to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to bind
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },

    /// Generate a fresh base64 token secret
    GenerateSecret,

    /// Decrypt a stage token and print its claims (operator debugging)
    InspectToken {
        #[arg(long)]
        token: String,
    },
}

pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => serve(&host, port),
        Commands::GenerateSecret => {
            let mut secret = [0u8; 32];
            rand::rng().fill_bytes(&mut secret);
            println!("{}", general_purpose::STANDARD.encode(secret));
            Ok(())
        }
        Commands::InspectToken { token } => inspect_token(&token),
    }
}

fn serve(host: &str, port: u16) -> anyhow::Result<()> {
    let config = load_config().context("loading configuration")?;
    let state = AppState::from_config(&config, Arc::new(SystemClock))
        .context("initializing server state")?;

    let app = build_gateway_router(Arc::new(state));
    let addr = format!("{host}:{port}");
    let socket_addr: std::net::SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid bind address {addr}"))?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building Tokio runtime")?;

    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        println!("HTTP server listening on http://{addr}");
        axum::serve(listener, app).await.context("server error")
    })
}

fn inspect_token(token: &str) -> anyhow::Result<()> {
    let config = load_config().context("loading configuration")?;

    let key = derive_token_key(&config.token_secret, &config.token_salt);
    let payload = open(token, &key)
        .map_err(|e| anyhow!("token does not open under the configured secret: {e}"))?;

    let claims: StageClaims =
        serde_json::from_slice(&payload).context("token payload is not stage claims")?;

    let pretty = serde_json::to_string_pretty(&claims)?;
    println!("{pretty}");

    let age = chrono::Utc::now().signed_duration_since(claims.issued_at);
    println!(
        "age: {}s (max {}m)",
        age.num_seconds(),
        config.limits.token_max_age_minutes
    );
    Ok(())
}
