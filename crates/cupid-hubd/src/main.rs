//! # cupid-hubd
//!
//! Cupid hub daemon: loads settings, wires the hub, the JWT verifier and the
//! HTTP/WebSocket server together, and runs until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cupid_core::logging::{LogFormat, init_subscriber};
use cupid_server::metrics::install_recorder;
use cupid_server::{CupidServer, Hub, JwtVerifier, ServerConfig};
use cupid_settings::CupidSettings;

/// Cupid real-time hub.
#[derive(Parser, Debug)]
#[command(name = "cupid-hubd", about = "Cupid real-time connection hub")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (defaults to `~/.cupid/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn settings_path(&self) -> PathBuf {
        self.settings
            .clone()
            .unwrap_or_else(cupid_settings::loader::settings_path)
    }

    /// Command-line flags win over the file and the environment.
    fn apply(&self, settings: &mut CupidSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

fn build_verifier(settings: &CupidSettings) -> Result<JwtVerifier> {
    let Some(secret) = settings.auth.jwt_secret.as_deref().filter(|s| !s.is_empty()) else {
        bail!("no JWT secret configured (set auth.jwtSecret or CUPID_JWT_SECRET)");
    };
    let verifier = JwtVerifier::new(secret.as_bytes(), settings.auth.jwt_issuer.as_deref());
    Ok(match settings.auth.jwt_audience.as_deref() {
        Some(audience) => verifier.with_audience(audience),
        None => verifier,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.settings_path();
    let mut settings = cupid_settings::loader::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings from {}", settings_path.display()))?;
    args.apply(&mut settings);

    init_subscriber(
        &settings.logging.level,
        LogFormat::from_json_flag(settings.logging.json),
    );

    let metrics = install_recorder().context("Failed to install metrics recorder")?;
    let verifier = build_verifier(&settings)?;

    let config = ServerConfig::from(&settings);
    let shutdown_timeout = config.shutdown_timeout;
    let (hub, hub_handle) = Hub::start(config.hub.clone());
    let server = CupidServer::new(config, hub, Arc::new(verifier)).with_metrics(metrics);

    let (addr, server_handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Cupid hub listening on ws://{addr}/ws");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server
        .shutdown()
        .graceful_shutdown(server.hub(), vec![server_handle, hub_handle], shutdown_timeout)
        .await;

    tracing::info!("Shutdown complete");
    Ok(())
}
