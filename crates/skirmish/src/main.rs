//! Skirmish server binary.
//!
//! Loads the configuration, starts the dispatch server on the process-wide resolver and
//! serves line-delimited JSON requests from stdin until input ends, a `stop` request
//! arrives, or the process is signalled.

mod cli;
mod config;
mod signals;
mod transport;

use anyhow::Context;
use cli::CliArgs;
use config::AppConfig;
use skirmish_runtime::ioc::scope;
use skirmish_runtime::Resolver;
use skirmish_server::{setup_logging, DispatchServer};
use std::io;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

/// Displays the application banner.
fn display_banner() {
    info!("⚔️ Skirmish v{}", env!("CARGO_PKG_VERSION"));
}

/// Main application: the configuration and the server it drives.
pub struct Application {
    config: AppConfig,
    server: Arc<DispatchServer>,
}

impl Application {
    /// Installs the scope chain on the global resolver and builds an unstarted server.
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        scope::setup().context("failed to install the scope chain")?;
        let server = DispatchServer::new(config.server.clone(), Resolver::global());
        Ok(Self { config, server })
    }

    /// Runs until every shard has stopped.
    pub fn run(self) -> anyhow::Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🧵 Shards: {}", self.config.server.shard_count);
        info!("  ⏱️ Quantum: {}ms", self.config.server.quantum_ms);
        info!("  🔐 Authorization: {}", self.config.server.enable_auth);
        info!("  🩹 Recovery: {:?}", self.config.server.recovery);

        self.server.start().context("failed to start the dispatch server")?;
        signals::setup_signal_handlers(&self.server).context("failed to install signal handlers")?;

        let server = self.server.clone();
        thread::Builder::new()
            .name("transport".to_string())
            .spawn(move || {
                let stdin = io::stdin();
                let stdout = io::stdout();
                if let Err(err) = transport::serve_lines(&server, stdin.lock(), stdout.lock()) {
                    error!("❌ Transport failed: {:#}", err);
                    server.stop();
                }
            })
            .context("failed to spawn the transport thread")?;

        info!("✅ Skirmish is now running, reading requests from stdin");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        self.server.join().context("a shard terminated abnormally")?;
        info!("👋 Skirmish shutdown complete");
        Ok(())
    }
}

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let mut config = AppConfig::load_from_file(&args.config_path)?;
    config.apply_overrides(&args);
    config.validate().context("configuration validation failed")?;

    setup_logging(&config.logging.level, config.logging.json_format)?;
    display_banner();
    info!("📂 Config: {}", args.config_path.display());

    Application::new(config)?.run()
}
