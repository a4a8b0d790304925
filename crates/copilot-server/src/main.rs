// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Flight copilot AG-UI server binary

use clap::Parser;
use copilot_logging::CliLoggingArgs;
use copilot_server::Server;
use copilot_sync::config::BackendKind;
use copilot_sync::CopilotConfig;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "copilot-server")]
#[command(
    author,
    version,
    about = "AG-UI endpoint for the flight dashboard copilot",
    long_about = None
)]
struct Cli {
    /// YAML configuration file
    #[arg(long, env = "COPILOT_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to bind to
    #[arg(long)]
    port: Option<u16>,

    /// Forward turns to this upstream agent URL
    #[arg(long, conflicts_with = "scenario_file")]
    upstream_url: Option<String>,

    /// Replay turns from a scenario file instead of calling an upstream
    #[arg(long)]
    scenario_file: Option<PathBuf>,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<CopilotConfig> {
        let mut config = match &self.config {
            Some(path) => CopilotConfig::from_file(path)?,
            None => CopilotConfig::default(),
        };

        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(url) = &self.upstream_url {
            config.backend.kind = BackendKind::Http;
            config.backend.url = Some(url.clone());
        }
        if let Some(path) = &self.scenario_file {
            config.backend.kind = BackendKind::Scripted;
            config.backend.scenario_file = Some(path.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    cli.logging.init("copilot-server")?;

    let config = cli.load_config()?;
    tracing::info!(version = copilot_sync::VERSION, "starting flight copilot server");

    Server::new(config)?.run().await?;
    Ok(())
}
