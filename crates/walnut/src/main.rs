// Walnut - EVM Transaction Debugger
// Copyright (C) 2025 The Walnut Team
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Walnut - EVM Transaction Debugger
//!
//! Serves trace reconstruction and source correlation over HTTP.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
};

use clap::Parser;
use eyre::{Result, WrapErr};
use walnut_engine::{ChainConfig, DebugPipeline, EngineConfig, ScratchSweeper};

mod server;

/// Command-line interface for Walnut
#[derive(Debug, Parser)]
#[command(name = "walnut")]
#[command(about = "Walnut - EVM transaction debugger service with source-level traces")]
#[command(version)]
pub struct Cli {
    /// TOML configuration file
    #[arg(long, env = "WALNUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to
    #[arg(long, env = "WALNUT_HOST", default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port for the HTTP server
    #[arg(long, env = "WALNUT_PORT", default_value = "8080")]
    pub port: u16,

    /// Node endpoint used when a request does not name one
    #[arg(long, env = "WALNUT_RPC_URL")]
    pub rpc_url: Option<String>,

    /// Chain served by `--rpc-url`
    #[arg(long, requires = "rpc_url")]
    pub chain_id: Option<u64>,

    /// Path to a solc binary
    #[arg(long, env = "WALNUT_SOLC")]
    pub solc: Option<PathBuf>,

    /// Root directory for per-run scratch space
    #[arg(long, env = "WALNUT_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Only log to the console
    #[arg(long)]
    pub no_file_log: bool,
}

impl Cli {
    /// Layer the command-line settings on top of the configuration file.
    fn engine_config(&self) -> Result<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => EngineConfig::load(path)
                .wrap_err_with(|| format!("loading {}", path.display()))?,
            None => EngineConfig::default(),
        };

        if let Some(url) = &self.rpc_url {
            match self.chain_id {
                Some(chain_id) => {
                    let chain = match config.chain(chain_id) {
                        Some(existing) => ChainConfig { rpc_url: url.clone(), ..existing.clone() },
                        None => ChainConfig {
                            chain_id,
                            rpc_url: url.clone(),
                            primary: config.default_registry.clone(),
                            secondary: None,
                        },
                    };
                    config = config.with_chain(chain);
                }
                None => config = config.with_default_rpc_url(url.clone()),
            }
        }
        if let Some(solc) = &self.solc {
            config = config.with_solc_path(solc.clone());
        }
        if let Some(root) = &self.scratch_dir {
            config = config.with_scratch_root(root.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    walnut_common::logging::init_logging("walnut", !cli.no_file_log)?;

    let config = cli.engine_config()?;
    tracing::info!(
        chains = config.chains.len(),
        scratch = %config.scratch.root.display(),
        "Configuration loaded"
    );

    let pipeline = DebugPipeline::from_config(config).await?;
    let sweeper = ScratchSweeper::start(&pipeline.config().scratch);
    let handle = server::start(server::AppState::new(pipeline), SocketAddr::new(cli.host, cli.port))
        .await?;

    tracing::info!("Walnut is serving on http://{}. Press Ctrl+C to exit.", handle.addr);
    tokio::signal::ctrl_c().await?;
    tracing::info!("Received Ctrl+C, shutting down...");

    sweeper.stop().await;
    if let Err(e) = handle.shutdown().await {
        tracing::error!("Failed to shut down HTTP server: {}", e);
    } else {
        tracing::info!("HTTP server shut down successfully");
    }

    Ok(())
}
