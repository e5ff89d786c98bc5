//! wafden - multi-tenant WAF control plane.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wafden::config::Config;
use wafden::db::Db;
use wafden::http;
use wafden::http::auth::bootstrap_tenant;
use wafden::logging::{self, LogConfig, LogFormat};

#[derive(Parser)]
#[command(name = "wafden", version, about = "Multi-tenant WAF control plane")]
struct Cli {
    /// Path to the configuration file (defaults to ./wafden.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server.
    Serve {
        /// Override the configured listen port.
        #[arg(short, long)]
        port: Option<u16>,

        /// Emit JSON logs instead of pretty output.
        #[arg(long)]
        json_logs: bool,
    },
    /// Initialize the database and seed the bootstrap tenant.
    InitDb {
        /// Name for the bootstrap tenant.
        #[arg(long, default_value = "default")]
        tenant_name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Serve { port, json_logs } => {
            let mut log_config = LogConfig::default();
            if json_logs {
                log_config.format = LogFormat::Json;
            }
            logging::init(&log_config);

            if let Some(port) = port {
                config.server.port = port;
            }

            http::serve(config).await
        }
        Command::InitDb { tenant_name } => {
            logging::init(&LogConfig::default());

            let key = config
                .auth
                .bootstrap_key
                .as_deref()
                .context("no bootstrap key: set auth.bootstrap_key or WAFDEN_BOOTSTRAP_KEY")?;

            let db = Db::open(&config.database.path).context("failed to open database")?;
            let tenant_id = bootstrap_tenant(&db, &tenant_name, key)?;
            tracing::info!(%tenant_id, tenant = %tenant_name, "database initialized");
            println!("tenant {tenant_name} ready: {tenant_id}");
            Ok(())
        }
    }
}
