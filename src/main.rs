use std::path::PathBuf;

use clap::Parser;
use coin_gen_proxy_lib::ServerOptions;

/// Coin ledger and LLM generation proxy
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the YAML config file (created with defaults when missing)
    #[arg(short, long, env = "COIN_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind, overrides `host` in the config file
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, overrides `port` in the config file
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    coin_gen_proxy_lib::run(ServerOptions {
        config_path: cli.config,
        host: cli.host,
        port: cli.port,
    })
    .await
}
