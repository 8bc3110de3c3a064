use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use castore::config::ServerConfig;
use castore::p2p::tcp_transport::TcpTransport;
use castore::server::FileServer;

/// Run a castore node: listen for peers, bootstrap to any given, and serve
/// `Store`/`Get` requests for as long as the process stays up.
#[derive(Parser)]
#[command(name = "castore")]
#[command(author, version, about = "Peer-to-peer content-addressed file storage")]
struct Cli {
    /// Address to listen on, e.g. 127.0.0.1:3000
    #[arg(long, default_value = "127.0.0.1:3000")]
    listen: String,

    /// Directory to store encrypted files under
    #[arg(long, default_value = "./castore-data")]
    storage_root: PathBuf,

    /// Namespace shared with any nodes this one should replicate for.
    /// Defaults to a fresh random identity if omitted.
    #[arg(long)]
    owner_id: Option<String>,

    /// Peer address to dial on startup; repeat for multiple bootstrap peers
    #[arg(long = "bootstrap", value_name = "ADDR")]
    bootstrap_peers: Vec<String>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let listen_addr = cli
        .listen
        .parse()
        .with_context(|| format!("invalid --listen address: {}", cli.listen))?;

    let mut builder = ServerConfig::builder()
        .listen_addr(listen_addr)
        .storage_root(cli.storage_root);
    if let Some(owner_id) = cli.owner_id {
        builder = builder.owner_id(owner_id);
    }
    for peer in cli.bootstrap_peers {
        builder = builder.bootstrap_peer(peer);
    }
    let config = builder.build().context("invalid server configuration")?;

    tracing::info!(listen_addr = %config.listen_addr, owner_id = %config.owner_id, "starting castore node");

    let transport = Arc::new(TcpTransport::new(config.listen_addr).context("failed to bind listener")?);
    let server = Arc::new(FileServer::new(config, transport));

    let shutdown = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested, closing node");
            shutdown.stop().await;
        }
    });

    server.start().await?;
    Ok(())
}
