//! Two nodes share an owner id; node A stores a file, node B deletes its
//! local copy and fetches it back over the wire.

use std::sync::Arc;
use std::time::Duration;

use castore::config::ServerConfig;
use castore::crypto;
use castore::p2p::tcp_transport::TcpTransport;
use castore::server::FileServer;
use tokio::io::AsyncReadExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let dir_a = tempfile::tempdir()?;
    let dir_b = tempfile::tempdir()?;
    // A replica set shares both its namespace and its key; see DESIGN.md.
    let shared_key = crypto::new_encryption_key();

    let transport_a = Arc::new(TcpTransport::new("127.0.0.1:0".parse()?)?);
    let addr_a = transport_a.addr();
    let config_a = ServerConfig::builder()
        .listen_addr(addr_a)
        .storage_root(dir_a.path())
        .owner_id("demo-replica-set")
        .encryption_key(shared_key)
        .build()?;
    let node_a = Arc::new(FileServer::new(config_a, transport_a));
    let runner_a = node_a.clone();
    tokio::spawn(async move { runner_a.start().await });

    let transport_b = Arc::new(TcpTransport::new("127.0.0.1:0".parse()?)?);
    let config_b = ServerConfig::builder()
        .listen_addr(transport_b.addr())
        .storage_root(dir_b.path())
        .owner_id("demo-replica-set")
        .encryption_key(shared_key)
        .bootstrap_peer(addr_a.to_string())
        .build()?;
    let node_b = Arc::new(FileServer::new(config_b, transport_b));
    let runner_b = node_b.clone();
    tokio::spawn(async move { runner_b.start().await });

    tokio::time::sleep(Duration::from_millis(150)).await;

    node_a.store("picture_0.jpg", &b"my big data file here!"[..]).await?;
    tokio::time::sleep(Duration::from_millis(150)).await;

    node_b
        .store_handle()
        .delete(node_b.owner_id(), "picture_0.jpg")
        .await?;

    let (size, mut reader) = node_b.get("picture_0.jpg").await?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    println!("B recovered {size} bytes from A: {}", String::from_utf8_lossy(&buf));

    node_a.stop().await;
    node_b.stop().await;
    Ok(())
}
