//! A node that never stored a key recovers it from whichever connected peer
//! answers first: A stores, C (which only knows A and B) fetches.

use std::sync::Arc;
use std::time::Duration;

use castore::config::ServerConfig;
use castore::crypto;
use castore::p2p::tcp_transport::TcpTransport;
use castore::server::FileServer;
use tokio::io::AsyncReadExt;

async fn spawn_node(
    owner_id: &str,
    encryption_key: [u8; crypto::KEY_SIZE],
    bootstrap: Vec<String>,
) -> anyhow::Result<(Arc<FileServer>, std::net::SocketAddr, tempfile::TempDir)> {
    let dir = tempfile::tempdir()?;
    let transport = Arc::new(TcpTransport::new("127.0.0.1:0".parse()?)?);
    let addr = transport.addr();
    let mut builder = ServerConfig::builder()
        .listen_addr(addr)
        .storage_root(dir.path())
        .owner_id(owner_id)
        .encryption_key(encryption_key);
    for peer in bootstrap {
        builder = builder.bootstrap_peer(peer);
    }
    let node = Arc::new(FileServer::new(builder.build()?, transport));
    let runner = node.clone();
    tokio::spawn(async move { runner.start().await });
    Ok((node, addr, dir))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    // A replica set shares both its namespace and its key; see DESIGN.md.
    let shared_key = crypto::new_encryption_key();

    let (node_a, addr_a, _dir_a) =
        spawn_node("demo-replica-set", shared_key, Vec::new()).await?;
    let (_node_b, addr_b, _dir_b) =
        spawn_node("demo-replica-set", shared_key, vec![addr_a.to_string()]).await?;
    let (node_c, _addr_c, _dir_c) = spawn_node(
        "demo-replica-set",
        shared_key,
        vec![addr_a.to_string(), addr_b.to_string()],
    )
    .await?;

    tokio::time::sleep(Duration::from_millis(150)).await;

    node_a.store("k", &b"payload"[..]).await?;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let (size, mut reader) = node_c.get("k").await?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    println!("C fetched {size} bytes it never stored: {}", String::from_utf8_lossy(&buf));

    Ok(())
}
