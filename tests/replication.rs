//! End-to-end replication and fetch scenarios driven entirely through the
//! public API, mirroring SPEC_FULL.md's concrete scenarios 5 and 6.

use std::net::SocketAddr;
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
) -> (Arc<FileServer>, SocketAddr, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let transport = Arc::new(TcpTransport::new("127.0.0.1:0".parse().unwrap()).unwrap());
    let addr = transport.addr();

    let mut builder = ServerConfig::builder()
        .listen_addr(addr)
        .storage_root(dir.path())
        .owner_id(owner_id)
        .encryption_key(encryption_key)
        .fetch_timeout(Duration::from_millis(300));
    for peer in bootstrap {
        builder = builder.bootstrap_peer(peer);
    }

    let node = Arc::new(FileServer::new(builder.build().unwrap(), transport));
    let runner = node.clone();
    tokio::spawn(async move {
        let _ = runner.start().await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (node, addr, dir)
}

/// Scenario 5: B stores, deletes its own local copy, and recovers it from A.
#[tokio::test]
async fn two_node_replication_survives_a_local_delete() {
    let key = crypto::new_encryption_key();
    let (node_a, addr_a, _dir_a) = spawn_node("replica-set-5", key, Vec::new()).await;
    let (node_b, _addr_b, _dir_b) =
        spawn_node("replica-set-5", key, vec![addr_a.to_string()]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    node_b
        .store("picture_0.jpg", &b"my big data file here!"[..])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    node_b
        .store_handle()
        .delete(node_b.owner_id(), "picture_0.jpg")
        .await
        .unwrap();

    let (_size, mut reader) = node_b.get("picture_0.jpg").await.unwrap();
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"my big data file here!");

    node_a.stop().await;
    node_b.stop().await;
}

/// Scenario 6: C bootstraps to both A and B, A stores, C fetches a key it
/// never saw locally.
#[tokio::test]
async fn three_node_fetch_reaches_a_node_that_never_stored_the_key() {
    let key = crypto::new_encryption_key();
    let (node_a, addr_a, _dir_a) = spawn_node("replica-set-6", key, Vec::new()).await;
    let (_node_b, addr_b, _dir_b) =
        spawn_node("replica-set-6", key, vec![addr_a.to_string()]).await;
    let (node_c, _addr_c, _dir_c) = spawn_node(
        "replica-set-6",
        key,
        vec![addr_a.to_string(), addr_b.to_string()],
    )
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    node_a.store("k", &b"payload"[..]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let (size, mut reader) = node_c.get("k").await.unwrap();
    assert_eq!(size, 7);
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await.unwrap();
    assert_eq!(buf, b"payload");

    node_a.stop().await;
    node_c.stop().await;
}

#[tokio::test]
async fn get_with_no_local_copy_and_no_peers_is_not_found() {
    let key = crypto::new_encryption_key();
    let (node, _addr, _dir) = spawn_node("solo-node", key, Vec::new()).await;
    let err = node.get("never-stored").await.unwrap_err();
    assert!(matches!(err, castore::ServerError::NotFound { .. }));
    node.stop().await;
}
