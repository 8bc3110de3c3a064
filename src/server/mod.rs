//! The file server: owns a node's lifecycle, local store, and the
//! broadcast-then-stream replication protocol.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::ServerConfig;
use crate::crypto;
use crate::error::{ServerError, ServerResult};
use crate::p2p::message::ControlMessage;
use crate::p2p::{self, InboundFrame, Peer, Transport};
use crate::store::Store;

/// Owns a single node: its local store, its transport, and the dispatch
/// loop that answers peers. Construct with an already-built [`Transport`]
/// (so the caller controls its handshake and listen address) and a
/// validated [`ServerConfig`].
pub struct FileServer {
    config: ServerConfig,
    store: Arc<Store>,
    transport: Arc<dyn Transport>,
    quit_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl FileServer {
    pub fn new(config: ServerConfig, transport: Arc<dyn Transport>) -> Self {
        let store = Arc::new(Store::with_transformer(
            config.storage_root.clone(),
            config.path_transformer.clone(),
        ));
        FileServer {
            config,
            store,
            transport,
            quit_tx: Mutex::new(None),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.config.owner_id
    }

    /// Direct access to the local on-disk store, e.g. for inspecting or
    /// pruning a node's namespace without going through the network path.
    pub fn store_handle(&self) -> &Store {
        &self.store
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Start the listener, dial every configured bootstrap peer, and run
    /// the dispatch loop until `stop()` is called or the transport closes.
    pub async fn start(&self) -> ServerResult<()> {
        let listen_transport = self.transport.clone();
        tokio::spawn(async move {
            if let Err(e) = listen_transport.listen_and_accept().await {
                tracing::error!(error = %e, "listener stopped");
            }
        });

        for addr in self.config.bootstrap_peers.clone() {
            let transport = self.transport.clone();
            tokio::spawn(async move {
                if let Err(e) = transport.dial(&addr).await {
                    tracing::warn!(%addr, error = %e, "bootstrap dial failed");
                }
            });
        }

        let (quit_tx, mut quit_rx) = oneshot::channel();
        *self.quit_tx.lock().await = Some(quit_tx);

        loop {
            tokio::select! {
                frame = self.transport.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = self.dispatch(frame).await {
                                tracing::error!(error = %e, "dispatch failed");
                            }
                        }
                        None => break,
                    }
                }
                _ = &mut quit_rx => break,
            }
        }

        self.transport.close().await;
        Ok(())
    }

    /// Signal the dispatch loop to exit.
    pub async fn stop(&self) {
        if let Some(tx) = self.quit_tx.lock().await.take() {
            let _ = tx.send(());
        }
    }

    fn connected_peers(&self) -> Vec<Arc<dyn Peer>> {
        self.transport
            .peer_addrs()
            .iter()
            .filter_map(|addr| self.transport.peer(addr))
            .collect()
    }

    /// Write `reader` to the local store under our own `owner_id`, then
    /// broadcast it (encrypted) to every currently connected peer. Returns
    /// the plaintext size written locally.
    pub async fn store<R>(&self, key: &str, mut reader: R) -> ServerResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let mut plaintext = Vec::new();
        reader.read_to_end(&mut plaintext).await?;

        let size = self
            .store
            .write(&self.config.owner_id, key, &plaintext[..])
            .await?;
        let key_hash = self.store.key_hash(key);

        let mut encrypted = Vec::new();
        crypto::encrypt_stream(&self.config.encryption_key, &plaintext[..], &mut encrypted).await?;

        let message = ControlMessage::StoreFile {
            owner_id: self.config.owner_id.clone(),
            key_hash: key_hash.clone(),
            size: encrypted.len() as u64,
        };

        let mut announced = Vec::new();
        for peer in self.connected_peers() {
            match p2p::send_control_message(peer.as_ref(), &message).await {
                Ok(()) => announced.push(peer),
                Err(e) => tracing::warn!(
                    remote_addr = %peer.remote_addr(),
                    error = %e,
                    "failed to broadcast StoreFile"
                ),
            }
        }

        for peer in &announced {
            if let Err(e) = p2p::send_stream_header(peer.as_ref()).await {
                tracing::warn!(
                    remote_addr = %peer.remote_addr(),
                    error = %e,
                    "failed to open broadcast stream"
                );
                continue;
            }
            if let Err(e) = p2p::send_stream_body(peer.as_ref(), &encrypted[..]).await {
                tracing::warn!(
                    remote_addr = %peer.remote_addr(),
                    error = %e,
                    "failed to stream broadcast body"
                );
            }
        }

        tracing::info!(key_hash, size, peers = announced.len(), "stored file and broadcast to peers");
        Ok(size)
    }

    /// Read `key` from the local store, or, if missing, broadcast a fetch
    /// request and pull it from whichever peer answers first.
    pub async fn get(&self, key: &str) -> ServerResult<(u64, impl AsyncRead)> {
        if self.store.has(&self.config.owner_id, key).await {
            return self.store.read(&self.config.owner_id, key).await;
        }

        let key_hash = self.store.key_hash(key);
        let peers = self.connected_peers();
        if peers.is_empty() {
            return Err(ServerError::NotFound { key_hash });
        }

        let message = ControlMessage::GetFile {
            owner_id: self.config.owner_id.clone(),
            key_hash: key_hash.clone(),
        };
        for peer in &peers {
            if let Err(e) = p2p::send_control_message(peer.as_ref(), &message).await {
                tracing::warn!(
                    remote_addr = %peer.remote_addr(),
                    error = %e,
                    "failed to broadcast GetFile"
                );
            }
        }

        self.await_any_response(&peers, key).await?;
        self.store.read(&self.config.owner_id, key).await
    }

    /// Race every connected peer for a response, returning as soon as one
    /// succeeds. Peers that never answer are bounded by `fetch_timeout` so
    /// their tasks don't linger past the fetch window.
    async fn await_any_response(&self, peers: &[Arc<dyn Peer>], key: &str) -> ServerResult<()> {
        let (tx, mut rx) = mpsc::channel::<ServerResult<()>>(peers.len());
        let fetch_timeout = self.config.fetch_timeout;

        for peer in peers.iter().cloned() {
            let tx = tx.clone();
            let store = self.store.clone();
            let owner_id = self.config.owner_id.clone();
            let encryption_key = self.config.encryption_key;
            let key = key.to_string();
            tokio::spawn(async move {
                let attempt = fetch_from_peer(store, owner_id, encryption_key, key, peer);
                let result = match tokio::time::timeout(fetch_timeout, attempt).await {
                    Ok(inner) => inner,
                    Err(_) => Err(ServerError::FetchTimeout {
                        key_hash: String::new(),
                    }),
                };
                let _ = tx.send(result).await;
            });
        }
        drop(tx);

        while let Some(result) = rx.recv().await {
            if result.is_ok() {
                return Ok(());
            }
        }

        Err(ServerError::FetchTimeout {
            key_hash: self.store.key_hash(key),
        })
    }

    async fn dispatch(&self, frame: InboundFrame) -> ServerResult<()> {
        let message = crate::p2p::message::decode(&frame.payload)?;
        match message {
            ControlMessage::StoreFile {
                owner_id,
                key_hash,
                size,
            } => {
                let peer = self
                    .transport
                    .peer(&frame.from)
                    .ok_or(ServerError::PeerNotFound { addr: frame.from })?;
                let _guard = p2p::StreamGuard::new(peer.as_ref());
                let reader = p2p::limit(peer.as_ref(), size).await?;
                // The local store always holds plaintext, same as a node's
                // own `store()` writes — decrypt the broadcast body on the
                // way in rather than keeping ciphertext on disk.
                self.store
                    .write_decrypt(&owner_id, &key_hash, &self.config.encryption_key, reader)
                    .await?;
                tracing::info!(from = %frame.from, owner_id, key_hash, size, "stored replicated file");
            }
            ControlMessage::GetFile { owner_id, key_hash } => {
                if self.store.has(&owner_id, &key_hash).await {
                    let peer = self
                        .transport
                        .peer(&frame.from)
                        .ok_or(ServerError::PeerNotFound { addr: frame.from })?;
                    let (_size, reader) = self.store.read(&owner_id, &key_hash).await?;
                    // The store holds plaintext; encrypt on the way out so
                    // every fetch response carries IV-prefixed ciphertext,
                    // matching what `fetch_from_peer` decrypts on receipt.
                    let mut encrypted = Vec::new();
                    crypto::encrypt_stream(&self.config.encryption_key, reader, &mut encrypted).await?;
                    p2p::send_stream_header(peer.as_ref()).await?;
                    peer.send(&(encrypted.len() as u64).to_le_bytes()).await?;
                    p2p::send_stream_body(peer.as_ref(), &encrypted[..]).await?;
                    tracing::info!(from = %frame.from, owner_id, key_hash, "served fetch request");
                } else {
                    tracing::debug!(from = %frame.from, owner_id, key_hash, "no local copy for fetch request");
                }
            }
        }
        Ok(())
    }
}

/// Read an 8-byte little-endian size prefix followed by `size` bytes of
/// `IV || ciphertext` from `peer`'s stream, decrypting straight into the
/// local store.
async fn fetch_from_peer(
    store: Arc<Store>,
    owner_id: String,
    encryption_key: [u8; crypto::KEY_SIZE],
    key: String,
    peer: Arc<dyn Peer>,
) -> ServerResult<()> {
    let _guard = p2p::StreamGuard::new(peer.as_ref());
    let size_bytes = p2p::read_stream_exact(peer.as_ref(), 8).await?;
    let size = u64::from_le_bytes(
        size_bytes
            .try_into()
            .expect("read_stream_exact(peer, 8) returns exactly 8 bytes"),
    );
    let reader = p2p::limit(peer.as_ref(), size).await?;
    store
        .write_decrypt(&owner_id, &key, &encryption_key, reader)
        .await?;
    Ok(())
}
