//! File server configuration and its builder.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::crypto::{self, KEY_SIZE};
use crate::error::{ServerError, ServerResult};
use crate::p2p::handshake::{no_op_handshake, HandshakeFunc};
use crate::store::path::{CasPathTransformer, PathTransformer};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_millis(500);

/// Validated configuration for a [`crate::server::FileServer`].
#[derive(Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub storage_root: PathBuf,
    pub owner_id: String,
    pub encryption_key: [u8; KEY_SIZE],
    pub bootstrap_peers: Vec<String>,
    pub fetch_timeout: Duration,
    pub path_transformer: Arc<dyn PathTransformer>,
    pub handshake_fn: HandshakeFunc,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("storage_root", &self.storage_root)
            .field("owner_id", &self.owner_id)
            .field("bootstrap_peers", &self.bootstrap_peers)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// A ready-to-run config with a freshly generated encryption key and a
    /// freshly generated owner id, for the common case of a standalone node
    /// that isn't sharing a namespace with any sibling node.
    pub fn default_with_key(listen_addr: SocketAddr, storage_root: impl Into<PathBuf>) -> Self {
        ServerConfig {
            listen_addr,
            storage_root: storage_root.into(),
            owner_id: generate_owner_id(),
            encryption_key: crypto::new_encryption_key(),
            bootstrap_peers: Vec::new(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            path_transformer: Arc::new(CasPathTransformer),
            handshake_fn: no_op_handshake,
        }
    }
}

/// A 32-byte random identity, hex-encoded to 64 characters. Nodes that are
/// meant to replicate for each other (a user's own devices) must be given
/// the *same* owner id explicitly; this generator is only for the common
/// single-node case.
fn generate_owner_id() -> String {
    let mut bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rand::rng(), &mut bytes);
    hex::encode(bytes)
}

/// Builds a [`ServerConfig`], validating required fields at `build()` time
/// rather than on every setter call.
#[derive(Default)]
pub struct ServerConfigBuilder {
    listen_addr: Option<SocketAddr>,
    storage_root: Option<PathBuf>,
    owner_id: Option<String>,
    encryption_key: Option<[u8; KEY_SIZE]>,
    bootstrap_peers: Vec<String>,
    fetch_timeout: Option<Duration>,
    path_transformer: Option<Arc<dyn PathTransformer>>,
    handshake_fn: Option<HandshakeFunc>,
}

impl ServerConfigBuilder {
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = Some(addr);
        self
    }

    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = Some(root.into());
        self
    }

    pub fn owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    pub fn encryption_key(mut self, key: [u8; KEY_SIZE]) -> Self {
        self.encryption_key = Some(key);
        self
    }

    pub fn bootstrap_peer(mut self, addr: impl Into<String>) -> Self {
        self.bootstrap_peers.push(addr.into());
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn path_transformer(mut self, path_transformer: Arc<dyn PathTransformer>) -> Self {
        self.path_transformer = Some(path_transformer);
        self
    }

    pub fn handshake_fn(mut self, handshake_fn: HandshakeFunc) -> Self {
        self.handshake_fn = Some(handshake_fn);
        self
    }

    pub fn build(self) -> ServerResult<ServerConfig> {
        let listen_addr = self.listen_addr.ok_or_else(|| ServerError::Config {
            field: "listen_addr".into(),
            message: "a listen address is required".into(),
        })?;

        let storage_root = self.storage_root.ok_or_else(|| ServerError::Config {
            field: "storage_root".into(),
            message: "a storage root directory is required".into(),
        })?;

        let owner_id = self.owner_id.unwrap_or_else(generate_owner_id);
        if owner_id.trim().is_empty() {
            return Err(ServerError::Config {
                field: "owner_id".into(),
                message: "owner_id cannot be empty".into(),
            });
        }

        let encryption_key = self.encryption_key.unwrap_or_else(crypto::new_encryption_key);
        let fetch_timeout = self.fetch_timeout.unwrap_or(DEFAULT_FETCH_TIMEOUT);
        if fetch_timeout.is_zero() {
            return Err(ServerError::Config {
                field: "fetch_timeout".into(),
                message: "fetch_timeout must be greater than zero".into(),
            });
        }

        Ok(ServerConfig {
            listen_addr,
            storage_root,
            owner_id,
            encryption_key,
            bootstrap_peers: self.bootstrap_peers,
            fetch_timeout,
            path_transformer: self
                .path_transformer
                .unwrap_or_else(|| Arc::new(CasPathTransformer)),
            handshake_fn: self.handshake_fn.unwrap_or(no_op_handshake),
        })
    }
}
