//! castore - a peer-to-peer, content-addressed file storage network.
//!
//! A node keeps an on-disk [`store`] of encrypted files addressed by a
//! digest of their key, and replicates writes to whichever peers it is
//! connected to over a framed [`p2p`] TCP transport. [`server::FileServer`]
//! ties the store and the transport together into the `Store`/`Get`
//! operations a caller actually drives.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use castore::config::ServerConfig;
//! use castore::p2p::tcp_transport::TcpTransport;
//! use castore::server::FileServer;
//!
//! # async fn run() -> castore::error::ServerResult<()> {
//! let config = ServerConfig::default_with_key("127.0.0.1:3000".parse().unwrap(), "./data");
//! let transport = Arc::new(TcpTransport::new(config.listen_addr)?);
//! let server = FileServer::new(config, transport);
//! server.store("greeting", &b"hello, network"[..]).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod error;
pub mod p2p;
pub mod server;
pub mod store;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::{ServerError, ServerResult};
pub use server::FileServer;
