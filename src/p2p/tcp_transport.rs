//! TCP implementation of [`Transport`].
//!
//! Each accepted or dialed connection is split into an owned read/write
//! half pair. The write half lives behind its own lock so callers can send
//! concurrently with the connection's read loop; the read half is shared
//! between the read loop and the application's stream-draining code via the
//! same lock, with a [`StreamGate`] sequencing who gets to use it when.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};

use super::handshake::{no_op_handshake, HandshakeFunc};
use super::message::{self, MAX_MESSAGE_SIZE};
use super::{InboundFrame, Peer, StreamGate, Transport, INCOMING_MESSAGE, INCOMING_STREAM};
use crate::error::{ServerError, ServerResult};

const CONSUME_CHANNEL_CAPACITY: usize = 1024;

/// A live TCP connection to a remote node.
pub struct TcpPeer {
    remote_addr: SocketAddr,
    outbound: bool,
    write_half: Mutex<OwnedWriteHalf>,
    read_half: Mutex<OwnedReadHalf>,
    gate: StreamGate,
}

#[async_trait]
impl Peer for TcpPeer {
    async fn send(&self, data: &[u8]) -> ServerResult<()> {
        let mut w = self.write_half.lock().await;
        w.write_all(data).await?;
        Ok(())
    }

    async fn read_stream(&self, buf: &mut [u8]) -> ServerResult<usize> {
        self.gate.wait_armed().await;
        let mut r = self.read_half.lock().await;
        let n = r.read(buf).await?;
        Ok(n)
    }

    fn close_stream(&self) {
        self.gate.release();
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    fn is_outbound(&self) -> bool {
        self.outbound
    }
}

type PeerTable = Arc<DashMap<SocketAddr, Arc<TcpPeer>>>;

/// TCP transport: one listener, a table of live peers, and a single channel
/// that every peer's read loop feeds inbound control frames into.
///
/// The listener is bound at construction time (not on the first call to
/// `listen_and_accept`), so [`Transport::addr`] always reflects the real
/// bound address even when the caller asked for port `0`.
pub struct TcpTransport {
    listen_addr: SocketAddr,
    handshake: HandshakeFunc,
    listener: Mutex<Option<TcpListener>>,
    peers: PeerTable,
    rpc_tx: mpsc::Sender<InboundFrame>,
    rpc_rx: Mutex<mpsc::Receiver<InboundFrame>>,
}

impl TcpTransport {
    pub fn new(listen_addr: SocketAddr) -> ServerResult<Self> {
        Self::with_handshake(listen_addr, no_op_handshake)
    }

    pub fn with_handshake(listen_addr: SocketAddr, handshake: HandshakeFunc) -> ServerResult<Self> {
        let std_listener = std::net::TcpListener::bind(listen_addr).map_err(ServerError::from)?;
        std_listener.set_nonblocking(true).map_err(ServerError::from)?;
        let listener = TcpListener::from_std(std_listener).map_err(ServerError::from)?;
        let bound_addr = listener.local_addr().map_err(ServerError::from)?;

        let (rpc_tx, rpc_rx) = mpsc::channel(CONSUME_CHANNEL_CAPACITY);
        Ok(TcpTransport {
            listen_addr: bound_addr,
            handshake,
            listener: Mutex::new(Some(listener)),
            peers: Arc::new(DashMap::new()),
            rpc_tx,
            rpc_rx: Mutex::new(rpc_rx),
        })
    }

    fn register(&self, stream: TcpStream, remote_addr: SocketAddr, outbound: bool) {
        let (read_half, write_half) = stream.into_split();
        let peer = Arc::new(TcpPeer {
            remote_addr,
            outbound,
            write_half: Mutex::new(write_half),
            read_half: Mutex::new(read_half),
            gate: StreamGate::new(),
        });
        self.peers.insert(remote_addr, peer.clone());
        let connected_at = chrono::Utc::now();
        tracing::info!(%remote_addr, outbound, %connected_at, "peer connected");

        let peers = self.peers.clone();
        let tx = self.rpc_tx.clone();
        tokio::spawn(async move {
            read_loop(peer, tx).await;
            peers.remove(&remote_addr);
            tracing::info!(%remote_addr, "peer disconnected, removed from peer table");
        });
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn listen_and_accept(&self) -> ServerResult<()> {
        let listener = self.listener.lock().await.take().ok_or_else(|| ServerError::Config {
            field: "transport".into(),
            message: "listen_and_accept called more than once".into(),
        })?;
        tracing::info!(addr = %self.listen_addr, "listening for peers");

        loop {
            match listener.accept().await {
                Ok((stream, remote_addr)) => {
                    if let Err(e) = (self.handshake)(remote_addr) {
                        tracing::warn!(%remote_addr, error = %e, "handshake rejected inbound connection");
                        continue;
                    }
                    self.register(stream, remote_addr, false);
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept loop failed");
                    return Err(ServerError::from(e));
                }
            }
        }
    }

    async fn dial(&self, addr: &str) -> ServerResult<()> {
        let stream = TcpStream::connect(addr).await.map_err(ServerError::from)?;
        let remote_addr = stream.peer_addr().map_err(ServerError::from)?;
        (self.handshake)(remote_addr)?;
        self.register(stream, remote_addr, true);
        Ok(())
    }

    async fn recv(&self) -> Option<InboundFrame> {
        let mut rx = self.rpc_rx.lock().await;
        rx.recv().await
    }

    fn peer(&self, addr: &SocketAddr) -> Option<Arc<dyn Peer>> {
        self.peers
            .get(addr)
            .map(|entry| entry.value().clone() as Arc<dyn Peer>)
    }

    fn peer_addrs(&self) -> Vec<SocketAddr> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }

    async fn close(&self) {
        self.peers.clear();
    }

    fn addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

/// Reads discriminated frames off one peer's connection until it closes.
///
/// Holds the read-half lock across the discriminator-byte read, and the
/// whole control frame for `IncomingMessage`, so the application can never
/// observe those bytes. For `IncomingStream` the lock is dropped as soon as
/// the discriminator is classified, but the application does not start
/// racing for it blind: `read_stream` first awaits the peer's `StreamGate`,
/// which this loop only arms *after* the discriminator byte is already
/// consumed. That ordering — not mutex fairness — is what keeps the
/// application from ever observing the discriminator byte as the first
/// byte of a body.
async fn read_loop(peer: Arc<TcpPeer>, tx: mpsc::Sender<InboundFrame>) {
    loop {
        let mut discriminator = [0u8; 1];
        let frame = {
            let mut r = peer.read_half.lock().await;
            match r.read_exact(&mut discriminator).await {
                Ok(_) => {}
                Err(_) => return,
            }

            match discriminator[0] {
                INCOMING_MESSAGE => match read_control_frame(&mut r).await {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::error!(remote_addr = %peer.remote_addr, error = %e, "malformed control frame");
                        return;
                    }
                },
                INCOMING_STREAM => None,
                tag => {
                    tracing::error!(remote_addr = %peer.remote_addr, tag, "unknown frame discriminator");
                    return;
                }
            }
        };

        match frame {
            Some(payload) => {
                let inbound = InboundFrame {
                    from: peer.remote_addr,
                    payload,
                };
                if tx.send(inbound).await.is_err() {
                    return;
                }
            }
            None => {
                // Stream frame: the lock above has already been dropped and
                // the discriminator byte consumed. Arm the gate so a reader
                // already blocked in `wait_armed` can proceed, then suspend
                // until the application has drained the body.
                peer.gate.arm_and_wait().await;
            }
        }
    }
}

async fn read_control_frame(r: &mut OwnedReadHalf) -> ServerResult<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ServerError::Codec {
            reason: format!("control message length {len} exceeds {MAX_MESSAGE_SIZE} byte bound"),
        });
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    // validate it decodes before handing it to the application
    message::decode(&payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::message::ControlMessage;
    use crate::p2p::{read_stream_exact, send_control_message, send_stream_body, send_stream_header};

    async fn connected_pair() -> (Arc<TcpTransport>, Arc<TcpTransport>, SocketAddr, SocketAddr) {
        let server = Arc::new(TcpTransport::new("127.0.0.1:0".parse().unwrap()).unwrap());
        let bound_addr = server.addr();
        let accept_server = server.clone();
        tokio::spawn(async move {
            let _ = accept_server.listen_and_accept().await;
        });

        let client = Arc::new(TcpTransport::new("127.0.0.1:0".parse().unwrap()).unwrap());
        client.dial(&bound_addr.to_string()).await.unwrap();

        // give the server side time to register the inbound connection
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let client_addr = client.peer_addrs()[0];
        let server_addr = server.peer_addrs()[0];
        (server, client, server_addr, client_addr)
    }

    #[tokio::test]
    async fn control_message_round_trips_over_the_wire() {
        let (server, client, server_side_addr, _client_addr) = connected_pair().await;

        let client_peer = client.peer(&server_side_addr).unwrap();
        let message = ControlMessage::GetFile {
            owner_id: "owner-a".into(),
            key_hash: "abc123".into(),
        };
        send_control_message(client_peer.as_ref(), &message)
            .await
            .unwrap();

        let inbound = server.recv().await.unwrap();
        assert_eq!(message::decode(&inbound.payload).unwrap(), message);
    }

    #[tokio::test]
    async fn stream_body_is_delivered_after_gate_release() {
        let (server, client, server_side_addr, _client_addr) = connected_pair().await;
        let client_peer = client.peer(&server_side_addr).unwrap();

        send_stream_header(client_peer.as_ref()).await.unwrap();
        let body = b"streamed payload bytes";
        send_stream_body(client_peer.as_ref(), &body[..]).await.unwrap();

        // give the server's read loop a moment to classify the discriminator
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let server_peer = server.peer(&_client_addr).unwrap();
        let received = read_stream_exact(server_peer.as_ref(), body.len() as u64)
            .await
            .unwrap();
        assert_eq!(received, body);

        server_peer.close_stream();
    }
}
