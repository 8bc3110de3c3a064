//! Connection-oriented, frame-multiplexing peer transport.
//!
//! A `Transport` exposes listen/dial/accept and hands inbound control
//! frames to the application through [`Transport::recv`]. Every connection
//! that survives its handshake becomes a `Peer`: a bidirectional byte
//! channel plus a completion gate that the read loop uses to hand stream
//! bodies off to the application and resume only once they are drained.

pub mod handshake;
pub mod message;
pub mod tcp_transport;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;

use crate::error::ServerResult;
use message::ControlMessage;

const STREAM_CHUNK_SIZE: usize = 32 * 1024;

/// Discriminator byte preceding a control message.
pub const INCOMING_MESSAGE: u8 = 0x01;
/// Discriminator byte preceding a raw stream body.
pub const INCOMING_STREAM: u8 = 0x02;

/// A control frame as delivered to the application, stamped with the
/// address of the peer it arrived on.
#[derive(Debug, Clone)]
pub struct InboundFrame {
    pub from: SocketAddr,
    pub payload: Vec<u8>,
}

/// Per-peer latch sequencing a read loop and the application across a raw
/// stream body.
///
/// Two independent races have to be closed: the application must not touch
/// the read half before the loop has consumed the stream discriminator byte
/// (`arm_and_wait`/`wait_armed`), and the loop must not resume before the
/// application has drained the body (`release`). Both sides are `Notify`
/// with a single stored permit, so whichever side gets there first never
/// loses its signal — a `release()` that races ahead of `arm_and_wait`'s
/// await, or a `wait_armed()` call that races ahead of the loop arming the
/// gate, both still resolve correctly. `armed` lets a single stream body
/// read span several `read_stream` calls without re-consuming the one-shot
/// `ready` permit on every chunk.
#[derive(Debug, Default)]
pub struct StreamGate {
    ready: Notify,
    done: Notify,
    armed: AtomicBool,
}

impl StreamGate {
    pub fn new() -> Self {
        StreamGate {
            ready: Notify::new(),
            done: Notify::new(),
            armed: AtomicBool::new(false),
        }
    }

    /// Called by the read loop once it has classified an incoming stream
    /// frame and consumed its discriminator byte: marks the gate armed,
    /// wakes any reader already blocked in `wait_armed`, and suspends until
    /// the application calls `release`.
    pub async fn arm_and_wait(&self) {
        self.armed.store(true, Ordering::Release);
        self.ready.notify_one();
        self.done.notified().await;
        self.armed.store(false, Ordering::Release);
    }

    /// Suspend until the read loop has armed the gate for a stream body.
    /// Safe to call repeatedly across the several `read_stream` calls one
    /// body read makes — only the first actually waits.
    pub async fn wait_armed(&self) {
        if self.armed.load(Ordering::Acquire) {
            return;
        }
        self.ready.notified().await;
    }

    /// Release a suspended (or future) `arm_and_wait`.
    pub fn release(&self) {
        self.done.notify_one();
    }
}

/// A live, bidirectional connection to a remote node.
#[async_trait]
pub trait Peer: Send + Sync {
    /// Write `data` verbatim to the connection.
    async fn send(&self, data: &[u8]) -> ServerResult<()>;

    /// Read up to `buf.len()` raw bytes directly from the connection. Blocks
    /// until the peer's read loop has armed its stream gate for an incoming
    /// body; only valid to call while draining one.
    async fn read_stream(&self, buf: &mut [u8]) -> ServerResult<usize>;

    /// Release the stream gate, allowing the read loop to resume.
    fn close_stream(&self);

    fn remote_addr(&self) -> SocketAddr;

    /// `true` if this node dialed the peer, `false` if it was accepted.
    fn is_outbound(&self) -> bool;
}

/// Guarantees a peer's stream gate is released when a stream body read goes
/// out of scope, on every exit path. Without this, a `?` partway through
/// draining a body (a short read, a decode failure) leaves the peer's read
/// loop suspended forever.
pub struct StreamGuard<'a> {
    peer: &'a dyn Peer,
}

impl<'a> StreamGuard<'a> {
    pub fn new(peer: &'a dyn Peer) -> Self {
        StreamGuard { peer }
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        self.peer.close_stream();
    }
}

/// Frame and send a control message: discriminator byte, 4-byte big-endian
/// length, then the `bincode`-encoded payload.
pub async fn send_control_message(peer: &dyn Peer, message: &ControlMessage) -> ServerResult<()> {
    let encoded = message::encode(message)?;
    let mut frame = Vec::with_capacity(1 + 4 + encoded.len());
    frame.push(INCOMING_MESSAGE);
    frame.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
    frame.extend_from_slice(&encoded);
    peer.send(&frame).await
}

/// Send the single-byte stream-frame header. The raw body must follow
/// immediately via [`send_stream_body`].
pub async fn send_stream_header(peer: &dyn Peer) -> ServerResult<()> {
    peer.send(&[INCOMING_STREAM]).await
}

/// Copy `reader` to `peer` in fixed-size chunks, returning the number of
/// bytes sent. Call after [`send_stream_header`].
pub async fn send_stream_body<R: AsyncRead + Unpin>(peer: &dyn Peer, mut reader: R) -> ServerResult<u64> {
    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
    let mut sent = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        peer.send(&buf[..n]).await?;
        sent += n as u64;
    }
    Ok(sent)
}

/// Read exactly `size` bytes from a peer's suspended stream and hand them
/// back as an in-memory reader, suitable for feeding to [`crate::store::Store`]
/// writers. Buffers eagerly rather than streaming, which is adequate for the
/// file sizes this system is designed around.
pub async fn limit(peer: &dyn Peer, size: u64) -> ServerResult<std::io::Cursor<Vec<u8>>> {
    let bytes = read_stream_exact(peer, size).await?;
    Ok(std::io::Cursor::new(bytes))
}

/// Read exactly `n` bytes from a peer's suspended stream.
pub async fn read_stream_exact(peer: &dyn Peer, n: u64) -> ServerResult<Vec<u8>> {
    let mut out = vec![0u8; n as usize];
    let mut filled = 0usize;
    while filled < out.len() {
        let read = peer.read_stream(&mut out[filled..]).await?;
        if read == 0 {
            return Err(crate::error::ServerError::Codec {
                reason: format!("stream ended after {filled} of {n} expected bytes"),
            });
        }
        filled += read;
    }
    Ok(out)
}

/// A connection-oriented transport that multiplexes control frames and
/// stream bodies. The reference implementation is TCP; the trait makes no
/// assumption about the underlying protocol.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn listen_and_accept(&self) -> ServerResult<()>;

    async fn dial(&self, addr: &str) -> ServerResult<()>;

    /// Receive the next inbound control frame, or `None` once the transport
    /// has been closed and drained.
    async fn recv(&self) -> Option<InboundFrame>;

    /// Look up a tracked peer by its remote address.
    fn peer(&self, addr: &SocketAddr) -> Option<Arc<dyn Peer>>;

    /// Addresses of every currently tracked peer.
    fn peer_addrs(&self) -> Vec<SocketAddr>;

    async fn close(&self);

    fn addr(&self) -> SocketAddr;
}
