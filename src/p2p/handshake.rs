//! Connection handshake hook, run once per accepted or dialed connection
//! before it is admitted to the peer table.

use std::net::SocketAddr;

use crate::error::ServerResult;

/// A handshake inspects (and may reject) a freshly-opened connection before
/// it becomes a tracked peer. Kept as a plain function type, matching the
/// single call site in `tcp_transport`'s accept/dial paths.
pub type HandshakeFunc = fn(SocketAddr) -> ServerResult<()>;

/// Accepts every connection unconditionally.
pub fn no_op_handshake(_addr: SocketAddr) -> ServerResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_handshake_always_succeeds() {
        let addr: SocketAddr = "127.0.0.1:3000".parse().unwrap();
        assert!(no_op_handshake(addr).is_ok());
    }
}
