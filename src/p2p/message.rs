//! Control message codec.
//!
//! Control messages are small, fixed-shape announcements that precede a
//! stream body ([`ControlMessage::StoreFile`]) or ask a peer to produce one
//! ([`ControlMessage::GetFile`]). They are serialized with `bincode`'s
//! standard configuration and never exceed a kilobyte, so the wire framing
//! in [`crate::p2p::tcp_transport`] can read them into a small fixed buffer.

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};

/// Upper bound on an encoded control message, matching the bound the read
/// loop uses when it reads a message frame off the wire.
pub const MAX_MESSAGE_SIZE: usize = 1028;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMessage {
    /// Announces an incoming stream body of `size` bytes (IV-prefixed
    /// ciphertext, so `plaintext_len + 16`) for `(owner_id, key_hash)`. The
    /// stream frame carrying the body follows immediately on the same
    /// connection.
    StoreFile {
        owner_id: String,
        key_hash: String,
        size: u64,
    },
    /// Requests that the recipient, if it holds the file, reply with a
    /// `StoreFile` announcement followed by the encrypted body.
    GetFile { owner_id: String, key_hash: String },
}

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::standard()
}

pub fn encode(message: &ControlMessage) -> ServerResult<Vec<u8>> {
    bincode::serde::encode_to_vec(message, bincode_config()).map_err(|e| ServerError::Codec {
        reason: format!("failed to encode control message: {e}"),
    })
}

pub fn decode(bytes: &[u8]) -> ServerResult<ControlMessage> {
    let (message, _) =
        bincode::serde::decode_from_slice(bytes, bincode_config()).map_err(|e| ServerError::Codec {
            reason: format!("failed to decode control message: {e}"),
        })?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_file_round_trips() {
        let message = ControlMessage::StoreFile {
            owner_id: "owner-a".into(),
            key_hash: "3b2b11b7a4e96a07a1d668c44e3fd30e96a49764".into(),
            size: 13,
        };
        let bytes = encode(&message).unwrap();
        assert!(bytes.len() <= MAX_MESSAGE_SIZE);
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn get_file_round_trips() {
        let message = ControlMessage::GetFile {
            owner_id: "owner-b".into(),
            key_hash: "somekey".into(),
        };
        let bytes = encode(&message).unwrap();
        assert_eq!(decode(&bytes).unwrap(), message);
    }

    #[test]
    fn decoding_garbage_is_a_codec_error() {
        let err = decode(&[0xff; 4]).unwrap_err();
        assert!(matches!(err, ServerError::Codec { .. }));
    }
}
