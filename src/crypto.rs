//! Streaming AES-256-CTR encryption for replicated file bodies.
//!
//! Every encrypted stream is `IV (16 bytes) || ciphertext`. The IV is drawn
//! fresh per call from the OS RNG and is never reused for a given key within
//! a single process; CTR mode turns the block cipher into a keystream, so
//! encryption and decryption are the same XOR operation once the stream
//! cipher is seeded.

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ServerError, ServerResult};

/// AES block size / CTR IV length in bytes.
pub const IV_SIZE: usize = 16;
/// Symmetric key length required by [`encrypt_stream`] and [`decrypt_stream`].
pub const KEY_SIZE: usize = 32;

const CHUNK_SIZE: usize = 32 * 1024;

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Generate a fresh random 32-byte encryption key from the OS RNG.
pub fn new_encryption_key() -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rand::rng().fill_bytes(&mut key);
    key
}

/// Encrypt `src` into `dst` as `IV || ciphertext`, returning the total number
/// of bytes written to `dst`.
pub async fn encrypt_stream<R, W>(key: &[u8; KEY_SIZE], mut src: R, mut dst: W) -> ServerResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    dst.write_all(&iv).await?;
    let mut cipher = Aes256Ctr::new(key.into(), &iv.into());

    let mut bytes_written = IV_SIZE as u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        cipher.apply_keystream(&mut buf[..n]);
        dst.write_all(&buf[..n]).await?;
        bytes_written += n as u64;
    }

    Ok(bytes_written)
}

/// Decrypt `src` (which must begin with a 16-byte IV) into `dst`, returning
/// the total number of bytes consumed from `src` (IV included).
pub async fn decrypt_stream<R, W>(key: &[u8; KEY_SIZE], mut src: R, mut dst: W) -> ServerResult<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut iv = [0u8; IV_SIZE];
    src.read_exact(&mut iv).await.map_err(|source| {
        if source.kind() == std::io::ErrorKind::UnexpectedEof {
            ServerError::ShortIv {
                expected: IV_SIZE,
                got: 0,
            }
        } else {
            ServerError::from(source)
        }
    })?;

    let mut cipher = Aes256Ctr::new(key.into(), &iv.into());

    let mut bytes_read = IV_SIZE as u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        cipher.apply_keystream(&mut buf[..n]);
        dst.write_all(&buf[..n]).await?;
        bytes_read += n as u64;
    }

    Ok(bytes_read)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn decrypt_inverts_encrypt() {
        let key = new_encryption_key();
        let plaintext = b"Foo not Bar";

        let mut encrypted = Vec::new();
        let written = encrypt_stream(&key, &plaintext[..], &mut encrypted)
            .await
            .unwrap();
        assert_eq!(written as usize, plaintext.len() + IV_SIZE);
        assert_eq!(encrypted.len(), 27);

        let mut decrypted = Vec::new();
        let consumed = decrypt_stream(&key, &encrypted[..], &mut decrypted)
            .await
            .unwrap();
        assert_eq!(consumed, encrypted.len() as u64);
        assert_eq!(decrypted, plaintext);
    }

    #[tokio::test]
    async fn iv_is_not_reused_across_calls() {
        let key = new_encryption_key();
        let plaintext = b"same plaintext twice";

        let mut first = Vec::new();
        encrypt_stream(&key, &plaintext[..], &mut first).await.unwrap();

        let mut second = Vec::new();
        encrypt_stream(&key, &plaintext[..], &mut second).await.unwrap();

        assert_ne!(first[..IV_SIZE], second[..IV_SIZE]);
    }

    #[tokio::test]
    async fn decrypt_rejects_short_iv() {
        let key = new_encryption_key();
        let mut out = Vec::new();
        let err = decrypt_stream(&key, &b"short"[..], &mut out).await.unwrap_err();
        assert!(matches!(err, ServerError::ShortIv { .. }));
    }
}
