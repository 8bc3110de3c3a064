//! Content-addressed on-disk store.
//!
//! Layout: `root/<owner_id>/<path_name>/<file_name>`. The store keeps no
//! in-memory index — the filesystem is the source of truth, matching the
//! stateless contract the file server relies on.

pub mod path;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::crypto::{self, KEY_SIZE};
use crate::error::{ServerError, ServerResult};
use path::{CasPathTransformer, PathTransformer};

/// Content-addressed store rooted at a single directory on disk.
pub struct Store {
    root: PathBuf,
    path_transformer: Arc<dyn PathTransformer>,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_transformer(root, Arc::new(CasPathTransformer))
    }

    pub fn with_transformer(root: impl Into<PathBuf>, path_transformer: Arc<dyn PathTransformer>) -> Self {
        Store {
            root: root.into(),
            path_transformer,
        }
    }

    /// The on-disk digest a key derives to, e.g. for stamping into a
    /// `StoreFile`/`GetFile` control message.
    pub fn key_hash(&self, key: &str) -> String {
        self.path_transformer.derive(key).file_name
    }

    fn full_path(&self, owner_id: &str, key: &str) -> PathBuf {
        let key_path = self.path_transformer.derive(key);
        self.root.join(owner_id).join(key_path.full_path())
    }

    fn dir_and_file(&self, owner_id: &str, key: &str) -> (PathBuf, PathBuf) {
        let key_path = self.path_transformer.derive(key);
        let owner_root = self.root.join(owner_id);
        (
            owner_root.join(&key_path.path_name),
            owner_root
                .join(&key_path.path_name)
                .join(&key_path.file_name),
        )
    }

    /// Stream `reader` verbatim (plaintext) into the store. Returns the
    /// number of bytes copied.
    pub async fn write<R>(&self, owner_id: &str, key: &str, mut reader: R) -> ServerResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let (dir, file_path) = self.dir_and_file(owner_id, key);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ServerError::io(e, &dir))?;

        let mut file = File::create(&file_path)
            .await
            .map_err(|e| ServerError::io(e, &file_path))?;

        let written = tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|e| ServerError::io(e, &file_path))?;

        tracing::debug!(bytes = written, path = %file_path.display(), "wrote file to store");
        Ok(written)
    }

    /// Decrypt `reader` (an IV-prefixed ciphertext stream) into the store.
    /// Returns the number of plaintext bytes written.
    pub async fn write_decrypt<R>(
        &self,
        owner_id: &str,
        key: &str,
        cipher_key: &[u8; KEY_SIZE],
        reader: R,
    ) -> ServerResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let (dir, file_path) = self.dir_and_file(owner_id, key);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ServerError::io(e, &dir))?;

        let mut file = File::create(&file_path)
            .await
            .map_err(|e| ServerError::io(e, &file_path))?;

        let consumed = crypto::decrypt_stream(cipher_key, reader, &mut file).await?;
        let written = consumed.saturating_sub(crypto::IV_SIZE as u64);
        tracing::debug!(bytes = written, path = %file_path.display(), "decrypted file into store");
        Ok(written)
    }

    /// Write `reader` encrypted under `cipher_key` (IV || ciphertext).
    /// Returns the total bytes written to disk, IV included.
    pub async fn write_encrypt<R>(
        &self,
        owner_id: &str,
        key: &str,
        cipher_key: &[u8; KEY_SIZE],
        reader: R,
    ) -> ServerResult<u64>
    where
        R: AsyncRead + Unpin,
    {
        let (dir, file_path) = self.dir_and_file(owner_id, key);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ServerError::io(e, &dir))?;

        let mut file = File::create(&file_path)
            .await
            .map_err(|e| ServerError::io(e, &file_path))?;

        crypto::encrypt_stream(cipher_key, reader, &mut file).await
    }

    /// Open a reader over a stored file, plus its size in bytes.
    pub async fn read(&self, owner_id: &str, key: &str) -> ServerResult<(u64, impl AsyncRead)> {
        let path = self.full_path(owner_id, key);
        let file = File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ServerError::NotFound {
                    key_hash: key.to_string(),
                }
            } else {
                ServerError::io(e, &path)
            }
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| ServerError::io(e, &path))?
            .len();
        Ok((size, file))
    }

    /// Provide a writer half for streaming encrypted replicated writes that
    /// are appended to directly by callers that already hold a plaintext
    /// writer (used by the file server's local-write-plus-broadcast tee).
    pub async fn create_writer(&self, owner_id: &str, key: &str) -> ServerResult<(PathBuf, File)> {
        let (dir, file_path) = self.dir_and_file(owner_id, key);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ServerError::io(e, &dir))?;
        let file = File::create(&file_path)
            .await
            .map_err(|e| ServerError::io(e, &file_path))?;
        Ok((file_path, file))
    }

    pub async fn has(&self, owner_id: &str, key: &str) -> bool {
        let path = self.full_path(owner_id, key);
        fs::metadata(&path).await.is_ok()
    }

    /// Remove the entire subtree for `key` by unlinking its first path
    /// segment. A missing path is not an error.
    pub async fn delete(&self, owner_id: &str, key: &str) -> ServerResult<()> {
        let key_path = self.path_transformer.derive(key);
        let subtree = self
            .root
            .join(owner_id)
            .join(key_path.first_segment());

        match fs::remove_dir_all(&subtree).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServerError::io(e, &subtree)),
        }
    }

    /// Remove everything under the store's root.
    pub async fn clear(&self) -> ServerResult<()> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ServerError::io(e, &self.root)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn write_then_read_round_trips_bytes() {
        let (_dir, store) = temp_store().await;
        let owner = "owner-a";

        let written = store
            .write(owner, "somefile", &b"some jpg file"[..])
            .await
            .unwrap();
        assert_eq!(written, 13);

        assert!(store.has(owner, "somefile").await);

        let (size, mut reader) = store.read(owner, "somefile").await.unwrap();
        assert_eq!(size, 13);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut reader, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, b"some jpg file");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = temp_store().await;
        let owner = "owner-a";

        store.write(owner, "somefile", &b"data"[..]).await.unwrap();
        assert!(store.has(owner, "somefile").await);

        store.delete(owner, "somefile").await.unwrap();
        assert!(!store.has(owner, "somefile").await);

        // Deleting again must still succeed.
        store.delete(owner, "somefile").await.unwrap();
    }

    #[tokio::test]
    async fn read_of_missing_key_is_not_found() {
        let (_dir, store) = temp_store().await;
        let err = store.read("owner-a", "never-written").await.unwrap_err();
        assert!(matches!(err, ServerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn write_decrypt_inverts_write_encrypt() {
        let (_dir, store) = temp_store().await;
        let owner = "owner-a";
        let key = crypto::new_encryption_key();
        let plaintext = b"round trip through the store";

        let written = store
            .write_encrypt(owner, "enc-key", &key, &plaintext[..])
            .await
            .unwrap();
        assert_eq!(written as usize, plaintext.len() + crypto::IV_SIZE);

        let (size, reader) = store.read(owner, "enc-key").await.unwrap();
        assert_eq!(size, written);

        let (_dir2, plain_store) = temp_store().await;
        let consumed = plain_store
            .write_decrypt(owner, "decoded", &key, reader)
            .await
            .unwrap();
        assert_eq!(consumed as usize, plaintext.len());

        let (_, mut plain_reader) = plain_store.read(owner, "decoded").await.unwrap();
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut plain_reader, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, plaintext);
    }

    #[tokio::test]
    async fn owner_ids_keep_stores_independent() {
        let (_dir, store) = temp_store().await;
        store.write("owner-a", "k", &b"a's data"[..]).await.unwrap();
        store.write("owner-b", "k", &b"b's data"[..]).await.unwrap();

        assert!(store.has("owner-a", "k").await);
        assert!(store.has("owner-b", "k").await);

        store.delete("owner-a", "k").await.unwrap();
        assert!(!store.has("owner-a", "k").await);
        assert!(store.has("owner-b", "k").await);
    }
}
