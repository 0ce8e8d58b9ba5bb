use anyhow::Result;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// On-disk blob storage.
///
/// Each stored object is a single flat file at `{dir}/{storage_id}`.
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Blob storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Path to the file for a given storage id.
    pub fn file_path(&self, storage_id: &str) -> PathBuf {
        self.dir.join(storage_id)
    }

    /// Write a blob and return its SHA-256 as lowercase hex.
    pub async fn write(&self, storage_id: &str, data: &[u8]) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(data);
        let sha256 = hex::encode(hasher.finalize());

        let path = self.file_path(storage_id);
        let mut file = fs::File::create(&path).await?;
        file.write_all(data).await?;
        file.flush().await?;

        Ok(sha256)
    }

    pub async fn read(&self, storage_id: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.file_path(storage_id)).await?)
    }

    /// Delete a blob from disk. Missing files are not an error.
    pub async fn delete(&self, storage_id: &str) -> Result<()> {
        let path = self.file_path(storage_id);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted blob {}", storage_id);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {} already gone", storage_id);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_delete() {
        let dir = std::env::temp_dir().join(format!("parley-blobs-{}", uuid::Uuid::new_v4()));
        let store = BlobStore::new(dir.clone()).await.unwrap();

        let sha = store.write("a", b"abc").await.unwrap();
        assert_eq!(
            sha,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(store.read("a").await.unwrap(), b"abc");

        store.delete("a").await.unwrap();
        store.delete("a").await.unwrap();
        assert!(store.read("a").await.is_err());

        fs::remove_dir_all(dir).await.ok();
    }
}
