pub mod storage;
pub mod tickets;

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

pub use storage::BlobStore;
pub use tickets::{UploadSigner, UploadTicket};

/// File storage capability: blob bytes on disk, signed upload URLs and
/// public URLs for stored objects.
pub struct FileStore {
    pub blobs: BlobStore,
    pub signer: UploadSigner,
    public_url: String,
}

impl FileStore {
    pub async fn new(
        dir: PathBuf,
        public_url: &str,
        signing_key: Vec<u8>,
        upload_ttl: Duration,
    ) -> Result<Self> {
        Ok(Self {
            blobs: BlobStore::new(dir).await?,
            signer: UploadSigner::new(signing_key, upload_ttl),
            public_url: public_url.trim_end_matches('/').to_string(),
        })
    }

    /// Issue a time-limited URL the uploader can POST a blob to.
    pub fn upload_url(&self, uploader: Uuid, now: DateTime<Utc>) -> (String, DateTime<Utc>) {
        let ticket = self.signer.issue(uploader, now);
        (
            format!("{}/files/upload?ticket={}", self.public_url, ticket.token),
            ticket.expires_at,
        )
    }

    /// Public URL a stored object is served from.
    pub fn object_url(&self, storage_id: &str) -> String {
        format!("{}/files/{}", self.public_url, storage_id)
    }
}
