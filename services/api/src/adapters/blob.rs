//! services/api/src/adapters/blob.rs
//!
//! A filesystem-backed implementation of the `BlobStore` port. Objects live under
//! a root directory; read access is granted through expiring, signed URLs that the
//! `/files` route verifies before serving.

use async_trait::async_trait;
use checkin_core::ports::{BlobStore, Clock, PortError, PortResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub struct FsBlobStore {
    root: PathBuf,
    signing_key: String,
    public_base_url: String,
    clock: Arc<dyn Clock>,
}

impl FsBlobStore {
    pub fn new(
        root: impl Into<PathBuf>,
        signing_key: impl Into<String>,
        public_base_url: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            root: root.into(),
            signing_key: signing_key.into(),
            public_base_url: public_base_url.into(),
            clock,
        }
    }

    /// Maps a blob reference onto a file below the root. Anything that could
    /// escape the root is refused.
    fn resolve(&self, blob_ref: &str) -> PortResult<PathBuf> {
        let relative = Path::new(blob_ref);
        let mut parts = 0;
        for component in relative.components() {
            match component {
                Component::Normal(_) => parts += 1,
                _ => {
                    return Err(PortError::Invalid(format!(
                        "blob path '{}' is not a plain relative path",
                        blob_ref
                    )))
                }
            }
        }
        if parts == 0 {
            return Err(PortError::Invalid("blob path is empty".to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// HMAC-SHA256 keyed by the signing key over `path|expires`.
    fn mac(&self, blob_ref: &str, expires: i64) -> PortResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.signing_key.as_bytes())
            .map_err(|e| PortError::Unexpected(format!("invalid signing key: {}", e)))?;
        mac.update(blob_ref.as_bytes());
        mac.update(b"|");
        mac.update(expires.to_string().as_bytes());
        Ok(mac)
    }

    fn sign(&self, blob_ref: &str, expires: i64) -> PortResult<String> {
        Ok(hex::encode(self.mac(blob_ref, expires)?.finalize().into_bytes()))
    }

    /// Checks a signature issued by `signed_url` and that it has not expired.
    pub fn verify(&self, blob_ref: &str, expires: i64, sig: &str) -> PortResult<()> {
        if self.clock.now().timestamp() >= expires {
            return Err(PortError::Unauthorized);
        }
        let sig = hex::decode(sig).map_err(|_| PortError::Unauthorized)?;
        self.mac(blob_ref, expires)?
            .verify_slice(&sig)
            .map_err(|_| PortError::Unauthorized)
    }

    pub async fn read(&self, blob_ref: &str) -> PortResult<Vec<u8>> {
        let path = self.resolve(blob_ref)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => PortError::NotFound(format!("Object {} not found", blob_ref)),
            _ => PortError::Unexpected(e.to_string()),
        })
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(&self, path: &str, bytes: &[u8]) -> PortResult<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => {
                    PortError::Conflict(format!("Object {} already exists", path))
                }
                _ => PortError::Unexpected(e.to_string()),
            })?;
        file.write_all(bytes)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        file.flush()
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        debug!(path, size = bytes.len(), "Stored blob");
        Ok(path.to_string())
    }

    async fn delete(&self, blob_ref: &str) -> PortResult<()> {
        let target = self.resolve(blob_ref)?;
        tokio::fs::remove_file(&target)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    PortError::NotFound(format!("Object {} not found", blob_ref))
                }
                _ => PortError::Unexpected(e.to_string()),
            })
    }

    async fn signed_url(&self, blob_ref: &str, ttl: Duration) -> PortResult<String> {
        self.resolve(blob_ref)?;
        let ttl_secs = i64::try_from(ttl.as_secs())
            .map_err(|_| PortError::Invalid("signed URL lifetime is too long".to_string()))?;
        let expires = self.clock.now().timestamp() + ttl_secs;
        Ok(format!(
            "{}/files/{}?expires={}&sig={}",
            self.public_base_url,
            blob_ref,
            expires,
            self.sign(blob_ref, expires)?
        ))
    }
}
