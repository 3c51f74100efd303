//! BlobStore — content store for overflow rows, staged payloads and
//! attachments.
//!
//! Backed by `object_store`; the URL scheme selects the backend:
//!
//! ```text
//! # In-memory (default; tests and the demo binary)
//! ARX_BLOB_STORE_URL=memory://
//!
//! # Local filesystem
//! ARX_BLOB_STORE_URL=file:///var/lib/arx-blobs
//!
//! # S3 / MinIO
//! ARX_BLOB_STORE_URL=s3://my-bucket?region=us-east-1
//! ARX_BLOB_STORE_URL=s3://my-bucket?endpoint=http://minio:9000&region=us-east-1
//! ```
//!
//! Staged message/notification payloads are zstd-compressed; overflow row
//! bodies are stored verbatim so reads come back byte-identical.

use std::sync::Arc;

use anyhow::{Context, Result};
use object_store::{path::Path, ObjectStore};

/// Logical containers within the store.
pub mod containers {
    /// Staged inbound message bodies referenced by pointer-only messages.
    pub const PRIMARY_MESSAGE: &str = "primary-message";
    /// Staged notification envelopes.
    pub const NOTIFICATION: &str = "notification-details";
    /// Detail rows that exceeded the inline size limit.
    pub const DETAILS_OVERFLOW: &str = "details-overflow";
    /// Downloaded document attachments.
    pub const ATTACHMENTS: &str = "attachments";
}

#[derive(Clone)]
pub struct BlobStore {
    store: Arc<dyn ObjectStore>,
}

impl BlobStore {
    /// In-memory store, used by tests and when no URL is configured.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(object_store::memory::InMemory::new()),
        }
    }

    /// Build a `BlobStore` from a URL (see module docs for schemes).
    pub fn from_url(url: &str) -> Result<Self> {
        if url.is_empty() || url.starts_with("memory://") {
            return Ok(Self::memory());
        }

        if let Some(path) = url.strip_prefix("file://") {
            let store = object_store::local::LocalFileSystem::new_with_prefix(path)
                .context("failed to create local file system blob store")?;
            return Ok(Self {
                store: Arc::new(store),
            });
        }

        if let Some(without_scheme) = url.strip_prefix("s3://") {
            let bucket = without_scheme.split('?').next().unwrap_or(without_scheme);
            let endpoint = parse_query_param(url, "endpoint");
            let region =
                parse_query_param(url, "region").unwrap_or_else(|| "us-east-1".to_string());

            let mut builder = object_store::aws::AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_region(&region);

            if let Some(ep) = endpoint {
                builder = builder.with_endpoint(&ep).with_allow_http(true);
            }

            let store = builder.build().context("failed to build S3 blob store")?;
            return Ok(Self {
                store: Arc::new(store),
            });
        }

        anyhow::bail!("unsupported ARX_BLOB_STORE_URL scheme: {}", url)
    }

    fn path(container: &str, name: &str) -> Path {
        Path::from(format!("{}/{}", container, name))
    }

    /// Store text verbatim.
    pub async fn put_text(&self, container: &str, name: &str, body: &str) -> Result<()> {
        let path = Self::path(container, name);
        self.store
            .put(&path, body.as_bytes().to_vec().into())
            .await
            .with_context(|| format!("failed to put blob {}/{}", container, name))?;
        tracing::debug!(container, name, bytes = body.len(), "blob stored");
        Ok(())
    }

    pub async fn get_text(&self, container: &str, name: &str) -> Result<String> {
        let path = Self::path(container, name);
        let bytes = self
            .store
            .get(&path)
            .await
            .with_context(|| format!("failed to get blob {}/{}", container, name))?
            .bytes()
            .await
            .context("failed to read blob bytes")?;
        String::from_utf8(bytes.to_vec()).context("blob is not valid utf-8")
    }

    /// Store text zstd-compressed (staged payloads, typically 60-80%
    /// compression on JSON).
    pub async fn put_compressed(&self, container: &str, name: &str, body: &str) -> Result<()> {
        let compressed =
            zstd::encode_all(body.as_bytes(), 3).context("failed to compress blob")?;
        let path = Self::path(container, name);
        self.store
            .put(&path, compressed.into())
            .await
            .with_context(|| format!("failed to put blob {}/{}", container, name))?;
        Ok(())
    }

    pub async fn get_compressed(&self, container: &str, name: &str) -> Result<String> {
        let path = Self::path(container, name);
        let bytes = self
            .store
            .get(&path)
            .await
            .with_context(|| format!("failed to get blob {}/{}", container, name))?
            .bytes()
            .await
            .context("failed to read blob bytes")?;
        let decompressed = zstd::decode_all(bytes.as_ref()).context("failed to decompress blob")?;
        String::from_utf8(decompressed).context("blob is not valid utf-8")
    }

    /// Delete; a missing blob is not an error. Some backends report a
    /// successful delete for paths that never existed, so presence is
    /// checked first to keep the return value meaningful everywhere.
    pub async fn delete(&self, container: &str, name: &str) -> Result<bool> {
        if !self.exists(container, name).await? {
            return Ok(false);
        }
        let path = Self::path(container, name);
        match self.store.delete(&path).await {
            Ok(()) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to delete blob {}/{}", container, name)),
        }
    }

    pub async fn exists(&self, container: &str, name: &str) -> Result<bool> {
        let path = Self::path(container, name);
        match self.store.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to head blob {}/{}", container, name)),
        }
    }
}

fn parse_query_param(url: &str, key: &str) -> Option<String> {
    let query = url.split('?').nth(1)?;
    for part in query.split('&') {
        let mut kv = part.splitn(2, '=');
        if kv.next() == Some(key) {
            return kv
                .next()
                .map(|v| urlencoding::decode(v).unwrap_or_default().into_owned());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_text_round_trip_is_byte_identical() {
        let blob = BlobStore::memory();
        let body = r#"{"lines":[1,2,3],"note":"ünïcode | pipes"}"#;
        blob.put_text(containers::DETAILS_OVERFLOW, "PO-1|t1|LineItems", body)
            .await
            .unwrap();
        let back = blob
            .get_text(containers::DETAILS_OVERFLOW, "PO-1|t1|LineItems")
            .await
            .unwrap();
        assert_eq!(back, body);
    }

    #[tokio::test]
    async fn test_compressed_round_trip() {
        let blob = BlobStore::memory();
        let body = "x".repeat(100_000);
        blob.put_compressed(containers::PRIMARY_MESSAGE, "m1", &body)
            .await
            .unwrap();
        let back = blob
            .get_compressed(containers::PRIMARY_MESSAGE, "m1")
            .await
            .unwrap();
        assert_eq!(back, body);
    }

    #[tokio::test]
    async fn test_delete_and_exists() {
        let blob = BlobStore::memory();
        blob.put_text(containers::ATTACHMENTS, "a", "data")
            .await
            .unwrap();
        assert!(blob.exists(containers::ATTACHMENTS, "a").await.unwrap());
        assert!(blob.delete(containers::ATTACHMENTS, "a").await.unwrap());
        assert!(!blob.exists(containers::ATTACHMENTS, "a").await.unwrap());
        // second delete is a no-op, not an error
        assert!(!blob.delete(containers::ATTACHMENTS, "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_local_filesystem_backend() {
        let dir = tempfile::tempdir().unwrap();
        let blob = BlobStore::from_url(&format!("file://{}", dir.path().display())).unwrap();
        blob.put_text(containers::NOTIFICATION, "n1", "{}")
            .await
            .unwrap();
        assert_eq!(
            blob.get_text(containers::NOTIFICATION, "n1").await.unwrap(),
            "{}"
        );
    }

    #[test]
    fn test_query_param_parsing() {
        assert_eq!(
            parse_query_param("s3://b?endpoint=http%3A%2F%2Fminio%3A9000&region=eu", "endpoint")
                .as_deref(),
            Some("http://minio:9000")
        );
        assert_eq!(
            parse_query_param("s3://b?region=eu", "region").as_deref(),
            Some("eu")
        );
        assert_eq!(parse_query_param("s3://b", "region"), None);
    }
}
