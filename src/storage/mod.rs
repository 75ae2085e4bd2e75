//! Object storage access for task inputs and outputs (`gs://`, `s3://`, `memory://`).
//!
//! Stores are keyed by `scheme://bucket`. Cloud stores are built from the
//! environment the first time a bucket is touched; tests register explicit
//! stores (in-memory, MinIO) with [`StorageClient::register`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use object_store::ObjectStore;
use object_store::path::Path;
use tracing::debug;

/// A parsed object URI: `scheme://bucket/key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub scheme: String,
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn parse(uri: &str) -> Result<Self> {
        let parsed = url::Url::parse(uri).with_context(|| format!("parsing object URI {uri}"))?;
        let bucket = parsed
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("no bucket in object URI: {uri}"))?;
        let key = parsed.path().trim_start_matches('/').to_string();
        Ok(Self {
            scheme: parsed.scheme().to_string(),
            bucket: bucket.to_string(),
            key,
        })
    }

    /// `scheme://bucket`, the key stores are registered under.
    pub fn root(&self) -> String {
        format!("{}://{}", self.scheme, self.bucket)
    }

    fn path(&self) -> Path {
        Path::from(self.key.as_str())
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.root(), self.key)
    }
}

/// Client for reading and writing small text objects by URI.
#[derive(Default)]
pub struct StorageClient {
    stores: Mutex<BTreeMap<String, Arc<dyn ObjectStore>>>,
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let roots: Vec<String> = self
            .stores
            .lock()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("StorageClient")
            .field("stores", &roots)
            .finish()
    }
}

impl StorageClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose `memory://<bucket>` is backed by a fresh in-memory store.
    pub fn in_memory(bucket: &str) -> Self {
        let client = Self::new();
        client.register(
            &format!("memory://{bucket}"),
            Arc::new(object_store::memory::InMemory::new()),
        );
        client
    }

    /// Use `store` for every URI under `root` (`scheme://bucket`).
    pub fn register(&self, root: &str, store: Arc<dyn ObjectStore>) {
        let root = root.trim_end_matches('/').to_string();
        if let Ok(mut stores) = self.stores.lock() {
            stores.insert(root, store);
        }
    }

    fn store_for(&self, location: &ObjectLocation) -> Result<Arc<dyn ObjectStore>> {
        let root = location.root();
        let mut stores = self
            .stores
            .lock()
            .map_err(|e| anyhow::anyhow!("storage client lock poisoned: {e}"))?;
        if let Some(store) = stores.get(&root) {
            return Ok(Arc::clone(store));
        }
        let store = build_store(&location.scheme, &location.bucket)?;
        stores.insert(root, Arc::clone(&store));
        Ok(store)
    }

    /// Create or overwrite the object at `uri` with `text`.
    pub async fn put_string(&self, text: &str, uri: &str) -> Result<()> {
        self.put_bytes(text.as_bytes().to_vec(), uri).await
    }

    pub async fn put_bytes(&self, content: Vec<u8>, uri: &str) -> Result<()> {
        let location = ObjectLocation::parse(uri)?;
        let store = self.store_for(&location)?;
        debug!(uri, bytes = content.len(), "writing object");
        store
            .put(&location.path(), content.into())
            .await
            .with_context(|| format!("writing object: {location}"))?;
        Ok(())
    }

    pub async fn get_bytes(&self, uri: &str) -> Result<Vec<u8>> {
        let location = ObjectLocation::parse(uri)?;
        let store = self.store_for(&location)?;
        let result = store
            .get(&location.path())
            .await
            .with_context(|| format!("reading object: {location}"))?;
        Ok(result.bytes().await?.to_vec())
    }

    pub async fn get_string(&self, uri: &str) -> Result<String> {
        let bytes = self.get_bytes(uri).await?;
        String::from_utf8(bytes).with_context(|| format!("object {uri} is not valid UTF-8"))
    }

    pub async fn exists(&self, uri: &str) -> Result<bool> {
        let location = ObjectLocation::parse(uri)?;
        let store = self.store_for(&location)?;
        match store.head(&location.path()).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(anyhow::Error::new(e).context(format!("checking object: {location}"))),
        }
    }

    /// Delete the object at `uri`. Missing objects are not an error.
    pub async fn remove(&self, uri: &str) -> Result<()> {
        let location = ObjectLocation::parse(uri)?;
        let store = self.store_for(&location)?;
        match store.delete(&location.path()).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(anyhow::Error::new(e).context(format!("deleting object: {location}"))),
        }
    }
}

fn build_store(scheme: &str, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    match scheme {
        "gs" | "gcs" => build_gcs_store(bucket),
        "s3" => build_s3_store(bucket),
        "memory" => anyhow::bail!("no in-memory store registered for memory://{bucket}"),
        other => anyhow::bail!("unsupported object store URL scheme: {other}"),
    }
}

#[cfg(feature = "gcs")]
fn build_gcs_store(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    let store = object_store::gcp::GoogleCloudStorageBuilder::from_env()
        .with_bucket_name(bucket)
        .build()
        .context("building GCS object store")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "gcs"))]
fn build_gcs_store(_bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    anyhow::bail!("GCS requires the 'gcs' feature flag")
}

#[cfg(feature = "aws")]
fn build_s3_store(bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    let store = object_store::aws::AmazonS3Builder::from_env()
        .with_bucket_name(bucket)
        .build()
        .context("building S3 object store")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "aws"))]
fn build_s3_store(_bucket: &str) -> Result<Arc<dyn ObjectStore>> {
    anyhow::bail!("S3 requires the 'aws' feature flag")
}
