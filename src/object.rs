//! Chunk store backed by an object store (S3, GCS, Azure, HTTP, local or in-memory)
//!
//! Each chunk is one object holding its raw element bytes, with object path
//! `<pool>/<array>/<index>`. Objects carry no header, so `get` relies on the
//! requested dtype and the slice shape to reinterpret the bytes.

use crate::error::{ChunkStoreError, ErrorMap, NativeError, Result, StandardError};
use crate::metadata::chunk_metadata;
use crate::store::{ChunkStore, StorageBackend};
use crate::types::{Chunk, DType};
use async_trait::async_trait;
use ndarray::SliceInfoElem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default client timeout in seconds
pub const DEFAULT_TIMEOUT: f64 = 5.0;

/// Categories of [`object_store::Error`] used in error maps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectErrorKind {
    NotFound,
    PermissionDenied,
    Unauthenticated,
    /// Transport and client failures (connection refused, timeouts, bad scheme)
    Generic,
    Other,
}

impl NativeError for object_store::Error {
    type Kind = ObjectErrorKind;

    fn native_kind(&self) -> ObjectErrorKind {
        match self {
            object_store::Error::NotFound { .. } => ObjectErrorKind::NotFound,
            object_store::Error::PermissionDenied { .. } => ObjectErrorKind::PermissionDenied,
            object_store::Error::Unauthenticated { .. } => ObjectErrorKind::Unauthenticated,
            object_store::Error::Generic { .. } => ObjectErrorKind::Generic,
            _ => ObjectErrorKind::Other,
        }
    }
}

/// Object store client options: a JSON file of options or an inline map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClusterConf {
    Path(PathBuf),
    Options(HashMap<String, String>),
}

fn default_timeout() -> Option<f64> {
    Some(DEFAULT_TIMEOUT)
}

/// Connection parameters of an [`ObjectChunkStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    /// Client options; must provide `url` (e.g. `s3://bucket`, `memory://`)
    pub conf: ClusterConf,
    /// Prefix under which all chunks of this store live
    #[serde(default)]
    pub pool: String,
    /// JSON file of credential options merged into `conf`
    #[serde(default)]
    pub keyring: Option<PathBuf>,
    /// Client timeout in seconds (`None` leaves the client default)
    #[serde(default = "default_timeout")]
    pub timeout: Option<f64>,
}

impl ObjectStoreConfig {
    /// Configuration for a bare store URL, with the URL path as pool
    pub fn from_url(url: &str) -> Self {
        let (root, pool) = match url.find("://") {
            Some(scheme_end) => {
                let rest = &url[scheme_end + 3..];
                match rest.find('/') {
                    Some(slash) => (
                        &url[..=scheme_end + 3 + slash],
                        rest[slash + 1..].trim_matches('/'),
                    ),
                    None => (url, ""),
                }
            }
            None => (url, ""),
        };
        let mut options = HashMap::new();
        options.insert("url".to_string(), root.to_string());
        Self {
            conf: ClusterConf::Options(options),
            pool: pool.to_string(),
            keyring: None,
            timeout: default_timeout(),
        }
    }

    /// Resolve the full set of client options, including credentials and timeout
    pub fn options(&self) -> Result<HashMap<String, String>> {
        let mut options = match &self.conf {
            ClusterConf::Options(options) => options.clone(),
            ClusterConf::Path(path) => read_options(path)?,
        };
        if let Some(keyring) = &self.keyring {
            options.extend(read_options(keyring)?);
        }
        if let Some(timeout) = self.timeout {
            if !(timeout.is_finite() && timeout > 0.0) {
                return Err(ChunkStoreError::Configuration(format!(
                    "Invalid timeout {} seconds",
                    timeout
                )));
            }
            let millis = (timeout * 1000.0).round() as u64;
            options.insert("timeout".to_string(), format!("{}ms", millis));
        }
        Ok(options)
    }
}

fn read_options(path: &Path) -> Result<HashMap<String, String>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ChunkStoreError::standard(StandardError::StoreUnavailable, None, e)
    })?;
    Ok(serde_json::from_str(&text)?)
}

/// Chunk store keeping each chunk as a raw object
#[derive(Debug)]
pub struct ObjectChunkStore {
    store: Arc<dyn ObjectStore>,
    pool: ObjectPath,
    error_map: ErrorMap<ObjectErrorKind>,
}

impl ObjectChunkStore {
    /// Connect to the object store described by `config`
    pub async fn connect(config: &ObjectStoreConfig) -> Result<Self> {
        let mut options = config.options()?;
        let url = options.remove("url").ok_or_else(|| {
            ChunkStoreError::Configuration("Object store options lack a url".to_string())
        })?;
        let url = url::Url::parse(&url)
            .map_err(|e| ChunkStoreError::Configuration(format!("Invalid url {:?}: {}", url, e)))?;
        let error_map = Self::connection_error_map();
        let (store, root) = error_map.translate(object_store::parse_url_opts(&url, options), None)?;
        let pool = join_path(&root, &config.pool);
        Self::open(Arc::from(store), pool, error_map).await
    }

    /// Use an existing object store client, keeping chunks under `pool`
    pub async fn from_store(store: Arc<dyn ObjectStore>, pool: &str) -> Result<Self> {
        let pool = join_path(&ObjectPath::default(), pool);
        Self::open(store, pool, Self::connection_error_map()).await
    }

    fn connection_error_map() -> ErrorMap<ObjectErrorKind> {
        // Until connected, a missing object means a missing bucket or pool
        ErrorMap::new()
            .with(ObjectErrorKind::Generic, StandardError::StoreUnavailable)
            .with(ObjectErrorKind::NotFound, StandardError::StoreUnavailable)
            .with(ObjectErrorKind::PermissionDenied, StandardError::StoreUnavailable)
            .with(ObjectErrorKind::Unauthenticated, StandardError::StoreUnavailable)
    }

    async fn open(
        store: Arc<dyn ObjectStore>,
        pool: ObjectPath,
        mut error_map: ErrorMap<ObjectErrorKind>,
    ) -> Result<Self> {
        let listing = store.list_with_delimiter(Some(&pool)).await;
        error_map.translate(listing, None)?;
        // From now on NotFound refers to chunk objects
        error_map.insert(ObjectErrorKind::NotFound, StandardError::ChunkNotFound);
        log::info!("Connected to object store {} (pool {:?})", store, pool.to_string());
        Ok(Self {
            store,
            pool,
            error_map,
        })
    }

    /// Object path of the chunk with `key`
    pub fn object_path(&self, key: &str) -> ObjectPath {
        join_path(&self.pool, key)
    }

    /// The underlying object store client
    pub fn inner(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }
}

fn join_path(base: &ObjectPath, suffix: &str) -> ObjectPath {
    let base_str = base.to_string();
    let suffix = suffix.trim_matches('/');
    match (base_str.is_empty(), suffix.is_empty()) {
        (_, true) => base.clone(),
        (true, false) => ObjectPath::from(suffix),
        (false, false) => ObjectPath::from(format!("{}/{}", base_str, suffix)),
    }
}

#[async_trait]
impl ChunkStore for ObjectChunkStore {
    async fn get(
        &self,
        array_name: &str,
        slices: &[SliceInfoElem],
        dtype: &DType,
    ) -> Result<Chunk> {
        let meta = chunk_metadata(array_name, slices, None, Some(dtype))?;
        let num_bytes = meta.num_elements() * dtype.itemsize();
        let location = self.object_path(&meta.key);
        log::debug!("Reading chunk {} from object {}", meta.key, location);
        let result = self
            .error_map
            .translate(self.store.get(&location).await, Some(&meta.key))?;
        let data = self
            .error_map
            .translate(result.bytes().await, Some(&meta.key))?;
        if data.len() != num_bytes {
            return Err(ChunkStoreError::InvalidFormat(format!(
                "Object {} has {} bytes but chunk {} of {:?} x {} needs {}",
                location,
                data.len(),
                meta.key,
                meta.shape,
                dtype,
                num_bytes
            )));
        }
        Chunk::new(*dtype, meta.shape, data)
    }

    async fn put(
        &self,
        array_name: &str,
        slices: &[SliceInfoElem],
        chunk: &Chunk,
    ) -> Result<()> {
        let meta = chunk_metadata(array_name, slices, Some(chunk), None)?;
        let location = self.object_path(&meta.key);
        log::debug!("Writing chunk {} to object {} ({} bytes)", meta.key, location, chunk.nbytes());
        let payload = PutPayload::from(chunk.data().clone());
        self.error_map
            .translate(self.store.put(&location, payload).await, Some(&meta.key))?;
        Ok(())
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::ObjectStore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::slices_from_ranges;
    use crate::types::Element;
    use futures::stream::BoxStream;
    use object_store::memory::InMemory;
    use object_store::{
        GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta, PutMultipartOptions,
        PutOptions, PutResult,
    };
    use std::fmt;
    use tempfile::TempDir;

    /// In-memory store that can report its pool as missing when listed
    #[derive(Debug)]
    struct PoolStore {
        inner: InMemory,
        pool_missing: bool,
    }

    impl fmt::Display for PoolStore {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "PoolStore(pool_missing: {})", self.pool_missing)
        }
    }

    #[async_trait]
    impl ObjectStore for PoolStore {
        async fn put_opts(
            &self,
            location: &ObjectPath,
            payload: PutPayload,
            opts: PutOptions,
        ) -> object_store::Result<PutResult> {
            self.inner.put_opts(location, payload, opts).await
        }

        async fn put_multipart_opts(
            &self,
            location: &ObjectPath,
            opts: PutMultipartOptions,
        ) -> object_store::Result<Box<dyn MultipartUpload>> {
            self.inner.put_multipart_opts(location, opts).await
        }

        async fn get_opts(
            &self,
            location: &ObjectPath,
            options: GetOptions,
        ) -> object_store::Result<GetResult> {
            self.inner.get_opts(location, options).await
        }

        async fn delete(&self, location: &ObjectPath) -> object_store::Result<()> {
            self.inner.delete(location).await
        }

        fn list(
            &self,
            prefix: Option<&ObjectPath>,
        ) -> BoxStream<'static, object_store::Result<ObjectMeta>> {
            self.inner.list(prefix)
        }

        async fn list_with_delimiter(
            &self,
            prefix: Option<&ObjectPath>,
        ) -> object_store::Result<ListResult> {
            if self.pool_missing {
                return Err(object_store::Error::NotFound {
                    path: prefix.map(ToString::to_string).unwrap_or_default(),
                    source: "no such pool".into(),
                });
            }
            self.inner.list_with_delimiter(prefix).await
        }

        async fn copy(&self, from: &ObjectPath, to: &ObjectPath) -> object_store::Result<()> {
            self.inner.copy(from, to).await
        }

        async fn copy_if_not_exists(
            &self,
            from: &ObjectPath,
            to: &ObjectPath,
        ) -> object_store::Result<()> {
            self.inner.copy_if_not_exists(from, to).await
        }
    }

    #[test]
    fn test_config_from_url() {
        let config = ObjectStoreConfig::from_url("s3://bucket/my/pool/");
        assert_eq!(config.pool, "my/pool");
        match &config.conf {
            ClusterConf::Options(options) => assert_eq!(options["url"], "s3://bucket/"),
            other => panic!("unexpected conf {other:?}"),
        }

        let config = ObjectStoreConfig::from_url("memory:///");
        assert_eq!(config.pool, "");
        match &config.conf {
            ClusterConf::Options(options) => assert_eq!(options["url"], "memory:///"),
            other => panic!("unexpected conf {other:?}"),
        }
    }

    #[test]
    fn test_config_options() {
        let temp_dir = TempDir::new().unwrap();
        let conf_path = temp_dir.path().join("conf.json");
        let conf = r#"{"url": "s3://bucket", "aws_region": "af-south-1"}"#;
        std::fs::write(&conf_path, conf).unwrap();
        let keyring = temp_dir.path().join("keyring.json");
        std::fs::write(&keyring, r#"{"aws_access_key_id": "id"}"#).unwrap();

        let config: ObjectStoreConfig = serde_json::from_value(serde_json::json!({
            "conf": conf_path,
            "pool": "chunks",
            "keyring": keyring,
            "timeout": 2.5
        }))
        .unwrap();
        let options = config.options().unwrap();
        assert_eq!(options["url"], "s3://bucket");
        assert_eq!(options["aws_region"], "af-south-1");
        assert_eq!(options["aws_access_key_id"], "id");
        assert_eq!(options["timeout"], "2500ms");
    }

    #[test]
    fn test_config_defaults() {
        let config: ObjectStoreConfig =
            serde_json::from_str(r#"{"conf": {"url": "memory://"}}"#).unwrap();
        assert_eq!(config.pool, "");
        assert_eq!(config.timeout, Some(DEFAULT_TIMEOUT));
        let expected = HashMap::from([("url".to_string(), "memory://".to_string())]);
        assert_eq!(config.conf, ClusterConf::Options(expected));
    }

    #[test]
    fn test_missing_conf_file() {
        let config = ObjectStoreConfig {
            conf: ClusterConf::Path(PathBuf::from("/nonexistent/ceph.json")),
            pool: "pool".to_string(),
            keyring: None,
            timeout: None,
        };
        assert!(matches!(
            config.options(),
            Err(ChunkStoreError::StoreUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_memory_url() {
        let config = ObjectStoreConfig::from_url("memory:///");
        let store = ObjectChunkStore::connect(&config).await.unwrap();
        assert_eq!(store.backend(), StorageBackend::ObjectStore);
    }

    #[tokio::test]
    async fn test_connect_unsupported_scheme() {
        let config = ObjectStoreConfig::from_url("ceph://cluster/pool");
        let err = ObjectChunkStore::connect(&config).await.unwrap_err();
        assert!(matches!(err, ChunkStoreError::StoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_object_layout_and_missing_chunk() {
        let inner: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let store = ObjectChunkStore::from_store(inner.clone(), "pool").await.unwrap();
        let slices = slices_from_ranges(&[2..4, 0..1]);

        let err = store.get("x", &slices, &f64::dtype()).await.unwrap_err();
        assert!(matches!(err, ChunkStoreError::ChunkNotFound { .. }));
        assert_eq!(err.key(), Some("x/00002_00000"));

        let chunk = Chunk::from_vec(vec![2, 1], &[1.5f64, -1.5]).unwrap();
        store.put("x", &slices, &chunk).await.unwrap();
        let raw = inner
            .get(&ObjectPath::from("pool/x/00002_00000"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(raw, chunk.data().clone());
    }

    #[tokio::test]
    async fn test_missing_pool_then_missing_chunk() {
        let missing = Arc::new(PoolStore {
            inner: InMemory::new(),
            pool_missing: true,
        });
        let err = ObjectChunkStore::from_store(missing, "pool").await.unwrap_err();
        assert!(
            matches!(err, ChunkStoreError::StoreUnavailable { .. }),
            "got {err:?}"
        );
        assert_eq!(err.key(), None);

        // Once connected, the same native error means the chunk is absent
        let present = Arc::new(PoolStore {
            inner: InMemory::new(),
            pool_missing: false,
        });
        let store = ObjectChunkStore::from_store(present, "pool").await.unwrap();
        let slices = slices_from_ranges(&[0..2]);
        let err = store.get("x", &slices, &f64::dtype()).await.unwrap_err();
        assert!(
            matches!(err, ChunkStoreError::ChunkNotFound { .. }),
            "got {err:?}"
        );
        assert_eq!(err.key(), Some("x/00000"));
    }

    #[tokio::test]
    async fn test_byte_count_checked() {
        let store = ObjectChunkStore::from_store(Arc::new(InMemory::new()), "")
            .await
            .unwrap();
        let slices = slices_from_ranges(&[0..4]);
        let chunk = Chunk::from_vec(vec![4], &[1u16, 2, 3, 4]).unwrap();
        store.put("x", &slices, &chunk).await.unwrap();

        let err = store.get("x", &slices, &u32::dtype()).await.unwrap_err();
        assert!(matches!(err, ChunkStoreError::InvalidFormat(_)));
    }
}
