//! Chunk store backed by a directory of NPY files
//!
//! Each chunk lives in its own file in NumPy `.npy` format at
//! `<root>/<array>/<index>.npy`. The NPY header records shape and dtype, so
//! the dtype passed to `get` only serves to validate the request.

use crate::error::{ChunkStoreError, ErrorMap, Result, StandardError};
use crate::metadata::{checked_num_bytes, chunk_metadata};
use crate::store::{ChunkStore, StorageBackend};
use crate::types::{Chunk, DType, DTypeKind};
use async_trait::async_trait;
use ndarray::SliceInfoElem;
use npyz::WriterBuilder;
use num_complex::Complex;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// File extension of chunk files
pub const NPY_EXTENSION: &str = "npy";

/// Chunk store keeping every chunk in a separate NPY file
#[derive(Debug)]
pub struct NpyFileChunkStore {
    base_path: PathBuf,
    error_map: ErrorMap<io::ErrorKind>,
    // A missing file on write means the directory tree is gone, not the chunk
    put_error_map: ErrorMap<io::ErrorKind>,
}

impl NpyFileChunkStore {
    /// Open the store rooted at `base_path`, which must be an existing directory
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        if !base_path.is_dir() {
            return Err(ChunkStoreError::standard(
                StandardError::StoreUnavailable,
                None,
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("Directory {} does not exist", base_path.display()),
                ),
            ));
        }
        log::info!("Opened NPY chunk store at {}", base_path.display());
        Ok(Self {
            base_path,
            error_map: ErrorMap::new()
                .with(io::ErrorKind::NotFound, StandardError::ChunkNotFound)
                .with(io::ErrorKind::TimedOut, StandardError::StoreUnavailable),
            put_error_map: ErrorMap::new()
                .with(io::ErrorKind::NotFound, StandardError::StoreUnavailable)
                .with(io::ErrorKind::TimedOut, StandardError::StoreUnavailable),
        })
    }

    /// Root directory of the store
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the path of the file holding the chunk with `key`
    pub fn chunk_path(&self, key: &str) -> PathBuf {
        self.base_path.join(format!("{}.{}", key, NPY_EXTENSION))
    }
}

#[async_trait]
impl ChunkStore for NpyFileChunkStore {
    async fn get(
        &self,
        array_name: &str,
        slices: &[SliceInfoElem],
        dtype: &DType,
    ) -> Result<Chunk> {
        let meta = chunk_metadata(array_name, slices, None, Some(dtype))?;
        let path = self.chunk_path(&meta.key);
        log::debug!("Reading chunk {} from {}", meta.key, path.display());
        let bytes = self.error_map.translate(fs::read(&path).await, Some(&meta.key))?;
        let chunk = decode_npy(&bytes)?;
        if chunk.shape() != meta.shape.as_slice() {
            return Err(ChunkStoreError::InvalidFormat(format!(
                "{} holds shape {:?} but chunk {} has shape {:?}",
                path.display(),
                chunk.shape(),
                meta.key,
                meta.shape
            )));
        }
        if chunk.dtype().to_native_order() != dtype.to_native_order() {
            log::warn!(
                "Chunk {} is stored as {} but was requested as {}",
                meta.key,
                chunk.dtype(),
                dtype
            );
        }
        Ok(chunk)
    }

    async fn put(
        &self,
        array_name: &str,
        slices: &[SliceInfoElem],
        chunk: &Chunk,
    ) -> Result<()> {
        let meta = chunk_metadata(array_name, slices, Some(chunk), None)?;
        let path = self.chunk_path(&meta.key);
        let encoded = encode_npy(chunk)?;
        log::debug!(
            "Writing chunk {} to {} ({} bytes)",
            meta.key,
            path.display(),
            encoded.len()
        );

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            self.put_error_map
                .translate(fs::create_dir_all(parent).await, Some(&meta.key))?;
        }

        // Write next to the target and rename, so readers never see a partial file
        let temp_path =
            path.with_extension(format!("{}.{}.tmp", NPY_EXTENSION, uuid::Uuid::new_v4()));
        let written = write_file(&temp_path, &encoded).await;
        let written = match written {
            Ok(()) => fs::rename(&temp_path, &path).await,
            Err(e) => Err(e),
        };
        if written.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        self.put_error_map.translate(written, Some(&meta.key))
    }

    fn backend(&self) -> StorageBackend {
        StorageBackend::Npy
    }
}

async fn write_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

/// Serialize a chunk as an NPY file in host byte order
pub fn encode_npy(chunk: &Chunk) -> Result<Vec<u8>> {
    let dtype = chunk.dtype();
    let encoded = match (dtype.kind(), dtype.itemsize()) {
        (DTypeKind::Bool, _) => write_npy::<bool>(chunk),
        (DTypeKind::UInt, 1) => write_npy::<u8>(chunk),
        (DTypeKind::UInt, 2) => write_npy::<u16>(chunk),
        (DTypeKind::UInt, 4) => write_npy::<u32>(chunk),
        (DTypeKind::UInt, 8) => write_npy::<u64>(chunk),
        (DTypeKind::Int, 1) => write_npy::<i8>(chunk),
        (DTypeKind::Int, 2) => write_npy::<i16>(chunk),
        (DTypeKind::Int, 4) => write_npy::<i32>(chunk),
        (DTypeKind::Int, 8) => write_npy::<i64>(chunk),
        (DTypeKind::Float, 4) => write_npy::<f32>(chunk),
        (DTypeKind::Float, 8) => write_npy::<f64>(chunk),
        (DTypeKind::Complex, 8) => write_npy::<Complex<f32>>(chunk),
        (DTypeKind::Complex, 16) => write_npy::<Complex<f64>>(chunk),
        _ => {
            return Err(ChunkStoreError::malformed(format!(
                "Cannot store dtype {} in an NPY file",
                dtype
            )))
        }
    };
    encoded.map_err(|e| ChunkStoreError::Backend(Box::new(e)))
}

fn write_npy<T>(chunk: &Chunk) -> io::Result<Vec<u8>>
where
    T: crate::types::Element + npyz::AutoSerialize,
{
    let values = chunk
        .to_vec::<T>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    let shape: Vec<u64> = chunk.shape().iter().map(|&n| n as u64).collect();
    let mut buf = Vec::new();
    let mut writer = npyz::WriteOptions::<T>::new()
        .default_dtype()
        .shape(&shape)
        .writer(&mut buf)
        .begin_nd()?;
    for value in &values {
        writer.push(value)?;
    }
    writer.finish()?;
    Ok(buf)
}

/// Parse an NPY file holding a C-ordered array of a plain dtype
pub fn decode_npy(bytes: &[u8]) -> Result<Chunk> {
    let npy = npyz::NpyFile::new(bytes)
        .map_err(|e| ChunkStoreError::InvalidFormat(format!("Bad NPY header: {}", e)))?;
    let invalid = |e: ChunkStoreError| ChunkStoreError::InvalidFormat(e.to_string());
    let dtype: DType = match npy.dtype() {
        npyz::DType::Plain(type_str) => type_str.to_string().parse().map_err(invalid)?,
        other => {
            return Err(ChunkStoreError::InvalidFormat(format!(
                "Unsupported NPY dtype {:?}",
                other
            )))
        }
    };
    if !matches!(npy.order(), npyz::Order::C) {
        return Err(ChunkStoreError::InvalidFormat(
            "Fortran-ordered NPY data is not supported".to_string(),
        ));
    }
    let shape = npy
        .shape()
        .iter()
        .map(|&n| usize::try_from(n).ok())
        .collect::<Option<Vec<usize>>>();
    let num_bytes = shape
        .as_deref()
        .and_then(|shape| checked_num_bytes(shape, dtype.itemsize()));
    let (shape, num_bytes) = match (shape, num_bytes) {
        (Some(shape), Some(num_bytes)) => (shape, num_bytes),
        _ => {
            return Err(ChunkStoreError::InvalidFormat(format!(
                "NPY shape {:?} is too large to address",
                npy.shape()
            )))
        }
    };
    // Array data is the tail of the file, right after the header
    if bytes.len() < num_bytes {
        return Err(ChunkStoreError::InvalidFormat(format!(
            "NPY file is truncated: {} bytes for {} bytes of data",
            bytes.len(),
            num_bytes
        )));
    }
    let data = bytes[bytes.len() - num_bytes..].to_vec();
    Chunk::new(dtype, shape, data).map_err(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::slices_from_ranges;
    use ndarray::{arr1, Array};
    use tempfile::TempDir;

    #[test]
    fn test_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let err = NpyFileChunkStore::new(temp_dir.path().join("missing")).unwrap_err();
        match err {
            ChunkStoreError::StoreUnavailable { source, .. } => {
                let io_err = source.downcast_ref::<io::Error>().unwrap();
                assert_eq!(io_err.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_npy_codec() {
        let array =
            Array::from_shape_vec((2, 3), (0..6).map(|i| i as f64 * 0.5).collect()).unwrap();
        let chunk = Chunk::from_array(&array);
        let encoded = encode_npy(&chunk).unwrap();
        assert_eq!(&encoded[..6], b"\x93NUMPY");
        assert_eq!(decode_npy(&encoded).unwrap(), chunk);
    }

    #[test]
    fn test_npy_codec_readable_by_npyz() {
        let chunk = Chunk::from_array(&arr1(&[7i16, -8, 9]));
        let encoded = encode_npy(&chunk).unwrap();
        let npy = npyz::NpyFile::new(&encoded[..]).unwrap();
        assert_eq!(npy.shape(), &[3u64]);
        assert_eq!(npy.into_vec::<i16>().unwrap(), vec![7, -8, 9]);
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode_npy(b"not an npy file"),
            Err(ChunkStoreError::InvalidFormat(_))
        ));
    }

    #[tokio::test]
    async fn test_file_layout() {
        let temp_dir = TempDir::new().unwrap();
        let store = NpyFileChunkStore::new(temp_dir.path()).unwrap();
        let chunk = Chunk::from_array(&arr1(&[1u8, 2, 3]));
        let slices = slices_from_ranges(&[3..6]);
        store.put("cb1/flags", &slices, &chunk).await.unwrap();

        let path = temp_dir.path().join("cb1").join("flags").join("00003.npy");
        assert!(path.is_file());
        assert_eq!(store.chunk_path("cb1/flags/00003"), path);

        // Only the chunk file remains after the rename
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_get_shape_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let store = NpyFileChunkStore::new(temp_dir.path()).unwrap();
        let chunk = Chunk::from_array(&arr1(&[1u8, 2, 3]));
        store.put("x", &slices_from_ranges(&[0..3]), &chunk).await.unwrap();

        // Same start offset, different extent: same file, wrong shape
        let err = store
            .get("x", &slices_from_ranges(&[0..4]), chunk.dtype())
            .await
            .unwrap_err();
        assert!(matches!(err, ChunkStoreError::InvalidFormat(_)));
    }

    /// NPY version 1.0 file with a hand-written header and raw data
    fn npy_v1(descr: &str, shape: &str, data: &[u8]) -> Vec<u8> {
        let mut header = format!(
            "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
            descr, shape
        );
        // Magic, version and header length take 10 bytes
        while (10 + header.len() + 1) % 64 != 0 {
            header.push(' ');
        }
        header.push('\n');
        let mut bytes = b"\x93NUMPY\x01\x00".to_vec();
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn test_decode_unsupported_dtype() {
        let half = npy_v1("<f2", "(2,)", &[0, 60, 0, 64]);
        let err = decode_npy(&half).unwrap_err();
        assert!(matches!(err, ChunkStoreError::InvalidFormat(_)), "got {err:?}");
    }

    #[test]
    fn test_decode_oversized_shape() {
        let huge = npy_v1("<f8", "(2147483648, 2147483648)", &[0; 16]);
        let err = decode_npy(&huge).unwrap_err();
        assert!(matches!(err, ChunkStoreError::InvalidFormat(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_get_unsupported_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = NpyFileChunkStore::new(temp_dir.path()).unwrap();
        std::fs::create_dir(temp_dir.path().join("x")).unwrap();
        std::fs::write(
            temp_dir.path().join("x").join("00000.npy"),
            npy_v1("<f2", "(2,)", &[0, 60, 0, 64]),
        )
        .unwrap();

        let err = store
            .get("x", &slices_from_ranges(&[0..2]), &"<f4".parse().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ChunkStoreError::InvalidFormat(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_names_stay_inside_root() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        std::fs::create_dir(&root).unwrap();
        let store = NpyFileChunkStore::new(&root).unwrap();
        let chunk = Chunk::from_array(&arr1(&[1u8, 2, 3]));
        let slices = slices_from_ranges(&[0..3]);

        let outside = temp_dir.path().join("outside");
        let outside = outside.to_str().unwrap();
        for name in ["../sibling", "x/../../sibling", outside, "/x"] {
            let err = store.put(name, &slices, &chunk).await.unwrap_err();
            assert!(matches!(err, ChunkStoreError::MalformedRequest(_)), "{name}: {err:?}");
            let err = store.get(name, &slices, chunk.dtype()).await.unwrap_err();
            assert!(matches!(err, ChunkStoreError::MalformedRequest(_)), "{name}: {err:?}");
        }

        // Nothing was written next to the root
        let entries: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_put_failures_are_not_missing_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let store = NpyFileChunkStore::new(temp_dir.path()).unwrap();
        let chunk = Chunk::from_array(&arr1(&[1u8, 2, 3]));
        let slices = slices_from_ranges(&[0..3]);

        // A plain file where the array directory should be
        std::fs::write(temp_dir.path().join("cb1"), b"in the way").unwrap();
        let err = store.put("cb1/flags", &slices, &chunk).await.unwrap_err();
        assert!(
            !matches!(err, ChunkStoreError::ChunkNotFound { .. }),
            "got {err:?}"
        );

        // Missing paths during a write mean the store tree is gone
        let missing: io::Result<()> = Err(io::Error::from(io::ErrorKind::NotFound));
        let err = store
            .put_error_map
            .translate(missing, Some("cb1/flags/00000"))
            .unwrap_err();
        assert!(matches!(err, ChunkStoreError::StoreUnavailable { .. }));
        assert_eq!(err.key(), Some("cb1/flags/00000"));
    }
}
