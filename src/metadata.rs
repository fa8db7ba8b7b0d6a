//! Chunk naming and metadata validation
//!
//! Every `get` and `put` passes through [`chunk_metadata`], so a malformed
//! slice specification or an inconsistent payload is rejected here with
//! [`ChunkStoreError::MalformedRequest`] before any backend is touched.

use crate::error::{ChunkStoreError, Result};
use crate::types::{Chunk, DType};
use ndarray::SliceInfoElem;
use std::fmt::Write;

/// Separator between segments of an array name and between name and index
pub const NAME_SEPARATOR: &str = "/";

/// Separator between per-dimension start offsets in a chunk index
pub const INDEX_SEPARATOR: &str = "_";

/// Minimum number of digits of each start offset in a chunk index
pub const INDEX_WIDTH: usize = 5;

/// Key, shape and dtype of one chunk request.
///
/// Built by [`chunk_metadata`], which guarantees that the element and byte
/// counts fit in `usize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMetadata {
    /// Storage key, `<array_name>/<index>`
    pub key: String,
    /// Extent of the chunk in each dimension
    pub shape: Vec<usize>,
    /// Element type, if one was supplied or could be taken from the payload
    pub dtype: Option<DType>,
}

impl ChunkMetadata {
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    /// Size of the chunk buffer in bytes, if the dtype is known
    pub fn num_bytes(&self) -> Option<usize> {
        self.dtype.map(|dtype| self.num_elements() * dtype.itemsize())
    }
}

/// Start offset and extent of each dimension of a slice specification
fn slice_bounds(slices: &[SliceInfoElem]) -> Result<Vec<(usize, usize)>> {
    if slices.is_empty() {
        return Err(ChunkStoreError::malformed(
            "Slice specification must have at least one dimension",
        ));
    }
    slices
        .iter()
        .enumerate()
        .map(|(dim, elem)| match *elem {
            SliceInfoElem::Slice { start, end, step } => {
                if step != 1 {
                    return Err(ChunkStoreError::malformed(format!(
                        "Slice in dimension {} has step {} (only unit steps allowed)",
                        dim, step
                    )));
                }
                let end = end.ok_or_else(|| {
                    ChunkStoreError::malformed(format!(
                        "Slice in dimension {} has no stop offset",
                        dim
                    ))
                })?;
                if start < 0 || end <= start {
                    return Err(ChunkStoreError::malformed(format!(
                        "Slice {}..{} in dimension {} is not a non-empty forward range",
                        start, end, dim
                    )));
                }
                Ok((start as usize, (end - start) as usize))
            }
            SliceInfoElem::Index(index) => Err(ChunkStoreError::malformed(format!(
                "Scalar index {} in dimension {} is not a slice",
                index, dim
            ))),
            SliceInfoElem::NewAxis => Err(ChunkStoreError::malformed(format!(
                "New axis in dimension {} is not a slice",
                dim
            ))),
        })
        .collect()
}

fn format_key(array_name: &str, bounds: &[(usize, usize)]) -> String {
    let capacity = array_name.len() + bounds.len() * (INDEX_WIDTH + 1) + 1;
    let mut key = String::with_capacity(capacity);
    key.push_str(array_name);
    key.push_str(NAME_SEPARATOR);
    for (dim, (start, _)) in bounds.iter().enumerate() {
        if dim > 0 {
            key.push_str(INDEX_SEPARATOR);
        }
        // Writing to a String cannot fail
        let _ = write!(key, "{:0width$}", start, width = INDEX_WIDTH);
    }
    key
}

fn check_array_name(array_name: &str) -> Result<()> {
    if array_name.is_empty() {
        return Err(ChunkStoreError::malformed("Array name is empty"));
    }
    // Names must stay relative to the store root
    let bad_segment = array_name
        .split(NAME_SEPARATOR)
        .find(|segment| segment.is_empty() || *segment == "." || *segment == "..");
    if let Some(segment) = bad_segment {
        return Err(ChunkStoreError::malformed(format!(
            "Array name {:?} has invalid segment {:?}",
            array_name, segment
        )));
    }
    if array_name.contains('\\') {
        return Err(ChunkStoreError::malformed(format!(
            "Array name {:?} contains a backslash",
            array_name
        )));
    }
    Ok(())
}

/// Number of bytes held by a chunk of `shape`, or `None` on overflow
pub(crate) fn checked_num_bytes(shape: &[usize], itemsize: usize) -> Option<usize> {
    shape
        .iter()
        .try_fold(itemsize, |total, &extent| total.checked_mul(extent))
}

/// Storage key of the chunk of `array_name` covered by `slices`.
///
/// The index part holds the start offset of every dimension, zero-padded to
/// [`INDEX_WIDTH`] digits and joined by [`INDEX_SEPARATOR`]:
/// `x` with slices `[1..4, 512..1024]` becomes `x/00001_00512`.
pub fn chunk_name(array_name: &str, slices: &[SliceInfoElem]) -> Result<String> {
    check_array_name(array_name)?;
    let bounds = slice_bounds(slices)?;
    Ok(format_key(array_name, &bounds))
}

/// Validate a chunk request and derive its key, shape and dtype.
///
/// If `chunk` is given its shape must match the slices, its dtype must be
/// fixed-size and must equal `dtype` when both are supplied. If only `dtype`
/// is given it must be fixed-size.
pub fn chunk_metadata(
    array_name: &str,
    slices: &[SliceInfoElem],
    chunk: Option<&Chunk>,
    dtype: Option<&DType>,
) -> Result<ChunkMetadata> {
    check_array_name(array_name)?;
    let bounds = slice_bounds(slices)?;
    let shape: Vec<usize> = bounds.iter().map(|&(_, extent)| extent).collect();
    let dtype = match (chunk, dtype) {
        (Some(chunk), dtype) => {
            if chunk.shape() != shape.as_slice() {
                return Err(ChunkStoreError::malformed(format!(
                    "Chunk has shape {:?} but slice specification has shape {:?}",
                    chunk.shape(),
                    shape
                )));
            }
            if !chunk.dtype().is_fixed_size() {
                return Err(ChunkStoreError::malformed(format!(
                    "Chunk dtype {} is not a fixed-size element type",
                    chunk.dtype()
                )));
            }
            if let Some(dtype) = dtype {
                if dtype != chunk.dtype() {
                    return Err(ChunkStoreError::malformed(format!(
                        "Chunk dtype {} differs from requested dtype {}",
                        chunk.dtype(),
                        dtype
                    )));
                }
            }
            Some(*chunk.dtype())
        }
        (None, Some(dtype)) => {
            if !dtype.is_fixed_size() {
                return Err(ChunkStoreError::malformed(format!(
                    "Requested dtype {} is not a fixed-size element type",
                    dtype
                )));
            }
            Some(*dtype)
        }
        (None, None) => None,
    };
    let itemsize = dtype.map_or(1, |dtype| dtype.itemsize());
    if checked_num_bytes(&shape, itemsize).is_none() {
        return Err(ChunkStoreError::malformed(format!(
            "Chunk of shape {:?} with {}-byte elements is too large to address",
            shape, itemsize
        )));
    }
    Ok(ChunkMetadata {
        key: format_key(array_name, &bounds),
        shape,
        dtype,
    })
}

/// Join name segments into a hierarchical array name
pub fn join<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(|name| name.as_ref())
        .collect::<Vec<_>>()
        .join(NAME_SEPARATOR)
}

/// Build a slice specification from half-open ranges
pub fn slices_from_ranges(ranges: &[std::ops::Range<usize>]) -> Vec<SliceInfoElem> {
    ranges.iter().cloned().map(SliceInfoElem::from).collect()
}
