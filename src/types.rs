//! Core data types: element types and chunk payloads

use crate::error::{ChunkStoreError, Result};
use crate::metadata::checked_num_bytes;
use bytes::Bytes;
use ndarray::{ArrayBase, ArrayD, Data, Dimension, IxDyn};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Byte order of multi-byte elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    /// Little endian (`<`)
    Little,
    /// Big endian (`>`)
    Big,
    /// Not applicable to single-byte elements (`|`)
    NotApplicable,
}

impl ByteOrder {
    /// Byte order of the host
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }

    fn symbol(&self) -> char {
        match self {
            ByteOrder::Little => '<',
            ByteOrder::Big => '>',
            ByteOrder::NotApplicable => '|',
        }
    }
}

/// Kind of element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DTypeKind {
    /// Boolean stored as one byte
    Bool,
    /// Signed integer
    Int,
    /// Unsigned integer
    UInt,
    /// IEEE floating point
    Float,
    /// Pair of IEEE floats
    Complex,
    /// Reference to an arbitrary object. Variable-sized and reference-like
    /// elements all fall in this kind; they cannot be stored in a chunk.
    Object,
}

impl DTypeKind {
    fn code(&self) -> char {
        match self {
            DTypeKind::Bool => 'b',
            DTypeKind::Int => 'i',
            DTypeKind::UInt => 'u',
            DTypeKind::Float => 'f',
            DTypeKind::Complex => 'c',
            DTypeKind::Object => 'O',
        }
    }

    fn from_code(code: char) -> Option<Self> {
        match code {
            'b' | '?' => Some(DTypeKind::Bool),
            'i' => Some(DTypeKind::Int),
            'u' => Some(DTypeKind::UInt),
            'f' => Some(DTypeKind::Float),
            'c' => Some(DTypeKind::Complex),
            'O' => Some(DTypeKind::Object),
            _ => None,
        }
    }

    fn valid_itemsize(&self, itemsize: usize) -> bool {
        match self {
            DTypeKind::Bool => itemsize == 1,
            DTypeKind::Int | DTypeKind::UInt => matches!(itemsize, 1 | 2 | 4 | 8),
            DTypeKind::Float => matches!(itemsize, 4 | 8),
            DTypeKind::Complex => matches!(itemsize, 8 | 16),
            DTypeKind::Object => itemsize == OBJECT_ITEMSIZE,
        }
    }
}

const OBJECT_ITEMSIZE: usize = std::mem::size_of::<usize>();

/// Element type of a chunk, written in numpy type-string notation
/// (`<f4`, `|u1`, `>c8`, `|O`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DType {
    kind: DTypeKind,
    itemsize: usize,
    byte_order: ByteOrder,
}

impl DType {
    /// Create a dtype, validating the kind/size combination
    pub fn new(kind: DTypeKind, itemsize: usize, byte_order: ByteOrder) -> Result<Self> {
        if !kind.valid_itemsize(itemsize) {
            return Err(ChunkStoreError::malformed(format!(
                "Unsupported item size {} for element kind '{}'",
                itemsize,
                kind.code()
            )));
        }
        let byte_order = if itemsize == 1 || kind == DTypeKind::Object {
            ByteOrder::NotApplicable
        } else if byte_order == ByteOrder::NotApplicable {
            ByteOrder::native()
        } else {
            byte_order
        };
        Ok(Self {
            kind,
            itemsize,
            byte_order,
        })
    }

    /// Create a dtype in native byte order
    pub fn native(kind: DTypeKind, itemsize: usize) -> Result<Self> {
        Self::new(kind, itemsize, ByteOrder::native())
    }

    /// The reference-like object dtype (`|O`)
    pub fn object() -> Self {
        Self {
            kind: DTypeKind::Object,
            itemsize: OBJECT_ITEMSIZE,
            byte_order: ByteOrder::NotApplicable,
        }
    }

    pub fn kind(&self) -> DTypeKind {
        self.kind
    }

    /// Size of one element in bytes
    pub fn itemsize(&self) -> usize {
        self.itemsize
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    /// Whether every element is a flat, fixed-size run of bytes
    pub fn is_fixed_size(&self) -> bool {
        self.kind != DTypeKind::Object
    }

    /// Whether elements can be read without swapping bytes on this host
    pub fn is_native_order(&self) -> bool {
        self.byte_order == ByteOrder::NotApplicable || self.byte_order == ByteOrder::native()
    }

    /// Same dtype in host byte order
    pub fn to_native_order(&self) -> Self {
        if self.is_native_order() {
            *self
        } else {
            Self {
                byte_order: ByteOrder::native(),
                ..*self
            }
        }
    }

    /// Width of the units whose bytes get reversed when changing byte order
    fn swap_unit(&self) -> usize {
        match self.kind {
            DTypeKind::Complex => self.itemsize / 2,
            _ => self.itemsize,
        }
    }

    /// numpy type string of this dtype
    pub fn descr(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.kind == DTypeKind::Object {
            write!(f, "|O")
        } else {
            write!(f, "{}{}{}", self.byte_order.symbol(), self.kind.code(), self.itemsize)
        }
    }
}

impl FromStr for DType {
    type Err = ChunkStoreError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ChunkStoreError::malformed(format!("Invalid dtype string {:?}", s));
        let mut chars = s.chars().peekable();
        let byte_order = match chars.peek() {
            Some('<') => Some(ByteOrder::Little),
            Some('>') => Some(ByteOrder::Big),
            Some('|') => Some(ByteOrder::NotApplicable),
            Some('=') => Some(ByteOrder::native()),
            _ => None,
        };
        if byte_order.is_some() {
            chars.next();
        }
        let kind = chars
            .next()
            .and_then(DTypeKind::from_code)
            .ok_or_else(invalid)?;
        let digits: String = chars.collect();
        let itemsize = if digits.is_empty() {
            match kind {
                DTypeKind::Object => OBJECT_ITEMSIZE,
                DTypeKind::Bool => 1,
                _ => return Err(invalid()),
            }
        } else {
            digits.parse::<usize>().map_err(|_| invalid())?
        };
        DType::new(kind, itemsize, byte_order.unwrap_or_else(ByteOrder::native))
    }
}

impl TryFrom<String> for DType {
    type Error = ChunkStoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<DType> for String {
    fn from(dtype: DType) -> Self {
        dtype.to_string()
    }
}

/// Rust element types that can be stored in a chunk
pub trait Element: Copy + Send + Sync + 'static {
    /// dtype of this element in host byte order
    fn dtype() -> DType;

    /// Decode one element from exactly `itemsize` host-order bytes
    fn from_ne_slice(bytes: &[u8]) -> Self;

    /// Append the host-order bytes of this element
    fn extend_ne_bytes(&self, out: &mut Vec<u8>);
}

macro_rules! impl_element {
    ($t:ty, $kind:expr) => {
        impl Element for $t {
            fn dtype() -> DType {
                DType {
                    kind: $kind,
                    itemsize: std::mem::size_of::<$t>(),
                    byte_order: if std::mem::size_of::<$t>() == 1 {
                        ByteOrder::NotApplicable
                    } else {
                        ByteOrder::native()
                    },
                }
            }

            fn from_ne_slice(bytes: &[u8]) -> Self {
                let mut buf = [0u8; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_ne_bytes(buf)
            }

            fn extend_ne_bytes(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }
        }
    };
}

impl_element!(u8, DTypeKind::UInt);
impl_element!(u16, DTypeKind::UInt);
impl_element!(u32, DTypeKind::UInt);
impl_element!(u64, DTypeKind::UInt);
impl_element!(i8, DTypeKind::Int);
impl_element!(i16, DTypeKind::Int);
impl_element!(i32, DTypeKind::Int);
impl_element!(i64, DTypeKind::Int);
impl_element!(f32, DTypeKind::Float);
impl_element!(f64, DTypeKind::Float);

impl Element for bool {
    fn dtype() -> DType {
        DType {
            kind: DTypeKind::Bool,
            itemsize: 1,
            byte_order: ByteOrder::NotApplicable,
        }
    }

    fn from_ne_slice(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }

    fn extend_ne_bytes(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
}

macro_rules! impl_complex_element {
    ($t:ty) => {
        impl Element for Complex<$t> {
            fn dtype() -> DType {
                DType {
                    kind: DTypeKind::Complex,
                    itemsize: 2 * std::mem::size_of::<$t>(),
                    byte_order: ByteOrder::native(),
                }
            }

            fn from_ne_slice(bytes: &[u8]) -> Self {
                let (re, im) = bytes.split_at(std::mem::size_of::<$t>());
                Complex::new(<$t>::from_ne_slice(re), <$t>::from_ne_slice(im))
            }

            fn extend_ne_bytes(&self, out: &mut Vec<u8>) {
                self.re.extend_ne_bytes(out);
                self.im.extend_ne_bytes(out);
            }
        }
    };
}

impl_complex_element!(f32);
impl_complex_element!(f64);

/// Raw data of one chunk: a flat C-order buffer of `shape` elements of `dtype`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    dtype: DType,
    shape: Vec<usize>,
    data: Bytes,
}

impl Chunk {
    /// Wrap a raw buffer, checking that its length matches shape and dtype
    pub fn new(dtype: DType, shape: Vec<usize>, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let expected = checked_num_bytes(&shape, dtype.itemsize()).ok_or_else(|| {
            ChunkStoreError::malformed(format!(
                "Chunk of shape {:?} and dtype {} is too large to address",
                shape, dtype
            ))
        })?;
        if data.len() != expected {
            return Err(ChunkStoreError::malformed(format!(
                "Buffer of {} bytes does not hold a {:?} chunk of {} ({} bytes expected)",
                data.len(),
                shape,
                dtype,
                expected
            )));
        }
        Ok(Self { dtype, shape, data })
    }

    /// Copy a typed array into a chunk (in logical C order, whatever its layout)
    pub fn from_array<T, S, D>(array: &ArrayBase<S, D>) -> Self
    where
        T: Element,
        S: Data<Elem = T>,
        D: Dimension,
    {
        let dtype = T::dtype();
        let mut data = Vec::with_capacity(array.len() * dtype.itemsize());
        for value in array.iter() {
            value.extend_ne_bytes(&mut data);
        }
        Self {
            dtype,
            shape: array.shape().to_vec(),
            data: Bytes::from(data),
        }
    }

    /// Build a chunk from C-ordered values
    pub fn from_vec<T: Element>(shape: Vec<usize>, values: &[T]) -> Result<Self> {
        let dtype = T::dtype();
        let mut data = Vec::with_capacity(values.len() * dtype.itemsize());
        for value in values {
            value.extend_ne_bytes(&mut data);
        }
        Self::new(dtype, shape, data)
    }

    pub fn dtype(&self) -> &DType {
        &self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Raw element bytes
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the buffer in bytes
    pub fn nbytes(&self) -> usize {
        self.data.len()
    }

    /// Same values with elements in host byte order
    pub fn to_native_order(&self) -> Chunk {
        if self.dtype.is_native_order() {
            return self.clone();
        }
        let unit = self.dtype.swap_unit();
        let mut data = self.data.to_vec();
        for word in data.chunks_exact_mut(unit) {
            word.reverse();
        }
        Chunk {
            dtype: self.dtype.to_native_order(),
            shape: self.shape.clone(),
            data: Bytes::from(data),
        }
    }

    /// Decode the elements as `T` in C order
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        let native = self.to_native_order();
        if native.dtype != T::dtype() {
            return Err(ChunkStoreError::malformed(format!(
                "Chunk of dtype {} cannot be read as {}",
                self.dtype,
                T::dtype()
            )));
        }
        Ok(native
            .data
            .chunks_exact(native.dtype.itemsize())
            .map(T::from_ne_slice)
            .collect())
    }

    /// Decode the chunk into a typed array of its shape
    pub fn to_array<T: Element>(&self) -> Result<ArrayD<T>> {
        let values = self.to_vec::<T>()?;
        Ok(ArrayD::from_shape_vec(IxDyn(&self.shape), values)?)
    }
}
