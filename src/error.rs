//! Error types for chunk store operations
//!
//! Every backend failure is normalised into one of two standard kinds,
//! [`ChunkStoreError::StoreUnavailable`] and [`ChunkStoreError::ChunkNotFound`],
//! through a per-store [`ErrorMap`]. Native failures that are not in the map
//! pass through as [`ChunkStoreError::Backend`].

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use thiserror::Error;

/// Boxed native error carried as the source of a standardized error
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for chunk store operations
#[derive(Error, Debug)]
pub enum ChunkStoreError {
    #[error("Store unavailable{}: {source}", describe_key(.key))]
    StoreUnavailable {
        key: Option<String>,
        #[source]
        source: BoxError,
    },

    #[error("Chunk not found{}: {source}", describe_key(.key))]
    ChunkNotFound {
        key: Option<String>,
        #[source]
        source: BoxError,
    },

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Backend error: {0}")]
    Backend(#[source] BoxError),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

fn describe_key(key: &Option<String>) -> String {
    match key {
        Some(key) => format!(" [chunk {key}]"),
        None => String::new(),
    }
}

/// Specialized Result type for chunk store operations
pub type Result<T> = std::result::Result<T, ChunkStoreError>;

impl ChunkStoreError {
    /// Shorthand for a [`ChunkStoreError::MalformedRequest`]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest(message.into())
    }

    /// Build the standardized variant of `kind` around a native error
    pub fn standard(kind: StandardError, key: Option<&str>, source: impl Into<BoxError>) -> Self {
        let key = key.map(str::to_string);
        let source = source.into();
        match kind {
            StandardError::StoreUnavailable => Self::StoreUnavailable { key, source },
            StandardError::ChunkNotFound => Self::ChunkNotFound { key, source },
        }
    }

    /// The standardized kind of this error, if it has one
    pub fn standard_kind(&self) -> Option<StandardError> {
        match self {
            Self::StoreUnavailable { .. } => Some(StandardError::StoreUnavailable),
            Self::ChunkNotFound { .. } => Some(StandardError::ChunkNotFound),
            _ => None,
        }
    }

    /// Chunk key attached to a standardized error
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::StoreUnavailable { key, .. } | Self::ChunkNotFound { key, .. } => key.as_deref(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ChunkStoreError {
    fn from(err: serde_json::Error) -> Self {
        ChunkStoreError::Serialization(err.to_string())
    }
}

impl From<ndarray::ShapeError> for ChunkStoreError {
    fn from(err: ndarray::ShapeError) -> Self {
        ChunkStoreError::MalformedRequest(err.to_string())
    }
}

/// The failure kinds a backend error can be translated into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardError {
    /// Backend unreachable, timed out or refused the connection
    StoreUnavailable,
    /// Backend reachable but the requested chunk has no data
    ChunkNotFound,
}

impl fmt::Display for StandardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StandardError::StoreUnavailable => write!(f, "StoreUnavailable"),
            StandardError::ChunkNotFound => write!(f, "ChunkNotFound"),
        }
    }
}

/// A backend-native error with a category that an [`ErrorMap`] can match on
pub trait NativeError: std::error::Error + Send + Sync + 'static {
    /// Category of native failures (e.g. [`std::io::ErrorKind`])
    type Kind: Copy + Eq + Hash + fmt::Debug;

    /// Category of this particular failure
    fn native_kind(&self) -> Self::Kind;
}

impl NativeError for std::io::Error {
    type Kind = std::io::ErrorKind;

    fn native_kind(&self) -> std::io::ErrorKind {
        self.kind()
    }
}

/// Table from native failure categories to standardized failure kinds
#[derive(Debug, Clone)]
pub struct ErrorMap<K> {
    entries: HashMap<K, StandardError>,
}

impl<K: Copy + Eq + Hash + fmt::Debug> Default for ErrorMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash + fmt::Debug> ErrorMap<K> {
    /// Create an empty map (every native failure passes through)
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Add an entry, builder style
    pub fn with(mut self, native: K, standard: StandardError) -> Self {
        self.entries.insert(native, standard);
        self
    }

    /// Add or replace an entry, returning the previous mapping
    pub fn insert(&mut self, native: K, standard: StandardError) -> Option<StandardError> {
        self.entries.insert(native, standard)
    }

    /// Look up the standardized kind for a native category
    pub fn get(&self, native: &K) -> Option<StandardError> {
        self.entries.get(native).copied()
    }

    /// Translate the outcome of a backend call.
    ///
    /// Success passes through untouched. A native error whose category is in
    /// the map becomes the mapped standardized error, tagged with `key`; any
    /// other native error is wrapped unchanged in [`ChunkStoreError::Backend`].
    pub fn translate<T, E>(&self, result: std::result::Result<T, E>, key: Option<&str>) -> Result<T>
    where
        E: NativeError<Kind = K>,
    {
        result.map_err(|err| match self.get(&err.native_kind()) {
            Some(kind) => ChunkStoreError::standard(kind, key, err),
            None => ChunkStoreError::Backend(Box::new(err)),
        })
    }
}
