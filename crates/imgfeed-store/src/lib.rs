#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! Packed on-disk image store.
//!
//! A [`PackedBlobStore`] is a fixed-capacity byte arena plus a prefix-sum offset index.
//! A [`NamedBlobCache`] wraps one store with a name index and knows how to build a
//! sharded directory from an image list and load a window of those shards back.

pub mod blob;
pub mod cache;
pub mod codec;
pub mod manifest;

use std::path::PathBuf;

use thiserror::Error;

pub use blob::{PackedBlobStore, StoreSummary};
pub use cache::{BuildConfig, BuildSummary, NamedBlobCache};
pub use codec::{DecodedImage, ImageDecoder, JpegRgbDecoder};
pub use manifest::{shard_data_path, shard_names_path, ShardManifest, MANIFEST_FILE_NAME};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob store already initialized")]
    AlreadyInitialized,
    #[error("blob store not initialized")]
    NotInitialized,
    #[error("failed to allocate blob arena of {capacity} bytes")]
    Allocation { capacity: u64 },
    #[error("cache overflow: {needed} bytes needed, capacity {capacity}")]
    CacheOverflow { needed: u64, capacity: u64 },
    #[error("record index {index} out of range (records={len})")]
    OutOfRange { index: usize, len: usize },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{path}: {names} names but {records} records")]
    SizeMismatch {
        path: PathBuf,
        names: usize,
        records: usize,
    },
    #[error("name not found: {0}")]
    NotFound(String),
    #[error("decode failed for {name}: {source}")]
    Decode {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("{path}: file too large ({size} bytes, max {max})")]
    FileTooLarge { path: PathBuf, size: u64, max: u64 },
    #[error("{path}: corrupt shard file: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// True for failures of the filesystem or of a shard file's contents.
    pub fn is_io(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Corrupt { .. })
    }
}
