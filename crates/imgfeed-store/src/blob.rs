use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tracing::debug;

use crate::StoreError;

const SUMMARY_HEAD_OFFSETS: usize = 20;

/// Append-only byte arena with a prefix-sum offset index.
///
/// Invariants:
/// - offsets[0] == 0
/// - offsets is non-decreasing
/// - offsets.last() == arena.len() <= capacity
///
/// Record `i` occupies `arena[offsets[i]..offsets[i + 1]]`.
///
/// On-disk layout (little-endian): `i32 N`, `(N + 1) x i64` offsets, then `offsets[N]`
/// payload bytes.
#[derive(Debug)]
pub struct PackedBlobStore {
    arena: Option<Vec<u8>>,
    offsets: Vec<u64>,
    capacity: u64,
}

impl Default for PackedBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PackedBlobStore {
    /// An uninitialized store; call [`PackedBlobStore::init`] before appending.
    pub fn new() -> Self {
        Self {
            arena: None,
            offsets: vec![0],
            capacity: 0,
        }
    }

    pub fn with_capacity(capacity: u64) -> Result<Self, StoreError> {
        let mut store = Self::new();
        store.init(capacity)?;
        Ok(store)
    }

    pub fn init(&mut self, capacity: u64) -> Result<(), StoreError> {
        if self.arena.is_some() {
            return Err(StoreError::AlreadyInitialized);
        }
        let cap = usize::try_from(capacity)
            .map_err(|_| StoreError::InvalidInput(format!("capacity {capacity} exceeds usize")))?;
        let mut arena = Vec::new();
        arena
            .try_reserve_exact(cap)
            .map_err(|_| StoreError::Allocation { capacity })?;
        self.arena = Some(arena);
        self.capacity = capacity;
        debug!(
            target: "imgfeed",
            event = "store_init",
            capacity,
            "blob arena allocated"
        );
        Ok(())
    }

    /// Frees the arena and resets the index. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.arena.take().is_some() {
            debug!(
                target: "imgfeed",
                event = "store_release",
                records = self.record_count() as u64,
                "blob arena released"
            );
        }
        self.offsets.clear();
        self.offsets.push(0);
        self.capacity = 0;
    }

    pub fn is_initialized(&self) -> bool {
        self.arena.is_some()
    }

    pub fn record_count(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.record_count() == 0
    }

    /// Bytes currently used.
    pub fn size(&self) -> u64 {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    fn ensure_fits(&self, extra: u64) -> Result<(), StoreError> {
        let needed = self
            .size()
            .checked_add(extra)
            .ok_or(StoreError::CacheOverflow {
                needed: u64::MAX,
                capacity: self.capacity,
            })?;
        if needed > self.capacity {
            return Err(StoreError::CacheOverflow {
                needed,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Copies `data` in as a new record. On failure the store is left unchanged.
    pub fn append_bytes(&mut self, data: &[u8]) -> Result<(), StoreError> {
        if self.arena.is_none() {
            return Err(StoreError::NotInitialized);
        }
        let len = data.len() as u64;
        self.ensure_fits(len)?;
        let end = self.size() + len;
        if let Some(arena) = self.arena.as_mut() {
            arena.extend_from_slice(data);
        }
        self.offsets.push(end);
        Ok(())
    }

    /// Appends every record of a serialized store file, rebasing its offsets onto the
    /// current end of this store. On failure the store is left unchanged.
    pub fn append_file(&mut self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        if self.arena.is_none() {
            return Err(StoreError::NotInitialized);
        }

        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let imported = read_offsets(&mut reader, path, file_len)?;
        let data_size = imported.last().copied().unwrap_or(0);
        self.ensure_fits(data_size)?;

        let base = self.size();
        let Some(arena) = self.arena.as_mut() else {
            return Err(StoreError::NotInitialized);
        };
        let start_len = arena.len();
        let read = match reader.by_ref().take(data_size).read_to_end(arena) {
            Ok(n) => n as u64,
            Err(err) => {
                arena.truncate(start_len);
                return Err(StoreError::Io(err));
            }
        };
        if read != data_size {
            arena.truncate(start_len);
            return Err(StoreError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("payload truncated ({read} of {data_size} bytes)"),
            });
        }

        self.offsets
            .extend(imported.iter().skip(1).map(|off| base + off));
        Ok(())
    }

    /// Zero-copy view of record `i`; the borrow ends before any further mutation.
    pub fn get(&self, i: usize) -> Result<&[u8], StoreError> {
        let arena = self.arena.as_ref().ok_or(StoreError::NotInitialized)?;
        if i >= self.record_count() {
            return Err(StoreError::OutOfRange {
                index: i,
                len: self.record_count(),
            });
        }
        let start = self.offsets[i] as usize;
        let end = self.offsets[i + 1] as usize;
        Ok(&arena[start..end])
    }

    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        let arena = self.arena.as_ref().ok_or(StoreError::NotInitialized)?;
        let n = i32::try_from(self.record_count()).map_err(|_| {
            StoreError::InvalidInput(format!(
                "{} records do not fit the i32 record count",
                self.record_count()
            ))
        })?;

        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(&n.to_le_bytes())?;
        for off in &self.offsets {
            let off = i64::try_from(*off)
                .map_err(|_| StoreError::InvalidInput(format!("offset {off} exceeds i64")))?;
            out.write_all(&off.to_le_bytes())?;
        }
        out.write_all(arena)?;
        out.flush()?;
        Ok(())
    }

    pub fn summary(&self) -> StoreSummary {
        StoreSummary {
            initialized: self.is_initialized(),
            records: self.record_count(),
            size: self.size(),
            capacity: self.capacity,
            head_offsets: self
                .offsets
                .iter()
                .take(SUMMARY_HEAD_OFFSETS.min(self.record_count()))
                .copied()
                .collect(),
        }
    }
}

fn corrupt(path: &Path, reason: impl Into<String>) -> StoreError {
    StoreError::Corrupt {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn read_exact_or_corrupt<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    path: &Path,
    what: &str,
) -> Result<(), StoreError> {
    reader.read_exact(buf).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            corrupt(path, format!("truncated {what}"))
        } else {
            StoreError::Io(err)
        }
    })
}

fn read_offsets<R: Read>(
    reader: &mut R,
    path: &Path,
    file_len: u64,
) -> Result<Vec<u64>, StoreError> {
    let mut n_buf = [0u8; 4];
    read_exact_or_corrupt(reader, &mut n_buf, path, "record count")?;
    let n = i32::from_le_bytes(n_buf);
    let n = u64::try_from(n).map_err(|_| corrupt(path, format!("negative record count {n}")))?;

    let header_len = 4 + (n + 1) * 8;
    if header_len > file_len {
        return Err(corrupt(
            path,
            format!("header claims {n} records but file is {file_len} bytes"),
        ));
    }

    let mut offsets = Vec::with_capacity((n + 1) as usize);
    let mut off_buf = [0u8; 8];
    for _ in 0..=n {
        read_exact_or_corrupt(reader, &mut off_buf, path, "offset table")?;
        let raw = i64::from_le_bytes(off_buf);
        let off = u64::try_from(raw).map_err(|_| corrupt(path, format!("negative offset {raw}")))?;
        if let Some(prev) = offsets.last() {
            if off < *prev {
                return Err(corrupt(path, "offsets are not non-decreasing"));
            }
        } else if off != 0 {
            return Err(corrupt(path, "first offset must be 0"));
        }
        offsets.push(off);
    }
    Ok(offsets)
}

/// Snapshot of a store's bookkeeping, for logs and CLI output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSummary {
    pub initialized: bool,
    pub records: usize,
    pub size: u64,
    pub capacity: u64,
    pub head_offsets: Vec<u64>,
}

impl fmt::Display for StoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.initialized {
            return write!(f, "blob store not initialized");
        }
        write!(
            f,
            "records={} size={} capacity={} offsets={:?}",
            self.records, self.size, self.capacity, self.head_offsets
        )
    }
}
