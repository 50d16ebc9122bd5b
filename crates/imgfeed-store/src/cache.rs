use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::blob::PackedBlobStore;
use crate::codec::ImageDecoder;
use crate::manifest::{shard_data_path, shard_names_path, ShardManifest, MANIFEST_FILE_NAME};
use crate::StoreError;

#[derive(Debug, Clone, Copy)]
pub struct BuildConfig {
    /// A shard is flushed as soon as it holds this many records.
    pub records_per_shard: usize,
    /// Arena budget per record; shard capacity is `records_per_shard * bytes_per_record`.
    pub bytes_per_record: u64,
    /// Larger source files are skipped.
    pub max_file_bytes: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            records_per_shard: 1000,
            bytes_per_record: 400_000,
            max_file_bytes: 2_000_000,
        }
    }
}

impl BuildConfig {
    fn shard_capacity(&self) -> Result<u64, StoreError> {
        (self.records_per_shard as u64)
            .checked_mul(self.bytes_per_record)
            .ok_or_else(|| StoreError::InvalidInput("shard capacity overflows u64".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub listed: usize,
    pub records: usize,
    pub skipped: usize,
    pub shards: usize,
    pub total_bytes: u64,
    pub manifest_path: PathBuf,
}

/// A [`PackedBlobStore`] addressed by image name.
///
/// Position `i` of `names` is record `i` of the embedded store. Once built or loaded the
/// cache is never written again, so it can be shared (e.g. behind an `Arc`) by any number
/// of readers.
#[derive(Debug, Default)]
pub struct NamedBlobCache {
    store: PackedBlobStore,
    names: Vec<String>,
    index: HashMap<String, usize>,
    shard_dir: Option<PathBuf>,
    manifest: Option<ShardManifest>,
}

fn read_name_tokens(path: &Path) -> Result<Vec<String>, StoreError> {
    let text = std::fs::read_to_string(path)?;
    Ok(text.split_whitespace().map(str::to_string).collect())
}

impl NamedBlobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packs the files named in `list_file` (paths relative to `root`) into shards under
    /// `shard_dir`.
    ///
    /// Ingestion is tolerant: a file that cannot be read, is over `max_file_bytes`, or does
    /// not fit the shard arena is logged and skipped, and its name is left out of the shard.
    pub fn build_from_list(
        root: impl AsRef<Path>,
        list_file: impl AsRef<Path>,
        shard_dir: impl AsRef<Path>,
        cfg: &BuildConfig,
    ) -> Result<BuildSummary, StoreError> {
        let root = root.as_ref();
        let list_file = list_file.as_ref();
        let shard_dir = shard_dir.as_ref();

        if cfg.records_per_shard == 0 {
            return Err(StoreError::InvalidInput(
                "records_per_shard must be > 0".to_string(),
            ));
        }
        if !list_file.is_file() {
            return Err(StoreError::InvalidInput(format!(
                "image list does not exist: {}",
                list_file.display()
            )));
        }
        if shard_dir.exists() {
            return Err(StoreError::InvalidInput(format!(
                "shard dir already exists: {}",
                shard_dir.display()
            )));
        }
        let capacity = cfg.shard_capacity()?;
        let listed = read_name_tokens(list_file)?;
        std::fs::create_dir_all(shard_dir)?;

        info!(
            target: "imgfeed",
            event = "build_start",
            image_root = %root.display(),
            shard_dir = %shard_dir.display(),
            listed = listed.len() as u64,
            records_per_shard = cfg.records_per_shard as u64,
            "build starting"
        );

        let mut shard = NamedBlobCache::new();
        shard.store.init(capacity)?;
        let mut shard_sizes: Vec<u64> = Vec::new();
        let mut records: usize = 0;
        let mut skipped: usize = 0;

        for name in &listed {
            let path = root.join(name);
            match shard.ingest_file(name, &path, cfg.max_file_bytes) {
                Ok(()) => records += 1,
                Err(err) => {
                    skipped += 1;
                    warn!(
                        target: "imgfeed",
                        event = "build_skip_file",
                        path = %path.display(),
                        error = %err,
                        "skipping unreadable image"
                    );
                    continue;
                }
            }

            if shard.len() >= cfg.records_per_shard {
                shard_sizes.push(shard.flush_shard(shard_dir, shard_sizes.len())?);
                shard.release();
                shard.store.init(capacity)?;
            }
        }

        if !shard.is_empty() {
            shard_sizes.push(shard.flush_shard(shard_dir, shard_sizes.len())?);
        }
        shard.release();

        let manifest = ShardManifest {
            root: root.display().to_string(),
            shard_sizes,
        };
        let manifest_path = shard_dir.join(MANIFEST_FILE_NAME);
        manifest.write(&manifest_path)?;

        let summary = BuildSummary {
            listed: listed.len(),
            records,
            skipped,
            shards: manifest.shard_count(),
            total_bytes: manifest.total_bytes(0, manifest.shard_count())?,
            manifest_path,
        };
        info!(
            target: "imgfeed",
            event = "build_complete",
            shard_dir = %shard_dir.display(),
            records = summary.records as u64,
            skipped = summary.skipped as u64,
            shards = summary.shards as u64,
            total_bytes = summary.total_bytes,
            "build complete"
        );
        Ok(summary)
    }

    fn ingest_file(&mut self, name: &str, path: &Path, max_bytes: u64) -> Result<(), StoreError> {
        let size = std::fs::metadata(path)?.len();
        if size > max_bytes {
            return Err(StoreError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                max: max_bytes,
            });
        }
        let bytes = std::fs::read(path)?;
        self.store.append_bytes(&bytes)?;
        self.push_name(name.to_string());
        Ok(())
    }

    fn flush_shard(&self, shard_dir: &Path, shard: usize) -> Result<u64, StoreError> {
        let data_path = shard_data_path(shard_dir, shard);
        self.store.write_to_file(&data_path)?;
        self.write_name_list(shard_names_path(shard_dir, shard))?;
        info!(
            target: "imgfeed",
            event = "shard_written",
            shard = shard as u64,
            records = self.len() as u64,
            bytes = self.store.size(),
            path = %data_path.display(),
            "shard written"
        );
        Ok(self.store.size())
    }

    /// Loads shards `[start, end)` of a built shard directory; `end == 0` means all shards.
    ///
    /// Loading is strict: any unreadable shard or name/record count disagreement fails the
    /// whole load.
    pub fn load(shard_dir: impl AsRef<Path>, start: usize, end: usize) -> Result<Self, StoreError> {
        let shard_dir = shard_dir.as_ref();
        if !shard_dir.is_dir() {
            return Err(StoreError::InvalidInput(format!(
                "shard dir does not exist: {}",
                shard_dir.display()
            )));
        }
        let manifest = ShardManifest::read(shard_dir.join(MANIFEST_FILE_NAME))?;
        let count = manifest.shard_count();
        let end = if end == 0 { count } else { end };
        if end > count || start >= end {
            return Err(StoreError::InvalidInput(format!(
                "invalid shard range [{start}, {end}) for {count} shards"
            )));
        }

        let mut cache = NamedBlobCache::new();
        cache.store.init(manifest.total_bytes(start, end)?)?;
        for shard in start..end {
            let data_path = shard_data_path(shard_dir, shard);
            let names_path = shard_names_path(shard_dir, shard);
            cache.store.append_file(&data_path)?;
            cache.append_name_list(&names_path)?;
            info!(
                target: "imgfeed",
                event = "shard_loaded",
                shard = shard as u64,
                records = cache.len() as u64,
                path = %data_path.display(),
                "shard loaded"
            );
        }

        info!(
            target: "imgfeed",
            event = "load_complete",
            shard_dir = %shard_dir.display(),
            start = start as u64,
            end = end as u64,
            summary = %cache.store.summary(),
            "cache loaded"
        );
        cache.shard_dir = Some(shard_dir.to_path_buf());
        cache.manifest = Some(manifest);
        Ok(cache)
    }

    fn push_name(&mut self, name: String) {
        self.index.insert(name.clone(), self.names.len());
        self.names.push(name);
    }

    /// Appends the names listed in `path` and checks they line up with the records
    /// appended so far.
    pub fn append_name_list(&mut self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let path = path.as_ref();
        for name in read_name_tokens(path)? {
            self.push_name(name);
        }
        if self.names.len() != self.store.record_count() {
            return Err(StoreError::SizeMismatch {
                path: path.to_path_buf(),
                names: self.names.len(),
                records: self.store.record_count(),
            });
        }
        Ok(())
    }

    pub fn write_name_list(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        let mut out = BufWriter::new(File::create(path)?);
        for name in &self.names {
            writeln!(out, "{name}")?;
        }
        out.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn index_of(&self, name: &str) -> Result<usize, StoreError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    pub fn store(&self) -> &PackedBlobStore {
        &self.store
    }

    pub fn shard_dir(&self) -> Option<&Path> {
        self.shard_dir.as_deref()
    }

    pub fn image_root(&self) -> Option<&str> {
        self.manifest.as_ref().map(|m| m.root.as_str())
    }

    pub fn manifest(&self) -> Option<&ShardManifest> {
        self.manifest.as_ref()
    }

    /// Raw (undecoded) bytes stored under `name`.
    pub fn raw(&self, name: &str) -> Result<&[u8], StoreError> {
        self.store.get(self.index_of(name)?)
    }

    pub fn get_image<D: ImageDecoder>(
        &self,
        name: &str,
        decoder: &D,
    ) -> Result<D::Image, StoreError> {
        let raw = self.raw(name)?;
        decoder.decode(raw).map_err(|source| StoreError::Decode {
            name: name.to_string(),
            source,
        })
    }

    pub fn get_image_at<D: ImageDecoder>(
        &self,
        i: usize,
        decoder: &D,
    ) -> Result<D::Image, StoreError> {
        let raw = self.store.get(i)?;
        decoder.decode(raw).map_err(|source| StoreError::Decode {
            name: self.names.get(i).cloned().unwrap_or_default(),
            source,
        })
    }

    pub fn release(&mut self) {
        self.store.release();
        self.names.clear();
        self.index.clear();
        self.shard_dir = None;
        self.manifest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_list_mismatch_is_reported() -> anyhow::Result<()> {
        let mut root = std::env::temp_dir();
        root.push(format!(
            "imgfeed-cache-mismatch-{}-{}",
            std::process::id(),
            imgfeed_observe::time::unix_time_ms()
        ));
        std::fs::create_dir_all(&root)?;
        let names = root.join("imagename.000");
        std::fs::write(&names, "a.jpg\nb.jpg\n")?;

        let mut cache = NamedBlobCache::new();
        cache.store.init(16)?;
        cache.store.append_bytes(b"only-one")?;
        let err = cache.append_name_list(&names).unwrap_err();
        match err {
            StoreError::SizeMismatch { names, records, .. } => {
                assert_eq!(names, 2);
                assert_eq!(records, 1);
            }
            other => panic!("expected SizeMismatch, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn missing_name_is_not_found() {
        let cache = NamedBlobCache::new();
        assert!(matches!(cache.raw("x.jpg"), Err(StoreError::NotFound(_))));
    }
}
