use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::StoreError;

pub const MANIFEST_FILE_NAME: &str = "data.index";

pub fn shard_data_path(dir: &Path, shard: usize) -> PathBuf {
    dir.join(format!("data.{shard:03}"))
}

pub fn shard_names_path(dir: &Path, shard: usize) -> PathBuf {
    dir.join(format!("imagename.{shard:03}"))
}

/// Text index written next to the shards.
///
/// Layout: line 1 is the image root, line 2 the shard count `K`, then `K` lines with the
/// payload byte size of each shard.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ShardManifest {
    pub root: String,
    pub shard_sizes: Vec<u64>,
}

impl ShardManifest {
    pub fn shard_count(&self) -> usize {
        self.shard_sizes.len()
    }

    /// Sum of shard sizes over `[start, end)`.
    pub fn total_bytes(&self, start: usize, end: usize) -> Result<u64, StoreError> {
        let sizes = self.shard_sizes.get(start..end).ok_or_else(|| {
            StoreError::InvalidInput(format!(
                "invalid shard range [{start}, {end}) for {} shards",
                self.shard_count()
            ))
        })?;
        sizes
            .iter()
            .try_fold(0u64, |acc, size| acc.checked_add(*size))
            .ok_or_else(|| {
                StoreError::InvalidInput(format!("shard sizes over [{start}, {end}) overflow u64"))
            })
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };
        let (root, rest) = text.split_once('\n').unwrap_or((text, ""));
        let root = root.trim().to_string();
        if root.is_empty() {
            return Err(corrupt("missing image root".to_string()));
        }
        let mut tokens = rest.split_whitespace();
        let count: usize = tokens
            .next()
            .ok_or_else(|| corrupt("missing shard count".to_string()))?
            .parse()
            .map_err(|e| corrupt(format!("bad shard count: {e}")))?;

        let mut shard_sizes = Vec::with_capacity(count.min(4096));
        let mut total: u64 = 0;
        for i in 0..count {
            let size: u64 = tokens
                .next()
                .ok_or_else(|| corrupt(format!("missing size for shard {i}")))?
                .parse()
                .map_err(|e| corrupt(format!("bad size for shard {i}: {e}")))?;
            total = total
                .checked_add(size)
                .ok_or_else(|| corrupt(format!("shard sizes overflow u64 at shard {i}")))?;
            shard_sizes.push(size);
        }
        Ok(Self { root, shard_sizes })
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, path)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(32 + self.shard_sizes.len() * 12);
        let _ = writeln!(out, "{}", self.root);
        let _ = writeln!(out, "{}", self.shard_sizes.len());
        for size in &self.shard_sizes {
            let _ = writeln!(out, "{size}");
        }
        out
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), StoreError> {
        std::fs::write(path, self.to_text())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reads_root_count_and_sizes() -> anyhow::Result<()> {
        let m = ShardManifest::parse("/data/images\n3\n10\n20\n5\n", Path::new("data.index"))?;
        assert_eq!(m.root, "/data/images");
        assert_eq!(m.shard_sizes, vec![10, 20, 5]);
        assert_eq!(m.total_bytes(1, 3)?, 25);
        assert!(m.total_bytes(2, 4).is_err());
        assert_eq!(ShardManifest::parse(&m.to_text(), Path::new("x"))?, m);
        Ok(())
    }

    #[test]
    fn parse_rejects_short_size_list() {
        let err = ShardManifest::parse("/r\n2\n10\n", Path::new("data.index")).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn overflowing_sizes_are_corrupt() {
        let err = ShardManifest::parse(
            "/r\n2\n18446744073709551615\n1\n",
            Path::new("data.index"),
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));

        let m = ShardManifest {
            root: "/r".to_string(),
            shard_sizes: vec![u64::MAX, 1],
        };
        assert!(matches!(m.total_bytes(0, 2), Err(StoreError::InvalidInput(_))));
    }

    #[test]
    fn shard_paths_are_zero_padded() {
        let dir = Path::new("/cache");
        assert_eq!(shard_data_path(dir, 7), PathBuf::from("/cache/data.007"));
        assert_eq!(
            shard_names_path(dir, 12),
            PathBuf::from("/cache/imagename.012")
        );
    }
}
