#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use imgfeed_runtime::Transform;
use imgfeed_store::{BuildConfig, NamedBlobCache};

pub const SAMPLE_LEN: usize = 4;

pub fn temp_dir(test_name: &str) -> Result<PathBuf> {
    let mut root = std::env::temp_dir();
    root.push(format!(
        "imgfeed-runtime-{test_name}-{}-{}",
        std::process::id(),
        imgfeed_observe::time::unix_time_ms()
    ));
    std::fs::create_dir_all(&root)?;
    Ok(root)
}

pub fn image_name(i: usize) -> String {
    format!("img{i:03}.jpg")
}

/// Builds and loads a cache of `count` fake images; image `i` is `i + 1` bytes of value `i`.
pub fn build_cache(test_name: &str, count: usize) -> Result<Arc<NamedBlobCache>> {
    let root = temp_dir(test_name)?;
    let names: Vec<String> = (0..count).map(image_name).collect();
    for (i, name) in names.iter().enumerate() {
        std::fs::write(root.join(name), vec![i as u8; i + 1])?;
    }
    let list = root.join("list.txt");
    std::fs::write(&list, names.join("\n"))?;
    let shard_dir = root.join("cache");
    let cfg = BuildConfig {
        records_per_shard: 7,
        bytes_per_record: 1024,
        max_file_bytes: 1024,
    };
    NamedBlobCache::build_from_list(&root, &list, &shard_dir, &cfg)?;
    Ok(Arc::new(NamedBlobCache::load(&shard_dir, 0, 0)?))
}

/// Fills every value of the slot with the image's first byte (its record number).
pub struct ByteTransform {
    pub delay: Duration,
    pub fail_on: Option<u8>,
}

impl ByteTransform {
    pub fn instant() -> Self {
        Self {
            delay: Duration::ZERO,
            fail_on: None,
        }
    }
}

impl Transform for ByteTransform {
    fn sample_len(&self) -> usize {
        SAMPLE_LEN
    }

    fn transform(&self, raw: &[u8], out: &mut [f32]) -> Result<()> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let id = *raw.first().ok_or_else(|| anyhow::anyhow!("empty image"))?;
        anyhow::ensure!(Some(id) != self.fail_on, "corrupt image {id}");
        out.fill(f32::from(id));
        Ok(())
    }
}
