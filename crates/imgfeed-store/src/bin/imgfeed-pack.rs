#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use imgfeed_store::{BuildConfig, NamedBlobCache};

#[derive(Debug, Parser)]
#[command(name = "imgfeed-pack")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Pack the images named in a list file into a shard directory.
    Build {
        #[arg(long, env = "IMGFEED_IMAGE_ROOT")]
        root: PathBuf,

        #[arg(long, env = "IMGFEED_IMAGE_LIST")]
        list: PathBuf,

        #[arg(long, env = "IMGFEED_SHARD_DIR")]
        out: PathBuf,

        #[arg(long, env = "IMGFEED_RECORDS_PER_SHARD", default_value_t = 1000)]
        records_per_shard: usize,

        #[arg(long, env = "IMGFEED_BYTES_PER_RECORD", default_value_t = 400_000)]
        bytes_per_record: u64,

        #[arg(long, env = "IMGFEED_MAX_FILE_BYTES", default_value_t = 2_000_000)]
        max_file_bytes: u64,
    },
    /// Load a window of shards and print what was loaded.
    Inspect {
        #[arg(long, env = "IMGFEED_SHARD_DIR")]
        dir: PathBuf,

        #[arg(long, default_value_t = 0)]
        start: usize,

        /// Exclusive; 0 loads through the last shard.
        #[arg(long, default_value_t = 0)]
        end: usize,
    },
}

fn main() -> Result<()> {
    imgfeed_observe::logging::init_tracing();
    let args = Args::parse();

    match args.cmd {
        Command::Build {
            root,
            list,
            out,
            records_per_shard,
            bytes_per_record,
            max_file_bytes,
        } => {
            let cfg = BuildConfig {
                records_per_shard,
                bytes_per_record,
                max_file_bytes,
            };
            let summary = NamedBlobCache::build_from_list(&root, &list, &out, &cfg)?;
            println!("records: {}", summary.records);
            println!("skipped: {}", summary.skipped);
            println!("shards: {}", summary.shards);
            println!("bytes: {}", summary.total_bytes);
            println!("manifest: {}", summary.manifest_path.display());
        }
        Command::Inspect { dir, start, end } => {
            let cache = NamedBlobCache::load(&dir, start, end)?;
            println!("image_root: {}", cache.image_root().unwrap_or(""));
            println!("{}", cache.store().summary());
            for name in cache.names().iter().take(10) {
                println!("  {name}");
            }
        }
    }
    Ok(())
}
