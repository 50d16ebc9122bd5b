#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod labels;
pub mod pipeline;
pub mod source;
pub mod transform;
pub mod types;

use imgfeed_store::StoreError;
use thiserror::Error;

pub use labels::{LabelTable, TripletList};
pub use pipeline::{PipelineConfig, PipelineMetrics, PipelineState, PrefetchPipeline};
pub use source::{BatchSource, MultiLabelSource, SingleLabelSource, TripletSource};
pub use transform::{CenterCropTransform, Transform};
pub use types::Batch;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("transform failed for {name}: {source}")]
    Transform {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("prefetch worker panicked")]
    WorkerPanicked,
    #[error("pipeline failed earlier and can no longer serve batches")]
    Failed,
    #[error("pipeline is shut down")]
    ShutDown,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
