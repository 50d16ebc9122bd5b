#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod normalize;
pub mod sampler;

use thiserror::Error;

pub use normalize::l2_normalize_rows;
pub use sampler::{HardNegativeSampler, Triplet};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MiningError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
