/// Destination tensors for one consumed batch.
///
/// Allocate with [`crate::PrefetchPipeline::new_batch`] so the shapes match the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    /// Source record index of each slot.
    pub record_ids: Vec<u64>,
    /// One tensor per item region (three for triplet sources), each
    /// `batch_size * sample_len` values in slot order.
    pub images: Vec<Vec<f32>>,
    /// One tensor per label head; head `j` holds `batch_size * label_lens[j]` values.
    pub labels: Vec<Vec<f32>>,
}

impl Batch {
    pub fn sample_count(&self) -> usize {
        self.record_ids.len()
    }
}

/// One half of the double buffer. Labels are stored slot-major with all heads concatenated.
#[derive(Debug)]
pub(crate) struct BatchBuffer {
    pub(crate) record_ids: Vec<u64>,
    pub(crate) data: Vec<f32>,
    pub(crate) labels: Vec<f32>,
}

impl BatchBuffer {
    pub(crate) fn new(batch_size: usize, data_len: usize, label_width: usize) -> Self {
        Self {
            record_ids: vec![0; batch_size],
            data: vec![0.0; data_len],
            labels: vec![0.0; batch_size * label_width],
        }
    }
}
