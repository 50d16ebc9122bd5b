use std::sync::Arc;
use std::thread::JoinHandle;

use imgfeed_observe::metrics::{Counter, DurationAgg, Gauge, ScopedTimer};
use imgfeed_store::{NamedBlobCache, StoreError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, error, info};

use crate::source::BatchSource;
use crate::transform::Transform;
use crate::types::{Batch, BatchBuffer};
use crate::PipelineError;

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// When > 0, the cursor starts at a value drawn uniformly from `[0, rand_skip)`.
    pub rand_skip: u64,
    /// Seed for the start-offset draw; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            rand_skip: 0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Producing,
    Ready,
    Failed,
    ShutDown,
}

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub batches_produced_total: Counter,
    pub samples_produced_total: Counter,
    pub produce_time: DurationAgg,
    pub consume_wait: DurationAgg,
    pub cursor: Gauge,
}

/// Everything a produce step reads. Shared with the worker; never mutated after setup.
struct ProduceCtx<S, T> {
    cache: Arc<NamedBlobCache>,
    source: S,
    transform: T,
    batch_size: usize,
    sample_len: usize,
    metrics: Arc<PipelineMetrics>,
}

type WorkerOutput = Result<(BatchBuffer, usize), PipelineError>;

impl<S: BatchSource, T: Transform> ProduceCtx<S, T> {
    fn region_len(&self) -> usize {
        self.batch_size * self.sample_len
    }

    /// Fills `buf` with `batch_size` records starting at `cursor`; returns the buffer and
    /// the cursor after the last record.
    fn produce(&self, mut buf: BatchBuffer, mut cursor: usize) -> WorkerOutput {
        let _timer = ScopedTimer::new(&self.metrics.produce_time);
        let records = self.source.len();
        let region_len = self.region_len();
        let width = self.source.label_width();
        let first = cursor;

        for slot in 0..self.batch_size {
            for (region, name) in self.source.item_names(cursor).iter().enumerate() {
                let raw = self.cache.raw(name)?;
                let start = region * region_len + slot * self.sample_len;
                self.transform
                    .transform(raw, &mut buf.data[start..start + self.sample_len])
                    .map_err(|source| PipelineError::Transform {
                        name: name.clone(),
                        source,
                    })?;
            }
            if width > 0 {
                let dst = &mut buf.labels[slot * width..(slot + 1) * width];
                for (d, v) in dst.iter_mut().zip(self.source.labels(cursor)) {
                    *d = *v as f32;
                }
            }
            buf.record_ids[slot] = cursor as u64;
            cursor = (cursor + 1) % records;
        }

        self.metrics.batches_produced_total.inc();
        self.metrics.samples_produced_total.add(self.batch_size as u64);
        debug!(
            target: "imgfeed",
            event = "batch_produced",
            cursor = first as u64,
            batch_size = self.batch_size as u64,
            "batch produced"
        );
        Ok((buf, cursor))
    }
}

/// Double-buffered batch producer.
///
/// One background thread fills the staging buffer while the consumer reads the output
/// buffer. `consume` joins the worker, swaps the two buffers, copies the fresh output to
/// the caller and immediately starts the next step, so decode cost overlaps with whatever
/// the caller does with the batch.
///
/// Buffer ownership moves into the worker thread and back out through the join, so the
/// consumer never observes a buffer the worker may still write.
pub struct PrefetchPipeline<S: BatchSource, T: Transform> {
    ctx: Arc<ProduceCtx<S, T>>,
    cursor: usize,
    staging: Option<BatchBuffer>,
    output: Option<BatchBuffer>,
    worker: Option<JoinHandle<WorkerOutput>>,
    state: PipelineState,
}

impl<S: BatchSource, T: Transform> PrefetchPipeline<S, T> {
    /// Validates the source against the cache and sets the start cursor. No work is
    /// started until [`PrefetchPipeline::start`] or the first `consume`.
    pub fn new(
        cache: Arc<NamedBlobCache>,
        source: S,
        transform: T,
        cfg: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        if cfg.batch_size == 0 {
            return Err(PipelineError::InvalidInput(
                "batch_size must be > 0".to_string(),
            ));
        }
        if source.is_empty() {
            return Err(PipelineError::InvalidInput(
                "batch source has no records".to_string(),
            ));
        }
        if source.items_per_record() == 0 {
            return Err(PipelineError::InvalidInput(
                "items_per_record must be > 0".to_string(),
            ));
        }
        if source.label_lens().contains(&0) {
            return Err(PipelineError::InvalidInput(format!(
                "label heads must be positive, got {:?}",
                source.label_lens()
            )));
        }
        let sample_len = transform.sample_len();
        if sample_len == 0 {
            return Err(PipelineError::InvalidInput(
                "transform sample_len must be > 0".to_string(),
            ));
        }
        for index in 0..source.len() {
            for name in source.item_names(index) {
                if !cache.contains(name) {
                    return Err(PipelineError::Store(StoreError::NotFound(name.clone())));
                }
            }
        }

        let records = source.len();
        let cursor = if cfg.rand_skip > 0 {
            let mut rng = match cfg.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let skip = rng.gen_range(0..cfg.rand_skip);
            info!(
                target: "imgfeed",
                event = "pipeline_rand_skip",
                skip,
                "skipping first records"
            );
            (skip % records as u64) as usize
        } else {
            0
        };

        let data_len = source.items_per_record() * cfg.batch_size * sample_len;
        let label_width = source.label_width();
        let metrics = Arc::new(PipelineMetrics::default());
        metrics.cursor.set(cursor as u64);

        info!(
            target: "imgfeed",
            event = "pipeline_setup",
            records = records as u64,
            batch_size = cfg.batch_size as u64,
            items_per_record = source.items_per_record() as u64,
            sample_len = sample_len as u64,
            label_width = label_width as u64,
            cursor = cursor as u64,
            "prefetch pipeline ready"
        );

        Ok(Self {
            ctx: Arc::new(ProduceCtx {
                cache,
                source,
                transform,
                batch_size: cfg.batch_size,
                sample_len,
                metrics,
            }),
            cursor,
            staging: Some(BatchBuffer::new(cfg.batch_size, data_len, label_width)),
            output: Some(BatchBuffer::new(cfg.batch_size, data_len, label_width)),
            worker: None,
            state: PipelineState::Idle,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Index the next produce step starts from. While a step is in flight this is that
    /// step's first record.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn dataset_size(&self) -> usize {
        self.ctx.source.len()
    }

    pub fn batch_size(&self) -> usize {
        self.ctx.batch_size
    }

    pub fn source(&self) -> &S {
        &self.ctx.source
    }

    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.ctx.metrics.clone()
    }

    /// A destination batch shaped for this pipeline.
    pub fn new_batch(&self) -> Batch {
        let region_len = self.ctx.region_len();
        Batch {
            record_ids: vec![0; self.ctx.batch_size],
            images: vec![vec![0.0; region_len]; self.ctx.source.items_per_record()],
            labels: self
                .ctx
                .source
                .label_lens()
                .iter()
                .map(|len| vec![0.0; self.ctx.batch_size * len])
                .collect(),
        }
    }

    fn check_usable(&self) -> Result<(), PipelineError> {
        match self.state {
            PipelineState::Failed => Err(PipelineError::Failed),
            PipelineState::ShutDown => Err(PipelineError::ShutDown),
            _ => Ok(()),
        }
    }

    /// Spawns the background step for the next batch.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        self.check_usable()?;
        if self.state == PipelineState::Producing {
            return Err(PipelineError::InvalidInput(
                "a produce step is already in flight".to_string(),
            ));
        }
        let buf = self.staging.take().ok_or(PipelineError::Failed)?;
        let ctx = self.ctx.clone();
        let cursor = self.cursor;
        let handle = std::thread::Builder::new()
            .name("imgfeed-prefetch".to_string())
            .spawn(move || ctx.produce(buf, cursor));
        match handle {
            Ok(handle) => {
                self.worker = Some(handle);
                self.state = PipelineState::Producing;
                Ok(())
            }
            Err(err) => {
                self.state = PipelineState::Failed;
                Err(PipelineError::Io(err))
            }
        }
    }

    fn check_destination(&self, dst: &Batch) -> Result<(), PipelineError> {
        let region_len = self.ctx.region_len();
        let images_ok = dst.images.len() == self.ctx.source.items_per_record()
            && dst.images.iter().all(|t| t.len() == region_len);
        let lens = self.ctx.source.label_lens();
        let labels_ok = dst.labels.len() == lens.len()
            && dst
                .labels
                .iter()
                .zip(lens)
                .all(|(t, len)| t.len() == self.ctx.batch_size * len);
        if images_ok && labels_ok {
            Ok(())
        } else {
            Err(PipelineError::InvalidInput(
                "destination batch shape does not match the pipeline".to_string(),
            ))
        }
    }

    fn fail(&mut self, err: &PipelineError) {
        self.state = PipelineState::Failed;
        error!(
            target: "imgfeed",
            event = "pipeline_fatal",
            cursor = self.cursor as u64,
            error = %err,
            "prefetch worker failed; pipeline stopped"
        );
    }

    /// Blocks until the in-flight batch is complete, copies it into `dst`, then starts the
    /// next batch.
    ///
    /// A worker failure is fatal: the error is returned once and every later call returns
    /// [`PipelineError::Failed`].
    pub fn consume(&mut self, dst: &mut Batch) -> Result<(), PipelineError> {
        self.check_usable()?;
        self.check_destination(dst)?;
        if self.state != PipelineState::Producing {
            self.start()?;
        }

        let handle = self.worker.take().ok_or(PipelineError::Failed)?;
        let joined = {
            let _timer = ScopedTimer::new(&self.ctx.metrics.consume_wait);
            handle.join()
        };
        let (filled, next_cursor) = match joined {
            Ok(Ok(done)) => done,
            Ok(Err(err)) => {
                self.fail(&err);
                return Err(err);
            }
            Err(_) => {
                let err = PipelineError::WorkerPanicked;
                self.fail(&err);
                return Err(err);
            }
        };
        self.state = PipelineState::Ready;
        self.cursor = next_cursor;
        self.ctx.metrics.cursor.set(next_cursor as u64);

        self.staging = self.output.replace(filled);
        if let Some(out) = self.output.as_ref() {
            self.copy_out(out, dst);
        }
        self.start()
    }

    fn copy_out(&self, out: &BatchBuffer, dst: &mut Batch) {
        let region_len = self.ctx.region_len();
        for (region, tensor) in dst.images.iter_mut().enumerate() {
            tensor.copy_from_slice(&out.data[region * region_len..(region + 1) * region_len]);
        }

        let lens = self.ctx.source.label_lens();
        let width = self.ctx.source.label_width();
        for slot in 0..self.ctx.batch_size {
            let mut offset = slot * width;
            for (head, len) in dst.labels.iter_mut().zip(lens) {
                head[slot * len..(slot + 1) * len]
                    .copy_from_slice(&out.labels[offset..offset + len]);
                offset += len;
            }
        }

        dst.record_ids.clone_from(&out.record_ids);
    }

    /// Joins any in-flight step and releases both buffers. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        if self.state == PipelineState::ShutDown {
            return;
        }
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!(
                    target: "imgfeed",
                    event = "pipeline_fatal",
                    "prefetch worker panicked during shutdown"
                );
            }
        }
        self.staging = None;
        self.output = None;
        self.state = PipelineState::ShutDown;
        info!(
            target: "imgfeed",
            event = "pipeline_shutdown",
            batches = self.ctx.metrics.batches_produced_total.get(),
            produce_time = %self.ctx.metrics.produce_time.snapshot(),
            consume_wait = %self.ctx.metrics.consume_wait.snapshot(),
            "prefetch pipeline shut down"
        );
    }
}

impl<S: BatchSource, T: Transform> Drop for PrefetchPipeline<S, T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
