mod common;

use anyhow::Result;
use imgfeed_runtime::{
    LabelTable, MultiLabelSource, PipelineConfig, PipelineState, PrefetchPipeline,
    SingleLabelSource, TripletList, TripletSource,
};

use common::{build_cache, image_name, ByteTransform, SAMPLE_LEN};

fn cfg(batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        batch_size,
        rand_skip: 0,
        seed: None,
    }
}

#[test]
fn batches_follow_cache_order_and_wrap() -> Result<()> {
    let cache = build_cache("wrap", 5)?;
    let source = SingleLabelSource::from_cache(&cache);
    let mut pipeline = PrefetchPipeline::new(cache, source, ByteTransform::instant(), cfg(2))?;
    let mut batch = pipeline.new_batch();
    assert_eq!(batch.sample_count(), 2);

    let mut seen = Vec::new();
    for _ in 0..3 {
        pipeline.consume(&mut batch)?;
        seen.extend(batch.record_ids.iter().copied());
        for (slot, id) in batch.record_ids.iter().enumerate() {
            let values = &batch.images[0][slot * SAMPLE_LEN..(slot + 1) * SAMPLE_LEN];
            assert!(values.iter().all(|v| *v == *id as f32), "slot {slot}");
        }
    }
    assert_eq!(seen, vec![0, 1, 2, 3, 4, 0]);
    assert_eq!(pipeline.state(), PipelineState::Producing);
    Ok(())
}

#[test]
fn every_index_is_visited_once_per_pass_from_any_start() -> Result<()> {
    let records = 7usize;
    let cache = build_cache("visit-once", records)?;
    for seed in 0..5u64 {
        let source = SingleLabelSource::from_cache(&cache);
        let config = PipelineConfig {
            batch_size: 1,
            rand_skip: 100,
            seed: Some(seed),
        };
        let mut pipeline =
            PrefetchPipeline::new(cache.clone(), source, ByteTransform::instant(), config)?;
        let start = pipeline.cursor() as u64;
        assert!(start < records as u64);

        let mut batch = pipeline.new_batch();
        let mut seen = Vec::new();
        for _ in 0..=records {
            pipeline.consume(&mut batch)?;
            seen.push(batch.record_ids[0]);
        }
        assert_eq!(seen[0], start);
        let mut first_pass = seen[..records].to_vec();
        first_pass.sort_unstable();
        assert_eq!(first_pass, (0..records as u64).collect::<Vec<_>>());
        assert_eq!(seen[records], start, "seed {seed}");
    }
    Ok(())
}

#[test]
fn seeded_rand_skip_is_reproducible() -> Result<()> {
    let cache = build_cache("rand-skip", 9)?;
    let make = |seed| {
        let config = PipelineConfig {
            batch_size: 2,
            rand_skip: 1000,
            seed: Some(seed),
        };
        PrefetchPipeline::new(
            cache.clone(),
            SingleLabelSource::from_cache(&cache),
            ByteTransform::instant(),
            config,
        )
    };
    assert_eq!(make(42)?.cursor(), make(42)?.cursor());
    Ok(())
}

#[test]
fn single_label_values_follow_records() -> Result<()> {
    let cache = build_cache("single-label", 3)?;
    let table = LabelTable::parse(&format!(
        "3 1\n{} 10\n{} 11\n{} 12\n",
        image_name(2),
        image_name(0),
        image_name(1)
    ))?;
    let source = SingleLabelSource::from_label_table(table)?;
    let mut pipeline = PrefetchPipeline::new(cache, source, ByteTransform::instant(), cfg(3))?;
    let mut batch = pipeline.new_batch();
    pipeline.consume(&mut batch)?;

    assert_eq!(batch.labels.len(), 1);
    assert_eq!(batch.labels[0], vec![10.0, 11.0, 12.0]);
    // Row order of the label file drives the batch, not cache order.
    assert_eq!(batch.images[0][0], 2.0);
    assert_eq!(batch.images[0][SAMPLE_LEN], 0.0);
    Ok(())
}

#[test]
fn multi_label_heads_are_split_per_slot() -> Result<()> {
    let cache = build_cache("multi-label", 2)?;
    let table = LabelTable::parse(&format!(
        "2 3\n{} 1 2 3\n{} 4 5 6\n",
        image_name(0),
        image_name(1)
    ))?;
    let source = MultiLabelSource::new(table, vec![1, 2])?;
    let mut pipeline = PrefetchPipeline::new(cache, source, ByteTransform::instant(), cfg(2))?;
    let mut batch = pipeline.new_batch();
    pipeline.consume(&mut batch)?;

    assert_eq!(batch.labels[0], vec![1.0, 4.0]);
    assert_eq!(batch.labels[1], vec![2.0, 3.0, 5.0, 6.0]);
    Ok(())
}

#[test]
fn triplets_fill_three_regions() -> Result<()> {
    let cache = build_cache("triplet", 6)?;
    let list = TripletList::parse(&format!(
        "{} {} {}\n{} {} {}\n",
        image_name(0),
        image_name(1),
        image_name(2),
        image_name(3),
        image_name(4),
        image_name(5)
    ))?;
    let mut pipeline = PrefetchPipeline::new(
        cache,
        TripletSource::new(list),
        ByteTransform::instant(),
        cfg(3),
    )?;
    let mut batch = pipeline.new_batch();
    assert_eq!(batch.images.len(), 3);
    pipeline.consume(&mut batch)?;

    assert_eq!(batch.record_ids, vec![0, 1, 0]);
    let first = |region: usize, slot: usize| batch.images[region][slot * SAMPLE_LEN];
    assert_eq!((first(0, 0), first(1, 0), first(2, 0)), (0.0, 1.0, 2.0));
    assert_eq!((first(0, 1), first(1, 1), first(2, 1)), (3.0, 4.0, 5.0));
    assert_eq!((first(0, 2), first(1, 2), first(2, 2)), (0.0, 1.0, 2.0));
    Ok(())
}

#[test]
fn metrics_count_produced_batches() -> Result<()> {
    let cache = build_cache("metrics", 4)?;
    let source = SingleLabelSource::from_cache(&cache);
    let mut pipeline = PrefetchPipeline::new(cache, source, ByteTransform::instant(), cfg(2))?;
    let metrics = pipeline.metrics();
    let mut batch = pipeline.new_batch();
    for _ in 0..3 {
        pipeline.consume(&mut batch)?;
    }
    pipeline.shutdown();
    // Three consumed plus the one started after the last consume.
    assert_eq!(metrics.batches_produced_total.get(), 4);
    assert_eq!(metrics.samples_produced_total.get(), 8);
    assert_eq!(metrics.consume_wait.snapshot().count, 3);
    Ok(())
}
