//! Tests for sequencing and the persistence path of the pipeline

use biosignal_ring_buffer::{
    start_flush_daemon, FlushResult, MemorySink, PersistenceWriter, PipelineConfig, RawSample,
    RecordingHeader, SignalPipeline, StopToken,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn setup() -> (PipelineConfig, Arc<SignalPipeline>, MemorySink) {
    let config = PipelineConfig {
        min_fill: 1,
        ..Default::default()
    };
    let pipeline = Arc::new(SignalPipeline::new(&config).unwrap());
    let sink = MemorySink::new(RecordingHeader::from_config(&config));
    (config, pipeline, sink)
}

/// Sample `i` of a session, with pack numbers wrapping like the hardware does
fn sample(i: u64) -> RawSample {
    let v = i as f64 * 1e-6;
    RawSample::new((i % 2048) as u32, vec![v, v + 0.5e-6, -v, 0.0])
}

fn sequences(batches: &[biosignal_ring_buffer::SampleBatch]) -> Vec<(u64, u64)> {
    batches.iter().map(|b| (b.first_sequence, b.last_sequence)).collect()
}

/// Packs 2045..=2047 then 0, 1 map to a strictly increasing sequence
#[test]
fn test_rollover_is_compensated() {
    let (_, pipeline, sink) = setup();
    let mut writer = PersistenceWriter::new(pipeline.clone(), sink.clone());

    let batch: Vec<RawSample> = [2045u32, 2046, 2047, 0, 1]
        .iter()
        .map(|&p| RawSample::new(p, vec![0.0; 4]))
        .collect();
    let report = pipeline.ingest(&batch);
    assert_eq!(report.rollovers, 1);
    assert_eq!(report.last_sequence, Some(2049));

    assert_eq!(writer.flush_once(), FlushResult::Written(5));
    assert_eq!(sequences(&sink.batches()), vec![(2045, 2049)]);
}

/// Concatenating every flushed batch gives back the ingested stream, scaled to uV
#[test]
fn test_flushed_batches_reproduce_stream() {
    let (_, pipeline, sink) = setup();
    let mut writer = PersistenceWriter::new(pipeline.clone(), sink.clone());

    let total = 5000u64;
    let mut next = 0u64;
    while next < total {
        let len = (7 + next % 13).min(total - next);
        let packet: Vec<RawSample> = (next..next + len).map(sample).collect();
        pipeline.ingest(&packet);
        next += len;
        if next % 3 == 0 {
            writer.flush_once();
        }
    }
    writer.finish().unwrap();

    let recorded = sink.samples();
    assert_eq!(recorded[0].len() as u64, total);
    for (i, (&o1, &t3)) in recorded[0].iter().zip(&recorded[2]).enumerate() {
        assert!((o1 - i as f64).abs() < 1e-6, "O1 at {i}");
        assert!((t3 + i as f64).abs() < 1e-6, "T3 at {i}");
    }

    let batches = sink.batches();
    assert_eq!(batches[0].first_sequence, 0);
    assert!(batches.windows(2).all(|w| w[1].first_sequence == w[0].last_sequence + 1));
    assert_eq!(batches.last().unwrap().last_sequence, total - 1);
}

/// A failed tick loses only its own batch
#[test]
fn test_sink_failure_then_recovery() {
    let (_, pipeline, sink) = setup();
    let mut writer = PersistenceWriter::new(pipeline.clone(), sink.clone());

    pipeline.ingest(&(0..100).map(sample).collect::<Vec<_>>());
    assert_eq!(writer.flush_once(), FlushResult::Written(100));

    pipeline.ingest(&(100..250).map(sample).collect::<Vec<_>>());
    sink.fail_next(1);
    assert_eq!(writer.flush_once(), FlushResult::Dropped(150));

    pipeline.ingest(&(250..300).map(sample).collect::<Vec<_>>());
    assert_eq!(writer.flush_once(), FlushResult::Written(50));

    assert_eq!(sequences(&sink.batches()), vec![(0, 99), (250, 299)]);
    let gaps = sink.gaps();
    assert_eq!(gaps.len(), 1);
    assert_eq!((gaps[0].first_sequence, gaps[0].last_sequence), (100, 249));
    assert_eq!(gaps[0].sample_count, 150);

    let summary = writer.summary();
    assert_eq!(summary.batches_written, 2);
    assert_eq!(summary.samples_dropped, 150);
}

/// Malformed samples are skipped without losing their neighbours
#[test]
fn test_malformed_samples_do_not_reach_sink() {
    let (_, pipeline, sink) = setup();
    let mut writer = PersistenceWriter::new(pipeline.clone(), sink.clone());

    let mut packet: Vec<RawSample> = (0..10).map(sample).collect();
    packet[3].values.pop();
    packet[6].values[1] = f64::NAN;
    let report = pipeline.ingest(&packet);
    assert_eq!(report.accepted, 8);
    assert_eq!(report.skipped, 2);

    writer.flush_once();
    let batch = &sink.batches()[0];
    assert_eq!(batch.sample_count(), 8);
    assert_eq!(batch.first_sequence, 0);
    assert_eq!(batch.last_sequence, 9);
    assert_eq!(pipeline.stats().samples_skipped, 2);
}

/// The daemon drains a running producer and closes the sink exactly once
#[test]
fn test_flush_daemon_with_concurrent_producer() {
    let (_, pipeline, sink) = setup();
    let stop = StopToken::new();
    let daemon = start_flush_daemon(
        pipeline.clone(),
        sink.clone(),
        Duration::from_millis(5),
        stop.clone(),
    )
    .unwrap();

    let producer = {
        let pipeline = pipeline.clone();
        thread::spawn(move || {
            for chunk in 0..200u64 {
                let packet: Vec<RawSample> = (chunk * 10..chunk * 10 + 10).map(sample).collect();
                pipeline.ingest(&packet);
                if chunk % 20 == 0 {
                    thread::sleep(Duration::from_millis(2));
                }
            }
        })
    };

    producer.join().unwrap();
    stop.stop();
    let summary = daemon.join().unwrap();

    assert_eq!(summary.samples_written, 2000);
    assert_eq!(sink.close_calls(), 1);
    assert_eq!(sink.samples()[0].len(), 2000);
    assert_eq!(pipeline.staged_len(), 0);

    let batches = sink.batches();
    assert!(batches.windows(2).all(|w| w[1].first_sequence == w[0].last_sequence + 1));
}

/// Closing the sink fails the daemon join when the sink was already closed
#[test]
fn test_daemon_reports_close_failure() {
    let (_, pipeline, sink) = setup();
    let mut early = sink.clone();
    biosignal_ring_buffer::RecordingSink::close(&mut early).unwrap();

    let stop = StopToken::new();
    let daemon =
        start_flush_daemon(pipeline, sink.clone(), Duration::from_millis(5), stop.clone()).unwrap();
    stop.stop();

    assert!(daemon.join().is_err());
    assert_eq!(sink.close_calls(), 2);
}
