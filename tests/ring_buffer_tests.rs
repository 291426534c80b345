//! Tests for the display window served by the pipeline ring buffer

use biosignal_ring_buffer::memory::ring::SampleRing;
use biosignal_ring_buffer::{PipelineConfig, RawSample, SignalPipeline};
use std::sync::Arc;
use std::thread;

fn pipeline_with_capacity(capacity: usize, min_fill: usize) -> SignalPipeline {
    // 10 Hz makes the window capacity equal to its duration in tenths of a second
    let config = PipelineConfig {
        sample_rate_hz: 10.0,
        window_seconds: capacity as f64 / 10.0,
        min_fill,
        ..Default::default()
    };
    SignalPipeline::new(&config).unwrap()
}

fn samples(range: std::ops::Range<u32>) -> Vec<RawSample> {
    range
        .map(|i| RawSample::new(i % 2048, vec![i as f64, -(i as f64), 0.0, 1.0]))
        .collect()
}

/// Fewer writes than the capacity come back exactly, starting at time 0
#[test]
fn test_partial_window_in_order() {
    let pipeline = pipeline_with_capacity(2500, 50);
    pipeline.ingest_at(&samples(0..50), 5_000_000_000);

    let frame = pipeline.read_window().expect("window should be served");
    assert_eq!(frame.len(), 50);
    assert_eq!(frame.relative_timestamps[0], 0.0);
    assert_eq!(
        frame.channel("O1").unwrap(),
        (0..50).map(|v| v as f64).collect::<Vec<_>>().as_slice()
    );
    assert_eq!(frame.channel("O2").unwrap()[49], -49.0);
}

/// More writes than the capacity keep only the most recent ones
#[test]
fn test_wrapped_window_keeps_latest() {
    let pipeline = pipeline_with_capacity(10, 100);
    pipeline.ingest_at(&samples(0..15), 0);

    let frame = pipeline.read_window().expect("full ring is always served");
    assert_eq!(
        frame.channel("O1").unwrap(),
        &[5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0]
    );
    assert_eq!(frame.relative_timestamps[0], 0.0);
    assert!((frame.relative_timestamps[9] - 0.9).abs() < 1e-9);
}

/// Reading twice without a write in between returns the same window
#[test]
fn test_snapshot_is_idempotent() {
    let pipeline = pipeline_with_capacity(10, 1);
    pipeline.ingest_at(&samples(0..23), 0);

    let first = pipeline.read_window().unwrap();
    let second = pipeline.read_window().unwrap();
    assert_eq!(first, second);
}

/// The window is withheld until the minimum fill is reached
#[test]
fn test_insufficient_data_is_not_an_error() {
    let pipeline = pipeline_with_capacity(2500, 100);
    assert!(pipeline.read_window().is_none());

    pipeline.ingest_at(&samples(0..99), 0);
    assert!(pipeline.read_window().is_none());
    assert_eq!(pipeline.buffered_len(), 99);

    pipeline.ingest_at(&samples(99..100), 10_000_000_000);
    assert_eq!(pipeline.read_window().unwrap().len(), 100);
}

/// The ring can be used on its own
#[test]
fn test_standalone_ring_wraps_many_times() {
    let mut ring = SampleRing::new(1, 7).with_min_fill(1);
    for i in 0..100u64 {
        ring.write(&[i as f64], i * 1_000);
    }

    let snapshot = ring.snapshot().unwrap();
    assert_eq!(snapshot.channels[0], (93..100).map(|v| v as f64).collect::<Vec<_>>());
    assert_eq!(ring.total_written(), 100);
    assert!(ring.is_full());
}

/// Readers running next to the producer always see an ordered window
#[test]
fn test_concurrent_reads_never_tear() {
    let pipeline = Arc::new(pipeline_with_capacity(250, 1));

    let producer = {
        let pipeline = pipeline.clone();
        thread::spawn(move || {
            for chunk in 0..400u32 {
                let start = chunk * 5;
                pipeline.ingest_at(&samples(start..start + 5), start as u64 * 100_000_000);
            }
        })
    };

    let reader = {
        let pipeline = pipeline.clone();
        thread::spawn(move || {
            let mut reads = 0;
            while reads < 200 {
                if let Some(frame) = pipeline.read_window() {
                    let o1 = frame.channel("O1").unwrap();
                    let o2 = frame.channel("O2").unwrap();
                    assert!(o1.windows(2).all(|w| w[1] == w[0] + 1.0), "window out of order");
                    assert!(o1.iter().zip(o2).all(|(a, b)| *a == -*b), "torn sample");
                    assert!(frame.relative_timestamps.windows(2).all(|w| w[0] < w[1]));
                    reads += 1;
                }
                thread::yield_now();
            }
        })
    };

    producer.join().unwrap();
    reader.join().unwrap();
}
