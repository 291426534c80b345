//! Sensor device abstraction
//!
//! A `SensorDevice` is whatever delivers raw samples: a vendor SDK binding, a
//! file replay, or the `SyntheticSensor` below. The session registers one
//! callback, starts the stream and later stops it. The device calls the
//! callback synchronously from its own thread with each packet it receives.

use crate::error::DeviceError;
use crate::memory::{RawSample, PACK_NUMBER_MODULUS};
use crate::stop::StopToken;
use log::{debug, info};
use parking_lot::Mutex;
use std::f64::consts::TAU;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Callback receiving each packet of raw samples
pub type IngestCallback = Box<dyn FnMut(&[RawSample]) + Send>;

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Source of raw sample packets
pub trait SensorDevice: Send {
    /// Register the packet callback, or clear it with `None`
    fn set_callback(&mut self, callback: Option<IngestCallback>);

    /// Start streaming packets to the registered callback
    fn start_signal(&mut self) -> Result<()>;

    /// Stop streaming; no callback runs after this returns
    fn stop_signal(&mut self) -> Result<()>;
}

/// Deterministic packet generator
///
/// Every channel carries a small sine wave. One channel additionally jumps by
/// `blink_amplitude` for a short stretch once per `blink_period` samples, which
/// looks like an eye blink to the artifact detector.
#[derive(Debug, Clone)]
pub struct SyntheticSignal {
    channel_count: usize,
    sample_rate_hz: f64,
    amplitude: f64,
    blink_channel: Option<usize>,
    blink_amplitude: f64,
    blink_period: u64,
    blink_length: u64,
    next_index: u64,
    pack_offset: u64,
}

impl SyntheticSignal {
    /// Generator for `channel_count` channels at `sample_rate_hz`
    pub fn new(channel_count: usize, sample_rate_hz: f64) -> Self {
        Self {
            channel_count,
            sample_rate_hz,
            amplitude: 1e-5,
            blink_channel: None,
            blink_amplitude: 2e-4,
            blink_period: (sample_rate_hz * 2.0) as u64,
            blink_length: (sample_rate_hz * 0.1).max(1.0) as u64,
            next_index: 0,
            pack_offset: 0,
        }
    }

    /// Add blink steps on `channel` every `period` samples
    pub fn with_blinks(mut self, channel: usize, period: u64) -> Self {
        self.blink_channel = Some(channel);
        self.blink_period = period.max(1);
        self
    }

    /// Start the pack counter at `pack_number` instead of 0
    pub fn with_first_pack(mut self, pack_number: u32) -> Self {
        self.pack_offset = pack_number as u64;
        self
    }

    /// Number of samples generated so far
    pub fn generated(&self) -> u64 {
        self.next_index
    }

    /// Generate the next `len` samples
    pub fn next_packet(&mut self, len: usize) -> Vec<RawSample> {
        (0..len).map(|_| self.next_sample()).collect()
    }

    fn next_sample(&mut self) -> RawSample {
        let index = self.next_index;
        self.next_index += 1;

        let t = index as f64 / self.sample_rate_hz;
        let mut values: Vec<f64> = (0..self.channel_count)
            .map(|c| self.amplitude * (TAU * (8.0 + c as f64) * t).sin())
            .collect();

        if let Some(channel) = self.blink_channel {
            let phase = index % self.blink_period;
            if phase >= self.blink_period / 2 && phase < self.blink_period / 2 + self.blink_length {
                if let Some(v) = values.get_mut(channel) {
                    *v += self.blink_amplitude;
                }
            }
        }

        let pack_number = ((index + self.pack_offset) % PACK_NUMBER_MODULUS) as u32;
        RawSample::new(pack_number, values)
    }
}

/// Sensor that streams a `SyntheticSignal` from a background thread
pub struct SyntheticSensor {
    signal: Arc<Mutex<SyntheticSignal>>,
    callback: Arc<Mutex<Option<IngestCallback>>>,
    packet_len: usize,
    packet_interval: Duration,
    worker: Option<(StopToken, JoinHandle<()>)>,
}

impl SyntheticSensor {
    /// Stream `signal` in packets of `packet_len` samples at its sample rate
    pub fn new(signal: SyntheticSignal, packet_len: usize) -> Self {
        let packet_len = packet_len.max(1);
        let packet_interval = Duration::from_secs_f64(packet_len as f64 / signal.sample_rate_hz);
        Self {
            signal: Arc::new(Mutex::new(signal)),
            callback: Arc::new(Mutex::new(None)),
            packet_len,
            packet_interval,
            worker: None,
        }
    }

    /// Whether the acquisition thread is running
    pub fn is_streaming(&self) -> bool {
        self.worker.is_some()
    }

    /// Number of samples delivered so far
    pub fn generated(&self) -> u64 {
        self.signal.lock().generated()
    }
}

impl SensorDevice for SyntheticSensor {
    fn set_callback(&mut self, callback: Option<IngestCallback>) {
        *self.callback.lock() = callback;
    }

    fn start_signal(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(DeviceError::AlreadyStarted);
        }
        if self.callback.lock().is_none() {
            return Err(DeviceError::NoCallback);
        }

        let stop = StopToken::new();
        let worker_stop = stop.clone();
        let signal = self.signal.clone();
        let callback = self.callback.clone();
        let packet_len = self.packet_len;
        let interval = self.packet_interval;

        let handle = thread::Builder::new()
            .name("synthetic-sensor".to_string())
            .spawn(move || {
                let mut next_tick = Instant::now();
                loop {
                    let packet = signal.lock().next_packet(packet_len);
                    if let Some(cb) = callback.lock().as_mut() {
                        cb(&packet);
                    }

                    next_tick += interval;
                    let wait = next_tick.saturating_duration_since(Instant::now());
                    if worker_stop.wait_timeout(wait) {
                        break;
                    }
                }
            })?;

        info!(
            "Synthetic sensor streaming {} sample packets every {:?}",
            packet_len, interval
        );
        self.worker = Some((stop, handle));
        Ok(())
    }

    fn stop_signal(&mut self) -> Result<()> {
        let Some((stop, handle)) = self.worker.take() else {
            return Ok(());
        };
        stop.stop();
        handle
            .join()
            .map_err(|_| DeviceError::Refused("acquisition thread panicked".to_string()))?;
        debug!("Synthetic sensor stopped after {} samples", self.generated());
        Ok(())
    }
}

impl Drop for SyntheticSensor {
    fn drop(&mut self) {
        let _ = self.stop_signal();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_numbers_wrap() {
        let mut signal = SyntheticSignal::new(4, 250.0).with_first_pack(2045);
        let packs: Vec<u32> = signal.next_packet(5).iter().map(|s| s.pack_number).collect();
        assert_eq!(packs, vec![2045, 2046, 2047, 0, 1]);
    }

    #[test]
    fn test_blinks_land_on_one_channel() {
        let mut signal = SyntheticSignal::new(4, 250.0).with_blinks(2, 100);
        let samples = signal.next_packet(100);

        let peak = |c: usize| samples.iter().map(|s| s.values[c].abs()).fold(0.0, f64::max);
        assert!(peak(2) > 1e-4);
        assert!(peak(0) < 2e-5);
        assert!(samples.iter().all(|s| s.validate(4).is_ok()));
    }

    #[test]
    fn test_start_requires_callback() {
        let mut sensor = SyntheticSensor::new(SyntheticSignal::new(4, 250.0), 25);
        assert!(matches!(sensor.start_signal(), Err(DeviceError::NoCallback)));
    }

    #[test]
    fn test_stream_and_stop() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();

        let mut sensor = SyntheticSensor::new(SyntheticSignal::new(2, 1000.0), 10);
        sensor.set_callback(Some(Box::new(move |packet: &[RawSample]| {
            sink.lock().extend(packet.iter().map(|s| s.pack_number));
        })));

        sensor.start_signal().unwrap();
        assert!(matches!(sensor.start_signal(), Err(DeviceError::AlreadyStarted)));
        thread::sleep(Duration::from_millis(50));
        sensor.stop_signal().unwrap();
        assert!(!sensor.is_streaming());

        let after_stop = received.lock().len();
        assert!(after_stop >= 10);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(received.lock().len(), after_stop);

        let packs = received.lock().clone();
        assert!(packs.windows(2).all(|w| w[1] == w[0] + 1));
    }
}
