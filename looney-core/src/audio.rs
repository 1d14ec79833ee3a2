//! # Audio Capture Module
//!
//! This module defines the audio input boundary of the tuner: the immutable
//! [`AudioBlock`] handed through the pipeline, the [`SampleSource`] trait a
//! capture device implements, and two sources:
//!
//! - [`CpalSource`]: real-time capture from the default input device using
//!   CPAL (Cross-Platform Audio Library)
//! - [`SyntheticSource`]: a deterministic sine generator for simulation and tests
//!
//! Sources are created on the capture thread through a [`SourceProvider`],
//! because a CPAL stream cannot be moved between threads on every platform.

use crate::config::TunerConfig;
use crate::error::{TunerError, TunerResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SupportedStreamConfigRange};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A fixed-size block of mono samples normalized to [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBlock {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Builds a block from signed 16-bit PCM.
    pub fn from_i16(pcm: &[i16], sample_rate: u32) -> Self {
        let samples = pcm.iter().map(|&s| s as f32 / 32768.0).collect();
        Self::new(samples, sample_rate)
    }

    /// A pure sine tone starting at phase zero.
    pub fn sine(frequency: f32, amplitude: f32, sample_rate: u32, len: usize) -> Self {
        let step = TAU * frequency as f64 / sample_rate as f64;
        let samples = (0..len)
            .map(|i| (amplitude as f64 * (step * i as f64).sin()) as f32)
            .collect();
        Self::new(samples, sample_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root-mean-square level.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        (self.samples.iter().map(|&s| s * s).sum::<f32>() / self.samples.len() as f32).sqrt()
    }
}

/// A live mono PCM input yielding fixed-size blocks.
///
/// A source is opened once per listening session, read from the capture
/// thread and closed before that thread exits.
pub trait SampleSource {
    /// Acquires the device. Fails with [`TunerError::DeviceUnavailable`].
    fn open(&mut self) -> TunerResult<()>;

    /// Blocks until the next full block is available or `timeout` elapses.
    fn read_block(&mut self, timeout: Duration) -> TunerResult<AudioBlock>;

    /// Releases the device. Closing a closed source does nothing.
    fn close(&mut self);
}

/// Creates a fresh [`SampleSource`] on the thread that will own it.
pub trait SourceProvider: Send + Sync {
    fn create(&self) -> Box<dyn SampleSource>;
}

impl<F> SourceProvider for F
where
    F: Fn() -> Box<dyn SampleSource> + Send + Sync,
{
    fn create(&self) -> Box<dyn SampleSource> {
        self()
    }
}

/// Splits interleaved device callbacks into mono blocks of a fixed size.
struct BlockFramer {
    block_size: usize,
    channels: usize,
    channel_pos: usize,
    buffer: Vec<f32>,
    sender: Sender<Vec<f32>>,
}

impl BlockFramer {
    fn new(block_size: usize, channels: usize, sender: Sender<Vec<f32>>) -> Self {
        Self {
            block_size,
            channels: channels.max(1),
            channel_pos: 0,
            buffer: Vec::with_capacity(block_size * 2),
            sender,
        }
    }

    fn push(&mut self, data: impl Iterator<Item = f32>) {
        // Keep the first channel of every frame.
        for sample in data {
            if self.channel_pos == 0 {
                self.buffer.push(sample);
            }
            self.channel_pos = (self.channel_pos + 1) % self.channels;
        }

        while self.buffer.len() >= self.block_size {
            let frame_to_send = self.buffer[..self.block_size].to_vec();
            // A full channel means the reader is behind; the block is dropped.
            let _ = self.sender.try_send(frame_to_send);
            self.buffer.drain(..self.block_size);
        }
    }
}

/// Real-time capture from the default input device.
pub struct CpalSource {
    sample_rate: u32,
    block_size: usize,
    stream: Option<cpal::Stream>,
    receiver: Option<Receiver<Vec<f32>>>,
    device_lost: Arc<AtomicBool>,
}

impl CpalSource {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            stream: None,
            receiver: None,
            device_lost: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Provider that opens the default input device with `config`'s format.
    pub fn provider(config: &TunerConfig) -> impl SourceProvider + 'static {
        let (sample_rate, block_size) = (config.sample_rate, config.block_size);
        move || Box::new(CpalSource::new(sample_rate, block_size)) as Box<dyn SampleSource>
    }
}

impl SampleSource for CpalSource {
    /// Opens the default input device.
    ///
    /// This function:
    /// 1. Selects the default audio input device
    /// 2. Picks a mono (or first-channel) f32/i16 configuration at the target rate
    /// 3. Sets up a callback that frames audio into fixed-size blocks
    fn open(&mut self) -> TunerResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| TunerError::device("No input device available"))?;

        let name = device.name().unwrap_or_else(|_| "<unnamed device>".to_string());
        log::info!("[CPAL] Using audio input device: {}", name);

        let configs = device
            .supported_input_configs()
            .map_err(|e| TunerError::device(format!("cannot query input formats of {name}: {e}")))?
            .collect::<Vec<_>>();
        let supported = find_supported_config(configs, self.sample_rate).ok_or_else(|| {
            TunerError::device(format!(
                "{name} offers no f32/i16 input format at {} Hz",
                self.sample_rate
            ))
        })?;

        let channels = supported.channels() as usize;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported
            .with_sample_rate(cpal::SampleRate(self.sample_rate))
            .into();
        log::info!(
            "[CPAL] Selected {} Hz, {} channel(s), {:?}",
            self.sample_rate,
            channels,
            sample_format
        );

        let (sender, receiver) = crossbeam_channel::bounded(4);
        let mut framer = BlockFramer::new(self.block_size, channels, sender);

        self.device_lost.store(false, Ordering::Release);
        let device_lost = Arc::clone(&self.device_lost);
        let err_fn = move |err: cpal::StreamError| {
            log::error!("[CPAL] An error occurred on the audio stream: {}", err);
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                device_lost.store(true, Ordering::Release);
            }
        };

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    framer.push(data.iter().copied());
                },
                err_fn,
                None,
            ),
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    framer.push(data.iter().map(|&s| s as f32 / 32768.0));
                },
                err_fn,
                None,
            ),
            other => {
                return Err(TunerError::device(format!(
                    "unsupported sample format {other:?}"
                )));
            }
        }
        .map_err(|e| TunerError::device(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| TunerError::device(format!("failed to start input stream: {e}")))?;

        self.stream = Some(stream);
        self.receiver = Some(receiver);
        Ok(())
    }

    fn read_block(&mut self, timeout: Duration) -> TunerResult<AudioBlock> {
        if self.device_lost.load(Ordering::Acquire) {
            return Err(TunerError::device("input device disappeared"));
        }
        let receiver = self
            .receiver
            .as_ref()
            .ok_or_else(|| TunerError::device("input stream is not open"))?;

        match receiver.recv_timeout(timeout) {
            Ok(samples) => Ok(AudioBlock::new(samples, self.sample_rate)),
            Err(RecvTimeoutError::Timeout) => Err(TunerError::DeviceReadTimeout { timeout }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(TunerError::device("input stream closed unexpectedly"))
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::warn!("[CPAL] Error pausing stream: {}", e);
            }
            drop(stream);
            log::info!("[CPAL] Input stream closed");
        }
        self.receiver = None;
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Finds the best supported input configuration for the target sample rate.
///
/// Only f32 and i16 ranges that contain `target_rate` qualify. Mono beats
/// multi-channel, and f32 beats i16.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| matches!(c.sample_format(), SampleFormat::F32 | SampleFormat::I16))
        .filter(|c| c.min_sample_rate().0 <= target_rate && target_rate <= c.max_sample_rate().0)
        .min_by_key(|c| {
            (
                c.channels() != 1,
                c.sample_format() != SampleFormat::F32,
                c.channels(),
            )
        })
}

/// Peak level of generated tones.
const SYNTHETIC_AMPLITUDE: f64 = 0.5;

/// A sine generator standing in for a microphone.
///
/// Phase is continuous across blocks. When paced, each read waits out the
/// block's real-time duration so the capture loop runs at device speed.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    frequency: f32,
    sample_rate: u32,
    block_size: usize,
    phase: f64,
    paced: bool,
    is_open: bool,
    last_read: Option<Instant>,
}

impl SyntheticSource {
    pub fn new(frequency: f32, sample_rate: u32, block_size: usize) -> Self {
        Self {
            frequency,
            sample_rate,
            block_size,
            phase: 0.0,
            paced: true,
            is_open: false,
            last_read: None,
        }
    }

    /// Produce blocks as fast as they are read.
    pub fn unpaced(mut self) -> Self {
        self.paced = false;
        self
    }

    pub fn provider(config: &TunerConfig, frequency: f32) -> impl SourceProvider + 'static {
        let (sample_rate, block_size) = (config.sample_rate, config.block_size);
        move || {
            Box::new(SyntheticSource::new(frequency, sample_rate, block_size))
                as Box<dyn SampleSource>
        }
    }

    fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }

    fn next_block(&mut self) -> AudioBlock {
        let step = TAU * self.frequency as f64 / self.sample_rate as f64;
        let samples = (0..self.block_size)
            .map(|i| (SYNTHETIC_AMPLITUDE * (self.phase + step * i as f64).sin()) as f32)
            .collect();
        self.phase = (self.phase + step * self.block_size as f64) % TAU;
        AudioBlock::new(samples, self.sample_rate)
    }
}

impl SampleSource for SyntheticSource {
    fn open(&mut self) -> TunerResult<()> {
        self.is_open = true;
        self.last_read = None;
        Ok(())
    }

    fn read_block(&mut self, timeout: Duration) -> TunerResult<AudioBlock> {
        if !self.is_open {
            return Err(TunerError::device("synthetic source is not open"));
        }

        if self.paced {
            let wait = self
                .last_read
                .map(|last| self.block_duration().saturating_sub(last.elapsed()))
                .unwrap_or_default();
            if wait > timeout {
                std::thread::sleep(timeout);
                return Err(TunerError::DeviceReadTimeout { timeout });
            }
            std::thread::sleep(wait);
            self.last_read = Some(Instant::now());
        }

        Ok(self.next_block())
    }

    fn close(&mut self) {
        self.is_open = false;
    }
}
