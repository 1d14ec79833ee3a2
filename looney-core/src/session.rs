//! # Tuner Session Module
//!
//! Lifecycle and scheduling of a listening session.
//!
//! ## Architecture
//! - **Capture thread**: creates and owns the [`SampleSource`], pushes
//!   blocks into a drop-oldest [`crate::queue`] queue
//! - **Worker thread**: ticks at the analysis interval, takes the freshest
//!   block, runs the [`Pipeline`] and publishes [`TunerEvent`]s
//! - **Communication**: crossbeam channels only; subscribers receive their
//!   own copy of every event
//!
//! The device is open exactly while the session reports `Listening`: the
//! worker joins the capture thread (which closes the device) before the
//! session is marked idle.

use crate::analysis::{AnalysisResult, Pipeline};
use crate::audio::{CpalSource, SampleSource, SourceProvider};
use crate::config::TunerConfig;
use crate::error::{TunerError, TunerResult};
use crate::queue::{block_queue, BlockConsumer, BlockProducer};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

/// Whether a session currently holds the input device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
}

/// Everything a session reports to its subscribers.
#[derive(Debug, Clone)]
pub enum TunerEvent {
    StateChanged(SessionState),
    /// One completed analysis cycle, pitched or not.
    Analysis(AnalysisResult),
    /// A cycle skipped because no block arrived in time.
    Gap {
        timestamp: SystemTime,
        error: TunerError,
    },
    /// A failure; fatal ones are followed by `StateChanged(Idle)`.
    Error(TunerError),
}

/// Fan-out of events to every live subscriber.
#[derive(Default)]
struct Subscribers {
    senders: Mutex<Vec<Sender<TunerEvent>>>,
}

impl Subscribers {
    fn add(&self) -> Receiver<TunerEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.lock().push(sender);
        receiver
    }

    fn publish(&self, event: TunerEvent) {
        // Senders are copied out so no lock is held while delivering.
        let senders = self.lock().clone();
        let closed: Vec<Sender<TunerEvent>> = senders
            .into_iter()
            .filter(|sender| sender.send(event.clone()).is_err())
            .collect();

        if !closed.is_empty() {
            self.lock()
                .retain(|sender| !closed.iter().any(|c| c.same_channel(sender)));
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<TunerEvent>>> {
        self.senders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle on the running worker thread.
struct Worker {
    shutdown_tx: Sender<()>,
    thread_handle: JoinHandle<()>,
    listening: Arc<AtomicBool>,
}

/// A start/stop controllable tuner emitting analysis events.
pub struct TunerSession {
    config: TunerConfig,
    provider: Arc<dyn SourceProvider>,
    subscribers: Arc<Subscribers>,
    worker: Option<Worker>,
}

impl TunerSession {
    /// Creates an idle session reading from sources made by `provider`.
    pub fn new(config: TunerConfig, provider: impl SourceProvider + 'static) -> TunerResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            provider: Arc::new(provider),
            subscribers: Arc::new(Subscribers::default()),
            worker: None,
        })
    }

    /// Creates an idle session on the default input device.
    pub fn with_default_device(config: TunerConfig) -> TunerResult<Self> {
        let provider = CpalSource::provider(&config);
        Self::new(config, provider)
    }

    pub fn config(&self) -> &TunerConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        match &self.worker {
            Some(worker) if worker.listening.load(Ordering::Acquire) => SessionState::Listening,
            _ => SessionState::Idle,
        }
    }

    /// Registers a new event receiver. Dropping it unsubscribes.
    pub fn subscribe(&self) -> Receiver<TunerEvent> {
        self.subscribers.add()
    }

    /// Opens the device and starts the analysis cadence.
    ///
    /// The source is created and opened on the capture thread; this call
    /// blocks until the open has succeeded or failed. Subscribers then see
    /// `StateChanged(Listening)` followed by one event per tick.
    ///
    /// # Returns
    /// * `Ok(())` - The session is listening
    /// * `Err(TunerError::AlreadyListening)` - A session is already running;
    ///   it is left untouched
    /// * `Err(TunerError::DeviceUnavailable)` - The device could not be
    ///   opened; the session stays idle and an `Error` event is published
    pub fn start(&mut self) -> TunerResult<()> {
        self.reap_finished_worker();
        if self.worker.is_some() {
            return Err(TunerError::AlreadyListening);
        }

        let (producer, consumer) = block_queue(self.config.queue_capacity);
        let (capture_shutdown_tx, capture_shutdown_rx) = crossbeam_channel::bounded(1);
        let (fault_tx, fault_rx) = crossbeam_channel::bounded(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let provider = Arc::clone(&self.provider);
        let read_timeout = self.config.read_timeout();
        let capture = thread::Builder::new()
            .name("looney-capture".into())
            .spawn(move || {
                capture_loop(
                    &*provider,
                    read_timeout,
                    producer,
                    ready_tx,
                    capture_shutdown_rx,
                    fault_tx,
                )
            })
            .map_err(|e| TunerError::device(format!("failed to spawn capture thread: {e}")));
        let capture = match capture {
            Ok(handle) => handle,
            Err(err) => return Err(self.fail_start(err)),
        };

        let opened = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(TunerError::device("capture thread exited while opening")));
        if let Err(err) = opened {
            let _ = capture.join();
            return Err(self.fail_start(err));
        }

        let listening = Arc::new(AtomicBool::new(true));
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let context = WorkerContext {
            pipeline: Pipeline::new(&self.config),
            consumer,
            interval: self.config.analysis_interval(),
            read_timeout,
            subscribers: Arc::clone(&self.subscribers),
            listening: Arc::clone(&listening),
            shutdown_rx,
            fault_rx,
            capture: Some(capture),
            capture_shutdown_tx,
        };

        // Published before the worker exists, so a fatal error in its first
        // cycle cannot report Idle ahead of Listening.
        log::info!(
            "[SESSION] Listening with the {} estimator",
            context.pipeline.estimator_name()
        );
        self.subscribers
            .publish(TunerEvent::StateChanged(SessionState::Listening));

        let thread_handle = match thread::Builder::new()
            .name("looney-analysis".into())
            .spawn(move || context.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                // The context, and with it the capture handle, was dropped;
                // the capture thread sees its shutdown channel close and exits.
                listening.store(false, Ordering::Release);
                let err = TunerError::device(format!("failed to spawn analysis thread: {e}"));
                let err = self.fail_start(err);
                self.subscribers
                    .publish(TunerEvent::StateChanged(SessionState::Idle));
                return Err(err);
            }
        };

        self.worker = Some(Worker {
            shutdown_tx,
            thread_handle,
            listening,
        });
        Ok(())
    }

    /// Stops listening and releases the device. Does nothing when idle.
    pub fn stop(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };

        log::info!("[SESSION] Stopping...");
        let _ = worker.shutdown_tx.send(());
        if worker.thread_handle.join().is_err() {
            log::error!("[SESSION] Analysis thread panicked");
        }
        if worker.listening.swap(false, Ordering::AcqRel) {
            self.subscribers
                .publish(TunerEvent::StateChanged(SessionState::Idle));
        }
        log::info!("[SESSION] Idle");
    }

    /// Joins a worker that ended on its own after a fatal error.
    fn reap_finished_worker(&mut self) {
        if self.state() == SessionState::Idle {
            self.stop();
        }
    }

    fn fail_start(&self, err: TunerError) -> TunerError {
        log::error!("[SESSION] Failed to start: {}", err);
        self.subscribers.publish(TunerEvent::Error(err.clone()));
        err
    }
}

impl Drop for TunerSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the capture thread: open, read until told to stop, close.
fn capture_loop(
    provider: &dyn SourceProvider,
    read_timeout: Duration,
    producer: BlockProducer,
    ready_tx: Sender<TunerResult<()>>,
    shutdown_rx: Receiver<()>,
    fault_tx: Sender<TunerError>,
) {
    let mut source: Box<dyn SampleSource> = provider.create();
    if let Err(err) = source.open() {
        source.close();
        let _ = ready_tx.send(Err(err));
        return;
    }
    let _ = ready_tx.send(Ok(()));
    log::info!("[CAPTURE] Capture started");

    loop {
        match shutdown_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        match source.read_block(read_timeout) {
            Ok(block) => producer.push(block),
            Err(TunerError::DeviceReadTimeout { timeout }) => {
                log::debug!("[CAPTURE] No block within {:?}", timeout);
            }
            Err(err) => {
                log::error!("[CAPTURE] Device failure: {}", err);
                let _ = fault_tx.send(err);
                break;
            }
        }
    }

    source.close();
    log::info!("[CAPTURE] Device closed");
}

/// State moved into the worker thread.
struct WorkerContext {
    pipeline: Pipeline,
    consumer: BlockConsumer,
    interval: Duration,
    read_timeout: Duration,
    subscribers: Arc<Subscribers>,
    listening: Arc<AtomicBool>,
    shutdown_rx: Receiver<()>,
    fault_rx: Receiver<TunerError>,
    capture: Option<JoinHandle<()>>,
    capture_shutdown_tx: Sender<()>,
}

impl WorkerContext {
    fn run(mut self) {
        let ticker = crossbeam_channel::tick(self.interval);
        let shutdown_rx = self.shutdown_rx.clone();
        let fault_rx = self.fault_rx.clone();
        let fatal = loop {
            crossbeam_channel::select! {
                recv(shutdown_rx) -> _ => break None,
                recv(fault_rx) -> msg => {
                    break Some(msg.unwrap_or_else(|_| {
                        TunerError::device("capture thread exited unexpectedly")
                    }));
                }
                recv(ticker) -> _ => {
                    if let Err(err) = self.run_cycle() {
                        // A capture fault explains a drained queue better.
                        break Some(fault_rx.try_recv().unwrap_or(err));
                    }
                }
            }
        };

        self.join_capture();

        if let Some(err) = fatal {
            log::error!("[SESSION] Stopping after fatal error: {}", err);
            self.subscribers.publish(TunerEvent::Error(err));
            if self.listening.swap(false, Ordering::AcqRel) {
                self.subscribers
                    .publish(TunerEvent::StateChanged(SessionState::Idle));
            }
        }
        log::debug!(
            "[SESSION] Analysis loop finished, {} block(s) dropped",
            self.consumer.dropped()
        );
    }

    /// One tick. Returns an error only when the session must stop.
    fn run_cycle(&mut self) -> TunerResult<()> {
        let block = match self.consumer.latest(self.read_timeout) {
            Ok(block) => block,
            Err(err @ TunerError::DeviceReadTimeout { .. }) => {
                log::warn!("[SESSION] Skipping cycle: {}", err);
                self.subscribers.publish(TunerEvent::Gap {
                    timestamp: SystemTime::now(),
                    error: err,
                });
                return Ok(());
            }
            Err(err) => return Err(err),
        };

        let pipeline = &mut self.pipeline;
        match panic::catch_unwind(AssertUnwindSafe(|| pipeline.analyze(&block))) {
            Ok(Ok(result)) => {
                self.subscribers.publish(TunerEvent::Analysis(result));
                Ok(())
            }
            Ok(Err(err)) if err.is_fatal() => Err(err),
            Ok(Err(err)) => {
                self.subscribers.publish(TunerEvent::Error(err));
                Ok(())
            }
            Err(payload) => {
                let err = TunerError::AnalysisFailed {
                    reason: panic_message(payload.as_ref()),
                };
                log::error!("[SESSION] {}", err);
                self.subscribers.publish(TunerEvent::Error(err));
                Ok(())
            }
        }
    }

    /// Stops the capture thread and waits until the device is closed.
    fn join_capture(&mut self) {
        let _ = self.capture_shutdown_tx.send(());
        if let Some(handle) = self.capture.take() {
            if handle.join().is_err() {
                log::error!("[CAPTURE] Capture thread panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "analysis panicked".to_string()
    }
}
