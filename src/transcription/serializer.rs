//! # Inference Serializer
//!
//! The transcription engine must never be entered by two callers at once, yet any number of
//! sessions may commit at any moment. This module puts a FIFO queue in front of the engine
//! and gives the engine to exactly one dedicated OS thread (the worker) for the lifetime of
//! the process. Sessions only ever touch the queue, so no lock around the engine is needed.
//!
//! ## Guarantees:
//! - **Non-blocking submission**: `submit` pushes onto an unbounded channel and returns
//! - **Single flight**: only the worker thread calls the engine, one job at a time
//! - **FIFO across sessions**: jobs run in the order they reached the queue, which is also
//!   the order of the sequence numbers handed out by `submit`
//! - **Containment**: engine errors and panics become an empty result for that job only
//!
//! ## Latency trade-off:
//! Serialization is not free: a long utterance from one client delays every job queued
//! behind it, whoever sent it. There is no priority and no preemption.

use crate::config::TranscriptionSettings;
use crate::error::{GatewayError, GatewayResult};
use crate::transcription::engine::TranscriptionEngine;
use crate::transcription::job::{Disposition, JobOutcome, TranscriptionJob};
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

/// Worker behaviour that comes from configuration.
#[derive(Debug, Clone)]
pub struct SerializerSettings {
    /// Jobs shorter than this are answered with empty text without calling the engine
    pub min_utterance_seconds: f64,
}

impl Default for SerializerSettings {
    fn default() -> Self {
        Self {
            min_utterance_seconds: 0.5,
        }
    }
}

impl From<&TranscriptionSettings> for SerializerSettings {
    fn from(settings: &TranscriptionSettings) -> Self {
        Self {
            min_utterance_seconds: settings.min_utterance_seconds,
        }
    }
}

/// Counters shared between the worker and every handle.
#[derive(Debug, Default)]
struct WorkerCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    skipped_short: AtomicU64,
    engine_failures: AtomicU64,
    undeliverable: AtomicU64,
    queue_depth: AtomicUsize,
}

/// Point-in-time view of the worker, for health and metrics endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SerializerStats {
    pub model: String,
    pub submitted: u64,
    pub completed: u64,
    pub skipped_short: u64,
    pub engine_failures: u64,
    pub undeliverable: u64,
    pub queue_depth: usize,
}

/// Entry point for starting the inference worker.
pub struct InferenceSerializer;

impl InferenceSerializer {
    /// Move `engine` onto a new worker thread and return the submission handle plus a
    /// monitor that resolves when the worker stops.
    ///
    /// The worker runs until every [`InferenceHandle`] has been dropped.
    pub fn spawn<E>(
        engine: E,
        settings: SerializerSettings,
    ) -> GatewayResult<(InferenceHandle, WorkerMonitor)>
    where
        E: TranscriptionEngine + 'static,
    {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel::<()>();
        let counters = Arc::new(WorkerCounters::default());
        let model: Arc<str> = Arc::from(engine.model_name());

        let worker = Worker {
            engine,
            settings,
            counters: counters.clone(),
        };

        std::thread::Builder::new()
            .name("inference-worker".to_string())
            .spawn(move || {
                // Dropped when the thread ends, including by unwinding.
                let _exit_signal = exit_tx;
                worker.run(queue_rx);
            })?;

        let handle = InferenceHandle {
            queue: Arc::new(Mutex::new(SubmitQueue {
                sender: queue_tx,
                next_seq: 0,
            })),
            counters,
            model,
        };

        Ok((handle, WorkerMonitor { exit: exit_rx }))
    }
}

struct SubmitQueue {
    sender: mpsc::UnboundedSender<TranscriptionJob>,
    next_seq: u64,
}

/// Cloneable handle used by sessions to enqueue jobs.
#[derive(Clone)]
pub struct InferenceHandle {
    queue: Arc<Mutex<SubmitQueue>>,
    counters: Arc<WorkerCounters>,
    model: Arc<str>,
}

impl InferenceHandle {
    /// Enqueue `job` and return its global sequence number. Never blocks on inference.
    ///
    /// Sequence numbers are assigned under the same lock as the enqueue, so they match
    /// the order in which the worker will process the jobs.
    pub fn submit(&self, mut job: TranscriptionJob) -> GatewayResult<u64> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = queue.next_seq + 1;
        job.seq = seq;

        self.counters.queue_depth.fetch_add(1, Ordering::SeqCst);
        if queue.sender.send(job).is_err() {
            self.counters.queue_depth.fetch_sub(1, Ordering::SeqCst);
            return Err(GatewayError::WorkerUnavailable);
        }

        queue.next_seq = seq;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(seq)
    }

    /// Whether the worker is still accepting jobs.
    pub fn is_running(&self) -> bool {
        !self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sender
            .is_closed()
    }

    pub fn queue_depth(&self) -> usize {
        self.counters.queue_depth.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> SerializerStats {
        SerializerStats {
            model: self.model.to_string(),
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            skipped_short: self.counters.skipped_short.load(Ordering::Relaxed),
            engine_failures: self.counters.engine_failures.load(Ordering::Relaxed),
            undeliverable: self.counters.undeliverable.load(Ordering::Relaxed),
            queue_depth: self.queue_depth(),
        }
    }
}

#[cfg(test)]
impl InferenceHandle {
    /// A handle whose worker has already gone away.
    pub(crate) fn disconnected(model: &str) -> Self {
        let (sender, _) = mpsc::unbounded_channel();
        InferenceHandle {
            queue: Arc::new(Mutex::new(SubmitQueue { sender, next_seq: 0 })),
            counters: Arc::new(WorkerCounters::default()),
            model: Arc::from(model),
        }
    }
}

/// Resolves once the worker thread has ended.
///
/// The gateway cannot keep its single-caller guarantee without the worker, so `main` treats
/// this as fatal and exits for a restart.
pub struct WorkerMonitor {
    exit: oneshot::Receiver<()>,
}

impl WorkerMonitor {
    pub async fn exited(self) {
        let _ = self.exit.await;
    }
}

/// The sole owner and caller of the engine.
struct Worker<E> {
    engine: E,
    settings: SerializerSettings,
    counters: Arc<WorkerCounters>,
}

impl<E: TranscriptionEngine> Worker<E> {
    fn run(mut self, mut queue: mpsc::UnboundedReceiver<TranscriptionJob>) {
        info!(
            model = %self.engine.model_name(),
            min_utterance_seconds = self.settings.min_utterance_seconds,
            "Inference worker started"
        );

        while let Some(job) = queue.blocking_recv() {
            self.counters.queue_depth.fetch_sub(1, Ordering::SeqCst);
            self.process(job);
        }

        info!("Inference worker stopped: all submission handles dropped");
    }

    fn process(&mut self, job: TranscriptionJob) {
        let session_id = job.session_id.clone();
        let seq = job.seq;
        let duration = job.duration_seconds();

        if duration < self.settings.min_utterance_seconds {
            debug!(
                session_id = %session_id,
                seq,
                "Skipping short audio: {:.2} seconds",
                duration
            );
            self.counters.skipped_short.fetch_add(1, Ordering::Relaxed);
            self.deliver(job, JobOutcome::empty(session_id, seq, Disposition::SkippedShort));
            return;
        }

        info!(
            session_id = %session_id,
            seq,
            "Recognizing {:.2} seconds of audio",
            duration
        );

        let started = Instant::now();
        let engine = &mut self.engine;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            engine.transcribe(&job.samples, &job.language)
        }));
        let inference_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(Ok(text)) => {
                debug!(session_id = %session_id, seq, inference_ms, "Transcription result: '{}'", text);
                JobOutcome {
                    session_id,
                    seq,
                    text: text.trim().to_string(),
                    disposition: Disposition::Transcribed,
                    inference_ms,
                }
            }
            Ok(Err(err)) => {
                let err = GatewayError::InferenceEngine(format!("{:#}", err));
                error!(session_id = %session_id, seq, inference_ms, "{}", err);
                self.counters.engine_failures.fetch_add(1, Ordering::Relaxed);
                JobOutcome::empty(session_id, seq, Disposition::EngineFailed)
            }
            Err(payload) => {
                let err = GatewayError::InferenceEngine(format!(
                    "engine panicked: {}",
                    panic_message(payload.as_ref())
                ));
                error!(session_id = %session_id, seq, inference_ms, "{}", err);
                self.counters.engine_failures.fetch_add(1, Ordering::Relaxed);
                JobOutcome::empty(session_id, seq, Disposition::EngineFailed)
            }
        };

        self.deliver(job, outcome);
    }

    fn deliver(&self, job: TranscriptionJob, outcome: JobOutcome) {
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
        let session_id = outcome.session_id.clone();
        let seq = outcome.seq;
        if !job.complete(outcome) {
            self.counters.undeliverable.fetch_add(1, Ordering::Relaxed);
            debug!(session_id = %session_id, seq, "Session closed before its result was ready; discarding");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
