//! # Transcription Jobs
//!
//! A job is created when a session commits: it carries the fully decoded utterance and the
//! session's completion channel. The worker answers every job with exactly one
//! [`JobOutcome`] on that channel; if the session has gone away in the meantime the outcome
//! is dropped.

use crate::audio::codec;
use tokio::sync::mpsc;

/// How the worker settled a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The engine ran and returned text (which may still be empty)
    Transcribed,
    /// Shorter than the minimum utterance; the engine was not called
    SkippedShort,
    /// The engine failed or panicked; the text is empty
    EngineFailed,
}

/// Result of one job, delivered back to the owning session.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub session_id: String,
    pub seq: u64,
    pub text: String,
    pub disposition: Disposition,
    pub inference_ms: u64,
}

impl JobOutcome {
    /// An outcome that produces no message for the client.
    pub fn empty(session_id: String, seq: u64, disposition: Disposition) -> Self {
        Self {
            session_id,
            seq,
            text: String::new(),
            disposition,
            inference_ms: 0,
        }
    }
}

/// Where a job's outcome goes.
pub type CompletionSender = mpsc::UnboundedSender<JobOutcome>;

/// One utterance waiting for the inference worker.
#[derive(Debug)]
pub struct TranscriptionJob {
    pub session_id: String,
    /// Global submission order, assigned by the serializer
    pub seq: u64,
    pub samples: Vec<f32>,
    pub language: String,
    completion: CompletionSender,
}

impl TranscriptionJob {
    pub fn new(
        session_id: impl Into<String>,
        samples: Vec<f32>,
        language: impl Into<String>,
        completion: CompletionSender,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            seq: 0,
            samples,
            language: language.into(),
            completion,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        codec::duration_seconds(self.samples.len())
    }

    /// Hand the outcome to the waiting session. Returns false if nobody is listening any more.
    pub fn complete(self, outcome: JobOutcome) -> bool {
        self.completion.send(outcome).is_ok()
    }
}
