//! # Transcription Module
//!
//! Everything between a committed utterance and its text:
//! - **engine**: the speech-to-text backend seam (whisper.cpp behind the `whisper` feature)
//! - **model**: resolving ggml model weights, locally or from the Hugging Face hub
//! - **job**: the unit of work submitted at commit time and its outcome
//! - **serializer**: the single-flight FIFO queue and the worker thread that owns the engine

pub mod engine;
pub mod job;
pub mod model;
pub mod serializer;

pub use engine::TranscriptionEngine;
pub use job::{JobOutcome, TranscriptionJob};
pub use serializer::{InferenceHandle, InferenceSerializer, SerializerSettings, WorkerMonitor};
