//! # Transcription Engine
//!
//! The engine is the black box that turns 16kHz mono f32 samples into text. It is treated
//! as a single stateful resource: calls block the calling thread for the whole inference and
//! two calls must never overlap. The trait therefore takes `&mut self` and only requires
//! `Send`; the inference worker owns the one instance in the process and is its only caller.

use anyhow::Result;

/// Speech-to-text backend driven by the inference worker.
pub trait TranscriptionEngine: Send {
    /// Transcribe `samples` (16kHz mono, normalized to [-1.0, 1.0)) using `language` as hint.
    fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<String>;

    /// Human-readable name of the loaded model, for logs and health output.
    fn model_name(&self) -> &str;
}

impl<E: TranscriptionEngine + ?Sized> TranscriptionEngine for Box<E> {
    fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<String> {
        (**self).transcribe(samples, language)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

#[cfg(feature = "whisper")]
pub use whisper::WhisperEngine;

#[cfg(feature = "whisper")]
mod whisper {
    use super::TranscriptionEngine;
    use anyhow::{anyhow, Context, Result};
    use std::path::Path;
    use std::sync::Once;
    use std::time::Instant;
    use whisper_rs::{
        install_logging_hooks, FullParams, SamplingStrategy, WhisperContext,
        WhisperContextParameters,
    };

    static LOGGING_HOOKS_INSTALLED: Once = Once::new();

    /// whisper.cpp engine loaded from a ggml model file.
    pub struct WhisperEngine {
        context: WhisperContext,
        model_name: String,
        threads: Option<u16>,
    }

    impl WhisperEngine {
        /// Load the model at `model_path`. This reads the whole file and can take seconds.
        pub fn load(model_path: &Path, threads: Option<u16>) -> Result<Self> {
            LOGGING_HOOKS_INSTALLED.call_once(|| {
                install_logging_hooks();
            });

            let model_name = model_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("unknown")
                .to_string();

            let path = model_path
                .to_str()
                .ok_or_else(|| anyhow!("model path is not valid UTF-8: {:?}", model_path))?;

            let started = Instant::now();
            let context = WhisperContext::new_with_params(path, WhisperContextParameters::default())
                .map_err(|e| anyhow!("failed to load Whisper model {}: {}", path, e))?;
            tracing::info!(
                "Whisper model {} loaded in {:.2}s",
                model_name,
                started.elapsed().as_secs_f64()
            );

            Ok(Self {
                context,
                model_name,
                threads,
            })
        }
    }

    impl TranscriptionEngine for WhisperEngine {
        fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<String> {
            let mut state = self
                .context
                .create_state()
                .context("failed to create Whisper state")?;

            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            params.set_language(Some(language));
            if let Some(threads) = self.threads {
                params.set_n_threads(threads as i32);
            }
            params.set_print_special(false);
            params.set_print_progress(false);
            params.set_print_realtime(false);
            params.set_print_timestamps(false);

            state
                .full(params, samples)
                .map_err(|e| anyhow!("Whisper inference failed: {}", e))?;

            let mut text = String::new();
            for segment in state.as_iter() {
                text.push_str(&segment.to_string());
            }

            Ok(text.trim().to_string())
        }

        fn model_name(&self) -> &str {
            &self.model_name
        }
    }
}

/// Scripted engines for tests.
#[cfg(test)]
pub mod testing {
    use super::TranscriptionEngine;
    use anyhow::{anyhow, Result};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};

    /// One recorded engine invocation.
    #[derive(Debug, Clone, PartialEq)]
    pub struct EngineCall {
        pub sample_count: usize,
        pub language: String,
    }

    /// What the engine does for a given input.
    #[derive(Debug, Clone)]
    pub enum Reply {
        Text(String),
        Fail(String),
        Panic,
    }

    /// Engine that answers from a script and records every call.
    ///
    /// Without a script it answers `"<n> samples"`, which lets tests tell utterances apart by
    /// length. It also asserts the engine is never entered twice at once.
    pub struct ScriptedEngine {
        calls: Arc<Mutex<Vec<EngineCall>>>,
        replies: Arc<Mutex<Vec<Reply>>>,
        busy: Arc<AtomicBool>,
        gate: Option<mpsc::Receiver<()>>,
    }

    impl ScriptedEngine {
        pub fn new() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                replies: Arc::new(Mutex::new(Vec::new())),
                busy: Arc::new(AtomicBool::new(false)),
                gate: None,
            }
        }

        /// Queue replies, consumed in call order before falling back to the default.
        pub fn with_replies(self, replies: Vec<Reply>) -> Self {
            *self.replies.lock().unwrap() = replies;
            self
        }

        /// Every call waits for one message on the returned sender before answering.
        pub fn gated(mut self) -> (Self, mpsc::Sender<()>) {
            let (tx, rx) = mpsc::channel();
            self.gate = Some(rx);
            (self, tx)
        }

        /// Shared handle on the call log, readable while the worker owns the engine.
        pub fn calls(&self) -> Arc<Mutex<Vec<EngineCall>>> {
            self.calls.clone()
        }
    }

    impl TranscriptionEngine for ScriptedEngine {
        fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<String> {
            assert!(
                !self.busy.swap(true, Ordering::SeqCst),
                "engine entered concurrently"
            );

            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }

            self.calls.lock().unwrap().push(EngineCall {
                sample_count: samples.len(),
                language: language.to_string(),
            });

            let reply = {
                let mut replies = self.replies.lock().unwrap();
                if replies.is_empty() {
                    None
                } else {
                    Some(replies.remove(0))
                }
            };

            self.busy.store(false, Ordering::SeqCst);

            match reply {
                None => Ok(format!("{} samples", samples.len())),
                Some(Reply::Text(text)) => Ok(text),
                Some(Reply::Fail(message)) => Err(anyhow!(message)),
                Some(Reply::Panic) => panic!("scripted engine panic"),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }
}
