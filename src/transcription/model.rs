//! # Whisper Model Resolution
//!
//! Finds the ggml weights the inference engine loads. A local file configured with
//! `transcription.model_path` wins; otherwise the file for the configured model size is
//! fetched from the `ggerganov/whisper.cpp` repository on the Hugging Face hub and cached.
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~75MB, fastest but least accurate
//! - **base**: ~142MB, good balance for development
//! - **small**: ~466MB, the default, usable Japanese accuracy
//! - **medium**: ~1.5GB, better accuracy, GPU recommended
//! - **large**: ~3.1GB, best accuracy but slowest

use crate::config::TranscriptionSettings;
use crate::error::{GatewayError, GatewayResult};
use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Hugging Face repository holding whisper.cpp ggml conversions.
const GGML_REPO: &str = "ggerganov/whisper.cpp";

/// Available Whisper model sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// File name of the multilingual ggml weights in the whisper.cpp repository.
    pub fn ggml_file(&self) -> &'static str {
        match self {
            ModelSize::Tiny => "ggml-tiny.bin",
            ModelSize::Base => "ggml-base.bin",
            ModelSize::Small => "ggml-small.bin",
            ModelSize::Medium => "ggml-medium.bin",
            ModelSize::Large => "ggml-large-v3.bin",
        }
    }

    /// Approximate download size in MB.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 75,
            ModelSize::Base => 142,
            ModelSize::Small => 466,
            ModelSize::Medium => 1500,
            ModelSize::Large => 3100,
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Return a local path to the model weights, downloading them if necessary.
pub async fn resolve_model_path(settings: &TranscriptionSettings) -> GatewayResult<PathBuf> {
    if let Some(path) = &settings.model_path {
        if !path.exists() {
            return Err(GatewayError::Model(format!(
                "model file not found at {}",
                path.display()
            )));
        }
        info!("Using local Whisper model at {}", path.display());
        return Ok(path.clone());
    }

    let size = settings.model;
    info!(
        "Fetching Whisper {} model (~{}MB) from {}",
        size,
        size.size_mb(),
        GGML_REPO
    );
    debug!("  HF_HOME: {:?}", std::env::var("HF_HOME"));
    debug!("  HF_ENDPOINT: {:?}", std::env::var("HF_ENDPOINT"));

    let api = hf_hub::api::tokio::Api::new()
        .map_err(|e| GatewayError::Model(format!("failed to initialize Hugging Face API: {}", e)))?;
    let path = api
        .model(GGML_REPO.to_string())
        .get(size.ggml_file())
        .await
        .map_err(|e| {
            GatewayError::Model(format!(
                "failed to download {} from {}: {}",
                size.ggml_file(),
                GGML_REPO,
                e
            ))
        })?;

    info!("Whisper {} model available at {}", size, path.display());
    Ok(path)
}
