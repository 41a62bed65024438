//! # One-shot Transcription
//!
//! `POST /api/v1/transcribe` accepts a whole utterance as a multipart upload and answers
//! with the same `final` message a WebSocket client would get. The job joins the same
//! inference queue as streaming sessions, so uploads wait their turn like everyone else.
//!
//! ## Request:
//! Multipart form with an `audio` field holding either raw PCM (16-bit LE, 16kHz, mono)
//! or a WAV file in that format.
//!
//! ## Responses:
//! - `200` with `{"type":"final","text":"..."}`
//! - `204` when the audio was too short or nothing was recognized
//! - `400` for malformed or unsupported audio
//! - `413` when the upload exceeds `session.max_buffered_bytes`
//! - `503` when the inference worker is gone

use crate::audio::codec;
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::ServerMessage;
use crate::state::AppState;
use crate::transcription::TranscriptionJob;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

pub async fn transcribe_upload(
    mut payload: Multipart,
    state: web::Data<AppState>,
) -> GatewayResult<HttpResponse> {
    let limit = state.config.session.max_buffered_bytes;
    let mut audio: Option<Vec<u8>> = None;

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| GatewayError::BadRequest(format!("Multipart error: {}", e)))?;
        let is_audio = field
            .content_disposition()
            .and_then(|cd| cd.get_name())
            .map_or(false, |name| name == "audio");

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk =
                chunk.map_err(|e| GatewayError::BadRequest(format!("Chunk error: {}", e)))?;
            if !is_audio {
                continue;
            }
            let attempted = bytes.len() + chunk.len();
            if attempted > limit {
                return Err(GatewayError::BufferOverflow { limit, attempted });
            }
            bytes.extend_from_slice(&chunk);
        }

        if is_audio {
            audio = Some(bytes);
        }
    }

    let bytes = audio.ok_or_else(|| GatewayError::BadRequest("No audio field provided".into()))?;
    let samples = if codec::looks_like_wav(&bytes) {
        codec::decode_wav(&bytes)?
    } else {
        codec::decode(&[bytes])?
    };

    let request_id = format!("http-{}", Uuid::new_v4());
    info!(
        request_id = %request_id,
        "Transcribing uploaded audio: {:.2} seconds",
        codec::duration_seconds(samples.len())
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let job = TranscriptionJob::new(
        request_id.as_str(),
        samples,
        state.config.transcription.language.as_str(),
        tx,
    );
    let seq = state.inference.submit(job)?;

    // The job owns the only sender; losing it means the worker died with our job.
    let outcome = rx.recv().await.ok_or(GatewayError::WorkerUnavailable)?;
    debug!(
        request_id = %request_id,
        seq,
        disposition = ?outcome.disposition,
        inference_ms = outcome.inference_ms,
        "Upload transcribed"
    );

    if outcome.text.is_empty() {
        Ok(HttpResponse::NoContent().finish())
    } else {
        Ok(HttpResponse::Ok().json(ServerMessage::Final { text: outcome.text }))
    }
}
