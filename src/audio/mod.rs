//! # Audio Module
//!
//! Per-connection audio handling for the gateway.
//!
//! ## Key Components:
//! - **codec**: little-endian 16-bit PCM bytes to normalized f32 samples
//! - **buffer**: per-session accumulator of raw chunks with a byte cap
//! - **session**: the Open / CommitPending / Closed state machine
//!
//! ## Audio Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

// The WebSocket actor that drives these lives in src/websocket.rs
pub mod buffer;
pub mod codec;
pub mod session;
