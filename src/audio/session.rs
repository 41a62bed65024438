//! # Session State Machine
//!
//! One `Session` exists per live WebSocket connection and is owned by that connection's
//! actor. It holds the buffer for the utterance in progress and tracks how many committed
//! utterances are still waiting for the inference worker.
//!
//! ## Session Lifecycle:
//! 1. **Open**: accepting audio and control messages, buffer empty or filling
//! 2. **CommitPending**: at least one committed utterance awaits its result; new audio goes
//!    into a fresh buffer for the next utterance
//! 3. **Closed**: terminal; the buffer is gone and late results are dropped
//!
//! ## Transitions:
//! - `Open --commit--> CommitPending` (buffer drained and decoded synchronously)
//! - `CommitPending --commit--> CommitPending` (another job queued behind the first)
//! - `CommitPending --last result delivered--> Open`
//! - `any --close--> Closed`

use crate::audio::buffer::SessionBuffer;
use crate::audio::codec;
use crate::error::{GatewayError, GatewayResult};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    CommitPending,
    Closed,
}

/// Per-session counters, logged when the session ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub bytes_received: usize,
    pub commits: u32,
    pub malformed_commits: u32,
    pub finals_sent: u32,
}

/// Audio and commit state for one connection.
#[derive(Debug)]
pub struct Session {
    id: String,
    buffer: SessionBuffer,
    state: SessionState,
    in_flight: usize,
    created_at: DateTime<Utc>,
    stats: SessionStats,
}

impl Session {
    /// Create a session with a fresh UUID.
    pub fn new(max_buffered_bytes: usize) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), max_buffered_bytes)
    }

    pub fn with_id(id: impl Into<String>, max_buffered_bytes: usize) -> Self {
        Self {
            id: id.into(),
            buffer: SessionBuffer::new(max_buffered_bytes),
            state: SessionState::Open,
            in_flight: 0,
            created_at: Utc::now(),
            stats: SessionStats::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Committed utterances whose results have not come back yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn buffered_seconds(&self) -> f64 {
        self.buffer.duration_seconds()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len_bytes()
    }

    pub fn age_seconds(&self) -> f64 {
        Utc::now()
            .signed_duration_since(self.created_at)
            .num_milliseconds() as f64
            / 1000.0
    }

    /// Append one binary frame to the utterance in progress.
    ///
    /// A [`GatewayError::BufferOverflow`] means the caller must close the session.
    pub fn append_audio(&mut self, chunk: &[u8]) -> GatewayResult<()> {
        if self.state == SessionState::Closed {
            return Err(GatewayError::SessionClosed);
        }
        self.buffer.append(chunk)?;
        self.stats.bytes_received += chunk.len();
        Ok(())
    }

    /// Drain the buffer and decode it for submission.
    ///
    /// On success the session counts one more job in flight and moves to `CommitPending`.
    /// Malformed audio is dropped with the drained buffer and leaves the state as it was;
    /// no job exists for it, so nothing will ever be sent back for this commit.
    pub fn commit(&mut self) -> GatewayResult<Vec<f32>> {
        if self.state == SessionState::Closed {
            return Err(GatewayError::SessionClosed);
        }

        let chunks = self.buffer.drain_and_clear();
        self.stats.commits += 1;

        match codec::decode(&chunks) {
            Ok(samples) => {
                self.in_flight += 1;
                self.state = SessionState::CommitPending;
                Ok(samples)
            }
            Err(err) => {
                self.stats.malformed_commits += 1;
                Err(err)
            }
        }
    }

    /// Record a delivered result and decide whether the client should see it.
    ///
    /// Returns the text to send, or `None` for empty text or a closed session.
    pub fn complete(&mut self, text: String) -> Option<String> {
        if self.state == SessionState::Closed {
            return None;
        }

        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            self.state = SessionState::Open;
        }

        if text.is_empty() {
            None
        } else {
            self.stats.finals_sent += 1;
            Some(text)
        }
    }

    /// Return the commit slot taken by a job that could not be submitted.
    pub fn abandon_commit(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.in_flight == 0 {
            self.state = SessionState::Open;
        }
    }

    /// Enter the terminal state and discard any buffered audio.
    pub fn close(&mut self) {
        self.buffer.discard();
        self.state = SessionState::Closed;
    }
}
