//! # Application State Management
//!
//! Shared state handed to every HTTP handler and every WebSocket actor.
//!
//! ## Layout:
//! - **config**: immutable after startup, so a plain `Arc<AppConfig>` is enough
//! - **metrics**: `Arc<RwLock<GatewayMetrics>>`, written on every request and session event
//! - **inference**: the cloneable submission handle for the single inference worker
//!
//! Locks are never held across an `.await`, and a poisoned metrics lock is recovered
//! rather than propagated: counters are not worth taking the server down for.

use crate::config::AppConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::transcription::InferenceHandle;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Instant;

/// State shared across all handlers and connections.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RwLock<GatewayMetrics>>,
    pub inference: InferenceHandle,
    pub start_time: Instant,
}

/// Counters collected since startup.
#[derive(Debug, Default, Clone)]
pub struct GatewayMetrics {
    /// Total number of HTTP requests processed
    pub request_count: u64,

    /// Requests answered with a 4xx or 5xx status
    pub error_count: u64,

    /// WebSocket sessions currently open
    pub active_sessions: usize,

    pub sessions_opened: u64,
    pub sessions_rejected: u64,
    pub sessions_overflowed: u64,

    /// `final` messages written to clients
    pub finals_sent: u64,

    /// Commits whose audio was not a whole number of samples
    pub malformed_commits: u64,

    /// Key: "METHOD /path"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, inference: InferenceHandle) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(GatewayMetrics::default())),
            inference,
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn metrics_mut(&self) -> RwLockWriteGuard<'_, GatewayMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a slot for a new WebSocket session.
    ///
    /// Fails with [`GatewayError::TooManySessions`] when `max_concurrent_sessions` are
    /// already open. The slot is given back when the returned guard is dropped.
    pub fn try_acquire_session(&self) -> GatewayResult<SessionSlot> {
        let limit = self.config.session.max_concurrent_sessions;
        let mut metrics = self.metrics_mut();
        if metrics.active_sessions >= limit {
            metrics.sessions_rejected += 1;
            return Err(GatewayError::TooManySessions { limit });
        }
        metrics.active_sessions += 1;
        metrics.sessions_opened += 1;
        Ok(SessionSlot {
            metrics: self.metrics.clone(),
        })
    }

    pub fn record_overflow(&self) {
        self.metrics_mut().sessions_overflowed += 1;
    }

    pub fn record_final_sent(&self) {
        self.metrics_mut().finals_sent += 1;
    }

    pub fn record_malformed_commit(&self) {
        self.metrics_mut().malformed_commits += 1;
    }

    /// Called by the metrics middleware for every request.
    pub fn increment_request_count(&self) {
        self.metrics_mut().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics_mut().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics_mut();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Clone of the current counters, so no lock is held while building a response.
    pub fn get_metrics_snapshot(&self) -> GatewayMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// One occupied entry in the session limit.
#[derive(Debug)]
pub struct SessionSlot {
    metrics: Arc<RwLock<GatewayMetrics>>,
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }
}

impl GatewayMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, between 0.0 and 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcription::engine::testing::ScriptedEngine;

    fn state_with_limit(limit: usize) -> AppState {
        let mut config = AppConfig::default();
        config.session.max_concurrent_sessions = limit;
        testing::app_state(config, ScriptedEngine::new()).0
    }

    #[test]
    fn test_session_admission_respects_limit() {
        let state = state_with_limit(2);
        let first = state.try_acquire_session().unwrap();
        let _second = state.try_acquire_session().unwrap();

        assert!(matches!(
            state.try_acquire_session(),
            Err(GatewayError::TooManySessions { limit: 2 })
        ));

        drop(first);
        let _third = state.try_acquire_session().unwrap();

        let metrics = state.get_metrics_snapshot();
        assert_eq!(metrics.active_sessions, 2);
        assert_eq!(metrics.sessions_opened, 3);
        assert_eq!(metrics.sessions_rejected, 1);
    }

    #[test]
    fn test_dropping_slot_releases_session() {
        let state = state_with_limit(1);
        let slot = state.try_acquire_session().unwrap();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 1);
        drop(slot);
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = state_with_limit(1);
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let metrics = state.get_metrics_snapshot();
        let health = &metrics.endpoint_metrics["GET /health"];
        assert_eq!(health.request_count, 2);
        assert_eq!(health.average_duration_ms(), 20.0);
        assert_eq!(health.error_rate(), 0.5);
    }
}
