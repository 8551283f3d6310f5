// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Registry configuration and health-tracking domain types (spec.md §3,
//! §4.7). One [`RegistryConfig`] per `[section]` in `configs/registries.conf`;
//! one [`HealthMetrics`] per registry, held only in memory.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const RESPONSE_TIME_WINDOW: usize = 20;
const DEGRADED_FAILURE_THRESHOLD: u32 = 1;
const FAILING_FAILURE_THRESHOLD: u32 = 3;
const UNAVAILABLE_FAILURE_THRESHOLD: u32 = 5;
const CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

/// A registry's entry in `configs/registries.conf` (INI format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    /// Lower is preferred.
    pub priority: i32,
    pub gpgcheck: bool,
    pub gpgkey: Option<String>,
    pub trust_level: String,
    #[serde(rename = "type")]
    pub registry_type: String,
}

impl RegistryConfig {
    pub fn is_file(&self) -> bool {
        self.url.starts_with("file://")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryHealthStatus {
    Healthy,
    Degraded,
    Failing,
    Unavailable,
}

impl RegistryHealthStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, RegistryHealthStatus::Healthy | RegistryHealthStatus::Degraded)
    }
}

/// In-memory health record for one registry, SPEC_FULL §E.4 /
/// `failover.py`'s `HealthMetrics`.
#[derive(Debug, Clone)]
pub struct HealthMetrics {
    pub status: RegistryHealthStatus,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    response_times: VecDeque<Duration>,
    pub recent_errors: VecDeque<String>,
    pub circuit_open_until: Option<DateTime<Utc>>,
}

impl Default for HealthMetrics {
    fn default() -> Self {
        Self {
            status: RegistryHealthStatus::Healthy,
            last_success: None,
            last_failure: None,
            consecutive_failures: 0,
            response_times: VecDeque::with_capacity(RESPONSE_TIME_WINDOW),
            recent_errors: VecDeque::with_capacity(8),
            circuit_open_until: None,
        }
    }
}

impl HealthMetrics {
    pub fn is_available(&self) -> bool {
        self.status.is_available()
    }

    pub fn circuit_is_open(&self, now: DateTime<Utc>) -> bool {
        matches!(self.circuit_open_until, Some(until) if until > now)
    }

    /// Record a success: keep the last 20 response times, reset
    /// `consecutive_failures`, recompute status from the rolling average.
    pub fn record_success(&mut self, elapsed: Duration) {
        self.last_success = Some(Utc::now());
        self.consecutive_failures = 0;
        self.circuit_open_until = None;
        if self.response_times.len() == RESPONSE_TIME_WINDOW {
            self.response_times.pop_front();
        }
        self.response_times.push_back(elapsed);
        self.status = self.status_from_average();
    }

    /// Record a failure: escalate status by consecutive-failure thresholds,
    /// open the circuit breaker at the configured threshold.
    pub fn record_failure(&mut self, error: impl Into<String>, cooldown: Duration) {
        self.last_failure = Some(Utc::now());
        self.consecutive_failures += 1;
        if self.recent_errors.len() == 8 {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(error.into());

        self.status = if self.consecutive_failures >= UNAVAILABLE_FAILURE_THRESHOLD {
            RegistryHealthStatus::Unavailable
        } else if self.consecutive_failures >= FAILING_FAILURE_THRESHOLD {
            RegistryHealthStatus::Failing
        } else if self.consecutive_failures >= DEGRADED_FAILURE_THRESHOLD {
            RegistryHealthStatus::Degraded
        } else {
            self.status
        };

        if self.consecutive_failures >= CIRCUIT_BREAKER_THRESHOLD {
            self.circuit_open_until = Some(Utc::now() + chrono::Duration::from_std(cooldown).unwrap_or_default());
        }
    }

    /// Manual operator reset (SPEC_FULL §D, `reset_circuit_breaker`).
    pub fn reset(&mut self) {
        *self = HealthMetrics::default();
    }

    pub fn average_response_time(&self) -> Duration {
        if self.response_times.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.response_times.iter().sum();
        total / self.response_times.len() as u32
    }

    fn status_from_average(&self) -> RegistryHealthStatus {
        let avg = self.average_response_time();
        if avg < Duration::from_secs(2) {
            RegistryHealthStatus::Healthy
        } else if avg < Duration::from_secs(10) {
            RegistryHealthStatus::Degraded
        } else {
            RegistryHealthStatus::Failing
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("all registries failed for this operation; attempted: {attempted:?}; last error: {last_error}")]
    Unavailable { attempted: Vec<String>, last_error: String },
    #[error("registry {0} not found")]
    NotFound(String),
    #[error("registry configuration is malformed: {0}")]
    Malformed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_failures_escalate_status_and_open_the_circuit() {
        let mut metrics = HealthMetrics::default();
        for _ in 0..4 {
            metrics.record_failure("boom", Duration::from_secs(60));
        }
        assert_eq!(metrics.status, RegistryHealthStatus::Failing);
        assert!(!metrics.circuit_is_open(Utc::now()));

        metrics.record_failure("boom", Duration::from_secs(60));
        assert_eq!(metrics.consecutive_failures, 5);
        assert_eq!(metrics.status, RegistryHealthStatus::Unavailable);
        assert!(metrics.circuit_is_open(Utc::now()));
        assert!(!metrics.is_available());
    }

    #[test]
    fn success_resets_failures_and_closes_the_circuit() {
        let mut metrics = HealthMetrics::default();
        for _ in 0..5 {
            metrics.record_failure("boom", Duration::from_secs(60));
        }
        assert!(metrics.circuit_is_open(Utc::now()));

        metrics.record_success(Duration::from_millis(50));
        assert_eq!(metrics.consecutive_failures, 0);
        assert!(!metrics.circuit_is_open(Utc::now()));
        assert_eq!(metrics.status, RegistryHealthStatus::Healthy);
    }

    #[test]
    fn average_response_time_tracks_a_rolling_window() {
        let mut metrics = HealthMetrics::default();
        for _ in 0..25 {
            metrics.record_success(Duration::from_secs(1));
        }
        // The window caps at 20 samples; all of them are 1s here, so the
        // average stays exactly 1s rather than drifting toward zero.
        assert_eq!(metrics.average_response_time(), Duration::from_secs(1));
    }

    #[test]
    fn reset_clears_all_accumulated_state() {
        let mut metrics = HealthMetrics::default();
        metrics.record_failure("boom", Duration::from_secs(60));
        metrics.reset();
        assert_eq!(metrics.consecutive_failures, 0);
        assert_eq!(metrics.status, RegistryHealthStatus::Healthy);
        assert!(metrics.recent_errors.is_empty());
    }
}
