// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Failover Manager (spec.md §4.7): health tracking plus a per-registry
//! circuit breaker, sitting in front of every registry operation so one
//! bad registry never aborts a whole refresh/search/install.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::time::timeout;

use crate::domain::registry_config::{HealthMetrics, RegistryConfig, RegistryError};
use crate::infrastructure::event_bus::EventBus;

pub struct FailoverManager {
    cooldown: Duration,
    health: RwLock<HashMap<String, HealthMetrics>>,
    event_bus: Arc<EventBus>,
}

impl FailoverManager {
    pub fn new(cooldown: Duration, event_bus: Arc<EventBus>) -> Self {
        Self { cooldown, health: RwLock::new(HashMap::new()), event_bus }
    }

    pub fn health_of(&self, registry: &str) -> HealthMetrics {
        self.health.read().get(registry).cloned().unwrap_or_default()
    }

    pub fn reset_circuit_breaker(&self, registry: &str) {
        if let Some(metrics) = self.health.write().get_mut(registry) {
            metrics.reset();
        }
    }

    /// Enabled, non-open-breaker registries ordered by
    /// `(priority, consecutive_failures, -avg_response_time)`.
    pub fn get_ordered_registries<'a>(&self, registries: &'a [RegistryConfig]) -> Vec<&'a RegistryConfig> {
        let now = Utc::now();
        let health = self.health.read();
        let mut ordered: Vec<&RegistryConfig> = registries
            .iter()
            .filter(|r| r.enabled)
            .filter(|r| !health.get(&r.name).is_some_and(|m| m.circuit_is_open(now)))
            .collect();
        ordered.sort_by(|a, b| {
            let ma = health.get(&a.name);
            let mb = health.get(&b.name);
            let fa = ma.map(|m| m.consecutive_failures).unwrap_or(0);
            let fb = mb.map(|m| m.consecutive_failures).unwrap_or(0);
            let ra = ma.map(|m| m.average_response_time()).unwrap_or_default();
            let rb = mb.map(|m| m.average_response_time()).unwrap_or_default();
            a.priority.cmp(&b.priority).then(fa.cmp(&fb)).then(rb.cmp(&ra))
        });
        ordered
    }

    fn record_success(&self, registry: &str, elapsed: Duration) {
        self.health.write().entry(registry.to_string()).or_default().record_success(elapsed);
        self.emit_if_changed(registry);
    }

    fn record_failure(&self, registry: &str, error: impl Into<String>) {
        let cooldown = self.cooldown;
        let mut guard = self.health.write();
        let metrics = guard.entry(registry.to_string()).or_default();
        let was_open = metrics.circuit_open_until.is_some();
        metrics.record_failure(error, cooldown);
        let now_open = metrics.circuit_open_until.is_some();
        drop(guard);
        if now_open && !was_open {
            self.event_bus.publish(crate::domain::events::DomainEvent::Registry(
                crate::domain::events::RegistryHealthEvent::CircuitOpened {
                    registry: registry.to_string(),
                    cooldown_seconds: cooldown.as_secs(),
                },
            ));
        }
        self.emit_if_changed(registry);
    }

    fn emit_if_changed(&self, registry: &str) {
        if let Some(metrics) = self.health.read().get(registry) {
            self.event_bus.publish(crate::domain::events::DomainEvent::Registry(
                crate::domain::events::RegistryHealthEvent::StatusChanged {
                    registry: registry.to_string(),
                    status: metrics.status,
                },
            ));
        }
    }

    /// Iterate the ordered registries, calling `op` for each until one
    /// succeeds; each attempt is wrapped in `op_timeout`. All failing
    /// raises with the attempted names and the last error.
    pub async fn execute_with_failover<T, E, F, Fut>(
        &self,
        registries: &[RegistryConfig],
        op_timeout: Duration,
        mut op: F,
    ) -> Result<T, RegistryError>
    where
        F: FnMut(&RegistryConfig) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let ordered = self.get_ordered_registries(registries);
        let mut attempted = Vec::with_capacity(ordered.len());
        let mut last_error = String::from("no registries available");

        for registry in ordered {
            attempted.push(registry.name.clone());
            let started = std::time::Instant::now();
            match timeout(op_timeout, op(registry)).await {
                Ok(Ok(value)) => {
                    self.record_success(&registry.name, started.elapsed());
                    return Ok(value);
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    self.record_failure(&registry.name, last_error.clone());
                }
                Err(_) => {
                    last_error = format!("timed out after {:?}", op_timeout);
                    self.record_failure(&registry.name, last_error.clone());
                }
            }
        }

        Err(RegistryError::Unavailable { attempted, last_error })
    }

    /// Within-a-single-registry retry, independent of failover: up to
    /// `max_retries` attempts with exponential backoff capped at
    /// `max_retry_delay`.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        max_retries: u32,
        max_retry_delay: Duration,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut delay = Duration::from_secs(1);
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(e);
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max_retry_delay);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::registry_config::RegistryConfig;

    fn registry(name: &str, priority: i32) -> RegistryConfig {
        RegistryConfig {
            name: name.to_string(),
            url: format!("https://{name}.example"),
            enabled: true,
            priority,
            gpgcheck: false,
            gpgkey: None,
            trust_level: "community".to_string(),
            registry_type: "http".to_string(),
        }
    }

    #[tokio::test]
    async fn failover_tries_next_registry_on_failure() {
        let manager = FailoverManager::new(Duration::from_secs(300), Arc::new(EventBus::with_default_capacity()));
        let registries = vec![registry("primary", 0), registry("backup", 1)];

        let result = manager
            .execute_with_failover(&registries, Duration::from_secs(1), |r| async move {
                if r.name == "primary" {
                    Err::<(), String>("boom".to_string())
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(manager.health_of("primary").consecutive_failures, 1);
    }

    #[tokio::test]
    async fn circuit_opens_after_five_consecutive_failures() {
        let manager = FailoverManager::new(Duration::from_secs(300), Arc::new(EventBus::with_default_capacity()));
        let registries = vec![registry("flaky", 0)];

        for _ in 0..5 {
            let _ = manager
                .execute_with_failover(&registries, Duration::from_secs(1), |_| async { Err::<(), String>("boom".to_string()) })
                .await;
        }

        assert!(manager.get_ordered_registries(&registries).is_empty());
    }
}
