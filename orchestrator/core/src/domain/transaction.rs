// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Transaction log domain types. Rollback works via whole-document
//! snapshots of the declared-state file plus an enumeration of
//! pre-operation container states — not per-step inverse operations
//! (spec.md §9, "Backup/rollback via snapshots, not journaling").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::package::InstalledPackagesFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionOperation {
    Install,
    Update,
    Remove,
    Rollback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

/// Whether a container this snapshot covers was running or stopped at
/// snapshot time, so rollback can restore it to the same state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStateSnapshot {
    pub container_name: String,
    pub was_running: bool,
}

/// A whole-document snapshot sufficient to restore pre-transaction state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupState {
    pub declared_state: InstalledPackagesFile,
    pub container_states: Vec<ContainerStateSnapshot>,
}

/// One append-only transaction log record (spec.md §3, §4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub operation: TransactionOperation,
    pub package_name: String,
    pub version: Option<String>,
    pub status: TransactionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub dependencies_installed: Vec<String>,
    pub backup_state: Option<BackupState>,
}

impl TransactionRecord {
    pub fn create(operation: TransactionOperation, package_name: impl Into<String>, version: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation,
            package_name: package_name.into(),
            version,
            status: TransactionStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            dependencies_installed: Vec::new(),
            backup_state: None,
        }
    }

    pub fn completed(&self) -> Self {
        let mut r = self.clone();
        r.status = TransactionStatus::Completed;
        r.completed_at = Some(Utc::now());
        r
    }

    pub fn failed(&self, error: impl Into<String>) -> Self {
        let mut r = self.clone();
        r.status = TransactionStatus::Failed;
        r.completed_at = Some(Utc::now());
        r.error = Some(error.into());
        r
    }

    pub fn rolled_back(&self) -> Self {
        let mut r = self.clone();
        r.status = TransactionStatus::RolledBack;
        r.completed_at = Some(Utc::now());
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_failed_and_rolled_back_each_leave_the_source_record_untouched() {
        let created = TransactionRecord::create(TransactionOperation::Install, "weather-tool", Some("1.0.0".to_string()));
        assert_eq!(created.status, TransactionStatus::Pending);
        assert!(created.completed_at.is_none());

        let completed = created.completed();
        assert_eq!(completed.status, TransactionStatus::Completed);
        assert!(completed.completed_at.is_some());
        assert_eq!(created.status, TransactionStatus::Pending, "original record must not mutate");

        let failed = created.failed("boom");
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("boom"));

        let rolled_back = created.rolled_back();
        assert_eq!(rolled_back.status, TransactionStatus::RolledBack);
    }

    #[test]
    fn create_assigns_a_fresh_id_per_transaction() {
        let a = TransactionRecord::create(TransactionOperation::Install, "pkg", None);
        let b = TransactionRecord::create(TransactionOperation::Install, "pkg", None);
        assert_ne!(a.id, b.id);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("transaction {0} not found")]
    NotFound(String),
    #[error("transaction log I/O error: {0}")]
    Io(String),
    #[error("transaction log entry is malformed: {0}")]
    Malformed(String),
}
