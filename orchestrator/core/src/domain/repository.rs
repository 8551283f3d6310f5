// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Storage-backend abstractions. Persistence for this system is append-only
//! on the local filesystem (spec.md §1) — no external database — so every
//! repository here has exactly one production implementation
//! (`infrastructure::repositories`, file/JSON/JSONL backed) plus an
//! in-memory implementation for tests.

use async_trait::async_trait;

use crate::domain::execution::{ExecutionId, ExecutionResult};
use crate::domain::package::InstalledPackagesFile;
use crate::domain::transaction::TransactionRecord;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("entity not found: {0}")]
    NotFound(String),
    #[error("storage I/O error: {0}")]
    Io(String),
    #[error("serialisation error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for RepositoryError {
    fn from(err: std::io::Error) -> Self {
        RepositoryError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}

/// Persists one `ExecutionResult` per execution under
/// `volumes/executions/{YYYY-MM-DD}/exec_*.json` (spec.md §6).
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn save(&self, result: &ExecutionResult) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<ExecutionResult>, RepositoryError>;
    async fn find_recent(&self, limit: usize) -> Result<Vec<ExecutionResult>, RepositoryError>;
}

/// Owns the single declared-state document, `configs/installed-packages.json`.
/// Single writer per process, read-copy-update semantics (spec.md §5).
#[async_trait]
pub trait InstalledPackagesRepository: Send + Sync {
    async fn load(&self) -> Result<InstalledPackagesFile, RepositoryError>;
    async fn save(&self, state: &InstalledPackagesFile) -> Result<(), RepositoryError>;
}

/// Append-only transaction log, `configs/transactions.jsonl`.
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn append(&self, record: &TransactionRecord) -> Result<(), RepositoryError>;
    async fn list_recent(&self, limit: usize) -> Result<Vec<TransactionRecord>, RepositoryError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<TransactionRecord>, RepositoryError>;
}
