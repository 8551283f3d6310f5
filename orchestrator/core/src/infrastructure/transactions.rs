// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Append-only JSONL transaction log, `configs/transactions.jsonl`
//! (spec.md §4.8). Appends are buffered behind a mutex so concurrent
//! package operations never interleave partial lines; reads re-parse the
//! whole file, which is acceptable at the scale this log grows to between
//! prunes.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::domain::repository::{RepositoryError, TransactionRepository};
use crate::domain::transaction::TransactionRecord;

pub struct JsonlTransactionLog {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl JsonlTransactionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: Arc::new(Mutex::new(())) }
    }

    async fn read_all(&self) -> Result<Vec<TransactionRecord>, RepositoryError> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut lines = BufReader::new(file).lines();
        let mut records = Vec::new();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            records.push(serde_json::from_str::<TransactionRecord>(&line)?);
        }
        Ok(records)
    }
}

#[async_trait]
impl TransactionRepository for JsonlTransactionLog {
    async fn append(&self, record: &TransactionRecord) -> Result<(), RepositoryError> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<TransactionRecord>, RepositoryError> {
        let mut records = self.read_all().await?;
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<TransactionRecord>, RepositoryError> {
        let records = self.read_all().await?;
        Ok(records.into_iter().find(|r| r.id == id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::transaction::TransactionOperation;

    #[tokio::test]
    async fn append_then_list_recent_returns_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlTransactionLog::new(dir.path().join("transactions.jsonl"));

        let first = TransactionRecord::create(TransactionOperation::Install, "a", None);
        let second = TransactionRecord::create(TransactionOperation::Install, "b", None);
        log.append(&first).await.unwrap();
        log.append(&second).await.unwrap();

        let recent = log.list_recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[1].id, first.id);
    }

    #[tokio::test]
    async fn list_recent_respects_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlTransactionLog::new(dir.path().join("transactions.jsonl"));
        for name in ["a", "b", "c"] {
            log.append(&TransactionRecord::create(TransactionOperation::Install, name, None)).await.unwrap();
        }
        assert_eq!(log.list_recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_by_id_locates_a_single_appended_record() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlTransactionLog::new(dir.path().join("transactions.jsonl"));
        let record = TransactionRecord::create(TransactionOperation::Remove, "weather-tool", None);
        log.append(&record).await.unwrap();

        let found = log.find_by_id(&record.id).await.unwrap().unwrap();
        assert_eq!(found.package_name, "weather-tool");
        assert!(log.find_by_id("does-not-exist").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_all_returns_empty_when_the_log_file_does_not_exist_yet() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonlTransactionLog::new(dir.path().join("transactions.jsonl"));
        assert!(log.list_recent(10).await.unwrap().is_empty());
    }
}
