// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! One JSON file per execution under
//! `volumes/executions/{YYYY-MM-DD}/exec_{id}.json` (spec.md §6). `find_recent`
//! walks day directories newest-first; at the scale a single operator
//! deployment accumulates executions this is cheap enough to avoid an index.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use walkdir::WalkDir;

use crate::domain::execution::{ExecutionId, ExecutionResult};
use crate::domain::repository::{ExecutionRepository, RepositoryError};

pub struct FsExecutionRepository {
    root: PathBuf,
}

impl FsExecutionRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn day_dir(&self) -> PathBuf {
        self.root.join(Utc::now().format("%Y-%m-%d").to_string())
    }

    fn path_for(&self, id: ExecutionId) -> PathBuf {
        self.day_dir().join(format!("exec_{id}.json"))
    }
}

#[async_trait]
impl ExecutionRepository for FsExecutionRepository {
    async fn save(&self, result: &ExecutionResult) -> Result<(), RepositoryError> {
        let path = self.path_for(result.id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let contents = serde_json::to_vec_pretty(result)?;
        tokio::fs::write(&path, contents).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: ExecutionId) -> Result<Option<ExecutionResult>, RepositoryError> {
        for entry in WalkDir::new(&self.root).min_depth(2).max_depth(2) {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if entry.file_name().to_string_lossy() == format!("exec_{id}.json") {
                let contents = tokio::fs::read(entry.path()).await?;
                return Ok(Some(serde_json::from_slice(&contents)?));
            }
        }
        Ok(None)
    }

    async fn find_recent(&self, limit: usize) -> Result<Vec<ExecutionResult>, RepositoryError> {
        let mut day_dirs: Vec<PathBuf> = match tokio::fs::read_dir(&self.root).await {
            Ok(mut entries) => {
                let mut dirs = Vec::new();
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_dir() {
                        dirs.push(entry.path());
                    }
                }
                dirs
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        day_dirs.sort_unstable_by(|a, b| b.cmp(a));

        let mut results = Vec::new();
        'outer: for dir in day_dirs {
            let mut files: Vec<PathBuf> = Vec::new();
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                files.push(entry.path());
            }
            files.sort_unstable_by(|a, b| b.cmp(a));

            for file in files {
                if results.len() >= limit {
                    break 'outer;
                }
                let contents = tokio::fs::read(&file).await?;
                results.push(serde_json::from_slice(&contents)?);
            }
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::ExecutionStatus;

    fn result_with_id(id: ExecutionId) -> ExecutionResult {
        ExecutionResult {
            id,
            status: ExecutionStatus::Completed,
            results: Default::default(),
            errors: vec![],
            logs: vec![],
            node_states: Default::default(),
            cumulative_tokens: 0,
            reference: None,
        }
    }

    #[tokio::test]
    async fn save_then_find_by_id_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let repo = FsExecutionRepository::new(root.path());
        let id = ExecutionId::new();
        repo.save(&result_with_id(id)).await.unwrap();

        let found = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(found.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn find_by_id_returns_none_for_an_unknown_execution() {
        let root = tempfile::tempdir().unwrap();
        let repo = FsExecutionRepository::new(root.path());
        assert!(repo.find_by_id(ExecutionId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_recent_respects_the_limit() {
        let root = tempfile::tempdir().unwrap();
        let repo = FsExecutionRepository::new(root.path());
        for _ in 0..5 {
            repo.save(&result_with_id(ExecutionId::new())).await.unwrap();
        }

        let recent = repo.find_recent(3).await.unwrap();
        assert_eq!(recent.len(), 3);
    }

    #[tokio::test]
    async fn find_recent_returns_empty_when_the_root_does_not_exist_yet() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        let repo = FsExecutionRepository::new(missing);
        assert!(repo.find_recent(10).await.unwrap().is_empty());
    }
}
