// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Single-document store for `configs/installed-packages.json`
//! (spec.md §6). Writes go to a sibling temp file and are renamed into
//! place so a crash mid-write never leaves a truncated declarative-state
//! document — the file the Package Manager treats as ground truth on
//! every startup reconciliation pass.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::package::InstalledPackagesFile;
use crate::domain::repository::{InstalledPackagesRepository, RepositoryError};

pub struct FsInstalledPackagesRepository {
    path: PathBuf,
}

impl FsInstalledPackagesRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl InstalledPackagesRepository for FsInstalledPackagesRepository {
    async fn load(&self) -> Result<InstalledPackagesFile, RepositoryError> {
        match tokio::fs::read(&self.path).await {
            Ok(contents) => Ok(serde_json::from_slice(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(InstalledPackagesFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &InstalledPackagesFile) -> Result<(), RepositoryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp_path = self.path.with_extension("json.tmp");
        let contents = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(&tmp_path, contents).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}
