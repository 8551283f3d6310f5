// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Workflow Loader: reads workflow documents from the
//! `workflows/{templates,custom}` directory layout (spec.md §6), validates
//! structural invariants, and hands back an immutable [`WorkflowDefinition`].
//! `custom/` is searched before `templates/` so an operator override shadows
//! the shipped template of the same name.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;

use crate::domain::workflow::{WorkflowDefinition, WorkflowError};

#[derive(Debug, Error)]
pub enum WorkflowLoadError {
    #[error("workflow not found: {0}")]
    NotFound(String),
    #[error("workflow document is malformed: {0}")]
    Malformed(String),
    #[error("workflow failed structural validation: {0}")]
    Invalid(#[from] WorkflowError),
    #[error("I/O error loading workflow: {0}")]
    Io(String),
}

pub struct WorkflowLoader {
    base_dir: PathBuf,
}

impl WorkflowLoader {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self { base_dir: base_dir.into() }
    }

    fn slug(name: &str) -> String {
        name.chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c.to_ascii_lowercase() } else { '-' })
            .collect()
    }

    fn candidate_paths(&self, name: &str) -> Vec<PathBuf> {
        let slug = Self::slug(name);
        vec![
            self.base_dir.join("custom").join(format!("{slug}.json")),
            self.base_dir.join("templates").join(format!("{slug}.json")),
        ]
    }

    /// Load, parse and validate the named workflow document.
    pub async fn load(&self, name: &str) -> Result<WorkflowDefinition, WorkflowLoadError> {
        for path in self.candidate_paths(name) {
            if let Ok(contents) = fs::read_to_string(&path).await {
                let def: WorkflowDefinition = serde_json::from_str(&contents)
                    .map_err(|e| WorkflowLoadError::Malformed(format!("{}: {e}", path.display())))?;
                def.validate()?;
                return Ok(def);
            }
        }
        Err(WorkflowLoadError::NotFound(name.to_string()))
    }

    /// List every workflow name available under either directory.
    pub async fn list_names(&self) -> Result<Vec<String>, WorkflowLoadError> {
        let mut names = std::collections::BTreeSet::new();
        for sub in ["templates", "custom"] {
            let dir = self.base_dir.join(sub);
            let mut entries = match fs::read_dir(&dir).await {
                Ok(e) => e,
                Err(_) => continue,
            };
            while let Some(entry) = entries.next_entry().await.map_err(|e| WorkflowLoadError::Io(e.to_string()))? {
                if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                    if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                        names.insert(stem.to_string());
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
