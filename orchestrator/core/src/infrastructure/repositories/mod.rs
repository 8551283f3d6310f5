// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Filesystem-backed implementations of the `domain::repository` traits.
//! No external database: every document here is either a single JSON file
//! (read-copy-update, single writer per process) or a set of per-day JSON
//! files under `volumes/executions/` (spec.md §6).

mod execution_repo;
mod installed_packages_repo;

pub use execution_repo::FsExecutionRepository;
pub use installed_packages_repo::FsInstalledPackagesRepository;
