// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Typed client for the 100monkeys.ai tool-orchestrator: package manifests
//! (`mcp.json`), workflow documents, and an HTTP client for the daemon's
//! REST surface (spec.md §6).

pub mod client;
pub mod manifest;
pub mod types;

pub use client::OrchestratorClient;
pub use manifest::PackageManifest;
pub use types::*;
