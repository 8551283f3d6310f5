// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # aegis-tool-orchestrator-core
//!
//! The runtime heart of the tool-server orchestrator: three cores share this
//! crate's `domain`/`application`/`infrastructure`/`presentation` layering.
//!
//! ## Cores
//!
//! | Core | Domain files | Application files |
//! |---|---|---|
//! | **Tool-Server Session Manager** | [`domain::mcp`] | [`infrastructure::session`] |
//! | **Workflow Execution Engine** | [`domain::workflow`], [`domain::execution`], [`domain::expression`] | [`application::workflow_engine`], [`application::template`] |
//! | **Package & Container Lifecycle Manager** | [`domain::package`], [`domain::registry_config`], [`domain::index`], [`domain::transaction`] | [`application::registry_service`], [`application::dependency_resolver`], [`application::package_index`], [`application::failover`] |
//!
//! ## Layer structure
//!
//! ```text
//! presentation/   ← HTTP API (axum), SSE progress streaming
//!     ↓
//! application/    ← Use-cases: Workflow Engine, Registry Service, Failover Manager
//!     ↓
//! domain/         ← Aggregates, value objects, domain events, repository traits
//!     ↓
//! infrastructure/ ← File-backed repositories, Docker runtime (bollard), HTTP/GPG clients
//! ```

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
