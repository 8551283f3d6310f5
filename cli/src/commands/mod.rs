// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the tool-orchestrator CLI

pub mod config;
pub mod daemon;
pub mod package;
pub mod workflow;

pub use self::config::ConfigCommand;
pub use self::daemon::DaemonCommand;
pub use self::package::PackageCommand;
pub use self::workflow::WorkflowCommand;
