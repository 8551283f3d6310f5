// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod dependency_resolver;
pub mod failover;
pub mod package_index;
pub mod registry_service;
pub mod template;
pub mod workflow_engine;
