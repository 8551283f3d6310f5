// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP surface (Axum) translating external requests into Workflow Engine
//! and Registry Service calls (spec.md §6). No business logic lives here.

pub mod api;
