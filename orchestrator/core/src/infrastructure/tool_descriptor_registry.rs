// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Tool Descriptor Registry (spec.md §4.4): a process-wide mapping from
//! tool-server name to endpoint. Populated by the Container Manager at
//! install/start and at startup reconciliation. Unregistration is not
//! exposed — stopped containers remain registered and fail at the HTTP
//! layer on next call, matching spec.md's explicit design.

use parking_lot::RwLock;

use crate::domain::mcp::{ToolDescriptorMap, ToolServerInfo};

#[derive(Default)]
pub struct ToolDescriptorRegistry {
    servers: RwLock<ToolDescriptorMap>,
}

impl ToolDescriptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, info: ToolServerInfo) {
        self.servers.write().insert(info.name.clone(), info);
    }

    pub fn get(&self, name: &str) -> Option<ToolServerInfo> {
        self.servers.read().get(name).cloned()
    }

    pub fn list_all(&self) -> Vec<ToolServerInfo> {
        self.servers.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, endpoint: &str) -> ToolServerInfo {
        ToolServerInfo { name: name.to_string(), endpoint: endpoint.to_string(), description: None, version: None }
    }

    #[test]
    fn register_then_get_round_trips_by_name() {
        let registry = ToolDescriptorRegistry::new();
        registry.register(info("weather-tool", "http://localhost:9001"));
        let found = registry.get("weather-tool").unwrap();
        assert_eq!(found.endpoint, "http://localhost:9001");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn re_registering_the_same_name_overwrites_the_previous_entry() {
        let registry = ToolDescriptorRegistry::new();
        registry.register(info("weather-tool", "http://localhost:9001"));
        registry.register(info("weather-tool", "http://localhost:9002"));
        assert_eq!(registry.get("weather-tool").unwrap().endpoint, "http://localhost:9002");
        assert_eq!(registry.list_all().len(), 1);
    }

    #[test]
    fn list_all_returns_every_registered_server() {
        let registry = ToolDescriptorRegistry::new();
        registry.register(info("a", "http://a"));
        registry.register(info("b", "http://b"));
        let mut names: Vec<String> = registry.list_all().into_iter().map(|s| s.name).collect();
        names.sort();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
