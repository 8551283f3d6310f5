// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Thin request/response shapes for [`crate::client::OrchestratorClient`].
//! Anything already modelled by the core crate (execution results, package
//! search results, installation records) is re-exported rather than
//! duplicated here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use aegis_tool_orchestrator_core::domain::execution::{ExecutionId, ExecutionResult, ExecutionStatus};
pub use aegis_tool_orchestrator_core::domain::index::PackageSearchResult;
pub use aegis_tool_orchestrator_core::domain::package::{InstallationRecord, PackageMetadata, PackageType};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecuteWorkflowRequest {
    #[serde(default)]
    pub params: HashMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteWorkflowResponse {
    pub execution_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatePackageRequest {
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InstallPackageRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(default)]
    pub no_rollback: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_package_request_omits_unset_optional_fields() {
        let request = InstallPackageRequest { name: "weather-tool".to_string(), ..Default::default() };
        let json = serde_json::to_value(&request).unwrap();
        let object = json.as_object().unwrap();
        assert_eq!(object.get("name").and_then(Value::as_str), Some("weather-tool"));
        assert!(!object.contains_key("version"));
        assert!(!object.contains_key("local_path"));
        assert!(!object.contains_key("workflow_id"));
        assert!(!object.contains_key("team_id"));
        assert_eq!(object.get("no_rollback").and_then(Value::as_bool), Some(false));
    }

    #[test]
    fn install_package_request_includes_fields_that_are_set() {
        let request = InstallPackageRequest {
            name: "weather-tool".to_string(),
            version: Some("1.2.0".to_string()),
            workflow_id: Some("wf-1".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json.get("version").and_then(Value::as_str), Some("1.2.0"));
        assert_eq!(json.get("workflow_id").and_then(Value::as_str), Some("wf-1"));
        assert!(json.get("local_path").is_none());
    }

    #[test]
    fn execute_workflow_request_defaults_to_empty_params() {
        let request = ExecuteWorkflowRequest::default();
        assert!(request.params.is_empty());
    }
}
