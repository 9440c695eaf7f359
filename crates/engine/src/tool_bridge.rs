//! `ToolBridge`: in-process MCP-like JSON-RPC surface the model SDK calls
//! into (spec §4.4, §6.3). Fixed tool catalogue backed by `EditorService`;
//! gates concurrent `tools/call` per agent with a semaphore.

use crate::editor::{Change, ChangeStatus, EditorService};
use crate::error::EngineError;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const INVALID_PARAMS: i32 = -32602;
const METHOD_NOT_FOUND: i32 = -32601;
const INTERNAL_ERROR: i32 = -32603;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    pub id: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

fn tool_catalogue() -> Vec<Value> {
    vec![
        json!({"name": "editor_browse", "description": "List a directory", "inputSchema": {"type": "object", "required": ["workflow_id", "path"], "properties": {"workflow_id": {"type": "string"}, "path": {"type": "string"}, "include_hidden": {"type": "boolean"}, "workspace_path": {"type": "string"}}}}),
        json!({"name": "editor_tree", "description": "Recursive directory listing", "inputSchema": {"type": "object", "required": ["workflow_id"], "properties": {"workflow_id": {"type": "string"}, "max_depth": {"type": "integer"}, "workspace_path": {"type": "string"}}}}),
        json!({"name": "editor_read", "description": "Read a file", "inputSchema": {"type": "object", "required": ["workflow_id", "file_path"], "properties": {"workflow_id": {"type": "string"}, "file_path": {"type": "string"}, "workspace_path": {"type": "string"}}}}),
        json!({"name": "editor_search", "description": "Search file contents", "inputSchema": {"type": "object", "required": ["workflow_id", "query"], "properties": {"workflow_id": {"type": "string"}, "query": {"type": "string"}, "path": {"type": "string"}, "case_sensitive": {"type": "boolean"}, "workspace_path": {"type": "string"}}}}),
        json!({"name": "editor_create_change", "description": "Apply a file mutation, pending review", "inputSchema": {"type": "object", "required": ["workflow_id", "file_path", "operation"], "properties": {"workflow_id": {"type": "string"}, "file_path": {"type": "string"}, "operation": {"type": "string"}, "new_content": {"type": "string"}, "old_path": {"type": "string"}, "generate_diff": {"type": "boolean"}, "workspace_path": {"type": "string"}}}}),
        json!({"name": "editor_get_changes", "description": "List pending/history changes", "inputSchema": {"type": "object", "required": ["workflow_id"], "properties": {"workflow_id": {"type": "string"}, "status": {"type": "string"}, "workspace_path": {"type": "string"}}}}),
        json!({"name": "editor_approve", "description": "Approve a pending change", "inputSchema": {"type": "object", "required": ["workflow_id", "change_id"], "properties": {"workflow_id": {"type": "string"}, "change_id": {"type": "string"}, "workspace_path": {"type": "string"}}}}),
        json!({"name": "editor_reject", "description": "Reject a pending change", "inputSchema": {"type": "object", "required": ["workflow_id", "change_id"], "properties": {"workflow_id": {"type": "string"}, "change_id": {"type": "string"}, "workspace_path": {"type": "string"}}}}),
        json!({"name": "editor_rollback", "description": "Rollback an approved change", "inputSchema": {"type": "object", "required": ["workflow_id", "change_id"], "properties": {"workflow_id": {"type": "string"}, "change_id": {"type": "string"}, "workspace_path": {"type": "string"}}}}),
    ]
}

pub struct ToolBridge {
    editor_service: Arc<EditorService>,
    default_root_by_workflow: Arc<dyn Fn(&str) -> Option<std::path::PathBuf> + Send + Sync>,
    call_semaphores: tokio::sync::Mutex<HashMap<String, Arc<Semaphore>>>,
    per_agent_limit: usize,
    /// Shared secret a caller must present to prove it is the in-process
    /// tool bridge rather than an unauthenticated HTTP client (spec §6.3).
    /// Empty disables the check, matching `querymt-service`'s optional
    /// `auth_key`.
    internal_service_token: String,
    tool_call_timeout: Duration,
}

impl ToolBridge {
    pub fn new(
        editor_service: Arc<EditorService>,
        default_root_by_workflow: Arc<dyn Fn(&str) -> Option<std::path::PathBuf> + Send + Sync>,
        per_agent_limit: usize,
        internal_service_token: String,
        tool_call_timeout: Duration,
    ) -> Self {
        Self {
            editor_service,
            default_root_by_workflow,
            call_semaphores: tokio::sync::Mutex::new(HashMap::new()),
            per_agent_limit,
            internal_service_token,
            tool_call_timeout,
        }
    }

    async fn semaphore_for(&self, agent: &str) -> Arc<Semaphore> {
        let mut map = self.call_semaphores.lock().await;
        map.entry(agent.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_agent_limit)))
            .clone()
    }

    /// Verify the caller presented the internal service token, unless the
    /// token is unset (disabled, e.g. local dev).
    fn check_token(&self, presented: Option<&str>, id: &Value) -> Option<RpcResponse> {
        if self.internal_service_token.is_empty() {
            return None;
        }
        if presented == Some(self.internal_service_token.as_str()) {
            return None;
        }
        let error = EngineError::AccessDenied("missing or invalid internal service token".to_string());
        Some(RpcResponse { result: None, error: Some(RpcError { code: error.json_rpc_code(), message: error.to_string() }), id: id.clone() })
    }

    pub async fn dispatch(&self, request: RpcRequest, agent: &str, token: Option<&str>) -> RpcResponse {
        if let Some(denied) = self.check_token(token, &request.id) {
            return denied;
        }
        match request.method.as_str() {
            "tools/list" => RpcResponse {
                result: Some(json!({ "tools": tool_catalogue() })),
                error: None,
                id: request.id,
            },
            "tools/call" => {
                let semaphore = self.semaphore_for(agent).await;
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return RpcResponse {
                            result: None,
                            error: Some(RpcError { code: INTERNAL_ERROR, message: "tool semaphore closed".to_string() }),
                            id: request.id,
                        }
                    }
                };
                let id = request.id.clone();
                match tokio::time::timeout(self.tool_call_timeout, self.call(request)).await {
                    Ok(response) => response,
                    Err(_) => {
                        let error = EngineError::Timeout(format!("tool call exceeded {:?}", self.tool_call_timeout));
                        RpcResponse { result: None, error: Some(RpcError { code: error.json_rpc_code(), message: error.to_string() }), id }
                    }
                }
            }
            _ => RpcResponse {
                result: None,
                error: Some(RpcError { code: METHOD_NOT_FOUND, message: format!("unknown method {}", request.method) }),
                id: request.id,
            },
        }
    }

    async fn call(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        let name = match request.params.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => return invalid_params(id, "missing tool name"),
        };
        let arguments = request.params.get("arguments").cloned().unwrap_or(json!({}));
        let Some(workflow_id) = arguments.get("workflow_id").and_then(Value::as_str) else {
            return invalid_params(id, "workflow_id is required");
        };
        let Some(default_root) = (self.default_root_by_workflow)(workflow_id) else {
            return invalid_params(id, "unknown workflow_id");
        };
        let workspace_path = arguments.get("workspace_path").and_then(Value::as_str);

        let manager = match self.editor_service.manager_for(&default_root, workspace_path).await {
            Ok(manager) => manager,
            Err(e) => return tool_error(id, &e),
        };

        let result = match name.as_str() {
            "editor_browse" => {
                let path = arguments.get("path").and_then(Value::as_str).unwrap_or("");
                let include_hidden = arguments.get("include_hidden").and_then(Value::as_bool).unwrap_or(false);
                manager.browse(path, include_hidden).map(|entries| json!(entries))
            }
            "editor_tree" => {
                let max_depth = arguments.get("max_depth").and_then(Value::as_u64).unwrap_or(10) as usize;
                manager.tree(max_depth, 50_000).map(|tree| json!(tree))
            }
            "editor_read" => {
                let Some(path) = arguments.get("file_path").and_then(Value::as_str) else {
                    return invalid_params(id, "file_path is required");
                };
                manager.read(path).map(|r| json!(r))
            }
            "editor_search" => {
                let Some(query) = arguments.get("query").and_then(Value::as_str) else {
                    return invalid_params(id, "query is required");
                };
                let path = arguments.get("path").and_then(Value::as_str);
                let case_sensitive = arguments.get("case_sensitive").and_then(Value::as_bool).unwrap_or(false);
                manager.search(query, path, case_sensitive, self.editor_service.config().search_max_hits).map(|hits| json!(hits))
            }
            "editor_create_change" => {
                let Some(file_path) = arguments.get("file_path").and_then(Value::as_str) else {
                    return invalid_params(id, "file_path is required");
                };
                let Some(operation) = parse_operation(arguments.get("operation").and_then(Value::as_str)) else {
                    return invalid_params(id, "invalid operation");
                };
                let new_content = arguments.get("new_content").and_then(Value::as_str).map(|s| s.as_bytes().to_vec());
                let old_path = arguments.get("old_path").and_then(Value::as_str);
                let generate_diff = arguments.get("generate_diff").and_then(Value::as_bool).unwrap_or(true);
                manager
                    .create_change(file_path, operation, new_content, old_path, generate_diff, None, None)
                    .await
                    .map(|change: Change| json!(change))
            }
            "editor_get_changes" => {
                let status = arguments.get("status").and_then(Value::as_str).and_then(parse_status);
                Ok(json!(manager.list_changes(status)))
            }
            "editor_approve" => {
                let Some(change_id) = arguments.get("change_id").and_then(Value::as_str) else {
                    return invalid_params(id, "change_id is required");
                };
                manager.approve(change_id).map(|_| json!({"ok": true}))
            }
            "editor_reject" => {
                let Some(change_id) = arguments.get("change_id").and_then(Value::as_str) else {
                    return invalid_params(id, "change_id is required");
                };
                manager.reject(change_id).map(|_| json!({"ok": true}))
            }
            "editor_rollback" => {
                let Some(change_id) = arguments.get("change_id").and_then(Value::as_str) else {
                    return invalid_params(id, "change_id is required");
                };
                manager.rollback(change_id).map(|change| json!(change))
            }
            _ => return RpcResponse { result: None, error: Some(RpcError { code: METHOD_NOT_FOUND, message: format!("unknown tool {name}") }), id },
        };

        match result {
            Ok(value) => RpcResponse { result: Some(value), error: None, id },
            Err(e) => tool_error(id, &e),
        }
    }
}

fn parse_operation(raw: Option<&str>) -> Option<crate::editor::Operation> {
    use crate::editor::Operation::*;
    match raw? {
        "create" => Some(Create),
        "update" => Some(Update),
        "delete" => Some(Delete),
        "move" => Some(Move),
        _ => None,
    }
}

fn parse_status(raw: &str) -> Option<ChangeStatus> {
    match raw {
        "pending" => Some(ChangeStatus::Pending),
        "approved" => Some(ChangeStatus::Approved),
        "rejected" => Some(ChangeStatus::Rejected),
        _ => None,
    }
}

fn invalid_params(id: Value, message: &str) -> RpcResponse {
    RpcResponse { result: None, error: Some(RpcError { code: INVALID_PARAMS, message: message.to_string() }), id }
}

/// A tool failure is surfaced as a structured tool-call-result error, not a
/// transport error, so the model sees it and can retry (spec §7).
fn tool_error(id: Value, error: &EngineError) -> RpcResponse {
    RpcResponse { result: None, error: Some(RpcError { code: error.json_rpc_code(), message: error.to_string() }), id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use tempfile::TempDir;

    fn bridge(root: std::path::PathBuf) -> ToolBridge {
        let service = Arc::new(EditorService::new(Arc::new(EngineConfig::default())));
        let root_for_closure = root.clone();
        ToolBridge::new(
            service,
            Arc::new(move |_wf: &str| Some(root_for_closure.clone())),
            8,
            String::new(),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn tools_list_returns_catalogue() {
        let tmp = TempDir::new().unwrap();
        let bridge = bridge(tmp.path().to_path_buf());
        let response = bridge
            .dispatch(RpcRequest { method: "tools/list".to_string(), params: json!({}), id: json!(1) }, "agent1", None)
            .await;
        assert!(response.error.is_none());
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert!(tools >= 9);
    }

    #[tokio::test]
    async fn tools_call_missing_workflow_id_is_invalid_params() {
        let tmp = TempDir::new().unwrap();
        let bridge = bridge(tmp.path().to_path_buf());
        let response = bridge
            .dispatch(
                RpcRequest {
                    method: "tools/call".to_string(),
                    params: json!({"name": "editor_browse", "arguments": {"path": "."}}),
                    id: json!(1),
                },
                "agent1",
                None,
            )
            .await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn create_change_round_trips_through_bridge() {
        let tmp = TempDir::new().unwrap();
        let bridge = bridge(tmp.path().to_path_buf());
        let response = bridge
            .dispatch(
                RpcRequest {
                    method: "tools/call".to_string(),
                    params: json!({
                        "name": "editor_create_change",
                        "arguments": {"workflow_id": "wf1", "file_path": "a.txt", "operation": "create", "new_content": "hello"}
                    }),
                    id: json!(1),
                },
                "agent1",
                None,
            )
            .await;
        assert!(response.error.is_none(), "{:?}", response.error);
        assert_eq!(std::fs::read_to_string(tmp.path().join("a.txt")).unwrap(), "hello");
    }

    #[tokio::test]
    async fn dispatch_rejects_wrong_internal_token() {
        let tmp = TempDir::new().unwrap();
        let service = Arc::new(EditorService::new(Arc::new(EngineConfig::default())));
        let root = tmp.path().to_path_buf();
        let bridge = ToolBridge::new(
            service,
            Arc::new(move |_wf: &str| Some(root.clone())),
            8,
            "secret".to_string(),
            Duration::from_secs(60),
        );
        let response = bridge
            .dispatch(RpcRequest { method: "tools/list".to_string(), params: json!({}), id: json!(1) }, "agent1", Some("wrong"))
            .await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);

        let response = bridge
            .dispatch(RpcRequest { method: "tools/list".to_string(), params: json!({}), id: json!(1) }, "agent1", Some("secret"))
            .await;
        assert!(response.error.is_none());
    }
}
