//! MCP request dispatch
//!
//! Transport-agnostic: the HTTP handler decodes the body and hands each
//! JSON-RPC message here. `tools/call` is validated against the registry and
//! then run through the [`PaymentGate`], which decides whether the tool body
//! executes at all.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::task::JoinSet;

use super::protocol::*;
use super::registry::ToolRegistry;
use super::tool::ToolError;
use crate::payment::{Ledger, PaymentGate};
use crate::wallet::WalletContextStore;

pub struct McpServer<L> {
    info: ServerInfo,
    registry: Arc<ToolRegistry>,
    gate: PaymentGate<L>,
}

impl<L> McpServer<L>
where
    L: Ledger + Send + Sync + 'static,
{
    pub fn new(registry: Arc<ToolRegistry>, gate: PaymentGate<L>) -> Self {
        Self {
            info: ServerInfo::default(),
            registry,
            gate,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &PaymentGate<L> {
        &self.gate
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.registry.list()
    }

    /// Validate `arguments` and run the named tool behind the payment gate.
    ///
    /// Missing arguments are treated as `{}`. Schema failures are reported
    /// before the gate is consulted, so they are never charged.
    pub async fn call_tool(&self, name: &str, arguments: Option<Map<String, Value>>) -> ToolCallResult {
        let arguments = Value::Object(arguments.unwrap_or_default());
        if let Err(err) = self.registry.validate(name, &arguments) {
            tracing::debug!(target: "mcp", tool = name, error = %err, "arguments rejected");
            return ToolCallResult::error(err.to_string());
        }

        let tool = self.registry.get(name);
        let tool_name = name.to_string();
        self.gate
            .call(name, move || async move {
                match tool {
                    Some(tool) => tool.call(arguments),
                    None => Err(ToolError::NotRegistered(tool_name)),
                }
            })
            .await
    }

    /// Handle one decoded JSON-RPC message.
    ///
    /// Returns `None` when nothing should be sent back: notifications, and
    /// responses from the client (this server never issues requests).
    pub async fn handle_message(&self, message: Value) -> Option<JsonRpcResponse> {
        let is_response = message.get("method").is_none()
            && (message.get("result").is_some() || message.get("error").is_some());
        if is_response {
            tracing::debug!(target: "mcp", "ignoring client response");
            return None;
        }

        let id = message
            .get("id")
            .and_then(|id| serde_json::from_value::<JsonRpcId>(id.clone()).ok());

        let request: JsonRpcRequest = match serde_json::from_value(message) {
            Ok(request) => request,
            Err(e) => {
                return Some(JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_request(format!("Invalid request: {}", e)),
                ))
            }
        };

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }

        tracing::debug!(target: "mcp", method = %request.method, id = ?request.id, "<-");

        if request.is_notification() {
            self.handle_notification(&request);
            return None;
        }

        let response = self.handle_request(request).await;
        match &response.error {
            Some(error) => tracing::debug!(target: "mcp", %error, "-> error"),
            None => tracing::debug!(target: "mcp", "-> ok"),
        }
        Some(response)
    }

    /// Handle a JSON-RPC batch. Entries run concurrently as part of the same
    /// request, so they all see the caller's wallet. Responses keep the
    /// order of their requests.
    pub async fn handle_batch(self: &Arc<Self>, messages: Vec<Value>) -> Vec<JsonRpcResponse> {
        if messages.is_empty() {
            return vec![JsonRpcResponse::error(
                None,
                JsonRpcError::invalid_request("Invalid request: empty batch"),
            )];
        }

        let mut tasks = JoinSet::new();
        for (index, message) in messages.into_iter().enumerate() {
            let server = Arc::clone(self);
            tasks.spawn(WalletContextStore::inherit(async move {
                (index, server.handle_message(message).await)
            }));
        }

        let mut responses = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Some(response))) => responses.push((index, response)),
                Ok((_, None)) => {}
                Err(err) => tracing::error!(target: "mcp", error = %err, "batch entry failed"),
            }
        }

        responses.sort_by_key(|(index, _)| *index);
        responses.into_iter().map(|(_, response)| response).collect()
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" => tracing::debug!(target: "mcp", "client initialized"),
            "notifications/cancelled" => tracing::debug!(target: "mcp", "request cancelled"),
            method => tracing::debug!(target: "mcp", method, "unhandled notification"),
        }
    }

    async fn handle_request(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let id = req.id.clone();

        let result = match req.method.as_str() {
            "initialize" => self.handle_initialize(req.params),
            "ping" => Ok(json!({})),
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(req.params).await,
            method => Err(JsonRpcError::method_not_found(method)),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => JsonRpcResponse::error(id, error),
        }
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: InitializeParams = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))?
            .unwrap_or_default();

        let protocol_version = match params.protocol_version {
            Some(requested) if SUPPORTED_PROTOCOL_VERSIONS.contains(&requested.as_str()) => requested,
            _ => LATEST_PROTOCOL_VERSION.to_string(),
        };

        let result = InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
            },
            server_info: self.info.clone(),
            instructions: None,
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal(e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let result = ToolsListResult {
            tools: self.list_tools(),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal(e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;
        let call: ToolCallParams = serde_json::from_value(params)
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))?;

        let result = self.call_tool(&call.name, call.arguments).await;
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal(e.to_string()))
    }
}
