//! Tool registry
//!
//! Built once at startup and shared as `Arc<ToolRegistry>`; read-only after
//! that. Each tool's input schema is compiled when the tool is registered so
//! that argument validation on the request path is just a check.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;

use super::protocol::ToolInfo;
use super::tool::Tool;
use super::tools::{Add, Subtract};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    Duplicate(String),
    #[error("tool '{tool}' has an invalid input schema: {reason}")]
    InvalidSchema { tool: String, reason: String },
}

/// Arguments rejected by a tool's input schema
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Input validation error: {}", .errors.join("; "))]
pub struct InvalidArguments {
    pub tool: String,
    pub errors: Vec<String>,
}

struct Entry {
    tool: Arc<dyn Tool>,
    schema: Value,
    validator: jsonschema::Validator,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Entry>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `add` and `subtract` tools
    pub fn builtin() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.register(Add)?;
        registry.register(Subtract)?;
        Ok(registry)
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        let schema = tool.input_schema();
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            RegistryError::InvalidSchema {
                tool: name.clone(),
                reason: e.to_string(),
            }
        })?;

        tracing::debug!(target: "mcp", tool = %name, "tool registered");
        self.tools.insert(
            name,
            Entry {
                tool: Arc::new(tool),
                schema,
                validator,
            },
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| entry.tool.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Descriptors for `tools/list`, in registration order
    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|(name, entry)| ToolInfo {
                name: name.clone(),
                description: entry.tool.description().to_string(),
                input_schema: entry.schema.clone(),
            })
            .collect()
    }

    /// Check `arguments` against the tool's input schema.
    ///
    /// Unregistered tools pass: deciding what to do with them is the payment
    /// gate's job, and it refuses anything without a price.
    pub fn validate(&self, name: &str, arguments: &Value) -> Result<(), InvalidArguments> {
        let Some(entry) = self.tools.get(name) else {
            return Ok(());
        };

        let errors: Vec<String> = entry
            .validator
            .iter_errors(arguments)
            .map(|e| e.to_string())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(InvalidArguments {
                tool: name.to_string(),
                errors,
            })
        }
    }
}
