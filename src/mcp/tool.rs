//! Tool authoring traits
//!
//! Tools are self-describing operations: a typed input that carries its own
//! JSON schema (via `JsonSchema`), a description, and an execute function.
//! Payment is never the tool's concern; the gate wraps every call.
//!
//! ```rust,ignore
//! #[derive(Deserialize, JsonSchema)]
//! struct EchoInput {
//!     /// Text to echo back
//!     text: String,
//! }
//!
//! struct Echo;
//!
//! impl Op for Echo {
//!     type Input = EchoInput;
//!
//!     fn name(&self) -> &str { "echo" }
//!     fn description(&self) -> &str { "Echo text back" }
//!
//!     fn execute(&self, input: EchoInput) -> Result<ToolOutput, ToolError> {
//!         Ok(ToolOutput::text(input.text))
//!     }
//! }
//! ```

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::protocol::{ContentItem, ToolCallResult};
use crate::payment::MoneyAmount;

/// Successful tool result
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: Vec<ContentItem>,

    /// Measured cost of this run. Only consulted for tools priced with
    /// `require_evaluation`; `None` means the base cost stands.
    pub metered_cost: Option<MoneyAmount>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            metered_cost: None,
        }
    }

    pub fn with_metered_cost(mut self, cost: MoneyAmount) -> Self {
        self.metered_cost = Some(cost);
        self
    }

    pub fn into_result(self) -> ToolCallResult {
        ToolCallResult::new(self.content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("tool '{0}' is not registered")]
    NotRegistered(String),
    #[error("{0}")]
    Failed(String),
}

/// A typed operation
pub trait Op: Send + Sync + 'static {
    type Input: DeserializeOwned + JsonSchema;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn execute(&self, input: Self::Input) -> Result<ToolOutput, ToolError>;
}

/// Object-safe view of an [`Op`], as stored in the registry
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object
    fn input_schema(&self) -> Value;

    /// Decode `arguments` and run
    fn call(&self, arguments: Value) -> Result<ToolOutput, ToolError>;
}

impl<T: Op> Tool for T {
    fn name(&self) -> &str {
        Op::name(self)
    }

    fn description(&self) -> &str {
        Op::description(self)
    }

    fn input_schema(&self) -> Value {
        let mut schema = serde_json::to_value(schemars::schema_for!(T::Input))
            .unwrap_or_else(|_| serde_json::json!({"type": "object"}));
        // The root title is the Rust type name, which means nothing to clients.
        if let Some(root) = schema.as_object_mut() {
            root.remove("title");
        }
        schema
    }

    fn call(&self, arguments: Value) -> Result<ToolOutput, ToolError> {
        let input: T::Input = serde_json::from_value(arguments)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        self.execute(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize, JsonSchema)]
    struct EchoInput {
        /// Text to echo back
        text: String,
    }

    struct Echo;

    impl Op for Echo {
        type Input = EchoInput;

        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echo text back"
        }

        fn execute(&self, input: EchoInput) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::text(input.text))
        }
    }

    #[test]
    fn test_schema_from_input_type() {
        let schema = Tool::input_schema(&Echo);
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["text"]));
        assert_eq!(schema["properties"]["text"]["type"], "string");
        assert_eq!(schema["properties"]["text"]["description"], "Text to echo back");
        assert!(schema.get("title").is_none());
    }

    #[test]
    fn test_call_decodes_arguments() {
        let tool: &dyn Tool = &Echo;
        let output = tool.call(json!({"text": "hi"})).unwrap();
        assert_eq!(output, ToolOutput::text("hi"));
        assert_eq!(tool.name(), "echo");

        let err = tool.call(json!({"text": 5})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[test]
    fn test_output_into_result() {
        let result = ToolOutput::text("7").into_result();
        assert!(!result.is_error);
        assert_eq!(result.joined_text(), "7");
    }
}
