//! MCP (Model Context Protocol) tool server
//!
//! - JSON-RPC message types ([`protocol`])
//! - Tool authoring traits and the built-in arithmetic tools
//! - A registry that validates arguments against each tool's schema
//! - [`McpServer`], which dispatches JSON-RPC methods and sends every
//!   `tools/call` through the payment gate

pub mod protocol;
pub mod registry;
pub mod server;
pub mod tool;
pub mod tools;

pub use registry::{InvalidArguments, RegistryError, ToolRegistry};
pub use server::McpServer;
pub use tool::{Op, Tool, ToolError, ToolOutput};
