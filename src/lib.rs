//! mcp402: an MCP tool server that charges the caller's wallet for every
//! tool call.
//!
//! A request passes through these layers, outermost first:
//!
//! - [`webapp::adapter`] binds the caller's wallet to the request
//! - [`mcp::McpServer`] dispatches the JSON-RPC method
//! - [`payment::PaymentGate`] prices, authorizes and settles the call
//! - the tool itself runs, with no knowledge of billing

pub mod cli;
pub mod config;
pub mod logging;
pub mod mcp;
pub mod payment;
pub mod prelude;
pub mod wallet;
pub mod webapp;
