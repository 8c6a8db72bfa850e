use anyhow::Result;

use crate::config::GlobalConfig;
use crate::mcp::ToolRegistry;

/// Print the effective configuration, after file and CLI layering, as JSON.
///
/// Secrets are never serialized.
pub fn run(config: &GlobalConfig) -> Result<()> {
    let registry = ToolRegistry::builtin()?;
    config.validate(&registry)?;
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
