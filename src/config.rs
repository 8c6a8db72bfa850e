//! Global configuration management for mcp402
//!
//! Configuration is layered, lowest precedence first:
//! 1. Built-in defaults
//! 2. `--config` (a JSON file path or an inline JSON string, env `MCP402_CONFIG`)
//! 3. Individual CLI flags and their `MCP402_*` environment variables
//!
//! Example config file:
//!
//! ```json
//! {
//!   "port": 5003,
//!   "pricing": {
//!     "add": { "base_cost": "0.10", "require_evaluation": true },
//!     "subtract": { "base_cost": "0.05" }
//!   },
//!   "on_failure": { "mode": "charge", "amount": "0.02" },
//!   "ledger": { "balances": { "0xabc...": "5.00" } }
//! }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use http::HeaderName;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::logging::{LogFormat, TracingConfig};
use crate::mcp::ToolRegistry;
use crate::payment::{
    InMemoryLedger, LedgerBackend, LedgerClient, MoneyAmount, PricePolicyTable, SettlementPolicy,
    ToolPricePolicy,
};
use crate::wallet::WalletIdentity;

pub const DEFAULT_PORT: u16 = 5003;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_WALLET_HEADER: &str = "x-agent-wallet";

// ============================================================================
// Configuration Arguments
// ============================================================================

/// Configuration arguments shared by every subcommand
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigArgs {
    /// Configuration file (JSON file path or JSON string).
    ///
    /// - A file path: --config mcp402.json
    ///
    /// - Inline JSON: --config '{"pricing":{"add":{"base_cost":"0.10"}}}'
    ///
    #[arg(long = "config", short = 'c', env = "MCP402_CONFIG", value_name = "file.json or {json}")]
    pub config: Option<String>,

    /// Port to listen on (default 5003)
    #[arg(long, short = 'p', env = "MCP402_PORT")]
    pub port: Option<u16>,

    /// Address to bind (default 0.0.0.0)
    #[arg(long, env = "MCP402_HOST")]
    pub host: Option<String>,

    /// Reply with plain JSON bodies instead of SSE streams
    #[arg(long, env = "MCP402_JSON_RESPONSE")]
    pub json_response: bool,

    /// Request header that carries the caller's wallet identity
    #[arg(long, env = "MCP402_WALLET_HEADER", value_name = "NAME")]
    pub wallet_header: Option<String>,

    /// Base URL of a remote ledger service. Without it balances are kept in memory.
    #[arg(long, env = "MCP402_LEDGER_URL", value_name = "http(s)://...")]
    pub ledger_url: Option<String>,

    /// Bearer token for the remote ledger
    #[arg(long, env = "MCP402_LEDGER_API_KEY", hide_env_values = true)]
    pub ledger_api_key: Option<String>,

    /// Seed the in-memory ledger (can be specified multiple times)
    ///
    /// Example: --credit 0xabc...=5.00
    ///
    #[arg(long, value_name = "wallet=amount")]
    pub credit: Vec<String>,

    /// What a failed evaluated tool costs: refund, charge_base or charge:<amount>
    #[arg(long, env = "MCP402_ON_FAILURE", value_parser = parse_settlement_policy)]
    pub on_failure: Option<SettlementPolicy>,

    /// Fail tool calls that run longer than this many seconds
    #[arg(long, env = "MCP402_TOOL_TIMEOUT", value_name = "SECS")]
    pub tool_timeout: Option<u64>,

    // -------------------------------------------------------------------------
    // Logging/Tracing Options
    // -------------------------------------------------------------------------

    /// Enable verbose output (INFO level logging)
    ///
    /// Default is WARN level. Use -v for INFO, -d for DEBUG.
    ///
    #[arg(short = 'v', long, env = "MCP402_VERBOSE")]
    pub verbose: bool,

    /// Enable debug output (DEBUG level logging)
    #[arg(short = 'd', long, env = "MCP402_DEBUG", conflicts_with = "verbose")]
    pub debug: bool,

    /// Quiet mode - only show errors
    #[arg(short = 'q', long, conflicts_with_all = ["verbose", "debug"])]
    pub quiet: bool,

    /// Silent mode - suppress all terminal log output
    ///
    /// Log file output (if configured) is unaffected.
    ///
    #[arg(long, short = 's', conflicts_with_all = ["verbose", "debug", "quiet"])]
    pub silent: bool,

    /// Explicit log level (trace, debug, info, warn, error). Defaults to warn;
    /// use `info` (or -v) to see request and payment activity
    #[arg(long, env = "MCP402_LOG_LEVEL", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, short = 'L', value_enum, env = "MCP402_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// Write debug logs to file
    #[arg(long, short = 'l', env = "MCP402_LOG_FILE", value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

/// Parse `refund`, `charge_base` or `charge:<amount>`
pub fn parse_settlement_policy(s: &str) -> Result<SettlementPolicy, String> {
    match s.trim() {
        "refund" => Ok(SettlementPolicy::Refund),
        "charge_base" | "charge-base" => Ok(SettlementPolicy::ChargeBase),
        other => {
            let amount = other
                .strip_prefix("charge:")
                .ok_or_else(|| format!("Unknown failure policy '{}'. Use refund, charge_base or charge:<amount>", s))?;
            let amount: MoneyAmount = amount
                .parse()
                .map_err(|e| format!("Invalid charge amount '{}': {}", amount, e))?;
            Ok(SettlementPolicy::Charge { amount })
        }
    }
}

/// Parse a `wallet=amount` credit
pub fn parse_credit(s: &str) -> Result<(WalletIdentity, MoneyAmount)> {
    let (wallet, amount) = s
        .rsplit_once('=')
        .ok_or_else(|| anyhow::anyhow!("Invalid credit '{}'. Expected wallet=amount", s))?;
    let wallet = WalletIdentity::parse(wallet)
        .map_err(|e| anyhow::anyhow!("Invalid wallet in credit '{}': {}", s, e))?;
    let amount = amount
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid amount in credit '{}': {}", s, e))?;
    Ok((wallet, amount))
}

// ============================================================================
// Global Configuration
// ============================================================================

/// Ledger backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Remote ledger base URL; the in-memory ledger is used when unset
    pub url: Option<String>,

    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    pub timeout_secs: Option<u64>,

    /// Opening balances for the in-memory ledger
    pub balances: IndexMap<WalletIdentity, MoneyAmount>,
}

/// Built-in prices: both arithmetic tools at 0.10, settled after the run
pub fn default_pricing() -> PricePolicyTable {
    let price = ToolPricePolicy::evaluated(MoneyAmount::from_cents(10));
    PricePolicyTable::new()
        .with("add", price)
        .with("subtract", price)
}

/// Global configuration structure (can be serialized/deserialized from JSON)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub port: u16,
    pub host: String,

    /// JSON bodies instead of SSE
    pub json_response: bool,

    pub wallet_header: String,

    /// Tool name to price. Tools missing here are refused.
    pub pricing: PricePolicyTable,

    /// Settlement of evaluated tools that fail after authorization
    pub on_failure: SettlementPolicy,

    pub tool_timeout_secs: Option<u64>,

    pub ledger: LedgerConfig,

    pub verbose: bool,
    pub debug: bool,
    pub quiet: bool,
    pub silent: bool,
    pub log_level: Option<String>,
    pub log_format: LogFormat,
    pub log_file: Option<PathBuf>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: DEFAULT_HOST.to_string(),
            json_response: false,
            wallet_header: DEFAULT_WALLET_HEADER.to_string(),
            pricing: default_pricing(),
            on_failure: SettlementPolicy::default(),
            tool_timeout_secs: None,
            ledger: LedgerConfig::default(),
            verbose: false,
            debug: false,
            quiet: false,
            silent: false,
            log_level: None,
            log_format: LogFormat::default(),
            log_file: None,
        }
    }
}

impl GlobalConfig {
    /// Load configuration with CLI args taking precedence over the config file
    pub fn from_args(args: &ConfigArgs) -> Result<Self> {
        load_config(args)
    }

    /// Reject settings that would only fail later, at request time
    pub fn validate(&self, registry: &ToolRegistry) -> Result<()> {
        for (tool, _) in self.pricing.iter() {
            if !registry.contains(tool) {
                anyhow::bail!(
                    "Price configured for unknown tool '{}'. Registered tools: {}",
                    tool,
                    registry.names().collect::<Vec<_>>().join(", ")
                );
            }
        }
        for tool in registry.names() {
            if self.pricing.get(tool).is_none() {
                tracing::warn!(tool, "tool has no price, every call to it will be refused");
            }
        }
        self.wallet_header_name()?;
        self.tracing_config()?;
        Ok(())
    }

    pub fn wallet_header_name(&self) -> Result<HeaderName> {
        HeaderName::try_from(self.wallet_header.as_str())
            .with_context(|| format!("Invalid wallet header name '{}'", self.wallet_header))
    }

    pub fn tool_timeout(&self) -> Option<Duration> {
        self.tool_timeout_secs.map(Duration::from_secs)
    }

    /// Remote ledger when a URL is configured, in-memory otherwise
    pub fn build_ledger(&self) -> Result<LedgerBackend> {
        if self.ledger.url.is_some() {
            let client = LedgerClient::try_from(&self.ledger).context("Failed to configure ledger client")?;
            if !self.ledger.balances.is_empty() {
                tracing::warn!("ignoring opening balances, a remote ledger is configured");
            }
            return Ok(LedgerBackend::Remote(client));
        }

        let balances = self
            .ledger
            .balances
            .iter()
            .map(|(wallet, amount)| (wallet.clone(), *amount));
        Ok(LedgerBackend::Memory(InMemoryLedger::with_balances(balances)))
    }

    pub fn tracing_config(&self) -> Result<TracingConfig> {
        let level = self
            .log_level
            .as_deref()
            .map(|level| level.parse::<tracing::Level>())
            .transpose()
            .map_err(|e| anyhow::anyhow!("Invalid log level: {}", e))?;

        Ok(TracingConfig {
            verbose: self.verbose,
            debug: self.debug,
            quiet: self.quiet,
            silent: self.silent,
            level,
            format: self.log_format.clone(),
            log_file: self.log_file.clone(),
        })
    }

    /// Initialize tracing/logging. Call once, early in main().
    pub fn init_tracing(&self) -> Result<()> {
        crate::logging::init_tracing(self.tracing_config()?);
        Ok(())
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

/// Read `input` as inline JSON when it looks like JSON, otherwise as a file path
fn load_json_string(input: &str) -> Result<String> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(input.to_string());
    }

    let path = std::path::Path::new(input);
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))
}

fn load_config(args: &ConfigArgs) -> Result<GlobalConfig> {
    let mut config = match &args.config {
        Some(input) => {
            let json = load_json_string(input)?;
            serde_json::from_str(&json).context("Failed to parse config JSON")?
        }
        None => GlobalConfig::default(),
    };

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if args.json_response {
        config.json_response = true;
    }
    if let Some(header) = &args.wallet_header {
        config.wallet_header = header.clone();
    }
    if let Some(url) = &args.ledger_url {
        config.ledger.url = Some(url.clone());
    }
    if let Some(key) = &args.ledger_api_key {
        config.ledger.api_key = Some(key.clone());
    }
    if let Some(policy) = args.on_failure {
        config.on_failure = policy;
    }
    if let Some(secs) = args.tool_timeout {
        config.tool_timeout_secs = Some(secs);
    }

    // Credits add to balances from the file.
    for credit in &args.credit {
        let (wallet, amount) = parse_credit(credit)?;
        let balance = config.ledger.balances.entry(wallet).or_default();
        *balance = *balance + amount;
    }

    if args.verbose {
        config.verbose = true;
    }
    if args.debug {
        config.debug = true;
    }
    if args.quiet {
        config.quiet = true;
    }
    if args.silent {
        config.silent = true;
    }
    if let Some(level) = &args.log_level {
        config.log_level = Some(level.clone());
    }
    if let Some(format) = &args.log_format {
        config.log_format = format.clone();
    }
    if let Some(log_file) = &args.log_file {
        config.log_file = Some(log_file.clone());
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(s: &str) -> MoneyAmount {
        s.parse().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = GlobalConfig::default();
        assert_eq!(config.port, 5003);
        assert_eq!(config.host, "0.0.0.0");
        assert!(!config.json_response);
        assert_eq!(config.wallet_header, "x-agent-wallet");
        assert_eq!(config.on_failure, SettlementPolicy::Refund);

        let add = config.pricing.get("add").unwrap();
        assert_eq!(add.base_cost, money("0.10"));
        assert!(add.require_evaluation);
        assert!(config.pricing.get("subtract").is_some());
    }

    #[test]
    fn test_inline_json_with_cli_overrides() {
        let args = ConfigArgs {
            config: Some(
                r#"{"port": 8080, "pricing": {"add": {"base_cost": "0.25"}}, "ledger": {"balances": {"alice": "1"}}}"#
                    .to_string(),
            ),
            host: Some("127.0.0.1".to_string()),
            credit: vec!["alice=0.50".to_string(), "bob=2".to_string()],
            on_failure: Some(SettlementPolicy::ChargeBase),
            ..Default::default()
        };
        let config = GlobalConfig::from_args(&args).unwrap();

        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.pricing.len(), 1);
        assert_eq!(config.pricing.get("add").unwrap().base_cost, money("0.25"));
        assert!(!config.pricing.get("add").unwrap().require_evaluation);
        assert_eq!(config.on_failure, SettlementPolicy::ChargeBase);

        let alice = WalletIdentity::parse("alice").unwrap();
        let bob = WalletIdentity::parse("bob").unwrap();
        assert_eq!(config.ledger.balances[&alice], money("1.50"));
        assert_eq!(config.ledger.balances[&bob], money("2"));
    }

    #[test]
    fn test_negative_price_rejected() {
        let args = ConfigArgs {
            config: Some(r#"{"pricing": {"add": {"base_cost": "-1"}}}"#.to_string()),
            ..Default::default()
        };
        assert!(GlobalConfig::from_args(&args).is_err());
    }

    #[test]
    fn test_missing_config_file() {
        let args = ConfigArgs {
            config: Some("/nonexistent/mcp402.json".to_string()),
            ..Default::default()
        };
        let err = GlobalConfig::from_args(&args).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_parse_settlement_policy() {
        assert_eq!(parse_settlement_policy("refund"), Ok(SettlementPolicy::Refund));
        assert_eq!(parse_settlement_policy("charge_base"), Ok(SettlementPolicy::ChargeBase));
        assert_eq!(
            parse_settlement_policy("charge:0.03"),
            Ok(SettlementPolicy::Charge { amount: money("0.03") })
        );
        assert!(parse_settlement_policy("charge:-1").is_err());
        assert!(parse_settlement_policy("forgive").is_err());
    }

    #[test]
    fn test_parse_credit() {
        let (wallet, amount) = parse_credit("0xABCDEF0123456789abcdef0123456789ABCDEF01=5").unwrap();
        assert_eq!(wallet.as_str(), "0xabcdef0123456789abcdef0123456789abcdef01");
        assert_eq!(amount, money("5"));

        assert!(parse_credit("alice").is_err());
        assert!(parse_credit("=1").is_err());
        assert!(parse_credit("alice=lots").is_err());
    }

    #[test]
    fn test_validate() {
        let registry = ToolRegistry::builtin().unwrap();
        assert!(GlobalConfig::default().validate(&registry).is_ok());

        let mut config = GlobalConfig::default();
        config.pricing = default_pricing().with("multiply", ToolPricePolicy::fixed(money("1")));
        let err = config.validate(&registry).unwrap_err();
        assert!(err.to_string().contains("multiply"));

        let mut config = GlobalConfig::default();
        config.wallet_header = "bad header".to_string();
        assert!(config.validate(&registry).is_err());

        let mut config = GlobalConfig::default();
        config.log_level = Some("loud".to_string());
        assert!(config.validate(&registry).is_err());
    }

    #[tokio::test]
    async fn test_build_ledger() {
        let alice = WalletIdentity::parse("alice").unwrap();
        let mut config = GlobalConfig::default();
        config.ledger.balances.insert(alice.clone(), money("3"));

        match config.build_ledger().unwrap() {
            LedgerBackend::Memory(ledger) => assert_eq!(ledger.balance(&alice).await, money("3")),
            other => panic!("expected memory ledger, got {:?}", other),
        }

        config.ledger.url = Some("http://127.0.0.1:9/ledger".to_string());
        assert!(matches!(config.build_ledger().unwrap(), LedgerBackend::Remote(_)));
    }
}
