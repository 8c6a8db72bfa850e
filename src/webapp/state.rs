use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::http::HeaderName;

use crate::config::GlobalConfig;
use crate::mcp::{McpServer, ToolRegistry};
use crate::payment::{LedgerBackend, PaymentGate};
use crate::wallet::WalletContextStore;

#[derive(Clone)]
pub struct AppState {
    pub server: Arc<McpServer<LedgerBackend>>,
    /// Per-request wallet contexts, shared with the payment gate
    pub wallets: WalletContextStore,
    /// Header the request adapter reads the wallet from
    pub wallet_header: HeaderName,
    /// Always answer with JSON bodies, never SSE
    pub json_response: bool,
    /// When the server was started (for uptime tracking)
    pub started_at: Instant,
}

impl AppState {
    /// Wire registry, ledger, gate and server together from configuration.
    ///
    /// Fails on configuration that could only surface at request time, such
    /// as a price for a tool that does not exist.
    pub fn from_config(config: &GlobalConfig) -> Result<Self> {
        let registry = ToolRegistry::builtin()?;
        config.validate(&registry)?;

        let wallets = WalletContextStore::new();
        let ledger = Arc::new(config.build_ledger()?);
        let gate = PaymentGate::new(Arc::new(config.pricing.clone()), wallets.clone(), ledger)
            .with_failure_policy(config.on_failure)
            .with_tool_timeout(config.tool_timeout());

        Ok(Self {
            server: Arc::new(McpServer::new(Arc::new(registry), gate)),
            wallets,
            wallet_header: config.wallet_header_name()?,
            json_response: config.json_response,
            started_at: Instant::now(),
        })
    }

    pub fn ledger(&self) -> &LedgerBackend {
        self.server.gate().ledger()
    }
}
