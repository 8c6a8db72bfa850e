//! Payment gate middleware
//!
//! `PaymentGate::call(tool, next)` runs a tool call through this pipeline:
//!
//! 1. price lookup (unpriced tools are refused)
//! 2. wallet resolution from the request context
//! 3. ledger authorization of the base cost
//! 4. `next()` on its own task, so a panicking tool cannot take the request down
//! 5. settlement, for tools priced with `require_evaluation`
//!
//! Every failure comes back as an `isError` tool result tagged with the
//! stage that failed. Nothing escapes as a transport-level fault.
//!
//! Each call performs exactly one `authorize` and at most one `settle`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::{JoinError, JoinSet};
use tracing::{info_span, Instrument};

use super::ledger::{Ledger, LedgerError, Reservation};
use super::policy::{PricePolicyTable, SettlementPolicy, ToolPricePolicy};
use super::MoneyAmount;
use crate::mcp::protocol::ToolCallResult;
use crate::mcp::tool::{ToolError, ToolOutput};
use crate::wallet::{WalletContextStore, WalletIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerPhase {
    Authorization,
    Settlement,
}

impl fmt::Display for LedgerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerPhase::Authorization => f.write_str("authorization"),
            LedgerPhase::Settlement => f.write_str("settlement"),
        }
    }
}

fn available_note(available: &Option<MoneyAmount>) -> String {
    match available {
        Some(amount) => format!(" (available: {})", amount),
        None => String::new(),
    }
}

/// Why a gated call did not return the tool's result
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("Unknown tool '{tool}'")]
    UnknownTool { tool: String },

    #[error("No wallet identity was presented with this request")]
    Unauthenticated,

    #[error("Wallet {wallet} cannot cover {required} for tool '{tool}'{}", available_note(.available))]
    PaymentRequired {
        tool: String,
        wallet: WalletIdentity,
        required: MoneyAmount,
        available: Option<MoneyAmount>,
    },

    #[error("Payment ledger unavailable during {phase}: {reason}")]
    GateUnavailable { phase: LedgerPhase, reason: String },

    #[error("Tool '{tool}' failed: {reason}")]
    ToolExecution { tool: String, reason: String },
}

impl GateError {
    /// Stable tag naming the stage that failed
    pub fn stage(&self) -> &'static str {
        match self {
            GateError::UnknownTool { .. } => "unknown_tool",
            GateError::Unauthenticated => "unauthenticated",
            GateError::PaymentRequired { .. } => "payment_required",
            GateError::GateUnavailable { .. } => "payment_gate_unavailable",
            GateError::ToolExecution { .. } => "tool_execution",
        }
    }

    pub fn into_result(self) -> ToolCallResult {
        let stage = self.stage();
        ToolCallResult::error(format!("Error [{}]: {}", stage, self))
            .with_meta(json!({ "stage": stage }))
    }
}

pub struct PaymentGate<L> {
    prices: Arc<PricePolicyTable>,
    wallets: WalletContextStore,
    ledger: Arc<L>,
    on_failure: SettlementPolicy,
    tool_timeout: Option<Duration>,
}

impl<L> fmt::Debug for PaymentGate<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaymentGate")
            .field("prices", &self.prices)
            .field("on_failure", &self.on_failure)
            .field("tool_timeout", &self.tool_timeout)
            .finish_non_exhaustive()
    }
}

impl<L> PaymentGate<L>
where
    L: Ledger + Send + Sync + 'static,
{
    pub fn new(prices: Arc<PricePolicyTable>, wallets: WalletContextStore, ledger: Arc<L>) -> Self {
        Self {
            prices,
            wallets,
            ledger,
            on_failure: SettlementPolicy::default(),
            tool_timeout: None,
        }
    }

    /// How evaluated tools are settled when they fail after authorization
    pub fn with_failure_policy(mut self, policy: SettlementPolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Treat a tool that runs longer than `timeout` as failed
    pub fn with_tool_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn ledger(&self) -> &Arc<L> {
        &self.ledger
    }

    /// Gate one tool call. `next` produces the tool's work and is only
    /// invoked once payment has been authorized.
    pub async fn call<F, Fut>(&self, tool: &str, next: F) -> ToolCallResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        match self.try_call(tool, next).await {
            Ok(output) => output.into_result(),
            Err(err) => err.into_result(),
        }
    }

    /// Like [`call`](Self::call) but keeps the typed outcome
    pub async fn try_call<F, Fut>(&self, tool: &str, next: F) -> Result<ToolOutput, GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let Some(policy) = self.prices.get(tool).copied() else {
            tracing::info!(tool, "refusing unpriced tool");
            return Err(GateError::UnknownTool {
                tool: tool.to_string(),
            });
        };

        let Some(wallet) = self.wallets.resolve() else {
            tracing::info!(tool, "refusing call without wallet");
            return Err(GateError::Unauthenticated);
        };

        let span = info_span!("payment", tool, wallet = %wallet);
        self.charge_and_run(tool, policy, wallet, next)
            .instrument(span)
            .await
    }

    async fn charge_and_run<F, Fut>(
        &self,
        tool: &str,
        policy: ToolPricePolicy,
        wallet: WalletIdentity,
        next: F,
    ) -> Result<ToolOutput, GateError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let reservation = match self.ledger.authorize(&wallet, policy.base_cost).await {
            Ok(reservation) => reservation,
            Err(LedgerError::InsufficientFunds {
                required,
                available,
            }) => {
                tracing::info!(%required, "insufficient funds");
                return Err(GateError::PaymentRequired {
                    tool: tool.to_string(),
                    wallet,
                    required,
                    available,
                });
            }
            Err(LedgerError::Unavailable(reason)) => {
                tracing::warn!(%reason, "ledger unavailable, refusing call");
                return Err(GateError::GateUnavailable {
                    phase: LedgerPhase::Authorization,
                    reason,
                });
            }
        };
        tracing::debug!(
            reservation = %reservation.id,
            amount = %reservation.amount,
            evaluated = policy.require_evaluation,
            "authorized"
        );

        // Fixed-cost tools were fully charged by the authorization.
        let pending = policy.require_evaluation.then(|| PendingCharge {
            ledger: self.ledger.clone(),
            wallet,
            reservation: Some(reservation),
            failure_charge: self.on_failure.failure_charge(policy.base_cost),
        });

        match self.execute(next).await {
            Ok(output) => {
                if let Some(pending) = pending {
                    let actual = output.metered_cost.unwrap_or(policy.base_cost);
                    pending.settle(actual).await.map_err(|reason| {
                        tracing::warn!(%reason, "settlement failed, withholding result");
                        GateError::GateUnavailable {
                            phase: LedgerPhase::Settlement,
                            reason,
                        }
                    })?;
                }
                Ok(output)
            }
            Err(reason) => {
                tracing::warn!(%reason, "tool failed after authorization");
                if let Some(pending) = pending {
                    if let Err(err) = pending.settle_failure().await {
                        tracing::error!(error = %err, "could not settle failed call");
                    }
                }
                Err(GateError::ToolExecution {
                    tool: tool.to_string(),
                    reason,
                })
            }
        }
    }

    /// Run the tool on its own task, bound to the caller's request context.
    /// Dropping this future aborts the task.
    async fn execute<F, Fut>(&self, next: F) -> Result<ToolOutput, String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let mut task = JoinSet::new();
        task.spawn(WalletContextStore::inherit(next()));

        let joined = match self.tool_timeout {
            Some(limit) => match tokio::time::timeout(limit, task.join_next()).await {
                Ok(joined) => joined,
                Err(_) => return Err(format!("timed out after {:?}", limit)),
            },
            None => task.join_next().await,
        };

        match joined {
            Some(Ok(result)) => result.map_err(|e| e.to_string()),
            Some(Err(err)) => Err(describe_join_error(err)),
            None => Err("tool task was never started".to_string()),
        }
    }
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return "tool task was cancelled".to_string();
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    tracing::error!(panic = %message, "tool panicked");
    format!("panicked: {}", message)
}

/// An authorization of an evaluated tool that has not been settled yet.
///
/// If it is dropped unsettled (the caller went away mid-call) the failure
/// charge is settled in the background.
struct PendingCharge<L: Ledger + Send + Sync + 'static> {
    ledger: Arc<L>,
    wallet: WalletIdentity,
    reservation: Option<Reservation>,
    failure_charge: MoneyAmount,
}

impl<L: Ledger + Send + Sync + 'static> PendingCharge<L> {
    async fn settle(mut self, actual: MoneyAmount) -> Result<(), String> {
        let Some(reservation) = self.reservation.take() else {
            return Ok(());
        };
        let id = reservation.id.clone();
        self.ledger
            .settle(&self.wallet, actual, reservation)
            .await
            .map_err(|e| e.to_string())?;
        tracing::debug!(reservation = %id, %actual, "settled");
        Ok(())
    }

    async fn settle_failure(self) -> Result<(), String> {
        let charge = self.failure_charge;
        self.settle(charge).await
    }
}

impl<L: Ledger + Send + Sync + 'static> Drop for PendingCharge<L> {
    fn drop(&mut self) {
        let Some(reservation) = self.reservation.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(reservation = %reservation.id, "call abandoned outside a runtime, reservation left open");
            return;
        };

        tracing::info!(reservation = %reservation.id, "call abandoned, settling as failed");
        let ledger = self.ledger.clone();
        let wallet = self.wallet.clone();
        let charge = self.failure_charge;
        handle.spawn(async move {
            let id = reservation.id.clone();
            if let Err(err) = ledger.settle(&wallet, charge, reservation).await {
                tracing::error!(reservation = %id, error = %err, "could not settle abandoned call");
            }
        });
    }
}
