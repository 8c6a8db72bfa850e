//! Ledger interface consumed by the payment gate, plus the in-process backend
//!
//! A ledger supports two calls:
//! - `authorize` holds `amount` against a wallet and hands back a
//!   [`Reservation`]. For fixed-cost tools the hold is the final charge.
//! - `settle` reconciles a reservation to the actual cost. It refunds the
//!   difference when the tool cost less, and takes the extra, bounded by the
//!   remaining balance, when it cost more.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::client::LedgerClient;
use super::MoneyAmount;
use crate::prelude::RwArc;
use crate::wallet::WalletIdentity;

// ============================================================================
// Ledger Trait
// ============================================================================

/// Funds held by a successful authorization.
///
/// Settling consumes the reservation, so it can be settled at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: String,
    pub wallet: WalletIdentity,
    pub amount: MoneyAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds: {required} required")]
    InsufficientFunds {
        required: MoneyAmount,
        available: Option<MoneyAmount>,
    },
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Asynchronous billing backend used by the payment gate.
pub trait Ledger {
    /// Hold `amount` against `wallet`.
    fn authorize(
        &self,
        wallet: &WalletIdentity,
        amount: MoneyAmount,
    ) -> impl Future<Output = Result<Reservation, LedgerError>> + Send;

    /// Finalize `reservation` at `actual`. Only fails with `Unavailable`.
    fn settle(
        &self,
        wallet: &WalletIdentity,
        actual: MoneyAmount,
        reservation: Reservation,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send;

    /// Short backend name for logs and health output
    fn kind(&self) -> &'static str;
}

impl<T: Ledger> Ledger for Arc<T> {
    fn authorize(
        &self,
        wallet: &WalletIdentity,
        amount: MoneyAmount,
    ) -> impl Future<Output = Result<Reservation, LedgerError>> + Send {
        self.as_ref().authorize(wallet, amount)
    }

    fn settle(
        &self,
        wallet: &WalletIdentity,
        actual: MoneyAmount,
        reservation: Reservation,
    ) -> impl Future<Output = Result<(), LedgerError>> + Send {
        self.as_ref().settle(wallet, actual, reservation)
    }

    fn kind(&self) -> &'static str {
        self.as_ref().kind()
    }
}

// ============================================================================
// InMemoryLedger
// ============================================================================

/// Process-local balances. Nothing is persisted.
#[derive(Clone, Default)]
pub struct InMemoryLedger {
    balances: RwArc<HashMap<WalletIdentity, MoneyAmount>>,
    next_reservation: Arc<AtomicU64>,
}

impl Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger").finish_non_exhaustive()
    }
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger pre-loaded with balances
    pub fn with_balances(balances: impl IntoIterator<Item = (WalletIdentity, MoneyAmount)>) -> Self {
        Self {
            balances: Arc::new(RwLock::new(balances.into_iter().collect())),
            next_reservation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Add funds to a wallet, returning the new balance
    pub async fn credit(&self, wallet: &WalletIdentity, amount: MoneyAmount) -> MoneyAmount {
        let mut balances = self.balances.write().await;
        let balance = balances.entry(wallet.clone()).or_default();
        *balance = *balance + amount;
        *balance
    }

    pub async fn balance(&self, wallet: &WalletIdentity) -> MoneyAmount {
        self.balances
            .read()
            .await
            .get(wallet)
            .copied()
            .unwrap_or_default()
    }

    /// Number of wallets with a balance entry
    pub async fn accounts(&self) -> usize {
        self.balances.read().await.len()
    }
}

impl Ledger for InMemoryLedger {
    async fn authorize(
        &self,
        wallet: &WalletIdentity,
        amount: MoneyAmount,
    ) -> Result<Reservation, LedgerError> {
        let mut balances = self.balances.write().await;
        let available = balances.get(wallet).copied().unwrap_or_default();
        if available < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: Some(available),
            });
        }
        if !amount.is_zero() {
            balances.insert(wallet.clone(), available - amount);
        }
        drop(balances);

        let seq = self.next_reservation.fetch_add(1, Ordering::Relaxed);
        Ok(Reservation {
            id: format!("mem-{}", seq),
            wallet: wallet.clone(),
            amount,
        })
    }

    async fn settle(
        &self,
        wallet: &WalletIdentity,
        actual: MoneyAmount,
        reservation: Reservation,
    ) -> Result<(), LedgerError> {
        if &reservation.wallet != wallet {
            return Err(LedgerError::Unavailable(format!(
                "reservation {} belongs to a different wallet",
                reservation.id
            )));
        }

        let mut balances = self.balances.write().await;
        let balance = balances.entry(wallet.clone()).or_default();
        if actual <= reservation.amount {
            *balance = *balance + (reservation.amount - actual);
        } else {
            let extra = (actual - reservation.amount).min(*balance);
            *balance = *balance - extra;
        }
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

// ============================================================================
// LedgerBackend - runtime selection
// ============================================================================

/// Ledger chosen from configuration at startup
#[derive(Clone, Debug)]
pub enum LedgerBackend {
    Memory(InMemoryLedger),
    Remote(LedgerClient),
}

impl Ledger for LedgerBackend {
    async fn authorize(
        &self,
        wallet: &WalletIdentity,
        amount: MoneyAmount,
    ) -> Result<Reservation, LedgerError> {
        match self {
            LedgerBackend::Memory(ledger) => ledger.authorize(wallet, amount).await,
            LedgerBackend::Remote(client) => client.authorize(wallet, amount).await,
        }
    }

    async fn settle(
        &self,
        wallet: &WalletIdentity,
        actual: MoneyAmount,
        reservation: Reservation,
    ) -> Result<(), LedgerError> {
        match self {
            LedgerBackend::Memory(ledger) => ledger.settle(wallet, actual, reservation).await,
            LedgerBackend::Remote(client) => client.settle(wallet, actual, reservation).await,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            LedgerBackend::Memory(ledger) => ledger.kind(),
            LedgerBackend::Remote(client) => client.kind(),
        }
    }
}
