//! Payment gating for tool calls
//!
//! [`PaymentGate`] wraps every tool invocation. It looks up the price,
//! resolves the caller's wallet from the request context, and authorizes the
//! charge with a [`Ledger`] before the tool runs. Settlement happens
//! afterwards for tools whose final cost depends on the run.

pub mod client;
pub mod gate;
pub mod ledger;
pub mod money;
pub mod policy;

pub use client::{LedgerClient, LedgerClientError};
pub use gate::{GateError, LedgerPhase, PaymentGate};
pub use ledger::{InMemoryLedger, Ledger, LedgerBackend, LedgerError, Reservation};
pub use money::{MoneyAmount, MoneyAmountParseError};
pub use policy::{PricePolicyTable, SettlementPolicy, ToolPricePolicy};
