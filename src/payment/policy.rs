//! Tool pricing
//!
//! The price table is built once at startup and shared read-only behind an
//! `Arc`, so lookups on the request path take no lock.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::MoneyAmount;

/// Price of a single tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPricePolicy {
    /// Amount authorized before the tool runs
    pub base_cost: MoneyAmount,

    /// Final charge is confirmed after execution with the measured cost
    #[serde(default)]
    pub require_evaluation: bool,
}

impl ToolPricePolicy {
    pub fn fixed(base_cost: MoneyAmount) -> Self {
        Self {
            base_cost,
            require_evaluation: false,
        }
    }

    pub fn evaluated(base_cost: MoneyAmount) -> Self {
        Self {
            base_cost,
            require_evaluation: true,
        }
    }
}

/// What to charge when an evaluated tool fails after authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum SettlementPolicy {
    /// Release the whole hold
    #[default]
    Refund,
    /// Keep the full base cost
    ChargeBase,
    /// Keep a fixed fee, capped at the base cost
    Charge {
        amount: MoneyAmount,
    },
}

impl SettlementPolicy {
    /// Amount to settle for a failed run of a tool priced at `base_cost`
    pub fn failure_charge(&self, base_cost: MoneyAmount) -> MoneyAmount {
        match self {
            SettlementPolicy::Refund => MoneyAmount::ZERO,
            SettlementPolicy::ChargeBase => base_cost,
            SettlementPolicy::Charge { amount } => (*amount).min(base_cost),
        }
    }
}

/// Read-only map from tool name to price, in configuration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PricePolicyTable(IndexMap<String, ToolPricePolicy>);

impl PricePolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: impl Into<String>, policy: ToolPricePolicy) -> Self {
        self.0.insert(tool.into(), policy);
        self
    }

    pub fn get(&self, tool: &str) -> Option<&ToolPricePolicy> {
        self.0.get(tool)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ToolPricePolicy)> {
        self.0.iter().map(|(name, policy)| (name.as_str(), policy))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, ToolPricePolicy)> for PricePolicyTable {
    fn from_iter<I: IntoIterator<Item = (String, ToolPricePolicy)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
