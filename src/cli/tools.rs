use anyhow::Result;
use clap::Args;
use serde::Serialize;
use serde_json::Value;

use crate::config::GlobalConfig;
use crate::mcp::ToolRegistry;
use crate::payment::{MoneyAmount, PricePolicyTable};

#[derive(Args, Debug, Clone)]
pub struct ToolsArgs {
    /// Output as JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

/// A registered tool and what a call to it costs
#[derive(Debug, Serialize)]
pub struct ToolListing {
    pub name: String,
    pub description: String,
    /// `None` when the tool has no price and every call is refused
    pub base_cost: Option<MoneyAmount>,
    pub require_evaluation: bool,
    pub input_schema: Value,
}

pub fn listings(registry: &ToolRegistry, pricing: &PricePolicyTable) -> Vec<ToolListing> {
    registry
        .list()
        .into_iter()
        .map(|tool| {
            let price = pricing.get(&tool.name);
            ToolListing {
                base_cost: price.map(|p| p.base_cost),
                require_evaluation: price.is_some_and(|p| p.require_evaluation),
                name: tool.name,
                description: tool.description,
                input_schema: tool.input_schema,
            }
        })
        .collect()
}

fn render_table(listings: &[ToolListing]) -> String {
    let name_width = listings
        .iter()
        .map(|l| l.name.len())
        .chain(std::iter::once("TOOL".len()))
        .max()
        .unwrap_or_default();

    let mut out = format!("{:<name_width$}  {:<10}  {:<9}  DESCRIPTION\n", "TOOL", "PRICE", "SETTLED");
    for listing in listings {
        let price = listing
            .base_cost
            .map(|cost| cost.to_string())
            .unwrap_or_else(|| "unpriced".to_string());
        let settled = if listing.require_evaluation { "after run" } else { "upfront" };
        out.push_str(&format!(
            "{:<name_width$}  {:<10}  {:<9}  {}\n",
            listing.name, price, settled, listing.description
        ));
    }
    out
}

pub async fn run(args: ToolsArgs, config: &GlobalConfig) -> Result<()> {
    let registry = ToolRegistry::builtin()?;
    config.validate(&registry)?;

    let listings = listings(&registry, &config.pricing);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
    } else {
        print!("{}", render_table(&listings));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_pricing;
    use crate::payment::ToolPricePolicy;

    #[test]
    fn test_listings_join_prices() {
        let registry = ToolRegistry::builtin().unwrap();
        let pricing = PricePolicyTable::new().with("add", ToolPricePolicy::fixed(MoneyAmount::from_cents(5)));

        let listings = listings(&registry, &pricing);
        assert_eq!(listings.len(), 2);
        assert_eq!(listings[0].name, "add");
        assert_eq!(listings[0].base_cost, Some(MoneyAmount::from_cents(5)));
        assert!(!listings[0].require_evaluation);
        assert_eq!(listings[1].name, "subtract");
        assert_eq!(listings[1].base_cost, None);
    }

    #[test]
    fn test_table() {
        let registry = ToolRegistry::builtin().unwrap();
        let table = render_table(&listings(&registry, &default_pricing()));
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("TOOL"));
        assert!(lines[1].starts_with("add "));
        assert!(lines[1].contains("0.10"));
        assert!(lines[1].contains("after run"));
        assert!(lines[2].ends_with("Subtract two integers"));
    }
}
