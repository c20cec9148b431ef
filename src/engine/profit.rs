//! Profit aggregation — per-item realized P&L from the trade list.
//!
//! Buys and sells of the same item are paired cheapest-buy against
//! dearest-sell. That pairing maximizes the reported profit per item; it
//! is a reporting policy and does not reflect the chronological order in
//! which positions were opened or closed.

use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use std::fmt;

use crate::types::{Action, Trade};

/// Round for display. Accumulation always stays at full precision.
pub fn display_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

// ---------------------------------------------------------------------------
// Item summary
// ---------------------------------------------------------------------------

/// Derived per-item statistics. Recomputed on every display, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSummary {
    pub name: String,
    pub bought_count: usize,
    pub sold_count: usize,
    /// Mean of all buy prices (not only the matched ones).
    pub avg_buy_price: Decimal,
    /// Mean of all sell prices (not only the matched ones).
    pub avg_sell_price: Decimal,
    pub realized_profit: Decimal,
    pub percent_profit_per_unit: Decimal,
}

impl fmt::Display for ItemSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<40} {:>6} {:>6} {:>10.2} {:>10.2} {:>10.2} {:>8.2}%",
            self.name,
            self.bought_count,
            self.sold_count,
            display_amount(self.avg_buy_price),
            display_amount(self.avg_sell_price),
            display_amount(self.realized_profit),
            display_amount(self.percent_profit_per_unit),
        )
    }
}

// ---------------------------------------------------------------------------
// Profit summary
// ---------------------------------------------------------------------------

/// Every item row plus totals across the whole trade list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProfitSummary {
    /// One row per item, in order of first appearance in the trade list.
    pub rows: Vec<ItemSummary>,
    /// Sum of every buy price, independent of pairing.
    pub total_spent: Decimal,
    /// Sum of every sell price, independent of pairing.
    pub total_earned: Decimal,
}

impl ProfitSummary {
    pub fn total_realized_profit(&self) -> Decimal {
        total(self.rows.iter().map(|r| r.realized_profit))
    }

    pub fn row(&self, name: &str) -> Option<&ItemSummary> {
        self.rows.iter().find(|r| r.name == name)
    }
}

impl fmt::Display for ProfitSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rows.is_empty() {
            return writeln!(f, "No trades.");
        }

        writeln!(
            f,
            "{:<40} {:>6} {:>6} {:>10} {:>10} {:>10} {:>9}",
            "Item", "Bought", "Sold", "Avg buy", "Avg sell", "Profit", "% / unit"
        )?;
        for row in &self.rows {
            writeln!(f, "{row}")?;
        }
        writeln!(
            f,
            "Total spent: {:.2} | Total earned: {:.2}",
            display_amount(self.total_spent),
            display_amount(self.total_earned),
        )
    }
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Prices {
    bought: Vec<Decimal>,
    sold: Vec<Decimal>,
}

/// Sum that pins at `Decimal::MAX`/`MIN` instead of overflowing.
fn total(values: impl IntoIterator<Item = Decimal>) -> Decimal {
    values.into_iter().fold(Decimal::ZERO, Decimal::saturating_add)
}

fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        Decimal::ZERO
    } else {
        total(values.iter().copied()) / Decimal::from(values.len())
    }
}

pub struct ProfitAggregator;

impl ProfitAggregator {
    /// Summarize a trade list into per-item rows and totals.
    pub fn summarize(trades: &[Trade]) -> ProfitSummary {
        let mut order: Vec<&str> = Vec::new();
        let mut by_item: HashMap<&str, Prices> = HashMap::new();
        let mut total_spent = Decimal::ZERO;
        let mut total_earned = Decimal::ZERO;

        for trade in trades {
            let prices = by_item.entry(trade.name.as_str()).or_insert_with(|| {
                order.push(trade.name.as_str());
                Prices::default()
            });
            match trade.action {
                Action::Bought => {
                    prices.bought.push(trade.price);
                    total_spent = total_spent.saturating_add(trade.price);
                }
                Action::Sold => {
                    prices.sold.push(trade.price);
                    total_earned = total_earned.saturating_add(trade.price);
                }
            }
        }

        let rows = order
            .into_iter()
            .filter_map(|name| by_item.remove(name).map(|prices| Self::summarize_item(name, prices)))
            .collect();

        ProfitSummary {
            rows,
            total_spent,
            total_earned,
        }
    }

    fn summarize_item(name: &str, mut prices: Prices) -> ItemSummary {
        prices.bought.sort();
        prices.sold.sort_by(|a, b| b.cmp(a));

        let realized_profit = total(
            prices
                .bought
                .iter()
                .zip(&prices.sold)
                .map(|(buy, sell)| sell.saturating_sub(*buy)),
        );

        let avg_buy_price = mean(&prices.bought);
        let avg_sell_price = mean(&prices.sold);

        let percent_profit_per_unit = if prices.bought.is_empty() || avg_buy_price.is_zero() {
            Decimal::ZERO
        } else {
            (realized_profit / Decimal::from(prices.bought.len()))
                .checked_div(avg_buy_price)
                .map(|ratio| ratio.saturating_mul(Decimal::ONE_HUNDRED))
                .unwrap_or(if realized_profit.is_sign_negative() {
                    Decimal::MIN
                } else {
                    Decimal::MAX
                })
        };

        ItemSummary {
            name: name.to_string(),
            bought_count: prices.bought.len(),
            sold_count: prices.sold.len(),
            avg_buy_price,
            avg_sell_price,
            realized_profit,
            percent_profit_per_unit,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
