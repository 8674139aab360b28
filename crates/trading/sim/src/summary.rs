//! End-of-run wallet report

use crate::drawdown::Drawdown;
use serde::Serialize;
use std::fmt;

/// Final quantity and value of one asset
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Holding {
    /// Asset symbol
    pub asset: String,
    /// Free plus locked quantity; negative when short
    pub quantity: f64,
    /// Value in the base coin at the last close
    pub value: f64,
}

/// Wallet performance snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletSummary {
    /// Valuation currency
    pub base_coin: String,
    /// Non-base holdings per traded pair
    pub holdings: Vec<Holding>,
    /// Free plus locked base coin
    pub base_balance: f64,
    /// Equity at the first closed candle
    pub initial_value: f64,
    /// Holdings value plus base balance
    pub final_value: f64,
    /// `final_value - initial_value`
    pub profit: f64,
    /// Average buy-and-hold change across pairs, as a fraction
    pub market_change: f64,
    /// Worst equity decline, if any
    pub drawdown: Option<Drawdown>,
    /// Traded notional across pairs
    pub volume: f64,
}

impl WalletSummary {
    /// Profit as a fraction of the initial value
    #[must_use]
    pub fn return_pct(&self) -> f64 {
        if self.initial_value == 0.0 {
            0.0
        } else {
            self.profit / self.initial_value
        }
    }
}

impl fmt::Display for WalletSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-- FINAL WALLET --")?;
        for holding in &self.holdings {
            writeln!(
                f,
                "{:.4} {} = {:.2} {}",
                holding.quantity, holding.asset, holding.value, self.base_coin
            )?;
        }
        writeln!(f, "{:.2} {}", self.base_balance, self.base_coin)?;
        writeln!(f, "----- RETURNS -----")?;
        writeln!(
            f,
            "START PORTFOLIO = {:.2} {}",
            self.initial_value, self.base_coin
        )?;
        writeln!(
            f,
            "FINAL PORTFOLIO = {:.2} {}",
            self.final_value, self.base_coin
        )?;
        writeln!(
            f,
            "GROSS PROFIT    = {:.2} {} ({:.2}%)",
            self.profit,
            self.base_coin,
            self.return_pct() * 100.0
        )?;
        writeln!(f, "MARKET CHANGE (B&H) = {:.2}%", self.market_change * 100.0)?;
        writeln!(f, "------ RISK -------")?;
        match &self.drawdown {
            Some(drawdown) => writeln!(
                f,
                "MAX DRAWDOWN = {:.2}% ({} -> {})",
                drawdown.value * 100.0,
                drawdown.start.format("%Y-%m-%d %H:%M"),
                drawdown.end.format("%Y-%m-%d %H:%M"),
            )?,
            None => writeln!(f, "MAX DRAWDOWN = 0.00%")?,
        }
        writeln!(f, "------ VOLUME -----")?;
        write!(f, "{:.2} {}", self.volume, self.base_coin)
    }
}
