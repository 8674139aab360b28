//! Orders as reported by a broker

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// Buy the asset with quote currency
    Buy,
    /// Sell the asset for quote currency
    Sell,
}

impl Side {
    /// The other side
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => f.write_str("BUY"),
            Self::Sell => f.write_str("SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Execute immediately at the market
    Market,
    /// Rest at a limit price
    Limit,
    /// Limit order that must rest (OCO limit leg)
    LimitMaker,
    /// Stop trigger, market execution
    StopLoss,
    /// Stop trigger with a limit price (OCO stop leg)
    StopLossLimit,
    /// Profit-taking trigger
    TakeProfit,
    /// Profit-taking trigger with a limit price
    TakeProfitLimit,
}

impl OrderType {
    /// Filled against the limit price
    #[must_use]
    pub const fn is_limit_like(self) -> bool {
        matches!(
            self,
            Self::Limit | Self::LimitMaker | Self::TakeProfit | Self::TakeProfitLimit
        )
    }

    /// Filled against the stop trigger
    #[must_use]
    pub const fn is_stop_like(self) -> bool {
        matches!(self, Self::StopLoss | Self::StopLossLimit)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Market => "MARKET",
            Self::Limit => "LIMIT",
            Self::LimitMaker => "LIMIT_MAKER",
            Self::StopLoss => "STOP_LOSS",
            Self::StopLossLimit => "STOP_LOSS_LIMIT",
            Self::TakeProfit => "TAKE_PROFIT",
            Self::TakeProfitLimit => "TAKE_PROFIT_LIMIT",
        };
        f.write_str(name)
    }
}

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Resting, waiting for its trigger
    New,
    /// Partially executed (live venues only)
    PartiallyFilled,
    /// Fully executed
    Filled,
    /// Canceled by the account or by an OCO sibling
    Canceled,
    /// Rejected by the venue (live venues only)
    Rejected,
}

impl OrderStatus {
    /// No further transitions possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "NEW",
            Self::PartiallyFilled => "PARTIALLY_FILLED",
            Self::Filled => "FILLED",
            Self::Canceled => "CANCELED",
            Self::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

/// Order record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Exchange-assigned id
    pub exchange_id: i64,
    /// Shared by the legs of an OCO pair
    pub group_id: Option<i64>,
    /// Trading pair
    pub pair: String,
    /// Buy or sell
    pub side: Side,
    /// Order type
    pub order_type: OrderType,
    /// Current status
    pub status: OrderStatus,
    /// Limit price; execution price once filled
    pub price: f64,
    /// Stop trigger price
    pub stop: Option<f64>,
    /// Order quantity in the base asset
    pub quantity: f64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Notional value at the order price
    #[must_use]
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} | ID: {}, Type: {}, {} x ${:.4} (~${:.2})",
            self.status,
            self.side,
            self.pair,
            self.created_at.format("%Y-%m-%d %H:%M"),
            self.exchange_id,
            self.order_type,
            self.quantity,
            self.price,
            self.notional(),
        )
    }
}
