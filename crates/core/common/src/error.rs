//! Error taxonomy shared by brokers, feeds and candle metadata

use crate::order::OrderStatus;
use thiserror::Error;

/// Errors returned by a [`crate::Broker`]
#[derive(Error, Debug)]
pub enum BrokerError {
    /// Zero, negative or non-finite quantity
    #[error("Invalid quantity {quantity} for {pair}")]
    InvalidQuantity {
        /// Pair the order was placed on
        pair: String,
        /// Rejected quantity
        quantity: f64,
    },

    /// Zero, negative or non-finite limit or stop price
    #[error("Invalid price {price} for {pair}")]
    InvalidPrice {
        /// Pair the order was placed on
        pair: String,
        /// Rejected price
        price: f64,
    },

    /// Free balance (plus liquidatable position value) does not cover the order
    #[error("Insufficient funds for {pair}: requested quantity {quantity}")]
    InsufficientFunds {
        /// Pair the order was placed on
        pair: String,
        /// Requested quantity
        quantity: f64,
    },

    /// Unknown exchange order id
    #[error("Order not found: {order_id}")]
    OrderNotFound {
        /// Exchange-assigned order id
        order_id: i64,
    },

    /// Order exists but cannot transition as requested
    #[error("Order {order_id} cannot be {operation} in state {status}")]
    InvalidOrderState {
        /// Exchange-assigned order id
        order_id: i64,
        /// Attempted operation
        operation: &'static str,
        /// Current order status
        status: OrderStatus,
    },

    /// No price has been observed for the pair yet
    #[error("No market price known for {pair}")]
    MissingPrice {
        /// Pair without a price
        pair: String,
    },

    /// Pair cannot be split into asset and quote
    #[error("Unknown pair: {pair}")]
    UnknownPair {
        /// Offending pair
        pair: String,
    },

    /// Venue-side failure (live adapters)
    #[error("Exchange error: {0}")]
    Exchange(#[from] anyhow::Error),
}

/// Result alias for broker operations
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Errors returned by a [`crate::Feeder`]
#[derive(Error, Debug)]
pub enum FeedError {
    /// Upstream connection lost or refused
    #[error("Feed for {pair} disconnected: {reason}")]
    Disconnected {
        /// Affected pair
        pair: String,
        /// Human readable reason
        reason: String,
    },

    /// The source holds no data for the requested key
    #[error("No data for {pair} {timeframe}")]
    NotAvailable {
        /// Requested pair
        pair: String,
        /// Requested timeframe
        timeframe: String,
    },

    /// The source does not implement the operation
    #[error("Operation not supported: {operation}")]
    Unsupported {
        /// Operation name
        operation: &'static str,
    },

    /// Malformed input data
    #[error("Parse error: {message}")]
    Parse {
        /// Details
        message: String,
    },

    /// Opaque upstream failure
    #[error("Upstream error: {0}")]
    Upstream(#[from] anyhow::Error),
}

/// Result alias for feed operations
pub type FeedResult<T> = Result<T, FeedError>;

/// Errors raised when populating candle metadata
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetadataError {
    /// NaN or infinite value
    #[error("Non-finite value {value} for {name}")]
    NonFinite {
        /// Metric or extension name
        name: String,
        /// Rejected value
        value: f64,
    },

    /// Extension name collides with a known metric
    #[error("Extension name {name} is reserved for a known metric")]
    ReservedName {
        /// Offending name
        name: String,
    },

    /// Extension name is blank
    #[error("Extension name must not be empty")]
    EmptyName,

    /// Name does not match a known metric
    #[error("Unknown metric: {name}")]
    UnknownMetric {
        /// Offending name
        name: String,
    },
}
