//! Simulated exchange for backtests and paper trading
//!
//! The [`PaperWallet`] keeps free and locked balances per asset, matches
//! resting orders against incoming candles and tracks mark-to-market equity.
//!
//! Accounting invariants:
//! - `free + lock` of an asset only changes on fills
//! - `lock` never goes negative
//! - OCO legs share one reservation; the first fill cancels the sibling

#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod drawdown;
mod ledger;
pub mod summary;
pub mod wallet;

pub use config::WalletConfig;
pub use drawdown::{AssetValue, Drawdown, max_drawdown};
pub use summary::{Holding, WalletSummary};
pub use wallet::PaperWallet;
