//! Engine configuration

use crate::error::{EngineError, EngineResult};
use feeds::FeedRouterConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// How candles reach the engine and where orders go
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Historical replay through the event sequencer
    #[default]
    Backtest,
    /// Live data, simulated execution
    Paper,
    /// Live data, real execution
    Live,
}

impl ExecutionMode {
    /// Replaying history rather than consuming live streams
    #[must_use]
    pub const fn is_backtest(self) -> bool {
        matches!(self, Self::Backtest)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Backtest => "backtest",
            Self::Paper => "paper",
            Self::Live => "live",
        };
        f.write_str(name)
    }
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pairs to trade
    pub pairs: Vec<String>,
    /// Execution mode
    pub mode: ExecutionMode,
    /// Pause between backtest drain iterations; zero disables it
    pub drain_pause_ms: u64,
    /// Period of the live order status refresh
    pub order_refresh_ms: u64,
    /// Feed router settings
    pub feed: FeedRouterConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pairs: Vec::new(),
            mode: ExecutionMode::Backtest,
            drain_pause_ms: 0,
            order_refresh_ms: 10_000,
            feed: FeedRouterConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Configuration for a set of pairs
    pub fn new<I, S>(pairs: I, mode: ExecutionMode) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            pairs: pairs.into_iter().map(Into::into).collect(),
            mode,
            ..Self::default()
        }
    }

    /// Load and validate a JSON configuration file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot run
    ///
    /// # Errors
    /// Returns [`EngineError::Config`] for an empty, blank or duplicated pair list.
    pub fn validate(&self) -> EngineResult<()> {
        if self.pairs.is_empty() {
            return Err(EngineError::Config {
                message: "at least one pair is required".to_string(),
            });
        }
        for (index, pair) in self.pairs.iter().enumerate() {
            if pair.trim().is_empty() {
                return Err(EngineError::Config {
                    message: format!("pair #{index} is blank"),
                });
            }
            if self.pairs[..index].contains(pair) {
                return Err(EngineError::Config {
                    message: format!("pair {pair} is listed twice"),
                });
            }
        }
        Ok(())
    }

    /// Pause between backtest drain iterations
    #[must_use]
    pub const fn drain_pause(&self) -> Duration {
        Duration::from_millis(self.drain_pause_ms)
    }

    /// Period of the live order status refresh
    #[must_use]
    pub const fn order_refresh(&self) -> Duration {
        Duration::from_millis(self.order_refresh_ms)
    }
}
