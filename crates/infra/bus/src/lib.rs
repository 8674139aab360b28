//! Ordered event delivery for the execution engine
//!
//! Independent feeds produce candles at their own pace; the
//! [`EventSequencer`] releases them in one total order so that replays are
//! reproducible regardless of production speed.

#![deny(clippy::all)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]

pub mod sequencer;

pub use sequencer::{EventSequencer, Sequenced, SequencerReceiver};
