//! Consensus module - difficulty retargeting, hard-fork schedule, checkpoints

mod checkpoints;
mod difficulty;
mod hardfork;

pub use checkpoints::*;
pub use difficulty::*;
pub use hardfork::*;
