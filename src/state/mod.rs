//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `Phase` / `PhaseState`: the ordered pipeline stages and their state machine
//! - `WorkItem`: one unit of fetch work inside a phase
//! - `FetchResult`: the tagged, immutable result reported for a work item

mod phase_state;
mod work_item;

// Re-export main types
pub use phase_state::{Phase, PhaseState, SkipReason};
pub use work_item::{ErrorCategory, FetchFailure, FetchResult, Outcome, WorkItem};
