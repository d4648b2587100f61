//! agtchat-core: pure domain types and decisions for the chat bridge.
//! Notification records and their lifecycle rules, transcript events,
//! task markers, and the per-pane tool-call batch queue. No IO.

pub mod lifecycle;
pub mod queue;
pub mod types;

pub use lifecycle::{ButtonAction, DEFAULT_RESOLUTION_WINDOW};
pub use queue::{BatchDenyPolicy, BatchQueue, BatchQueues};
pub use types::*;
