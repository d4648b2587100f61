//! agtchat-daemon: reconciliation between agent transcripts, the chat
//! service, and terminal panes.
//! Notifications flow out through the notifier; clicks, replies and thread
//! messages flow back in through the responder and the pane injector. Task
//! threads are created through a crash-safe marker protocol and recovered
//! from the registry, markers, and the update stream.

pub mod commands;
pub mod context;
pub mod daemon;
pub mod error;
pub mod format;
pub mod git;
pub mod injector;
pub mod marker;
pub mod notifier;
pub mod registry;
pub mod responder;
pub mod store;
pub mod tasks;
pub mod topics;

#[cfg(test)]
mod testing;

pub use context::{DaemonContext, DaemonSettings};
pub use daemon::{Daemon, DaemonEvent};
pub use error::{InjectError, StoreError, TaskError};
pub use injector::{Injection, Injector};
pub use registry::Registry;
pub use store::{DaemonState, StateStore};
pub use tasks::TaskManager;
pub use topics::TopicProtocol;
