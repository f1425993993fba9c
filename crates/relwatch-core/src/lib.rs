pub mod config;
pub mod controller;
pub mod error;
pub mod io;
pub mod poller;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod trigger;
pub mod types;
pub mod watch_state;

#[cfg(test)]
mod test_support;

pub use error::{Result, WatchError};
pub use scheduler::WatchScheduler;
pub use types::{Release, Target, TargetId, TargetPatch};
