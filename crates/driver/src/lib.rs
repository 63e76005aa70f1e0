//! The consensus driver.
//!
//! Single-owner mediator between the environment and the consensus
//! algorithm. The driver owns the message store, the per-height state
//! machine and the fault detector, and runs one event loop over a single
//! queue merging network messages, fired timeouts, chain head advances and
//! shutdown.
//!
//! All state machine transitions and store mutations happen on this one
//! task; the transport and timers talk to it through the bounded event
//! channel.

mod config;
mod driver;
mod oracle;
mod timers;

pub use config::{DriverConfig, TimeoutConfig};
pub use driver::{Driver, DriverBuilder, DriverError};
pub use timers::TimerManager;
