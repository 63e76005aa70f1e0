//! Core event model for the accord driver.
//!
//! The driver is built on a simple event-driven model:
//!
//! ```text
//! Events → Driver → effects on chain / network / evidence sinks
//! ```
//!
//! - [`Event`]: everything that can wake the driver — inbound wire bytes,
//!   a fired timeout, a chain head advance, shutdown.
//! - [`Timeout`]: a scheduled wakeup for one step of one round.
//! - The collaborator traits ([`ChainContext`], [`BlockVerifier`],
//!   [`Signer`], [`Broadcaster`], [`EvidenceSink`], [`ValueSource`]): the
//!   oracles the core consumes. Everything outside the core — execution,
//!   cryptography, gossip, the accountability contract — sits behind them.

mod event;
mod traits;

pub use event::{Event, Timeout};
pub use traits::{
    BlockVerdict, BlockVerifier, Broadcaster, ChainContext, ChainError, EvidenceKind,
    EvidenceSink, Header, Signer, ValueSource, ValueSourceError,
};
