//! BFT consensus state machine.
//!
//! This crate provides the round-based consensus algorithm as a
//! synchronous, event-driven state machine. The algorithm performs no I/O:
//! every question about the outside world goes through the [`Oracle`]
//! trait, and every effect — a message to broadcast, a timeout to
//! schedule, a round change, a decision — is returned as a value for the
//! driver to execute.
//!
//! # Protocol
//!
//! One value is decided per height. Within a height, rounds proceed
//! through Propose → Prevote → Precommit; a quorum (voting power strictly
//! greater than ⅔ of the committee) of precommits for a value decides it.
//! Safety across rounds rests on the locked value/round and valid
//! value/round bookkeeping carried in [`Algorithm`].

mod algorithm;
mod oracle;

pub use algorithm::{Algorithm, Outcome, StartOutcome};
pub use oracle::{Oracle, OracleError};
