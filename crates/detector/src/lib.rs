//! Accountable fault detection.
//!
//! After each height finalizes, the rule engine scans that height's
//! messages and reconstructs the conditions under which a correct
//! validator could — or could not — have sent each of them. The outcome
//! is two lists:
//!
//! - **proofs**: self-contained misbehavior evidence, sufficient to slash;
//! - **accusations**: claims the accused must answer with an innocence
//!   proof from their own message store within the protocol window.
//!
//! Rules read right to left: find the suspicious message on the right,
//! then look left through history for what must (or must not) exist.

mod innocence;
mod rules;

pub use innocence::{innocence_proof, InnocenceError};
pub use rules::{power_of_votes, run_rules, RuleOutcome};
