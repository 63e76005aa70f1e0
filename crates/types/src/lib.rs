//! Core types for accord consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Identifiers**: [`ValueId`], [`NodeId`], [`Signature`]
//! - **Protocol**: [`Step`], [`ConsensusMessage`], [`MessageBody`]
//! - **Committee**: [`Committee`], [`CommitteeMember`], [`VotePower`] and the
//!   quorum / fault threshold arithmetic
//! - **Accountability**: [`Rule`], [`Proof`]
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod committee;
mod evidence;
mod ids;
mod message;
mod step;

pub use committee::{Committee, CommitteeError, CommitteeMember, VotePower};
pub use evidence::{Proof, Rule};
pub use ids::{NodeId, Signature, ValueId};
pub use message::{ConsensusMessage, MessageBody};
pub use step::Step;

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Create a test NodeId from a seed byte.
    pub fn test_node(seed: u8) -> NodeId {
        NodeId([seed; 20])
    }

    /// Create a test ValueId from a seed byte. Seed 0 is `NIL`.
    pub fn test_value(seed: u8) -> ValueId {
        ValueId([seed; 32])
    }

    /// Create a committee of `n` members with equal voting power 1,
    /// addressed 1..=n.
    pub fn equal_committee(n: u8) -> Committee {
        let members = (1..=n)
            .map(|i| CommitteeMember::new(test_node(i), VotePower(1)))
            .collect();
        Committee::new(members).expect("non-empty committee")
    }
}
