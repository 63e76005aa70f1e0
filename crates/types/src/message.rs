//! Consensus message representation.

use crate::{NodeId, Signature, Step, ValueId};
use std::fmt;

/// Step-specific payload of a consensus message.
///
/// Proposals carry the round the proposer last saw the value reach prevote
/// quorum (`valid_round`, −1 when fresh) plus the full block bytes. Votes
/// carry nothing beyond the value hash in the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Propose {
        /// −1 for a freshly assembled value; otherwise the round at which
        /// the proposer observed a prevote quorum for this value.
        valid_round: i64,
        /// The full block payload whose content hash is the envelope value.
        block: Vec<u8>,
    },
    Prevote,
    Precommit,
}

/// A single consensus message: proposal, prevote or precommit.
///
/// The `signature` covers the hash of every wire field preceding it; the
/// algorithm builds messages with [`Signature::zero`] and the driver signs
/// them before broadcast.
#[derive(Clone, PartialEq, Eq)]
pub struct ConsensusMessage {
    pub height: u64,
    pub round: i64,
    pub value: ValueId,
    pub sender: NodeId,
    pub signature: Signature,
    pub body: MessageBody,
}

impl ConsensusMessage {
    /// Build an unsigned proposal.
    pub fn proposal(
        height: u64,
        round: i64,
        value: ValueId,
        valid_round: i64,
        block: Vec<u8>,
        sender: NodeId,
    ) -> Self {
        Self {
            height,
            round,
            value,
            sender,
            signature: Signature::zero(),
            body: MessageBody::Propose { valid_round, block },
        }
    }

    /// Build an unsigned prevote.
    pub fn prevote(height: u64, round: i64, value: ValueId, sender: NodeId) -> Self {
        Self {
            height,
            round,
            value,
            sender,
            signature: Signature::zero(),
            body: MessageBody::Prevote,
        }
    }

    /// Build an unsigned precommit.
    pub fn precommit(height: u64, round: i64, value: ValueId, sender: NodeId) -> Self {
        Self {
            height,
            round,
            value,
            sender,
            signature: Signature::zero(),
            body: MessageBody::Precommit,
        }
    }

    /// The step this message belongs to.
    pub fn step(&self) -> Step {
        match self.body {
            MessageBody::Propose { .. } => Step::Propose,
            MessageBody::Prevote => Step::Prevote,
            MessageBody::Precommit => Step::Precommit,
        }
    }

    /// Valid round, present only on proposals.
    pub fn valid_round(&self) -> Option<i64> {
        match self.body {
            MessageBody::Propose { valid_round, .. } => Some(valid_round),
            _ => None,
        }
    }

    /// Block payload, present only on proposals.
    pub fn block(&self) -> Option<&[u8]> {
        match &self.body {
            MessageBody::Propose { block, .. } => Some(block),
            _ => None,
        }
    }

    pub fn is_proposal(&self) -> bool {
        matches!(self.body, MessageBody::Propose { .. })
    }

    pub fn is_prevote(&self) -> bool {
        matches!(self.body, MessageBody::Prevote)
    }

    pub fn is_precommit(&self) -> bool {
        matches!(self.body, MessageBody::Precommit)
    }

    /// True for prevotes and precommits; these are the only messages whose
    /// voting power counts toward thresholds.
    pub fn is_vote(&self) -> bool {
        !self.is_proposal()
    }
}

impl fmt::Display for ConsensusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "s:{:<3} h:{:<3} r:{:<3} v:{:<6}",
            self.step().short_str(),
            self.height,
            self.round,
            self.value,
        )
    }
}

impl fmt::Debug for ConsensusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsensusMessage")
            .field("step", &self.step())
            .field("height", &self.height)
            .field("round", &self.round)
            .field("value", &self.value)
            .field("valid_round", &self.valid_round())
            .field("sender", &self.sender)
            .finish()
    }
}
