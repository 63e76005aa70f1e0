//! Misbehavior rules and typed evidence.

use crate::ConsensusMessage;
use std::fmt;

/// Accountability rule identifiers.
///
/// The numeric values are part of the on-chain interface and must not be
/// reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Rule {
    /// New proposal contradicted by the proposer's own earlier precommit.
    PN = 1,
    /// Old proposal contradicted by the proposer's precommit history, or
    /// lacking the prevote quorum that would justify its valid round.
    PO = 2,
    /// Prevote for a new value contradicted by an earlier precommit, or
    /// lacking a matching proposal.
    PVN = 3,
    /// Prevote for an old value not justified by the prevoter's precommit
    /// history or a quorum at the proposal's valid round.
    PVO = 4,
    /// Precommit without a matching proposal, or against a prevote quorum
    /// for a different value.
    C = 5,
    /// Precommit without a visible prevote quorum for its value.
    C1 = 6,
    /// Message signed by a committee member that cannot be decoded.
    GarbageMessage = 7,
    /// Proposed value rejected by block verification.
    InvalidProposal = 8,
    /// Proposal sent by a node that is not the designated proposer.
    InvalidProposer = 9,
    /// Two distinct messages for the same (height, round, step, sender).
    Equivocation = 10,
}

impl Rule {
    /// Decode from the on-chain tag.
    pub fn from_u8(tag: u8) -> Option<Rule> {
        match tag {
            1 => Some(Rule::PN),
            2 => Some(Rule::PO),
            3 => Some(Rule::PVN),
            4 => Some(Rule::PVO),
            5 => Some(Rule::C),
            6 => Some(Rule::C1),
            7 => Some(Rule::GarbageMessage),
            8 => Some(Rule::InvalidProposal),
            9 => Some(Rule::InvalidProposer),
            10 => Some(Rule::Equivocation),
            _ => None,
        }
    }

    /// Rules whose accusations the accused can answer with an innocence
    /// proof from their own message store.
    pub fn is_defensible(&self) -> bool {
        matches!(self, Rule::PO | Rule::PVN | Rule::C | Rule::C1)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Typed evidence: the suspicious message plus the messages that prove (or,
/// for accusations, would be needed to disprove) the fault.
///
/// For accusations `evidence` is empty: the burden of producing the missing
/// messages is on the accused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proof {
    pub rule: Rule,
    pub message: ConsensusMessage,
    pub evidence: Vec<ConsensusMessage>,
}

impl Proof {
    /// A proof complete in itself.
    pub fn misbehavior(
        rule: Rule,
        message: ConsensusMessage,
        evidence: Vec<ConsensusMessage>,
    ) -> Self {
        Self {
            rule,
            message,
            evidence,
        }
    }

    /// An evidence-incomplete claim awaiting an innocence proof.
    pub fn accusation(rule: Rule, message: ConsensusMessage) -> Self {
        Self {
            rule,
            message,
            evidence: Vec::new(),
        }
    }
}
