//! Oracle trait: the algorithm's window on the outside world.

use accord_types::{ConsensusMessage, NodeId, ValueId};

/// Failures the oracle can surface into the algorithm.
///
/// Only these cross the algorithm boundary; a value that is simply
/// *invalid* is reported as `Ok(false)` from [`Oracle::valid`] so the
/// rules can prevote nil against it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    /// The value's block refers to chain state this node does not have
    /// yet. The driver buffers the triggering message and retries after
    /// the head advances.
    #[error("value is ahead of local chain state")]
    FutureValue,
    /// The verifier failed temporarily.
    #[error("transient verification failure: {0}")]
    Transient(String),
    /// No proposable value could be assembled.
    #[error("no proposable value: {0}")]
    NoValue(String),
}

/// Answers the questions the algorithm asks about its state: "am I the
/// proposer", "has this round reached prevote quorum for v", and so on.
///
/// All threshold queries are computed over voting power, never message
/// counts. `value = None` means "any value"; `Some(&ValueId::NIL)` means
/// the nil vote specifically.
pub trait Oracle {
    /// Whether the block referenced by `value` is well-formed relative to
    /// the parent state.
    fn valid(&self, value: &ValueId) -> Result<bool, OracleError>;

    /// The proposal matching a message: for votes, the stored proposal at
    /// (msg.height, msg.round) with the same value; for proposals, the
    /// message itself.
    fn matching_proposal(&self, msg: &ConsensusMessage) -> Option<ConsensusMessage>;

    /// Prevote power at `round` for `value` reaches quorum.
    fn prevote_qthresh(&self, round: i64, value: Option<&ValueId>) -> bool;

    /// Precommit power at `round` for `value` reaches quorum.
    fn precommit_qthresh(&self, round: i64, value: Option<&ValueId>) -> bool;

    /// Power of messages at `round` (any type) reaches the failure
    /// threshold — evidence that correct validators have moved on.
    fn fthresh(&self, round: i64) -> bool;

    /// Whether `node` is the designated proposer for `round` at the
    /// current height.
    fn is_proposer(&self, round: i64, node: &NodeId) -> bool;

    /// The height currently being decided.
    fn height(&self) -> u64;

    /// A freshly assembled proposable value. Only called when this node
    /// proposes and holds no valid value.
    fn value(&self) -> Result<ValueId, OracleError>;
}
