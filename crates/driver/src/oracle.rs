//! The driver's oracle implementation.
//!
//! A borrowed view over the message store, the committee and the chain
//! collaborators, constructed per algorithm call. The driver owns all the
//! referenced state; the view holds no state of its own beyond the shared
//! caches.

use accord_consensus::{Oracle, OracleError};
use accord_core::{BlockVerdict, BlockVerifier, ChainContext, ValueSource};
use accord_store::MessageStore;
use accord_types::{Committee, ConsensusMessage, NodeId, ValueId, VotePower};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};

pub(crate) struct OracleView<'a> {
    pub height: u64,
    pub committee: &'a Committee,
    pub store: &'a MessageStore,
    pub chain: &'a dyn ChainContext,
    pub verifier: &'a dyn BlockVerifier,
    pub value_source: &'a dyn ValueSource,
    /// Verification verdicts per value, shared with the inbound pipeline
    /// so each block is verified once per height.
    pub verdicts: &'a RefCell<HashMap<ValueId, BlockVerdict>>,
    /// Payloads of values this node assembled, kept for proposal
    /// broadcast.
    pub assembled: &'a RefCell<HashMap<ValueId, Vec<u8>>>,
}

impl OracleView<'_> {
    /// Voting power of stored votes at (height, round) of one step,
    /// optionally filtered by value. The store holds at most one message
    /// per (round, step, sender), so no sender is counted twice.
    fn vote_power(
        &self,
        round: i64,
        value: Option<&ValueId>,
        precommit: bool,
    ) -> VotePower {
        let votes = self.store.get(self.height, |m| {
            let step_matches = if precommit {
                m.is_precommit()
            } else {
                m.is_prevote()
            };
            step_matches && m.round == round && value.map_or(true, |v| m.value == *v)
        });
        votes
            .iter()
            .filter_map(|m| self.committee.power_of(&m.sender))
            .sum()
    }

    /// Find the block payload for a value: something we assembled
    /// ourselves, or the payload of a stored proposal carrying it.
    fn block_for(&self, value: &ValueId) -> Option<Vec<u8>> {
        if let Some(block) = self.assembled.borrow().get(value) {
            return Some(block.clone());
        }
        self.store
            .get(self.height, |m| m.is_proposal() && m.value == *value)
            .into_iter()
            .find_map(|m| m.block().map(<[u8]>::to_vec))
    }
}

impl Oracle for OracleView<'_> {
    fn valid(&self, value: &ValueId) -> Result<bool, OracleError> {
        if value.is_nil() {
            return Ok(false);
        }
        if let Some(verdict) = self.verdicts.borrow().get(value) {
            return match verdict {
                BlockVerdict::Valid => Ok(true),
                BlockVerdict::Invalid => Ok(false),
                BlockVerdict::Future => Err(OracleError::FutureValue),
                BlockVerdict::Transient => Err(OracleError::Transient(
                    "verifier unavailable".into(),
                )),
            };
        }

        let Some(block) = self.block_for(value) else {
            // The proposal carrying this value has not arrived yet.
            return Err(OracleError::Transient("no payload for value".into()));
        };
        let verdict = self.verifier.verify(self.height, &block);
        match verdict {
            // Only settled verdicts are cached; the rest stay retryable.
            BlockVerdict::Valid => {
                self.verdicts.borrow_mut().insert(*value, verdict);
                Ok(true)
            }
            BlockVerdict::Invalid => {
                self.verdicts.borrow_mut().insert(*value, verdict);
                Ok(false)
            }
            BlockVerdict::Future => Err(OracleError::FutureValue),
            BlockVerdict::Transient => {
                Err(OracleError::Transient("verifier unavailable".into()))
            }
        }
    }

    fn matching_proposal(&self, msg: &ConsensusMessage) -> Option<ConsensusMessage> {
        if msg.is_proposal() {
            return Some(msg.clone());
        }
        self.store
            .get(msg.height, |m| {
                m.is_proposal() && m.round == msg.round && m.value == msg.value
            })
            .into_iter()
            .next()
    }

    fn prevote_qthresh(&self, round: i64, value: Option<&ValueId>) -> bool {
        self.vote_power(round, value, false) >= self.committee.quorum_threshold()
    }

    fn precommit_qthresh(&self, round: i64, value: Option<&ValueId>) -> bool {
        self.vote_power(round, value, true) >= self.committee.quorum_threshold()
    }

    fn fthresh(&self, round: i64) -> bool {
        // Any message type counts here, but each sender only once.
        let senders: BTreeSet<NodeId> = self
            .store
            .get(self.height, |m| m.round == round)
            .into_iter()
            .map(|m| m.sender)
            .collect();
        let power: VotePower = senders
            .iter()
            .filter_map(|s| self.committee.power_of(s))
            .sum();
        power >= self.committee.fault_threshold()
    }

    fn is_proposer(&self, round: i64, node: &NodeId) -> bool {
        self.chain.proposer(self.height, round) == Some(*node)
    }

    fn height(&self) -> u64 {
        self.height
    }

    fn value(&self) -> Result<ValueId, OracleError> {
        let (value, block) = self
            .value_source
            .assemble(self.height)
            .map_err(|e| OracleError::NoValue(e.to_string()))?;
        self.assembled.borrow_mut().insert(value, block);
        Ok(value)
    }
}
