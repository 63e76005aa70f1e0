//! The consensus state machine.
//!
//! A port of the round-based protocol in which every rule is an "upon"
//! condition over the set of received messages. Rule names below (Line 22,
//! Line 28, ...) refer to the protocol paper's pseudocode lines.

use crate::{Oracle, OracleError};
use accord_core::Timeout;
use accord_types::{ConsensusMessage, NodeId, Step, ValueId};
use tracing::debug;

/// Effect of starting a round: proposers broadcast, everyone else arms the
/// propose timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Broadcast(ConsensusMessage),
    Schedule(Timeout),
}

/// Effect of processing one message. At most one is produced per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Broadcast to the committee, including ourselves.
    Broadcast(ConsensusMessage),
    /// Schedule the timeout; its handler runs if the state has not moved
    /// past (height, round) by then.
    Schedule(Timeout),
    /// Start the given round of the current height.
    RoundChange { round: i64 },
    /// The enclosed proposal is decided. The driver commits it and starts
    /// round 0 of the next height.
    Decide(ConsensusMessage),
}

/// Per-height consensus state machine.
///
/// Owns the height state: current round and step, locked and valid
/// value/round pairs, and the three one-shot rule latches. A fresh
/// instance is created for every height.
#[derive(Debug)]
pub struct Algorithm {
    node_id: NodeId,
    round: i64,
    step: Step,
    locked_round: i64,
    locked_value: ValueId,
    valid_round: i64,
    valid_value: ValueId,
    line34_fired: bool,
    line36_fired: bool,
    line47_fired: bool,
}

impl Algorithm {
    /// Create the state machine for a new height.
    ///
    /// The round starts at −1 so the first `start_round` call (always with
    /// round 0) satisfies the strictly-increasing precondition.
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            round: -1,
            step: Step::Propose,
            locked_round: -1,
            locked_value: ValueId::NIL,
            valid_round: -1,
            valid_value: ValueId::NIL,
            line34_fired: false,
            line36_fired: false,
            line47_fired: false,
        }
    }

    pub fn round(&self) -> i64 {
        self.round
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn locked_round(&self) -> i64 {
        self.locked_round
    }

    pub fn locked_value(&self) -> ValueId {
        self.locked_value
    }

    pub fn valid_round(&self) -> i64 {
        self.valid_round
    }

    pub fn valid_value(&self) -> ValueId {
        self.valid_value
    }

    fn vote(&self, step: Step, value: ValueId, oracle: &dyn Oracle) -> ConsensusMessage {
        match step {
            Step::Prevote => {
                ConsensusMessage::prevote(oracle.height(), self.round, value, self.node_id)
            }
            Step::Precommit => {
                ConsensusMessage::precommit(oracle.height(), self.round, value, self.node_id)
            }
            Step::Propose => unreachable!("proposals are built in start_round"),
        }
    }

    fn timeout(&self, kind: Step, oracle: &dyn Oracle) -> Timeout {
        Timeout::new(kind, oracle.height(), self.round)
    }

    /// Start `round`, resetting the one-shot latches.
    ///
    /// If this node is the round's proposer, returns the proposal to
    /// broadcast — the valid value from an earlier round when one exists,
    /// otherwise a freshly assembled value. Non-proposers arm the propose
    /// timeout.
    ///
    /// # Panics
    ///
    /// Panics if `round` is not greater than the current round; rounds are
    /// strictly increasing within a height and a violation is a caller
    /// bug.
    pub fn start_round(
        &mut self,
        round: i64,
        oracle: &dyn Oracle,
    ) -> Result<StartOutcome, OracleError> {
        if round <= self.round {
            panic!(
                "start_round must move forward: current round {}, requested {}",
                self.round, round
            );
        }

        self.line34_fired = false;
        self.line36_fired = false;
        self.line47_fired = false;

        self.round = round;
        self.step = Step::Propose;

        if oracle.is_proposer(round, &self.node_id) {
            let value = if self.valid_value != ValueId::NIL {
                self.valid_value
            } else {
                oracle.value()?
            };
            debug!(height = oracle.height(), round, value = %value, "proposing");
            Ok(StartOutcome::Broadcast(ConsensusMessage::proposal(
                oracle.height(),
                round,
                value,
                self.valid_round,
                Vec::new(),
                self.node_id,
            )))
        } else {
            Ok(StartOutcome::Schedule(self.timeout(Step::Propose, oracle)))
        }
    }

    /// Process one consensus message at the current height.
    ///
    /// The upon-rules are checked in a fixed order and the first match
    /// returns. Rules whose outcome supersedes others — a value-carrying
    /// broadcast or a decision — come before rules that merely arm
    /// timeouts. This cuts redundant outbound traffic and is sound
    /// because every condition is monotone over the growing message set:
    /// nothing a later arrival satisfies can invalidate an earlier rule.
    ///
    /// Height and sender legitimacy are not re-checked here; the driver
    /// only delivers current-height messages from committee members, with
    /// proposals already confirmed to originate from the round's proposer.
    pub fn receive_message(
        &mut self,
        msg: &ConsensusMessage,
        oracle: &dyn Oracle,
    ) -> Result<Option<Outcome>, OracleError> {
        let r = self.round;
        let s = self.step;
        let t = msg.step();

        // For votes, the proposal at the same (height, round) carrying the
        // voted value; for proposals, the message itself.
        let p = oracle.matching_proposal(msg);

        // Line 22: fresh proposal for the current round while we are still
        // at the propose step.
        if t == Step::Propose && msg.round == r && msg.valid_round() == Some(-1) && s == Step::Propose
        {
            // valid() may fail with a buffer-and-retry error; query it
            // before touching any state so a retried message replays
            // cleanly.
            let vote_value = if oracle.valid(&msg.value)?
                && (self.locked_round == -1 || self.locked_value == msg.value)
            {
                msg.value
            } else {
                ValueId::NIL
            };
            self.step = Step::Prevote;
            debug!(round = r, value = %vote_value, "line 22 prevote");
            return Ok(Some(Outcome::Broadcast(self.vote(
                Step::Prevote,
                vote_value,
                oracle,
            ))));
        }

        // Line 28: re-proposal of a value that reached prevote quorum in an
        // earlier round.
        if let Some(p) = p.as_ref().filter(|_| t != Step::Precommit) {
            let vr = p.valid_round().unwrap_or(-1);
            if p.round == r
                && (0..r).contains(&vr)
                && oracle.prevote_qthresh(vr, Some(&p.value))
                && s == Step::Propose
            {
                let vote_value = if oracle.valid(&p.value)?
                    && (self.locked_round <= vr || self.locked_value == p.value)
                {
                    p.value
                } else {
                    ValueId::NIL
                };
                self.step = Step::Prevote;
                debug!(round = r, valid_round = vr, value = %vote_value, "line 28 prevote");
                return Ok(Some(Outcome::Broadcast(self.vote(
                    Step::Prevote,
                    vote_value,
                    oracle,
                ))));
            }
        }

        // Line 36: first prevote quorum for a valid value this round.
        if let Some(p) = p.as_ref().filter(|_| t != Step::Precommit) {
            if p.round == r
                && oracle.prevote_qthresh(r, Some(&p.value))
                && s >= Step::Prevote
                && !self.line36_fired
                && oracle.valid(&p.value)?
            {
                self.line36_fired = true;
                if s == Step::Prevote {
                    self.locked_value = p.value;
                    self.locked_round = r;
                    self.step = Step::Precommit;
                }
                self.valid_value = p.value;
                self.valid_round = r;
                debug!(round = r, value = %p.value, "line 36 precommit");
                return Ok(Some(Outcome::Broadcast(self.vote(
                    Step::Precommit,
                    p.value,
                    oracle,
                ))));
            }
        }

        // Line 44: prevote quorum for nil while we are deciding what to
        // precommit.
        if t == Step::Prevote
            && msg.round == r
            && oracle.prevote_qthresh(r, Some(&ValueId::NIL))
            && s == Step::Prevote
        {
            self.step = Step::Precommit;
            debug!(round = r, "line 44 precommit nil");
            return Ok(Some(Outcome::Broadcast(self.vote(
                Step::Precommit,
                ValueId::NIL,
                oracle,
            ))));
        }

        // Line 34: prevote quorum for anything — arm the prevote timeout.
        if t == Step::Prevote
            && msg.round == r
            && oracle.prevote_qthresh(r, None)
            && s == Step::Prevote
            && !self.line34_fired
        {
            self.line34_fired = true;
            debug!(round = r, "line 34 prevote timeout armed");
            return Ok(Some(Outcome::Schedule(self.timeout(Step::Prevote, oracle))));
        }

        // Line 49: precommit quorum for a proposal's value — decide. The
        // proposal may be from any round, not just the current one.
        if let Some(p) = p.as_ref().filter(|_| t != Step::Prevote) {
            if oracle.precommit_qthresh(p.round, Some(&p.value)) {
                if oracle.valid(&p.value)? {
                    self.locked_round = -1;
                    self.locked_value = ValueId::NIL;
                    self.valid_round = -1;
                    self.valid_value = ValueId::NIL;
                }
                debug!(round = p.round, value = %p.value, "line 49 decide");
                return Ok(Some(Outcome::Decide(p.clone())));
            }
        }

        // Line 47: precommit quorum for anything — arm the precommit
        // timeout.
        if t == Step::Precommit
            && msg.round == r
            && oracle.precommit_qthresh(r, None)
            && !self.line47_fired
        {
            self.line47_fired = true;
            debug!(round = r, "line 47 precommit timeout armed");
            return Ok(Some(Outcome::Schedule(
                self.timeout(Step::Precommit, oracle),
            )));
        }

        // Line 55: a failure threshold of power is already at a later
        // round — skip ahead. Messages from skipped rounds stay in the
        // store; line 28 may still need them. The store is only cleared on
        // height change.
        if msg.round > r && oracle.fthresh(msg.round) {
            debug!(from_round = r, to_round = msg.round, "line 55 round skip");
            return Ok(Some(Outcome::RoundChange { round: msg.round }));
        }

        Ok(None)
    }

    /// The propose timeout fired. Prevote nil if we are still waiting for
    /// a proposal at (height, round).
    pub fn on_timeout_propose(
        &mut self,
        height: u64,
        round: i64,
        oracle: &dyn Oracle,
    ) -> Option<ConsensusMessage> {
        if height == oracle.height() && round == self.round && self.step == Step::Propose {
            self.step = Step::Prevote;
            return Some(self.vote(Step::Prevote, ValueId::NIL, oracle));
        }
        None
    }

    /// The prevote timeout fired. Precommit nil if we are still at the
    /// prevote step of (height, round).
    pub fn on_timeout_prevote(
        &mut self,
        height: u64,
        round: i64,
        oracle: &dyn Oracle,
    ) -> Option<ConsensusMessage> {
        if height == oracle.height() && round == self.round && self.step == Step::Prevote {
            self.step = Step::Precommit;
            return Some(self.vote(Step::Precommit, ValueId::NIL, oracle));
        }
        None
    }

    /// The precommit timeout fired. Move to the next round if we are still
    /// at (height, round), whatever the step.
    pub fn on_timeout_precommit(&self, height: u64, round: i64, oracle: &dyn Oracle) -> Option<i64> {
        if height == oracle.height() && round == self.round {
            return Some(self.round + 1);
        }
        None
    }
}
