//! Innocence proofs.
//!
//! An accused node answers an accusation by querying its *own* message
//! store for the evidence the accuser could not see. If the evidence is
//! not there, the defense fails and slashing proceeds once the protocol's
//! innocence window closes.

use crate::rules::power_of_votes;
use accord_store::MessageStore;
use accord_types::{Committee, Proof, Rule};
use tracing::debug;

/// Why an innocence proof could not be produced.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InnocenceError {
    /// The local store lacks the evidence this accusation demands.
    #[error("cannot defend {0} accusation: required evidence not in store")]
    Undefendable(Rule),
    /// The rule has no innocence procedure; its violations are only ever
    /// raised as complete proofs.
    #[error("rule {0} is not answerable by an innocence proof")]
    NotDefensible(Rule),
}

/// Build the innocence proof answering `accusation` from the local store.
///
/// Evidence shapes per rule:
/// - **PO**: a prevote quorum for the proposal's value at its valid round.
/// - **PVN** / **C**: the proposal matching the accused vote.
/// - **C1**: a prevote quorum for the precommit's value at its round.
pub fn innocence_proof(
    store: &MessageStore,
    committee: &Committee,
    accusation: &Proof,
) -> Result<Proof, InnocenceError> {
    let msg = &accusation.message;
    let height = msg.height;

    let evidence = match accusation.rule {
        Rule::PO => {
            let valid_round = msg.valid_round().unwrap_or(-1);
            let prevotes = store.get(height, |m| {
                m.is_prevote() && m.round == valid_round && m.value == msg.value
            });
            if power_of_votes(committee, &prevotes) < committee.quorum_threshold() {
                return Err(InnocenceError::Undefendable(Rule::PO));
            }
            prevotes
        }
        Rule::PVN | Rule::C => {
            let proposals = store.get(height, |m| {
                m.is_proposal() && m.value == msg.value && m.round == msg.round
            });
            if proposals.is_empty() {
                return Err(InnocenceError::Undefendable(accusation.rule));
            }
            proposals
        }
        Rule::C1 => {
            let prevotes = store.get(height, |m| {
                m.is_prevote() && m.round == msg.round && m.value == msg.value
            });
            if power_of_votes(committee, &prevotes) < committee.quorum_threshold() {
                return Err(InnocenceError::Undefendable(Rule::C1));
            }
            prevotes
        }
        rule => return Err(InnocenceError::NotDefensible(rule)),
    };

    debug!(rule = %accusation.rule, sender = %msg.sender, "innocence proof assembled");
    Ok(Proof::misbehavior(
        accusation.rule,
        msg.clone(),
        evidence,
    ))
}
