//! The misbehavior rule engine.

use accord_store::MessageStore;
use accord_types::{Committee, ConsensusMessage, Proof, Rule, ValueId, VotePower};
use tracing::{debug, info};

/// Result of one rule-engine pass over a finalized height.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub proofs: Vec<Proof>,
    pub accusations: Vec<Proof>,
}

/// Sum voting power over vote messages.
///
/// Only prevotes and precommits carry power toward any threshold the
/// detector evaluates; proposals in the slice are skipped. Senders outside
/// the committee contribute nothing.
pub fn power_of_votes(committee: &Committee, msgs: &[ConsensusMessage]) -> VotePower {
    msgs.iter()
        .filter(|m| m.is_vote())
        .filter_map(|m| committee.power_of(&m.sender))
        .sum()
}

/// Whether a prevote justification exists: quorum power of prevotes for
/// `value` at `round`.
fn prevote_quorum_for(
    store: &MessageStore,
    committee: &Committee,
    height: u64,
    round: i64,
    value: &ValueId,
) -> bool {
    let prevotes = store.get(height, |m| {
        m.is_prevote() && m.round == round && m.value == *value
    });
    power_of_votes(committee, &prevotes) >= committee.quorum_threshold()
}

/// Run every accountability rule over the messages of `height`.
///
/// Called once per height, after its decision is applied, while the driver
/// is quiescent for that height.
pub fn run_rules(store: &MessageStore, height: u64, committee: &Committee) -> RuleOutcome {
    let mut out = RuleOutcome::default();

    new_proposal_rules(store, height, &mut out);
    old_proposal_rules(store, height, committee, &mut out);
    prevote_rules(store, height, committee, &mut out);
    precommit_rules(store, height, committee, &mut out);

    if !out.proofs.is_empty() || !out.accusations.is_empty() {
        info!(
            height,
            proofs = out.proofs.len(),
            accusations = out.accusations.len(),
            "rule engine found misbehavior"
        );
    }
    out
}

/// PN: a proposer introducing a *new* value (valid_round = −1) must never
/// have precommitted a non-nil value in an earlier round of this height —
/// a correct validator that precommitted would have set the valid round.
fn new_proposal_rules(store: &MessageStore, height: u64, out: &mut RuleOutcome) {
    let proposals = store.get(height, |m| {
        m.is_proposal() && m.valid_round() == Some(-1)
    });

    for proposal in proposals {
        let precommits = store.get(height, |m| {
            m.sender == proposal.sender
                && m.is_precommit()
                && m.round < proposal.round
                && !m.value.is_nil()
        });
        if !precommits.is_empty() {
            debug!(sender = %proposal.sender, round = proposal.round, "PN violation");
            out.proofs
                .push(Proof::misbehavior(Rule::PN, proposal, precommits));
        }
    }
}

/// PO: an *old* proposal (valid_round = vr ≥ 0) is checked three ways.
///
/// A precommit by the proposer at vr for a third value, or a non-nil
/// precommit strictly between vr and the proposal round, are proofs: the
/// proposer either was not locked on the proposed value at vr, or saw a
/// later quorum it should have named as the valid round. If the store
/// lacks a prevote quorum for the value at vr, the proposer is accused —
/// they may have seen prevotes we did not.
fn old_proposal_rules(
    store: &MessageStore,
    height: u64,
    committee: &Committee,
    out: &mut RuleOutcome,
) {
    let proposals = store.get(height, |m| {
        m.is_proposal() && m.valid_round().is_some_and(|vr| vr >= 0)
    });

    for proposal in proposals {
        let vr = proposal.valid_round().unwrap_or(-1);

        let conflicting_at_vr = store.get(height, |m| {
            m.is_precommit()
                && m.round == vr
                && m.sender == proposal.sender
                && !m.value.is_nil()
                && m.value != proposal.value
        });
        if !conflicting_at_vr.is_empty() {
            debug!(sender = %proposal.sender, valid_round = vr, "PO violation at valid round");
            out.proofs.push(Proof::misbehavior(
                Rule::PO,
                proposal.clone(),
                conflicting_at_vr,
            ));
        }

        let between = store.get(height, |m| {
            m.is_precommit()
                && m.round > vr
                && m.round < proposal.round
                && m.sender == proposal.sender
                && !m.value.is_nil()
        });
        if !between.is_empty() {
            debug!(sender = %proposal.sender, valid_round = vr, "PO violation between rounds");
            out.proofs
                .push(Proof::misbehavior(Rule::PO, proposal.clone(), between));
        }

        if !prevote_quorum_for(store, committee, height, vr, &proposal.value) {
            out.accusations.push(Proof::accusation(Rule::PO, proposal));
        }
    }
}

/// How one matching proposal bears on a non-nil prevote.
enum Justification {
    Justified,
    Violation(Vec<ConsensusMessage>),
    Accuse,
}

/// PVN / PVO: every non-nil prevote must trace back to a proposal, and to
/// a precommit history that permits voting for that value.
fn prevote_rules(
    store: &MessageStore,
    height: u64,
    committee: &Committee,
    out: &mut RuleOutcome,
) {
    let prevotes = store.get(height, |m| m.is_prevote() && !m.value.is_nil());

    for prevote in prevotes {
        let proposals = store.get(height, |m| {
            m.is_proposal() && m.value == prevote.value && m.round == prevote.round
        });

        if proposals.is_empty() {
            // Could be PVN or PVO; without the proposal we cannot tell, so
            // the accusation goes out under PVN.
            out.accusations
                .push(Proof::accusation(Rule::PVN, prevote.clone()));
            continue;
        }

        // A proposer may have equivocated the same value under different
        // valid rounds to different nodes. The prevoter cannot be blamed
        // for which copy they saw: the prevote stands if any matching
        // proposal justifies it.
        let mut violation: Option<(Rule, Vec<ConsensusMessage>)> = None;
        let mut justified = false;

        for proposal in &proposals {
            let (rule, verdict) = if proposal.valid_round() == Some(-1) {
                (Rule::PVN, justify_new_prevote(store, height, &prevote, proposal))
            } else {
                (
                    Rule::PVO,
                    justify_old_prevote(store, height, committee, &prevote, proposal),
                )
            };
            match verdict {
                Justification::Justified => {
                    justified = true;
                    break;
                }
                Justification::Violation(evidence) => {
                    violation.get_or_insert((rule, evidence));
                }
                Justification::Accuse => {}
            }
        }

        if justified {
            continue;
        }
        match violation {
            Some((rule, evidence)) => {
                debug!(sender = %prevote.sender, round = prevote.round, %rule, "prevote violation");
                out.proofs.push(Proof::misbehavior(rule, prevote, evidence));
            }
            None => {
                out.accusations.push(Proof::accusation(Rule::PVO, prevote));
            }
        }
    }
}

/// PVN: against a fresh proposal, any earlier non-nil precommit by the
/// prevoter for a different value convicts — they were locked elsewhere.
/// There is nothing to accuse here: the only message not sent by the
/// prevoter is the proposal, and the rule is only applied once we have it.
fn justify_new_prevote(
    store: &MessageStore,
    height: u64,
    prevote: &ConsensusMessage,
    proposal: &ConsensusMessage,
) -> Justification {
    let conflicting = store.get(height, |m| {
        m.is_precommit()
            && !m.value.is_nil()
            && m.value != prevote.value
            && m.sender == prevote.sender
            && m.round < prevote.round
    });
    if conflicting.is_empty() {
        Justification::Justified
    } else {
        let mut evidence = conflicting;
        evidence.push(proposal.clone());
        Justification::Violation(evidence)
    }
}

/// PVO: against an old proposal, the prevote is justified when the
/// prevoter's latest earlier non-nil precommit is for the same value, or
/// when a prevote quorum for the value at the proposal's valid round shows
/// everyone could have switched to it. A conflicting latest precommit with
/// no such quorum convicts; no precommits and no quorum only accuses.
fn justify_old_prevote(
    store: &MessageStore,
    height: u64,
    committee: &Committee,
    prevote: &ConsensusMessage,
    proposal: &ConsensusMessage,
) -> Justification {
    let vr = proposal.valid_round().unwrap_or(-1);
    let quorum_at_vr = prevote_quorum_for(store, committee, height, vr, &prevote.value);

    let precommits = store.get(height, |m| {
        m.is_precommit()
            && !m.value.is_nil()
            && m.sender == prevote.sender
            && m.round < prevote.round
    });
    let latest = precommits.iter().max_by_key(|m| m.round);

    match latest {
        None => {
            if quorum_at_vr {
                Justification::Justified
            } else {
                Justification::Accuse
            }
        }
        Some(pc) if pc.value == prevote.value => Justification::Justified,
        Some(pc) => {
            if quorum_at_vr {
                Justification::Justified
            } else {
                Justification::Violation(vec![pc.clone(), proposal.clone()])
            }
        }
    }
}

/// C / C1: every non-nil precommit needs a matching proposal (else accuse
/// under C), must not stand against a quorum of prevotes for other values
/// (proof under C), and needs a visible prevote quorum for its value (else
/// accuse under C1).
fn precommit_rules(
    store: &MessageStore,
    height: u64,
    committee: &Committee,
    out: &mut RuleOutcome,
) {
    let precommits = store.get(height, |m| m.is_precommit() && !m.value.is_nil());

    for precommit in precommits {
        let proposals = store.get(height, |m| {
            m.is_proposal() && m.value == precommit.value && m.round == precommit.round
        });
        if proposals.is_empty() {
            out.accusations
                .push(Proof::accusation(Rule::C, precommit.clone()));
            continue;
        }

        let prevotes_against = store.get(height, |m| {
            m.is_prevote() && m.round == precommit.round && m.value != precommit.value
        });
        if power_of_votes(committee, &prevotes_against) >= committee.quorum_threshold() {
            // Not enough power remains to ever have justified this
            // precommit.
            debug!(sender = %precommit.sender, round = precommit.round, "C violation");
            out.proofs.push(Proof::misbehavior(
                Rule::C,
                precommit.clone(),
                prevotes_against,
            ));
            continue;
        }

        if !prevote_quorum_for(store, committee, height, precommit.round, &precommit.value) {
            out.accusations.push(Proof::accusation(Rule::C1, precommit));
        }
    }
}
