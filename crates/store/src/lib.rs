//! Message store for the consensus core.
//!
//! Every consensus message the node observes is indexed by
//! height → round → step → sender, keeping the *first* message seen per
//! key. A second, semantically different message for an occupied key is
//! equivocation and is handed back to the caller as evidence.
//!
//! The store is owned by the driver; the oracle and the fault detector read
//! it through shared references under the driver's serialization
//! discipline.

use accord_types::{ConsensusMessage, NodeId, Step};
use accord_wire::canonical_hash;
use std::collections::BTreeMap;
use tracing::debug;

/// An equivocation detected on insert: the stored first message and the
/// rejected second one with the same (height, round, step, sender) key but
/// different canonical content.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("equivocation by {} at height {} round {} step {}", .second.sender, .second.height, .second.round, .second.step())]
pub struct Equivocation {
    pub first: ConsensusMessage,
    pub second: ConsensusMessage,
}

type SenderMap = BTreeMap<NodeId, ConsensusMessage>;
type StepMap = BTreeMap<Step, SenderMap>;
type RoundMap = BTreeMap<i64, StepMap>;

/// Four-level index of observed messages.
///
/// BTree maps keep scans in the stable (round asc, step asc, sender asc)
/// order the fault detector and oracle rely on.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: BTreeMap<u64, RoundMap>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message, keeping the first one per key.
    ///
    /// Re-saving a message with identical canonical content is an
    /// idempotent no-op. A different message under an occupied key returns
    /// the stored first message as equivocation evidence; the store is
    /// unchanged.
    pub fn save(&mut self, msg: ConsensusMessage) -> Result<(), Box<Equivocation>> {
        let slot = self
            .messages
            .entry(msg.height)
            .or_default()
            .entry(msg.round)
            .or_default()
            .entry(msg.step())
            .or_default()
            .entry(msg.sender);

        match slot {
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(msg);
                Ok(())
            }
            std::collections::btree_map::Entry::Occupied(entry) => {
                let first = entry.get();
                if canonical_hash(first) == canonical_hash(&msg) {
                    return Ok(());
                }
                debug!(
                    sender = %msg.sender,
                    height = msg.height,
                    round = msg.round,
                    step = %msg.step(),
                    "equivocation detected on save"
                );
                Err(Box::new(Equivocation {
                    first: first.clone(),
                    second: msg,
                }))
            }
        }
    }

    /// All messages at `height` matching the predicate, copied, in
    /// (round asc, step asc, sender asc) order.
    pub fn get(
        &self,
        height: u64,
        predicate: impl Fn(&ConsensusMessage) -> bool,
    ) -> Vec<ConsensusMessage> {
        let Some(rounds) = self.messages.get(&height) else {
            return Vec::new();
        };
        rounds
            .values()
            .flat_map(BTreeMap::values)
            .flat_map(BTreeMap::values)
            .filter(|m| predicate(m))
            .cloned()
            .collect()
    }

    /// The stored message for an exact key, if any.
    pub fn first_by_key(
        &self,
        height: u64,
        round: i64,
        step: Step,
        sender: &NodeId,
    ) -> Option<&ConsensusMessage> {
        self.messages
            .get(&height)?
            .get(&round)?
            .get(&step)?
            .get(sender)
    }

    /// Drop every message at `height`.
    pub fn delete_height(&mut self, height: u64) {
        self.messages.remove(&height);
    }

    /// Number of stored messages at `height`.
    pub fn len_at(&self, height: u64) -> usize {
        self.messages
            .get(&height)
            .map(|rounds| {
                rounds
                    .values()
                    .flat_map(BTreeMap::values)
                    .map(BTreeMap::len)
                    .sum()
            })
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_types::test_utils::{test_node, test_value};
    use accord_types::Signature;

    #[test]
    fn save_then_get() {
        let mut store = MessageStore::new();
        let pv = ConsensusMessage::prevote(11, 0, test_value(1), test_node(1));
        store.save(pv.clone()).unwrap();

        let got = store.get(11, |m| m.is_prevote());
        assert_eq!(got, vec![pv]);
        assert!(store.get(12, |_| true).is_empty());
    }

    #[test]
    fn duplicate_save_is_idempotent() {
        let mut store = MessageStore::new();
        let pv = ConsensusMessage::prevote(11, 0, test_value(1), test_node(1));
        store.save(pv.clone()).unwrap();
        store.save(pv).unwrap();
        assert_eq!(store.len_at(11), 1);
    }

    #[test]
    fn resigned_duplicate_is_still_idempotent() {
        // Same semantic content under a different signature is not
        // equivocation.
        let mut store = MessageStore::new();
        let mut pv = ConsensusMessage::prevote(11, 0, test_value(1), test_node(1));
        store.save(pv.clone()).unwrap();
        pv.signature = Signature::from_bytes([7u8; 65]);
        store.save(pv).unwrap();
        assert_eq!(store.len_at(11), 1);
    }

    #[test]
    fn equivocation_returns_first_and_keeps_it() {
        let mut store = MessageStore::new();
        let first = ConsensusMessage::prevote(11, 0, test_value(1), test_node(1));
        let second = ConsensusMessage::prevote(11, 0, test_value(2), test_node(1));
        store.save(first.clone()).unwrap();

        let err = store.save(second.clone()).unwrap_err();
        assert_eq!(err.first, first);
        assert_eq!(err.second, second);

        // The store still holds the first message only.
        assert_eq!(store.get(11, |m| m.is_prevote()), vec![first]);
    }

    #[test]
    fn distinct_keys_do_not_conflict() {
        let mut store = MessageStore::new();
        let a = ConsensusMessage::prevote(11, 0, test_value(1), test_node(1));
        let b = ConsensusMessage::prevote(11, 1, test_value(2), test_node(1));
        let c = ConsensusMessage::precommit(11, 0, test_value(2), test_node(1));
        let d = ConsensusMessage::prevote(11, 0, test_value(2), test_node(2));
        for msg in [a, b, c, d] {
            store.save(msg).unwrap();
        }
        assert_eq!(store.len_at(11), 4);
    }

    #[test]
    fn scan_order_is_round_step_sender() {
        let mut store = MessageStore::new();
        let msgs = [
            ConsensusMessage::prevote(11, 1, test_value(1), test_node(1)),
            ConsensusMessage::precommit(11, 0, test_value(1), test_node(2)),
            ConsensusMessage::prevote(11, 0, test_value(1), test_node(3)),
            ConsensusMessage::prevote(11, 0, test_value(1), test_node(1)),
        ];
        for msg in msgs.iter().cloned() {
            store.save(msg).unwrap();
        }

        let scanned = store.get(11, |_| true);
        let keys: Vec<_> = scanned
            .iter()
            .map(|m| (m.round, m.step(), m.sender))
            .collect();
        assert_eq!(
            keys,
            vec![
                (0, Step::Prevote, test_node(1)),
                (0, Step::Prevote, test_node(3)),
                (0, Step::Precommit, test_node(2)),
                (1, Step::Prevote, test_node(1)),
            ]
        );
    }

    #[test]
    fn delete_height_drops_everything() {
        let mut store = MessageStore::new();
        store
            .save(ConsensusMessage::prevote(11, 0, test_value(1), test_node(1)))
            .unwrap();
        store
            .save(ConsensusMessage::prevote(12, 0, test_value(1), test_node(1)))
            .unwrap();

        store.delete_height(11);
        assert_eq!(store.len_at(11), 0);
        assert_eq!(store.len_at(12), 1);
    }

    #[test]
    fn first_by_key_lookup() {
        let mut store = MessageStore::new();
        let pv = ConsensusMessage::prevote(11, 0, test_value(1), test_node(1));
        store.save(pv.clone()).unwrap();
        assert_eq!(
            store.first_by_key(11, 0, Step::Prevote, &test_node(1)),
            Some(&pv)
        );
        assert_eq!(store.first_by_key(11, 0, Step::Precommit, &test_node(1)), None);
    }
}
