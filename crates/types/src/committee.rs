//! Committee membership and voting power arithmetic.

use crate::NodeId;
use std::collections::HashMap;
use std::fmt;
use std::iter::Sum;

/// Voting power of a validator or a sum of validators.
///
/// Quorum arithmetic is always computed over voting power, never over
/// message counts. Additions saturate; a committee whose total power
/// saturates u128 is rejected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VotePower(pub u128);

impl VotePower {
    pub const ZERO: VotePower = VotePower(0);

    pub fn saturating_add(self, other: VotePower) -> VotePower {
        VotePower(self.0.saturating_add(other.0))
    }
}

impl Sum for VotePower {
    fn sum<I: Iterator<Item = VotePower>>(iter: I) -> Self {
        iter.fold(VotePower::ZERO, VotePower::saturating_add)
    }
}

impl fmt::Display for VotePower {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A single committee member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitteeMember {
    pub address: NodeId,
    pub voting_power: VotePower,
}

impl CommitteeMember {
    pub fn new(address: NodeId, voting_power: VotePower) -> Self {
        Self {
            address,
            voting_power,
        }
    }
}

/// Errors constructing a committee.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommitteeError {
    #[error("committee must have at least one member")]
    Empty,
    #[error("duplicate committee member {0:?}")]
    DuplicateMember(NodeId),
    #[error("member {0:?} has zero voting power")]
    ZeroPower(NodeId),
    #[error("total voting power overflows")]
    PowerOverflow,
}

/// Ordered validator committee for one height.
///
/// Members are kept sorted by address; the genesis proposer rotation indexes
/// into this order by `round mod len`.
#[derive(Debug, Clone)]
pub struct Committee {
    members: Vec<CommitteeMember>,
    by_address: HashMap<NodeId, VotePower>,
    total_power: VotePower,
}

impl Committee {
    /// Build a committee from its members, sorting by address.
    pub fn new(mut members: Vec<CommitteeMember>) -> Result<Self, CommitteeError> {
        if members.is_empty() {
            return Err(CommitteeError::Empty);
        }
        members.sort_by_key(|m| m.address);

        let mut by_address = HashMap::with_capacity(members.len());
        let mut total_power: u128 = 0;
        for m in &members {
            if m.voting_power == VotePower::ZERO {
                return Err(CommitteeError::ZeroPower(m.address));
            }
            if by_address.insert(m.address, m.voting_power).is_some() {
                return Err(CommitteeError::DuplicateMember(m.address));
            }
            total_power = total_power
                .checked_add(m.voting_power.0)
                .ok_or(CommitteeError::PowerOverflow)?;
        }

        Ok(Self {
            members,
            by_address,
            total_power: VotePower(total_power),
        })
    }

    /// Members in address order.
    pub fn members(&self) -> &[CommitteeMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Total voting power N.
    pub fn total_power(&self) -> VotePower {
        self.total_power
    }

    /// Smallest voting power strictly exceeding 2N/3.
    pub fn quorum_threshold(&self) -> VotePower {
        VotePower(self.total_power.0 * 2 / 3 + 1)
    }

    /// Smallest voting power strictly exceeding N/3 (one Byzantine bound).
    pub fn fault_threshold(&self) -> VotePower {
        VotePower(self.total_power.0 / 3 + 1)
    }

    /// Voting power of a member, `None` for non-members.
    pub fn power_of(&self, address: &NodeId) -> Option<VotePower> {
        self.by_address.get(address).copied()
    }

    pub fn contains(&self, address: &NodeId) -> bool {
        self.by_address.contains_key(address)
    }

    /// Genesis proposer selection: round-robin over the address-sorted
    /// members. Heights past genesis derive the proposer from the
    /// accountability contract instead.
    pub fn round_robin_proposer(&self, round: i64) -> NodeId {
        let index = round.rem_euclid(self.members.len() as i64) as usize;
        self.members[index].address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{equal_committee, test_node};

    #[test]
    fn thresholds_for_four_equal_members() {
        let committee = equal_committee(4);
        assert_eq!(committee.total_power(), VotePower(4));
        assert_eq!(committee.quorum_threshold(), VotePower(3));
        assert_eq!(committee.fault_threshold(), VotePower(2));
    }

    #[test]
    fn thresholds_are_weighted_not_counted() {
        let committee = Committee::new(vec![
            CommitteeMember::new(test_node(1), VotePower(10)),
            CommitteeMember::new(test_node(2), VotePower(1)),
            CommitteeMember::new(test_node(3), VotePower(1)),
        ])
        .unwrap();
        // N = 12, Q = 9: the heavy member alone dominates.
        assert_eq!(committee.quorum_threshold(), VotePower(9));
        assert_eq!(committee.fault_threshold(), VotePower(5));
    }

    #[test]
    fn proposer_rotation_wraps() {
        let committee = equal_committee(4);
        assert_eq!(committee.round_robin_proposer(0), test_node(1));
        assert_eq!(committee.round_robin_proposer(3), test_node(4));
        assert_eq!(committee.round_robin_proposer(4), test_node(1));
        assert_eq!(committee.round_robin_proposer(5), test_node(2));
    }

    #[test]
    fn rejects_degenerate_committees() {
        assert!(matches!(Committee::new(vec![]), Err(CommitteeError::Empty)));
        let dup = Committee::new(vec![
            CommitteeMember::new(test_node(1), VotePower(1)),
            CommitteeMember::new(test_node(1), VotePower(1)),
        ]);
        assert!(matches!(dup, Err(CommitteeError::DuplicateMember(_))));
        let zero = Committee::new(vec![CommitteeMember::new(test_node(1), VotePower(0))]);
        assert!(matches!(zero, Err(CommitteeError::ZeroPower(_))));
    }

    #[test]
    fn power_lookup() {
        let committee = equal_committee(4);
        assert_eq!(committee.power_of(&test_node(2)), Some(VotePower(1)));
        assert_eq!(committee.power_of(&test_node(9)), None);
        assert!(committee.contains(&test_node(4)));
    }
}
