//! Collaborator traits consumed by the consensus core.
//!
//! These are the seams to the rest of the node: chain state, block
//! verification, signing, gossip and evidence submission. The core never
//! reaches past them.

use accord_types::{Committee, ConsensusMessage, NodeId, Signature, ValueId};
use accord_wire::OnChainProof;

/// Block header view the core needs: the committee that signs the *next*
/// height lives in the header of the previous one.
#[derive(Debug, Clone)]
pub struct Header {
    pub number: u64,
    pub hash: ValueId,
    pub committee: Committee,
}

/// Errors surfaced by the chain.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("no header at height {0}")]
    MissingHeader(u64),
    #[error("failed to commit decided block at height {0}: {1}")]
    CommitFailed(u64, String),
}

/// Read and append access to the chain the core decides for.
///
/// Everything here must be a pure function of committed chain state; in
/// particular the proposer for a round is derived from the parent block
/// (round-robin over the sorted committee at genesis, the accountability
/// contract's proposer function afterwards).
pub trait ChainContext: Send + Sync {
    /// The current chain head.
    fn head(&self) -> Header;

    /// Header at an exact height, `None` when unknown locally.
    fn header_at(&self, number: u64) -> Option<Header>;

    /// Designated proposer for (height, round).
    fn proposer(&self, height: u64, round: i64) -> Option<NodeId>;

    /// Durably apply a decided proposal to the chain.
    fn commit(&self, proposal: &ConsensusMessage) -> Result<(), ChainError>;
}

/// Outcome of verifying a proposed block against the parent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockVerdict {
    /// Well-formed relative to the parent state.
    Valid,
    /// Provably malformed; proposing it is misbehavior.
    Invalid,
    /// Refers to chain state we do not have yet; retry after head advance.
    Future,
    /// Verifier failed temporarily; retry later.
    Transient,
}

/// Opaque block verifier oracle.
pub trait BlockVerifier: Send + Sync {
    fn verify(&self, height: u64, block: &[u8]) -> BlockVerdict;
}

/// Signing and sender recovery for consensus messages.
pub trait Signer: Send + Sync {
    /// Sign a message digest with this node's key.
    fn sign(&self, digest: &[u8; 32]) -> Signature;

    /// Recover the signer address from a digest and signature, `None` when
    /// the signature is malformed.
    fn recover(&self, digest: &[u8; 32], signature: &Signature) -> Option<NodeId>;
}

/// Outbound gossip. The transport fans the bytes out to the committee,
/// including this node.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, committee: &Committee, bytes: Vec<u8>);
}

/// What a batch of submitted evidence claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceKind {
    /// Self-contained misbehavior proofs.
    Misbehavior,
    /// Accusations awaiting innocence proofs.
    Accusation,
    /// An innocence proof answering an accusation.
    Innocence,
}

/// Sink for on-chain accountability submissions.
pub trait EvidenceSink: Send + Sync {
    fn submit(&self, kind: EvidenceKind, proofs: Vec<OnChainProof>);
}

/// Errors assembling a proposable value.
#[derive(Debug, thiserror::Error)]
pub enum ValueSourceError {
    #[error("no proposable value available: {0}")]
    Unavailable(String),
}

/// Source of freshly assembled proposable values.
///
/// Consulted only when this node is the proposer and holds no valid value
/// from an earlier round.
pub trait ValueSource: Send + Sync {
    /// Assemble a new proposable block, returning its content hash and the
    /// full payload.
    fn assemble(&self, height: u64) -> Result<(ValueId, Vec<u8>), ValueSourceError>;
}
