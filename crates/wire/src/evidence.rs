//! Proof-of-misbehavior envelope encoding.

use crate::codec::{encode, WireError};
use accord_types::{NodeId, Proof, Rule};

/// Raw proof envelope as the accountability contract ingests it.
///
/// `message` and each `evidence` entry are canonical wire encodings of
/// consensus messages; the contract re-parses them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProof {
    pub rule: Rule,
    pub message: Vec<u8>,
    pub evidence: Vec<Vec<u8>>,
}

/// On-chain submission wrapper: who is accused, the hash of the offending
/// message, and the encoded [`RawProof`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainProof {
    pub sender: NodeId,
    pub msg_hash: [u8; 32],
    pub raw_proof: Vec<u8>,
}

/// Layout: rule u8, u64 BE message length, message bytes, u32 BE evidence
/// count, then (u64 BE length, bytes) per evidence entry.
pub fn encode_raw_proof(proof: &RawProof) -> Vec<u8> {
    let evidence_len: usize = proof.evidence.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(16 + proof.message.len() + evidence_len);
    out.push(proof.rule as u8);
    out.extend_from_slice(&(proof.message.len() as u64).to_be_bytes());
    out.extend_from_slice(&proof.message);
    out.extend_from_slice(&(proof.evidence.len() as u32).to_be_bytes());
    for entry in &proof.evidence {
        out.extend_from_slice(&(entry.len() as u64).to_be_bytes());
        out.extend_from_slice(entry);
    }
    out
}

/// Decode a [`RawProof`] envelope. Rejects unknown rules and trailing bytes.
pub fn decode_raw_proof(bytes: &[u8]) -> Result<RawProof, WireError> {
    fn take<'a>(
        bytes: &mut &'a [u8],
        n: usize,
        field: &'static str,
    ) -> Result<&'a [u8], WireError> {
        if bytes.len() < n {
            return Err(WireError::Truncated(field));
        }
        let (head, tail) = bytes.split_at(n);
        *bytes = tail;
        Ok(head)
    }

    fn take_u64(bytes: &mut &[u8], field: &'static str) -> Result<u64, WireError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(take(bytes, 8, field)?);
        Ok(u64::from_be_bytes(buf))
    }

    let mut rest = bytes;
    let rule_tag = take(&mut rest, 1, "rule")?[0];
    let rule = Rule::from_u8(rule_tag).ok_or(WireError::UnknownType(rule_tag))?;

    let msg_len = take_u64(&mut rest, "message length")? as usize;
    let message = take(&mut rest, msg_len, "message")?.to_vec();

    let mut count = [0u8; 4];
    count.copy_from_slice(take(&mut rest, 4, "evidence count")?);
    let count = u32::from_be_bytes(count);

    let mut evidence = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = take_u64(&mut rest, "evidence length")? as usize;
        evidence.push(take(&mut rest, len, "evidence")?.to_vec());
    }

    if !rest.is_empty() {
        return Err(WireError::TrailingBytes(rest.len()));
    }

    Ok(RawProof {
        rule,
        message,
        evidence,
    })
}

/// Seal typed evidence into its on-chain submission form.
///
/// The message hash identifies the offending message by its full wire
/// bytes, signature included, so the chain can dedupe resubmissions.
pub fn seal_proof(proof: &Proof) -> OnChainProof {
    let message = encode(&proof.message);
    let msg_hash = *blake3::hash(&message).as_bytes();
    let raw = RawProof {
        rule: proof.rule,
        message,
        evidence: proof.evidence.iter().map(encode).collect(),
    };
    OnChainProof {
        sender: proof.message.sender,
        msg_hash,
        raw_proof: encode_raw_proof(&raw),
    }
}
