//! Consensus message codec.

use accord_types::{ConsensusMessage, MessageBody, NodeId, Signature, Step, ValueId};

/// Errors decoding wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("message truncated while reading {0}")]
    Truncated(&'static str),
    #[error("unknown message type tag {0}")]
    UnknownType(u8),
    #[error("varint overflows i64")]
    VarintOverflow,
    #[error("negative round {0} on the wire")]
    NegativeRound(i64),
    #[error("valid_round {0} below -1")]
    ValidRoundRange(i64),
    #[error("vote carries a non-empty payload")]
    VotePayload,
    #[error("payload length {0} exceeds limit")]
    OversizePayload(u64),
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
}

/// Upper bound on a proposal payload; anything larger is garbage before it
/// is a block.
const MAX_PAYLOAD: u64 = 8 * 1024 * 1024;

fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn put_varint(out: &mut Vec<u8>, v: i64) {
    let mut x = zigzag_encode(v);
    loop {
        let byte = (x & 0x7f) as u8;
        x >>= 7;
        if x == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(WireError::Truncated(field))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, WireError> {
        Ok(self.take(1, field)?[0])
    }

    fn u64_be(&mut self, field: &'static str) -> Result<u64, WireError> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8, field)?);
        Ok(u64::from_be_bytes(buf))
    }

    fn varint(&mut self, field: &'static str) -> Result<i64, WireError> {
        let mut x: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.u8(field)?;
            if shift == 63 && byte > 1 {
                return Err(WireError::VarintOverflow);
            }
            x |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(zigzag_decode(x));
            }
            shift += 7;
            if shift > 63 {
                return Err(WireError::VarintOverflow);
            }
        }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }
}

/// Append the signed portion of the wire layout: every field before the
/// signature, in canonical order.
fn put_signed_fields(out: &mut Vec<u8>, msg: &ConsensusMessage) {
    out.push(msg.step() as u8);
    out.extend_from_slice(&msg.height.to_be_bytes());
    put_varint(out, msg.round);
    out.extend_from_slice(msg.value.as_bytes());
    // Votes encode valid_round as 0; only proposals carry a meaningful one.
    put_varint(out, msg.valid_round().unwrap_or(0));
    out.extend_from_slice(msg.sender.as_bytes());
    let payload = msg.block().unwrap_or(&[]);
    out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    out.extend_from_slice(payload);
}

/// Encode a message to canonical wire bytes.
pub fn encode(msg: &ConsensusMessage) -> Vec<u8> {
    let mut out = Vec::with_capacity(128 + msg.block().map_or(0, <[u8]>::len));
    put_signed_fields(&mut out, msg);
    out.extend_from_slice(msg.signature.as_bytes());
    out
}

/// Hash covered by the message signature: all wire fields before it.
pub fn signing_hash(msg: &ConsensusMessage) -> [u8; 32] {
    let mut buf = Vec::with_capacity(128);
    put_signed_fields(&mut buf, msg);
    *blake3::hash(&buf).as_bytes()
}

/// Hash used for equivocation comparison.
///
/// Ignores the signature and covers exactly the fields that distinguish a
/// message's semantic content: type, height, round, value, and the valid
/// round for proposals.
pub fn canonical_hash(msg: &ConsensusMessage) -> [u8; 32] {
    let mut buf = Vec::with_capacity(64);
    buf.push(msg.step() as u8);
    buf.extend_from_slice(&msg.height.to_be_bytes());
    put_varint(&mut buf, msg.round);
    buf.extend_from_slice(msg.value.as_bytes());
    put_varint(&mut buf, msg.valid_round().unwrap_or(0));
    *blake3::hash(&buf).as_bytes()
}

/// Decode canonical wire bytes. Rejects trailing bytes.
pub fn decode(bytes: &[u8]) -> Result<ConsensusMessage, WireError> {
    let mut r = Reader::new(bytes);

    let tag = r.u8("type")?;
    let step = Step::from_u8(tag).ok_or(WireError::UnknownType(tag))?;
    let height = r.u64_be("height")?;
    let round = r.varint("round")?;
    if round < 0 {
        return Err(WireError::NegativeRound(round));
    }

    let mut value = [0u8; 32];
    value.copy_from_slice(r.take(32, "value")?);
    let value = ValueId::from_bytes(value);

    let valid_round = r.varint("valid_round")?;
    if valid_round < -1 {
        return Err(WireError::ValidRoundRange(valid_round));
    }

    let mut sender = [0u8; 20];
    sender.copy_from_slice(r.take(20, "sender")?);
    let sender = NodeId::from_bytes(sender);

    let payload_len = r.u64_be("payload length")?;
    if payload_len > MAX_PAYLOAD {
        return Err(WireError::OversizePayload(payload_len));
    }
    let payload = r.take(payload_len as usize, "payload")?.to_vec();

    let mut sig = [0u8; 65];
    sig.copy_from_slice(r.take(65, "signature")?);
    let signature = Signature::from_bytes(sig);

    if r.remaining() != 0 {
        return Err(WireError::TrailingBytes(r.remaining()));
    }

    let body = match step {
        Step::Propose => MessageBody::Propose {
            valid_round,
            block: payload,
        },
        Step::Prevote | Step::Precommit => {
            if !payload.is_empty() {
                return Err(WireError::VotePayload);
            }
            match step {
                Step::Prevote => MessageBody::Prevote,
                _ => MessageBody::Precommit,
            }
        }
    };

    Ok(ConsensusMessage {
        height,
        round,
        value,
        sender,
        signature,
        body,
    })
}
