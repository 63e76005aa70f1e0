//! Canonical wire encoding for the consensus core.
//!
//! Two encodings live here, both required to be bit-exact:
//!
//! - [`codec`]: the consensus message layout exchanged between validators.
//!   Field order is `{type, height, round, value, valid_round, sender,
//!   payload, signature}`; the signature covers the hash of every field
//!   before it.
//! - [`evidence`]: the `{rule, message, evidence[]}` envelope the on-chain
//!   accountability contract ingests, wrapped as `{sender, msg_hash, raw}`.
//!
//! Everything here is hand-rolled: the on-chain contract re-parses these
//! bytes, so no derive-based format can own the layout.

mod codec;
mod evidence;

pub use codec::{canonical_hash, decode, encode, signing_hash, WireError};
pub use evidence::{decode_raw_proof, encode_raw_proof, seal_proof, OnChainProof, RawProof};
