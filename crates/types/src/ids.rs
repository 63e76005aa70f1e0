//! Identifier newtypes.

use std::fmt;

/// Content hash of a proposed block.
///
/// The distinguished all-zero value [`ValueId::NIL`] represents "no value"
/// and is what nil prevotes and nil precommits carry.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ValueId(pub [u8; 32]);

impl ValueId {
    /// The "no value" marker.
    pub const NIL: ValueId = ValueId([0u8; 32]);

    /// Wrap raw hash bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        ValueId(bytes)
    }

    /// Borrow the raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// True for the distinguished "no value" marker.
    pub fn is_nil(&self) -> bool {
        *self == Self::NIL
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First three bytes are enough to tell values apart in logs.
        write!(f, "{}", hex::encode(&self.0[..3]))
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ValueId({})", hex::encode(&self.0[..3]))
    }
}

/// Validator address, derived from the validator's public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    /// Wrap raw address bytes.
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        NodeId(bytes)
    }

    /// Borrow the raw address bytes.
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..3]))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0[..3]))
    }
}

/// Recoverable signature in r‖s‖v layout.
///
/// The core treats signatures as opaque 65-byte blobs; production and
/// verification live behind the signer trait.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 65]);

impl Signature {
    /// All-zero placeholder used for messages the algorithm builds before
    /// the driver signs them.
    pub fn zero() -> Self {
        Signature([0u8; 65])
    }

    /// Wrap raw signature bytes.
    pub fn from_bytes(bytes: [u8; 65]) -> Self {
        Signature(bytes)
    }

    /// Borrow the raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; 65] {
        &self.0
    }
}

impl Default for Signature {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nil_is_all_zero() {
        assert!(ValueId::NIL.is_nil());
        assert!(ValueId::default().is_nil());
        assert!(!ValueId([1u8; 32]).is_nil());
    }

    #[test]
    fn display_is_short_hex() {
        let v = ValueId([0xab; 32]);
        assert_eq!(v.to_string(), "ababab");
        let n = NodeId([0x01; 20]);
        assert_eq!(n.to_string(), "010101");
    }
}
