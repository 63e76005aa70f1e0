//! Consensus step enumeration.

use std::fmt;

/// The three steps of a consensus round.
///
/// The derived ordering (`Propose < Prevote < Precommit`) is load-bearing:
/// several upon-rules gate on "step at least Prevote".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Step {
    Propose = 0,
    Prevote = 1,
    Precommit = 2,
}

impl Step {
    /// Decode from the wire tag.
    pub fn from_u8(tag: u8) -> Option<Step> {
        match tag {
            0 => Some(Step::Propose),
            1 => Some(Step::Prevote),
            2 => Some(Step::Precommit),
            _ => None,
        }
    }

    /// Two-letter form for compact log lines.
    pub fn short_str(&self) -> &'static str {
        match self {
            Step::Propose => "pp",
            Step::Prevote => "pv",
            Step::Precommit => "pc",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Step::Propose => "Propose",
            Step::Prevote => "Prevote",
            Step::Precommit => "Precommit",
        };
        f.write_str(s)
    }
}
