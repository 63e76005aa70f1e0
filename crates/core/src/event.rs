//! Event types for the driver loop.

use accord_types::Step;

/// A scheduled wakeup for one step of one round.
///
/// The delay is not part of the timeout identity; the driver computes it
/// from its timeout configuration when scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeout {
    /// Which step's timeout handler should run when this fires.
    pub kind: Step,
    pub height: u64,
    pub round: i64,
}

impl Timeout {
    pub fn new(kind: Step, height: u64, round: i64) -> Self {
        Self {
            kind,
            height,
            round,
        }
    }
}

/// All possible inputs to the driver.
///
/// Events are **passive data** — they describe something that happened. The
/// driver processes them strictly in arrival order on a single task.
#[derive(Debug, Clone)]
pub enum Event {
    /// Raw consensus message bytes arrived from the transport.
    Inbound { bytes: Vec<u8> },

    /// A previously scheduled timeout fired.
    TimeoutFired { timeout: Timeout },

    /// The chain head advanced (e.g. via sync) to the given height.
    HeadAdvanced { height: u64 },

    /// Node shutdown requested.
    Shutdown,
}

impl Event {
    /// Get the event type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Event::Inbound { .. } => "Inbound",
            Event::TimeoutFired { .. } => "TimeoutFired",
            Event::HeadAdvanced { .. } => "HeadAdvanced",
            Event::Shutdown => "Shutdown",
        }
    }
}
