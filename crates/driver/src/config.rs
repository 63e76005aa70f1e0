//! Driver configuration.

use accord_types::Step;
use serde::Deserialize;
use std::time::Duration;

/// Timeout schedule: each step's timeout is `base + round_increment × round`,
/// so later rounds wait longer for slow or partitioned peers.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Base delay for the propose timeout.
    pub propose_base: Duration,
    /// Base delay for the prevote timeout.
    pub prevote_base: Duration,
    /// Base delay for the precommit timeout.
    pub precommit_base: Duration,
    /// Added per round on top of the base.
    pub round_increment: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            propose_base: Duration::from_millis(3000),
            prevote_base: Duration::from_millis(1000),
            precommit_base: Duration::from_millis(1000),
            round_increment: Duration::from_millis(500),
        }
    }
}

impl TimeoutConfig {
    /// Delay for a timeout of `kind` at `round`.
    pub fn delay(&self, kind: Step, round: i64) -> Duration {
        let base = match kind {
            Step::Propose => self.propose_base,
            Step::Prevote => self.prevote_base,
            Step::Precommit => self.precommit_base,
        };
        let round = u32::try_from(round).unwrap_or(u32::MAX);
        base.saturating_add(self.round_increment.saturating_mul(round))
    }
}

/// Top-level driver configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    pub timeouts: TimeoutConfig,
}
