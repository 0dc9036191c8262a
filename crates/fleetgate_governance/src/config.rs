//! Governance configuration.

/// Default number of same-side votes that decides a proposal.
pub const DEFAULT_VOTE_THRESHOLD: u32 = 3;

/// Configuration for the vote ledger and finalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernanceConfig {
    /// Votes on one side needed to finalize. Values below 1 act as 1.
    pub vote_threshold: u32,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            vote_threshold: DEFAULT_VOTE_THRESHOLD,
        }
    }
}

impl GovernanceConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the vote threshold.
    pub fn with_vote_threshold(mut self, threshold: u32) -> Self {
        self.vote_threshold = threshold;
        self
    }

    /// The threshold as applied to counters.
    pub fn threshold(&self) -> i64 {
        i64::from(self.vote_threshold.max(1))
    }
}
