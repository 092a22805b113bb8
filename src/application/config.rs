use std::time::Duration;

/// How hard the orchestrator tries to learn the outcome of a commit the
/// database did not acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Total lookups, including the first one. Never less than one.
    pub max_attempts: u32,
    /// Pause between two lookups.
    pub backoff: Duration,
}

impl RecoveryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(50);

    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS, Self::DEFAULT_BACKOFF)
    }
}

/// Runtime configuration of the bank service.
#[derive(Debug, Clone, Default)]
pub struct BankConfig {
    pub recovery: RecoveryPolicy,
}

impl BankConfig {
    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }
}
