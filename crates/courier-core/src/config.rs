use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SenderConfig {
    /// Retry budget per recipient; hitting zero is fatal for that
    /// recipient.
    pub max_send_attempts: u32,
    pub retry_backoff_initial_ms: u64,
    pub retry_backoff_max_ms: u64,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            max_send_attempts: 3,
            retry_backoff_initial_ms: 500,
            retry_backoff_max_ms: 30_000,
        }
    }
}
