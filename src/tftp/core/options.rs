//! Retransmission and failure-handling policy shared by every transfer

use std::time::Duration;

use serde::Deserialize;

/// How the wait between retransmissions grows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Every attempt waits `timeout`
    #[default]
    Fixed,
    /// Attempt `n` waits `timeout * 2^n`, capped at 8x `timeout`
    Exponential,
}

/// What happens to a partially written file when an upload fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialFilePolicy {
    /// Leave the partial file on disk for inspection
    #[default]
    Keep,
    /// Remove the partial file
    Delete,
}

/// Internal transfer options (retries, timeouts)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferOptions {
    /// How long to wait for an ACK/DATA before retransmitting
    pub timeout: Duration,
    /// Retransmissions of one packet before the transfer is abandoned.
    /// `0` means the packet is sent once.
    pub max_retries: u32,
    pub backoff: Backoff,
}

const MAX_BACKOFF_FACTOR: u32 = 8;

impl TransferOptions {
    /// Wait before giving up on attempt `attempt` (0 = first transmission)
    pub fn wait_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.timeout,
            Backoff::Exponential => {
                let factor = 1u32
                    .checked_shl(attempt)
                    .unwrap_or(MAX_BACKOFF_FACTOR)
                    .min(MAX_BACKOFF_FACTOR);
                self.timeout * factor
            }
        }
    }
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_retries: 5,
            backoff: Backoff::Fixed,
        }
    }
}
