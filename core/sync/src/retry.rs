//! Retry policy for records the remote keeps rejecting.
//!
//! A failed record is never retried inside the pass that failed it; it stays
//! pending and is picked up by the next trigger. The policy only decides when
//! a record has failed often enough to be set aside.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Consecutive failures after which a record is quarantined.
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Retry on every later trigger, never quarantine.
    pub fn unlimited() -> Self {
        Self { max_attempts: None }
    }

    /// Quarantine after `max_attempts` consecutive failures (at least one).
    pub fn capped(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
        }
    }

    /// Failure count at which the store moves a record to `error`.
    pub fn quarantine_after(&self) -> Option<u32> {
        self.max_attempts
    }
}
