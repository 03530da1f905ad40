//! Bounded backoff to dead-letter (spec §4.D).
//!
//! `RetryCount` is monotonically non-decreasing across redeliveries until the
//! message is either handled (removed) or dead-lettered (removed and
//! archived). A schedule of length `L` allows `L` retries, for a total of
//! `L + 1` attempts including the initial delivery.

use std::time::Duration;

use crate::broker::{BrokerMessage, RETRY_COUNT_ATTR};

/// What the retry loop should do with a message that a handler asked to retry.
pub(crate) enum RetryDecision {
    /// Resend `message` (with `RetryCount` incremented) after `delay`.
    Resend {
        message: BrokerMessage,
        delay: Duration,
    },
    /// The schedule is exhausted; promote `message` to the dead-letter queue.
    Exhausted { message: BrokerMessage },
}

/// Reads the attempt counter from message attributes and decides whether to
/// resend with a delay or promote to dead-letter.
pub(crate) struct RetryEngine {
    schedule: Vec<Duration>,
}

impl RetryEngine {
    pub(crate) fn new(schedule: Vec<Duration>) -> Self {
        Self { schedule }
    }

    /// `current` is the number of retries already performed (the `RetryCount`
    /// attribute before this attempt). The schedule allows up to
    /// `schedule.len()` retries; once `current` reaches that, the message has
    /// already had its final retry and this attempt is exhausted. The n-th
    /// retry (1-indexed) uses `schedule[n - 1]`, i.e. `schedule[current]`.
    pub(crate) fn decide(&self, message: BrokerMessage) -> RetryDecision {
        let current = message.retry_count();

        if current as usize >= self.schedule.len() {
            return RetryDecision::Exhausted { message };
        }

        let delay = self.schedule[current as usize];
        let mut message = message;
        message
            .attributes
            .insert(RETRY_COUNT_ATTR.to_string(), (current + 1).to_string());

        RetryDecision::Resend { message, delay }
    }
}

/// Rounds a duration up to whole seconds, as SQS delay seconds are integral.
pub(crate) fn ceil_seconds(delay: Duration) -> u32 {
    let secs = delay.as_secs();
    let whole = if delay.subsec_nanos() > 0 { secs + 1 } else { secs };
    whole.min(u32::MAX as u64) as u32
}
