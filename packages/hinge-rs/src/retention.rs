//! Bounded retention for per-source message queues.
//!
//! Two queues are bounded independently: messages waiting to be consumed and
//! messages already consumed (history). Both are bounded by count and by
//! age. Trimming is FIFO by emission time and is applied by the status
//! tracker after every mutation, never by a background sweep.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::SignalMessage;

pub const DEFAULT_HISTORY_MAX_RETENTION: usize = 20;
pub const DEFAULT_NOT_CONSUMED_MAX_RETENTION: usize = 100;
pub const DEFAULT_RETENTION_MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub history_max_retention: usize,
    pub not_consumed_max_retention: usize,
    /// Maximum age of a retained message, measured from its emission time.
    pub retention_max_delay: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            history_max_retention: DEFAULT_HISTORY_MAX_RETENTION,
            not_consumed_max_retention: DEFAULT_NOT_CONSUMED_MAX_RETENTION,
            retention_max_delay: DEFAULT_RETENTION_MAX_DELAY,
        }
    }
}

impl RetentionPolicy {
    /// Oldest emission time still retained at `now`.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match chrono::Duration::from_std(self.retention_max_delay) {
            Ok(delay) => now.checked_sub_signed(delay).unwrap_or(DateTime::<Utc>::MIN_UTC),
            Err(_) => DateTime::<Utc>::MIN_UTC,
        }
    }

    /// Trim the not-consumed queue. Returns the messages dropped.
    pub fn trim_not_consumed(
        &self,
        queue: &mut VecDeque<SignalMessage>,
        now: DateTime<Utc>,
    ) -> usize {
        trim(queue, self.not_consumed_max_retention, self.cutoff(now))
    }

    /// Trim the history queue. Returns the messages dropped.
    pub fn trim_history(&self, queue: &mut VecDeque<SignalMessage>, now: DateTime<Utc>) -> usize {
        trim(queue, self.history_max_retention, self.cutoff(now))
    }
}

/// Drop from the front (oldest) until both bounds hold.
///
/// `queue` must be sorted by ascending `emitted_at`.
fn trim(queue: &mut VecDeque<SignalMessage>, max_len: usize, cutoff: DateTime<Utc>) -> usize {
    let mut dropped = 0;
    while let Some(front) = queue.front() {
        if queue.len() > max_len || front.emitted_at < cutoff {
            queue.pop_front();
            dropped += 1;
        } else {
            break;
        }
    }
    dropped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{SignalId, SourceId};
    use uuid::Uuid;

    fn queue_at(now: DateTime<Utc>, ages_secs: &[i64]) -> VecDeque<SignalMessage> {
        let source = SourceId::from(SignalId::new(Uuid::new_v4(), "sig"));
        ages_secs
            .iter()
            .map(|age| SignalMessage::new(&source, now - chrono::Duration::seconds(*age), None))
            .collect()
    }

    #[test]
    fn test_defaults_are_finite_and_non_zero() {
        let policy = RetentionPolicy::default();
        assert!(policy.history_max_retention > 0);
        assert!(policy.not_consumed_max_retention > 0);
        assert!(policy.retention_max_delay > Duration::ZERO);
    }

    #[test]
    fn test_count_bound_drops_oldest_first() {
        let now = Utc::now();
        let policy = RetentionPolicy {
            history_max_retention: 2,
            ..RetentionPolicy::default()
        };
        let mut queue = queue_at(now, &[30, 20, 10]);
        let newest = queue[2].uid;

        let dropped = policy.trim_history(&mut queue, now);

        assert_eq!(dropped, 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[1].uid, newest);
    }

    #[test]
    fn test_age_bound_drops_expired() {
        let now = Utc::now();
        let policy = RetentionPolicy {
            retention_max_delay: Duration::from_secs(15),
            ..RetentionPolicy::default()
        };
        let mut queue = queue_at(now, &[30, 20, 10, 0]);

        let dropped = policy.trim_not_consumed(&mut queue, now);

        assert_eq!(dropped, 2);
        assert!(queue.iter().all(|m| m.emitted_at >= now - chrono::Duration::seconds(15)));
    }

    #[test]
    fn test_huge_delay_never_overflows() {
        let policy = RetentionPolicy {
            retention_max_delay: Duration::from_secs(u64::MAX),
            ..RetentionPolicy::default()
        };
        assert_eq!(policy.cutoff(Utc::now()), DateTime::<Utc>::MIN_UTC);
    }
}
