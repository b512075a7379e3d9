/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use rand::{thread_rng, Rng};
use std::time::Duration;
use tokio::time::Instant;

/// Optional wall-clock bound for one top-level operation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| Instant::now() + t))
    }

    pub fn expired(&self) -> bool {
        self.0.is_some_and(|at| Instant::now() >= at)
    }
}

/// Attempt budget for one optimistic-concurrency loop.
#[derive(Clone, Copy, Debug)]
pub struct Retry {
    attempts: u32,
    jitter_ms: u64,
    deadline: Deadline,
}

impl Retry {
    pub fn new(attempts: u32, jitter_ms: u64, deadline: Deadline) -> Self {
        Self {
            attempts: attempts.max(1),
            jitter_ms,
            deadline,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether attempt number `attempt` (zero based) may run. Sleeps a short
    /// random jitter before every attempt after the first.
    pub async fn allow(&self, attempt: u32) -> bool {
        if attempt >= self.attempts || self.deadline.expired() {
            return false;
        }
        if attempt > 0 && self.jitter_ms > 0 {
            sleep_with_jitter(self.jitter_ms).await;
        }
        !self.deadline.expired()
    }
}

async fn sleep_with_jitter(max_ms: u64) {
    let jitter_ms: u64 = thread_rng().gen_range(0..=max_ms);
    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn budget_limits_attempts() {
        let retry = Retry::new(3, 0, Deadline::none());
        assert!(retry.allow(0).await);
        assert!(retry.allow(2).await);
        assert!(!retry.allow(3).await);
        assert_eq!(Retry::new(0, 0, Deadline::none()).attempts(), 1);
    }

    #[tokio::test]
    async fn expired_deadline_stops_immediately() {
        let deadline = Deadline::after(Some(Duration::ZERO));
        assert!(deadline.expired());
        assert!(!Retry::new(5, 0, deadline).allow(0).await);
        assert!(!Deadline::after(None).expired());
    }
}
