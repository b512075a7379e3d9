/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::retry::Deadline;
use std::time::Duration;

/// Which feed entries an unfollow removes in one pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnfollowPolicy {
    /// Remove the newest entry of the unfollowed actor only.
    #[default]
    FirstMatch,
    AllMatches,
}

impl UnfollowPolicy {
    pub fn from_str(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "first_match" | "first-match" | "first" => Some(Self::FirstMatch),
            "all_matches" | "all-matches" | "all" => Some(Self::AllMatches),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Schema versions written on every mutation.
    pub versions: Vec<u32>,
    /// Visible feed size.
    pub max_activities: u32,
    /// Feeds may grow to `max_activities * trim_factor` entries before a
    /// trim pass catches up.
    pub trim_factor: u32,
    pub write_retries: u32,
    pub backfill_retries: u32,
    pub unfollow_retries: u32,
    pub fanout_concurrency: usize,
    pub op_timeout_ms: Option<u64>,
    pub retry_jitter_ms: u64,
    pub unfollow_policy: UnfollowPolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            versions: vec![1],
            max_activities: 10,
            trim_factor: 2,
            write_retries: 5,
            backfill_retries: 3,
            unfollow_retries: 10,
            fanout_concurrency: 8,
            op_timeout_ms: None,
            retry_jitter_ms: 5,
            unfollow_policy: UnfollowPolicy::FirstMatch,
        }
    }
}

impl FeedConfig {
    /// Defaults overlaid with `FANFEED_*` environment variables. Values that
    /// fail to parse keep their default.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(versions) = std::env::var("FANFEED_VERSIONS")
            .ok()
            .map(|v| parse_versions(&v))
            .filter(|v| !v.is_empty())
        {
            cfg.versions = versions;
        }
        cfg.max_activities = env_parse("FANFEED_MAX_ACTIVITIES").unwrap_or(cfg.max_activities);
        cfg.trim_factor = env_parse("FANFEED_TRIM_FACTOR").unwrap_or(cfg.trim_factor);
        cfg.write_retries = env_parse("FANFEED_WRITE_RETRIES").unwrap_or(cfg.write_retries);
        cfg.backfill_retries = env_parse("FANFEED_BACKFILL_RETRIES").unwrap_or(cfg.backfill_retries);
        cfg.unfollow_retries = env_parse("FANFEED_UNFOLLOW_RETRIES").unwrap_or(cfg.unfollow_retries);
        cfg.fanout_concurrency =
            env_parse("FANFEED_FANOUT_CONCURRENCY").unwrap_or(cfg.fanout_concurrency);
        cfg.op_timeout_ms = env_parse("FANFEED_OP_TIMEOUT_MS").or(cfg.op_timeout_ms);
        cfg.retry_jitter_ms = env_parse("FANFEED_RETRY_JITTER_MS").unwrap_or(cfg.retry_jitter_ms);
        if let Some(policy) = std::env::var("FANFEED_UNFOLLOW_POLICY")
            .ok()
            .and_then(|v| UnfollowPolicy::from_str(&v))
        {
            cfg.unfollow_policy = policy;
        }
        cfg
    }

    pub fn max_activities(&self) -> isize {
        self.max_activities.max(1) as isize
    }

    /// Last rank (inclusive) a trim pass looks at.
    pub fn trim_window_end(&self) -> isize {
        self.max_activities() * self.trim_factor.max(1) as isize
    }

    pub fn deadline(&self) -> Deadline {
        Deadline::after(self.op_timeout_ms.map(Duration::from_millis))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn parse_versions(input: &str) -> Vec<u32> {
    let mut out: Vec<u32> = input
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<u32>().ok())
        .collect();
    out.dedup();
    out
}
