/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{bail, Context, Result};
use std::fmt;

pub const DAY_SECS: i64 = 86_400;

pub type UserId = u64;

/// Label of an activity ("post", "like", ...). Appears verbatim inside keys,
/// so it may not contain the `:` separator or whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActivityKind(String);

impl ActivityKind {
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        if label.is_empty() {
            bail!("activity type is empty");
        }
        if label.contains(':') || label.chars().any(char::is_whitespace) {
            bail!("activity type {label:?} contains a separator");
        }
        Ok(Self(label))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn day_bucket(timestamp: i64) -> i64 {
    timestamp.div_euclid(DAY_SECS)
}

pub fn activity_key(actor: UserId, timestamp: i64, kind: &ActivityKind) -> String {
    format!("activity:{actor}:{timestamp}:{kind}")
}

pub fn activity_index_key(actor: UserId) -> String {
    format!("activities:{actor}")
}

pub fn followers_key(user: UserId) -> String {
    format!("followers:{user}")
}

pub fn feed_key(version: u32, follower: UserId) -> String {
    format!("activity_feed:{version}:{follower}")
}

pub fn profile_key(version: u32, actor: UserId) -> String {
    format!("activity_profile:{version}:{actor}")
}

/// Identity of a day-bucketed aggregate:
/// `activity_aggr:<version>:<type>:<actor>:<day>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateKey {
    pub version: u32,
    pub kind: ActivityKind,
    pub actor: UserId,
    pub day: i64,
}

impl AggregateKey {
    pub fn new(version: u32, kind: ActivityKind, actor: UserId, timestamp: i64) -> Self {
        Self {
            version,
            kind,
            actor,
            day: day_bucket(timestamp),
        }
    }

    pub fn counter_key(&self) -> String {
        counter_key(&self.to_string())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split(':');
        if parts.next() != Some("activity_aggr") {
            bail!("not an aggregate key: {raw}");
        }
        let (Some(version), Some(kind), Some(actor), Some(day), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            bail!("malformed aggregate key: {raw}");
        };
        Ok(Self {
            version: version.parse().context("aggregate version")?,
            kind: ActivityKind::new(kind)?,
            actor: actor.parse().context("aggregate actor")?,
            day: day.parse().context("aggregate day")?,
        })
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "activity_aggr:{}:{}:{}:{}",
            self.version, self.kind, self.actor, self.day
        )
    }
}

pub fn counter_key(aggregate: &str) -> String {
    format!("{aggregate}:counter")
}

/// Actor embedded in a raw aggregate key, if it parses.
pub fn aggregate_actor(raw: &str) -> Option<UserId> {
    AggregateKey::parse(raw).ok().map(|aggr| aggr.actor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post() -> ActivityKind {
        ActivityKind::new("post").unwrap()
    }

    #[test]
    fn layout_matches_stored_keys() {
        assert_eq!(activity_key(42, 1_000_000, &post()), "activity:42:1000000:post");
        assert_eq!(activity_index_key(42), "activities:42");
        assert_eq!(followers_key(42), "followers:42");
        assert_eq!(feed_key(1, 7), "activity_feed:1:7");
        assert_eq!(profile_key(1, 42), "activity_profile:1:42");

        let aggr = AggregateKey::new(1, post(), 42, 1_000_000);
        assert_eq!(aggr.to_string(), "activity_aggr:1:post:42:11");
        assert_eq!(aggr.counter_key(), "activity_aggr:1:post:42:11:counter");
    }

    #[test]
    fn aggregate_key_parses_back() {
        let aggr = AggregateKey::parse("activity_aggr:2:like:9:20000").unwrap();
        assert_eq!(aggr.version, 2);
        assert_eq!(aggr.kind.as_str(), "like");
        assert_eq!(aggr.actor, 9);
        assert_eq!(aggr.day, 20000);
        assert!(AggregateKey::parse("activity_aggr:2:like:9").is_err());
        assert!(AggregateKey::parse("activity_feed:1:7").is_err());
        assert_eq!(aggregate_actor("activity_aggr:1:post:42:11"), Some(42));
        assert_eq!(aggregate_actor("garbage"), None);
    }

    #[test]
    fn negative_timestamps_floor() {
        assert_eq!(day_bucket(-1), -1);
        assert_eq!(day_bucket(86_399), 0);
        assert_eq!(day_bucket(86_400), 1);
    }

    #[test]
    fn rejects_separator_in_type() {
        assert!(ActivityKind::new("a:b").is_err());
        assert!(ActivityKind::new("").is_err());
        assert!(ActivityKind::new("new post").is_err());
    }
}
