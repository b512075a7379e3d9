/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Top-level feed operations.
//!
//! Each operation is a chain of independently committed steps with no
//! rollback. A step that loses an optimistic race is dropped; the next write,
//! trim or redelivery repairs whatever it left behind. Only store failures
//! reach the caller, and every operation is safe to run more than once.

use crate::activity::{self, Activity};
use crate::aggregate::{aggregate_for, remove_member, write_aggregate};
use crate::config::{FeedConfig, UnfollowPolicy};
use crate::feed_writer::{add_to_follower_feed, add_to_profile_feed, WriteOutcome};
use crate::followers;
use crate::gc::collect;
use crate::keys::{
    activity_index_key, aggregate_actor, counter_key, feed_key, profile_key, ActivityKind,
    AggregateKey, UserId,
};
use crate::reader::{read_feed, FeedItem};
use crate::retry::{Deadline, Retry};
use crate::store::{FeedStore, StoreOp, StoreTx};
use crate::trim::trim;
use anyhow::Result;
use futures_util::stream::{self, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug)]
enum FeedTarget {
    Profile,
    Follower(UserId),
}

pub struct FeedEngine<S> {
    store: Arc<S>,
    cfg: FeedConfig,
}

impl<S> Clone for FeedEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cfg: self.cfg.clone(),
        }
    }
}

impl<S: FeedStore> FeedEngine<S> {
    pub fn new(store: Arc<S>, cfg: FeedConfig) -> Self {
        Self { store, cfg }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &FeedConfig {
        &self.cfg
    }

    fn write_retry(&self, deadline: Deadline) -> Retry {
        Retry::new(self.cfg.write_retries, self.cfg.retry_jitter_ms, deadline)
    }

    /// Record an activity and push its aggregate into the actor's profile and
    /// every follower's feed.
    pub async fn new_activity(
        &self,
        actor: UserId,
        timestamp: i64,
        kind: ActivityKind,
    ) -> Result<()> {
        let deadline = self.cfg.deadline();
        let activity = Activity::new(actor, timestamp, kind);
        activity::save(self.store(), &activity).await?;

        let followers = followers::followers(self.store(), actor).await?;
        for &version in &self.cfg.versions {
            let aggr = write_aggregate(self.store(), &activity, version).await?;
            self.deliver(FeedTarget::Profile, &aggr, &activity, deadline)
                .await?;
            self.fan_out(&followers, &aggr, &activity, deadline).await?;
        }

        if deadline.expired() {
            warn!(actor, activity = %activity.id(), "new activity fan-out cut short by deadline");
        } else {
            info!(actor, activity = %activity.id(), followers = followers.len(), "new activity distributed");
        }
        Ok(())
    }

    /// Add `follower` to `target`'s followers and backfill the follower's feed
    /// with everything `target` has posted. Returns `false` when the edge
    /// already existed, in which case nothing else happens.
    pub async fn follow_user(&self, target: UserId, follower: UserId) -> Result<bool> {
        if !followers::add_follower(self.store(), target, follower).await? {
            debug!(target, follower, "already following");
            return Ok(false);
        }

        let deadline = self.cfg.deadline();
        let retry = Retry::new(self.cfg.backfill_retries, self.cfg.retry_jitter_ms, deadline);
        let index_key = activity_index_key(target);
        let mut attempt = 0;
        while retry.allow(attempt).await {
            attempt += 1;
            let mut tx = self.store.watch(&[index_key.clone()]).await?;
            let ids = tx.smembers(&index_key).await?;
            let mut replayed = 0usize;
            for id in &ids {
                if deadline.expired() {
                    break;
                }
                let Some(activity) = activity::load(self.store(), id).await? else {
                    debug!(activity = %id, "backfill skipped missing activity");
                    continue;
                };
                for &version in &self.cfg.versions {
                    let aggr = write_aggregate(self.store(), &activity, version).await?;
                    self.deliver(FeedTarget::Follower(follower), &aggr, &activity, deadline)
                        .await?;
                }
                replayed += 1;
            }
            if deadline.expired() {
                break;
            }
            // Validates that the index did not move while we replayed it.
            if tx.exec(Vec::new()).await? {
                info!(target, follower, replayed, "follow backfilled");
                return Ok(true);
            }
            debug!(target, follower, attempt, "activity index changed during backfill");
        }

        warn!(target, follower, attempts = attempt, "backfill left incomplete");
        Ok(true)
    }

    /// Drop the follow edge and remove `target`'s entries from the follower's
    /// feed, reclaiming aggregates nobody references any more. Returns the
    /// removed feed entries.
    ///
    /// The feed is scanned oldest first. `FirstMatch` looks at the visible
    /// bound and removes the oldest match; `AllMatches` covers the whole trim
    /// window.
    pub async fn unfollow(&self, target: UserId, follower: UserId) -> Result<Vec<String>> {
        followers::remove_follower(self.store(), target, follower).await?;

        let deadline = self.cfg.deadline();
        let scan_end = match self.cfg.unfollow_policy {
            UnfollowPolicy::FirstMatch => self.cfg.max_activities(),
            UnfollowPolicy::AllMatches => self.cfg.trim_window_end(),
        };
        let mut removed_all = Vec::new();
        for &version in &self.cfg.versions {
            let feed = feed_key(version, follower);
            let retry = Retry::new(self.cfg.unfollow_retries, self.cfg.retry_jitter_ms, deadline);
            let mut removed = Vec::new();
            let mut attempt = 0;
            while retry.allow(attempt).await {
                attempt += 1;
                let mut tx = self.store.watch(&[feed.clone()]).await?;
                let entries = tx.zrange(&feed, 0, scan_end).await?;
                let mut matches: Vec<String> = entries
                    .into_iter()
                    .filter(|key| aggregate_actor(key) == Some(target))
                    .collect();
                if self.cfg.unfollow_policy == UnfollowPolicy::FirstMatch {
                    matches.truncate(1);
                }
                if matches.is_empty() {
                    break;
                }

                let mut ops = Vec::with_capacity(matches.len() * 2);
                for key in &matches {
                    ops.push(StoreOp::ZRem(feed.clone(), key.clone()));
                    ops.push(StoreOp::IncrBy(counter_key(key), -1));
                }
                if tx.exec(ops).await? {
                    removed = matches;
                    break;
                }
                debug!(feed = %feed, attempt, "unfollow scan conflict");
            }

            collect(self.store(), &removed).await?;
            removed_all.extend(removed);
        }

        info!(target, follower, removed = removed_all.len(), "unfollowed");
        Ok(removed_all)
    }

    /// Delete an activity. When its aggregate ends up empty, the aggregate is
    /// pulled out of the actor's profile and every current follower's feed.
    pub async fn delete_activity(
        &self,
        actor: UserId,
        timestamp: i64,
        kind: ActivityKind,
    ) -> Result<()> {
        let activity = Activity::new(actor, timestamp, kind);
        let id = activity.id();
        activity::delete(self.store(), &activity).await?;

        let followers = followers::followers(self.store(), actor).await?;
        for &version in &self.cfg.versions {
            let aggr = aggregate_for(&activity, version);
            let aggr_key = aggr.to_string();
            let counter = aggr.counter_key();
            if remove_member(self.store(), &aggr, &id).await? > 0 {
                continue;
            }

            let mut tx = self.store.watch(&[aggr_key.clone(), counter.clone()]).await?;
            if tx.scard(&aggr_key).await? > 0 {
                continue;
            }
            let mut ops = Vec::with_capacity(followers.len() + 2);
            ops.push(StoreOp::Del(counter));
            for &f in &followers {
                ops.push(StoreOp::ZRem(feed_key(version, f), aggr_key.clone()));
            }
            ops.push(StoreOp::ZRem(profile_key(version, actor), aggr_key.clone()));
            if tx.exec(ops).await? {
                info!(aggregate = %aggr_key, feeds = followers.len() + 1, "empty aggregate withdrawn");
            } else {
                debug!(aggregate = %aggr_key, "aggregate changed, withdrawal skipped");
            }
        }

        info!(actor, activity = %id, "activity deleted");
        Ok(())
    }

    pub async fn read_feed(&self, follower: UserId, version: u32, limit: usize) -> Result<Vec<FeedItem>> {
        read_feed(self.store(), &feed_key(version, follower), limit).await
    }

    pub async fn read_profile(&self, actor: UserId, version: u32, limit: usize) -> Result<Vec<FeedItem>> {
        read_feed(self.store(), &profile_key(version, actor), limit).await
    }

    pub async fn followers(&self, user: UserId) -> Result<Vec<UserId>> {
        followers::followers(self.store(), user).await
    }

    async fn fan_out(
        &self,
        followers: &[UserId],
        aggr: &AggregateKey,
        activity: &Activity,
        deadline: Deadline,
    ) -> Result<()> {
        stream::iter(followers.iter().copied().map(Ok::<UserId, anyhow::Error>))
            .try_for_each_concurrent(self.cfg.fanout_concurrency.max(1), move |follower| {
                self.deliver(FeedTarget::Follower(follower), aggr, activity, deadline)
            })
            .await
    }

    /// Write, trim, collect for one feed, in that order.
    async fn deliver(
        &self,
        target: FeedTarget,
        aggr: &AggregateKey,
        activity: &Activity,
        deadline: Deadline,
    ) -> Result<()> {
        if deadline.expired() {
            return Ok(());
        }
        let member = activity.id();
        let retry = self.write_retry(deadline);
        let score = activity.timestamp;
        let (feed, outcome) = match target {
            FeedTarget::Profile => (
                profile_key(aggr.version, aggr.actor),
                add_to_profile_feed(self.store(), aggr, &member, score, retry).await?,
            ),
            FeedTarget::Follower(follower) => (
                feed_key(aggr.version, follower),
                add_to_follower_feed(self.store(), follower, aggr, &member, score, retry).await?,
            ),
        };
        if matches!(outcome, WriteOutcome::GaveUp | WriteOutcome::Missing) {
            return Ok(());
        }
        let evicted = trim(self.store(), &feed, &self.cfg).await?;
        if !evicted.is_empty() {
            collect(self.store(), &evicted).await?;
        }
        Ok(())
    }
}
