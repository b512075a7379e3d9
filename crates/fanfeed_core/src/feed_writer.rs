/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::keys::{feed_key, profile_key, AggregateKey, UserId};
use crate::retry::Retry;
use crate::store::{FeedStore, StoreOp, StoreTx};
use anyhow::Result;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// New feed entry; the aggregate's counter went up by one.
    Inserted,
    /// Entry already present; only its score may have moved.
    Rescored,
    /// Every attempt hit a concurrent counter change. Nothing was written.
    GaveUp,
    /// The activity record is gone; nothing to deliver.
    Missing,
}

/// Put `aggr` into the sorted feed at `feed`, keeping the highest score seen,
/// and count the new reference on the aggregate's counter.
///
/// The counter, the aggregate and the activity record are watched; `member`
/// is re-added to the aggregate inside the same transaction so a concurrent
/// reclamation cannot leave the entry pointing at nothing. A member whose
/// record has been deleted is never written back.
pub async fn write_to_feed<S: FeedStore>(
    store: &S,
    feed: &str,
    aggr: &AggregateKey,
    member: &str,
    score: i64,
    retry: Retry,
) -> Result<WriteOutcome> {
    let aggr_key = aggr.to_string();
    let counter = aggr.counter_key();
    let watched = [counter.clone(), aggr_key.clone(), member.to_string()];

    let mut attempt = 0;
    while retry.allow(attempt).await {
        attempt += 1;
        let mut tx = store.watch(&watched).await?;
        if !tx.exists(member).await? {
            debug!(feed, activity = %member, "activity gone, feed write skipped");
            return Ok(WriteOutcome::Missing);
        }
        let existing = tx.zscore(feed, &aggr_key).await?;
        let mut ops = vec![
            StoreOp::ZAdd {
                key: feed.to_string(),
                member: aggr_key.clone(),
                score: existing.map_or(score, |old| old.max(score)),
            },
            StoreOp::SAdd(aggr_key.clone(), member.to_string()),
        ];
        if existing.is_none() {
            ops.push(StoreOp::IncrBy(counter.clone(), 1));
        }
        if tx.exec(ops).await? {
            return Ok(if existing.is_none() {
                WriteOutcome::Inserted
            } else {
                WriteOutcome::Rescored
            });
        }
        debug!(feed, aggregate = %aggr_key, attempt, "feed write conflict");
    }

    warn!(feed, aggregate = %aggr_key, attempts = attempt, "feed write gave up");
    Ok(WriteOutcome::GaveUp)
}

pub async fn add_to_follower_feed<S: FeedStore>(
    store: &S,
    follower: UserId,
    aggr: &AggregateKey,
    member: &str,
    score: i64,
    retry: Retry,
) -> Result<WriteOutcome> {
    write_to_feed(store, &feed_key(aggr.version, follower), aggr, member, score, retry).await
}

pub async fn add_to_profile_feed<S: FeedStore>(
    store: &S,
    aggr: &AggregateKey,
    member: &str,
    score: i64,
    retry: Retry,
) -> Result<WriteOutcome> {
    write_to_feed(store, &profile_key(aggr.version, aggr.actor), aggr, member, score, retry).await
}
