/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::FeedConfig;
use crate::keys::counter_key;
use crate::store::{FeedStore, StoreOp, StoreTx};
use anyhow::Result;
use tracing::{debug, info};

/// Evict the entries ranked past the visible bound (up to the tolerance
/// window) and drop one reference from each evicted aggregate.
///
/// A concurrent change to the feed abandons the pass and returns nothing;
/// the next write to the feed triggers another trim.
pub async fn trim<S: FeedStore>(store: &S, feed: &str, cfg: &FeedConfig) -> Result<Vec<String>> {
    let mut tx = store.watch(&[feed.to_string()]).await?;
    let evicted = tx
        .zrevrange(feed, cfg.max_activities(), cfg.trim_window_end())
        .await?;
    if evicted.is_empty() {
        return Ok(evicted);
    }

    let mut ops = Vec::with_capacity(evicted.len() * 2);
    for aggr in &evicted {
        ops.push(StoreOp::ZRem(feed.to_string(), aggr.clone()));
        ops.push(StoreOp::IncrBy(counter_key(aggr), -1));
    }
    if !tx.exec(ops).await? {
        debug!(feed, "trim abandoned on conflict");
        return Ok(Vec::new());
    }

    info!(feed, removed = evicted.len(), "trimmed feed");
    Ok(evicted)
}
