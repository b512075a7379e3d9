/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::keys::counter_key;
use crate::store::{FeedStore, StoreOp, StoreTx};
use anyhow::Result;
use tracing::{debug, info, warn};

/// Reclaim every aggregate in `keys` whose reference counter is at or below
/// zero. Returns the aggregates actually deleted.
///
/// Each key is checked under its own watch. A conflict means the counter or
/// the aggregate moved underneath us, so the key is skipped and left for the
/// next trim to re-evaluate.
pub async fn collect<S: FeedStore>(store: &S, keys: &[String]) -> Result<Vec<String>> {
    let mut reclaimed = Vec::new();
    for key in keys {
        let counter = counter_key(key);
        let mut tx = store.watch(&[key.clone(), counter.clone()]).await?;
        let refs = match tx.get_raw(&counter).await? {
            None => 0,
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(n) => n,
                Err(_) => {
                    warn!(aggregate = %key, value = %raw, "unreadable reference counter");
                    continue;
                }
            },
        };
        if refs > 0 {
            continue;
        }
        if tx
            .exec(vec![StoreOp::Del(key.clone()), StoreOp::Del(counter)])
            .await?
        {
            reclaimed.push(key.clone());
        } else {
            debug!(aggregate = %key, "gc skipped on conflict");
        }
    }
    if !reclaimed.is_empty() {
        info!(reclaimed = reclaimed.len(), "gc reclaimed aggregates");
    }
    Ok(reclaimed)
}
