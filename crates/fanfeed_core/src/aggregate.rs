/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::activity::Activity;
use crate::keys::AggregateKey;
use crate::store::FeedStore;
use anyhow::Result;
use tracing::debug;

/// Aggregate an activity belongs to for `version`. Pure: every worker derives
/// the same key without coordination.
pub fn aggregate_for(activity: &Activity, version: u32) -> AggregateKey {
    AggregateKey::new(version, activity.kind.clone(), activity.actor, activity.timestamp)
}

/// Add the activity to its day bucket and return the bucket's key.
pub async fn write_aggregate<S: FeedStore>(
    store: &S,
    activity: &Activity,
    version: u32,
) -> Result<AggregateKey> {
    let aggr = aggregate_for(activity, version);
    let added = store.sadd(&aggr.to_string(), &activity.id()).await?;
    debug!(aggregate = %aggr, added, "aggregate written");
    Ok(aggr)
}

/// Drop one activity from its aggregate; returns how many members remain.
pub async fn remove_member<S: FeedStore>(
    store: &S,
    aggr: &AggregateKey,
    activity_id: &str,
) -> Result<u64> {
    let key = aggr.to_string();
    store.srem(&key, activity_id).await?;
    store.scard(&key).await
}

pub async fn members<S: FeedStore>(store: &S, aggr: &str) -> Result<Vec<String>> {
    store.smembers(aggr).await
}

/// Current reference count; a missing counter counts as zero.
pub async fn reference_count<S: FeedStore>(store: &S, aggr: &AggregateKey) -> Result<i64> {
    Ok(store.get_int(&aggr.counter_key()).await?.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::ActivityKind;
    use crate::memory_store::MemoryStore;

    #[tokio::test]
    async fn same_day_collapses() {
        let store = MemoryStore::new();
        let kind = ActivityKind::new("post").unwrap();
        let a = Activity::new(42, 1_000_000, kind.clone());
        let b = Activity::new(42, 1_000_500, kind.clone());
        let c = Activity::new(42, 1_000_000 + 86_400, kind);

        let ka = write_aggregate(&store, &a, 1).await.unwrap();
        let kb = write_aggregate(&store, &b, 1).await.unwrap();
        let kc = write_aggregate(&store, &c, 1).await.unwrap();
        assert_eq!(ka, kb);
        assert_ne!(ka, kc);
        assert_eq!(members(&store, &ka.to_string()).await.unwrap().len(), 2);

        assert_eq!(remove_member(&store, &ka, &a.id()).await.unwrap(), 1);
        assert_eq!(remove_member(&store, &ka, &b.id()).await.unwrap(), 0);
        assert_eq!(reference_count(&store, &ka).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn versions_are_separate_aggregates() {
        let store = MemoryStore::new();
        let a = Activity::new(1, 10, ActivityKind::new("like").unwrap());
        let v1 = write_aggregate(&store, &a, 1).await.unwrap();
        let v2 = write_aggregate(&store, &a, 2).await.unwrap();
        assert_eq!(v1.to_string(), "activity_aggr:1:like:1:0");
        assert_eq!(v2.to_string(), "activity_aggr:2:like:1:0");
    }
}
