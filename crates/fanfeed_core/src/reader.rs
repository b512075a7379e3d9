/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::aggregate::members as aggregate_members;
use crate::store::FeedStore;
use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub aggregate: String,
    pub score: i64,
    /// Activity ids collapsed into the aggregate, sorted.
    pub members: Vec<String>,
}

/// Newest `limit` entries of a feed. Entries whose aggregate has already been
/// reclaimed are skipped.
pub async fn read_feed<S: FeedStore>(store: &S, feed: &str, limit: usize) -> Result<Vec<FeedItem>> {
    if limit == 0 {
        return Ok(Vec::new());
    }
    let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
    let entries = store.zrevrange_withscores(feed, 0, stop).await?;
    let mut out = Vec::with_capacity(entries.len());
    for (aggregate, score) in entries {
        let mut members = aggregate_members(store, &aggregate).await?;
        if members.is_empty() {
            continue;
        }
        members.sort();
        out.push(FeedItem {
            aggregate,
            score,
            members,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    #[tokio::test]
    async fn newest_first_and_skips_missing() {
        let store = MemoryStore::new();
        store.zadd("feed", "aggr:a", 10).await.unwrap();
        store.zadd("feed", "aggr:b", 20).await.unwrap();
        store.zadd("feed", "aggr:gone", 30).await.unwrap();
        store.sadd("aggr:a", "activity:1:10:post").await.unwrap();
        store.sadd("aggr:b", "activity:1:20:post").await.unwrap();
        store.sadd("aggr:b", "activity:1:19:post").await.unwrap();

        let items = read_feed(&store, "feed", 10).await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].aggregate, "aggr:b");
        assert_eq!(items[0].members, vec!["activity:1:19:post", "activity:1:20:post"]);
        assert_eq!(items[1].score, 10);

        assert_eq!(read_feed(&store, "feed", 1).await.unwrap().len(), 0);
        assert!(read_feed(&store, "feed", 0).await.unwrap().is_empty());
        assert_eq!(read_feed(&store, "feed", usize::MAX).await.unwrap().len(), 2);
        assert_eq!(read_feed(&store, "feed", usize::MAX / 2 + 2).await.unwrap().len(), 2);
    }
}
