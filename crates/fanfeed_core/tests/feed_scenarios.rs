/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use fanfeed_core::keys::DAY_SECS;
use fanfeed_core::{ActivityKind, FeedConfig, FeedEngine, FeedStore, MemoryStore, UnfollowPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;

fn engine_with(cfg: FeedConfig) -> FeedEngine<MemoryStore> {
    FeedEngine::new(Arc::new(MemoryStore::new()), cfg)
}

fn engine() -> FeedEngine<MemoryStore> {
    engine_with(FeedConfig {
        retry_jitter_ms: 0,
        ..FeedConfig::default()
    })
}

fn kind(label: &str) -> ActivityKind {
    ActivityKind::new(label).unwrap()
}

async fn all_feeds(store: &MemoryStore) -> Vec<String> {
    let mut feeds = store.keys_with_prefix("activity_feed:").await;
    feeds.extend(store.keys_with_prefix("activity_profile:").await);
    feeds
}

async fn entries(store: &MemoryStore, feed: &str) -> Vec<(String, i64)> {
    store.zrevrange_withscores(feed, 0, -1).await.unwrap()
}

/// Every counter equals the number of feed entries naming its aggregate.
async fn assert_refcounts(store: &MemoryStore) {
    let mut refs: BTreeMap<String, i64> = BTreeMap::new();
    for feed in all_feeds(store).await {
        for (aggr, _) in entries(store, &feed).await {
            *refs.entry(aggr).or_default() += 1;
        }
    }
    for key in store.keys_with_prefix("activity_aggr:").await {
        if let Some(aggr) = key.strip_suffix(":counter") {
            refs.entry(aggr.to_string()).or_default();
        }
    }
    for (aggr, expected) in refs {
        let counter = store
            .get_int(&format!("{aggr}:counter"))
            .await
            .unwrap()
            .unwrap_or(0);
        assert_eq!(counter, expected, "reference count of {aggr}");
    }
}

/// No feed entry names an aggregate that has been reclaimed.
async fn assert_no_dangling(store: &MemoryStore) {
    for feed in all_feeds(store).await {
        for (aggr, _) in entries(store, &feed).await {
            assert!(
                store.scard(&aggr).await.unwrap() > 0,
                "{feed} references missing {aggr}"
            );
        }
    }
}

#[tokio::test]
async fn post_follow_unfollow_and_reclaim() {
    let engine = engine();
    let store = engine.store();
    let aggr = "activity_aggr:1:post:42:11";
    let counter = "activity_aggr:1:post:42:11:counter";

    engine.new_activity(42, 1_000_000, kind("post")).await.unwrap();
    assert_eq!(
        store.smembers(aggr).await.unwrap(),
        vec!["activity:42:1000000:post"]
    );
    assert_eq!(store.get_int(counter).await.unwrap(), Some(1));

    assert!(engine.follow_user(42, 7).await.unwrap());
    assert_eq!(
        store.zscore("activity_feed:1:7", aggr).await.unwrap(),
        Some(1_000_000)
    );
    assert_eq!(store.get_int(counter).await.unwrap(), Some(2));

    let removed = engine.unfollow(42, 7).await.unwrap();
    assert_eq!(removed, vec![aggr.to_string()]);
    assert_eq!(store.zcard("activity_feed:1:7").await.unwrap(), 0);
    assert_eq!(store.get_int(counter).await.unwrap(), Some(1));
    assert!(engine.followers(42).await.unwrap().is_empty());

    // Ten newer days push the aggregate out of the profile, dropping its
    // last reference.
    for day in 1..=10 {
        engine
            .new_activity(42, 1_000_000 + day * DAY_SECS, kind("post"))
            .await
            .unwrap();
    }
    assert!(!store.exists(aggr).await);
    assert!(!store.exists(counter).await);
    assert_eq!(store.zcard("activity_profile:1:42").await.unwrap(), 10);
    assert_refcounts(store).await;
}

#[tokio::test]
async fn same_day_activities_share_one_entry() {
    let engine = engine();
    engine.follow_user(42, 7).await.unwrap();
    let base = 11 * DAY_SECS;
    for i in 0..15 {
        engine.new_activity(42, base + i * 60, kind("post")).await.unwrap();
    }

    let store = engine.store();
    let aggr = "activity_aggr:1:post:42:11";
    assert_eq!(store.scard(aggr).await.unwrap(), 15);
    assert_eq!(
        entries(store, "activity_feed:1:7").await,
        vec![(aggr.to_string(), base + 14 * 60)]
    );
    assert_eq!(store.get_int(&format!("{aggr}:counter")).await.unwrap(), Some(2));

    let items = engine.read_feed(7, 1, 10).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].members.len(), 15);
}

#[tokio::test]
async fn feeds_stay_bounded_and_evictions_are_reclaimed() {
    let engine = engine();
    engine.follow_user(1, 2).await.unwrap();
    let store = engine.store();
    for day in 0..25 {
        engine
            .new_activity(1, day * DAY_SECS + 5, kind("post"))
            .await
            .unwrap();
        assert!(store.zcard("activity_feed:1:2").await.unwrap() <= 10);
        assert!(store.zcard("activity_profile:1:1").await.unwrap() <= 10);
    }

    let feed = entries(store, "activity_feed:1:2").await;
    assert_eq!(feed.len(), 10);
    assert_eq!(feed[0].1, 24 * DAY_SECS + 5);
    assert_eq!(feed[9].1, 15 * DAY_SECS + 5);

    let live: Vec<_> = store
        .keys_with_prefix("activity_aggr:")
        .await
        .into_iter()
        .filter(|k| !k.ends_with(":counter"))
        .collect();
    assert_eq!(live.len(), 10);
    assert_refcounts(store).await;
    assert_no_dangling(store).await;
}

#[tokio::test]
async fn new_activity_is_idempotent() {
    let engine = engine();
    engine.follow_user(3, 4).await.unwrap();
    engine.new_activity(3, 500_000, kind("like")).await.unwrap();
    let once = engine.store().dump().await;

    engine.new_activity(3, 500_000, kind("like")).await.unwrap();
    assert_eq!(engine.store().dump().await, once);
}

#[tokio::test]
async fn follow_backfills_what_the_profile_holds() {
    let engine = engine();
    for i in 0..15i64 {
        let day = 20 + i / 2;
        let label = if i % 3 == 0 { "like" } else { "post" };
        engine
            .new_activity(5, day * DAY_SECS + i * 100, kind(label))
            .await
            .unwrap();
    }
    assert!(engine.follow_user(5, 9).await.unwrap());

    let store = engine.store();
    let profile = entries(store, "activity_profile:1:5").await;
    assert_eq!(profile.len(), 10);
    assert_eq!(entries(store, "activity_feed:1:9").await, profile);
    assert_refcounts(store).await;
    assert_no_dangling(store).await;
}

#[tokio::test]
async fn deleting_the_last_member_withdraws_the_aggregate() {
    let engine = engine();
    engine.follow_user(3, 4).await.unwrap();
    engine.new_activity(3, 100, kind("post")).await.unwrap();
    engine.new_activity(3, 200, kind("post")).await.unwrap();
    let store = engine.store();
    let aggr = "activity_aggr:1:post:3:0";

    engine.delete_activity(3, 100, kind("post")).await.unwrap();
    assert!(!store.exists("activity:3:100:post").await);
    assert_eq!(store.smembers(aggr).await.unwrap(), vec!["activity:3:200:post"]);
    assert_eq!(store.zcard("activity_feed:1:4").await.unwrap(), 1);

    engine.delete_activity(3, 200, kind("post")).await.unwrap();
    assert!(!store.exists(aggr).await);
    assert!(!store.exists(&format!("{aggr}:counter")).await);
    assert_eq!(store.zcard("activity_feed:1:4").await.unwrap(), 0);
    assert_eq!(store.zcard("activity_profile:1:3").await.unwrap(), 0);
    assert!(store.smembers("activities:3").await.unwrap().is_empty());

    // A repeat is harmless.
    engine.delete_activity(3, 200, kind("post")).await.unwrap();
    assert_refcounts(store).await;
}

#[tokio::test]
async fn unfollow_policies() {
    for (policy, expected_left) in [(UnfollowPolicy::FirstMatch, 3), (UnfollowPolicy::AllMatches, 1)] {
        let engine = engine_with(FeedConfig {
            retry_jitter_ms: 0,
            unfollow_policy: policy,
            ..FeedConfig::default()
        });
        engine.follow_user(1, 2).await.unwrap();
        engine.follow_user(6, 2).await.unwrap();
        for day in 0..3 {
            engine
                .new_activity(1, day * DAY_SECS + 10, kind("post"))
                .await
                .unwrap();
        }
        engine.new_activity(6, 50, kind("post")).await.unwrap();

        let removed = engine.unfollow(1, 2).await.unwrap();
        let store = engine.store();
        assert_eq!(store.zcard("activity_feed:1:2").await.unwrap(), expected_left);
        assert_eq!(removed.len() as u64, 4 - expected_left);
        if policy == UnfollowPolicy::FirstMatch {
            // Oldest entry of the unfollowed actor goes first.
            assert_eq!(removed, vec!["activity_aggr:1:post:1:0".to_string()]);
        }
        assert!(store
            .zscore("activity_feed:1:2", "activity_aggr:1:post:6:0")
            .await
            .unwrap()
            .is_some());
        assert_refcounts(store).await;
    }
}

#[tokio::test]
async fn unfollow_without_entries_only_drops_the_edge() {
    let engine = engine();
    engine.follow_user(1, 2).await.unwrap();
    assert!(engine.unfollow(1, 2).await.unwrap().is_empty());
    assert!(engine.unfollow(1, 2).await.unwrap().is_empty());
    assert!(engine.followers(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn every_configured_version_gets_its_own_feed() {
    let engine = engine_with(FeedConfig {
        versions: vec![1, 2],
        retry_jitter_ms: 0,
        ..FeedConfig::default()
    });
    engine.follow_user(42, 7).await.unwrap();
    engine.new_activity(42, 1_000_000, kind("post")).await.unwrap();

    for version in [1u32, 2] {
        let items = engine.read_feed(7, version, 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0].aggregate,
            format!("activity_aggr:{version}:post:42:11")
        );
        assert_eq!(engine.read_profile(42, version, 10).await.unwrap(), items);
    }
    assert_refcounts(engine.store()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_traffic_keeps_references_consistent() {
    let engine = engine_with(FeedConfig {
        retry_jitter_ms: 1,
        ..FeedConfig::default()
    });

    let mut handles = Vec::new();
    for actor in 1..=3u64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for day in 0..12i64 {
                let label = if day % 2 == 0 { "post" } else { "like" };
                engine
                    .new_activity(actor, (day / 3) * DAY_SECS + day * 10 + actor as i64, kind(label))
                    .await
                    .unwrap();
            }
        }));
    }
    for follower in 10..=13u64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            for actor in 1..=3u64 {
                engine.follow_user(actor, follower).await.unwrap();
            }
            engine.unfollow(2, follower).await.unwrap();
            if follower % 2 == 0 {
                engine.follow_user(2, follower).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let store = engine.store();
    // Settle: trims that lost a race during the burst run again now.
    for feed in all_feeds(store).await {
        for _ in 0..5 {
            if store.zcard(&feed).await.unwrap() <= 10 {
                break;
            }
            let evicted = fanfeed_core::trim::trim(store, &feed, engine.config())
                .await
                .unwrap();
            fanfeed_core::gc::collect(store, &evicted).await.unwrap();
        }
        assert!(store.zcard(&feed).await.unwrap() <= 10, "{feed} unbounded");
    }
    assert_refcounts(store).await;
    assert_no_dangling(store).await;
}
