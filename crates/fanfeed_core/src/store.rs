/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Key-value primitives the feed engine is written against.
//!
//! Two implementations live next to this module: [`crate::redis_store::RedisStore`]
//! for production and [`crate::memory_store::MemoryStore`] for tests. Every
//! error returned here means the store itself is unreachable or broken;
//! optimistic conflicts are reported through [`StoreTx::exec`] returning `false`.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// A write queued inside an optimistic transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Del(String),
    IncrBy(String, i64),
    SAdd(String, String),
    ZAdd { key: String, member: String, score: i64 },
    ZRem(String, String),
}

#[async_trait]
pub trait FeedStore: Send + Sync {
    type Tx: StoreTx;

    async fn hset_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<()>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn del(&self, keys: &[String]) -> Result<()>;

    /// Integer value stored at `key`; text that does not parse is an error.
    async fn get_int(&self, key: &str) -> Result<Option<i64>>;
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// Returns whether the member was newly added.
    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;
    async fn srem(&self, key: &str, member: &str) -> Result<bool>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;
    async fn scard(&self, key: &str) -> Result<u64>;

    /// Returns whether the member was newly added (a re-score returns `false`).
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<bool>;
    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;
    async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>>;
    async fn zcard(&self, key: &str) -> Result<u64>;
    /// Highest scores first, ranks `start..=stop`.
    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, i64)>>;

    /// Snapshot `keys`; the returned transaction fails to commit if any of
    /// them is modified before [`StoreTx::exec`].
    async fn watch(&self, keys: &[String]) -> Result<Self::Tx>;
}

#[async_trait]
pub trait StoreTx: Send {
    async fn get_raw(&mut self, key: &str) -> Result<Option<String>>;
    async fn exists(&mut self, key: &str) -> Result<bool>;
    async fn scard(&mut self, key: &str) -> Result<u64>;
    async fn smembers(&mut self, key: &str) -> Result<Vec<String>>;
    async fn zscore(&mut self, key: &str, member: &str) -> Result<Option<i64>>;
    async fn zrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;
    async fn zrevrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Apply `ops` atomically. `Ok(false)` means a watched key changed and
    /// nothing was applied. An empty batch still checks the watch.
    async fn exec(self, ops: Vec<StoreOp>) -> Result<bool>;
}

/// Resolve Redis-style inclusive rank bounds (negative counts from the end)
/// against a container of `len` elements.
pub(crate) fn rank_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}
