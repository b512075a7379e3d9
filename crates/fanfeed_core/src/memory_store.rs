/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Process-local [`FeedStore`] with Redis semantics, used by tests and
//! local tooling. Every key carries a modification version so `watch` behaves
//! like Redis `WATCH`: any write to a watched key, including delete and
//! re-create, aborts the transaction.

use crate::store::{rank_bounds, FeedStore, StoreOp, StoreTx};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    Set(BTreeSet<String>),
    ZSet(HashMap<String, i64>),
}

#[derive(Default)]
struct State {
    data: HashMap<String, Value>,
    versions: HashMap<String, u64>,
    clock: u64,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    offline: AtomicBool,
    forced_conflicts: AtomicU32,
    commits: AtomicU64,
    conflicts: AtomicU64,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails the way a dropped connection would.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, Ordering::SeqCst);
    }

    /// Make the next `n` transaction commits report a conflict.
    pub fn force_conflicts(&self, n: u32) {
        self.shared.forced_conflicts.store(n, Ordering::SeqCst);
    }

    pub fn commits(&self) -> u64 {
        self.shared.commits.load(Ordering::SeqCst)
    }

    pub fn conflicts(&self) -> u64 {
        self.shared.conflicts.load(Ordering::SeqCst)
    }

    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let state = self.shared.state.lock().await;
        let mut keys: Vec<String> = state
            .data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Every key with a deterministic rendering of its value.
    pub async fn dump(&self) -> BTreeMap<String, String> {
        let state = self.shared.state.lock().await;
        state
            .data
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::Str(v) => v.clone(),
                    Value::Hash(h) => format!("{:?}", h.iter().collect::<BTreeMap<_, _>>()),
                    Value::Set(s) => format!("{s:?}"),
                    Value::ZSet(z) => {
                        let mut items: Vec<_> = z.iter().collect();
                        items.sort();
                        format!("{items:?}")
                    }
                };
                (key.clone(), rendered)
            })
            .collect()
    }

    /// Plain `SET`, for seeding odd values in tests.
    pub async fn set_raw(&self, key: &str, value: &str) {
        let mut state = self.shared.state.lock().await;
        state.data.insert(key.to_string(), Value::Str(value.to_string()));
        state.touch(key);
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.shared.state.lock().await.data.contains_key(key)
    }

    fn check_online(&self) -> Result<()> {
        if self.shared.offline.load(Ordering::SeqCst) {
            bail!("memory store offline: connection refused");
        }
        Ok(())
    }
}

impl State {
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        self.versions.insert(key.to_string(), self.clock);
    }

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn wrong_type(key: &str) -> anyhow::Error {
        anyhow::anyhow!("WRONGTYPE operation against key {key} holding the wrong kind of value")
    }

    fn get_raw(&self, key: &str) -> Result<Option<String>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::Str(v)) => Ok(Some(v.clone())),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn set(&self, key: &str) -> Result<Option<&BTreeSet<String>>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::Set(s)) => Ok(Some(s)),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn zset(&self, key: &str) -> Result<Option<&HashMap<String, i64>>> {
        match self.data.get(key) {
            None => Ok(None),
            Some(Value::ZSet(z)) => Ok(Some(z)),
            Some(_) => Err(Self::wrong_type(key)),
        }
    }

    fn del(&mut self, key: &str) -> bool {
        if self.data.remove(key).is_some() {
            self.touch(key);
            return true;
        }
        false
    }

    fn incr_by(&mut self, key: &str, delta: i64) -> Result<i64> {
        let current = match self.get_raw(key)? {
            Some(raw) => raw
                .parse::<i64>()
                .with_context(|| format!("value at {key} is not an integer"))?,
            None => 0,
        };
        let next = current.saturating_add(delta);
        self.data.insert(key.to_string(), Value::Str(next.to_string()));
        self.touch(key);
        Ok(next)
    }

    fn sadd(&mut self, key: &str, member: &str) -> Result<bool> {
        let entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(BTreeSet::new()));
        let Value::Set(set) = entry else {
            return Err(Self::wrong_type(key));
        };
        let added = set.insert(member.to_string());
        if added {
            self.touch(key);
        }
        Ok(added)
    }

    fn srem(&mut self, key: &str, member: &str) -> Result<bool> {
        let Some(value) = self.data.get_mut(key) else {
            return Ok(false);
        };
        let Value::Set(set) = value else {
            return Err(Self::wrong_type(key));
        };
        let removed = set.remove(member);
        let empty = set.is_empty();
        if empty {
            self.data.remove(key);
        }
        if removed {
            self.touch(key);
        }
        Ok(removed)
    }

    fn zadd(&mut self, key: &str, member: &str, score: i64) -> Result<bool> {
        let entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::ZSet(HashMap::new()));
        let Value::ZSet(zset) = entry else {
            return Err(Self::wrong_type(key));
        };
        let previous = zset.insert(member.to_string(), score);
        if previous != Some(score) {
            self.touch(key);
        }
        Ok(previous.is_none())
    }

    fn zrem(&mut self, key: &str, member: &str) -> Result<bool> {
        let Some(value) = self.data.get_mut(key) else {
            return Ok(false);
        };
        let Value::ZSet(zset) = value else {
            return Err(Self::wrong_type(key));
        };
        let removed = zset.remove(member).is_some();
        let empty = zset.is_empty();
        if empty {
            self.data.remove(key);
        }
        if removed {
            self.touch(key);
        }
        Ok(removed)
    }

    /// Ascending by score, ties broken by member.
    fn zsorted(&self, key: &str) -> Result<Vec<(String, i64)>> {
        let Some(zset) = self.zset(key)? else {
            return Ok(Vec::new());
        };
        let mut items: Vec<(String, i64)> = zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
        items.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok(items)
    }

    fn zrange(&self, key: &str, start: isize, stop: isize, rev: bool) -> Result<Vec<(String, i64)>> {
        let mut items = self.zsorted(key)?;
        if rev {
            items.reverse();
        }
        let Some((from, to)) = rank_bounds(items.len(), start, stop) else {
            return Ok(Vec::new());
        };
        Ok(items[from..=to].to_vec())
    }

    fn apply(&mut self, op: StoreOp) -> Result<()> {
        match op {
            StoreOp::Del(key) => {
                self.del(&key);
            }
            StoreOp::IncrBy(key, delta) => {
                self.incr_by(&key, delta)?;
            }
            StoreOp::SAdd(key, member) => {
                self.sadd(&key, &member)?;
            }
            StoreOp::ZAdd { key, member, score } => {
                self.zadd(&key, &member, score)?;
            }
            StoreOp::ZRem(key, member) => {
                self.zrem(&key, &member)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl FeedStore for MemoryStore {
    type Tx = MemoryTx;

    async fn hset_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        self.check_online()?;
        let mut state = self.shared.state.lock().await;
        let entry = state
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()));
        let Value::Hash(hash) = entry else {
            return Err(State::wrong_type(key));
        };
        let mut changed = false;
        for (field, value) in fields {
            if hash.insert((*field).to_string(), value.clone()).as_ref() != Some(value) {
                changed = true;
            }
        }
        if changed {
            state.touch(key);
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.check_online()?;
        let state = self.shared.state.lock().await;
        match state.data.get(key) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(State::wrong_type(key)),
        }
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        self.check_online()?;
        let mut state = self.shared.state.lock().await;
        for key in keys {
            state.del(key);
        }
        Ok(())
    }

    async fn get_int(&self, key: &str) -> Result<Option<i64>> {
        self.check_online()?;
        let state = self.shared.state.lock().await;
        state
            .get_raw(key)?
            .map(|raw| raw.parse::<i64>().with_context(|| format!("value at {key} is not an integer")))
            .transpose()
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        self.check_online()?;
        self.shared.state.lock().await.incr_by(key, delta)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        self.check_online()?;
        self.shared.state.lock().await.sadd(key, member)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        self.check_online()?;
        self.shared.state.lock().await.srem(key, member)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check_online()?;
        let state = self.shared.state.lock().await;
        Ok(state
            .set(key)?
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        self.check_online()?;
        let state = self.shared.state.lock().await;
        Ok(state.set(key)?.map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<bool> {
        self.check_online()?;
        self.shared.state.lock().await.zadd(key, member, score)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        self.check_online()?;
        self.shared.state.lock().await.zrem(key, member)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>> {
        self.check_online()?;
        let state = self.shared.state.lock().await;
        Ok(state.zset(key)?.and_then(|z| z.get(member).copied()))
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        self.check_online()?;
        let state = self.shared.state.lock().await;
        Ok(state.zset(key)?.map(|z| z.len() as u64).unwrap_or(0))
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, i64)>> {
        self.check_online()?;
        self.shared.state.lock().await.zrange(key, start, stop, true)
    }

    async fn watch(&self, keys: &[String]) -> Result<MemoryTx> {
        self.check_online()?;
        let state = self.shared.state.lock().await;
        let watched = keys.iter().map(|k| (k.clone(), state.version(k))).collect();
        Ok(MemoryTx {
            store: self.clone(),
            watched,
        })
    }
}

pub struct MemoryTx {
    store: MemoryStore,
    watched: Vec<(String, u64)>,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_raw(&mut self, key: &str) -> Result<Option<String>> {
        self.store.check_online()?;
        self.store.shared.state.lock().await.get_raw(key)
    }

    async fn exists(&mut self, key: &str) -> Result<bool> {
        self.store.check_online()?;
        Ok(self.store.shared.state.lock().await.data.contains_key(key))
    }

    async fn scard(&mut self, key: &str) -> Result<u64> {
        self.store.scard(key).await
    }

    async fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        self.store.smembers(key).await
    }

    async fn zscore(&mut self, key: &str, member: &str) -> Result<Option<i64>> {
        self.store.zscore(key, member).await
    }

    async fn zrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.store.check_online()?;
        let state = self.store.shared.state.lock().await;
        Ok(state
            .zrange(key, start, stop, false)?
            .into_iter()
            .map(|(m, _)| m)
            .collect())
    }

    async fn zrevrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.store.check_online()?;
        let state = self.store.shared.state.lock().await;
        Ok(state
            .zrange(key, start, stop, true)?
            .into_iter()
            .map(|(m, _)| m)
            .collect())
    }

    async fn exec(self, ops: Vec<StoreOp>) -> Result<bool> {
        self.store.check_online()?;
        let shared = &self.store.shared;
        let mut state = shared.state.lock().await;
        let forced = shared
            .forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let stale = self
            .watched
            .iter()
            .any(|(key, version)| state.version(key) != *version);
        if forced || stale {
            shared.conflicts.fetch_add(1, Ordering::SeqCst);
            return Ok(false);
        }
        // Redis applies the remaining commands of a MULTI even if one fails;
        // type errors here indicate a corrupted keyspace, so surface them.
        for op in ops {
            state.apply(op)?;
        }
        shared.commits.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watch_detects_concurrent_write() {
        let store = MemoryStore::new();
        store.incr_by("c", 1).await.unwrap();

        let tx = store.watch(&["c".to_string()]).await.unwrap();
        store.incr_by("c", 1).await.unwrap();
        assert!(!tx.exec(vec![StoreOp::IncrBy("c".into(), 10)]).await.unwrap());
        assert_eq!(store.get_int("c").await.unwrap(), Some(2));

        let tx = store.watch(&["c".to_string()]).await.unwrap();
        assert!(tx.exec(vec![StoreOp::IncrBy("c".into(), 10)]).await.unwrap());
        assert_eq!(store.get_int("c").await.unwrap(), Some(12));
    }

    #[tokio::test]
    async fn delete_and_recreate_still_conflicts() {
        let store = MemoryStore::new();
        store.sadd("s", "a").await.unwrap();
        let tx = store.watch(&["s".to_string()]).await.unwrap();
        store.srem("s", "a").await.unwrap();
        store.sadd("s", "a").await.unwrap();
        assert!(!tx.exec(Vec::new()).await.unwrap());
    }

    #[tokio::test]
    async fn noop_writes_do_not_invalidate_watch() {
        let store = MemoryStore::new();
        store.zadd("z", "m", 5).await.unwrap();
        let tx = store.watch(&["z".to_string(), "missing".to_string()]).await.unwrap();
        assert!(!store.zadd("z", "m", 5).await.unwrap());
        store.del(&["missing".to_string()]).await.unwrap();
        store.srem("missing", "x").await.unwrap();
        assert!(tx.exec(Vec::new()).await.unwrap());
    }

    #[tokio::test]
    async fn empty_containers_vanish() {
        let store = MemoryStore::new();
        store.zadd("z", "m", 1).await.unwrap();
        store.zrem("z", "m").await.unwrap();
        store.sadd("s", "m").await.unwrap();
        store.srem("s", "m").await.unwrap();
        assert!(!store.exists("z").await);
        assert!(!store.exists("s").await);
    }

    #[tokio::test]
    async fn ranges_order_by_score_then_member() {
        let store = MemoryStore::new();
        store.zadd("z", "b", 10).await.unwrap();
        store.zadd("z", "a", 10).await.unwrap();
        store.zadd("z", "c", 30).await.unwrap();
        store.zadd("z", "d", 20).await.unwrap();
        let rev = store.zrevrange_withscores("z", 0, -1).await.unwrap();
        let members: Vec<_> = rev.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(members, ["c", "d", "b", "a"]);

        let mut tx = store.watch(&[]).await.unwrap();
        assert_eq!(tx.zrange("z", 0, 1).await.unwrap(), ["a", "b"]);
        assert_eq!(tx.zrevrange("z", 1, 2).await.unwrap(), ["d", "b"]);
    }

    #[tokio::test]
    async fn forced_conflicts_and_offline() {
        let store = MemoryStore::new();
        store.force_conflicts(1);
        let tx = store.watch(&[]).await.unwrap();
        assert!(!tx.exec(Vec::new()).await.unwrap());
        let tx = store.watch(&[]).await.unwrap();
        assert!(tx.exec(Vec::new()).await.unwrap());
        assert_eq!(store.conflicts(), 1);
        assert_eq!(store.commits(), 1);

        store.set_offline(true);
        assert!(store.scard("s").await.is_err());
        store.set_offline(false);
        assert_eq!(store.scard("s").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn text_counter_is_rejected() {
        let store = MemoryStore::new();
        store
            .hset_fields("h", &[("a", "1".to_string())])
            .await
            .unwrap();
        assert!(store.get_int("h").await.is_err());
        assert_eq!(store.hgetall("h").await.unwrap()["a"], "1");
    }
}
