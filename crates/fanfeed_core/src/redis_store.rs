/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::store::{FeedStore, StoreOp, StoreTx};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// [`FeedStore`] backed by a Redis server.
///
/// Plain commands are spread round-robin over a small pool of
/// `ConnectionManager`s. `WATCH` state belongs to a connection, so each
/// transaction holds a dedicated connection from a second pool, capped at the
/// same size, and hands it back when done.
pub struct RedisStore {
    client: redis::Client,
    pool: Vec<Mutex<ConnectionManager>>,
    index: AtomicUsize,
    tx_pool: Arc<TxPool<MultiplexedConnection>>,
}

/// Idle transaction connections. Connections returned past `cap` are closed.
struct TxPool<C> {
    idle: std::sync::Mutex<Vec<C>>,
    cap: usize,
}

impl<C> TxPool<C> {
    fn new(cap: usize) -> Self {
        Self {
            idle: std::sync::Mutex::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    fn take(&self) -> Option<C> {
        self.idle.lock().ok()?.pop()
    }

    fn put(&self, conn: C) -> bool {
        let Ok(mut idle) = self.idle.lock() else {
            return false;
        };
        if idle.len() >= self.cap {
            return false;
        }
        idle.push(conn);
        true
    }

    fn idle(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

impl RedisStore {
    pub async fn connect(url: &str, pool_size: usize) -> Result<Self> {
        let client = redis::Client::open(url).with_context(|| format!("redis url {url}"))?;
        let mut pool = Vec::with_capacity(pool_size.max(1));
        for _ in 0..pool_size.max(1) {
            let conn = ConnectionManager::new(client.clone())
                .await
                .context("redis connect")?;
            pool.push(Mutex::new(conn));
        }
        info!(pool = pool.len(), "redis store connected");
        let tx_pool = Arc::new(TxPool::new(pool.len()));
        Ok(Self {
            client,
            pool,
            index: AtomicUsize::new(0),
            tx_pool,
        })
    }

    /// Idle transaction connections waiting for reuse.
    pub fn idle_tx_connections(&self) -> usize {
        self.tx_pool.idle()
    }

    /// Reuse an idle connection, clearing any watch left on it.
    async fn pooled_watch(&self, keys: &[String]) -> Option<MultiplexedConnection> {
        let mut conn = self.tx_pool.take()?;
        let mut pipe = redis::pipe();
        pipe.cmd("UNWATCH").ignore();
        if !keys.is_empty() {
            pipe.cmd("WATCH").arg(keys).ignore();
        }
        match pipe.query_async::<()>(&mut conn).await {
            Ok(()) => Some(conn),
            Err(e) => {
                debug!("dropping stale tx connection: {e}");
                None
            }
        }
    }

    fn handle(&self) -> &Mutex<ConnectionManager> {
        let idx = self.index.fetch_add(1, Ordering::Relaxed) % self.pool.len();
        &self.pool[idx]
    }
}

fn parse_int(key: &str, raw: Option<String>) -> Result<Option<i64>> {
    raw.map(|v| {
        v.trim()
            .parse::<i64>()
            .with_context(|| format!("value at {key} is not an integer: {v:?}"))
    })
    .transpose()
}

#[async_trait]
impl FeedStore for RedisStore {
    type Tx = RedisTx;

    async fn hset_fields(&self, key: &str, fields: &[(&str, String)]) -> Result<()> {
        let mut conn = self.handle().lock().await;
        let _: () = conn.hset_multiple(key, fields).await.context("redis HSET")?;
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.handle().lock().await;
        Ok(conn.hgetall(key).await.context("redis HGETALL")?)
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.handle().lock().await;
        let _: i64 = conn.del(keys).await.context("redis DEL")?;
        Ok(())
    }

    async fn get_int(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.handle().lock().await;
        let raw: Option<String> = conn.get(key).await.context("redis GET")?;
        parse_int(key, raw)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.handle().lock().await;
        Ok(conn.incr(key, delta).await.context("redis INCRBY")?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.handle().lock().await;
        let added: i64 = conn.sadd(key, member).await.context("redis SADD")?;
        Ok(added > 0)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.handle().lock().await;
        let removed: i64 = conn.srem(key, member).await.context("redis SREM")?;
        Ok(removed > 0)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.handle().lock().await;
        Ok(conn.smembers(key).await.context("redis SMEMBERS")?)
    }

    async fn scard(&self, key: &str) -> Result<u64> {
        let mut conn = self.handle().lock().await;
        Ok(conn.scard(key).await.context("redis SCARD")?)
    }

    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<bool> {
        let mut conn = self.handle().lock().await;
        let added: i64 = conn.zadd(key, member, score).await.context("redis ZADD")?;
        Ok(added > 0)
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.handle().lock().await;
        let removed: i64 = conn.zrem(key, member).await.context("redis ZREM")?;
        Ok(removed > 0)
    }

    async fn zscore(&self, key: &str, member: &str) -> Result<Option<i64>> {
        let mut conn = self.handle().lock().await;
        let score: Option<f64> = conn.zscore(key, member).await.context("redis ZSCORE")?;
        Ok(score.map(|s| s as i64))
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let mut conn = self.handle().lock().await;
        Ok(conn.zcard(key).await.context("redis ZCARD")?)
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(String, i64)>> {
        let mut conn = self.handle().lock().await;
        let items: Vec<(String, f64)> = conn
            .zrevrange_withscores(key, start, stop)
            .await
            .context("redis ZREVRANGE")?;
        Ok(items.into_iter().map(|(m, s)| (m, s as i64)).collect())
    }

    async fn watch(&self, keys: &[String]) -> Result<RedisTx> {
        if let Some(conn) = self.pooled_watch(keys).await {
            return Ok(RedisTx::new(conn, &self.tx_pool));
        }
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .context("redis connect (tx)")?;
        if !keys.is_empty() {
            let _: () = redis::cmd("WATCH")
                .arg(keys)
                .query_async(&mut conn)
                .await
                .context("redis WATCH")?;
        }
        Ok(RedisTx::new(conn, &self.tx_pool))
    }
}

/// One `WATCH`ed transaction. The connection goes back to the pool on drop
/// unless a command on it failed or `exec` was interrupted.
pub struct RedisTx {
    conn: Option<MultiplexedConnection>,
    pool: Arc<TxPool<MultiplexedConnection>>,
}

impl RedisTx {
    fn new(conn: MultiplexedConnection, pool: &Arc<TxPool<MultiplexedConnection>>) -> Self {
        Self {
            conn: Some(conn),
            pool: pool.clone(),
        }
    }

    fn conn(&mut self) -> Result<&mut MultiplexedConnection> {
        self.conn
            .as_mut()
            .context("transaction connection already failed")
    }

    fn settle<T>(&mut self, res: redis::RedisResult<T>) -> redis::RedisResult<T> {
        if res.is_err() {
            self.conn = None;
        }
        res
    }
}

impl Drop for RedisTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.put(conn);
        }
    }
}

#[async_trait]
impl StoreTx for RedisTx {
    async fn get_raw(&mut self, key: &str) -> Result<Option<String>> {
        let res = self.conn()?.get(key).await;
        Ok(self.settle(res).context("redis GET")?)
    }

    async fn exists(&mut self, key: &str) -> Result<bool> {
        let res = self.conn()?.exists(key).await;
        Ok(self.settle(res).context("redis EXISTS")?)
    }

    async fn scard(&mut self, key: &str) -> Result<u64> {
        let res = self.conn()?.scard(key).await;
        Ok(self.settle(res).context("redis SCARD")?)
    }

    async fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        let res = self.conn()?.smembers(key).await;
        Ok(self.settle(res).context("redis SMEMBERS")?)
    }

    async fn zscore(&mut self, key: &str, member: &str) -> Result<Option<i64>> {
        let res = self.conn()?.zscore(key, member).await;
        let score: Option<f64> = self.settle(res).context("redis ZSCORE")?;
        Ok(score.map(|s| s as i64))
    }

    async fn zrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let res = self.conn()?.zrange(key, start, stop).await;
        Ok(self.settle(res).context("redis ZRANGE")?)
    }

    async fn zrevrange(&mut self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let res = self.conn()?.zrevrange(key, start, stop).await;
        Ok(self.settle(res).context("redis ZREVRANGE")?)
    }

    async fn exec(mut self, ops: Vec<StoreOp>) -> Result<bool> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        if ops.is_empty() {
            // MULTI/EXEC with nothing queued still reports a broken WATCH.
            pipe.cmd("PING").ignore();
        }
        for op in ops {
            match op {
                StoreOp::Del(key) => {
                    pipe.del(key).ignore();
                }
                StoreOp::IncrBy(key, delta) => {
                    pipe.incr(key, delta).ignore();
                }
                StoreOp::SAdd(key, member) => {
                    pipe.sadd(key, member).ignore();
                }
                StoreOp::ZAdd { key, member, score } => {
                    pipe.zadd(key, member, score).ignore();
                }
                StoreOp::ZRem(key, member) => {
                    pipe.zrem(key, member).ignore();
                }
            }
        }
        // Held outside `self` while in flight so a cancelled exec never
        // returns the connection to the pool.
        let mut conn = self.conn.take().context("transaction connection already failed")?;
        let reply: Option<redis::Value> = pipe
            .query_async(&mut conn)
            .await
            .context("redis EXEC")?;
        self.conn = Some(conn);
        Ok(reply.is_some())
    }
}
