/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use fanfeed_core::{ActivityKind, FeedEngine, FeedStore};
use fanfeed_protocol::{FeedTask, TaskEnvelope};
use rand::Rng;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Clone, Copy, Debug)]
pub struct QueueSettings {
    pub max_attempts: u32,
    pub base_backoff_secs: u64,
    pub max_backoff_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_backoff_secs: 5,
            max_backoff_secs: 3600,
        }
    }
}

/// Reliable list queue on the broker Redis. Producers `LPUSH` envelopes onto
/// `key`; consumers move them into `<key>:processing` while they run.
#[derive(Clone)]
pub struct TaskQueue {
    client: redis::Client,
    key: String,
    processing: String,
    dead: String,
}

impl TaskQueue {
    pub fn open(url: &str, key: &str) -> Result<Self> {
        let client = redis::Client::open(url).with_context(|| format!("queue url {url}"))?;
        Ok(Self {
            client,
            key: key.to_string(),
            processing: format!("{key}:processing"),
            dead: format!("{key}:dead"),
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .context("queue connect")
    }

    /// Put envelopes left behind by a previous run back at the head of the
    /// queue. Returns how many were moved.
    pub async fn recover(&self) -> Result<usize> {
        let mut conn = self.connection().await?;
        let mut moved = 0usize;
        loop {
            let item: Option<String> = redis::cmd("LMOVE")
                .arg(&self.processing)
                .arg(&self.key)
                .arg("RIGHT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await
                .context("queue LMOVE")?;
            if item.is_none() {
                break;
            }
            moved += 1;
        }
        if moved > 0 {
            info!(queue = %self.key, moved, "requeued unfinished tasks");
        }
        Ok(moved)
    }

    /// Spawn one consumer loop. Each consumer owns its connection because
    /// `BLMOVE` blocks it. Broker errors never end the loop: the consumer
    /// backs off, reconnects and carries on until shutdown.
    pub fn start_worker<S>(
        &self,
        worker: usize,
        engine: FeedEngine<S>,
        settings: QueueSettings,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()>
    where
        S: FeedStore + 'static,
    {
        let queue = self.clone();
        tokio::spawn(async move { queue.run_loop(worker, engine, settings, shutdown).await })
    }

    async fn run_loop<S: FeedStore>(
        &self,
        worker: usize,
        engine: FeedEngine<S>,
        settings: QueueSettings,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(worker, queue = %self.key, "feed worker started");
        let mut failures = 0u32;
        while !*shutdown.borrow() {
            match self
                .consume(worker, &engine, settings, &mut shutdown, &mut failures)
                .await
            {
                Ok(()) => break,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = reconnect_delay(failures);
                    error!(
                        worker,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "broker error, reconnecting: {e:#}"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        }
        info!(worker, "feed worker stopped");
    }

    /// Pull and run envelopes over one connection. Returns `Ok` on shutdown
    /// and the first broker error otherwise. An envelope caught by an error
    /// stays in processing until the next start-up recovery.
    async fn consume<S: FeedStore>(
        &self,
        worker: usize,
        engine: &FeedEngine<S>,
        settings: QueueSettings,
        shutdown: &mut watch::Receiver<bool>,
        failures: &mut u32,
    ) -> Result<()> {
        let mut conn = self.connection().await?;
        if *failures > 0 {
            info!(worker, "broker connection restored");
        }
        *failures = 0;
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            let popped = tokio::select! {
                res = self.pop(&mut conn) => res?,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                    None
                }
            };
            let Some(raw) = popped else {
                continue;
            };
            self.handle(&mut conn, worker, engine, settings, raw).await?;
        }
    }

    /// Wait up to a second for the next envelope.
    async fn pop(&self, conn: &mut MultiplexedConnection) -> Result<Option<String>> {
        let item: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.key)
            .arg(&self.processing)
            .arg("RIGHT")
            .arg("LEFT")
            .arg(1)
            .query_async(conn)
            .await
            .context("queue BLMOVE")?;
        Ok(item)
    }

    async fn handle<S: FeedStore>(
        &self,
        conn: &mut MultiplexedConnection,
        worker: usize,
        engine: &FeedEngine<S>,
        settings: QueueSettings,
        raw: String,
    ) -> Result<()> {
        let envelope = match serde_json::from_str::<TaskEnvelope>(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(worker, "undecodable task: {e}");
                return self.replace(conn, &raw, &self.dead, &raw).await;
            }
        };

        let wait_ms = envelope.not_before_ms - now_ms();
        if wait_ms > 0 {
            // Not due yet: back to the tail, then give other tasks a turn.
            self.replace(conn, &raw, &self.key, &raw).await?;
            tokio::time::sleep(Duration::from_millis(wait_ms.min(500) as u64)).await;
            return Ok(());
        }

        let task = envelope.task.name();
        match run_task(engine, &envelope.task).await {
            TaskOutcome::Done => {
                debug!(worker, id = %envelope.id, task, "task done");
                let _: i64 = redis::cmd("LREM")
                    .arg(&self.processing)
                    .arg(1)
                    .arg(&raw)
                    .query_async(conn)
                    .await
                    .context("queue LREM")?;
                Ok(())
            }
            TaskOutcome::Rejected(e) => {
                warn!(worker, id = %envelope.id, task, "task rejected: {e:#}");
                self.replace(conn, &raw, &self.dead, &raw).await
            }
            TaskOutcome::Failed(e) => match reschedule(envelope, settings, now_ms()) {
                Reschedule::Retry(next) => {
                    error!(
                        worker,
                        id = %next.id,
                        task,
                        attempt = next.attempt,
                        "task failed, will retry: {e:#}"
                    );
                    let body = serde_json::to_string(&next).context("encode task")?;
                    self.replace(conn, &raw, &self.key, &body).await
                }
                Reschedule::Dead(last) => {
                    error!(
                        worker,
                        id = %last.id,
                        task,
                        attempts = last.attempt,
                        "task failed for good: {e:#}"
                    );
                    self.replace(conn, &raw, &self.dead, &raw).await
                }
            },
        }
    }

    /// Atomically drop `raw` from processing and push `body` onto `list`.
    async fn replace(
        &self,
        conn: &mut MultiplexedConnection,
        raw: &str,
        list: &str,
        body: &str,
    ) -> Result<()> {
        let _: () = redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&self.processing)
            .arg(1)
            .arg(raw)
            .ignore()
            .cmd("LPUSH")
            .arg(list)
            .arg(body)
            .ignore()
            .query_async(conn)
            .await
            .context("queue requeue")?;
        Ok(())
    }
}

pub enum TaskOutcome {
    Done,
    /// The task can never succeed; retrying is pointless.
    Rejected(anyhow::Error),
    /// Store failure; worth another attempt later.
    Failed(anyhow::Error),
}

pub async fn run_task<S: FeedStore>(engine: &FeedEngine<S>, task: &FeedTask) -> TaskOutcome {
    let res = match task {
        FeedTask::NewActivity {
            actor,
            timestamp,
            activity_type,
        } => match ActivityKind::new(activity_type.as_str()) {
            Ok(kind) => engine.new_activity(*actor, *timestamp, kind).await,
            Err(e) => return TaskOutcome::Rejected(e),
        },
        FeedTask::DeleteActivity {
            actor,
            timestamp,
            activity_type,
        } => match ActivityKind::new(activity_type.as_str()) {
            Ok(kind) => engine.delete_activity(*actor, *timestamp, kind).await,
            Err(e) => return TaskOutcome::Rejected(e),
        },
        FeedTask::FollowUser { target, follower } => {
            engine.follow_user(*target, *follower).await.map(|_| ())
        }
        FeedTask::Unfollow { target, follower } => {
            engine.unfollow(*target, *follower).await.map(|_| ())
        }
    };
    match res {
        Ok(()) => TaskOutcome::Done,
        Err(e) => TaskOutcome::Failed(e),
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Reschedule {
    Retry(TaskEnvelope),
    Dead(TaskEnvelope),
}

pub fn reschedule(mut envelope: TaskEnvelope, settings: QueueSettings, now_ms: i64) -> Reschedule {
    envelope.attempt = envelope.attempt.saturating_add(1);
    if envelope.attempt >= settings.max_attempts {
        return Reschedule::Dead(envelope);
    }
    let delay = next_backoff(
        envelope.attempt,
        settings.base_backoff_secs,
        settings.max_backoff_secs,
    );
    envelope.not_before_ms = now_ms.saturating_add(delay.as_millis() as i64);
    Reschedule::Retry(envelope)
}

fn next_backoff(attempt: u32, base_secs: u64, max_secs: u64) -> Duration {
    let pow = attempt.saturating_sub(1).min(20);
    let secs = base_secs.saturating_mul(1u64 << pow).min(max_secs);
    // jitter 0..1000ms
    let jitter_ms = rand::thread_rng().gen_range(0..1000u64);
    Duration::from_secs(secs) + Duration::from_millis(jitter_ms)
}

/// Pause before reconnecting after `failures` consecutive broker errors.
fn reconnect_delay(failures: u32) -> Duration {
    let pow = failures.saturating_sub(1).min(6);
    Duration::from_millis((100u64 << pow).min(5_000))
}

pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
