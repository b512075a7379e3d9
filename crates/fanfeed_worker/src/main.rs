/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use fanfeed_core::{FeedConfig, FeedEngine, RedisStore};
use std::sync::Arc;
use tracing::{info, warn};

mod queue;
use queue::{QueueSettings, TaskQueue};

#[derive(Debug, Clone)]
struct Config {
    redis_url: String,
    redis_pool_size: usize,
    queue_url: String,
    queue_key: String,
    workers: usize,
    queue: QueueSettings,
}

fn load_config() -> Config {
    let redis_url = std::env::var("FANFEED_REDIS_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/2".to_string());
    let queue_url = std::env::var("FANFEED_QUEUE_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());
    let queue_key = std::env::var("FANFEED_QUEUE_KEY")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "fanfeed:tasks".to_string());

    let redis_pool_size = std::env::var("FANFEED_REDIS_POOL_SIZE")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(4)
        .max(1);
    let workers = std::env::var("FANFEED_WORKERS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(4)
        .max(1);

    let defaults = QueueSettings::default();
    let queue = QueueSettings {
        max_attempts: std::env::var("FANFEED_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(defaults.max_attempts)
            .max(1),
        base_backoff_secs: std::env::var("FANFEED_BASE_BACKOFF_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.base_backoff_secs),
        max_backoff_secs: std::env::var("FANFEED_MAX_BACKOFF_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.max_backoff_secs),
    };

    Config {
        redis_url,
        redis_pool_size,
        queue_url,
        queue_key,
        workers,
        queue,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().context("log directive")?),
        )
        .init();

    let cfg = load_config();
    let feed_cfg = FeedConfig::from_env();
    info!(
        queue = %cfg.queue_key,
        workers = cfg.workers,
        versions = ?feed_cfg.versions,
        max_activities = feed_cfg.max_activities,
        unfollow_policy = ?feed_cfg.unfollow_policy,
        "fanfeed_worker starting"
    );

    let store = Arc::new(
        RedisStore::connect(&cfg.redis_url, cfg.redis_pool_size)
            .await
            .context("feed store")?,
    );
    let engine = FeedEngine::new(store, feed_cfg);
    let queue = TaskQueue::open(&cfg.queue_url, &cfg.queue_key)?;
    queue.recover().await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut handles = Vec::with_capacity(cfg.workers);
    for worker in 0..cfg.workers {
        handles.push(queue.start_worker(worker, engine.clone(), cfg.queue, shutdown_rx.clone()));
    }

    tokio::signal::ctrl_c().await.context("ctrl_c")?;
    info!("shutdown requested");
    let _ = shutdown_tx.send(true);
    for handle in handles {
        if let Err(e) = handle.await {
            warn!("worker task join failed: {e}");
        }
    }
    info!("fanfeed_worker stopped");
    Ok(())
}
