/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod activity;
pub mod aggregate;
pub mod config;
pub mod engine;
pub mod feed_writer;
pub mod followers;
pub mod gc;
pub mod keys;
pub mod memory_store;
pub mod reader;
pub mod redis_store;
pub mod retry;
pub mod store;
pub mod trim;

pub use config::{FeedConfig, UnfollowPolicy};
pub use engine::FeedEngine;
pub use keys::{ActivityKind, AggregateKey, UserId};
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{FeedStore, StoreOp, StoreTx};
