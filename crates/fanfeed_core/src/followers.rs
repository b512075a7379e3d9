/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::keys::{followers_key, UserId};
use crate::store::FeedStore;
use anyhow::Result;
use tracing::warn;

/// Returns `true` only when the edge is new.
pub async fn add_follower<S: FeedStore>(store: &S, user: UserId, follower: UserId) -> Result<bool> {
    store.sadd(&followers_key(user), &follower.to_string()).await
}

pub async fn remove_follower<S: FeedStore>(
    store: &S,
    user: UserId,
    follower: UserId,
) -> Result<bool> {
    store.srem(&followers_key(user), &follower.to_string()).await
}

pub async fn followers<S: FeedStore>(store: &S, user: UserId) -> Result<Vec<UserId>> {
    let raw = store.smembers(&followers_key(user)).await?;
    let mut out = Vec::with_capacity(raw.len());
    for id in raw {
        match id.parse::<UserId>() {
            Ok(id) => out.push(id),
            Err(_) => warn!(user, follower = %id, "ignoring malformed follower id"),
        }
    }
    out.sort_unstable();
    Ok(out)
}
