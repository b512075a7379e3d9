/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::keys::{activity_index_key, activity_key, ActivityKind, UserId};
use crate::store::FeedStore;
use anyhow::{Context, Result};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub actor: UserId,
    pub timestamp: i64,
    pub kind: ActivityKind,
}

impl Activity {
    pub fn new(actor: UserId, timestamp: i64, kind: ActivityKind) -> Self {
        Self {
            actor,
            timestamp,
            kind,
        }
    }

    /// `activity:<actor>:<timestamp>:<type>`; also the member stored in the
    /// actor's index and in aggregates.
    pub fn id(&self) -> String {
        activity_key(self.actor, self.timestamp, &self.kind)
    }

    fn from_record(id: &str, mut fields: std::collections::HashMap<String, String>) -> Result<Self> {
        let actor = fields
            .remove("user_id")
            .context("missing user_id")?
            .parse()
            .context("user_id")?;
        let timestamp = fields
            .remove("timestamp")
            .context("missing timestamp")?
            .parse()
            .context("timestamp")?;
        let kind = ActivityKind::new(fields.remove("type").context("missing type")?)
            .with_context(|| format!("activity {id}"))?;
        Ok(Self::new(actor, timestamp, kind))
    }
}

/// Write the activity record and add it to the actor's index. Both writes are
/// idempotent, so a redelivered call is harmless.
pub async fn save<S: FeedStore>(store: &S, activity: &Activity) -> Result<()> {
    let id = activity.id();
    store
        .hset_fields(
            &id,
            &[
                ("user_id", activity.actor.to_string()),
                ("timestamp", activity.timestamp.to_string()),
                ("type", activity.kind.to_string()),
            ],
        )
        .await?;
    store.sadd(&activity_index_key(activity.actor), &id).await?;
    debug!(activity = %id, "activity saved");
    Ok(())
}

/// Remove the record and its index entry.
pub async fn delete<S: FeedStore>(store: &S, activity: &Activity) -> Result<()> {
    let id = activity.id();
    store.del(&[id.clone()]).await?;
    store.srem(&activity_index_key(activity.actor), &id).await?;
    debug!(activity = %id, "activity deleted");
    Ok(())
}

/// Load a record by id. Missing or malformed records yield `None`.
pub async fn load<S: FeedStore>(store: &S, id: &str) -> Result<Option<Activity>> {
    let fields = store.hgetall(id).await?;
    if fields.is_empty() {
        return Ok(None);
    }
    match Activity::from_record(id, fields) {
        Ok(activity) => Ok(Some(activity)),
        Err(e) => {
            warn!(activity = %id, "skipping malformed activity: {e:#}");
            Ok(None)
        }
    }
}

pub async fn index<S: FeedStore>(store: &S, actor: UserId) -> Result<Vec<String>> {
    store.smembers(&activity_index_key(actor)).await
}
