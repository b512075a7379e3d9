/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};

/// One feed operation, as pushed onto the task queue by producers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeedTask {
    NewActivity {
        actor: u64,
        timestamp: i64,
        activity_type: String,
    },
    FollowUser {
        target: u64,
        follower: u64,
    },
    Unfollow {
        target: u64,
        follower: u64,
    },
    DeleteActivity {
        actor: u64,
        timestamp: i64,
        activity_type: String,
    },
}

impl FeedTask {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewActivity { .. } => "new_activity",
            Self::FollowUser { .. } => "follow_user",
            Self::Unfollow { .. } => "unfollow",
            Self::DeleteActivity { .. } => "delete_activity",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TaskEnvelope {
    pub id: String,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub not_before_ms: i64,
    pub task: FeedTask,
}

impl TaskEnvelope {
    pub fn new(id: impl Into<String>, task: FeedTask) -> Self {
        Self {
            id: id.into(),
            attempt: 0,
            not_before_ms: 0,
            task,
        }
    }
}
