/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{bail, Context, Result};
use fanfeed_protocol::{FeedTask, TaskEnvelope};
use rand::Rng;

const USAGE: &str = "usage: dev_enqueue new_activity|delete_activity <actor> <timestamp> <type>\n       dev_enqueue follow_user|unfollow <target> <follower>";

fn parse_task(args: &[String]) -> Result<FeedTask> {
    let arg = |i: usize| args.get(i).map(String::as_str).context(USAGE);
    let task = match arg(0)? {
        "new_activity" | "delete_activity" => {
            let actor = arg(1)?.parse::<u64>().context("actor id")?;
            let timestamp = arg(2)?.parse::<i64>().context("timestamp")?;
            let activity_type = arg(3)?.to_string();
            if arg(0)? == "new_activity" {
                FeedTask::NewActivity {
                    actor,
                    timestamp,
                    activity_type,
                }
            } else {
                FeedTask::DeleteActivity {
                    actor,
                    timestamp,
                    activity_type,
                }
            }
        }
        "follow_user" | "unfollow" => {
            let target = arg(1)?.parse::<u64>().context("target id")?;
            let follower = arg(2)?.parse::<u64>().context("follower id")?;
            if arg(0)? == "follow_user" {
                FeedTask::FollowUser { target, follower }
            } else {
                FeedTask::Unfollow { target, follower }
            }
        }
        other => bail!("unknown task {other:?}\n{USAGE}"),
    };
    Ok(task)
}

#[tokio::main]
async fn main() -> Result<()> {
    let queue_url = std::env::var("FANFEED_QUEUE_URL")
        .unwrap_or_else(|_| "redis://127.0.0.1:6379/0".to_string());
    let queue_key =
        std::env::var("FANFEED_QUEUE_KEY").unwrap_or_else(|_| "fanfeed:tasks".to_string());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let task = parse_task(&args)?;
    let id: String = {
        let mut rng = rand::thread_rng();
        (0..16).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
    };
    let body = serde_json::to_string(&TaskEnvelope::new(id.clone(), task))?;

    let client = redis::Client::open(queue_url.as_str()).context("queue url")?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let pending: i64 = redis::cmd("LPUSH")
        .arg(&queue_key)
        .arg(&body)
        .query_async(&mut conn)
        .await?;
    println!("ok: {id} queued on {queue_key} ({pending} pending)");
    Ok(())
}
