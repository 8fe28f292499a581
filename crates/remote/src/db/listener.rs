use std::time::Duration;

use anyhow::Context;
use kanban_db::TaskChange;
use sqlx::{PgPool, postgres::PgListener};
use tokio::time::sleep;

use crate::{
    config::TASK_CHANGE_CHANNEL,
    feed::{ChangeBroker, FeedEvent},
};

/// Forwards `pg_notify` payloads from the task trigger into the broker.
pub struct TaskChangeListener {
    pool: PgPool,
    broker: ChangeBroker,
}

impl TaskChangeListener {
    pub fn new(pool: PgPool, broker: ChangeBroker) -> Self {
        Self { pool, broker }
    }

    pub async fn run(self) {
        let mut backoff = Duration::from_secs(1);
        let max_backoff = Duration::from_secs(30);
        let mut connected_before = false;

        loop {
            let result = listen_loop(
                &self.pool,
                &self.broker,
                TASK_CHANGE_CHANNEL,
                &mut connected_before,
            )
            .await;
            match result {
                Ok(()) => {
                    backoff = Duration::from_secs(1);
                }
                Err(error) => {
                    tracing::error!(?error, "task change listener error; retrying");
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }
    }
}

async fn listen_loop(
    pool: &PgPool,
    broker: &ChangeBroker,
    channel: &str,
    connected_before: &mut bool,
) -> anyhow::Result<()> {
    let mut listener = PgListener::connect_with(pool)
        .await
        .context("failed to create LISTEN connection")?;
    listener
        .listen(channel)
        .await
        .with_context(|| format!("failed to LISTEN on channel {channel}"))?;

    // Anything committed while we were disconnected was never delivered.
    if *connected_before {
        tracing::info!(channel, "task change listener reconnected; requesting resync");
        broker.publish(FeedEvent::Resync);
    }
    *connected_before = true;

    loop {
        let notification = listener
            .recv()
            .await
            .context("failed to receive LISTEN notification")?;

        match parse_payload(notification.payload()) {
            Ok(change) => {
                tracing::debug!(board_id = %change.board_id, op = ?change.op, "task change");
                broker.publish(FeedEvent::Change(change));
            }
            Err(error) => {
                tracing::warn!(?error, payload = notification.payload(), "invalid task change payload");
            }
        }
    }
}

fn parse_payload(payload: &str) -> Result<TaskChange, serde_json::Error> {
    serde_json::from_str(payload)
}
