use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use kanban_db::{TaskChange, wire::ServerMessage};
use sqlx::PgPool;
use tokio::{
    sync::broadcast,
    time::{Instant, MissedTickBehavior},
};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use uuid::Uuid;

use crate::{RequestContext, db::members::MemberRepository, feed::FeedEvent};

const MEMBERSHIP_RECHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Streams one board's task changes until the client leaves or loses access
/// to the board. A lagging session gets a resync frame instead of the
/// dropped events.
pub async fn handle(
    socket: WebSocket,
    receiver: broadcast::Receiver<FeedEvent>,
    pool: PgPool,
    ctx: RequestContext,
    board_id: Uuid,
) {
    let mut feed = BroadcastStream::new(receiver);
    let (mut sender, mut inbound) = socket.split();

    let ttl = (ctx.expires_at - Utc::now()).to_std().unwrap_or_default();
    let expiry = tokio::time::sleep(ttl);
    tokio::pin!(expiry);

    let mut recheck = tokio::time::interval_at(
        Instant::now() + MEMBERSHIP_RECHECK_INTERVAL,
        MEMBERSHIP_RECHECK_INTERVAL,
    );
    recheck.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(%board_id, user_id = %ctx.user_id, "change feed session started");

    loop {
        tokio::select! {
            maybe_event = feed.next() => {
                let change = match maybe_event {
                    Some(Ok(event)) => match event.for_board(board_id) {
                        Some(change) => change,
                        None => continue,
                    },
                    Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                        tracing::warn!(%board_id, skipped, "change feed lagged");
                        TaskChange::resync(board_id)
                    }
                    None => break,
                };
                if send(&mut sender, &ServerMessage::Change(change)).await.is_err() {
                    break;
                }
            }

            maybe_message = inbound.next() => {
                match maybe_message {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(error)) => {
                        tracing::debug!(?error, "websocket receive error");
                        break;
                    }
                }
            }

            _ = recheck.tick() => {
                let membership = MemberRepository::new(&pool)
                    .is_member(board_id, ctx.user_id)
                    .await;
                if !still_allowed(&membership) {
                    tracing::info!(%board_id, user_id = %ctx.user_id, "membership revoked; closing change feed");
                    let _ = send(&mut sender, &ServerMessage::Error {
                        message: "membership revoked".to_string(),
                    }).await;
                    break;
                }
            }

            _ = &mut expiry => {
                let _ = send(&mut sender, &ServerMessage::Error {
                    message: "session expired".to_string(),
                }).await;
                break;
            }
        }
    }

    tracing::debug!(%board_id, user_id = %ctx.user_id, "change feed session ended");
}

/// A failed lookup keeps the session open; the next tick tries again.
fn still_allowed(membership: &Result<bool, sqlx::Error>) -> bool {
    match membership {
        Ok(is_member) => *is_member,
        Err(error) => {
            tracing::warn!(?error, "membership recheck failed");
            true
        }
    }
}

async fn send(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), ()> {
    match serde_json::to_string(message) {
        Ok(json) => sender
            .send(Message::Text(json.into()))
            .await
            .map_err(|error| {
                tracing::debug!(?error, "failed to send websocket message");
            }),
        Err(error) => {
            tracing::error!(?error, "failed to serialise websocket message");
            Err(())
        }
    }
}
