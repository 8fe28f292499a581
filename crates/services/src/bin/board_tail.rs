//! Follows a board on the hosted store and prints its columns whenever the
//! task cache changes.
//!
//! Usage: `board_tail <board-id>` with `KANBAN_API_BASE` and
//! `KANBAN_ACCESS_TOKEN` set.

use std::sync::Arc;

use anyhow::Context;
use db::models::task::TaskStatus;
use services::{
    KanbanClient, init_tracing,
    services::{
        notify::TracingNotifier,
        remote_store::{RemoteRecordStore, RemoteStoreConfig},
    },
};
use strum::IntoEnumIterator;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let board_id: Uuid = std::env::args()
        .nth(1)
        .context("usage: board_tail <board-id>")?
        .parse()
        .context("board id is not a valid UUID")?;

    let config = RemoteStoreConfig::from_env()?;
    let store = RemoteRecordStore::connect(config)
        .await
        .context("failed to connect to board store")?;

    let mut client = KanbanClient::new(Arc::new(store), Arc::new(TracingNotifier));
    let session = client
        .select_board(board_id)
        .await
        .context("failed to open board")?;
    println!("# {}", session.board().name);

    let mut changes = session.cache().subscribe();
    loop {
        print_columns(session);
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.deselect().await;
    Ok(())
}

fn print_columns(session: &services::BoardSession) {
    let cache = session.cache().read();
    for status in TaskStatus::iter() {
        println!("{} ({})", status.label(), cache.count_in(status));
        for task in cache.by_status(status) {
            println!("  - {}", task.title);
        }
    }
}
