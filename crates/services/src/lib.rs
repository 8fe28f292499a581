pub mod services;

use std::env;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use services::{
    drag_reorder::{DragEvent, DragLocation, MoveOutcome},
    notify::{Notification, NotificationKind, Notifier},
    session::{BoardSession, KanbanClient},
    task_cache::{SharedTaskCache, TaskCache},
    task_commands::NewTask,
    task_move::MoveState,
};

pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }

    let env_filter = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(env_filter))
        .with(fmt_layer)
        .init();
}
