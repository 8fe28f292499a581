use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use db::{
    RecordStore, StoreError,
    models::task::{Task, TaskStatus, UpdateTask},
};
use serde::Deserialize;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

use super::{
    notify::{Notification, SharedNotifier},
    task_cache::SharedTaskCache,
    task_move::{MoveSignal, MoveState, TaskMove},
};

/// A column slot: which column, and the index within its visible list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct DragLocation {
    pub column: TaskStatus,
    pub index: usize,
}

impl DragLocation {
    pub fn new(column: TaskStatus, index: usize) -> Self {
        Self { column, index }
    }

    /// Builds a location from a droppable column id such as `in-progress`.
    pub fn parse(column: &str, index: usize) -> Result<Self, StoreError> {
        let column = TaskStatus::from_str(column)
            .map_err(|_| StoreError::validation(format!("unknown column `{column}`")))?;
        Ok(Self { column, index })
    }
}

/// Emitted by the UI when a drag gesture ends. `destination` is `None` when
/// the card was dropped outside every column.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DragEvent {
    pub task_id: Uuid,
    pub source: DragLocation,
    pub destination: Option<DragLocation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Dropped nowhere; nothing happened.
    Cancelled,
    Persisted(Task),
    /// The store refused the move and the board was reloaded.
    RolledBack(StoreError),
}

/// Unsettled moves of one task, oldest first, keyed by move token.
type PendingMoves = Vec<(u64, MoveState)>;

pub struct DragReorderController {
    store: Arc<dyn RecordStore>,
    notifier: SharedNotifier,
    next_token: AtomicU64,
    in_flight: Mutex<HashMap<Uuid, PendingMoves>>,
}

impl DragReorderController {
    pub fn new(store: Arc<dyn RecordStore>, notifier: SharedNotifier) -> Self {
        Self {
            store,
            notifier,
            next_token: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// State of the most recent unsettled move of `task_id`; `Clean` once
    /// every move of it has settled.
    pub fn move_state(&self, task_id: Uuid) -> MoveState {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&task_id)
            .and_then(|moves| moves.last())
            .map(|(_, state)| *state)
            .unwrap_or_default()
    }

    #[instrument(skip(self, cache, event), fields(task_id = %event.task_id))]
    pub async fn on_drag_complete(&self, cache: &SharedTaskCache, event: DragEvent) -> MoveOutcome {
        let Some(destination) = event.destination else {
            debug!("drag cancelled");
            return MoveOutcome::Cancelled;
        };

        let position = i64::try_from(destination.index).unwrap_or(i64::MAX);
        let mut task_move = TaskMove::new(event.task_id, destination.column, position);
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);

        task_move.from = cache.apply_status_change(event.task_id, destination.column);
        if task_move.from.is_none() {
            debug!("moved task is not cached; persisting anyway");
        }
        self.step(token, &mut task_move, MoveSignal::Applied);

        let update = UpdateTask::move_to(task_move.to, task_move.position);
        match self.store.update_task(event.task_id, update).await {
            Ok(task) => {
                self.step(token, &mut task_move, MoveSignal::Persisted);
                self.notifier.notify(Notification::success(
                    "Task Moved",
                    format!("Task moved to {}.", task.status.label()),
                ));
                MoveOutcome::Persisted(task)
            }
            Err(error) => {
                self.step(token, &mut task_move, MoveSignal::PersistFailed);
                warn!(?error, kind = error.kind(), "failed to persist task move; reloading board");
                self.discard_optimistic(cache, &task_move).await;
                self.step(token, &mut task_move, MoveSignal::Reloaded);
                self.notifier
                    .notify(Notification::error("Error", "Failed to update task"));
                MoveOutcome::RolledBack(error)
            }
        }
    }

    async fn discard_optimistic(&self, cache: &SharedTaskCache, task_move: &TaskMove) {
        if let Err(reload_error) = cache.reload(self.store.as_ref()).await {
            // Without a fresh snapshot the best available truth is the
            // column the task was in before the drag.
            warn!(?reload_error, "reload after failed move also failed; reverting locally");
            if let Some(previous) = task_move.from {
                cache.apply_status_change(task_move.task_id, previous);
            }
        }
    }

    fn step(&self, token: u64, task_move: &mut TaskMove, signal: MoveSignal) {
        match task_move.advance(signal) {
            Ok(state) => {
                let mut in_flight = self
                    .in_flight
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                let moves = in_flight.entry(task_move.task_id).or_default();
                match moves.iter_mut().find(|(t, _)| *t == token) {
                    Some(entry) => entry.1 = state,
                    None => moves.push((token, state)),
                }
                moves.retain(|(_, pending)| *pending != MoveState::Clean);
                if moves.is_empty() {
                    in_flight.remove(&task_move.task_id);
                }
            }
            Err(error) => error!(?error, "task move state machine out of sync"),
        }
    }
}
