use std::sync::Arc;

use db::{
    RecordStore, StoreError,
    models::{board::Board, task::Task},
};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{
    boards::BoardService,
    drag_reorder::{DragEvent, DragReorderController, MoveOutcome},
    notify::{Notification, SharedNotifier},
    realtime::RealtimeReconciler,
    task_cache::SharedTaskCache,
    task_commands::{NewTask, TaskCommands},
    task_move::MoveState,
};

/// Everything tied to one selected board: its task cache, the realtime
/// subscription keeping it fresh, and the operations that mutate it.
/// Dropping the session tears the subscription down.
pub struct BoardSession {
    board: Board,
    store: Arc<dyn RecordStore>,
    cache: SharedTaskCache,
    reconciler: RealtimeReconciler,
    controller: DragReorderController,
    commands: TaskCommands,
}

impl BoardSession {
    #[instrument(skip(store, notifier))]
    pub async fn open(
        store: Arc<dyn RecordStore>,
        notifier: SharedNotifier,
        board_id: Uuid,
    ) -> Result<Self, StoreError> {
        let board = store.fetch_board(board_id).await?;
        let cache = SharedTaskCache::new(board.id);

        // Subscribe before the first fetch so nothing slips in between.
        let reconciler = RealtimeReconciler::start(store.clone(), cache.clone()).await?;
        cache.reload(store.as_ref()).await?;

        info!(tasks = cache.read().tasks().len(), "board session opened");
        Ok(Self {
            board,
            controller: DragReorderController::new(store.clone(), notifier.clone()),
            commands: TaskCommands::new(store.clone(), notifier),
            store,
            cache,
            reconciler,
        })
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn cache(&self) -> &SharedTaskCache {
        &self.cache
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.cache.snapshot()
    }

    pub fn is_live(&self) -> bool {
        self.reconciler.is_running()
    }

    pub fn move_state(&self, task_id: Uuid) -> MoveState {
        self.controller.move_state(task_id)
    }

    pub async fn on_drag_complete(&self, event: DragEvent) -> MoveOutcome {
        self.controller.on_drag_complete(&self.cache, event).await
    }

    pub async fn create_task(&self, input: NewTask) -> Result<Task, StoreError> {
        self.commands.create_task(&self.cache, input).await
    }

    pub async fn delete_task(&self, task_id: Uuid) -> Result<(), StoreError> {
        self.commands.delete_task(task_id).await
    }

    pub async fn reload(&self) -> Result<bool, StoreError> {
        self.cache.reload(self.store.as_ref()).await
    }

    pub async fn close(self) {
        self.reconciler.stop().await;
        info!(board_id = %self.board.id, "board session closed");
    }
}

/// Top-level client state: board management plus at most one selected
/// board at a time.
pub struct KanbanClient {
    store: Arc<dyn RecordStore>,
    notifier: SharedNotifier,
    boards: BoardService,
    active: Option<BoardSession>,
}

impl KanbanClient {
    pub fn new(store: Arc<dyn RecordStore>, notifier: SharedNotifier) -> Self {
        Self {
            boards: BoardService::new(store.clone(), notifier.clone()),
            store,
            notifier,
            active: None,
        }
    }

    pub fn boards(&self) -> &BoardService {
        &self.boards
    }

    pub fn active(&self) -> Option<&BoardSession> {
        self.active.as_ref()
    }

    /// Closes the current board, if any, then opens `board_id`.
    pub async fn select_board(&mut self, board_id: Uuid) -> Result<&BoardSession, StoreError> {
        self.deselect().await;

        match BoardSession::open(self.store.clone(), self.notifier.clone(), board_id).await {
            Ok(session) => Ok(self.active.insert(session)),
            Err(error) => {
                self.notifier
                    .notify(Notification::error("Error", "Failed to fetch board data"));
                Err(error)
            }
        }
    }

    pub async fn deselect(&mut self) {
        if let Some(session) = self.active.take() {
            session.close().await;
        }
    }
}
