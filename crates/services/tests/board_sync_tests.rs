//! Board Sync Tests
//!
//! Drag-and-drop moves, optimistic updates and realtime reconciliation,
//! driven against the in-memory record store.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use db::{
    MemorySession, MemoryStore, RecordStore, StoreError, Subscription,
    models::{
        board::{Board, CreateBoard},
        board_member::{BoardMember, CreateBoardMember, MemberRole},
        profile::Profile,
        task::{CreateTask, Task, TaskStatus, UpdateTask},
    },
};
use services::{
    BoardSession, DragEvent, DragLocation, KanbanClient, MoveOutcome, MoveState, NewTask,
    Notification, NotificationKind,
    services::notify::{ChannelNotifier, SharedNotifier},
};
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

// ============================================================================
// TEST SETUP UTILITIES
// ============================================================================

/// Wraps a store session to inject failures, count calls and hold updates.
struct ScriptedStore {
    inner: MemorySession,
    update_error: Mutex<Option<StoreError>>,
    fetch_error: Mutex<Option<StoreError>>,
    update_gate: Option<Arc<Notify>>,
    update_calls: AtomicUsize,
    create_calls: AtomicUsize,
}

impl ScriptedStore {
    fn new(inner: MemorySession) -> Self {
        Self {
            inner,
            update_error: Mutex::new(None),
            fetch_error: Mutex::new(None),
            update_gate: None,
            update_calls: AtomicUsize::new(0),
            create_calls: AtomicUsize::new(0),
        }
    }

    fn gated(inner: MemorySession, gate: Arc<Notify>) -> Self {
        Self {
            update_gate: Some(gate),
            ..Self::new(inner)
        }
    }

    fn fail_next_update(&self, error: StoreError) {
        *self.update_error.lock().unwrap() = Some(error);
    }

    fn fail_next_fetch(&self, error: StoreError) {
        *self.fetch_error.lock().unwrap() = Some(error);
    }

    fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for ScriptedStore {
    fn session_user_id(&self) -> Uuid {
        self.inner.session_user_id()
    }

    async fn fetch_tasks(&self, board_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let injected = self.fetch_error.lock().unwrap().take();
        if let Some(error) = injected {
            return Err(error);
        }
        self.inner.fetch_tasks(board_id).await
    }

    async fn create_task(&self, data: CreateTask) -> Result<Task, StoreError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.create_task(data).await
    }

    async fn update_task(&self, task_id: Uuid, data: UpdateTask) -> Result<Task, StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.update_gate {
            gate.notified().await;
        }
        let injected = self.update_error.lock().unwrap().take();
        if let Some(error) = injected {
            return Err(error);
        }
        self.inner.update_task(task_id, data).await
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_task(task_id).await
    }

    async fn subscribe(&self, board_id: Uuid) -> Result<Subscription, StoreError> {
        self.inner.subscribe(board_id).await
    }

    async fn list_boards(&self) -> Result<Vec<Board>, StoreError> {
        self.inner.list_boards().await
    }

    async fn fetch_board(&self, board_id: Uuid) -> Result<Board, StoreError> {
        self.inner.fetch_board(board_id).await
    }

    async fn create_board(&self, data: CreateBoard) -> Result<Board, StoreError> {
        self.inner.create_board(data).await
    }

    async fn delete_board(&self, board_id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_board(board_id).await
    }

    async fn list_members(&self, board_id: Uuid) -> Result<Vec<BoardMember>, StoreError> {
        self.inner.list_members(board_id).await
    }

    async fn find_member(
        &self,
        board_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<BoardMember>, StoreError> {
        self.inner.find_member(board_id, user_id).await
    }

    async fn create_member(&self, data: CreateBoardMember) -> Result<BoardMember, StoreError> {
        self.inner.create_member(data).await
    }

    async fn delete_member(&self, member_id: Uuid) -> Result<(), StoreError> {
        self.inner.delete_member(member_id).await
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, StoreError> {
        self.inner.find_profile_by_email(email).await
    }
}

struct Fixture {
    store: MemoryStore,
    owner: Profile,
    board: Board,
}

impl Fixture {
    async fn new() -> Self {
        let store = MemoryStore::new();
        let owner = store.register_profile("owner@example.com", Some("Board Owner"));
        let board = create_board(&store.session(owner.id), "Sprint 1").await;
        Self {
            store,
            owner,
            board,
        }
    }

    fn owner_session(&self) -> MemorySession {
        self.store.session(self.owner.id)
    }

    async fn seed_task(&self, title: &str, status: TaskStatus) -> Task {
        self.owner_session()
            .create_task(CreateTask {
                board_id: self.board.id,
                title: title.to_string(),
                description: None,
                status,
                assignee_id: None,
                created_by: self.owner.id,
                attachment_url: None,
                position: None,
            })
            .await
            .unwrap()
    }
}

async fn create_board(session: &MemorySession, name: &str) -> Board {
    let owner_id = session.session_user_id();
    let board = session
        .create_board(CreateBoard {
            name: name.to_string(),
            description: None,
            owner_id,
        })
        .await
        .unwrap();
    session
        .create_member(CreateBoardMember {
            board_id: board.id,
            user_id: owner_id,
            role: MemberRole::Owner,
        })
        .await
        .unwrap();
    board
}

fn notifier() -> (SharedNotifier, mpsc::UnboundedReceiver<Notification>) {
    let (notifier, receiver) = ChannelNotifier::new();
    (Arc::new(notifier), receiver)
}

fn drained(receiver: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
    let mut out = Vec::new();
    while let Ok(notification) = receiver.try_recv() {
        out.push(notification);
    }
    out
}

fn drag(task: &Task, to: TaskStatus, index: usize) -> DragEvent {
    DragEvent {
        task_id: task.id,
        source: DragLocation::new(task.status, task.position as usize),
        destination: Some(DragLocation::new(to, index)),
    }
}

fn status_of(session: &BoardSession, task_id: Uuid) -> Option<TaskStatus> {
    session.cache().read().get(task_id).map(|t| t.status)
}

/// Waits until the cache revision moves, or gives up after `wait`.
async fn cache_changes_within(session: &BoardSession, wait: Duration) -> bool {
    let mut changes = session.cache().subscribe();
    tokio::time::timeout(wait, changes.changed()).await.is_ok()
}

// ============================================================================
// DRAG AND DROP
// ============================================================================

#[tokio::test]
async fn test_drag_to_done_is_optimistic_and_converges() {
    let fx = Fixture::new().await;
    let t1 = fx.seed_task("T1", TaskStatus::Todo).await;
    let t2 = fx.seed_task("T2", TaskStatus::Todo).await;
    let (notifier, mut notes) = notifier();
    let session = BoardSession::open(Arc::new(fx.owner_session()), notifier, fx.board.id)
        .await
        .unwrap();

    let outcome = session
        .on_drag_complete(drag(&t1, TaskStatus::Done, 0))
        .await;

    assert!(matches!(outcome, MoveOutcome::Persisted(ref task) if task.status == TaskStatus::Done));
    assert_eq!(status_of(&session, t1.id), Some(TaskStatus::Done));
    assert_eq!(status_of(&session, t2.id), Some(TaskStatus::Todo));

    session.reload().await.unwrap();
    assert_eq!(session.tasks(), fx.store.snapshot_tasks(fx.board.id));
    let done: Vec<Uuid> = session
        .cache()
        .by_status(TaskStatus::Done)
        .into_iter()
        .map(|t| t.id)
        .collect();
    assert_eq!(done, vec![t1.id]);

    let notes = drained(&mut notes);
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::Success);
    assert_eq!(notes[0].description, "Task moved to done.");
    session.close().await;
}

#[tokio::test]
async fn test_last_drag_wins_after_a_sequence_of_moves() {
    let fx = Fixture::new().await;
    let task = fx.seed_task("Write docs", TaskStatus::Todo).await;
    let (notifier, _notes) = notifier();
    let session = BoardSession::open(Arc::new(fx.owner_session()), notifier, fx.board.id)
        .await
        .unwrap();

    for (column, index) in [
        (TaskStatus::InProgress, 0),
        (TaskStatus::Done, 3),
        (TaskStatus::InProgress, 1),
    ] {
        let current = session.cache().read().get(task.id).cloned().unwrap();
        let outcome = session.on_drag_complete(drag(&current, column, index)).await;
        assert!(matches!(outcome, MoveOutcome::Persisted(_)));
    }

    assert_eq!(status_of(&session, task.id), Some(TaskStatus::InProgress));
    session.reload().await.unwrap();
    let stored = fx.store.snapshot_tasks(fx.board.id);
    assert_eq!(stored[0].status, TaskStatus::InProgress);
    assert_eq!(stored[0].position, 1);
    assert_eq!(session.tasks(), stored);
    session.close().await;
}

#[tokio::test]
async fn test_cancelled_drag_changes_nothing() {
    let fx = Fixture::new().await;
    let task = fx.seed_task("T1", TaskStatus::Todo).await;
    let store = Arc::new(ScriptedStore::new(fx.owner_session()));
    let (notifier, mut notes) = notifier();
    let session = BoardSession::open(store.clone(), notifier, fx.board.id)
        .await
        .unwrap();
    let cache_before = session.tasks();
    let revision_before = session.cache().read().revision();
    let store_before = fx.store.snapshot_tasks(fx.board.id);

    let outcome = session
        .on_drag_complete(DragEvent {
            task_id: task.id,
            source: DragLocation::new(TaskStatus::Todo, 0),
            destination: None,
        })
        .await;

    assert_eq!(outcome, MoveOutcome::Cancelled);
    assert_eq!(store.update_calls(), 0);
    assert_eq!(session.tasks(), cache_before);
    assert_eq!(session.cache().read().revision(), revision_before);
    assert_eq!(fx.store.snapshot_tasks(fx.board.id), store_before);
    assert!(drained(&mut notes).is_empty());
    session.close().await;
}

#[tokio::test]
async fn test_drop_back_in_place_is_idempotent() {
    let fx = Fixture::new().await;
    fx.seed_task("T0", TaskStatus::Todo).await;
    let task = fx.seed_task("T1", TaskStatus::Todo).await;
    let (notifier, _notes) = notifier();
    let session = BoardSession::open(Arc::new(fx.owner_session()), notifier, fx.board.id)
        .await
        .unwrap();
    let store_before = fx.store.snapshot_tasks(fx.board.id);

    let outcome = session
        .on_drag_complete(drag(&task, TaskStatus::Todo, 1))
        .await;

    assert!(matches!(outcome, MoveOutcome::Persisted(_)));
    assert_eq!(fx.store.snapshot_tasks(fx.board.id), store_before);
    session.reload().await.unwrap();
    assert_eq!(session.tasks().len(), 2);
    assert_eq!(session.tasks(), store_before);
    session.close().await;
}

#[tokio::test]
async fn test_forbidden_persist_reverts_after_reload() {
    let fx = Fixture::new().await;
    fx.seed_task("T1", TaskStatus::Todo).await;
    let t2 = fx.seed_task("T2", TaskStatus::Todo).await;
    let store = Arc::new(ScriptedStore::new(fx.owner_session()));
    let (notifier, mut notes) = notifier();
    let session = BoardSession::open(store.clone(), notifier, fx.board.id)
        .await
        .unwrap();
    let before = session.tasks();

    store.fail_next_update(StoreError::forbidden("row level security"));
    let outcome = session
        .on_drag_complete(drag(&t2, TaskStatus::InProgress, 0))
        .await;

    assert_eq!(
        outcome,
        MoveOutcome::RolledBack(StoreError::forbidden("row level security"))
    );
    assert_eq!(status_of(&session, t2.id), Some(TaskStatus::Todo));
    assert_eq!(session.tasks(), before);
    assert_eq!(session.tasks(), fx.store.snapshot_tasks(fx.board.id));
    assert_eq!(session.move_state(t2.id), MoveState::Clean);

    let notes = drained(&mut notes);
    assert_eq!(
        notes,
        vec![Notification::error("Error", "Failed to update task")]
    );
    session.close().await;
}

#[tokio::test]
async fn test_failed_persist_matches_fresh_reload_after_concurrent_edits() {
    let fx = Fixture::new().await;
    let t1 = fx.seed_task("T1", TaskStatus::Todo).await;
    let t2 = fx.seed_task("T2", TaskStatus::Todo).await;
    let (notifier, _notes) = notifier();
    let session = BoardSession::open(Arc::new(fx.owner_session()), notifier, fx.board.id)
        .await
        .unwrap();

    // Another client deletes T1 and moves T2 before our drag lands.
    let other = fx.owner_session();
    other.delete_task(t1.id).await.unwrap();
    other
        .update_task(t2.id, UpdateTask::move_to(TaskStatus::Done, 0))
        .await
        .unwrap();

    let outcome = session
        .on_drag_complete(drag(&t1, TaskStatus::InProgress, 0))
        .await;

    assert!(matches!(outcome, MoveOutcome::RolledBack(StoreError::NotFound(_))));
    let fresh = fx.owner_session().fetch_tasks(fx.board.id).await.unwrap();
    assert_eq!(session.tasks(), fresh);
    assert_eq!(status_of(&session, t1.id), None);
    assert_eq!(status_of(&session, t2.id), Some(TaskStatus::Done));
    session.close().await;
}

#[tokio::test]
async fn test_failed_reload_after_failed_persist_reverts_locally() {
    let fx = Fixture::new().await;
    let task = fx.seed_task("T1", TaskStatus::Todo).await;
    let store = Arc::new(ScriptedStore::new(fx.owner_session()));
    let (notifier, _notes) = notifier();
    let session = BoardSession::open(store.clone(), notifier, fx.board.id)
        .await
        .unwrap();

    store.fail_next_update(StoreError::transport("connection reset"));
    store.fail_next_fetch(StoreError::transport("connection reset"));
    let outcome = session
        .on_drag_complete(drag(&task, TaskStatus::Done, 0))
        .await;

    assert!(matches!(outcome, MoveOutcome::RolledBack(StoreError::Transport(_))));
    assert_eq!(status_of(&session, task.id), Some(TaskStatus::Todo));
    session.close().await;
}

#[tokio::test]
async fn test_move_is_optimistic_pending_while_persisting() {
    let fx = Fixture::new().await;
    let task = fx.seed_task("T1", TaskStatus::Todo).await;
    let gate = Arc::new(Notify::new());
    let store = Arc::new(ScriptedStore::gated(fx.owner_session(), gate.clone()));
    let (notifier, _notes) = notifier();
    let session = Arc::new(
        BoardSession::open(store.clone(), notifier, fx.board.id)
            .await
            .unwrap(),
    );

    let mover = {
        let session = session.clone();
        let event = drag(&task, TaskStatus::InProgress, 0);
        tokio::spawn(async move { session.on_drag_complete(event).await })
    };
    while store.update_calls() == 0 {
        tokio::task::yield_now().await;
    }

    assert_eq!(session.move_state(task.id), MoveState::OptimisticPending);
    assert_eq!(status_of(&session, task.id), Some(TaskStatus::InProgress));
    assert_eq!(
        fx.store.snapshot_tasks(fx.board.id)[0].status,
        TaskStatus::Todo
    );

    gate.notify_one();
    let outcome = mover.await.unwrap();

    assert!(matches!(outcome, MoveOutcome::Persisted(_)));
    assert_eq!(session.move_state(task.id), MoveState::Clean);
}

#[tokio::test]
async fn test_overlapping_moves_of_one_task_stay_pending_until_both_settle() {
    let fx = Fixture::new().await;
    let task = fx.seed_task("T1", TaskStatus::Todo).await;
    let gate = Arc::new(Notify::new());
    let store = Arc::new(ScriptedStore::gated(fx.owner_session(), gate.clone()));
    let (notifier, _notes) = notifier();
    let session = Arc::new(
        BoardSession::open(store.clone(), notifier, fx.board.id)
            .await
            .unwrap(),
    );

    let movers: Vec<_> = [TaskStatus::InProgress, TaskStatus::Done]
        .into_iter()
        .map(|to| {
            let session = session.clone();
            let event = drag(&task, to, 0);
            tokio::spawn(async move { session.on_drag_complete(event).await })
        })
        .collect();
    while store.update_calls() < 2 {
        tokio::task::yield_now().await;
    }
    assert_eq!(session.move_state(task.id), MoveState::OptimisticPending);

    gate.notify_one();
    while !movers.iter().any(|mover| mover.is_finished()) {
        tokio::task::yield_now().await;
    }
    assert_eq!(session.move_state(task.id), MoveState::OptimisticPending);

    gate.notify_one();
    for mover in movers {
        assert!(matches!(mover.await.unwrap(), MoveOutcome::Persisted(_)));
    }
    assert_eq!(session.move_state(task.id), MoveState::Clean);
}

#[tokio::test]
async fn test_unknown_column_is_rejected_when_parsing() {
    assert_eq!(
        DragLocation::parse("in-progress", 2).unwrap(),
        DragLocation::new(TaskStatus::InProgress, 2)
    );
    assert!(matches!(
        DragLocation::parse("archived", 0),
        Err(StoreError::Validation(_))
    ));
}

// ============================================================================
// REALTIME RECONCILIATION
// ============================================================================

#[tokio::test]
async fn test_external_change_is_reconciled() {
    let fx = Fixture::new().await;
    let (notifier, _notes) = notifier();
    let session = BoardSession::open(Arc::new(fx.owner_session()), notifier, fx.board.id)
        .await
        .unwrap();
    assert!(session.is_live());
    assert!(session.tasks().is_empty());

    let mut changes = session.cache().subscribe();
    let added = fx.seed_task("From another tab", TaskStatus::Done).await;

    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            changes.changed().await.unwrap();
            if session.cache().read().get(added.id).is_some() {
                break;
            }
        }
    })
    .await
    .expect("realtime reload never arrived");

    assert_eq!(session.tasks(), fx.store.snapshot_tasks(fx.board.id));
    session.close().await;
}

#[tokio::test]
async fn test_change_on_another_board_leaves_cache_alone() {
    let fx = Fixture::new().await;
    fx.seed_task("Visible", TaskStatus::Todo).await;
    let other_board = create_board(&fx.owner_session(), "Other").await;
    let (notifier, _notes) = notifier();
    let session = BoardSession::open(Arc::new(fx.owner_session()), notifier, fx.board.id)
        .await
        .unwrap();
    let before = session.tasks();
    let revision = session.cache().read().revision();

    let watcher = cache_changes_within(&session, Duration::from_millis(200));
    let writer = async {
        fx.owner_session()
            .create_task(CreateTask {
                board_id: other_board.id,
                title: "Elsewhere".to_string(),
                description: None,
                status: TaskStatus::Todo,
                assignee_id: None,
                created_by: fx.owner.id,
                attachment_url: None,
                position: None,
            })
            .await
            .unwrap();
    };
    let (changed, ()) = tokio::join!(watcher, writer);

    assert!(!changed);
    assert_eq!(session.cache().read().revision(), revision);
    assert_eq!(session.tasks(), before);
    session.close().await;
}

#[tokio::test]
async fn test_switching_boards_tears_down_the_old_subscription() {
    let fx = Fixture::new().await;
    let second = create_board(&fx.owner_session(), "Second").await;
    let (notifier, _notes) = notifier();
    let mut client = KanbanClient::new(Arc::new(fx.owner_session()), notifier);

    client.select_board(fx.board.id).await.unwrap();
    assert_eq!(fx.store.feed_subscribers(), 1);

    let session = client.select_board(second.id).await.unwrap();
    assert_eq!(session.board().id, second.id);
    assert_eq!(session.cache().board_id(), second.id);
    assert_eq!(fx.store.feed_subscribers(), 1);

    client.deselect().await;
    assert!(client.active().is_none());
    assert_eq!(fx.store.feed_subscribers(), 0);
}

#[tokio::test]
async fn test_selecting_inaccessible_board_notifies() {
    let fx = Fixture::new().await;
    let stranger = fx.store.register_profile("stranger@example.com", None);
    let (notifier, mut notes) = notifier();
    let mut client = KanbanClient::new(Arc::new(fx.store.session(stranger.id)), notifier);

    let err = client.select_board(fx.board.id).await.err();

    assert!(matches!(err, Some(StoreError::Forbidden(_))));
    assert!(client.active().is_none());
    assert_eq!(
        drained(&mut notes),
        vec![Notification::error("Error", "Failed to fetch board data")]
    );
}

// ============================================================================
// TASK COMMANDS
// ============================================================================

#[tokio::test]
async fn test_empty_title_never_reaches_the_store() {
    let fx = Fixture::new().await;
    let store = Arc::new(ScriptedStore::new(fx.owner_session()));
    let (notifier, mut notes) = notifier();
    let session = BoardSession::open(store.clone(), notifier, fx.board.id)
        .await
        .unwrap();

    let result = session
        .create_task(NewTask {
            title: "   ".to_string(),
            ..Default::default()
        })
        .await;

    assert!(matches!(result, Err(StoreError::Validation(_))));
    assert_eq!(store.create_calls(), 0);
    assert!(fx.store.snapshot_tasks(fx.board.id).is_empty());
    assert_eq!(drained(&mut notes)[0].kind, NotificationKind::Error);
    session.close().await;
}

#[tokio::test]
async fn test_new_task_lands_at_the_end_of_its_column() {
    let fx = Fixture::new().await;
    fx.seed_task("A", TaskStatus::InProgress).await;
    fx.seed_task("B", TaskStatus::Todo).await;
    let (notifier, mut notes) = notifier();
    let session = BoardSession::open(Arc::new(fx.owner_session()), notifier, fx.board.id)
        .await
        .unwrap();

    let task = session
        .create_task(NewTask {
            title: "  Ship it ".to_string(),
            description: Some("   ".to_string()),
            status: TaskStatus::InProgress,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(task.title, "Ship it");
    assert_eq!(task.description, None);
    assert_eq!(task.position, 1);
    assert_eq!(task.created_by, fx.owner.id);
    assert_eq!(
        drained(&mut notes),
        vec![Notification::success(
            "Task Created",
            "\"Ship it\" has been added to in progress."
        )]
    );
    session.close().await;
}

#[tokio::test]
async fn test_delete_task_reports_missing_tasks() {
    let fx = Fixture::new().await;
    let task = fx.seed_task("Doomed", TaskStatus::Todo).await;
    let (notifier, mut notes) = notifier();
    let session = BoardSession::open(Arc::new(fx.owner_session()), notifier, fx.board.id)
        .await
        .unwrap();

    session.delete_task(task.id).await.unwrap();
    let again = session.delete_task(task.id).await;

    assert!(matches!(again, Err(StoreError::NotFound(_))));
    let kinds: Vec<NotificationKind> = drained(&mut notes).into_iter().map(|n| n.kind).collect();
    assert_eq!(kinds, vec![NotificationKind::Success, NotificationKind::Error]);
    assert!(fx.store.snapshot_tasks(fx.board.id).is_empty());
    session.close().await;
}
