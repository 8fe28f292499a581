//! In-process record store with the same authorization and change-feed
//! semantics as the hosted one. Used for local boards and tests.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use uuid::Uuid;

use crate::{
    models::{
        board::{Board, CreateBoard},
        board_member::{BoardMember, CreateBoardMember, MemberRole},
        profile::Profile,
        task::{CreateTask, Task, UpdateTask},
    },
    store::{ChangeKind, RecordStore, StoreError, Subscription, TaskChange},
};

const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Default)]
struct State {
    profiles: Vec<Profile>,
    boards: Vec<Board>,
    members: Vec<BoardMember>,
    tasks: Vec<Task>,
}

impl State {
    fn board(&self, board_id: Uuid) -> Result<&Board, StoreError> {
        self.boards
            .iter()
            .find(|board| board.id == board_id)
            .ok_or_else(|| StoreError::not_found("board"))
    }

    fn is_member(&self, board_id: Uuid, user_id: Uuid) -> bool {
        self.members
            .iter()
            .any(|m| m.board_id == board_id && m.user_id == user_id)
    }

    /// Resolves the board and checks the user may touch it.
    fn require_member(&self, board_id: Uuid, user_id: Uuid) -> Result<&Board, StoreError> {
        let board = self.board(board_id)?;
        if self.is_member(board_id, user_id) {
            Ok(board)
        } else {
            Err(StoreError::forbidden("not a member of this board"))
        }
    }

    fn task_index(&self, task_id: Uuid) -> Result<usize, StoreError> {
        self.tasks
            .iter()
            .position(|task| task.id == task_id)
            .ok_or_else(|| StoreError::not_found("task"))
    }
}

struct Shared {
    state: Mutex<State>,
    changes: broadcast::Sender<TaskChange>,
}

/// Shared backing data. Hand out per-user handles with [`MemoryStore::session`].
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                changes,
            }),
        }
    }

    /// Stands in for signup: profiles are created by the identity provider.
    pub fn register_profile(&self, email: &str, full_name: Option<&str>) -> Profile {
        let now = Utc::now();
        let profile = Profile {
            id: Uuid::new_v4(),
            email: email.to_string(),
            full_name: full_name.map(str::to_string),
            avatar_url: None,
            created_at: now,
            updated_at: now,
        };
        self.state().profiles.push(profile.clone());
        profile
    }

    pub fn session(&self, user_id: Uuid) -> MemorySession {
        MemorySession {
            store: self.clone(),
            user_id,
        }
    }

    /// Raw view of a board's tasks in store order, bypassing authorization.
    pub fn snapshot_tasks(&self, board_id: Uuid) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .state()
            .tasks
            .iter()
            .filter(|task| task.board_id == board_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.position);
        tasks
    }

    /// Number of live change-feed subscriptions across all boards.
    pub fn feed_subscribers(&self) -> usize {
        self.shared.changes.receiver_count()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, change: TaskChange) {
        if let Err(error) = self.shared.changes.send(change) {
            tracing::debug!(?error, "no subscribers for task change");
        }
    }
}

/// A [`MemoryStore`] handle acting as one user.
#[derive(Clone)]
pub struct MemorySession {
    store: MemoryStore,
    user_id: Uuid,
}

#[async_trait]
impl RecordStore for MemorySession {
    fn session_user_id(&self) -> Uuid {
        self.user_id
    }

    async fn fetch_tasks(&self, board_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let state = self.store.state();
        state.require_member(board_id, self.user_id)?;
        let mut tasks: Vec<Task> = state
            .tasks
            .iter()
            .filter(|task| task.board_id == board_id)
            .cloned()
            .collect();
        // stable: equal positions keep insertion order
        tasks.sort_by_key(|task| task.position);
        Ok(tasks)
    }

    async fn create_task(&self, data: CreateTask) -> Result<Task, StoreError> {
        let title = data.title.trim();
        if title.is_empty() {
            return Err(StoreError::validation("Task title is required"));
        }
        if data.position.is_some_and(|p| p < 0) {
            return Err(StoreError::validation("Task position must be non-negative"));
        }

        let task = {
            let mut state = self.store.state();
            state.require_member(data.board_id, self.user_id)?;
            let position = data.position.unwrap_or_else(|| {
                state
                    .tasks
                    .iter()
                    .filter(|t| t.board_id == data.board_id && t.status == data.status)
                    .count() as i64
            });
            let now = Utc::now();
            let task = Task {
                id: Uuid::new_v4(),
                board_id: data.board_id,
                title: title.to_string(),
                description: data.description,
                status: data.status,
                assignee_id: data.assignee_id,
                created_by: data.created_by,
                attachment_url: data.attachment_url,
                position,
                created_at: now,
                updated_at: now,
            };
            state.tasks.push(task.clone());
            task
        };

        self.store
            .publish(TaskChange::new(ChangeKind::Insert, task.board_id, task.id));
        Ok(task)
    }

    async fn update_task(&self, task_id: Uuid, data: UpdateTask) -> Result<Task, StoreError> {
        if data.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(StoreError::validation("Task title is required"));
        }
        if data.position.is_some_and(|p| p < 0) {
            return Err(StoreError::validation("Task position must be non-negative"));
        }

        let task = {
            let mut state = self.store.state();
            let index = state.task_index(task_id)?;
            let board_id = state.tasks[index].board_id;
            state.require_member(board_id, self.user_id)?;
            let task = &mut state.tasks[index];
            let before = task.clone();
            data.apply(task);
            if *task != before {
                task.updated_at = Utc::now();
            }
            task.clone()
        };

        self.store
            .publish(TaskChange::new(ChangeKind::Update, task.board_id, task.id));
        Ok(task)
    }

    async fn delete_task(&self, task_id: Uuid) -> Result<(), StoreError> {
        let removed = {
            let mut state = self.store.state();
            let index = state.task_index(task_id)?;
            let board_id = state.tasks[index].board_id;
            state.require_member(board_id, self.user_id)?;
            state.tasks.remove(index)
        };

        self.store.publish(TaskChange::new(
            ChangeKind::Delete,
            removed.board_id,
            removed.id,
        ));
        Ok(())
    }

    async fn subscribe(&self, board_id: Uuid) -> Result<Subscription, StoreError> {
        self.store.state().require_member(board_id, self.user_id)?;

        let receiver = self.store.shared.changes.subscribe();
        let events = BroadcastStream::new(receiver)
            .filter_map(move |next| async move {
                match next {
                    Ok(change) if change.board_id == board_id => Some(change),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(%board_id, skipped, "task change feed lagged");
                        Some(TaskChange::resync(board_id))
                    }
                }
            })
            .boxed();

        Ok(Subscription::new(board_id, events))
    }

    async fn list_boards(&self) -> Result<Vec<Board>, StoreError> {
        let state = self.store.state();
        let mut boards: Vec<Board> = state
            .boards
            .iter()
            .filter(|board| state.is_member(board.id, self.user_id))
            .cloned()
            .collect();
        boards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(boards)
    }

    async fn fetch_board(&self, board_id: Uuid) -> Result<Board, StoreError> {
        let state = self.store.state();
        state.require_member(board_id, self.user_id).cloned()
    }

    async fn create_board(&self, data: CreateBoard) -> Result<Board, StoreError> {
        let name = data.name.trim();
        if name.is_empty() {
            return Err(StoreError::validation("Board name is required"));
        }
        if data.owner_id != self.user_id {
            return Err(StoreError::forbidden("boards can only be created for yourself"));
        }

        let now = Utc::now();
        let board = Board {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: data.description,
            owner_id: data.owner_id,
            created_at: now,
            updated_at: now,
        };
        self.store.state().boards.push(board.clone());
        Ok(board)
    }

    async fn delete_board(&self, board_id: Uuid) -> Result<(), StoreError> {
        let removed_tasks: Vec<Uuid> = {
            let mut state = self.store.state();
            let board = state.board(board_id)?;
            if board.owner_id != self.user_id {
                return Err(StoreError::forbidden("only the board owner can delete it"));
            }
            state.boards.retain(|b| b.id != board_id);
            state.members.retain(|m| m.board_id != board_id);
            let removed = state
                .tasks
                .iter()
                .filter(|t| t.board_id == board_id)
                .map(|t| t.id)
                .collect();
            state.tasks.retain(|t| t.board_id != board_id);
            removed
        };

        for task_id in removed_tasks {
            self.store
                .publish(TaskChange::new(ChangeKind::Delete, board_id, task_id));
        }
        Ok(())
    }

    async fn list_members(&self, board_id: Uuid) -> Result<Vec<BoardMember>, StoreError> {
        let state = self.store.state();
        state.require_member(board_id, self.user_id)?;
        Ok(state
            .members
            .iter()
            .filter(|m| m.board_id == board_id)
            .cloned()
            .collect())
    }

    async fn find_member(
        &self,
        board_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<BoardMember>, StoreError> {
        let state = self.store.state();
        state.require_member(board_id, self.user_id)?;
        Ok(state
            .members
            .iter()
            .find(|m| m.board_id == board_id && m.user_id == user_id)
            .cloned())
    }

    async fn create_member(&self, data: CreateBoardMember) -> Result<BoardMember, StoreError> {
        let mut state = self.store.state();
        let board = state.board(data.board_id)?;
        // The owner may seed the first membership row; everyone else must
        // already belong to the board.
        if board.owner_id != self.user_id && !state.is_member(data.board_id, self.user_id) {
            return Err(StoreError::forbidden("not a member of this board"));
        }
        if data.role == MemberRole::Owner && data.user_id != board.owner_id {
            return Err(StoreError::forbidden(
                "only the board owner can hold the owner role",
            ));
        }
        if !state.profiles.iter().any(|p| p.id == data.user_id) {
            return Err(StoreError::not_found("user"));
        }
        if state.is_member(data.board_id, data.user_id) {
            return Err(StoreError::validation(
                "This user is already a member of this board.",
            ));
        }

        let member = BoardMember {
            id: Uuid::new_v4(),
            board_id: data.board_id,
            user_id: data.user_id,
            role: data.role,
            joined_at: Utc::now(),
        };
        state.members.push(member.clone());
        Ok(member)
    }

    async fn delete_member(&self, member_id: Uuid) -> Result<(), StoreError> {
        let mut state = self.store.state();
        let index = state
            .members
            .iter()
            .position(|m| m.id == member_id)
            .ok_or_else(|| StoreError::not_found("board member"))?;
        let member = &state.members[index];
        let board = state.board(member.board_id)?;

        if member.role == MemberRole::Owner {
            return Err(StoreError::validation("The board owner cannot be removed"));
        }
        if board.owner_id != self.user_id && member.user_id != self.user_id {
            return Err(StoreError::forbidden(
                "only the board owner can remove other members",
            ));
        }

        state.members.remove(index);
        Ok(())
    }

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, StoreError> {
        let email = email.trim();
        Ok(self
            .store
            .state()
            .profiles
            .iter()
            .find(|p| p.email.eq_ignore_ascii_case(email))
            .cloned())
    }
}
