//! The record store seam: everything the board client needs from the hosted
//! database, plus the realtime change feed.

use std::{
    pin::Pin,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::{Stream, StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use ts_rs::TS;
use uuid::Uuid;

use crate::models::{
    board::{Board, CreateBoard},
    board_member::{BoardMember, CreateBoardMember},
    profile::Profile,
    task::{CreateTask, Task, UpdateTask},
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0}")]
    Validation(String),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn transport(error: impl std::fmt::Display) -> Self {
        Self::Transport(error.to_string())
    }

    /// Short machine-friendly kind, used in logs and wire errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::Validation(_) => "validation",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
    /// The feed dropped events; the receiver must assume anything changed.
    Resync,
}

/// A row-level change on the `tasks` collection of one board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct TaskChange {
    pub op: ChangeKind,
    pub board_id: Uuid,
    pub task_id: Option<Uuid>,
}

impl TaskChange {
    pub fn new(op: ChangeKind, board_id: Uuid, task_id: Uuid) -> Self {
        Self {
            op,
            board_id,
            task_id: Some(task_id),
        }
    }

    pub fn resync(board_id: Uuid) -> Self {
        Self {
            op: ChangeKind::Resync,
            board_id,
            task_id: None,
        }
    }
}

/// Live feed of task changes for a single board. Dropping it unsubscribes.
pub struct Subscription {
    board_id: Uuid,
    events: BoxStream<'static, TaskChange>,
    pump: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(board_id: Uuid, events: BoxStream<'static, TaskChange>) -> Self {
        Self {
            board_id,
            events,
            pump: None,
        }
    }

    /// A feed backed by a background task that is aborted when the
    /// subscription goes away.
    pub fn with_pump(
        board_id: Uuid,
        events: BoxStream<'static, TaskChange>,
        pump: JoinHandle<()>,
    ) -> Self {
        Self {
            board_id,
            events,
            pump: Some(pump),
        }
    }

    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    pub async fn next_change(&mut self) -> Option<TaskChange> {
        self.events.next().await
    }

    pub fn unsubscribe(self) {
        tracing::debug!(board_id = %self.board_id, "unsubscribing from task changes");
    }
}

impl Stream for Subscription {
    type Item = TaskChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Record operations available to a signed-in user. Implementations enforce
/// board membership for every board and task operation.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The user this store acts on behalf of.
    fn session_user_id(&self) -> Uuid;

    /// Tasks of a board ordered by `position`.
    async fn fetch_tasks(&self, board_id: Uuid) -> Result<Vec<Task>, StoreError>;
    async fn create_task(&self, data: CreateTask) -> Result<Task, StoreError>;
    async fn update_task(&self, task_id: Uuid, data: UpdateTask) -> Result<Task, StoreError>;
    async fn delete_task(&self, task_id: Uuid) -> Result<(), StoreError>;
    async fn subscribe(&self, board_id: Uuid) -> Result<Subscription, StoreError>;

    /// Boards the session user is a member of, newest first.
    async fn list_boards(&self) -> Result<Vec<Board>, StoreError>;
    async fn fetch_board(&self, board_id: Uuid) -> Result<Board, StoreError>;
    async fn create_board(&self, data: CreateBoard) -> Result<Board, StoreError>;
    async fn delete_board(&self, board_id: Uuid) -> Result<(), StoreError>;

    async fn list_members(&self, board_id: Uuid) -> Result<Vec<BoardMember>, StoreError>;
    async fn find_member(
        &self,
        board_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<BoardMember>, StoreError>;
    async fn create_member(&self, data: CreateBoardMember) -> Result<BoardMember, StoreError>;
    async fn delete_member(&self, member_id: Uuid) -> Result<(), StoreError>;

    async fn find_profile_by_email(&self, email: &str) -> Result<Option<Profile>, StoreError>;
}
