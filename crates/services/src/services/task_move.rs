//! Lifecycle of a single drag-and-drop move.
//!
//! ```text
//!   Clean --Applied--> OptimisticPending --Persisted--> Clean
//!                             |
//!                       PersistFailed
//!                             v
//!                        Reconciling --Reloaded--> Clean
//! ```
//!
//! A move is `OptimisticPending` from the moment the cache shows the new
//! column until the store answers. On failure the optimistic state is thrown
//! away by reloading the whole board rather than undoing the one field,
//! since other clients may have changed the board in the meantime.

use db::models::task::TaskStatus;
use serde::Serialize;
use thiserror::Error;
use ts_rs::TS;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "snake_case")]
pub enum MoveState {
    #[default]
    Clean,
    OptimisticPending,
    Reconciling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveSignal {
    Applied,
    Persisted,
    PersistFailed,
    Reloaded,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoveError {
    #[error("illegal move transition: {signal:?} while {state:?}")]
    IllegalTransition { state: MoveState, signal: MoveSignal },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMove {
    pub task_id: Uuid,
    pub to: TaskStatus,
    pub position: i64,
    /// Column the task was in before the optimistic change, if it was cached.
    pub from: Option<TaskStatus>,
    state: MoveState,
}

impl TaskMove {
    pub fn new(task_id: Uuid, to: TaskStatus, position: i64) -> Self {
        Self {
            task_id,
            to,
            position,
            from: None,
            state: MoveState::Clean,
        }
    }

    pub fn state(&self) -> MoveState {
        self.state
    }

    pub fn advance(&mut self, signal: MoveSignal) -> Result<MoveState, MoveError> {
        let next = match (self.state, signal) {
            (MoveState::Clean, MoveSignal::Applied) => MoveState::OptimisticPending,
            (MoveState::OptimisticPending, MoveSignal::Persisted) => MoveState::Clean,
            (MoveState::OptimisticPending, MoveSignal::PersistFailed) => MoveState::Reconciling,
            (MoveState::Reconciling, MoveSignal::Reloaded) => MoveState::Clean,
            (state, signal) => return Err(MoveError::IllegalTransition { state, signal }),
        };
        self.state = next;
        Ok(next)
    }
}
