use std::sync::Arc;

use db::{
    RecordStore, StoreError,
    models::{
        board::{Board, CreateBoard},
        board_member::{BoardMember, CreateBoardMember, MemberRole},
    },
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::notify::{Notification, SharedNotifier};

/// Board and membership management on behalf of the session user.
pub struct BoardService {
    store: Arc<dyn RecordStore>,
    notifier: SharedNotifier,
}

impl BoardService {
    pub fn new(store: Arc<dyn RecordStore>, notifier: SharedNotifier) -> Self {
        Self { store, notifier }
    }

    pub async fn list_boards(&self) -> Result<Vec<Board>, StoreError> {
        self.store.list_boards().await.inspect_err(|error| {
            self.fail("Error Loading Boards", error.to_string());
        })
    }

    pub async fn list_members(&self, board_id: Uuid) -> Result<Vec<BoardMember>, StoreError> {
        self.store.list_members(board_id).await.inspect_err(|error| {
            self.fail("Error Loading Members", error.to_string());
        })
    }

    /// Creates the board, then the owner's membership row. The two writes
    /// are independent: if the second fails the board exists without an
    /// owner row and the error is surfaced.
    #[instrument(skip(self, description))]
    pub async fn create_board(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Board, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            let error = StoreError::validation("Board name is required");
            self.fail("Error", error.to_string());
            return Err(error);
        }

        let owner_id = self.store.session_user_id();
        let board = self
            .store
            .create_board(CreateBoard {
                name: name.to_string(),
                description: description
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
                owner_id,
            })
            .await
            .inspect_err(|error| self.fail("Error Creating Board", error.to_string()))?;

        let owner_row = self
            .store
            .create_member(CreateBoardMember {
                board_id: board.id,
                user_id: owner_id,
                role: MemberRole::Owner,
            })
            .await;
        if let Err(error) = owner_row {
            warn!(?error, board_id = %board.id, "board created without owner membership");
            self.fail("Error Creating Board", error.to_string());
            return Err(error);
        }

        info!(board_id = %board.id, "board created");
        self.notifier.notify(Notification::success(
            "Success!",
            format!("Board \"{}\" created successfully!", board.name),
        ));
        Ok(board)
    }

    #[instrument(skip(self))]
    pub async fn delete_board(&self, board_id: Uuid) -> Result<(), StoreError> {
        self.store.delete_board(board_id).await.inspect_err(|error| {
            self.fail("Error", format!("Failed to delete board: {error}"));
        })?;
        info!("board deleted");
        self.notifier.notify(Notification::success(
            "Board Deleted",
            "Board has been removed successfully.",
        ));
        Ok(())
    }

    /// Adds an existing user, looked up by email, as a `member`.
    #[instrument(skip(self))]
    pub async fn invite_member(
        &self,
        board_id: Uuid,
        email: &str,
    ) -> Result<BoardMember, StoreError> {
        let email = email.trim();
        if email.is_empty() {
            let error = StoreError::validation("Email is required");
            self.fail("Error", error.to_string());
            return Err(error);
        }

        let profile = match self.store.find_profile_by_email(email).await {
            Ok(Some(profile)) => profile,
            Ok(None) => {
                self.fail(
                    "User Not Found",
                    "No user found with this email address. They need to sign up first.",
                );
                return Err(StoreError::not_found("user"));
            }
            Err(error) => {
                self.fail("Error", format!("Failed to invite user: {error}"));
                return Err(error);
            }
        };

        match self.store.find_member(board_id, profile.id).await {
            Ok(Some(_)) => {
                let error = StoreError::validation("This user is already a member of this board.");
                self.fail("Already a Member", error.to_string());
                return Err(error);
            }
            Ok(None) => {}
            Err(error) => {
                self.fail("Error", format!("Failed to invite user: {error}"));
                return Err(error);
            }
        }

        let member = self
            .store
            .create_member(CreateBoardMember {
                board_id,
                user_id: profile.id,
                role: MemberRole::Member,
            })
            .await
            .inspect_err(|error| {
                self.fail("Error", format!("Failed to invite user: {error}"));
            })?;

        info!(user_id = %profile.id, "member invited");
        self.notifier.notify(Notification::success(
            "User Invited!",
            format!("{email} has been added to the board."),
        ));
        Ok(member)
    }

    #[instrument(skip(self))]
    pub async fn remove_member(&self, member_id: Uuid) -> Result<(), StoreError> {
        self.store.delete_member(member_id).await.inspect_err(|error| {
            self.fail("Error", format!("Failed to remove member: {error}"));
        })?;
        self.notifier.notify(Notification::success(
            "Member Removed",
            "Member has been removed from the board.",
        ));
        Ok(())
    }

    fn fail(&self, title: &str, description: impl Into<String>) {
        self.notifier.notify(Notification::error(title, description));
    }
}
