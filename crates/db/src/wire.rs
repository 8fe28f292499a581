//! Shapes shared by the hosted store's HTTP/websocket API and its client.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::store::{StoreError, TaskChange};

/// Frames pushed on a board's change feed websocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    #[serde(rename = "change")]
    Change(TaskChange),
    #[serde(rename = "error")]
    Error { message: String },
}

/// Body of every non-2xx API response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct ErrorBody {
    pub error: String,
    pub kind: String,
}

impl From<&StoreError> for ErrorBody {
    fn from(error: &StoreError) -> Self {
        let error_message = match error {
            StoreError::Transport(_) => "internal server error".to_string(),
            StoreError::NotFound(_) | StoreError::Forbidden(_) | StoreError::Validation(_) => {
                error.to_string()
            }
        };
        Self {
            error: error_message,
            kind: error.kind().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::store::ChangeKind;

    #[test]
    fn change_frames_are_tagged() {
        let board_id = Uuid::nil();
        let frame = ServerMessage::Change(TaskChange::resync(board_id));
        let json = serde_json::to_value(&frame).unwrap();

        assert_eq!(json["type"], "change");
        assert_eq!(json["data"]["op"], "RESYNC");
        assert_eq!(
            serde_json::from_value::<ServerMessage>(json).unwrap(),
            frame
        );
    }

    #[test]
    fn insert_op_matches_trigger_spelling() {
        let raw = format!(
            r#"{{"op":"INSERT","board_id":"{}","task_id":"{}"}}"#,
            Uuid::nil(),
            Uuid::nil()
        );
        let change: TaskChange = serde_json::from_str(&raw).unwrap();
        assert_eq!(change.op, ChangeKind::Insert);
    }

    #[test]
    fn transport_details_are_not_leaked() {
        let body = ErrorBody::from(&StoreError::transport("pool timed out"));
        assert_eq!(body.error, "internal server error");
        assert_eq!(body.kind, "transport");
    }
}
