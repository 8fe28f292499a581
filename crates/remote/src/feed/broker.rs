use kanban_db::TaskChange;
use tokio::sync::broadcast;
use uuid::Uuid;

/// What the database listener fans out to websocket sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Change(TaskChange),
    /// Notifications may have been lost; every board should reload.
    Resync,
}

impl FeedEvent {
    /// The frame a session watching `board_id` should forward, if any.
    pub fn for_board(&self, board_id: Uuid) -> Option<TaskChange> {
        match self {
            FeedEvent::Change(change) if change.board_id == board_id => Some(change.clone()),
            FeedEvent::Change(_) => None,
            FeedEvent::Resync => Some(TaskChange::resync(board_id)),
        }
    }
}

#[derive(Clone)]
pub struct ChangeBroker {
    sender: broadcast::Sender<FeedEvent>,
}

impl ChangeBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: FeedEvent) {
        if let Err(error) = self.sender.send(event) {
            tracing::debug!(?error, "no subscribers for task change");
        }
    }
}

impl Default for ChangeBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use kanban_db::ChangeKind;

    use super::*;

    #[tokio::test]
    async fn sessions_only_see_their_board() {
        let broker = ChangeBroker::new(8);
        let mut receiver = broker.subscribe();
        let watched = Uuid::new_v4();
        let other = Uuid::new_v4();

        broker.publish(FeedEvent::Change(TaskChange::new(
            ChangeKind::Update,
            other,
            Uuid::new_v4(),
        )));
        broker.publish(FeedEvent::Resync);

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.for_board(watched), None);
        let second = receiver.recv().await.unwrap();
        assert_eq!(second.for_board(watched), Some(TaskChange::resync(watched)));
    }
}
