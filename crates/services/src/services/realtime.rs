use std::sync::Arc;

use db::{RecordStore, StoreError, Subscription};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::task_cache::SharedTaskCache;

/// Keeps a board's [`SharedTaskCache`] in step with the store: every change
/// notification for the board triggers a full reload. Events are not
/// coalesced; redundant reloads are harmless.
pub struct RealtimeReconciler {
    board_id: Uuid,
    task: Option<JoinHandle<()>>,
}

impl RealtimeReconciler {
    /// Subscribes to the cache's board and starts reconciling in the
    /// background. The subscription is live before this returns, so a fetch
    /// issued afterwards cannot miss a change.
    pub async fn start(
        store: Arc<dyn RecordStore>,
        cache: SharedTaskCache,
    ) -> Result<Self, StoreError> {
        let board_id = cache.board_id();
        let subscription = store.subscribe(board_id).await?;
        info!(%board_id, "realtime reconciler started");

        let task = tokio::spawn(reconcile(store, cache, subscription));
        Ok(Self {
            board_id,
            task: Some(task),
        })
    }

    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Tears down the subscription and waits for the loop to exit.
    pub async fn stop(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
        info!(board_id = %self.board_id, "realtime reconciler stopped");
    }
}

impl Drop for RealtimeReconciler {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn reconcile(
    store: Arc<dyn RecordStore>,
    cache: SharedTaskCache,
    mut subscription: Subscription,
) {
    let board_id = cache.board_id();

    while let Some(change) = subscription.next_change().await {
        if change.board_id != board_id {
            debug!(%board_id, other = %change.board_id, "ignoring change for another board");
            continue;
        }

        debug!(op = ?change.op, task_id = ?change.task_id, "task change observed; reloading");
        match cache.reload(store.as_ref()).await {
            Ok(true) => {}
            Ok(false) => debug!("reload superseded by a newer one"),
            Err(error) => warn!(?error, %board_id, "failed to reload tasks after change"),
        }
    }

    debug!(%board_id, "task change feed closed");
}
