use std::sync::{
    Arc, RwLock, RwLockReadGuard, RwLockWriteGuard,
    atomic::{AtomicU64, Ordering},
};

use db::{
    RecordStore, StoreError,
    models::task::{Task, TaskStatus},
};
use tokio::sync::watch;
use uuid::Uuid;

/// Client-side mirror of one board's tasks, in the order the store returned
/// them. Replaced wholesale on every reload; the only in-place edit is the
/// optimistic status change made while a drag is being persisted.
#[derive(Debug, Clone)]
pub struct TaskCache {
    board_id: Uuid,
    tasks: Vec<Task>,
    revision: u64,
    applied_generation: u64,
}

impl TaskCache {
    pub fn new(board_id: Uuid) -> Self {
        Self {
            board_id,
            tasks: Vec::new(),
            revision: 0,
            applied_generation: 0,
        }
    }

    pub fn board_id(&self) -> Uuid {
        self.board_id
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, task_id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    /// Bumped on every visible change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn replace(&mut self, tasks: Vec<Task>) {
        let board_id = self.board_id;
        let before = tasks.len();
        self.tasks = tasks
            .into_iter()
            .filter(|task| task.board_id == board_id)
            .collect();
        if self.tasks.len() != before {
            tracing::warn!(
                %board_id,
                dropped = before - self.tasks.len(),
                "ignored tasks belonging to another board"
            );
        }
        self.revision += 1;
    }

    /// Applies a fetched snapshot unless a newer reload already landed.
    pub fn replace_from(&mut self, generation: u64, tasks: Vec<Task>) -> bool {
        if generation <= self.applied_generation {
            return false;
        }
        self.applied_generation = generation;
        self.replace(tasks);
        true
    }

    /// Returns the previous status, or `None` if the task is not cached.
    pub fn apply_status_change(&mut self, task_id: Uuid, status: TaskStatus) -> Option<TaskStatus> {
        let task = self.tasks.iter_mut().find(|task| task.id == task_id)?;
        let previous = std::mem::replace(&mut task.status, status);
        self.revision += 1;
        Some(previous)
    }

    /// Tasks in one column, in cache order. The iterator is `Clone`, so a
    /// view can be walked more than once.
    pub fn by_status(&self, status: TaskStatus) -> impl Iterator<Item = &Task> + Clone + '_ {
        self.tasks.iter().filter(move |task| task.status == status)
    }

    pub fn count_in(&self, status: TaskStatus) -> usize {
        self.by_status(status).count()
    }
}

/// Ticket taken before a reload's fetch is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReloadTicket(u64);

struct Inner {
    cache: RwLock<TaskCache>,
    changed: watch::Sender<u64>,
    generations: AtomicU64,
}

/// Handle to the active board's [`TaskCache`] shared by the drag controller,
/// the realtime reconciler and the rendering layer.
#[derive(Clone)]
pub struct SharedTaskCache {
    inner: Arc<Inner>,
}

impl SharedTaskCache {
    pub fn new(board_id: Uuid) -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                cache: RwLock::new(TaskCache::new(board_id)),
                changed,
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn board_id(&self) -> Uuid {
        self.read().board_id()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TaskCache> {
        self.inner
            .cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TaskCache> {
        self.inner
            .cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> Vec<Task> {
        self.read().tasks().to_vec()
    }

    pub fn by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.read().by_status(status).cloned().collect()
    }

    /// Receives the cache revision each time the cache changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.changed.subscribe()
    }

    pub fn apply_status_change(&self, task_id: Uuid, status: TaskStatus) -> Option<TaskStatus> {
        let (previous, revision) = {
            let mut cache = self.write();
            let previous = cache.apply_status_change(task_id, status);
            (previous, cache.revision())
        };
        if previous.is_some() {
            self.signal(revision);
        }
        previous
    }

    pub fn replace(&self, tasks: Vec<Task>) {
        let ticket = self.begin_reload();
        self.complete_reload(ticket, tasks);
    }

    pub fn begin_reload(&self) -> ReloadTicket {
        ReloadTicket(self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Returns `false` when the snapshot was older than what is cached.
    pub fn complete_reload(&self, ticket: ReloadTicket, tasks: Vec<Task>) -> bool {
        let (applied, revision) = {
            let mut cache = self.write();
            let applied = cache.replace_from(ticket.0, tasks);
            (applied, cache.revision())
        };
        if applied {
            self.signal(revision);
        } else {
            tracing::debug!(generation = ticket.0, "discarded stale task snapshot");
        }
        applied
    }

    /// Full reload of the board's tasks from the store.
    pub async fn reload(&self, store: &dyn RecordStore) -> Result<bool, StoreError> {
        let board_id = self.board_id();
        let ticket = self.begin_reload();
        let tasks = store.fetch_tasks(board_id).await?;
        Ok(self.complete_reload(ticket, tasks))
    }

    fn signal(&self, revision: u64) {
        self.inner.changed.send_replace(revision);
    }
}
