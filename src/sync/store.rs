//! Cached lists and tasks with time-based revalidation.
//!
//! The store mirrors server state: every mutation goes to the remote first
//! and is followed by a full refresh, never a local patch. Each refresh
//! publishes a new immutable [`StoreView`] to subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, try_join_all};
use serde_json::Value;
use tokio::sync::watch;

use super::SyncStatus;
use super::clock::Clock;
use super::inbox::InboxBootstrap;
use super::index::{IndexMemo, Indexes};
use super::paginate::{PageCap, collect_pages};
use super::persist::{self, PersistedState, SnapshotStorage};
use super::resilient::{Degraded, ResilientReader};
use crate::config::SyncConfig;
use crate::core::list::{LIST_FIELDS, ListUpdate, NewList, TaskList};
use crate::core::task::{NewTask, TASK_FIELDS, Task, TaskStatus, TaskUpdate};
use crate::error::{RemoteError, SyncError};
use crate::remote::{
    Condition, ListQuery, RecordKind, RemoteApi, create_record, decode, decode_page,
    update_record,
};

type SharedRefresh = Shared<BoxFuture<'static, Result<Arc<StoreView>, SyncError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreSettings {
    pub ttl_ms: i64,
    pub list_page_limit: u32,
    pub task_page_size: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for StoreSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            ttl_ms: config.cache_ttl_ms(),
            list_page_limit: config.list_page_limit,
            task_page_size: config.task_page_size,
        }
    }
}

/// The cached collections. Replaced wholesale, never edited in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub lists: Arc<Vec<TaskList>>,
    pub tasks: Arc<Vec<Task>>,
    pub last_loaded_at_ms: Option<i64>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty() && self.tasks.is_empty()
    }

    fn to_persisted(&self) -> PersistedState {
        PersistedState {
            lists: self.lists.as_ref().clone(),
            tasks: self.tasks.as_ref().clone(),
            last_loaded_at_ms: self.last_loaded_at_ms,
        }
    }
}

impl From<PersistedState> for Snapshot {
    fn from(state: PersistedState) -> Self {
        Self {
            lists: Arc::new(state.lists),
            tasks: Arc::new(state.tasks),
            last_loaded_at_ms: state.last_loaded_at_ms,
        }
    }
}

/// What subscribers see: the snapshot, its indexes and the refresh outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreView {
    pub snapshot: Snapshot,
    pub indexes: Arc<Indexes>,
    pub status: SyncStatus,
    /// Fields the last refresh had to leave out.
    pub degraded: Vec<Degraded>,
}

pub struct TaskStore {
    remote: Arc<dyn RemoteApi>,
    storage: Arc<dyn SnapshotStorage>,
    clock: Arc<dyn Clock>,
    owner: String,
    settings: StoreSettings,
    inbox: InboxBootstrap,
    view_tx: watch::Sender<Arc<StoreView>>,
    memo: Mutex<IndexMemo>,
    inflight: Mutex<Option<(u64, SharedRefresh)>>,
    generation: AtomicU64,
    /// Bumped on sign-out; a refresh started before it never publishes.
    epoch: AtomicU64,
    /// Fields known to be missing upstream, skipped from the first read.
    omitted: Mutex<HashMap<RecordKind, Vec<String>>>,
    corrupt_logged: AtomicBool,
}

impl TaskStore {
    pub fn new(
        remote: Arc<dyn RemoteApi>,
        storage: Arc<dyn SnapshotStorage>,
        clock: Arc<dyn Clock>,
        owner: impl Into<String>,
        inbox_name: impl Into<String>,
        settings: StoreSettings,
    ) -> Arc<Self> {
        let empty = Arc::new(StoreView {
            snapshot: Snapshot::default(),
            indexes: Arc::new(Indexes::default()),
            status: SyncStatus::Idle,
            degraded: Vec::new(),
        });
        let (view_tx, _) = watch::channel(empty);
        Arc::new(Self {
            remote,
            storage,
            clock,
            owner: owner.into(),
            settings,
            inbox: InboxBootstrap::new(inbox_name),
            view_tx,
            memo: Mutex::new(IndexMemo::default()),
            inflight: Mutex::new(None),
            generation: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            omitted: Mutex::new(HashMap::new()),
            corrupt_logged: AtomicBool::new(false),
        })
    }

    pub fn current(&self) -> Arc<StoreView> {
        self.view_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreView>> {
        self.view_tx.subscribe()
    }

    pub fn inbox_list_id(&self) -> Option<String> {
        self.inbox.remembered_id()
    }

    /// Replace the in-memory snapshot with the persisted one, if valid.
    ///
    /// Never fails: unreadable or malformed payloads leave an empty snapshot.
    pub async fn load_persisted(&self) -> Arc<StoreView> {
        let snapshot = match self.storage.read().await {
            Ok(Some(raw)) => match persist::decode(&raw) {
                Ok(state) => Snapshot::from(state),
                Err(reason) => {
                    if !self.corrupt_logged.swap(true, Ordering::Relaxed) {
                        log::warn!("Discarding cached snapshot for {}: {:?}", self.owner, reason);
                    }
                    Snapshot::default()
                }
            },
            Ok(None) => Snapshot::default(),
            Err(e) => {
                log::warn!("Could not read cached snapshot: {}", e);
                Snapshot::default()
            }
        };
        log::debug!(
            "Loaded {} lists, {} tasks from cache",
            snapshot.lists.len(),
            snapshot.tasks.len()
        );
        self.publish(snapshot, SyncStatus::Idle, Vec::new())
    }

    /// A load time in the future counts as stale.
    pub fn is_fresh(&self) -> bool {
        self.current()
            .snapshot
            .last_loaded_at_ms
            .is_some_and(|at| (0..self.settings.ttl_ms).contains(&(self.clock.now_ms() - at)))
    }

    /// Return the cached view while fresh, otherwise refresh.
    pub async fn ensure_fresh(self: &Arc<Self>) -> Result<Arc<StoreView>, SyncError> {
        if self.is_fresh() {
            return Ok(self.current());
        }
        self.refresh().await
    }

    /// Refresh from the remote. Concurrent callers share one in-flight run.
    ///
    /// With a previous non-empty snapshot a failure still returns `Ok`, the
    /// view carrying [`SyncStatus::Stale`]. Without one the error is returned.
    pub async fn refresh(self: &Arc<Self>) -> Result<Arc<StoreView>, SyncError> {
        let (generation, shared) = {
            let mut slot = self.lock_inflight();
            match slot.as_ref() {
                Some((generation, shared)) => (*generation, shared.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let this = Arc::clone(self);
                    // Spawned so the run completes even if every caller goes away.
                    let handle = tokio::spawn(async move {
                        let result = this.run_refresh().await;
                        this.release_inflight(generation);
                        result
                    });
                    let shared = async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(SyncError::Aborted(e.to_string())))
                    }
                    .boxed()
                    .shared();
                    *slot = Some((generation, shared.clone()));
                    (generation, shared)
                }
            }
        };
        let result = shared.await;
        self.release_inflight(generation);
        result
    }

    /// Mark the snapshot stale without discarding it.
    pub fn expire(&self) {
        let view = self.current();
        let mut snapshot = view.snapshot.clone();
        snapshot.last_loaded_at_ms = None;
        self.publish(snapshot, view.status.clone(), view.degraded.clone());
    }

    pub async fn expire_and_refresh(self: &Arc<Self>) -> Result<Arc<StoreView>, SyncError> {
        self.expire();
        self.refresh().await
    }

    /// Drop this identity's cached data, in memory and on disk.
    pub async fn sign_out(&self) -> Result<(), SyncError> {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        // Let a running refresh bail out or finish writing before the wipe.
        let running = self.lock_inflight().take();
        if let Some((_, running)) = running {
            let _ = running.await;
        }
        self.inbox.forget();
        self.lock_omitted().clear();
        self.publish(Snapshot::default(), SyncStatus::Idle, Vec::new());
        self.storage.clear().await?;
        log::info!("Cleared cached data for {}", self.owner);
        Ok(())
    }

    pub async fn create_list(self: &Arc<Self>, input: NewList) -> Result<TaskList, SyncError> {
        let created: TaskList =
            create_record(self.remote.as_ref(), RecordKind::List, &self.owner, &input).await?;
        self.after_mutation().await;
        Ok(created)
    }

    pub async fn update_list(
        self: &Arc<Self>,
        id: &str,
        update: ListUpdate,
    ) -> Result<TaskList, SyncError> {
        let updated: TaskList =
            update_record(self.remote.as_ref(), RecordKind::List, id, &update, None).await?;
        self.after_mutation().await;
        Ok(updated)
    }

    pub async fn set_list_favorite(
        self: &Arc<Self>,
        id: &str,
        favorite: bool,
    ) -> Result<TaskList, SyncError> {
        let update = ListUpdate {
            is_favorite: Some(favorite),
            ..Default::default()
        };
        self.update_list(id, update).await
    }

    /// Delete a list and every task in it. The inbox cannot be deleted.
    pub async fn delete_list(self: &Arc<Self>, id: &str) -> Result<(), SyncError> {
        let named_inbox = self
            .current()
            .indexes
            .lists_by_id
            .get(id)
            .is_some_and(|l| l.has_name(self.inbox.name()));
        if named_inbox || self.inbox.remembered_id().as_deref() == Some(id) {
            return Err(SyncError::InboxProtected(id.to_string()));
        }
        let tasks = self.fetch_tasks(id).await?;
        for task in &tasks {
            self.remote.delete(RecordKind::Task, &task.id).await?;
        }
        self.remote.delete(RecordKind::List, id).await?;
        log::info!("Deleted list {} with {} task(s)", id, tasks.len());
        self.after_mutation().await;
        Ok(())
    }

    pub async fn create_task(self: &Arc<Self>, input: NewTask) -> Result<Task, SyncError> {
        if let Some(parent) = &input.parent_task_id {
            self.check_parent(parent, &input.list_id, "new task")?;
        }
        let status = input.status;
        let input = if input.status.is_done() == input.completed_at.is_some() {
            input
        } else {
            input.with_status(status, self.clock.now())
        };
        let created: Task =
            create_record(self.remote.as_ref(), RecordKind::Task, &self.owner, &input).await?;
        self.after_mutation().await;
        Ok(created)
    }

    pub async fn update_task(
        self: &Arc<Self>,
        id: &str,
        update: TaskUpdate,
    ) -> Result<Task, SyncError> {
        if let Some(Some(parent)) = &update.parent_task_id {
            let current = self.current();
            if let Some(task) = current.indexes.tasks_by_id.get(id) {
                self.check_parent(parent, &task.list_id, id)?;
            }
        }
        let updated: Task =
            update_record(self.remote.as_ref(), RecordKind::Task, id, &update, None).await?;
        self.after_mutation().await;
        Ok(updated)
    }

    /// Change a task's status, writing the matching completion time.
    pub async fn set_task_status(
        self: &Arc<Self>,
        id: &str,
        status: TaskStatus,
    ) -> Result<Task, SyncError> {
        let update = TaskUpdate::default().status(status, self.clock.now());
        self.update_task(id, update).await
    }

    /// Delete a task together with its subtasks.
    pub async fn delete_task(self: &Arc<Self>, id: &str) -> Result<(), SyncError> {
        let current = self.current();
        let mut doomed = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(next) = stack.pop() {
            stack.extend(current.indexes.children_of(&next).iter().map(|c| c.id.clone()));
            doomed.push(next);
        }
        // Children first, so a partial failure never strands orphans.
        for task_id in doomed.iter().rev() {
            self.remote.delete(RecordKind::Task, task_id).await?;
        }
        self.after_mutation().await;
        Ok(())
    }

    fn check_parent(&self, parent: &str, list_id: &str, task: &str) -> Result<(), SyncError> {
        let current = self.current();
        match current.indexes.tasks_by_id.get(parent) {
            Some(p) if p.list_id != list_id || p.id == task => Err(SyncError::InvalidParent {
                task: task.to_string(),
                parent: parent.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Refresh with a run that starts after the write.
    async fn after_mutation(self: &Arc<Self>) {
        // A run already in flight may have read before the write landed.
        let running = self.lock_inflight().as_ref().map(|(_, shared)| shared.clone());
        if let Some(running) = running {
            let _ = running.await;
        }
        if let Err(e) = self.refresh().await {
            log::warn!("Refresh after mutation failed: {}", e);
        }
    }

    async fn run_refresh(&self) -> Result<Arc<StoreView>, SyncError> {
        let epoch = self.epoch.load(Ordering::SeqCst);
        let previous = self.current();
        self.publish(
            previous.snapshot.clone(),
            SyncStatus::Syncing,
            previous.degraded.clone(),
        );

        let fetched = self.fetch_everything().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            log::info!("Discarding refresh for {}: signed out", self.owner);
            return Err(SyncError::Aborted("signed out during refresh".into()));
        }
        match fetched {
            Ok((lists, tasks, degraded)) => {
                let now = self.clock.now_ms();
                let snapshot = Snapshot {
                    lists: Arc::new(lists),
                    tasks: Arc::new(tasks),
                    last_loaded_at_ms: Some(now),
                };
                self.persist(&snapshot).await;
                log::info!(
                    "Refreshed {} lists, {} tasks",
                    snapshot.lists.len(),
                    snapshot.tasks.len()
                );
                Ok(self.publish(snapshot, SyncStatus::LastSynced(now), degraded))
            }
            Err(err) if !previous.snapshot.is_empty() => {
                log::warn!("Refresh failed, serving cached data: {}", err);
                Ok(self.publish(
                    previous.snapshot.clone(),
                    SyncStatus::Stale(err.to_string()),
                    previous.degraded.clone(),
                ))
            }
            Err(err) => {
                log::error!("Refresh failed with nothing cached: {}", err);
                self.publish(
                    Snapshot::default(),
                    SyncStatus::Failed(err.to_string()),
                    Vec::new(),
                );
                Err(err)
            }
        }
    }

    async fn fetch_everything(&self) -> Result<(Vec<TaskList>, Vec<Task>, Vec<Degraded>), SyncError> {
        let query = ListQuery::new(RecordKind::List, LIST_FIELDS)
            .filter(Condition::eq("owner", self.owner.as_str()))
            .limit(self.settings.list_page_limit);
        let reader = ResilientReader::new(self.remote.as_ref(), query)
            .omitting(&self.known_missing(RecordKind::List));
        let page = reader.read_page(None).await;
        self.remember_missing(RecordKind::List, reader.omitted());
        let page = page?;
        if page.next_token.is_some() {
            log::warn!(
                "More than {} lists; only the first page is loaded",
                self.settings.list_page_limit
            );
        }

        let lists: Vec<TaskList> = decode_page(RecordKind::List, page)?
            .items
            .into_iter()
            .flatten()
            .collect();
        let lists = self
            .inbox
            .ensure_inbox_list_exists(self.remote.as_ref(), &self.owner, lists)
            .await?;

        let per_list = try_join_all(lists.iter().map(|l| self.fetch_tasks(&l.id))).await?;
        let tasks = per_list.into_iter().flatten().collect();
        Ok((lists, tasks, self.degraded_fields()))
    }

    /// All tasks of one list, following every page.
    async fn fetch_tasks(&self, list_id: &str) -> Result<Vec<Task>, RemoteError> {
        let query = ListQuery::new(RecordKind::Task, TASK_FIELDS)
            .filter(Condition::eq("listId", list_id))
            .limit(self.settings.task_page_size);
        let reader = ResilientReader::new(self.remote.as_ref(), query)
            .omitting(&self.known_missing(RecordKind::Task));
        let collected = collect_pages(|token| reader.read_page(token), PageCap::none()).await;
        self.remember_missing(RecordKind::Task, reader.omitted());
        collected?
            .items
            .into_iter()
            .map(|v: Value| decode::<Task>(RecordKind::Task, v))
            .collect()
    }

    async fn persist(&self, snapshot: &Snapshot) {
        let written = match persist::encode(&snapshot.to_persisted()) {
            Ok(payload) => self.storage.write(&payload).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            log::warn!("Could not persist snapshot: {}", e);
        }
    }

    fn publish(
        &self,
        snapshot: Snapshot,
        status: SyncStatus,
        degraded: Vec<Degraded>,
    ) -> Arc<StoreView> {
        let indexes = self
            .memo
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&snapshot.lists, &snapshot.tasks);
        let view = Arc::new(StoreView {
            snapshot,
            indexes,
            status,
            degraded,
        });
        self.view_tx.send_replace(view.clone());
        view
    }

    /// Every field currently left out of reads, across record kinds.
    fn degraded_fields(&self) -> Vec<Degraded> {
        let omitted = self.lock_omitted();
        let mut degraded: Vec<Degraded> = omitted
            .iter()
            .flat_map(|(kind, fields)| {
                fields.iter().map(|field| Degraded {
                    type_name: kind.type_name().to_string(),
                    field: field.clone(),
                })
            })
            .collect();
        degraded.sort_by(|a, b| (&a.type_name, &a.field).cmp(&(&b.type_name, &b.field)));
        degraded
    }

    fn known_missing(&self, kind: RecordKind) -> Vec<String> {
        self.lock_omitted().get(&kind).cloned().unwrap_or_default()
    }

    fn remember_missing(&self, kind: RecordKind, fields: Vec<String>) {
        let mut omitted = self.lock_omitted();
        let known = omitted.entry(kind).or_default();
        for field in fields {
            if !known.contains(&field) {
                known.push(field);
            }
        }
    }

    fn release_inflight(&self, generation: u64) {
        let mut slot = self.lock_inflight();
        if slot.as_ref().is_some_and(|(g, _)| *g == generation) {
            *slot = None;
        }
    }

    fn lock_inflight(&self) -> std::sync::MutexGuard<'_, Option<(u64, SharedRefresh)>> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_omitted(&self) -> std::sync::MutexGuard<'_, HashMap<RecordKind, Vec<String>>> {
        self.omitted.lock().unwrap_or_else(|e| e.into_inner())
    }
}
