use std::sync::Arc;

use super::admin::{self, ProfileReport, TaskScanReport};
use super::clock::Clock;
use super::demo::{DemoCounts, populate_demo_data};
use super::paginate::PageCap;
use super::persist::SnapshotStorage;
use super::seed::{SeedCoordinator, SeedOutcome};
use super::store::{StoreSettings, StoreView, TaskStore};
use crate::config::SyncConfig;
use crate::core::identity::Identity;
use crate::core::list::max_sort_order;
use crate::error::SyncError;
use crate::remote::RemoteApi;

/// One signed-in identity's view of the remote.
pub struct Session {
    identity: Identity,
    admin_group: String,
    remote: Arc<dyn RemoteApi>,
    store: Arc<TaskStore>,
    seed: Option<SeedOutcome<DemoCounts>>,
}

impl Session {
    /// Load the cached snapshot and make sure it is fresh, then seed demo
    /// data if enabled. A successful seed forces one more refresh.
    pub async fn start(
        identity: Identity,
        config: &SyncConfig,
        remote: Arc<dyn RemoteApi>,
        storage: Arc<dyn SnapshotStorage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SyncError> {
        let store = TaskStore::new(
            remote.clone(),
            storage,
            clock.clone(),
            identity.subject.clone(),
            config.inbox_name.clone(),
            StoreSettings::from(config),
        );
        store.load_persisted().await;
        // Bootstraps the inbox on a cold start, so it sorts ahead of demo lists.
        store.ensure_fresh().await?;

        let seed = if config.seed_demo_data {
            let coordinator = SeedCoordinator::new(remote.clone(), clock.clone(), identity.subject.clone());
            let after = max_sort_order(&store.current().snapshot.lists);
            let (target, owner, now) = (remote.as_ref(), identity.subject.as_str(), clock.now());
            let outcome = coordinator
                .run(|| async move {
                    populate_demo_data(target, owner, after, now)
                        .await
                        .map_err(SyncError::from)
                })
                .await;
            match outcome {
                Ok(outcome) => Some(outcome),
                // Seeding is retried on the next start; the session still opens.
                Err(e) => {
                    log::warn!("Skipping demo data this session: {}", e);
                    None
                }
            }
        } else {
            None
        };

        if seed.as_ref().is_some_and(SeedOutcome::did_seed) {
            store.expire_and_refresh().await?;
        }
        log::info!("Session started for {}", identity.subject);

        Ok(Self {
            identity,
            admin_group: config.admin_group.clone(),
            remote,
            store,
            seed,
        })
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn view(&self) -> Arc<StoreView> {
        self.store.current()
    }

    /// What the seed step did at startup; `None` when disabled or failed.
    pub fn seed_outcome(&self) -> Option<&SeedOutcome<DemoCounts>> {
        self.seed.as_ref()
    }

    pub async fn scan_tasks(&self, cap: PageCap) -> Result<TaskScanReport, SyncError> {
        admin::scan_tasks(self.remote.as_ref(), &self.identity, &self.admin_group, cap).await
    }

    pub async fn profile_report(&self, version: i64, cap: PageCap) -> Result<ProfileReport, SyncError> {
        admin::profile_report(self.remote.as_ref(), &self.identity, &self.admin_group, version, cap)
            .await
    }

    pub async fn sign_out(self) -> Result<(), SyncError> {
        self.store.sign_out().await
    }
}
