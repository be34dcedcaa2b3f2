//! One-time demo seeding guarded by a conditional-write claim.
//!
//! The profile's `seedVersion` counter is the lock: a session claims it by
//! writing the claimed marker only if the counter is still claimable, and
//! releases it either by finalizing to the current version or by rolling
//! back to 0. A process that dies while holding the claim leaves the marker
//! in place; that profile needs manual recovery.

use std::future::Future;
use std::sync::Arc;

use serde_json::{Value, json};

use super::clock::Clock;
use super::resilient::get_resilient;
use crate::core::profile::{CLAIMED_MARKER, PROFILE_FIELDS, Profile, SeedState};
use crate::error::{RemoteError, SyncError};
use crate::remote::{Condition, RecordKind, RemoteApi, create_record, decode, update_record};

/// Seed version this build populates. Bump to reseed existing identities.
pub const CURRENT_SEED_VERSION: i64 = 1;

const COUNTER: &str = "seedVersion";

#[derive(Debug, Clone, PartialEq)]
pub enum SeedOutcome<T> {
    /// The profile already records this version or later.
    AlreadySeeded(i64),
    /// Another session holds or has just taken the claim.
    ClaimedElsewhere,
    Seeded(T),
}

impl<T> SeedOutcome<T> {
    pub fn did_seed(&self) -> bool {
        matches!(self, Self::Seeded(_))
    }
}

pub struct SeedCoordinator {
    remote: Arc<dyn RemoteApi>,
    clock: Arc<dyn Clock>,
    subject: String,
    version: i64,
}

impl SeedCoordinator {
    pub fn new(remote: Arc<dyn RemoteApi>, clock: Arc<dyn Clock>, subject: impl Into<String>) -> Self {
        Self {
            remote,
            clock,
            subject: subject.into(),
            version: CURRENT_SEED_VERSION,
        }
    }

    pub fn with_version(mut self, version: i64) -> Self {
        self.version = version;
        self
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    /// Fetch the identity's profile, creating it with a zero counter if absent.
    pub async fn ensure_profile(&self) -> Result<Profile, SyncError> {
        if let Some(profile) = self.fetch_profile().await? {
            return Ok(profile);
        }

        let input = json!({ "id": self.subject, COUNTER: 0 });
        match create_record::<Profile>(self.remote.as_ref(), RecordKind::Profile, &self.subject, &input)
            .await
        {
            Ok(profile) => {
                log::debug!("Created profile for {}", self.subject);
                Ok(profile)
            }
            // Another session created it first.
            Err(e) if e.is_condition_failed() => self.require_profile().await,
            Err(e) => Err(e.into()),
        }
    }

    /// Run `populate` once per identity and seed version.
    ///
    /// Errors from `populate` or from finalizing are returned after a
    /// best-effort rollback; a failed rollback is only logged.
    pub async fn run<T, F, Fut>(&self, populate: F) -> Result<SeedOutcome<T>, SyncError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SyncError>>,
    {
        let profile = self.ensure_profile().await?;
        match profile.seed_state(self.version) {
            SeedState::Done(version) => return Ok(SeedOutcome::AlreadySeeded(version)),
            SeedState::Claimed => {
                log::debug!("Seed claim for {} is held elsewhere", self.subject);
                return Ok(SeedOutcome::ClaimedElsewhere);
            }
            SeedState::Free(_) => {}
        }

        if !self.claim().await? {
            return Ok(SeedOutcome::ClaimedElsewhere);
        }
        log::info!("Claimed demo seeding v{} for {}", self.version, self.subject);

        let result = match populate().await {
            Ok(value) => self.finalize().await.map(|()| value),
            Err(e) => Err(e),
        };
        match result {
            Ok(value) => Ok(SeedOutcome::Seeded(value)),
            Err(err) => {
                log::warn!("Demo seeding failed for {}: {}", self.subject, err);
                self.rollback().await;
                Err(err)
            }
        }
    }

    /// Current seed state, for diagnostics.
    pub async fn state(&self) -> Result<Option<SeedState>, SyncError> {
        Ok(self
            .fetch_profile()
            .await?
            .map(|p| p.seed_state(self.version)))
    }

    /// Returns false when the conditional write lost to another session.
    async fn claim(&self) -> Result<bool, SyncError> {
        let condition = Condition::And(vec![
            Condition::lt(COUNTER, self.version),
            Condition::ne(COUNTER, CLAIMED_MARKER),
        ]);
        match self.set_counter(json!({ COUNTER: CLAIMED_MARKER }), &condition).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_condition_failed() => {
                log::debug!("Seed claim for {} rejected: {}", self.subject, e);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn finalize(&self) -> Result<(), SyncError> {
        let patch = json!({ COUNTER: self.version, "seededAt": self.clock.now() });
        self.set_counter(patch, &Condition::eq(COUNTER, CLAIMED_MARKER))
            .await?;
        log::info!("Seeded demo data v{} for {}", self.version, self.subject);
        Ok(())
    }

    async fn rollback(&self) {
        let released = self
            .set_counter(json!({ COUNTER: 0 }), &Condition::eq(COUNTER, CLAIMED_MARKER))
            .await;
        match released {
            Ok(()) => log::info!("Released seed claim for {}", self.subject),
            Err(e) => log::warn!(
                "Could not release seed claim for {}; it stays claimed: {}",
                self.subject,
                e
            ),
        }
    }

    async fn set_counter(&self, patch: Value, condition: &Condition) -> Result<(), RemoteError> {
        let _: Profile = update_record(
            self.remote.as_ref(),
            RecordKind::Profile,
            &self.subject,
            &patch,
            Some(condition),
        )
        .await?;
        Ok(())
    }

    /// Read the profile. A record with no counter gets one initialized to 0,
    /// so it can be claimed.
    async fn fetch_profile(&self) -> Result<Option<Profile>, SyncError> {
        let fetched =
            get_resilient(self.remote.as_ref(), RecordKind::Profile, &self.subject, PROFILE_FIELDS)
                .await?;
        let Some(value) = fetched.value else {
            return Ok(None);
        };
        if value.get(COUNTER).is_none_or(Value::is_null) {
            return self.initialize_counter().await.map(Some);
        }
        Ok(Some(decode(RecordKind::Profile, value)?))
    }

    async fn initialize_counter(&self) -> Result<Profile, SyncError> {
        let initialized = self
            .set_counter(json!({ COUNTER: 0 }), &Condition::missing(COUNTER))
            .await;
        match initialized {
            Ok(()) => log::debug!("Initialized seed counter for {}", self.subject),
            Err(e) if e.is_condition_failed() => {}
            Err(e) => return Err(e.into()),
        }
        let fetched =
            get_resilient(self.remote.as_ref(), RecordKind::Profile, &self.subject, PROFILE_FIELDS)
                .await?;
        let value = fetched.value.ok_or_else(|| self.missing_profile())?;
        Ok(decode(RecordKind::Profile, value)?)
    }

    async fn require_profile(&self) -> Result<Profile, SyncError> {
        self.fetch_profile()
            .await?
            .ok_or_else(|| self.missing_profile().into())
    }

    fn missing_profile(&self) -> RemoteError {
        RemoteError::NotFound {
            kind: RecordKind::Profile,
            id: self.subject.clone(),
        }
    }
}
