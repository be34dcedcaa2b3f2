//! Group-gated diagnostics over every owner's records.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use super::paginate::{PageCap, collect_pages};
use super::resilient::{Degraded, ResilientReader};
use crate::core::identity::Identity;
use crate::core::profile::{CLAIMED_MARKER, PROFILE_FIELDS, Profile, SeedState};
use crate::core::task::{TASK_FIELDS, Task};
use crate::error::{RemoteError, SyncError};
use crate::remote::{Condition, ListQuery, RecordKind, RemoteApi, decode, update_record};

const SCAN_PAGE_SIZE: u32 = 100;

fn authorize(identity: &Identity, admin_group: &str) -> Result<(), SyncError> {
    if identity.in_group(admin_group) {
        Ok(())
    } else {
        log::warn!("{} attempted an admin scan without {}", identity.subject, admin_group);
        Err(SyncError::Forbidden {
            subject: identity.subject.clone(),
            group: admin_group.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskScanReport {
    pub scanned: usize,
    pub pages: usize,
    /// Items the server nulled out.
    pub holes: usize,
    pub capped: bool,
    pub degraded: Vec<Degraded>,
    pub tasks_by_owner: BTreeMap<String, usize>,
    /// Tasks whose status and completion time disagree.
    pub inconsistent: Vec<String>,
    pub demo_tasks: usize,
}

/// Bounded scan over all tasks, regardless of owner.
pub async fn scan_tasks(
    remote: &dyn RemoteApi,
    identity: &Identity,
    admin_group: &str,
    cap: PageCap,
) -> Result<TaskScanReport, SyncError> {
    authorize(identity, admin_group)?;

    let query = ListQuery::new(RecordKind::Task, TASK_FIELDS).limit(SCAN_PAGE_SIZE);
    let reader = ResilientReader::new(remote, query);
    let collected = collect_pages(|token| reader.read_page(token), cap).await?;

    let mut report = TaskScanReport {
        pages: collected.pages,
        holes: collected.holes,
        capped: collected.capped,
        degraded: reader.degraded(),
        ..Default::default()
    };
    for value in collected.items {
        let task: Task = decode(RecordKind::Task, value)?;
        report.scanned += 1;
        *report.tasks_by_owner.entry(task.owner.clone()).or_default() += 1;
        if task.is_demo {
            report.demo_tasks += 1;
        }
        if !task.status_consistent() {
            report.inconsistent.push(task.id);
        }
    }

    log::info!(
        "Admin scan by {}: {} tasks over {} page(s){}",
        identity.subject,
        report.scanned,
        report.pages,
        if report.capped { " (capped)" } else { "" }
    );
    Ok(report)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileReport {
    pub scanned: usize,
    pub capped: bool,
    pub unseeded: usize,
    pub seeded: usize,
    /// Profiles holding the claim marker; stuck if no session is seeding.
    pub claimed: Vec<String>,
}

/// Seed state of every profile relative to `current_version`.
pub async fn profile_report(
    remote: &dyn RemoteApi,
    identity: &Identity,
    admin_group: &str,
    current_version: i64,
    cap: PageCap,
) -> Result<ProfileReport, SyncError> {
    authorize(identity, admin_group)?;

    let query = ListQuery::new(RecordKind::Profile, PROFILE_FIELDS).limit(SCAN_PAGE_SIZE);
    let reader = ResilientReader::new(remote, query);
    let collected = collect_pages(|token| reader.read_page(token), cap).await?;

    let mut report = ProfileReport {
        capped: collected.capped,
        ..Default::default()
    };
    for value in collected.items {
        let profile: Profile = decode(RecordKind::Profile, value)?;
        report.scanned += 1;
        match profile.seed_state(current_version) {
            SeedState::Free(_) => report.unseeded += 1,
            SeedState::Done(_) => report.seeded += 1,
            SeedState::Claimed => report.claimed.push(profile.id),
        }
    }
    Ok(report)
}

/// Reset a stuck seed claim so the owner's next session can seed again.
///
/// Returns false if the profile no longer holds the claim.
pub async fn release_claim(
    remote: &dyn RemoteApi,
    identity: &Identity,
    admin_group: &str,
    subject: &str,
) -> Result<bool, SyncError> {
    authorize(identity, admin_group)?;

    let patch = json!({ "seedVersion": 0 });
    let condition = Condition::eq("seedVersion", CLAIMED_MARKER);
    match update_record::<Value>(remote, RecordKind::Profile, subject, &patch, Some(&condition)).await {
        Ok(_) => {
            log::info!("{} released the seed claim of {}", identity.subject, subject);
            Ok(true)
        }
        Err(RemoteError::ConditionFailed { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryRemote;

    fn admin() -> Identity {
        Identity::new("root").with_group("Admins")
    }

    fn insert_task(remote: &MemoryRemote, id: &str, owner: &str, status: &str, completed: Option<&str>) {
        remote.insert_raw(
            RecordKind::Task,
            json!({
                "id": id, "listId": "L", "title": id, "owner": owner, "sortOrder": 1,
                "status": status, "completedAt": completed, "isDemo": false, "tagIds": [],
                "createdAt": "2026-01-01T00:00:00Z", "updatedAt": "2026-01-01T00:00:00Z"
            }),
        );
    }

    #[tokio::test]
    async fn non_members_are_refused() {
        let remote = MemoryRemote::new();
        let err = scan_tasks(&remote, &Identity::new("eve"), "Admins", PageCap::none())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Forbidden { .. }));
        assert_eq!(remote.total_calls(), 0);
    }

    #[tokio::test]
    async fn counts_owners_and_inconsistent_status() {
        let remote = MemoryRemote::new();
        insert_task(&remote, "a", "alice", "OPEN", None);
        insert_task(&remote, "b", "alice", "DONE", None);
        insert_task(&remote, "c", "bob", "DONE", Some("2026-01-02T00:00:00Z"));
        insert_task(&remote, "d", "bob", "OPEN", Some("2026-01-02T00:00:00Z"));
        remote.hide("c");

        let report = scan_tasks(&remote, &admin(), "Admins", PageCap::none()).await.unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.holes, 1);
        assert_eq!(report.tasks_by_owner["alice"], 2);
        assert_eq!(report.tasks_by_owner["bob"], 1);
        assert_eq!(report.inconsistent, vec!["b".to_string(), "d".to_string()]);
        assert!(!report.capped);
    }

    #[tokio::test]
    async fn cap_stops_the_scan_early() {
        let remote = MemoryRemote::new();
        for i in 0..250 {
            insert_task(&remote, &format!("t{i}"), "alice", "OPEN", None);
        }
        let report = scan_tasks(&remote, &admin(), "Admins", PageCap::items(150)).await.unwrap();
        assert_eq!(report.scanned, 150);
        assert_eq!(report.pages, 2);
        assert!(report.capped);
    }

    #[tokio::test]
    async fn legacy_records_degrade_instead_of_failing() {
        let remote = MemoryRemote::new();
        remote.require_field(RecordKind::Task, "tagIds");
        insert_task(&remote, "a", "alice", "OPEN", None);
        remote.insert_raw(
            RecordKind::Task,
            json!({
                "id": "old", "listId": "L", "title": "old", "owner": "alice",
                "createdAt": "2025-01-01T00:00:00Z", "updatedAt": "2025-01-01T00:00:00Z"
            }),
        );

        let report = scan_tasks(&remote, &admin(), "Admins", PageCap::none()).await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.degraded.len(), 1);
        assert_eq!(report.degraded[0].field, "tagIds");
    }

    #[tokio::test]
    async fn profile_report_finds_stuck_claims() {
        let remote = MemoryRemote::new();
        for (id, counter) in [("a", 0), ("b", 1), ("c", CLAIMED_MARKER)] {
            remote.insert_raw(
                RecordKind::Profile,
                json!({ "id": id, "owner": id, "seedVersion": counter }),
            );
        }
        let report = profile_report(&remote, &admin(), "Admins", 1, PageCap::none())
            .await
            .unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.unseeded, 1);
        assert_eq!(report.seeded, 1);
        assert_eq!(report.claimed, vec!["c".to_string()]);

        assert!(release_claim(&remote, &admin(), "Admins", "c").await.unwrap());
        assert!(!release_claim(&remote, &admin(), "Admins", "c").await.unwrap());
        assert_eq!(remote.record(RecordKind::Profile, "c").unwrap()["seedVersion"], 0);
    }
}
