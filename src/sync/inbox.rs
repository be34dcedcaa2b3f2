use std::sync::Mutex;

use crate::core::list::{NewList, TaskList, max_sort_order};
use crate::error::RemoteError;
use crate::remote::{RecordKind, RemoteApi, create_record};

/// Resolves, or creates once, the distinguished inbox list.
///
/// Resolution never writes when the inbox is already known or findable by
/// name. Two sessions that both find nothing can still each create one;
/// the remote offers no create-if-absent to close that window.
#[derive(Debug)]
pub struct InboxBootstrap {
    name: String,
    remembered: Mutex<Option<String>>,
}

impl InboxBootstrap {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            remembered: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn remembered_id(&self) -> Option<String> {
        self.lock().clone()
    }

    pub fn forget(&self) {
        *self.lock() = None;
    }

    /// Return `lists`, with a freshly created inbox appended if none exists.
    pub async fn ensure_inbox_list_exists(
        &self,
        remote: &dyn RemoteApi,
        owner: &str,
        mut lists: Vec<TaskList>,
    ) -> Result<Vec<TaskList>, RemoteError> {
        if let Some(id) = self.remembered_id() {
            if lists.iter().any(|l| l.id == id) {
                return Ok(lists);
            }
        }

        let named: Vec<&TaskList> = lists.iter().filter(|l| l.has_name(&self.name)).collect();
        if let Some(first) = named.first() {
            if named.len() > 1 {
                log::warn!(
                    "{} lists named {:?}; using {}",
                    named.len(),
                    self.name,
                    first.id
                );
            }
            *self.lock() = Some(first.id.clone());
            return Ok(lists);
        }

        let input = NewList::new(self.name.clone(), max_sort_order(&lists) + 1.0);
        let created: TaskList = create_record(remote, RecordKind::List, owner, &input).await?;
        log::info!("Created inbox list {}", created.id);
        *self.lock() = Some(created.id.clone());
        lists.push(created);
        Ok(lists)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.remembered.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryRemote;
    use crate::sync::index::tests::list;

    #[tokio::test]
    async fn cold_start_creates_inbox_with_first_sort_order() {
        let remote = MemoryRemote::new();
        let inbox = InboxBootstrap::new("Inbox");
        let lists = inbox
            .ensure_inbox_list_exists(&remote, "user-1", Vec::new())
            .await
            .unwrap();

        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].name, "Inbox");
        assert_eq!(lists[0].sort_order, 1.0);
        assert_eq!(lists[0].owner, "user-1");
        assert_eq!(remote.records(RecordKind::List).len(), 1);
        assert_eq!(inbox.remembered_id(), Some(lists[0].id.clone()));
    }

    #[tokio::test]
    async fn second_call_is_write_free() {
        let remote = MemoryRemote::new();
        let inbox = InboxBootstrap::new("Inbox");
        let first = inbox
            .ensure_inbox_list_exists(&remote, "user-1", vec![list("L1", 4.0)])
            .await
            .unwrap();
        assert_eq!(first[1].sort_order, 5.0);
        let writes = remote.write_calls();

        let second = inbox
            .ensure_inbox_list_exists(&remote, "user-1", first.clone())
            .await
            .unwrap();
        assert_eq!(remote.write_calls(), writes);
        assert_eq!(second, first);
        assert_eq!(inbox.remembered_id(), Some(first[1].id.clone()));
    }

    #[tokio::test]
    async fn finds_existing_inbox_by_trimmed_name() {
        let remote = MemoryRemote::new();
        let inbox = InboxBootstrap::new("Inbox");
        let mut existing = list("L9", 3.0);
        existing.name = " Inbox ".into();

        let lists = inbox
            .ensure_inbox_list_exists(&remote, "user-1", vec![list("L1", 1.0), existing])
            .await
            .unwrap();
        assert_eq!(lists.len(), 2);
        assert_eq!(remote.total_calls(), 0);
        assert_eq!(inbox.remembered_id().as_deref(), Some("L9"));
    }

    #[tokio::test]
    async fn stale_remembered_id_falls_through_to_name_lookup() {
        let remote = MemoryRemote::new();
        let inbox = InboxBootstrap::new("Inbox");
        *inbox.lock() = Some("deleted".into());
        let mut existing = list("L2", 1.0);
        existing.name = "Inbox".into();

        inbox
            .ensure_inbox_list_exists(&remote, "user-1", vec![existing])
            .await
            .unwrap();
        assert_eq!(inbox.remembered_id().as_deref(), Some("L2"));
        assert_eq!(remote.total_calls(), 0);
    }

    #[tokio::test]
    async fn create_failure_propagates_without_remembering() {
        let remote = MemoryRemote::new();
        remote.set_create_failure(RecordKind::List, Some(RemoteError::Transport("offline".into())));
        let inbox = InboxBootstrap::new("Inbox");
        let err = inbox
            .ensure_inbox_list_exists(&remote, "user-1", Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::Transport("offline".into()));
        assert_eq!(inbox.remembered_id(), None);
    }
}
