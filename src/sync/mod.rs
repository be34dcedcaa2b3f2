pub mod admin;
pub mod clock;
pub mod demo;
pub mod inbox;
pub mod index;
pub mod keyring;
pub mod paginate;
pub mod persist;
pub mod resilient;
pub mod seed;
pub mod session;
pub mod store;

pub use session::Session;
pub use store::{Snapshot, StoreView, TaskStore};

/// Outcome of the most recent refresh, as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Idle,
    Syncing,
    /// Milliseconds since the epoch of the last successful refresh.
    LastSynced(i64),
    /// The refresh failed; the previous snapshot is still being served.
    Stale(String),
    /// The refresh failed with nothing cached to fall back on.
    Failed(String),
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl SyncStatus {
    /// A non-blocking "last refresh failed" indicator.
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::Stale(_))
    }

    /// The dependent view cannot render and should offer a retry.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Stale(e) | Self::Failed(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_warns_and_failed_blocks() {
        let stale = SyncStatus::Stale("offline".into());
        let failed = SyncStatus::Failed("offline".into());
        assert!(stale.is_warning() && !stale.is_blocking());
        assert!(failed.is_blocking() && !failed.is_warning());
        assert_eq!(stale.error(), Some("offline"));
        assert_eq!(SyncStatus::default().error(), None);
    }
}
