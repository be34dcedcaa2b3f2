use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Field names selected when reading profiles from the remote.
pub const PROFILE_FIELDS: &[&str] = &["id", "owner", "seedVersion", "seededAt"];

/// Counter value written while a session holds the seed claim.
pub const CLAIMED_MARKER: i64 = -1;

/// Per-identity record carrying the demo-data seed counter.
///
/// The profile id is the identity's subject, so there is at most one per owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub owner: String,
    #[serde(default)]
    pub seed_version: i64,
    #[serde(default)]
    pub seeded_at: Option<DateTime<Utc>>,
}

impl Profile {
    pub fn seed_state(&self, current_version: i64) -> SeedState {
        SeedState::from_counter(self.seed_version, current_version)
    }
}

/// Meaning of the persisted seed counter relative to the running seed version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeedState {
    /// Not yet seeded to the running version; holds the last completed version.
    Free(i64),
    /// A session holds the claim and is populating.
    Claimed,
    /// Seeded at this version or later.
    Done(i64),
}

impl SeedState {
    pub fn from_counter(counter: i64, current_version: i64) -> Self {
        if counter == CLAIMED_MARKER {
            Self::Claimed
        } else if counter >= current_version {
            Self::Done(counter)
        } else {
            Self::Free(counter.max(0))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_meanings() {
        assert_eq!(SeedState::from_counter(0, 2), SeedState::Free(0));
        assert_eq!(SeedState::from_counter(1, 2), SeedState::Free(1));
        assert_eq!(SeedState::from_counter(-1, 2), SeedState::Claimed);
        assert_eq!(SeedState::from_counter(2, 2), SeedState::Done(2));
        assert_eq!(SeedState::from_counter(5, 2), SeedState::Done(5));
    }

    #[test]
    fn missing_counter_decodes_as_zero() {
        let json = serde_json::json!({ "id": "user-1", "owner": "user-1" });
        let profile: Profile = serde_json::from_value(json).unwrap();
        assert_eq!(profile.seed_state(1), SeedState::Free(0));
    }
}
