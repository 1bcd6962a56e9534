//! Last-Write-Wins (LWW) decision for client uploads.
//!
//! Clients re-send records they edited offline, sometimes stale, sometimes
//! twice. Given what is stored and the incoming update time, [`decide`]
//! picks what the repository must do. Pure functions, no I/O.

use chrono::{DateTime, Utc};

use super::types::{FoodItem, Meal, Reading};

/// A stored record with a logical version.
pub trait Versioned {
    fn created_at(&self) -> Option<DateTime<Utc>>;
    fn updated_at(&self) -> Option<DateTime<Utc>>;

    /// The stored update time, falling back to the creation time.
    fn version(&self) -> Option<DateTime<Utc>> {
        self.updated_at().or(self.created_at())
    }
}

macro_rules! versioned {
    ($ty:ty) => {
        impl Versioned for $ty {
            fn created_at(&self) -> Option<DateTime<Utc>> {
                self.created_at
            }

            fn updated_at(&self) -> Option<DateTime<Utc>> {
                self.updated_at
            }
        }
    };
}

versioned!(Reading);
versioned!(Meal);
versioned!(FoodItem);

/// What to do with an incoming record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Nothing stored yet: insert.
    Insert,
    /// The stored record is as new or newer: leave it and return it.
    KeepExisting,
    /// The incoming record wins: overwrite in place.
    Replace,
}

impl SyncDecision {
    /// Returns true if the decision writes to storage.
    pub fn is_write(&self) -> bool {
        !matches!(self, SyncDecision::KeepExisting)
    }
}

/// Decides between a stored record and an incoming one.
///
/// Without an incoming update time the incoming record always replaces the
/// stored one. Otherwise it must be strictly newer than the stored version;
/// ties keep the stored record so replays are idempotent. A stored record
/// with no timestamps at all loses to any timestamped upload.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use goutdiary_core::diary::{decide_versions, SyncDecision};
///
/// let stored = Utc::now();
/// assert_eq!(decide_versions(Some(Some(stored)), Some(stored)), SyncDecision::KeepExisting);
/// assert_eq!(
///     decide_versions(Some(Some(stored)), Some(stored + Duration::seconds(1))),
///     SyncDecision::Replace
/// );
/// assert_eq!(decide_versions(None, Some(stored)), SyncDecision::Insert);
/// ```
pub fn decide_versions(
    existing_version: Option<Option<DateTime<Utc>>>,
    incoming_updated_at: Option<DateTime<Utc>>,
) -> SyncDecision {
    match (existing_version, incoming_updated_at) {
        (None, _) => SyncDecision::Insert,
        (Some(_), None) => SyncDecision::Replace,
        (Some(Some(stored)), Some(incoming)) if incoming <= stored => SyncDecision::KeepExisting,
        (Some(_), Some(_)) => SyncDecision::Replace,
    }
}

/// [`decide_versions`] against an optional stored record.
pub fn decide<T: Versioned>(
    existing: Option<&T>,
    incoming_updated_at: Option<DateTime<Utc>>,
) -> SyncDecision {
    decide_versions(existing.map(Versioned::version), incoming_updated_at)
}

/// The `updated_at` to persist for a write.
///
/// The client's own update time is kept so later uploads compare against
/// it; uploads without one are stamped with `now`.
pub fn write_stamp(incoming_updated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    incoming_updated_at.unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diary::types::MealType;
    use chrono::Duration;

    fn stored_meal(created_at: Option<DateTime<Utc>>, updated_at: Option<DateTime<Utc>>) -> Meal {
        Meal {
            id: "m1".into(),
            user_id: "u1".into(),
            timestamp: Utc::now(),
            meal_type: MealType::Lunch,
            name: None,
            total_purin: 0,
            total_uric_acid: 0,
            total_calories: 0,
            total_protein: 0.0,
            thumbnail_path: None,
            components: Vec::new(),
            created_at,
            updated_at,
        }
    }

    #[test]
    fn test_insert_when_nothing_stored() {
        assert_eq!(decide::<Meal>(None, None), SyncDecision::Insert);
        assert_eq!(decide::<Meal>(None, Some(Utc::now())), SyncDecision::Insert);
    }

    #[test]
    fn test_replace_without_incoming_timestamp() {
        let meal = stored_meal(Some(Utc::now()), Some(Utc::now()));
        assert_eq!(decide(Some(&meal), None), SyncDecision::Replace);
    }

    #[test]
    fn test_incoming_wins_when_newer() {
        let now = Utc::now();
        let meal = stored_meal(Some(now - Duration::days(1)), Some(now));
        let decision = decide(Some(&meal), Some(now + Duration::seconds(1)));
        assert_eq!(decision, SyncDecision::Replace);
        assert!(decision.is_write());
    }

    #[test]
    fn test_stored_wins_on_tie() {
        let now = Utc::now();
        let meal = stored_meal(None, Some(now));
        let decision = decide(Some(&meal), Some(now));
        assert_eq!(decision, SyncDecision::KeepExisting);
        assert!(!decision.is_write());
    }

    #[test]
    fn test_stored_wins_when_incoming_older() {
        let now = Utc::now();
        let meal = stored_meal(None, Some(now));
        assert_eq!(
            decide(Some(&meal), Some(now - Duration::minutes(5))),
            SyncDecision::KeepExisting
        );
    }

    #[test]
    fn test_falls_back_to_created_at() {
        let now = Utc::now();
        let meal = stored_meal(Some(now), None);
        assert_eq!(meal.version(), Some(now));
        assert_eq!(
            decide(Some(&meal), Some(now - Duration::seconds(1))),
            SyncDecision::KeepExisting
        );
    }

    #[test]
    fn test_untimestamped_record_loses() {
        let meal = stored_meal(None, None);
        assert_eq!(decide(Some(&meal), Some(Utc::now())), SyncDecision::Replace);
    }

    #[test]
    fn test_write_stamp() {
        let now = Utc::now();
        let client = now - Duration::hours(2);
        assert_eq!(write_stamp(Some(client), now), client);
        assert_eq!(write_stamp(None, now), now);
    }
}
