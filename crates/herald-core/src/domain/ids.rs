//! Domain identifiers (strongly-typed IDs).
//!
//! Every identifier is a ULID wrapped in `Id<T>`, where `T` is a zero-sized
//! marker. The marker only exists at compile time, so a `NotificationId`
//! can never be passed where a `UserId` is expected.
//!
//! ULIDs sort by creation time, which keeps store listings and queue
//! tie-breaks stable without a separate sequence column.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for each ID family.
///
/// Provides the prefix used by `Display` ("ntf-", "usr-", "job-").
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic ID type.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// Error returned when parsing an id string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id '{0}'")]
pub struct ParseIdError(pub String);

/// Accepts both the prefixed display form and a bare ULID.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| ParseIdError(s.to_string()))
    }
}

// ========================================
// Markers
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Notification {}

impl IdMarker for Notification {
    fn prefix() -> &'static str {
        "ntf-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum User {}

impl IdMarker for User {
    fn prefix() -> &'static str {
        "usr-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Job {}

impl IdMarker for Job {
    fn prefix() -> &'static str {
        "job-"
    }
}

/// Identifier of one (user, channel) delivery record.
pub type NotificationId = Id<Notification>;

/// Identifier of a user (owned by the surrounding system, referenced here).
pub type UserId = Id<User>;

/// Identifier of one enqueued dispatch job. Stored on the notification as its
/// task reference.
pub type JobId = Id<Job>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_family_prefix() {
        let ulid = Ulid::new();
        assert!(NotificationId::from_ulid(ulid).to_string().starts_with("ntf-"));
        assert!(UserId::from_ulid(ulid).to_string().starts_with("usr-"));
        assert!(JobId::from_ulid(ulid).to_string().starts_with("job-"));
    }

    #[test]
    fn parse_accepts_prefixed_and_bare_forms() {
        let id = UserId::from_ulid(Ulid::new());
        let prefixed: UserId = id.to_string().parse().unwrap();
        let bare: UserId = id.as_ulid().to_string().parse().unwrap();
        assert_eq!(prefixed, id);
        assert_eq!(bare, id);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "usr-not-a-ulid".parse::<UserId>().unwrap_err();
        assert_eq!(err, ParseIdError("usr-not-a-ulid".into()));
    }

    #[test]
    fn serializes_as_bare_ulid_string() {
        let id = JobId::from_ulid(Ulid::new());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_ulid()));
        let back: JobId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn phantom_marker_adds_no_size() {
        assert_eq!(std::mem::size_of::<NotificationId>(), std::mem::size_of::<Ulid>());
    }
}
