//! Local identifiers (strongly-typed ULIDs).
//!
//! Job ids are owned by the control plane and arrive as strings. The ids in this
//! module are minted locally to correlate log lines: one `RunId` per message a
//! worker handles, one `AttemptId` per task or callback attempt.
//!
//! `Id<T>` shares one implementation across id kinds while the marker type keeps
//! them from being mixed up at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait providing the display prefix of an id kind.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    /// Mint a fresh id from the current time.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Run {}

impl IdMarker for Run {
    fn prefix() -> &'static str {
        "run-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Attempt {}

impl IdMarker for Attempt {
    fn prefix() -> &'static str {
        "attempt-"
    }
}

/// One worker's handling of one queue message.
pub type RunId = Id<Run>;

/// One execution try of a task or callback.
pub type AttemptId = Id<Attempt>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_kind_prefix() {
        let run = RunId::generate();
        let attempt = AttemptId::generate();

        assert!(run.to_string().starts_with("run-"));
        assert!(attempt.to_string().starts_with("attempt-"));
    }

    #[test]
    fn generated_ids_are_sortable() {
        let first = RunId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = RunId::generate();

        assert!(first < second);
    }

    #[test]
    fn ids_keep_the_ulid_size() {
        use std::mem::size_of;
        assert_eq!(size_of::<RunId>(), size_of::<Ulid>());
        assert_eq!(size_of::<AttemptId>(), size_of::<Ulid>());
    }
}
