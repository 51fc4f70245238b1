//! The record capability trait.
//!
//! Every persisted type implements [`Record`] to describe its table. Version
//! tracking is an optional capability: types that do not override the
//! version accessors are written unconditionally.

use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::schema::TableSchema;

/// Version of a record that has never been stored.
pub const UNSAVED_VERSION: i64 = -1;

/// A type that can be persisted in a table.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    /// The item descriptor shared by all values of this type.
    fn schema() -> TableSchema;

    /// Current in-memory version, or `None` when the type is not versioned.
    fn version(&self) -> Option<i64> {
        None
    }

    fn set_version(&mut self, _version: i64) {}

    /// Bumps the version by one and returns the new value.
    fn increment_version(&mut self) -> Option<i64> {
        let next = self.version()? + 1;
        self.set_version(next);
        Some(next)
    }
}

/// A tentative version increment applied before a conditional write.
///
/// [`VersionBump::rollback`] is the compensating action restoring the
/// record when the write does not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionBump {
    previous: i64,
    next: i64,
}

impl VersionBump {
    /// Increments the record's version. Returns `None` for unversioned records.
    pub fn apply<R: Record>(record: &mut R) -> Option<Self> {
        let previous = record.version()?;
        let next = record.increment_version()?;
        Some(Self { previous, next })
    }

    /// The version the stored item must carry for the write to succeed.
    pub fn expected(&self) -> i64 {
        self.previous
    }

    pub fn next(&self) -> i64 {
        self.next
    }

    /// True when this write creates the item.
    pub fn is_creation(&self) -> bool {
        self.previous == UNSAVED_VERSION
    }

    pub fn rollback<R: Record>(self, record: &mut R) {
        record.set_version(self.previous);
    }
}

/// Unix-seconds timestamp `ttl` from now, for expiry fields.
pub fn expires_in(ttl: Duration) -> i64 {
    (Utc::now() + ttl).timestamp()
}
