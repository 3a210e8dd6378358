//! Strong type definitions for persistent object identifiers.
//!
//! Keychain objects and datasets are both addressed by 64-bit object numbers
//! in the pool's object store. They are newtypes so the two can never be
//! swapped at a call site.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a persistent object in the pool's object store.
///
/// Keychains are addressed by the id of the object holding their wrapped
/// key records (`kcobj`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl ObjectId {
    /// Create from a raw object number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw object number.
    pub const fn get(&self) -> u64 {
        self.0
    }

    /// The null object (never allocated).
    pub const NULL: Self = Self(0);

    /// Whether this is the null object.
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ObjectId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// Identifier of a dataset (`dsobj`).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub u64);

impl DatasetId {
    /// Create from a raw dataset object number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw dataset object number.
    pub const fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetId({})", self.0)
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for DatasetId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}
