//! Immutable handles to configured slices.

use serde::{Deserialize, Serialize};
use slice_core::SliceName;
use std::collections::BTreeMap;

/// Slice name reserved for the logical (combined) store.
pub const RESERVED_SLICE_NAME: &str = "default";

/// One physical data store of the distributed deployment.
///
/// Created once from configuration and never modified afterwards.
/// `settings` are opaque to this crate and handed to the
/// [`ConnectionProvider`](crate::store::ConnectionProvider) as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    name: SliceName,
    settings: BTreeMap<String, String>,
    master: bool,
}

impl Slice {
    /// Creates a slice handle.
    pub fn new(name: impl Into<SliceName>, settings: BTreeMap<String, String>, master: bool) -> Self {
        Self {
            name: name.into(),
            settings,
            master,
        }
    }

    /// Returns the slice name.
    #[inline]
    pub fn name(&self) -> &SliceName {
        &self.name
    }

    /// Returns a connection setting.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    /// Returns all connection settings.
    pub fn settings(&self) -> &BTreeMap<String, String> {
        &self.settings
    }

    /// Returns whether this slice allocates global identifiers.
    #[inline]
    pub fn is_master(&self) -> bool {
        self.master
    }
}

/// Availability of a configured slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceStatus {
    /// Connected and participating in every operation.
    Active,
    /// Left out after a failed connect in lenient mode.
    Inactive { reason: String },
}

impl SliceStatus {
    /// Returns true for [`SliceStatus::Active`].
    pub fn is_active(&self) -> bool {
        matches!(self, SliceStatus::Active)
    }
}
