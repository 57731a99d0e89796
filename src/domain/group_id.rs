//! Named group identifier.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a message group that sessions can join and leave.
///
/// Groups are client-named, so the identifier is an arbitrary non-empty
/// string rather than a generated UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(String);

impl GroupId {
    /// Builds a `GroupId`, returning `None` for empty or all-whitespace names.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Option<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            None
        } else {
            Some(Self(name))
        }
    }

    /// Returns the group name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
