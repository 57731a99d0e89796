//! Type-safe session identifier.
//!
//! [`SessionId`] is a newtype wrapper around [`uuid::Uuid`] (v4) so that a
//! session address can never be confused with another UUID in the system.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unique identifier for one live client session.
///
/// Generated once when the connection is upgraded and immutable thereafter.
/// Used as the registry key inside the [`crate::hub::Hub`] and as the
/// address of `direct` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    /// Creates a new random `SessionId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Creates a `SessionId` from an existing [`uuid::Uuid`].
    #[must_use]
    pub const fn from_uuid(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner [`uuid::Uuid`].
    #[must_use]
    pub const fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<uuid::Uuid> for SessionId {
    fn from(uuid: uuid::Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_unique_ids() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn display_is_uuid_format() {
        let s = SessionId::new().to_string();
        assert_eq!(s.len(), 36);
        assert!(s.contains('-'));
    }

    #[test]
    fn parses_its_own_display() {
        let id = SessionId::new();
        let Ok(parsed) = id.to_string().parse::<SessionId>() else {
            panic!("display output must parse");
        };
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_garbage() {
        assert!("not-a-session".parse::<SessionId>().is_err());
        assert!("".parse::<SessionId>().is_err());
    }

    #[test]
    fn serializes_as_bare_string() {
        let uuid = uuid::Uuid::new_v4();
        let Ok(json) = serde_json::to_string(&SessionId::from_uuid(uuid)) else {
            panic!("serialization failed");
        };
        assert_eq!(json, format!("\"{uuid}\""));
    }
}
