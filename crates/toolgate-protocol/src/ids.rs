//! Typed ID wrappers.
//!
//! IDs are opaque String wrappers (serde-transparent). Hosts may mint them
//! from database keys, channel message ids or UUIDs; the gate only requires
//! that they are stable strings.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Create a new ID using UUID v4 (random).
            pub fn new_uuid() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// View as string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new_uuid()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Unique identifier for a workspace.
    WorkspaceId
);
typed_id!(
    /// Unique identifier for an approval request.
    ApprovalId
);
typed_id!(
    /// Unique identifier for a task created on behalf of a channel user.
    TaskId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_transparent_on_the_wire() {
        let id = WorkspaceId::from_string("ws-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"ws-1\"");
        let back: WorkspaceId = serde_json::from_str("\"ws-1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn default_ids_are_unique() {
        assert_ne!(ApprovalId::default(), ApprovalId::default());
        assert_eq!(TaskId::from("t").to_string(), "t");
    }
}
