use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(uuid::Uuid);

        impl $name {
            /// Generate a new time-ordered identity (UUID v7).
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            /// Create from an existing UUID.
            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            /// The underlying UUID.
            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }

            /// Short representation (first 8 characters of the UUID).
            pub fn short_id(&self) -> String {
                self.0.to_string()[..8].to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short_id())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.short_id())
            }
        }

        impl FromStr for $name {
            type Err = TypeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.strip_prefix(concat!($prefix, ":")).unwrap_or(s);
                uuid::Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| TypeError::InvalidUuid(e.to_string()))
            }
        }
    };
}

uuid_id!(
    /// Runtime identity of a node in a scene arena.
    ///
    /// Node ids are unique per scene. Template documents carry the ids of the
    /// subtree they were serialized from; instantiation remaps every one of
    /// them to a fresh id.
    NodeId,
    "node"
);

uuid_id!(
    /// Runtime identity of a component attached to a node.
    ComponentId,
    "comp"
);

uuid_id!(
    /// Identifier of a persisted asset, templates included.
    AssetId,
    "asset"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        assert_ne!(NodeId::new(), NodeId::new());
        assert_ne!(ComponentId::new(), ComponentId::new());
    }

    #[test]
    fn display_carries_prefix() {
        let id = NodeId::new();
        let shown = id.to_string();
        assert!(shown.starts_with("node:"));
        assert_eq!(shown.len(), "node:".len() + 8);
    }

    #[test]
    fn parse_accepts_prefixed_and_bare_uuids() {
        let uuid = uuid::Uuid::now_v7();
        let bare: AssetId = uuid.to_string().parse().unwrap();
        let prefixed: AssetId = format!("asset:{uuid}").parse().unwrap();
        assert_eq!(bare, prefixed);
        assert_eq!(bare.as_uuid(), &uuid);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = "not-a-uuid".parse::<NodeId>().unwrap_err();
        assert!(matches!(err, TypeError::InvalidUuid(_)));
    }

    #[test]
    fn serde_is_transparent() {
        let id = ComponentId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));
        let parsed: ComponentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
