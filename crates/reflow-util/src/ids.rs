//! String-backed id newtypes.
//!
//! Every entity in the dataflow kernel (`Node`, `Port`, `Connection`, `Flow`,
//! `Session`, `Job`) is addressed by a stable id rather than a borrowed
//! reference, since the graph is cyclic (node -> port -> connection -> node).
//! We use a UUID string for the value, but wrap it in a distinct newtype per
//! entity kind so a `NodeId` and a `JobId` can never be swapped by accident.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use smartstring::{LazyCompact, SmartString};

/// Generate a fresh id string. Not cryptographically random; collision
/// probability only needs to be low enough that two ids minted in the same
/// process never coincide.
fn fresh_id() -> SmartString<LazyCompact> {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let pid = std::process::id();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("{pid:x}-{nanos:x}-{n:x}").into()
}

macro_rules! id_type {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name {
            id: SmartString<LazyCompact>,
        }

        impl $name {
            /// Mint a fresh, process-unique id.
            pub fn new() -> Self {
                Self { id: fresh_id() }
            }

            /// Borrow the id as a plain string slice.
            pub fn as_str(&self) -> &str {
                &self.id
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self { id: value.into() }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.id)
            }
        }
    };
}

id_type!(NodeId, "Stable id of a `Node` within a `Flow`.");
id_type!(PortId, "Stable id of a `Port` within its owning `Node`.");
id_type!(FlowId, "Stable id of a `Flow` within a `Session`.");
id_type!(SessionId, "Stable id of a `Session`.");
id_type!(JobId, "Stable id of a `Job` within an `Engine`.");

/// A node or port name. Not required to be globally unique, only unique
/// within its sibling set (port names within one side of a node; node names
/// within a flow are a convention this crate doesn't enforce).
pub type Name = SmartString<LazyCompact>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct() {
        let a = NodeId::new();
        let b = NodeId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn id_roundtrips_through_str() {
        let a = NodeId::from("abc-123");
        assert_eq!(a.as_str(), "abc-123");
        assert_eq!(a.to_string(), "abc-123");
    }
}
