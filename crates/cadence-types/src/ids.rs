//! Strongly-typed identifiers.
//!
//! Node identifiers are sequential integers handed out by the network in
//! insertion order. Ordering by [`NodeId`] is therefore stable across runs
//! and across execution modes, which the kernel relies on for reproducible
//! state transitions. Run identifiers are UUID v7 so log lines from
//! successive `simulate` calls sort by start time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around an integer index with standard derives.
macro_rules! define_index_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Create an identifier from its raw index.
            pub const fn new(index: u64) -> Self {
                Self(index)
            }

            /// Return the raw index.
            pub const fn index(self) -> u64 {
                self.0
            }

            /// Return the identifier that follows this one, if representable.
            pub const fn next(self) -> Option<Self> {
                match self.0.checked_add(1) {
                    Some(next) => Some(Self(next)),
                    None => None,
                }
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(index: u64) -> Self {
                Self(index)
            }
        }
    };
}

define_index_id! {
    /// Identifier of a node registered with the network.
    NodeId
}

/// Identifier of a single `simulate` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new run identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for RunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_order_by_index() {
        let a = NodeId::new(1);
        let b = a.next().unwrap();
        assert!(a < b);
        assert_eq!(b.index(), 2);
        assert_eq!(b.to_string(), "2");
    }

    #[test]
    fn node_id_next_saturates_to_none() {
        assert!(NodeId::new(u64::MAX).next().is_none());
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn node_id_serializes_as_integer() {
        let json = serde_json::to_string(&NodeId::new(7)).unwrap();
        assert_eq!(json, "7");
    }
}
