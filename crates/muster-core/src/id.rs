//! Identifier newtypes for inventory records.
//!
//! Every record kind gets its own u64 newtype so the engine can't mix a
//! group id into a host lookup. The big-endian byte encoding is what the
//! storage layer uses for ordered keys and prefix scans.

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Big-endian key bytes, suitable for ordered store keys.
            pub fn to_bytes(self) -> [u8; 8] {
                self.0.to_be_bytes()
            }

            /// Decodes an id from key bytes.
            ///
            /// Returns `None` if the slice is not exactly 8 bytes.
            pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
                let arr: [u8; 8] = bytes.try_into().ok()?;
                Some(Self(u64::from_be_bytes(arr)))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

define_id!(
    /// Identifies one inventory (a graph scope).
    InventoryId
);
define_id!(
    /// Identifies a group within the store.
    GroupId
);
define_id!(
    /// Identifies a host within the store.
    HostId
);
define_id!(
    /// Identifies an inventory source within the store.
    SourceId
);
