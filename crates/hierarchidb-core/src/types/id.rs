use crate::types::ulid::{Ulid, UlidDecodeError};
use serde::{Deserialize, Serialize};

// Typed id newtypes over `Ulid`. Ids are public identifiers, never
// authority-bearing capabilities; the phantom-free newtype keeps table keys
// from crossing domains (a NodeId is not a WorkingCopyId).
macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone,
            Copy,
            Debug,
            Deserialize,
            Eq,
            Hash,
            Ord,
            PartialEq,
            PartialOrd,
            Serialize,
        )]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            pub const STORED_SIZE: usize = Ulid::STORED_SIZE;

            #[must_use]
            pub const fn nil() -> Self {
                Self(Ulid::nil())
            }

            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            #[must_use]
            pub const fn to_bytes(self) -> [u8; 16] {
                self.0.to_bytes()
            }

            pub const fn try_from_bytes(bytes: &[u8]) -> Result<Self, UlidDecodeError> {
                match Ulid::try_from_bytes(bytes) {
                    Ok(ulid) => Ok(Self(ulid)),
                    Err(err) => Err(err),
                }
            }
        }

        impl From<Ulid> for $name {
            fn from(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

define_id!(
    /// Identifier of a tree (one live root + one trash root).
    TreeId
);
define_id!(
    /// Stable identifier of a node; preserved across moves and trashing.
    NodeId
);
define_id!(
    /// Identifier of a peer or group entity record.
    EntityId
);
define_id!(
    /// Identifier of a working copy draft.
    WorkingCopyId
);
define_id!(
    /// Identifier of a connected view; owns subscriptions and clipboard state.
    ViewId
);
define_id!(
    /// Identifier of one command envelope.
    CommandId
);
define_id!(
    /// Identifier clustering related commands into one undo step.
    GroupId
);
define_id!(
    /// Identifier of one registered subscription.
    SubscriptionId
);
