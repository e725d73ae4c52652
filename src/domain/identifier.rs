//! Type-safe 32-bit identifiers and the handlespace time base.
//!
//! [`PoolElementId`] and [`RegistrarId`] wrap a raw `u32` so that the two
//! identifier spaces cannot be confused. Value `0` is reserved as
//! "undefined" in both.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Microseconds on the caller's clock.
pub type TimeStamp = u64;

/// Sentinel time stamp meaning "no timer scheduled".
pub const TIMER_INFINITE: TimeStamp = u64::MAX;

macro_rules! identifier {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u32);

        impl $name {
            /// The reserved "undefined" identifier.
            pub const UNDEFINED: Self = Self(0);

            /// Wraps a raw identifier value.
            #[must_use]
            pub const fn new(value: u32) -> Self {
                Self(value)
            }

            /// Returns the raw identifier value.
            #[must_use]
            pub const fn value(self) -> u32 {
                self.0
            }

            /// Returns `true` for the reserved value `0`.
            #[must_use]
            pub const fn is_undefined(self) -> bool {
                self.0 == 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "${:08x}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

identifier!(
    /// Identifier of a pool element, unique within its pool.
    PoolElementId
);

identifier!(
    /// Identifier of a registrar (ENRP server).
    RegistrarId
);

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn display_is_dollar_hex() {
        assert_eq!(PoolElementId::new(0x1a2b).to_string(), "$00001a2b");
        assert_eq!(RegistrarId::new(u32::MAX).to_string(), "$ffffffff");
    }

    #[test]
    fn zero_is_undefined() {
        assert!(RegistrarId::UNDEFINED.is_undefined());
        assert!(PoolElementId::default().is_undefined());
        assert!(!PoolElementId::from(7).is_undefined());
    }

    #[test]
    fn serde_is_transparent() {
        let json = serde_json::to_string(&RegistrarId::new(42)).unwrap_or_default();
        assert_eq!(json, "42");
        let Ok(back) = serde_json::from_str::<RegistrarId>(&json) else {
            panic!("deserialization failed");
        };
        assert_eq!(u32::from(back), 42);
    }
}
