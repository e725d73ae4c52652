//! Pool handles: the opaque byte names under which pools are registered.

use std::cmp::Ordering;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::HandlespaceError;

/// Maximum size of a pool handle in bytes.
pub const MAX_POOL_HANDLE_SIZE: usize = 32;

/// Opaque pool name of 1 to [`MAX_POOL_HANDLE_SIZE`] bytes.
///
/// Handles order by length first and then byte-wise, so `"Z"` sorts before
/// `"AA"`. The name table cursor and the pool index both rely on this order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolHandle(Vec<u8>);

impl PoolHandle {
    /// Creates a handle from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`HandlespaceError::InvalidPoolHandle`] when `bytes` is empty
    /// or longer than [`MAX_POOL_HANDLE_SIZE`].
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, HandlespaceError> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > MAX_POOL_HANDLE_SIZE {
            return Err(HandlespaceError::InvalidPoolHandle);
        }
        Ok(Self(bytes))
    }

    /// Returns the raw handle bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the handle size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always `false`: a constructed handle holds at least one byte.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<&str> for PoolHandle {
    type Error = HandlespaceError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value.as_bytes())
    }
}

impl Ord for PoolHandle {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for PoolHandle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &byte in &self.0 {
            if byte.is_ascii_graphic() || byte == b' ' {
                write!(f, "{}", char::from(byte))?;
            } else {
                write!(f, "{{{byte:02x}}}")?;
            }
        }
        Ok(())
    }
}

impl Serialize for PoolHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn handle(name: &str) -> PoolHandle {
        let Ok(handle) = PoolHandle::try_from(name) else {
            panic!("valid handle {name}");
        };
        handle
    }

    #[test]
    fn rejects_empty_and_oversized() {
        assert_eq!(PoolHandle::new(Vec::new()), Err(HandlespaceError::InvalidPoolHandle));
        assert_eq!(
            PoolHandle::new(vec![b'x'; MAX_POOL_HANDLE_SIZE + 1]),
            Err(HandlespaceError::InvalidPoolHandle)
        );
        assert!(PoolHandle::new(vec![b'x'; MAX_POOL_HANDLE_SIZE]).is_ok());
    }

    #[test]
    fn orders_by_length_then_bytes() {
        assert!(handle("Z") < handle("AA"));
        assert!(handle("AB") < handle("AC"));
        assert_eq!(handle("EchoPool").cmp(&handle("EchoPool")), Ordering::Equal);
    }

    #[test]
    fn display_escapes_binary_bytes() {
        let Ok(binary) = PoolHandle::new(vec![b'P', 0x00, b'1', 0xff]) else {
            panic!("valid handle");
        };
        assert_eq!(binary.to_string(), "P{00}1{ff}");
        assert_eq!(serde_json::to_string(&binary).unwrap_or_default(), "\"P{00}1{ff}\"");
    }
}
