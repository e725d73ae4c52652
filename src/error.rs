//! Handlespace error types with RSerPool error code mapping.
//!
//! [`HandlespaceError`] is the central error type of the core. Every
//! variant maps to the numeric RSerPool error code that the ASAP/ENRP
//! layers embed into rejection responses (e.g. a registration NACK).

use serde::Serialize;

/// Structured error body handed to the protocol layer.
///
/// Mirrors the shape the message codecs embed into an error cause:
/// ```json
/// { "code": 61443, "message": "invalid pool policy" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    /// Numeric RSerPool error code.
    pub code: u16,
    /// Human-readable error message.
    pub message: String,
}

/// Error enum returned by every fallible handlespace operation.
///
/// # Error Code Ranges
///
/// | Range           | Category                         |
/// |-----------------|----------------------------------|
/// | 0x0001–0x00ff   | Protocol-visible (RFC 5352/5353) |
/// | 0x1000–0x1fff   | Implementation specific          |
/// | 0xf000–0xffff   | Handlespace input validation     |
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum HandlespaceError {
    /// Allocation limit reached for a new node or address copy.
    #[error("out of resources")]
    OutOfResources,

    /// The requested pool, pool element, peer or takeover process does not exist.
    #[error("not found")]
    NotFound,

    /// Identifier is undefined (zero) or not allowed in this context.
    #[error("invalid identifier")]
    InvalidId,

    /// Identifier is already present.
    #[error("duplicate identifier")]
    DuplicateId,

    /// A registrar tried to insert its own identifier into its peer list.
    #[error("own identifier not allowed")]
    OwnId,

    /// Transport protocol differs from the pool's protocol.
    #[error("wrong transport protocol")]
    WrongProtocol,

    /// Control channel usage differs from the pool's control channel setting.
    #[error("wrong control channel handling")]
    WrongControlChannelHandling,

    /// Policy settings do not match the pool's policy.
    #[error("incompatible pool policy")]
    IncompatiblePoolPolicy,

    /// Unknown policy type or invalid policy parameters.
    #[error("invalid pool policy")]
    InvalidPoolPolicy,

    /// Pool handle is empty or longer than the maximum handle size.
    #[error("invalid pool handle")]
    InvalidPoolHandle,

    /// User transport addresses are malformed.
    #[error("invalid user transport addresses")]
    InvalidAddresses,

    /// Registrator transport is malformed.
    #[error("invalid registrator transport")]
    InvalidRegistrator,
}

impl HandlespaceError {
    /// Returns the numeric RSerPool error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u16 {
        match self {
            Self::IncompatiblePoolPolicy => 0x0005,
            Self::OutOfResources => 0x0006,
            Self::WrongControlChannelHandling => 0x0008,
            Self::NotFound => 0x0009,
            Self::WrongProtocol => 0x100a,
            Self::InvalidId => 0xf000,
            Self::OwnId => 0xf001,
            Self::DuplicateId => 0xf002,
            Self::InvalidPoolPolicy => 0xf003,
            Self::InvalidPoolHandle => 0xf004,
            Self::InvalidAddresses => 0xf005,
            Self::InvalidRegistrator => 0xf006,
        }
    }

    /// Returns `true` for errors caused by caller input rather than by
    /// resource exhaustion or a missing entry.
    #[must_use]
    pub const fn is_input_error(&self) -> bool {
        !matches!(self, Self::OutOfResources | Self::NotFound)
    }

    /// Returns the structured body for this error.
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.error_code(),
            message: self.to_string(),
        }
    }
}

impl From<&HandlespaceError> for ErrorBody {
    fn from(error: &HandlespaceError) -> Self {
        error.body()
    }
}
