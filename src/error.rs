//! Error types for the IEC 61850 MMS client stack.

use std::borrow::Cow;

use thiserror::Error;

use crate::transport::TransportState;

/// Result type alias for stack operations.
pub type Result<T> = std::result::Result<T, MmsError>;

/// Protocol layer an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Tag-length-value codec
    Ber,
    /// TPKT / COTP transport
    Transport,
    /// ISO 8327 session
    Session,
    /// ISO 8823 presentation
    Presentation,
    /// Association control (ACSE)
    Acse,
    /// MMS application layer
    Mms,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Ber => "BER",
            Self::Transport => "transport",
            Self::Session => "session",
            Self::Presentation => "presentation",
            Self::Acse => "ACSE",
            Self::Mms => "MMS",
        };
        f.write_str(name)
    }
}

/// MMS client stack error types.
#[derive(Debug, Error)]
pub enum MmsError {
    /// A length field points past the end of the available data
    #[error("Buffer overflow: {needed} bytes needed at offset {offset}, limit {limit}")]
    BufferOverflow {
        /// Offset the read started at
        offset: usize,
        /// Bytes the encoding claims
        needed: usize,
        /// End of the readable region
        limit: usize,
    },

    /// Truncated or inconsistent data
    #[error("Malformed {layer} data: {reason}")]
    Malformed {
        /// Layer that rejected the data
        layer: Layer,
        /// What was wrong
        reason: Cow<'static, str>,
    },

    /// Tag not valid at this position
    #[error("Unknown {layer} tag: 0x{tag:02X}")]
    UnknownTag {
        /// Layer that rejected the tag
        layer: Layer,
        /// Offending tag byte
        tag: u8,
    },

    /// A fixed-capacity buffer would have to grow
    #[error("Buffer capacity exceeded: {requested} bytes requested, capacity {capacity}")]
    BufferCapacityExceeded {
        /// Total size that was needed
        requested: usize,
        /// Configured capacity
        capacity: usize,
    },

    /// Unflushed output plus a new send would not fit the overflow buffer
    #[error("Extension buffer overflow: {pending} pending, {requested} requested, cap {capacity}")]
    ExtensionBufferOverflow {
        /// Bytes still waiting from a previous short write
        pending: usize,
        /// Wire size of the rejected send
        requested: usize,
        /// Overflow buffer capacity
        capacity: usize,
    },

    /// Operation attempted in the wrong connection state
    #[error("Invalid connection state: expected {expected}, was {actual}")]
    InvalidState {
        /// State the operation requires
        expected: TransportState,
        /// State the connection was in
        actual: TransportState,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer closed the stream
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// TCP dial did not complete in time
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// Operation cancelled through its call context
    #[error("Operation cancelled")]
    Cancelled,

    /// Call context deadline expired
    #[error("Operation timed out")]
    Timeout,

    /// Operation needs an established association
    #[error("Not associated")]
    NotAssociated,

    /// Peer refused the association
    #[error("Association failed: {0}")]
    AssociationFailed(Cow<'static, str>),

    /// Peer answered with an initiate-error or confirmed-error PDU
    #[error("Service error: class {class}, code {code}")]
    ServiceError {
        /// Error class tag number
        class: u8,
        /// Error code within the class
        code: i64,
    },

    /// Peer answered with a reject PDU
    #[error("Request rejected: reason tag {reason}, code {code}")]
    Rejected {
        /// Reject reason tag number
        reason: u8,
        /// Reject code
        code: i64,
    },

    /// Well-formed PDU that does not answer the request in flight
    #[error("Unexpected {layer} PDU: {what}")]
    UnexpectedPdu {
        /// Layer that received it
        layer: Layer,
        /// Description
        what: Cow<'static, str>,
    },
}

impl MmsError {
    /// Create a malformed-data error.
    pub fn malformed(layer: Layer, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::Malformed {
            layer,
            reason: reason.into(),
        }
    }

    /// Create an unknown-tag error.
    pub fn unknown_tag(layer: Layer, tag: u8) -> Self {
        Self::UnknownTag { layer, tag }
    }

    /// Create an unexpected-PDU error.
    pub fn unexpected(layer: Layer, what: impl Into<Cow<'static, str>>) -> Self {
        Self::UnexpectedPdu {
            layer,
            what: what.into(),
        }
    }

    /// Check if this error indicates a connection problem.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::ConnectionClosed
                | Self::ConnectionTimeout
                | Self::NotAssociated
                | Self::InvalidState { .. }
        )
    }

    /// Check if this error came from decoding peer data.
    pub fn is_decode_error(&self) -> bool {
        matches!(
            self,
            Self::BufferOverflow { .. } | Self::Malformed { .. } | Self::UnknownTag { .. }
        )
    }

    /// Check if this error is a cancellation or deadline expiry.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Timeout)
    }
}
