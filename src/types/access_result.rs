//! Per-variable read outcome.

use bytes::BytesMut;

use crate::ber;
use crate::error::{Layer, MmsError, Result};

use super::variant::Variant;

/// AccessResult CHOICE tag for failure.
pub const TAG_FAILURE: u8 = 0x80;

/// DataAccessError codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataAccessError {
    /// 0
    ObjectInvalidated,
    /// 1
    HardwareFault,
    /// 2
    TemporarilyUnavailable,
    /// 3
    ObjectAccessDenied,
    /// 4
    ObjectUndefined,
    /// 5
    InvalidAddress,
    /// 6
    TypeUnsupported,
    /// 7
    TypeInconsistent,
    /// 8
    ObjectAttributeInconsistent,
    /// 9
    ObjectAccessUnsupported,
    /// 10
    ObjectNonExistent,
    /// 11
    ObjectValueInvalid,
    /// Code outside the defined range
    Other(i64),
}

impl DataAccessError {
    /// Map a wire code.
    pub const fn from_code(code: i64) -> Self {
        match code {
            0 => Self::ObjectInvalidated,
            1 => Self::HardwareFault,
            2 => Self::TemporarilyUnavailable,
            3 => Self::ObjectAccessDenied,
            4 => Self::ObjectUndefined,
            5 => Self::InvalidAddress,
            6 => Self::TypeUnsupported,
            7 => Self::TypeInconsistent,
            8 => Self::ObjectAttributeInconsistent,
            9 => Self::ObjectAccessUnsupported,
            10 => Self::ObjectNonExistent,
            11 => Self::ObjectValueInvalid,
            other => Self::Other(other),
        }
    }

    /// Wire code.
    pub const fn code(&self) -> i64 {
        match self {
            Self::ObjectInvalidated => 0,
            Self::HardwareFault => 1,
            Self::TemporarilyUnavailable => 2,
            Self::ObjectAccessDenied => 3,
            Self::ObjectUndefined => 4,
            Self::InvalidAddress => 5,
            Self::TypeUnsupported => 6,
            Self::TypeInconsistent => 7,
            Self::ObjectAttributeInconsistent => 8,
            Self::ObjectAccessUnsupported => 9,
            Self::ObjectNonExistent => 10,
            Self::ObjectValueInvalid => 11,
            Self::Other(code) => *code,
        }
    }
}

impl std::fmt::Display for DataAccessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ObjectInvalidated => "object-invalidated",
            Self::HardwareFault => "hardware-fault",
            Self::TemporarilyUnavailable => "temporarily-unavailable",
            Self::ObjectAccessDenied => "object-access-denied",
            Self::ObjectUndefined => "object-undefined",
            Self::InvalidAddress => "invalid-address",
            Self::TypeUnsupported => "type-unsupported",
            Self::TypeInconsistent => "type-inconsistent",
            Self::ObjectAttributeInconsistent => "object-attribute-inconsistent",
            Self::ObjectAccessUnsupported => "object-access-unsupported",
            Self::ObjectNonExistent => "object-non-existent",
            Self::ObjectValueInvalid => "object-value-invalid",
            Self::Other(code) => return write!(f, "data-access-error({})", code),
        };
        f.write_str(name)
    }
}

/// Outcome of reading one variable.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessResult {
    /// Value read
    Success(Variant),
    /// Server refused or could not read the variable
    Failure(DataAccessError),
}

impl AccessResult {
    /// Check if the read succeeded.
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Value, if the read succeeded.
    #[inline]
    pub fn value(&self) -> Option<&Variant> {
        match self {
            Self::Success(v) => Some(v),
            Self::Failure(_) => None,
        }
    }

    /// Convert into a `Result`.
    pub fn into_result(self) -> std::result::Result<Variant, DataAccessError> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Failure(e) => Err(e),
        }
    }

    /// Decode from an AccessResult CHOICE element.
    pub fn decode(tag: u8, content: &[u8]) -> Result<Self> {
        if tag == TAG_FAILURE {
            let code = ber::decode_integer(content)
                .map_err(|_| MmsError::malformed(Layer::Mms, "bad data-access-error"))?;
            return Ok(Self::Failure(DataAccessError::from_code(code)));
        }
        Variant::decode(tag, content).map(Self::Success)
    }

    /// Append the AccessResult CHOICE element.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::Success(v) => v.encode(out),
            Self::Failure(e) => {
                ber::encode_integer(TAG_FAILURE, e.code(), out);
            }
        }
    }
}

impl std::fmt::Display for AccessResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success(v) => write!(f, "{}", v),
            Self::Failure(e) => write!(f, "failure: {}", e),
        }
    }
}
