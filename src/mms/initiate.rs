//! Initiate-Request / Initiate-Response.
//!
//! ```text
//! A8/A9 { 80 localDetail, 81 maxServOutstandingCalling,
//!         82 maxServOutstandingCalled, 83 nestingLevel,
//!         A4 { 80 version, 81 parameterCBB, 82 servicesSupported } }
//! ```

use bytes::BytesMut;

use crate::ber::{self, Elements};
use crate::error::{Layer, MmsError, Result};
use crate::types::{ParameterCbb, ServiceSupported};

use super::{decode_service_error, TAG_INITIATE_ERROR, TAG_INITIATE_REQUEST, TAG_INITIATE_RESPONSE};

/// Default maximum PDU size.
pub const DEFAULT_MAX_PDU_SIZE: u32 = 65_000;
/// Default outstanding confirmed requests in each direction.
pub const DEFAULT_MAX_OUTSTANDING: u16 = 5;
/// Default data structure nesting level.
pub const DEFAULT_NESTING_LEVEL: u8 = 10;
/// MMS protocol version.
pub const MMS_VERSION: u16 = 1;

const TAG_LOCAL_DETAIL: u8 = 0x80;
const TAG_MAX_CALLING: u8 = 0x81;
const TAG_MAX_CALLED: u8 = 0x82;
const TAG_NESTING_LEVEL: u8 = 0x83;
const TAG_DETAIL: u8 = 0xA4;
const TAG_VERSION: u8 = 0x80;
const TAG_PARAMETER_CBB: u8 = 0x81;
const TAG_SERVICES: u8 = 0x82;

/// Initiate-Request parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateRequest {
    /// Proposed maximum PDU size
    pub max_pdu_size: u32,
    /// Outstanding requests the client may issue
    pub max_outstanding_calling: u16,
    /// Outstanding requests the server may issue
    pub max_outstanding_called: u16,
    /// Data structure nesting level
    pub nesting_level: u8,
    /// Protocol version
    pub version: u16,
    /// Proposed parameter support
    pub parameter_cbb: Vec<ParameterCbb>,
    /// Proposed service support
    pub services: Vec<ServiceSupported>,
}

impl Default for InitiateRequest {
    fn default() -> Self {
        Self {
            max_pdu_size: DEFAULT_MAX_PDU_SIZE,
            max_outstanding_calling: DEFAULT_MAX_OUTSTANDING,
            max_outstanding_called: DEFAULT_MAX_OUTSTANDING,
            nesting_level: DEFAULT_NESTING_LEVEL,
            version: MMS_VERSION,
            parameter_cbb: ParameterCbb::CLIENT_DEFAULT.to_vec(),
            services: ServiceSupported::CLIENT_DEFAULT.to_vec(),
        }
    }
}

impl InitiateRequest {
    /// Set the proposed maximum PDU size.
    pub fn max_pdu_size(mut self, size: u32) -> Self {
        self.max_pdu_size = size;
        self
    }

    /// Set both outstanding request limits.
    pub fn max_outstanding(mut self, calling: u16, called: u16) -> Self {
        self.max_outstanding_calling = calling;
        self.max_outstanding_called = called;
        self
    }

    /// Set the nesting level.
    pub fn nesting_level(mut self, level: u8) -> Self {
        self.nesting_level = level;
        self
    }

    /// Set the proposed parameter support.
    pub fn parameter_cbb(mut self, flags: impl Into<Vec<ParameterCbb>>) -> Self {
        self.parameter_cbb = flags.into();
        self
    }

    /// Set the proposed service support.
    pub fn services(mut self, flags: impl Into<Vec<ServiceSupported>>) -> Self {
        self.services = flags.into();
        self
    }

    /// Encode as an Initiate-Request PDU.
    pub fn to_bytes(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(48);
        encode_initiate(
            TAG_INITIATE_REQUEST,
            &Negotiation {
                max_pdu_size: Some(self.max_pdu_size),
                max_outstanding_calling: self.max_outstanding_calling,
                max_outstanding_called: self.max_outstanding_called,
                nesting_level: Some(self.nesting_level),
                version: Some(self.version),
                parameter_cbb: Some(&self.parameter_cbb),
                services: Some(&self.services),
            },
            &mut out,
        );
        out
    }

    /// Decode an Initiate-Request PDU.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let content = ber::expect_element(buf, TAG_INITIATE_REQUEST, Layer::Mms)?;
        let fields = InitiateResponse::decode_fields(content)?;
        let missing = |what: &'static str| {
            MmsError::malformed(Layer::Mms, format!("initiate-request without {}", what))
        };
        Ok(Self {
            max_pdu_size: fields.max_pdu_size.ok_or_else(|| missing("local detail"))?,
            max_outstanding_calling: fields.max_outstanding_calling,
            max_outstanding_called: fields.max_outstanding_called,
            nesting_level: fields.nesting_level.ok_or_else(|| missing("nesting level"))?,
            version: fields.version.ok_or_else(|| missing("version"))?,
            parameter_cbb: fields.parameter_cbb.ok_or_else(|| missing("parameter CBB"))?,
            services: fields.services.ok_or_else(|| missing("services"))?,
        })
    }
}

/// Initiate-Response parameters. Only the outstanding request limits are
/// mandatory.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InitiateResponse {
    /// Negotiated maximum PDU size
    pub max_pdu_size: Option<u32>,
    /// Outstanding requests the client may issue
    pub max_outstanding_calling: u16,
    /// Outstanding requests the server may issue
    pub max_outstanding_called: u16,
    /// Negotiated nesting level
    pub nesting_level: Option<u8>,
    /// Negotiated protocol version
    pub version: Option<u16>,
    /// Parameter support granted by the server
    pub parameter_cbb: Option<Vec<ParameterCbb>>,
    /// Services the server supports
    pub services: Option<Vec<ServiceSupported>>,
}

impl InitiateResponse {
    /// Response granting everything in `request`.
    pub fn accept(request: &InitiateRequest) -> Self {
        Self {
            max_pdu_size: Some(request.max_pdu_size),
            max_outstanding_calling: request.max_outstanding_calling,
            max_outstanding_called: request.max_outstanding_called,
            nesting_level: Some(request.nesting_level),
            version: Some(request.version),
            parameter_cbb: Some(request.parameter_cbb.clone()),
            services: Some(request.services.clone()),
        }
    }

    /// Check if the server supports `service`. Unknown when the server
    /// sent no service list.
    pub fn supports(&self, service: ServiceSupported) -> Option<bool> {
        self.services.as_ref().map(|s| s.contains(&service))
    }

    /// Encode as an Initiate-Response PDU.
    pub fn to_bytes(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(48);
        encode_initiate(
            TAG_INITIATE_RESPONSE,
            &Negotiation {
                max_pdu_size: self.max_pdu_size,
                max_outstanding_calling: self.max_outstanding_calling,
                max_outstanding_called: self.max_outstanding_called,
                nesting_level: self.nesting_level,
                version: self.version,
                parameter_cbb: self.parameter_cbb.as_deref(),
                services: self.services.as_deref(),
            },
            &mut out,
        );
        out
    }

    /// Decode an Initiate-Response PDU. An Initiate-Error PDU is returned
    /// as `ServiceError`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (start, tlv) = ber::decode_tl(buf, 0, buf.len())?;
        let content = &buf[start..start + tlv.length];
        match tlv.tag {
            TAG_INITIATE_RESPONSE => Self::decode_fields(content),
            TAG_INITIATE_ERROR => Err(decode_service_error(content)),
            other => Err(MmsError::unexpected(
                Layer::Mms,
                format!("{} PDU in initiate (0x{:02X})", super::pdu_name(other), other),
            )),
        }
    }

    fn decode_fields(content: &[u8]) -> Result<Self> {
        let mut response = Self::default();
        let mut calling = None;
        let mut called = None;

        for element in Elements::new(content) {
            let (tag, value) = element?;
            match tag {
                TAG_LOCAL_DETAIL => response.max_pdu_size = Some(decode_field(value)?),
                TAG_MAX_CALLING => calling = Some(decode_field(value)?),
                TAG_MAX_CALLED => called = Some(decode_field(value)?),
                TAG_NESTING_LEVEL => response.nesting_level = Some(decode_field(value)?),
                TAG_DETAIL => {
                    for detail in Elements::new(value) {
                        let (tag, value) = detail?;
                        match tag {
                            TAG_VERSION => response.version = Some(decode_field(value)?),
                            TAG_PARAMETER_CBB => {
                                let (unused, bits) = ber::decode_bit_string(value)?;
                                response.parameter_cbb =
                                    Some(ParameterCbb::decode_set(bits, unused));
                            }
                            TAG_SERVICES => {
                                let (unused, bits) = ber::decode_bit_string(value)?;
                                response.services =
                                    Some(ServiceSupported::decode_set(bits, unused));
                            }
                            // additional CBB, extensions
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        match (calling, called) {
            (Some(calling), Some(called)) => {
                response.max_outstanding_calling = calling;
                response.max_outstanding_called = called;
                Ok(response)
            }
            _ => Err(MmsError::malformed(
                Layer::Mms,
                "initiate without outstanding request limits",
            )),
        }
    }
}

struct Negotiation<'a> {
    max_pdu_size: Option<u32>,
    max_outstanding_calling: u16,
    max_outstanding_called: u16,
    nesting_level: Option<u8>,
    version: Option<u16>,
    parameter_cbb: Option<&'a [ParameterCbb]>,
    services: Option<&'a [ServiceSupported]>,
}

fn encode_initiate(tag: u8, fields: &Negotiation<'_>, out: &mut BytesMut) {
    let mut detail = BytesMut::new();
    if let Some(version) = fields.version {
        ber::encode_integer(TAG_VERSION, i64::from(version), &mut detail);
    }
    if let Some(flags) = fields.parameter_cbb {
        let (bits, unused) = ParameterCbb::encode_set(flags);
        ber::encode_bit_string(TAG_PARAMETER_CBB, &bits, unused, &mut detail);
    }
    if let Some(flags) = fields.services {
        let (bits, unused) = ServiceSupported::encode_set(flags);
        ber::encode_bit_string(TAG_SERVICES, &bits, unused, &mut detail);
    }

    let mut body = BytesMut::with_capacity(detail.len() + 24);
    if let Some(size) = fields.max_pdu_size {
        ber::encode_integer(TAG_LOCAL_DETAIL, i64::from(size), &mut body);
    }
    ber::encode_integer(TAG_MAX_CALLING, i64::from(fields.max_outstanding_calling), &mut body);
    ber::encode_integer(TAG_MAX_CALLED, i64::from(fields.max_outstanding_called), &mut body);
    if let Some(level) = fields.nesting_level {
        ber::encode_integer(TAG_NESTING_LEVEL, i64::from(level), &mut body);
    }
    if !detail.is_empty() {
        ber::encode_element(TAG_DETAIL, &detail, &mut body);
    }
    ber::encode_element(tag, &body, out);
}

fn decode_field<T: TryFrom<i64>>(content: &[u8]) -> Result<T> {
    let value = ber::decode_integer(content)?;
    T::try_from(value).map_err(|_| {
        MmsError::malformed(Layer::Mms, format!("initiate parameter {} out of range", value))
    })
}
