//! Association control (ACSE, ISO 8650) APDUs.
//!
//! ```text
//! AARQ 60 { A1 app-context, A2 called-AP-title, A3 called-AE-qualifier,
//!           A6 calling-AP-title, A7 calling-AE-qualifier,
//!           BE user-information { 28 { 02 indirect-ref, A0 data } } }
//! AARE 61 { A1 app-context, A2 result, A3 result-source-diagnostic, ..., BE ... }
//! ```

use bytes::BytesMut;

use crate::ber::{
    self, decode_tl, encode_element, encode_integer, encode_oid, Elements, TAG_INTEGER,
    TAG_OBJECT_IDENTIFIER,
};
use crate::error::{Layer, MmsError, Result};
use crate::presentation::MMS_CONTEXT_ID;

/// AARQ tag.
pub const TAG_AARQ: u8 = 0x60;
/// AARE tag.
pub const TAG_AARE: u8 = 0x61;
/// RLRQ tag.
pub const TAG_RLRQ: u8 = 0x62;
/// RLRE tag.
pub const TAG_RLRE: u8 = 0x63;
/// ABRT tag.
pub const TAG_ABRT: u8 = 0x64;

const TAG_APPLICATION_CONTEXT: u8 = 0xA1;
const TAG_CALLED_AP_TITLE: u8 = 0xA2;
const TAG_CALLED_AE_QUALIFIER: u8 = 0xA3;
const TAG_RESULT: u8 = 0xA2;
const TAG_RESULT_SOURCE_DIAGNOSTIC: u8 = 0xA3;
const TAG_CALLING_AP_TITLE: u8 = 0xA6;
const TAG_CALLING_AE_QUALIFIER: u8 = 0xA7;
const TAG_USER_INFORMATION: u8 = 0xBE;
const TAG_EXTERNAL: u8 = 0x28;
const TAG_SINGLE_ASN1_TYPE: u8 = 0xA0;

/// MMS application context, 1.0.9506.2.3.
pub const MMS_APPLICATION_CONTEXT: [u32; 5] = [1, 0, 9506, 2, 3];

/// ACSE configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcseConfig {
    /// Application context name
    pub application_context: Vec<u32>,
    /// Called AP title
    pub called_ap_title: Option<Vec<u32>>,
    /// Called AE qualifier
    pub called_ae_qualifier: Option<i64>,
    /// Calling AP title
    pub calling_ap_title: Option<Vec<u32>>,
    /// Calling AE qualifier
    pub calling_ae_qualifier: Option<i64>,
}

impl Default for AcseConfig {
    fn default() -> Self {
        Self {
            application_context: MMS_APPLICATION_CONTEXT.to_vec(),
            called_ap_title: Some(vec![1, 1, 1, 999, 1]),
            called_ae_qualifier: Some(12),
            calling_ap_title: Some(vec![1, 1, 1, 999]),
            calling_ae_qualifier: Some(12),
        }
    }
}

impl AcseConfig {
    /// Set the called AP title and AE qualifier.
    pub fn called(mut self, ap_title: Option<Vec<u32>>, ae_qualifier: Option<i64>) -> Self {
        self.called_ap_title = ap_title;
        self.called_ae_qualifier = ae_qualifier;
        self
    }

    /// Set the calling AP title and AE qualifier.
    pub fn calling(mut self, ap_title: Option<Vec<u32>>, ae_qualifier: Option<i64>) -> Self {
        self.calling_ap_title = ap_title;
        self.calling_ae_qualifier = ae_qualifier;
        self
    }
}

/// ACSE APDU type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcsePdu {
    /// Associate request
    Aarq,
    /// Associate response
    Aare,
    /// Release request
    Rlrq,
    /// Release response
    Rlre,
    /// Abort
    Abrt,
}

impl AcsePdu {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            TAG_AARQ => Some(Self::Aarq),
            TAG_AARE => Some(Self::Aare),
            TAG_RLRQ => Some(Self::Rlrq),
            TAG_RLRE => Some(Self::Rlre),
            TAG_ABRT => Some(Self::Abrt),
            _ => None,
        }
    }
}

impl std::fmt::Display for AcsePdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Aarq => "AARQ",
            Self::Aare => "AARE",
            Self::Rlrq => "RLRQ",
            Self::Rlre => "RLRE",
            Self::Abrt => "ABRT",
        };
        f.write_str(name)
    }
}

/// Who produced a result-source-diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSource {
    /// The peer ACSE user
    ServiceUser,
    /// The peer ACSE provider
    ServiceProvider,
}

/// Why an association was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssociateFailure {
    /// 1 rejected-permanent, 2 rejected-transient
    pub result: i64,
    /// Diagnostic source, when present
    pub source: Option<DiagnosticSource>,
    /// Diagnostic value, when present
    pub diagnostic: Option<i64>,
}

impl std::fmt::Display for AssociateFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "result {}", self.result)?;
        if let Some(diagnostic) = self.diagnostic {
            match self.source {
                Some(DiagnosticSource::ServiceProvider) => {
                    write!(f, ", provider diagnostic {}", diagnostic)?
                }
                _ => write!(f, ", user diagnostic {}", diagnostic)?,
            }
        }
        Ok(())
    }
}

/// User information carried by an association APDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserInformation<'a> {
    /// Presentation context of the data
    pub indirect_reference: i64,
    /// Encoded MMS PDU
    pub data: &'a [u8],
}

/// What an ACSE APDU means to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcseIndication<'a> {
    /// AARQ, or AARE with result accepted
    Associate(UserInformation<'a>),
    /// AARE with a non-zero result
    AssociateFailed(AssociateFailure),
    /// ABRT with its source, when present
    Abort(Option<i64>),
    /// RLRQ
    ReleaseRequest,
    /// RLRE
    ReleaseResponse,
}

/// Every field a walk over an APDU recovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcseSummary {
    /// APDU type
    pub pdu: Option<AcsePdu>,
    /// Application context name
    pub application_context: Option<Vec<u32>>,
    /// Association result (AARE)
    pub result: Option<i64>,
    /// Result source (AARE)
    pub source: Option<DiagnosticSource>,
    /// Result diagnostic (AARE)
    pub diagnostic: Option<i64>,
    /// Indirect reference of the user information
    pub indirect_reference: Option<i64>,
    /// Length of the user data
    pub user_data_len: Option<usize>,
}

impl std::fmt::Display for AcseSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.pdu {
            Some(pdu) => write!(f, "{}", pdu)?,
            None => f.write_str("ACSE")?,
        }
        if let Some(context) = &self.application_context {
            let arcs: Vec<String> = context.iter().map(|a| a.to_string()).collect();
            write!(f, " context={}", arcs.join("."))?;
        }
        if let Some(result) = self.result {
            write!(f, " result={}", result)?;
        }
        if let Some(diagnostic) = self.diagnostic {
            write!(f, " diagnostic={}", diagnostic)?;
        }
        if let Some(len) = self.user_data_len {
            write!(f, " user-data={}B", len)?;
        }
        Ok(())
    }
}

/// Build an AARQ carrying `user_data` (the MMS Initiate-Request).
pub fn build_request(config: &AcseConfig, user_data: &[u8]) -> BytesMut {
    let mut body = BytesMut::with_capacity(user_data.len() + 64);

    let mut context = BytesMut::new();
    encode_oid(TAG_OBJECT_IDENTIFIER, &config.application_context, &mut context);
    encode_element(TAG_APPLICATION_CONTEXT, &context, &mut body);

    put_title(
        TAG_CALLED_AP_TITLE,
        TAG_CALLED_AE_QUALIFIER,
        &config.called_ap_title,
        config.called_ae_qualifier,
        &mut body,
    );
    put_title(
        TAG_CALLING_AP_TITLE,
        TAG_CALLING_AE_QUALIFIER,
        &config.calling_ap_title,
        config.calling_ae_qualifier,
        &mut body,
    );
    put_user_information(user_data, &mut body);

    let mut out = BytesMut::with_capacity(body.len() + 4);
    encode_element(TAG_AARQ, &body, &mut out);
    out
}

/// Build an AARE. A non-zero `result` is sent with a user diagnostic of 1
/// (no reason given) and no user information.
pub fn build_response(result: i64, user_data: &[u8]) -> BytesMut {
    let mut body = BytesMut::with_capacity(user_data.len() + 48);

    let mut context = BytesMut::new();
    encode_oid(TAG_OBJECT_IDENTIFIER, &MMS_APPLICATION_CONTEXT, &mut context);
    encode_element(TAG_APPLICATION_CONTEXT, &context, &mut body);

    let mut value = BytesMut::new();
    encode_integer(TAG_INTEGER, result, &mut value);
    encode_element(TAG_RESULT, &value, &mut body);

    let mut diagnostic = BytesMut::new();
    encode_integer(TAG_INTEGER, if result == 0 { 0 } else { 1 }, &mut diagnostic);
    let mut source = BytesMut::new();
    encode_element(0xA1, &diagnostic, &mut source);
    encode_element(TAG_RESULT_SOURCE_DIAGNOSTIC, &source, &mut body);

    if result == 0 {
        put_user_information(user_data, &mut body);
    }

    let mut out = BytesMut::with_capacity(body.len() + 4);
    encode_element(TAG_AARE, &body, &mut out);
    out
}

fn put_title(
    title_tag: u8,
    qualifier_tag: u8,
    title: &Option<Vec<u32>>,
    qualifier: Option<i64>,
    out: &mut BytesMut,
) {
    if let Some(title) = title {
        let mut value = BytesMut::new();
        encode_oid(TAG_OBJECT_IDENTIFIER, title, &mut value);
        encode_element(title_tag, &value, out);
    }
    if let Some(qualifier) = qualifier {
        let mut value = BytesMut::new();
        encode_integer(TAG_INTEGER, qualifier, &mut value);
        encode_element(qualifier_tag, &value, out);
    }
}

fn put_user_information(user_data: &[u8], out: &mut BytesMut) {
    let mut external = BytesMut::with_capacity(user_data.len() + 8);
    encode_integer(TAG_INTEGER, MMS_CONTEXT_ID as i64, &mut external);
    encode_element(TAG_SINGLE_ASN1_TYPE, user_data, &mut external);
    let mut information = BytesMut::with_capacity(external.len() + 4);
    encode_element(TAG_EXTERNAL, &external, &mut information);
    encode_element(TAG_USER_INFORMATION, &information, out);
}

/// Fields of one walk. User data stays borrowed.
struct Walk<'a> {
    pdu: AcsePdu,
    application_context: Option<&'a [u8]>,
    result: Option<i64>,
    source: Option<DiagnosticSource>,
    diagnostic: Option<i64>,
    abort_source: Option<i64>,
    indirect_reference: Option<i64>,
    data: Option<&'a [u8]>,
}

fn walk(message: &[u8]) -> Result<Walk<'_>> {
    let (start, tlv) = decode_tl(message, 0, message.len())?;
    let pdu = AcsePdu::from_tag(tlv.tag)
        .ok_or_else(|| MmsError::unknown_tag(Layer::Acse, tlv.tag))?;
    let content = &message[start..start + tlv.length];

    let mut walk = Walk {
        pdu,
        application_context: None,
        result: None,
        source: None,
        diagnostic: None,
        abort_source: None,
        indirect_reference: None,
        data: None,
    };

    for element in Elements::new(content) {
        let (tag, value) = element?;
        match (pdu, tag) {
            (AcsePdu::Aarq | AcsePdu::Aare, TAG_APPLICATION_CONTEXT) => {
                walk.application_context =
                    Some(ber::expect_element(value, TAG_OBJECT_IDENTIFIER, Layer::Acse)?);
            }
            (AcsePdu::Aare, TAG_RESULT) => {
                let result = ber::expect_element(value, TAG_INTEGER, Layer::Acse)?;
                walk.result = Some(ber::decode_integer(result)?);
            }
            (AcsePdu::Aare, TAG_RESULT_SOURCE_DIAGNOSTIC) => {
                let (inner, header) = decode_tl(value, 0, value.len())?;
                walk.source = match header.tag {
                    0xA1 => Some(DiagnosticSource::ServiceUser),
                    0xA2 => Some(DiagnosticSource::ServiceProvider),
                    other => return Err(MmsError::unknown_tag(Layer::Acse, other)),
                };
                let diagnostic = ber::expect_element(
                    &value[inner..inner + header.length],
                    TAG_INTEGER,
                    Layer::Acse,
                )?;
                walk.diagnostic = Some(ber::decode_integer(diagnostic)?);
            }
            (AcsePdu::Aarq | AcsePdu::Aare, TAG_USER_INFORMATION) => {
                let external = ber::expect_element(value, TAG_EXTERNAL, Layer::Acse)?;
                for field in Elements::new(external) {
                    let (tag, value) = field?;
                    match tag {
                        TAG_INTEGER => walk.indirect_reference = Some(ber::decode_integer(value)?),
                        TAG_SINGLE_ASN1_TYPE => walk.data = Some(value),
                        // direct reference
                        TAG_OBJECT_IDENTIFIER => {}
                        other => return Err(MmsError::unknown_tag(Layer::Acse, other)),
                    }
                }
            }
            (AcsePdu::Abrt, 0x80) => walk.abort_source = Some(ber::decode_integer(value)?),
            // titles, qualifiers, invocation ids, release reasons
            _ => {}
        }
    }
    Ok(walk)
}

/// Parse an ACSE APDU.
///
/// Association APDUs must carry user information with both an indirect
/// reference and single-ASN1-type data, unless the AARE rejects.
pub fn parse(message: &[u8]) -> Result<AcseIndication<'_>> {
    let walk = walk(message)?;
    match walk.pdu {
        AcsePdu::Aare if walk.result.unwrap_or(0) != 0 => {
            Ok(AcseIndication::AssociateFailed(AssociateFailure {
                result: walk.result.unwrap_or_default(),
                source: walk.source,
                diagnostic: walk.diagnostic,
            }))
        }
        AcsePdu::Aarq | AcsePdu::Aare => {
            if walk.pdu == AcsePdu::Aare && walk.result.is_none() {
                return Err(MmsError::malformed(Layer::Acse, "AARE without result"));
            }
            let indirect_reference = walk.indirect_reference.ok_or_else(|| {
                MmsError::malformed(Layer::Acse, "user information without indirect reference")
            })?;
            let data = walk
                .data
                .ok_or_else(|| MmsError::malformed(Layer::Acse, "user information without data"))?;
            Ok(AcseIndication::Associate(UserInformation {
                indirect_reference,
                data,
            }))
        }
        AcsePdu::Abrt => Ok(AcseIndication::Abort(walk.abort_source)),
        AcsePdu::Rlrq => Ok(AcseIndication::ReleaseRequest),
        AcsePdu::Rlre => Ok(AcseIndication::ReleaseResponse),
    }
}

/// Walk an APDU for diagnostics.
///
/// Same walk as [`parse`], without the presence checks, plus the decoded
/// application context and result fields.
pub fn parse_for_logging(message: &[u8]) -> Result<AcseSummary> {
    let walk = walk(message)?;
    let application_context = match walk.application_context {
        Some(oid) => Some(ber::decode_oid(oid)?),
        None => None,
    };
    Ok(AcseSummary {
        pdu: Some(walk.pdu),
        application_context,
        result: walk.result,
        source: walk.source,
        diagnostic: walk.diagnostic,
        indirect_reference: walk.indirect_reference,
        user_data_len: walk.data.map(<[u8]>::len),
    })
}
