//! MMS (ISO 9506) application PDUs.
//!
//! - `initiate` - Initiate-Request / Initiate-Response negotiation
//! - `read` - Read-Request / Read-Response
//! - `attributes` - GetVariableAccessAttributes
//!
//! This module holds the confirmed-service envelope shared by all of
//! them, the Conclude exchange and the decoding of error PDUs.

use bytes::BytesMut;

use crate::ber::{self, Elements, TAG_INTEGER};
use crate::error::{Layer, MmsError, Result};

mod attributes;
mod initiate;
mod read;

pub use attributes::*;
pub use initiate::*;
pub use read::*;

// ============================================================================
// PDU tags
// ============================================================================

/// confirmed-RequestPDU
pub const TAG_CONFIRMED_REQUEST: u8 = 0xA0;
/// confirmed-ResponsePDU
pub const TAG_CONFIRMED_RESPONSE: u8 = 0xA1;
/// confirmed-ErrorPDU
pub const TAG_CONFIRMED_ERROR: u8 = 0xA2;
/// rejectPDU
pub const TAG_REJECT: u8 = 0xA4;
/// initiate-RequestPDU
pub const TAG_INITIATE_REQUEST: u8 = 0xA8;
/// initiate-ResponsePDU
pub const TAG_INITIATE_RESPONSE: u8 = 0xA9;
/// initiate-ErrorPDU
pub const TAG_INITIATE_ERROR: u8 = 0xAA;
/// conclude-RequestPDU
pub const TAG_CONCLUDE_REQUEST: u8 = 0x8B;
/// conclude-ResponsePDU
pub const TAG_CONCLUDE_RESPONSE: u8 = 0x8C;
/// conclude-ErrorPDU
pub const TAG_CONCLUDE_ERROR: u8 = 0xAD;

/// Confirmed service tag for read.
pub const SERVICE_READ: u8 = 0xA4;
/// Confirmed service tag for getVariableAccessAttributes.
pub const SERVICE_GET_VARIABLE_ACCESS_ATTRIBUTES: u8 = 0xA6;

const TAG_ERROR_INVOKE_ID: u8 = 0x80;
const TAG_SERVICE_ERROR: u8 = 0xA2;
const TAG_ERROR_CLASS: u8 = 0xA0;

/// Short name of a PDU tag, for diagnostics.
pub fn pdu_name(tag: u8) -> &'static str {
    match tag {
        TAG_CONFIRMED_REQUEST => "confirmed-request",
        TAG_CONFIRMED_RESPONSE => "confirmed-response",
        TAG_CONFIRMED_ERROR => "confirmed-error",
        TAG_REJECT => "reject",
        TAG_INITIATE_REQUEST => "initiate-request",
        TAG_INITIATE_RESPONSE => "initiate-response",
        TAG_INITIATE_ERROR => "initiate-error",
        TAG_CONCLUDE_REQUEST => "conclude-request",
        TAG_CONCLUDE_RESPONSE => "conclude-response",
        TAG_CONCLUDE_ERROR => "conclude-error",
        _ => "unknown",
    }
}

// ============================================================================
// Confirmed service envelope
// ============================================================================

/// Append `A0 { 02 invoke-id, <service> }` where `service` is a complete
/// service element.
pub fn encode_confirmed_request(invoke_id: u32, service: &[u8], out: &mut BytesMut) {
    let id = ber::unsigned_content(u64::from(invoke_id));
    ber::encode_tl(
        TAG_CONFIRMED_REQUEST,
        ber::element_size(id.len()) + service.len(),
        out,
    );
    ber::encode_element(TAG_INTEGER, &id, out);
    out.extend_from_slice(service);
}

/// Append `A1 { 02 invoke-id, <service_tag> { body } }`.
pub fn encode_confirmed_response(invoke_id: u32, service_tag: u8, body: &[u8], out: &mut BytesMut) {
    let id = ber::unsigned_content(u64::from(invoke_id));
    ber::encode_tl(
        TAG_CONFIRMED_RESPONSE,
        ber::element_size(id.len()) + ber::element_size(body.len()),
        out,
    );
    ber::encode_element(TAG_INTEGER, &id, out);
    ber::encode_element(service_tag, body, out);
}

/// Split a confirmed response into its invoke id and the content of the
/// `service_tag` element.
///
/// Three layouts are accepted:
///
/// ```text
/// A1 { 02 id, <svc> { body } }   wrapped
/// <svc> { 02 id, body }          already unwrapped to the service tag
/// 02 id <svc> { body }           no envelope
/// ```
///
/// Confirmed-error and reject PDUs are returned as errors.
pub fn decode_confirmed_response(buf: &[u8], service_tag: u8) -> Result<(u32, &[u8])> {
    let (start, tlv) = ber::decode_tl(buf, 0, buf.len())?;
    let content = &buf[start..start + tlv.length];

    match tlv.tag {
        TAG_CONFIRMED_RESPONSE => decode_id_and_service(content, service_tag),
        TAG_INTEGER => decode_id_and_service(buf, service_tag),
        tag if tag == service_tag && content.first() == Some(&TAG_INTEGER) => {
            let (body_start, id_tlv) = ber::decode_tl(content, 0, content.len())?;
            let id = decode_invoke_id(&content[body_start..body_start + id_tlv.length])?;
            Ok((id, &content[body_start + id_tlv.length..]))
        }
        TAG_CONFIRMED_ERROR => Err(decode_confirmed_error(content)),
        TAG_REJECT => Err(decode_reject(content)),
        other => Err(MmsError::unexpected(
            Layer::Mms,
            format!("{} PDU (0x{:02X})", pdu_name(other), other),
        )),
    }
}

fn decode_id_and_service(buf: &[u8], service_tag: u8) -> Result<(u32, &[u8])> {
    let mut elements = Elements::new(buf);
    let id = match elements.next() {
        Some(Ok((TAG_INTEGER, id))) => decode_invoke_id(id)?,
        Some(Ok((other, _))) => return Err(MmsError::unknown_tag(Layer::Mms, other)),
        Some(Err(e)) => return Err(e),
        None => return Err(MmsError::malformed(Layer::Mms, "missing invoke id")),
    };
    match elements.next() {
        Some(Ok((tag, body))) if tag == service_tag => Ok((id, body)),
        Some(Ok((other, _))) => Err(MmsError::unexpected(
            Layer::Mms,
            format!("service tag 0x{:02X}, expected 0x{:02X}", other, service_tag),
        )),
        Some(Err(e)) => Err(e),
        None => Err(MmsError::malformed(Layer::Mms, "missing service response")),
    }
}

/// Invoke id a response-side PDU answers, in any accepted layout.
///
/// `None` for PDUs that carry no invoke id or cannot be read.
pub fn response_invoke_id(buf: &[u8]) -> Option<u32> {
    let (start, tlv) = ber::decode_tl(buf, 0, buf.len()).ok()?;
    let content = &buf[start..start + tlv.length];
    let id_tag = match tlv.tag {
        TAG_INTEGER => return decode_invoke_id(content).ok(),
        TAG_CONFIRMED_ERROR => TAG_ERROR_INVOKE_ID,
        TAG_REJECT if content.first() == Some(&TAG_ERROR_INVOKE_ID) => TAG_ERROR_INVOKE_ID,
        TAG_CONFIRMED_RESPONSE | SERVICE_READ | SERVICE_GET_VARIABLE_ACCESS_ATTRIBUTES => {
            TAG_INTEGER
        }
        _ => return None,
    };
    match Elements::new(content).next()? {
        Ok((tag, id)) if tag == id_tag => decode_invoke_id(id).ok(),
        _ => None,
    }
}

/// Decode invoke-id content.
pub fn decode_invoke_id(content: &[u8]) -> Result<u32> {
    let id = ber::decode_unsigned(content)?;
    u32::try_from(id)
        .map_err(|_| MmsError::malformed(Layer::Mms, format!("invoke id {} exceeds 32 bits", id)))
}

/// Decode a confirmed-request envelope into invoke id and the service
/// element's tag and content.
pub fn decode_confirmed_request(buf: &[u8]) -> Result<(u32, u8, &[u8])> {
    let content = ber::expect_element(buf, TAG_CONFIRMED_REQUEST, Layer::Mms)?;
    let mut elements = Elements::new(content);
    let id = match elements.next() {
        Some(Ok((TAG_INTEGER, id))) => decode_invoke_id(id)?,
        Some(Ok((other, _))) => return Err(MmsError::unknown_tag(Layer::Mms, other)),
        Some(Err(e)) => return Err(e),
        None => return Err(MmsError::malformed(Layer::Mms, "missing invoke id")),
    };
    match elements.next() {
        Some(Ok((tag, body))) => Ok((id, tag, body)),
        Some(Err(e)) => Err(e),
        None => Err(MmsError::malformed(Layer::Mms, "missing service request")),
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Decode ServiceError content (`A0 { 8N code } ...`) into a
/// `ServiceError`.
pub fn decode_service_error(content: &[u8]) -> MmsError {
    let class = ber::expect_element(content, TAG_ERROR_CLASS, Layer::Mms).and_then(|class| {
        let (start, tlv) = ber::decode_tl(class, 0, class.len())?;
        let code = ber::decode_integer(&class[start..start + tlv.length])?;
        Ok((tlv.tag & 0x1F, code))
    });
    match class {
        Ok((class, code)) => MmsError::ServiceError { class, code },
        Err(e) => e,
    }
}

fn decode_confirmed_error(content: &[u8]) -> MmsError {
    for element in Elements::new(content) {
        match element {
            Ok((TAG_SERVICE_ERROR, body)) => return decode_service_error(body),
            Ok(_) => {}
            Err(e) => return e,
        }
    }
    MmsError::malformed(Layer::Mms, "confirmed-error without service error")
}

/// Decode RejectPDU content into a `Rejected` error.
pub fn decode_reject(content: &[u8]) -> MmsError {
    for element in Elements::new(content) {
        match element {
            Ok((TAG_ERROR_INVOKE_ID, _)) => {}
            Ok((tag, code)) => {
                return match ber::decode_integer(code) {
                    Ok(code) => MmsError::Rejected {
                        reason: tag & 0x1F,
                        code,
                    },
                    Err(e) => e,
                }
            }
            Err(e) => return e,
        }
    }
    MmsError::malformed(Layer::Mms, "reject without reason")
}

/// Encode `A2 { 80 invoke-id, A2 { A0 { 8<class> code } } }`.
pub fn encode_confirmed_error(invoke_id: u32, class: u8, code: i64, out: &mut BytesMut) {
    let mut body = BytesMut::new();
    ber::encode_unsigned(TAG_ERROR_INVOKE_ID, u64::from(invoke_id), &mut body);
    let service_error = service_error_content(class, code);
    ber::encode_element(TAG_SERVICE_ERROR, &service_error, &mut body);
    ber::encode_element(TAG_CONFIRMED_ERROR, &body, out);
}

/// Encode `A4 { 80 invoke-id, 8<reason> code }`.
pub fn encode_reject(invoke_id: Option<u32>, reason: u8, code: i64, out: &mut BytesMut) {
    let mut body = BytesMut::new();
    if let Some(id) = invoke_id {
        ber::encode_unsigned(TAG_ERROR_INVOKE_ID, u64::from(id), &mut body);
    }
    ber::encode_integer(0x80 | (reason & 0x1F), code, &mut body);
    ber::encode_element(TAG_REJECT, &body, out);
}

fn service_error_content(class: u8, code: i64) -> BytesMut {
    let mut class_body = BytesMut::new();
    ber::encode_integer(0x80 | (class & 0x1F), code, &mut class_body);
    let mut content = BytesMut::new();
    ber::encode_element(TAG_ERROR_CLASS, &class_body, &mut content);
    content
}

// ============================================================================
// Conclude
// ============================================================================

/// Build a Conclude-Request (`8B 00`).
pub fn build_conclude_request() -> BytesMut {
    let mut out = BytesMut::with_capacity(2);
    ber::encode_element(TAG_CONCLUDE_REQUEST, &[], &mut out);
    out
}

/// Build a Conclude-Response (`8C 00`).
pub fn build_conclude_response() -> BytesMut {
    let mut out = BytesMut::with_capacity(2);
    ber::encode_element(TAG_CONCLUDE_RESPONSE, &[], &mut out);
    out
}

/// Parse the answer to a Conclude-Request.
pub fn parse_conclude_response(buf: &[u8]) -> Result<()> {
    let (start, tlv) = ber::decode_tl(buf, 0, buf.len())?;
    let content = &buf[start..start + tlv.length];
    match tlv.tag {
        TAG_CONCLUDE_RESPONSE => Ok(()),
        TAG_CONCLUDE_ERROR => Err(decode_service_error(content)),
        TAG_REJECT => Err(decode_reject(content)),
        other => Err(MmsError::unexpected(
            Layer::Mms,
            format!("{} PDU (0x{:02X})", pdu_name(other), other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conclude_pdus() {
        assert_eq!(&build_conclude_request()[..], &[0x8B, 0x00]);
        assert_eq!(&build_conclude_response()[..], &[0x8C, 0x00]);
        parse_conclude_response(&[0x8C, 0x00]).unwrap();
    }

    #[test]
    fn test_conclude_error() {
        // conclude class, further-communication-required
        let err = parse_conclude_response(&[0xAD, 0x05, 0xA0, 0x03, 0x89, 0x01, 0x00]).unwrap_err();
        assert!(matches!(err, MmsError::ServiceError { class: 9, code: 0 }));
    }

    #[test]
    fn test_confirmed_error() {
        let mut buf = BytesMut::new();
        encode_confirmed_error(7, 7, 2, &mut buf);
        assert_eq!(
            &buf[..],
            &[0xA2, 0x0A, 0x80, 0x01, 0x07, 0xA2, 0x05, 0xA0, 0x03, 0x87, 0x01, 0x02]
        );
        let err = decode_confirmed_response(&buf, SERVICE_READ).unwrap_err();
        assert!(matches!(err, MmsError::ServiceError { class: 7, code: 2 }));
    }

    #[test]
    fn test_reject() {
        let mut buf = BytesMut::new();
        encode_reject(Some(1), 1, 4, &mut buf);
        assert_eq!(&buf[..], &[0xA4, 0x06, 0x80, 0x01, 0x01, 0x81, 0x01, 0x04]);
        let err = decode_confirmed_response(&buf, SERVICE_READ).unwrap_err();
        assert!(matches!(err, MmsError::Rejected { reason: 1, code: 4 }));

        // pdu-error without invoke id
        let err = decode_confirmed_response(&[0xA4, 0x03, 0x85, 0x01, 0x00], SERVICE_READ)
            .unwrap_err();
        assert!(matches!(err, MmsError::Rejected { reason: 5, code: 0 }));
    }

    #[test]
    fn test_confirmed_response_layouts() {
        let body = [0xA1, 0x03, 0x85, 0x01, 0x05];

        let mut wrapped = BytesMut::new();
        encode_confirmed_response(3, SERVICE_READ, &body, &mut wrapped);
        let (id, content) = decode_confirmed_response(&wrapped, SERVICE_READ).unwrap();
        assert_eq!((id, content), (3, &body[..]));

        let semi = [0xA4, 0x08, 0x02, 0x01, 0x03, 0xA1, 0x03, 0x85, 0x01, 0x05];
        let (id, content) = decode_confirmed_response(&semi, SERVICE_READ).unwrap();
        assert_eq!((id, content), (3, &body[..]));

        let bare = [0x02, 0x01, 0x03, 0xA4, 0x05, 0xA1, 0x03, 0x85, 0x01, 0x05];
        let (id, content) = decode_confirmed_response(&bare, SERVICE_READ).unwrap();
        assert_eq!((id, content), (3, &body[..]));
    }

    #[test]
    fn test_response_invoke_id() {
        let mut wrapped = BytesMut::new();
        encode_confirmed_response(3, SERVICE_READ, &[0xA1, 0x00], &mut wrapped);
        assert_eq!(response_invoke_id(&wrapped), Some(3));

        let semi = [0xA4, 0x05, 0x02, 0x01, 0x04, 0xA1, 0x00];
        assert_eq!(response_invoke_id(&semi), Some(4));

        let bare = [0x02, 0x01, 0x05, 0xA4, 0x02, 0xA1, 0x00];
        assert_eq!(response_invoke_id(&bare), Some(5));

        let mut error = BytesMut::new();
        encode_confirmed_error(6, 7, 2, &mut error);
        assert_eq!(response_invoke_id(&error), Some(6));

        let mut reject = BytesMut::new();
        encode_reject(Some(7), 1, 4, &mut reject);
        assert_eq!(response_invoke_id(&reject), Some(7));

        assert_eq!(response_invoke_id(&[0xA4, 0x03, 0x85, 0x01, 0x00]), None);
        assert_eq!(response_invoke_id(&build_conclude_response()), None);
        assert_eq!(response_invoke_id(&[0xA1, 0x05, 0x02]), None);
        assert_eq!(response_invoke_id(&[]), None);
    }

    #[test]
    fn test_wrong_service() {
        let mut buf = BytesMut::new();
        encode_confirmed_response(1, SERVICE_READ, &[], &mut buf);
        let err = decode_confirmed_response(&buf, SERVICE_GET_VARIABLE_ACCESS_ATTRIBUTES)
            .unwrap_err();
        assert!(matches!(err, MmsError::UnexpectedPdu { .. }));

        let err = decode_confirmed_response(&[0xA9, 0x00], SERVICE_READ).unwrap_err();
        assert!(matches!(err, MmsError::UnexpectedPdu { layer: Layer::Mms, .. }));
    }

    #[test]
    fn test_confirmed_request_envelope() {
        let mut buf = BytesMut::new();
        encode_confirmed_request(300, &[0xA6, 0x00], &mut buf);
        assert_eq!(&buf[..], &[0xA0, 0x06, 0x02, 0x02, 0x01, 0x2C, 0xA6, 0x00]);
        let (id, tag, body) = decode_confirmed_request(&buf).unwrap();
        assert_eq!((id, tag, body.len()), (300, 0xA6, 0));
    }

    #[test]
    fn test_truncated_responses() {
        let mut buf = BytesMut::new();
        encode_confirmed_response(1, SERVICE_READ, &[0xA1, 0x00], &mut buf);
        for len in 0..buf.len() {
            assert!(decode_confirmed_response(&buf[..len], SERVICE_READ).is_err());
        }
    }
}
