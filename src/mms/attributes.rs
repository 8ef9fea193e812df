//! GetVariableAccessAttributes.
//!
//! ```text
//! A0 { 02 id, A6 { A0 { ObjectName } } }
//! A1 { 02 id, A6 { 80 deletable, [A1 address], A2 { TypeDescription } } }
//! ```

use bytes::BytesMut;

use crate::ber::{self, Elements};
use crate::error::{Layer, MmsError, Result};
use crate::types::{ObjectName, TypeSpecification};

use super::{
    decode_confirmed_request, decode_confirmed_response, encode_confirmed_request,
    encode_confirmed_response, SERVICE_GET_VARIABLE_ACCESS_ATTRIBUTES,
};

const TAG_NAME: u8 = 0xA0;
const TAG_DELETABLE: u8 = 0x80;
const TAG_ADDRESS: u8 = 0xA1;
const TAG_TYPE_SPECIFICATION: u8 = 0xA2;

/// Request for the type of a named variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetVariableAccessAttributesRequest {
    /// Invoke id
    pub invoke_id: u32,
    /// Variable name
    pub name: ObjectName,
}

impl GetVariableAccessAttributesRequest {
    /// Create a request.
    pub fn new(invoke_id: u32, name: ObjectName) -> Self {
        Self { invoke_id, name }
    }

    /// Encode as a confirmed-request PDU.
    pub fn to_bytes(&self) -> BytesMut {
        let mut name = BytesMut::with_capacity(self.name.encoded_len());
        self.name.encode(&mut name);
        let mut body = BytesMut::new();
        ber::encode_element(TAG_NAME, &name, &mut body);
        let mut service = BytesMut::new();
        ber::encode_element(SERVICE_GET_VARIABLE_ACCESS_ATTRIBUTES, &body, &mut service);

        let mut out = BytesMut::with_capacity(service.len() + 8);
        encode_confirmed_request(self.invoke_id, &service, &mut out);
        out
    }

    /// Decode a confirmed-request PDU carrying this service.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (invoke_id, tag, body) = decode_confirmed_request(buf)?;
        if tag != SERVICE_GET_VARIABLE_ACCESS_ATTRIBUTES {
            return Err(MmsError::unexpected(
                Layer::Mms,
                format!("service tag 0x{:02X} in attributes request", tag),
            ));
        }
        let name = ber::expect_element(body, TAG_NAME, Layer::Mms)?;
        let (start, tlv) = ber::decode_tl(name, 0, name.len())?;
        Ok(Self {
            invoke_id,
            name: ObjectName::decode(tlv.tag, &name[start..start + tlv.length])?,
        })
    }
}

/// Type description of a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetVariableAccessAttributesResponse {
    /// Invoke id of the request answered
    pub invoke_id: u32,
    /// Whether the variable may be deleted
    pub deletable: bool,
    /// Variable type
    pub type_spec: TypeSpecification,
}

impl GetVariableAccessAttributesResponse {
    /// Decode a confirmed-response PDU carrying this service.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (invoke_id, body) =
            decode_confirmed_response(buf, SERVICE_GET_VARIABLE_ACCESS_ATTRIBUTES)?;

        let mut deletable = None;
        let mut type_spec = None;
        for element in Elements::new(body) {
            let (tag, value) = element?;
            match tag {
                TAG_DELETABLE => deletable = Some(ber::decode_boolean(value)?),
                TAG_ADDRESS => {}
                TAG_TYPE_SPECIFICATION => {
                    type_spec = Some(TypeSpecification::decode_explicit(value)?)
                }
                other => return Err(MmsError::unknown_tag(Layer::Mms, other)),
            }
        }

        match (deletable, type_spec) {
            (Some(deletable), Some(type_spec)) => Ok(Self {
                invoke_id,
                deletable,
                type_spec,
            }),
            (None, _) => Err(MmsError::malformed(Layer::Mms, "attributes without deletable flag")),
            (_, None) => Err(MmsError::malformed(Layer::Mms, "attributes without type")),
        }
    }

    /// Encode as a confirmed-response PDU.
    pub fn to_bytes(&self) -> BytesMut {
        let mut spec = BytesMut::new();
        self.type_spec.encode(&mut spec);
        let mut body = BytesMut::with_capacity(spec.len() + 8);
        ber::encode_boolean(TAG_DELETABLE, self.deletable, &mut body);
        ber::encode_element(TAG_TYPE_SPECIFICATION, &spec, &mut body);

        let mut out = BytesMut::with_capacity(body.len() + 10);
        encode_confirmed_response(
            self.invoke_id,
            SERVICE_GET_VARIABLE_ACCESS_ATTRIBUTES,
            &body,
            &mut out,
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::types::Component;

    #[test]
    fn test_request_encoding() {
        let request = GetVariableAccessAttributesRequest::new(2, ObjectName::domain("LD0", "X"));
        assert_eq!(
            &request.to_bytes()[..],
            &[
                0xA0, 0x11, 0x02, 0x01, 0x02, 0xA6, 0x0C, 0xA0, 0x0A, 0xA1, 0x08, 0x1A, 0x03,
                b'L', b'D', b'0', 0x1A, 0x01, b'X'
            ]
        );
        assert_eq!(
            GetVariableAccessAttributesRequest::decode(&request.to_bytes()).unwrap(),
            request
        );
    }

    #[test]
    fn test_response_decode() {
        // deletable=false, address skipped, {f: float32}
        let wire = [
            0xA1, 0x20, 0x02, 0x01, 0x02, 0xA6, 0x1B, // envelope
            0x80, 0x01, 0x00, // mmsDeletable
            0xA1, 0x02, 0x80, 0x00, // address
            0xA2, 0x12, 0xA2, 0x10, 0xA1, 0x0E, 0x30, 0x0C, 0x80, 0x01, b'f', // structure
            0xA1, 0x07, 0xA7, 0x05, 0x02, 0x01, 0x20, 0x02, 0x01, 0x08,
        ];
        let response = GetVariableAccessAttributesResponse::decode(&wire).unwrap();
        assert_eq!(response.invoke_id, 2);
        assert!(!response.deletable);
        assert_eq!(
            response.type_spec,
            TypeSpecification::Structure(vec![Component::new(
                "f",
                TypeSpecification::FloatingPoint {
                    format_width: 32,
                    exponent_width: 8
                }
            )])
        );
    }

    #[test]
    fn test_response_encode() {
        let response = GetVariableAccessAttributesResponse {
            invoke_id: 9,
            deletable: true,
            type_spec: TypeSpecification::Array {
                count: 3,
                element: Box::new(TypeSpecification::Integer(32)),
            },
        };
        let wire = response.to_bytes();
        assert_eq!(GetVariableAccessAttributesResponse::decode(&wire).unwrap(), response);
    }

    #[test]
    fn test_response_missing_type() {
        let wire = [0xA1, 0x08, 0x02, 0x01, 0x01, 0xA6, 0x03, 0x80, 0x01, 0x00];
        assert!(GetVariableAccessAttributesResponse::decode(&wire)
            .unwrap_err()
            .is_decode_error());
    }

    #[test]
    fn test_response_error_pdu() {
        let mut wire = BytesMut::new();
        crate::mms::encode_confirmed_error(2, 7, 10, &mut wire);
        assert!(matches!(
            GetVariableAccessAttributesResponse::decode(&wire),
            Err(MmsError::ServiceError { class: 7, code: 10 })
        ));
    }

    proptest! {
        #[test]
        fn test_decode_total_over_random_input(buf in any::<Vec<u8>>()) {
            let _ = GetVariableAccessAttributesRequest::decode(&buf);
            let _ = GetVariableAccessAttributesResponse::decode(&buf);
        }
    }
}
