//! Read-Request / Read-Response.
//!
//! ```text
//! A0 { 02 id, A4 { A1 { A0 { 30 { A0 { ObjectName } } ... } } } }
//! A1 { 02 id, A4 { [A0 spec] A1 { AccessResult ... } } }
//! ```

use bytes::BytesMut;

use crate::ber::{self, Elements, TAG_SEQUENCE};
use crate::error::{Layer, MmsError, Result};
use crate::types::{AccessResult, ObjectName};

use super::{
    decode_confirmed_request, decode_confirmed_response, encode_confirmed_request,
    encode_confirmed_response, SERVICE_READ,
};

const TAG_SPECIFICATION_WITH_RESULT: u8 = 0x80;
const TAG_VARIABLE_ACCESS_SPECIFICATION: u8 = 0xA1;
const TAG_LIST_OF_VARIABLE: u8 = 0xA0;
const TAG_VARIABLE_NAME: u8 = 0xA0;
const TAG_LIST_OF_ACCESS_RESULT: u8 = 0xA1;

/// Read of one or more named variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    /// Invoke id
    pub invoke_id: u32,
    /// Variables to read
    pub variables: Vec<ObjectName>,
}

impl ReadRequest {
    /// Read of a single variable.
    pub fn new(invoke_id: u32, variable: ObjectName) -> Self {
        Self {
            invoke_id,
            variables: vec![variable],
        }
    }

    /// Encode as a confirmed-request PDU.
    pub fn to_bytes(&self) -> BytesMut {
        let mut list = BytesMut::new();
        for variable in &self.variables {
            let mut name = BytesMut::with_capacity(variable.encoded_len());
            variable.encode(&mut name);
            let mut specification = BytesMut::new();
            ber::encode_element(TAG_VARIABLE_NAME, &name, &mut specification);
            ber::encode_element(TAG_SEQUENCE, &specification, &mut list);
        }

        let mut access = BytesMut::new();
        ber::encode_element(TAG_LIST_OF_VARIABLE, &list, &mut access);
        let mut read = BytesMut::new();
        ber::encode_element(TAG_VARIABLE_ACCESS_SPECIFICATION, &access, &mut read);
        let mut service = BytesMut::new();
        ber::encode_element(SERVICE_READ, &read, &mut service);

        let mut out = BytesMut::with_capacity(service.len() + 8);
        encode_confirmed_request(self.invoke_id, &service, &mut out);
        out
    }

    /// Decode a confirmed-request PDU carrying a read.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (invoke_id, tag, body) = decode_confirmed_request(buf)?;
        if tag != SERVICE_READ {
            return Err(MmsError::unexpected(
                Layer::Mms,
                format!("service tag 0x{:02X} in read request", tag),
            ));
        }

        let mut variables = Vec::new();
        for element in Elements::new(body) {
            let (tag, access) = element?;
            match tag {
                TAG_SPECIFICATION_WITH_RESULT => {}
                TAG_VARIABLE_ACCESS_SPECIFICATION => {
                    let list = ber::expect_element(access, TAG_LIST_OF_VARIABLE, Layer::Mms)?;
                    for entry in Elements::new(list) {
                        let (tag, entry) = entry?;
                        if tag != TAG_SEQUENCE {
                            return Err(MmsError::unknown_tag(Layer::Mms, tag));
                        }
                        let name = ber::expect_element(entry, TAG_VARIABLE_NAME, Layer::Mms)?;
                        let (start, tlv) = ber::decode_tl(name, 0, name.len())?;
                        variables.push(ObjectName::decode(
                            tlv.tag,
                            &name[start..start + tlv.length],
                        )?);
                    }
                }
                other => return Err(MmsError::unknown_tag(Layer::Mms, other)),
            }
        }

        if variables.is_empty() {
            return Err(MmsError::malformed(Layer::Mms, "read request without variables"));
        }
        Ok(Self {
            invoke_id,
            variables,
        })
    }
}

/// Results of a read, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadResponse {
    /// Invoke id of the request answered
    pub invoke_id: u32,
    /// One result per requested variable
    pub results: Vec<AccessResult>,
}

impl ReadResponse {
    /// Decode a Read-Response in any of the accepted envelope layouts.
    ///
    /// Every result's value tag must be known; an unknown tag fails the
    /// whole decode.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let (invoke_id, body) = decode_confirmed_response(buf, SERVICE_READ)?;

        let mut results = None;
        for element in Elements::new(body) {
            let (tag, list) = element?;
            match tag {
                // variableAccessSpecification echo
                TAG_LIST_OF_VARIABLE => {}
                TAG_LIST_OF_ACCESS_RESULT => {
                    let mut decoded = Vec::new();
                    for item in Elements::new(list) {
                        let (tag, content) = item?;
                        decoded.push(AccessResult::decode(tag, content)?);
                    }
                    results = Some(decoded);
                }
                other => return Err(MmsError::unknown_tag(Layer::Mms, other)),
            }
        }

        let results = results
            .ok_or_else(|| MmsError::malformed(Layer::Mms, "read response without results"))?;
        Ok(Self { invoke_id, results })
    }

    /// Encode as a confirmed-response PDU.
    pub fn to_bytes(&self) -> BytesMut {
        let mut list = BytesMut::new();
        for result in &self.results {
            result.encode(&mut list);
        }
        let mut body = BytesMut::with_capacity(list.len() + 4);
        ber::encode_element(TAG_LIST_OF_ACCESS_RESULT, &list, &mut body);

        let mut out = BytesMut::with_capacity(body.len() + 10);
        encode_confirmed_response(self.invoke_id, SERVICE_READ, &body, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::types::{BitString, DataAccessError, Variant};

    /// Read-Request for simpleIOGenericIO/GGIO1$MX$AnIn1$mag$f, invoke id 1
    const READ_REQUEST: [u8; 58] = [
        0xA0, 0x38, 0x02, 0x01, 0x01, 0xA4, 0x33, 0xA1, 0x31, 0xA0, 0x2F, 0x30, 0x2D, 0xA0,
        0x2B, 0xA1, 0x29, 0x1A, 0x11, b's', b'i', b'm', b'p', b'l', b'e', b'I', b'O', b'G',
        b'e', b'n', b'e', b'r', b'i', b'c', b'I', b'O', 0x1A, 0x14, b'G', b'G', b'I', b'O',
        b'1', b'$', b'M', b'X', b'$', b'A', b'n', b'I', b'n', b'1', b'$', b'm', b'a', b'g',
        b'$', b'f',
    ];

    fn expected_results() -> Vec<AccessResult> {
        vec![
            AccessResult::Success(Variant::Float32(10.0)),
            AccessResult::Failure(DataAccessError::ObjectNonExistent),
            AccessResult::Success(Variant::BitString(
                BitString::from_raw(vec![0x00, 0x00], 3).unwrap(),
            )),
        ]
    }

    // 87 05 08 41 20 00 00 | 80 01 0A | 84 03 03 00 00
    const RESULTS: [u8; 15] = [
        0x87, 0x05, 0x08, 0x41, 0x20, 0x00, 0x00, 0x80, 0x01, 0x0A, 0x84, 0x03, 0x03, 0x00,
        0x00,
    ];

    #[test]
    fn test_read_request_golden() {
        let name = ObjectName::domain("simpleIOGenericIO", "GGIO1$MX$AnIn1$mag$f");
        let request = ReadRequest::new(1, name);
        assert_eq!(&request.to_bytes()[..], &READ_REQUEST[..]);
        assert_eq!(ReadRequest::decode(&READ_REQUEST).unwrap(), request);
    }

    #[test]
    fn test_read_request_multiple() {
        let request = ReadRequest {
            invoke_id: 1000,
            variables: vec![
                ObjectName::domain("LD0", "MMXU1$MX$TotW$mag$f"),
                ObjectName::VmdSpecific("vmd".into()),
            ],
        };
        assert_eq!(ReadRequest::decode(&request.to_bytes()).unwrap(), request);
    }

    #[test]
    fn test_read_response_wrapped() {
        let response = ReadResponse {
            invoke_id: 1,
            results: expected_results(),
        };
        let wire = response.to_bytes();
        assert_eq!(
            &wire[..9],
            &[0xA1, 0x16, 0x02, 0x01, 0x01, 0xA4, 0x11, 0xA1, 0x0F]
        );
        assert_eq!(&wire[9..], &RESULTS[..]);
        assert_eq!(ReadResponse::decode(&wire).unwrap(), response);
    }

    #[test]
    fn test_read_response_variants_equivalent() {
        let mut wrapped = vec![0xA1, 0x16, 0x02, 0x01, 0x01, 0xA4, 0x11, 0xA1, 0x0F];
        wrapped.extend_from_slice(&RESULTS);

        let mut semi = vec![0xA4, 0x14, 0x02, 0x01, 0x01, 0xA1, 0x0F];
        semi.extend_from_slice(&RESULTS);

        let mut bare = vec![0x02, 0x01, 0x01, 0xA4, 0x11, 0xA1, 0x0F];
        bare.extend_from_slice(&RESULTS);

        let wrapped = ReadResponse::decode(&wrapped).unwrap();
        let semi = ReadResponse::decode(&semi).unwrap();
        let bare = ReadResponse::decode(&bare).unwrap();

        assert_eq!(wrapped.results, expected_results());
        assert_eq!(wrapped, semi);
        assert_eq!(wrapped, bare);
    }

    #[test]
    fn test_unknown_value_tag_fails() {
        // 0x83 is a boolean, not a supported value kind
        let wire = [0xA1, 0x0A, 0x02, 0x01, 0x01, 0xA4, 0x05, 0xA1, 0x03, 0x83, 0x01, 0xFF];
        assert!(matches!(
            ReadResponse::decode(&wire),
            Err(MmsError::UnknownTag { tag: 0x83, .. })
        ));
    }

    #[test]
    fn test_missing_results() {
        let wire = [0xA1, 0x05, 0x02, 0x01, 0x01, 0xA4, 0x00];
        assert!(ReadResponse::decode(&wire).unwrap_err().is_decode_error());
    }

    #[test]
    fn test_empty_result_list() {
        let wire = [0xA1, 0x07, 0x02, 0x01, 0x01, 0xA4, 0x02, 0xA1, 0x00];
        assert!(ReadResponse::decode(&wire).unwrap().results.is_empty());
    }

    #[test]
    fn test_truncated_response() {
        let response = ReadResponse {
            invoke_id: 1,
            results: expected_results(),
        };
        let wire = response.to_bytes();
        for len in 0..wire.len() {
            assert!(ReadResponse::decode(&wire[..len]).is_err());
        }
    }

    proptest! {
        #[test]
        fn test_decode_total_over_random_input(buf in any::<Vec<u8>>()) {
            let _ = ReadRequest::decode(&buf);
            let _ = ReadResponse::decode(&buf);
        }
    }
}
