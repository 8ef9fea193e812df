//! ISO 8823 presentation layer PPDUs.
//!
//! Two presentation contexts are proposed, always in this order:
//!
//! | id | abstract syntax | OID |
//! |----|-----------------|-----|
//! | 1  | ACSE            | 2.2.1.0.1 |
//! | 3  | MMS             | 1.0.9506.2.1 |
//!
//! both with the BER transfer syntax (2.1.1). Data-phase user data is
//! carried as fully-encoded-data with a single PDV.

use bytes::BytesMut;

use crate::ber::{
    self, decode_tl, encode_element, encode_integer, Elements, TAG_INTEGER,
    TAG_OBJECT_IDENTIFIER, TAG_SEQUENCE,
};
use crate::error::{Layer, MmsError, Result};

/// Presentation context id for ACSE.
pub const ACSE_CONTEXT_ID: u8 = 1;
/// Presentation context id for MMS.
pub const MMS_CONTEXT_ID: u8 = 3;

/// ACSE abstract syntax, 2.2.1.0.1.
pub const ACSE_ABSTRACT_SYNTAX: [u8; 4] = [0x52, 0x01, 0x00, 0x01];
/// MMS abstract syntax, 1.0.9506.2.1.
pub const MMS_ABSTRACT_SYNTAX: [u8; 5] = [0x28, 0xCA, 0x22, 0x02, 0x01];
/// BER transfer syntax, 2.1.1.
pub const BER_TRANSFER_SYNTAX: [u8; 2] = [0x51, 0x01];

/// CP-type / CPA-type PPDU tag.
pub const TAG_CONNECT: u8 = 0x31;
/// Fully-encoded-data tag.
pub const TAG_USER_DATA: u8 = 0x61;

const TAG_MODE_SELECTOR: u8 = 0xA0;
const TAG_NORMAL_MODE: u8 = 0xA2;
const TAG_CALLING_SELECTOR: u8 = 0x81;
const TAG_CALLED_SELECTOR: u8 = 0x82;
const TAG_RESPONDING_SELECTOR: u8 = 0x83;
const TAG_CONTEXT_DEFINITIONS: u8 = 0xA4;
const TAG_CONTEXT_RESULTS: u8 = 0xA5;
const TAG_SINGLE_ASN1_TYPE: u8 = 0xA0;
const TAG_RESULT: u8 = 0x80;
const TAG_RESULT_TRANSFER_SYNTAX: u8 = 0x81;

/// Normal mode.
const MODE_NORMAL: i64 = 1;

/// Contexts in proposal order.
const PROPOSED_CONTEXTS: [(u8, AbstractSyntax); 2] = [
    (ACSE_CONTEXT_ID, AbstractSyntax::Acse),
    (MMS_CONTEXT_ID, AbstractSyntax::Mms),
];

/// Presentation layer configuration.
#[derive(Debug, Clone)]
pub struct PresentationConfig {
    /// Calling presentation selector
    pub calling_selector: Vec<u8>,
    /// Called presentation selector
    pub called_selector: Vec<u8>,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            calling_selector: vec![0x00, 0x00, 0x00, 0x01],
            called_selector: vec![0x00, 0x00, 0x00, 0x01],
        }
    }
}

impl PresentationConfig {
    /// Set the calling presentation selector.
    pub fn calling_selector(mut self, selector: impl Into<Vec<u8>>) -> Self {
        self.calling_selector = selector.into();
        self
    }

    /// Set the called presentation selector.
    pub fn called_selector(mut self, selector: impl Into<Vec<u8>>) -> Self {
        self.called_selector = selector.into();
        self
    }
}

/// Abstract syntax of a presentation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbstractSyntax {
    /// Association control
    Acse,
    /// MMS
    Mms,
    /// Anything else
    Other,
}

impl AbstractSyntax {
    fn from_oid(content: &[u8]) -> Self {
        if content == ACSE_ABSTRACT_SYNTAX {
            Self::Acse
        } else if content == MMS_ABSTRACT_SYNTAX {
            Self::Mms
        } else {
            Self::Other
        }
    }

    fn oid(self) -> &'static [u8] {
        match self {
            Self::Acse => &ACSE_ABSTRACT_SYNTAX,
            Self::Mms => &MMS_ABSTRACT_SYNTAX,
            Self::Other => &[],
        }
    }
}

/// One proposed or answered presentation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationContext {
    /// Context identifier
    pub id: u8,
    /// Abstract syntax
    pub abstract_syntax: AbstractSyntax,
    /// Result in an accept: 0 acceptance, 1 user rejection, 2 provider rejection
    pub result: Option<i64>,
}

/// PPDU type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PpduKind {
    /// CP
    ConnectRequest,
    /// CPA
    ConnectAccept,
    /// Fully-encoded user data
    UserData,
}

/// A parsed PPDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationUnit<'a> {
    /// PPDU type
    pub kind: PpduKind,
    /// Mode selector value
    pub mode: Option<i64>,
    /// Calling selector
    pub calling_selector: Option<&'a [u8]>,
    /// Called selector
    pub called_selector: Option<&'a [u8]>,
    /// Responding selector
    pub responding_selector: Option<&'a [u8]>,
    /// Context definitions (CP) or results (CPA)
    pub contexts: Vec<PresentationContext>,
    /// Context the user data belongs to
    pub context_id: Option<u8>,
    /// User data
    pub user_data: &'a [u8],
}

impl<'a> PresentationUnit<'a> {
    fn new(kind: PpduKind) -> Self {
        Self {
            kind,
            mode: None,
            calling_selector: None,
            called_selector: None,
            responding_selector: None,
            contexts: Vec::new(),
            context_id: None,
            user_data: &[],
        }
    }

    /// Context id negotiated for `syntax`.
    pub fn context_id_for(&self, syntax: AbstractSyntax) -> Option<u8> {
        self.contexts
            .iter()
            .find(|c| c.abstract_syntax == syntax)
            .map(|c| c.id)
    }

    /// Whether every answered context was accepted.
    pub fn all_accepted(&self) -> bool {
        self.contexts.iter().all(|c| c.result.unwrap_or(0) == 0)
    }
}

/// Append `61 L 30 L 02 01 ctx A0 L data`.
fn put_user_data(context_id: u8, data: &[u8], out: &mut BytesMut) {
    let mut pdv = BytesMut::with_capacity(data.len() + 8);
    encode_integer(TAG_INTEGER, context_id as i64, &mut pdv);
    encode_element(TAG_SINGLE_ASN1_TYPE, data, &mut pdv);
    let mut list = BytesMut::with_capacity(pdv.len() + 4);
    encode_element(TAG_SEQUENCE, &pdv, &mut list);
    encode_element(TAG_USER_DATA, &list, out);
}

fn put_mode_and_parameters(parameters: &[u8], out: &mut BytesMut) {
    let mut body = BytesMut::with_capacity(parameters.len() + 10);
    let mut mode = BytesMut::new();
    encode_integer(0x80, MODE_NORMAL, &mut mode);
    encode_element(TAG_MODE_SELECTOR, &mode, &mut body);
    encode_element(TAG_NORMAL_MODE, parameters, &mut body);
    encode_element(TAG_CONNECT, &body, out);
}

fn transfer_syntax_list() -> BytesMut {
    let mut list = BytesMut::new();
    encode_element(TAG_OBJECT_IDENTIFIER, &BER_TRANSFER_SYNTAX, &mut list);
    list
}

/// Build a CP PPDU carrying `user_data` (the AARQ) in the ACSE context.
pub fn build_cp(config: &PresentationConfig, user_data: &[u8]) -> BytesMut {
    let mut definitions = BytesMut::new();
    for (id, syntax) in PROPOSED_CONTEXTS {
        let mut item = BytesMut::new();
        encode_integer(TAG_INTEGER, id as i64, &mut item);
        encode_element(TAG_OBJECT_IDENTIFIER, syntax.oid(), &mut item);
        encode_element(TAG_SEQUENCE, &transfer_syntax_list(), &mut item);
        encode_element(TAG_SEQUENCE, &item, &mut definitions);
    }

    let mut parameters = BytesMut::with_capacity(user_data.len() + 64);
    encode_element(TAG_CALLING_SELECTOR, &config.calling_selector, &mut parameters);
    encode_element(TAG_CALLED_SELECTOR, &config.called_selector, &mut parameters);
    encode_element(TAG_CONTEXT_DEFINITIONS, &definitions, &mut parameters);
    put_user_data(ACSE_CONTEXT_ID, user_data, &mut parameters);

    let mut out = BytesMut::with_capacity(parameters.len() + 12);
    put_mode_and_parameters(&parameters, &mut out);
    out
}

/// Build a CPA PPDU accepting both proposed contexts.
///
/// The called selector of `config` is sent as responding selector.
pub fn build_cpa(config: &PresentationConfig, user_data: &[u8]) -> BytesMut {
    let mut results = BytesMut::new();
    for _ in PROPOSED_CONTEXTS {
        let mut item = BytesMut::new();
        encode_integer(TAG_RESULT, 0, &mut item);
        encode_element(TAG_RESULT_TRANSFER_SYNTAX, &BER_TRANSFER_SYNTAX, &mut item);
        encode_element(TAG_SEQUENCE, &item, &mut results);
    }

    let mut parameters = BytesMut::with_capacity(user_data.len() + 48);
    encode_element(TAG_RESPONDING_SELECTOR, &config.called_selector, &mut parameters);
    encode_element(TAG_CONTEXT_RESULTS, &results, &mut parameters);
    put_user_data(ACSE_CONTEXT_ID, user_data, &mut parameters);

    let mut out = BytesMut::with_capacity(parameters.len() + 12);
    put_mode_and_parameters(&parameters, &mut out);
    out
}

/// Build a data-phase user-data PPDU.
pub fn build_user_data(context_id: u8, payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(payload.len() + 16);
    put_user_data(context_id, payload, &mut out);
    out
}

/// Parse one PPDU.
pub fn parse(buf: &[u8]) -> Result<PresentationUnit<'_>> {
    let (start, tlv) = decode_tl(buf, 0, buf.len())?;
    let content = &buf[start..start + tlv.length];

    match tlv.tag {
        TAG_CONNECT => parse_connect(content),
        TAG_USER_DATA => {
            let mut unit = PresentationUnit::new(PpduKind::UserData);
            let (context_id, data) = parse_user_data(content)?;
            unit.context_id = Some(context_id);
            unit.user_data = data;
            Ok(unit)
        }
        other => Err(MmsError::unknown_tag(Layer::Presentation, other)),
    }
}

fn parse_connect(content: &[u8]) -> Result<PresentationUnit<'_>> {
    let mut unit = PresentationUnit::new(PpduKind::ConnectRequest);
    let mut answered = false;

    for element in Elements::new(content) {
        let (tag, value) = element?;
        match tag {
            TAG_MODE_SELECTOR => {
                let mode = ber::expect_element(value, 0x80, Layer::Presentation)?;
                unit.mode = Some(ber::decode_integer(mode)?);
            }
            TAG_NORMAL_MODE => {
                for parameter in Elements::new(value) {
                    let (tag, value) = parameter?;
                    match tag {
                        TAG_CALLING_SELECTOR => unit.calling_selector = Some(value),
                        TAG_CALLED_SELECTOR => unit.called_selector = Some(value),
                        TAG_RESPONDING_SELECTOR => {
                            unit.responding_selector = Some(value);
                            answered = true;
                        }
                        TAG_CONTEXT_DEFINITIONS => unit.contexts = parse_definitions(value)?,
                        TAG_CONTEXT_RESULTS => {
                            unit.contexts = parse_results(value)?;
                            answered = true;
                        }
                        TAG_USER_DATA => {
                            let (context_id, data) = parse_user_data(value)?;
                            unit.context_id = Some(context_id);
                            unit.user_data = data;
                        }
                        // protocol version, requirements, default context
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    if answered {
        unit.kind = PpduKind::ConnectAccept;
    }
    Ok(unit)
}

fn context_id(content: &[u8]) -> Result<u8> {
    let id = ber::decode_integer(content)?;
    u8::try_from(id).map_err(|_| {
        MmsError::malformed(Layer::Presentation, format!("context id {} out of range", id))
    })
}

fn parse_definitions(list: &[u8]) -> Result<Vec<PresentationContext>> {
    let mut contexts = Vec::new();
    for item in Elements::new(list) {
        let (_, item) = item?;
        let mut id = None;
        let mut syntax = AbstractSyntax::Other;
        for field in Elements::new(item) {
            let (tag, value) = field?;
            match tag {
                TAG_INTEGER => id = Some(context_id(value)?),
                TAG_OBJECT_IDENTIFIER => syntax = AbstractSyntax::from_oid(value),
                _ => {}
            }
        }
        let id = id.ok_or_else(|| {
            MmsError::malformed(Layer::Presentation, "context definition without id")
        })?;
        contexts.push(PresentationContext {
            id,
            abstract_syntax: syntax,
            result: None,
        });
    }
    Ok(contexts)
}

/// Results answer the proposed contexts in order. Entries that echo the
/// context id or abstract syntax override the positional match.
fn parse_results(list: &[u8]) -> Result<Vec<PresentationContext>> {
    let mut contexts = Vec::new();
    for (index, item) in Elements::new(list).enumerate() {
        let (_, item) = item?;
        let (mut id, mut syntax) = PROPOSED_CONTEXTS
            .get(index)
            .copied()
            .unwrap_or((0, AbstractSyntax::Other));
        let mut result = None;
        for field in Elements::new(item) {
            let (tag, value) = field?;
            match tag {
                TAG_RESULT => result = Some(ber::decode_integer(value)?),
                TAG_INTEGER => id = context_id(value)?,
                TAG_OBJECT_IDENTIFIER => syntax = AbstractSyntax::from_oid(value),
                _ => {}
            }
        }
        contexts.push(PresentationContext {
            id,
            abstract_syntax: syntax,
            result,
        });
    }
    Ok(contexts)
}

/// Content of a fully-encoded-data element: one PDV list with a context id
/// and single-ASN1-type data.
fn parse_user_data(content: &[u8]) -> Result<(u8, &[u8])> {
    let list = ber::expect_element(content, TAG_SEQUENCE, Layer::Presentation)?;
    let mut id = None;
    let mut data = None;
    for field in Elements::new(list) {
        let (tag, value) = field?;
        match tag {
            TAG_INTEGER => id = Some(context_id(value)?),
            TAG_SINGLE_ASN1_TYPE => data = Some(value),
            TAG_OBJECT_IDENTIFIER => {}
            other => return Err(MmsError::unknown_tag(Layer::Presentation, other)),
        }
    }
    match (id, data) {
        (Some(id), Some(data)) => Ok((id, data)),
        (None, _) => Err(MmsError::malformed(
            Layer::Presentation,
            "user data without context id",
        )),
        (_, None) => Err(MmsError::malformed(
            Layer::Presentation,
            "user data without single-ASN1-type value",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CP_HEADER: [u8; 69] = [
        0x31, 0x81, 0x99, 0xA0, 0x03, 0x80, 0x01, 0x01, 0xA2, 0x81, 0x91, 0x81, 0x04, 0x00, 0x00,
        0x00, 0x01, 0x82, 0x04, 0x00, 0x00, 0x00, 0x01, 0xA4, 0x23, 0x30, 0x0F, 0x02, 0x01, 0x01,
        0x06, 0x04, 0x52, 0x01, 0x00, 0x01, 0x30, 0x04, 0x06, 0x02, 0x51, 0x01, 0x30, 0x10, 0x02,
        0x01, 0x03, 0x06, 0x05, 0x28, 0xCA, 0x22, 0x02, 0x01, 0x30, 0x04, 0x06, 0x02, 0x51, 0x01,
        0x61, 0x5E, 0x30, 0x5C, 0x02, 0x01, 0x01, 0xA0, 0x57,
    ];

    #[test]
    fn test_build_cp() {
        let aarq = [0x60; 87];
        let cp = build_cp(&PresentationConfig::default(), &aarq);
        assert_eq!(cp.len(), 156);
        assert_eq!(&cp[..69], &CP_HEADER);
        assert_eq!(&cp[69..], &aarq);
    }

    #[test]
    fn test_parse_cp() {
        let cp = build_cp(&PresentationConfig::default(), &[0x60, 0x00]);
        let unit = parse(&cp).unwrap();
        assert_eq!(unit.kind, PpduKind::ConnectRequest);
        assert_eq!(unit.mode, Some(1));
        assert_eq!(unit.calling_selector, Some(&[0, 0, 0, 1][..]));
        assert_eq!(unit.context_id_for(AbstractSyntax::Acse), Some(ACSE_CONTEXT_ID));
        assert_eq!(unit.context_id_for(AbstractSyntax::Mms), Some(MMS_CONTEXT_ID));
        assert_eq!(unit.context_id, Some(ACSE_CONTEXT_ID));
        assert_eq!(unit.user_data, &[0x60, 0x00]);
    }

    #[test]
    fn test_parse_cpa() {
        let config = PresentationConfig::default().called_selector([0, 0, 0, 2]);
        let cpa = build_cpa(&config, &[0x61, 0x00]);
        let unit = parse(&cpa).unwrap();
        assert_eq!(unit.kind, PpduKind::ConnectAccept);
        assert_eq!(unit.responding_selector, Some(&[0, 0, 0, 2][..]));
        assert!(unit.all_accepted());
        assert_eq!(unit.context_id_for(AbstractSyntax::Acse), Some(1));
        assert_eq!(unit.context_id_for(AbstractSyntax::Mms), Some(3));
        assert_eq!(unit.context_id, Some(ACSE_CONTEXT_ID));
        assert_eq!(unit.user_data, &[0x61, 0x00]);
    }

    #[test]
    fn test_parse_cpa_with_rejected_context() {
        // second context provider-rejected
        let cpa = [
            0x31, 0x23, 0xA0, 0x03, 0x80, 0x01, 0x01, 0xA2, 0x1C, 0x83, 0x04, 0x00, 0x00, 0x00,
            0x01, 0xA5, 0x14, 0x30, 0x07, 0x80, 0x01, 0x00, 0x81, 0x02, 0x51, 0x01, 0x30, 0x09,
            0x80, 0x01, 0x02, 0x82, 0x01, 0x02, 0x02, 0x01, 0x05,
        ];
        let unit = parse(&cpa).unwrap();
        assert!(!unit.all_accepted());
        assert_eq!(unit.contexts[1].result, Some(2));
        // the echoed context id overrides the positional one
        assert_eq!(unit.contexts[1].id, 5);
        assert_eq!(unit.contexts[1].abstract_syntax, AbstractSyntax::Mms);
    }

    #[test]
    fn test_user_data() {
        let ppdu = build_user_data(MMS_CONTEXT_ID, &[0xA0, 0x00]);
        assert_eq!(
            &ppdu[..],
            &[0x61, 0x09, 0x30, 0x07, 0x02, 0x01, 0x03, 0xA0, 0x02, 0xA0, 0x00]
        );
        let unit = parse(&ppdu).unwrap();
        assert_eq!(unit.kind, PpduKind::UserData);
        assert_eq!(unit.context_id, Some(MMS_CONTEXT_ID));
        assert_eq!(unit.user_data, &[0xA0, 0x00]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&[]).is_err());
        assert!(matches!(
            parse(&[0x30, 0x00]),
            Err(MmsError::UnknownTag {
                layer: Layer::Presentation,
                tag: 0x30
            })
        ));
        // PDV without data
        assert!(parse(&[0x61, 0x05, 0x30, 0x03, 0x02, 0x01, 0x03]).is_err());
        // PDV without context id
        assert!(parse(&[0x61, 0x06, 0x30, 0x04, 0xA0, 0x02, 0x01, 0x00]).is_err());
        // octet-aligned encoding is not used on this stack
        assert!(parse(&[0x61, 0x08, 0x30, 0x06, 0x02, 0x01, 0x03, 0x81, 0x01, 0x00]).is_err());
        // truncated
        let cp = build_cp(&PresentationConfig::default(), &[0x60, 0x00]);
        for cut in 0..cp.len() {
            let _ = parse(&cp[..cut]);
        }
        assert!(parse(&cp[..cp.len() - 1]).is_err());
    }

    proptest! {
        #[test]
        fn test_parse_total_over_random_input(buf in any::<Vec<u8>>()) {
            let _ = parse(&buf);
        }
    }
}
