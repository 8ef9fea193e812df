//! MMS ObjectName addressing.

use bytes::BytesMut;

use crate::ber::{self, Elements, TAG_VISIBLE_STRING};
use crate::error::{Layer, MmsError, Result};

/// ObjectName CHOICE tag for vmd-specific.
pub const TAG_VMD_SPECIFIC: u8 = 0x80;
/// ObjectName CHOICE tag for domain-specific.
pub const TAG_DOMAIN_SPECIFIC: u8 = 0xA1;
/// ObjectName CHOICE tag for aa-specific.
pub const TAG_AA_SPECIFIC: u8 = 0x82;

/// Name of an MMS object.
///
/// IEC 61850 data attributes are domain-specific: the domain is the
/// logical device, the item a `$`-separated path such as
/// `GGIO1$MX$AnIn1$mag$f`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ObjectName {
    /// Scoped to the whole device
    VmdSpecific(String),
    /// Scoped to a domain
    DomainSpecific {
        /// Domain (logical device) name
        domain: String,
        /// Item name within the domain
        item: String,
    },
    /// Scoped to the current association
    AaSpecific(String),
}

impl ObjectName {
    /// Domain-specific name.
    pub fn domain(domain: impl Into<String>, item: impl Into<String>) -> Self {
        Self::DomainSpecific {
            domain: domain.into(),
            item: item.into(),
        }
    }

    /// Append the ObjectName CHOICE element.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::VmdSpecific(name) => {
                ber::encode_octet_string(TAG_VMD_SPECIFIC, name.as_bytes(), out);
            }
            Self::DomainSpecific { domain, item } => {
                let len = ber::element_size(domain.len()) + ber::element_size(item.len());
                ber::encode_tl(TAG_DOMAIN_SPECIFIC, len, out);
                ber::encode_octet_string(TAG_VISIBLE_STRING, domain.as_bytes(), out);
                ber::encode_octet_string(TAG_VISIBLE_STRING, item.as_bytes(), out);
            }
            Self::AaSpecific(name) => {
                ber::encode_octet_string(TAG_AA_SPECIFIC, name.as_bytes(), out);
            }
        }
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::VmdSpecific(name) | Self::AaSpecific(name) => ber::element_size(name.len()),
            Self::DomainSpecific { domain, item } => {
                ber::element_size(ber::element_size(domain.len()) + ber::element_size(item.len()))
            }
        }
    }

    /// Decode from an ObjectName CHOICE element.
    pub fn decode(tag: u8, content: &[u8]) -> Result<Self> {
        match tag {
            TAG_VMD_SPECIFIC => Ok(Self::VmdSpecific(ber::decode_visible_string(content)?)),
            TAG_AA_SPECIFIC => Ok(Self::AaSpecific(ber::decode_visible_string(content)?)),
            TAG_DOMAIN_SPECIFIC => {
                let mut parts = Elements::new(content);
                let mut next = || -> Result<String> {
                    match parts.next() {
                        Some(Ok((TAG_VISIBLE_STRING, s))) => ber::decode_visible_string(s),
                        Some(Ok((other, _))) => Err(MmsError::unknown_tag(Layer::Mms, other)),
                        Some(Err(e)) => Err(e),
                        None => Err(MmsError::malformed(
                            Layer::Mms,
                            "incomplete domain-specific name",
                        )),
                    }
                };
                let domain = next()?;
                let item = next()?;
                Ok(Self::DomainSpecific { domain, item })
            }
            other => Err(MmsError::unknown_tag(Layer::Mms, other)),
        }
    }
}

impl std::fmt::Display for ObjectName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::VmdSpecific(name) => f.write_str(name),
            Self::DomainSpecific { domain, item } => write!(f, "{}/{}", domain, item),
            Self::AaSpecific(name) => write!(f, "@{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_domain_specific() {
        let name = ObjectName::domain("LD0", "LLN0$ST$Mod");
        let mut buf = BytesMut::new();
        name.encode(&mut buf);
        assert_eq!(buf.len(), name.encoded_len());
        assert_eq!(
            &buf[..],
            &[
                0xA1, 0x12, 0x1A, 0x03, b'L', b'D', b'0', 0x1A, 0x0B, b'L', b'L', b'N', b'0',
                b'$', b'S', b'T', b'$', b'M', b'o', b'd'
            ]
        );
        assert_eq!(ObjectName::decode(0xA1, &buf[2..]).unwrap(), name);
        assert_eq!(name.to_string(), "LD0/LLN0$ST$Mod");
    }

    #[test]
    fn test_vmd_specific() {
        let mut buf = BytesMut::new();
        ObjectName::VmdSpecific("vmd".into()).encode(&mut buf);
        assert_eq!(&buf[..], &[0x80, 0x03, b'v', b'm', b'd']);
        assert_eq!(
            ObjectName::decode(0x80, b"vmd").unwrap(),
            ObjectName::VmdSpecific("vmd".into())
        );
    }

    #[test]
    fn test_decode_rejects_incomplete() {
        assert!(ObjectName::decode(0xA1, &[0x1A, 0x01, b'a']).is_err());
        assert!(ObjectName::decode(0xA1, &[0x1A, 0x05, b'a']).is_err());
        assert!(ObjectName::decode(0xA1, &[0x04, 0x01, b'a', 0x1A, 0x01, b'b']).is_err());
        assert!(matches!(
            ObjectName::decode(0x81, b"x"),
            Err(MmsError::UnknownTag { tag: 0x81, .. })
        ));
    }
}
