//! Recursive MMS type descriptions.
//!
//! Decoded from GetVariableAccessAttributes responses. Structures own
//! their components, so the tree is built top-down in one pass.

use bytes::BytesMut;

use crate::ber::{self, Elements, TAG_SEQUENCE};
use crate::error::{Layer, MmsError, Result};

/// Deepest structure/array nesting accepted from a peer.
pub const MAX_TYPE_DEPTH: usize = 64;

/// TypeDescription CHOICE tags
pub mod tags {
    /// array
    pub const ARRAY: u8 = 0xA1;
    /// structure
    pub const STRUCTURE: u8 = 0xA2;
    /// boolean
    pub const BOOLEAN: u8 = 0x83;
    /// bit-string
    pub const BIT_STRING: u8 = 0x84;
    /// integer
    pub const INTEGER: u8 = 0x85;
    /// unsigned
    pub const UNSIGNED: u8 = 0x86;
    /// floating-point
    pub const FLOATING_POINT: u8 = 0xA7;
    /// octet-string
    pub const OCTET_STRING: u8 = 0x89;
    /// visible-string
    pub const VISIBLE_STRING: u8 = 0x8A;
    /// binary-time
    pub const BINARY_TIME: u8 = 0x8C;
    /// mMSString
    pub const MMS_STRING: u8 = 0x90;
    /// utc-time
    pub const UTC_TIME: u8 = 0x91;
}

const TAG_PACKED: u8 = 0x80;
const TAG_ELEMENT_COUNT: u8 = 0x81;
const TAG_ELEMENT_TYPE: u8 = 0xA2;
const TAG_COMPONENTS: u8 = 0xA1;
const TAG_COMPONENT_NAME: u8 = 0x80;
const TAG_COMPONENT_TYPE: u8 = 0xA1;

/// Named member of a structure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Component name, empty if the peer omitted it
    pub name: String,
    /// Component type
    pub spec: TypeSpecification,
}

impl Component {
    /// Create a component.
    pub fn new(name: impl Into<String>, spec: TypeSpecification) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }
}

/// MMS type description.
///
/// Sizes of string types are negative when the length is variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeSpecification {
    /// Ordered named components
    Structure(Vec<Component>),
    /// Fixed-length array
    Array {
        /// Number of elements
        count: u32,
        /// Element type
        element: Box<TypeSpecification>,
    },
    /// Boolean
    Boolean,
    /// Bit string of the given size
    BitString(i32),
    /// Signed integer of the given bit width
    Integer(u8),
    /// Unsigned integer of the given bit width
    Unsigned(u8),
    /// IEEE 754 float
    FloatingPoint {
        /// Total width in bits
        format_width: u8,
        /// Exponent width in bits
        exponent_width: u8,
    },
    /// Octet string of the given size
    OctetString(i32),
    /// Visible string of the given size
    VisibleString(i32),
    /// Unicode string of the given size
    MmsString(i32),
    /// UTC timestamp
    UtcTime,
    /// Binary time; `true` when the date part is included
    BinaryTime(bool),
}

impl TypeSpecification {
    /// Decode a TypeDescription CHOICE element.
    pub fn decode(tag: u8, content: &[u8]) -> Result<Self> {
        Self::decode_at(tag, content, 0)
    }

    /// Decode the content of an explicitly tagged TypeSpecification.
    pub fn decode_explicit(content: &[u8]) -> Result<Self> {
        decode_inner(content, 0)
    }

    fn decode_at(tag: u8, content: &[u8], depth: usize) -> Result<Self> {
        if depth >= MAX_TYPE_DEPTH {
            return Err(MmsError::malformed(
                Layer::Mms,
                format!("type nesting exceeds {} levels", MAX_TYPE_DEPTH),
            ));
        }
        let spec = match tag {
            tags::STRUCTURE => Self::Structure(decode_components(content, depth)?),
            tags::ARRAY => {
                let mut count = None;
                let mut element = None;
                for item in Elements::new(content) {
                    let (tag, body) = item?;
                    match tag {
                        TAG_PACKED => {}
                        TAG_ELEMENT_COUNT => count = Some(decode_size::<u32>(body)?),
                        TAG_ELEMENT_TYPE => element = Some(decode_inner(body, depth + 1)?),
                        other => return Err(MmsError::unknown_tag(Layer::Mms, other)),
                    }
                }
                match (count, element) {
                    (Some(count), Some(element)) => Self::Array {
                        count,
                        element: Box::new(element),
                    },
                    _ => return Err(MmsError::malformed(Layer::Mms, "incomplete array type")),
                }
            }
            tags::BOOLEAN => Self::Boolean,
            tags::BIT_STRING => Self::BitString(decode_signed_size(content)?),
            tags::INTEGER => Self::Integer(decode_size::<u8>(content)?),
            tags::UNSIGNED => Self::Unsigned(decode_size::<u8>(content)?),
            tags::FLOATING_POINT => {
                let mut widths = Elements::new(content);
                let mut next = || -> Result<u8> {
                    match widths.next() {
                        Some(Ok((ber::TAG_INTEGER, body))) => decode_size::<u8>(body),
                        Some(Ok((other, _))) => Err(MmsError::unknown_tag(Layer::Mms, other)),
                        Some(Err(e)) => Err(e),
                        None => Err(MmsError::malformed(
                            Layer::Mms,
                            "incomplete floating-point type",
                        )),
                    }
                };
                let format_width = next()?;
                let exponent_width = next()?;
                Self::FloatingPoint {
                    format_width,
                    exponent_width,
                }
            }
            tags::OCTET_STRING => Self::OctetString(decode_signed_size(content)?),
            tags::VISIBLE_STRING => Self::VisibleString(decode_signed_size(content)?),
            tags::MMS_STRING => Self::MmsString(decode_signed_size(content)?),
            tags::UTC_TIME => Self::UtcTime,
            tags::BINARY_TIME => Self::BinaryTime(ber::decode_boolean(content)?),
            other => return Err(MmsError::unknown_tag(Layer::Mms, other)),
        };
        Ok(spec)
    }

    /// Append the TypeDescription CHOICE element.
    pub fn encode(&self, out: &mut BytesMut) {
        match self {
            Self::Structure(components) => {
                let mut list = BytesMut::new();
                for component in components {
                    let mut inner = BytesMut::new();
                    component.spec.encode(&mut inner);
                    let mut entry = BytesMut::new();
                    let name = component.name.as_bytes();
                    ber::encode_octet_string(TAG_COMPONENT_NAME, name, &mut entry);
                    ber::encode_element(TAG_COMPONENT_TYPE, &inner, &mut entry);
                    ber::encode_element(TAG_SEQUENCE, &entry, &mut list);
                }
                let mut body = BytesMut::new();
                ber::encode_element(TAG_COMPONENTS, &list, &mut body);
                ber::encode_element(tags::STRUCTURE, &body, out);
            }
            Self::Array { count, element } => {
                let mut inner = BytesMut::new();
                element.encode(&mut inner);
                let mut body = BytesMut::new();
                ber::encode_unsigned(TAG_ELEMENT_COUNT, u64::from(*count), &mut body);
                ber::encode_element(TAG_ELEMENT_TYPE, &inner, &mut body);
                ber::encode_element(tags::ARRAY, &body, out);
            }
            Self::Boolean => {
                ber::encode_element(tags::BOOLEAN, &[], out);
            }
            Self::BitString(size) => {
                ber::encode_integer(tags::BIT_STRING, i64::from(*size), out);
            }
            Self::Integer(width) => {
                ber::encode_unsigned(tags::INTEGER, u64::from(*width), out);
            }
            Self::Unsigned(width) => {
                ber::encode_unsigned(tags::UNSIGNED, u64::from(*width), out);
            }
            Self::FloatingPoint {
                format_width,
                exponent_width,
            } => {
                let mut body = BytesMut::new();
                ber::encode_unsigned(ber::TAG_INTEGER, u64::from(*format_width), &mut body);
                ber::encode_unsigned(ber::TAG_INTEGER, u64::from(*exponent_width), &mut body);
                ber::encode_element(tags::FLOATING_POINT, &body, out);
            }
            Self::OctetString(size) => {
                ber::encode_integer(tags::OCTET_STRING, i64::from(*size), out);
            }
            Self::VisibleString(size) => {
                ber::encode_integer(tags::VISIBLE_STRING, i64::from(*size), out);
            }
            Self::MmsString(size) => {
                ber::encode_integer(tags::MMS_STRING, i64::from(*size), out);
            }
            Self::UtcTime => {
                ber::encode_element(tags::UTC_TIME, &[], out);
            }
            Self::BinaryTime(with_date) => {
                ber::encode_boolean(tags::BINARY_TIME, *with_date, out);
            }
        }
    }

    /// Components of a structure; empty for other types.
    pub fn components(&self) -> &[Component] {
        match self {
            Self::Structure(components) => components,
            _ => &[],
        }
    }

    /// Look up a nested component by `$`-separated path, e.g. `mag$f`.
    pub fn component(&self, path: &str) -> Option<&TypeSpecification> {
        path.split('$').try_fold(self, |spec, name| {
            spec.components()
                .iter()
                .find(|c| c.name == name)
                .map(|c| &c.spec)
        })
    }

    /// Check if this type has no children.
    #[inline]
    pub const fn is_primitive(&self) -> bool {
        !matches!(self, Self::Structure(_) | Self::Array { .. })
    }
}

impl std::fmt::Display for TypeSpecification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structure(components) => {
                f.write_str("{")?;
                for (i, c) in components.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", c.name, c.spec)?;
                }
                f.write_str("}")
            }
            Self::Array { count, element } => write!(f, "[{}; {}]", element, count),
            Self::Boolean => f.write_str("boolean"),
            Self::BitString(n) => write!(f, "bit-string({})", n),
            Self::Integer(n) => write!(f, "int{}", n),
            Self::Unsigned(n) => write!(f, "uint{}", n),
            Self::FloatingPoint { format_width, .. } => write!(f, "float{}", format_width),
            Self::OctetString(n) => write!(f, "octet-string({})", n),
            Self::VisibleString(n) => write!(f, "visible-string({})", n),
            Self::MmsString(n) => write!(f, "mms-string({})", n),
            Self::UtcTime => f.write_str("utc-time"),
            Self::BinaryTime(_) => f.write_str("binary-time"),
        }
    }
}

/// Decode the single TypeDescription nested in an explicit wrapper.
fn decode_inner(content: &[u8], depth: usize) -> Result<TypeSpecification> {
    match Elements::new(content).next() {
        Some(item) => {
            let (tag, body) = item?;
            TypeSpecification::decode_at(tag, body, depth)
        }
        None => Err(MmsError::malformed(Layer::Mms, "empty type specification")),
    }
}

fn decode_components(content: &[u8], depth: usize) -> Result<Vec<Component>> {
    let mut components = Vec::new();
    for item in Elements::new(content) {
        let (tag, list) = item?;
        match tag {
            TAG_PACKED => continue,
            TAG_COMPONENTS => {}
            other => return Err(MmsError::unknown_tag(Layer::Mms, other)),
        }
        for entry in Elements::new(list) {
            let (tag, body) = entry?;
            if tag != TAG_SEQUENCE {
                return Err(MmsError::unknown_tag(Layer::Mms, tag));
            }
            let mut name = String::new();
            let mut spec = None;
            for field in Elements::new(body) {
                let (tag, value) = field?;
                match tag {
                    TAG_COMPONENT_NAME => name = ber::decode_visible_string(value)?,
                    TAG_COMPONENT_TYPE => spec = Some(decode_inner(value, depth + 1)?),
                    other => return Err(MmsError::unknown_tag(Layer::Mms, other)),
                }
            }
            let spec = spec.ok_or_else(|| {
                MmsError::malformed(Layer::Mms, format!("component '{}' has no type", name))
            })?;
            components.push(Component { name, spec });
        }
    }
    Ok(components)
}

fn decode_size<T: TryFrom<u64>>(content: &[u8]) -> Result<T> {
    let value = ber::decode_unsigned(content)?;
    T::try_from(value)
        .map_err(|_| MmsError::malformed(Layer::Mms, format!("type size {} out of range", value)))
}

fn decode_signed_size(content: &[u8]) -> Result<i32> {
    let value = ber::decode_integer(content)?;
    i32::try_from(value)
        .map_err(|_| MmsError::malformed(Layer::Mms, format!("type size {} out of range", value)))
}
