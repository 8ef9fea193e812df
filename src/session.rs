//! ISO 8327 session layer SPDUs.
//!
//! Session parameters use their own length form: one byte for 0..=254,
//! otherwise `FF` followed by two big-endian bytes. Lengths 128..=254 are
//! therefore a single byte here even though BER would use the long form.

use bytes::{BufMut, BytesMut};

use crate::error::{Layer, MmsError, Result};

/// CONNECT SPDU.
pub const SPDU_CONNECT: u8 = 0x0D;
/// ACCEPT SPDU.
pub const SPDU_ACCEPT: u8 = 0x0E;
/// REFUSE SPDU.
pub const SPDU_REFUSE: u8 = 0x0C;
/// FINISH SPDU.
pub const SPDU_FINISH: u8 = 0x09;
/// DISCONNECT SPDU.
pub const SPDU_DISCONNECT: u8 = 0x0A;
/// ABORT SPDU.
pub const SPDU_ABORT: u8 = 0x19;
/// GIVE TOKENS SPDU, which shares its code with DATA TRANSFER.
pub const SPDU_GIVE_TOKENS: u8 = 0x01;
/// DATA TRANSFER SPDU.
pub const SPDU_DATA_TRANSFER: u8 = 0x01;

/// Connect/accept item group.
pub const PGI_CONNECT_ACCEPT: u8 = 0x05;
/// User data group.
pub const PGI_USER_DATA: u8 = 0xC1;
/// Extended user data group.
pub const PGI_EXTENDED_USER_DATA: u8 = 0xC2;

/// Protocol options.
pub const PI_PROTOCOL_OPTIONS: u8 = 0x13;
/// Version number.
pub const PI_VERSION: u8 = 0x16;
/// Session user requirements.
pub const PI_SESSION_REQUIREMENT: u8 = 0x14;
/// Calling session selector.
pub const PI_CALLING_SELECTOR: u8 = 0x33;
/// Called session selector (responding selector in ACCEPT).
pub const PI_CALLED_SELECTOR: u8 = 0x34;
/// Reason code.
pub const PI_REASON: u8 = 0x32;
/// Transport disconnect.
pub const PI_TRANSPORT_DISCONNECT: u8 = 0x11;

/// Version 2 bit of the version number parameter.
pub const VERSION_2: u8 = 0x02;
/// Duplex functional unit.
pub const REQUIREMENT_DUPLEX: u16 = 0x0002;

/// GIVE TOKENS + DATA TRANSFER header that prefixes data-phase payloads.
pub const DATA_HEADER: [u8; 4] = [SPDU_GIVE_TOKENS, 0x00, SPDU_DATA_TRANSFER, 0x00];

/// Session layer configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Calling session selector
    pub calling_selector: Vec<u8>,
    /// Called session selector
    pub called_selector: Vec<u8>,
    /// Protocol options byte
    pub protocol_options: u8,
    /// Version number bits
    pub version: u8,
    /// Functional unit requirements
    pub requirements: u16,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            calling_selector: vec![0x00, 0x01],
            called_selector: vec![0x00, 0x01],
            protocol_options: 0x00,
            version: VERSION_2,
            requirements: REQUIREMENT_DUPLEX,
        }
    }
}

impl SessionConfig {
    /// Set the calling session selector.
    pub fn calling_selector(mut self, selector: impl Into<Vec<u8>>) -> Self {
        self.calling_selector = selector.into();
        self
    }

    /// Set the called session selector.
    pub fn called_selector(mut self, selector: impl Into<Vec<u8>>) -> Self {
        self.called_selector = selector.into();
        self
    }

    /// Set the functional unit requirements.
    pub fn requirements(mut self, requirements: u16) -> Self {
        self.requirements = requirements;
        self
    }
}

/// SPDU type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpduKind {
    /// CONNECT
    Connect,
    /// ACCEPT
    Accept,
    /// GIVE TOKENS + DATA TRANSFER
    Data,
    /// REFUSE
    Refuse,
    /// FINISH
    Finish,
    /// DISCONNECT
    Disconnect,
    /// ABORT
    Abort,
}

impl SpduKind {
    fn from_code(code: u8) -> Option<Self> {
        match code {
            SPDU_CONNECT => Some(Self::Connect),
            SPDU_ACCEPT => Some(Self::Accept),
            SPDU_REFUSE => Some(Self::Refuse),
            SPDU_FINISH => Some(Self::Finish),
            SPDU_DISCONNECT => Some(Self::Disconnect),
            SPDU_ABORT => Some(Self::Abort),
            _ => None,
        }
    }
}

impl std::fmt::Display for SpduKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connect => "CONNECT",
            Self::Accept => "ACCEPT",
            Self::Data => "DATA",
            Self::Refuse => "REFUSE",
            Self::Finish => "FINISH",
            Self::Disconnect => "DISCONNECT",
            Self::Abort => "ABORT",
        };
        f.write_str(name)
    }
}

/// A parsed SPDU. Parameters absent on the wire are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUnit<'a> {
    /// SPDU type
    pub kind: SpduKind,
    /// Protocol options
    pub protocol_options: Option<u8>,
    /// Version number bits
    pub version: Option<u8>,
    /// Functional unit requirements
    pub requirements: Option<u16>,
    /// Calling selector (CONNECT)
    pub calling_selector: Option<&'a [u8]>,
    /// Called selector (CONNECT)
    pub called_selector: Option<&'a [u8]>,
    /// Responding selector (ACCEPT)
    pub responding_selector: Option<&'a [u8]>,
    /// Reason code (REFUSE) or transport disconnect flags (FINISH, ABORT)
    pub reason: Option<u8>,
    /// User data handed to the presentation layer
    pub user_data: &'a [u8],
}

impl<'a> SessionUnit<'a> {
    fn new(kind: SpduKind) -> Self {
        Self {
            kind,
            protocol_options: None,
            version: None,
            requirements: None,
            calling_selector: None,
            called_selector: None,
            responding_selector: None,
            reason: None,
            user_data: &[],
        }
    }
}

fn put_length(len: usize, out: &mut BytesMut) -> Result<()> {
    if len < 0xFF {
        out.put_u8(len as u8);
    } else {
        let len = u16::try_from(len).map_err(|_| MmsError::BufferCapacityExceeded {
            requested: len,
            capacity: u16::MAX as usize,
        })?;
        out.put_u8(0xFF);
        out.put_u16(len);
    }
    Ok(())
}

fn put_parameter(code: u8, value: &[u8], out: &mut BytesMut) -> Result<()> {
    out.put_u8(code);
    put_length(value.len(), out)?;
    out.put_slice(value);
    Ok(())
}

/// Read a session length at `pos`; returns (value start, value length).
fn read_length(buf: &[u8], pos: usize, limit: usize) -> Result<(usize, usize)> {
    let first = *buf
        .get(pos)
        .filter(|_| pos < limit)
        .ok_or_else(|| MmsError::malformed(Layer::Session, "missing length"))?;
    let (start, len) = if first == 0xFF {
        if pos + 3 > limit {
            return Err(MmsError::malformed(Layer::Session, "truncated extended length"));
        }
        (pos + 3, u16::from_be_bytes([buf[pos + 1], buf[pos + 2]]) as usize)
    } else {
        (pos + 1, first as usize)
    };
    if start + len > limit {
        return Err(MmsError::BufferOverflow {
            offset: start,
            needed: len,
            limit,
        });
    }
    Ok((start, len))
}

fn build_unit(code: u8, parameters: &[u8]) -> Result<BytesMut> {
    let mut out = BytesMut::with_capacity(parameters.len() + 4);
    out.put_u8(code);
    put_length(parameters.len(), &mut out)?;
    out.put_slice(parameters);
    Ok(out)
}

fn put_connect_accept_item(config: &SessionConfig, out: &mut BytesMut) -> Result<()> {
    let item = [
        PI_PROTOCOL_OPTIONS,
        1,
        config.protocol_options,
        PI_VERSION,
        1,
        config.version,
    ];
    put_parameter(PGI_CONNECT_ACCEPT, &item, out)?;
    put_parameter(PI_SESSION_REQUIREMENT, &config.requirements.to_be_bytes(), out)
}

/// Build a CONNECT SPDU carrying `user_data`.
///
/// ```text
/// 0D L | 05 06 {13 01 opts, 16 01 ver} | 14 02 req | 33 L calling | 34 L called | C1 L data
/// ```
pub fn build_connect(config: &SessionConfig, user_data: &[u8]) -> Result<BytesMut> {
    let mut parameters = BytesMut::with_capacity(user_data.len() + 32);
    put_connect_accept_item(config, &mut parameters)?;
    put_parameter(PI_CALLING_SELECTOR, &config.calling_selector, &mut parameters)?;
    put_parameter(PI_CALLED_SELECTOR, &config.called_selector, &mut parameters)?;
    put_parameter(PGI_USER_DATA, user_data, &mut parameters)?;
    build_unit(SPDU_CONNECT, &parameters)
}

/// Build an ACCEPT SPDU. The called selector is sent as responding selector.
pub fn build_accept(config: &SessionConfig, user_data: &[u8]) -> Result<BytesMut> {
    let mut parameters = BytesMut::with_capacity(user_data.len() + 32);
    put_connect_accept_item(config, &mut parameters)?;
    put_parameter(PI_CALLED_SELECTOR, &config.called_selector, &mut parameters)?;
    put_parameter(PGI_USER_DATA, user_data, &mut parameters)?;
    build_unit(SPDU_ACCEPT, &parameters)
}

/// Build a data-phase unit: GIVE TOKENS + DATA TRANSFER + payload.
pub fn build_data(payload: &[u8]) -> BytesMut {
    let mut out = BytesMut::with_capacity(DATA_HEADER.len() + payload.len());
    out.put_slice(&DATA_HEADER);
    out.put_slice(payload);
    out
}

/// Parse one SPDU.
///
/// Parameters are walked until the first user data group; its content is
/// returned as `user_data` for the presentation layer.
pub fn parse(buf: &[u8]) -> Result<SessionUnit<'_>> {
    let code = *buf
        .first()
        .ok_or_else(|| MmsError::malformed(Layer::Session, "empty SPDU"))?;

    if code == SPDU_GIVE_TOKENS {
        return parse_data(buf);
    }

    let kind =
        SpduKind::from_code(code).ok_or_else(|| MmsError::unknown_tag(Layer::Session, code))?;
    let (start, len) = read_length(buf, 1, buf.len())?;
    let mut unit = SessionUnit::new(kind);
    parse_parameters(buf, start, start + len, &mut unit)?;
    Ok(unit)
}

fn parse_data(buf: &[u8]) -> Result<SessionUnit<'_>> {
    // GIVE TOKENS parameters are not used
    let (start, len) = read_length(buf, 1, buf.len())?;
    let pos = start + len;
    match buf.get(pos) {
        Some(&SPDU_DATA_TRANSFER) => {}
        Some(&other) => return Err(MmsError::unknown_tag(Layer::Session, other)),
        None => {
            return Err(MmsError::malformed(
                Layer::Session,
                "GIVE TOKENS without DATA TRANSFER",
            ))
        }
    }
    let (start, len) = read_length(buf, pos + 1, buf.len())?;

    let mut unit = SessionUnit::new(SpduKind::Data);
    unit.user_data = &buf[start + len..];
    Ok(unit)
}

fn parse_parameters<'a>(
    buf: &'a [u8],
    mut pos: usize,
    end: usize,
    unit: &mut SessionUnit<'a>,
) -> Result<()> {
    while pos < end {
        let code = buf[pos];
        let (start, len) = read_length(buf, pos + 1, end)?;
        let value = &buf[start..start + len];

        match code {
            PGI_CONNECT_ACCEPT => parse_parameters(buf, start, start + len, unit)?,
            PI_PROTOCOL_OPTIONS => unit.protocol_options = value.first().copied(),
            PI_VERSION => unit.version = value.first().copied(),
            PI_SESSION_REQUIREMENT => {
                if len != 2 {
                    return Err(MmsError::malformed(
                        Layer::Session,
                        "session requirement must be 2 bytes",
                    ));
                }
                unit.requirements = Some(u16::from_be_bytes([value[0], value[1]]));
            }
            PI_CALLING_SELECTOR => unit.calling_selector = Some(value),
            PI_CALLED_SELECTOR => {
                if unit.kind == SpduKind::Accept {
                    unit.responding_selector = Some(value);
                } else {
                    unit.called_selector = Some(value);
                }
            }
            PI_REASON | PI_TRANSPORT_DISCONNECT => unit.reason = value.first().copied(),
            PGI_USER_DATA | PGI_EXTENDED_USER_DATA => {
                unit.user_data = value;
                return Ok(());
            }
            // token items, TSDU sizes, serial numbers and so on
            _ => {}
        }
        pos = start + len;
    }
    Ok(())
}
