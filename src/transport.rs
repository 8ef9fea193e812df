//! Transport connection over TPKT/COTP.
//!
//! The connection owns the byte stream and implements the class 0
//! handshake, fragmentation of outgoing payloads into Data TPDUs and
//! reassembly of incoming fragments.
//!
//! ```text
//!              connect()                      CC
//!   Idle ──────────────────▶ AwaitingConfirm ─────▶ Connected
//!     │        accept()                       CR        │
//!     └──────────────────▶ AwaitingRequest ──────▶──────┤
//!                                                       │ DR / disconnect()
//!                                                       ▼
//!                                                    Closed
//! ```
//!
//! Reads are split in two steps. [`TransportConnection::read_frame`] pulls
//! bytes into the frame buffer and reports whether a whole TPKT frame is
//! present; [`TransportConnection::parse_incoming`] consumes that frame.
//! Data fragments accumulate in the payload buffer until the caller takes
//! or resets it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Decoder;

use crate::codec::{TpktCodec, TpktHeader, TPKT_HEADER_LEN};
use crate::context::CallContext;
use crate::cotp::{self, ConnectTpdu, DisconnectTpdu, Tpdu, TpduSize, DATA_HEADER_LEN};
use crate::error::{Layer, MmsError, Result};
use crate::logger::LogHandle;

/// Default local connection reference.
pub const DEFAULT_LOCAL_REF: u16 = 0x0001;

/// Default calling and called transport selector.
pub const DEFAULT_SELECTOR: [u8; 2] = [0x00, 0x01];

/// Default reassembly buffer capacity.
pub const DEFAULT_PAYLOAD_CAPACITY: usize = 65_536;

/// Default capacity for output a short write could not hand to the socket.
pub const DEFAULT_OVERFLOW_CAPACITY: usize = 16_384;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// No handshake started
    #[default]
    Idle,
    /// Connect-Request sent
    AwaitingConfirm,
    /// Waiting for a peer's Connect-Request
    AwaitingRequest,
    /// Data transfer allowed
    Connected,
    /// Disconnected or failed
    Closed,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::AwaitingConfirm => "AwaitingConfirm",
            Self::AwaitingRequest => "AwaitingRequest",
            Self::Connected => "Connected",
            Self::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Result of one [`TransportConnection::read_frame`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A whole frame is buffered
    Complete,
    /// More bytes are needed
    Waiting,
}

/// What a consumed frame carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indication {
    /// Connect-Request or Connect-Confirm
    Connect(ConnectTpdu),
    /// Last data fragment; the payload buffer holds the whole message
    Data,
    /// Data fragment without EOT
    MoreFragmentsFollow,
    /// Disconnect-Request or Disconnect-Confirm
    Disconnect(DisconnectTpdu),
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Local connection reference
    pub local_ref: u16,
    /// Calling transport selector
    pub calling_selector: Vec<u8>,
    /// Called transport selector
    pub called_selector: Vec<u8>,
    /// Proposed maximum TPDU size
    pub tpdu_size: TpduSize,
    /// Reassembly buffer capacity
    pub payload_capacity: usize,
    /// Unflushed-output buffer capacity
    pub overflow_capacity: usize,
    /// Diagnostic logger
    pub logger: LogHandle,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            local_ref: DEFAULT_LOCAL_REF,
            calling_selector: DEFAULT_SELECTOR.to_vec(),
            called_selector: DEFAULT_SELECTOR.to_vec(),
            tpdu_size: TpduSize::S8192,
            payload_capacity: DEFAULT_PAYLOAD_CAPACITY,
            overflow_capacity: DEFAULT_OVERFLOW_CAPACITY,
            logger: LogHandle::noop(),
        }
    }
}

impl TransportConfig {
    /// Set the local connection reference.
    pub fn local_ref(mut self, local_ref: u16) -> Self {
        self.local_ref = local_ref;
        self
    }

    /// Set the calling transport selector.
    pub fn calling_selector(mut self, selector: impl Into<Vec<u8>>) -> Self {
        self.calling_selector = selector.into();
        self
    }

    /// Set the called transport selector.
    pub fn called_selector(mut self, selector: impl Into<Vec<u8>>) -> Self {
        self.called_selector = selector.into();
        self
    }

    /// Set the proposed maximum TPDU size.
    pub fn tpdu_size(mut self, size: TpduSize) -> Self {
        self.tpdu_size = size;
        self
    }

    /// Set the reassembly buffer capacity.
    pub fn payload_capacity(mut self, capacity: usize) -> Self {
        self.payload_capacity = capacity;
        self
    }

    /// Set the unflushed-output buffer capacity.
    pub fn overflow_capacity(mut self, capacity: usize) -> Self {
        self.overflow_capacity = capacity;
        self
    }

    /// Set the diagnostic logger.
    pub fn logger(mut self, logger: LogHandle) -> Self {
        self.logger = logger;
        self
    }
}

/// TPKT/COTP connection over an async byte stream.
#[derive(Debug)]
pub struct TransportConnection<S> {
    stream: S,
    config: TransportConfig,
    state: TransportState,
    remote_ref: u16,
    tpdu_size: TpduSize,
    codec: TpktCodec,
    /// One in-flight frame
    frame: BytesMut,
    /// Reassembled user data
    payload: BytesMut,
    /// Bytes a short write left behind
    overflow: BytesMut,
}

impl<S> TransportConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected byte stream. No bytes are exchanged until
    /// [`connect`](Self::connect) or [`accept`](Self::accept).
    pub fn new(stream: S, config: TransportConfig) -> Self {
        let tpdu_size = config.tpdu_size;
        Self {
            stream,
            state: TransportState::Idle,
            remote_ref: 0,
            tpdu_size,
            codec: TpktCodec::new(),
            frame: BytesMut::with_capacity(tpdu_size.bytes() + TPKT_HEADER_LEN),
            payload: BytesMut::new(),
            overflow: BytesMut::new(),
            config,
        }
    }

    /// Current state.
    #[inline]
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Negotiated maximum TPDU size.
    #[inline]
    pub fn tpdu_size(&self) -> TpduSize {
        self.tpdu_size
    }

    /// Local connection reference.
    #[inline]
    pub fn local_ref(&self) -> u16 {
        self.config.local_ref
    }

    /// Peer connection reference.
    #[inline]
    pub fn remote_ref(&self) -> u16 {
        self.remote_ref
    }

    /// Configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Whether a short write left bytes waiting for [`flush`](Self::flush).
    #[inline]
    pub fn has_pending_output(&self) -> bool {
        !self.overflow.is_empty()
    }

    /// Reassembled payload so far. Reading does not consume it.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Discard the reassembled payload.
    #[inline]
    pub fn reset_payload(&mut self) {
        self.payload.clear();
    }

    /// Take the reassembled payload, leaving the buffer empty.
    pub fn take_payload(&mut self) -> Bytes {
        self.payload.split().freeze()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Consume the connection and return the stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Run the initiating handshake: send Connect-Request, wait for
    /// Connect-Confirm. Other TPDUs received meanwhile are ignored.
    pub async fn connect(&mut self, ctx: &CallContext) -> Result<()> {
        self.expect_state(TransportState::Idle)?;

        let request = ConnectTpdu {
            confirm: false,
            dst_ref: 0,
            src_ref: self.config.local_ref,
            class: 0,
            tpdu_size: Some(self.config.tpdu_size),
            calling_selector: Some(self.config.calling_selector.clone()),
            called_selector: Some(self.config.called_selector.clone()),
        };
        let mut tpdu = BytesMut::new();
        request.encode(&mut tpdu)?;
        self.write_tpdu(ctx, &tpdu).await?;
        self.state = TransportState::AwaitingConfirm;
        self.config.logger.debug(format_args!(
            "COTP connect request sent, proposed TPDU size {}",
            self.config.tpdu_size
        ));

        loop {
            if self.read_frame(ctx).await? == FrameStatus::Waiting {
                continue;
            }
            match self.parse_incoming()? {
                Indication::Connect(confirm) if confirm.confirm => {
                    self.remote_ref = confirm.src_ref;
                    if let Some(size) = confirm.tpdu_size {
                        self.tpdu_size = self.tpdu_size.min(size);
                    }
                    self.state = TransportState::Connected;
                    self.config.logger.debug(format_args!(
                        "COTP connected, remote ref {}, TPDU size {}",
                        self.remote_ref, self.tpdu_size
                    ));
                    return Ok(());
                }
                Indication::Disconnect(dr) => {
                    return Err(MmsError::unexpected(
                        Layer::Transport,
                        format!("disconnect (reason {}) during connection setup", dr.reason),
                    ));
                }
                other => {
                    self.payload.clear();
                    self.config
                        .logger
                        .debug(format_args!("ignoring {:?} while awaiting confirm", other));
                }
            }
        }
    }

    /// Run the responding handshake: wait for Connect-Request, answer with
    /// Connect-Confirm.
    pub async fn accept(&mut self, ctx: &CallContext) -> Result<()> {
        self.expect_state(TransportState::Idle)?;
        self.state = TransportState::AwaitingRequest;

        loop {
            if self.read_frame(ctx).await? == FrameStatus::Waiting {
                continue;
            }
            match self.parse_incoming()? {
                Indication::Connect(request) if !request.confirm => {
                    self.remote_ref = request.src_ref;
                    if let Some(size) = request.tpdu_size {
                        self.tpdu_size = self.tpdu_size.min(size);
                    }
                    let confirm = ConnectTpdu {
                        confirm: true,
                        dst_ref: request.src_ref,
                        src_ref: self.config.local_ref,
                        class: 0,
                        tpdu_size: Some(self.tpdu_size),
                        calling_selector: request.calling_selector,
                        called_selector: request.called_selector,
                    };
                    let mut tpdu = BytesMut::new();
                    confirm.encode(&mut tpdu)?;
                    self.write_tpdu(ctx, &tpdu).await?;
                    self.state = TransportState::Connected;
                    self.config.logger.debug(format_args!(
                        "COTP accepted, remote ref {}, TPDU size {}",
                        self.remote_ref, self.tpdu_size
                    ));
                    return Ok(());
                }
                Indication::Disconnect(_) => return Err(MmsError::ConnectionClosed),
                other => {
                    self.payload.clear();
                    self.config
                        .logger
                        .debug(format_args!("ignoring {:?} while awaiting request", other));
                }
            }
        }
    }

    /// Read toward one complete frame.
    ///
    /// Each call performs at most one read for the header and one for the
    /// body, then reports whether the frame is complete. A read of zero
    /// bytes means the peer closed the stream.
    pub async fn read_frame(&mut self, ctx: &CallContext) -> Result<FrameStatus> {
        ctx.check()?;

        if self.frame.len() < TPKT_HEADER_LEN {
            self.fill(ctx, TPKT_HEADER_LEN).await?;
            if self.frame.len() < TPKT_HEADER_LEN {
                return Ok(FrameStatus::Waiting);
            }
        }

        let header = match TpktHeader::parse(&self.frame[..TPKT_HEADER_LEN]) {
            Ok(header) => header,
            Err(e) => {
                self.frame.clear();
                return Err(e);
            }
        };

        if self.frame.len() < header.length {
            self.fill(ctx, header.length).await?;
            if self.frame.len() < header.length {
                return Ok(FrameStatus::Waiting);
            }
        }
        Ok(FrameStatus::Complete)
    }

    /// Consume the buffered frame.
    ///
    /// The frame buffer is cleared whatever the outcome. Data fragments are
    /// appended to the payload buffer.
    pub fn parse_incoming(&mut self) -> Result<Indication> {
        let decoded = self.codec.decode(&mut self.frame);
        self.frame.clear();
        self.codec.reset();
        let tpdu = decoded?
            .ok_or_else(|| MmsError::malformed(Layer::Transport, "no complete frame buffered"))?;

        match cotp::parse(&tpdu)? {
            Tpdu::Data { last, payload } => {
                let requested = self.payload.len() + payload.len();
                if requested > self.config.payload_capacity {
                    self.payload.clear();
                    return Err(MmsError::BufferCapacityExceeded {
                        requested,
                        capacity: self.config.payload_capacity,
                    });
                }
                self.payload.extend_from_slice(payload);
                Ok(if last {
                    Indication::Data
                } else {
                    Indication::MoreFragmentsFollow
                })
            }
            Tpdu::Connect(connect) => Ok(Indication::Connect(connect)),
            Tpdu::Disconnect(disconnect) => {
                self.state = TransportState::Closed;
                Ok(Indication::Disconnect(disconnect))
            }
            Tpdu::Error { cause } => Err(MmsError::unexpected(
                Layer::Transport,
                format!("TPDU error, cause 0x{:02X}", cause),
            )),
        }
    }

    /// Send `payload` as one or more Data TPDUs.
    ///
    /// Fragments carry at most the negotiated TPDU size minus the data
    /// header; only the last has EOT set. Each frame is handed to the
    /// socket with a single write. A short write keeps the rest of that
    /// frame in the overflow buffer; it is drained before the next frame,
    /// so only the tail of the last frame can be left pending.
    pub async fn send(&mut self, ctx: &CallContext, payload: &[u8]) -> Result<()> {
        self.expect_state(TransportState::Connected)?;

        let max_fragment = self.tpdu_size.max_fragment();
        let frame_count = payload.len().div_ceil(max_fragment).max(1);
        let wire_len = payload.len() + frame_count * (TPKT_HEADER_LEN + DATA_HEADER_LEN);

        if !self.overflow.is_empty()
            && self.overflow.len() + wire_len > self.config.overflow_capacity
        {
            return Err(MmsError::ExtensionBufferOverflow {
                pending: self.overflow.len(),
                requested: wire_len,
                capacity: self.config.overflow_capacity,
            });
        }
        self.flush(ctx).await?;

        let mut frame = BytesMut::with_capacity(self.tpdu_size.bytes() + TPKT_HEADER_LEN);
        for index in 0..frame_count {
            let start = index * max_fragment;
            let end = (start + max_fragment).min(payload.len());
            let last = index + 1 == frame_count;

            frame.clear();
            let header = TpktHeader::for_payload(DATA_HEADER_LEN + end - start)?;
            frame.put_slice(&header.to_bytes());
            cotp::encode_data_header(last, &mut frame);
            frame.put_slice(&payload[start..end]);
            if self.has_pending_output() {
                self.flush(ctx).await?;
            }
            self.write_frame(ctx, &frame).await?;
        }

        self.config.logger.debug(format_args!(
            "sent {} bytes in {} data TPDU(s)",
            payload.len(),
            frame_count
        ));
        Ok(())
    }

    /// Write out bytes a previous short write left behind.
    pub async fn flush(&mut self, ctx: &CallContext) -> Result<()> {
        while !self.overflow.is_empty() {
            ctx.check()?;
            let stream = &mut self.stream;
            let pending = &self.overflow[..];
            let written = ctx
                .run(async move { Ok(stream.write(pending).await?) })
                .await?;
            if written == 0 {
                self.state = TransportState::Closed;
                return Err(MmsError::ConnectionClosed);
            }
            self.overflow.advance(written);
        }
        let stream = &mut self.stream;
        ctx.run(async move { Ok(stream.flush().await?) }).await
    }

    /// Receive one complete message, reassembling fragments.
    pub async fn receive(&mut self, ctx: &CallContext) -> Result<Bytes> {
        self.expect_state(TransportState::Connected)?;
        loop {
            if self.has_pending_output() {
                self.flush(ctx).await?;
            }
            if self.read_frame(ctx).await? == FrameStatus::Waiting {
                continue;
            }
            match self.parse_incoming()? {
                Indication::Data => return Ok(self.take_payload()),
                Indication::MoreFragmentsFollow => continue,
                Indication::Disconnect(dr) => {
                    self.config
                        .logger
                        .debug(format_args!("peer disconnected, reason {}", dr.reason));
                    return Err(MmsError::ConnectionClosed);
                }
                Indication::Connect(_) => {
                    return Err(MmsError::unexpected(
                        Layer::Transport,
                        "connect TPDU on an established connection",
                    ));
                }
            }
        }
    }

    /// Send Disconnect-Request (when connected) and shut the stream down.
    pub async fn disconnect(&mut self, ctx: &CallContext) -> Result<()> {
        match self.state {
            TransportState::Closed => return Ok(()),
            TransportState::Connected => {
                let mut tpdu = BytesMut::new();
                DisconnectTpdu {
                    confirm: false,
                    dst_ref: self.remote_ref,
                    src_ref: self.config.local_ref,
                    reason: 0,
                }
                .encode(&mut tpdu);
                let sent = self.write_tpdu(ctx, &tpdu).await;
                self.state = TransportState::Closed;
                sent?;
            }
            _ => self.state = TransportState::Closed,
        }
        let stream = &mut self.stream;
        ctx.run(async move { Ok(stream.shutdown().await?) }).await
    }

    fn expect_state(&self, expected: TransportState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(MmsError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    /// One read into the frame buffer, never past `target` bytes.
    async fn fill(&mut self, ctx: &CallContext, target: usize) -> Result<()> {
        let wanted = target - self.frame.len();
        self.frame.reserve(wanted);
        let stream = &mut self.stream;
        let mut window = (&mut self.frame).limit(wanted);
        let read = ctx
            .run(async move { Ok(stream.read_buf(&mut window).await?) })
            .await?;
        if read == 0 {
            self.state = TransportState::Closed;
            return Err(MmsError::ConnectionClosed);
        }
        Ok(())
    }

    /// Write a control TPDU in full, after any pending output.
    async fn write_tpdu(&mut self, ctx: &CallContext, tpdu: &[u8]) -> Result<()> {
        self.flush(ctx).await?;
        let header = TpktHeader::for_payload(tpdu.len())?;
        let mut frame = BytesMut::with_capacity(header.length);
        frame.put_slice(&header.to_bytes());
        frame.put_slice(tpdu);

        let stream = &mut self.stream;
        ctx.run(async move {
            stream.write_all(&frame).await?;
            stream.flush().await?;
            Ok(())
        })
        .await
    }

    /// Hand one frame to the socket with a single write and keep the rest.
    /// The overflow buffer is empty on entry.
    async fn write_frame(&mut self, ctx: &CallContext, frame: &[u8]) -> Result<()> {
        let stream = &mut self.stream;
        let written = ctx
            .run(async move { Ok(stream.write(frame).await?) })
            .await?;
        if written == 0 {
            self.state = TransportState::Closed;
            return Err(MmsError::ConnectionClosed);
        }

        let remainder = &frame[written..];
        if remainder.is_empty() {
            return Ok(());
        }
        let requested = self.overflow.len() + remainder.len();
        if requested > self.config.overflow_capacity {
            self.state = TransportState::Closed;
            return Err(MmsError::BufferCapacityExceeded {
                requested,
                capacity: self.config.overflow_capacity,
            });
        }
        self.overflow.extend_from_slice(remainder);
        self.config.logger.debug(format_args!(
            "short write, {} bytes pending",
            self.overflow.len()
        ));
        Ok(())
    }
}
