//! IEC 61850 MMS client.
//!
//! The client drives the full stack over one transport connection:
//! COTP handshake, association (session connect, presentation connect,
//! ACSE and MMS initiate in one exchange), confirmed services and the
//! orderly conclude/disconnect.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::acse::{self, AcseConfig, AcseIndication};
use crate::context::CallContext;
use crate::error::{Layer, MmsError, Result};
use crate::logger::LogHandle;
use crate::mms::{
    self, GetVariableAccessAttributesRequest, GetVariableAccessAttributesResponse,
    InitiateRequest, InitiateResponse, ReadRequest, ReadResponse,
};
use crate::presentation::{
    self, AbstractSyntax, PpduKind, PresentationConfig, ACSE_CONTEXT_ID, MMS_CONTEXT_ID,
};
use crate::session::{self, SessionConfig, SpduKind};
use crate::transport::{TransportConfig, TransportConnection, TransportState};
use crate::types::{AccessResult, ObjectName};

/// Default ISO-on-TCP port.
pub const DEFAULT_PORT: u16 = 102;

/// Default TCP connect and handshake timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for one confirmed request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address (host:port)
    pub address: String,
    /// TCP connect and association timeout
    pub connect_timeout: Duration,
    /// Timeout for each confirmed request
    pub request_timeout: Duration,
    /// Transport parameters
    pub transport: TransportConfig,
    /// Session parameters
    pub session: SessionConfig,
    /// Presentation parameters
    pub presentation: PresentationConfig,
    /// Association parameters
    pub acse: AcseConfig,
    /// MMS negotiation proposal
    pub initiate: InitiateRequest,
    /// Diagnostic logger
    pub logger: LogHandle,
}

impl ClientConfig {
    /// Create a new configuration with the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            presentation: PresentationConfig::default(),
            acse: AcseConfig::default(),
            initiate: InitiateRequest::default(),
            logger: LogHandle::noop(),
        }
    }

    /// Configuration for `host` on the default port.
    pub fn with_host(host: &str) -> Self {
        Self::new(format!("{}:{}", host, DEFAULT_PORT))
    }

    /// Set connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set transport parameters.
    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Set session parameters.
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Set presentation parameters.
    pub fn presentation(mut self, presentation: PresentationConfig) -> Self {
        self.presentation = presentation;
        self
    }

    /// Set association parameters.
    pub fn acse(mut self, acse: AcseConfig) -> Self {
        self.acse = acse;
        self
    }

    /// Set the MMS negotiation proposal.
    pub fn initiate(mut self, initiate: InitiateRequest) -> Self {
        self.initiate = initiate;
        self
    }

    /// Set the diagnostic logger for the client and its transport.
    pub fn logger(mut self, logger: LogHandle) -> Self {
        self.transport.logger = logger.clone();
        self.logger = logger;
        self
    }
}

/// Client state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Stream attached, no association yet
    Idle,
    /// Association established, services allowed
    Associated,
    /// Conclude accepted, only disconnect remains
    Concluded,
    /// Disconnected or aborted
    Closed,
}

/// IEC 61850 MMS client.
pub struct MmsClient<S = TcpStream> {
    config: ClientConfig,
    transport: TransportConnection<S>,
    state: ClientState,
    next_invoke_id: u32,
    mms_context_id: u8,
    negotiated: Option<InitiateResponse>,
    /// Invoke ids whose wait was cancelled before the answer arrived
    abandoned: Vec<u32>,
}

impl MmsClient<TcpStream> {
    /// Dial `config.address`, then run the transport handshake and the
    /// association.
    pub async fn connect(config: ClientConfig, ctx: &CallContext) -> Result<Self> {
        let address = config.address.clone();
        let connect_timeout = config.connect_timeout;
        let stream = ctx
            .run(async {
                timeout(connect_timeout, TcpStream::connect(&address))
                    .await
                    .map_err(|_| MmsError::ConnectionTimeout)?
                    .map_err(MmsError::Io)
            })
            .await?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true).ok();

        let mut client = Self::with_stream(stream, config);
        client.open(ctx).await?;
        Ok(client)
    }
}

impl<S> MmsClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Create a client over an already connected byte stream.
    pub fn with_stream(stream: S, config: ClientConfig) -> Self {
        let transport = TransportConnection::new(stream, config.transport.clone());
        Self {
            config,
            transport,
            state: ClientState::Idle,
            next_invoke_id: 1,
            mms_context_id: MMS_CONTEXT_ID,
            negotiated: None,
            abandoned: Vec::new(),
        }
    }

    /// Get the current client state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Negotiated MMS parameters, once associated.
    pub fn negotiated(&self) -> Option<&InitiateResponse> {
        self.negotiated.as_ref()
    }

    /// The underlying transport connection.
    pub fn transport(&self) -> &TransportConnection<S> {
        &self.transport
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Run the transport handshake and the association.
    pub async fn open(&mut self, ctx: &CallContext) -> Result<()> {
        let setup = ctx.child_with_timeout(self.config.connect_timeout);
        if self.transport.state() == TransportState::Idle {
            if let Err(e) = self.transport.connect(&setup).await {
                self.state = ClientState::Closed;
                return Err(e);
            }
        }
        self.associate(&setup).await
    }

    /// Establish the association over a connected transport.
    ///
    /// Sends session CONNECT wrapping presentation CP, ACSE AARQ and the
    /// MMS Initiate-Request, and decodes the matching accept chain.
    pub async fn associate(&mut self, ctx: &CallContext) -> Result<()> {
        if self.state != ClientState::Idle {
            return Err(MmsError::unexpected(
                Layer::Acse,
                format!("associate in state {:?}", self.state),
            ));
        }

        let initiate = self.config.initiate.to_bytes();
        let aarq = acse::build_request(&self.config.acse, &initiate);
        let cp = presentation::build_cp(&self.config.presentation, &aarq);
        let connect = session::build_connect(&self.config.session, &cp)?;

        let accepted = match self.round_trip(ctx, &connect).await {
            Ok(response) => self.accept_association(&response),
            Err(e) => Err(e),
        };
        // a half-finished association cannot be resumed
        if accepted.is_err() {
            self.state = ClientState::Closed;
        }
        accepted
    }

    fn accept_association(&mut self, response: &[u8]) -> Result<()> {
        let spdu = session::parse(response)?;
        match spdu.kind {
            SpduKind::Accept => {}
            SpduKind::Refuse => {
                return Err(MmsError::AssociationFailed(
                    format!("session refused, reason {:?}", spdu.reason).into(),
                ));
            }
            other => {
                return Err(MmsError::unexpected(
                    Layer::Session,
                    format!("{} in reply to CONNECT", other),
                ));
            }
        }

        let ppdu = presentation::parse(spdu.user_data)?;
        if ppdu.kind != PpduKind::ConnectAccept {
            return Err(MmsError::unexpected(
                Layer::Presentation,
                format!("{:?} in reply to CP", ppdu.kind),
            ));
        }
        if !ppdu.all_accepted() {
            return Err(MmsError::AssociationFailed(
                "presentation context rejected".into(),
            ));
        }
        self.mms_context_id = ppdu
            .context_id_for(AbstractSyntax::Mms)
            .unwrap_or(MMS_CONTEXT_ID);

        if let Ok(summary) = acse::parse_for_logging(ppdu.user_data) {
            self.config.logger.debug(format_args!("{}", summary));
        }
        let information = match acse::parse(ppdu.user_data)? {
            AcseIndication::Associate(information) => information,
            AcseIndication::AssociateFailed(failure) => {
                return Err(MmsError::AssociationFailed(failure.to_string().into()));
            }
            AcseIndication::Abort(source) => {
                return Err(MmsError::AssociationFailed(
                    format!("aborted by peer, source {:?}", source).into(),
                ));
            }
            AcseIndication::ReleaseRequest | AcseIndication::ReleaseResponse => {
                return Err(MmsError::unexpected(Layer::Acse, "release in reply to AARQ"));
            }
        };

        let negotiated = InitiateResponse::decode(information.data)?;
        self.config.logger.debug(format_args!(
            "MMS associated, max PDU {:?}, outstanding {}/{}",
            negotiated.max_pdu_size,
            negotiated.max_outstanding_calling,
            negotiated.max_outstanding_called
        ));
        self.negotiated = Some(negotiated);
        self.state = ClientState::Associated;
        Ok(())
    }

    /// Read one variable.
    pub async fn read(&mut self, ctx: &CallContext, name: &ObjectName) -> Result<AccessResult> {
        let mut results = self.read_many(ctx, std::slice::from_ref(name)).await?;
        results
            .pop()
            .ok_or_else(|| MmsError::malformed(Layer::Mms, "empty read response"))
    }

    /// Read several variables in one request. Results are in request order.
    pub async fn read_many(
        &mut self,
        ctx: &CallContext,
        names: &[ObjectName],
    ) -> Result<Vec<AccessResult>> {
        let invoke_id = self.next_invoke_id();
        let request = ReadRequest {
            invoke_id,
            variables: names.to_vec(),
        };
        let response = self
            .exchange(ctx, Some(invoke_id), &request.to_bytes(), ReadResponse::decode)
            .await?;
        check_invoke_id(invoke_id, response.invoke_id)?;
        if response.results.len() != names.len() {
            return Err(MmsError::unexpected(
                Layer::Mms,
                format!(
                    "{} results for {} variables",
                    response.results.len(),
                    names.len()
                ),
            ));
        }
        Ok(response.results)
    }

    /// Fetch the type description of a variable.
    pub async fn get_variable_access_attributes(
        &mut self,
        ctx: &CallContext,
        name: &ObjectName,
    ) -> Result<GetVariableAccessAttributesResponse> {
        let invoke_id = self.next_invoke_id();
        let request = GetVariableAccessAttributesRequest::new(invoke_id, name.clone());
        let response = self
            .exchange(
                ctx,
                Some(invoke_id),
                &request.to_bytes(),
                GetVariableAccessAttributesResponse::decode,
            )
            .await?;
        check_invoke_id(invoke_id, response.invoke_id)?;
        Ok(response)
    }

    /// End the MMS context. Only disconnect is allowed afterwards.
    pub async fn conclude(&mut self, ctx: &CallContext) -> Result<()> {
        let request = mms::build_conclude_request();
        self.exchange(ctx, None, &request, mms::parse_conclude_response)
            .await?;
        self.state = ClientState::Concluded;
        Ok(())
    }

    /// Conclude if still associated, then disconnect the transport.
    pub async fn close(&mut self, ctx: &CallContext) -> Result<()> {
        if self.state == ClientState::Associated {
            if let Err(e) = self.conclude(ctx).await {
                self.config
                    .logger
                    .debug(format_args!("conclude failed during close: {}", e));
            }
        }
        self.state = ClientState::Closed;
        if self.transport.state() == TransportState::Connected {
            self.transport.disconnect(ctx).await?;
        }
        Ok(())
    }

    /// Send one MMS PDU in the data phase and decode the answer.
    ///
    /// Every confirmed service goes through here: wrap in presentation
    /// user data and a session data unit, pump the transport until a whole
    /// message is reassembled, unwrap, then hand the MMS bytes to `decode`.
    ///
    /// Late answers to requests that timed out earlier are dropped by
    /// invoke id. A request without an invoke id, or one cancelled before
    /// it was fully sent, cannot be matched later and closes the client.
    async fn exchange<T, F>(
        &mut self,
        ctx: &CallContext,
        invoke_id: Option<u32>,
        pdu: &[u8],
        decode: F,
    ) -> Result<T>
    where
        F: FnOnce(&[u8]) -> Result<T>,
    {
        if self.state != ClientState::Associated {
            return Err(MmsError::NotAssociated);
        }
        let ctx = ctx.child_with_timeout(self.config.request_timeout);

        if let Some(&tag) = pdu.first() {
            self.config
                .logger
                .debug(format_args!("sending MMS {}", mms::pdu_name(tag)));
        }
        let ppdu = presentation::build_user_data(self.mms_context_id, pdu);
        let spdu = session::build_data(&ppdu);

        if let Err(e) = self.transport.send(&ctx, &spdu).await {
            self.fail(&e, None);
            return Err(e);
        }

        loop {
            let response = match self.transport.receive(&ctx).await {
                Ok(response) => response,
                Err(e) => {
                    self.fail(&e, invoke_id);
                    return Err(e);
                }
            };
            let message = self.unwrap_data(&response)?;
            if let Some(id) = mms::response_invoke_id(message) {
                if Some(id) != invoke_id && self.forget_abandoned(id) {
                    self.config
                        .logger
                        .debug(format_args!("dropping late reply to invoke id {}", id));
                    continue;
                }
            }
            return decode(message);
        }
    }

    /// Strip the session and presentation envelopes of a data-phase unit.
    fn unwrap_data<'a>(&mut self, response: &'a [u8]) -> Result<&'a [u8]> {
        let unit = session::parse(response)?;
        match unit.kind {
            SpduKind::Data => {}
            SpduKind::Abort | SpduKind::Disconnect | SpduKind::Finish => {
                self.state = ClientState::Closed;
                return Err(MmsError::unexpected(
                    Layer::Session,
                    format!("{} during request", unit.kind),
                ));
            }
            other => {
                return Err(MmsError::unexpected(
                    Layer::Session,
                    format!("{} during data phase", other),
                ));
            }
        }

        let ppdu = presentation::parse(unit.user_data)?;
        match ppdu.context_id {
            Some(id) if id == self.mms_context_id => Ok(ppdu.user_data),
            Some(ACSE_CONTEXT_ID) => {
                if let AcseIndication::Abort(source) = acse::parse(ppdu.user_data)? {
                    self.state = ClientState::Closed;
                    return Err(MmsError::AssociationFailed(
                        format!("aborted by peer, source {:?}", source).into(),
                    ));
                }
                Err(MmsError::unexpected(Layer::Acse, "ACSE PDU during request"))
            }
            other => Err(MmsError::unexpected(
                Layer::Presentation,
                format!("user data for context {:?}", other),
            )),
        }
    }

    async fn round_trip(&mut self, ctx: &CallContext, spdu: &[u8]) -> Result<Bytes> {
        self.transport.send(ctx, spdu).await?;
        self.transport.receive(ctx).await
    }

    /// Update the client state after a failed send or receive.
    ///
    /// `pending` is the invoke id still owed an answer when the wait was
    /// cancelled. It is remembered so its late reply can be dropped, up to
    /// the negotiated number of outstanding requests.
    fn fail(&mut self, error: &MmsError, pending: Option<u32>) {
        if error.is_cancellation() {
            match pending {
                Some(id) if self.abandoned.len() < self.max_abandoned() => {
                    self.abandoned.push(id);
                }
                _ => self.state = ClientState::Closed,
            }
        } else if error.is_connection_error()
            || self.transport.state() == TransportState::Closed
        {
            self.state = ClientState::Closed;
        }
    }

    fn max_abandoned(&self) -> usize {
        self.negotiated
            .as_ref()
            .map_or(1, |n| usize::from(n.max_outstanding_calling.max(1)))
    }

    fn forget_abandoned(&mut self, id: u32) -> bool {
        match self.abandoned.iter().position(|&a| a == id) {
            Some(index) => {
                self.abandoned.swap_remove(index);
                true
            }
            None => false,
        }
    }

    fn next_invoke_id(&mut self) -> u32 {
        let id = self.next_invoke_id;
        self.next_invoke_id = self.next_invoke_id.wrapping_add(1).max(1);
        id
    }
}

fn check_invoke_id(expected: u32, actual: u32) -> Result<()> {
    if expected != actual {
        return Err(MmsError::unexpected(
            Layer::Mms,
            format!("invoke id {} in reply to {}", actual, expected),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::TpktCodec;
    use crate::mms::{encode_confirmed_error, MMS_VERSION};
    use crate::types::{TypeSpecification, Variant};
    use bytes::{BufMut, BytesMut};
    use futures::{SinkExt, StreamExt};
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    /// Initiate-Request frame as captured from a reference exchange
    const INITIATE_FRAME: [u8; 187] = [
        0x03, 0x00, 0x00, 0xBB, 0x02, 0xF0, 0x80, 0x0D, 0xB2, 0x05, 0x06, 0x13, 0x01, 0x00,
        0x16, 0x01, 0x02, 0x14, 0x02, 0x00, 0x02, 0x33, 0x02, 0x00, 0x01, 0x34, 0x02, 0x00,
        0x01, 0xC1, 0x9C, 0x31, 0x81, 0x99, 0xA0, 0x03, 0x80, 0x01, 0x01, 0xA2, 0x81, 0x91,
        0x81, 0x04, 0x00, 0x00, 0x00, 0x01, 0x82, 0x04, 0x00, 0x00, 0x00, 0x01, 0xA4, 0x23,
        0x30, 0x0F, 0x02, 0x01, 0x01, 0x06, 0x04, 0x52, 0x01, 0x00, 0x01, 0x30, 0x04, 0x06,
        0x02, 0x51, 0x01, 0x30, 0x10, 0x02, 0x01, 0x03, 0x06, 0x05, 0x28, 0xCA, 0x22, 0x02,
        0x01, 0x30, 0x04, 0x06, 0x02, 0x51, 0x01, 0x61, 0x5E, 0x30, 0x5C, 0x02, 0x01, 0x01,
        0xA0, 0x57, 0x60, 0x55, 0xA1, 0x07, 0x06, 0x05, 0x28, 0xCA, 0x22, 0x02, 0x03, 0xA2,
        0x07, 0x06, 0x05, 0x29, 0x01, 0x87, 0x67, 0x01, 0xA3, 0x03, 0x02, 0x01, 0x0C, 0xA6,
        0x06, 0x06, 0x04, 0x29, 0x01, 0x87, 0x67, 0xA7, 0x03, 0x02, 0x01, 0x0C, 0xBE, 0x2F,
        0x28, 0x2D, 0x02, 0x01, 0x03, 0xA0, 0x28, 0xA8, 0x26, 0x80, 0x03, 0x00, 0xFD, 0xE8,
        0x81, 0x01, 0x05, 0x82, 0x01, 0x05, 0x83, 0x01, 0x0A, 0xA4, 0x16, 0x80, 0x01, 0x01,
        0x81, 0x03, 0x05, 0xF1, 0x00, 0x82, 0x0C, 0x03, 0xEE, 0x1C, 0x00, 0x00, 0x04, 0x08,
        0x00, 0x00, 0x79, 0xEF, 0x18,
    ];

    /// Read-Request frame for simpleIOGenericIO/GGIO1$MX$AnIn1$mag$f
    const READ_FRAME: [u8; 78] = [
        0x03, 0x00, 0x00, 0x4E, 0x02, 0xF0, 0x80, 0x01, 0x00, 0x01, 0x00, 0x61, 0x41, 0x30,
        0x3F, 0x02, 0x01, 0x03, 0xA0, 0x3A, 0xA0, 0x38, 0x02, 0x01, 0x01, 0xA4, 0x33, 0xA1,
        0x31, 0xA0, 0x2F, 0x30, 0x2D, 0xA0, 0x2B, 0xA1, 0x29, 0x1A, 0x11, b's', b'i', b'm',
        b'p', b'l', b'e', b'I', b'O', b'G', b'e', b'n', b'e', b'r', b'i', b'c', b'I', b'O',
        0x1A, 0x14, b'G', b'G', b'I', b'O', b'1', b'$', b'M', b'X', b'$', b'A', b'n', b'I',
        b'n', b'1', b'$', b'm', b'a', b'g', b'$', b'f',
    ];

    /// Connect-Confirm: dst-ref 1, src-ref 7
    const CONNECT_CONFIRM: [u8; 7] = [0x06, 0xD0, 0x00, 0x01, 0x00, 0x07, 0x00];

    /// Scripted server speaking raw TPDUs.
    struct Device {
        framed: Framed<DuplexStream, TpktCodec>,
    }

    impl Device {
        fn new(stream: DuplexStream) -> Self {
            Self {
                framed: Framed::new(stream, TpktCodec::new()),
            }
        }

        async fn accept(&mut self) {
            let request = self.framed.next().await.unwrap().unwrap();
            assert_eq!(request[1], 0xE0);
            self.framed
                .send(Bytes::from_static(&CONNECT_CONFIRM))
                .await
                .unwrap();
        }

        /// Next Data TPDU, COTP header included.
        async fn recv(&mut self) -> BytesMut {
            let tpdu = self.framed.next().await.unwrap().unwrap();
            assert_eq!(&tpdu[..3], &[0x02, 0xF0, 0x80]);
            tpdu
        }

        async fn send(&mut self, payload: &[u8]) {
            let mut tpdu = BytesMut::with_capacity(payload.len() + 3);
            tpdu.put_slice(&[0x02, 0xF0, 0x80]);
            tpdu.put_slice(payload);
            self.framed.send(tpdu.freeze()).await.unwrap();
        }

        async fn associate(&mut self, result: i64) {
            self.accept().await;
            let request = self.recv().await;
            assert_eq!(&request[..], &INITIATE_FRAME[4..]);
            self.send(&association_response(result)).await;
        }

        async fn answer(&mut self, mms: &[u8]) -> BytesMut {
            let request = self.recv().await;
            self.send(&data_unit(mms)).await;
            request
        }
    }

    fn association_response(result: i64) -> BytesMut {
        let initiate = InitiateResponse::accept(&InitiateRequest::default()).to_bytes();
        let aare = acse::build_response(result, &initiate);
        let cpa = presentation::build_cpa(&PresentationConfig::default(), &aare);
        session::build_accept(&SessionConfig::default(), &cpa).unwrap()
    }

    fn data_unit(mms: &[u8]) -> BytesMut {
        session::build_data(&presentation::build_user_data(MMS_CONTEXT_ID, mms))
    }

    fn client_pair() -> (MmsClient<DuplexStream>, Device) {
        let (client_io, device_io) = tokio::io::duplex(64 * 1024);
        let client = MmsClient::with_stream(client_io, ClientConfig::new("device:102"));
        (client, Device::new(device_io))
    }

    fn mag_f() -> ObjectName {
        ObjectName::domain("simpleIOGenericIO", "GGIO1$MX$AnIn1$mag$f")
    }

    #[test]
    fn test_client_config() {
        let config = ClientConfig::with_host("192.168.1.100")
            .connect_timeout(Duration::from_secs(5))
            .request_timeout(Duration::from_secs(2))
            .initiate(InitiateRequest::default().max_pdu_size(16_000));

        assert_eq!(config.address, "192.168.1.100:102");
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_secs(2));
        assert_eq!(config.initiate.max_pdu_size, 16_000);
        assert_eq!(config.initiate.version, MMS_VERSION);
    }

    #[test]
    fn test_client_initial_state() {
        let (client, _device) = client_pair();
        assert_eq!(client.state(), ClientState::Idle);
        assert!(client.negotiated().is_none());
        assert_eq!(client.transport().state(), TransportState::Idle);
    }

    #[tokio::test]
    async fn test_associate_sends_golden_frame() {
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(0).await;
            device
        });

        client.open(&CallContext::new()).await.unwrap();
        server.await.unwrap();

        assert_eq!(client.state(), ClientState::Associated);
        assert_eq!(client.transport().remote_ref(), 7);
        let negotiated = client.negotiated().unwrap();
        assert_eq!(negotiated.max_pdu_size, Some(65_000));
        assert_eq!(negotiated.max_outstanding_called, 5);
    }

    #[tokio::test]
    async fn test_read_sends_golden_frame() {
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(0).await;
            let response = ReadResponse {
                invoke_id: 1,
                results: vec![AccessResult::Success(Variant::Float32(230.5))],
            };
            let request = device.answer(&response.to_bytes()).await;
            assert_eq!(&request[..], &READ_FRAME[4..]);
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        let result = client.read(&ctx, &mag_f()).await.unwrap();
        server.await.unwrap();

        assert_eq!(result.value().map(Variant::as_f32), Some(230.5));
    }

    #[tokio::test]
    async fn test_invoke_ids_increment() {
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(0).await;
            for invoke_id in 1..=3 {
                let response = ReadResponse {
                    invoke_id,
                    results: vec![AccessResult::Success(Variant::Int32(invoke_id as i32))],
                };
                let request = device.answer(&response.to_bytes()).await;
                let decoded = ReadRequest::decode(&request[3 + 4 + 9..]).unwrap();
                assert_eq!(decoded.invoke_id, invoke_id);
            }
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        for expected in 1..=3 {
            let result = client.read(&ctx, &mag_f()).await.unwrap();
            assert_eq!(result, AccessResult::Success(Variant::Int32(expected)));
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_many() {
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(0).await;
            let response = ReadResponse {
                invoke_id: 1,
                results: vec![
                    AccessResult::Success(Variant::Int32(1)),
                    AccessResult::Failure(crate::types::DataAccessError::ObjectNonExistent),
                ],
            };
            device.answer(&response.to_bytes()).await;
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        let names = [mag_f(), ObjectName::domain("simpleIOGenericIO", "GGIO1$ST$Ind9$stVal")];
        let results = client.read_many(&ctx, &names).await.unwrap();
        server.await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results[0].is_success());
        assert!(!results[1].is_success());
    }

    #[tokio::test]
    async fn test_read_invoke_id_mismatch() {
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(0).await;
            let response = ReadResponse {
                invoke_id: 9,
                results: vec![AccessResult::Success(Variant::Int32(1))],
            };
            device.answer(&response.to_bytes()).await;
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        let err = client.read(&ctx, &mag_f()).await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, MmsError::UnexpectedPdu { layer: Layer::Mms, .. }));
    }

    #[tokio::test]
    async fn test_read_service_error() {
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(0).await;
            let mut error = BytesMut::new();
            encode_confirmed_error(1, 7, 3, &mut error);
            device.answer(&error).await;
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        let err = client.read(&ctx, &mag_f()).await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, MmsError::ServiceError { class: 7, code: 3 }));
        assert_eq!(client.state(), ClientState::Associated);
    }

    #[tokio::test]
    async fn test_get_variable_access_attributes() {
        let spec = TypeSpecification::FloatingPoint {
            format_width: 32,
            exponent_width: 8,
        };
        let expected = spec.clone();
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(0).await;
            let response = GetVariableAccessAttributesResponse {
                invoke_id: 1,
                deletable: false,
                type_spec: spec,
            };
            device.answer(&response.to_bytes()).await;
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        let response = client
            .get_variable_access_attributes(&ctx, &mag_f())
            .await
            .unwrap();
        server.await.unwrap();

        assert!(!response.deletable);
        assert_eq!(response.type_spec, expected);
    }

    #[tokio::test]
    async fn test_association_rejected() {
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(1).await;
        });

        let err = client.open(&CallContext::new()).await.unwrap_err();
        server.await.unwrap();

        assert!(matches!(err, MmsError::AssociationFailed(_)));
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn test_read_requires_association() {
        let (mut client, _device) = client_pair();
        let err = client
            .read(&CallContext::new(), &mag_f())
            .await
            .unwrap_err();
        assert!(matches!(err, MmsError::NotAssociated));
    }

    #[tokio::test]
    async fn test_conclude_and_close() {
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(0).await;
            let request = device.answer(&mms::build_conclude_response()).await;
            assert_eq!(&request[3 + 4 + 9..], &[0x8B, 0x00]);
            // disconnect request
            let dr = device.framed.next().await.unwrap().unwrap();
            assert_eq!(dr[1], 0x80);
            assert!(device.framed.next().await.is_none());
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        client.close(&ctx).await.unwrap();
        server.await.unwrap();

        assert_eq!(client.state(), ClientState::Closed);
        assert_eq!(client.transport().state(), TransportState::Closed);
    }

    #[tokio::test]
    async fn test_conclude_blocks_further_requests() {
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(0).await;
            device.answer(&mms::build_conclude_response()).await;
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        client.conclude(&ctx).await.unwrap();
        server.await.unwrap();

        assert_eq!(client.state(), ClientState::Concluded);
        assert!(matches!(
            client.read(&ctx, &mag_f()).await,
            Err(MmsError::NotAssociated)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_timeout() {
        let (client_io, device_io) = tokio::io::duplex(64 * 1024);
        let config = ClientConfig::new("device:102").request_timeout(Duration::from_secs(1));
        let mut client = MmsClient::with_stream(client_io, config);
        let mut device = Device::new(device_io);
        let server = tokio::spawn(async move {
            device.associate(0).await;
            // swallow the read and never answer
            let _request = device.recv().await;
            device
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        let err = client.read(&ctx, &mag_f()).await.unwrap_err();
        let _device = server.await.unwrap();

        assert!(matches!(err, MmsError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_is_dropped() {
        let (client_io, device_io) = tokio::io::duplex(64 * 1024);
        let config = ClientConfig::new("device:102").request_timeout(Duration::from_secs(1));
        let mut client = MmsClient::with_stream(client_io, config);
        let mut device = Device::new(device_io);
        let server = tokio::spawn(async move {
            device.associate(0).await;
            device.recv().await;
            tokio::time::sleep(Duration::from_millis(1500)).await;
            let late = ReadResponse {
                invoke_id: 1,
                results: vec![AccessResult::Success(Variant::Int32(1))],
            };
            device.send(&data_unit(&late.to_bytes())).await;
            let current = ReadResponse {
                invoke_id: 2,
                results: vec![AccessResult::Success(Variant::Int32(2))],
            };
            device.answer(&current.to_bytes()).await;
            device
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        let err = client.read(&ctx, &mag_f()).await.unwrap_err();
        assert!(matches!(err, MmsError::Timeout));
        assert_eq!(client.state(), ClientState::Associated);

        let result = client.read(&ctx, &mag_f()).await.unwrap();
        assert_eq!(result, AccessResult::Success(Variant::Int32(2)));
        assert_eq!(client.state(), ClientState::Associated);
        let _device = server.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_conclude_timeout_closes() {
        let (client_io, device_io) = tokio::io::duplex(64 * 1024);
        let config = ClientConfig::new("device:102").request_timeout(Duration::from_secs(1));
        let mut client = MmsClient::with_stream(client_io, config);
        let mut device = Device::new(device_io);
        let server = tokio::spawn(async move {
            device.associate(0).await;
            device.recv().await;
            device
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        let err = client.conclude(&ctx).await.unwrap_err();
        let _device = server.await.unwrap();

        assert!(matches!(err, MmsError::Timeout));
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn test_transport_refused_closes() {
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.framed.next().await.unwrap().unwrap();
            // disconnect request, reason 1
            let dr = [0x06, 0x80, 0x00, 0x01, 0x00, 0x07, 0x01];
            device.framed.send(Bytes::copy_from_slice(&dr)).await.unwrap();
            device
        });

        let err = client.open(&CallContext::new()).await.unwrap_err();
        let _device = server.await.unwrap();

        assert!(matches!(err, MmsError::UnexpectedPdu { layer: Layer::Transport, .. }));
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn test_session_abort_during_request() {
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(0).await;
            device.recv().await;
            device.send(&[session::SPDU_ABORT, 0x00]).await;
            device
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        let err = client.read(&ctx, &mag_f()).await.unwrap_err();
        let _device = server.await.unwrap();

        assert!(matches!(err, MmsError::UnexpectedPdu { layer: Layer::Session, .. }));
        assert_eq!(client.state(), ClientState::Closed);
    }

    #[tokio::test]
    async fn test_acse_abort_during_request() {
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(0).await;
            device.recv().await;
            // ABRT, abort-source acse-service-provider
            let abort = [0x64, 0x03, 0x80, 0x01, 0x01];
            let ppdu = presentation::build_user_data(ACSE_CONTEXT_ID, &abort);
            device.send(&session::build_data(&ppdu)).await;
            device
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        let err = client.read(&ctx, &mag_f()).await.unwrap_err();
        let _device = server.await.unwrap();

        assert!(matches!(err, MmsError::AssociationFailed(_)));
        assert_eq!(client.state(), ClientState::Closed);
        assert!(matches!(
            client.read(&ctx, &mag_f()).await,
            Err(MmsError::NotAssociated)
        ));
    }

    #[tokio::test]
    async fn test_fragmented_response() {
        let results: Vec<AccessResult> = (0..40)
            .map(|i| AccessResult::Success(Variant::Int32(i * 1000)))
            .collect();
        let expected = results.clone();
        let (mut client, mut device) = client_pair();
        let server = tokio::spawn(async move {
            device.associate(0).await;
            device.recv().await;
            let response = ReadResponse {
                invoke_id: 1,
                results,
            };
            let unit = data_unit(&response.to_bytes());
            let chunks: Vec<&[u8]> = unit.chunks(16).collect();
            for (index, chunk) in chunks.iter().enumerate() {
                let eot = if index + 1 == chunks.len() { 0x80 } else { 0x00 };
                let mut tpdu = BytesMut::new();
                tpdu.put_slice(&[0x02, 0xF0, eot]);
                tpdu.put_slice(chunk);
                device.framed.send(tpdu.freeze()).await.unwrap();
            }
        });

        let ctx = CallContext::new();
        client.open(&ctx).await.unwrap();
        let names = vec![mag_f(); 40];
        let read = client.read_many(&ctx, &names).await.unwrap();
        server.await.unwrap();

        assert_eq!(read, expected);
    }

    #[tokio::test]
    async fn test_cancelled_open() {
        let (mut client, _device) = client_pair();
        let ctx = CallContext::new();
        ctx.cancel();
        let err = client.open(&ctx).await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_connect_over_tcp() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut framed = Framed::new(socket, TpktCodec::new());
            framed.next().await.unwrap().unwrap();
            framed
                .send(Bytes::from_static(&CONNECT_CONFIRM))
                .await
                .unwrap();
            let request = framed.next().await.unwrap().unwrap();
            assert_eq!(&request[..], &INITIATE_FRAME[4..]);
            let mut tpdu = BytesMut::new();
            tpdu.put_slice(&[0x02, 0xF0, 0x80]);
            tpdu.put_slice(&association_response(0));
            framed.send(tpdu.freeze()).await.unwrap();
        });

        let config = ClientConfig::new(address.to_string());
        let client = MmsClient::connect(config, &CallContext::new()).await.unwrap();
        server.await.unwrap();

        assert_eq!(client.state(), ClientState::Associated);
    }
}
