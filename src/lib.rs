//! # voltage_iec61850
//!
//! IEC 61850 MMS client stack for Rust.
//!
//! This crate implements the OSI stack an IEC 61850 client speaks to a
//! substation device: ISO-on-TCP framing, the connection-oriented transport
//! protocol, the session and presentation kernels, ACSE association and the
//! MMS services used to read data attributes.
//!
//! ## Features
//!
//! - **Bit-exact encoders**: every layer builds its PDUs with BER and the
//!   fixed layouts devices expect
//! - **Tolerant decoders**: bounds-checked walks that return errors instead
//!   of panicking on malformed input
//! - **Cancellable I/O**: every wait runs under a [`CallContext`] with a
//!   cancellation token and an optional deadline
//! - **Type Safe**: typed object names, variable values, access results and
//!   type descriptions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voltage_iec61850::{CallContext, ClientConfig, MmsClient, ObjectName};
//!
//! #[tokio::main]
//! async fn main() -> voltage_iec61850::Result<()> {
//!     let ctx = CallContext::new();
//!     let config = ClientConfig::new("192.168.1.100:102");
//!
//!     // Transport handshake + association
//!     let mut client = MmsClient::connect(config, &ctx).await?;
//!
//!     let name = ObjectName::domain("simpleIOGenericIO", "GGIO1$MX$AnIn1$mag$f");
//!     let value = client.read(&ctx, &name).await?;
//!     println!("{} = {}", name, value);
//!
//!     client.close(&ctx).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol Overview
//!
//! ```text
//! +-----------------------------------------------+
//! | MMS          confirmed request / response     |
//! | ACSE         AARQ / AARE (association only)   |
//! | Presentation CP / CPA, fully-encoded data     |
//! | Session      CONNECT / ACCEPT, GIVE TOKENS+DT |
//! | COTP         CR / CC / DT / DR (class 0)      |
//! | TPKT         03 00 len-hi len-lo              |
//! | TCP          port 102                         |
//! +-----------------------------------------------+
//! ```
//!
//! Each layer module exposes pure `build_*` and `parse` functions over byte
//! slices; [`TransportConnection`] and [`MmsClient`] own the socket.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod acse;
pub mod ber;
pub mod client;
pub mod codec;
pub mod context;
pub mod cotp;
pub mod error;
pub mod logger;
pub mod mms;
pub mod presentation;
pub mod session;
pub mod transport;
pub mod types;

// Re-export main types
pub use client::{ClientConfig, ClientState, MmsClient};
pub use codec::{TpktCodec, TpktHeader};
pub use context::CallContext;
pub use error::{Layer, MmsError, Result};
#[cfg(feature = "tracing-support")]
pub use logger::TracingLogger;
pub use logger::{LogHandle, Logger, NoopLogger};
pub use mms::{
    GetVariableAccessAttributesRequest, GetVariableAccessAttributesResponse, InitiateRequest,
    InitiateResponse, ReadRequest, ReadResponse,
};
pub use transport::{TransportConfig, TransportConnection, TransportState};
pub use types::*;
