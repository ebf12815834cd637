//! # wsdual - Server-side WebSocket framing for hybi and hixie-76 peers
//!
//! `wsdual` speaks both generations of the WebSocket wire protocol on the
//! server side: RFC 6455 ("hybi") binary framing and the legacy hixie-76
//! delimiter framing.
//!
//! ## Features
//!
//! - **Dual-version handshake** picking hybi or hixie-76 from the request's key headers
//! - **Partial frame reassembly** with a bounded wait per read
//! - **Pure frame codecs** usable without a runtime
//! - **TLS integration** for wss:// support
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use wsdual::{Config, Handler, Reply};
//!
//! struct Echo;
//!
//! impl Handler<()> for Echo {
//!     async fn handle(&mut self, payload: Vec<u8>, state: (), reply: &mut Reply<'_>) {
//!         let _ = reply.binary(payload).await;
//!         state
//!     }
//! }
//!
//! let (stream, _) = listener.accept().await?;
//! wsdual::serve(stream, Config::default(), Echo, ()).await?;
//! ```

pub mod config;
pub mod error;
pub mod message;
pub mod protocol;

#[cfg(feature = "async-tokio")]
pub mod server;
#[cfg(feature = "async-tokio")]
pub mod session;
#[cfg(feature = "async-tokio")]
pub mod transport;

pub use config::{Config, Limits};
pub use error::{Error, ErrorKind, Result};
pub use message::Message;
pub use protocol::{
    HandshakeRequest, HandshakeResponse, Headers, OpCode, ProtocolVersion, Scheme, WS_GUID,
    compute_accept_key,
};

#[cfg(feature = "async-tokio")]
pub use server::{HttpRequest, UpgradeRequest, negotiate, serve};
#[cfg(feature = "async-tokio")]
pub use session::{Handler, HandshakeState, Reply, Session};
#[cfg(feature = "async-tokio")]
pub use transport::Transport;

#[cfg(feature = "tls-rustls")]
pub mod tls;
