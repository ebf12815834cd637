//! Established connections: handshake state, the application handler and
//! the per-connection read loop.
//!
//! ## Session Lifecycle
//!
//! 1. **Read** - pull one chunk from the transport into the pending buffer
//! 2. **Decode** - extract frames for the negotiated protocol version,
//!    waiting a bounded time for the rest of a partial hybi frame
//! 3. **Dispatch** - call the handler once per payload, threading state
//! 4. Repeat until a close frame, a decode error or a transport error
//!
//! ## Example
//!
//! ```rust,ignore
//! use wsdual::session::{Handler, Reply, Session};
//!
//! struct Echo;
//!
//! impl Handler<u64> for Echo {
//!     async fn handle(&mut self, payload: Vec<u8>, seen: u64, reply: &mut Reply<'_>) -> u64 {
//!         let _ = reply.binary(payload).await;
//!         seen + 1
//!     }
//! }
//!
//! Session::new(stream, version, config).run(Echo, 0).await?;
//! ```

mod handler;
mod state;

pub use handler::{Handler, Reply};
pub use state::HandshakeState;

#[allow(clippy::module_inception)]
mod session;

pub use session::Session;
