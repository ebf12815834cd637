use std::future::Future;

use bytes::BytesMut;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::message::Message;
use crate::protocol::ProtocolVersion;
use crate::protocol::encode::encode;

/// Application callback invoked once per inbound data payload.
///
/// The handler receives the payload, the current application state by
/// value, and a [`Reply`] for writing messages back to the peer. The state
/// it returns is passed to the next invocation.
///
/// ```rust,ignore
/// struct Echo;
///
/// impl Handler<()> for Echo {
///     async fn handle(&mut self, payload: Vec<u8>, state: (), reply: &mut Reply<'_>) {
///         let _ = reply.binary(payload).await;
///         state
///     }
/// }
/// ```
pub trait Handler<S>: Send {
    /// Handle one payload and return the next state.
    fn handle(
        &mut self,
        payload: Vec<u8>,
        state: S,
        reply: &mut Reply<'_>,
    ) -> impl Future<Output = S> + Send;
}

/// Write side of a session, lent to the handler for one call.
///
/// Each [`send`](Reply::send) encodes the message for the connection's
/// protocol version, writes it and flushes. After a failed write every
/// further send fails with the same error, and the session terminates once
/// the handler returns.
pub struct Reply<'a> {
    io: &'a mut (dyn AsyncWrite + Unpin + Send),
    version: ProtocolVersion,
    buf: &'a mut BytesMut,
    failure: Option<Error>,
}

impl<'a> Reply<'a> {
    pub(crate) fn new(
        io: &'a mut (dyn AsyncWrite + Unpin + Send),
        version: ProtocolVersion,
        buf: &'a mut BytesMut,
    ) -> Self {
        Self {
            io,
            version,
            buf,
            failure: None,
        }
    }

    /// The connection's protocol version.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Encode and write one message.
    ///
    /// Hixie connections carry no message kind; text and binary are framed
    /// identically.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the write or flush fails, or the
    /// earlier error if a previous send already failed.
    pub async fn send(&mut self, message: impl Into<Message>) -> Result<()> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        let message = message.into();
        self.buf.clear();
        encode(&message, self.version, self.buf);

        let written = match self.io.write_all(&self.buf[..]).await {
            Ok(()) => self.io.flush().await,
            Err(err) => Err(err),
        };

        written.map_err(|err| {
            let err = Error::from(err);
            log::debug!("reply write failed: version={}, err={}", self.version, err);
            self.failure = Some(err.clone());
            err
        })
    }

    /// Send a text message.
    ///
    /// # Errors
    ///
    /// See [`send`](Reply::send).
    pub async fn text(&mut self, text: impl Into<String>) -> Result<()> {
        self.send(Message::Text(text.into())).await
    }

    /// Send a binary message.
    ///
    /// # Errors
    ///
    /// See [`send`](Reply::send).
    pub async fn binary(&mut self, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(Message::Binary(data.into())).await
    }

    pub(crate) fn into_failure(self) -> Option<Error> {
        self.failure
    }
}
