//! Byte streams a WebSocket session can run over.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// A bidirectional stream carrying one upgraded connection.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {
    /// Whether the stream is encrypted. Decides `ws://` versus `wss://`
    /// in hixie location headers.
    fn is_secure(&self) -> bool {
        false
    }

    /// Drop the connection without a graceful shutdown.
    ///
    /// Sockets that support it are closed with a zero linger so the peer
    /// sees a reset instead of a FIN.
    fn fast_close(self) -> impl Future<Output = ()> + Send
    where
        Self: Sized;
}

impl Transport for TcpStream {
    async fn fast_close(self) {
        #[allow(deprecated)]
        let linger = self.set_linger(Some(Duration::ZERO));
        if let Err(err) = linger {
            log::trace!("failed to set zero linger: {}", err);
        }
        drop(self);
    }
}

impl Transport for DuplexStream {
    async fn fast_close(self) {
        drop(self);
    }
}
