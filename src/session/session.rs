use bytes::{Buf, BytesMut};
use tokio::io::AsyncReadExt;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::frame::{self, contains_close};
use crate::protocol::{Frame, ProtocolVersion, hixie};
use crate::session::{Handler, Reply};
use crate::transport::Transport;

/// An established WebSocket connection and its read loop.
///
/// The session owns the transport and the pending buffer of bytes that do
/// not yet form complete frames. [`run`](Session::run) reads, decodes and
/// dispatches until the peer closes or an error occurs, then fast-closes
/// the transport.
///
/// ## Example
///
/// ```rust,ignore
/// use wsdual::{Config, ProtocolVersion, Session};
///
/// let session = Session::new(stream, ProtocolVersion::Hybi, Config::default());
/// session.run(Echo, ()).await?;
/// ```
pub struct Session<T> {
    io: T,
    version: ProtocolVersion,
    config: Config,
    pending: BytesMut,
    write_buf: BytesMut,
}

impl<T: Transport> Session<T> {
    /// Create a session over an upgraded transport.
    pub fn new(io: T, version: ProtocolVersion, config: Config) -> Self {
        Self::with_pending(io, version, config, BytesMut::new())
    }

    /// Create a session whose pending buffer starts with `pending`.
    ///
    /// Used when frame bytes arrived in the same read as the upgrade
    /// request.
    pub fn with_pending(io: T, version: ProtocolVersion, config: Config, pending: BytesMut) -> Self {
        let mut pending = pending;
        pending.reserve(config.read_buffer_size);
        Self {
            io,
            version,
            write_buf: BytesMut::with_capacity(config.write_buffer_size),
            config,
            pending,
        }
    }

    /// The protocol version negotiated for this connection.
    #[must_use]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Run the read/decode/dispatch loop to completion.
    ///
    /// `state` is threaded through the handler: each call receives the
    /// state returned by the previous one.
    ///
    /// Returns `Ok(())` when the peer sends a close frame. The transport is
    /// fast-closed on every exit path.
    ///
    /// A close frame only takes effect once its whole batch is decoded. If
    /// the same read also carries the start of a following hybi frame, the
    /// session keeps waiting for that frame and ends with
    /// `Error::ReassemblyTimeout` if it never completes.
    ///
    /// # Errors
    ///
    /// - `Error::TransportClosed` if the peer hung up without a close frame
    /// - `Error::DecodeFailure` / `Error::FrameTooLarge` on malformed input
    /// - `Error::ReassemblyTimeout` if a partial hybi frame stalls
    /// - `Error::Io` if a read or a reply write fails
    pub async fn run<S, H>(mut self, mut handler: H, state: S) -> Result<()>
    where
        S: Send,
        H: Handler<S>,
    {
        log::debug!("session started: version={}", self.version);

        let result = self.drive(&mut handler, state).await;
        match &result {
            Ok(()) => log::debug!("session closed by peer: version={}", self.version),
            Err(err) => log::debug!("session terminated: version={}, err={}", self.version, err),
        }

        self.io.fast_close().await;
        result
    }

    async fn drive<S, H>(&mut self, handler: &mut H, mut state: S) -> Result<()>
    where
        S: Send,
        H: Handler<S>,
    {
        loop {
            if self.pending.is_empty() {
                self.read_once().await?;
            }

            let frames = self.decode_pending().await?;
            if contains_close(&frames) {
                return Ok(());
            }

            for frame in frames {
                let mut reply = Reply::new(&mut self.io, self.version, &mut self.write_buf);
                state = handler.handle(frame.into_payload(), state, &mut reply).await;
                if let Some(err) = reply.into_failure() {
                    return Err(err);
                }
            }
        }
    }

    /// Decode the pending buffer into a batch of frames, consuming it.
    ///
    /// A truncated hybi buffer waits for more bytes, each wait bounded by
    /// the reassembly timeout. Complete frames ahead of the truncated one
    /// are taken off the buffer so a retry only decodes the new tail.
    async fn decode_pending(&mut self) -> Result<Vec<Frame>> {
        if !self.version.resumes_partial_frames() {
            let frames = hixie::decode(&self.pending)
                .inspect_err(|err| log::warn!("hixie decode failed: err={}", err))?;
            self.pending.clear();
            return Ok(frames);
        }

        let mut frames = Vec::new();
        loop {
            let progress = frame::decode_available(&self.pending, &self.config.limits)
                .inspect_err(|err| log::warn!("hybi decode failed: err={}", err))?;
            self.pending.advance(progress.consumed);
            frames.extend(progress.frames);

            let Some(needed) = progress.needed else {
                return Ok(frames);
            };
            log::trace!(
                "partial hybi frame: decoded={}, buffered={}, needed={:?}",
                frames.len(),
                self.pending.len(),
                needed
            );
            let timeout = self.config.reassembly_timeout;
            tokio::time::timeout(timeout, self.read_once())
                .await
                .map_err(|_| {
                    log::warn!("partial hybi frame stalled: timeout={:?}", timeout);
                    Error::ReassemblyTimeout(timeout)
                })??;
        }
    }

    /// Pull one chunk from the transport into the pending buffer.
    async fn read_once(&mut self) -> Result<usize> {
        self.pending.reserve(self.config.read_buffer_size.max(1));
        let n = self.io.read_buf(&mut self.pending).await?;
        if n == 0 {
            return Err(Error::TransportClosed);
        }
        log::trace!("read {} bytes: buffered={}", n, self.pending.len());
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::tests::client_frame;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;
    use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf, duplex};

    const KEY: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    /// Echoes each payload back as binary, prefixed with a running count.
    struct CountingEcho;

    impl Handler<u8> for CountingEcho {
        async fn handle(&mut self, payload: Vec<u8>, count: u8, reply: &mut Reply<'_>) -> u8 {
            let count = count + 1;
            let mut out = vec![count];
            out.extend_from_slice(&payload);
            let _ = reply.binary(out).await;
            count
        }
    }

    /// Records nothing and never replies.
    struct Silent;

    impl Handler<()> for Silent {
        async fn handle(&mut self, _payload: Vec<u8>, state: (), _reply: &mut Reply<'_>) {
            state
        }
    }

    fn spawn_session(
        version: ProtocolVersion,
        config: Config,
    ) -> (DuplexStream, tokio::task::JoinHandle<Result<()>>) {
        let (server, client) = duplex(1 << 20);
        let handle = tokio::spawn(Session::new(server, version, config).run(CountingEcho, 0u8));
        (client, handle)
    }

    async fn read_exact(client: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        client.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_hybi_echo_threads_state() {
        let (mut client, handle) = spawn_session(ProtocolVersion::Hybi, Config::default());

        client.write_all(&client_frame(0x1, b"Hello", KEY)).await.unwrap();
        assert_eq!(read_exact(&mut client, 8).await, [0x82, 6, 1, b'H', b'e', b'l', b'l', b'o']);

        client.write_all(&client_frame(0x2, b"x", KEY)).await.unwrap();
        assert_eq!(read_exact(&mut client, 4).await, [0x82, 2, 2, b'x']);

        client.write_all(&client_frame(0x8, b"", KEY)).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_two_frames_in_one_read_dispatch_in_order() {
        let (mut client, handle) = spawn_session(ProtocolVersion::Hybi, Config::default());

        let mut data = client_frame(0x1, b"one", KEY);
        data.extend_from_slice(&client_frame(0x1, b"two", KEY));
        client.write_all(&data).await.unwrap();

        assert_eq!(read_exact(&mut client, 6).await, [0x82, 4, 1, b'o', b'n', b'e']);
        assert_eq!(read_exact(&mut client, 6).await, [0x82, 4, 2, b't', b'w', b'o']);

        drop(client);
        assert_eq!(handle.await.unwrap(), Err(Error::TransportClosed));
    }

    #[tokio::test]
    async fn test_close_anywhere_in_batch_dispatches_nothing() {
        let (mut client, handle) = spawn_session(ProtocolVersion::Hybi, Config::default());

        let mut data = client_frame(0x1, b"one", KEY);
        data.extend_from_slice(&client_frame(0x8, b"", KEY));
        data.extend_from_slice(&client_frame(0x1, b"two", KEY));
        client.write_all(&data).await.unwrap();

        assert!(handle.await.unwrap().is_ok());
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_partial_frame_reassembled_across_reads() {
        let (mut client, handle) = spawn_session(ProtocolVersion::Hybi, Config::default());

        let wire = client_frame(0x2, &[7u8; 300], KEY);
        client.write_all(&wire[..3]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.write_all(&wire[3..100]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.write_all(&wire[100..]).await.unwrap();

        let echoed = read_exact(&mut client, 4 + 301).await;
        assert_eq!(&echoed[..4], &[0x82, 126, 0x01, 0x2d]);
        assert_eq!(echoed[4], 1);
        assert!(echoed[5..].iter().all(|&b| b == 7));

        client.write_all(&client_frame(0x8, b"", KEY)).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_partial_frame_times_out() {
        let (mut client, handle) = spawn_session(ProtocolVersion::Hybi, Config::default());

        let wire = client_frame(0x1, b"Hello", KEY);
        client.write_all(&wire[..4]).await.unwrap();

        let result = handle.await.unwrap();
        assert_eq!(
            result,
            Err(Error::ReassemblyTimeout(Duration::from_millis(5000)))
        );

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_reassembly_wait_is_bounded_separately() {
        let config = Config::default().with_reassembly_timeout(Duration::from_millis(100));
        let (mut client, handle) = spawn_session(ProtocolVersion::Hybi, config);

        let wire = client_frame(0x1, b"slow", KEY);
        for byte in &wire {
            client.write_all(std::slice::from_ref(byte)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
        }

        assert_eq!(read_exact(&mut client, 7).await, [0x82, 5, 1, b's', b'l', b'o', b'w']);
        drop(client);
        assert_eq!(handle.await.unwrap(), Err(Error::TransportClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_followed_by_partial_frame_waits_for_it() {
        let (mut client, handle) = spawn_session(ProtocolVersion::Hybi, Config::default());

        let mut data = client_frame(0x8, b"", KEY);
        data.extend_from_slice(&client_frame(0x1, b"late", KEY)[..3]);
        client.write_all(&data).await.unwrap();

        assert_eq!(
            handle.await.unwrap(),
            Err(Error::ReassemblyTimeout(Duration::from_millis(5000)))
        );
    }

    #[tokio::test]
    async fn test_frames_ahead_of_partial_tail_dispatch_once_tail_completes() {
        let (mut client, handle) = spawn_session(ProtocolVersion::Hybi, Config::default());

        let mut data = Vec::new();
        for payload in [b"a", b"b", b"c"] {
            data.extend_from_slice(&client_frame(0x1, payload, KEY));
        }
        let last = client_frame(0x2, &[5u8; 200], KEY);
        data.extend_from_slice(&last[..20]);
        client.write_all(&data).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.write_all(&last[20..120]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.write_all(&last[120..]).await.unwrap();

        assert_eq!(read_exact(&mut client, 4).await, [0x82, 2, 1, b'a']);
        assert_eq!(read_exact(&mut client, 4).await, [0x82, 2, 2, b'b']);
        assert_eq!(read_exact(&mut client, 4).await, [0x82, 2, 3, b'c']);
        let echoed = read_exact(&mut client, 4 + 201).await;
        assert_eq!(&echoed[..5], &[0x82, 126, 0x00, 0xc9, 4]);
        assert!(echoed[5..].iter().all(|&b| b == 5));

        client.write_all(&client_frame(0x8, b"", KEY)).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_frame_over_limit_is_decode_failure() {
        let config = Config::default().with_limits(crate::config::Limits::new(4, 8192));
        let (mut client, handle) = spawn_session(ProtocolVersion::Hybi, config);

        client.write_all(&client_frame(0x2, b"too long", KEY)).await.unwrap();
        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Decode);
    }

    #[tokio::test]
    async fn test_hixie_echo_and_close() {
        let (mut client, handle) = spawn_session(ProtocolVersion::Hixie, Config::default());

        client.write_all(b"\x00abc\xff").await.unwrap();
        assert_eq!(read_exact(&mut client, 6).await, b"\x00\x01abc\xff");

        client.write_all(b"\xff\x00").await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_hixie_missing_terminator_is_decode_failure() {
        let (mut client, handle) = spawn_session(ProtocolVersion::Hixie, Config::default());

        client.write_all(b"\x00abc").await.unwrap();
        assert!(matches!(handle.await.unwrap(), Err(Error::DecodeFailure(_))));
    }

    #[tokio::test]
    async fn test_pending_bytes_from_handshake_are_decoded_first() {
        let (server, mut client) = duplex(4096);
        let pending = BytesMut::from(&client_frame(0x1, b"early", KEY)[..]);
        let session = Session::with_pending(server, ProtocolVersion::Hybi, Config::default(), pending);
        assert_eq!(session.version(), ProtocolVersion::Hybi);
        let handle = tokio::spawn(session.run(CountingEcho, 0u8));

        assert_eq!(
            read_exact(&mut client, 8).await,
            [0x82, 6, 1, b'e', b'a', b'r', b'l', b'y']
        );
        client.write_all(&client_frame(0x8, b"", KEY)).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    /// Serves preloaded bytes and fails every write.
    struct ReadOnlyStream {
        data: std::io::Cursor<Vec<u8>>,
    }

    impl AsyncRead for ReadOnlyStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            let pos = self.data.position() as usize;
            let data = self.data.get_ref();
            if pos >= data.len() {
                return Poll::Ready(Ok(()));
            }
            let remaining = &data[pos..];
            let to_copy = std::cmp::min(remaining.len(), buf.remaining());
            buf.put_slice(&remaining[..to_copy]);
            self.data.set_position((pos + to_copy) as u64);
            Poll::Ready(Ok(()))
        }
    }

    impl AsyncWrite for ReadOnlyStream {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    impl Transport for ReadOnlyStream {
        async fn fast_close(self) {}
    }

    #[tokio::test]
    async fn test_failed_reply_terminates_session() {
        let mut data = client_frame(0x1, b"hi", KEY);
        data.extend_from_slice(&client_frame(0x1, b"again", KEY));
        let stream = ReadOnlyStream {
            data: std::io::Cursor::new(data),
        };

        let result = Session::new(stream, ProtocolVersion::Hybi, Config::default())
            .run(CountingEcho, 0u8)
            .await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_control_opcodes_pass_through() {
        let (server, mut client) = duplex(4096);
        let session = Session::new(server, ProtocolVersion::Hybi, Config::default());
        let handle = tokio::spawn(session.run(Silent, ()));

        client.write_all(&client_frame(0x9, b"ping", KEY)).await.unwrap();
        client.write_all(&client_frame(0xA, b"pong", KEY)).await.unwrap();
        client.write_all(&client_frame(0x8, b"", KEY)).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }
}
