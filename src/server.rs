//! Server-side upgrade negotiation and the raw-socket entry point.
//!
//! Hosts that already parse HTTP hand their request object to
//! [`negotiate`] through the [`UpgradeRequest`] trait. Hosts that accept
//! raw sockets call [`serve`], which reads the request head itself.

use std::future::Future;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::protocol::handshake::{HIXIE_BODY_LEN, ORIGIN, validate_origin};
use crate::protocol::{
    HandshakeRequest, HandshakeResponse, Headers, ProtocolVersion, Scheme, select_version,
};
use crate::session::{Handler, HandshakeState, Session};
use crate::transport::Transport;

const HEAD_TERMINATOR: &[u8; 4] = b"\r\n\r\n";

/// An HTTP upgrade request as seen by the negotiator.
pub trait UpgradeRequest: Send {
    /// All request headers.
    fn headers(&self) -> &Headers;

    /// Look up one header, ignoring ASCII case.
    fn header(&self, name: &str) -> Option<&str> {
        self.headers().get(name)
    }

    /// Scheme the request arrived on.
    fn scheme(&self) -> Scheme;

    /// Request path, including any query string.
    fn path(&self) -> &str;

    /// Read exactly `len` bytes of request body.
    fn read_body(&mut self, len: usize) -> impl Future<Output = Result<Vec<u8>>> + Send;

    /// Send the handshake response, leaving the connection open.
    fn respond(&mut self, response: &HandshakeResponse) -> impl Future<Output = Result<()>> + Send;
}

/// An upgrade request read directly off a transport.
///
/// Every read and write it makes shares one deadline, set
/// `config.handshake_timeout` after [`read`](HttpRequest::read) starts.
pub struct HttpRequest<T> {
    io: T,
    request: HandshakeRequest,
    buffered: BytesMut,
    deadline: Instant,
    timeout: Duration,
}

impl<T: Transport> HttpRequest<T> {
    /// Read a request head from `io`.
    ///
    /// Bytes that arrive after the head stay buffered: they are served to
    /// [`read_body`](UpgradeRequest::read_body) first and handed to the
    /// session by [`into_parts`](HttpRequest::into_parts).
    ///
    /// # Errors
    ///
    /// - `Error::HandshakeTooLarge` if no complete head arrives within
    ///   `config.limits.max_handshake_size` bytes
    /// - `Error::HandshakeFailure` if the head is malformed
    /// - `Error::TransportClosed` if the peer hangs up first
    /// - `Error::HandshakeTimeout` if the head does not arrive within
    ///   `config.handshake_timeout`
    ///
    /// The transport is fast-closed on error.
    pub async fn read(mut io: T, config: &Config) -> Result<Self> {
        let timeout = config.handshake_timeout;
        let deadline = Instant::now() + timeout;

        match within_deadline(deadline, timeout, read_head(&mut io, config)).await {
            Ok((request, buffered)) => Ok(Self {
                io,
                request,
                buffered,
                deadline,
                timeout,
            }),
            Err(err) => {
                log::warn!("upgrade request rejected: err={}", err);
                io.fast_close().await;
                Err(err)
            }
        }
    }

    /// The parsed request head.
    #[must_use]
    pub fn request(&self) -> &HandshakeRequest {
        &self.request
    }

    /// Split into the transport and any bytes read past the request.
    #[must_use]
    pub fn into_parts(self) -> (T, BytesMut) {
        (self.io, self.buffered)
    }

    /// Abandon the request and drop the connection.
    pub async fn fast_close(self) {
        self.io.fast_close().await;
    }
}

async fn within_deadline<F, R>(deadline: Instant, timeout: Duration, fut: F) -> Result<R>
where
    F: Future<Output = Result<R>>,
{
    tokio::time::timeout_at(deadline, fut).await.map_err(|_| {
        log::warn!("handshake stalled: timeout={:?}", timeout);
        Error::HandshakeTimeout(timeout)
    })?
}

async fn read_head<T: Transport>(io: &mut T, config: &Config) -> Result<(HandshakeRequest, BytesMut)> {
    let max = config.limits.max_handshake_size;
    let mut buf = BytesMut::with_capacity(config.read_buffer_size.min(max));
    let mut searched = 0;

    loop {
        if let Some(pos) = buf[searched..]
            .windows(HEAD_TERMINATOR.len())
            .position(|w| w == HEAD_TERMINATOR)
        {
            let head = buf.split_to(searched + pos + HEAD_TERMINATOR.len());
            let request = HandshakeRequest::parse_with_limit(&head, max)?;
            return Ok((request, buf));
        }
        searched = buf.len().saturating_sub(HEAD_TERMINATOR.len() - 1);

        config.limits.check_handshake_size(buf.len())?;
        buf.reserve(1024);
        if io.read_buf(&mut buf).await? == 0 {
            return Err(Error::TransportClosed);
        }
    }
}

impl<T: Transport> UpgradeRequest for HttpRequest<T> {
    fn headers(&self) -> &Headers {
        &self.request.headers
    }

    fn scheme(&self) -> Scheme {
        Scheme::from_secure(self.io.is_secure())
    }

    fn path(&self) -> &str {
        &self.request.path
    }

    async fn read_body(&mut self, len: usize) -> Result<Vec<u8>> {
        let (io, buffered) = (&mut self.io, &mut self.buffered);
        within_deadline(self.deadline, self.timeout, async move {
            while buffered.len() < len {
                buffered.reserve(len - buffered.len());
                if io.read_buf(&mut *buffered).await? == 0 {
                    return Err(Error::TransportClosed);
                }
            }
            Ok(buffered.split_to(len).to_vec())
        })
        .await
    }

    async fn respond(&mut self, response: &HandshakeResponse) -> Result<()> {
        let mut out = Vec::with_capacity(256);
        response.write(&mut out)?;

        let io = &mut self.io;
        within_deadline(self.deadline, self.timeout, async move {
            io.write_all(&out).await?;
            io.flush().await?;
            Ok(())
        })
        .await
    }
}

/// Negotiate the upgrade and send the response.
///
/// Selects the protocol version from the request's key headers, computes
/// the matching response (reading the 8-byte challenge body for hixie) and
/// writes it through [`UpgradeRequest::respond`].
///
/// Returns the state the handshake reached, which is
/// [`HandshakeState::Established`] on success; the caller starts a
/// [`Session`] from its version. An error leaves the handshake `Failed`
/// and the caller fast-closes the connection without sending anything.
///
/// # Errors
///
/// - `Error::OriginNotAllowed` if an allow-list is configured and the
///   Origin header is not on it
/// - `Error::HandshakeFailure` if no key set is present, a hixie key cannot
///   be reduced, or hixie's Host header is missing
/// - `Error::InvalidHeaderValue` if an echoed header would inject CR/LF
/// - transport errors from reading the body or writing the response
pub async fn negotiate<R: UpgradeRequest>(request: &mut R, config: &Config) -> Result<HandshakeState> {
    let mut state = HandshakeState::Idle;
    match negotiate_inner(request, config, &mut state).await {
        Ok(()) => Ok(state),
        Err(err) => {
            let reached = state;
            state = state.fail();
            log::warn!(
                "handshake failed: path={}, reached={}, state={}, err={}",
                request.path(),
                reached,
                state,
                err
            );
            Err(err)
        }
    }
}

async fn negotiate_inner<R: UpgradeRequest>(
    request: &mut R,
    config: &Config,
    state: &mut HandshakeState,
) -> Result<()> {
    if let Some(allowed) = &config.allowed_origins {
        validate_origin(request.header(ORIGIN), allowed)?;
    }

    let version = select_version(request.headers())?;
    *state = state.select(version);
    log::trace!("handshake: path={}, state={}", request.path(), state);

    let response = match version {
        ProtocolVersion::Hybi => HandshakeResponse::hybi(request.headers())?,
        ProtocolVersion::Hixie => {
            let body: [u8; HIXIE_BODY_LEN] = request
                .read_body(HIXIE_BODY_LEN)
                .await?
                .try_into()
                .map_err(|_| Error::handshake("short hixie challenge body"))?;
            HandshakeResponse::hixie(request.headers(), request.scheme(), request.path(), &body)?
        }
    };

    request.respond(&response).await?;

    *state = state.establish();
    log::debug!("handshake complete: path={}, state={}", request.path(), state);
    Ok(())
}

/// The version a session may start with, if `state` allows one.
fn session_version(state: HandshakeState) -> Result<ProtocolVersion> {
    match state.version() {
        Some(version) if state.is_established() => Ok(version),
        _ => Err(Error::handshake(format!("cannot start session from state {}", state))),
    }
}

/// Serve one raw connection: read the upgrade request, negotiate, and run
/// the session loop until it terminates.
///
/// The transport is fast-closed on every exit path.
///
/// ```rust,ignore
/// let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
/// loop {
///     let (stream, _) = listener.accept().await?;
///     tokio::spawn(wsdual::serve(stream, Config::default(), Echo, ()));
/// }
/// ```
///
/// The whole handshake is bounded by `config.handshake_timeout`; the
/// session loop after it has no overall bound.
///
/// # Errors
///
/// Any handshake error from [`HttpRequest::read`] or [`negotiate`], then
/// any session error from [`Session::run`].
pub async fn serve<T, S, H>(io: T, config: Config, handler: H, state: S) -> Result<()>
where
    T: Transport,
    S: Send,
    H: Handler<S>,
{
    let mut request = HttpRequest::read(io, &config).await?;

    match negotiate(&mut request, &config).await.and_then(session_version) {
        Ok(version) => {
            let (io, pending) = request.into_parts();
            Session::with_pending(io, version, config, pending)
                .run(handler, state)
                .await
        }
        Err(err) => {
            request.fast_close().await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    struct MockRequest {
        headers: Headers,
        scheme: Scheme,
        path: String,
        body: Vec<u8>,
        responses: Vec<HandshakeResponse>,
    }

    impl MockRequest {
        fn new(headers: &[(&str, &str)]) -> Self {
            Self {
                headers: headers.iter().copied().collect(),
                scheme: Scheme::Ws,
                path: "/demo".to_string(),
                body: Vec::new(),
                responses: Vec::new(),
            }
        }
    }

    impl UpgradeRequest for MockRequest {
        fn headers(&self) -> &Headers {
            &self.headers
        }

        fn scheme(&self) -> Scheme {
            self.scheme
        }

        fn path(&self) -> &str {
            &self.path
        }

        async fn read_body(&mut self, len: usize) -> Result<Vec<u8>> {
            if self.body.len() < len {
                return Err(Error::TransportClosed);
            }
            Ok(self.body.drain(..len).collect())
        }

        async fn respond(&mut self, response: &HandshakeResponse) -> Result<()> {
            self.responses.push(response.clone());
            Ok(())
        }
    }

    fn hixie_request() -> MockRequest {
        let mut req = MockRequest::new(&[
            ("Host", "example.com"),
            ("Origin", "http://example.com"),
            ("Sec-WebSocket-Key1", "4 @1  46546xW%0l 1 5"),
            ("Sec-WebSocket-Key2", "12998 5 Y3 1  .P00"),
        ]);
        req.body = b"^n:ds[4U".to_vec();
        req
    }

    #[tokio::test]
    async fn test_negotiate_hybi() {
        let mut req = MockRequest::new(&[
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("Sec-WebSocket-Protocol", "chat"),
        ]);

        let state = negotiate(&mut req, &Config::default()).await.unwrap();
        assert_eq!(state, HandshakeState::Established(ProtocolVersion::Hybi));
        assert_eq!(req.responses.len(), 1);
        assert_eq!(
            req.responses[0].header("Sec-WebSocket-Accept"),
            Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
        );
        assert_eq!(req.responses[0].header("Sec-WebSocket-Protocol"), Some("chat"));
    }

    #[tokio::test]
    async fn test_negotiate_hixie_reads_body() {
        let mut req = hixie_request();
        req.scheme = Scheme::Wss;

        let state = negotiate(&mut req, &Config::default()).await.unwrap();
        assert_eq!(state, HandshakeState::Established(ProtocolVersion::Hixie));
        assert!(req.body.is_empty());

        let resp = &req.responses[0];
        assert_eq!(resp.body, b"8jKS'y:G*Co,Wxa-");
        assert_eq!(
            resp.header("Sec-WebSocket-Location"),
            Some("wss://example.com/demo")
        );
    }

    #[tokio::test]
    async fn test_negotiate_without_keys_sends_nothing() {
        let mut req = MockRequest::new(&[("Host", "example.com")]);
        let err = negotiate(&mut req, &Config::default()).await.unwrap_err();
        assert!(matches!(err, Error::HandshakeFailure(_)));
        assert!(req.responses.is_empty());
    }

    #[tokio::test]
    async fn test_negotiate_hixie_short_body() {
        let mut req = hixie_request();
        req.body.truncate(3);
        assert!(negotiate(&mut req, &Config::default()).await.is_err());
        assert!(req.responses.is_empty());
    }

    #[tokio::test]
    async fn test_negotiate_origin_allow_list() {
        let config = Config::default().with_allowed_origins(vec!["http://good.example".to_string()]);

        let mut req = hixie_request();
        let err = negotiate(&mut req, &config).await.unwrap_err();
        assert!(matches!(err, Error::OriginNotAllowed { .. }));
        assert!(req.responses.is_empty());

        let config = Config::default().with_allowed_origins(vec!["http://example.com".to_string()]);
        let mut req = hixie_request();
        assert!(negotiate(&mut req, &config).await.is_ok());
    }

    #[test]
    fn test_session_starts_only_when_established() {
        assert_eq!(
            session_version(HandshakeState::Established(ProtocolVersion::Hixie)),
            Ok(ProtocolVersion::Hixie)
        );
        for state in [
            HandshakeState::Idle,
            HandshakeState::Pending(ProtocolVersion::Hybi),
            HandshakeState::Failed,
        ] {
            assert!(matches!(session_version(state), Err(Error::HandshakeFailure(_))));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_request_head_times_out() {
        let (server, mut client) = duplex(4096);
        client.write_all(b"GET / HTTP/1.1\r\nHost: a\r\n").await.unwrap();

        let config = Config::default().with_handshake_timeout(Duration::from_secs(2));
        let result = HttpRequest::read(server, &config).await;
        assert!(matches!(result, Err(Error::HandshakeTimeout(t)) if t == Duration::from_secs(2)));
        drop(client);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_hixie_body_times_out() {
        let (server, mut client) = duplex(4096);
        client
            .write_all(
                b"GET /demo HTTP/1.1\r\nHost: example.com\r\n\
Sec-WebSocket-Key1: 4 @1  46546xW%0l 1 5\r\n\
Sec-WebSocket-Key2: 12998 5 Y3 1  .P00\r\n\r\n^n:",
            )
            .await
            .unwrap();

        let config = Config::default();
        let mut req = HttpRequest::read(server, &config).await.unwrap();
        let err = negotiate(&mut req, &config).await.unwrap_err();
        assert_eq!(err, Error::HandshakeTimeout(Duration::from_secs(30)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Handshake);
        drop(client);
    }

    #[tokio::test]
    async fn test_http_request_keeps_trailing_bytes() {
        let (server, mut client) = duplex(4096);
        client
            .write_all(b"GET /chat HTTP/1.1\r\nHost: a\r\nSec-WebSocket-Key: k\r\n\r\nEXTRA")
            .await
            .unwrap();

        let req = HttpRequest::read(server, &Config::default()).await.unwrap();
        assert_eq!(req.path(), "/chat");
        assert_eq!(req.header("sec-websocket-key"), Some("k"));
        assert_eq!(req.scheme(), Scheme::Ws);

        let (_io, pending) = req.into_parts();
        assert_eq!(&pending[..], b"EXTRA");
    }

    #[tokio::test]
    async fn test_http_request_body_spans_reads() {
        let (server, mut client) = duplex(4096);
        client
            .write_all(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n1234")
            .await
            .unwrap();

        let mut req = HttpRequest::read(server, &Config::default()).await.unwrap();
        let reader = tokio::spawn(async move {
            let body = req.read_body(8).await.unwrap();
            (req, body)
        });
        client.write_all(b"5678rest").await.unwrap();

        let (req, body) = reader.await.unwrap();
        assert_eq!(body, b"12345678");
        let (_io, pending) = req.into_parts();
        assert_eq!(&pending[..], b"rest");
    }

    #[tokio::test]
    async fn test_http_request_too_large() {
        let (server, mut client) = duplex(1 << 16);
        let config = Config::default().with_limits(crate::config::Limits::new(1024, 64));
        client.write_all(&[b'A'; 200]).await.unwrap();

        let result = HttpRequest::read(server, &config).await;
        assert!(matches!(result, Err(Error::HandshakeTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_http_request_peer_hangs_up() {
        let (server, mut client) = duplex(4096);
        client.write_all(b"GET / HTTP/1.1\r\nHo").await.unwrap();
        drop(client);

        let result = HttpRequest::read(server, &Config::default()).await;
        assert!(matches!(result, Err(Error::TransportClosed)));
    }

    #[tokio::test]
    async fn test_http_request_respond_writes_head() {
        let (server, mut client) = duplex(4096);
        client
            .write_all(b"GET / HTTP/1.1\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n")
            .await
            .unwrap();

        let mut req = HttpRequest::read(server, &Config::default()).await.unwrap();
        let state = negotiate(&mut req, &Config::default()).await.unwrap();
        assert_eq!(session_version(state), Ok(ProtocolVersion::Hybi));

        let mut buf = vec![0u8; 512];
        let n = client.read(&mut buf).await.unwrap();
        let head = String::from_utf8_lossy(&buf[..n]);
        assert!(head.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }
}
