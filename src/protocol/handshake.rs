//! Upgrade handshake negotiation for hybi (RFC 6455) and hixie-76 peers.
//!
//! The request's key headers decide the protocol generation. Hybi answers
//! with a `Sec-WebSocket-Accept` digest; hixie answers with an MD5
//! challenge computed from two obfuscated keys and an 8-byte body.

use std::collections::HashMap;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use md5::Md5;
use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::protocol::ProtocolVersion;

/// The WebSocket GUID used in the Sec-WebSocket-Accept calculation (RFC 6455).
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Hybi key header.
pub const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
/// First hixie-76 key header.
pub const SEC_WEBSOCKET_KEY1: &str = "sec-websocket-key1";
/// Second hixie-76 key header.
pub const SEC_WEBSOCKET_KEY2: &str = "sec-websocket-key2";
/// Subprotocol header, echoed back when present.
pub const SEC_WEBSOCKET_PROTOCOL: &str = "sec-websocket-protocol";
/// Origin header.
pub const ORIGIN: &str = "origin";
/// Host header.
pub const HOST: &str = "host";

/// Length of the hixie-76 challenge body that follows the request head.
pub const HIXIE_BODY_LEN: usize = 8;

/// Headers that must not appear twice in an upgrade request.
const SECURITY_HEADERS: [&str; 6] = [
    HOST,
    "upgrade",
    "connection",
    SEC_WEBSOCKET_KEY,
    SEC_WEBSOCKET_KEY1,
    SEC_WEBSOCKET_KEY2,
];

/// Request headers with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    map: HashMap<String, String>,
}

impl Headers {
    /// Create an empty header set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.map.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Look up a header by name, ignoring ASCII case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Check whether a header is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of distinct headers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Parse header lines up to the first empty line.
    ///
    /// # Errors
    /// Returns `Error::HandshakeFailure` if a security-critical header is duplicated.
    fn parse<'a, I>(lines: I) -> Result<Self>
    where
        I: Iterator<Item = &'a str>,
    {
        let mut headers = Self::new();

        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                let name_lower = name.trim().to_ascii_lowercase();

                if SECURITY_HEADERS.contains(&name_lower.as_str())
                    && headers.map.contains_key(&name_lower)
                {
                    return Err(Error::handshake(format!(
                        "Duplicate header: {}",
                        name.trim()
                    )));
                }

                headers.map.insert(name_lower, value.trim().to_string());
            }
        }

        Ok(headers)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.insert(name.as_ref(), value);
        }
        headers
    }
}

/// URI scheme the connection was made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Plaintext (`ws://`).
    Ws,
    /// TLS (`wss://`).
    Wss,
}

impl Scheme {
    /// Pick the scheme for a plaintext or encrypted transport.
    #[must_use]
    pub const fn from_secure(secure: bool) -> Self {
        if secure { Scheme::Wss } else { Scheme::Ws }
    }

    /// The scheme as it appears in a URI.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }
}

/// Choose the protocol generation from the request's key headers.
///
/// A hybi key wins over hixie keys; hixie needs both of its keys.
///
/// # Errors
/// Returns `Error::HandshakeFailure` if neither key set is present.
pub fn select_version(headers: &Headers) -> Result<ProtocolVersion> {
    if headers.contains(SEC_WEBSOCKET_KEY) {
        Ok(ProtocolVersion::Hybi)
    } else if headers.contains(SEC_WEBSOCKET_KEY1) && headers.contains(SEC_WEBSOCKET_KEY2) {
        Ok(ProtocolVersion::Hixie)
    } else {
        Err(Error::handshake("no WebSocket key headers in request"))
    }
}

/// Computes the Sec-WebSocket-Accept value from the client's Sec-WebSocket-Key.
///
/// The accept key is calculated as: Base64(SHA-1(key + GUID))
///
/// # Example
///
/// ```
/// use wsdual::protocol::handshake::compute_accept_key;
///
/// let key = "dGhlIHNhbXBsZSBub25jZQ==";
/// let accept = compute_accept_key(key);
/// assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
/// ```
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let hash = hasher.finalize();
    BASE64.encode(hash)
}

/// Reduce a hixie-76 key to its 32-bit number.
///
/// The digits of the key, read as one decimal number, are divided by the
/// number of spaces in the key.
///
/// # Errors
/// Returns `Error::HandshakeFailure` if the key has no spaces, no digits,
/// or a quotient that does not fit in 32 bits.
pub fn reduce_hixie_key(key: &str) -> Result<u32> {
    let digits: String = key.chars().filter(char::is_ascii_digit).collect();
    let spaces = key.chars().filter(|&c| c == ' ').count() as u64;

    let number: u64 = digits
        .parse()
        .map_err(|_| Error::handshake(format!("hixie key has no usable number: {:?}", key)))?;
    let quotient = number
        .checked_div(spaces)
        .ok_or_else(|| Error::handshake(format!("hixie key has no spaces: {:?}", key)))?;

    u32::try_from(quotient)
        .map_err(|_| Error::handshake(format!("hixie key out of range: {:?}", key)))
}

/// Compute the hixie-76 challenge response.
///
/// MD5 over the two reduced keys as big-endian 32-bit integers followed by
/// the 8 body bytes.
///
/// # Errors
/// Propagates key reduction failures from [`reduce_hixie_key`].
pub fn compute_hixie_challenge(key1: &str, key2: &str, body: &[u8; HIXIE_BODY_LEN]) -> Result<[u8; 16]> {
    let number1 = reduce_hixie_key(key1)?;
    let number2 = reduce_hixie_key(key2)?;

    let mut hasher = Md5::new();
    hasher.update(number1.to_be_bytes());
    hasher.update(number2.to_be_bytes());
    hasher.update(body);
    Ok(hasher.finalize().into())
}

/// Validate the Origin header against a list of allowed origins.
///
/// If `allowed` is empty, any origin (or no origin) is accepted.
///
/// # Errors
/// Returns `Error::OriginNotAllowed` if `allowed` is not empty and `origin`
/// is missing or doesn't match any value.
pub fn validate_origin(origin: Option<&str>, allowed: &[String]) -> Result<()> {
    if allowed.is_empty() {
        return Ok(());
    }

    match origin {
        Some(o) if allowed.iter().any(|a| a == o) => Ok(()),
        Some(o) => Err(Error::OriginNotAllowed {
            origin: o.to_string(),
        }),
        None => Err(Error::OriginNotAllowed {
            origin: "(none)".to_string(),
        }),
    }
}

/// Validate that a header value does not contain CR or LF characters.
///
/// # Errors
/// Returns `Error::InvalidHeaderValue` if the value contains `\r` or `\n`.
fn validate_header_value(header_name: &str, value: &str) -> Result<()> {
    if value.contains('\r') || value.contains('\n') {
        return Err(Error::InvalidHeaderValue {
            header: header_name.to_string(),
            reason: "contains CR or LF characters".to_string(),
        });
    }
    Ok(())
}

/// Parsed HTTP upgrade request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// The request path (e.g., "/chat").
    pub path: String,
    /// All request headers.
    pub headers: Headers,
}

impl HandshakeRequest {
    /// Parse an upgrade request head from raw HTTP data.
    ///
    /// Only the request line and headers are read; protocol selection is
    /// left to [`select_version`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandshakeFailure`] if:
    /// - The data is not valid UTF-8.
    /// - The request line is malformed or missing.
    /// - The HTTP method is not `GET`.
    /// - The HTTP version is not `HTTP/1.1`.
    /// - A security-critical header appears twice.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text =
            std::str::from_utf8(data).map_err(|_| Error::handshake("Invalid UTF-8"))?;

        let mut lines = text.lines();

        let request_line = lines
            .next()
            .ok_or_else(|| Error::handshake("Empty request"))?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();
        let [method, path, http_version] = parts.as_slice() else {
            return Err(Error::handshake("Invalid request line"));
        };

        if *method != "GET" {
            return Err(Error::handshake(format!(
                "Expected GET method, got {}",
                method
            )));
        }

        if !http_version.starts_with("HTTP/1.1") {
            return Err(Error::handshake(format!(
                "Expected HTTP/1.1, got {}",
                http_version
            )));
        }

        Ok(Self {
            path: (*path).to_string(),
            headers: Headers::parse(lines)?,
        })
    }

    /// Parse a handshake request with size limit.
    ///
    /// # Errors
    ///
    /// - `Error::HandshakeTooLarge` if data exceeds max_size
    /// - Other handshake errors as per `parse()`
    pub fn parse_with_limit(data: &[u8], max_size: usize) -> Result<Self> {
        if data.len() > max_size {
            return Err(Error::HandshakeTooLarge {
                size: data.len(),
                max: max_size,
            });
        }
        Self::parse(data)
    }

    /// Look up a request header, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

/// Handshake response sent back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// HTTP status code.
    pub status: u16,
    /// HTTP reason phrase.
    pub reason: &'static str,
    /// Response headers in send order.
    pub headers: Vec<(String, String)>,
    /// Response body; the hixie challenge digest, empty for hybi.
    pub body: Vec<u8>,
}

impl HandshakeResponse {
    fn switching(reason: &'static str) -> Self {
        Self {
            status: 101,
            reason,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn push_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.push((name.to_string(), value.into()));
    }

    fn echo_protocol(&mut self, request: &Headers) {
        if let Some(protocol) = request.get(SEC_WEBSOCKET_PROTOCOL) {
            self.push_header("Sec-WebSocket-Protocol", protocol);
        }
    }

    /// Build the hybi response for a request carrying `Sec-WebSocket-Key`.
    ///
    /// # Errors
    /// Returns `Error::HandshakeFailure` if the key header is missing.
    pub fn hybi(request: &Headers) -> Result<Self> {
        let key = request
            .get(SEC_WEBSOCKET_KEY)
            .ok_or_else(|| Error::handshake("Missing Sec-WebSocket-Key header"))?;

        let mut response = Self::switching("Switching Protocols");
        response.push_header("Upgrade", "websocket");
        response.push_header("Connection", "Upgrade");
        response.push_header("Sec-WebSocket-Accept", compute_accept_key(key));
        response.echo_protocol(request);
        Ok(response)
    }

    /// Build the hixie-76 response.
    ///
    /// `body` is the 8-byte challenge read from the connection after the
    /// request head.
    ///
    /// # Errors
    /// Returns `Error::HandshakeFailure` if a key header or the Host header
    /// is missing, or a key cannot be reduced.
    pub fn hixie(
        request: &Headers,
        scheme: Scheme,
        path: &str,
        body: &[u8; HIXIE_BODY_LEN],
    ) -> Result<Self> {
        let key1 = request
            .get(SEC_WEBSOCKET_KEY1)
            .ok_or_else(|| Error::handshake("Missing Sec-WebSocket-Key1 header"))?;
        let key2 = request
            .get(SEC_WEBSOCKET_KEY2)
            .ok_or_else(|| Error::handshake("Missing Sec-WebSocket-Key2 header"))?;
        let host = request
            .get(HOST)
            .ok_or_else(|| Error::handshake("Missing Host header"))?;

        let challenge = compute_hixie_challenge(key1, key2, body)?;

        let mut response = Self::switching("WebSocket Protocol Handshake");
        response.push_header("Upgrade", "WebSocket");
        response.push_header("Connection", "Upgrade");
        if let Some(origin) = request.get(ORIGIN) {
            response.push_header("Sec-WebSocket-Origin", origin);
        }
        response.push_header(
            "Sec-WebSocket-Location",
            format!("{}://{}{}", scheme.as_str(), host, path),
        );
        response.echo_protocol(request);
        response.body = challenge.to_vec();
        Ok(response)
    }

    /// Look up a response header, ignoring ASCII case.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Write the HTTP response to a buffer.
    ///
    /// # Errors
    /// Returns `Error::InvalidHeaderValue` if a header value contains CR/LF.
    pub fn write(&self, buf: &mut Vec<u8>) -> Result<()> {
        buf.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).as_bytes());

        for (name, value) in &self.headers {
            validate_header_value(name, value)?;
            buf.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }

        buf.extend_from_slice(b"\r\n");
        buf.extend_from_slice(&self.body);
        Ok(())
    }
}
