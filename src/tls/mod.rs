//! TLS support for secure WebSocket (`wss://`) endpoints.
//!
//! Accepted TLS streams implement [`Transport`](crate::transport::Transport)
//! and report themselves as secure, so hixie location headers use `wss://`.

mod rustls_impl;

pub use rustls_impl::{
    TlsAcceptor, TlsError, TlsStream, load_certs_from_file, load_private_key_from_file,
    server_config,
};
