//
// Copyright 2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! TLS encryption as a filter.
//!
//! [`TlsFilter`] drives a rustls client or server connection from inside a
//! filter chain. Nothing is encrypted until the handshake completes; the
//! first application read or write pumps it, and the held operation resumes
//! afterwards.
//!
//! # Examples
//!
//! ```rust,ignore
//! use chainrpc::filter::{FilterChain, TlsFilter, TlsFilterConfig};
//!
//! let config = TlsFilterConfig::server_from_pem(
//!     include_bytes!("cert.pem"),
//!     include_bytes!("key.pem"),
//! )?;
//! let chain = FilterChain::connect_filters(vec![Box::new(TlsFilter::new(config))]);
//! ```

use super::{Filter, FilterContext, FilterError, FilterId};
use crate::buffer::{BufferPool, ByteBuffer, total_length};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, Connection, RootCertStore, ServerConfig, ServerConnection};
use std::io::{self, Read, Write};
use std::sync::Arc;

#[cfg(feature = "observability")]
use tracing::{debug, trace};

/// Bytes requested from the wire while waiting for TLS records.
const WIRE_READ_SIZE: usize = 16 * 1024;

/// Largest plaintext read served in one completion.
const MAX_PLAINTEXT_READ: usize = 64 * 1024;

/// TLS settings for one side of a connection.
#[derive(Clone)]
pub enum TlsFilterConfig {
    /// Client configuration with the name used for SNI and verification.
    Client {
        /// rustls client configuration
        config: Arc<ClientConfig>,
        /// Server name the certificate must match
        server_name: ServerName<'static>,
    },
    /// Server configuration with its certificate chain.
    Server {
        /// rustls server configuration
        config: Arc<ServerConfig>,
    },
}

impl TlsFilterConfig {
    /// Wraps an existing client configuration.
    pub fn client(config: Arc<ClientConfig>, server_name: &str) -> Result<Self, FilterError> {
        let server_name = ServerName::try_from(server_name.to_string()).map_err(|e| {
            FilterError::InvalidConfiguration {
                reason: format!("invalid server name {server_name:?}: {e}"),
            }
        })?;
        Ok(Self::Client {
            config,
            server_name,
        })
    }

    /// Creates a client configuration trusting the certificates in `roots`.
    pub fn client_with_roots(roots: RootCertStore, server_name: &str) -> Result<Self, FilterError> {
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Self::client(Arc::new(config), server_name)
    }

    /// Creates a client configuration trusting the PEM-encoded CA
    /// certificates in `ca_pem`.
    pub fn client_from_pem(ca_pem: &[u8], server_name: &str) -> Result<Self, FilterError> {
        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut &ca_pem[..]) {
            let cert = cert.map_err(invalid_pem)?;
            roots.add(cert).map_err(|e| FilterError::InvalidConfiguration {
                reason: format!("rejected CA certificate: {e}"),
            })?;
        }
        if roots.is_empty() {
            return Err(FilterError::InvalidConfiguration {
                reason: "no CA certificates found".to_string(),
            });
        }
        Self::client_with_roots(roots, server_name)
    }

    /// Wraps an existing server configuration.
    pub fn server(config: Arc<ServerConfig>) -> Self {
        Self::Server { config }
    }

    /// Creates a server configuration from a PEM certificate chain and key.
    pub fn server_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, FilterError> {
        let certs = rustls_pemfile::certs(&mut &cert_pem[..])
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid_pem)?;

        let key = rustls_pemfile::private_key(&mut &key_pem[..])
            .map_err(invalid_pem)?
            .ok_or_else(|| FilterError::InvalidConfiguration {
                reason: "no private key found".to_string(),
            })?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| FilterError::InvalidConfiguration {
                reason: format!("rejected certificate or key: {e}"),
            })?;

        Ok(Self::server(Arc::new(config)))
    }

    /// Returns `true` for a server-side configuration.
    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server { .. })
    }

    fn new_connection(&self) -> Result<Connection, FilterError> {
        let connection = match self {
            Self::Client {
                config,
                server_name,
            } => ClientConnection::new(Arc::clone(config), server_name.clone()).map(Connection::from),
            Self::Server { config } => ServerConnection::new(Arc::clone(config)).map(Connection::from),
        };
        connection.map_err(tls_error)
    }
}

impl std::fmt::Debug for TlsFilterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client { server_name, .. } => f
                .debug_struct("TlsFilterConfig::Client")
                .field("server_name", server_name)
                .finish(),
            Self::Server { .. } => f.debug_struct("TlsFilterConfig::Server").finish(),
        }
    }
}

/// Application operation held while the connection talks to the wire.
#[derive(Debug)]
enum Pending {
    Idle,
    /// Zero-length sentinel in flight.
    Release,
    Read { bytes_requested: usize },
    Write { buffers: Vec<ByteBuffer> },
    /// Plaintext accepted; waiting for its records to reach the wire.
    Flush { bytes: usize },
}

/// Encrypts writes and decrypts reads with rustls.
pub struct TlsFilter {
    config: TlsFilterConfig,
    connection: Option<Connection>,
    pending: Pending,
    /// Records handed to the wire and not yet acknowledged.
    post_buffer: ByteBuffer,
}

impl TlsFilter {
    /// Creates a filter for one side of a connection.
    pub fn new(config: TlsFilterConfig) -> Self {
        Self {
            config,
            connection: None,
            pending: Pending::Idle,
            post_buffer: ByteBuffer::new(),
        }
    }

    /// The configuration the filter was built from.
    pub fn config(&self) -> &TlsFilterConfig {
        &self.config
    }

    /// Returns `true` until the handshake has completed.
    pub fn is_handshaking(&self) -> bool {
        self.connection.as_ref().map_or(true, |c| c.is_handshaking())
    }

    /// Moves the connection forward: flush records, finish the handshake,
    /// then serve the held operation.
    fn pump(&mut self, ctx: &mut FilterContext<'_>) -> Result<(), FilterError> {
        if self.connection.is_none() {
            self.connection = Some(self.config.new_connection()?);
        }
        let Some(connection) = self.connection.as_mut() else {
            return Err(tls_error("connection unavailable"));
        };

        loop {
            if connection.wants_write() {
                let mut records = Vec::new();
                while connection.wants_write() {
                    connection.write_tls(&mut records).map_err(tls_error)?;
                }
                #[cfg(feature = "observability")]
                trace!(bytes = records.len(), "tls records out");
                self.post_buffer = ByteBuffer::from_vec(records);
                ctx.write_post(vec![self.post_buffer.clone()]);
                return Ok(());
            }

            if connection.is_handshaking() {
                ctx.read_post(ByteBuffer::new(), WIRE_READ_SIZE);
                return Ok(());
            }

            match std::mem::replace(&mut self.pending, Pending::Idle) {
                Pending::Idle | Pending::Release => return Ok(()),
                Pending::Write { buffers } => {
                    let mut writer = connection.writer();
                    for buffer in &buffers {
                        writer.write_all(buffer).map_err(tls_error)?;
                    }
                    self.pending = Pending::Flush {
                        bytes: total_length(&buffers),
                    };
                }
                Pending::Flush { bytes } => {
                    ctx.complete_write(bytes);
                    return Ok(());
                }
                Pending::Read { bytes_requested } => {
                    let mut buffer = BufferPool::get(bytes_requested.min(MAX_PLAINTEXT_READ));
                    match connection.reader().read(buffer.as_mut_slice()) {
                        Ok(n) => {
                            // Zero bytes here means the peer sent close_notify.
                            buffer.resize(n);
                            ctx.complete_read(buffer);
                        }
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                            self.pending = Pending::Read { bytes_requested };
                            ctx.read_post(ByteBuffer::new(), WIRE_READ_SIZE);
                        }
                        Err(e) => return Err(tls_error(e)),
                    }
                    return Ok(());
                }
            }
        }
    }
}

impl Filter for TlsFilter {
    fn filter_id(&self) -> FilterId {
        FilterId::SslEncryption
    }

    fn reset_state(&mut self) {
        self.connection = None;
        self.pending = Pending::Idle;
        self.post_buffer = ByteBuffer::new();
    }

    fn read(
        &mut self,
        ctx: &mut FilterContext<'_>,
        _buffer: ByteBuffer,
        bytes_requested: usize,
    ) -> Result<(), FilterError> {
        if bytes_requested == 0 {
            self.pending = Pending::Release;
            ctx.read_post(ByteBuffer::new(), 0);
            return Ok(());
        }
        self.pending = Pending::Read { bytes_requested };
        self.pump(ctx)
    }

    fn write(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffers: Vec<ByteBuffer>,
    ) -> Result<(), FilterError> {
        if total_length(&buffers) == 0 {
            self.pending = Pending::Release;
            self.post_buffer = ByteBuffer::new();
            ctx.write_post(Vec::new());
            return Ok(());
        }
        self.pending = Pending::Write { buffers };
        self.pump(ctx)
    }

    fn on_read_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        buffer: ByteBuffer,
    ) -> Result<(), FilterError> {
        if matches!(self.pending, Pending::Release) {
            self.pending = Pending::Idle;
            ctx.complete_read(ByteBuffer::new());
            return Ok(());
        }

        if buffer.is_empty() {
            if self.is_handshaking() {
                return Err(tls_error("peer closed the connection during the handshake"));
            }
            self.pending = Pending::Idle;
            ctx.complete_read(ByteBuffer::new());
            return Ok(());
        }

        let was_handshaking = self.is_handshaking();
        let Some(connection) = self.connection.as_mut() else {
            return Err(tls_error("records arrived before the connection started"));
        };
        let mut input: &[u8] = &buffer;
        while !input.is_empty() {
            if connection.read_tls(&mut input).map_err(tls_error)? == 0 {
                break;
            }
            connection.process_new_packets().map_err(tls_error)?;
        }

        #[cfg(feature = "observability")]
        if was_handshaking && !connection.is_handshaking() {
            debug!(
                server = self.config.is_server(),
                version = ?connection.protocol_version(),
                "tls handshake complete"
            );
        }
        #[cfg(not(feature = "observability"))]
        let _ = was_handshaking;

        self.pump(ctx)
    }

    fn on_write_completed(
        &mut self,
        ctx: &mut FilterContext<'_>,
        bytes_transferred: usize,
    ) -> Result<(), FilterError> {
        if matches!(self.pending, Pending::Release) {
            self.pending = Pending::Idle;
            ctx.complete_write(0);
            return Ok(());
        }

        if bytes_transferred < self.post_buffer.len() {
            self.post_buffer = self.post_buffer.slice_from(bytes_transferred);
            ctx.write_post(vec![self.post_buffer.clone()]);
            return Ok(());
        }
        self.post_buffer = ByteBuffer::new();
        self.pump(ctx)
    }
}

impl std::fmt::Debug for TlsFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsFilter")
            .field("config", &self.config)
            .field("handshaking", &self.is_handshaking())
            .field("pending", &self.pending)
            .finish()
    }
}

fn tls_error(reason: impl std::fmt::Display) -> FilterError {
    FilterError::FilterHandshakeFailed {
        filter: FilterId::SslEncryption,
        reason: reason.to_string(),
    }
}

fn invalid_pem(e: io::Error) -> FilterError {
    FilterError::InvalidConfiguration {
        reason: format!("invalid PEM data: {e}"),
    }
}
