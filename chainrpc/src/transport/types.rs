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

//! Transport kinds and the wire filters each one needs.

use crate::filter::{Filter, FilterError, HttpConnectFilter, HttpFrameFilter};
use std::fmt;

#[cfg(feature = "tls")]
use crate::filter::{TlsFilter, TlsFilterConfig};

/// The kind of connection a client uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Length-prefixed frames over TCP.
    Tcp,
    /// Frames tunnelled through HTTP requests and responses.
    Http,
    /// HTTP inside TLS.
    Https,
    /// In-process connection.
    Memory,
}

impl TransportType {
    /// Returns `true` for the HTTP based kinds, which cannot carry oneway
    /// calls.
    pub fn is_http(self) -> bool {
        matches!(self, TransportType::Http | TransportType::Https)
    }
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportType::Tcp => write!(f, "tcp"),
            TransportType::Http => write!(f, "http"),
            TransportType::Https => write!(f, "https"),
            TransportType::Memory => write!(f, "memory"),
        }
    }
}

/// An HTTP proxy reached with `CONNECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpProxy {
    /// Proxy host name
    pub host: String,
    /// Proxy port
    pub port: u16,
}

/// How a client frames its bytes on the wire.
///
/// Wire filters sit between the transport filters and the raw socket and
/// live as long as the connection. They are reset on every reconnect, while
/// transport filters are dropped.
///
/// # Examples
///
/// ```rust
/// use chainrpc::filter::FilterId;
/// use chainrpc::transport::{TransportType, WireConfig};
///
/// let wire = WireConfig::http("rpc.example.com", 80).with_proxy("proxy", 3128);
/// assert_eq!(wire.transport_type, TransportType::Http);
///
/// let filters = wire.client_filters().unwrap();
/// assert_eq!(filters.len(), 2);
/// assert_eq!(filters[0].filter_id(), FilterId::Unknown);
/// ```
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Kind of connection
    pub transport_type: TransportType,
    /// Server host name, used in HTTP headers and TLS server name checks
    pub host: String,
    /// Server port
    pub port: u16,
    /// Optional HTTP proxy
    pub proxy: Option<HttpProxy>,
    /// TLS settings for HTTPS
    #[cfg(feature = "tls")]
    pub tls: Option<TlsFilterConfig>,
}

impl WireConfig {
    fn new(transport_type: TransportType, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport_type,
            host: host.into(),
            port,
            proxy: None,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }

    /// Plain length-prefixed frames over TCP.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(TransportType::Tcp, host, port)
    }

    /// Plain frames over an in-process connection.
    pub fn memory(name: impl Into<String>) -> Self {
        Self::new(TransportType::Memory, name, 0)
    }

    /// Frames inside HTTP requests.
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self::new(TransportType::Http, host, port)
    }

    /// Frames inside HTTP requests inside TLS.
    #[cfg(feature = "tls")]
    pub fn https(host: impl Into<String>, port: u16, tls: TlsFilterConfig) -> Self {
        Self {
            tls: Some(tls),
            ..Self::new(TransportType::Https, host, port)
        }
    }

    /// Tunnels the connection through an HTTP proxy.
    #[must_use]
    pub fn with_proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.proxy = Some(HttpProxy {
            host: host.into(),
            port,
        });
        self
    }

    /// Address the raw transport connects to: the proxy when one is set,
    /// otherwise the server.
    pub fn connect_address(&self) -> String {
        match &self.proxy {
            Some(proxy) => format!("{}:{}", proxy.host, proxy.port),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    /// Builds the client wire filters, application side first: HTTP
    /// framing, then TLS, then the proxy tunnel nearest the socket.
    pub fn client_filters(&self) -> Result<Vec<Box<dyn Filter>>, FilterError> {
        let mut filters: Vec<Box<dyn Filter>> = Vec::new();
        if self.transport_type.is_http() {
            filters.push(Box::new(HttpFrameFilter::client(self.host.clone(), self.port)));
        }
        if self.transport_type == TransportType::Https {
            filters.push(self.tls_filter()?);
        }
        if self.proxy.is_some() {
            filters.push(Box::new(HttpConnectFilter::new(&self.host, self.port)));
        }
        Ok(filters)
    }

    #[cfg(feature = "tls")]
    fn tls_filter(&self) -> Result<Box<dyn Filter>, FilterError> {
        let config = self.tls.clone().ok_or_else(|| FilterError::InvalidConfiguration {
            reason: "HTTPS needs a TLS configuration".to_string(),
        })?;
        Ok(Box::new(TlsFilter::new(config)))
    }

    #[cfg(not(feature = "tls"))]
    fn tls_filter(&self) -> Result<Box<dyn Filter>, FilterError> {
        Err(FilterError::InvalidConfiguration {
            reason: "HTTPS needs the `tls` feature".to_string(),
        })
    }
}
