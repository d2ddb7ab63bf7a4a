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

//! Server session configuration.

use crate::filter::{
    DEFAULT_MAX_MESSAGE_LENGTH, Filter, FilterError, HttpFrameFilter, HttpSessionFilter,
    HttpSessionRegistry,
};
use crate::negotiation::TransportProtocol;
use crate::stub::RUNTIME_VERSION;
use crate::transport::TransportType;
use std::time::Duration;

#[cfg(feature = "tls")]
use crate::filter::{TlsFilter, TlsFilterConfig};

/// Settings shared by the sessions of one server.
///
/// # Examples
///
/// ```rust
/// use chainrpc::filter::HttpSessionRegistry;
/// use chainrpc::negotiation::TransportProtocol;
/// use chainrpc::session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::default()
///     .with_supported_protocols(vec![TransportProtocol::Clear])
///     .with_idle_timeout(Duration::from_secs(30))
///     .with_http(HttpSessionRegistry::new());
/// assert!(config.validate().is_ok());
/// assert!(config.transport_type().is_http());
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Highest runtime version served
    pub runtime_version: u32,
    /// Highest archive version served; zero accepts any
    pub archive_version: u32,
    /// Transport protocols clients may negotiate; empty accepts all
    pub supported_protocols: Vec<TransportProtocol>,
    /// Largest request or response frame
    pub max_message_length: usize,
    /// How long a session waits for the next request before closing
    pub idle_timeout: Duration,
    /// Bound on writing one response
    pub write_timeout: Duration,
    /// Whether requested ping-backs are sent. Never over HTTP.
    pub enable_ping_back: bool,
    /// HTTP session table when clients connect over HTTP
    pub http_sessions: Option<HttpSessionRegistry>,
    /// Whether HTTP responses use chunked transfer encoding
    pub chunked_responses: bool,
    /// Server TLS settings for HTTPS
    #[cfg(feature = "tls")]
    pub tls: Option<TlsFilterConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            runtime_version: RUNTIME_VERSION,
            archive_version: 0,
            supported_protocols: Vec::new(),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            idle_timeout: Duration::from_secs(300),
            write_timeout: Duration::from_secs(10),
            enable_ping_back: true,
            http_sessions: None,
            chunked_responses: false,
            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}

impl SessionConfig {
    /// Sets the highest runtime version served.
    #[must_use]
    pub fn with_runtime_version(mut self, version: u32) -> Self {
        self.runtime_version = version;
        self
    }

    /// Sets the highest archive version served.
    #[must_use]
    pub fn with_archive_version(mut self, version: u32) -> Self {
        self.archive_version = version;
        self
    }

    /// Restricts the transport protocols clients may negotiate.
    #[must_use]
    pub fn with_supported_protocols(mut self, protocols: Vec<TransportProtocol>) -> Self {
        self.supported_protocols = protocols;
        self
    }

    /// Sets the largest request or response frame.
    #[must_use]
    pub fn with_max_message_length(mut self, length: usize) -> Self {
        self.max_message_length = length;
        self
    }

    /// Sets how long an idle session is kept open.
    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Sets the bound on writing one response.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Enables or disables ping-backs.
    #[must_use]
    pub fn with_ping_back(mut self, enabled: bool) -> Self {
        self.enable_ping_back = enabled;
        self
    }

    /// Serves clients connecting over HTTP, tracking their sessions in
    /// `sessions`.
    #[must_use]
    pub fn with_http(mut self, sessions: HttpSessionRegistry) -> Self {
        self.http_sessions = Some(sessions);
        self
    }

    /// Serves clients connecting over HTTPS.
    #[cfg(feature = "tls")]
    #[must_use]
    pub fn with_https(mut self, sessions: HttpSessionRegistry, tls: TlsFilterConfig) -> Self {
        self.http_sessions = Some(sessions);
        self.tls = Some(tls);
        self
    }

    /// Enables chunked HTTP responses.
    #[must_use]
    pub fn with_chunked_responses(mut self, enabled: bool) -> Self {
        self.chunked_responses = enabled;
        self
    }

    /// The kind of connection sessions expect.
    pub fn transport_type(&self) -> TransportType {
        match (&self.http_sessions, self.has_tls()) {
            (Some(_), true) => TransportType::Https,
            (Some(_), false) => TransportType::Http,
            (None, _) => TransportType::Tcp,
        }
    }

    #[cfg(feature = "tls")]
    fn has_tls(&self) -> bool {
        self.tls.is_some()
    }

    #[cfg(not(feature = "tls"))]
    fn has_tls(&self) -> bool {
        false
    }

    /// Checks the settings for values no session could run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.runtime_version < crate::stub::MIN_RUNTIME_VERSION {
            return Err(format!(
                "runtime version {} is below the minimum {}",
                self.runtime_version,
                crate::stub::MIN_RUNTIME_VERSION
            ));
        }
        if self.max_message_length == 0 {
            return Err("max_message_length must be greater than 0".to_string());
        }
        if self.idle_timeout.is_zero() {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.write_timeout.is_zero() {
            return Err("write_timeout must be greater than 0".to_string());
        }
        if self.has_tls() && self.http_sessions.is_none() {
            return Err("TLS wire encryption is only used with HTTP".to_string());
        }
        Ok(())
    }

    /// Builds the server wire filters, application side first: HTTP
    /// session tracking, HTTP framing, then TLS nearest the socket.
    pub fn wire_filters(&self) -> Result<Vec<Box<dyn Filter>>, FilterError> {
        let mut filters: Vec<Box<dyn Filter>> = Vec::new();
        if let Some(sessions) = &self.http_sessions {
            filters.push(Box::new(HttpSessionFilter::new(sessions.clone())));
            filters.push(Box::new(
                HttpFrameFilter::server()
                    .with_max_message_length(self.max_message_length)
                    .with_chunked_responses(self.chunked_responses),
            ));
        }
        #[cfg(feature = "tls")]
        if let Some(tls) = &self.tls {
            if !tls.is_server() {
                return Err(FilterError::InvalidConfiguration {
                    reason: "server sessions need a server TLS configuration".to_string(),
                });
            }
            filters.push(Box::new(TlsFilter::new(tls.clone())));
        }
        Ok(filters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterId;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.runtime_version, RUNTIME_VERSION);
        assert_eq!(config.archive_version, 0);
        assert!(config.enable_ping_back);
        assert_eq!(config.transport_type(), TransportType::Tcp);
        assert!(config.wire_filters().unwrap().is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_wire_filters() {
        let config = SessionConfig::default().with_http(HttpSessionRegistry::new());
        let filters = config.wire_filters().unwrap();
        assert_eq!(filters.len(), 2);
        assert!(filters.iter().all(|f| f.filter_id() == FilterId::Unknown));
    }

    #[test]
    fn test_validate() {
        assert!(SessionConfig::default().with_runtime_version(1).validate().is_err());
        assert!(SessionConfig::default().with_max_message_length(0).validate().is_err());
        assert!(SessionConfig::default()
            .with_idle_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
