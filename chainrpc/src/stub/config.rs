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

//! Client stub configuration.

use crate::RpcError;
use crate::filter::FilterId;
use crate::negotiation::TransportProtocol;
use std::time::Duration;

/// Runtime version spoken by this build.
pub const RUNTIME_VERSION: u32 = 12;

/// Oldest runtime version a stub downgrades to.
pub const MIN_RUNTIME_VERSION: u32 = 2;

/// Whether a call waits for a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallSemantics {
    /// Fire and forget.
    Oneway,
    /// Wait for the response.
    #[default]
    Twoway,
}

/// Configuration for a client stub.
///
/// # Examples
///
/// ```rust
/// use chainrpc::negotiation::TransportProtocol;
/// use chainrpc::stub::StubConfig;
/// use std::time::Duration;
///
/// let config = StubConfig::default()
///     .with_call_timeout(Duration::from_secs(30))
///     .with_compression(true)
///     .with_transport_protocol(TransportProtocol::Ssl);
/// assert!(config.validate().is_ok());
///
/// let config = StubConfig {
///     call_timeout: Duration::ZERO,
///     ..Default::default()
/// };
/// assert!(config.validate().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubConfig {
    /// Upper bound on establishing a connection. Also bounded by the call
    /// deadline.
    ///
    /// Default: 2 seconds
    pub connect_timeout: Duration,

    /// Total time a call may take, from connecting to the last byte of the
    /// response.
    ///
    /// Default: 10 seconds
    pub call_timeout: Duration,

    /// Reconnect when a call finds the connection closed. Without it only
    /// the first connect happens implicitly.
    ///
    /// Default: true
    pub auto_reconnect: bool,

    /// Retry once with the server's versions after a version mismatch.
    ///
    /// Default: true
    pub auto_versioning: bool,

    /// Interval at which the server should send ping-backs while a call
    /// runs. Zero disables them.
    ///
    /// Default: disabled
    pub ping_back_interval: Duration,

    /// Runtime version sent with requests.
    ///
    /// Default: [`RUNTIME_VERSION`]
    pub runtime_version: u32,

    /// Archive version sent with requests. Zero means unversioned.
    ///
    /// Default: 0
    pub archive_version: u32,

    /// Encryption negotiated on connect.
    ///
    /// Default: [`TransportProtocol::Clear`]
    pub transport_protocol: TransportProtocol,

    /// Negotiate stateful compression on connect.
    ///
    /// Default: false
    pub enable_compression: bool,

    /// Batch size that triggers a flush. Zero means unlimited.
    ///
    /// Default: 1 MB
    pub max_batch_message_length: usize,

    /// Message filters applied to every request.
    ///
    /// Default: none
    pub message_filters: Vec<FilterId>,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(10),
            auto_reconnect: true,
            auto_versioning: true,
            ping_back_interval: Duration::ZERO,
            runtime_version: RUNTIME_VERSION,
            archive_version: 0,
            transport_protocol: TransportProtocol::Clear,
            enable_compression: false,
            max_batch_message_length: 1024 * 1024,
            message_filters: Vec::new(),
        }
    }
}

impl StubConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the call timeout.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Enables or disables automatic reconnection.
    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Enables or disables the version mismatch retry.
    #[must_use]
    pub fn with_auto_versioning(mut self, enabled: bool) -> Self {
        self.auto_versioning = enabled;
        self
    }

    /// Sets the ping-back interval.
    #[must_use]
    pub fn with_ping_back_interval(mut self, interval: Duration) -> Self {
        self.ping_back_interval = interval;
        self
    }

    /// Sets the runtime version.
    #[must_use]
    pub fn with_runtime_version(mut self, version: u32) -> Self {
        self.runtime_version = version;
        self
    }

    /// Sets the archive version.
    #[must_use]
    pub fn with_archive_version(mut self, version: u32) -> Self {
        self.archive_version = version;
        self
    }

    /// Sets the transport protocol.
    #[must_use]
    pub fn with_transport_protocol(mut self, protocol: TransportProtocol) -> Self {
        self.transport_protocol = protocol;
        self
    }

    /// Enables or disables compression.
    #[must_use]
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.enable_compression = enabled;
        self
    }

    /// Sets the batch size limit.
    #[must_use]
    pub fn with_max_batch_message_length(mut self, length: usize) -> Self {
        self.max_batch_message_length = length;
        self
    }

    /// Sets the message filters.
    #[must_use]
    pub fn with_message_filters(mut self, filters: Vec<FilterId>) -> Self {
        self.message_filters = filters;
        self
    }

    /// Ping-back interval in milliseconds as sent on the wire.
    pub fn ping_back_interval_ms(&self) -> u32 {
        u32::try_from(self.ping_back_interval.as_millis()).unwrap_or(u32::MAX)
    }

    /// Checks that the values are usable.
    pub fn validate(&self) -> Result<(), RpcError> {
        if self.call_timeout.is_zero() {
            return Err(RpcError::invalid_configuration("call timeout must be non-zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(RpcError::invalid_configuration("connect timeout must be non-zero"));
        }
        if !(MIN_RUNTIME_VERSION..=RUNTIME_VERSION).contains(&self.runtime_version) {
            return Err(RpcError::invalid_configuration(format!(
                "runtime version {} outside {MIN_RUNTIME_VERSION}..={RUNTIME_VERSION}",
                self.runtime_version
            )));
        }
        if !self.ping_back_interval.is_zero() && self.ping_back_interval < Duration::from_millis(1) {
            return Err(RpcError::invalid_configuration(
                "ping-back interval must be at least 1 ms",
            ));
        }
        if self.message_filters.len() > u8::MAX as usize {
            return Err(RpcError::invalid_configuration("too many message filters"));
        }
        Ok(())
    }
}
