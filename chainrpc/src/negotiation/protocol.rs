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

//! Transport protocols and the filter sequences that implement them.

use crate::filter::FilterId;
use std::fmt;

/// Security protocol applied to a connection through transport filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportProtocol {
    /// No encryption.
    #[default]
    Clear,
    /// TLS.
    Ssl,
    /// NTLM.
    Ntlm,
    /// Kerberos.
    Kerberos,
    /// SPNEGO.
    Negotiate,
}

impl TransportProtocol {
    /// The encryption filter implementing this protocol, if any.
    pub fn filter_id(self) -> Option<FilterId> {
        match self {
            TransportProtocol::Clear => None,
            TransportProtocol::Ssl => Some(FilterId::SslEncryption),
            TransportProtocol::Ntlm => Some(FilterId::SspiNtlm),
            TransportProtocol::Kerberos => Some(FilterId::SspiKerberos),
            TransportProtocol::Negotiate => Some(FilterId::SspiNegotiate),
        }
    }

    /// The protocol an encryption filter implements. Schannel counts as
    /// TLS.
    pub fn from_filter_id(id: FilterId) -> Option<Self> {
        match id {
            FilterId::SslEncryption | FilterId::SspiSchannel => Some(TransportProtocol::Ssl),
            FilterId::SspiNtlm => Some(TransportProtocol::Ntlm),
            FilterId::SspiKerberos => Some(TransportProtocol::Kerberos),
            FilterId::SspiNegotiate => Some(TransportProtocol::Negotiate),
            _ => None,
        }
    }

    /// Classifies a transport filter sequence.
    ///
    /// A leading stateful zlib filter means compression; the filter after it
    /// (or the first filter without it) decides the protocol. Returns
    /// `None` when that filter is not an encryption filter.
    ///
    /// ```rust
    /// use chainrpc::filter::FilterId;
    /// use chainrpc::negotiation::TransportProtocol;
    ///
    /// assert_eq!(
    ///     TransportProtocol::classify(&[FilterId::ZlibStateful, FilterId::SslEncryption]),
    ///     (Some(TransportProtocol::Ssl), true)
    /// );
    /// assert_eq!(TransportProtocol::classify(&[]), (Some(TransportProtocol::Clear), false));
    /// assert_eq!(TransportProtocol::classify(&[FilterId::Xor]), (None, false));
    /// ```
    pub fn classify(ids: &[FilterId]) -> (Option<Self>, bool) {
        let (compression, rest) = match ids.split_first() {
            Some((FilterId::ZlibStateful, rest)) => (true, rest),
            _ => (false, ids),
        };
        let protocol = match rest.first() {
            None => Some(TransportProtocol::Clear),
            Some(&id) => Self::from_filter_id(id),
        };
        (protocol, compression)
    }

    /// Short name used in logs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            TransportProtocol::Clear => "clear",
            TransportProtocol::Ssl => "ssl",
            TransportProtocol::Ntlm => "ntlm",
            TransportProtocol::Kerberos => "kerberos",
            TransportProtocol::Negotiate => "negotiate",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transport filter ids for `protocol`, with stateful zlib first when
/// `compression` is set.
pub fn transport_filter_ids(protocol: TransportProtocol, compression: bool) -> Vec<FilterId> {
    let mut ids = Vec::with_capacity(2);
    if compression {
        ids.push(FilterId::ZlibStateful);
    }
    ids.extend(protocol.filter_id());
    ids
}
