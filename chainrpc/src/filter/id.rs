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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable on-wire identifier of a filter type.
///
/// Ids travel in the filtered-payload header and in filter negotiation
/// requests, so their numeric values never change. Ids this build does not
/// recognise are kept as [`FilterId::Other`] and rejected later by the
/// registry.
///
/// # Examples
///
/// ```rust
/// use chainrpc::filter::FilterId;
///
/// assert_eq!(u8::from(FilterId::ZlibStateful), 4);
/// assert_eq!(FilterId::from(3), FilterId::ZlibStateless);
/// assert_eq!(FilterId::from(200), FilterId::Other(200));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum FilterId {
    /// Placeholder for "no filter".
    Unknown,
    /// Pass-through filter.
    Identity,
    /// TLS encryption.
    SslEncryption,
    /// zlib, compressor reset on every message.
    ZlibStateless,
    /// zlib, one compression stream per connection.
    ZlibStateful,
    /// SSPI NTLM encryption.
    SspiNtlm,
    /// SSPI Kerberos encryption.
    SspiKerberos,
    /// SSPI Negotiate encryption.
    SspiNegotiate,
    /// SSPI Schannel encryption.
    SspiSchannel,
    /// XOR test filter.
    Xor,
    /// Any id this build does not know.
    Other(u8),
}

impl FilterId {
    /// Returns `true` for the encryption filter ids.
    pub fn is_encryption(self) -> bool {
        matches!(
            self,
            FilterId::SslEncryption
                | FilterId::SspiNtlm
                | FilterId::SspiKerberos
                | FilterId::SspiNegotiate
                | FilterId::SspiSchannel
        )
    }

    /// Returns `true` for the two zlib ids.
    pub fn is_compression(self) -> bool {
        matches!(self, FilterId::ZlibStateless | FilterId::ZlibStateful)
    }

    /// Short name used in logs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            FilterId::Unknown => "unknown",
            FilterId::Identity => "identity",
            FilterId::SslEncryption => "ssl",
            FilterId::ZlibStateless => "zlib-stateless",
            FilterId::ZlibStateful => "zlib-stateful",
            FilterId::SspiNtlm => "ntlm",
            FilterId::SspiKerberos => "kerberos",
            FilterId::SspiNegotiate => "negotiate",
            FilterId::SspiSchannel => "schannel",
            FilterId::Xor => "xor",
            FilterId::Other(_) => "other",
        }
    }
}

impl From<u8> for FilterId {
    fn from(id: u8) -> Self {
        match id {
            0 => FilterId::Unknown,
            1 => FilterId::Identity,
            2 => FilterId::SslEncryption,
            3 => FilterId::ZlibStateless,
            4 => FilterId::ZlibStateful,
            5 => FilterId::SspiNtlm,
            6 => FilterId::SspiKerberos,
            7 => FilterId::SspiNegotiate,
            8 => FilterId::SspiSchannel,
            101 => FilterId::Xor,
            other => FilterId::Other(other),
        }
    }
}

impl From<FilterId> for u8 {
    fn from(id: FilterId) -> Self {
        match id {
            FilterId::Unknown => 0,
            FilterId::Identity => 1,
            FilterId::SslEncryption => 2,
            FilterId::ZlibStateless => 3,
            FilterId::ZlibStateful => 4,
            FilterId::SspiNtlm => 5,
            FilterId::SspiKerberos => 6,
            FilterId::SspiNegotiate => 7,
            FilterId::SspiSchannel => 8,
            FilterId::Xor => 101,
            FilterId::Other(other) => other,
        }
    }
}

impl fmt::Display for FilterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterId::Other(id) => write!(f, "{id}"),
            known => f.write_str(known.name()),
        }
    }
}
