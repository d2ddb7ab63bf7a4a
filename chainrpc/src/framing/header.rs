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

//! The filtered-payload header and message filtering.
//!
//! When a message is run through message filters (per-message compression
//! or encryption), the receiver must know which filters to undo and how long
//! the original message was. The sender states both in a header placed in
//! front of the filtered bytes:
//!
//! ```text
//! +------------+---------+-------+-----------+------------+-------------------+
//! | descriptor | version | count | ids       | legacy (0) | unfiltered length |
//! | 1 byte (3) | 1 byte  | 1 byte| count B   | 4 bytes LE | 4 bytes LE        |
//! +------------+---------+-------+-----------+------------+-------------------+
//! ```
//!
//! A message sent without filters has no header at all.

use super::{FramingError, LENGTH_PREFIX_SIZE, MessageDescriptor};
use crate::buffer::{ByteBuffer, concat_buffers, total_length};
use crate::filter::{
    DEFAULT_MAX_MESSAGE_LENGTH, FilterChain, FilterId, FilterRegistry, filter_data, unfilter_data,
};

#[cfg(feature = "observability")]
use tracing::{debug, instrument};

/// Header naming the filters applied to a message.
///
/// # Examples
///
/// ```rust
/// use chainrpc::filter::FilterId;
/// use chainrpc::framing::FilteredPayloadHeader;
///
/// let header = FilteredPayloadHeader::new(vec![FilterId::ZlibStateless], 5);
/// let bytes = header.encode().unwrap();
/// let (decoded, consumed) = FilteredPayloadHeader::decode(&bytes).unwrap();
/// assert_eq!(decoded, header);
/// assert_eq!(consumed, bytes.len());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredPayloadHeader {
    /// Header layout version.
    pub version: u8,
    /// Filters applied, application side first.
    pub filter_ids: Vec<FilterId>,
    /// Length of the message before filtering.
    pub unfiltered_length: u32,
}

impl FilteredPayloadHeader {
    /// Current header layout version.
    pub const VERSION: u8 = 0;

    /// Creates a header for the current layout version.
    pub fn new(filter_ids: Vec<FilterId>, unfiltered_length: u32) -> Self {
        Self {
            version: Self::VERSION,
            filter_ids,
            unfiltered_length,
        }
    }

    /// Encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        3 + self.filter_ids.len() + 8
    }

    /// Encodes the header. Fails if more than 255 filters are listed.
    pub fn encode(&self) -> Result<Vec<u8>, FramingError> {
        let count = u8::try_from(self.filter_ids.len())
            .map_err(|_| FramingError::decoding("more than 255 message filters"))?;

        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.push(MessageDescriptor::FilteredPayload as u8);
        bytes.push(self.version);
        bytes.push(count);
        bytes.extend(self.filter_ids.iter().map(|&id| u8::from(id)));
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&self.unfiltered_length.to_le_bytes());
        Ok(bytes)
    }

    /// Decodes a header from the start of `bytes`, returning it with the
    /// number of bytes it occupied.
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize), FramingError> {
        let [descriptor, version, count, rest @ ..] = bytes else {
            return Err(FramingError::decoding("truncated filtered-payload header"));
        };
        if *descriptor != MessageDescriptor::FilteredPayload as u8 {
            return Err(FramingError::decoding(format!(
                "expected filtered-payload descriptor, found {descriptor}"
            )));
        }
        if *version != Self::VERSION {
            return Err(FramingError::UnsupportedHeaderVersion { version: *version });
        }

        let count = *count as usize;
        if rest.len() < count + 8 {
            return Err(FramingError::decoding("truncated filtered-payload header"));
        }
        let filter_ids = rest[..count].iter().map(|&id| FilterId::from(id)).collect();
        // The four bytes after the ids are a legacy field, ignored on decode.
        let length_at = count + 4;
        let unfiltered_length = u32::from_le_bytes([
            rest[length_at],
            rest[length_at + 1],
            rest[length_at + 2],
            rest[length_at + 3],
        ]);

        Ok((
            Self {
                version: *version,
                filter_ids,
                unfiltered_length,
            },
            3 + count + 8,
        ))
    }
}

/// Runs an encoded message through the message filters in `chain`.
///
/// An empty chain returns `payload` untouched, without a header. Otherwise
/// the filtered bytes are returned behind a [`FilteredPayloadHeader`]. The
/// header buffer keeps room for a length prefix in its left margin.
#[cfg_attr(feature = "observability", instrument(skip_all, fields(filters = chain.len())))]
pub fn encode_message(
    payload: Vec<ByteBuffer>,
    chain: &mut FilterChain,
) -> Result<Vec<ByteBuffer>, FramingError> {
    if chain.is_empty() {
        return Ok(payload);
    }

    let unfiltered_length = u32::try_from(total_length(&payload))
        .map_err(|_| FramingError::decoding("message longer than 4 GB"))?;
    chain.reset_state();
    let filtered = filter_data(&payload, chain)?;

    let header = FilteredPayloadHeader::new(chain.filter_ids(), unfiltered_length).encode()?;
    let mut buffers = Vec::with_capacity(filtered.len() + 1);
    buffers.push(ByteBuffer::with_left_margin(LENGTH_PREFIX_SIZE, &header));
    buffers.extend(filtered);
    Ok(buffers)
}

/// Undoes the message filters of a received frame.
///
/// The header's filter ids must equal `chain`'s exactly. A frame without a
/// header is only accepted when `chain` is empty. A header naming an
/// unfiltered length above `chain.max_message_length()` is rejected before
/// any filter runs.
pub fn decode_message(frame: ByteBuffer, chain: &mut FilterChain) -> Result<ByteBuffer, FramingError> {
    if frame.first() != Some(&(MessageDescriptor::FilteredPayload as u8)) {
        if !chain.is_empty() {
            return Err(FramingError::PayloadFilterMismatch {
                expected: chain.filter_ids(),
                actual: Vec::new(),
            });
        }
        return Ok(frame);
    }

    let (header, consumed) = FilteredPayloadHeader::decode(&frame)?;
    let expected = chain.filter_ids();
    if header.filter_ids != expected {
        return Err(FramingError::PayloadFilterMismatch {
            expected,
            actual: header.filter_ids,
        });
    }
    unfilter(frame.slice_from(consumed), &header, chain)
}

fn unfilter(
    body: ByteBuffer,
    header: &FilteredPayloadHeader,
    chain: &mut FilterChain,
) -> Result<ByteBuffer, FramingError> {
    let length = header.unfiltered_length as usize;
    if length > chain.max_message_length() {
        #[cfg(feature = "observability")]
        debug!(length, max = chain.max_message_length(), "unfiltered length over maximum");
        return Err(FramingError::UnfilteredLengthTooLarge {
            length,
            max: chain.max_message_length(),
        });
    }
    chain.reset_state();
    let buffers = unfilter_data(body, length, chain)?;
    Ok(concat_buffers(&buffers))
}

/// Message filter chains built on demand from the ids peers send.
///
/// A server does not know in advance which message filters a client uses.
/// The cache builds a chain through the [`FilterRegistry`] the first time a
/// combination of ids appears and reuses it while the ids stay the same.
#[derive(Debug)]
pub struct MessageFilterCache {
    registry: FilterRegistry,
    chain: FilterChain,
    max_message_length: usize,
}

impl MessageFilterCache {
    /// Creates a cache resolving ids through `registry`.
    pub fn new(registry: FilterRegistry) -> Self {
        Self {
            registry,
            chain: FilterChain::new(),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
        }
    }

    /// Sets the longest message, after unfiltering, the cache will produce.
    pub fn with_max_message_length(mut self, max_message_length: usize) -> Self {
        self.max_message_length = max_message_length;
        self.chain = FilterChain::new().with_max_message_length(max_message_length);
        self
    }

    /// The registry used to build chains.
    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    fn chain_for(&mut self, ids: &[FilterId]) -> Result<&mut FilterChain, FramingError> {
        if self.chain.filter_ids() != ids {
            #[cfg(feature = "observability")]
            debug!(filters = ?ids, "building message filter chain");
            self.chain = self
                .registry
                .create_chain(ids)?
                .with_max_message_length(self.max_message_length);
        }
        Ok(&mut self.chain)
    }

    /// Decodes `frame`, building whatever chain its header names. Returns
    /// the message and the ids that were undone.
    pub fn decode(&mut self, frame: ByteBuffer) -> Result<(ByteBuffer, Vec<FilterId>), FramingError> {
        if frame.first() != Some(&(MessageDescriptor::FilteredPayload as u8)) {
            return Ok((frame, Vec::new()));
        }
        let (header, consumed) = FilteredPayloadHeader::decode(&frame)?;
        let chain = self.chain_for(&header.filter_ids)?;
        let message = unfilter(frame.slice_from(consumed), &header, chain)?;
        Ok((message, header.filter_ids))
    }

    /// Encodes `payload` with the filters named by `ids`.
    pub fn encode(
        &mut self,
        payload: Vec<ByteBuffer>,
        ids: &[FilterId],
    ) -> Result<Vec<ByteBuffer>, FramingError> {
        let chain = self.chain_for(ids)?;
        encode_message(payload, chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::copy_buffers;
    use crate::filter::{FilterError, XorFilter};

    fn xor_chain() -> FilterChain {
        FilterChain::connect_filters(vec![Box::new(XorFilter::new(XorFilter::DEFAULT_KEY))])
    }

    #[test]
    fn test_header_layout() {
        let header = FilteredPayloadHeader::new(vec![FilterId::ZlibStateless, FilterId::Xor], 300);
        let bytes = header.encode().unwrap();
        assert_eq!(
            bytes,
            vec![3, 0, 2, 3, 101, 0, 0, 0, 0, 0x2C, 0x01, 0, 0]
        );
        assert_eq!(bytes.len(), header.encoded_len());
    }

    #[test]
    fn test_header_rejects_unknown_version() {
        let mut bytes = FilteredPayloadHeader::new(vec![], 1).encode().unwrap();
        bytes[1] = 9;
        assert!(matches!(
            FilteredPayloadHeader::decode(&bytes),
            Err(FramingError::UnsupportedHeaderVersion { version: 9 })
        ));
    }

    #[test]
    fn test_header_rejects_truncation() {
        let bytes = FilteredPayloadHeader::new(vec![FilterId::Xor], 1).encode().unwrap();
        for len in 0..bytes.len() {
            assert!(FilteredPayloadHeader::decode(&bytes[..len]).is_err());
        }
    }

    #[test]
    fn test_empty_chain_adds_no_header() {
        let mut chain = FilterChain::new();
        let encoded = encode_message(vec![ByteBuffer::from("hello")], &mut chain).unwrap();
        assert_eq!(copy_buffers(&encoded), b"hello");

        let decoded = decode_message(ByteBuffer::from("hello"), &mut chain).unwrap();
        assert_eq!(decoded.as_slice(), b"hello");
    }

    #[test]
    fn test_filtered_round_trip() {
        let encoded = encode_message(vec![ByteBuffer::from("hello")], &mut xor_chain()).unwrap();
        let frame = ByteBuffer::from(copy_buffers(&encoded));
        assert_eq!(frame[0], MessageDescriptor::FilteredPayload as u8);
        assert_eq!(frame.len(), 4 + 8 + 5);
        assert_eq!(encoded[0].left_margin(), LENGTH_PREFIX_SIZE);

        let decoded = decode_message(frame, &mut xor_chain()).unwrap();
        assert_eq!(decoded.as_slice(), b"hello");
    }

    #[test]
    fn test_mismatched_chain_is_rejected() {
        let encoded = encode_message(vec![ByteBuffer::from("hello")], &mut xor_chain()).unwrap();
        let frame = ByteBuffer::from(copy_buffers(&encoded));

        let result = decode_message(frame.clone(), &mut FilterChain::new());
        assert!(matches!(
            result,
            Err(FramingError::PayloadFilterMismatch { ref expected, ref actual })
                if expected.is_empty() && actual == &vec![FilterId::Xor]
        ));

        let mut longer = FilterChain::connect_filters(vec![
            Box::new(XorFilter::new(1)),
            Box::new(XorFilter::new(2)),
        ]);
        assert!(matches!(
            decode_message(frame, &mut longer),
            Err(FramingError::PayloadFilterMismatch { .. })
        ));
    }

    #[test]
    fn test_unfiltered_length_over_maximum_is_rejected() {
        let encoded = encode_message(vec![ByteBuffer::from(vec![7u8; 100])], &mut xor_chain()).unwrap();
        let frame = ByteBuffer::from(copy_buffers(&encoded));

        let mut small = xor_chain().with_max_message_length(64);
        assert!(matches!(
            decode_message(frame.clone(), &mut small),
            Err(FramingError::UnfilteredLengthTooLarge { length: 100, max: 64 })
        ));

        let mut exact = xor_chain().with_max_message_length(100);
        assert_eq!(decode_message(frame, &mut exact).unwrap().len(), 100);
    }

    #[test]
    fn test_header_length_mismatch_is_short_transfer() {
        let filtered = filter_data(&[ByteBuffer::from("hello")], &mut xor_chain()).unwrap();
        let mut frame = FilteredPayloadHeader::new(vec![FilterId::Xor], 6).encode().unwrap();
        frame.extend_from_slice(&copy_buffers(&filtered));

        assert!(matches!(
            decode_message(ByteBuffer::from(frame), &mut xor_chain()),
            Err(FramingError::Filter(FilterError::ShortTransfer { expected: 6, actual: 5 }))
        ));
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_cache_bounds_decompressed_length() {
        use crate::filter::ZlibFilter;

        let mut zlib = FilterChain::connect_filters(vec![Box::new(ZlibFilter::stateless())]);
        let encoded = encode_message(vec![ByteBuffer::from(vec![0u8; 1 << 20])], &mut zlib).unwrap();
        let frame = ByteBuffer::from(copy_buffers(&encoded));
        assert!(frame.len() < 64 * 1024);

        let mut cache =
            MessageFilterCache::new(FilterRegistry::with_defaults()).with_max_message_length(64 * 1024);
        assert!(matches!(
            cache.decode(frame.clone()),
            Err(FramingError::UnfilteredLengthTooLarge { length, max: 65536 }) if length == 1 << 20
        ));

        let mut roomy = MessageFilterCache::new(FilterRegistry::with_defaults());
        let (message, _) = roomy.decode(frame).unwrap();
        assert_eq!(message.len(), 1 << 20);
    }

    #[test]
    fn test_unfiltered_frame_needs_empty_chain() {
        let result = decode_message(ByteBuffer::from("\x01plain"), &mut xor_chain());
        assert!(matches!(result, Err(FramingError::PayloadFilterMismatch { .. })));
    }

    #[test]
    fn test_cache_builds_chain_from_header() {
        let encoded = encode_message(vec![ByteBuffer::from("cached")], &mut xor_chain()).unwrap();
        let mut cache = MessageFilterCache::new(FilterRegistry::with_defaults());

        let (message, ids) = cache.decode(ByteBuffer::from(copy_buffers(&encoded))).unwrap();
        assert_eq!(message.as_slice(), b"cached");
        assert_eq!(ids, vec![FilterId::Xor]);

        let reply = cache.encode(vec![ByteBuffer::from("reply")], &ids).unwrap();
        let decoded = decode_message(ByteBuffer::from(copy_buffers(&reply)), &mut xor_chain()).unwrap();
        assert_eq!(decoded.as_slice(), b"reply");
    }

    #[test]
    fn test_cache_rejects_unknown_filter() {
        let header = FilteredPayloadHeader::new(vec![FilterId::SspiNtlm], 3).encode().unwrap();
        let mut cache = MessageFilterCache::new(FilterRegistry::with_defaults());
        assert!(matches!(
            cache.decode(ByteBuffer::from(header)),
            Err(FramingError::Filter(FilterError::UnknownFilter { .. }))
        ));
    }
}
