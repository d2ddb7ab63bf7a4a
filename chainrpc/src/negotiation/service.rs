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

//! Server side of filter negotiation.

use super::{ControlRequest, ControlResponse, NegotiationError, TransportProtocol};
use crate::filter::{Filter, FilterId, FilterRegistry};
use std::fmt;

#[cfg(feature = "observability")]
use tracing::debug;

/// Filters accepted for a session, not yet installed.
pub struct FilterSelection {
    /// New filter instances, outermost first.
    pub filters: Vec<Box<dyn Filter>>,
    /// Protocol the sequence implements, `None` if it matched none.
    pub protocol: Option<TransportProtocol>,
    /// Whether the sequence starts with stateful compression.
    pub compression: bool,
}

impl FilterSelection {
    /// Ids of the selected filters.
    pub fn filter_ids(&self) -> Vec<FilterId> {
        self.filters.iter().map(|f| f.filter_id()).collect()
    }
}

impl fmt::Debug for FilterSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSelection")
            .field("filters", &self.filter_ids())
            .field("protocol", &self.protocol)
            .field("compression", &self.compression)
            .finish()
    }
}

/// Answers transport filter requests.
///
/// Requests are checked in order: every id must have a factory, the
/// sequence's protocol must be supported (an empty supported list accepts
/// everything), and the session's filters must not be locked.
#[derive(Debug, Clone, Default)]
pub struct FilterService {
    registry: FilterRegistry,
    supported_protocols: Vec<TransportProtocol>,
}

impl FilterService {
    /// Creates a service building filters through `registry`.
    pub fn new(registry: FilterRegistry) -> Self {
        Self {
            registry,
            supported_protocols: Vec::new(),
        }
    }

    /// Restricts the accepted protocols.
    #[must_use]
    pub fn with_supported_protocols(mut self, protocols: Vec<TransportProtocol>) -> Self {
        self.supported_protocols = protocols;
        self
    }

    /// The registry used to build filters.
    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// Accepted protocols; empty means all.
    pub fn supported_protocols(&self) -> &[TransportProtocol] {
        &self.supported_protocols
    }

    /// Validates a request for `ids` and builds the filters.
    pub fn request_transport_filters(
        &self,
        ids: &[FilterId],
        locked: bool,
    ) -> Result<FilterSelection, NegotiationError> {
        let filters = ids
            .iter()
            .map(|&id| {
                self.registry
                    .create_filter(id)
                    .map_err(|_| NegotiationError::UnknownFilter { id })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (protocol, compression) = TransportProtocol::classify(ids);
        let supported = self.supported_protocols.is_empty()
            || protocol.is_some_and(|p| self.supported_protocols.contains(&p));
        if !supported {
            return Err(NegotiationError::UnsupportedTransportProtocol {
                protocol: protocol.map_or("unspecified", TransportProtocol::name).to_string(),
            });
        }
        if locked {
            return Err(NegotiationError::FiltersLocked);
        }

        #[cfg(feature = "observability")]
        debug!(filters = ?ids, ?protocol, compression, "transport filters accepted");
        Ok(FilterSelection {
            filters,
            protocol,
            compression,
        })
    }

    /// Handles a decoded control request. The selection is returned only
    /// when the request was accepted.
    pub fn handle(
        &self,
        request: &ControlRequest,
        locked: bool,
    ) -> (ControlResponse, Option<FilterSelection>) {
        match request {
            ControlRequest::RequestTransportFilters { filter_ids } => {
                let ids: Vec<FilterId> = filter_ids.iter().map(|&id| FilterId::from(id)).collect();
                match self.request_transport_filters(&ids, locked) {
                    Ok(selection) => (ControlResponse::accepted(), Some(selection)),
                    Err(error) => (ControlResponse::rejected(&error), None),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framing::RemoteErrorCode;

    #[test]
    fn test_unknown_filter() {
        let service = FilterService::new(FilterRegistry::with_defaults());
        assert!(matches!(
            service.request_transport_filters(&[FilterId::SspiNtlm], false),
            Err(NegotiationError::UnknownFilter {
                id: FilterId::SspiNtlm
            })
        ));
    }

    #[test]
    fn test_unsupported_protocol() {
        let service = FilterService::new(FilterRegistry::with_defaults())
            .with_supported_protocols(vec![TransportProtocol::Ssl]);
        let error = service
            .request_transport_filters(&[FilterId::Xor], false)
            .unwrap_err();
        assert!(matches!(
            error,
            NegotiationError::UnsupportedTransportProtocol { ref protocol } if protocol == "unspecified"
        ));
        assert!(service.request_transport_filters(&[], false).is_err());
    }

    #[test]
    fn test_locked_filters() {
        let service = FilterService::new(FilterRegistry::with_defaults());
        let request = ControlRequest::request_transport_filters(&[FilterId::Xor]);
        let (response, selection) = service.handle(&request, true);
        assert_eq!(response.code(), RemoteErrorCode::FiltersLocked);
        assert!(selection.is_none());
    }

    #[test]
    fn test_accepted_selection() {
        let service = FilterService::new(FilterRegistry::with_defaults());
        let request = ControlRequest::request_transport_filters(&[FilterId::Xor]);
        let (response, selection) = service.handle(&request, false);
        assert_eq!(response, ControlResponse::accepted());
        let selection = selection.unwrap();
        assert_eq!(selection.filter_ids(), vec![FilterId::Xor]);
        assert_eq!(selection.protocol, None);
        assert!(!selection.compression);
    }
}
