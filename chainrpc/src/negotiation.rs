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

//! Runtime negotiation of transport filters.
//!
//! A client that wants compression or encryption on an existing connection
//! sends an out-of-band control request naming the filter ids it will
//! install. The server builds the same filters through its
//! [`FilterService`], answers, and swaps its chain once the answer has been
//! written. Both sides start the new filters from a reset state.
//!
//! # Examples
//!
//! ```rust
//! use chainrpc::filter::{FilterId, FilterRegistry};
//! use chainrpc::negotiation::{FilterService, TransportProtocol};
//!
//! let service = FilterService::new(FilterRegistry::with_defaults());
//! let selection = service
//!     .request_transport_filters(&[FilterId::ZlibStateful], false)
//!     .unwrap();
//! assert_eq!(selection.protocol, Some(TransportProtocol::Clear));
//! assert!(selection.compression);
//! ```

mod error;
mod messages;
mod protocol;
mod service;

pub use error::NegotiationError;
pub use messages::{ControlRequest, ControlResponse};
pub use protocol::{TransportProtocol, transport_filter_ids};
pub use service::{FilterSelection, FilterService};
