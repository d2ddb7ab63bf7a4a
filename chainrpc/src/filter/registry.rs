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

//! Building filters from their wire ids.
//!
//! A receiver learns which filters a peer used from ids alone: the
//! filtered-payload header lists them, and a filter negotiation request asks
//! for them. A [`FilterRegistry`] turns those ids back into filter instances.

use super::{Filter, FilterChain, FilterError, FilterId, IdentityFilter, XorFilter};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Creates fresh instances of one filter type.
pub trait FilterFactory: Send + Sync {
    /// Id of the filters this factory creates.
    fn filter_id(&self) -> FilterId;

    /// Creates a new filter in its initial state.
    fn create(&self) -> Result<Box<dyn Filter>, FilterError>;
}

struct FnFactory<F> {
    id: FilterId,
    make: F,
}

impl<F> FilterFactory for FnFactory<F>
where
    F: Fn() -> Box<dyn Filter> + Send + Sync,
{
    fn filter_id(&self) -> FilterId {
        self.id
    }

    fn create(&self) -> Result<Box<dyn Filter>, FilterError> {
        Ok((self.make)())
    }
}

/// Builds [`TlsFilter`](super::TlsFilter)s from a shared configuration.
#[cfg(feature = "tls")]
#[derive(Debug, Clone)]
pub struct TlsFilterFactory {
    config: super::TlsFilterConfig,
}

#[cfg(feature = "tls")]
impl TlsFilterFactory {
    /// Creates a factory for `config`.
    pub fn new(config: super::TlsFilterConfig) -> Self {
        Self { config }
    }
}

#[cfg(feature = "tls")]
impl FilterFactory for TlsFilterFactory {
    fn filter_id(&self) -> FilterId {
        FilterId::SslEncryption
    }

    fn create(&self) -> Result<Box<dyn Filter>, FilterError> {
        Ok(Box::new(super::TlsFilter::new(self.config.clone())))
    }
}

/// Map from filter id to factory.
///
/// # Examples
///
/// ```rust
/// use chainrpc::filter::{FilterId, FilterRegistry};
///
/// let registry = FilterRegistry::with_defaults();
/// let chain = registry.create_chain(&[FilterId::Identity]).unwrap();
/// assert_eq!(chain.filter_ids(), vec![FilterId::Identity]);
///
/// assert!(registry.create_chain(&[FilterId::SspiNtlm]).is_err());
/// ```
#[derive(Clone, Default)]
pub struct FilterRegistry {
    factories: HashMap<FilterId, Arc<dyn FilterFactory>>,
}

impl FilterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the filters that need no configuration:
    /// identity, XOR with its default key, and both zlib flavors when
    /// compression is built in.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_fn(FilterId::Identity, || Box::new(IdentityFilter::new()));
        registry.register_fn(FilterId::Xor, || Box::new(XorFilter::new(XorFilter::DEFAULT_KEY)));
        #[cfg(feature = "compression")]
        {
            use super::ZlibFilter;
            registry.register_fn(FilterId::ZlibStateless, || Box::new(ZlibFilter::stateless()));
            registry.register_fn(FilterId::ZlibStateful, || Box::new(ZlibFilter::stateful()));
        }
        registry
    }

    /// Registers `factory`, replacing any factory with the same id.
    pub fn register(&mut self, factory: Arc<dyn FilterFactory>) -> &mut Self {
        self.factories.insert(factory.filter_id(), factory);
        self
    }

    /// Registers a closure as the factory for `id`.
    pub fn register_fn<F>(&mut self, id: FilterId, make: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnFactory { id, make }))
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn FilterFactory>) -> Self {
        self.register(factory);
        self
    }

    /// Returns `true` if `id` has a factory.
    pub fn contains(&self, id: FilterId) -> bool {
        self.factories.contains_key(&id)
    }

    /// Registered ids, in no particular order.
    pub fn ids(&self) -> Vec<FilterId> {
        self.factories.keys().copied().collect()
    }

    /// Creates one filter.
    pub fn create_filter(&self, id: FilterId) -> Result<Box<dyn Filter>, FilterError> {
        self.factories
            .get(&id)
            .ok_or(FilterError::UnknownFilter { id })?
            .create()
    }

    /// Creates a filter for each id, in order.
    pub fn create_filters(&self, ids: &[FilterId]) -> Result<Vec<Box<dyn Filter>>, FilterError> {
        ids.iter().map(|&id| self.create_filter(id)).collect()
    }

    /// Creates and links a chain for `ids`.
    pub fn create_chain(&self, ids: &[FilterId]) -> Result<FilterChain, FilterError> {
        Ok(FilterChain::connect_filters(self.create_filters(ids)?))
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
