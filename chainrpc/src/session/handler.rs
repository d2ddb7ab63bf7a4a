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

//! Request handlers and the table that routes requests to them.

use crate::buffer::ByteBuffer;
use crate::framing::RemoteErrorCode;
use crate::negotiation::TransportProtocol;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug)]
struct SessionShared {
    id: Uuid,
    filters_locked: AtomicBool,
    protocol: Mutex<Option<TransportProtocol>>,
}

/// A handle on the session a request arrived on.
///
/// Handlers use it to lock the transport filters once a client has
/// authenticated, so a later request cannot swap them out.
#[derive(Debug, Clone)]
pub struct SessionContext {
    shared: Arc<SessionShared>,
}

impl SessionContext {
    pub(crate) fn new() -> Self {
        Self {
            shared: Arc::new(SessionShared {
                id: Uuid::new_v4(),
                filters_locked: AtomicBool::new(false),
                protocol: Mutex::new(None),
            }),
        }
    }

    /// Identifies the session in logs.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Rejects every further transport filter request with
    /// [`FiltersLocked`](crate::negotiation::NegotiationError::FiltersLocked).
    pub fn lock_transport_filters(&self) {
        self.shared.filters_locked.store(true, Ordering::Release);
    }

    /// Allows transport filter requests again.
    pub fn unlock_transport_filters(&self) {
        self.shared.filters_locked.store(false, Ordering::Release);
    }

    /// Returns `true` while transport filter requests are refused.
    pub fn transport_filters_locked(&self) -> bool {
        self.shared.filters_locked.load(Ordering::Acquire)
    }

    /// Protocol of the negotiated transport filters. `None` until the client
    /// negotiates, or when its filters matched no known protocol.
    pub fn transport_protocol(&self) -> Option<TransportProtocol> {
        *self.shared.protocol.lock()
    }

    pub(crate) fn set_transport_protocol(&self, protocol: Option<TransportProtocol>) {
        *self.shared.protocol.lock() = protocol;
    }
}

/// A decoded call request.
#[derive(Debug, Clone)]
pub struct Request {
    /// Name of the target object
    pub target: String,
    /// Method to invoke
    pub method_id: u32,
    /// No response is sent for oneway calls
    pub oneway: bool,
    /// Runtime version the client speaks
    pub runtime_version: u32,
    /// Archive version the client speaks
    pub archive_version: u32,
    /// Opaque bytes from the client
    pub user_data: Vec<u8>,
    /// Serialized arguments
    pub payload: ByteBuffer,
    /// The session the request arrived on
    pub session: SessionContext,
}

/// A successful call result.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Serialized return value
    pub payload: Vec<ByteBuffer>,
    /// Opaque bytes for the client
    pub user_data: Vec<u8>,
}

impl Response {
    /// A response carrying `payload`.
    pub fn new(payload: impl Into<ByteBuffer>) -> Self {
        Self {
            payload: vec![payload.into()],
            user_data: Vec::new(),
        }
    }

    /// Attaches user data.
    #[must_use]
    pub fn with_user_data(mut self, user_data: Vec<u8>) -> Self {
        self.user_data = user_data;
        self
    }
}

/// A failed call.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// The method raised an application exception.
    #[error("exception: {message}")]
    Exception {
        /// Exception text
        message: String,
    },

    /// The call failed with a specific error code.
    #[error("remote error {code:?}: {message}")]
    Remote {
        /// Code sent to the client
        code: RemoteErrorCode,
        /// Error text
        message: String,
    },
}

impl HandlerError {
    /// An application exception.
    pub fn exception(message: impl Into<String>) -> Self {
        HandlerError::Exception {
            message: message.into(),
        }
    }

    /// An application error for a method the target does not have.
    pub fn unknown_method(method_id: u32) -> Self {
        HandlerError::Remote {
            code: RemoteErrorCode::Application,
            message: format!("unknown method {method_id}"),
        }
    }
}

/// Serves the calls made on one target.
///
/// # Examples
///
/// ```rust
/// use async_trait::async_trait;
/// use chainrpc::session::{HandlerError, Request, RequestHandler, Response};
///
/// struct Echo;
///
/// #[async_trait]
/// impl RequestHandler for Echo {
///     async fn handle(&self, request: Request) -> Result<Response, HandlerError> {
///         match request.method_id {
///             0 => Ok(Response::new(request.payload)),
///             other => Err(HandlerError::unknown_method(other)),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    /// Runs one call.
    async fn handle(&self, request: Request) -> Result<Response, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> RequestHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
{
    async fn handle(&self, request: Request) -> Result<Response, HandlerError> {
        (self.0)(request).await
    }
}

/// Maps target names to handlers. Clones share the table.
///
/// # Examples
///
/// ```rust
/// use chainrpc::session::{Dispatcher, Response};
///
/// let dispatcher = Dispatcher::new()
///     .bind_fn("Echo", |request| async move { Ok(Response::new(request.payload)) });
/// assert!(dispatcher.contains("Echo"));
/// assert!(!dispatcher.contains("Calculator"));
/// ```
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: Arc<parking_lot::RwLock<HashMap<String, Arc<dyn RequestHandler>>>>,
}

impl Dispatcher {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` to `target`, replacing any earlier binding.
    #[must_use]
    pub fn bind(self, target: impl Into<String>, handler: impl RequestHandler) -> Self {
        self.insert(target, Arc::new(handler));
        self
    }

    /// Binds a closure to `target`.
    #[must_use]
    pub fn bind_fn<F, Fut>(self, target: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, HandlerError>> + Send + 'static,
    {
        self.bind(target, FnHandler(handler))
    }

    /// Binds `handler` to `target` on a shared table.
    pub fn insert(&self, target: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.handlers.write().insert(target.into(), handler);
    }

    /// Removes the binding of `target`.
    pub fn remove(&self, target: &str) -> bool {
        self.handlers.write().remove(target).is_some()
    }

    /// Returns `true` if `target` has a handler.
    pub fn contains(&self, target: &str) -> bool {
        self.handlers.read().contains_key(target)
    }

    /// The handler bound to `target`.
    pub fn get(&self, target: &str) -> Option<Arc<dyn RequestHandler>> {
        self.handlers.read().get(target).cloned()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut targets: Vec<String> = self.handlers.read().keys().cloned().collect();
        targets.sort();
        f.debug_struct("Dispatcher").field("targets", &targets).finish()
    }
}
