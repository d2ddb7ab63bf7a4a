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

//! Server sessions.
//!
//! A [`ServerSession`] owns one accepted connection and answers the
//! requests a client stub sends over it:
//!
//! ```text
//! raw transport -> wire filters -> transport filters -> frames
//!     -> message filters -> request header -> Dispatcher -> RequestHandler
//! ```
//!
//! Responses travel back through the same message filters the request
//! used. Out-of-band requests negotiate transport filters through a
//! [`FilterService`](crate::negotiation::FilterService); the new filters
//! replace the old ones once the answer has been written.
//!
//! [`Server`] runs the accept loop and spawns one session task per
//! connection.

mod config;
mod handler;
mod server;

pub use config::SessionConfig;
pub use handler::{Dispatcher, HandlerError, Request, RequestHandler, Response, SessionContext};
pub use server::{Server, ServerSession};
