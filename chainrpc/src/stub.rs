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

//! Client stubs: the call state machine.
//!
//! A stub turns a method call into a request frame, pushes it through the
//! connection's filter chain and waits for the answer:
//!
//! 1. **Connecting**: only when the connection is down
//! 2. **NegotiatingFilters**: only when the wanted transport filters differ
//!    from the installed ones
//! 3. **Sending**
//! 4. **Receiving**: twoway calls only, watching ping-backs
//!
//! All phases share one deadline. A version mismatch answer is retried once
//! with the server's versions; every other error ends the call.
//!
//! [`ClientStub`] blocks the calling thread. [`AsyncClientStub`] runs on
//! Tokio and can hand results to a callback instead of returning them.
//!
//! # Examples
//!
//! ```rust
//! use chainrpc::stub::{CallPhase, StubConfig, RUNTIME_VERSION};
//!
//! let config = StubConfig::default();
//! assert_eq!(config.runtime_version, RUNTIME_VERSION);
//! assert!(CallPhase::Done.is_terminal());
//! ```

mod async_stub;
mod batch;
mod config;
mod deadline;
mod machine;
mod progress;
mod sync_stub;

pub use async_stub::AsyncClientStub;
pub use config::{CallSemantics, MIN_RUNTIME_VERSION, RUNTIME_VERSION, StubConfig};
pub use deadline::{Deadline, generate_timeout_ms};
pub use machine::{CallPhase, CancelHandle};
pub use progress::{ClientProgress, ProgressAction, ProgressInfo, ProgressTrigger};
pub use sync_stub::ClientStub;
