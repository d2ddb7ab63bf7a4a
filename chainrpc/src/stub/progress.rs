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

//! Progress callbacks for blocking calls.

use super::CallPhase;
use crate::RpcError;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// When a [`ClientProgress`] callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressTrigger {
    /// On every phase change.
    Event,
    /// Periodically while the call waits.
    Timer,
}

/// What the callback wants the call to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressAction {
    /// Keep going.
    Continue,
    /// Abort the call with [`RpcError::Cancelled`].
    Cancel,
}

/// What a callback is told.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressInfo {
    /// Current phase of the call.
    pub phase: CallPhase,
    /// Time since the call started.
    pub elapsed: Duration,
}

type ProgressCallback = dyn Fn(&ProgressInfo) -> ProgressAction + Send + Sync;

/// A progress callback attached to a
/// [`ClientStub`](super::ClientStub).
///
/// # Examples
///
/// ```rust
/// use chainrpc::stub::{ClientProgress, ProgressAction};
/// use std::time::Duration;
///
/// let progress = ClientProgress::on_timer(Duration::from_millis(250), |info| {
///     if info.elapsed > Duration::from_secs(60) {
///         ProgressAction::Cancel
///     } else {
///         ProgressAction::Continue
///     }
/// });
/// assert_eq!(progress.interval(), Duration::from_millis(250));
/// ```
#[derive(Clone)]
pub struct ClientProgress {
    trigger: ProgressTrigger,
    interval: Duration,
    callback: Arc<ProgressCallback>,
}

impl ClientProgress {
    /// Runs `callback` on every phase change.
    pub fn on_event<F>(callback: F) -> Self
    where
        F: Fn(&ProgressInfo) -> ProgressAction + Send + Sync + 'static,
    {
        Self {
            trigger: ProgressTrigger::Event,
            interval: Duration::ZERO,
            callback: Arc::new(callback),
        }
    }

    /// Runs `callback` every `interval` while the call waits. The interval
    /// is at least one millisecond.
    pub fn on_timer<F>(interval: Duration, callback: F) -> Self
    where
        F: Fn(&ProgressInfo) -> ProgressAction + Send + Sync + 'static,
    {
        Self {
            trigger: ProgressTrigger::Timer,
            interval: interval.max(Duration::from_millis(1)),
            callback: Arc::new(callback),
        }
    }

    /// When the callback runs.
    pub fn trigger(&self) -> ProgressTrigger {
        self.trigger
    }

    /// Timer period; zero for event callbacks.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn notify(&self, info: &ProgressInfo) -> ProgressAction {
        (self.callback)(info)
    }
}

impl fmt::Debug for ClientProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientProgress")
            .field("trigger", &self.trigger)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// Runs a [`ClientProgress`] during one call.
#[derive(Debug, Default)]
pub(crate) struct ProgressTracker {
    progress: Option<ClientProgress>,
    started: Option<Instant>,
    next_tick: Option<Instant>,
}

impl ProgressTracker {
    pub(crate) fn set(&mut self, progress: Option<ClientProgress>) {
        self.progress = progress;
        self.next_tick = None;
    }

    pub(crate) fn progress(&self) -> Option<&ClientProgress> {
        self.progress.as_ref()
    }

    pub(crate) fn start(&mut self) {
        let now = Instant::now();
        self.started = Some(now);
        self.next_tick = self
            .progress
            .as_ref()
            .filter(|p| p.trigger == ProgressTrigger::Timer)
            .map(|p| now + p.interval);
    }

    /// When the timer callback is next due.
    pub(crate) fn next_wake(&self) -> Option<Instant> {
        self.next_tick
    }

    fn info(&self, phase: CallPhase) -> ProgressInfo {
        ProgressInfo {
            phase,
            elapsed: self.started.map_or(Duration::ZERO, |s| s.elapsed()),
        }
    }

    fn run(&self, progress: &ClientProgress, phase: CallPhase) -> Result<(), RpcError> {
        match progress.notify(&self.info(phase)) {
            ProgressAction::Continue => Ok(()),
            ProgressAction::Cancel => Err(RpcError::Cancelled),
        }
    }

    /// Reports a phase change to an event callback.
    pub(crate) fn on_phase(&self, phase: CallPhase) -> Result<(), RpcError> {
        match &self.progress {
            Some(p) if p.trigger == ProgressTrigger::Event => self.run(p, phase),
            _ => Ok(()),
        }
    }

    /// Runs a timer callback that has come due.
    pub(crate) fn poll(&mut self, phase: CallPhase) -> Result<(), RpcError> {
        let (Some(progress), Some(due)) = (&self.progress, self.next_tick) else {
            return Ok(());
        };
        let now = Instant::now();
        if now < due {
            return Ok(());
        }
        let interval = progress.interval;
        self.run(progress, phase)?;
        self.next_tick = Some(now + interval);
        Ok(())
    }
}
