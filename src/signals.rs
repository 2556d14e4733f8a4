// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Intra-process signal bus. Emitters push typed payloads; the compositor
//! drains the queue after every dispatch and routes each signal to the
//! subsystems that subscribe to it. Queue-then-drain keeps dispatch
//! re-entrancy free: a handler that emits only extends the current drain.

use std::collections::VecDeque;

use crate::registry::Handle;
use crate::registry::Resource;
use crate::session::input::InputEvent;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceSignalKind {
    Created,
    Destroyed,
}

#[derive(Debug, Clone)]
pub enum Signal {
    /// Session gained or lost the seat (VT switch, logind pause/resume).
    Activate {
        active: bool,
        vt: Option<u32>,
    },
    /// Orderly shutdown was requested.
    Terminate,
    /// The protocol socket is up and the embedder may start clients.
    Ready,
    Surface {
        surface: Resource,
        kind: SurfaceSignalKind,
    },
    /// Keyboard focus moved; policy reacts (XWM activation, cursor).
    Focus {
        view: Handle,
        focused: bool,
    },
    /// A decoded event from an input device.
    Input(InputEvent),
    /// An output's backend surface was attached or detached; the session
    /// layer checks whether a VT switch handshake can be acknowledged.
    OutputSurface {
        output: Handle,
    },
    /// Device topology changed; backends re-enumerate outputs.
    Hotplug,
    Xwayland {
        available: bool,
    },
    /// The current selection source changed.
    SelectionChanged,
}

#[derive(Debug, Default)]
pub struct SignalBus {
    queue: VecDeque<Signal>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, signal: Signal) {
        self.queue.push_back(signal);
    }

    pub fn pop(&mut self) -> Option<Signal> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut bus = SignalBus::new();
        bus.emit(Signal::Terminate);
        bus.emit(Signal::Ready);
        assert!(matches!(bus.pop(), Some(Signal::Terminate)));
        assert!(matches!(bus.pop(), Some(Signal::Ready)));
        assert!(bus.pop().is_none());
    }
}
