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

//! The input-decoding seam. A platform layer (libinput on DRM, the host
//! compositor or X server on nested backends) decodes device events into
//! [`InputEvent`]s and emits them as `Signal::Input`.

use crate::wire::ButtonState;
use crate::wire::KeyState;
use crate::wire::ScrollAxis;
use crate::wire::TouchEventKind;

/// One decoded input event. Absolute coordinates are normalised to [0, 1]
/// and scaled by the focused output's resolution at dispatch.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum InputEvent {
    Motion {
        time_ms: u32,
        dx: f64,
        dy: f64,
    },
    MotionAbsolute {
        time_ms: u32,
        x: f64,
        y: f64,
    },
    Button {
        time_ms: u32,
        button: u32,
        state: ButtonState,
    },
    Scroll {
        time_ms: u32,
        axis: ScrollAxis,
        amount: f64,
    },
    Key {
        time_ms: u32,
        key: u32,
        state: KeyState,
    },
    Touch {
        time_ms: u32,
        kind: TouchEventKind,
        slot: i32,
        x: f64,
        y: f64,
    },
}

/// A source of decoded input events. The session layer opens and revokes
/// the underlying device fds; implementations only decode.
pub trait InputSource {
    /// Drains everything currently readable.
    fn poll(&mut self) -> Vec<InputEvent>;

    /// Suspend/resume decoding across VT switches.
    fn set_active(&mut self, active: bool);

    /// Readiness fd polled by the event loop, when the source has one.
    fn fd(&self) -> Option<std::os::fd::RawFd> {
        None
    }
}
