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

//! The embedder callback surface. A window manager implements
//! [`EventHandler`]; every method has a no-op default so embedders opt into
//! exactly the policy they care about. Layout policy lives entirely behind
//! these hooks: the core reports requests and applies mutators, it never
//! places windows on its own.

use crate::compositor::Compositor;
use crate::geometry::Geometry;
use crate::geometry::Point;
use crate::geometry::Size;
use crate::registry::Handle;
use crate::seat::keymap::Modifiers;
use crate::wire::ButtonState;
use crate::wire::KeyState;
use crate::wire::ScrollAxis;
use crate::wire::TouchEventKind;

/// Bitmask of view properties reported by `view_properties_updated`.
pub mod property {
    pub const TITLE: u32 = 1 << 0;
    pub const CLASS: u32 = 1 << 1;
    pub const APP_ID: u32 = 1 << 2;
    pub const PID: u32 = 1 << 3;
}

#[allow(unused_variables)]
pub trait EventHandler {
    /// A new output appeared. Return false to reject it (it is destroyed).
    fn output_created(&mut self, comp: &mut Compositor, output: Handle) -> bool {
        true
    }

    fn output_destroyed(&mut self, comp: &mut Compositor, output: Handle) {}

    fn output_focus(&mut self, comp: &mut Compositor, output: Handle, focused: bool) {}

    fn output_resolution(&mut self, comp: &mut Compositor, output: Handle, from: Size, to: Size) {}

    fn output_render_pre(&mut self, comp: &mut Compositor, output: Handle) {}

    fn output_render_post(&mut self, comp: &mut Compositor, output: Handle) {}

    fn output_context_created(&mut self, comp: &mut Compositor, output: Handle) {}

    fn output_context_destroyed(&mut self, comp: &mut Compositor, output: Handle) {}

    /// A view mapped. Return false to reject it (the client is left
    /// unmapped). Runs before the view is placed in any output list the
    /// embedder may have reordered.
    fn view_created(&mut self, comp: &mut Compositor, view: Handle) -> bool {
        true
    }

    fn view_destroyed(&mut self, comp: &mut Compositor, view: Handle) {}

    fn view_focus(&mut self, comp: &mut Compositor, view: Handle, focused: bool) {}

    fn view_move_to_output(&mut self, comp: &mut Compositor, view: Handle, from: Handle, to: Handle) {
    }

    /// The client asked for a geometry. Honour it (or not) by calling
    /// `view_set_geometry`.
    fn view_request_geometry(&mut self, comp: &mut Compositor, view: Handle, geometry: Geometry) {}

    /// The client asked for a state bit (`view::bit`). Honour it by calling
    /// `view_set_state`.
    fn view_request_state(&mut self, comp: &mut Compositor, view: Handle, bit: u32, on: bool) {}

    /// An interactive move is in progress at `origin`.
    fn view_request_move(&mut self, comp: &mut Compositor, view: Handle, origin: Point) {}

    /// An interactive resize is in progress at `origin` with `edges` active.
    fn view_request_resize(
        &mut self,
        comp: &mut Compositor,
        view: Handle,
        edges: u32,
        origin: Point,
    ) {
    }

    fn view_render_pre(&mut self, comp: &mut Compositor, view: Handle) {}

    fn view_render_post(&mut self, comp: &mut Compositor, view: Handle) {}

    fn view_properties_updated(&mut self, comp: &mut Compositor, view: Handle, mask: u32) {}

    /// Return true to consume the key (it is not forwarded to the client).
    fn keyboard_key(
        &mut self,
        comp: &mut Compositor,
        view: Handle,
        time_ms: u32,
        mods: Modifiers,
        key: u32,
        sym: u32,
        state: KeyState,
    ) -> bool {
        false
    }

    /// Return true to consume the button.
    fn pointer_button(
        &mut self,
        comp: &mut Compositor,
        view: Handle,
        time_ms: u32,
        mods: Modifiers,
        button: u32,
        state: ButtonState,
        position: Point,
    ) -> bool {
        false
    }

    /// Return true to consume the scroll.
    fn pointer_scroll(
        &mut self,
        comp: &mut Compositor,
        view: Handle,
        time_ms: u32,
        mods: Modifiers,
        axis: ScrollAxis,
        amount: f64,
    ) -> bool {
        false
    }

    /// Return true to consume the motion (the cursor still moves).
    fn pointer_motion(
        &mut self,
        comp: &mut Compositor,
        view: Handle,
        time_ms: u32,
        position: Point,
    ) -> bool {
        false
    }

    /// Return true to consume the touch point.
    fn touch(
        &mut self,
        comp: &mut Compositor,
        view: Handle,
        time_ms: u32,
        mods: Modifiers,
        kind: TouchEventKind,
        slot: i32,
        position: Point,
    ) -> bool {
        false
    }

    fn compositor_ready(&mut self, comp: &mut Compositor) {}

    fn compositor_terminate(&mut self, comp: &mut Compositor) {}
}

/// Embedder that accepts every default. Useful for tests and headless runs.
#[derive(Debug, Default)]
pub struct NullHandler;

impl EventHandler for NullHandler {}
