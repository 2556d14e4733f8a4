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

//! The seat: keyboard, pointer, touch, and the input dispatcher gluing
//! decoded device events to focus, grabs, and the embedder hooks. A single
//! seat is assumed.

pub mod keyboard;
pub mod keymap;
pub mod pointer;
pub mod touch;

use crate::compositor::Compositor;
use crate::data_device::DataDeviceManager;
use crate::geometry::Point;
use crate::output::scheduler;
use crate::registry::Registry;
use crate::registry::ResourceSource;
use crate::registry::Source;
use crate::seat::keyboard::Keyboard;
use crate::seat::keymap::Modifiers;
use crate::seat::keymap::XkbEngine;
use crate::seat::keymap::modifier;
use crate::seat::pointer::Pointer;
use crate::session;
use crate::session::input::InputEvent;
use crate::wire::KeyState;
use crate::wire::TouchEventKind;

/// Empty payload for wl_keyboard/wl_pointer/wl_touch binds; the wire
/// object is the interesting half.
#[derive(Debug)]
pub struct SeatRes;

pub struct Seat {
    pub name: String,
    pub keyboard: Keyboard,
    pub pointer: Pointer,
    pub keymap: Option<Box<dyn XkbEngine>>,
    /// Modifier/led snapshot refreshed on every key event.
    pub modifiers: Modifiers,
    pub keyboard_binds: ResourceSource<SeatRes>,
    pub pointer_binds: ResourceSource<SeatRes>,
    pub touch_binds: ResourceSource<SeatRes>,
    pub data: DataDeviceManager,
}

impl Seat {
    pub fn new(registry: &Registry, name: String) -> Self {
        Self {
            name,
            keyboard: Keyboard::default(),
            pointer: Pointer::default(),
            keymap: None,
            modifiers: Modifiers::default(),
            keyboard_binds: Source::new("keyboard", &registry.resources),
            pointer_binds: Source::new("pointer", &registry.resources),
            touch_binds: Source::new("touch", &registry.resources),
            data: DataDeviceManager::new(registry),
        }
    }
}

/// VT-switch chord: CTRL+ALT with an F-key code (59..=88 on the evdev
/// layout covers F1..F30 across banks).
const VT_KEY_FIRST: u32 = 59;
const VT_KEY_LAST: u32 = 88;

fn handle_key(comp: &mut Compositor, time_ms: u32, key: u32, state: KeyState) {
    if !keyboard::keyboard_update(comp, key, state) {
        return;
    }

    let mods = comp.seat.modifiers;
    if state == KeyState::Pressed
        && mods.mods == (modifier::CTRL | modifier::ALT)
        && (VT_KEY_FIRST..=VT_KEY_LAST).contains(&key)
    {
        session::activate_vt(comp, key - VT_KEY_FIRST + 1);
        return;
    }

    if !keyboard::keyboard_request_key(comp, time_ms, mods, key, state) {
        return;
    }
    keyboard::keyboard_key(comp, time_ms, key, state);
}

/// Routes one decoded input event. Input on a sleeping output only wakes
/// it; the event itself is dropped.
pub fn seat_input(comp: &mut Compositor, ev: InputEvent) {
    let oid = comp.focused_output;
    if comp.outputs.contains(oid) {
        let was_asleep = comp
            .outputs
            .get(oid)
            .is_some_and(|o| o.state.sleeping);
        scheduler::set_sleep(comp, oid, false);
        if was_asleep {
            return;
        }
    }

    let resolution = comp
        .outputs
        .get(oid)
        .map(|o| o.resolution)
        .unwrap_or(crate::geometry::Size::ZERO);

    match ev {
        InputEvent::Motion { time_ms, dx, dy } => {
            let pos = (
                (comp.seat.pointer.pos.0 + dx).clamp(0.0, resolution.w as f64),
                (comp.seat.pointer.pos.1 + dy).clamp(0.0, resolution.h as f64),
            );
            dispatch_motion(comp, time_ms, pos);
        },
        InputEvent::MotionAbsolute { time_ms, x, y } => {
            let pos = (x * resolution.w as f64, y * resolution.h as f64);
            dispatch_motion(comp, time_ms, pos);
        },
        InputEvent::Scroll {
            time_ms,
            axis,
            amount,
        } => {
            let view = comp.seat.pointer.focused_view;
            let mods = comp.seat.modifiers;
            let consumed = comp
                .with_handler(|h, c| h.pointer_scroll(c, view, time_ms, mods, axis, amount))
                .unwrap_or(false);
            if consumed {
                return;
            }
            pointer::pointer_scroll(comp, time_ms, axis, amount);
        },
        InputEvent::Button {
            time_ms,
            button,
            state,
        } => {
            let view = comp.seat.pointer.focused_view;
            let mods = comp.seat.modifiers;
            let position = comp.seat.pointer.position();
            let consumed = comp
                .with_handler(|h, c| {
                    h.pointer_button(c, view, time_ms, mods, button, state, position)
                })
                .unwrap_or(false);
            if consumed {
                return;
            }
            pointer::pointer_button(comp, time_ms, button, state);
        },
        InputEvent::Key {
            time_ms,
            key,
            state,
        } => handle_key(comp, time_ms, key, state),
        InputEvent::Touch {
            time_ms,
            kind,
            slot,
            x,
            y,
        } => {
            let pos = Point::new(
                (x * resolution.w as f64) as i32,
                (y * resolution.h as f64) as i32,
            );
            let view = comp.seat.pointer.focused_view;
            let mods = comp.seat.modifiers;
            let consumed = comp
                .with_handler(|h, c| h.touch(c, view, time_ms, mods, kind, slot, pos))
                .unwrap_or(false);
            if consumed {
                return;
            }

            // DOWN and MOTION warp the pointer so the embedder observes a
            // consistent cursor position; UP does not.
            if matches!(kind, TouchEventKind::Down | TouchEventKind::Motion) {
                comp.seat.pointer.pos = (pos.x as f64, pos.y as f64);
                pointer::pointer_motion(comp, time_ms, true);
            }
            touch::touch_touch(comp, time_ms, kind, slot, pos);
        },
    }
}

fn dispatch_motion(comp: &mut Compositor, time_ms: u32, pos: (f64, f64)) {
    let view = comp.seat.pointer.focused_view;
    let position = Point::new(pos.0 as i32, pos.1 as i32);
    let consumed = comp
        .with_handler(|h, c| h.pointer_motion(c, view, time_ms, position))
        .unwrap_or(false);
    if consumed {
        return;
    }
    comp.seat.pointer.pos = pos;
    pointer::pointer_motion(comp, time_ms, true);
}

/// Embedder API: warp the pointer without an input event.
pub fn pointer_set_position(comp: &mut Compositor, position: Point) {
    comp.seat.pointer.pos = (position.x as f64, position.y as f64);
    pointer::pointer_motion(comp, crate::utils::monotonic_time_ms(), true);
}
