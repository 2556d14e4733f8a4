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

//! Keyboard state and focus. Keys are first offered to the embedder; focus
//! transitions synthesise releases for held keys on the departing client
//! and hold incoming keys behind a short lock on the entering one.

use std::time::Duration;

use calloop::RegistrationToken;
use calloop::timer::TimeoutAction;
use calloop::timer::Timer;

use crate::compositor::Compositor;
use crate::prelude::*;
use crate::registry::Handle;
use crate::registry::Resource;
use crate::seat::SeatRes;
use crate::seat::keymap::ModSerialization;
use crate::seat::keymap::Modifiers;
use crate::utils;
use crate::utils::channel;
use crate::view;
use crate::view::Role;
use crate::view::kind;
use crate::wire::KeyState;
use crate::wire::WireEvent;
use crate::wire::WireHandle;

/// Delay before queued keys are delivered to a freshly focused client.
const FOCUS_LOCK_MS: u64 = 100;
/// Embedder-consumed keys suppress held-key bookkeeping for this long.
const CONSUMED_REPEAT_MS: u64 = 90;

#[derive(Default)]
pub struct Keyboard {
    /// Currently held keys, evdev codes.
    pub keys: Vec<u32>,
    pub focused_view: Handle,
    /// The focused client's wl_keyboard resource.
    pub focused_resource: Resource,
    pub mods: ModSerialization,
    /// Keys are queued behind the focus lock until the timer delivers them.
    pub locked: bool,
    pub repeat: bool,
    pub focus_timer: Option<RegistrationToken>,
    pub repeat_timer: Option<RegistrationToken>,
}

fn disarm(comp: &mut Compositor, token: Option<RegistrationToken>) {
    if let Some(token) = token {
        comp.loop_handle.remove(token);
    }
}

/// wl_seat.get_keyboard.
pub fn get_keyboard(comp: &mut Compositor, wire: WireHandle) -> Resource {
    let client = wire.client();
    let keymap = comp
        .seat
        .keymap
        .as_ref()
        .map(|engine| engine.keymap_string());
    if let Some(keymap) = keymap {
        wire.send(WireEvent::KeyboardKeymap { keymap });
    }
    let id = comp.seat.keyboard_binds.create(SeatRes);
    comp.registry.bind_wire(id, "keyboard", wire);

    // If the focused view belongs to this client, refocus so it starts
    // receiving input through the new resource.
    let focused = comp.seat.keyboard.focused_view;
    if let Some(view_client) = view_client(comp, focused) {
        if view_client == client {
            comp.seat.keyboard.focused_view = Handle::NONE;
            comp.seat.keyboard.focused_resource = Resource::NONE;
            keyboard_focus(comp, focused);
        }
    }
    id
}

fn view_client(comp: &Compositor, vid: Handle) -> Option<crate::wire::ClientId> {
    let sid = comp.views.get(vid)?.surface;
    Some(comp.registry.wire(sid, "surface")?.client())
}

/// Broadcasts a modifiers event when the serialised xkb state changed.
fn update_modifiers(comp: &mut Compositor) {
    let Some(engine) = comp.seat.keymap.as_ref() else {
        return;
    };
    let serialized = engine.serialize();
    comp.seat.modifiers = engine.modifiers();

    if serialized == comp.seat.keyboard.mods {
        return;
    }
    comp.seat.keyboard.mods = serialized;

    let binds: Vec<Resource> = comp.seat.keyboard_binds.ids();
    for bind in binds {
        let Some(wire) = comp.seat.keyboard_binds.wire_of(bind) else {
            continue;
        };
        let serial = comp.serials.next();
        wire.send(WireEvent::KeyboardModifiers {
            serial,
            depressed: serialized.depressed,
            latched: serialized.latched,
            locked: serialized.locked,
            group: serialized.group,
        });
    }
}

/// Held-key bookkeeping. Returns false when the event is redundant (press
/// of an already held key).
fn update_keys(keys: &mut Vec<u32>, key: u32, state: KeyState) -> bool {
    if let Some(i) = keys.iter().position(|k| *k == key) {
        if state == KeyState::Pressed {
            return false;
        }
        keys.remove(i);
    }
    if state == KeyState::Pressed {
        keys.push(key);
    }
    true
}

fn send_keys(comp: &mut Compositor, resource: Resource, keys: &[u32], state: KeyState) {
    let Some(wire) = comp.seat.keyboard_binds.wire_of(resource) else {
        return;
    };
    let time_ms = utils::monotonic_time_ms();
    for key in keys {
        let serial = comp.serials.next();
        wire.send(WireEvent::KeyboardKey {
            serial,
            time_ms,
            key: *key,
            state,
        });
    }
}

/// Feeds the xkb engine and the held-key set. Returns false when the event
/// should not be forwarded further.
pub fn keyboard_update(comp: &mut Compositor, key: u32, state: KeyState) -> bool {
    if let Some(engine) = comp.seat.keymap.as_mut() {
        engine.update_key(key, state == KeyState::Pressed);
    }
    update_modifiers(comp);
    let ret = update_keys(&mut comp.seat.keyboard.keys, key, state);

    if comp.seat.keyboard.repeat {
        let token = comp.seat.keyboard.repeat_timer.take();
        disarm(comp, token);
        comp.seat.keyboard.keys.clear();
        comp.seat.keyboard.repeat = false;
    }

    if comp.seat.keyboard.locked {
        let token = comp.seat.keyboard.focus_timer.take();
        disarm(comp, token);
        let resource = comp.seat.keyboard.focused_resource;
        let held = comp.seat.keyboard.keys.clone();
        send_keys(comp, resource, &held, KeyState::Pressed);
        comp.seat.keyboard.locked = false;
    }

    ret
}

/// Offers the key to the embedder. A consumed key arms a short repeat
/// window during which held-key state is discarded, and is not forwarded.
pub fn keyboard_request_key(
    comp: &mut Compositor,
    time_ms: u32,
    mods: Modifiers,
    key: u32,
    state: KeyState,
) -> bool {
    let sym = comp
        .seat
        .keymap
        .as_ref()
        .map(|engine| engine.keysym(key))
        .unwrap_or(key);
    let view = comp.seat.keyboard.focused_view;

    let consumed = comp
        .with_handler(|h, c| h.keyboard_key(c, view, time_ms, mods, key, sym, state))
        .unwrap_or(false);
    if consumed {
        let token = comp
            .loop_handle
            .insert_source(
                Timer::from_duration(Duration::from_millis(CONSUMED_REPEAT_MS)),
                |_, _, comp| {
                    comp.seat.keyboard.keys.clear();
                    comp.seat.keyboard.repeat = false;
                    comp.seat.keyboard.repeat_timer = None;
                    TimeoutAction::Drop
                },
            )
            .map_err(|e| anyhow!("failed to arm repeat timer: {e:?}"))
            .log(loc!())
            .ok();
        let old = std::mem::replace(&mut comp.seat.keyboard.repeat_timer, token);
        disarm(comp, old);
        comp.seat.keyboard.repeat = true;
        return false;
    }
    true
}

/// Forwards a key to the focused client.
pub fn keyboard_key(comp: &mut Compositor, time_ms: u32, key: u32, state: KeyState) {
    let resource = comp.seat.keyboard.focused_resource;
    let Some(wire) = comp.seat.keyboard_binds.wire_of(resource) else {
        return;
    };
    let serial = comp.serials.next();
    wire.send(WireEvent::KeyboardKey {
        serial,
        time_ms,
        key,
        state,
    });
}

/// Focus transition: synthesise releases for held keys on the departing
/// resource, leave, `view_focus(false)`, then bind the entering client's
/// resource, enter with no keys, and deliver the held set after the lock.
pub fn keyboard_focus(comp: &mut Compositor, vid: Handle) {
    if comp.seat.keyboard.focused_view == vid {
        return;
    }
    trace!(
        target: channel::FOCUS,
        "-> keyboard focus event {:?}, {vid:?}",
        comp.seat.keyboard.focused_view
    );

    let old_view = comp.seat.keyboard.focused_view;
    let old_resource = comp.seat.keyboard.focused_resource;
    let held = comp.seat.keyboard.keys.clone();
    send_keys(comp, old_resource, &held, KeyState::Released);

    if let Some(old) = comp.views.get(old_view) {
        let old_surface = old.surface;
        let old_role = old.role;
        let surface_wire = comp.registry.wire(old_surface, "surface");
        let focus_wire = comp.seat.keyboard_binds.wire_of(old_resource);
        if let (Some(surface_wire), Some(focus_wire)) = (surface_wire, focus_wire) {
            // The XWM deactivation is skipped when focus moves to another
            // X11 window; the activation below covers it.
            let new_is_x11 = comp.views.get(vid).is_some_and(|v| v.is_x11());
            if !new_is_x11 {
                if let Role::X11 { window, .. } = old_role {
                    if let Some(xw) = comp.xwayland.as_mut() {
                        xw.wm_window_set_active(window, false);
                    }
                }
            }
            let serial = comp.serials.next();
            focus_wire.send(WireEvent::KeyboardLeave {
                serial,
                surface: surface_wire.object,
            });

            if matches!(old_role, Role::XdgPopup { .. }) {
                view::view_close(comp, old_view);
            }
        }
    }

    if old_view != Handle::NONE {
        comp.notify_handler(move |h, c| h.view_focus(c, old_view, false));
    }

    if let Some(Role::X11 { window, .. }) = comp.views.get(vid).map(|v| v.role) {
        if let Some(xw) = comp.xwayland.as_mut() {
            xw.wm_window_set_active(window, true);
        }
    }

    let mut new_resource = Resource::NONE;
    if let Some(client) = view_client(comp, vid) {
        let surface = comp
            .views
            .get(vid)
            .map(|v| v.surface)
            .unwrap_or(Resource::NONE);
        let surface_wire = comp.registry.wire(surface, "surface");
        let bind = comp.seat.keyboard_binds.id_for_client(client);
        if let (Some(surface_wire), Some(bind)) = (surface_wire, bind) {
            if let Some(focus_wire) = comp.seat.keyboard_binds.wire_of(bind) {
                let serial = comp.serials.next();
                focus_wire.send(WireEvent::KeyboardEnter {
                    serial,
                    surface: surface_wire.object,
                    keys: Vec::new(),
                });
                new_resource = bind;

                // Do not deliver held keys immediately; queue them behind
                // the focus lock.
                comp.seat.keyboard.locked = true;
                let token = comp
                    .loop_handle
                    .insert_source(
                        Timer::from_duration(Duration::from_millis(FOCUS_LOCK_MS)),
                        |_, _, comp| {
                            comp.seat.keyboard.focus_timer = None;
                            let resource = comp.seat.keyboard.focused_resource;
                            let held = comp.seat.keyboard.keys.clone();
                            send_keys(comp, resource, &held, KeyState::Pressed);
                            comp.seat.keyboard.locked = false;
                            comp.drain_signals();
                            TimeoutAction::Drop
                        },
                    )
                    .map_err(|e| anyhow!("failed to arm focus timer: {e:?}"))
                    .log(loc!())
                    .ok();
                let old = std::mem::replace(&mut comp.seat.keyboard.focus_timer, token);
                disarm(comp, old);
            }
        }
    }

    comp.seat.keyboard.focused_view = vid;
    comp.seat.keyboard.focused_resource = new_resource;

    if vid != Handle::NONE {
        comp.notify_handler(move |h, c| h.view_focus(c, vid, true));
    }
}

/// A popup is any view carrying the popup type bit or role.
pub fn is_popup(comp: &Compositor, vid: Handle) -> bool {
    comp.views.get(vid).is_some_and(|v| {
        v.kind & kind::POPUP != 0 || matches!(v.role, Role::XdgPopup { .. })
    })
}

pub fn keyboard_bind_wire_destroyed(comp: &mut Compositor, rid: Resource) {
    if comp.seat.keyboard.focused_resource == rid {
        comp.seat.keyboard.focused_resource = Resource::NONE;
    }
    comp.seat.keyboard_binds.release(rid);
}
