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

//! Pointer focus and grabs. Focus follows the topmost visible view whose
//! input region contains the cursor, descending the sub-surface tree with
//! each child's committed offset applied.

use crate::compositor::Compositor;
use crate::geometry::Geometry;
use crate::geometry::Point;
use crate::prelude::*;
use crate::registry::Handle;
use crate::registry::Resource;
use crate::seat::SeatRes;
use crate::utils::channel;
use crate::view;
use crate::view::kind;
use crate::wire::ButtonState;
use crate::wire::ClientId;
use crate::wire::ScrollAxis;
use crate::wire::WireEvent;
use crate::wire::WireHandle;

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum GrabAction {
    #[default]
    None,
    Move,
    Resize,
}

#[derive(Debug, Default, Copy, Clone)]
pub struct Grab {
    pub grabbing: bool,
    pub origin: Point,
    pub action: GrabAction,
    pub edges: u32,
}

#[derive(Default)]
pub struct Pointer {
    /// Sub-pixel position in output space.
    pub pos: (f64, f64),
    /// Cursor hotspot offset.
    pub tip: Point,
    /// Client-provided cursor surface.
    pub surface: Resource,
    pub focused_view: Handle,
    pub focused_surface: Resource,
    /// Accumulated sub-surface offset of the focused surface.
    pub focused_offset: Point,
    /// The focused client's wl_pointer resources.
    pub focused_resources: Vec<Resource>,
    pub grab: Grab,
}

impl Pointer {
    pub fn position(&self) -> Point {
        Point::new(self.pos.0 as i32, self.pos.1 as i32)
    }
}

/// wl_seat.get_pointer.
pub fn get_pointer(comp: &mut Compositor, wire: WireHandle) -> Resource {
    let id = comp.seat.pointer_binds.create(SeatRes);
    comp.registry.bind_wire(id, "pointer", wire);
    id
}

pub fn pointer_bind_wire_destroyed(comp: &mut Compositor, rid: Resource) {
    comp.seat.pointer.focused_resources.retain(|r| *r != rid);
    comp.seat.pointer_binds.release(rid);
}

pub fn focused_client(comp: &Compositor) -> Option<ClientId> {
    comp.seat
        .pointer
        .focused_resources
        .iter()
        .find_map(|r| comp.seat.pointer_binds.wire_of(*r))
        .map(|w| w.client())
}

/// wl_pointer.set_cursor; only honoured from the focused client.
pub fn pointer_set_cursor(
    comp: &mut Compositor,
    client: ClientId,
    surface: Resource,
    hotspot: Point,
) {
    if focused_client(comp) != Some(client) {
        return;
    }
    pointer_set_surface(comp, surface, hotspot);
}

pub fn pointer_set_surface(comp: &mut Compositor, surface: Resource, tip: Point) {
    let old = comp.seat.pointer.surface;
    if old != surface {
        crate::surface::surface_invalidate(comp, old);
    }
    comp.seat.pointer.tip = tip;
    comp.seat.pointer.surface = surface;
}

/// Descends `parent`'s sub-surface tree looking for the deepest surface
/// containing the point. `offset` accumulates each child's committed
/// position scaled by the parent transform.
fn find_surface_at_position(
    comp: &Compositor,
    point: Point,
    parent: Resource,
    offset: &mut Point,
) -> Resource {
    let Some(p) = comp.surfaces.get(parent) else {
        return Resource::NONE;
    };
    for child in &p.subsurfaces {
        let Some(sub) = comp.surfaces.get(*child) else {
            continue;
        };
        let dx = (sub.commit.subsurface_position.x as f64 * p.coordinate_transform.w) as i32;
        let dy = (sub.commit.subsurface_position.y as f64 * p.coordinate_transform.h) as i32;

        offset.x += dx;
        offset.y += dy;

        let hit = find_surface_at_position(comp, point, *child, offset);
        if hit != Resource::NONE {
            return hit;
        }

        let bounds = Geometry {
            origin: *offset,
            size: sub.size,
        };
        if bounds.contains_point(point) {
            return *child;
        }

        offset.x -= dx;
        offset.y -= dy;
    }
    Resource::NONE
}

/// The surface under the pointer on the focused output, with its
/// accumulated offset. Views are walked top to bottom.
fn surface_under_pointer(comp: &Compositor, oid: Handle) -> (Resource, Point) {
    let Some(output) = comp.outputs.get(oid) else {
        return (Resource::NONE, Point::ZERO);
    };
    let point = comp.seat.pointer.position();

    for vid in output.views.iter().rev() {
        let Some(v) = comp.views.get(*vid) else {
            continue;
        };
        if v.mask & output.active_mask == 0 {
            continue;
        }
        let (bounds, visible) = view::view_get_bounds(comp, *vid);
        if !comp.surfaces.contains(v.surface) {
            continue;
        }

        let mut offset = bounds.origin;
        let hit = find_surface_at_position(comp, point, v.surface, &mut offset);
        if hit != Resource::NONE {
            return (hit, offset);
        }
        if visible.contains_point(point) {
            return (v.surface, offset);
        }
    }
    (Resource::NONE, Point::ZERO)
}

/// Surface-local coordinates of the current position.
fn surface_local(comp: &Compositor, sid: Resource) -> (f64, f64) {
    let Some(surface) = comp.surfaces.get(sid) else {
        return (0.0, 0.0);
    };
    let pointer = &comp.seat.pointer;
    let x = (pointer.pos.0 - pointer.focused_offset.x as f64) / surface.coordinate_transform.w;
    let y = (pointer.pos.1 - pointer.focused_offset.y as f64) / surface.coordinate_transform.h;
    (
        x.clamp(0.0, surface.size.w as f64),
        y.clamp(0.0, surface.size.h as f64),
    )
}

/// The focused view's input rect in output space: committed input extents
/// (whole surface when unset) scaled by the coordinate transform.
fn is_inside_view_input_region(comp: &Compositor, vid: Handle) -> bool {
    let Some(v) = comp.views.get(vid) else {
        return false;
    };
    let Some(surface) = comp.surfaces.get(v.surface) else {
        return false;
    };
    let (bounds, _) = view::view_get_bounds(comp, vid);

    let extents = match &surface.commit.input {
        Some(input) if !input.is_empty() => input.extents(),
        Some(_) => return false,
        None => surface.bounds(),
    };

    let rect = Geometry::new(
        bounds.origin.x + (extents.origin.x as f64 * surface.coordinate_transform.w) as i32,
        bounds.origin.y + (extents.origin.y as f64 * surface.coordinate_transform.h) as i32,
        (extents.size.w as f64 * surface.coordinate_transform.w) as u32,
        (extents.size.h as f64 * surface.coordinate_transform.h) as u32,
    );
    rect.contains_point(comp.seat.pointer.position())
}

fn defocus(comp: &mut Compositor) {
    let focused_surface = comp.seat.pointer.focused_surface;
    if let Some(surface_wire) = comp.registry.wire(focused_surface, "surface") {
        let resources = comp.seat.pointer.focused_resources.clone();
        for r in resources {
            let Some(wire) = comp.seat.pointer_binds.wire_of(r) else {
                continue;
            };
            let serial = comp.serials.next();
            wire.send(WireEvent::PointerLeave {
                serial,
                surface: surface_wire.object,
            });
        }
    }
    comp.seat.pointer.focused_resources.clear();
    comp.seat.pointer.focused_surface = Resource::NONE;
    comp.seat.pointer.focused_view = Handle::NONE;
}

fn focus_surface(comp: &mut Compositor, sid: Resource, old_focus: Handle, pos: (f64, f64)) {
    let parent_view = comp
        .surfaces
        .get(sid)
        .map(|s| s.parent_view)
        .unwrap_or(Handle::NONE);

    // Reset the cursor when focus moves to a different view; the entering
    // client will set its own.
    if sid == Resource::NONE || parent_view != old_focus {
        pointer_set_surface(comp, Resource::NONE, Point::ZERO);
    }

    let Some(surface_wire) = comp.registry.wire(sid, "surface") else {
        return;
    };
    let client = surface_wire.client();

    let binds = comp.seat.pointer_binds.ids();
    for bind in binds {
        let Some(wire) = comp.seat.pointer_binds.wire_of(bind) else {
            continue;
        };
        if wire.client() != client {
            continue;
        }
        comp.seat.pointer.focused_resources.push(bind);
        let serial = comp.serials.next();
        wire.send(WireEvent::PointerEnter {
            serial,
            surface: surface_wire.object,
            x: pos.0,
            y: pos.1,
        });
    }

    comp.seat.pointer.focused_surface = sid;
    comp.seat.pointer.focused_view = parent_view;
}

/// Leave/enter pair toward the newly focused surface.
pub fn pointer_focus(comp: &mut Compositor, sid: Resource) -> (f64, f64) {
    let local = if sid != Resource::NONE {
        surface_local(comp, sid)
    } else {
        (0.0, 0.0)
    };

    if comp.seat.pointer.focused_surface == sid {
        return local;
    }
    trace!(
        target: channel::FOCUS,
        "-> pointer focus event {:?}, {sid:?}",
        comp.seat.pointer.focused_surface
    );

    let old_focused_view = comp.seat.pointer.focused_view;
    defocus(comp);
    focus_surface(comp, sid, old_focused_view, local);
    local
}

/// Motion: recompute focus (unless a grab pins it), repaint the cursor,
/// feed grabs to the embedder, and forward surface-local motion.
pub fn pointer_motion(comp: &mut Compositor, time_ms: u32, pass: bool) {
    let oid = comp.focused_output;

    if comp.seat.pointer.grab.grabbing {
        let grab = comp.seat.pointer.grab;
        let view = comp.seat.pointer.focused_view;
        let position = comp.seat.pointer.position();
        match grab.action {
            GrabAction::Move => {
                comp.notify_handler(move |h, c| h.view_request_move(c, view, position));
            },
            GrabAction::Resize => {
                comp.notify_handler(move |h, c| h.view_request_resize(c, view, grab.edges, position));
            },
            GrabAction::None => {},
        }
    }

    let (hit, offset) = surface_under_pointer(comp, oid);
    comp.seat.pointer.focused_offset = offset;

    let mut local = (0.0, 0.0);
    if pass {
        local = pointer_focus(comp, hit);
    }

    crate::output::scheduler::schedule_repaint(comp, oid);

    if hit == Resource::NONE || !pass {
        return;
    }
    if !is_inside_view_input_region(comp, comp.seat.pointer.focused_view) {
        return;
    }

    let resources = comp.seat.pointer.focused_resources.clone();
    for r in resources {
        if let Some(wire) = comp.seat.pointer_binds.wire_of(r) {
            wire.send(WireEvent::PointerMotion {
                time_ms,
                x: local.0,
                y: local.1,
            });
        }
    }
}

/// Buttons: popup dismissal, grab bookkeeping, then forwarding within the
/// input region.
pub fn pointer_button(comp: &mut Compositor, time_ms: u32, button: u32, state: ButtonState) {
    // Pressing outside a focused popup closes it.
    let kb_focus = comp.seat.keyboard.focused_view;
    if kb_focus != comp.seat.pointer.focused_view {
        if let Some(v) = comp.views.get(kb_focus) {
            if !v.is_x11() && v.kind & kind::POPUP != 0 {
                let popup_client = comp
                    .views
                    .get(kb_focus)
                    .and_then(|v| comp.registry.wire(v.surface, "surface"))
                    .map(|w| w.client());
                if focused_client(comp) != popup_client {
                    view::view_close(comp, kb_focus);
                    return;
                }
            }
        }
    }

    if !is_inside_view_input_region(comp, comp.seat.pointer.focused_view) {
        return;
    }

    match state {
        ButtonState::Pressed => {
            if !comp.seat.pointer.grab.grabbing {
                comp.seat.pointer.grab.grabbing = true;
                comp.seat.pointer.grab.origin = comp.seat.pointer.position();
            }
        },
        ButtonState::Released => {
            comp.seat.pointer.grab = Grab::default();
        },
    }

    let resources = comp.seat.pointer.focused_resources.clone();
    for r in resources {
        if let Some(wire) = comp.seat.pointer_binds.wire_of(r) {
            let serial = comp.serials.next();
            wire.send(WireEvent::PointerButton {
                serial,
                time_ms,
                button,
                state,
            });
        }
    }
}

pub fn pointer_scroll(comp: &mut Compositor, time_ms: u32, axis: ScrollAxis, amount: f64) {
    if !is_inside_view_input_region(comp, comp.seat.pointer.focused_view) {
        return;
    }
    let resources = comp.seat.pointer.focused_resources.clone();
    for r in resources {
        if let Some(wire) = comp.seat.pointer_binds.wire_of(r) {
            wire.send(WireEvent::PointerAxis {
                time_ms,
                axis,
                value: amount,
            });
        }
    }
}

/// Begins an interactive grab on behalf of a client request. The next
/// motions feed the embedder until the button is released.
pub fn pointer_begin_grab(comp: &mut Compositor, action: GrabAction, edges: u32) {
    let pointer = &mut comp.seat.pointer;
    pointer.grab.action = action;
    pointer.grab.edges = edges;
}

/// Paints the cursor on `oid` during repaint: the client cursor surface
/// when set, the renderer's default cursor otherwise. Frame callbacks of
/// the cursor surface ride along with the frame's.
pub fn render_pointer(comp: &mut Compositor, oid: Handle, callbacks: &mut Vec<Resource>) {
    if oid != comp.focused_output {
        return;
    }
    let Some(resolution) = comp.outputs.get(oid).map(|o| o.resolution) else {
        return;
    };
    let pos = Point::new(
        (comp.seat.pointer.pos.0).clamp(0.0, resolution.w as f64) as i32,
        (comp.seat.pointer.pos.1).clamp(0.0, resolution.h as f64) as i32,
    );

    let cursor = comp.seat.pointer.surface;
    if comp.surfaces.contains(cursor) {
        let on_output = comp
            .surfaces
            .get(cursor)
            .map(|s| s.output == oid)
            .unwrap_or(false);
        let attached = on_output || {
            let buffer = comp
                .surfaces
                .get(cursor)
                .map(|s| {
                    if s.commit.buffer != Resource::NONE {
                        s.commit.buffer
                    } else {
                        s.pending.buffer
                    }
                })
                .unwrap_or(Resource::NONE);
            crate::surface::surface_attach_to_output(comp, cursor, oid, buffer)
        };

        if attached {
            let tip = comp.seat.pointer.tip;
            {
                let Compositor {
                    outputs, surfaces, ..
                } = comp;
                let (Some(output), Some(s)) = (outputs.get_mut(oid), surfaces.get(cursor)) else {
                    return;
                };
                if let Some(renderer) = output.renderer.as_mut() {
                    renderer.surface_paint(&s.render, pos - tip, s.size);
                }
            }
            if let Some(s) = comp.surfaces.get_mut(cursor) {
                callbacks.append(&mut s.commit.frame_cbs);
            }
            return;
        }
    }

    // Default cursor when there is no client surface (or none applies).
    let focused = comp.seat.pointer.focused_view;
    let focused_is_x11 = comp.views.get(focused).is_some_and(|v| v.is_x11());
    if focused == Handle::NONE || focused_is_x11 || !comp.surfaces.contains(cursor) {
        if let Some(output) = comp.outputs.get_mut(oid) {
            if let Some(renderer) = output.renderer.as_mut() {
                renderer.pointer_paint(pos);
            }
        }
    }
}
