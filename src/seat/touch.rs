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

//! Touch slot routing: events go to the view under the touch point. DOWN
//! and MOTION also warp the pointer (done by the seat dispatcher) so the
//! embedder observes a consistent cursor position; UP deliberately does
//! not.

use crate::compositor::Compositor;
use crate::geometry::Point;
use crate::registry::Handle;
use crate::registry::Resource;
use crate::seat::SeatRes;
use crate::view;
use crate::wire::TouchEventKind;
use crate::wire::WireEvent;
use crate::wire::WireHandle;

/// wl_seat.get_touch.
pub fn get_touch(comp: &mut Compositor, wire: WireHandle) -> Resource {
    let id = comp.seat.touch_binds.create(SeatRes);
    comp.registry.bind_wire(id, "touch", wire);
    id
}

pub fn touch_bind_wire_destroyed(comp: &mut Compositor, rid: Resource) {
    comp.seat.touch_binds.release(rid);
}

fn view_under_touch(comp: &Compositor, oid: Handle, pos: Point) -> Handle {
    let Some(output) = comp.outputs.get(oid) else {
        return Handle::NONE;
    };
    for vid in output.views.iter().rev() {
        if !comp.views.contains(*vid) {
            continue;
        }
        let (bounds, _) = view::view_get_bounds(comp, *vid);
        if pos.x >= bounds.origin.x
            && pos.x <= bounds.right()
            && pos.y >= bounds.origin.y
            && pos.y <= bounds.bottom()
        {
            return *vid;
        }
    }
    Handle::NONE
}

/// Routes one touch event to the client owning the view under the point.
pub fn touch_touch(
    comp: &mut Compositor,
    time_ms: u32,
    kind: TouchEventKind,
    slot: i32,
    pos: Point,
) {
    let focused = view_under_touch(comp, comp.focused_output, pos);
    let Some(v) = comp.views.get(focused) else {
        return;
    };
    let Some(surface_wire) = comp.registry.wire(v.surface, "surface") else {
        return;
    };
    let client = surface_wire.client();
    let Some(bind) = comp.seat.touch_binds.id_for_client(client) else {
        return;
    };
    let Some(wire) = comp.seat.touch_binds.wire_of(bind) else {
        return;
    };

    match kind {
        TouchEventKind::Down => {
            let serial = comp.serials.next();
            wire.send(WireEvent::TouchDown {
                serial,
                time_ms,
                surface: surface_wire.object,
                slot,
                x: pos.x as f64,
                y: pos.y as f64,
            });
        },
        TouchEventKind::Up => {
            let serial = comp.serials.next();
            wire.send(WireEvent::TouchUp {
                serial,
                time_ms,
                slot,
            });
        },
        TouchEventKind::Motion => {
            wire.send(WireEvent::TouchMotion {
                time_ms,
                slot,
                x: pos.x as f64,
                y: pos.y as f64,
            });
        },
        TouchEventKind::Frame => wire.send(WireEvent::TouchFrame),
        TouchEventKind::Cancel => wire.send(WireEvent::TouchCancel),
    }
}
