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

//! Top-level client windows. A view binds a surface, at most one shell
//! role, and a position in its output's stacking list. Mutators write to
//! `pending`; the first divergence from `commit` schedules a repaint, and
//! the repaint publishes the transaction through `view_commit_state`.

use enum_as_inner::EnumAsInner;

use crate::compositor::Compositor;
use crate::geometry::Geometry;
use crate::geometry::Size;
use crate::geometry::letterbox;
use crate::interface::property;
use crate::output;
use crate::output::OutputLink;
use crate::prelude::*;
use crate::registry::Handle;
use crate::registry::Resource;
use crate::signals::Signal;
use crate::surface;
use crate::utils::channel;
use crate::wire::WireEvent;
use crate::wire::XdgToplevelState;

/// View state bits (`ViewState::state`).
pub mod bit {
    pub const MAXIMIZED: u32 = 1 << 0;
    pub const FULLSCREEN: u32 = 1 << 1;
    pub const RESIZING: u32 = 1 << 2;
    pub const MOVING: u32 = 1 << 3;
    pub const ACTIVATED: u32 = 1 << 4;
}

/// View type bits, mostly fed by the XWM.
pub mod kind {
    pub const OVERRIDE_REDIRECT: u32 = 1 << 0;
    pub const UNMANAGED: u32 = 1 << 1;
    pub const SPLASH: u32 = 1 << 2;
    pub const MODAL: u32 = 1 << 3;
    pub const POPUP: u32 = 1 << 4;
}

/// Resize edge bits, matching the wl_shell/xdg wire encoding.
pub mod edge {
    pub const TOP: u32 = 1;
    pub const BOTTOM: u32 = 2;
    pub const LEFT: u32 = 4;
    pub const RIGHT: u32 = 8;
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct ViewState {
    pub geometry: Geometry,
    /// Client hint: the actually visible rect inside an enlarged surface
    /// (drop shadows). Zero size means no hint.
    pub visible: Geometry,
    pub state: u32,
    pub edges: u32,
}

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Properties {
    pub title: Option<String>,
    pub class: Option<String>,
    pub app_id: Option<String>,
    pub pid: Option<u32>,
}

/// At most one role at a time.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, EnumAsInner)]
pub enum Role {
    #[default]
    None,
    Shell(Resource),
    Xdg {
        surface: Resource,
        toplevel: Resource,
    },
    XdgPopup {
        surface: Resource,
        popup: Resource,
    },
    X11 {
        window: u32,
        override_redirect: bool,
    },
}

#[derive(Debug, Default)]
pub struct View {
    pub surface: Resource,
    pub role: Role,
    pub pending: ViewState,
    pub commit: ViewState,
    pub parent: Handle,
    pub props: Properties,
    /// Visibility bitmask tested against each output's active mask.
    pub mask: u32,
    pub kind: u32,
    pub created: bool,
    pub minimized: bool,
}

impl View {
    pub fn new() -> Self {
        Self {
            mask: !0,
            ..Self::default()
        }
    }

    pub fn is_x11(&self) -> bool {
        matches!(self.role, Role::X11 { .. })
    }
}

/// Creates a view for a surface and places it on the focused output.
pub fn view_new(comp: &mut Compositor, sid: Resource) -> Handle {
    let existing = comp
        .surfaces
        .get(sid)
        .map(|s| s.view)
        .unwrap_or(Handle::NONE);
    if existing != Handle::NONE {
        return existing;
    }

    let vid = comp.views.create(View::new());
    surface::surface_attach_to_view(comp, sid, vid);

    let focused = comp.focused_output;
    if let Some(mask) = comp.outputs.get(focused).map(|o| o.active_mask) {
        output::output_link_view(comp, focused, vid, OutputLink::Above, Handle::NONE);
        view_set_mask(comp, vid, mask);
    }
    vid
}

pub fn view_get_output(comp: &Compositor, vid: Handle) -> Handle {
    comp.views
        .get(vid)
        .and_then(|v| comp.surfaces.get(v.surface))
        .map(|s| s.output)
        .unwrap_or(Handle::NONE)
}

/// Schedules a repaint once pending diverges from committed.
fn update(comp: &mut Compositor, vid: Handle) {
    let Some(view) = comp.views.get(vid) else {
        return;
    };
    if view.pending == view.commit {
        return;
    }
    let oid = view_get_output(comp, vid);
    output::scheduler::schedule_repaint(comp, oid);
}

/// Inserts an unmapped view into its output's stacking list (top).
pub fn view_map(comp: &mut Compositor, vid: Handle) {
    let Some(view) = comp.views.get(vid) else {
        return;
    };
    if view.created {
        return;
    }
    let oid = view_get_output(comp, vid);
    output::output_link_view(comp, oid, vid, OutputLink::Above, Handle::NONE);
}

/// Unmaps; the `view_destroyed` callback fires exactly once per map.
pub fn view_unmap(comp: &mut Compositor, vid: Handle) {
    let oid = view_get_output(comp, vid);
    output::output_unlink_view(comp, oid, vid);

    let Some(view) = comp.views.get_mut(vid) else {
        return;
    };
    if !view.created {
        return;
    }
    view.created = false;
    comp.notify_handler(move |h, c| h.view_destroyed(c, vid));
    comp.signals.emit(Signal::Focus {
        view: vid,
        focused: false,
    });
}

/// Publishes the pending view state at repaint time, emitting the role's
/// configure event when the state set or size changed.
pub fn view_commit_state(comp: &mut Compositor, vid: Handle) {
    let Some(view) = comp.views.get(vid) else {
        return;
    };
    let Some(surface_size) = comp.surfaces.get(view.surface).map(|s| s.size) else {
        return;
    };

    if !view.created {
        let view = comp.views.get_mut(vid).expect("checked above");
        view.pending.geometry.size = surface_size;
        view.created = true;

        let accepted = comp
            .with_handler(|h, c| h.view_created(c, vid))
            .unwrap_or(true);
        if !accepted {
            view_close(comp, vid);
            return;
        }
    }

    let Some(view) = comp.views.get(vid) else {
        return;
    };
    if view.pending == view.commit {
        return;
    }

    let pending = view.pending;
    let commit = view.commit;
    let role = view.role;
    let size_changed =
        pending.geometry.size != commit.geometry.size || pending.geometry.size != surface_size;

    trace!(
        target: channel::COMMIT,
        "=> pending commit {vid:?} ({size_changed}) pending: {:?} committed: {:?} surface: {surface_size:?}",
        pending.geometry.size,
        commit.geometry.size
    );

    if pending.state != commit.state || size_changed {
        match role {
            Role::Xdg { surface, toplevel } => {
                let states = xdg_state_array(pending.state);
                if let Some(wire) = comp.registry.wire(toplevel, "xdg-toplevel") {
                    wire.send(WireEvent::XdgToplevelConfigure {
                        width: pending.geometry.size.w as i32,
                        height: pending.geometry.size.h as i32,
                        states,
                    });
                }
                if let Some(wire) = comp.registry.wire(surface, "xdg-surface") {
                    let serial = comp.serials.next();
                    wire.send(WireEvent::XdgSurfaceConfigure { serial });
                }
            },
            Role::Shell(shell) => {
                if let Some(wire) = comp.registry.wire(shell, "shell-surface") {
                    wire.send(WireEvent::ShellConfigure {
                        edges: pending.edges,
                        width: pending.geometry.size.w as i32,
                        height: pending.geometry.size.h as i32,
                    });
                }
            },
            Role::XdgPopup { surface, popup } => {
                if let Some(wire) = comp.registry.wire(popup, "xdg-popup") {
                    wire.send(WireEvent::XdgPopupConfigure {
                        x: pending.geometry.origin.x,
                        y: pending.geometry.origin.y,
                        width: pending.geometry.size.w as i32,
                        height: pending.geometry.size.h as i32,
                    });
                }
                if let Some(wire) = comp.registry.wire(surface, "xdg-surface") {
                    let serial = comp.serials.next();
                    wire.send(WireEvent::XdgSurfaceConfigure { serial });
                }
            },
            _ => {},
        }
    }

    if let Role::X11 { window, .. } = role {
        if let Some(xw) = comp.xwayland.as_mut() {
            if pending.geometry.origin != commit.geometry.origin {
                xw.wm_window_position(window, pending.geometry.origin);
            }
            if size_changed {
                xw.wm_window_resize(window, pending.geometry.size);
            }
        }
    }

    if let Some(view) = comp.views.get_mut(vid) {
        view.commit = view.pending;
    }
    trace!(target: channel::COMMIT, "=> commit {vid:?}");
}

fn xdg_state_array(state: u32) -> Vec<XdgToplevelState> {
    let map = [
        (bit::MAXIMIZED, XdgToplevelState::Maximized),
        (bit::FULLSCREEN, XdgToplevelState::Fullscreen),
        (bit::RESIZING, XdgToplevelState::Resizing),
        (bit::ACTIVATED, XdgToplevelState::Activated),
    ];
    map.iter()
        .filter(|(b, _)| state & b != 0)
        .map(|(_, s)| *s)
        .collect()
}

/// Keeps the anchored edge stationary during an interactive resize.
pub fn view_ack_surface_attach(
    comp: &mut Compositor,
    vid: Handle,
    sid: Resource,
    old_surface_size: Size,
) {
    let Some(new_size) = comp.surfaces.get(sid).map(|s| s.size) else {
        return;
    };
    let Some(view) = comp.views.get_mut(vid) else {
        return;
    };

    // X11 windows have no opaque region; treat them as fully opaque.
    let fill_opaque = view.is_x11();

    if view.pending.state & bit::RESIZING != 0 {
        let edges = view.pending.edges | view.commit.edges;
        if edges & edge::LEFT != 0 {
            view.pending.geometry.origin.x += old_surface_size.w as i32 - new_size.w as i32;
        }
        if edges & edge::TOP != 0 {
            view.pending.geometry.origin.y += old_surface_size.h as i32 - new_size.h as i32;
        }
    }

    if fill_opaque {
        if let Some(surface) = comp.surfaces.get_mut(sid) {
            surface.pending.opaque = crate::region::Region::from_rect(surface.bounds());
        }
    }
}

fn transformed_by_parent(view: &View) -> bool {
    view.kind & (kind::OVERRIDE_REDIRECT | kind::UNMANAGED) == 0
}

/// Bounds composed through the parent chain, plus the visible rect: for
/// xdg surfaces with a visible hint the drawn area shrinks inside the
/// enlarged bounds; for shell/X11 surfaces smaller than their bounds a
/// centered aspect-preserving letterbox is computed.
pub fn view_get_bounds(comp: &Compositor, vid: Handle) -> (Geometry, Geometry) {
    let Some(view) = comp.views.get(vid) else {
        return (Geometry::ZERO, Geometry::ZERO);
    };
    let mut bounds = view.commit.geometry;

    let Some(surface) = comp.surfaces.get(view.surface) else {
        return (bounds, bounds);
    };

    if transformed_by_parent(view) {
        let mut parent = view.parent;
        let mut hops = 0;
        while let Some(p) = comp.views.get(parent) {
            bounds.origin = bounds.origin + p.commit.geometry.origin;
            parent = p.parent;
            hops += 1;
            if hops > 64 {
                break;
            }
        }
    }

    if matches!(view.role, Role::Xdg { .. }) && !view.commit.visible.size.is_zero() {
        // xdg client that draws drop shadows. Only obey the visible hint
        // when not maximized or fullscreen.
        if view.commit.state & (bit::MAXIMIZED | bit::FULLSCREEN) == 0 {
            bounds.origin.x -= view.commit.visible.origin.x;
            bounds.origin.y -= view.commit.visible.origin.y;
            bounds.size.w = surface.size.w.max(view.commit.geometry.size.w);
            bounds.size.h = surface.size.h.max(view.commit.geometry.size.h);
        }
    }

    bounds.size = bounds.size.clamp_min_area();

    let is_letterboxed_role = view.is_x11() || matches!(view.role, Role::Shell(_));
    let visible = if is_letterboxed_role && surface.size != bounds.size {
        let mut fitted = letterbox(surface.size, bounds);
        fitted.size = fitted.size.clamp_min_area();
        fitted
    } else {
        bounds
    };

    (bounds, visible)
}

/// The view's opaque rect in output space, used by the scheduler's
/// coverage tests. Under-approximates for translucent content.
pub fn view_get_opaque(comp: &Compositor, vid: Handle) -> Geometry {
    let Some(view) = comp.views.get(vid) else {
        return Geometry::ZERO;
    };
    let Some(surface) = comp.surfaces.get(view.surface) else {
        return Geometry::ZERO;
    };

    let (bounds, visible) = view_get_bounds(comp, vid);

    if surface.size == bounds.size || visible == bounds {
        // No letterbox bars behind the view; scale the opaque extents into
        // bounds space.
        let extents = surface.opaque_extents();
        if extents.size.is_zero() {
            return Geometry::ZERO;
        }
        let miw = (surface.size.w.min(bounds.size.w)) as f64;
        let maw = (surface.size.w.max(bounds.size.w)).max(1) as f64;
        let mih = (surface.size.h.min(bounds.size.h)) as f64;
        let mah = (surface.size.h.max(bounds.size.h)).max(1) as f64;
        Geometry::new(
            bounds.origin.x + (extents.origin.x as f64 * miw / maw) as i32,
            bounds.origin.y + (extents.origin.y as f64 * mih / mah) as i32,
            (extents.right() as f64 * miw / maw) as u32,
            (extents.bottom() as f64 * mih / mah) as u32,
        )
    } else {
        Geometry::ZERO
    }
}

/// Client-initiated geometry request; forwarded to the embedder once the
/// view exists, applied directly before that.
pub fn view_request_geometry(comp: &mut Compositor, vid: Handle, geometry: Geometry) {
    let Some(view) = comp.views.get(vid) else {
        return;
    };
    trace!(target: channel::REQUEST, "geometry request {vid:?} {geometry:?}");
    if view.created {
        comp.notify_handler(move |h, c| h.view_request_geometry(c, vid, geometry));
    } else if let Some(view) = comp.views.get_mut(vid) {
        view.pending.geometry = geometry;
    }
}

/// Client-initiated state request. Requests matching pending are ignored.
pub fn view_request_state(comp: &mut Compositor, vid: Handle, state_bit: u32, on: bool) {
    let Some(view) = comp.views.get(vid) else {
        return;
    };
    if !view.created || (view.pending.state & state_bit != 0) == on {
        return;
    }
    trace!(target: channel::REQUEST, "state request {vid:?} {state_bit:#x}={on}");
    comp.notify_handler(move |h, c| h.view_request_state(c, vid, state_bit, on));
}

// --- embedder-facing mutators -------------------------------------------

pub fn view_set_geometry(comp: &mut Compositor, vid: Handle, edges: u32, geometry: Geometry) {
    if let Some(view) = comp.views.get_mut(vid) {
        view.pending.geometry = Geometry {
            origin: geometry.origin,
            size: geometry.size.clamp_min_area(),
        };
        view.pending.edges = edges;
    }
    update(comp, vid);
}

pub fn view_set_state(comp: &mut Compositor, vid: Handle, state_bit: u32, on: bool) {
    let mut x11_window = None;
    if let Some(view) = comp.views.get_mut(vid) {
        if let Role::X11 { window, .. } = view.role {
            x11_window = Some(window);
        }
        if on {
            view.pending.state |= state_bit;
        } else {
            view.pending.state &= !state_bit;
        }
    }
    if let (Some(window), Some(xw)) = (x11_window, comp.xwayland.as_mut()) {
        xw.wm_window_set_state(window, state_bit, on);
    }
    update(comp, vid);
}

pub fn view_set_mask(comp: &mut Compositor, vid: Handle, mask: u32) {
    if let Some(view) = comp.views.get_mut(vid) {
        view.mask = mask;
    }
    update(comp, vid);
}

pub fn view_set_type(comp: &mut Compositor, vid: Handle, type_bit: u32, on: bool) {
    if let Some(view) = comp.views.get_mut(vid) {
        if on {
            view.kind |= type_bit;
        } else {
            view.kind &= !type_bit;
        }
    }
}

pub fn view_set_parent(comp: &mut Compositor, vid: Handle, parent: Handle) {
    if vid == parent {
        return;
    }
    if let Some(view) = comp.views.get_mut(vid) {
        view.parent = parent;
    }
    update(comp, vid);
}

pub fn view_set_minimized(comp: &mut Compositor, vid: Handle, minimized: bool) {
    if let Some(view) = comp.views.get_mut(vid) {
        view.minimized = minimized;
    }
}

/// Moves the view to another output's stacking list, reporting
/// `view_move_to_output` exactly once per actual move.
pub fn view_set_output(comp: &mut Compositor, vid: Handle, to: Handle) {
    let from = view_get_output(comp, vid);
    if from == to {
        return;
    }
    output::output_link_view(comp, to, vid, OutputLink::Above, Handle::NONE);
}

pub fn view_set_title(comp: &mut Compositor, vid: Handle, title: Option<String>) {
    if let Some(view) = comp.views.get_mut(vid) {
        if view.props.title == title {
            return;
        }
        view.props.title = title;
    }
    comp.notify_handler(move |h, c| h.view_properties_updated(c, vid, property::TITLE));
}

pub fn view_set_class(comp: &mut Compositor, vid: Handle, class: Option<String>) {
    if let Some(view) = comp.views.get_mut(vid) {
        if view.props.class == class {
            return;
        }
        view.props.class = class;
    }
    comp.notify_handler(move |h, c| h.view_properties_updated(c, vid, property::CLASS));
}

pub fn view_set_app_id(comp: &mut Compositor, vid: Handle, app_id: Option<String>) {
    if let Some(view) = comp.views.get_mut(vid) {
        if view.props.app_id == app_id {
            return;
        }
        view.props.app_id = app_id;
    }
    comp.notify_handler(move |h, c| h.view_properties_updated(c, vid, property::APP_ID));
}

/// Role-aware close: xdg close event, X11 WM_DELETE_WINDOW, popup done,
/// shell-surface destruction.
pub fn view_close(comp: &mut Compositor, vid: Handle) {
    let Some(role) = comp.views.get(vid).map(|v| v.role) else {
        return;
    };
    match role {
        Role::Xdg { toplevel, .. } => {
            if let Some(wire) = comp.registry.wire(toplevel, "xdg-toplevel") {
                wire.send(WireEvent::XdgToplevelClose);
            }
        },
        Role::X11 { window, .. } => {
            if let Some(xw) = comp.xwayland.as_mut() {
                xw.wm_window_close(window);
            }
        },
        Role::XdgPopup { popup, .. } => {
            if let Some(wire) = comp.registry.wire(popup, "xdg-popup") {
                wire.send(WireEvent::XdgPopupDone);
            }
        },
        Role::Shell(shell) => {
            if let Some(released) = comp.shell_surfaces.release(shell) {
                if let Some(wire) = released.wire {
                    wire.destroy();
                }
            }
        },
        Role::None => {},
    }
}

pub fn view_send_to_back(comp: &mut Compositor, vid: Handle) {
    let oid = view_get_output(comp, vid);
    output::output_link_view(comp, oid, vid, OutputLink::Below, Handle::NONE);
}

pub fn view_bring_to_front(comp: &mut Compositor, vid: Handle) {
    let oid = view_get_output(comp, vid);
    output::output_link_view(comp, oid, vid, OutputLink::Above, Handle::NONE);
}

pub fn view_send_below(comp: &mut Compositor, vid: Handle, other: Handle) {
    let oid = view_get_output(comp, other);
    output::output_link_view(comp, oid, vid, OutputLink::Below, other);
}

pub fn view_bring_above(comp: &mut Compositor, vid: Handle, other: Handle) {
    let oid = view_get_output(comp, other);
    output::output_link_view(comp, oid, vid, OutputLink::Above, other);
}

/// Focus request: X11 windows go through the XWM activation first, native
/// views through the focus signal into the seat.
pub fn view_focus(comp: &mut Compositor, vid: Handle) {
    let mut handled = false;
    if let Some(Role::X11 { window, .. }) = comp.views.get(vid).map(|v| v.role) {
        if let Some(xw) = comp.xwayland.as_mut() {
            handled = xw.wm_window_set_active(window, true);
        }
    }
    if !handled {
        comp.signals.emit(Signal::Focus {
            view: vid,
            focused: true,
        });
    }
}

/// Full teardown, releasing the handle after unmapping.
pub fn view_destroy(comp: &mut Compositor, vid: Handle) {
    view_unmap(comp, vid);
    let sid = comp.views.get(vid).map(|v| v.surface).unwrap_or_default();
    if let Some(surface) = comp.surfaces.get_mut(sid) {
        surface.view = Handle::NONE;
        surface.parent_view = Handle::NONE;
    }
    comp.views.release(vid);
}
