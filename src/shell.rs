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

//! Shell role attachment: wl_shell_surface, xdg_surface + xdg_toplevel,
//! and xdg_popup. A role binds a surface to a view (creating the view on
//! first attach) and translates client requests into embedder requests and
//! grabs.

use crate::compositor::Compositor;
use crate::geometry::Geometry;
use crate::geometry::Point;
use crate::prelude::*;
use crate::registry::Handle;
use crate::registry::Resource;
use crate::seat::pointer;
use crate::seat::pointer::GrabAction;
use crate::utils::channel;
use crate::view;
use crate::view::Role;
use crate::view::bit;
use crate::view::kind;
use crate::wire::ProtocolError;
use crate::wire::WireHandle;

/// Role payloads all point back at the view.
#[derive(Debug)]
pub struct ShellSurface {
    pub view: Handle,
}

#[derive(Debug)]
pub struct XdgSurface {
    pub view: Handle,
}

#[derive(Debug)]
pub struct XdgToplevel {
    pub view: Handle,
}

#[derive(Debug)]
pub struct XdgPopup {
    pub view: Handle,
}

/// The view backing `sid`, created on first role attach.
fn view_for_surface(comp: &mut Compositor, sid: Resource) -> Handle {
    let existing = comp
        .surfaces
        .get(sid)
        .map(|s| s.view)
        .unwrap_or(Handle::NONE);
    if existing != Handle::NONE {
        return existing;
    }
    view::view_new(comp, sid)
}

fn role_is_free(comp: &Compositor, vid: Handle, wire: &WireHandle) -> bool {
    let free = comp
        .views
        .get(vid)
        .map(|v| matches!(v.role, Role::None))
        .unwrap_or(false);
    if !free {
        wire.post_error(ProtocolError::InvalidMethod, "surface already has a role");
    }
    free
}

/// wl_shell.get_shell_surface.
pub fn shell_surface_new(comp: &mut Compositor, wire: WireHandle, sid: Resource) -> Resource {
    if !comp.surfaces.contains(sid) {
        wire.post_error(ProtocolError::BadSurface, "unknown surface");
        return Resource::NONE;
    }
    let vid = view_for_surface(comp, sid);
    if !role_is_free(comp, vid, &wire) {
        return Resource::NONE;
    }

    let id = comp.shell_surfaces.create(ShellSurface { view: vid });
    comp.registry.bind_wire(id, "shell-surface", wire);
    if let Some(v) = comp.views.get_mut(vid) {
        v.role = Role::Shell(id);
    }
    id
}

/// xdg_shell.get_xdg_surface + the implicit toplevel role.
pub fn xdg_surface_new(comp: &mut Compositor, wire: WireHandle, sid: Resource) -> Resource {
    if !comp.surfaces.contains(sid) {
        wire.post_error(ProtocolError::BadSurface, "unknown surface");
        return Resource::NONE;
    }
    let vid = view_for_surface(comp, sid);
    if !role_is_free(comp, vid, &wire) {
        return Resource::NONE;
    }

    let id = comp.xdg_surfaces.create(XdgSurface { view: vid });
    comp.registry.bind_wire(id, "xdg-surface", wire);
    id
}

/// xdg_surface.get_toplevel.
pub fn xdg_toplevel_new(comp: &mut Compositor, wire: WireHandle, xdg_surface: Resource) -> Resource {
    let Some(vid) = comp.xdg_surfaces.get(xdg_surface).map(|x| x.view) else {
        wire.post_error(ProtocolError::BadSurface, "unknown xdg_surface");
        return Resource::NONE;
    };

    let id = comp.xdg_toplevels.create(XdgToplevel { view: vid });
    comp.registry.bind_wire(id, "xdg-toplevel", wire);
    if let Some(v) = comp.views.get_mut(vid) {
        v.role = Role::Xdg {
            surface: xdg_surface,
            toplevel: id,
        };
    }
    id
}

/// xdg_surface.get_popup (or the standalone xdg_shell v5 popup): positioned
/// relative to the parent surface's view.
pub fn xdg_popup_new(
    comp: &mut Compositor,
    wire: WireHandle,
    sid: Resource,
    parent_sid: Resource,
    offset: Point,
) -> Resource {
    if !comp.surfaces.contains(sid) || !comp.surfaces.contains(parent_sid) {
        wire.post_error(ProtocolError::BadSurface, "unknown surface");
        return Resource::NONE;
    }
    let vid = view_for_surface(comp, sid);
    if !role_is_free(comp, vid, &wire) {
        return Resource::NONE;
    }

    let xdg_surface = comp.xdg_surfaces.create(XdgSurface { view: vid });
    let id = comp.xdg_popups.create(XdgPopup { view: vid });
    comp.registry.bind_wire(id, "xdg-popup", wire);

    let parent_view = comp
        .surfaces
        .get(parent_sid)
        .map(|s| s.view)
        .unwrap_or(Handle::NONE);
    if let Some(v) = comp.views.get_mut(vid) {
        v.role = Role::XdgPopup {
            surface: xdg_surface,
            popup: id,
        };
        v.kind |= kind::POPUP;
        v.parent = parent_view;
        v.pending.geometry.origin = offset;
    }
    id
}

// --- client requests -----------------------------------------------------

fn request_move(comp: &mut Compositor) {
    let focused = comp.seat.pointer.focused_view;
    if focused == Handle::NONE {
        return;
    }
    trace!(target: channel::REQUEST, "({focused:?}) requested move");
    pointer::pointer_begin_grab(comp, GrabAction::Move, 0);
    let origin = comp.seat.pointer.position();
    comp.notify_handler(move |h, c| h.view_request_move(c, focused, origin));
}

fn request_resize(comp: &mut Compositor, edges: u32) {
    let focused = comp.seat.pointer.focused_view;
    if focused == Handle::NONE {
        return;
    }
    trace!(target: channel::REQUEST, "({focused:?}) requested resize");
    pointer::pointer_begin_grab(comp, GrabAction::Resize, edges);
    let origin = comp.seat.pointer.position();
    comp.notify_handler(move |h, c| h.view_request_resize(c, focused, edges, origin));
}

pub fn toplevel_move(comp: &mut Compositor, _toplevel: Resource) {
    request_move(comp);
}

pub fn toplevel_resize(comp: &mut Compositor, _toplevel: Resource, edges: u32) {
    request_resize(comp, edges);
}

pub fn shell_surface_move(comp: &mut Compositor, _shell: Resource) {
    request_move(comp);
}

pub fn shell_surface_resize(comp: &mut Compositor, _shell: Resource, edges: u32) {
    request_resize(comp, edges);
}

pub fn toplevel_set_title(comp: &mut Compositor, toplevel: Resource, title: String) {
    if let Some(vid) = comp.xdg_toplevels.get(toplevel).map(|t| t.view) {
        view::view_set_title(comp, vid, Some(title));
    }
}

pub fn toplevel_set_app_id(comp: &mut Compositor, toplevel: Resource, app_id: String) {
    if let Some(vid) = comp.xdg_toplevels.get(toplevel).map(|t| t.view) {
        view::view_set_app_id(comp, vid, Some(app_id));
    }
}

pub fn toplevel_set_parent(comp: &mut Compositor, toplevel: Resource, parent: Resource) {
    let Some(vid) = comp.xdg_toplevels.get(toplevel).map(|t| t.view) else {
        return;
    };
    let parent_view = comp
        .xdg_toplevels
        .get(parent)
        .map(|t| t.view)
        .unwrap_or(Handle::NONE);
    view::view_set_parent(comp, vid, parent_view);
}

pub fn toplevel_request_state(comp: &mut Compositor, toplevel: Resource, state_bit: u32, on: bool) {
    if let Some(vid) = comp.xdg_toplevels.get(toplevel).map(|t| t.view) {
        view::view_request_state(comp, vid, state_bit, on);
    }
}

/// xdg_surface.set_window_geometry: the client's visible-content hint.
pub fn xdg_surface_set_window_geometry(
    comp: &mut Compositor,
    xdg_surface: Resource,
    geometry: Geometry,
) {
    let Some(vid) = comp.xdg_surfaces.get(xdg_surface).map(|x| x.view) else {
        return;
    };
    if let Some(v) = comp.views.get_mut(vid) {
        v.pending.visible = geometry;
    }
}

pub fn shell_surface_set_title(comp: &mut Compositor, shell: Resource, title: String) {
    if let Some(vid) = comp.shell_surfaces.get(shell).map(|s| s.view) {
        view::view_set_title(comp, vid, Some(title));
    }
}

pub fn shell_surface_set_class(comp: &mut Compositor, shell: Resource, class: String) {
    if let Some(vid) = comp.shell_surfaces.get(shell).map(|s| s.view) {
        view::view_set_class(comp, vid, Some(class));
    }
}

pub fn shell_surface_request_state(comp: &mut Compositor, shell: Resource, state_bit: u32, on: bool) {
    if let Some(vid) = comp.shell_surfaces.get(shell).map(|s| s.view) {
        view::view_request_state(comp, vid, state_bit, on);
    }
}

/// wl_shell_surface.set_toplevel clears fullscreen/maximised.
pub fn shell_surface_set_toplevel(comp: &mut Compositor, shell: Resource) {
    if let Some(vid) = comp.shell_surfaces.get(shell).map(|s| s.view) {
        view::view_request_state(comp, vid, bit::FULLSCREEN, false);
        view::view_request_state(comp, vid, bit::MAXIMIZED, false);
    }
}

// --- teardown ------------------------------------------------------------

fn drop_role(comp: &mut Compositor, vid: Handle) {
    view::view_unmap(comp, vid);
    if let Some(v) = comp.views.get_mut(vid) {
        v.role = Role::None;
    }
}

pub fn shell_surface_wire_destroyed(comp: &mut Compositor, shell: Resource) {
    if let Some(released) = comp.shell_surfaces.release(shell) {
        drop_role(comp, released.value.view);
    }
}

pub fn xdg_surface_wire_destroyed(comp: &mut Compositor, xdg_surface: Resource) {
    comp.xdg_surfaces.release(xdg_surface);
}

pub fn xdg_toplevel_wire_destroyed(comp: &mut Compositor, toplevel: Resource) {
    if let Some(released) = comp.xdg_toplevels.release(toplevel) {
        drop_role(comp, released.value.view);
    }
}

pub fn xdg_popup_wire_destroyed(comp: &mut Compositor, popup: Resource) {
    if let Some(released) = comp.xdg_popups.release(popup) {
        let vid = released.value.view;
        if let Some(Role::XdgPopup { surface, .. }) = comp.views.get(vid).map(|v| v.role) {
            comp.xdg_surfaces.release(surface);
        }
        drop_role(comp, vid);
    }
}
