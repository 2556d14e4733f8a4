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

//! wl_subsurface. The parent owns the child set; children keep a weak
//! (id-based) parent reference used only for coordinate composition and
//! synchronisation checks, so the tree has no ownership cycles.

use crate::compositor::Compositor;
use crate::geometry::Point;
use crate::prelude::*;
use crate::registry::Handle;
use crate::registry::Resource;
use crate::surface::surface_attach_to_output;
use crate::wire::ProtocolError;
use crate::wire::WireHandle;

/// Payload of a wl_subsurface resource: the surface it controls.
#[derive(Debug)]
pub struct SubsurfaceLink {
    pub surface: Resource,
}

/// wl_subcompositor.get_subsurface. Self-parenting is a protocol violation
/// and creates nothing.
pub fn subsurface_new(
    comp: &mut Compositor,
    wire: WireHandle,
    sid: Resource,
    parent: Resource,
) -> Resource {
    if sid == parent {
        wire.post_error(
            ProtocolError::BadSurface,
            "surface cannot be its own parent",
        );
        return Resource::NONE;
    }
    if !comp.surfaces.contains(sid) || !comp.surfaces.contains(parent) {
        wire.post_error(ProtocolError::BadSurface, "unknown surface");
        return Resource::NONE;
    }

    let id = comp.subsurface_links.create(SubsurfaceLink { surface: sid });
    comp.registry.bind_wire(id, "subsurface", wire);
    surface_set_parent(comp, sid, parent);
    id
}

/// Re-parents `sid` under `parent` (or detaches with NONE), mirroring the
/// link on both sides and rebinding the child to the parent's output.
pub fn surface_set_parent(comp: &mut Compositor, sid: Resource, parent: Resource) {
    let Some(old_parent) = comp.surfaces.get(sid).map(|s| s.parent) else {
        return;
    };
    if old_parent == parent {
        return;
    }

    if let Some(old) = comp.surfaces.get_mut(old_parent) {
        old.subsurfaces.retain(|child| *child != sid);
    }

    if parent == Resource::NONE {
        if let Some(surface) = comp.surfaces.get_mut(sid) {
            surface.parent = Resource::NONE;
            surface.parent_view = Handle::NONE;
        }
        return;
    }

    let (parent_output, parent_view) = {
        let Some(p) = comp.surfaces.get_mut(parent) else {
            return;
        };
        // New children start below previously placed ones.
        p.subsurfaces.insert(0, sid);
        (p.output, p.parent_view)
    };

    if let Some(surface) = comp.surfaces.get_mut(sid) {
        surface.parent = parent;
        surface.parent_view = parent_view;
    }

    let buffer = surface_get_buffer(comp, sid);
    surface_attach_to_output(comp, sid, parent_output, buffer);
}

fn surface_get_buffer(comp: &Compositor, sid: Resource) -> Resource {
    comp.surfaces
        .get(sid)
        .map(|s| {
            if s.commit.buffer != Resource::NONE {
                s.commit.buffer
            } else {
                s.pending.buffer
            }
        })
        .unwrap_or(Resource::NONE)
}

/// wl_subsurface.set_position: applied on the next parent commit.
pub fn subsurface_set_position(comp: &mut Compositor, link: Resource, position: Point) {
    let Some(sid) = comp.subsurface_links.get(link).map(|l| l.surface) else {
        return;
    };
    if let Some(surface) = comp.surfaces.get_mut(sid) {
        surface.pending.subsurface_position = position;
    }
}

pub fn subsurface_set_sync(comp: &mut Compositor, link: Resource, synchronized: bool) {
    let Some(sid) = comp.subsurface_links.get(link).map(|l| l.surface) else {
        return;
    };
    if let Some(surface) = comp.surfaces.get_mut(sid) {
        surface.synchronized = synchronized;
    }
}

/// wl_subsurface.place_above / place_below relative to a sibling (or the
/// parent itself for place_above).
pub fn subsurface_place(comp: &mut Compositor, link: Resource, sibling: Resource, above: bool) {
    let Some(sid) = comp.subsurface_links.get(link).map(|l| l.surface) else {
        return;
    };
    let Some(parent) = comp.surfaces.get(sid).map(|s| s.parent) else {
        return;
    };
    let Some(p) = comp.surfaces.get_mut(parent) else {
        return;
    };

    let Some(from) = p.subsurfaces.iter().position(|c| *c == sid) else {
        return;
    };
    p.subsurfaces.remove(from);

    let to = if sibling == parent {
        if above { p.subsurfaces.len() } else { 0 }
    } else {
        match p.subsurfaces.iter().position(|c| *c == sibling) {
            Some(i) => {
                if above {
                    i + 1
                } else {
                    i
                }
            },
            None => {
                warn!("place_above/below with non-sibling {sibling:?}");
                p.subsurfaces.insert(from.min(p.subsurfaces.len()), sid);
                return;
            },
        }
    };
    p.subsurfaces.insert(to, sid);
}

/// True when the surface is synchronised itself or through any ancestor.
pub fn is_effectively_synchronized(comp: &Compositor, sid: Resource) -> bool {
    let mut current = sid;
    let mut hops = 0;
    while let Some(surface) = comp.surfaces.get(current) {
        if surface.parent == Resource::NONE {
            return false;
        }
        if surface.synchronized {
            return true;
        }
        current = surface.parent;
        // The tree is acyclic by construction; the guard is for corrupted
        // client state.
        hops += 1;
        if hops > 64 {
            return false;
        }
    }
    false
}

/// The wl_subsurface object died: the surface becomes a plain surface
/// again.
pub fn subsurface_wire_destroyed(comp: &mut Compositor, link: Resource) {
    let surface = comp.subsurface_links.release(link).map(|r| r.value.surface);
    if let Some(sid) = surface {
        surface_set_parent(comp, sid, Resource::NONE);
        if let Some(s) = comp.surfaces.get_mut(sid) {
            s.synchronized = false;
        }
    }
}

/// Detaches every child when a parent surface dies.
pub fn orphan_children(comp: &mut Compositor, sid: Resource) {
    let children = match comp.surfaces.get(sid) {
        Some(s) => s.subsurfaces.clone(),
        None => return,
    };
    for child in children {
        surface_set_parent(comp, child, Resource::NONE);
    }
}

/// Removes a dying surface from its parent's child list.
pub fn detach_from_parent(comp: &mut Compositor, sid: Resource) {
    surface_set_parent(comp, sid, Resource::NONE);
}
