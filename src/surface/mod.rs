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

//! wl_surface: double-buffered state, the commit protocol, and the
//! sub-surface tree. All client requests stage into `pending`; `commit`
//! atomically publishes them, clamping regions to the surface size and
//! moving the buffer reference.

pub mod buffer;
pub mod subsurface;

use crate::compositor::Compositor;
use crate::geometry::CoordinateTransform;
use crate::geometry::Geometry;
use crate::geometry::Point;
use crate::geometry::Size;
use crate::geometry::Transform;
use crate::output;
use crate::prelude::*;
use crate::region::Region;
use crate::registry::Handle;
use crate::registry::Resource;
use crate::renderer::SurfaceRenderData;
use crate::signals::Signal;
use crate::signals::SurfaceSignalKind;
use crate::utils::channel;
use crate::view;
use crate::wire::ProtocolError;
use crate::wire::WireEvent;
use crate::wire::WireHandle;

/// One side of a surface's double-buffered state.
#[derive(Debug, Default, Clone)]
pub struct SurfaceState {
    pub buffer: Resource,
    pub offset: Point,
    pub opaque: Region,
    /// None means the default infinite input region.
    pub input: Option<Region>,
    pub damage: Region,
    pub scale: u32,
    pub transform: Transform,
    pub frame_cbs: Vec<Resource>,
    pub attached: bool,
    pub subsurface_position: Point,
}

impl SurfaceState {
    fn new() -> Self {
        Self {
            scale: 1,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub struct Surface {
    pub size: Size,
    pub pending: SurfaceState,
    pub commit: SurfaceState,
    /// View this surface backs, if any. Mutually consistent with
    /// `View::surface`.
    pub view: Handle,
    /// Parent surface in the sub-surface tree.
    pub parent: Resource,
    /// The view owning the whole tree this surface hangs off.
    pub parent_view: Handle,
    pub output: Handle,
    pub render: SurfaceRenderData,
    pub coordinate_transform: CoordinateTransform,
    pub subsurfaces: Vec<Resource>,
    /// wl_subsurface.set_sync state; only meaningful with a parent.
    pub synchronized: bool,
}

impl Surface {
    pub fn new() -> Self {
        Self {
            size: Size::ZERO,
            pending: SurfaceState::new(),
            commit: SurfaceState::new(),
            view: Handle::NONE,
            parent: Resource::NONE,
            parent_view: Handle::NONE,
            output: Handle::NONE,
            render: SurfaceRenderData::default(),
            coordinate_transform: CoordinateTransform::default(),
            subsurfaces: Vec::new(),
            synchronized: false,
        }
    }

    pub fn bounds(&self) -> Geometry {
        Geometry::from_size(self.size)
    }

    /// Extents of the committed opaque region, clamped to the surface.
    pub fn opaque_extents(&self) -> Geometry {
        let mut extents = self.commit.opaque.extents();
        extents.clamp_within(self.bounds());
        extents
    }
}

impl Default for Surface {
    fn default() -> Self {
        Self::new()
    }
}

trait ClampWithin {
    fn clamp_within(&mut self, bounds: Geometry);
}

impl ClampWithin for Geometry {
    fn clamp_within(&mut self, bounds: Geometry) {
        *self = self.intersection(&bounds).unwrap_or(Geometry::ZERO);
    }
}

/// wl_compositor.create_surface.
pub fn surface_new(comp: &mut Compositor, wire: WireHandle) -> Resource {
    let id = comp.surfaces.create(Surface::new());
    comp.registry.bind_wire(id, "surface", wire);
    comp.signals.emit(Signal::Surface {
        surface: id,
        kind: SurfaceSignalKind::Created,
    });
    id
}

/// wl_surface.attach: stages a buffer and offset.
pub fn surface_attach(comp: &mut Compositor, sid: Resource, buffer: Resource, offset: Point) {
    if buffer != Resource::NONE && !comp.buffers.contains(buffer) {
        warn!("attach of unknown buffer {buffer:?} to {sid:?}");
        return;
    }

    state_set_buffer(comp, sid, Staged::Pending, buffer);

    let Some(surface) = comp.surfaces.get_mut(sid) else {
        return;
    };
    if let Some(b) = comp.buffers.get_mut(buffer) {
        b.surface = sid;
    }
    surface.pending.offset = offset;
    surface.pending.attached = true;
    trace!(target: channel::RENDER, "-> Attach request");
}

/// wl_surface.damage: unions into pending damage.
pub fn surface_damage(comp: &mut Compositor, sid: Resource, rect: Geometry) {
    if let Some(surface) = comp.surfaces.get_mut(sid) {
        surface.pending.damage.add(rect);
    }
}

/// wl_surface.frame: appends a callback resource to pending frame-cbs.
pub fn surface_frame(comp: &mut Compositor, sid: Resource, callback: WireHandle) -> Resource {
    if !comp.surfaces.contains(sid) {
        return Resource::NONE;
    }
    let id = comp.callbacks.create(FrameCallback);
    comp.registry.bind_wire(id, "callback", callback);
    comp.surfaces
        .get_mut(sid)
        .expect("checked above")
        .pending
        .frame_cbs
        .push(id);
    id
}

/// Empty container; the interesting half is the wire object.
#[derive(Debug)]
pub struct FrameCallback;

pub fn surface_set_opaque_region(comp: &mut Compositor, sid: Resource, region: Option<Resource>) {
    let staged = region
        .and_then(|r| comp.regions.get(r))
        .cloned()
        .unwrap_or_default();
    if let Some(surface) = comp.surfaces.get_mut(sid) {
        surface.pending.opaque = staged;
    }
}

pub fn surface_set_input_region(comp: &mut Compositor, sid: Resource, region: Option<Resource>) {
    let staged = match region {
        Some(r) => comp.regions.get(r).cloned(),
        None => None,
    };
    if let Some(surface) = comp.surfaces.get_mut(sid) {
        surface.pending.input = staged;
    }
}

/// wl_surface.set_buffer_transform. Out-of-range transforms are a protocol
/// violation; state is untouched.
pub fn surface_set_buffer_transform(comp: &mut Compositor, sid: Resource, transform: i32) {
    let parsed = u32::try_from(transform)
        .ok()
        .and_then(|t| Transform::try_from(t).ok());
    let Some(transform) = parsed else {
        if let Some(wire) = comp.registry.wire(sid, "surface") {
            wire.post_error(
                ProtocolError::InvalidTransform,
                &format!("buffer transform must be a valid transform ({transform} specified)"),
            );
        }
        return;
    };
    if let Some(surface) = comp.surfaces.get_mut(sid) {
        surface.pending.transform = transform;
    }
}

/// wl_surface.set_buffer_scale. Zero or negative scale is a protocol
/// violation; state is untouched.
pub fn surface_set_buffer_scale(comp: &mut Compositor, sid: Resource, scale: i32) {
    if scale < 1 {
        if let Some(wire) = comp.registry.wire(sid, "surface") {
            wire.post_error(
                ProtocolError::InvalidScale,
                &format!("scale must be >= 1 (scale: {scale})"),
            );
        }
        return;
    }
    if let Some(surface) = comp.surfaces.get_mut(sid) {
        surface.pending.scale = scale as u32;
    }
}

/// wl_surface.commit. A synchronised sub-surface caches its state until the
/// parent commits.
pub fn surface_commit(comp: &mut Compositor, sid: Resource) {
    if subsurface::is_effectively_synchronized(comp, sid) {
        return;
    }
    commit_subsurface_state(comp, sid);
}

/// Commits a surface, then walks the whole subtree depth-first. Effective
/// synchronisation is transitive: a child reached through the cascade is
/// published with its ancestor no matter what its own sync flag says, so a
/// desynchronised grandchild below a synchronised child cannot get stuck
/// with cached state that nothing will ever flush.
fn commit_subsurface_state(comp: &mut Compositor, sid: Resource) {
    commit_state(comp, sid);

    let children = match comp.surfaces.get(sid) {
        Some(surface) => surface.subsurfaces.clone(),
        None => return,
    };
    for child in children {
        let Some(sub) = comp.surfaces.get_mut(child) else {
            continue;
        };
        // Position is parent state: it latches on the parent commit.
        sub.commit.subsurface_position = sub.pending.subsurface_position;
        commit_subsurface_state(comp, child);
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Staged {
    Pending,
    Committed,
}

/// Points a state at `new_buffer`, moving exactly one reference: the old
/// buffer loses one (possibly dying with a queued release), the new one
/// gains one.
fn state_set_buffer(comp: &mut Compositor, sid: Resource, which: Staged, new_buffer: Resource) {
    let Some(surface) = comp.surfaces.get(sid) else {
        return;
    };
    let old = match which {
        Staged::Pending => surface.pending.buffer,
        Staged::Committed => surface.commit.buffer,
    };
    if old == new_buffer {
        return;
    }

    buffer::buffer_dispose(comp, old);
    let held = buffer::buffer_use(comp, new_buffer);
    if let Some(surface) = comp.surfaces.get_mut(sid) {
        match which {
            Staged::Pending => surface.pending.buffer = held,
            Staged::Committed => surface.commit.buffer = held,
        }
    }
}

fn commit_state(comp: &mut Compositor, sid: Resource) {
    let (pending_buffer, attached) = {
        let Some(surface) = comp.surfaces.get_mut(sid) else {
            return;
        };

        surface.commit.scale = surface.pending.scale.max(1);
        surface.commit.transform = surface.pending.transform;
        surface.commit.offset = surface.pending.offset;
        surface.pending.offset = Point::ZERO;

        let staged_cbs = std::mem::take(&mut surface.pending.frame_cbs);
        surface.commit.frame_cbs.extend(staged_cbs);

        let bounds = surface.bounds();
        let pending_damage = std::mem::take(&mut surface.pending.damage);
        surface.commit.damage.add_region(&pending_damage);
        surface.commit.damage.clamp(bounds);

        let mut opaque = surface.pending.opaque.clone();
        opaque.clamp(bounds);
        surface.commit.opaque = opaque;

        surface.commit.input = surface.pending.input.clone().map(|mut input| {
            input.clamp(bounds);
            input
        });

        (surface.pending.buffer, surface.pending.attached)
    };

    if attached {
        apply_surface_attach(comp, sid, pending_buffer);
        if let Some(surface) = comp.surfaces.get_mut(sid) {
            surface.pending.attached = false;
        }
    }

    state_set_buffer(comp, sid, Staged::Committed, pending_buffer);
    state_set_buffer(comp, sid, Staged::Pending, Resource::NONE);
    trace!(target: channel::COMMIT, "=> commit surface {sid:?}");
}

/// The attach side effects: (re)binds the surface to its output's renderer,
/// updates the size, and maps or unmaps the owning view.
fn apply_surface_attach(comp: &mut Compositor, sid: Resource, buffer: Resource) {
    let Some(surface) = comp.surfaces.get(sid) else {
        return;
    };
    let output = surface.output;
    let view = surface.view;
    let old_size = surface.size;

    surface_attach_to_output(comp, sid, output, buffer);

    if view != Handle::NONE {
        if buffer != Resource::NONE {
            view::view_map(comp, view);
            view::view_ack_surface_attach(comp, view, sid, old_size);
        } else {
            view::view_unmap(comp, view);
        }
    }
}

/// Uploads `buffer` through the output's renderer and recomputes the
/// surface size (`buffer.size / scale`, min 1x1) and coordinate transform.
/// On renderer failure the previous texture stays; the surface is detached
/// from the output so the next valid commit can retry.
pub fn surface_attach_to_output(
    comp: &mut Compositor,
    sid: Resource,
    oid: Handle,
    buffer: Resource,
) -> bool {
    if !comp.surfaces.contains(sid) || !comp.outputs.contains(oid) {
        return false;
    }

    let previous_output = comp.surfaces.get(sid).expect("checked above").output;
    let new_surface = previous_output != oid;
    if new_surface {
        surface_invalidate(comp, sid);
    }

    let buffer_info = comp
        .buffers
        .get(buffer)
        .map(|b| (b.backing.clone(), b.size));

    let mut size = buffer_info
        .as_ref()
        .map(|(_, size)| *size)
        .unwrap_or(Size::ZERO)
        .clamp_min_area();

    {
        let Compositor {
            surfaces, outputs, ..
        } = comp;
        let surface = surfaces.get_mut(sid).expect("checked above");
        let output_rec = outputs.get_mut(oid).expect("checked above");

        size.w /= surface.commit.scale;
        size.h /= surface.commit.scale;

        if let Some((backing, _)) = &buffer_info {
            let Some(renderer) = output_rec.renderer.as_mut() else {
                return false;
            };
            if renderer
                .surface_attach(&mut surface.render, backing, size)
                .warn(loc!())
                .is_err()
            {
                surface.output = Handle::NONE;
                return false;
            }
        }

        surface.output = oid;
        surface.size = size;
        surface.commit.attached = buffer != Resource::NONE;
        if new_surface {
            output_rec.surfaces.push(sid);
            trace!(
                target: channel::RENDER,
                "-> Attached surface ({sid:?}) to output ({oid:?})"
            );
        }
    }

    if new_surface {
        if let Some(surface_wire) = comp.registry.wire(sid, "surface") {
            if let Some(output_object) =
                output::output_bind_object(comp, oid, surface_wire.client())
            {
                surface_wire.send(WireEvent::SurfaceEnter {
                    output: output_object,
                });
            }
        }
    }

    update_coordinate_transform(comp, sid);
    output::scheduler::schedule_repaint(comp, oid);
    true
}

/// The ratio of the view's visible area to the surface size, composed with
/// the parent surface's transform for sub-surfaces.
fn update_coordinate_transform(comp: &mut Compositor, sid: Resource) {
    let Some(surface) = comp.surfaces.get(sid) else {
        return;
    };
    let size = surface.size;
    let view = surface.view;
    let parent = surface.parent;

    let mut transform = match comp.views.get(view).is_some() {
        true => {
            let (_, visible) = view::view_get_bounds(comp, view);
            CoordinateTransform::between(visible.size, size)
        },
        false => CoordinateTransform::default(),
    };

    if let Some(p) = comp.surfaces.get(parent) {
        transform.w *= p.coordinate_transform.w;
        transform.h *= p.coordinate_transform.h;
    }

    if let Some(surface) = comp.surfaces.get_mut(sid) {
        surface.coordinate_transform = transform;
    }
}

/// Binds surface and view to each other, breaking any previous link on
/// either side.
pub fn surface_attach_to_view(comp: &mut Compositor, sid: Resource, vid: Handle) {
    let old_view = match comp.surfaces.get(sid) {
        Some(s) => s.view,
        None => return,
    };
    if old_view == vid {
        return;
    }

    if let Some(old) = comp.views.get_mut(old_view) {
        old.surface = Resource::NONE;
    }
    if let Some(view) = comp.views.get_mut(vid) {
        let old_surface = view.surface;
        if let Some(s) = comp.surfaces.get_mut(old_surface) {
            s.view = Handle::NONE;
            s.parent_view = Handle::NONE;
        }
        view.surface = sid;
    }
    if let Some(surface) = comp.surfaces.get_mut(sid) {
        surface.view = vid;
        surface.parent_view = vid;
    }
}

/// Drops the renderer-side state and detaches from the output. Committed
/// content is kept, so a later attach can revalidate.
pub fn surface_invalidate(comp: &mut Compositor, sid: Resource) {
    let Some(surface) = comp.surfaces.get(sid) else {
        return;
    };
    let oid = surface.output;
    if oid == Handle::NONE {
        return;
    }
    output::output_surface_destroy(comp, oid, sid);
}

/// The wl_surface died: tear down children links, the view binding, and the
/// committed buffer references.
pub fn surface_wire_destroyed(comp: &mut Compositor, sid: Resource) {
    subsurface::orphan_children(comp, sid);
    subsurface::detach_from_parent(comp, sid);

    state_set_buffer(comp, sid, Staged::Committed, Resource::NONE);
    state_set_buffer(comp, sid, Staged::Pending, Resource::NONE);

    surface_invalidate(comp, sid);

    let view = comp.surfaces.get(sid).map(|s| s.view).unwrap_or_default();
    if view != Handle::NONE {
        view::view_unmap(comp, view);
        if let Some(v) = comp.views.get_mut(view) {
            v.surface = Resource::NONE;
        }
    }

    if let Some(released) = comp.surfaces.release(sid) {
        for cb in released
            .value
            .commit
            .frame_cbs
            .iter()
            .chain(released.value.pending.frame_cbs.iter())
        {
            if let Some(cb_released) = comp.callbacks.release(*cb) {
                if let Some(wire) = cb_released.wire {
                    wire.destroy();
                }
            }
        }
    }

    comp.signals.emit(Signal::Surface {
        surface: sid,
        kind: SurfaceSignalKind::Destroyed,
    });
}

/// wl_region requests; regions are plain resources holding a rect set.
pub fn region_new(comp: &mut Compositor, wire: WireHandle) -> Resource {
    let id = comp.regions.create(Region::new());
    comp.registry.bind_wire(id, "region", wire);
    id
}

pub fn region_add(comp: &mut Compositor, rid: Resource, rect: Geometry) {
    if let Some(region) = comp.regions.get_mut(rid) {
        region.add(rect);
    }
}

pub fn region_wire_destroyed(comp: &mut Compositor, rid: Resource) {
    comp.regions.release(rid);
}
