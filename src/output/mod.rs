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

//! Outputs: the information record, the stacking lists, wl_output binds,
//! and lifecycle (backend add/remove, reuse of surfaceless slots). The
//! repaint machinery lives in [`scheduler`].

pub mod scheduler;

use calloop::RegistrationToken;
use itertools::Itertools;

use crate::backend::BackendSurface;
use crate::compositor::Compositor;
use crate::geometry::Size;
use crate::geometry::Transform;
use crate::prelude::*;
use crate::registry::Handle;
use crate::registry::Resource;
use crate::renderer::Renderer;
use crate::surface;
use crate::utils::channel;
use crate::view;
use crate::wire::Subpixel;
use crate::wire::WireEvent;
use crate::wire::WireHandle;

pub mod mode_flag {
    pub const CURRENT: u32 = 0x1;
    pub const PREFERRED: u32 = 0x2;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct OutputMode {
    pub width: i32,
    pub height: i32,
    /// mHz, i.e. refresh rate multiplied by 1000.
    pub refresh: i32,
    pub flags: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ConnectorKind {
    Unknown,
    Vga,
    Dvi,
    Hdmi,
    DisplayPort,
    Edp,
    Lvds,
    /// Nested-compositor or X11 window acting as an output.
    Window,
}

#[derive(Debug, Clone)]
pub struct OutputInformation {
    pub make: String,
    pub model: String,
    pub physical_size: Size,
    pub subpixel: Subpixel,
    pub transform: Transform,
    pub scale: u32,
    pub connector: ConnectorKind,
    pub connector_id: u32,
    pub modes: Vec<OutputMode>,
}

impl Default for OutputInformation {
    fn default() -> Self {
        Self {
            make: "unknown".to_string(),
            model: "model".to_string(),
            physical_size: Size::ZERO,
            subpixel: Subpixel::Unknown,
            transform: Transform::Normal,
            scale: 1,
            connector: ConnectorKind::Unknown,
            connector_id: 0,
            modes: Vec::new(),
        }
    }
}

impl OutputInformation {
    pub fn current_mode(&self) -> Option<&OutputMode> {
        self.modes
            .iter()
            .find(|m| m.flags & mode_flag::CURRENT != 0)
            .or_else(|| {
                self.modes
                    .iter()
                    .find(|m| m.flags & mode_flag::PREFERRED != 0)
            })
            .or_else(|| self.modes.first())
    }
}

/// Scheduler bookkeeping, one block per output.
#[derive(Debug)]
pub struct RenderState {
    /// Timestamp handed to frame callbacks, ms, wrapping.
    pub frame_time: u32,
    /// Adaptive idle interval in ms. Decays under activity, grows while
    /// idle; constants in [`scheduler`]. Tunable.
    pub ims: f64,
    pub activity: bool,
    /// A page flip is in flight; repaints are no-ops until finish_frame.
    pub pending: bool,
    pub scheduled: bool,
    pub sleeping: bool,
    pub background_visible: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            frame_time: 0,
            ims: scheduler::IDLE_MAX_MS,
            activity: false,
            pending: false,
            scheduled: false,
            sleeping: false,
            background_visible: false,
        }
    }
}

/// Deferred operations that are unsafe while a flip is outstanding; drained
/// after every frame.
#[derive(Default)]
pub struct Tasks {
    /// Some(Some(_)) swaps the backend surface, Some(None) detaches.
    pub bsurface: Option<Option<BackendSurface>>,
    pub sleep: bool,
    pub terminate: bool,
    pub pixels: Option<Box<dyn FnOnce(Size, Vec<u8>)>>,
}

impl std::fmt::Debug for Tasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tasks")
            .field("bsurface", &self.bsurface.is_some())
            .field("sleep", &self.sleep)
            .field("terminate", &self.terminate)
            .field("pixels", &self.pixels.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct OutputTimers {
    pub idle: Option<RegistrationToken>,
    pub sleep: Option<RegistrationToken>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OutputLink {
    Above,
    Below,
}

pub struct Output {
    pub info: OutputInformation,
    pub resolution: Size,
    pub bsurface: Option<BackendSurface>,
    pub renderer: Option<Box<dyn Renderer>>,
    /// Surfaces with renderer state on this output.
    pub surfaces: Vec<Resource>,
    /// Stacking order, bottom first.
    pub views: Vec<Handle>,
    /// Stack order the embedder may rewrite wholesale via set_views.
    pub mutable: Vec<Handle>,
    pub active_mask: u32,
    pub state: RenderState,
    pub task: Tasks,
    pub timer: OutputTimers,
    pub enable_background: bool,
    pub idle_time_secs: u32,
}

impl Output {
    pub fn new(enable_background: bool, idle_time_secs: u32) -> Self {
        Self {
            info: OutputInformation::default(),
            resolution: Size::new(1, 1),
            bsurface: None,
            renderer: None,
            surfaces: Vec::new(),
            views: Vec::new(),
            mutable: Vec::new(),
            active_mask: !0,
            state: RenderState::default(),
            task: Tasks::default(),
            timer: OutputTimers::default(),
            enable_background,
            idle_time_secs,
        }
    }
}

/// Payload of a per-client wl_output bind.
#[derive(Debug)]
pub struct OutputBind {
    pub output: Handle,
}

/// wl_output bind: replays geometry, scale, and the mode list.
pub fn output_bind(comp: &mut Compositor, oid: Handle, wire: WireHandle) -> Resource {
    let Some(output) = comp.outputs.get(oid) else {
        return Resource::NONE;
    };

    wire.send(WireEvent::OutputGeometry {
        x: 0,
        y: 0,
        physical_width: output.info.physical_size.w as i32,
        physical_height: output.info.physical_size.h as i32,
        subpixel: output.info.subpixel,
        make: output.info.make.clone(),
        model: output.info.model.clone(),
        transform: output.info.transform as u32,
    });
    wire.send(WireEvent::OutputScale {
        factor: output.info.scale as i32,
    });
    for mode in &output.info.modes {
        wire.send(WireEvent::OutputMode {
            flags: mode.flags,
            width: mode.width,
            height: mode.height,
            refresh: mode.refresh,
        });
    }
    wire.send(WireEvent::OutputDone);

    let id = comp.output_binds.create(OutputBind { output: oid });
    comp.registry.bind_wire(id, "output-bind", wire);
    id
}

pub fn output_bind_wire_destroyed(comp: &mut Compositor, rid: Resource) {
    comp.output_binds.release(rid);
}

/// The client's wl_output object for `oid`, for wl_surface.enter/leave.
pub fn output_bind_object(
    comp: &Compositor,
    oid: Handle,
    client: crate::wire::ClientId,
) -> Option<crate::wire::ObjectId> {
    comp.output_binds.iter().find_map(|(rid, bind)| {
        if bind.output != oid {
            return None;
        }
        comp.output_binds
            .wire_of(rid)
            .filter(|w| w.client() == client)
            .map(|w| w.object)
    })
}

/// New output from a backend ADD event. Surfaceless slots are reused; new
/// slots are reported through `output_created` (a false return destroys the
/// output again).
pub fn output_add(
    comp: &mut Compositor,
    info: OutputInformation,
    bsurface: BackendSurface,
) -> Handle {
    let reused = comp
        .outputs
        .iter()
        .find(|(_, o)| o.bsurface.is_none())
        .map(|(h, _)| h);

    let (oid, fresh) = match reused {
        Some(h) => (h, false),
        None => {
            let enable_bg = comp.config.enable_background;
            let idle = comp.config.idle_time_secs;
            (comp.outputs.create(Output::new(enable_bg, idle)), true)
        },
    };

    if fresh {
        let accepted = comp
            .with_handler(|h, c| h.output_created(c, oid))
            .unwrap_or(true);
        if !accepted {
            comp.outputs.release(oid);
            return Handle::NONE;
        }
    }

    output_set_information(comp, oid, info);
    scheduler::set_backend_surface(comp, oid, Some(bsurface));

    if comp.focused_output == Handle::NONE {
        output_focus(comp, oid);
    }

    scheduler::schedule_repaint(comp, oid);
    scheduler::arm_sleep(comp, oid);
    info!("Added output ({oid:?})");
    oid
}

/// Backend REMOVE event (or deferred terminate): detach, refocus, destroy.
pub fn output_remove(comp: &mut Compositor, oid: Handle) {
    let alive = comp
        .outputs
        .iter()
        .find(|(h, o)| *h != oid && o.bsurface.is_some())
        .map(|(h, _)| h)
        .unwrap_or(Handle::NONE);

    if comp.focused_output == oid {
        comp.focused_output = Handle::NONE;
        output_focus(comp, alive);
    }

    comp.notify_handler(move |h, c| h.output_destroyed(c, oid));
    scheduler::set_backend_surface(comp, oid, None);
    scheduler::disarm_timers(comp, oid);

    // Views move to whichever output survives.
    let orphans = comp
        .outputs
        .get(oid)
        .map(|o| o.views.clone())
        .unwrap_or_default();
    for vid in orphans {
        if alive != Handle::NONE {
            output_link_view(comp, alive, vid, OutputLink::Above, Handle::NONE);
        }
    }

    comp.outputs.release(oid);
    info!("Removed output ({oid:?})");

    if comp.terminating && alive == Handle::NONE {
        comp.loop_signal.stop();
    }
}

pub fn output_set_information(comp: &mut Compositor, oid: Handle, info: OutputInformation) {
    let resolution = info
        .current_mode()
        .map(|m| Size::new(m.width.max(1) as u32, m.height.max(1) as u32));
    if let Some(output) = comp.outputs.get_mut(oid) {
        output.info = info;
    }
    if let Some(resolution) = resolution {
        output_set_resolution(comp, oid, resolution);
    }
}

pub fn output_set_resolution(comp: &mut Compositor, oid: Handle, resolution: Size) {
    let Some(output) = comp.outputs.get_mut(oid) else {
        return;
    };
    if output.resolution == resolution {
        return;
    }
    let old = output.resolution;
    output.resolution = resolution;
    comp.notify_handler(move |h, c| h.output_resolution(c, oid, old, resolution));
    scheduler::schedule_repaint(comp, oid);
}

pub fn output_set_mask(comp: &mut Compositor, oid: Handle, mask: u32) {
    if let Some(output) = comp.outputs.get_mut(oid) {
        output.active_mask = mask;
    }
    scheduler::schedule_repaint(comp, oid);
}

/// Focus transfer with the `output_focus` callback pair.
pub fn output_focus(comp: &mut Compositor, oid: Handle) {
    trace!(
        target: channel::FOCUS,
        "focus output {:?} {oid:?}",
        comp.focused_output
    );
    if comp.focused_output == oid {
        return;
    }

    let old = comp.focused_output;
    if old != Handle::NONE {
        comp.notify_handler(move |h, c| h.output_focus(c, old, false));
        scheduler::schedule_repaint(comp, old);
    }

    comp.focused_output = oid;
    if oid != Handle::NONE {
        comp.notify_handler(move |h, c| h.output_focus(c, oid, true));
        scheduler::schedule_repaint(comp, oid);
    }
}

/// Inserts a view into the stacking list, above or below everything or
/// relative to `other`. Crossing outputs reports `view_move_to_output`.
pub fn output_link_view(
    comp: &mut Compositor,
    oid: Handle,
    vid: Handle,
    link: OutputLink,
    other: Handle,
) {
    if !comp.outputs.contains(oid) || !comp.views.contains(vid) {
        return;
    }

    let old_output = view::view_get_output(comp, vid);
    if let Some(old) = comp.outputs.get_mut(old_output) {
        old.views.retain(|v| *v != vid);
        if old_output != oid {
            old.mutable.retain(|v| *v != vid);
        }
    }

    let mut added = false;
    {
        let output = comp.outputs.get_mut(oid).expect("checked above");
        if other != Handle::NONE {
            if let Some(i) = output.views.iter().position(|v| *v == other) {
                let at = match link {
                    OutputLink::Above => i + 1,
                    OutputLink::Below => i,
                };
                output.views.insert(at, vid);
                added = true;
            }
        } else {
            match link {
                OutputLink::Above => output.views.push(vid),
                OutputLink::Below => output.views.insert(0, vid),
            }
            added = true;
        }

        if old_output != oid {
            output.mutable.push(vid);
        }
    }

    if old_output != oid {
        let created = comp.views.get(vid).map(|v| v.created).unwrap_or(false);
        if created {
            let to = if added { oid } else { Handle::NONE };
            comp.notify_handler(move |h, c| h.view_move_to_output(c, vid, old_output, to));
        }
    }

    if !added {
        return;
    }

    output_view_attach(comp, oid, vid);
    scheduler::schedule_repaint(comp, oid);
}

pub fn output_unlink_view(comp: &mut Compositor, oid: Handle, vid: Handle) {
    if view::view_get_output(comp, vid) != oid {
        return;
    }
    if let Some(output) = comp.outputs.get_mut(oid) {
        output.views.retain(|v| *v != vid);
        output.mutable.retain(|v| *v != vid);
    }
    scheduler::schedule_repaint(comp, oid);
}

/// Rebinds a view's surface to this output.
pub fn output_view_attach(comp: &mut Compositor, oid: Handle, vid: Handle) -> bool {
    let Some(sid) = comp.views.get(vid).map(|v| v.surface) else {
        return false;
    };
    let buffer = comp
        .surfaces
        .get(sid)
        .map(|s| {
            if s.commit.buffer != Resource::NONE {
                s.commit.buffer
            } else {
                s.pending.buffer
            }
        })
        .unwrap_or(Resource::NONE);
    surface::surface_attach_to_output(comp, sid, oid, buffer)
}

/// Wholesale stack rewrite from the embedder. Duplicates are accepted but
/// normalised away, order preserved by first occurrence.
pub fn output_set_views(comp: &mut Compositor, oid: Handle, views: &[Handle]) -> bool {
    if !comp.outputs.contains(oid) {
        return false;
    }
    let normalized: Vec<Handle> = views.iter().copied().unique().collect();
    {
        let output = comp.outputs.get_mut(oid).expect("checked above");
        output.views = normalized.clone();
        output.mutable = normalized.clone();
    }
    for vid in normalized {
        output_view_attach(comp, oid, vid);
    }
    scheduler::schedule_repaint(comp, oid);
    true
}

pub fn output_get_views(comp: &Compositor, oid: Handle) -> Vec<Handle> {
    comp.outputs
        .get(oid)
        .map(|o| o.views.clone())
        .unwrap_or_default()
}

pub fn output_get_mutable_views(comp: &Compositor, oid: Handle) -> Vec<Handle> {
    comp.outputs
        .get(oid)
        .map(|o| o.mutable.clone())
        .unwrap_or_default()
}

/// Detaches a surface from the output and drops its renderer state.
pub fn output_surface_destroy(comp: &mut Compositor, oid: Handle, sid: Resource) {
    if let Some(surface_wire) = comp.registry.wire(sid, "surface") {
        if let Some(output_object) = output_bind_object(comp, oid, surface_wire.client()) {
            surface_wire.send(WireEvent::SurfaceLeave {
                output: output_object,
            });
        }
    }
    {
        let Compositor {
            outputs, surfaces, ..
        } = comp;
        let Some(output) = outputs.get_mut(oid) else {
            return;
        };
        let Some(surface) = surfaces.get_mut(sid) else {
            return;
        };
        if let Some(renderer) = output.renderer.as_mut() {
            renderer.surface_destroy(&mut surface.render);
        }
        surface.output = Handle::NONE;
        output.surfaces.retain(|s| *s != sid);
    }
    scheduler::schedule_repaint(comp, oid);
    trace!(
        target: channel::RENDER,
        "-> Detached surface ({sid:?}) from output ({oid:?})"
    );
}

/// Deferred pixel readback; runs inside the next repaint.
pub fn output_get_pixels(
    comp: &mut Compositor,
    oid: Handle,
    callback: Box<dyn FnOnce(Size, Vec<u8>)>,
) {
    if let Some(output) = comp.outputs.get_mut(oid) {
        output.task.pixels = Some(callback);
    }
    scheduler::schedule_repaint(comp, oid);
}
