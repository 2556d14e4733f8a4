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

//! The per-output repaint loop.
//!
//! `schedule_repaint` marks activity and arms the idle timer for 1 ms; the
//! timer runs `repaint`; the backend's flip completion runs `finish_frame`,
//! which adapts the idle interval and re-arms while there is activity.
//! Exactly one flip is outstanding per output: repaint while `pending` only
//! drains deferred tasks.

use std::time::Duration;

use calloop::timer::TimeoutAction;
use calloop::timer::Timer;

use crate::backend::BackendSurface;
use crate::compositor::Compositor;
use crate::geometry::Geometry;
use crate::output::output_remove;
use crate::prelude::*;
use crate::region::Region;
use crate::registry::Handle;
use crate::registry::Resource;
use crate::renderer::PaintProperties;
use crate::seat;
use crate::signals::Signal;
use crate::surface;
use crate::utils;
use crate::utils::channel;
use crate::view;
use crate::wire::WireEvent;

/// Adaptive idle interval bounds and factors, in ms. Inherited values;
/// tunable but load-bearing for the repaint pacing tests.
pub const IDLE_MIN_MS: f64 = 1.0;
pub const IDLE_MAX_MS: f64 = 41.0;
pub const IDLE_DECAY: f64 = 0.9;
pub const IDLE_GROW: f64 = 1.1;

/// Marks activity and arms the idle timer for an immediate (1 ms) repaint
/// unless one is already scheduled.
pub fn schedule_repaint(comp: &mut Compositor, oid: Handle) {
    let Some(output) = comp.outputs.get_mut(oid) else {
        return;
    };

    if !output.state.activity {
        trace!(target: channel::RENDER_LOOP, "-> Activity marked");
    }
    output.state.activity = true;

    if output.state.scheduled {
        return;
    }
    output.state.scheduled = true;
    arm_idle(comp, oid, Duration::from_millis(1));
    trace!(target: channel::RENDER_LOOP, "-> Repaint scheduled");
}

fn arm_idle(comp: &mut Compositor, oid: Handle, after: Duration) {
    if let Some(token) = comp
        .outputs
        .get_mut(oid)
        .and_then(|o| o.timer.idle.take())
    {
        comp.loop_handle.remove(token);
    }
    let token = comp
        .loop_handle
        .insert_source(Timer::from_duration(after), move |_, _, comp| {
            if let Some(output) = comp.outputs.get_mut(oid) {
                output.timer.idle = None;
            }
            repaint(comp, oid);
            comp.drain_signals();
            TimeoutAction::Drop
        })
        .map_err(|e| anyhow!("failed to arm idle timer: {e:?}"))
        .log(loc!())
        .ok();
    if let Some(output) = comp.outputs.get_mut(oid) {
        output.timer.idle = token;
    }
}

/// (Re)arms the inactivity blanking timer.
pub fn arm_sleep(comp: &mut Compositor, oid: Handle) {
    let Some(secs) = comp.outputs.get(oid).map(|o| o.idle_time_secs) else {
        return;
    };
    if let Some(token) = comp
        .outputs
        .get_mut(oid)
        .and_then(|o| o.timer.sleep.take())
    {
        comp.loop_handle.remove(token);
    }
    let token = comp
        .loop_handle
        .insert_source(
            Timer::from_duration(Duration::from_secs(secs as u64)),
            move |_, _, comp| {
                if let Some(output) = comp.outputs.get_mut(oid) {
                    output.timer.sleep = None;
                }
                set_sleep(comp, oid, true);
                comp.drain_signals();
                TimeoutAction::Drop
            },
        )
        .map_err(|e| anyhow!("failed to arm sleep timer: {e:?}"))
        .log(loc!())
        .ok();
    if let Some(output) = comp.outputs.get_mut(oid) {
        output.timer.sleep = token;
    }
}

pub fn disarm_timers(comp: &mut Compositor, oid: Handle) {
    let (idle, sleep) = match comp.outputs.get_mut(oid) {
        Some(o) => (o.timer.idle.take(), o.timer.sleep.take()),
        None => return,
    };
    if let Some(token) = idle {
        comp.loop_handle.remove(token);
    }
    if let Some(token) = sleep {
        comp.loop_handle.remove(token);
    }
}

fn view_contains_output(comp: &Compositor, vid: Handle, oid: Handle) -> bool {
    let Some(output) = comp.outputs.get(oid) else {
        return false;
    };
    let root = Geometry::from_size(output.resolution);
    view::view_get_opaque(comp, vid).contains(&root)
}

/// Background is visible unless the opaque rects of the visible views cover
/// the whole output. The per-view opaque rect under-approximates real
/// opacity, so errors fall toward drawing the background.
fn background_is_visible(comp: &Compositor, oid: Handle) -> bool {
    let Some(output) = comp.outputs.get(oid) else {
        return false;
    };
    let root = Geometry::from_size(output.resolution);

    let mut covered = Region::new();
    for vid in &output.views {
        let Some(v) = comp.views.get(*vid) else {
            continue;
        };
        if v.mask & output.active_mask == 0 {
            continue;
        }
        covered.add(view::view_get_opaque(comp, *vid));
    }
    !covered.covers(root)
}

fn render_view(comp: &mut Compositor, oid: Handle, vid: Handle, callbacks: &mut Vec<Resource>) {
    let Some(v) = comp.views.get(vid) else {
        return;
    };
    let sid = v.surface;
    let mask = v.mask;
    let Some(s) = comp.surfaces.get(sid) else {
        return;
    };
    let attached = s.commit.attached;
    let active_mask = match comp.outputs.get(oid) {
        Some(o) => o.active_mask,
        None => return,
    };
    if !attached || mask & active_mask == 0 {
        return;
    }

    view::view_commit_state(comp, vid);
    comp.notify_handler(move |h, c| h.view_render_pre(c, vid));

    let (bounds, visible) = view::view_get_bounds(comp, vid);
    {
        let Compositor {
            outputs, surfaces, ..
        } = comp;
        let (Some(output), Some(s)) = (outputs.get_mut(oid), surfaces.get(sid)) else {
            return;
        };
        let Some(renderer) = output.renderer.as_mut() else {
            return;
        };
        renderer.view_paint(
            &s.render,
            &PaintProperties {
                geometry: bounds,
                visible,
                transform: s.commit.transform,
                scale: s.commit.scale,
            },
        );
    }

    comp.notify_handler(move |h, c| h.view_render_post(c, vid));

    if let Some(s) = comp.surfaces.get_mut(sid) {
        callbacks.append(&mut s.commit.frame_cbs);
    }
}

fn swap_and_flip(comp: &mut Compositor, oid: Handle) {
    let mut flip_in_flight = false;
    {
        let Some(output) = comp.outputs.get_mut(oid) else {
            return;
        };
        if let Some(renderer) = output.renderer.as_mut() {
            renderer.swap();
        }
        if let Some(bsurface) = &output.bsurface {
            flip_in_flight = bsurface.ops.page_flip(bsurface);
        }
    }
    if !flip_in_flight {
        finish_frame(comp, oid, utils::monotonic_time_ms());
    }
}

/// One frame. Returns false when skipped (inactive session, flip pending,
/// or no backend surface); deferred tasks still drain on the skip path.
pub fn repaint(comp: &mut Compositor, oid: Handle) -> bool {
    let Some(output) = comp.outputs.get(oid) else {
        return false;
    };

    let renderable = comp.active
        && !output.state.pending
        && output.bsurface.is_some()
        && output.renderer.is_some();
    if !renderable {
        trace!(target: channel::RENDER_LOOP, "-> Skipped repaint");
        if let Some(output) = comp.outputs.get_mut(oid) {
            output.state.activity = false;
            output.state.scheduled = false;
        }
        finish_frame_tasks(comp, oid);
        return false;
    }

    {
        let output = comp.outputs.get_mut(oid).expect("checked above");
        let time = output.state.frame_time;
        let resolution = output.resolution;
        let renderer = output.renderer.as_mut().expect("checked above");
        renderer.set_time(time);
        renderer.set_resolution(resolution);
    }

    if comp.outputs.get(oid).is_some_and(|o| o.state.sleeping) {
        let output = comp.outputs.get_mut(oid).expect("checked above");
        output.renderer.as_mut().expect("checked above").clear();
        output.state.pending = true;
        swap_and_flip(comp, oid);
        trace!(target: channel::RENDER_LOOP, "-> Repaint");
        return true;
    }

    comp.notify_handler(move |h, c| h.output_render_pre(c, oid));

    let views = comp
        .outputs
        .get(oid)
        .map(|o| o.views.clone())
        .unwrap_or_default();

    // If the top-most view fully covers the output, it is the only thing
    // painted and the background is trivially hidden. Otherwise the more
    // expensive coverage test runs.
    let last = views
        .last()
        .copied()
        .filter(|v| view_contains_output(comp, *v, oid));
    let visible = last.is_none() && background_is_visible(comp, oid);
    let draw_all = comp.config.draw_opaque;

    {
        let Some(output) = comp.outputs.get_mut(oid) else {
            return false;
        };
        let enable_bg = output.enable_background;
        let bg_visible = enable_bg && visible;
        if bg_visible && !output.state.background_visible {
            trace!(target: channel::RENDER_LOOP, "-> Background visible");
            output.state.background_visible = true;
        } else if !bg_visible && output.state.background_visible {
            trace!(target: channel::RENDER_LOOP, "-> Background not visible");
            output.state.background_visible = false;
        }

        let renderer = output.renderer.as_mut().expect("checked above");
        if output.state.background_visible {
            renderer.background();
        } else if !enable_bg {
            renderer.clear();
        }
    }

    let mut callbacks = Vec::with_capacity(32);
    match last {
        Some(last) if !draw_all => render_view(comp, oid, last, &mut callbacks),
        _ => {
            for vid in views {
                render_view(comp, oid, vid, &mut callbacks);
            }
        },
    }

    seat::pointer::render_pointer(comp, oid, &mut callbacks);
    comp.notify_handler(move |h, c| h.output_render_post(c, oid));

    if let Some(pixels) = comp.outputs.get_mut(oid).and_then(|o| o.task.pixels.take()) {
        let output = comp.outputs.get_mut(oid).expect("checked above");
        let geometry = Geometry::from_size(output.resolution);
        let rgba = output
            .renderer
            .as_mut()
            .expect("checked above")
            .read_pixels(geometry);
        pixels(geometry.size, rgba);
    }

    if let Some(output) = comp.outputs.get_mut(oid) {
        output.state.pending = true;
    }
    swap_and_flip(comp, oid);

    let frame_time = comp
        .outputs
        .get(oid)
        .map(|o| o.state.frame_time)
        .unwrap_or_default();
    for cb in callbacks {
        if let Some(released) = comp.callbacks.release(cb) {
            if let Some(wire) = released.wire {
                wire.send(WireEvent::CallbackDone {
                    time_ms: frame_time,
                });
                wire.destroy();
            }
        }
    }

    trace!(target: channel::RENDER_LOOP, "-> Repaint");
    true
}

/// Flip completion: clears `pending`, folds the inter-frame time into the
/// adaptive idle interval, and re-arms while there was activity (or the
/// background is up); otherwise scheduling stops until the next activity.
pub fn finish_frame(comp: &mut Compositor, oid: Handle, time_ms: u32) {
    let mut rearm = None;
    {
        let Some(output) = comp.outputs.get_mut(oid) else {
            return;
        };
        output.state.pending = false;

        // u32 ms wraps after ~50 days; wrapping_sub keeps the delta sane.
        let last = output.state.frame_time;
        output.state.frame_time = time_ms;
        let ms = output.state.frame_time.wrapping_sub(last);

        if (output.state.background_visible || output.state.activity) && !output.task.terminate {
            let factor = if output.state.activity {
                IDLE_DECAY
            } else {
                IDLE_GROW
            };
            output.state.ims = (output.state.ims * factor).clamp(IDLE_MIN_MS, IDLE_MAX_MS);
            trace!(
                target: channel::RENDER_LOOP,
                "-> Interpolated idle time {} ({ms} : {})",
                output.state.ims,
                output.state.activity
            );
            rearm = Some(Duration::from_micros((output.state.ims * 1000.0) as u64));
            output.state.scheduled = true;
            output.state.activity = false;
        } else {
            output.state.scheduled = false;
        }
    }

    if let Some(after) = rearm {
        arm_idle(comp, oid, after);
    }

    trace!(target: channel::RENDER_LOOP, "-> Finished frame");
    finish_frame_tasks(comp, oid);
}

/// Deferred operations that are unsafe while a flip is outstanding.
pub fn finish_frame_tasks(comp: &mut Compositor, oid: Handle) {
    let swap = comp
        .outputs
        .get_mut(oid)
        .and_then(|o| o.task.bsurface.take());
    if let Some(bsurface) = swap {
        set_backend_surface(comp, oid, bsurface);
    }

    let sleep = comp.outputs.get_mut(oid).is_some_and(|o| {
        let requested = o.task.sleep;
        o.task.sleep = false;
        requested
    });
    if sleep {
        set_sleep(comp, oid, true);
    }

    let terminate = comp.outputs.get_mut(oid).is_some_and(|o| {
        let requested = o.task.terminate;
        o.task.terminate = false;
        requested
    });
    if terminate {
        output_terminate(comp, oid);
    }
}

/// Swaps (or detaches) the output's backend surface, recreating the
/// renderer and reattaching every assigned surface. Deferred while a flip
/// is pending.
pub fn set_backend_surface(
    comp: &mut Compositor,
    oid: Handle,
    bsurface: Option<BackendSurface>,
) -> bool {
    let Some(output) = comp.outputs.get_mut(oid) else {
        return false;
    };

    let new_display = bsurface.as_ref().map(|b| b.display).unwrap_or(0);
    let current_display = output.bsurface.as_ref().map(|b| b.display).unwrap_or(0);
    if new_display == current_display {
        return true;
    }

    if output.state.pending {
        info!("Pending bsurface set for output ({oid:?})");
        output.task.bsurface = Some(bsurface);
        return true;
    }

    // Drop renderer state for every assigned surface before the context
    // goes away.
    let assigned = output.surfaces.clone();
    {
        let Compositor {
            outputs, surfaces, ..
        } = comp;
        let output = outputs.get_mut(oid).expect("checked above");
        if let Some(renderer) = output.renderer.as_mut() {
            for sid in &assigned {
                if let Some(s) = surfaces.get_mut(*sid) {
                    renderer.surface_destroy(&mut s.render);
                }
            }
        }
        if let Some(old) = output.bsurface.take() {
            old.ops.terminate(&old);
        }
        output.renderer = None;
    }
    comp.notify_handler(move |h, c| h.output_context_destroyed(c, oid));

    let attached = match bsurface {
        Some(bsurface) => match bsurface.ops.create_renderer(&bsurface) {
            Ok(renderer) => {
                let output = comp.outputs.get_mut(oid).expect("checked above");
                output.bsurface = Some(bsurface);
                output.renderer = Some(renderer);
                comp.notify_handler(move |h, c| h.output_context_created(c, oid));

                for sid in assigned {
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
                    // Force a reattach through the fresh renderer.
                    if let Some(s) = comp.surfaces.get_mut(sid) {
                        s.output = Handle::NONE;
                    }
                    surface::surface_attach_to_output(comp, sid, oid, buffer);
                }
                info!("Set new bsurface to output ({oid:?})");
                true
            },
            Err(e) => {
                error!("failed to create rendering context: {e:?}");
                false
            },
        },
        None => {
            info!("Removed bsurface from output ({oid:?})");
            false
        },
    };

    comp.signals.emit(Signal::OutputSurface { output: oid });
    attached
}

/// Blank or wake. Sleeping with a flip pending defers via the task block;
/// backends without a sleep hook get a faked sleep (black frames).
pub fn set_sleep(comp: &mut Compositor, oid: Handle, sleep: bool) {
    if !sleep && comp.active {
        arm_sleep(comp, oid);
    }

    let Some(output) = comp.outputs.get_mut(oid) else {
        return;
    };
    if output.state.sleeping == sleep {
        return;
    }
    if sleep && output.state.pending {
        output.task.sleep = true;
        return;
    }

    let mut backend_handled = false;
    if let Some(bsurface) = &output.bsurface {
        backend_handled = bsurface.ops.sleep(bsurface, sleep);
    }

    output.state.sleeping = sleep;
    if sleep {
        output.state.scheduled = false;
        output.state.activity = false;
    }

    if !sleep {
        info!("Output ({oid:?}) wake up");
        schedule_repaint(comp, oid);
    } else {
        info!("Output ({oid:?}) sleep");
        if backend_handled {
            disarm_timers(comp, oid);
        }
    }
}

/// Orderly output teardown; deferred while a flip is in flight.
pub fn output_terminate(comp: &mut Compositor, oid: Handle) {
    let Some(output) = comp.outputs.get_mut(oid) else {
        return;
    };
    if output.state.pending {
        output.task.terminate = true;
        info!("Terminating output ({oid:?})...");
        schedule_repaint(comp, oid);
        return;
    }
    info!("Output ({oid:?}) terminated...");
    output_remove(comp, oid);
}
