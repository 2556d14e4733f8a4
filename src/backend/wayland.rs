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

//! The nested-Wayland backend: windows on a host compositor act as
//! outputs. The host connection (protocol client, EGL window surfaces) is
//! behind [`HostDisplay`]; host frame callbacks stand in for page flips.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use calloop::Interest;
use calloop::Mode;
use calloop::PostAction;
use calloop::generic::Generic;

use crate::backend::Backend;
use crate::backend::BackendSurface;
use crate::backend::BackendSurfaceOps;
use crate::backend::ContextFactory;
use crate::compositor::Compositor;
use crate::geometry::Size;
use crate::output;
use crate::output::ConnectorKind;
use crate::output::OutputInformation;
use crate::output::OutputMode;
use crate::output::mode_flag;
use crate::output::scheduler;
use crate::prelude::*;
use crate::registry::Handle;
use crate::renderer::Renderer;
use crate::session::input::InputEvent;
use crate::signals::Signal;
use crate::utils;

/// Default size for window outputs, shared with the X11 backend.
pub const DEFAULT_OUTPUT_SIZE: Size = Size { w: 800, h: 480 };

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HostWindow {
    pub display: u64,
    pub window: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Input(InputEvent),
    Resized { window: u64, size: Size },
    Closed { window: u64 },
    /// The host delivered the frame callback for a committed frame.
    FrameDone { window: u64, time_ms: u32 },
}

/// The host-compositor connection seam.
pub trait HostDisplay {
    fn create_window(&mut self, size: Size) -> Result<HostWindow>;

    fn destroy_window(&mut self, window: u64);

    /// Commits the window and requests a frame callback.
    fn request_frame(&mut self, window: u64);

    fn poll(&mut self) -> Vec<HostEvent>;

    fn fd(&self) -> std::os::fd::RawFd;
}

type SharedHost = Rc<RefCell<Box<dyn HostDisplay>>>;
type WindowMap = Rc<RefCell<HashMap<u64, Handle>>>;

struct HostSurfaceOps {
    host: SharedHost,
    context: Rc<dyn ContextFactory>,
    window: u64,
}

impl BackendSurfaceOps for HostSurfaceOps {
    fn terminate(&self, _surface: &BackendSurface) {
        self.host.borrow_mut().destroy_window(self.window);
    }

    fn page_flip(&self, _surface: &BackendSurface) -> bool {
        // The flip completes when the host sends the frame callback.
        self.host.borrow_mut().request_frame(self.window);
        true
    }

    fn create_renderer(&self, surface: &BackendSurface) -> Result<Box<dyn Renderer>> {
        self.context.create_renderer(surface)
    }
}

fn window_information(size: Size) -> OutputInformation {
    OutputInformation {
        make: "wayland".to_string(),
        model: "window".to_string(),
        connector: ConnectorKind::Window,
        modes: vec![OutputMode {
            width: size.w as i32,
            height: size.h as i32,
            refresh: 60_000,
            flags: mode_flag::CURRENT | mode_flag::PREFERRED,
        }],
        ..OutputInformation::default()
    }
}

pub struct WaylandBackend {
    host: SharedHost,
    context: Rc<dyn ContextFactory>,
    windows: WindowMap,
    wanted_outputs: u32,
}

impl WaylandBackend {
    fn add_window_output(&mut self, comp: &mut Compositor) {
        let window = match self.host.borrow_mut().create_window(DEFAULT_OUTPUT_SIZE) {
            Ok(window) => window,
            Err(e) => {
                error!("failed to create host window: {e:?}");
                return;
            },
        };
        let bsurface = BackendSurface {
            display: window.display,
            window: window.window,
            ops: Rc::new(HostSurfaceOps {
                host: self.host.clone(),
                context: self.context.clone(),
                window: window.window,
            }),
        };
        let oid = output::output_add(comp, window_information(DEFAULT_OUTPUT_SIZE), bsurface);
        if oid != Handle::NONE {
            self.windows.borrow_mut().insert(window.window, oid);
        }
    }
}

impl Backend for WaylandBackend {
    fn name(&self) -> &'static str {
        "wayland"
    }

    fn update_outputs(&mut self, comp: &mut Compositor) {
        while (self.windows.borrow().len() as u32) < self.wanted_outputs {
            let before = self.windows.borrow().len();
            self.add_window_output(comp);
            if self.windows.borrow().len() == before {
                break;
            }
        }
    }

    fn terminate(&mut self, comp: &mut Compositor) {
        let outputs: Vec<Handle> = self.windows.borrow().values().copied().collect();
        for oid in outputs {
            scheduler::output_terminate(comp, oid);
        }
        self.windows.borrow_mut().clear();
    }
}

fn dispatch_host_event(comp: &mut Compositor, windows: &WindowMap, event: HostEvent) {
    match event {
        HostEvent::Input(input) => comp.signals.emit(Signal::Input(input)),
        HostEvent::Resized { window, size } => {
            let oid = windows
                .borrow()
                .get(&window)
                .copied()
                .unwrap_or(Handle::NONE);
            output::output_set_resolution(comp, oid, size.clamp_min_area());
        },
        HostEvent::Closed { window } => {
            let oid = windows
                .borrow_mut()
                .remove(&window)
                .unwrap_or(Handle::NONE);
            scheduler::output_terminate(comp, oid);
        },
        HostEvent::FrameDone { window, time_ms } => {
            let oid = windows
                .borrow()
                .get(&window)
                .copied()
                .unwrap_or(Handle::NONE);
            let time = if time_ms != 0 {
                time_ms
            } else {
                utils::monotonic_time_ms()
            };
            scheduler::finish_frame(comp, oid, time);
        },
    }
}

/// Brings up window outputs on the host compositor. Ok(None) when the
/// platform has no host seam.
pub fn probe(comp: &mut Compositor) -> Result<Option<Box<dyn Backend>>> {
    let Some(host) = comp.platform.host.take() else {
        return Ok(None);
    };

    let host: SharedHost = Rc::new(RefCell::new(host));
    let windows: WindowMap = Rc::new(RefCell::new(HashMap::new()));

    let fd = host.borrow().fd();
    let source = Generic::new(
        // SAFETY: the host connection outlives the loop source; both are
        // torn down with the compositor.
        unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
        Interest::READ,
        Mode::Level,
    );
    let event_host = host.clone();
    let event_windows = windows.clone();
    comp.loop_handle
        .insert_source(source, move |_, _, comp| {
            let events = event_host.borrow_mut().poll();
            for event in events {
                dispatch_host_event(comp, &event_windows, event);
            }
            comp.drain_signals();
            Ok(PostAction::Continue)
        })
        .map_err(|e| anyhow!("failed to insert host event source: {e:?}"))
        .location(loc!())?;

    let mut backend = Box::new(WaylandBackend {
        host,
        context: comp.platform.context.clone(),
        windows,
        wanted_outputs: comp.config.forced_outputs.unwrap_or(1),
    });
    backend.update_outputs(comp);

    if backend.windows.borrow().is_empty() {
        bail!("wayland backend created no outputs");
    }
    Ok(Some(backend))
}
