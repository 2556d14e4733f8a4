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

//! The X11 backend: windows on a host X server act as outputs. When the
//! root window grants substructure redirection we take over the real root;
//! otherwise each output is an 800x480 window. X input events feed the seat
//! as decoded input.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::rc::Rc;

use calloop::Interest;
use calloop::Mode;
use calloop::PostAction;
use calloop::generic::Generic;
use x11rb::COPY_DEPTH_FROM_PARENT;
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::xkb;
use x11rb::protocol::xkb::ConnectionExt as _;
use x11rb::protocol::xproto;
use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

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
use crate::wire::ButtonState;
use crate::wire::KeyState;
use crate::wire::ScrollAxis;

use super::wayland::DEFAULT_OUTPUT_SIZE;

// evdev button codes the seat understands.
const BTN_LEFT: u32 = 0x110;
const BTN_RIGHT: u32 = 0x111;
const BTN_MIDDLE: u32 = 0x112;

struct X11State {
    conn: RustConnection,
    screen: usize,
    wm_protocols: xproto::Atom,
    wm_delete_window: xproto::Atom,
    windows: HashMap<xproto::Window, Handle>,
}

type SharedState = Rc<RefCell<X11State>>;

struct X11SurfaceOps {
    state: SharedState,
    context: Rc<dyn ContextFactory>,
    window: xproto::Window,
}

impl BackendSurfaceOps for X11SurfaceOps {
    fn terminate(&self, _surface: &BackendSurface) {
        let state = self.state.borrow();
        state
            .conn
            .destroy_window(self.window)
            .map(|_| ())
            .warn_and_ignore(loc!());
        state.conn.flush().warn_and_ignore(loc!());
    }

    fn page_flip(&self, _surface: &BackendSurface) -> bool {
        // The GL swap presents synchronously; there is no flip event.
        self.state.borrow().conn.flush().warn_and_ignore(loc!());
        false
    }

    fn create_renderer(&self, surface: &BackendSurface) -> Result<Box<dyn Renderer>> {
        self.context.create_renderer(surface)
    }
}

fn window_information(size: Size, index: u32) -> OutputInformation {
    OutputInformation {
        make: "x11".to_string(),
        model: "window".to_string(),
        connector: ConnectorKind::Window,
        connector_id: index,
        modes: vec![OutputMode {
            width: size.w as i32,
            height: size.h as i32,
            refresh: 60_000,
            flags: mode_flag::CURRENT | mode_flag::PREFERRED,
        }],
        ..OutputInformation::default()
    }
}

impl X11State {
    fn connect() -> Result<Self> {
        let (conn, screen) = RustConnection::connect(None).location(loc!())?;

        let wm_protocols = conn
            .intern_atom(false, b"WM_PROTOCOLS")
            .location(loc!())?
            .reply()
            .location(loc!())?
            .atom;
        let wm_delete_window = conn
            .intern_atom(false, b"WM_DELETE_WINDOW")
            .location(loc!())?
            .reply()
            .location(loc!())?
            .atom;

        // Detectable auto-repeat keeps fake key releases out of the seat.
        if conn
            .xkb_use_extension(1, 0)
            .location(loc!())
            .and_then(|c| c.reply().location(loc!()))
            .is_ok()
        {
            conn.xkb_per_client_flags(
                xkb::ID::USE_CORE_KBD.into(),
                xkb::PerClientFlag::DETECTABLE_AUTO_REPEAT,
                xkb::PerClientFlag::DETECTABLE_AUTO_REPEAT,
                xkb::BoolCtrl::default(),
                xkb::BoolCtrl::default(),
                xkb::BoolCtrl::default(),
            )
            .map(|_| ())
            .warn_and_ignore(loc!());
        }

        Ok(Self {
            conn,
            screen,
            wm_protocols,
            wm_delete_window,
            windows: HashMap::new(),
        })
    }

    /// True when the root grants substructure redirection, i.e. we can be
    /// the real window manager and take over the whole root.
    fn can_own_root(&self) -> bool {
        let root = self.conn.setup().roots[self.screen].root;
        let aux = xproto::ChangeWindowAttributesAux::new()
            .event_mask(xproto::EventMask::SUBSTRUCTURE_REDIRECT);
        match self.conn.change_window_attributes(root, &aux) {
            Ok(cookie) => cookie.check().is_ok(),
            Err(_) => false,
        }
    }

    fn root_size(&self) -> Size {
        let screen = &self.conn.setup().roots[self.screen];
        Size::new(screen.width_in_pixels as u32, screen.height_in_pixels as u32)
    }

    fn create_output_window(&mut self, size: Size) -> Result<xproto::Window> {
        let screen = &self.conn.setup().roots[self.screen];
        let root = screen.root;
        let root_visual = screen.root_visual;
        let black = screen.black_pixel;

        let window = self.conn.generate_id().location(loc!())?;
        let aux = xproto::CreateWindowAux::new()
            .background_pixel(black)
            .event_mask(
                xproto::EventMask::EXPOSURE
                    | xproto::EventMask::STRUCTURE_NOTIFY
                    | xproto::EventMask::KEY_PRESS
                    | xproto::EventMask::KEY_RELEASE
                    | xproto::EventMask::BUTTON_PRESS
                    | xproto::EventMask::BUTTON_RELEASE
                    | xproto::EventMask::POINTER_MOTION
                    | xproto::EventMask::FOCUS_CHANGE,
            );
        self.conn
            .create_window(
                COPY_DEPTH_FROM_PARENT,
                window,
                root,
                0,
                0,
                size.w as u16,
                size.h as u16,
                0,
                xproto::WindowClass::INPUT_OUTPUT,
                root_visual,
                &aux,
            )
            .location(loc!())?;

        self.conn
            .change_property32(
                xproto::PropMode::REPLACE,
                window,
                self.wm_protocols,
                xproto::AtomEnum::ATOM,
                &[self.wm_delete_window],
            )
            .location(loc!())?;
        self.conn
            .change_property8(
                xproto::PropMode::REPLACE,
                window,
                xproto::AtomEnum::WM_NAME,
                xproto::AtomEnum::STRING,
                b"wlkit",
            )
            .location(loc!())?;

        self.conn.map_window(window).location(loc!())?;
        self.conn.flush().location(loc!())?;
        Ok(window)
    }
}

pub struct X11Backend {
    state: SharedState,
    context: Rc<dyn ContextFactory>,
    wanted_outputs: u32,
    owns_root: bool,
}

impl X11Backend {
    fn add_window_output(&mut self, comp: &mut Compositor) {
        let index = self.state.borrow().windows.len() as u32;
        let (size, window) = if self.owns_root && index == 0 {
            let state = self.state.borrow();
            (state.root_size(), state.conn.setup().roots[state.screen].root)
        } else {
            let size = DEFAULT_OUTPUT_SIZE;
            match self.state.borrow_mut().create_output_window(size) {
                Ok(window) => (size, window),
                Err(e) => {
                    error!("failed to create x11 output window: {e:?}");
                    return;
                },
            }
        };

        let bsurface = BackendSurface {
            display: 1,
            window: window as u64,
            ops: Rc::new(X11SurfaceOps {
                state: self.state.clone(),
                context: self.context.clone(),
                window,
            }),
        };
        let oid = output::output_add(comp, window_information(size, index), bsurface);
        if oid != Handle::NONE {
            self.state.borrow_mut().windows.insert(window, oid);
        }
    }
}

impl Backend for X11Backend {
    fn name(&self) -> &'static str {
        "x11"
    }

    fn update_outputs(&mut self, comp: &mut Compositor) {
        let wanted = if self.owns_root { 1 } else { self.wanted_outputs };
        while (self.state.borrow().windows.len() as u32) < wanted {
            let before = self.state.borrow().windows.len();
            self.add_window_output(comp);
            if self.state.borrow().windows.len() == before {
                break;
            }
        }
    }

    fn terminate(&mut self, comp: &mut Compositor) {
        let outputs: Vec<Handle> = self.state.borrow().windows.values().copied().collect();
        for oid in outputs {
            scheduler::output_terminate(comp, oid);
        }
        self.state.borrow_mut().windows.clear();
    }
}

fn output_for_window(state: &SharedState, window: xproto::Window) -> Handle {
    state
        .borrow()
        .windows
        .get(&window)
        .copied()
        .unwrap_or(Handle::NONE)
}

fn dispatch_event(comp: &mut Compositor, state: &SharedState, event: Event) {
    match event {
        Event::KeyPress(e) => {
            comp.signals.emit(Signal::Input(InputEvent::Key {
                time_ms: e.time,
                key: (e.detail as u32).saturating_sub(8),
                state: KeyState::Pressed,
            }));
        },
        Event::KeyRelease(e) => {
            comp.signals.emit(Signal::Input(InputEvent::Key {
                time_ms: e.time,
                key: (e.detail as u32).saturating_sub(8),
                state: KeyState::Released,
            }));
        },
        Event::ButtonPress(e) | Event::ButtonRelease(e) => {
            let pressed = e.response_type & 0x7f == xproto::BUTTON_PRESS_EVENT;
            match e.detail {
                1..=3 => {
                    let button = match e.detail {
                        1 => BTN_LEFT,
                        2 => BTN_MIDDLE,
                        _ => BTN_RIGHT,
                    };
                    comp.signals.emit(Signal::Input(InputEvent::Button {
                        time_ms: e.time,
                        button,
                        state: if pressed {
                            ButtonState::Pressed
                        } else {
                            ButtonState::Released
                        },
                    }));
                },
                4 | 5 if pressed => {
                    let amount = if e.detail == 4 { -10.0 } else { 10.0 };
                    comp.signals.emit(Signal::Input(InputEvent::Scroll {
                        time_ms: e.time,
                        axis: ScrollAxis::Vertical,
                        amount,
                    }));
                },
                _ => {},
            }
        },
        Event::MotionNotify(e) => {
            let oid = output_for_window(state, e.event);
            let Some(resolution) = comp.outputs.get(oid).map(|o| o.resolution) else {
                return;
            };
            comp.signals.emit(Signal::Input(InputEvent::MotionAbsolute {
                time_ms: e.time,
                x: (e.event_x.max(0) as f64) / resolution.w as f64,
                y: (e.event_y.max(0) as f64) / resolution.h as f64,
            }));
        },
        Event::ConfigureNotify(e) => {
            let oid = output_for_window(state, e.window);
            output::output_set_resolution(
                comp,
                oid,
                Size::new(e.width as u32, e.height as u32).clamp_min_area(),
            );
        },
        Event::Expose(e) => {
            let oid = output_for_window(state, e.window);
            scheduler::schedule_repaint(comp, oid);
        },
        Event::FocusIn(e) => {
            let oid = output_for_window(state, e.event);
            if oid != Handle::NONE {
                output::output_focus(comp, oid);
            }
        },
        Event::ClientMessage(e) => {
            let (is_delete, window) = {
                let s = state.borrow();
                (
                    e.type_ == s.wm_protocols
                        && e.data.as_data32()[0] == s.wm_delete_window,
                    e.window,
                )
            };
            if is_delete {
                let oid = state.borrow_mut().windows.remove(&window).unwrap_or(Handle::NONE);
                scheduler::output_terminate(comp, oid);
            }
        },
        _ => {},
    }
}

/// Connects to the X server named by DISPLAY and brings up window outputs.
pub fn probe(comp: &mut Compositor) -> Result<Option<Box<dyn Backend>>> {
    let state = X11State::connect().location(loc!())?;
    let owns_root = state.can_own_root();
    let state: SharedState = Rc::new(RefCell::new(state));

    let fd = state.borrow().conn.stream().as_raw_fd();
    let source = Generic::new(
        // SAFETY: the connection outlives the loop source; both die with
        // the compositor.
        unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
        Interest::READ,
        Mode::Level,
    );
    let event_state = state.clone();
    comp.loop_handle
        .insert_source(source, move |_, _, comp| {
            loop {
                let polled = event_state.borrow().conn.poll_for_event();
                match polled {
                    Ok(Some(event)) => dispatch_event(comp, &event_state, event),
                    Ok(None) => break,
                    Err(e) => {
                        error!("x11 connection error: {e:?}");
                        comp.signals.emit(Signal::Terminate);
                        break;
                    },
                }
            }
            comp.drain_signals();
            Ok(PostAction::Continue)
        })
        .map_err(|e| anyhow!("failed to insert x11 event source: {e:?}"))
        .location(loc!())?;

    let mut backend = Box::new(X11Backend {
        state,
        context: comp.platform.context.clone(),
        wanted_outputs: comp.config.forced_outputs.unwrap_or(1),
        owns_root,
    });
    backend.update_outputs(comp);

    if backend.state.borrow().windows.is_empty() {
        bail!("x11 backend created no outputs");
    }
    Ok(Some(backend))
}
