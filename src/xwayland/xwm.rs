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

//! The window-manager half of the XWayland bridge. Owns the wm socket as
//! an X11 client, keeps the paired/unpaired window tables, pairs windows to
//! surfaces via WL_SURFACE_ID, and forwards ICCCM/EWMH properties into
//! view state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

use bimap::BiMap;
use calloop::Interest;
use calloop::Mode;
use calloop::PostAction;
use calloop::generic::Generic;
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::protocol::composite;
use x11rb::protocol::composite::ConnectionExt as _;
use x11rb::protocol::xfixes;
use x11rb::protocol::xfixes::ConnectionExt as _;
use x11rb::protocol::xproto;
use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::rust_connection::DefaultStream;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use crate::compositor::Compositor;
use crate::geometry::Geometry;
use crate::geometry::Point;
use crate::geometry::Size;
use crate::prelude::*;
use crate::registry::Handle;
use crate::registry::Resource;
use crate::utils::channel;
use crate::view;
use crate::view::Role;
use crate::view::bit;
use crate::view::kind;
use crate::xwayland::selection;
use crate::xwayland::selection::SelectionShared;

x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        WL_SURFACE_ID,
        WM_PROTOCOLS,
        WM_DELETE_WINDOW,
        WM_S0,
        _NET_WM_NAME,
        _NET_WM_PID,
        _NET_WM_STATE,
        _NET_WM_STATE_FULLSCREEN,
        _NET_WM_STATE_MAXIMIZED_VERT,
        _NET_WM_STATE_MAXIMIZED_HORZ,
        _NET_WM_WINDOW_TYPE,
        _NET_WM_WINDOW_TYPE_NORMAL,
        _NET_WM_WINDOW_TYPE_DIALOG,
        _NET_WM_WINDOW_TYPE_SPLASH,
        _NET_WM_WINDOW_TYPE_POPUP_MENU,
        _NET_WM_WINDOW_TYPE_DROPDOWN_MENU,
        _NET_WM_WINDOW_TYPE_TOOLTIP,
        _NET_WM_WINDOW_TYPE_MENU,
        _NET_WM_WINDOW_TYPE_UTILITY,
        _NET_ACTIVE_WINDOW,
        UTF8_STRING,
        TEXT,
        CLIPBOARD,
        CLIPBOARD_MANAGER,
        TARGETS,
        WLC_SELECTION,
    }
}

#[derive(Debug, Default, Clone)]
struct Unpaired {
    surface_id: Option<u32>,
    override_redirect: bool,
}

pub struct Xwm {
    conn: Rc<RustConnection>,
    root: xproto::Window,
    atoms: Atoms,
    /// Our own window; WM_S0 and clipboard owner.
    window: xproto::Window,
    paired: BiMap<u32, Handle>,
    unpaired: HashMap<u32, Unpaired>,
    pub selection: Rc<RefCell<SelectionShared>>,
}

impl Xwm {
    /// Takes the wm end of the socket pair, becomes the window manager on
    /// that server, and starts pumping its events through the loop.
    pub fn start(comp: &mut Compositor, wm_fd: OwnedFd) -> Result<Xwm> {
        let stream = UnixStream::from(wm_fd);
        let (stream, _) = DefaultStream::from_unix_stream(stream).location(loc!())?;
        let conn = RustConnection::connect_to_stream(stream, 0).location(loc!())?;
        let conn = Rc::new(conn);

        let setup = conn.setup();
        let screen = &setup.roots[0];
        let root = screen.root;

        let atoms = Atoms::new(conn.as_ref())
            .location(loc!())?
            .reply()
            .location(loc!())?;

        let aux = xproto::ChangeWindowAttributesAux::new().event_mask(
            xproto::EventMask::SUBSTRUCTURE_REDIRECT
                | xproto::EventMask::SUBSTRUCTURE_NOTIFY
                | xproto::EventMask::PROPERTY_CHANGE,
        );
        conn.change_window_attributes(root, &aux)
            .location(loc!())?
            .check()
            .context(loc!(), "another window manager is running")?;

        conn.composite_redirect_subwindows(root, composite::Redirect::MANUAL)
            .location(loc!())?;

        let window = conn.generate_id().location(loc!())?;
        conn.create_window(
            x11rb::COPY_DEPTH_FROM_PARENT,
            window,
            root,
            0,
            0,
            1,
            1,
            0,
            xproto::WindowClass::INPUT_OUTPUT,
            screen.root_visual,
            &xproto::CreateWindowAux::new().event_mask(xproto::EventMask::PROPERTY_CHANGE),
        )
        .location(loc!())?;
        conn.set_selection_owner(window, atoms.WM_S0, x11rb::CURRENT_TIME)
            .location(loc!())?;

        // Clipboard interop: XFIXES tells us whenever CLIPBOARD changes
        // owner.
        conn.xfixes_query_version(5, 0)
            .location(loc!())?
            .reply()
            .location(loc!())?;
        conn.xfixes_select_selection_input(
            window,
            atoms.CLIPBOARD,
            xfixes::SelectionEventMask::SET_SELECTION_OWNER
                | xfixes::SelectionEventMask::SELECTION_WINDOW_DESTROY
                | xfixes::SelectionEventMask::SELECTION_CLIENT_CLOSE,
        )
        .location(loc!())?;

        conn.flush().location(loc!())?;

        let selection = Rc::new(RefCell::new(SelectionShared::new(
            conn.clone(),
            window,
            selection::Atoms {
                clipboard: atoms.CLIPBOARD,
                targets: atoms.TARGETS,
                utf8_string: atoms.UTF8_STRING,
                text: atoms.TEXT,
                transfer_property: atoms.WLC_SELECTION,
            },
        )));

        let fd = conn.stream().as_raw_fd();
        let source = Generic::new(
            // SAFETY: the connection lives inside the compositor's
            // Xwayland slot; the source is removed with the loop.
            unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
            Interest::READ,
            Mode::Level,
        );
        comp.loop_handle
            .insert_source(source, move |_, _, comp| {
                let Some(mut wm) = comp.xwayland.as_mut().and_then(|x| x.wm.take()) else {
                    return Ok(PostAction::Remove);
                };
                wm.pump(comp);
                if let Some(xw) = comp.xwayland.as_mut() {
                    xw.wm = Some(wm);
                }
                comp.drain_signals();
                Ok(PostAction::Continue)
            })
            .map_err(|e| anyhow!("failed to insert xwm event source: {e:?}"))
            .location(loc!())?;

        info!(target: channel::XWM, "xwm started (wm window {window})");
        Ok(Xwm {
            conn,
            root,
            atoms,
            window,
            paired: BiMap::new(),
            unpaired: HashMap::new(),
            selection,
        })
    }

    fn pump(&mut self, comp: &mut Compositor) {
        loop {
            match self.conn.poll_for_event() {
                Ok(Some(event)) => self.handle_event(comp, event),
                Ok(None) => break,
                Err(e) => {
                    warn!(target: channel::XWM, "xwm connection error: {e:?}");
                    break;
                },
            }
        }
        self.conn.flush().log_and_ignore(loc!());
    }

    fn handle_event(&mut self, comp: &mut Compositor, event: Event) {
        match event {
            Event::CreateNotify(e) => {
                if e.window == self.window {
                    return;
                }
                trace!(target: channel::XWM, "CreateNotify {}", e.window);
                self.unpaired.insert(
                    e.window,
                    Unpaired {
                        surface_id: None,
                        override_redirect: e.override_redirect,
                    },
                );
            },
            Event::DestroyNotify(e) => {
                trace!(target: channel::XWM, "DestroyNotify {}", e.window);
                self.unpaired.remove(&e.window);
                if let Some((_, vid)) = self.paired.remove_by_left(&e.window) {
                    view::view_destroy(comp, vid);
                }
            },
            Event::MapRequest(e) => {
                self.conn.map_window(e.window).log_and_ignore(loc!());
            },
            Event::UnmapNotify(e) => {
                if let Some(vid) = self.paired.get_by_left(&e.window).copied() {
                    view::view_unmap(comp, vid);
                }
            },
            Event::ConfigureRequest(e) => {
                let aux = xproto::ConfigureWindowAux::from_configure_request(&e);
                self.conn
                    .configure_window(e.window, &aux)
                    .log_and_ignore(loc!());
            },
            Event::ClientMessage(e) => self.handle_client_message(comp, e),
            Event::PropertyNotify(e) => {
                if let Some(vid) = self.paired.get_by_left(&e.window).copied() {
                    self.refresh_properties(comp, e.window, vid);
                }
            },
            Event::XfixesSelectionNotify(e) => {
                selection::handle_owner_change(comp, self, e.owner);
            },
            Event::SelectionNotify(e) => {
                selection::handle_selection_notify(&self.selection, e);
            },
            Event::SelectionRequest(e) => {
                selection::handle_selection_request(comp, &self.selection, e);
            },
            _ => {},
        }
    }

    fn handle_client_message(&mut self, comp: &mut Compositor, e: xproto::ClientMessageEvent) {
        if e.type_ == self.atoms.WL_SURFACE_ID {
            let surface_id = e.data.as_data32()[0];
            trace!(
                target: channel::XWM,
                "WL_SURFACE_ID {} for window {}",
                surface_id,
                e.window
            );
            if let Some(entry) = self.unpaired.get_mut(&e.window) {
                entry.surface_id = Some(surface_id);
            } else {
                self.unpaired.insert(
                    e.window,
                    Unpaired {
                        surface_id: Some(surface_id),
                        override_redirect: false,
                    },
                );
            }
            self.try_pair(comp, e.window);
        } else if e.type_ == self.atoms._NET_WM_STATE {
            let Some(vid) = self.paired.get_by_left(&e.window).copied() else {
                return;
            };
            let data = e.data.as_data32();
            // 0 remove, 1 add, 2 toggle.
            let on = data[0] == 1;
            for atom in [data[1], data[2]] {
                if atom == self.atoms._NET_WM_STATE_FULLSCREEN {
                    view::view_request_state(comp, vid, bit::FULLSCREEN, on);
                } else if atom == self.atoms._NET_WM_STATE_MAXIMIZED_VERT
                    || atom == self.atoms._NET_WM_STATE_MAXIMIZED_HORZ
                {
                    view::view_request_state(comp, vid, bit::MAXIMIZED, on);
                }
            }
        }
    }

    /// Retry pairing for every window still waiting on its surface; the
    /// surface-created signal funnels here.
    pub fn try_pair_all(&mut self, comp: &mut Compositor) {
        let windows: Vec<u32> = self
            .unpaired
            .iter()
            .filter(|(_, u)| u.surface_id.is_some())
            .map(|(w, _)| *w)
            .collect();
        for window in windows {
            self.try_pair(comp, window);
        }
    }

    fn try_pair(&mut self, comp: &mut Compositor, window: u32) {
        let Some(client) = comp.xwayland_client else {
            return;
        };
        let Some(entry) = self.unpaired.get(&window).cloned() else {
            return;
        };
        let Some(surface_id) = entry.surface_id else {
            return;
        };

        let sid = comp.registry.resource_for_wire(client, surface_id as u64);
        if sid == Resource::NONE {
            return;
        }

        let vid = view::view_new(comp, sid);
        if let Some(v) = comp.views.get_mut(vid) {
            v.role = Role::X11 {
                window,
                override_redirect: entry.override_redirect,
            };
            if entry.override_redirect {
                v.kind |= kind::OVERRIDE_REDIRECT | kind::UNMANAGED;
            }
        }

        self.unpaired.remove(&window);
        self.paired.insert(window, vid);

        // The X window's current placement seeds the view geometry.
        if let Some(geometry) = self.geometry_of(window) {
            view::view_set_geometry(comp, vid, 0, geometry);
        }
        self.refresh_properties(comp, window, vid);

        // The surface may already carry committed content.
        let attached = comp
            .surfaces
            .get(sid)
            .map(|s| s.commit.attached)
            .unwrap_or(false);
        if attached {
            view::view_map(comp, vid);
        }
        info!(target: channel::XWM, "paired window {window} with {vid:?}");
    }

    fn read_string_property(&self, window: u32, property: xproto::Atom) -> Option<Vec<u8>> {
        let reply = self
            .conn
            .get_property(
                false,
                window,
                property,
                xproto::GetPropertyType::ANY,
                0,
                2048,
            )
            .ok()?
            .reply()
            .ok()?;
        (reply.format == 8).then_some(reply.value)
    }

    fn read_atom_property(&self, window: u32, property: xproto::Atom) -> Vec<xproto::Atom> {
        self.conn
            .get_property(false, window, property, xproto::AtomEnum::ATOM, 0, 64)
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .and_then(|reply| reply.value32().map(|v| v.collect()))
            .unwrap_or_default()
    }

    fn refresh_properties(&mut self, comp: &mut Compositor, window: u32, vid: Handle) {
        // Title: _NET_WM_NAME (utf8) wins over WM_NAME.
        let title = self
            .read_string_property(window, self.atoms._NET_WM_NAME)
            .or_else(|| self.read_string_property(window, xproto::AtomEnum::WM_NAME.into()))
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .filter(|t| !t.is_empty());
        view::view_set_title(comp, vid, title);

        // WM_CLASS: instance NUL class NUL. Instance doubles as app_id.
        if let Some(bytes) = self.read_string_property(window, xproto::AtomEnum::WM_CLASS.into())
        {
            let mut parts = bytes.split(|b| *b == 0);
            let instance = parts
                .next()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .filter(|p| !p.is_empty());
            let class = parts
                .next()
                .map(|p| String::from_utf8_lossy(p).into_owned())
                .filter(|p| !p.is_empty());
            view::view_set_app_id(comp, vid, instance);
            view::view_set_class(comp, vid, class);
        }

        if let Some(pid) = self
            .conn
            .get_property(
                false,
                window,
                self.atoms._NET_WM_PID,
                xproto::AtomEnum::CARDINAL,
                0,
                1,
            )
            .ok()
            .and_then(|cookie| cookie.reply().ok())
            .and_then(|reply| reply.value32().and_then(|mut v| v.next()))
        {
            if let Some(v) = comp.views.get_mut(vid) {
                v.props.pid = Some(pid);
            }
        }

        // Window type bits.
        let types = self.read_atom_property(window, self.atoms._NET_WM_WINDOW_TYPE);
        for atom in &types {
            if *atom == self.atoms._NET_WM_WINDOW_TYPE_SPLASH {
                view::view_set_type(comp, vid, kind::SPLASH, true);
            } else if *atom == self.atoms._NET_WM_WINDOW_TYPE_DIALOG {
                view::view_set_type(comp, vid, kind::MODAL, true);
            } else if *atom == self.atoms._NET_WM_WINDOW_TYPE_POPUP_MENU
                || *atom == self.atoms._NET_WM_WINDOW_TYPE_DROPDOWN_MENU
                || *atom == self.atoms._NET_WM_WINDOW_TYPE_TOOLTIP
                || *atom == self.atoms._NET_WM_WINDOW_TYPE_MENU
                || *atom == self.atoms._NET_WM_WINDOW_TYPE_UTILITY
            {
                view::view_set_type(comp, vid, kind::POPUP, true);
            }
        }

        // _NET_WM_STATE on the window reflects into view state.
        let states = self.read_atom_property(window, self.atoms._NET_WM_STATE);
        let fullscreen = states.contains(&self.atoms._NET_WM_STATE_FULLSCREEN);
        let maximized = states.contains(&self.atoms._NET_WM_STATE_MAXIMIZED_VERT)
            && states.contains(&self.atoms._NET_WM_STATE_MAXIMIZED_HORZ);
        if fullscreen {
            view::view_request_state(comp, vid, bit::FULLSCREEN, true);
        }
        if maximized {
            view::view_request_state(comp, vid, bit::MAXIMIZED, true);
        }
    }

    // --- mutators driven by the view layer ------------------------------

    pub fn window_position(&mut self, window: u32, origin: Point) {
        let aux = xproto::ConfigureWindowAux::new()
            .x(origin.x)
            .y(origin.y);
        self.conn
            .configure_window(window, &aux)
            .log_and_ignore(loc!());
        self.conn.flush().log_and_ignore(loc!());
    }

    pub fn window_resize(&mut self, window: u32, size: Size) {
        let aux = xproto::ConfigureWindowAux::new()
            .width(size.w)
            .height(size.h);
        self.conn
            .configure_window(window, &aux)
            .log_and_ignore(loc!());
        self.conn.flush().log_and_ignore(loc!());
    }

    pub fn window_set_state(&mut self, window: u32, state_bit: u32, on: bool) {
        let mut atoms: Vec<xproto::Atom> = Vec::new();
        if state_bit & bit::FULLSCREEN != 0 {
            atoms.push(self.atoms._NET_WM_STATE_FULLSCREEN);
        }
        if state_bit & bit::MAXIMIZED != 0 {
            atoms.push(self.atoms._NET_WM_STATE_MAXIMIZED_VERT);
            atoms.push(self.atoms._NET_WM_STATE_MAXIMIZED_HORZ);
        }
        if atoms.is_empty() {
            return;
        }

        let mut current = self.read_atom_property(window, self.atoms._NET_WM_STATE);
        for atom in atoms {
            if on {
                if !current.contains(&atom) {
                    current.push(atom);
                }
            } else {
                current.retain(|a| *a != atom);
            }
        }
        self.conn
            .change_property32(
                xproto::PropMode::REPLACE,
                window,
                self.atoms._NET_WM_STATE,
                xproto::AtomEnum::ATOM,
                &current,
            )
            .log_and_ignore(loc!());
        self.conn.flush().log_and_ignore(loc!());
    }

    pub fn window_close(&mut self, window: u32) {
        let protocols = self.read_atom_property(window, self.atoms.WM_PROTOCOLS);
        if protocols.contains(&self.atoms.WM_DELETE_WINDOW) {
            let event = xproto::ClientMessageEvent::new(
                32,
                window,
                self.atoms.WM_PROTOCOLS,
                [self.atoms.WM_DELETE_WINDOW, x11rb::CURRENT_TIME, 0, 0, 0],
            );
            self.conn
                .send_event(false, window, xproto::EventMask::NO_EVENT, event)
                .log_and_ignore(loc!());
        } else {
            self.conn.kill_client(window).log_and_ignore(loc!());
        }
        self.conn.flush().log_and_ignore(loc!());
    }

    pub fn window_set_active(&mut self, window: u32, active: bool) -> bool {
        if !self.paired.contains_left(&window) {
            return false;
        }
        if active {
            self.conn
                .set_input_focus(
                    xproto::InputFocus::POINTER_ROOT,
                    window,
                    x11rb::CURRENT_TIME,
                )
                .log_and_ignore(loc!());
            self.conn
                .change_property32(
                    xproto::PropMode::REPLACE,
                    self.root,
                    self.atoms._NET_ACTIVE_WINDOW,
                    xproto::AtomEnum::WINDOW,
                    &[window],
                )
                .log_and_ignore(loc!());
        } else {
            self.conn
                .set_input_focus(
                    xproto::InputFocus::POINTER_ROOT,
                    x11rb::NONE,
                    x11rb::CURRENT_TIME,
                )
                .log_and_ignore(loc!());
        }
        self.conn.flush().log_and_ignore(loc!());
        true
    }

    pub fn geometry_of(&self, window: u32) -> Option<Geometry> {
        let geom = self
            .conn
            .get_geometry(window)
            .ok()?
            .reply()
            .ok()?;
        Some(Geometry::new(
            geom.x as i32,
            geom.y as i32,
            geom.width as u32,
            geom.height as u32,
        ))
    }

    pub fn our_window(&self) -> u32 {
        self.window
    }
}
