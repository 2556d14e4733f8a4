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

//! Clipboard bridging between X11 and native clients.
//!
//! X11 -> native: an XFIXES owner change installs a compositor data source
//! whose send converts CLIPBOARD into our transfer property and pipes the
//! bytes out verbatim. Native -> X11: we own CLIPBOARD on the X side and
//! answer SelectionRequest by piping from the native source into the
//! requestor's property. text/plain and text/plain;charset=utf-8 round-trip
//! to TEXT/STRING and UTF8_STRING. INCR transfers are not implemented;
//! oversized selections are truncated at the X server's request cap.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::os::fd::OwnedFd;
use std::rc::Rc;

use calloop::Interest;
use calloop::Mode;
use calloop::PostAction;
use calloop::generic::Generic;
use x11rb::connection::Connection;
use x11rb::protocol::xfixes;
use x11rb::protocol::xproto;
use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use crate::compositor::Compositor;
use crate::data_device;
use crate::data_device::CustomSource;
use crate::prelude::*;
use crate::registry::Resource;
use crate::utils::channel;
use crate::xwayland::xwm::Xwm;

pub const MIME_UTF8: &str = "text/plain;charset=utf-8";
pub const MIME_PLAIN: &str = "text/plain";

#[derive(Debug, Copy, Clone)]
pub struct Atoms {
    pub clipboard: xproto::Atom,
    pub targets: xproto::Atom,
    pub utf8_string: xproto::Atom,
    pub text: xproto::Atom,
    /// Property on our window that incoming conversions land in.
    pub transfer_property: xproto::Atom,
}

pub struct SelectionShared {
    conn: Rc<RustConnection>,
    window: xproto::Window,
    atoms: Atoms,
    /// Outgoing conversions awaiting their SelectionNotify.
    pending: VecDeque<(xproto::Atom, OwnedFd)>,
    /// The bridge source currently installed as the compositor selection.
    pub bridge_source: Resource,
}

impl SelectionShared {
    pub fn new(conn: Rc<RustConnection>, window: xproto::Window, atoms: Atoms) -> Self {
        Self {
            conn,
            window,
            atoms,
            pending: VecDeque::new(),
            bridge_source: Resource::NONE,
        }
    }

    fn target_for_mime(&self, mime: &str) -> Option<xproto::Atom> {
        match mime {
            MIME_UTF8 => Some(self.atoms.utf8_string),
            MIME_PLAIN => Some(self.atoms.text),
            _ => None,
        }
    }

    fn mime_for_target(&self, target: xproto::Atom) -> Option<&'static str> {
        if target == self.atoms.utf8_string {
            Some(MIME_UTF8)
        } else if target == self.atoms.text || target == xproto::Atom::from(xproto::AtomEnum::STRING)
        {
            Some(MIME_PLAIN)
        } else {
            None
        }
    }
}

/// The data source installed when an X client owns the clipboard.
pub struct X11SelectionSource {
    shared: Rc<RefCell<SelectionShared>>,
}

impl CustomSource for X11SelectionSource {
    fn send(&mut self, mime_type: &str, fd: OwnedFd) {
        let mut shared = self.shared.borrow_mut();
        let Some(target) = shared.target_for_mime(mime_type) else {
            debug!(target: channel::XWM, "no X target for {mime_type:?}");
            return;
        };
        let (window, clipboard, property) =
            (shared.window, shared.atoms.clipboard, shared.atoms.transfer_property);
        shared
            .conn
            .convert_selection(window, clipboard, target, property, x11rb::CURRENT_TIME)
            .log_and_ignore(loc!());
        shared.conn.flush().log_and_ignore(loc!());
        shared.pending.push_back((target, fd));
    }

    fn cancel(&mut self) {
        self.shared.borrow_mut().pending.clear();
    }
}

/// XFIXES says CLIPBOARD changed owner.
pub fn handle_owner_change(comp: &mut Compositor, wm: &mut Xwm, owner: xproto::Window) {
    let shared = wm.selection.clone();
    let ours = owner == wm.our_window();
    if ours {
        return;
    }

    if owner == x11rb::NONE {
        // Owner went away; drop the bridge selection if it was current.
        let bridge = shared.borrow().bridge_source;
        if bridge != Resource::NONE && comp.seat.data.source == bridge {
            data_device::set_selection(comp, Resource::NONE, None);
        }
        shared.borrow_mut().bridge_source = Resource::NONE;
        return;
    }

    trace!(target: channel::XWM, "X client {owner} owns CLIPBOARD");
    let source = data_device::set_custom_selection(
        comp,
        vec![MIME_UTF8.to_string(), MIME_PLAIN.to_string()],
        Box::new(X11SelectionSource {
            shared: shared.clone(),
        }),
    );
    shared.borrow_mut().bridge_source = source;
}

/// A conversion we requested completed (or failed, property == NONE).
pub fn handle_selection_notify(
    shared: &Rc<RefCell<SelectionShared>>,
    e: xproto::SelectionNotifyEvent,
) {
    let mut shared = shared.borrow_mut();
    let Some(i) = shared.pending.iter().position(|(t, _)| *t == e.target) else {
        return;
    };
    let (_, fd) = shared.pending.remove(i).expect("position came from iter");

    if e.property == x11rb::NONE {
        debug!(target: channel::XWM, "selection conversion refused");
        return; // Dropping fd closes the pipe; the reader sees EOF.
    }

    let reply = shared
        .conn
        .get_property(
            true,
            shared.window,
            shared.atoms.transfer_property,
            xproto::GetPropertyType::ANY,
            0,
            u32::MAX / 4,
        )
        .ok()
        .and_then(|cookie| cookie.reply().ok());

    if let Some(reply) = reply {
        // Bytes go out exactly as received: no newline, no length prefix.
        nix::unistd::write(&fd, &reply.value).warn_and_ignore(loc!());
    }
}

/// The compositor selection changed; mirror ownership to the X side unless
/// the change was our own bridge source.
pub fn handle_native_selection_change(comp: &mut Compositor) {
    let Some(wm) = comp.xwayland.as_ref().and_then(|x| x.wm.as_ref()) else {
        return;
    };
    let shared = wm.selection.clone();
    let window = wm.our_window();

    let current = comp.seat.data.source;
    if current == Resource::NONE || current == shared.borrow().bridge_source {
        return;
    }

    let shared = shared.borrow();
    shared
        .conn
        .set_selection_owner(window, shared.atoms.clipboard, x11rb::CURRENT_TIME)
        .log_and_ignore(loc!());
    shared.conn.flush().log_and_ignore(loc!());
}

fn refuse(conn: &RustConnection, e: &xproto::SelectionRequestEvent) {
    let notify = xproto::SelectionNotifyEvent {
        response_type: xproto::SELECTION_NOTIFY_EVENT,
        sequence: 0,
        time: e.time,
        requestor: e.requestor,
        selection: e.selection,
        target: e.target,
        property: x11rb::NONE,
    };
    conn.send_event(false, e.requestor, xproto::EventMask::NO_EVENT, notify)
        .log_and_ignore(loc!());
    conn.flush().log_and_ignore(loc!());
}

/// An X client wants the native selection.
pub fn handle_selection_request(
    comp: &mut Compositor,
    shared: &Rc<RefCell<SelectionShared>>,
    e: xproto::SelectionRequestEvent,
) {
    let (conn, atoms) = {
        let s = shared.borrow();
        (s.conn.clone(), s.atoms)
    };

    if e.target == atoms.targets {
        let targets = [
            atoms.targets,
            atoms.utf8_string,
            atoms.text,
            xproto::AtomEnum::STRING.into(),
        ];
        conn.change_property32(
            xproto::PropMode::REPLACE,
            e.requestor,
            e.property,
            xproto::AtomEnum::ATOM,
            &targets,
        )
        .log_and_ignore(loc!());
        let notify = xproto::SelectionNotifyEvent {
            response_type: xproto::SELECTION_NOTIFY_EVENT,
            sequence: 0,
            time: e.time,
            requestor: e.requestor,
            selection: e.selection,
            target: e.target,
            property: e.property,
        };
        conn.send_event(false, e.requestor, xproto::EventMask::NO_EVENT, notify)
            .log_and_ignore(loc!());
        conn.flush().log_and_ignore(loc!());
        return;
    }

    let mime = {
        let s = shared.borrow();
        s.mime_for_target(e.target)
    };
    let Some(mime) = mime else {
        refuse(&conn, &e);
        return;
    };
    if comp.seat.data.source == Resource::NONE {
        refuse(&conn, &e);
        return;
    }

    let Ok((read_end, write_end)) = nix::unistd::pipe().log(loc!()) else {
        refuse(&conn, &e);
        return;
    };
    nix::fcntl::fcntl(
        &read_end,
        nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
    )
    .log_and_ignore(loc!());

    data_device::selection_send(comp, mime, write_end);

    // Drain the pipe on the loop; on EOF the bytes land in the requestor's
    // property and the notify goes out.
    let accumulated: Rc<RefCell<Vec<u8>>> = Rc::new(RefCell::new(Vec::new()));
    let source = Generic::new(read_end, Interest::READ, Mode::Level);
    let request = e;
    comp.loop_handle
        .insert_source(source, move |_, fd, _comp| {
            let mut buf = [0u8; 4096];
            loop {
                match nix::unistd::read(&*fd, &mut buf) {
                    Ok(0) => {
                        let data = accumulated.borrow();
                        conn.change_property8(
                            xproto::PropMode::REPLACE,
                            request.requestor,
                            request.property,
                            request.target,
                            &data,
                        )
                        .log_and_ignore(loc!());
                        let notify = xproto::SelectionNotifyEvent {
                            response_type: xproto::SELECTION_NOTIFY_EVENT,
                            sequence: 0,
                            time: request.time,
                            requestor: request.requestor,
                            selection: request.selection,
                            target: request.target,
                            property: request.property,
                        };
                        conn.send_event(
                            false,
                            request.requestor,
                            xproto::EventMask::NO_EVENT,
                            notify,
                        )
                        .log_and_ignore(loc!());
                        conn.flush().log_and_ignore(loc!());
                        return Ok(PostAction::Remove);
                    },
                    Ok(n) => accumulated.borrow_mut().extend_from_slice(&buf[..n]),
                    Err(nix::errno::Errno::EAGAIN) => return Ok(PostAction::Continue),
                    Err(_) => return Ok(PostAction::Remove),
                }
            }
        })
        .map_err(|err| anyhow!("failed to insert selection pipe source: {err:?}"))
        .log_and_ignore(loc!());
}
