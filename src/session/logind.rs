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

//! The logind session path. Device opens go through TakeDevice, pause and
//! resume signals drive the compositor-wide activate signal, and the Active
//! property refocuses. The round-trips are deliberately blocking (init and
//! device-open only); the signal streams are pumped by one helper thread
//! into a calloop channel so every state change lands on the loop thread.

use std::collections::HashMap;
use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::path::Path;

use calloop::channel;
use calloop::channel::Channel;
use nix::sys::stat::major;
use nix::sys::stat::minor;
use nix::sys::stat::stat;
use zbus::blocking::Connection;
use zbus::proxy;
use zbus::zvariant::OwnedObjectPath;

use crate::prelude::*;

const DRM_MAJOR: u64 = 226;

#[proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait Manager {
    fn get_session_by_pid(&self, pid: u32) -> zbus::Result<OwnedObjectPath>;

    #[zbus(signal)]
    fn session_removed(&self, session_id: String, object_path: OwnedObjectPath)
    -> zbus::Result<()>;
}

#[proxy(
    interface = "org.freedesktop.login1.Session",
    default_service = "org.freedesktop.login1"
)]
trait Session {
    fn take_control(&self, force: bool) -> zbus::Result<()>;

    fn release_control(&self) -> zbus::Result<()>;

    fn take_device(&self, major: u32, minor: u32) -> zbus::Result<(zbus::zvariant::OwnedFd, bool)>;

    fn release_device(&self, major: u32, minor: u32) -> zbus::Result<()>;

    fn pause_device_complete(&self, major: u32, minor: u32) -> zbus::Result<()>;

    fn activate(&self) -> zbus::Result<()>;

    #[zbus(property)]
    fn active(&self) -> zbus::Result<bool>;

    #[zbus(property)]
    fn seat(&self) -> zbus::Result<(String, OwnedObjectPath)>;

    #[zbus(signal)]
    fn pause_device(&self, major: u32, minor: u32, kind: String) -> zbus::Result<()>;

    #[zbus(signal)]
    fn resume_device(&self, major: u32, minor: u32, fd: zbus::zvariant::OwnedFd)
    -> zbus::Result<()>;
}

/// What the pump thread forwards to the loop thread.
#[derive(Debug)]
pub enum LogindEvent {
    /// A device was paused; DRM pauses deactivate the whole session.
    PauseDevice { major: u32, minor: u32, kind: String },
    ResumeDevice { major: u32, minor: u32 },
    ActiveChanged(bool),
    SessionRemoved,
}

pub struct Logind {
    conn: Connection,
    session_path: OwnedObjectPath,
    /// fd -> (major, minor) for ReleaseDevice on close.
    devices: HashMap<RawFd, (u32, u32)>,
    /// Taken by the compositor and inserted into the event loop.
    pub events: Option<Channel<LogindEvent>>,
}

impl Logind {
    /// Connects, resolves our session, checks the seat, takes control, and
    /// starts the signal pump.
    pub fn connect(expected_seat: &str) -> Result<Self> {
        let conn = Connection::system().location(loc!())?;
        let manager = ManagerProxyBlocking::new(&conn).location(loc!())?;
        let session_path = manager
            .get_session_by_pid(std::process::id())
            .location(loc!())?;

        let session = SessionProxyBlocking::builder(&conn)
            .path(session_path.clone())
            .location(loc!())?
            .build()
            .location(loc!())?;

        let (seat, _) = session.seat().location(loc!())?;
        ensure!(
            seat == expected_seat,
            "logind session is on seat {seat:?}, not {expected_seat:?}"
        );

        session.take_control(false).location(loc!())?;
        info!("Took control of logind session {session_path}");

        let (sender, events) = channel::channel();
        spawn_pump(conn.clone(), session_path.clone(), sender).location(loc!())?;

        Ok(Self {
            conn,
            session_path,
            devices: HashMap::new(),
            events: Some(events),
        })
    }

    fn session(&self) -> Result<SessionProxyBlocking<'_>> {
        SessionProxyBlocking::builder(&self.conn)
            .path(self.session_path.clone())
            .location(loc!())?
            .build()
            .location(loc!())
    }

    pub fn open_device(&mut self, path: &Path) -> Result<OwnedFd> {
        let st = stat(path).location(loc!())?;
        let (maj, min) = (
            major(st.st_rdev as u64) as u32,
            minor(st.st_rdev as u64) as u32,
        );
        let (fd, paused) = self.session()?.take_device(maj, min).location(loc!())?;
        if paused {
            debug!("TakeDevice({maj}, {min}) returned a paused fd");
        }
        let fd: OwnedFd = fd.into();
        self.devices.insert(fd.as_raw_fd(), (maj, min));
        Ok(fd)
    }

    pub fn close_device(&mut self, fd: OwnedFd) {
        if let Some((maj, min)) = self.devices.remove(&fd.as_raw_fd()) {
            if let Ok(session) = self.session() {
                session.release_device(maj, min).warn_and_ignore(loc!());
            }
        }
        drop(fd);
    }

    /// Acknowledges a pause so logind proceeds with the switch.
    pub fn pause_complete(&self, major: u32, minor: u32) {
        if let Ok(session) = self.session() {
            session
                .pause_device_complete(major, minor)
                .warn_and_ignore(loc!());
        }
    }

    pub fn activate_vt(&self, vt: u32) -> bool {
        // Activating another session's VT is chvt territory; logind only
        // activates our own. Route through the seat's SwitchTo.
        let result: zbus::Result<()> = self.conn.call_method(
            Some("org.freedesktop.login1"),
            "/org/freedesktop/login1/seat/self",
            Some("org.freedesktop.login1.Seat"),
            "SwitchTo",
            &(vt),
        )
        .map(|_| ());
        result.warn(loc!()).is_ok()
    }

    pub fn is_drm_pause(kind_major: u32) -> bool {
        kind_major as u64 == DRM_MAJOR
    }

    pub fn release_control(&self) {
        if let Ok(session) = self.session() {
            session.release_control().warn_and_ignore(loc!());
        }
    }
}

impl Drop for Logind {
    fn drop(&mut self) {
        self.release_control();
    }
}

/// Blocking zbus signal iterators cannot be polled from calloop, so one
/// thread per stream multiplexes them onto the channel. All compositor
/// state stays on the loop thread.
fn spawn_pump(
    conn: Connection,
    session_path: OwnedObjectPath,
    sender: channel::Sender<LogindEvent>,
) -> Result<()> {
    fn session_proxy(
        conn: &Connection,
        path: &OwnedObjectPath,
    ) -> Result<SessionProxyBlocking<'static>> {
        SessionProxyBlocking::builder(conn)
            .path(path.clone())
            .location(loc!())?
            .build()
            .location(loc!())
    }

    {
        let sender = sender.clone();
        let session = session_proxy(&conn, &session_path).location(loc!())?;
        std::thread::Builder::new()
            .name("logind-pause".into())
            .spawn(move || {
                let Ok(pause) = session.receive_pause_device() else {
                    return;
                };
                for signal in pause {
                    let Ok(args) = signal.args() else { continue };
                    if sender
                        .send(LogindEvent::PauseDevice {
                            major: args.major,
                            minor: args.minor,
                            kind: args.kind.to_string(),
                        })
                        .is_err()
                    {
                        return;
                    }
                }
            })
            .location(loc!())?;
    }

    {
        let sender = sender.clone();
        let session = session_proxy(&conn, &session_path).location(loc!())?;
        std::thread::Builder::new()
            .name("logind-resume".into())
            .spawn(move || {
                let Ok(resume) = session.receive_resume_device() else {
                    return;
                };
                for signal in resume {
                    let Ok(args) = signal.args() else { continue };
                    if sender
                        .send(LogindEvent::ResumeDevice {
                            major: args.major,
                            minor: args.minor,
                        })
                        .is_err()
                    {
                        return;
                    }
                }
            })
            .location(loc!())?;
    }

    let session = session_proxy(&conn, &session_path).location(loc!())?;
    std::thread::Builder::new()
        .name("logind-active".into())
        .spawn(move || {
            for change in session.receive_active_changed() {
                let Ok(value) = change.get() else { continue };
                if sender.send(LogindEvent::ActiveChanged(value)).is_err() {
                    return;
                }
            }
            // The property stream ending means the session object is gone.
            let _ = sender.send(LogindEvent::SessionRemoved);
        })
        .location(loc!())?;

    Ok(())
}
