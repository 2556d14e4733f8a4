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

//! XWayland lifecycle: allocate a display number (lock file plus abstract
//! and filesystem sockets), spawn `Xwayland -rootless`, wait for SIGUSR1
//! readiness, publish DISPLAY, and run the window-manager half over the wm
//! socket pair. A server that dies after more than five seconds of life is
//! restarted once.

pub mod selection;
pub mod xwm;

use std::fs;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixListener;
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Child;
use std::process::Command;
use std::process::Stdio;
use std::time::Instant;

use nix::sys::socket::AddressFamily;
use nix::sys::socket::SockFlag;
use nix::sys::socket::SockType;
use nix::sys::socket::UnixAddr;
use nix::sys::socket::bind;
use nix::sys::socket::listen;
use nix::sys::socket::socket;
use nix::sys::socket::socketpair;
use nix::sys::socket::Backlog;

use crate::compositor::Compositor;
use crate::geometry::Point;
use crate::geometry::Size;
use crate::prelude::*;
use crate::signals::Signal;
use crate::xwayland::xwm::Xwm;

const DISPLAY_MAX: u32 = 32;
const RESTART_THRESHOLD_SECS: u64 = 5;

#[derive(Debug)]
struct DisplayLock {
    display: u32,
    lock_path: PathBuf,
    socket_path: PathBuf,
}

impl Drop for DisplayLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
        let _ = fs::remove_file(&self.socket_path);
    }
}

/// Claims the first free X display: the lock file is created exclusively,
/// then the filesystem and abstract sockets are bound.
fn claim_display() -> Result<(DisplayLock, UnixListener, OwnedFd)> {
    for display in 0..DISPLAY_MAX {
        let lock_path = PathBuf::from(format!("/tmp/.X{display}-lock"));
        let mut lock_file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(file) => file,
            Err(_) => continue,
        };
        // Same format the X server writes: pid, ten columns, newline.
        if lock_file
            .write_all(format!("{:>10}\n", std::process::id()).as_bytes())
            .log(loc!())
            .is_err()
        {
            let _ = fs::remove_file(&lock_path);
            continue;
        }

        fs::create_dir_all("/tmp/.X11-unix").log_and_ignore(loc!());
        let socket_path = PathBuf::from(format!("/tmp/.X11-unix/X{display}"));
        let _ = fs::remove_file(&socket_path);
        let fs_listener = match UnixListener::bind(&socket_path) {
            Ok(listener) => listener,
            Err(_) => {
                let _ = fs::remove_file(&lock_path);
                continue;
            },
        };

        // The abstract-namespace socket modern clients prefer.
        let abstract_fd = socket(
            AddressFamily::Unix,
            SockType::Stream,
            SockFlag::empty(),
            None,
        )
        .location(loc!())?;
        let addr =
            UnixAddr::new_abstract(format!("/tmp/.X11-unix/X{display}").as_bytes())
                .location(loc!())?;
        if bind(abstract_fd.as_raw_fd(), &addr).is_err()
            || listen(&abstract_fd, Backlog::new(1).location(loc!())?).is_err()
        {
            let _ = fs::remove_file(&lock_path);
            let _ = fs::remove_file(&socket_path);
            continue;
        }

        return Ok((
            DisplayLock {
                display,
                lock_path,
                socket_path,
            },
            fs_listener,
            abstract_fd,
        ));
    }
    bail!("no free X display found");
}

pub struct Xwayland {
    pub display: u32,
    /// Held for its cleanup side effects.
    _lock: DisplayLock,
    child: Child,
    started: Instant,
    restarted: bool,
    /// Set until SIGUSR1 announces readiness.
    pub waiting_ready: bool,
    /// Compositor end of the WM socket, consumed when the XWM starts.
    wm_fd: Option<OwnedFd>,
    pub wm: Option<Xwm>,
}

fn spawn_server(
    display: u32,
    fs_listener: &UnixListener,
    abstract_fd: &OwnedFd,
    wayland_socket: &OwnedFd,
    wm_fd: &OwnedFd,
) -> Result<Child> {
    let listen_fs = fs_listener.as_raw_fd();
    let listen_abstract = abstract_fd.as_raw_fd();
    let wayland = wayland_socket.as_raw_fd();
    let wm = wm_fd.as_raw_fd();

    let mut command = Command::new("Xwayland");
    command
        .arg(format!(":{display}"))
        .arg("-rootless")
        .arg("-terminate")
        .args(["-listen", &listen_fs.to_string()])
        .args(["-listen", &listen_abstract.to_string()])
        .args(["-wm", &wm.to_string()])
        .env("WAYLAND_SOCKET", wayland.to_string())
        .stdin(Stdio::null());

    // SAFETY: the pre-exec hook only calls async-signal-safe libc wrappers
    // (fcntl, sigaction via signal).
    unsafe {
        command.pre_exec(move || {
            // The fds above must survive exec.
            for fd in [listen_fs, listen_abstract, wayland, wm] {
                let flags = nix::libc::fcntl(fd, nix::libc::F_GETFD);
                if flags >= 0 {
                    nix::libc::fcntl(
                        fd,
                        nix::libc::F_SETFD,
                        flags & !nix::libc::FD_CLOEXEC,
                    );
                }
            }
            // With SIGUSR1 ignored at exec time, the X server signals its
            // parent once it is ready to accept connections.
            nix::libc::signal(nix::libc::SIGUSR1, nix::libc::SIG_IGN);
            Ok(())
        });
    }

    command
        .spawn()
        .context(loc!(), "could not spawn Xwayland")
}

impl Xwayland {
    /// Claims a display and spawns the server. `wayland_socket` is the
    /// client end of a fresh compositor connection for Xwayland itself.
    pub fn spawn(wayland_socket: OwnedFd) -> Result<Self> {
        let (lock, fs_listener, abstract_fd) = claim_display().location(loc!())?;
        let (wm_ours, wm_theirs) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None,
            SockFlag::empty(),
        )
        .location(loc!())?;

        let child = spawn_server(
            lock.display,
            &fs_listener,
            &abstract_fd,
            &wayland_socket,
            &wm_theirs,
        )
        .location(loc!())?;

        info!("Xwayland spawned on :{}", lock.display);
        Ok(Self {
            display: lock.display,
            _lock: lock,
            child,
            started: Instant::now(),
            restarted: false,
            waiting_ready: true,
            wm_fd: Some(wm_ours),
            wm: None,
        })
    }

    /// SIGUSR1 arrived: the server is up. Publishes DISPLAY and starts the
    /// window manager over the wm socket.
    pub fn on_ready(comp: &mut Compositor) {
        let Some(xw) = comp.xwayland.as_mut() else {
            return;
        };
        xw.waiting_ready = false;
        // SAFETY: single-threaded process; nothing reads the environment
        // concurrently.
        unsafe { std::env::set_var("DISPLAY", format!(":{}", xw.display)) };
        info!("Xwayland ready on :{}", xw.display);

        let Some(wm_fd) = xw.wm_fd.take() else {
            return;
        };
        match Xwm::start(comp, wm_fd) {
            Ok(wm) => {
                if let Some(xw) = comp.xwayland.as_mut() {
                    xw.wm = Some(wm);
                }
                comp.signals.emit(Signal::Xwayland { available: true });
            },
            Err(e) => error!("failed to start X window manager: {e:?}"),
        }
    }

    /// Reaps a dead server. A server that lived long enough is restarted
    /// once; flapping servers stay down.
    pub fn on_child_exit(comp: &mut Compositor, wayland_socket: Option<OwnedFd>) {
        let Some(mut xw) = comp.xwayland.take() else {
            return;
        };
        let _ = xw.child.wait();
        comp.signals.emit(Signal::Xwayland { available: false });

        let lived = xw.started.elapsed().as_secs();
        if lived > RESTART_THRESHOLD_SECS && !xw.restarted {
            if let Some(socket) = wayland_socket {
                warn!("Xwayland died after {lived}s; restarting once");
                drop(xw);
                match Xwayland::spawn(socket) {
                    Ok(mut fresh) => {
                        fresh.restarted = true;
                        comp.xwayland = Some(fresh);
                    },
                    Err(e) => error!("Xwayland restart failed: {e:?}"),
                }
            }
        } else {
            warn!("Xwayland died after {lived}s; not restarting");
        }
    }

    pub fn child_pid(&self) -> u32 {
        self.child.id()
    }

    // Window-manager delegation used by the view layer; all no-ops until
    // the XWM is up.

    pub fn wm_window_position(&mut self, window: u32, origin: Point) {
        if let Some(wm) = self.wm.as_mut() {
            wm.window_position(window, origin);
        }
    }

    pub fn wm_window_resize(&mut self, window: u32, size: Size) {
        if let Some(wm) = self.wm.as_mut() {
            wm.window_resize(window, size);
        }
    }

    pub fn wm_window_set_state(&mut self, window: u32, state_bit: u32, on: bool) {
        if let Some(wm) = self.wm.as_mut() {
            wm.window_set_state(window, state_bit, on);
        }
    }

    pub fn wm_window_close(&mut self, window: u32) {
        if let Some(wm) = self.wm.as_mut() {
            wm.window_close(window);
        }
    }

    pub fn wm_window_set_active(&mut self, window: u32, active: bool) -> bool {
        match self.wm.as_mut() {
            Some(wm) => wm.window_set_active(window, active),
            None => false,
        }
    }
}

impl Drop for Xwayland {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
