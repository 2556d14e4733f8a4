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

//! The fd-passer privilege split. Before the parent drops privileges it
//! forks a small child that keeps one end of a SOCK_SEQPACKET pair. The
//! child opens whitelisted device nodes (prefix and rdev-major checked),
//! passes descriptors back over SCM_RIGHTS, manages DRM master across
//! activation, revokes input fds on deactivate, and outlives the parent
//! long enough to restore the TTY. The child never links the rendering or
//! protocol stacks.

use std::io::IoSlice;
use std::io::IoSliceMut;
use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;
use std::os::fd::RawFd;
use std::path::Path;

use nix::fcntl::OFlag;
use nix::fcntl::open;
use nix::libc;
use nix::poll::PollFd;
use nix::poll::PollFlags;
use nix::poll::PollTimeout;
use nix::poll::poll;
use nix::sys::socket::AddressFamily;
use nix::sys::socket::ControlMessage;
use nix::sys::socket::ControlMessageOwned;
use nix::sys::socket::MsgFlags;
use nix::sys::socket::SockFlag;
use nix::sys::socket::SockType;
use nix::sys::socket::recvmsg;
use nix::sys::socket::sendmsg;
use nix::sys::socket::socketpair;
use nix::sys::stat::Mode;
use nix::sys::stat::fstat;
use nix::sys::stat::major;
use nix::sys::stat::stat;
use nix::unistd::ForkResult;
use nix::unistd::Pid;
use nix::unistd::fork;

use crate::prelude::*;
use crate::session::tty::Tty;

const INPUT_MAJOR: u64 = 13;
const DRM_MAJOR: u64 = 226;

// DRM master handover and evdev revocation are the only ioctls the child
// issues on passed fds.
nix::ioctl_none_bad!(drm_set_master, 0x641e);
nix::ioctl_none_bad!(drm_drop_master, 0x641f);
nix::ioctl_write_ptr_bad!(eviocrevoke, 0x40044591, libc::c_int);

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DeviceKind {
    Input,
    Drm,
}

impl DeviceKind {
    fn allowed_prefix(self) -> &'static str {
        match self {
            DeviceKind::Input => "/dev/input/",
            DeviceKind::Drm => "/dev/dri/card",
        }
    }

    fn allowed_major(self) -> u64 {
        match self {
            DeviceKind::Input => INPUT_MAJOR,
            DeviceKind::Drm => DRM_MAJOR,
        }
    }
}

const PATH_MAX_LEN: usize = 108;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Request {
    Check,
    FdOpen {
        path: String,
        flags: i32,
        kind: DeviceKind,
    },
    FdClose {
        dev: u64,
        ino: u64,
    },
    Activate,
    Deactivate,
    ActivateVt {
        vt: u32,
    },
}

/// Fixed-size frames; SEQPACKET preserves boundaries, the fixed size just
/// keeps decode trivial on both sides of the fork.
const FRAME_LEN: usize = 1 + PATH_MAX_LEN + 8 + 8;
static_assertions::const_assert!(FRAME_LEN <= 128);

impl Request {
    fn encode(&self) -> [u8; FRAME_LEN] {
        let mut buf = [0u8; FRAME_LEN];
        match self {
            Request::Check => buf[0] = 0,
            Request::FdOpen { path, flags, kind } => {
                buf[0] = 1;
                let bytes = path.as_bytes();
                let n = bytes.len().min(PATH_MAX_LEN);
                buf[1..1 + n].copy_from_slice(&bytes[..n]);
                buf[1 + PATH_MAX_LEN..1 + PATH_MAX_LEN + 4]
                    .copy_from_slice(&flags.to_le_bytes());
                buf[1 + PATH_MAX_LEN + 4] = match kind {
                    DeviceKind::Input => 0,
                    DeviceKind::Drm => 1,
                };
            },
            Request::FdClose { dev, ino } => {
                buf[0] = 2;
                buf[1..9].copy_from_slice(&dev.to_le_bytes());
                buf[9..17].copy_from_slice(&ino.to_le_bytes());
            },
            Request::Activate => buf[0] = 3,
            Request::Deactivate => buf[0] = 4,
            Request::ActivateVt { vt } => {
                buf[0] = 5;
                buf[1..5].copy_from_slice(&vt.to_le_bytes());
            },
        }
        buf
    }

    fn decode(buf: &[u8]) -> Option<Request> {
        if buf.len() != FRAME_LEN {
            return None;
        }
        Some(match buf[0] {
            0 => Request::Check,
            1 => {
                let end = buf[1..1 + PATH_MAX_LEN]
                    .iter()
                    .position(|b| *b == 0)
                    .unwrap_or(PATH_MAX_LEN);
                let path = String::from_utf8_lossy(&buf[1..1 + end]).into_owned();
                let flags = i32::from_le_bytes(
                    buf[1 + PATH_MAX_LEN..1 + PATH_MAX_LEN + 4].try_into().ok()?,
                );
                let kind = match buf[1 + PATH_MAX_LEN + 4] {
                    0 => DeviceKind::Input,
                    1 => DeviceKind::Drm,
                    _ => return None,
                };
                Request::FdOpen { path, flags, kind }
            },
            2 => Request::FdClose {
                dev: u64::from_le_bytes(buf[1..9].try_into().ok()?),
                ino: u64::from_le_bytes(buf[9..17].try_into().ok()?),
            },
            3 => Request::Activate,
            4 => Request::Deactivate,
            5 => Request::ActivateVt {
                vt: u32::from_le_bytes(buf[1..5].try_into().ok()?),
            },
            _ => return None,
        })
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Response {
    kind: u8,
    ok: bool,
}

impl Response {
    fn encode(&self) -> [u8; 2] {
        [self.kind, self.ok as u8]
    }

    fn decode(buf: &[u8]) -> Option<Response> {
        (buf.len() == 2).then(|| Response {
            kind: buf[0],
            ok: buf[1] != 0,
        })
    }
}

fn send_with_fd(sock: &OwnedFd, payload: &[u8], fd: Option<RawFd>) -> Result<()> {
    let iov = [IoSlice::new(payload)];
    let fds;
    let scm;
    let cmsgs: &[ControlMessage] = match fd {
        Some(fd) => {
            fds = [fd];
            scm = [ControlMessage::ScmRights(&fds)];
            &scm
        },
        None => &[],
    };
    sendmsg::<()>(sock.as_raw_fd(), &iov, cmsgs, MsgFlags::empty(), None).location(loc!())?;
    Ok(())
}

fn recv_with_fd(sock: &OwnedFd, payload: &mut [u8]) -> Result<(usize, Option<OwnedFd>)> {
    let mut iov = [IoSliceMut::new(payload)];
    let mut cmsg_buffer = nix::cmsg_space!([RawFd; 1]);
    let msg = recvmsg::<()>(
        sock.as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_buffer),
        MsgFlags::empty(),
    )
    .location(loc!())?;

    let mut fd = None;
    for cmsg in msg.cmsgs().location(loc!())? {
        if let ControlMessageOwned::ScmRights(received) = cmsg {
            if let Some(raw) = received.first() {
                // SAFETY: SCM_RIGHTS transferred ownership of this fd to us.
                fd = Some(unsafe { OwnedFd::from_raw_fd_checked(*raw) });
            }
        }
    }
    Ok((msg.bytes, fd))
}

// OwnedFd::from_raw_fd wrapper so the SAFETY comment sits in one place.
trait FromRawChecked {
    /// # Safety
    /// `raw` must be an owned, open descriptor.
    unsafe fn from_raw_fd_checked(raw: RawFd) -> OwnedFd;
}

impl FromRawChecked for OwnedFd {
    unsafe fn from_raw_fd_checked(raw: RawFd) -> OwnedFd {
        // SAFETY: forwarded contract.
        unsafe { std::os::fd::FromRawFd::from_raw_fd(raw) }
    }
}

/// Parent half of the broker.
#[derive(Debug)]
pub struct BrokerClient {
    sock: OwnedFd,
    pub child: Pid,
}

/// Forks the broker child. Must run before privileges are dropped; the
/// child inherits the (still privileged) uid and the tty fd for terminal
/// restoration.
pub fn spawn(tty: Option<&Tty>) -> Result<BrokerClient> {
    let (parent_sock, child_sock) = socketpair(
        AddressFamily::Unix,
        SockType::SeqPacket,
        None,
        SockFlag::SOCK_CLOEXEC,
    )
    .location(loc!())?;

    let parent_pid = nix::unistd::getpid();
    // SAFETY: the child only runs the nix-based broker loop below and never
    // touches the parent's event loop, renderer, or allocator-heavy state.
    match unsafe { fork() }.location(loc!())? {
        ForkResult::Parent { child } => {
            drop(child_sock);
            let client = BrokerClient {
                sock: parent_sock,
                child,
            };
            ensure!(client.check(), "fd broker did not respond");
            Ok(client)
        },
        ForkResult::Child => {
            drop(parent_sock);
            let code = child_main(child_sock, parent_pid, tty);
            std::process::exit(code);
        },
    }
}

impl BrokerClient {
    fn roundtrip(&self, request: &Request, expected: u8) -> (bool, Option<OwnedFd>) {
        if send_with_fd(&self.sock, &request.encode(), None)
            .log(loc!())
            .is_err()
        {
            return (false, None);
        }

        // Bounded wait so a wedged child cannot hang the compositor.
        let mut pollfd = [PollFd::new(self.sock.as_fd_ref(), PollFlags::POLLIN)];
        match poll(&mut pollfd, PollTimeout::from(1000u16)) {
            Ok(1) => {},
            _ => return (false, None),
        }

        let mut buf = [0u8; 2];
        match recv_with_fd(&self.sock, &mut buf) {
            Ok((n, fd)) => match Response::decode(&buf[..n]) {
                Some(response) if response.kind == expected => (response.ok, fd),
                _ => (false, None),
            },
            Err(_) => (false, None),
        }
    }

    pub fn check(&self) -> bool {
        self.roundtrip(&Request::Check, 0).0
    }

    pub fn open_device(&self, path: &Path, flags: i32, kind: DeviceKind) -> Result<OwnedFd> {
        let request = Request::FdOpen {
            path: path.to_string_lossy().into_owned(),
            flags,
            kind,
        };
        let (_, fd) = self.roundtrip(&request, 1);
        fd.ok_or_else(|| anyhow!("broker refused to open {path:?}"))
    }

    /// Closing goes through the broker so it can drop DRM master first.
    pub fn close_device(&self, fd: OwnedFd) {
        if let Ok(st) = fstat(&fd) {
            let request = Request::FdClose {
                dev: st.st_dev,
                ino: st.st_ino,
            };
            send_with_fd(&self.sock, &request.encode(), None).log_and_ignore(loc!());
        }
        drop(fd);
    }

    pub fn activate(&self) -> bool {
        self.roundtrip(&Request::Activate, 3).0
    }

    pub fn deactivate(&self) -> bool {
        self.roundtrip(&Request::Deactivate, 4).0
    }

    pub fn activate_vt(&self, vt: u32) -> bool {
        self.roundtrip(&Request::ActivateVt { vt }, 5).0
    }
}

// nix's PollFd borrows an fd; small helper to keep the call site readable.
trait AsFdRef {
    fn as_fd_ref(&self) -> std::os::fd::BorrowedFd<'_>;
}

impl AsFdRef for OwnedFd {
    fn as_fd_ref(&self) -> std::os::fd::BorrowedFd<'_> {
        std::os::fd::AsFd::as_fd(self)
    }
}

#[derive(Debug)]
struct ChildFd {
    fd: OwnedFd,
    kind: DeviceKind,
    dev: u64,
    ino: u64,
}

fn child_open(
    fds: &mut Vec<ChildFd>,
    path: &str,
    flags: i32,
    kind: DeviceKind,
) -> Option<RawFd> {
    if !path.starts_with(kind.allowed_prefix()) {
        warn!("Denying open from: {path}");
        return None;
    }
    let st = stat(path).ok()?;
    if major(st.st_rdev as u64) != kind.allowed_major() {
        warn!("Denying open of wrong device kind: {path}");
        return None;
    }

    let fd = open(
        path,
        OFlag::from_bits_truncate(flags) | OFlag::O_CLOEXEC,
        Mode::empty(),
    )
    .warn(loc!())
    .ok()?;

    if kind == DeviceKind::Drm {
        // SAFETY: fd is an open DRM node.
        unsafe { drm_set_master(fd.as_raw_fd()) }.warn_and_ignore(loc!());
    }

    let raw = fd.as_raw_fd();
    fds.push(ChildFd {
        fd,
        kind,
        dev: st.st_dev,
        ino: st.st_ino,
    });
    Some(raw)
}

fn child_close(fds: &mut Vec<ChildFd>, dev: u64, ino: u64) {
    let Some(i) = fds.iter().position(|f| f.dev == dev && f.ino == ino) else {
        warn!("Tried to close fd that we did not open: ({dev}, {ino})");
        return;
    };
    let entry = fds.remove(i);
    if entry.kind == DeviceKind::Drm {
        // SAFETY: entry.fd is an open DRM node.
        unsafe { drm_drop_master(entry.fd.as_raw_fd()) }.warn_and_ignore(loc!());
    }
}

fn child_activate(fds: &[ChildFd]) -> bool {
    for f in fds {
        if f.kind == DeviceKind::Drm {
            // SAFETY: f.fd is an open DRM node.
            if unsafe { drm_set_master(f.fd.as_raw_fd()) }.is_err() {
                warn!("Could not set master for drm fd ({})", f.fd.as_raw_fd());
                return false;
            }
        }
    }
    true
}

fn child_deactivate(fds: &mut Vec<ChildFd>) -> bool {
    // Master drops before input revocation.
    for f in fds.iter() {
        if f.kind == DeviceKind::Drm {
            // SAFETY: f.fd is an open DRM node.
            if unsafe { drm_drop_master(f.fd.as_raw_fd()) }.is_err() {
                warn!("Could not drop master for drm fd ({})", f.fd.as_raw_fd());
                return false;
            }
        }
    }

    let mut revoked = true;
    fds.retain(|f| {
        if f.kind != DeviceKind::Input {
            return true;
        }
        // SAFETY: f.fd is an open evdev node.
        if unsafe { eviocrevoke(f.fd.as_raw_fd(), &0) }.is_err() {
            warn!("Kernel does not support EVIOCREVOKE, can not revoke input devices");
            revoked = false;
            return true;
        }
        false
    });
    revoked
}

/// The child's whole life. Exits when the parent is gone, after dropping
/// master on everything and restoring the TTY.
fn child_main(sock: OwnedFd, parent: Pid, tty: Option<&Tty>) -> i32 {
    let mut fds: Vec<ChildFd> = Vec::new();

    loop {
        let mut buf = [0u8; FRAME_LEN];
        let received = match recv_with_fd(&sock, &mut buf) {
            Ok((n, _)) if n > 0 => Request::decode(&buf[..n]),
            _ => None,
        };

        if let Some(ref request) = received {
            let (kind, ok, fd) = match request {
                Request::Check => (0, true, None),
                Request::FdOpen { path, flags, kind } => {
                    let fd = child_open(&mut fds, path, *flags, *kind);
                    (1, fd.is_some(), fd)
                },
                Request::FdClose { dev, ino } => {
                    child_close(&mut fds, *dev, *ino);
                    continue;
                },
                Request::Activate => (3, child_activate(&fds), None),
                Request::Deactivate => (4, child_deactivate(&mut fds), None),
                Request::ActivateVt { vt } => {
                    (5, tty.map(|t| t.activate_vt(*vt)).unwrap_or(false), None)
                },
            };
            let response = Response { kind, ok };
            if send_with_fd(&sock, &response.encode(), fd).is_err() {
                break;
            }
        }

        // recv returning without a frame means the socket closed or the
        // parent died.
        if nix::sys::signal::kill(parent, None).is_err() {
            break;
        }
        if received.is_none() {
            break;
        }
    }

    // Parent is gone: release every device and put the terminal back. The
    // exit below skips destructors, so the restore is explicit.
    for f in fds.iter() {
        if f.kind == DeviceKind::Drm {
            // SAFETY: f.fd is an open DRM node.
            unsafe { drm_drop_master(f.fd.as_raw_fd()) }.warn_and_ignore(loc!());
        }
    }
    if let Some(tty) = tty {
        tty.restore();
    }
    info!("Parent exit ({parent})");
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frames_round_trip() {
        let cases = [
            Request::Check,
            Request::FdOpen {
                path: "/dev/input/event3".to_string(),
                flags: 0o2,
                kind: DeviceKind::Input,
            },
            Request::FdOpen {
                path: "/dev/dri/card0".to_string(),
                flags: 0o2,
                kind: DeviceKind::Drm,
            },
            Request::FdClose { dev: 13, ino: 42 },
            Request::Activate,
            Request::Deactivate,
            Request::ActivateVt { vt: 3 },
        ];
        for case in cases {
            let encoded = case.encode();
            assert_eq!(Request::decode(&encoded), Some(case));
        }
    }

    #[test]
    fn response_frames_round_trip() {
        let response = Response { kind: 4, ok: true };
        assert_eq!(Response::decode(&response.encode()), Some(response));
    }

    #[test]
    fn garbage_frames_are_rejected() {
        assert_eq!(Request::decode(&[]), None);
        let mut buf = [0u8; FRAME_LEN];
        buf[0] = 99;
        assert_eq!(Request::decode(&buf), None);
    }

    #[test]
    fn open_gate_rejects_bad_prefix_and_kind() {
        let mut fds = Vec::new();
        assert!(child_open(&mut fds, "/etc/passwd", 0, DeviceKind::Input).is_none());
        assert!(child_open(&mut fds, "/dev/input/../mem", 0, DeviceKind::Drm).is_none());
        assert!(fds.is_empty());
    }
}
