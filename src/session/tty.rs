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

//! VT programming. Puts the chosen tty into raw graphics mode with a
//! process-controlled switch protocol (SIGUSR1 releases, SIGUSR2 acquires)
//! and restores the original state on teardown.

use std::fs::File;
use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;

use nix::libc;
use nix::sys::stat::fstat;
use nix::sys::stat::major;
use nix::sys::stat::minor;

use crate::prelude::*;

const TTY_MAJOR: u64 = 4;

const K_OFF: libc::c_int = 0x04;
const KD_GRAPHICS: libc::c_int = 0x01;

const VT_AUTO: libc::c_char = 0x00;
const VT_PROCESS: libc::c_char = 0x01;
const VT_ACKACQ: libc::c_int = 0x02;

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
struct VtMode {
    mode: libc::c_char,
    waitv: libc::c_char,
    relsig: libc::c_short,
    acqsig: libc::c_short,
    frsig: libc::c_short,
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone)]
struct VtStat {
    v_active: libc::c_ushort,
    v_signal: libc::c_ushort,
    v_state: libc::c_ushort,
}

nix::ioctl_read_bad!(vt_openqry, 0x5600, libc::c_int);
nix::ioctl_write_ptr_bad!(vt_setmode, 0x5602, VtMode);
nix::ioctl_read_bad!(vt_getstate, 0x5603, VtStat);
nix::ioctl_write_int_bad!(vt_reldisp, 0x5605);
nix::ioctl_write_int_bad!(vt_activate, 0x5606);
nix::ioctl_write_int_bad!(vt_waitactive, 0x5607);
nix::ioctl_write_int_bad!(kd_setmode, 0x4B3A);
nix::ioctl_read_bad!(kd_getmode, 0x4B3B, libc::c_int);
nix::ioctl_read_bad!(kd_gkbmode, 0x4B44, libc::c_int);
nix::ioctl_write_int_bad!(kd_skbmode, 0x4B45);

#[derive(Debug)]
struct SavedState {
    kb_mode: libc::c_int,
    console_mode: libc::c_int,
    vt: libc::c_int,
}

#[derive(Debug)]
pub struct Tty {
    fd: OwnedFd,
    pub vt: u32,
    saved: SavedState,
}

fn find_vt(vtnr: Option<u32>) -> Result<u32> {
    if let Some(vt) = vtnr {
        return Ok(vt);
    }
    let tty0 = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/tty0")
        .context(loc!(), "could not open /dev/tty0 to find an unused VT")?;
    let mut vt: libc::c_int = 0;
    // SAFETY: tty0 is a valid open tty fd and vt points at a c_int.
    unsafe { vt_openqry(tty0.as_raw_fd(), &mut vt) }
        .context(loc!(), "could not find unused VT")?;
    Ok(vt as u32)
}

fn open_tty(vt: u32) -> Result<File> {
    let path = format!("/dev/tty{vt}");
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_CLOEXEC)
        .open(&path)
        .with_context(loc!(), || format!("could not open {path}"))?;
    info!("Running on VT {vt}");
    Ok(file)
}

impl Tty {
    /// Opens the VT (from `XDG_VTNR` or the first free one), saves the
    /// current keyboard/console modes, switches to raw graphics with a
    /// process-controlled VT protocol, and activates it.
    pub fn open(vtnr: Option<u32>) -> Result<Self> {
        let file = open_tty(find_vt(vtnr).location(loc!())?).location(loc!())?;
        let fd = OwnedFd::from(file);
        let raw = fd.as_raw_fd();

        let st = fstat(&fd).location(loc!())?;
        let vt = minor(st.st_rdev as u64);
        ensure!(
            major(st.st_rdev as u64) == TTY_MAJOR && vt != 0,
            "not a valid VT"
        );

        let mut state = VtStat::default();
        // SAFETY: raw is a valid tty fd for the lifetime of this call; the
        // out parameters point at initialised stack values.
        unsafe {
            vt_getstate(raw, &mut state).context(loc!(), "could not get VT state")?;
        }

        let mut kb_mode = 0;
        let mut console_mode = 0;
        // SAFETY: same as above.
        unsafe {
            kd_gkbmode(raw, &mut kb_mode).context(loc!(), "could not get keyboard mode")?;
            kd_getmode(raw, &mut console_mode).context(loc!(), "could not get console mode")?;
        }

        let saved = SavedState {
            kb_mode,
            console_mode,
            vt: state.v_active as libc::c_int,
        };

        let mode = VtMode {
            mode: VT_PROCESS,
            relsig: libc::SIGUSR1 as libc::c_short,
            acqsig: libc::SIGUSR2 as libc::c_short,
            ..VtMode::default()
        };
        // SAFETY: raw is a valid tty fd; mode outlives the call.
        unsafe {
            kd_skbmode(raw, K_OFF).context(loc!(), "could not set keyboard mode to K_OFF")?;
            kd_setmode(raw, KD_GRAPHICS)
                .context(loc!(), "could not set console mode to KD_GRAPHICS")?;
            vt_setmode(raw, &mode).context(loc!(), "could not set VT mode")?;
            vt_activate(raw, vt as libc::c_int).context(loc!(), "could not activate VT")?;
            vt_waitactive(raw, vt as libc::c_int)
                .context(loc!(), "could not wait for VT to become active")?;
        }

        Ok(Self {
            fd,
            vt: vt as u32,
            saved,
        })
    }

    pub fn activate_vt(&self, vt: u32) -> bool {
        info!("Activate VT: {vt}");
        // SAFETY: self.fd is a valid tty fd.
        unsafe { vt_activate(self.fd.as_raw_fd(), vt as libc::c_int) }.is_ok()
    }

    /// Acknowledges a VT release request (SIGUSR1).
    pub fn ack_release(&self) {
        // SAFETY: self.fd is a valid tty fd.
        let _ = unsafe { vt_reldisp(self.fd.as_raw_fd(), 1) };
    }

    /// Acknowledges a VT acquisition (SIGUSR2).
    pub fn ack_acquire(&self) {
        // SAFETY: self.fd is a valid tty fd.
        let _ = unsafe { vt_reldisp(self.fd.as_raw_fd(), VT_ACKACQ) };
    }

    /// Puts the terminal back the way it was found. Runs on drop, and
    /// explicitly in the broker child, which exits without unwinding.
    pub(crate) fn restore(&self) {
        info!("Restoring tty {}", self.fd.as_raw_fd());
        let raw = self.fd.as_raw_fd();
        let mode = VtMode {
            mode: VT_AUTO,
            ..VtMode::default()
        };
        // SAFETY: raw is a valid tty fd; best-effort restoration.
        unsafe {
            let _ = vt_setmode(raw, &mode);
            let _ = kd_setmode(raw, self.saved.console_mode);
            let _ = kd_skbmode(raw, self.saved.kb_mode);
            let _ = vt_activate(raw, self.saved.vt);
        }
    }
}

impl Drop for Tty {
    fn drop(&mut self) {
        self.restore();
    }
}
