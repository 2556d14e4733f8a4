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

//! Session management: who opens restricted devices and who owns the VT.
//! Three paths, probed in order: logind (if our session is on the right
//! seat), the forked fd-broker (when starting privileged on a VT), and a
//! plain unprivileged fallback for nested/X11 runs.

pub mod broker;
pub mod input;
pub mod logind;
pub mod tty;

use std::os::fd::OwnedFd;
use std::path::Path;

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd::getgid;
use nix::unistd::getuid;
use nix::unistd::setgid;
use nix::unistd::setuid;

use crate::compositor::Compositor;
use crate::config::Config;
use crate::output::scheduler;
use crate::prelude::*;
use crate::session::broker::BrokerClient;
use crate::session::broker::DeviceKind;
use crate::session::input::InputSource;
use crate::session::logind::Logind;
use crate::session::logind::LogindEvent;
use crate::session::tty::Tty;
use crate::signals::Signal;

/// Where the VT-switch handshake currently stands.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum Phase {
    #[default]
    Idle,
    Activating,
    /// Waiting for every output to shed its backend surface before the
    /// release is acknowledged.
    Deactivating,
}

#[derive(Default)]
pub struct Session {
    pub logind: Option<Logind>,
    pub broker: Option<BrokerClient>,
    pub tty: Option<Tty>,
    pub input: Option<Box<dyn InputSource>>,
    pub phase: Phase,
}

fn drop_privileges() -> Result<()> {
    let (uid, gid) = (getuid(), getgid());
    setgid(gid).location(loc!())?;
    setuid(uid).location(loc!())?;
    // Regaining root afterwards must be impossible.
    if uid.as_raw() != 0 {
        ensure!(
            setuid(nix::unistd::Uid::from_raw(0)).is_err(),
            "privilege drop failed: able to regain root"
        );
    }
    Ok(())
}

impl Session {
    pub fn init(config: &Config) -> Result<Self> {
        match Logind::connect(&config.xdg_seat) {
            Ok(logind) => {
                info!("Session: logind");
                return Ok(Self {
                    logind: Some(logind),
                    ..Self::default()
                });
            },
            Err(e) => debug!("logind unavailable: {e:?}"),
        }

        if nix::unistd::geteuid().is_root() {
            let tty = Tty::open(config.xdg_vtnr).location(loc!())?;
            let broker = broker::spawn(Some(&tty)).location(loc!())?;
            drop_privileges().location(loc!())?;
            info!("Session: fd broker (privileges dropped)");
            return Ok(Self {
                broker: Some(broker),
                tty: Some(tty),
                ..Self::default()
            });
        }

        info!("Session: unprivileged");
        Ok(Self::default())
    }

    pub fn open_device(&mut self, path: &Path, kind: DeviceKind) -> Result<OwnedFd> {
        if let Some(logind) = &mut self.logind {
            return logind.open_device(path);
        }
        if let Some(broker) = &self.broker {
            return broker.open_device(path, OFlag::O_RDWR.bits(), kind);
        }
        nix::fcntl::open(path, OFlag::O_RDWR | OFlag::O_CLOEXEC, Mode::empty())
            .with_context(loc!(), || format!("could not open {path:?}"))
    }

    pub fn close_device(&mut self, fd: OwnedFd) {
        if let Some(logind) = &mut self.logind {
            logind.close_device(fd);
        } else if let Some(broker) = &self.broker {
            broker.close_device(fd);
        }
        // Plain fds close on drop.
    }

    pub fn has_privileged_path(&self) -> bool {
        self.logind.is_some() || self.broker.is_some()
    }
}

/// Kernel (or embedder) asked for another VT.
pub fn activate_vt(comp: &mut Compositor, vt: u32) -> bool {
    let session = &comp.session;
    if let Some(broker) = &session.broker {
        return broker.activate_vt(vt);
    }
    if let Some(logind) = &session.logind {
        return logind.activate_vt(vt);
    }
    if let Some(tty) = &session.tty {
        return tty.activate_vt(vt);
    }
    false
}

/// SIGUSR1: the kernel wants our VT. Drop device access, start detaching
/// backend surfaces, and acknowledge once every output is surfaceless.
pub fn handle_vt_release(comp: &mut Compositor) {
    info!("SIGUSR1");
    if let Some(broker) = &comp.session.broker {
        if !broker.deactivate() {
            return;
        }
    }
    comp.session.phase = Phase::Deactivating;
    comp.signals.emit(Signal::Activate {
        active: false,
        vt: None,
    });
}

/// SIGUSR2: our VT is back.
pub fn handle_vt_acquire(comp: &mut Compositor) {
    info!("SIGUSR2");
    if let Some(broker) = &comp.session.broker {
        if !broker.activate() {
            return;
        }
    }
    comp.session.phase = Phase::Activating;
    comp.signals.emit(Signal::Activate {
        active: true,
        vt: None,
    });
}

/// Completes a pending VT handshake when possible; runs after activate
/// routing and whenever an output sheds or gains its backend surface.
pub fn respond_activate_pending(comp: &mut Compositor) {
    match comp.session.phase {
        Phase::Idle => {},
        Phase::Activating => {
            comp.session.phase = Phase::Idle;
            if let Some(tty) = &comp.session.tty {
                tty.ack_acquire();
            }
        },
        Phase::Deactivating => {
            let all_surfaceless = comp.outputs.iter().all(|(_, o)| o.bsurface.is_none());
            if !all_surfaceless {
                return;
            }
            comp.session.phase = Phase::Idle;
            if let Some(tty) = &comp.session.tty {
                tty.ack_release();
            }
        },
    }
}

/// Routes one event from the logind pump thread.
pub fn handle_logind_event(comp: &mut Compositor, event: LogindEvent) {
    match event {
        LogindEvent::PauseDevice { major, minor, kind } => {
            debug!("PauseDevice({major}, {minor}, {kind:?})");
            if let Some(logind) = &comp.session.logind {
                logind.pause_complete(major, minor);
            }
            if Logind::is_drm_pause(major) {
                comp.signals.emit(Signal::Activate {
                    active: false,
                    vt: None,
                });
            }
        },
        LogindEvent::ResumeDevice { major, .. } => {
            if Logind::is_drm_pause(major) {
                comp.signals.emit(Signal::Activate {
                    active: true,
                    vt: None,
                });
            }
        },
        LogindEvent::ActiveChanged(active) => {
            comp.signals.emit(Signal::Activate { active, vt: None });
        },
        LogindEvent::SessionRemoved => {
            error!("logind session removed; terminating");
            comp.signals.emit(Signal::Terminate);
        },
    }
}

/// The compositor-side activate transition: gate rendering, suspend or
/// resume input decoding, detach or reacquire backend surfaces.
pub fn apply_activate(comp: &mut Compositor, active: bool) {
    if comp.active == active {
        respond_activate_pending(comp);
        return;
    }
    comp.active = active;
    info!("session {}", if active { "activated" } else { "deactivated" });

    if let Some(input) = comp.session.input.as_mut() {
        input.set_active(active);
    }

    let outputs: Vec<_> = comp.outputs.ids();
    if !active {
        for oid in outputs {
            scheduler::set_backend_surface(comp, oid, None);
        }
    } else {
        if let Some(mut backend) = comp.backend.take() {
            backend.update_outputs(comp);
            comp.backend = Some(backend);
        }
        for oid in outputs {
            scheduler::set_sleep(comp, oid, false);
            scheduler::schedule_repaint(comp, oid);
        }
    }

    respond_activate_pending(comp);
}
