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

//! The DRM/KMS backend. The ioctl/GBM mechanics live behind [`DrmDevice`];
//! this module owns the policy: connector -> encoder -> crtc selection, mode
//! lists, hot-plug reconciliation, and the one-flip-in-flight handshake
//! with the scheduler.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use calloop::generic::Generic;
use calloop::Interest;
use calloop::Mode;
use calloop::PostAction;

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
use crate::utils;
use crate::wire::Subpixel;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DrmMode {
    pub hdisplay: u16,
    pub vdisplay: u16,
    /// Hz; the wire wants mHz.
    pub vrefresh: u32,
    pub flags: u32,
    pub preferred: bool,
}

#[derive(Debug, Clone)]
pub struct DrmConnector {
    pub id: u32,
    pub connected: bool,
    pub kind: ConnectorKind,
    pub kind_id: u32,
    pub mm_width: u32,
    pub mm_height: u32,
    pub subpixel: Subpixel,
    /// The encoder currently driving this connector, if any.
    pub encoder: Option<u32>,
    pub modes: Vec<DrmMode>,
    /// Index into `modes` of the mode currently programmed.
    pub current_mode: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct DrmEncoder {
    pub id: u32,
    pub crtc: Option<u32>,
    /// Bitmask over the crtc list.
    pub possible_crtcs: u32,
}

#[derive(Debug, Default, Clone)]
pub struct DrmResources {
    pub connectors: Vec<DrmConnector>,
    pub encoders: Vec<DrmEncoder>,
    pub crtcs: Vec<u32>,
}

/// A GBM scanout surface created for one crtc.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Scanout {
    pub display: u64,
    pub window: u64,
}

/// A completed page flip read from the DRM fd.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FlipEvent {
    pub crtc: u32,
    pub time_ms: u32,
}

/// The DRM/GBM mechanics seam.
pub trait DrmDevice {
    fn resources(&mut self) -> Result<DrmResources>;

    fn create_scanout(&mut self, crtc: u32, connector: u32, mode: &DrmMode) -> Result<Scanout>;

    fn destroy_scanout(&mut self, scanout: Scanout);

    /// Programs the crtc; needed initially and when the scanout stride
    /// changes.
    fn set_crtc(&mut self, crtc: u32, connector: u32, mode: &DrmMode) -> Result<()>;

    /// Requests an event-driven flip. Ok(true) when a flip is in flight.
    fn page_flip(&mut self, crtc: u32) -> Result<bool>;

    /// Drains completed flips from the device fd.
    fn read_events(&mut self) -> Vec<FlipEvent>;

    fn fd(&self) -> std::os::fd::RawFd;

    fn set_dpms(&mut self, crtc: u32, on: bool);
}

pub type SharedDevice = Rc<RefCell<Box<dyn DrmDevice>>>;

#[derive(Debug, Copy, Clone)]
struct DrivenOutput {
    output: Handle,
    connector: u32,
}

type CrtcMap = Rc<RefCell<HashMap<u32, DrivenOutput>>>;

fn pick_encoder_and_crtc(
    resources: &DrmResources,
    connector: &DrmConnector,
    taken: &mut Vec<u32>,
) -> Option<(u32, u32)> {
    // Prefer the encoder already driving the connector.
    if let Some(id) = connector.encoder {
        if let Some(encoder) = resources.encoders.iter().find(|e| e.id == id) {
            if let Some(crtc) = encoder.crtc.filter(|c| !taken.contains(c)) {
                taken.push(crtc);
                return Some((encoder.id, crtc));
            }
        }
    }
    // Otherwise the first encoder with a free compatible crtc.
    for encoder in &resources.encoders {
        for (i, crtc) in resources.crtcs.iter().enumerate() {
            if encoder.possible_crtcs & (1 << i) == 0 || taken.contains(crtc) {
                continue;
            }
            taken.push(*crtc);
            return Some((encoder.id, *crtc));
        }
    }
    None
}

fn information_for_connector(connector: &DrmConnector) -> OutputInformation {
    let mut info = OutputInformation {
        make: "drm".to_string(),
        model: "unknown".to_string(),
        physical_size: Size::new(connector.mm_width, connector.mm_height),
        subpixel: connector.subpixel,
        connector: connector.kind,
        connector_id: connector.kind_id,
        ..OutputInformation::default()
    };
    for (i, mode) in connector.modes.iter().enumerate() {
        let mut flags = 0;
        if connector.current_mode == Some(i) {
            flags |= mode_flag::CURRENT;
        }
        if mode.preferred {
            flags |= mode_flag::PREFERRED;
        }
        if connector.current_mode.is_none() && mode.preferred {
            flags |= mode_flag::CURRENT;
        }
        info.modes.push(OutputMode {
            width: mode.hdisplay as i32,
            height: mode.vdisplay as i32,
            refresh: (mode.vrefresh * 1000) as i32,
            flags,
        });
    }
    info
}

struct DrmSurfaceOps {
    device: SharedDevice,
    context: Rc<dyn ContextFactory>,
    crtc: u32,
    connector: u32,
    mode: DrmMode,
    scanout: Scanout,
}

impl BackendSurfaceOps for DrmSurfaceOps {
    fn terminate(&self, _surface: &BackendSurface) {
        self.device.borrow_mut().destroy_scanout(self.scanout);
    }

    fn sleep(&self, _surface: &BackendSurface, sleep: bool) -> bool {
        self.device.borrow_mut().set_dpms(self.crtc, !sleep);
        true
    }

    fn page_flip(&self, _surface: &BackendSurface) -> bool {
        let mut device = self.device.borrow_mut();
        match device.page_flip(self.crtc) {
            Ok(in_flight) => in_flight,
            Err(e) => {
                // A failed flip can mean the scanout stride changed; a full
                // mode-set recovers.
                warn!("page flip failed on crtc {}: {e:?}", self.crtc);
                device
                    .set_crtc(self.crtc, self.connector, &self.mode)
                    .warn_and_ignore(loc!());
                false
            },
        }
    }

    fn create_renderer(&self, surface: &BackendSurface) -> Result<Box<dyn Renderer>> {
        self.context.create_renderer(surface)
    }
}

pub struct DrmBackend {
    device: SharedDevice,
    context: Rc<dyn ContextFactory>,
    /// crtc -> output, shared with the flip-event dispatcher.
    crtc_outputs: CrtcMap,
}

impl DrmBackend {
    fn add_connector_output(
        &mut self,
        comp: &mut Compositor,
        resources: &DrmResources,
        connector: &DrmConnector,
        taken: &mut Vec<u32>,
    ) {
        let Some((_, crtc)) = pick_encoder_and_crtc(resources, connector, taken) else {
            warn!("could not find encoder/crtc for connector {}", connector.id);
            return;
        };

        let mode_index = connector
            .modes
            .iter()
            .position(|m| m.preferred)
            .or(connector.current_mode)
            .unwrap_or(0);
        let Some(mode) = connector.modes.get(mode_index).copied() else {
            warn!("connector {} has no modes", connector.id);
            return;
        };

        let scanout = {
            let mut device = self.device.borrow_mut();
            match device.create_scanout(crtc, connector.id, &mode) {
                Ok(scanout) => scanout,
                Err(e) => {
                    error!("failed to create scanout for crtc {crtc}: {e:?}");
                    return;
                },
            }
        };

        if let Err(e) = self.device.borrow_mut().set_crtc(crtc, connector.id, &mode) {
            error!("failed to set crtc {crtc}: {e:?}");
            self.device.borrow_mut().destroy_scanout(scanout);
            return;
        }

        let bsurface = BackendSurface {
            display: scanout.display,
            window: scanout.window,
            ops: Rc::new(DrmSurfaceOps {
                device: self.device.clone(),
                context: self.context.clone(),
                crtc,
                connector: connector.id,
                mode,
                scanout,
            }),
        };

        let oid = output::output_add(comp, information_for_connector(connector), bsurface);
        if oid != Handle::NONE {
            self.crtc_outputs.borrow_mut().insert(
                crtc,
                DrivenOutput {
                    output: oid,
                    connector: connector.id,
                },
            );
        }
    }
}

impl Backend for DrmBackend {
    fn name(&self) -> &'static str {
        "drm"
    }

    fn update_outputs(&mut self, comp: &mut Compositor) {
        let resources = match self.device.borrow_mut().resources() {
            Ok(resources) => resources,
            Err(e) => {
                warn!("could not enumerate drm resources: {e:?}");
                return;
            },
        };

        let connected: Vec<DrmConnector> = resources
            .connectors
            .iter()
            .filter(|c| c.connected && !c.modes.is_empty())
            .cloned()
            .collect();

        // Terminate outputs whose connector went away.
        let live_connectors: Vec<u32> = connected.iter().map(|c| c.id).collect();
        let known: Vec<(u32, DrivenOutput)> = self
            .crtc_outputs
            .borrow()
            .iter()
            .map(|(c, d)| (*c, *d))
            .collect();
        for (crtc, driven) in &known {
            if !live_connectors.contains(&driven.connector) {
                self.crtc_outputs.borrow_mut().remove(crtc);
                scheduler::output_terminate(comp, driven.output);
            }
        }

        // Add outputs for connectors we are not driving yet.
        let mut taken: Vec<u32> = self.crtc_outputs.borrow().keys().copied().collect();
        for connector in &connected {
            let already = self
                .crtc_outputs
                .borrow()
                .values()
                .any(|d| d.connector == connector.id);
            if already {
                continue;
            }
            self.add_connector_output(comp, &resources, connector, &mut taken);
        }
    }

    fn terminate(&mut self, comp: &mut Compositor) {
        let outputs: Vec<Handle> = self
            .crtc_outputs
            .borrow()
            .values()
            .map(|d| d.output)
            .collect();
        for oid in outputs {
            scheduler::output_terminate(comp, oid);
        }
        self.crtc_outputs.borrow_mut().clear();
    }
}

/// Opens the configured card through the session broker and brings up the
/// backend. Ok(None) when the platform has no DRM seam or the device
/// cannot be opened (probe falls through to the next backend).
pub fn probe(comp: &mut Compositor) -> Result<Option<Box<dyn Backend>>> {
    let Some(device) = comp.platform.drm.take() else {
        return Ok(None);
    };
    if !comp.session.has_privileged_path() {
        comp.platform.drm = Some(device);
        return Ok(None);
    }

    let device: SharedDevice = Rc::new(RefCell::new(device));
    let context = comp.platform.context.clone();
    let crtc_outputs: CrtcMap = Rc::new(RefCell::new(HashMap::new()));

    // Flip completions drive finish_frame.
    let fd = device.borrow().fd();
    let source = Generic::new(
        // SAFETY: the device (and its fd) lives in the backend for the
        // whole life of the loop source; the source is removed with the
        // loop when the compositor is dropped.
        unsafe { std::os::fd::BorrowedFd::borrow_raw(fd) },
        Interest::READ,
        Mode::Level,
    );
    let event_device = device.clone();
    let event_map = crtc_outputs.clone();
    comp.loop_handle
        .insert_source(source, move |_, _, comp| {
            let events = event_device.borrow_mut().read_events();
            for event in events {
                let oid = event_map
                    .borrow()
                    .get(&event.crtc)
                    .map(|d| d.output)
                    .unwrap_or(Handle::NONE);
                if oid != Handle::NONE {
                    let time = if event.time_ms != 0 {
                        event.time_ms
                    } else {
                        utils::monotonic_time_ms()
                    };
                    scheduler::finish_frame(comp, oid, time);
                }
            }
            comp.drain_signals();
            Ok(PostAction::Continue)
        })
        .map_err(|e| anyhow!("failed to insert drm event source: {e:?}"))
        .location(loc!())?;

    let mut backend = Box::new(DrmBackend {
        device,
        context,
        crtc_outputs,
    });
    backend.update_outputs(comp);

    if backend.crtc_outputs.borrow().is_empty() {
        bail!("drm backend found no usable outputs");
    }
    Ok(Some(backend))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder(id: u32, crtc: Option<u32>, possible: u32) -> DrmEncoder {
        DrmEncoder {
            id,
            crtc,
            possible_crtcs: possible,
        }
    }

    fn connector(id: u32, encoder: Option<u32>) -> DrmConnector {
        DrmConnector {
            id,
            connected: true,
            kind: ConnectorKind::Hdmi,
            kind_id: 1,
            mm_width: 520,
            mm_height: 290,
            subpixel: Subpixel::HorizontalRgb,
            encoder,
            modes: vec![DrmMode {
                hdisplay: 1920,
                vdisplay: 1080,
                vrefresh: 60,
                flags: 0,
                preferred: true,
            }],
            current_mode: None,
        }
    }

    #[test]
    fn current_encoder_crtc_is_preferred() {
        let resources = DrmResources {
            connectors: vec![connector(10, Some(1))],
            encoders: vec![encoder(1, Some(42), 0b11)],
            crtcs: vec![41, 42],
        };
        let mut taken = Vec::new();
        let picked = pick_encoder_and_crtc(&resources, &resources.connectors[0], &mut taken);
        assert_eq!(picked, Some((1, 42)));
    }

    #[test]
    fn taken_crtcs_are_skipped() {
        let resources = DrmResources {
            connectors: vec![connector(10, None), connector(11, None)],
            encoders: vec![encoder(1, None, 0b11), encoder(2, None, 0b11)],
            crtcs: vec![41, 42],
        };
        let mut taken = Vec::new();
        let first = pick_encoder_and_crtc(&resources, &resources.connectors[0], &mut taken);
        let second = pick_encoder_and_crtc(&resources, &resources.connectors[1], &mut taken);
        assert_eq!(first, Some((1, 41)));
        assert_eq!(second, Some((1, 42)));
    }

    #[test]
    fn mode_list_marks_preferred_and_current() {
        let mut c = connector(10, None);
        c.modes.push(DrmMode {
            hdisplay: 1280,
            vdisplay: 720,
            vrefresh: 75,
            flags: 0,
            preferred: false,
        });
        let info = information_for_connector(&c);
        assert_eq!(info.modes.len(), 2);
        assert_eq!(
            info.modes[0].flags,
            mode_flag::CURRENT | mode_flag::PREFERRED
        );
        assert_eq!(info.modes[0].refresh, 60_000);
        assert_eq!(info.modes[1].flags, 0);
    }
}
