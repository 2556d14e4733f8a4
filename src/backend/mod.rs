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

//! Backend abstraction. Probed in order at init: DRM/KMS, nested Wayland
//! (when WAYLAND_DISPLAY is set), X11 (when DISPLAY is set); the first that
//! comes up wins. Each backend owns per-output backend surfaces and feeds
//! hot-plug updates through `update_outputs`.

pub mod drm;
pub mod wayland;
pub mod x11;

use std::env;
use std::fmt;
use std::rc::Rc;

use crate::compositor::Compositor;
use crate::prelude::*;
use crate::renderer::Renderer;

/// A backend's per-output scanout target: renderer-opaque native display
/// and window handles plus the callbacks the scheduler drives.
#[derive(Clone)]
pub struct BackendSurface {
    /// Non-zero for a live surface; compared to detect redundant swaps.
    pub display: u64,
    pub window: u64,
    pub ops: Rc<dyn BackendSurfaceOps>,
}

impl fmt::Debug for BackendSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSurface")
            .field("display", &self.display)
            .field("window", &self.window)
            .finish()
    }
}

#[allow(unused_variables)]
pub trait BackendSurfaceOps {
    fn terminate(&self, surface: &BackendSurface) {}

    /// Returns true when the backend handled the sleep itself; false makes
    /// the scheduler fake it with black frames.
    fn sleep(&self, surface: &BackendSurface, sleep: bool) -> bool {
        false
    }

    /// Kicks the scanout swap. True means a flip is now in flight and the
    /// backend will call finish_frame from its completion event; false
    /// means the frame is done synchronously.
    fn page_flip(&self, surface: &BackendSurface) -> bool;

    /// Builds the rendering context for this surface.
    fn create_renderer(&self, surface: &BackendSurface) -> Result<Box<dyn Renderer>>;
}

/// Factory for renderers over backend surfaces; the GLES implementation
/// lives with the embedder's platform layer.
pub trait ContextFactory {
    fn create_renderer(&self, surface: &BackendSurface) -> Result<Box<dyn Renderer>>;
}

/// Context factory producing no-op renderers; tests and headless runs.
#[derive(Debug, Default)]
pub struct NullContextFactory;

impl ContextFactory for NullContextFactory {
    fn create_renderer(&self, _surface: &BackendSurface) -> Result<Box<dyn Renderer>> {
        Ok(Box::new(crate::renderer::NullRenderer::default()))
    }
}

pub trait Backend {
    fn name(&self) -> &'static str;

    /// Hot-plug enumeration: add outputs that appeared, terminate outputs
    /// that went away.
    fn update_outputs(&mut self, comp: &mut Compositor);

    fn terminate(&mut self, comp: &mut Compositor);
}

/// Probes backends in order. Fails only when no environment for any
/// backend exists, which is fatal at init.
pub fn init(comp: &mut Compositor) -> Result<Box<dyn Backend>> {
    match drm::probe(comp) {
        Ok(Some(backend)) => {
            info!("Initialized drm backend");
            return Ok(backend);
        },
        Ok(None) => {},
        Err(e) => debug!("drm backend unavailable: {e:?}"),
    }

    if env::var_os("WAYLAND_DISPLAY").is_some() {
        match wayland::probe(comp) {
            Ok(Some(backend)) => {
                info!("Initialized wayland backend");
                return Ok(backend);
            },
            Ok(None) => {},
            Err(e) => debug!("wayland backend unavailable: {e:?}"),
        }
    }

    if env::var_os("DISPLAY").is_some() {
        match x11::probe(comp) {
            Ok(Some(backend)) => {
                info!("Initialized x11 backend");
                return Ok(backend);
            },
            Ok(None) => {},
            Err(e) => debug!("x11 backend unavailable: {e:?}"),
        }
    }

    bail!("Could not initialize any backend");
}
