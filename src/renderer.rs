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

//! The rendering-kernel seam. The GLES implementation lives with the
//! embedder's platform layer; the core drives it through [`Renderer`] and
//! stores only opaque per-surface state.

use crate::geometry::Geometry;
use crate::geometry::Point;
use crate::geometry::Size;
use crate::geometry::Transform;
use crate::prelude::*;
use crate::surface::buffer::BufferBacking;

/// Renderer-owned per-surface state (texture and image names). Opaque to
/// the core; zeroed until the first successful attach.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct SurfaceRenderData {
    pub textures: [u32; 3],
    pub images: [u64; 2],
    pub attached: bool,
}

/// How a view's content is mapped onto its output.
#[derive(Debug, Copy, Clone)]
pub struct PaintProperties {
    pub geometry: Geometry,
    pub visible: Geometry,
    pub transform: Transform,
    pub scale: u32,
}

pub trait Renderer {
    fn set_resolution(&mut self, resolution: Size);

    fn set_time(&mut self, time_ms: u32);

    /// Uploads `buffer` for the surface. On failure the previous texture
    /// stays valid; the caller keeps the old state in place.
    fn surface_attach(
        &mut self,
        data: &mut SurfaceRenderData,
        buffer: &BufferBacking,
        size: Size,
    ) -> Result<()>;

    fn surface_destroy(&mut self, data: &mut SurfaceRenderData);

    fn view_paint(&mut self, data: &SurfaceRenderData, props: &PaintProperties);

    /// Paints a raw surface at a position; the cursor painter uses this.
    fn surface_paint(&mut self, data: &SurfaceRenderData, position: Point, size: Size);

    /// Paints the built-in default cursor.
    fn pointer_paint(&mut self, position: Point);

    fn clear(&mut self);

    fn background(&mut self);

    /// Reads back `geometry` as tightly packed RGBA.
    fn read_pixels(&mut self, geometry: Geometry) -> Vec<u8>;

    /// Finishes the frame and hands it to the backend surface.
    fn swap(&mut self);
}

/// Renderer that swallows everything. Tests and surfaceless outputs use it.
#[derive(Debug, Default)]
pub struct NullRenderer {
    pub frames: u32,
    pub painted_views: u32,
    pub cleared: u32,
    pub backgrounds: u32,
}

impl Renderer for NullRenderer {
    fn set_resolution(&mut self, _resolution: Size) {}

    fn set_time(&mut self, _time_ms: u32) {}

    fn surface_attach(
        &mut self,
        data: &mut SurfaceRenderData,
        _buffer: &BufferBacking,
        _size: Size,
    ) -> Result<()> {
        data.attached = true;
        Ok(())
    }

    fn surface_destroy(&mut self, data: &mut SurfaceRenderData) {
        *data = SurfaceRenderData::default();
    }

    fn view_paint(&mut self, _data: &SurfaceRenderData, _props: &PaintProperties) {
        self.painted_views += 1;
    }

    fn surface_paint(&mut self, _data: &SurfaceRenderData, _position: Point, _size: Size) {}

    fn pointer_paint(&mut self, _position: Point) {}

    fn clear(&mut self) {
        self.cleared += 1;
    }

    fn background(&mut self) {
        self.backgrounds += 1;
    }

    fn read_pixels(&mut self, geometry: Geometry) -> Vec<u8> {
        vec![0; geometry.size.w as usize * geometry.size.h as usize * 4]
    }

    fn swap(&mut self) {
        self.frames += 1;
    }
}
