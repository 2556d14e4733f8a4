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

use std::fmt;
use std::rc::Rc;

use crate::compositor::Compositor;
use crate::geometry::Size;
use crate::registry::Resource;
use crate::wire::WireEvent;
use crate::wire::WireHandle;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ShmFormat {
    Argb8888,
    Xrgb8888,
}

/// Access to a client's shared-memory pool. Implementations bracket reads in
/// the protocol library's begin/end access so a truncating client SIGBUSes
/// itself, not the compositor.
pub trait ShmAccess: fmt::Debug {
    fn with_contents(&self, f: &mut dyn FnMut(&[u8]));
}

#[derive(Debug, Clone)]
pub enum BufferBacking {
    Shm {
        stride: i32,
        format: ShmFormat,
        pool: Rc<dyn ShmAccess>,
    },
    /// Client-provided GPU buffer; only the renderer can interpret it.
    External {
        handle: u64,
    },
}

/// A client buffer. Reference-counted by the surface states that name it;
/// when the count drops to zero the client gets wl_buffer.release and the
/// compositor-side entry dies, while the protocol object stays with the
/// client.
#[derive(Debug)]
pub struct Buffer {
    pub backing: BufferBacking,
    pub size: Size,
    pub references: u32,
    /// Surface whose states currently name this buffer.
    pub surface: Resource,
    pub y_inverted: bool,
}

impl Buffer {
    pub fn new(backing: BufferBacking, size: Size) -> Self {
        Self {
            backing,
            size,
            references: 0,
            surface: Resource::NONE,
            y_inverted: true,
        }
    }
}

/// Registers a wl_buffer announced by the protocol layer.
pub fn buffer_new(
    comp: &mut Compositor,
    wire: WireHandle,
    backing: BufferBacking,
    size: Size,
) -> Resource {
    let id = comp.buffers.create(Buffer::new(backing, size));
    comp.registry.bind_wire(id, "buffer", wire);
    id
}

/// Takes a reference for a surface state. Returns the id for storing, or
/// none when the buffer is already gone.
pub fn buffer_use(comp: &mut Compositor, buffer: Resource) -> Resource {
    match comp.buffers.get_mut(buffer) {
        Some(b) => {
            b.references += 1;
            buffer
        },
        None => Resource::NONE,
    }
}

/// Drops one reference. At zero: surface links are cleared, the protocol
/// link is broken so the object is not destroyed, the client gets a queued
/// release event, and the entry dies.
pub fn buffer_dispose(comp: &mut Compositor, buffer: Resource) {
    let Some(b) = comp.buffers.get_mut(buffer) else {
        return;
    };
    if b.references > 0 {
        b.references -= 1;
        if b.references > 0 {
            return;
        }
    }

    clear_surface_links(comp, buffer);
    if let Some(wire) = comp.registry.invalidate(buffer) {
        wire.send(WireEvent::BufferRelease);
    }
    comp.buffers.release(buffer);
}

/// The protocol layer saw the wl_buffer object die. No release event, no
/// destroy back-edge; just drop the entry and anything naming it.
pub fn buffer_wire_destroyed(comp: &mut Compositor, buffer: Resource) {
    clear_surface_links(comp, buffer);
    comp.buffers.release(buffer);
}

fn clear_surface_links(comp: &mut Compositor, buffer: Resource) {
    let Some(surface) = comp.buffers.get(buffer).map(|b| b.surface) else {
        return;
    };
    if let Some(s) = comp.surfaces.get_mut(surface) {
        if s.commit.buffer == buffer {
            s.commit.buffer = Resource::NONE;
        }
        if s.pending.buffer == buffer {
            s.pending.buffer = Resource::NONE;
        }
    }
}
