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

//! The protocol-marshalling seam. The embedder's protocol layer implements
//! [`WireChannel`] per client; the core only ever speaks typed
//! [`WireEvent`]s at identified protocol objects and is never exposed to
//! wire bytes. Object destruction flows the other way, through
//! `Compositor::wire_object_destroyed`.

use std::fmt;
use std::os::fd::OwnedFd;
use std::rc::Rc;

/// Identifies one protocol object within its client's connection. Zero is
/// never a live object.
pub type ObjectId = u64;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ClientId(pub u64);

/// Errors posted at a misbehaving client's resource. The protocol layer maps
/// these onto the matching interface error codes and disconnects the client.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ProtocolError {
    NoMemory,
    InvalidScale,
    InvalidTransform,
    InvalidMethod,
    BadSurface,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum KeyState {
    Released,
    Pressed,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ButtonState {
    Released,
    Pressed,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ScrollAxis {
    Vertical,
    Horizontal,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TouchEventKind {
    Down,
    Up,
    Motion,
    Frame,
    Cancel,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Subpixel {
    Unknown,
    None,
    HorizontalRgb,
    HorizontalBgr,
    VerticalRgb,
    VerticalBgr,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum XdgToplevelState {
    Maximized,
    Fullscreen,
    Resizing,
    Activated,
}

/// Server -> client events the core emits. One variant per wire event that
/// matters to compositor semantics; anything the protocol layer can derive
/// on its own (wl_shm formats, registry globals) stays out.
#[derive(Debug)]
pub enum WireEvent {
    // wl_callback / wl_buffer
    CallbackDone {
        time_ms: u32,
    },
    BufferRelease,

    // wl_surface
    SurfaceEnter {
        output: ObjectId,
    },
    SurfaceLeave {
        output: ObjectId,
    },

    // wl_keyboard
    KeyboardKeymap {
        keymap: Rc<str>,
    },
    KeyboardEnter {
        serial: u32,
        surface: ObjectId,
        keys: Vec<u32>,
    },
    KeyboardLeave {
        serial: u32,
        surface: ObjectId,
    },
    KeyboardKey {
        serial: u32,
        time_ms: u32,
        key: u32,
        state: KeyState,
    },
    KeyboardModifiers {
        serial: u32,
        depressed: u32,
        latched: u32,
        locked: u32,
        group: u32,
    },

    // wl_pointer
    PointerEnter {
        serial: u32,
        surface: ObjectId,
        x: f64,
        y: f64,
    },
    PointerLeave {
        serial: u32,
        surface: ObjectId,
    },
    PointerMotion {
        time_ms: u32,
        x: f64,
        y: f64,
    },
    PointerButton {
        serial: u32,
        time_ms: u32,
        button: u32,
        state: ButtonState,
    },
    PointerAxis {
        time_ms: u32,
        axis: ScrollAxis,
        value: f64,
    },

    // wl_touch
    TouchDown {
        serial: u32,
        time_ms: u32,
        surface: ObjectId,
        slot: i32,
        x: f64,
        y: f64,
    },
    TouchUp {
        serial: u32,
        time_ms: u32,
        slot: i32,
    },
    TouchMotion {
        time_ms: u32,
        slot: i32,
        x: f64,
        y: f64,
    },
    TouchFrame,
    TouchCancel,

    // wl_output
    OutputGeometry {
        x: i32,
        y: i32,
        physical_width: i32,
        physical_height: i32,
        subpixel: Subpixel,
        make: String,
        model: String,
        transform: u32,
    },
    OutputMode {
        flags: u32,
        width: i32,
        height: i32,
        refresh: i32,
    },
    OutputScale {
        factor: i32,
    },
    OutputDone,

    // wl_shell_surface
    ShellConfigure {
        edges: u32,
        width: i32,
        height: i32,
    },
    ShellPopupDone,

    // xdg_surface / xdg_toplevel / xdg_popup
    XdgToplevelConfigure {
        width: i32,
        height: i32,
        states: Vec<XdgToplevelState>,
    },
    XdgSurfaceConfigure {
        serial: u32,
    },
    XdgToplevelClose,
    XdgPopupConfigure {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    XdgPopupDone,

    // wl_data_device / wl_data_offer / wl_data_source
    DataOfferMimeType {
        mime_type: String,
    },
    DataDeviceDataOffer {
        offer: ObjectId,
    },
    DataDeviceSelection {
        offer: Option<ObjectId>,
    },
    DataSourceTarget {
        mime_type: Option<String>,
    },
    DataSourceSend {
        mime_type: String,
        fd: OwnedFd,
    },
    DataSourceCancelled,
}

/// One client connection's marshalling half.
pub trait WireChannel {
    fn client(&self) -> ClientId;

    fn send(&self, object: ObjectId, event: WireEvent);

    fn post_error(&self, object: ObjectId, error: ProtocolError, message: &str);

    /// Destroys the protocol object server-side. Must not re-enter the
    /// compositor; the destroy listener fires on the next dispatch.
    fn destroy(&self, object: ObjectId);

    /// Creates a wl_data_offer object on the given wl_data_device. Returns
    /// None when the client is gone.
    fn create_data_offer(&self, device: ObjectId) -> Option<ObjectId>;
}

/// A protocol object together with its client channel. This is the
/// back-reference stored in the resource registry.
#[derive(Clone)]
pub struct WireHandle {
    pub object: ObjectId,
    pub channel: Rc<dyn WireChannel>,
}

impl fmt::Debug for WireHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WireHandle")
            .field("object", &self.object)
            .field("client", &self.channel.client())
            .finish()
    }
}

impl WireHandle {
    pub fn new(object: ObjectId, channel: Rc<dyn WireChannel>) -> Self {
        Self { object, channel }
    }

    pub fn client(&self) -> ClientId {
        self.channel.client()
    }

    pub fn send(&self, event: WireEvent) {
        self.channel.send(self.object, event);
    }

    pub fn post_error(&self, error: ProtocolError, message: &str) {
        self.channel.post_error(self.object, error, message);
    }

    pub fn destroy(&self) {
        self.channel.destroy(self.object);
    }
}

/// Display-wide event serial counter.
#[derive(Debug, Default)]
pub struct Serials {
    next: u32,
}

impl Serials {
    pub fn next(&mut self) -> u32 {
        self.next = self.next.wrapping_add(1);
        self.next
    }
}

/// Recording channel used by the test suites of every subsystem.
pub mod testing {
    use std::cell::Cell;
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[derive(Debug, Default)]
    pub struct Recording {
        pub sent: Vec<(ObjectId, WireEvent)>,
        pub errors: Vec<(ObjectId, ProtocolError, String)>,
        pub destroyed: Vec<ObjectId>,
    }

    #[derive(Debug)]
    pub struct RecordingChannel {
        client: ClientId,
        pub recording: RefCell<Recording>,
        next_offer: Cell<ObjectId>,
    }

    impl RecordingChannel {
        pub fn new(client: ClientId) -> Rc<Self> {
            Rc::new(Self {
                client,
                recording: RefCell::new(Recording::default()),
                next_offer: Cell::new(0x1000),
            })
        }

        pub fn handle(self: &Rc<Self>, object: ObjectId) -> WireHandle {
            WireHandle::new(object, self.clone() as Rc<dyn WireChannel>)
        }

        pub fn take_sent(&self) -> Vec<(ObjectId, WireEvent)> {
            std::mem::take(&mut self.recording.borrow_mut().sent)
        }

        pub fn sent_to(&self, object: ObjectId) -> Vec<String> {
            self.recording
                .borrow()
                .sent
                .iter()
                .filter(|(o, _)| *o == object)
                .map(|(_, e)| format!("{e:?}"))
                .collect()
        }
    }

    impl WireChannel for RecordingChannel {
        fn client(&self) -> ClientId {
            self.client
        }

        fn send(&self, object: ObjectId, event: WireEvent) {
            self.recording.borrow_mut().sent.push((object, event));
        }

        fn post_error(&self, object: ObjectId, error: ProtocolError, message: &str) {
            self.recording
                .borrow_mut()
                .errors
                .push((object, error, message.to_string()));
        }

        fn destroy(&self, object: ObjectId) {
            self.recording.borrow_mut().destroyed.push(object);
        }

        fn create_data_offer(&self, _device: ObjectId) -> Option<ObjectId> {
            let id = self.next_offer.get();
            self.next_offer.set(id + 1);
            Some(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingChannel;
    use super::*;

    #[test]
    fn serials_increment() {
        let mut serials = Serials::default();
        let a = serials.next();
        let b = serials.next();
        assert_eq!(b, a.wrapping_add(1));
    }

    #[test]
    fn recording_channel_captures_events() {
        let channel = RecordingChannel::new(ClientId(7));
        let handle = channel.handle(42);
        handle.send(WireEvent::BufferRelease);
        handle.post_error(ProtocolError::InvalidScale, "scale must be >= 1");
        handle.destroy();

        let recording = channel.recording.borrow();
        assert_eq!(recording.sent.len(), 1);
        assert_eq!(recording.errors.len(), 1);
        assert_eq!(recording.destroyed, vec![42]);
    }
}
