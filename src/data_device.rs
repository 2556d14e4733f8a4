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

//! Clipboard brokering. One selection source at a time, either a client's
//! wl_data_source or a compositor-owned custom source (the X11 bridge
//! installs one). Receivers get the bytes through a pipe whose write end is
//! handed to the source's send path.

use std::os::fd::OwnedFd;

use crate::compositor::Compositor;
use crate::prelude::*;
use crate::registry::Registry;
use crate::registry::Resource;
use crate::registry::ResourceSource;
use crate::registry::Source;
use crate::signals::Signal;
use crate::wire::ClientId;
use crate::wire::WireEvent;
use crate::wire::WireHandle;

/// Compositor-owned selection source (X11 bridge, embedder clipboards).
pub trait CustomSource {
    /// Write the contents for `mime_type` to `fd` and close it.
    fn send(&mut self, mime_type: &str, fd: OwnedFd);

    fn cancel(&mut self) {}
}

pub enum SourceKind {
    /// Backed by a client's wl_data_source; operations become wire events.
    Client,
    Custom(Box<dyn CustomSource>),
}

pub struct DataSource {
    pub types: Vec<String>,
    pub kind: SourceKind,
}

impl DataSource {
    fn new(kind: SourceKind) -> Self {
        Self {
            types: Vec::new(),
            kind,
        }
    }
}

/// Payload of a wl_data_device bind.
#[derive(Debug)]
pub struct DataDevice;

/// A wl_data_offer presented to one client; points back at the source.
#[derive(Debug)]
pub struct DataOffer {
    pub source: Resource,
}

pub struct DataDeviceManager {
    pub sources: ResourceSource<DataSource>,
    pub devices: ResourceSource<DataDevice>,
    pub offers: ResourceSource<DataOffer>,
    /// The current selection; NONE when unset.
    pub source: Resource,
}

impl DataDeviceManager {
    pub fn new(registry: &Registry) -> Self {
        Self {
            sources: Source::new("data-source", &registry.resources),
            devices: Source::new("data-device", &registry.resources),
            offers: Source::new("data-offer", &registry.resources),
            source: Resource::NONE,
        }
    }
}

/// wl_data_device_manager.create_data_source.
pub fn create_data_source(comp: &mut Compositor, wire: WireHandle) -> Resource {
    let id = comp.seat.data.sources.create(DataSource::new(SourceKind::Client));
    comp.registry.bind_wire(id, "data-source", wire);
    id
}

/// wl_data_source.offer.
pub fn data_source_offer(comp: &mut Compositor, source: Resource, mime_type: String) {
    if let Some(s) = comp.seat.data.sources.get_mut(source) {
        s.types.push(mime_type);
    }
}

/// wl_data_device_manager.get_data_device.
pub fn get_data_device(comp: &mut Compositor, wire: WireHandle) -> Resource {
    let id = comp.seat.data.devices.create(DataDevice);
    comp.registry.bind_wire(id, "data-device", wire);
    id
}

fn source_accept(comp: &mut Compositor, source: Resource, mime_type: Option<String>) {
    let Some(s) = comp.seat.data.sources.get_mut(source) else {
        return;
    };
    match &mut s.kind {
        SourceKind::Client => {
            if let Some(wire) = comp.seat.data.sources.wire_of(source) {
                wire.send(WireEvent::DataSourceTarget { mime_type });
            }
        },
        SourceKind::Custom(_) => {},
    }
}

fn source_send(comp: &mut Compositor, source: Resource, mime_type: &str, fd: OwnedFd) {
    let Some(s) = comp.seat.data.sources.get_mut(source) else {
        return;
    };
    match &mut s.kind {
        SourceKind::Client => {
            if let Some(wire) = comp.seat.data.sources.wire_of(source) {
                wire.send(WireEvent::DataSourceSend {
                    mime_type: mime_type.to_string(),
                    fd,
                });
            }
        },
        SourceKind::Custom(custom) => custom.send(mime_type, fd),
    }
}

fn source_cancel(comp: &mut Compositor, source: Resource) {
    let Some(s) = comp.seat.data.sources.get_mut(source) else {
        return;
    };
    match &mut s.kind {
        SourceKind::Client => {
            if let Some(wire) = comp.seat.data.sources.wire_of(source) {
                wire.send(WireEvent::DataSourceCancelled);
            }
        },
        SourceKind::Custom(custom) => custom.cancel(),
    }
}

/// Replaces the current selection, cancelling the previous source, and
/// re-offers to the acting client. The selection signal lets the X11
/// bridge mirror ownership.
pub fn set_selection(comp: &mut Compositor, source: Resource, client: Option<ClientId>) {
    if comp.seat.data.source == source {
        return;
    }

    let old = comp.seat.data.source;
    if old != Resource::NONE {
        source_cancel(comp, old);
    }

    comp.seat.data.source = source;
    comp.signals.emit(Signal::SelectionChanged);

    if let Some(client) = client {
        offer_to_client(comp, client);
    }
}

/// Installs a compositor-owned source as the selection.
pub fn set_custom_selection(
    comp: &mut Compositor,
    types: Vec<String>,
    custom: Box<dyn CustomSource>,
) -> Resource {
    let mut source = DataSource::new(SourceKind::Custom(custom));
    source.types = types;
    let id = comp.seat.data.sources.create(source);
    set_selection(comp, id, None);
    id
}

/// Presents the current selection to `client`: a fresh wl_data_offer with
/// the advertised types, then a selection event naming it (or nothing).
pub fn offer_to_client(comp: &mut Compositor, client: ClientId) {
    let Some(device) = comp.seat.data.devices.id_for_client(client) else {
        return;
    };
    let Some(device_wire) = comp.seat.data.devices.wire_of(device) else {
        return;
    };

    let source = comp.seat.data.source;
    let types = comp
        .seat
        .data
        .sources
        .get(source)
        .map(|s| s.types.clone());

    let Some(types) = types else {
        device_wire.send(WireEvent::DataDeviceSelection { offer: None });
        return;
    };

    let Some(offer_object) = device_wire.channel.create_data_offer(device_wire.object) else {
        return;
    };
    let offer = comp.seat.data.offers.create(DataOffer { source });
    comp.registry.bind_wire(
        offer,
        "data-offer",
        WireHandle::new(offer_object, device_wire.channel.clone()),
    );

    device_wire.send(WireEvent::DataDeviceDataOffer {
        offer: offer_object,
    });
    if let Some(offer_wire) = comp.seat.data.offers.wire_of(offer) {
        for mime_type in types {
            offer_wire.send(WireEvent::DataOfferMimeType { mime_type });
        }
    }
    device_wire.send(WireEvent::DataDeviceSelection {
        offer: Some(offer_object),
    });
}

/// wl_data_device.set_selection.
pub fn device_set_selection(comp: &mut Compositor, client: ClientId, source: Resource) {
    set_selection(comp, source, Some(client));
}

/// wl_data_offer.accept.
pub fn offer_accept(comp: &mut Compositor, offer: Resource, mime_type: Option<String>) {
    let Some(source) = comp.seat.data.offers.get(offer).map(|o| o.source) else {
        return;
    };
    source_accept(comp, source, mime_type);
}

/// wl_data_offer.receive: pipe the write end to the source.
pub fn offer_receive(comp: &mut Compositor, offer: Resource, mime_type: String, fd: OwnedFd) {
    let Some(source) = comp.seat.data.offers.get(offer).map(|o| o.source) else {
        return;
    };
    let known = comp
        .seat
        .data
        .sources
        .get(source)
        .is_some_and(|s| s.types.iter().any(|t| t == &mime_type));
    if !known {
        debug!("receive for unadvertised type {mime_type:?}");
    }
    source_send(comp, source, &mime_type, fd);
}

/// Pipes the current selection's contents for `mime_type` into `fd`; the
/// X11 bridge answers SelectionRequest through this.
pub fn selection_send(comp: &mut Compositor, mime_type: &str, fd: OwnedFd) {
    let source = comp.seat.data.source;
    source_send(comp, source, mime_type, fd);
}

pub fn source_wire_destroyed(comp: &mut Compositor, source: Resource) {
    if comp.seat.data.source == source {
        comp.seat.data.source = Resource::NONE;
        comp.signals.emit(Signal::SelectionChanged);
    }
    comp.seat.data.sources.release(source);
}

pub fn device_wire_destroyed(comp: &mut Compositor, device: Resource) {
    comp.seat.data.devices.release(device);
}

pub fn offer_wire_destroyed(comp: &mut Compositor, offer: Resource) {
    comp.seat.data.offers.release(offer);
}
