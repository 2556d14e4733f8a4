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

//! Stable public identifiers over moving storage.
//!
//! Entities live in typed [`Source`] arenas named by a string tag. Every
//! entity also owns a record in one of two process-wide master pools:
//! `handles` for compositor-owned entities (outputs, views) and `resources`
//! for entities whose lifetime is tied to a protocol object (surfaces,
//! buffers, regions, ...). A public id is `generation << 32 | slot + 1`;
//! generations bump on release, so an id is never observed again for a
//! different entity until a slot's generation wraps 2^32.
//!
//! Lookups go public id -> master record -> tag check -> private slot in the
//! source arena. A mismatching tag yields None and a warning, never a
//! wrong-type value.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::prelude::*;
use crate::utils::channel;
use crate::wire::ClientId;
use crate::wire::ObjectId;
use crate::wire::WireHandle;

/// Identifier of a compositor-owned entity. Zero is "none".
#[derive(Default, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Handle(pub u64);

/// Identifier of an entity tied to a protocol object. Zero is "none".
#[derive(Default, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Resource(pub u64);

pub trait Id: Copy + Eq + fmt::Debug + Default {
    fn from_raw(raw: u64) -> Self;
    fn raw(self) -> u64;
    fn is_none(self) -> bool {
        self.raw() == 0
    }
}

impl Id for Handle {
    fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
    fn raw(self) -> u64 {
        self.0
    }
}

impl Id for Resource {
    fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
    fn raw(self) -> u64 {
        self.0
    }
}

impl Handle {
    pub const NONE: Handle = Handle(0);
}

impl Resource {
    pub const NONE: Resource = Resource(0);
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource({})", self.0)
    }
}

fn compose(slot: u32, generation: u32) -> u64 {
    ((generation as u64) << 32) | (slot as u64 + 1)
}

fn decompose(raw: u64) -> Option<(u32, u32)> {
    let slot = (raw & 0xffff_ffff) as u32;
    if slot == 0 {
        return None;
    }
    Some((slot - 1, (raw >> 32) as u32))
}

struct MasterRecord {
    tag: &'static str,
    generation: u32,
    /// 1-based slot in the owning source arena; 0 marks a free record.
    private: u32,
    user_data: Option<Rc<dyn Any>>,
    wire: Option<WireHandle>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PoolKind {
    Handles,
    Resources,
}

pub struct MasterPool {
    kind: PoolKind,
    records: Vec<MasterRecord>,
    free: Vec<u32>,
    /// Protocol object -> public id, resources pool only.
    wire_map: HashMap<(ClientId, ObjectId), u64>,
}

impl MasterPool {
    fn new(kind: PoolKind) -> Self {
        Self {
            kind,
            records: Vec::new(),
            free: Vec::new(),
            wire_map: HashMap::new(),
        }
    }

    fn allocate(&mut self, tag: &'static str, private: u32) -> u64 {
        let slot = match self.free.pop() {
            Some(slot) => {
                let record = &mut self.records[slot as usize];
                record.tag = tag;
                record.private = private;
                slot
            },
            None => {
                self.records.push(MasterRecord {
                    tag,
                    generation: 0,
                    private,
                    user_data: None,
                    wire: None,
                });
                (self.records.len() - 1) as u32
            },
        };
        let public = compose(slot, self.records[slot as usize].generation);
        trace!(
            target: channel::HANDLE,
            "new {:?} ({tag}) {public}",
            self.kind
        );
        public
    }

    fn record(&self, raw: u64, tag: &'static str) -> Option<&MasterRecord> {
        let (slot, generation) = decompose(raw)?;
        let record = self.records.get(slot as usize)?;
        if record.private == 0 || record.generation != generation {
            return None;
        }
        if record.tag != tag {
            warn!(
                target: channel::HANDLE,
                "lookup of {raw} with tag {tag:?}, but entity is {:?}", record.tag
            );
            return None;
        }
        Some(record)
    }

    fn record_mut(&mut self, raw: u64, tag: &'static str) -> Option<&mut MasterRecord> {
        self.record(raw, tag)?;
        let (slot, _) = decompose(raw)?;
        self.records.get_mut(slot as usize)
    }

    fn release(&mut self, raw: u64) -> Option<(Option<WireHandle>, Option<Rc<dyn Any>>)> {
        let (slot, generation) = decompose(raw)?;
        let record = self.records.get_mut(slot as usize)?;
        if record.private == 0 || record.generation != generation {
            return None;
        }
        record.private = 0;
        record.generation = record.generation.wrapping_add(1);
        let wire = record.wire.take();
        let user_data = record.user_data.take();
        if let Some(wire) = &wire {
            self.wire_map.remove(&(wire.client(), wire.object));
        }
        self.free.push(slot);
        trace!(target: channel::HANDLE, "released {:?} {raw}", self.kind);
        Some((wire, user_data))
    }
}

pub type SharedPool = Rc<RefCell<MasterPool>>;

/// The two process-wide pools plus the protocol back-reference table.
pub struct Registry {
    pub handles: SharedPool,
    pub resources: SharedPool,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            handles: Rc::new(RefCell::new(MasterPool::new(PoolKind::Handles))),
            resources: Rc::new(RefCell::new(MasterPool::new(PoolKind::Resources))),
        }
    }

    pub fn set_user_data(&self, handle: Handle, tag: &'static str, data: Rc<dyn Any>) {
        if let Some(record) = self.handles.borrow_mut().record_mut(handle.raw(), tag) {
            record.user_data = Some(data);
        }
    }

    pub fn user_data(&self, handle: Handle, tag: &'static str) -> Option<Rc<dyn Any>> {
        self.handles
            .borrow()
            .record(handle.raw(), tag)?
            .user_data
            .clone()
    }

    /// Binds a protocol object to a resource. The protocol layer must
    /// arrange for `wire_object_destroyed` to run when the object dies.
    pub fn bind_wire(&self, resource: Resource, tag: &'static str, wire: WireHandle) {
        let mut pool = self.resources.borrow_mut();
        let key = (wire.client(), wire.object);
        if let Some(record) = pool.record_mut(resource.raw(), tag) {
            record.wire = Some(wire);
            pool.wire_map.insert(key, resource.raw());
        }
    }

    pub fn wire(&self, resource: Resource, tag: &'static str) -> Option<WireHandle> {
        self.resources
            .borrow()
            .record(resource.raw(), tag)?
            .wire
            .clone()
    }

    /// Breaks the resource ↔ protocol-object link without destroying
    /// either side. Buffers use this: their wl_buffer must outlive the
    /// compositor resource and be finished with a queued release event.
    pub fn invalidate(&self, resource: Resource) -> Option<WireHandle> {
        let mut pool = self.resources.borrow_mut();
        let (slot, generation) = decompose(resource.raw())?;
        let record = pool.records.get_mut(slot as usize)?;
        if record.private == 0 || record.generation != generation {
            return None;
        }
        let wire = record.wire.take()?;
        pool.wire_map.remove(&(wire.client(), wire.object));
        Some(wire)
    }

    pub fn resource_for_wire(&self, client: ClientId, object: ObjectId) -> Resource {
        self.resources
            .borrow()
            .wire_map
            .get(&(client, object))
            .map(|raw| Resource(*raw))
            .unwrap_or(Resource::NONE)
    }

    /// The destroy-listener edge: called by the protocol layer when an
    /// object dies. Unlinks and reports the resource and its tag so the
    /// owner can release the typed entry without destroying the (already
    /// dead) protocol object again.
    pub fn wire_object_destroyed(
        &self,
        client: ClientId,
        object: ObjectId,
    ) -> Option<(Resource, &'static str)> {
        let mut pool = self.resources.borrow_mut();
        let raw = pool.wire_map.remove(&(client, object))?;
        let (slot, _) = decompose(raw)?;
        let record = pool.records.get_mut(slot as usize)?;
        record.wire = None;
        Some((Resource(raw), record.tag))
    }

    /// Every live resource id whose protocol object belongs to `client`,
    /// in slot order. Used for client-disconnect teardown.
    pub fn resources_of_client(&self, client: ClientId) -> Vec<(Resource, &'static str)> {
        let pool = self.resources.borrow();
        pool.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.private != 0)
            .filter_map(|(slot, r)| {
                let wire = r.wire.as_ref()?;
                (wire.client() == client)
                    .then(|| (Resource(compose(slot as u32, r.generation)), r.tag))
            })
            .collect()
    }
}

struct SlotEntry<T> {
    public: u64,
    value: T,
}

/// What a release hands back to the caller: the value for teardown plus the
/// wire link, which the caller must destroy exactly once (unless it was
/// invalidated earlier).
pub struct Released<T, I: Id> {
    pub id: I,
    pub value: T,
    pub wire: Option<WireHandle>,
}

/// A typed arena sharing one of the registry's master pools.
pub struct Source<T, I: Id> {
    name: &'static str,
    master: SharedPool,
    slots: Vec<Option<SlotEntry<T>>>,
    free: Vec<u32>,
    _marker: std::marker::PhantomData<I>,
}

pub type HandleSource<T> = Source<T, Handle>;
pub type ResourceSource<T> = Source<T, Resource>;

impl<T, I: Id> Source<T, I> {
    pub fn new(name: &'static str, master: &SharedPool) -> Self {
        Self {
            name,
            master: master.clone(),
            slots: Vec::new(),
            free: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn create(&mut self, value: T) -> I {
        let private = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                (self.slots.len() - 1) as u32
            },
        };
        let public = self
            .master
            .borrow_mut()
            .allocate(self.name, private + 1);
        self.slots[private as usize] = Some(SlotEntry { public, value });
        I::from_raw(public)
    }

    fn private_of(&self, id: I) -> Option<u32> {
        let private = self.master.borrow().record(id.raw(), self.name)?.private;
        debug_assert!(private != 0);
        Some(private - 1)
    }

    pub fn get(&self, id: I) -> Option<&T> {
        let private = self.private_of(id)?;
        let entry = self.slots.get(private as usize)?.as_ref()?;
        (entry.public == id.raw()).then_some(&entry.value)
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        let private = self.private_of(id)?;
        let entry = self.slots.get_mut(private as usize)?.as_mut()?;
        (entry.public == id.raw()).then_some(&mut entry.value)
    }

    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    pub fn release(&mut self, id: I) -> Option<Released<T, I>> {
        let private = self.private_of(id)?;
        let entry = self.slots.get_mut(private as usize)?.take()?;
        self.free.push(private);
        let (wire, _user_data) = self
            .master
            .borrow_mut()
            .release(id.raw())
            .unwrap_or((None, None));
        Some(Released {
            id,
            value: entry.value,
            wire,
        })
    }

    /// Releases every entry, invalidating all public ids atomically (no
    /// lookup can succeed once this returns).
    pub fn release_all(&mut self) -> Vec<Released<T, I>> {
        let ids: Vec<I> = self.ids();
        ids.into_iter()
            .filter_map(|id| self.release(id))
            .collect()
    }

    pub fn ids(&self) -> Vec<I> {
        self.slots
            .iter()
            .flatten()
            .map(|entry| I::from_raw(entry.public))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.slots
            .iter()
            .flatten()
            .map(|entry| (I::from_raw(entry.public), &entry.value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (I, &mut T)> {
        self.slots
            .iter_mut()
            .flatten()
            .map(|entry| (I::from_raw(entry.public), &mut entry.value))
    }

    /// First entry whose wire object belongs to `client`; the per-client
    /// seat resources (wl_keyboard etc.) are found this way.
    pub fn id_for_client(&self, client: ClientId) -> Option<I> {
        self.slots.iter().flatten().find_map(|entry| {
            let wire = self
                .master
                .borrow()
                .record(entry.public, self.name)?
                .wire
                .clone()?;
            (wire.client() == client).then_some(I::from_raw(entry.public))
        })
    }

    /// The wire link of one entry, without going through [`Registry`].
    pub fn wire_of(&self, id: I) -> Option<WireHandle> {
        self.master
            .borrow()
            .record(id.raw(), self.name)?
            .wire
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;
    use crate::wire::testing::RecordingChannel;

    #[test]
    fn lookup_returns_value_for_matching_tag() {
        let registry = Registry::new();
        let mut views: HandleSource<String> = Source::new("view", &registry.handles);
        let id = views.create("a view".to_string());
        assert_eq!(views.get(id).map(String::as_str), Some("a view"));
    }

    #[test]
    fn lookup_with_wrong_tag_returns_none() {
        let registry = Registry::new();
        let mut views: HandleSource<u32> = Source::new("view", &registry.handles);
        let outputs: HandleSource<u32> = Source::new("output", &registry.handles);
        let id = views.create(7);
        assert!(outputs.get(id).is_none());
        assert_eq!(views.get(id), Some(&7));
    }

    #[test]
    fn released_ids_never_come_back() {
        let registry = Registry::new();
        let mut views: HandleSource<u32> = Source::new("view", &registry.handles);
        let mut seen = HashSet::new();
        for round in 0..100u32 {
            let id = views.create(round);
            assert!(seen.insert(id), "id {id:?} was reused");
            views.release(id).unwrap();
        }
    }

    #[test]
    fn stale_id_is_dead_after_slot_reuse() {
        let registry = Registry::new();
        let mut views: HandleSource<u32> = Source::new("view", &registry.handles);
        let old = views.create(1);
        views.release(old).unwrap();
        let new = views.create(2);
        assert!(views.get(old).is_none());
        assert_eq!(views.get(new), Some(&2));
    }

    #[test]
    fn release_all_invalidates_every_id() {
        let registry = Registry::new();
        let mut surfaces: ResourceSource<u32> = Source::new("surface", &registry.resources);
        let ids: Vec<_> = (0..10).map(|i| surfaces.create(i)).collect();
        let released = surfaces.release_all();
        assert_eq!(released.len(), 10);
        for id in ids {
            assert!(surfaces.get(id).is_none());
        }
        assert!(surfaces.is_empty());
    }

    #[test]
    fn wire_binding_round_trip() {
        let registry = Registry::new();
        let mut buffers: ResourceSource<u32> = Source::new("buffer", &registry.resources);
        let channel = RecordingChannel::new(ClientId(1));
        let id = buffers.create(0);
        registry.bind_wire(id, "buffer", channel.handle(33));

        assert_eq!(registry.resource_for_wire(ClientId(1), 33), id);
        assert_eq!(
            registry.wire_object_destroyed(ClientId(1), 33),
            Some((id, "buffer"))
        );
        // The link is gone; release must not see a wire to destroy.
        let released = buffers.release(id).unwrap();
        assert!(released.wire.is_none());
        assert!(channel.recording.borrow().destroyed.is_empty());
    }

    #[test]
    fn invalidate_breaks_destroy_link() {
        let registry = Registry::new();
        let mut buffers: ResourceSource<u32> = Source::new("buffer", &registry.resources);
        let channel = RecordingChannel::new(ClientId(1));
        let id = buffers.create(0);
        registry.bind_wire(id, "buffer", channel.handle(5));

        let wire = registry.invalidate(id).unwrap();
        assert_eq!(wire.object, 5);
        assert_eq!(
            registry.resource_for_wire(ClientId(1), 5),
            Resource::NONE
        );
        let released = buffers.release(id).unwrap();
        assert!(released.wire.is_none());
    }

    proptest! {
        /// Growing a source while entities exist never changes what a live
        /// id resolves to, and released ids never resolve at all.
        #[test]
        fn growth_and_release_keep_lookups_stable(ops in prop::collection::vec(0u8..3, 1..200)) {
            let registry = Registry::new();
            let mut source: HandleSource<u64> = Source::new("view", &registry.handles);
            let mut live: HashMap<Handle, u64> = HashMap::new();
            let mut dead: Vec<Handle> = Vec::new();
            let mut counter = 0u64;

            for op in ops {
                match op {
                    // create
                    0 | 1 => {
                        counter += 1;
                        let id = source.create(counter);
                        live.insert(id, counter);
                    },
                    // release the oldest live entry
                    _ => {
                        if let Some(&id) = live.keys().min_by_key(|h| h.raw()) {
                            live.remove(&id);
                            source.release(id).unwrap();
                            dead.push(id);
                        }
                    },
                }

                for (id, expected) in &live {
                    prop_assert_eq!(source.get(*id), Some(expected));
                }
                for id in &dead {
                    prop_assert!(source.get(*id).is_none());
                }
            }
        }
    }
}
