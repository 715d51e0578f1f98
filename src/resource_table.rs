// src/resource_table.rs
//! Ref-counted handle table shared by shaders, assets and instances.
//!
//! - Handles: plain `u32` slot indices, `Handle::NULL` on failure
//! - Deduplication: xxh3 digest of the load key -> slot, confirmed by key equality
//! - Free slots are recycled lowest index first
//! - A slot whose resource failed to reload keeps its ref count but is invalid

use std::collections::HashMap;
use std::fmt;

use xxhash_rust::xxh3::Xxh3;

use crate::error::{Error, ResourceKind, Result};

// ---------- Handle type ----------

/// Opaque resource handle as seen by the engine.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
#[repr(transparent)]
pub struct Handle(u32);

impl Handle {
    pub const NULL: Handle = Handle(u32::MAX);

    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Handle(raw)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.0 == u32::MAX
    }

    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl Default for Handle {
    fn default() -> Self {
        Handle::NULL
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// ---------- Keys ----------

/// Identity of a loadable resource. Two loads share a slot only if their keys are equal.
pub trait SlotKey: Clone + PartialEq {
    /// Stable digest used by the dedupe index. Equal keys must digest equally.
    fn digest(&self) -> u64;
}

impl SlotKey for Handle {
    fn digest(&self) -> u64 {
        let mut hasher = Xxh3::new();
        hasher.update(&self.0.to_le_bytes());
        hasher.digest()
    }
}

// ---------- Slots ----------

struct ResourceSlot<K, R> {
    ref_count: u32,
    resource: Option<R>,
    key: Option<K>,
}

impl<K, R> ResourceSlot<K, R> {
    fn empty() -> Self {
        Self {
            ref_count: 0,
            resource: None,
            key: None,
        }
    }

    fn is_free(&self) -> bool {
        self.ref_count == 0 && self.resource.is_none()
    }

    fn is_valid(&self) -> bool {
        self.ref_count > 0 && self.resource.is_some()
    }
}

// ---------- ResourceTable ----------

pub struct ResourceTable<K, R> {
    kind: ResourceKind,
    slots: Vec<ResourceSlot<K, R>>,
    // dedupe: key digest -> slot indices
    index: HashMap<u64, Vec<u32>>,
}

impl<K: SlotKey, R> ResourceTable<K, R> {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Handle of a resident, valid slot loaded with `key`.
    pub fn find(&self, key: &K) -> Option<Handle> {
        let candidates = self.index.get(&key.digest())?;
        candidates.iter().copied().find(|&i| {
            let slot = &self.slots[i as usize];
            slot.is_valid() && slot.key.as_ref() == Some(key)
        })
        .map(Handle)
    }

    /// Load-or-share. An equal resident key bumps the ref count and returns the same
    /// handle; otherwise `create` runs for a fresh slot. `None` from `create` yields
    /// `Handle::NULL` and leaves no slot behind.
    pub fn load<F>(&mut self, key: K, create: F) -> Handle
    where
        F: FnOnce(&K) -> Option<R>,
    {
        if let Some(handle) = self.find(&key) {
            self.slots[handle.index()].ref_count += 1;
            return handle;
        }
        self.insert_with(key, create, true)
    }

    /// Like [`load`](Self::load) but never shares: every call is a distinct resource.
    pub fn insert<F>(&mut self, key: K, create: F) -> Handle
    where
        F: FnOnce(&K) -> Option<R>,
    {
        self.insert_with(key, create, false)
    }

    fn insert_with<F>(&mut self, key: K, create: F, indexed: bool) -> Handle
    where
        F: FnOnce(&K) -> Option<R>,
    {
        // find free slot
        let (idx, appended) = match self.slots.iter().position(ResourceSlot::is_free) {
            Some(i) => (i, false),
            None => {
                self.slots.push(ResourceSlot::empty());
                (self.slots.len() - 1, true)
            }
        };

        let Some(resource) = create(&key) else {
            if appended {
                self.slots.pop();
            }
            return Handle::NULL;
        };

        if indexed {
            self.index.entry(key.digest()).or_default().push(idx as u32);
        }
        let slot = &mut self.slots[idx];
        slot.ref_count = 1;
        slot.resource = Some(resource);
        slot.key = Some(key);
        Handle(idx as u32)
    }

    /// Drop one reference. Returns `true` when this call destroyed the resource.
    /// Out-of-range handles and slots already at zero are ignored.
    pub fn release<D>(&mut self, handle: Handle, destroy: D) -> bool
    where
        D: FnOnce(R),
    {
        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return false;
        };
        if slot.ref_count == 0 {
            return false;
        }
        slot.ref_count -= 1;
        if slot.ref_count > 0 {
            return false;
        }

        if let Some(resource) = slot.resource.take() {
            destroy(resource);
        }
        if let Some(key) = slot.key.take() {
            self.unindex(&key, handle);
        }
        true
    }

    /// Destroy and recreate the resource in place. Handle and ref count survive;
    /// a failed `create` leaves the slot invalid. Returns whether a resource exists afterwards.
    pub fn reload<D, F>(&mut self, handle: Handle, destroy: D, create: F) -> bool
    where
        D: FnOnce(R),
        F: FnOnce(&K) -> Option<R>,
    {
        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return false;
        };
        if slot.ref_count == 0 {
            return false;
        }
        if let Some(old) = slot.resource.take() {
            destroy(old);
        }
        let recreated = slot.key.as_ref().and_then(create);
        slot.resource = recreated;
        slot.resource.is_some()
    }

    pub fn get(&self, handle: Handle) -> Option<&R> {
        self.slots
            .get(handle.index())
            .filter(|s| s.ref_count > 0)
            .and_then(|s| s.resource.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut R> {
        self.slots
            .get_mut(handle.index())
            .filter(|s| s.ref_count > 0)
            .and_then(|s| s.resource.as_mut())
    }

    /// Like [`get`](Self::get) but reports which table rejected the handle.
    pub fn try_get(&self, handle: Handle) -> Result<&R> {
        self.get(handle).ok_or(Error::InvalidHandle {
            kind: self.kind,
            handle,
        })
    }

    pub fn key(&self, handle: Handle) -> Option<&K> {
        self.slots
            .get(handle.index())
            .filter(|s| s.ref_count > 0)
            .and_then(|s| s.key.as_ref())
    }

    pub fn is_valid(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    pub fn ref_count(&self, handle: Handle) -> u32 {
        self.slots.get(handle.index()).map_or(0, |s| s.ref_count)
    }

    /// Slots currently holding a resource.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_valid()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &R)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.ref_count > 0)
            .filter_map(|(i, s)| s.resource.as_ref().map(|r| (Handle(i as u32), r)))
    }

    /// Teardown: destroy every resident resource regardless of ref count.
    pub fn drain<D>(&mut self, mut destroy: D)
    where
        D: FnMut(Handle, R),
    {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if let Some(resource) = slot.resource.take() {
                destroy(Handle(i as u32), resource);
            }
        }
        self.slots.clear();
        self.index.clear();
    }

    /// Move the whole table out, leaving an empty one of the same kind.
    pub fn take(&mut self) -> Self {
        std::mem::replace(self, Self::new(self.kind))
    }

    fn unindex(&mut self, key: &K, handle: Handle) {
        let digest = key.digest();
        if let Some(bucket) = self.index.get_mut(&digest) {
            bucket.retain(|&i| i != handle.0);
            if bucket.is_empty() {
                self.index.remove(&digest);
            }
        }
    }
}
