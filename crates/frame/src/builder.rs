//! Transactional frame construction
//!
//! A [`Builder`] collects slots and commits them in one allocation, either as
//! a new frame ([`create`](Builder::create)) or by overwriting the frame it was
//! started from ([`update`](Builder::update)). Nothing in the store changes
//! before the commit; dropping a builder discards its slots.
//!
//! Pending slots live in an external buffer of the store, flattened as
//! `[name0, value0, name1, value1, ...]`, so they survive collections that
//! happen while arguments are being resolved. Each edit reserves its slot
//! first and fills it in as the name and value are resolved.

use crate::datum::Slot;
use crate::handle::Handle;
use crate::object::Frame;
use crate::roots::{External, Root};
use crate::storable::{Storable, Symbolic};
use crate::store::Store;

pub struct Builder<'s> {
    store: &'s Store,
    target: Root<'s>,
    slots: External<'s>,
}

impl<'s> Builder<'s> {
    /// Empty builder for a new frame
    pub fn new(store: &'s Store) -> Self {
        Self {
            store,
            target: Root::new(store, Handle::NIL),
            slots: External::new(store),
        }
    }

    /// Builder seeded with the slots of a frame, committing back to it
    pub fn from_frame(frame: &Frame<'s>) -> Self {
        Self::from_handle(frame.store(), frame.handle())
    }

    pub fn from_handle(store: &'s Store, handle: Handle) -> Self {
        let mut builder = Self::new(store);
        builder.target.set(handle);
        builder.add_from(handle);
        builder
    }

    /// Builder for the frame a name denotes (a proxy if undefined)
    pub fn from_id(store: &'s Store, id: &str) -> Self {
        let handle = store.lookup(id);
        Self::from_handle(store, handle)
    }

    pub fn store(&self) -> &'s Store {
        self.store
    }

    /// Handle `update` writes to
    pub fn handle(&self) -> Handle {
        self.target.handle()
    }

    /// True if committing makes a new frame or resolves a proxy
    pub fn is_new(&self) -> bool {
        let target = self.target.handle();
        target.is_nil()
            || self
                .store
                .deref(target)
                .and_then(|datum| datum.as_frame().map(|frame| frame.proxy))
                .unwrap_or(false)
    }

    /// Reserve a slot; returns its position in the buffer
    fn reserve(&mut self) -> usize {
        self.slots.with_mut(|buffer| {
            let index = buffer.len();
            buffer.push(Handle::NIL);
            buffer.push(Handle::NIL);
            index
        })
    }

    fn push(&mut self, name: impl Symbolic, value: impl Storable) {
        let index = self.reserve();
        let name = name.resolve(self.store);
        self.slots.set(index, name);
        let value = value.to_handle(self.store);
        self.slots.set(index + 1, value);
    }

    /// Append a slot
    pub fn add(&mut self, name: impl Symbolic, value: impl Storable) -> &mut Self {
        self.push(name, value);
        self
    }

    /// Append a slot without a name
    pub fn add_value(&mut self, value: impl Storable) -> &mut Self {
        self.push(Handle::NIL, value);
        self
    }

    /// Append a slot whose value is the frame a name denotes
    pub fn add_link(&mut self, name: impl Symbolic, target: &str) -> &mut Self {
        let index = self.reserve();
        let name = name.resolve(self.store);
        self.slots.set(index, name);
        let target = self.store.lookup(target);
        self.slots.set(index + 1, target);
        self
    }

    /// Append an `id` slot with a named symbol
    pub fn add_id(&mut self, id: &str) -> &mut Self {
        let index = self.reserve();
        self.slots.set(index, Handle::ID);
        let symbol = self.store.symbol(id);
        self.slots.set(index + 1, symbol);
        self
    }

    /// Append an `id` slot with a fresh anonymous symbol
    pub fn add_anonymous_id(&mut self) -> Handle {
        let index = self.reserve();
        self.slots.set(index, Handle::ID);
        let symbol = self.store.anonymous_symbol();
        self.slots.set(index + 1, symbol);
        symbol
    }

    pub fn add_is_a(&mut self, ty: impl Symbolic) -> &mut Self {
        self.push(Handle::ISA, ty.resolve(self.store));
        self
    }

    pub fn add_is(&mut self, ty: impl Symbolic) -> &mut Self {
        self.push(Handle::IS, ty.resolve(self.store));
        self
    }

    /// Append every slot of a frame; no-op for non-frames
    pub fn add_from(&mut self, frame: Handle) -> &mut Self {
        let slots = self.store.frame_slots(frame);
        self.slots.with_mut(|buffer| {
            buffer.reserve(slots.len() * 2);
            for slot in slots {
                buffer.push(slot.name);
                buffer.push(slot.value);
            }
        });
        self
    }

    /// Replace the value of the first slot with this name, or append
    pub fn set(&mut self, name: impl Symbolic, value: impl Storable) -> &mut Self {
        let name = name.resolve(self.store);
        let position = self.find(name);
        match position {
            Some(index) => {
                let value = value.to_handle(self.store);
                self.slots.set(index + 1, value);
            }
            None => self.push(name, value),
        }
        self
    }

    pub fn set_link(&mut self, name: impl Symbolic, target: &str) -> &mut Self {
        let store = self.store;
        let target = store.lookup(target);
        let _pin = store.lock_gc();
        self.set(name, target)
    }

    /// Buffer position of the first slot named `name`
    fn find(&self, name: Handle) -> Option<usize> {
        self.slots.with(|buffer| {
            buffer
                .chunks_exact(2)
                .position(|pair| pair[0] == name)
                .map(|i| i * 2)
        })
    }

    /// Remove every slot with this name
    pub fn delete(&mut self, name: impl Symbolic) -> &mut Self {
        let name = name.resolve(self.store);
        self.slots.with_mut(|buffer| {
            let mut kept = 0;
            for i in (0..buffer.len()).step_by(2) {
                if buffer[i] != name {
                    buffer.swap(kept, i);
                    buffer.swap(kept + 1, i + 1);
                    kept += 2;
                }
            }
            buffer.truncate(kept);
        });
        self
    }

    /// Drop all pending slots
    pub fn clear(&mut self) -> &mut Self {
        self.slots.with_mut(Vec::clear);
        self
    }

    /// Number of pending slots
    pub fn len(&self) -> usize {
        self.slots.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the pending slots
    pub fn slots(&self) -> Vec<Slot> {
        self.slots.with(|buffer| {
            buffer
                .chunks_exact(2)
                .map(|pair| Slot::new(pair[0], pair[1]))
                .collect()
        })
    }

    /// Allocate a new frame from the pending slots
    ///
    /// If an `id` slot names a symbol that already denotes a frame of this
    /// store, that frame is overwritten instead.
    pub fn create(&self) -> Frame<'s> {
        let handle = self.store.allocate_frame(&self.slots(), Handle::NIL);
        Frame::new(self.store, handle)
    }

    /// Overwrite the frame the builder was started from
    ///
    /// Without a target this is the same as [`create`](Self::create).
    pub fn update(&self) -> Frame<'s> {
        let handle = self
            .store
            .allocate_frame(&self.slots(), self.target.handle());
        Frame::new(self.store, handle)
    }
}
