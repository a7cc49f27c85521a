//! Root registration
//!
//! The collector moves objects, so any handle held outside the heap must be
//! known to the store that owns it. Each store keeps two registries:
//!
//! - single handles, registered by [`Root`]
//! - handle buffers, registered by [`External`] (builder slots, [`Handles`])
//!
//! Registration is RAII: the guard registers on construction and unregisters
//! on drop. The guards hold only a [`RegistryId`], so reading the handle always
//! goes through the store and always sees the relocated value.

use crate::datum::Slot;
use crate::handle::Handle;
use crate::store::Store;
use std::fmt;

// =============================================================================
// Registry
// =============================================================================

/// Stable id of a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryId {
    index: u32,
    generation: u32,
}

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational arena with O(1) register/unregister
///
/// Freed entries go on a free list and bump their generation, so an id that
/// outlives its entry is detected instead of silently aliasing a new one.
pub(crate) struct Registry<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }
}

impl<T> Registry<T> {
    pub fn register(&mut self, value: T) -> RegistryId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.value = Some(value);
            return RegistryId {
                index,
                generation: entry.generation,
            };
        }
        let index = u32::try_from(self.entries.len()).unwrap_or_else(|_| {
            panic!("root registry overflow");
        });
        self.entries.push(Entry {
            generation: 0,
            value: Some(value),
        });
        RegistryId {
            index,
            generation: 0,
        }
    }

    /// # Panics
    /// Panics if the id was already unregistered.
    pub fn unregister(&mut self, id: RegistryId) -> T {
        let entry = self.entry_mut(id);
        let value = entry.value.take();
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        match value {
            Some(value) => value,
            None => panic!("registry entry {:?} unregistered twice", id),
        }
    }

    pub fn get(&self, id: RegistryId) -> &T {
        match self.entries.get(id.index as usize) {
            Some(Entry {
                generation,
                value: Some(value),
            }) if *generation == id.generation => value,
            _ => panic!("stale registry id {:?}", id),
        }
    }

    pub fn get_mut(&mut self, id: RegistryId) -> &mut T {
        match self.entry_mut(id).value.as_mut() {
            Some(value) => value,
            None => panic!("stale registry id {:?}", id),
        }
    }

    fn entry_mut(&mut self, id: RegistryId) -> &mut Entry<T> {
        match self.entries.get_mut(id.index as usize) {
            Some(entry) if entry.generation == id.generation && entry.value.is_some() => entry,
            _ => panic!("stale registry id {:?}", id),
        }
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().filter_map(|e| e.value.as_ref())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut().filter_map(|e| e.value.as_mut())
    }
}

// =============================================================================
// Relocation of transient handles
// =============================================================================

/// Handles that are not registered but must survive one collection, such as
/// the inputs of the allocation that triggered it
pub(crate) trait Relocatable {
    fn visit(&mut self, f: &mut dyn FnMut(&mut Handle));
}

impl Relocatable for () {
    fn visit(&mut self, _: &mut dyn FnMut(&mut Handle)) {}
}

impl Relocatable for Handle {
    fn visit(&mut self, f: &mut dyn FnMut(&mut Handle)) {
        f(self)
    }
}

impl Relocatable for [Handle] {
    fn visit(&mut self, f: &mut dyn FnMut(&mut Handle)) {
        self.iter_mut().for_each(f)
    }
}

impl Relocatable for Vec<Handle> {
    fn visit(&mut self, f: &mut dyn FnMut(&mut Handle)) {
        self.as_mut_slice().visit(f)
    }
}

impl Relocatable for [Slot] {
    fn visit(&mut self, f: &mut dyn FnMut(&mut Handle)) {
        for slot in self {
            f(&mut slot.name);
            f(&mut slot.value);
        }
    }
}

impl<A: Relocatable + ?Sized, B: Relocatable + ?Sized> Relocatable for (&mut A, &mut B) {
    fn visit(&mut self, f: &mut dyn FnMut(&mut Handle)) {
        self.0.visit(f);
        self.1.visit(f);
    }
}

// =============================================================================
// Root
// =============================================================================

/// A handle kept valid across collections
pub struct Root<'s> {
    store: &'s Store,
    id: RegistryId,
}

impl<'s> Root<'s> {
    pub fn new(store: &'s Store, handle: Handle) -> Self {
        let id = store.register_root(handle);
        Self { store, id }
    }

    /// Current (possibly relocated) handle
    #[inline]
    pub fn handle(&self) -> Handle {
        self.store.root_handle(self.id)
    }

    pub fn set(&mut self, handle: Handle) {
        self.store.set_root(self.id, handle);
    }

    #[inline]
    pub fn store(&self) -> &'s Store {
        self.store
    }
}

impl Clone for Root<'_> {
    fn clone(&self) -> Self {
        Root::new(self.store, self.handle())
    }
}

impl Drop for Root<'_> {
    fn drop(&mut self) {
        self.store.unregister_root(self.id);
    }
}

impl fmt::Debug for Root<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Root({:?})", self.handle())
    }
}

// =============================================================================
// External
// =============================================================================

/// A buffer of handles owned by the store's external registry
///
/// The collector traces and rewrites the whole buffer. Access goes through
/// short borrows; no store operation may run inside `with`/`with_mut`.
pub(crate) struct External<'s> {
    store: &'s Store,
    id: RegistryId,
}

impl<'s> External<'s> {
    pub fn new(store: &'s Store) -> Self {
        Self::from_vec(store, Vec::new())
    }

    pub fn from_vec(store: &'s Store, handles: Vec<Handle>) -> Self {
        let id = store.register_external(handles);
        Self { store, id }
    }

    pub fn store(&self) -> &'s Store {
        self.store
    }

    pub fn with<R>(&self, f: impl FnOnce(&Vec<Handle>) -> R) -> R {
        self.store.with_external(self.id, f)
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Vec<Handle>) -> R) -> R {
        self.store.with_external_mut(self.id, f)
    }

    pub fn len(&self) -> usize {
        self.with(Vec::len)
    }

    pub fn push(&self, handle: Handle) {
        self.with_mut(|v| v.push(handle))
    }

    pub fn get(&self, index: usize) -> Handle {
        self.with(|v| v[index])
    }

    pub fn set(&self, index: usize, handle: Handle) {
        self.with_mut(|v| v[index] = handle)
    }

    pub fn to_vec(&self) -> Vec<Handle> {
        self.with(Vec::clone)
    }
}

impl Drop for External<'_> {
    fn drop(&mut self) {
        self.store.unregister_external(self.id);
    }
}

// =============================================================================
// Handles
// =============================================================================

/// A growable vector of handles that stays valid across collections
pub struct Handles<'s> {
    buffer: External<'s>,
}

impl<'s> Handles<'s> {
    pub fn new(store: &'s Store) -> Self {
        Self {
            buffer: External::new(store),
        }
    }

    pub fn store(&self) -> &'s Store {
        self.buffer.store()
    }

    pub fn push(&mut self, handle: Handle) {
        self.buffer.push(handle);
    }

    pub fn pop(&mut self) -> Option<Handle> {
        self.buffer.with_mut(Vec::pop)
    }

    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn get(&self, index: usize) -> Handle {
        self.buffer.get(index)
    }

    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, handle: Handle) {
        self.buffer.set(index, handle);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.buffer.with_mut(Vec::clear)
    }

    /// Snapshot of the current handles; the copy is not rooted
    pub fn to_vec(&self) -> Vec<Handle> {
        self.buffer.to_vec()
    }
}

impl fmt::Debug for Handles<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.to_vec()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_reuses_slots() {
        let mut registry = Registry::default();
        let a = registry.register(1);
        let b = registry.register(2);
        assert_eq!(registry.unregister(a), 1);
        let c = registry.register(3);
        assert_eq!(c.index, a.index);
        assert_ne!(c, a);
        assert_eq!(*registry.get(b), 2);
        assert_eq!(*registry.get(c), 3);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.iter().copied().collect::<Vec<_>>(), vec![3, 2]);
    }

    #[test]
    #[should_panic(expected = "stale registry id")]
    fn test_registry_double_unregister() {
        let mut registry = Registry::default();
        let a = registry.register(1);
        registry.unregister(a);
        registry.unregister(a);
    }

    #[test]
    #[should_panic(expected = "stale registry id")]
    fn test_registry_stale_get() {
        let mut registry = Registry::default();
        let a = registry.register(1);
        registry.unregister(a);
        registry.register(2);
        registry.get(a);
    }

    #[test]
    fn test_relocatable_pairs() {
        let mut existing = Handle::local(1);
        let mut slots = vec![Slot::new(Handle::local(2), Handle::int(3))];
        let mut seen = Vec::new();
        (&mut existing, slots.as_mut_slice()).visit(&mut |h| {
            seen.push(*h);
            *h = Handle::NIL;
        });
        assert_eq!(seen, vec![Handle::local(1), Handle::local(2), Handle::int(3)]);
        assert!(existing.is_nil());
        assert!(slots[0].name.is_nil());
    }

    #[test]
    fn test_root_lifecycle() {
        let store = Store::new();
        let before = store.root_count();
        {
            let mut root = Root::new(&store, Handle::int(5));
            let copy = root.clone();
            assert_eq!(store.root_count(), before + 2);
            root.set(Handle::int(6));
            assert_eq!(root.handle(), Handle::int(6));
            assert_eq!(copy.handle(), Handle::int(5));
        }
        assert_eq!(store.root_count(), before);
    }

    #[test]
    fn test_handles_vector() {
        let store = Store::new();
        let mut handles = Handles::new(&store);
        assert!(handles.is_empty());
        handles.push(Handle::int(1));
        handles.push(Handle::TRUE);
        handles.set(0, Handle::int(2));
        assert_eq!(handles.len(), 2);
        assert_eq!(handles.get(0), Handle::int(2));
        assert_eq!(handles.pop(), Some(Handle::TRUE));
        handles.clear();
        assert!(handles.is_empty());
    }
}
