//! Stores and commons
//!
//! A [`Store`] owns one heap and is the only way to allocate, look up and
//! mutate objects. Stores come in two flavours:
//!
//! - a **global** store (`Store::new`) starts with the predefined `id`, `isa`
//!   and `is` frames and hands out global-tagged handles. Once populated it is
//!   frozen into a [`Commons`], an immutable heap shared through `Arc`.
//! - a **local** store (`Store::local`) hands out local-tagged handles and
//!   resolves symbol misses against its commons.
//!
//! A commons proxy (a name the commons references but never defines) keeps
//! its global handle in every local store. Defining the name in a local store
//! stores the frame locally and records it in the store's overlay, so the
//! proxy handle denotes the local definition from then on, in that store only.
//!
//! A store is single-threaded (`!Sync`); all interior state sits in
//! `RefCell`/`Cell`. Borrows are short and never held across a collection.
//!
//! # Collection
//!
//! Allocation checks the heap's pressure before allocating. When it is over
//! the threshold and the collector is not pinned, the store collects, with
//! the registered roots, externals and the inputs of the pending allocation
//! as the root set. Everything outside the heap that holds a handle of this
//! store must be reachable from one of those, or it is stale afterwards.

use crate::config::StoreOptions;
use crate::datum::{Datum, FrameDatum, SLOT_SIZE, Slot, Type};
use crate::error::StoreError;
use crate::handle::{Handle, Space};
use crate::heap::{GcReport, Heap, HeapStats};
use crate::memory_stats;
use crate::printer;
use crate::roots::{Registry, RegistryId, Relocatable};
use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Starts at 1 so that 0 can mean "never bound"
static NEXT_STORE_ID: AtomicU64 = AtomicU64::new(1);

fn next_store_id() -> u64 {
    NEXT_STORE_ID.fetch_add(1, Ordering::Relaxed)
}

// =============================================================================
// Commons
// =============================================================================

/// A frozen global store, shared read-only by local stores
pub struct Commons {
    id: u64,
    /// Collection epoch of the store at freeze time
    epoch: u64,
    heap: Heap,
}

impl Commons {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Value of a symbol, nil if the name is unknown
    pub fn lookup_existing(&self, name: &str) -> Handle {
        self.heap
            .find_symbol(name)
            .and_then(|symbol| self.heap.symbol(symbol))
            .map(|sym| sym.value)
            .unwrap_or(Handle::NIL)
    }

    /// Symbol object for a name, nil if unknown
    pub fn find_symbol(&self, name: &str) -> Handle {
        self.heap.find_symbol(name).unwrap_or(Handle::NIL)
    }

    pub fn deref(&self, handle: Handle) -> Option<&Datum> {
        self.heap.get(handle)
    }

    pub fn symbol_name(&self, symbol: Handle) -> Option<String> {
        self.heap.symbol_name(symbol)
    }

    pub fn stats(&self) -> HeapStats {
        self.heap.stats()
    }

    pub fn debug_string(&self, handle: Handle) -> String {
        printer::render(&|h| self.deref(h).cloned(), handle)
    }

    pub(crate) fn is_proxy(&self, handle: Handle) -> bool {
        self.heap.is_proxy(handle)
    }
}

impl fmt::Debug for Commons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Commons")
            .field("id", &self.id)
            .field("objects", &self.heap.stats().objects)
            .finish()
    }
}

// =============================================================================
// DatumRef
// =============================================================================

/// Borrowed datum of a store or of its commons
///
/// Holds a borrow of the store's heap for local objects: drop it before the
/// next allocation.
pub enum DatumRef<'a> {
    Store(Ref<'a, Datum>),
    Commons(&'a Datum),
}

impl std::ops::Deref for DatumRef<'_> {
    type Target = Datum;

    fn deref(&self) -> &Datum {
        match self {
            DatumRef::Store(datum) => datum,
            DatumRef::Commons(datum) => datum,
        }
    }
}

// =============================================================================
// GcGuard
// =============================================================================

/// Collector pin; collection resumes when the last guard drops
pub struct GcGuard<'s> {
    store: &'s Store,
}

impl Drop for GcGuard<'_> {
    fn drop(&mut self) {
        let depth = self.store.gc_pin.get();
        debug_assert!(depth > 0, "gc pin underflow");
        self.store.gc_pin.set(depth.saturating_sub(1));
    }
}

// =============================================================================
// Store
// =============================================================================

pub struct Store {
    id: u64,
    heap: RefCell<Heap>,
    roots: RefCell<Registry<Handle>>,
    externals: RefCell<Registry<Vec<Handle>>>,
    gc_pin: Cell<u32>,
    /// Bumped by every collection; cached handles compare against it
    epoch: Cell<u64>,
    globals: Option<Arc<Commons>>,
    /// Commons proxy -> local frame defining it
    overlay: RefCell<HashMap<Handle, Handle>>,
    /// Memory registry slot of the creating thread
    memory_slot: Option<usize>,
}

impl Store {
    /// New global store with the process-wide options
    pub fn new() -> Self {
        Self::with_options(StoreOptions::global())
    }

    /// New global store
    pub fn with_options(options: &StoreOptions) -> Self {
        Self::create(Space::Global, None, options)
    }

    /// New local store on top of a commons
    pub fn local(globals: &Arc<Commons>) -> Self {
        Self::local_with_options(globals, StoreOptions::global())
    }

    pub fn local_with_options(globals: &Arc<Commons>, options: &StoreOptions) -> Self {
        Self::create(Space::Local, Some(Arc::clone(globals)), options)
    }

    fn create(space: Space, globals: Option<Arc<Commons>>, options: &StoreOptions) -> Self {
        let heap = Heap::new(space, options);
        let memory_slot = memory_stats::get_or_register_slot();
        memory_stats::record_alloc(memory_slot, heap.bytes());
        let store = Self {
            id: next_store_id(),
            heap: RefCell::new(heap),
            roots: RefCell::new(Registry::default()),
            externals: RefCell::new(Registry::default()),
            gc_pin: Cell::new(0),
            epoch: Cell::new(0),
            globals,
            overlay: RefCell::new(HashMap::new()),
            memory_slot,
        };
        tracing::debug!(
            store = store.id,
            ?space,
            commons = store.globals.as_ref().map(|c| c.id),
            "created store"
        );
        store
    }

    /// Process-unique store id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.epoch.get()
    }

    /// Memory registry slot this store reports to, None if the registry
    /// was full when it was created
    pub fn memory_slot(&self) -> Option<usize> {
        self.memory_slot
    }

    /// True for a store without a commons
    pub fn is_global(&self) -> bool {
        self.globals.is_none()
    }

    /// The commons this store resolves misses against
    pub fn globals(&self) -> Option<&Arc<Commons>> {
        self.globals.as_ref()
    }

    fn space(&self) -> Space {
        if self.is_global() {
            Space::Global
        } else {
            Space::Local
        }
    }

    /// True if the handle references this store's own heap
    pub fn owns(&self, handle: Handle) -> bool {
        handle.index_in(self.space()).is_some()
    }

    /// True if the handle references the commons of a local store
    pub fn is_commons_handle(&self, handle: Handle) -> bool {
        !self.is_global() && handle.is_global_ref()
    }

    pub fn stats(&self) -> HeapStats {
        self.heap.borrow().stats()
    }

    /// Freeze a global store into a shareable commons
    pub fn freeze(self) -> Result<Arc<Commons>, StoreError> {
        if !self.is_global() {
            return Err(StoreError::NotGlobal);
        }
        let heap = self
            .heap
            .replace(Heap::new(Space::Local, &StoreOptions::default()));
        memory_stats::record_free(self.memory_slot, heap.bytes());
        tracing::debug!(
            store = self.id,
            objects = heap.stats().objects,
            bytes = heap.bytes(),
            "froze store into commons"
        );
        Ok(Arc::new(Commons {
            id: self.id,
            epoch: self.epoch.get(),
            heap,
        }))
    }

    /// Run `f` on the heap and report the byte delta to the memory registry
    fn with_heap<R>(&self, f: impl FnOnce(&mut Heap) -> R) -> R {
        let mut heap = self.heap.borrow_mut();
        let before = heap.bytes();
        let result = f(&mut heap);
        let after = heap.bytes();
        if after > before {
            memory_stats::record_alloc(self.memory_slot, after - before);
        } else if before > after {
            memory_stats::record_free(self.memory_slot, before - after);
        }
        result
    }

    // -------------------------------------------------------------------------
    // Symbols
    // -------------------------------------------------------------------------

    /// Frame denoted by a name
    ///
    /// Local symbols win over commons symbols. A name that is not known
    /// anywhere becomes a new local symbol with a proxy frame, which is
    /// replaced in place when the frame is defined. A commons proxy is
    /// returned as is; defining the name locally resolves it for this store.
    pub fn lookup(&self, name: &str) -> Handle {
        let local = self.heap.borrow().find_symbol(name);
        if let Some(symbol) = local {
            return self.with_heap(|heap| heap.symbol_value_or_proxy(symbol));
        }
        if let Some(globals) = &self.globals {
            let value = globals.lookup_existing(name);
            if !value.is_nil() {
                return value;
            }
        }
        self.maybe_collect(&mut ());
        self.with_heap(|heap| {
            let symbol = heap.create_symbol(name);
            heap.symbol_value_or_proxy(symbol)
        })
    }

    /// Like [`lookup`](Self::lookup), but returns nil instead of allocating
    pub fn lookup_existing(&self, name: &str) -> Handle {
        let local = {
            let heap = self.heap.borrow();
            heap.find_symbol(name)
                .and_then(|symbol| heap.symbol(symbol))
                .map(|sym| sym.value)
        };
        match (local, &self.globals) {
            (Some(value), _) => value,
            (None, Some(globals)) => globals.lookup_existing(name),
            (None, None) => Handle::NIL,
        }
    }

    /// Symbol object for a name, created in this store if unknown
    pub fn symbol(&self, name: &str) -> Handle {
        if let Some(symbol) = self.heap.borrow().find_symbol(name) {
            return symbol;
        }
        if let Some(globals) = &self.globals {
            let symbol = globals.find_symbol(name);
            if !symbol.is_nil() {
                return symbol;
            }
        }
        self.maybe_collect(&mut ());
        self.with_heap(|heap| heap.create_symbol(name))
    }

    /// New symbol with a generated number instead of a name
    pub fn anonymous_symbol(&self) -> Handle {
        self.maybe_collect(&mut ());
        self.with_heap(Heap::create_anonymous_symbol)
    }

    /// Name of a symbol (`#N` for anonymous ones), None for non-symbols
    pub fn symbol_name(&self, symbol: Handle) -> Option<String> {
        if self.is_commons_handle(symbol) {
            return self.globals.as_ref()?.symbol_name(symbol);
        }
        self.heap.borrow().symbol_name(symbol)
    }

    /// Local stand-in for an `id` symbol that lives in the commons
    ///
    /// Frames of a local store bind local symbols only; a commons symbol is
    /// shadowed by a local one with the same name. Anonymous commons symbols
    /// and non-symbols are returned unchanged.
    fn shadow_symbol(&self, heap: &mut Heap, value: Handle) -> Handle {
        if !self.is_commons_handle(value) {
            return value;
        }
        let Some(name) = self.globals.as_ref().and_then(|g| {
            g.deref(value)
                .and_then(Datum::as_symbol)
                .filter(|sym| !sym.is_numeric())
                .and_then(|_| g.symbol_name(value))
        }) else {
            return value;
        };
        let local = match heap.find_symbol(&name) {
            Some(symbol) => symbol,
            None => heap.create_symbol(&name),
        };
        tracing::trace!(store = self.id, %name, "shadowed commons symbol");
        local
    }

    /// The proxy a commons symbol stands for, if the commons never defined it
    fn commons_proxy(&self, symbol: Handle) -> Option<Handle> {
        if !self.is_commons_handle(symbol) {
            return None;
        }
        let globals = self.globals.as_ref()?;
        let sym = globals.deref(symbol)?.as_symbol()?;
        (!sym.bound && globals.is_proxy(sym.value)).then_some(sym.value)
    }

    /// True for a commons proxy, defined locally or not
    fn is_commons_proxy(&self, handle: Handle) -> bool {
        self.is_commons_handle(handle)
            && (self.overlay.borrow().contains_key(&handle)
                || self.globals.as_ref().is_some_and(|g| g.is_proxy(handle)))
    }

    /// Where the content of a handle lives in this store: the local
    /// definition of a commons proxy, otherwise the handle itself
    fn storage(&self, handle: Handle) -> Handle {
        if !self.is_commons_handle(handle) {
            return handle;
        }
        self.overlay
            .borrow()
            .get(&handle)
            .copied()
            .unwrap_or(handle)
    }

    /// Panic if binding `symbol` to `frame` would strand a commons proxy
    fn check_commons_forward(&self, symbol: Handle, frame: Handle) {
        if let Some(proxy) = self.commons_proxy(symbol)
            && proxy != frame
            && !self.overlay.borrow().contains_key(&proxy)
        {
            panic!(
                "cannot bind {} to {:?}: it is forward-referenced by proxy {:?}",
                self.symbol_name(symbol).unwrap_or_default(),
                frame,
                proxy
            );
        }
    }

    // -------------------------------------------------------------------------
    // Allocation
    // -------------------------------------------------------------------------

    pub fn allocate_string(&self, text: &str) -> Handle {
        self.maybe_collect(&mut ());
        self.with_heap(|heap| heap.alloc(Datum::String(text.to_string())))
    }

    /// New array of `len` nils
    pub fn allocate_array(&self, len: usize) -> Handle {
        self.maybe_collect(&mut ());
        self.with_heap(|heap| heap.alloc(Datum::Array(vec![Handle::NIL; len])))
    }

    pub fn allocate_array_from(&self, elements: &[Handle]) -> Handle {
        let mut elements = elements.to_vec();
        self.maybe_collect(&mut elements);
        self.with_heap(|heap| heap.alloc(Datum::Array(elements)))
    }

    /// Allocate a frame, or overwrite one in place
    ///
    /// The target is, in order:
    /// 1. `existing`, when it is a frame of this store
    /// 2. the frame an `id` slot's symbol already denotes (a proxy or an
    ///    earlier definition)
    /// 3. a new frame
    ///
    /// Every `id` symbol of the frame ends up bound to the result, and `id`
    /// symbols the overwritten frame no longer carries are unbound.
    ///
    /// In a local store a commons proxy is a valid target, either as
    /// `existing` or through an `id` symbol the commons never defined: the
    /// frame is stored locally and the proxy handle is returned. Any other
    /// `existing` handle of the commons is read-only; a new local frame is
    /// allocated instead.
    ///
    /// # Panics
    /// Panics if `existing` is an object of this store but not a frame, or if
    /// an `id` symbol is forward-referenced by a proxy of another frame.
    pub fn allocate_frame(&self, slots: &[Slot], existing: Handle) -> Handle {
        let mut slots = slots.to_vec();
        let mut existing = existing;
        self.maybe_collect(&mut (&mut existing, slots.as_mut_slice()));

        self.with_heap(|heap| {
            let mut forwarded = Vec::new();
            for slot in slots.iter_mut().filter(|slot| slot.name.is_id()) {
                forwarded.extend(self.commons_proxy(slot.value));
                slot.value = self.shadow_symbol(heap, slot.value);
            }
            let ids: Vec<Handle> = slots
                .iter()
                .filter(|slot| slot.name.is_id() && heap.symbol(slot.value).is_some())
                .map(|slot| slot.value)
                .collect();

            let target = if existing.is_nil() {
                ids.iter()
                    .filter_map(|&id| heap.symbol(id))
                    .map(|sym| sym.value)
                    .chain(forwarded)
                    .find(|&value| {
                        heap.get(value).is_some_and(Datum::is_frame)
                            || self.is_commons_proxy(value)
                    })
            } else if heap.owns(existing) {
                match heap.get(existing) {
                    Some(datum) if datum.is_frame() => Some(existing),
                    _ => panic!("allocate_frame: {:?} is not a frame", existing),
                }
            } else if self.is_commons_proxy(existing) {
                Some(existing)
            } else {
                tracing::trace!(store = self.id, ?existing, "existing frame is read-only");
                None
            };

            let datum = Datum::Frame(FrameDatum::new(slots));
            let frame = match target {
                Some(frame) if !heap.owns(frame) && self.storage(frame) == frame => {
                    let local = heap.alloc(datum);
                    self.overlay.borrow_mut().insert(frame, local);
                    tracing::trace!(store = self.id, proxy = ?frame, ?local, "defined commons proxy");
                    frame
                }
                Some(frame) => {
                    let local = self.storage(frame);
                    let was_proxy = heap.is_proxy(local);
                    let old_ids: Vec<Handle> = heap
                        .get(local)
                        .and_then(Datum::as_frame)
                        .map(|f| f.ids().collect())
                        .unwrap_or_default();
                    heap.replace(local, datum);
                    for old in old_ids.into_iter().filter(|old| !ids.contains(old)) {
                        heap.unbind(old, frame);
                    }
                    if was_proxy {
                        tracing::trace!(store = self.id, ?frame, "resolved proxy");
                    }
                    frame
                }
                None => heap.alloc(datum),
            };
            for id in ids {
                heap.bind(id, frame);
            }
            frame
        })
    }

    // -------------------------------------------------------------------------
    // Frame mutation
    // -------------------------------------------------------------------------

    fn frame_mut<'h>(&self, heap: &'h mut Heap, frame: Handle) -> &'h mut FrameDatum {
        if self.is_commons_handle(frame) {
            panic!("cannot modify commons frame {:?}", frame);
        }
        match heap.get_mut(frame).and_then(Datum::as_frame_mut) {
            Some(datum) => datum,
            None => panic!("{:?} is not a frame of this store", frame),
        }
    }

    /// Append a slot to a frame
    ///
    /// An `id` slot binds its symbol to the frame.
    ///
    /// # Panics
    /// Panics if `frame` is not a frame of this store, or if an `id` symbol
    /// is forward-referenced by a proxy of another frame.
    pub fn add(&self, frame: Handle, name: Handle, value: Handle) {
        self.with_heap(|heap| {
            let storage = self.storage(frame);
            // Panics on commons frames and non-frames before anything changes
            self.frame_mut(heap, storage);
            let value = if name.is_id() {
                self.check_commons_forward(value, frame);
                let value = self.shadow_symbol(heap, value);
                heap.bind(value, frame);
                value
            } else {
                value
            };
            self.frame_mut(heap, storage)
                .slots
                .push(Slot::new(name, value));
            heap.charge(SLOT_SIZE);
        })
    }

    /// Replace the value of the first slot with this name, or append
    ///
    /// Replacing an `id` unbinds the old symbol unless the frame still
    /// carries it in another `id` slot.
    ///
    /// # Panics
    /// Panics if `frame` is not a frame of this store, or if an `id` symbol
    /// is forward-referenced by a proxy of another frame.
    pub fn set(&self, frame: Handle, name: Handle, value: Handle) {
        self.with_heap(|heap| {
            let storage = self.storage(frame);
            // Panics on commons frames and non-frames before anything changes
            self.frame_mut(heap, storage);
            let value = if name.is_id() {
                self.check_commons_forward(value, frame);
                let value = self.shadow_symbol(heap, value);
                heap.bind(value, frame);
                value
            } else {
                value
            };
            let datum = self.frame_mut(heap, storage);
            let replaced = match datum.slots.iter_mut().find(|slot| slot.name == name) {
                Some(slot) => Some(std::mem::replace(&mut slot.value, value)),
                None => {
                    datum.slots.push(Slot::new(name, value));
                    None
                }
            };
            match replaced {
                None => heap.charge(SLOT_SIZE),
                Some(old) if name.is_id() && old != value => {
                    let still_carried = self.frame_mut(heap, storage).ids().any(|id| id == old);
                    if !still_carried {
                        heap.unbind(old, frame);
                    }
                }
                Some(_) => {}
            }
        })
    }

    /// Store an element of an array
    ///
    /// # Panics
    /// Panics if `array` is not an array of this store or `index` is out of
    /// bounds.
    pub fn set_element(&self, array: Handle, index: usize, value: Handle) {
        if self.is_commons_handle(array) {
            panic!("cannot modify commons array {:?}", array);
        }
        let mut heap = self.heap.borrow_mut();
        match heap.get_mut(array).and_then(Datum::as_array_mut) {
            Some(elements) => elements[index] = value,
            None => panic!("{:?} is not an array of this store", array),
        }
    }

    // -------------------------------------------------------------------------
    // Access
    // -------------------------------------------------------------------------

    /// Datum referenced by a handle, None for scalars and dangling handles
    pub fn deref(&self, handle: Handle) -> Option<DatumRef<'_>> {
        let handle = self.storage(handle);
        if self.owns(handle) {
            Ref::filter_map(self.heap.borrow(), |heap| heap.get(handle))
                .ok()
                .map(DatumRef::Store)
        } else if self.is_commons_handle(handle) {
            self.globals
                .as_ref()?
                .deref(handle)
                .map(DatumRef::Commons)
        } else {
            None
        }
    }

    pub fn type_of(&self, handle: Handle) -> Type {
        Type::of_scalar(handle)
            .or_else(|| self.deref(handle).map(|datum| datum.type_of()))
            .unwrap_or(Type::Nil)
    }

    /// The handle if it has the given type, nil otherwise
    pub fn cast(&self, handle: Handle, ty: Type) -> Handle {
        if self.type_of(handle) == ty {
            handle
        } else {
            Handle::NIL
        }
    }

    /// Copy of a frame's slots, empty for non-frames
    pub fn frame_slots(&self, frame: Handle) -> Vec<Slot> {
        self.deref(frame)
            .and_then(|datum| datum.as_frame().map(|f| f.slots.clone()))
            .unwrap_or_default()
    }

    pub fn debug_string(&self, handle: Handle) -> String {
        printer::render(&|h| self.deref(h).map(|datum| datum.clone()), handle)
    }

    // -------------------------------------------------------------------------
    // Collection
    // -------------------------------------------------------------------------

    /// Pin the collector until the guard drops; pins nest
    pub fn lock_gc(&self) -> GcGuard<'_> {
        self.gc_pin.set(self.gc_pin.get() + 1);
        GcGuard { store: self }
    }

    pub fn gc_locked(&self) -> bool {
        self.gc_pin.get() > 0
    }

    /// Collect now
    pub fn collect(&self) -> Result<GcReport, StoreError> {
        let depth = self.gc_pin.get();
        if depth > 0 {
            return Err(StoreError::GcLocked { depth });
        }
        Ok(self.collect_with(&mut ()))
    }

    /// Collect if allocation pressure calls for it, rewriting `extra` too
    fn maybe_collect(&self, extra: &mut dyn Relocatable) {
        let needed = self.heap.borrow().needs_collection();
        if !needed {
            return;
        }
        if self.gc_locked() {
            tracing::trace!(
                store = self.id,
                depth = self.gc_pin.get(),
                "collection deferred while pinned"
            );
            return;
        }
        self.collect_with(extra);
    }

    fn collect_with(&self, extra: &mut dyn Relocatable) -> GcReport {
        let start = Instant::now();
        let mut heap = self.heap.borrow_mut();
        let mut roots = self.roots.borrow_mut();
        let mut externals = self.externals.borrow_mut();
        let mut overlay = self.overlay.borrow_mut();

        let mut marker = heap.marker();
        for &handle in roots.iter() {
            marker.mark(handle);
        }
        for buffer in externals.iter() {
            for &handle in buffer {
                marker.mark(handle);
            }
        }
        for &local in overlay.values() {
            marker.mark(local);
        }
        extra.visit(&mut |handle| marker.mark(*handle));

        let (forwarding, report) = heap.compact(marker);

        for handle in roots.iter_mut() {
            *handle = forwarding.forward(*handle);
        }
        for buffer in externals.iter_mut() {
            for handle in buffer.iter_mut() {
                *handle = forwarding.forward(*handle);
            }
        }
        for local in overlay.values_mut() {
            *local = forwarding.forward(*local);
        }
        extra.visit(&mut |handle| *handle = forwarding.forward(*handle));

        self.epoch.set(self.epoch.get() + 1);
        memory_stats::record_collection(self.memory_slot, report.freed_bytes);
        tracing::debug!(
            store = self.id,
            live_objects = report.live_objects,
            freed_objects = report.freed_objects,
            live_bytes = report.live_bytes,
            freed_bytes = report.freed_bytes,
            roots = roots.len(),
            externals = externals.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "collected"
        );
        report
    }

    // -------------------------------------------------------------------------
    // Root registries
    // -------------------------------------------------------------------------

    pub(crate) fn register_root(&self, handle: Handle) -> RegistryId {
        self.roots.borrow_mut().register(handle)
    }

    pub(crate) fn root_handle(&self, id: RegistryId) -> Handle {
        *self.roots.borrow().get(id)
    }

    pub(crate) fn set_root(&self, id: RegistryId, handle: Handle) {
        *self.roots.borrow_mut().get_mut(id) = handle;
    }

    pub(crate) fn unregister_root(&self, id: RegistryId) {
        self.roots.borrow_mut().unregister(id);
    }

    pub(crate) fn register_external(&self, handles: Vec<Handle>) -> RegistryId {
        self.externals.borrow_mut().register(handles)
    }

    pub(crate) fn with_external<R>(&self, id: RegistryId, f: impl FnOnce(&Vec<Handle>) -> R) -> R {
        f(self.externals.borrow().get(id))
    }

    pub(crate) fn with_external_mut<R>(
        &self,
        id: RegistryId,
        f: impl FnOnce(&mut Vec<Handle>) -> R,
    ) -> R {
        f(self.externals.borrow_mut().get_mut(id))
    }

    pub(crate) fn unregister_external(&self, id: RegistryId) {
        self.externals.borrow_mut().unregister(id);
    }

    /// Number of live roots
    pub fn root_count(&self) -> usize {
        self.roots.borrow().len()
    }

    /// Number of live external buffers
    pub fn external_count(&self) -> usize {
        self.externals.borrow().len()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        memory_stats::record_free(self.memory_slot, self.heap.get_mut().bytes());
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.id)
            .field("global", &self.is_global())
            .field("objects", &self.heap.borrow().stats().objects)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roots::Root;

    fn small() -> StoreOptions {
        StoreOptions::default()
            .with_gc_threshold(256)
            .with_gc_min_threshold(256)
    }

    #[test]
    fn test_store_is_send_not_sync() {
        fn assert_send<T: Send>() {}
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send::<Store>();
        assert_send_sync::<Commons>();
        assert_send_sync::<Arc<Commons>>();
    }

    #[test]
    fn test_builtins_resolve() {
        let store = Store::new();
        assert_eq!(store.lookup("id"), Handle::ID);
        assert_eq!(store.lookup("isa"), Handle::ISA);
        assert_eq!(store.lookup("is"), Handle::IS);
        assert_eq!(store.type_of(Handle::ID), Type::Frame);
    }

    #[test]
    fn test_lookup_is_stable() {
        let store = Store::new();
        let a = store.lookup("a");
        assert_eq!(store.lookup("a"), a);
        assert_eq!(store.lookup_existing("a"), a);
        assert!(store.lookup_existing("never").is_nil());
    }

    #[test]
    fn test_lookup_existing_does_not_allocate() {
        let store = Store::new();
        let before = store.stats().objects;
        store.lookup_existing("nothing");
        assert_eq!(store.stats().objects, before);
    }

    #[test]
    fn test_lookup_creates_proxy() {
        let store = Store::new();
        let proxy = store.lookup("later");
        let datum = store.deref(proxy).unwrap();
        let frame = datum.as_frame().unwrap();
        assert!(frame.proxy);
        assert_eq!(frame.slots.len(), 1);
        assert!(frame.slots[0].name.is_id());
    }

    #[test]
    fn test_symbol_and_anonymous() {
        let store = Store::new();
        let s = store.symbol("s");
        assert_eq!(store.symbol("s"), s);
        assert_eq!(store.symbol_name(s).as_deref(), Some("s"));
        let anon = store.anonymous_symbol();
        assert!(store.symbol_name(anon).unwrap().starts_with('#'));
    }

    #[test]
    fn test_cast_mismatch_is_nil() {
        let store = Store::new();
        let s = store.allocate_string("text");
        assert_eq!(store.cast(s, Type::String), s);
        assert!(store.cast(s, Type::Frame).is_nil());
        assert_eq!(store.cast(Handle::int(3), Type::Int), Handle::int(3));
        assert!(store.cast(Handle::int(3), Type::Float).is_nil());
    }

    #[test]
    fn test_deref_scalar_is_none() {
        let store = Store::new();
        assert!(store.deref(Handle::int(1)).is_none());
        assert!(store.deref(Handle::NIL).is_none());
        assert!(store.deref(Handle::global(1 << 30)).is_none());
    }

    #[test]
    fn test_allocate_frame_binds_id() {
        let store = Store::new();
        let symbol = store.symbol("thing");
        let a = store.lookup("a");
        let frame = store.allocate_frame(
            &[Slot::new(Handle::ID, symbol), Slot::new(a, Handle::int(1))],
            Handle::NIL,
        );
        assert_eq!(store.lookup("thing"), frame);
        let datum = store.deref(symbol).unwrap();
        assert!(datum.as_symbol().unwrap().bound);
    }

    #[test]
    fn test_allocate_frame_resolves_proxy_in_place() {
        let store = Store::new();
        let proxy = store.lookup("fwd");
        let symbol = store.symbol("fwd");
        let frame = store.allocate_frame(
            &[Slot::new(Handle::ID, symbol), Slot::new(Handle::ISA, Handle::ID)],
            Handle::NIL,
        );
        assert_eq!(frame, proxy);
        assert!(!store.deref(frame).unwrap().as_frame().unwrap().proxy);
        assert_eq!(store.frame_slots(frame).len(), 2);
    }

    #[test]
    fn test_allocate_frame_replaces_existing() {
        let store = Store::new();
        let a = store.lookup("a");
        let frame = store.allocate_frame(&[Slot::new(a, Handle::int(1))], Handle::NIL);
        let same = store.allocate_frame(&[Slot::new(a, Handle::int(2))], frame);
        assert_eq!(same, frame);
        assert_eq!(store.frame_slots(frame), vec![Slot::new(a, Handle::int(2))]);
    }

    #[test]
    #[should_panic(expected = "is not a frame")]
    fn test_allocate_frame_existing_non_frame() {
        let store = Store::new();
        let s = store.allocate_string("x");
        store.allocate_frame(&[], s);
    }

    #[test]
    fn test_add_and_set() {
        let store = Store::new();
        let a = store.lookup("a");
        let b = store.lookup("b");
        let frame = store.allocate_frame(&[], Handle::NIL);
        store.add(frame, a, Handle::int(1));
        store.add(frame, a, Handle::int(2));
        store.set(frame, a, Handle::int(3));
        store.set(frame, b, Handle::int(4));
        assert_eq!(
            store.frame_slots(frame),
            vec![
                Slot::new(a, Handle::int(3)),
                Slot::new(a, Handle::int(2)),
                Slot::new(b, Handle::int(4)),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "forward-referenced by proxy")]
    fn test_add_id_of_forward_referenced_symbol_panics() {
        let store = Store::new();
        let proxy = store.lookup("later");
        let frame = store.allocate_frame(&[], Handle::NIL);
        assert_ne!(frame, proxy);
        store.add(frame, Handle::ID, store.symbol("later"));
    }

    #[test]
    fn test_set_id_rebinds() {
        let store = Store::new();
        let x = store.lookup("x");
        let frame = store.allocate_frame(
            &[Slot::new(Handle::ID, store.symbol("a")), Slot::new(x, Handle::int(1))],
            Handle::NIL,
        );
        store.set(frame, Handle::ID, store.symbol("b"));

        assert!(store.lookup_existing("a").is_nil());
        assert_eq!(store.lookup("b"), frame);
        let fresh = crate::Builder::new(&store).add_id("a").create();
        assert_ne!(fresh.handle(), frame);
        assert_eq!(
            store.frame_slots(frame),
            vec![Slot::new(Handle::ID, store.symbol("b")), Slot::new(x, Handle::int(1))]
        );
    }

    #[test]
    fn test_set_id_keeps_symbol_still_carried() {
        let store = Store::new();
        let a = store.symbol("a");
        let frame = store.allocate_frame(
            &[Slot::new(Handle::ID, a), Slot::new(Handle::ID, a)],
            Handle::NIL,
        );
        store.set(frame, Handle::ID, store.symbol("b"));
        assert_eq!(store.lookup_existing("a"), frame);
        assert_eq!(store.lookup_existing("b"), frame);
    }

    #[test]
    fn test_allocate_frame_replacement_unbinds_dropped_ids() {
        let store = Store::new();
        let frame = store.allocate_frame(&[Slot::new(Handle::ID, store.symbol("old"))], Handle::NIL);
        let same = store.allocate_frame(&[Slot::new(Handle::ID, store.symbol("new"))], frame);
        assert_eq!(same, frame);
        assert!(store.lookup_existing("old").is_nil());
        assert_eq!(store.lookup_existing("new"), frame);
    }

    #[test]
    fn test_gc_lock_blocks_collect() {
        let store = Store::new();
        {
            let _outer = store.lock_gc();
            let _inner = store.lock_gc();
            assert_eq!(store.collect(), Err(StoreError::GcLocked { depth: 2 }));
        }
        assert!(!store.gc_locked());
        assert!(store.collect().is_ok());
    }

    #[test]
    fn test_pressure_triggers_collection() {
        let store = Store::with_options(&small());
        for i in 0..100 {
            store.allocate_string(&format!("garbage {}", i));
        }
        assert!(store.stats().collections > 0);
        assert!(store.stats().objects < 100);
    }

    #[test]
    fn test_pinned_store_grows() {
        let store = Store::with_options(&small());
        let _pin = store.lock_gc();
        for i in 0..100 {
            store.allocate_string(&format!("kept {}", i));
        }
        assert_eq!(store.stats().collections, 0);
    }

    #[test]
    fn test_allocation_inputs_survive_collection() {
        let store = Store::with_options(&small());
        let name = Root::new(&store, store.lookup("name"));
        let mut last = Handle::NIL;
        for i in 0..200 {
            let s = store.allocate_string(&format!("value {}", i));
            last = store.allocate_frame(&[Slot::new(name.handle(), s)], Handle::NIL);
        }
        assert!(store.stats().collections > 0);
        let slots = store.frame_slots(last);
        let value = store.deref(slots[0].value).unwrap();
        assert_eq!(value.as_string(), Some("value 199"));
    }

    #[test]
    fn test_freeze() {
        let store = Store::new();
        let symbol = store.symbol("a");
        let a = store.allocate_frame(&[Slot::new(Handle::ID, symbol)], Handle::NIL);
        let forward = store.lookup("forward");
        let id = store.id();
        let commons = store.freeze().unwrap();
        assert_eq!(commons.id(), id);
        assert_eq!(commons.lookup_existing("a"), a);
        assert_eq!(commons.lookup_existing("forward"), forward);

        let local = Store::local(&commons);
        assert!(!local.is_global());
        assert!(matches!(local.freeze(), Err(StoreError::NotGlobal)));
    }

    #[test]
    fn test_local_shadows_commons_id() {
        let global = Store::new();
        let symbol = global.symbol("shared");
        let commons = global.freeze().unwrap();

        let local = Store::local(&commons);
        let frame = local.allocate_frame(&[Slot::new(Handle::ID, symbol)], Handle::NIL);
        assert!(frame.is_local_ref());
        assert_eq!(local.lookup("shared"), frame);
        let id = local.frame_slots(frame)[0].value;
        assert!(id.is_local_ref());
    }

    #[test]
    fn test_local_cannot_overwrite_commons() {
        let global = Store::new();
        let frame = global.allocate_frame(&[Slot::new(Handle::ISA, Handle::ID)], Handle::NIL);
        let commons = global.freeze().unwrap();

        let local = Store::local(&commons);
        let copy = local.allocate_frame(&[Slot::new(Handle::ISA, Handle::IS)], frame);
        assert_ne!(copy, frame);
        assert!(copy.is_local_ref());
        assert_eq!(commons.deref(frame).unwrap().as_frame().unwrap().slots[0].value, Handle::ID);
    }

    #[test]
    #[should_panic(expected = "cannot modify commons frame")]
    fn test_mutating_commons_panics() {
        let global = Store::new();
        let commons = global.freeze().unwrap();
        let local = Store::local(&commons);
        local.add(Handle::ID, Handle::ISA, Handle::IS);
    }

    #[test]
    fn test_array_elements() {
        let store = Store::new();
        let array = store.allocate_array(3);
        store.set_element(array, 1, Handle::int(7));
        let datum = store.deref(array).unwrap();
        assert_eq!(
            datum.as_array(),
            Some(&[Handle::NIL, Handle::int(7), Handle::NIL][..])
        );
    }

    #[test]
    fn test_debug_string() {
        let store = Store::new();
        let s = store.allocate_string("hi");
        assert_eq!(store.debug_string(s), "\"hi\"");
        assert_eq!(store.debug_string(Handle::int(4)), "4");
    }
}
