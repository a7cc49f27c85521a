//! Object table and mark-compact collector
//!
//! A heap is a table of [`Datum`]s addressed by index, plus the symbol table
//! mapping names to symbol objects. Reference handles carry the index, so
//! moving an object means rewriting every handle that names it.
//!
//! # Collection
//!
//! Stop-the-world mark-compact with sliding compaction:
//!
//! 1. **Mark**: the caller feeds its roots to a [`Marker`]; the heap adds the
//!    symbol table and traces everything reachable.
//! 2. **Compact**: live objects slide down in allocation order, which keeps
//!    the predefined `id`/`isa`/`is` frames at indices 0..3.
//! 3. **Patch**: a [`Forwarding`] table maps old indices to new ones. The heap
//!    rewrites its own objects and symbol table; the caller rewrites the
//!    handles it holds outside the heap.
//!
//! Handles into other heaps (global references inside a local heap) are
//! never touched.

use crate::config::StoreOptions;
use crate::datum::{Datum, FrameDatum, Slot, SymbolDatum};
use crate::handle::{Handle, Space};
use std::collections::HashMap;

/// Names of the predefined frames, in handle order
const BUILTIN_NAMES: [&str; 3] = ["id", "isa", "is"];

/// Forwarding entry for objects that did not survive
const DEAD: usize = usize::MAX;

/// Cumulative heap statistics
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Objects currently in the table (live or not yet collected)
    pub objects: usize,
    /// Bytes currently held by the table
    pub bytes: usize,
    /// Live bytes after the last collection
    pub live_bytes: usize,
    pub total_allocated: usize,
    pub total_freed: usize,
    pub collections: usize,
    pub symbols: usize,
}

/// Outcome of one collection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GcReport {
    pub live_objects: usize,
    pub freed_objects: usize,
    pub live_bytes: usize,
    pub freed_bytes: usize,
}

pub(crate) struct Heap {
    space: Space,
    objects: Vec<Datum>,
    symbols: HashMap<String, Handle>,
    next_anonymous: i64,
    /// Bytes allocated since the last collection
    pressure: usize,
    threshold: usize,
    options: StoreOptions,
    stats: HeapStats,
}

impl Heap {
    /// Create an empty heap; global heaps start with the predefined frames
    pub fn new(space: Space, options: &StoreOptions) -> Self {
        let mut heap = Self {
            space,
            objects: Vec::new(),
            symbols: HashMap::new(),
            next_anonymous: 1,
            pressure: 0,
            threshold: options.gc_threshold,
            options: options.clone(),
            stats: HeapStats::default(),
        };
        if space == Space::Global {
            heap.init_builtins();
        }
        heap
    }

    /// Lay out `id`, `isa` and `is` so their frames sit at indices 0, 1, 2
    fn init_builtins(&mut self) {
        let n = BUILTIN_NAMES.len();
        for i in 0..n {
            let symbol = self.handle(n + i);
            self.alloc(Datum::Frame(FrameDatum::new(vec![Slot::new(
                Handle::ID,
                symbol,
            )])));
        }
        for i in 0..n {
            self.alloc(Datum::Symbol(SymbolDatum {
                name: self.handle(2 * n + i),
                value: self.handle(i),
                bound: true,
            }));
        }
        for (i, name) in BUILTIN_NAMES.iter().enumerate() {
            self.alloc(Datum::String(name.to_string()));
            self.symbols.insert(name.to_string(), self.handle(n + i));
        }
        debug_assert_eq!(self.handle(0), Handle::ID);
        debug_assert_eq!(self.handle(1), Handle::ISA);
        debug_assert_eq!(self.handle(2), Handle::IS);
        self.pressure = 0;
    }

    #[inline]
    pub fn handle(&self, index: usize) -> Handle {
        Handle::reference(self.space, index)
    }

    /// True if the handle references this heap (valid or not)
    #[inline]
    pub fn owns(&self, handle: Handle) -> bool {
        handle.index_in(self.space).is_some()
    }

    pub fn get(&self, handle: Handle) -> Option<&Datum> {
        handle
            .index_in(self.space)
            .and_then(|index| self.objects.get(index))
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut Datum> {
        handle
            .index_in(self.space)
            .and_then(|index| self.objects.get_mut(index))
    }

    #[inline]
    pub fn bytes(&self) -> usize {
        self.stats.bytes
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            objects: self.objects.len(),
            symbols: self.symbols.len(),
            ..self.stats.clone()
        }
    }

    // -----------------------------------------------------------------------
    // Allocation
    // -----------------------------------------------------------------------

    /// Append a datum to the table. Never collects.
    pub fn alloc(&mut self, datum: Datum) -> Handle {
        let size = datum.size();
        let handle = self.handle(self.objects.len());
        self.objects.push(datum);
        self.charge(size);
        handle
    }

    /// Overwrite the datum at `handle`, keeping its index
    ///
    /// # Panics
    /// Panics if the handle does not name an object of this heap.
    pub fn replace(&mut self, handle: Handle, datum: Datum) {
        let new_size = datum.size();
        let slot = self
            .get_mut(handle)
            .unwrap_or_else(|| panic!("replace: {:?} is not an object of this heap", handle));
        let old_size = slot.size();
        *slot = datum;
        self.stats.bytes = self.stats.bytes - old_size + new_size;
        self.stats.total_freed += old_size;
        self.stats.total_allocated += new_size;
        self.pressure += new_size;
    }

    /// Account for bytes added to an existing object
    pub fn charge(&mut self, bytes: usize) {
        self.stats.bytes += bytes;
        self.stats.total_allocated += bytes;
        self.pressure += bytes;
    }

    pub fn needs_collection(&self) -> bool {
        self.pressure >= self.threshold
    }

    // -----------------------------------------------------------------------
    // Symbols
    // -----------------------------------------------------------------------

    /// Symbol object for a name, if interned in this heap
    pub fn find_symbol(&self, name: &str) -> Option<Handle> {
        self.symbols.get(name).copied()
    }

    /// Intern a new named symbol (unbound, no value yet)
    pub fn create_symbol(&mut self, name: &str) -> Handle {
        debug_assert!(!self.symbols.contains_key(name), "symbol {} exists", name);
        let string = self.alloc(Datum::String(name.to_string()));
        let symbol = self.alloc(Datum::Symbol(SymbolDatum::new(string)));
        self.symbols.insert(name.to_string(), symbol);
        symbol
    }

    /// New anonymous symbol with a generated number
    pub fn create_anonymous_symbol(&mut self) -> Handle {
        let id = self.next_anonymous;
        self.next_anonymous += 1;
        self.alloc(Datum::Symbol(SymbolDatum::new(Handle::int(id))))
    }

    pub fn symbol(&self, symbol: Handle) -> Option<&SymbolDatum> {
        self.get(symbol).and_then(Datum::as_symbol)
    }

    /// Value of a symbol, creating its proxy frame on first use
    pub fn symbol_value_or_proxy(&mut self, symbol: Handle) -> Handle {
        let value = match self.symbol(symbol) {
            Some(sym) => sym.value,
            None => return Handle::NIL,
        };
        if !value.is_nil() {
            return value;
        }
        let proxy = self.alloc(Datum::Frame(FrameDatum::proxy(symbol)));
        if let Some(sym) = self.get_mut(symbol).and_then(Datum::as_symbol_mut) {
            sym.value = proxy;
        }
        tracing::trace!(?symbol, ?proxy, "created proxy");
        proxy
    }

    /// Point a symbol at a defined frame
    ///
    /// # Panics
    /// Panics if the symbol still denotes the proxy of another frame. Handles
    /// taken from that proxy would never see the definition; the frame must be
    /// defined through the proxy (a builder or `allocate_frame` with the id).
    pub fn bind(&mut self, symbol: Handle, frame: Handle) {
        let current = match self.symbol(symbol) {
            Some(sym) => sym.value,
            None => return,
        };
        if current != frame && self.is_proxy(current) {
            panic!(
                "cannot bind {} to {:?}: it is forward-referenced by proxy {:?}",
                self.symbol_name(symbol).unwrap_or_default(),
                frame,
                current
            );
        }
        if let Some(sym) = self.get_mut(symbol).and_then(Datum::as_symbol_mut) {
            sym.value = frame;
            sym.bound = true;
        }
    }

    /// Detach a symbol from a frame that no longer carries it as an id
    pub fn unbind(&mut self, symbol: Handle, frame: Handle) {
        if let Some(sym) = self.get_mut(symbol).and_then(Datum::as_symbol_mut)
            && sym.value == frame
        {
            sym.value = Handle::NIL;
            sym.bound = false;
        }
    }

    pub fn is_proxy(&self, handle: Handle) -> bool {
        self.get(handle)
            .and_then(Datum::as_frame)
            .is_some_and(|frame| frame.proxy)
    }

    /// Text of a symbol's name; anonymous symbols print as `#N`
    pub fn symbol_name(&self, symbol: Handle) -> Option<String> {
        let sym = self.symbol(symbol)?;
        if sym.is_numeric() {
            Some(format!("#{}", sym.name.as_int()))
        } else {
            self.get(sym.name)
                .and_then(Datum::as_string)
                .map(str::to_string)
        }
    }

    // -----------------------------------------------------------------------
    // Collection
    // -----------------------------------------------------------------------

    /// Start a collection: returns a marker sized for this heap
    pub fn marker(&self) -> Marker {
        Marker {
            space: self.space,
            marks: vec![false; self.objects.len()],
            stack: Vec::new(),
        }
    }

    /// Trace from the marked roots plus the symbol table, slide survivors
    /// down, and patch every handle inside the heap.
    pub fn compact(&mut self, mut marker: Marker) -> (Forwarding, GcReport) {
        for &symbol in self.symbols.values() {
            marker.mark(symbol);
        }
        while let Some(index) = marker.stack.pop() {
            self.objects[index].for_each_reference(|h| marker.mark(h));
        }

        let mut table = Vec::with_capacity(marker.marks.len());
        let mut next = 0;
        for &live in &marker.marks {
            if live {
                table.push(next);
                next += 1;
            } else {
                table.push(DEAD);
            }
        }
        let forwarding = Forwarding {
            space: self.space,
            table,
        };

        let before_objects = self.objects.len();
        let before_bytes = self.stats.bytes;
        let old = std::mem::take(&mut self.objects);
        self.objects = old
            .into_iter()
            .zip(marker.marks)
            .filter_map(|(datum, live)| live.then_some(datum))
            .collect();

        let mut live_bytes = 0;
        for datum in &mut self.objects {
            datum.for_each_reference_mut(|h| *h = forwarding.forward(*h));
            live_bytes += datum.size();
        }
        for symbol in self.symbols.values_mut() {
            *symbol = forwarding.forward(*symbol);
        }

        let report = GcReport {
            live_objects: self.objects.len(),
            freed_objects: before_objects - self.objects.len(),
            live_bytes,
            freed_bytes: before_bytes.saturating_sub(live_bytes),
        };
        self.stats.bytes = live_bytes;
        self.stats.live_bytes = live_bytes;
        self.stats.total_freed += report.freed_bytes;
        self.stats.collections += 1;
        self.pressure = 0;
        self.threshold = self.options.next_threshold(live_bytes);
        (forwarding, report)
    }
}

/// Mark state for one collection
pub(crate) struct Marker {
    space: Space,
    marks: Vec<bool>,
    stack: Vec<usize>,
}

impl Marker {
    /// Mark a root; handles of other heaps and scalars are ignored
    #[inline]
    pub fn mark(&mut self, handle: Handle) {
        if let Some(index) = handle.index_in(self.space)
            && index < self.marks.len()
            && !self.marks[index]
        {
            self.marks[index] = true;
            self.stack.push(index);
        }
    }
}

/// Old index -> new index after compaction
pub(crate) struct Forwarding {
    space: Space,
    table: Vec<usize>,
}

impl Forwarding {
    /// Relocated handle; unreachable objects forward to nil
    #[inline]
    pub fn forward(&self, handle: Handle) -> Handle {
        match handle.index_in(self.space) {
            Some(index) => match self.table.get(index) {
                Some(&new) if new != DEAD => Handle::reference(self.space, new),
                _ => Handle::NIL,
            },
            None => handle,
        }
    }
}
