//! Heap payloads
//!
//! A `Datum` is what a reference handle points at. Each datum knows its
//! discriminant and its size in bytes; the size feeds heap accounting, which
//! is what decides when the collector runs.
//!
//! ```text
//! String: [header][utf-8 bytes]
//! Frame:  [header][name, value][name, value]...
//! Symbol: [header][name][value][bound]
//! Array:  [header][elem0][elem1]...
//! ```

use crate::handle::Handle;

/// Bytes charged per object for the header (type + flags + size)
pub const HEADER_SIZE: usize = 8;

/// Bytes per handle
const HANDLE_SIZE: usize = std::mem::size_of::<Handle>();

/// Bytes per frame slot
pub const SLOT_SIZE: usize = 2 * HANDLE_SIZE;

/// Object type, covering inline scalars as well as heap payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Nil,
    Int,
    Float,
    Bool,
    String,
    Frame,
    Symbol,
    Array,
}

impl Type {
    /// Type of an inline handle, None for references
    pub fn of_scalar(handle: Handle) -> Option<Type> {
        if handle.is_nil() {
            Some(Type::Nil)
        } else if handle.is_int() {
            Some(Type::Int)
        } else if handle.is_float() {
            Some(Type::Float)
        } else if handle.is_bool() {
            Some(Type::Bool)
        } else {
            None
        }
    }
}

/// One (name, value) pair of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Slot {
    pub name: Handle,
    pub value: Handle,
}

impl Slot {
    pub const fn new(name: Handle, value: Handle) -> Self {
        Self { name, value }
    }
}

/// Ordered slot list
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameDatum {
    pub slots: Vec<Slot>,
    /// Set only on frames created to stand in for an undefined symbol
    pub proxy: bool,
}

impl FrameDatum {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self {
            slots,
            proxy: false,
        }
    }

    /// A proxy frame `{id: symbol}`
    pub fn proxy(symbol: Handle) -> Self {
        Self {
            slots: vec![Slot::new(Handle::ID, symbol)],
            proxy: true,
        }
    }

    /// Value of the first slot with the given name, nil if absent
    pub fn get(&self, name: Handle) -> Handle {
        self.slots
            .iter()
            .find(|slot| slot.name == name)
            .map(|slot| slot.value)
            .unwrap_or(Handle::NIL)
    }

    pub fn has(&self, name: Handle) -> bool {
        self.slots.iter().any(|slot| slot.name == name)
    }

    /// Values of all `id` slots
    pub fn ids(&self) -> impl Iterator<Item = Handle> + '_ {
        self.slots
            .iter()
            .filter(|slot| slot.name.is_id())
            .map(|slot| slot.value)
    }
}

/// Interned name with its binding
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymbolDatum {
    /// String reference for named symbols, inline integer for anonymous ones
    pub name: Handle,
    /// The frame the symbol denotes (proxy while unbound), nil before first lookup
    pub value: Handle,
    pub bound: bool,
}

impl SymbolDatum {
    pub fn new(name: Handle) -> Self {
        Self {
            name,
            value: Handle::NIL,
            bound: false,
        }
    }

    /// Anonymous symbols carry a generated number instead of a string
    pub fn is_numeric(&self) -> bool {
        self.name.is_int()
    }
}

/// A heap-resident payload
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    String(String),
    Frame(FrameDatum),
    Symbol(SymbolDatum),
    Array(Vec<Handle>),
}

impl Datum {
    pub fn type_of(&self) -> Type {
        match self {
            Datum::String(_) => Type::String,
            Datum::Frame(_) => Type::Frame,
            Datum::Symbol(_) => Type::Symbol,
            Datum::Array(_) => Type::Array,
        }
    }

    /// Size in bytes including the header
    pub fn size(&self) -> usize {
        let payload = match self {
            Datum::String(s) => s.len(),
            Datum::Frame(f) => f.slots.len() * SLOT_SIZE,
            Datum::Symbol(_) => 3 * HANDLE_SIZE,
            Datum::Array(a) => a.len() * HANDLE_SIZE,
        };
        HEADER_SIZE + payload
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Datum::String(_))
    }

    pub fn is_frame(&self) -> bool {
        matches!(self, Datum::Frame(_))
    }

    pub fn is_symbol(&self) -> bool {
        matches!(self, Datum::Symbol(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Datum::Array(_))
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            Datum::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_frame(&self) -> Option<&FrameDatum> {
        match self {
            Datum::Frame(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_frame_mut(&mut self) -> Option<&mut FrameDatum> {
        match self {
            Datum::Frame(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&SymbolDatum> {
        match self {
            Datum::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_symbol_mut(&mut self) -> Option<&mut SymbolDatum> {
        match self {
            Datum::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Handle]> {
        match self {
            Datum::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Vec<Handle>> {
        match self {
            Datum::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Visit every handle stored in this datum
    pub fn for_each_reference(&self, mut f: impl FnMut(Handle)) {
        match self {
            Datum::String(_) => {}
            Datum::Frame(frame) => {
                for slot in &frame.slots {
                    f(slot.name);
                    f(slot.value);
                }
            }
            Datum::Symbol(sym) => {
                f(sym.name);
                f(sym.value);
            }
            Datum::Array(elems) => elems.iter().copied().for_each(f),
        }
    }

    /// Visit every handle stored in this datum, allowing rewrites
    pub fn for_each_reference_mut(&mut self, mut f: impl FnMut(&mut Handle)) {
        match self {
            Datum::String(_) => {}
            Datum::Frame(frame) => {
                for slot in &mut frame.slots {
                    f(&mut slot.name);
                    f(&mut slot.value);
                }
            }
            Datum::Symbol(sym) => {
                f(&mut sym.name);
                f(&mut sym.value);
            }
            Datum::Array(elems) => elems.iter_mut().for_each(f),
        }
    }
}
