//! Typed views
//!
//! A view pairs a rooted handle with its store, so it stays valid across
//! collections for as long as it lives. [`Object`] is the untyped view;
//! [`Str`], [`Frame`], [`Symbol`] and [`Array`] deref to it and add the
//! operations of their type.
//!
//! Views built from a raw handle trust the caller about its type. Typed
//! conversions (`as_frame`, ...) check, and give a nil view on mismatch.
//! Equality compares handles.

use crate::datum::{Datum, FrameDatum, Slot, Type};
use crate::handle::Handle;
use crate::names::Name;
use crate::roots::Root;
use crate::storable::{Storable, Symbolic};
use crate::store::{GcGuard, Store};
use std::fmt;

// =============================================================================
// Object
// =============================================================================

/// A rooted handle of any type
#[derive(Clone)]
pub struct Object<'s> {
    root: Root<'s>,
}

impl<'s> Object<'s> {
    pub fn new(store: &'s Store, handle: Handle) -> Self {
        Self {
            root: Root::new(store, handle),
        }
    }

    pub fn nil(store: &'s Store) -> Self {
        Self::new(store, Handle::NIL)
    }

    /// Current handle (relocated by collections)
    #[inline]
    pub fn handle(&self) -> Handle {
        self.root.handle()
    }

    #[inline]
    pub fn store(&self) -> &'s Store {
        self.root.store()
    }

    pub fn type_of(&self) -> Type {
        self.store().type_of(self.handle())
    }

    pub fn is_nil(&self) -> bool {
        self.handle().is_nil()
    }

    pub fn is_int(&self) -> bool {
        self.handle().is_int()
    }

    pub fn is_float(&self) -> bool {
        self.handle().is_float()
    }

    pub fn is_bool(&self) -> bool {
        self.handle().is_bool()
    }

    pub fn is_ref(&self) -> bool {
        self.handle().is_ref()
    }

    pub fn is_string(&self) -> bool {
        self.type_of() == Type::String
    }

    pub fn is_frame(&self) -> bool {
        self.type_of() == Type::Frame
    }

    pub fn is_symbol(&self) -> bool {
        self.type_of() == Type::Symbol
    }

    pub fn is_array(&self) -> bool {
        self.type_of() == Type::Array
    }

    /// Integer value, 0 for non-integers
    pub fn as_int(&self) -> i64 {
        let h = self.handle();
        if h.is_int() { h.as_int() } else { 0 }
    }

    /// Float value, 0.0 for non-floats
    pub fn as_float(&self) -> f32 {
        let h = self.handle();
        if h.is_float() { h.as_float() } else { 0.0 }
    }

    /// Boolean value, false for non-booleans
    pub fn as_bool(&self) -> bool {
        self.handle().is_true()
    }

    fn cast(&self, ty: Type) -> Handle {
        self.store().cast(self.handle(), ty)
    }

    pub fn as_str(&self) -> Str<'s> {
        Str::new(self.store(), self.cast(Type::String))
    }

    pub fn as_frame(&self) -> Frame<'s> {
        Frame::new(self.store(), self.cast(Type::Frame))
    }

    pub fn as_symbol(&self) -> Symbol<'s> {
        Symbol::new(self.store(), self.cast(Type::Symbol))
    }

    pub fn as_array(&self) -> Array<'s> {
        Array::new(self.store(), self.cast(Type::Array))
    }

    pub fn debug_string(&self) -> String {
        self.store().debug_string(self.handle())
    }
}

impl PartialEq for Object<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.handle() == other.handle()
    }
}

impl PartialEq<Handle> for Object<'_> {
    fn eq(&self, other: &Handle) -> bool {
        self.handle() == *other
    }
}

impl PartialEq<Object<'_>> for Handle {
    fn eq(&self, other: &Object<'_>) -> bool {
        *self == other.handle()
    }
}

impl PartialEq<Name> for Object<'_> {
    fn eq(&self, other: &Name) -> bool {
        self.handle() == other.handle()
    }
}

impl fmt::Debug for Object<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({})", self.debug_string())
    }
}

impl Symbolic for Object<'_> {
    fn resolve(&self, _: &Store) -> Handle {
        self.handle()
    }
}

impl Storable for Object<'_> {
    fn to_handle(&self, _: &Store) -> Handle {
        self.handle()
    }
}

// =============================================================================
// Typed views
// =============================================================================

macro_rules! typed_view {
    ($(#[$meta:meta])* $view:ident, $ty:expr) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq)]
        pub struct $view<'s>(Object<'s>);

        impl<'s> $view<'s> {
            /// Wrap a handle; nil or a handle of the right type
            pub fn new(store: &'s Store, handle: Handle) -> Self {
                debug_assert!(
                    handle.is_nil() || store.type_of(handle) == $ty,
                    "{:?} is not a {:?}",
                    handle,
                    $ty
                );
                Self(Object::new(store, handle))
            }

            pub fn nil(store: &'s Store) -> Self {
                Self(Object::nil(store))
            }
        }

        impl<'s> std::ops::Deref for $view<'s> {
            type Target = Object<'s>;

            fn deref(&self) -> &Object<'s> {
                &self.0
            }
        }

        impl<'s> From<$view<'s>> for Object<'s> {
            fn from(view: $view<'s>) -> Object<'s> {
                view.0
            }
        }

        impl PartialEq<Handle> for $view<'_> {
            fn eq(&self, other: &Handle) -> bool {
                self.handle() == *other
            }
        }

        impl PartialEq<$view<'_>> for Handle {
            fn eq(&self, other: &$view<'_>) -> bool {
                *self == other.handle()
            }
        }

        impl PartialEq<Name> for $view<'_> {
            fn eq(&self, other: &Name) -> bool {
                self.handle() == other.handle()
            }
        }

        impl fmt::Debug for $view<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($view), self.debug_string())
            }
        }

        impl Symbolic for $view<'_> {
            fn resolve(&self, _: &Store) -> Handle {
                self.handle()
            }
        }

        impl Storable for $view<'_> {
            fn to_handle(&self, _: &Store) -> Handle {
                self.handle()
            }
        }
    };
}

typed_view!(
    /// View of a string
    Str,
    Type::String
);
typed_view!(
    /// View of a frame
    Frame,
    Type::Frame
);
typed_view!(
    /// View of a symbol
    Symbol,
    Type::Symbol
);
typed_view!(
    /// View of an array
    Array,
    Type::Array
);

// =============================================================================
// Str
// =============================================================================

impl<'s> Str<'s> {
    /// Allocate a new string
    pub fn from_text(store: &'s Store, text: &str) -> Self {
        Self::new(store, store.allocate_string(text))
    }

    /// Copy of the text, empty for nil
    pub fn text(&self) -> String {
        self.store()
            .deref(self.handle())
            .and_then(|datum| datum.as_string().map(str::to_string))
            .unwrap_or_default()
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.store()
            .deref(self.handle())
            .and_then(|datum| datum.as_string().map(str::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Symbol
// =============================================================================

impl<'s> Symbol<'s> {
    /// Symbol for a name, created if unknown
    pub fn named(store: &'s Store, name: &str) -> Self {
        Self::new(store, store.symbol(name))
    }

    /// New anonymous symbol
    pub fn anonymous(store: &'s Store) -> Self {
        Self::new(store, store.anonymous_symbol())
    }

    fn field<R>(&self, f: impl FnOnce(&crate::datum::SymbolDatum) -> R) -> Option<R> {
        self.store()
            .deref(self.handle())
            .and_then(|datum| datum.as_symbol().map(f))
    }

    /// Name text, `#N` for anonymous symbols, empty for nil
    pub fn name(&self) -> String {
        self.store()
            .symbol_name(self.handle())
            .unwrap_or_default()
    }

    /// The name object: a string, or an integer for anonymous symbols
    pub fn get_name(&self) -> Object<'s> {
        let name = self.field(|sym| sym.name).unwrap_or(Handle::NIL);
        Object::new(self.store(), name)
    }

    /// The frame the symbol denotes, nil before its first lookup
    pub fn get_value(&self) -> Frame<'s> {
        let value = self.field(|sym| sym.value).unwrap_or(Handle::NIL);
        Frame::new(self.store(), value)
    }

    pub fn is_bound(&self) -> bool {
        self.field(|sym| sym.bound).unwrap_or(false)
    }

    pub fn is_anonymous(&self) -> bool {
        self.field(|sym| sym.is_numeric()).unwrap_or(false)
    }
}

// =============================================================================
// Array
// =============================================================================

impl<'s> Array<'s> {
    /// New array of `len` nils
    pub fn with_len(store: &'s Store, len: usize) -> Self {
        Self::new(store, store.allocate_array(len))
    }

    pub fn from_handles(store: &'s Store, elements: &[Handle]) -> Self {
        Self::new(store, store.allocate_array_from(elements))
    }

    pub fn length(&self) -> usize {
        self.store()
            .deref(self.handle())
            .and_then(|datum| datum.as_array().map(<[Handle]>::len))
            .unwrap_or(0)
    }

    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn get(&self, index: usize) -> Handle {
        let element = self
            .store()
            .deref(self.handle())
            .and_then(|datum| datum.as_array().and_then(|a| a.get(index).copied()));
        match element {
            Some(element) => element,
            None => panic!("array index {} out of bounds", index),
        }
    }

    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn set(&self, index: usize, value: impl Storable) {
        let store = self.store();
        let _pin = store.lock_gc();
        let value = value.to_handle(store);
        store.set_element(self.handle(), index, value);
    }

    pub fn to_vec(&self) -> Vec<Handle> {
        self.store()
            .deref(self.handle())
            .and_then(|datum| datum.as_array().map(<[Handle]>::to_vec))
            .unwrap_or_default()
    }
}

// =============================================================================
// Frame
// =============================================================================

impl<'s> Frame<'s> {
    /// The frame a name denotes; a proxy if it is not defined yet
    pub fn lookup(store: &'s Store, id: &str) -> Self {
        Self::new(store, store.lookup(id))
    }

    /// Allocate a frame from slots
    pub fn from_slots(store: &'s Store, slots: &[Slot]) -> Self {
        Self::new(store, store.allocate_frame(slots, Handle::NIL))
    }

    fn with_datum<R>(&self, f: impl FnOnce(&FrameDatum) -> R) -> Option<R> {
        self.store()
            .deref(self.handle())
            .and_then(|datum| datum.as_frame().map(f))
    }

    fn value_of(&self, name: impl Symbolic) -> Handle {
        let name = name.resolve(self.store());
        self.with_datum(|frame| frame.get(name))
            .unwrap_or(Handle::NIL)
    }

    pub fn has(&self, name: impl Symbolic) -> bool {
        let name = name.resolve(self.store());
        self.with_datum(|frame| frame.has(name)).unwrap_or(false)
    }

    /// Value of the first slot with this name, nil if absent
    pub fn get(&self, name: impl Symbolic) -> Object<'s> {
        Object::new(self.store(), self.value_of(name))
    }

    pub fn get_handle(&self, name: impl Symbolic) -> Handle {
        self.value_of(name)
    }

    pub fn get_frame(&self, name: impl Symbolic) -> Frame<'s> {
        let value = self.value_of(name);
        Frame::new(self.store(), self.store().cast(value, Type::Frame))
    }

    pub fn get_symbol(&self, name: impl Symbolic) -> Symbol<'s> {
        let value = self.value_of(name);
        Symbol::new(self.store(), self.store().cast(value, Type::Symbol))
    }

    /// String value, empty if absent or not a string
    pub fn get_string(&self, name: impl Symbolic) -> String {
        let value = self.value_of(name);
        self.store()
            .deref(value)
            .and_then(|datum| datum.as_string().map(str::to_string))
            .unwrap_or_default()
    }

    /// Integer value, 0 if absent or not an integer
    pub fn get_int(&self, name: impl Symbolic) -> i64 {
        self.get_int_or(name, 0)
    }

    pub fn get_int_or(&self, name: impl Symbolic, default: i64) -> i64 {
        let value = self.value_of(name);
        if value.is_int() { value.as_int() } else { default }
    }

    /// Boolean value, false if absent or not a boolean
    pub fn get_bool(&self, name: impl Symbolic) -> bool {
        self.value_of(name).is_true()
    }

    /// Float value, 0.0 if absent or not a float
    pub fn get_float(&self, name: impl Symbolic) -> f32 {
        let value = self.value_of(name);
        if value.is_float() { value.as_float() } else { 0.0 }
    }

    /// True if some `isa` slot has this value
    pub fn is_a(&self, ty: impl Symbolic) -> bool {
        let ty = ty.resolve(self.store());
        self.with_datum(|frame| {
            frame
                .slots
                .iter()
                .any(|slot| slot.name.is_isa() && slot.value == ty)
        })
        .unwrap_or(false)
    }

    /// True if some `is` slot has this value
    pub fn is(&self, ty: impl Symbolic) -> bool {
        let ty = ty.resolve(self.store());
        self.with_datum(|frame| {
            frame
                .slots
                .iter()
                .any(|slot| slot.name.is_is() && slot.value == ty)
        })
        .unwrap_or(false)
    }

    fn ids(&self) -> Vec<Handle> {
        self.with_datum(|frame| frame.ids().collect())
            .unwrap_or_default()
    }

    /// Symbol of the first `id` slot, nil if the frame has none
    pub fn id(&self) -> Symbol<'s> {
        let store = self.store();
        let id = self.ids().first().copied().unwrap_or(Handle::NIL);
        Symbol::new(store, store.cast(id, Type::Symbol))
    }

    /// Name of the first `id` slot; `#N` if anonymous, empty if none
    pub fn id_string(&self) -> String {
        let id = self.ids().first().copied().unwrap_or(Handle::NIL);
        self.store().symbol_name(id).unwrap_or_default()
    }

    /// Number of slots
    pub fn size(&self) -> usize {
        self.with_datum(|frame| frame.slots.len()).unwrap_or(0)
    }

    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn slot(&self, index: usize) -> Slot {
        match self.with_datum(|frame| frame.slots.get(index).copied()) {
            Some(Some(slot)) => slot,
            _ => panic!("slot index {} out of bounds", index),
        }
    }

    /// Name of slot `index`
    pub fn name(&self, index: usize) -> Handle {
        self.slot(index).name
    }

    /// Value of slot `index`
    pub fn value(&self, index: usize) -> Handle {
        self.slot(index).value
    }

    pub fn is_proxy(&self) -> bool {
        self.with_datum(|frame| frame.proxy).unwrap_or(false)
    }

    /// `(has id, some id is named)`
    fn id_kinds(&self) -> (bool, bool) {
        let store = self.store();
        let ids = self.ids();
        let named = ids.iter().any(|&id| {
            store
                .deref(id)
                .and_then(|datum| match &*datum {
                    Datum::Symbol(sym) => Some(!sym.is_numeric()),
                    _ => None,
                })
                .unwrap_or(false)
        });
        (!ids.is_empty(), named)
    }

    /// Has an id naming a named symbol
    pub fn is_public(&self) -> bool {
        self.id_kinds().1
    }

    /// Has ids, all of them anonymous
    pub fn is_anonymous(&self) -> bool {
        let (has_id, named) = self.id_kinds();
        has_id && !named
    }

    /// Has no id
    pub fn is_private(&self) -> bool {
        !self.id_kinds().0
    }

    /// Slots in order; the collector is pinned while the iterator lives
    pub fn iter(&self) -> FrameIter<'s> {
        let store = self.store();
        FrameIter {
            _pin: store.lock_gc(),
            store,
            frame: self.handle(),
            index: 0,
        }
    }

    /// Values of every slot with this name, in order
    pub fn slots(&self, name: impl Symbolic) -> impl Iterator<Item = Handle> + 's {
        let name = name.resolve(self.store());
        self.iter()
            .filter(move |slot| slot.name == name)
            .map(|slot| slot.value)
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Append a slot
    pub fn add(&self, name: impl Symbolic, value: impl Storable) {
        let store = self.store();
        let _pin = store.lock_gc();
        let name = name.resolve(store);
        let value = value.to_handle(store);
        store.add(self.handle(), name, value);
    }

    /// Replace the first slot with this name, or append
    pub fn set(&self, name: impl Symbolic, value: impl Storable) {
        let store = self.store();
        let _pin = store.lock_gc();
        let name = name.resolve(store);
        let value = value.to_handle(store);
        store.set(self.handle(), name, value);
    }

    /// Append a slot whose value is the frame a name denotes
    pub fn add_link(&self, name: impl Symbolic, target: &str) {
        let store = self.store();
        let _pin = store.lock_gc();
        let name = name.resolve(store);
        let target = store.lookup(target);
        store.add(self.handle(), name, target);
    }

    pub fn set_link(&self, name: impl Symbolic, target: &str) {
        let store = self.store();
        let _pin = store.lock_gc();
        let name = name.resolve(store);
        let target = store.lookup(target);
        store.set(self.handle(), name, target);
    }

    pub fn add_is_a(&self, ty: impl Symbolic) {
        self.add(Handle::ISA, ty.resolve(self.store()));
    }

    pub fn add_is(&self, ty: impl Symbolic) {
        self.add(Handle::IS, ty.resolve(self.store()));
    }
}

impl<'s> IntoIterator for &Frame<'s> {
    type Item = Slot;
    type IntoIter = FrameIter<'s>;

    fn into_iter(self) -> FrameIter<'s> {
        self.iter()
    }
}

/// Ordered slot iterator
pub struct FrameIter<'s> {
    _pin: GcGuard<'s>,
    store: &'s Store,
    frame: Handle,
    index: usize,
}

impl Iterator for FrameIter<'_> {
    type Item = Slot;

    fn next(&mut self) -> Option<Slot> {
        let slot = self
            .store
            .deref(self.frame)
            .and_then(|datum| datum.as_frame().and_then(|f| f.slots.get(self.index).copied()))?;
        self.index += 1;
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_conversions() {
        let store = Store::new();
        let s = Object::new(&store, store.allocate_string("x"));
        assert!(s.is_string());
        assert_eq!(s.as_str().text(), "x");
        assert!(s.as_frame().is_nil());
        assert_eq!(s.type_of(), Type::String);

        let n = Object::new(&store, Handle::int(5));
        assert_eq!(n.as_int(), 5);
        assert_eq!(n.as_float(), 0.0);
        assert!(n.as_symbol().is_nil());
    }

    #[test]
    fn test_equality_by_handle() {
        let store = Store::new();
        let a = Frame::lookup(&store, "a");
        let b = Frame::lookup(&store, "a");
        assert_eq!(a, b);
        assert_eq!(a, store.lookup("a"));
        let obj: Object = a.clone().into();
        assert_eq!(obj, b.handle());
    }

    #[test]
    fn test_frame_accessors() {
        let store = Store::new();
        let frame = Frame::from_slots(&store, &[]);
        frame.add("name", "Ada");
        frame.add("age", 36);
        frame.add("tall", true);
        frame.add("score", 0.5f32);

        assert_eq!(frame.get_string("name"), "Ada");
        assert_eq!(frame.get_int("age"), 36);
        assert!(frame.get_bool("tall"));
        assert_eq!(frame.get_float("score"), 0.5);
        assert_eq!(frame.get_string("age"), "");
        assert_eq!(frame.get_int("name"), 0);
        assert_eq!(frame.get_int_or("missing", -1), -1);
        assert!(!frame.get_bool("missing"));
        assert_eq!(frame.size(), 4);
        assert_eq!(frame.name(1), store.lookup("age"));
        assert_eq!(frame.value(1), Handle::int(36));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_slot_index_out_of_bounds() {
        let store = Store::new();
        Frame::from_slots(&store, &[]).name(0);
    }

    #[test]
    fn test_types() {
        let store = Store::new();
        let person = Frame::lookup(&store, "person");
        let frame = Frame::from_slots(&store, &[]);
        frame.add_is_a(&person);
        frame.add_is("adult");
        assert!(frame.is_a(&person));
        assert!(frame.is_a("person"));
        assert!(frame.is("adult"));
        assert!(!frame.is("person"));
    }

    #[test]
    fn test_links_and_set() {
        let store = Store::new();
        let frame = Frame::from_slots(&store, &[]);
        frame.add_link("friend", "bob");
        frame.set_link("friend", "carol");
        frame.set("count", 1);
        frame.set("count", 2);
        assert_eq!(frame.get_frame("friend"), store.lookup("carol"));
        assert_eq!(frame.get_int("count"), 2);
        assert_eq!(frame.size(), 2);
    }

    #[test]
    fn test_classification() {
        let store = Store::new();
        let private = Frame::from_slots(&store, &[]);
        assert!(private.is_private());
        assert!(!private.is_public());

        let public = Frame::from_slots(&store, &[Slot::new(Handle::ID, store.symbol("pub"))]);
        assert!(public.is_public());
        assert!(!public.is_anonymous());
        assert_eq!(public.id_string(), "pub");
        assert_eq!(public.id().name(), "pub");

        let anon = Frame::from_slots(&store, &[Slot::new(Handle::ID, store.anonymous_symbol())]);
        assert!(anon.is_anonymous());
        assert!(!anon.is_private());
        assert!(anon.id_string().starts_with('#'));

        let proxy = Frame::lookup(&store, "undefined");
        assert!(proxy.is_proxy());
        assert!(proxy.is_public());
    }

    #[test]
    fn test_iteration() {
        let store = Store::new();
        let frame = Frame::from_slots(&store, &[]);
        frame.add("x", 1);
        frame.add("y", 2);
        frame.add("x", 3);

        let values: Vec<i64> = frame.iter().map(|slot| slot.value.as_int()).collect();
        assert_eq!(values, vec![1, 2, 3]);
        let xs: Vec<Handle> = frame.slots("x").collect();
        assert_eq!(xs, vec![Handle::int(1), Handle::int(3)]);

        let it = frame.iter();
        assert!(store.gc_locked());
        drop(it);
        assert!(!store.gc_locked());
    }

    #[test]
    fn test_symbol_view() {
        let store = Store::new();
        let sym = Symbol::named(&store, "thing");
        assert_eq!(sym.name(), "thing");
        assert!(!sym.is_bound());
        assert!(sym.get_value().is_nil());
        assert_eq!(sym.get_name().as_str().text(), "thing");

        let frame = Frame::from_slots(&store, &[Slot::new(Handle::ID, sym.handle())]);
        assert!(sym.is_bound());
        assert_eq!(sym.get_value(), frame);

        let anon = Symbol::anonymous(&store);
        assert!(anon.is_anonymous());
        assert!(anon.get_name().is_int());
    }

    #[test]
    fn test_array_view() {
        let store = Store::new();
        let array = Array::with_len(&store, 2);
        array.set(0, 10);
        array.set(1, "text");
        assert_eq!(array.length(), 2);
        assert_eq!(array.get(0), Handle::int(10));
        assert_eq!(store.type_of(array.get(1)), Type::String);

        let copy = Array::from_handles(&store, &array.to_vec());
        assert_eq!(copy.to_vec(), array.to_vec());
        assert_ne!(copy, array);
    }

    #[test]
    fn test_debug_format() {
        let store = Store::new();
        let s = Str::from_text(&store, "hi");
        assert_eq!(format!("{:?}", s), "Str(\"hi\")");
        assert_eq!(s.len(), 2);
    }
}
