//! Argument conversions for slot names and values
//!
//! Slot names are resolved through [`Symbolic`]: text and [`Name`]s are looked
//! up, handles and views are used as they are. Slot values go through
//! [`Storable`]: scalars become inline handles, text is allocated as a string.
//!
//! Both conversions may allocate, and so may collect. Callers converting more
//! than one argument either pin the collector or store each result in a
//! rooted location before converting the next.

use crate::handle::{Handle, MAX_INLINE_INT, MIN_INLINE_INT};
use crate::names::Name;
use crate::store::Store;

/// Something that names a slot
pub trait Symbolic {
    fn resolve(&self, store: &Store) -> Handle;
}

/// Something that can be stored as a slot value
pub trait Storable {
    fn to_handle(&self, store: &Store) -> Handle;
}

impl Symbolic for Handle {
    fn resolve(&self, _: &Store) -> Handle {
        *self
    }
}

impl Symbolic for str {
    fn resolve(&self, store: &Store) -> Handle {
        store.lookup(self)
    }
}

impl Symbolic for String {
    fn resolve(&self, store: &Store) -> Handle {
        store.lookup(self)
    }
}

impl Symbolic for Name {
    fn resolve(&self, store: &Store) -> Handle {
        self.lookup(store)
    }
}

impl<T: Symbolic + ?Sized> Symbolic for &T {
    fn resolve(&self, store: &Store) -> Handle {
        (**self).resolve(store)
    }
}

impl Storable for Handle {
    fn to_handle(&self, _: &Store) -> Handle {
        *self
    }
}

impl Storable for i32 {
    fn to_handle(&self, _: &Store) -> Handle {
        Handle::int(i64::from(*self))
    }
}

impl Storable for i64 {
    /// # Panics
    /// Panics if the value does not fit an inline integer.
    fn to_handle(&self, _: &Store) -> Handle {
        match Handle::try_int(*self) {
            Some(handle) => handle,
            None => panic!(
                "integer {} outside inline range [{}, {}]",
                self, MIN_INLINE_INT, MAX_INLINE_INT
            ),
        }
    }
}

impl Storable for f32 {
    fn to_handle(&self, _: &Store) -> Handle {
        Handle::float(*self)
    }
}

impl Storable for f64 {
    /// Stored with single precision
    fn to_handle(&self, _: &Store) -> Handle {
        Handle::float(*self as f32)
    }
}

impl Storable for bool {
    fn to_handle(&self, _: &Store) -> Handle {
        Handle::bool(*self)
    }
}

impl Storable for str {
    fn to_handle(&self, store: &Store) -> Handle {
        store.allocate_string(self)
    }
}

impl Storable for String {
    fn to_handle(&self, store: &Store) -> Handle {
        store.allocate_string(self)
    }
}

impl Storable for Name {
    fn to_handle(&self, store: &Store) -> Handle {
        self.lookup(store)
    }
}

impl<T: Storable + ?Sized> Storable for &T {
    fn to_handle(&self, store: &Store) -> Handle {
        (**self).to_handle(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::Type;

    #[test]
    fn test_scalars_are_inline() {
        let store = Store::new();
        let objects = store.stats().objects;
        assert_eq!(7i32.to_handle(&store), Handle::int(7));
        assert_eq!((-7i64).to_handle(&store), Handle::int(-7));
        assert_eq!(true.to_handle(&store), Handle::TRUE);
        assert_eq!(0.5f32.to_handle(&store), Handle::float(0.5));
        assert_eq!(0.25f64.to_handle(&store), Handle::float(0.25));
        assert_eq!(store.stats().objects, objects);
    }

    #[test]
    #[should_panic(expected = "outside inline range")]
    fn test_large_integer_panics() {
        let store = Store::new();
        i64::MAX.to_handle(&store);
    }

    #[test]
    fn test_text_value_is_string() {
        let store = Store::new();
        let h = "hello".to_handle(&store);
        assert_eq!(store.type_of(h), Type::String);
        assert_ne!("hello".to_handle(&store), h);
    }

    #[test]
    fn test_text_name_is_lookup() {
        let store = Store::new();
        let a = "a".resolve(&store);
        assert_eq!(String::from("a").resolve(&store), a);
        assert_eq!(a.resolve(&store), a);
        assert_eq!("isa".resolve(&store), Handle::ISA);
    }
}
