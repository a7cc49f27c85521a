//! Lazily resolved names
//!
//! Code that works with a fixed vocabulary (`"isa"`, `"person"`, `"name"`)
//! declares it once in a [`Names`] table and binds the table to a store.
//! Each [`Name`] caches its handle together with the store id and collection
//! epoch it was resolved in; a cached handle is used only while both still
//! match, otherwise the name is looked up again.
//!
//! ```ignore
//! let mut names = Names::new();
//! let n_person = names.add("person");
//! names.bind(&store);
//! let person = n_person.lookup(&store);
//! ```

use crate::handle::Handle;
use crate::store::{Commons, Store};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Copy)]
struct Binding {
    handle: Handle,
    store: u64,
    epoch: u64,
}

impl Binding {
    const UNBOUND: Binding = Binding {
        handle: Handle::NIL,
        store: 0,
        epoch: 0,
    };
}

#[derive(Debug)]
struct NameSlot {
    text: String,
    binding: Mutex<Binding>,
}

/// A name with a cached handle
#[derive(Clone)]
pub struct Name {
    slot: Arc<NameSlot>,
}

impl Name {
    pub fn new(text: &str) -> Self {
        Self {
            slot: Arc::new(NameSlot {
                text: text.to_string(),
                binding: Mutex::new(Binding::UNBOUND),
            }),
        }
    }

    pub fn text(&self) -> &str {
        &self.slot.text
    }

    fn binding(&self) -> Binding {
        *self
            .slot
            .binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn rebind(&self, binding: Binding) {
        *self
            .slot
            .binding
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = binding;
    }

    /// Resolve in `store` and cache the result
    pub fn bind(&self, store: &Store) -> Handle {
        let handle = store.lookup(&self.slot.text);
        self.rebind(Binding {
            handle,
            store: store.id(),
            epoch: store.epoch(),
        });
        handle
    }

    /// Resolve in a commons; false if the name is not defined there
    pub fn bind_commons(&self, commons: &Commons) -> bool {
        let handle = commons.lookup_existing(&self.slot.text);
        if handle.is_nil() {
            return false;
        }
        self.rebind(Binding {
            handle,
            store: commons.id(),
            epoch: commons.epoch(),
        });
        true
    }

    /// Cached handle if it is valid in `store`
    fn cached(&self, store: &Store) -> Option<Handle> {
        let binding = self.binding();
        if binding.store == 0 {
            return None;
        }
        if binding.store == store.id() && binding.epoch == store.epoch() {
            return Some(binding.handle);
        }
        match store.globals() {
            Some(commons) if binding.store == commons.id() && binding.epoch == commons.epoch() => {
                Some(binding.handle)
            }
            _ => None,
        }
    }

    /// Handle of this name in `store`
    pub fn lookup(&self, store: &Store) -> Handle {
        self.cached(store)
            .unwrap_or_else(|| store.lookup(&self.slot.text))
    }

    /// Last bound handle
    ///
    /// # Panics
    /// Panics if the name was never bound.
    pub fn handle(&self) -> Handle {
        let binding = self.binding();
        if binding.store == 0 {
            panic!("comparison with unresolved name '{}'", self.slot.text);
        }
        binding.handle
    }

    pub fn is_bound(&self) -> bool {
        self.binding().store != 0
    }
}

impl PartialEq<Handle> for Name {
    fn eq(&self, other: &Handle) -> bool {
        self.handle() == *other
    }
}

impl PartialEq<Name> for Handle {
    fn eq(&self, other: &Name) -> bool {
        *self == other.handle()
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let binding = self.binding();
        if binding.store == 0 {
            write!(f, "Name({})", self.slot.text)
        } else {
            write!(f, "Name({} = {:?})", self.slot.text, binding.handle)
        }
    }
}

/// A vocabulary of names bound together
#[derive(Debug, Default)]
pub struct Names {
    entries: Vec<Name>,
}

impl Names {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a name; the returned handle shares its binding with the table
    pub fn add(&mut self, text: &str) -> Name {
        let name = Name::new(text);
        self.entries.push(name.clone());
        name
    }

    /// Resolve every name in a store, creating symbols as needed
    pub fn bind(&self, store: &Store) -> bool {
        for name in &self.entries {
            name.bind(store);
        }
        tracing::trace!(store = store.id(), names = self.entries.len(), "bound names");
        true
    }

    /// Resolve every name in a commons
    ///
    /// Returns false if some names are not defined there; the others are
    /// still bound.
    pub fn bind_commons(&self, commons: &Commons) -> bool {
        let mut all = true;
        for name in &self.entries {
            if !name.bind_commons(commons) {
                tracing::debug!(commons = commons.id(), name = name.text(), "unresolved name");
                all = false;
            }
        }
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
