//! Frame Store: a garbage-collected in-memory store of frames
//!
//! Frames are schema-less records: ordered lists of (name, value) slots that
//! link to each other and form a knowledge graph. This crate provides the
//! heap that holds them and the protocols that keep references valid while
//! the collector moves objects around.
//!
//! Key design principles:
//! - Handle: 8-byte tagged value, inline scalar or heap reference
//! - Store: single-threaded owner of a heap; local stores read a shared,
//!   frozen commons
//! - Roots: every handle held outside the heap is registered, so a
//!   collection can rewrite it
//! - Builder: slots are staged and committed in one allocation
//!
//! # Modules
//!
//! - `handle`: Tagged handle encoding
//! - `datum`: Heap payloads (String, Frame, Symbol, Array)
//! - `heap`: Object table, symbol table, mark-compact collector
//! - `store`: Allocation, lookup, mutation, collection triggering, commons
//! - `roots`: Root/External registration and rooted handle vectors
//! - `builder`: Transactional frame construction and update
//! - `object`: Typed views (Object, Str, Frame, Symbol, Array)
//! - `storable`: `Symbolic`/`Storable` argument conversions
//! - `names`: Lazily resolved, rebindable names
//! - `config`: Collection thresholds (environment configurable)
//! - `error`: Store errors
//! - `memory_stats`: Cross-thread heap statistics registry
//!
//! # Example
//!
//! ```
//! use frame_store::{Builder, Store};
//!
//! let store = Store::new();
//! let mut builder = Builder::new(&store);
//! builder.add_id("ada").add("born", 1815).add_link("isa", "person");
//! let ada = builder.create();
//!
//! assert_eq!(ada.get_int("born"), 1815);
//! assert_eq!(store.lookup("ada"), ada.handle());
//! ```

pub mod builder;
pub mod config;
pub mod datum;
pub mod error;
pub mod handle;
mod heap;
pub mod memory_stats;
pub mod names;
pub mod object;
mod printer;
pub mod roots;
pub mod storable;
pub mod store;

pub use builder::Builder;
pub use config::StoreOptions;
pub use datum::{Datum, Slot, Type};
pub use error::StoreError;
pub use handle::{Handle, HandleKind, Space};
pub use heap::{GcReport, HeapStats};
pub use memory_stats::{AggregateMemoryStats, memory_registry};
pub use names::{Name, Names};
pub use object::{Array, Frame, FrameIter, Object, Str, Symbol};
pub use roots::{Handles, Root};
pub use storable::{Storable, Symbolic};
pub use store::{Commons, DatumRef, GcGuard, Store};
