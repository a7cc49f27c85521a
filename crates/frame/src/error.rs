//! Store errors
//!
//! Most store operations cannot fail: a lookup miss, a missing slot or a type
//! mismatch yields nil or a default value. `StoreError` covers the few
//! operations that are refused at runtime.

/// Error returned by fallible store operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Collection was requested while the collector is pinned
    GcLocked {
        /// Pin depth at the time of the request
        depth: u32,
    },
    /// Only a global store can be frozen into a commons
    NotGlobal,
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::GcLocked { depth } => {
                write!(f, "Garbage collection is locked (pin depth {})", depth)
            }
            StoreError::NotGlobal => {
                write!(f, "Only a global store can be frozen - this store is local")
            }
        }
    }
}

impl std::error::Error for StoreError {}
