//! Handle Encoding
//!
//! Every value the store talks about fits in a single 8-byte `Handle`.
//! Small scalars live inline; everything else is an index into the object
//! table of either the local heap or the global (commons) heap.
//!
//! ## Encoding Scheme
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┬───────┐
//! │                 payload (61 bits)                     │ tag(3)│
//! └───────────────────────────────────────────────────────┴───────┘
//! ```
//!
//! ## Tags
//!
//! - 0x0: Nil (payload 0, so all-zero bits is nil)
//! - 0x1: Int (61-bit signed integer)
//! - 0x2: Float (IEEE 754 single precision bits)
//! - 0x3: Bool (0 or 1)
//! - 0x4: Local reference (index into the local object table)
//! - 0x5: Global reference (index into the global object table)
//!
//! The packing is an implementation detail: [`HandleKind`] is the closed sum
//! type with the same information, and `Handle::kind()` / `Handle::from`
//! convert between the two without loss.

use std::fmt;

// =============================================================================
// Constants
// =============================================================================

/// Number of low bits holding the tag
const TAG_BITS: u32 = 3;

/// Mask selecting the tag bits
const TAG_MASK: u64 = (1 << TAG_BITS) - 1;

const TAG_NIL: u64 = 0;
const TAG_INT: u64 = 1;
const TAG_FLOAT: u64 = 2;
const TAG_BOOL: u64 = 3;
const TAG_LOCAL: u64 = 4;
const TAG_GLOBAL: u64 = 5;

/// Maximum inline integer: 2^60 - 1
pub const MAX_INLINE_INT: i64 = (1i64 << 60) - 1;

/// Minimum inline integer: -2^60
pub const MIN_INLINE_INT: i64 = -(1i64 << 60);

/// Largest object index a reference handle can carry
pub const MAX_REF_INDEX: u64 = (1u64 << 61) - 1;

// =============================================================================
// Spaces
// =============================================================================

/// Which heap a reference handle points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Space {
    /// The store's own object table (a local store)
    Local,
    /// The shared global object table (commons, or a standalone store)
    Global,
}

impl Space {
    #[inline(always)]
    const fn tag(self) -> u64 {
        match self {
            Space::Local => TAG_LOCAL,
            Space::Global => TAG_GLOBAL,
        }
    }
}

// =============================================================================
// HandleKind
// =============================================================================

/// Unpacked view of a handle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HandleKind {
    Nil,
    Int(i64),
    Float(f32),
    Bool(bool),
    Local(usize),
    Global(usize),
}

// =============================================================================
// Handle
// =============================================================================

/// An 8-byte tagged value: inline scalar or heap reference.
///
/// Equality is bitwise: two references are equal when they name the same
/// slot of the same heap, two scalars when they carry the same value.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(u64);

impl Handle {
    /// The nil handle (all bits zero)
    pub const NIL: Handle = Handle(TAG_NIL);
    pub const FALSE: Handle = Handle::make(TAG_BOOL, 0);
    pub const TRUE: Handle = Handle::make(TAG_BOOL, 1);
    pub const ZERO: Handle = Handle::make(TAG_INT, 0);
    pub const ONE: Handle = Handle::make(TAG_INT, 1);

    /// Predefined `id` frame, first object of every root store
    pub const ID: Handle = Handle::make(TAG_GLOBAL, 0);
    /// Predefined `isa` frame
    pub const ISA: Handle = Handle::make(TAG_GLOBAL, 1);
    /// Predefined `is` frame
    pub const IS: Handle = Handle::make(TAG_GLOBAL, 2);

    #[inline(always)]
    const fn make(tag: u64, payload: u64) -> Self {
        Handle((payload << TAG_BITS) | tag)
    }

    #[inline(always)]
    fn tag(self) -> u64 {
        self.0 & TAG_MASK
    }

    #[inline(always)]
    fn payload(self) -> u64 {
        self.0 >> TAG_BITS
    }

    // =========================================================================
    // Encoding
    // =========================================================================

    /// Create an inline integer
    ///
    /// # Panics
    /// Panics in debug mode if the integer is outside the inline range.
    #[inline(always)]
    pub fn int(n: i64) -> Self {
        debug_assert!(
            (MIN_INLINE_INT..=MAX_INLINE_INT).contains(&n),
            "Integer {} outside inline range [{}, {}]",
            n,
            MIN_INLINE_INT,
            MAX_INLINE_INT
        );
        Handle::make(TAG_INT, n as u64)
    }

    /// Create an inline integer, returning None if out of range
    #[inline(always)]
    pub fn try_int(n: i64) -> Option<Self> {
        if (MIN_INLINE_INT..=MAX_INLINE_INT).contains(&n) {
            Some(Self::int(n))
        } else {
            None
        }
    }

    /// Create an inline single-precision float (bits are kept exactly)
    #[inline(always)]
    pub fn float(f: f32) -> Self {
        Handle::make(TAG_FLOAT, f.to_bits() as u64)
    }

    #[inline(always)]
    pub const fn bool(b: bool) -> Self {
        if b { Handle::TRUE } else { Handle::FALSE }
    }

    /// Create a reference into the given heap
    #[inline(always)]
    pub fn reference(space: Space, index: usize) -> Self {
        debug_assert!(
            index as u64 <= MAX_REF_INDEX,
            "Object index {} exceeds handle range",
            index
        );
        Handle::make(space.tag(), index as u64)
    }

    #[inline(always)]
    pub fn local(index: usize) -> Self {
        Self::reference(Space::Local, index)
    }

    #[inline(always)]
    pub fn global(index: usize) -> Self {
        Self::reference(Space::Global, index)
    }

    // =========================================================================
    // Type Checking
    // =========================================================================

    #[inline(always)]
    pub fn is_nil(self) -> bool {
        self.0 == TAG_NIL
    }

    #[inline(always)]
    pub fn is_int(self) -> bool {
        self.tag() == TAG_INT
    }

    #[inline(always)]
    pub fn is_float(self) -> bool {
        self.tag() == TAG_FLOAT
    }

    #[inline(always)]
    pub fn is_number(self) -> bool {
        self.is_int() || self.is_float()
    }

    #[inline(always)]
    pub fn is_bool(self) -> bool {
        self.tag() == TAG_BOOL
    }

    #[inline(always)]
    pub fn is_true(self) -> bool {
        self == Handle::TRUE
    }

    #[inline(always)]
    pub fn is_false(self) -> bool {
        self == Handle::FALSE
    }

    #[inline(always)]
    pub fn is_zero(self) -> bool {
        self == Handle::ZERO
    }

    #[inline(always)]
    pub fn is_one(self) -> bool {
        self == Handle::ONE
    }

    /// True for local and global references
    #[inline(always)]
    pub fn is_ref(self) -> bool {
        matches!(self.tag(), TAG_LOCAL | TAG_GLOBAL)
    }

    #[inline(always)]
    pub fn is_local_ref(self) -> bool {
        self.tag() == TAG_LOCAL
    }

    #[inline(always)]
    pub fn is_global_ref(self) -> bool {
        self.tag() == TAG_GLOBAL
    }

    #[inline(always)]
    pub fn is_id(self) -> bool {
        self == Handle::ID
    }

    #[inline(always)]
    pub fn is_isa(self) -> bool {
        self == Handle::ISA
    }

    #[inline(always)]
    pub fn is_is(self) -> bool {
        self == Handle::IS
    }

    // =========================================================================
    // Decoding
    // =========================================================================

    /// Extract an integer value
    ///
    /// # Panics
    /// Panics in debug mode if this is not an integer.
    #[inline(always)]
    pub fn as_int(self) -> i64 {
        debug_assert!(self.is_int(), "as_int() called on {:?}", self);
        (self.0 as i64) >> TAG_BITS
    }

    /// Extract a float value
    ///
    /// # Panics
    /// Panics in debug mode if this is not a float.
    #[inline(always)]
    pub fn as_float(self) -> f32 {
        debug_assert!(self.is_float(), "as_float() called on {:?}", self);
        f32::from_bits(self.payload() as u32)
    }

    /// Extract a boolean value
    ///
    /// # Panics
    /// Panics in debug mode if this is not a boolean.
    #[inline(always)]
    pub fn as_bool(self) -> bool {
        debug_assert!(self.is_bool(), "as_bool() called on {:?}", self);
        self.payload() != 0
    }

    /// Heap the reference points into, None for scalars
    #[inline(always)]
    pub fn space(self) -> Option<Space> {
        match self.tag() {
            TAG_LOCAL => Some(Space::Local),
            TAG_GLOBAL => Some(Space::Global),
            _ => None,
        }
    }

    /// Object index of a reference
    ///
    /// # Panics
    /// Panics in debug mode if this is not a reference.
    #[inline(always)]
    pub fn index(self) -> usize {
        debug_assert!(self.is_ref(), "index() called on {:?}", self);
        self.payload() as usize
    }

    /// Object index if this handle references the given heap
    #[inline(always)]
    pub fn index_in(self, space: Space) -> Option<usize> {
        if self.tag() == space.tag() {
            Some(self.payload() as usize)
        } else {
            None
        }
    }

    /// Unpack into the sum-type view
    pub fn kind(self) -> HandleKind {
        match self.tag() {
            TAG_INT => HandleKind::Int(self.as_int()),
            TAG_FLOAT => HandleKind::Float(self.as_float()),
            TAG_BOOL => HandleKind::Bool(self.as_bool()),
            TAG_LOCAL => HandleKind::Local(self.index()),
            TAG_GLOBAL => HandleKind::Global(self.index()),
            _ => HandleKind::Nil,
        }
    }
}

impl From<HandleKind> for Handle {
    fn from(kind: HandleKind) -> Self {
        match kind {
            HandleKind::Nil => Handle::NIL,
            HandleKind::Int(n) => match Handle::try_int(n) {
                Some(handle) => handle,
                None => panic!(
                    "integer {} outside inline range [{}, {}]",
                    n, MIN_INLINE_INT, MAX_INLINE_INT
                ),
            },
            HandleKind::Float(f) => Handle::float(f),
            HandleKind::Bool(b) => Handle::bool(b),
            HandleKind::Local(i) => Handle::local(i),
            HandleKind::Global(i) => Handle::global(i),
        }
    }
}

impl From<i32> for Handle {
    fn from(n: i32) -> Self {
        Handle::int(n as i64)
    }
}

impl From<bool> for Handle {
    fn from(b: bool) -> Self {
        Handle::bool(b)
    }
}

impl From<f32> for Handle {
    fn from(f: f32) -> Self {
        Handle::float(f)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag() {
            TAG_NIL if self.0 == TAG_NIL => write!(f, "Nil"),
            TAG_INT => write!(f, "Int({})", self.as_int()),
            TAG_FLOAT => write!(f, "Float({})", self.as_float()),
            TAG_BOOL => write!(f, "Bool({})", self.as_bool()),
            TAG_LOCAL => write!(f, "Local({})", self.index()),
            TAG_GLOBAL => write!(f, "Global({})", self.index()),
            _ => write!(f, "Handle(0x{:x})", self.0),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_handle_size() {
        assert_eq!(std::mem::size_of::<Handle>(), 8);
    }

    #[test]
    fn test_nil_is_default() {
        assert_eq!(Handle::default(), Handle::NIL);
        assert!(Handle::NIL.is_nil());
        assert!(!Handle::NIL.is_ref());
        assert_eq!(Handle::NIL.kind(), HandleKind::Nil);
    }

    #[test]
    fn test_constants_are_distinct() {
        let all = [
            Handle::NIL,
            Handle::TRUE,
            Handle::FALSE,
            Handle::ZERO,
            Handle::ONE,
            Handle::ID,
            Handle::ISA,
            Handle::IS,
        ];
        for (i, a) in all.iter().enumerate() {
            for b in &all[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(Handle::ZERO.is_zero());
        assert!(Handle::ONE.is_one());
        assert!(Handle::TRUE.is_true());
        assert!(Handle::FALSE.is_false());
        assert!(!Handle::ZERO.is_false());
    }

    #[test]
    fn test_int_range_boundaries() {
        assert_eq!(Handle::int(MAX_INLINE_INT).as_int(), MAX_INLINE_INT);
        assert_eq!(Handle::int(MIN_INLINE_INT).as_int(), MIN_INLINE_INT);
        assert!(Handle::try_int(MAX_INLINE_INT + 1).is_none());
        assert!(Handle::try_int(MIN_INLINE_INT - 1).is_none());
        assert_eq!(Handle::try_int(-7).map(Handle::as_int), Some(-7));
    }

    #[test]
    #[should_panic(expected = "outside inline range")]
    fn test_kind_int_out_of_range_panics() {
        let _ = Handle::from(HandleKind::Int(MAX_INLINE_INT + 1));
    }

    #[test]
    fn test_kind_int_at_boundary() {
        let h = Handle::from(HandleKind::Int(MIN_INLINE_INT));
        assert_eq!(h.kind(), HandleKind::Int(MIN_INLINE_INT));
    }

    #[test]
    fn test_negative_zero_float_is_kept() {
        let h = Handle::float(-0.0);
        assert!(h.as_float().is_sign_negative());
        assert_ne!(h, Handle::float(0.0));
    }

    #[test]
    fn test_references() {
        let l = Handle::local(17);
        let g = Handle::global(17);
        assert_ne!(l, g);
        assert!(l.is_local_ref() && !l.is_global_ref());
        assert!(g.is_global_ref() && !g.is_local_ref());
        assert_eq!(l.index_in(Space::Local), Some(17));
        assert_eq!(l.index_in(Space::Global), None);
        assert_eq!(g.space(), Some(Space::Global));
        assert_eq!(Handle::int(3).space(), None);
    }

    #[test]
    fn test_reserved_names() {
        assert!(Handle::ID.is_id());
        assert!(Handle::ISA.is_isa());
        assert!(Handle::IS.is_is());
        assert_eq!(Handle::ID.kind(), HandleKind::Global(0));
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", Handle::int(-4)), "Int(-4)");
        assert_eq!(format!("{:?}", Handle::NIL), "Nil");
        assert_eq!(format!("{:?}", Handle::local(2)), "Local(2)");
        assert_eq!(format!("{:?}", Handle::TRUE), "Bool(true)");
    }

    proptest! {
        #[test]
        fn prop_int_round_trip(n in MIN_INLINE_INT..=MAX_INLINE_INT) {
            let h = Handle::int(n);
            prop_assert!(h.is_int());
            prop_assert!(!h.is_ref());
            prop_assert_eq!(h.as_int(), n);
            prop_assert_eq!(Handle::from(h.kind()), h);
        }

        #[test]
        fn prop_float_round_trip(bits in any::<u32>()) {
            let f = f32::from_bits(bits);
            let h = Handle::float(f);
            prop_assert!(h.is_float());
            prop_assert!(!h.is_ref());
            prop_assert_eq!(h.as_float().to_bits(), bits);
        }

        #[test]
        fn prop_bool_round_trip(b in any::<bool>()) {
            let h = Handle::bool(b);
            prop_assert!(!h.is_ref());
            prop_assert_eq!(h.as_bool(), b);
            prop_assert_eq!(h.kind(), HandleKind::Bool(b));
        }

        #[test]
        fn prop_reference_round_trip(index in 0usize..(1 << 40), global in any::<bool>()) {
            let space = if global { Space::Global } else { Space::Local };
            let h = Handle::reference(space, index);
            prop_assert!(h.is_ref());
            prop_assert_eq!(h.index(), index);
            prop_assert_eq!(h.space(), Some(space));
        }
    }
}
