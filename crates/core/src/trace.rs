//! Reference tracing capabilities
//!
//! The runtime does not know the layout of caller objects. Each object carries
//! an [`ObjectKind`] naming a [`Traceable`] capability that reports which
//! payload words hold references. Collectors use it to find and rewrite
//! references; nothing else in the runtime interprets payload bytes.
//!
//! Global roots (references held outside any transaction) are reported by
//! [`RootProvider`]s.

use crate::error::{Result, StrandError};
use crate::header::read_word;
use crate::types::ObjRef;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::sync::Arc;

/// Payload offsets of reference slots.
pub type Slots = SmallVec<[usize; 8]>;

/// Identifier of a registered tracing capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKind(pub u16);

impl ObjectKind {
    /// Payload holds no references.
    pub const OPAQUE: ObjectKind = ObjectKind(0);
    /// Every 8-byte payload word is a reference.
    pub const REF_ARRAY: ObjectKind = ObjectKind(1);
}

/// Enumerates the reference slots of an object payload.
///
/// Slots are byte offsets into the payload of 8-byte little-endian words
/// holding raw [`ObjRef`] encodings. Implementations must only report offsets
/// with `offset + 8 <= payload.len()`.
pub trait Traceable: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Push the offset of every reference slot of `payload` into `slots`.
    fn reference_slots(&self, payload: &[u8], slots: &mut Slots);
}

/// Capability for payloads without references.
pub struct Opaque;

impl Traceable for Opaque {
    fn name(&self) -> &str {
        "opaque"
    }

    fn reference_slots(&self, _payload: &[u8], _slots: &mut Slots) {}
}

/// Capability for payloads made only of references.
pub struct RefArray;

impl Traceable for RefArray {
    fn name(&self) -> &str {
        "ref-array"
    }

    fn reference_slots(&self, payload: &[u8], slots: &mut Slots) {
        slots.extend((0..payload.len() / 8).map(|i| i * 8));
    }
}

/// Capability with a fixed set of reference offsets.
pub struct FixedSlots {
    name: String,
    offsets: Vec<usize>,
}

impl FixedSlots {
    /// Create a capability reporting `offsets` (each must be 8-aligned).
    pub fn new(name: impl Into<String>, offsets: Vec<usize>) -> Self {
        debug_assert!(offsets.iter().all(|o| o % 8 == 0));
        FixedSlots {
            name: name.into(),
            offsets,
        }
    }
}

impl Traceable for FixedSlots {
    fn name(&self) -> &str {
        &self.name
    }

    fn reference_slots(&self, payload: &[u8], slots: &mut Slots) {
        slots.extend(self.offsets.iter().copied().filter(|o| o + 8 <= payload.len()));
    }
}

/// Registry of tracing capabilities, indexed by [`ObjectKind`].
pub struct KindRegistry {
    kinds: RwLock<Vec<Arc<dyn Traceable>>>,
}

impl KindRegistry {
    /// Registry holding the built-in kinds.
    pub fn new() -> Self {
        let builtin: Vec<Arc<dyn Traceable>> = vec![Arc::new(Opaque), Arc::new(RefArray)];
        KindRegistry {
            kinds: RwLock::new(builtin),
        }
    }

    /// Register a capability and return its kind.
    pub fn register(&self, capability: Arc<dyn Traceable>) -> Result<ObjectKind> {
        let mut kinds = self.kinds.write();
        let id = u16::try_from(kinds.len()).map_err(|_| {
            StrandError::InvalidConfig("too many object kinds registered".to_string())
        })?;
        kinds.push(capability);
        Ok(ObjectKind(id))
    }

    /// Look up a capability.
    pub fn get(&self, kind: ObjectKind) -> Result<Arc<dyn Traceable>> {
        self.kinds
            .read()
            .get(kind.0 as usize)
            .cloned()
            .ok_or(StrandError::UnknownKind(kind.0))
    }

    /// Is `kind` registered?
    pub fn contains(&self, kind: ObjectKind) -> bool {
        (kind.0 as usize) < self.kinds.read().len()
    }

    /// Collect the reference slots of a payload of kind `kind`.
    pub fn slots(&self, kind: ObjectKind, payload: &[u8], slots: &mut Slots) -> Result<()> {
        let kinds = self.kinds.read();
        let capability = kinds
            .get(kind.0 as usize)
            .ok_or(StrandError::UnknownKind(kind.0))?;
        capability.reference_slots(payload, slots);
        Ok(())
    }

    /// Collect the non-null references held by a payload of kind `kind`.
    pub fn references(&self, kind: ObjectKind, payload: &[u8], out: &mut Vec<ObjRef>) -> Result<()> {
        let mut slots = Slots::new();
        self.slots(kind, payload, &mut slots)?;
        out.extend(
            slots
                .iter()
                .map(|&off| ObjRef::from_raw(read_word(payload, off)))
                .filter(|r| !r.is_null()),
        );
        Ok(())
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds = self.kinds.read();
        f.debug_list()
            .entries(kinds.iter().map(|k| k.name().to_string()))
            .finish()
    }
}

/// Source of global roots for major collection.
///
/// Providers are called while every segment is stopped, so they must not
/// block on transactional work. Only committed (old) references may be
/// reported.
pub trait RootProvider: Send + Sync {
    /// Report every root reference.
    fn roots(&self, visit: &mut dyn FnMut(ObjRef));
}

/// A simple table of global roots.
#[derive(Debug, Default)]
pub struct GlobalRoots {
    slots: Mutex<Vec<ObjRef>>,
}

impl GlobalRoots {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a root and return its index.
    pub fn push(&self, obj: ObjRef) -> usize {
        let mut slots = self.slots.lock();
        slots.push(obj);
        slots.len() - 1
    }

    /// Replace the root at `index`.
    pub fn set(&self, index: usize, obj: ObjRef) -> Option<ObjRef> {
        self.slots
            .lock()
            .get_mut(index)
            .map(|slot| std::mem::replace(slot, obj))
    }

    /// Root at `index`.
    pub fn get(&self, index: usize) -> Option<ObjRef> {
        self.slots.lock().get(index).copied()
    }

    /// Number of roots.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}

impl RootProvider for GlobalRoots {
    fn roots(&self, visit: &mut dyn FnMut(ObjRef)) {
        for obj in self.slots.lock().iter().filter(|r| !r.is_null()) {
            visit(*obj);
        }
    }
}
