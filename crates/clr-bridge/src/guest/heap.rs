//! Guest Object Heap
//!
//! A model of the guest runtime's object memory: reference-counted objects
//! allocated from a free-list arena. Each slot is a union of an occupied
//! object and a free-list link, so a freed slot is reused by the next
//! allocation and its generation is bumped to invalidate stale handles.
//!
//! The heap owns only guest-side state: type pointer, reference count,
//! optional per-instance attribute table, the "magic slot" holding the
//! [`RegistryToken`] of the native record paired with the object, and the
//! guest's error indicator. Deallocation hooks are run by the
//! [`Bridge`](crate::Bridge), never by the heap itself.

use std::fmt;

use indexmap::IndexMap;
use smol_str::SmolStr;

use super::types::{GuestTypeRef, TypeFlags};
use super::value::GuestValue;
use crate::error::{BridgeError, BridgeResult, GuestException};
use crate::registry::RegistryToken;

/// Per-instance attribute table
pub type AttrTable = IndexMap<SmolStr, GuestValue>;

/// Identity of a guest heap object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GuestHandle {
    index: u32,
    generation: u32,
}

impl GuestHandle {
    /// Slot index
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation at allocation time
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for GuestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

/// An allocated guest object
#[derive(Debug)]
struct GuestObject {
    ty: GuestTypeRef,
    refcount: usize,
    dict: Option<AttrTable>,
    magic: Option<RegistryToken>,
}

/// A heap slot: either a live object or a link in the free list
#[derive(Debug)]
enum SlotCell {
    Occupied(GuestObject),
    Free { next: Option<u32> },
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    cell: SlotCell,
}

/// State returned when an object's memory is reclaimed
#[derive(Debug)]
pub struct FreedObject {
    /// Type the object was allocated from
    pub ty: GuestTypeRef,
    /// The object's attribute table, whose references the caller must drop
    pub dict: Option<AttrTable>,
}

/// Guest runtime heap
#[derive(Debug, Default)]
pub struct GuestHeap {
    slots: Vec<Slot>,
    free_head: Option<u32>,
    live: usize,
    max_objects: Option<usize>,
    error: Option<GuestException>,
}

impl GuestHeap {
    /// Create an empty, unbounded heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a heap holding at most `max_objects` live objects
    pub fn with_capacity_limit(max_objects: usize) -> Self {
        Self {
            max_objects: Some(max_objects),
            ..Self::default()
        }
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    /// Allocate an instance of `ty` with a reference count of one.
    ///
    /// Fails for abstract or malformed types and when the heap is full.
    pub fn alloc(&mut self, ty: &GuestTypeRef) -> BridgeResult<GuestHandle> {
        if ty.name().is_empty() {
            return Err(BridgeError::allocation("<anonymous>", "malformed type"));
        }
        if ty.has_flag(TypeFlags::ABSTRACT) {
            return Err(BridgeError::allocation(ty.name(), "type is abstract"));
        }
        if let Some(max) = self.max_objects {
            if self.live >= max {
                return Err(BridgeError::allocation(ty.name(), "guest heap exhausted"));
            }
        }

        let object = GuestObject {
            ty: ty.clone(),
            refcount: 1,
            dict: ty.has_flag(TypeFlags::HAS_DICT).then(AttrTable::new),
            magic: None,
        };

        let handle = match self.free_head {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                self.free_head = match slot.cell {
                    SlotCell::Free { next } => next,
                    SlotCell::Occupied(_) => unreachable!("free list points at a live slot"),
                };
                slot.cell = SlotCell::Occupied(object);
                GuestHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    cell: SlotCell::Occupied(object),
                });
                GuestHandle {
                    index,
                    generation: 0,
                }
            }
        };

        self.live += 1;
        Ok(handle)
    }

    /// Reclaim an object's slot without running any hook.
    ///
    /// Returns `None` if the handle is stale.
    pub fn free(&mut self, handle: GuestHandle) -> Option<FreedObject> {
        let free_head = self.free_head;
        let slot = self.slot_mut(handle)?;
        let previous = std::mem::replace(&mut slot.cell, SlotCell::Free { next: free_head });
        slot.generation = slot.generation.wrapping_add(1);

        let SlotCell::Occupied(object) = previous else {
            unreachable!("slot_mut only returns occupied slots");
        };

        self.free_head = Some(handle.index);
        self.live -= 1;
        Some(FreedObject {
            ty: object.ty,
            dict: object.dict,
        })
    }

    // ========================================================================
    // Reference Counting
    // ========================================================================

    /// Increment the reference count
    pub fn incref(&mut self, handle: GuestHandle) -> BridgeResult<()> {
        let object = self.object_mut(handle, "incref")?;
        object.refcount += 1;
        Ok(())
    }

    /// Decrement the reference count.
    ///
    /// Returns `true` when the count reached zero; the object is still
    /// allocated and the caller must run deallocation.
    pub fn decref(&mut self, handle: GuestHandle) -> BridgeResult<bool> {
        let object = self.object_mut(handle, "decref")?;
        object.refcount = object.refcount.saturating_sub(1);
        Ok(object.refcount == 0)
    }

    /// Current reference count, or `None` for a stale handle
    pub fn refcount(&self, handle: GuestHandle) -> Option<usize> {
        self.object(handle).map(|o| o.refcount)
    }

    /// Check that the handle refers to a live object
    pub fn is_live(&self, handle: GuestHandle) -> bool {
        self.object(handle).is_some()
    }

    /// Number of live objects
    pub fn live_objects(&self) -> usize {
        self.live
    }

    /// Type of a live object
    pub fn type_of(&self, handle: GuestHandle) -> Option<GuestTypeRef> {
        self.object(handle).map(|o| o.ty.clone())
    }

    // ========================================================================
    // Attribute Tables
    // ========================================================================

    /// The object's attribute table, if it has one
    pub fn dict(&self, handle: GuestHandle) -> Option<&AttrTable> {
        self.object(handle).and_then(|o| o.dict.as_ref())
    }

    /// Mutable access to the object's attribute table, if it has one
    pub fn dict_mut(&mut self, handle: GuestHandle) -> Option<&mut AttrTable> {
        self.object_mut(handle, "dict").ok().and_then(|o| o.dict.as_mut())
    }

    /// Give the object an attribute table if it has none.
    ///
    /// An existing table is never replaced. Returns `true` if one was created.
    pub fn ensure_dict(&mut self, handle: GuestHandle) -> BridgeResult<bool> {
        let object = self.object_mut(handle, "ensure_dict")?;
        if object.dict.is_some() {
            return Ok(false);
        }
        object.dict = Some(AttrTable::new());
        Ok(true)
    }

    /// Look up an attribute in the object's table (no reference is taken)
    pub fn dict_get(&self, handle: GuestHandle, name: &str) -> Option<&GuestValue> {
        self.dict(handle).and_then(|d| d.get(name))
    }

    // ========================================================================
    // Magic Slot
    // ========================================================================

    /// Store the token of the native record paired with this object
    pub fn set_magic(&mut self, handle: GuestHandle, token: RegistryToken) -> BridgeResult<()> {
        let object = self.object_mut(handle, "set_magic")?;
        object.magic = Some(token);
        Ok(())
    }

    /// Token of the paired native record
    pub fn magic(&self, handle: GuestHandle) -> Option<RegistryToken> {
        self.object(handle).and_then(|o| o.magic)
    }

    /// Remove and return the token of the paired native record
    pub fn take_magic(&mut self, handle: GuestHandle) -> Option<RegistryToken> {
        self.object_mut(handle, "take_magic").ok().and_then(|o| o.magic.take())
    }

    // ========================================================================
    // Error Indicator
    // ========================================================================

    /// Set the pending exception, replacing any previous one
    pub fn set_error(&mut self, exception: GuestException) {
        self.error = Some(exception);
    }

    /// Check whether an exception is pending
    pub fn error_occurred(&self) -> bool {
        self.error.is_some()
    }

    /// Take the pending exception
    pub fn take_error(&mut self) -> Option<GuestException> {
        self.error.take()
    }

    /// Clear the pending exception
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn slot_mut(&mut self, handle: GuestHandle) -> Option<&mut Slot> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation && matches!(s.cell, SlotCell::Occupied(_)))
    }

    fn object(&self, handle: GuestHandle) -> Option<&GuestObject> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        match &slot.cell {
            SlotCell::Occupied(object) => Some(object),
            SlotCell::Free { .. } => None,
        }
    }

    fn object_mut(&mut self, handle: GuestHandle, context: &str) -> BridgeResult<&mut GuestObject> {
        let slot = self
            .slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation);
        match slot.map(|s| &mut s.cell) {
            Some(SlotCell::Occupied(object)) => Ok(object),
            _ => Err(BridgeError::invalid_handle(format!("{} on {}", context, handle))),
        }
    }
}
