//! Handle Registry
//!
//! Table mapping opaque tokens to the native records paired with guest
//! objects. A guest object stores its token in its magic slot; the token,
//! never a raw address, is the only way back from a guest object to its
//! native side.
//!
//! Tokens carry a generation, so a token freed by a deallocation hook can
//! never be confused with a later record that reuses the same slot.

use std::fmt;

use crate::error::{BridgeError, BridgeResult};

/// Opaque key into a [`HandleRegistry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistryToken {
    index: u32,
    generation: u32,
}

impl fmt::Display for RegistryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "token({}.{})", self.index, self.generation)
    }
}

#[derive(Debug)]
struct RegistrySlot<T> {
    generation: u32,
    record: Option<T>,
}

/// Token-keyed arena of native records.
#[derive(Debug)]
pub struct HandleRegistry<T> {
    slots: Vec<RegistrySlot<T>>,
    free: Vec<u32>,
    live: usize,
    capacity: Option<usize>,
    allocated_total: u64,
    freed_total: u64,
}

impl<T> HandleRegistry<T> {
    /// Create an unbounded registry
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            capacity: None,
            allocated_total: 0,
            freed_total: 0,
        }
    }

    /// Create a registry holding at most `capacity` live records
    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::new()
        }
    }

    /// Store a record and return its token
    pub fn alloc(&mut self, record: T) -> BridgeResult<RegistryToken> {
        if let Some(capacity) = self.capacity {
            if self.live >= capacity {
                return Err(BridgeError::RegistryFull { capacity });
            }
        }

        let token = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.record = Some(record);
                RegistryToken {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(RegistrySlot {
                    generation: 0,
                    record: Some(record),
                });
                RegistryToken {
                    index,
                    generation: 0,
                }
            }
        };

        self.live += 1;
        self.allocated_total += 1;
        Ok(token)
    }

    /// Look up a live record
    pub fn get(&self, token: RegistryToken) -> Option<&T> {
        self.slots
            .get(token.index as usize)
            .filter(|s| s.generation == token.generation)
            .and_then(|s| s.record.as_ref())
    }

    /// Check whether the token refers to a live record
    pub fn contains(&self, token: RegistryToken) -> bool {
        self.get(token).is_some()
    }

    /// Remove a record, invalidating its token.
    ///
    /// Returns `None` if the token was already freed.
    pub fn free(&mut self, token: RegistryToken) -> Option<T> {
        let slot = self
            .slots
            .get_mut(token.index as usize)
            .filter(|s| s.generation == token.generation)?;
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);

        self.free.push(token.index);
        self.live -= 1;
        self.freed_total += 1;
        Some(record)
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.live
    }

    /// Check if no records are live
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Usage statistics
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            live: self.live,
            allocated: self.allocated_total,
            freed: self.freed_total,
        }
    }
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle registry usage statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Records currently live
    pub live: usize,
    /// Tokens allocated since creation
    pub allocated: u64,
    /// Tokens freed since creation
    pub freed: u64,
}

impl fmt::Display for RegistryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Registry Stats: live={}, allocated={}, freed={}",
            self.live, self.allocated, self.freed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_alloc_get_free() {
        let mut registry = HandleRegistry::new();
        let token = registry.alloc("gadget").unwrap();

        assert_eq!(registry.get(token), Some(&"gadget"));
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.free(token), Some("gadget"));
        assert!(registry.is_empty());
        assert!(!registry.contains(token));
    }

    #[test]
    fn test_double_free_is_noop() {
        let mut registry = HandleRegistry::new();
        let token = registry.alloc(1).unwrap();
        assert!(registry.free(token).is_some());
        assert!(registry.free(token).is_none());
        assert_eq!(registry.stats().freed, 1);
    }

    #[test]
    fn test_stale_token_does_not_see_reused_slot() {
        let mut registry = HandleRegistry::new();
        let old = registry.alloc(1).unwrap();
        registry.free(old);

        let new = registry.alloc(2).unwrap();
        assert_ne!(old, new);
        assert_eq!(registry.get(old), None);
        assert_eq!(registry.get(new), Some(&2));
    }

    #[test]
    fn test_capacity_limit() {
        let mut registry = HandleRegistry::with_capacity_limit(1);
        registry.alloc(1).unwrap();
        let err = registry.alloc(2).unwrap_err();
        assert_eq!(err, BridgeError::RegistryFull { capacity: 1 });
    }

    #[test]
    fn test_stats() {
        let mut registry = HandleRegistry::new();
        let a = registry.alloc('a').unwrap();
        registry.alloc('b').unwrap();
        registry.free(a);

        let stats = registry.stats();
        assert_eq!(stats, RegistryStats { live: 1, allocated: 2, freed: 1 });
        assert!(stats.to_string().contains("live=1"));
    }
}
