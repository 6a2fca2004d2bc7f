//! A generation-checked slot arena.
//!
//! Objects that callers only ever see through an opaque handle (semaphores, shared TPS pages)
//! live in an [`Arena`]. Every handle carries the generation of the slot it was issued for;
//! removing an object bumps that generation, so a handle that outlived its object can never
//! reach whatever is stored in the reused slot afterwards. This turns double-destroy and
//! use-after-destroy into ordinary lookup failures.
//!
//! # Example
//!
//! ```rust,ignore
//! use tpsync::utils::Arena;
//!
//! let mut arena = Arena::new();
//! let id = arena.insert("first").unwrap();
//! assert_eq!(arena.get(id), Some(&"first"));
//!
//! arena.remove(id);
//! let reused = arena.insert("second").unwrap();
//! assert!(arena.get(id).is_none());
//! assert_eq!(arena.get(reused), Some(&"second"));
//! ```

/// Opaque reference to an object stored in an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaId {
    index: u32,
    generation: u32,
}

impl ArenaId {
    /// A reference that never names a live object.
    pub const NULL: ArenaId = ArenaId {
        index: u32::MAX,
        generation: 0,
    };

    /// Returns `true` for [`ArenaId::NULL`].
    #[must_use]
    pub fn is_null(self) -> bool {
        self.index == u32::MAX
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with free-list reuse and generation-checked access.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Stores `value` and returns its handle.
    ///
    /// Returns `None` once the index space (`u32::MAX` slots) is exhausted.
    pub fn insert(&mut self, value: T) -> Option<ArenaId> {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                let index = u32::try_from(self.slots.len()).ok()?;
                if index == u32::MAX {
                    return None;
                }

                self.slots.push(Slot {
                    generation: 0,
                    value: None,
                });
                index
            }
        };

        let slot = &mut self.slots[index as usize];
        slot.value = Some(value);

        Some(ArenaId {
            index,
            generation: slot.generation,
        })
    }

    /// Returns the object named by `id`, if it is still alive.
    pub fn get(&self, id: ArenaId) -> Option<&T> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }

        slot.value.as_ref()
    }

    /// Returns the object named by `id` mutably, if it is still alive.
    pub fn get_mut(&mut self, id: ArenaId) -> Option<&mut T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }

        slot.value.as_mut()
    }

    /// Removes and returns the object named by `id`.
    ///
    /// The slot's generation is advanced, invalidating every outstanding copy of `id`.
    pub fn remove(&mut self, id: ArenaId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }

        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        Some(value)
    }

    /// Number of live objects.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Returns `true` if no object is alive.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_insert_get() {
        let mut arena = Arena::new();
        assert!(arena.is_empty());

        let a = arena.insert(1).unwrap();
        let b = arena.insert(2).unwrap();

        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&1));
        assert_eq!(arena.get(b), Some(&2));

        *arena.get_mut(b).unwrap() = 20;
        assert_eq!(arena.get(b), Some(&20));
    }

    #[test]
    fn test_arena_stale_handle() {
        let mut arena = Arena::new();
        let first = arena.insert("first").unwrap();

        assert_eq!(arena.remove(first), Some("first"));
        assert_eq!(arena.remove(first), None);

        let second = arena.insert("second").unwrap();
        assert_ne!(first, second);
        assert!(arena.get(first).is_none());
        assert!(arena.get_mut(first).is_none());
        assert_eq!(arena.get(second), Some(&"second"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_arena_null() {
        let mut arena = Arena::new();
        arena.insert(7).unwrap();

        assert!(ArenaId::NULL.is_null());
        assert!(arena.get(ArenaId::NULL).is_none());
        assert!(arena.remove(ArenaId::NULL).is_none());
    }
}
