//! Generic slot arena.
//!
//! Generalizes the teacher's `SlotAllocator` (which hands out bare `u32`
//! ids backed by a separately managed mmap region) into an arena that
//! owns the values themselves: `insert` stores a `T` and returns a
//! [`Handle<T>`], `remove` drops it and recycles the slot. Free slots are
//! kept on a LIFO stack for cache-friendly reuse, same as the teacher;
//! each slot's generation is bumped on release so a stale handle can
//! never be confused with the value that now occupies its index.

use crate::handle::Handle;
use crate::spinlock::SpinLock;

struct Slot<T> {
    value: Option<T>,
    generation: u32,
}

/// An index-stable, generation-checked arena.
///
/// Safe for concurrent use: all mutation goes through an internal
/// [`SpinLock`], matching the short-critical-section discipline §5 of
/// the specification requires for the tables this arena backs (MD, ME,
/// peer, message state).
pub struct Arena<T> {
    slots: SpinLock<Vec<Slot<T>>>,
    free: SpinLock<Vec<u32>>,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Arena { slots: SpinLock::new(Vec::new()), free: SpinLock::new(Vec::new()) }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Arena {
            slots: SpinLock::new(Vec::with_capacity(cap)),
            free: SpinLock::new(Vec::with_capacity(cap)),
        }
    }

    /// Insert a value, returning a handle that resolves to it until removed.
    pub fn insert(&self, value: T) -> Handle<T> {
        if let Some(index) = self.free.lock().pop() {
            let mut slots = self.slots.lock();
            let slot = &mut slots[index as usize];
            slot.value = Some(value);
            return Handle::new(index, slot.generation);
        }
        let mut slots = self.slots.lock();
        let index = slots.len() as u32;
        slots.push(Slot { value: Some(value), generation: 0 });
        Handle::new(index, 0)
    }

    /// Remove and return the value a handle points to, if it is current.
    pub fn remove(&self, handle: Handle<T>) -> Option<T> {
        if handle.is_none() {
            return None;
        }
        let mut slots = self.slots.lock();
        let idx = handle.as_usize();
        let slot = slots.get_mut(idx)?;
        if slot.generation != handle.generation() || slot.value.is_none() {
            return None;
        }
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        drop(slots);
        self.free.lock().push(idx as u32);
        value
    }

    /// Run `f` against the value a handle points to, if current.
    pub fn with<R>(&self, handle: Handle<T>, f: impl FnOnce(&T) -> R) -> Option<R> {
        if handle.is_none() {
            return None;
        }
        let slots = self.slots.lock();
        let slot = slots.get(handle.as_usize())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_ref().map(f)
    }

    /// Run `f` mutably against the value a handle points to, if current.
    pub fn with_mut<R>(&self, handle: Handle<T>, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        if handle.is_none() {
            return None;
        }
        let mut slots = self.slots.lock();
        let slot = slots.get_mut(handle.as_usize())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_mut().map(f)
    }

    /// True iff the handle still resolves to a live value.
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.with(handle, |_| ()).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.value.is_some()).count()
    }

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
    fn insert_and_fetch() {
        let arena: Arena<i32> = Arena::new();
        let h = arena.insert(42);
        assert_eq!(arena.with(h, |v| *v), Some(42));
    }

    #[test]
    fn remove_invalidates_handle() {
        let arena: Arena<i32> = Arena::new();
        let h = arena.insert(42);
        assert_eq!(arena.remove(h), Some(42));
        assert_eq!(arena.with(h, |v| *v), None);
        assert!(arena.remove(h).is_none());
    }

    #[test]
    fn reused_slot_bumps_generation() {
        let arena: Arena<i32> = Arena::new();
        let h1 = arena.insert(1);
        arena.remove(h1);
        let h2 = arena.insert(2);
        assert_eq!(h1.as_usize(), h2.as_usize());
        assert_ne!(h1.generation(), h2.generation());
        // the old handle must not resolve to the new occupant
        assert_eq!(arena.with(h1, |v| *v), None);
        assert_eq!(arena.with(h2, |v| *v), Some(2));
    }

    #[test]
    fn with_mut_updates_in_place() {
        let arena: Arena<i32> = Arena::new();
        let h = arena.insert(1);
        arena.with_mut(h, |v| *v += 41);
        assert_eq!(arena.with(h, |v| *v), Some(42));
    }
}
