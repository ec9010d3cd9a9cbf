//! Kernel object handles
//!
//! A generation-counted slot arena. Handles pack a slot index and a
//! generation, so a handle kept past `remove` is detectably stale
//! instead of silently naming whatever object reused the slot. Handle 0
//! is never issued; guests use it as "no object".

/// Guest-visible object id
pub type Handle = u32;

struct Slot<T> {
    generation: u16,
    value: Option<T>,
}

/// Slot arena with generation-checked lookup
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u16>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Slot indices are offset by one so that no handle is ever 0
    fn pack(slot: u16, generation: u16) -> Handle {
        ((generation as u32) << 16) | (slot as u32 + 1)
    }

    fn unpack(handle: Handle) -> Option<(usize, u16)> {
        let index = (handle & 0xFFFF) as usize;
        if index == 0 {
            return None;
        }
        Some((index - 1, (handle >> 16) as u16))
    }

    pub fn insert(&mut self, value: T) -> Handle {
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.value = Some(value);
            return Self::pack(slot, entry.generation);
        }
        let slot = self.slots.len();
        assert!(slot < 0xFFFF, "kernel object arena exhausted");
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Self::pack(slot as u16, 0)
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        let (index, generation) = Self::unpack(handle)?;
        let slot = self.slots.get(index)?;
        if slot.generation != generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Remove the object; the slot's generation advances so the old
    /// handle goes stale.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        let (index, generation) = Self::unpack(handle)?;
        let slot = self.slots.get_mut(index)?;
        if slot.generation != generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(index as u16);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_zero_never_issued() {
        let mut arena = Arena::new();
        for _ in 0..64 {
            assert_ne!(arena.insert("x"), 0);
        }
        assert!(arena.get(0).is_none());
    }

    #[test]
    fn test_stale_handle_rejected_after_reuse() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        assert_eq!(arena.remove(a), Some(1));

        // The slot is reused under a new generation
        let b = arena.insert(2);
        assert_eq!(a & 0xFFFF, b & 0xFFFF);
        assert_ne!(a, b);
        assert!(arena.get(a).is_none());
        assert_eq!(arena.get(b), Some(&2));
    }

    #[test]
    fn test_remove_twice() {
        let mut arena = Arena::new();
        let a = arena.insert(7);
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());
    }
}
