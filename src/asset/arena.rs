use super::Handle;

struct Slot<T> {
    generation: u32,
    item: Option<T>,
}

/// Slot table owning GPU-side resources. Items are destroyed only through an
/// explicit [`ResourceArena::release`]; released slots are reused LIFO.
pub struct ResourceArena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    live: usize,
}

impl<T> ResourceArena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
        }
    }

    pub fn insert(&mut self, item: T) -> Handle<T> {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.item = Some(item);
            return Handle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            item: Some(item),
        });
        Handle::new(index, 0)
    }

    pub fn get(&self, handle: Handle<T>) -> Option<&T> {
        self.slots
            .get(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.item.as_ref())
    }

    pub fn get_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.item.as_mut())
    }

    /// Removes the item and hands it back to the caller, who decides how the
    /// underlying GPU object is torn down. Stale handles return `None`.
    pub fn release(&mut self, handle: Handle<T>) -> Option<T> {
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation() {
            return None;
        }
        let item = slot.item.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index() as u32);
        self.live -= 1;
        Some(item)
    }

    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.item
                .as_ref()
                .map(|item| (Handle::new(index as u32, slot.generation), item))
        })
    }
}

impl<T> Default for ResourceArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_invalidates_handle() {
        let mut arena = ResourceArena::new();
        let a = arena.insert("shadow");
        assert_eq!(arena.release(a), Some("shadow"));
        assert!(arena.get(a).is_none());
        assert!(arena.release(a).is_none());
        assert!(arena.is_empty());
    }

    #[test]
    fn released_slot_is_reused_with_new_generation() {
        let mut arena = ResourceArena::new();
        let a = arena.insert(1u32);
        let _b = arena.insert(2u32);
        arena.release(a);
        let c = arena.insert(3u32);

        assert_eq!(c.index(), a.index());
        assert_ne!(c.generation(), a.generation());
        assert_eq!(arena.get(c), Some(&3));
        assert!(arena.get(a).is_none());
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn iter_skips_released_slots() {
        let mut arena = ResourceArena::new();
        let a = arena.insert('a');
        let b = arena.insert('b');
        arena.release(a);
        let items: Vec<_> = arena.iter().collect();
        assert_eq!(items, vec![(b, &'b')]);
    }
}
