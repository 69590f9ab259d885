//! Generational handle table.
//!
//! [`Registry`] maps opaque [`Handle`]s to values.  Each slot carries a
//! generation that is bumped whenever its value is removed, so a handle kept
//! past `close()` never reaches whatever later reuses the slot: lookups with
//! it simply return `None`.  Two live values never share a handle.

use std::fmt;
use std::num::NonZeroU32;

/// Opaque reference to a registered value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: NonZeroU32,
}

impl Handle {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation.get()
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}v{}", self.index, self.generation)
    }
}

enum Slot<T> {
    Filled { generation: NonZeroU32, value: T },
    Vacant { generation: NonZeroU32 },
}

/// Growable generational arena.
pub struct Registry<T> {
    slots: Vec<Slot<T>>,
    /// Vacant slot indices available for reuse.
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len)
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store `value`, returning a fresh handle for it.
    pub fn insert(&mut self, value: T) -> Handle {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            let Slot::Vacant { generation } = *slot else {
                unreachable!("free list pointed at a filled slot");
            };
            *slot = Slot::Filled { generation, value };
            return Handle { index, generation };
        }
        let index = u32::try_from(self.slots.len()).expect("registry exceeded u32::MAX slots");
        let generation = NonZeroU32::MIN;
        self.slots.push(Slot::Filled { generation, value });
        Handle { index, generation }
    }

    /// Remove the value behind `handle`.  Returns `None` for a stale handle.
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        self.get(handle)?;
        let index = handle.index as usize;
        // A slot whose generation is exhausted is retired for good.
        let next = handle.generation.checked_add(1);
        let old = std::mem::replace(
            &mut self.slots[index],
            Slot::Vacant {
                generation: next.unwrap_or(NonZeroU32::MAX),
            },
        );
        if next.is_some() {
            self.free.push(handle.index);
        }
        self.len -= 1;
        match old {
            Slot::Filled { value, .. } => Some(value),
            Slot::Vacant { .. } => unreachable!("checked filled above"),
        }
    }

    pub fn get(&self, handle: Handle) -> Option<&T> {
        match self.slots.get(handle.index as usize)? {
            Slot::Filled { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        match self.slots.get_mut(handle.index as usize)? {
            Slot::Filled { generation, value } if *generation == handle.generation => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.get(handle).is_some()
    }

    /// Handles of every live value, in slot order.
    pub fn handles(&self) -> Vec<Handle> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Filled { generation, .. } => Some(Handle {
                    index: index as u32,
                    generation: *generation,
                }),
                Slot::Vacant { .. } => None,
            })
            .collect()
    }
}
