use std::collections::HashMap;

/// Id-keyed storage for one kind of GPU object.
///
/// Ids start at 1 and are never reused, so a stale handle can only miss.
pub(super) struct ResourcePool<T> {
    items: HashMap<u64, T>,
    next_id: u64,
}

impl<T> ResourcePool<T> {
    pub(super) fn new() -> Self {
        Self {
            items: HashMap::new(),
            next_id: 1,
        }
    }

    /// Hand out an id without storing anything under it.
    pub(super) fn reserve_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(super) fn insert(&mut self, item: T) -> u64 {
        let id = self.reserve_id();
        self.items.insert(id, item);
        id
    }

    pub(super) fn get(&self, id: u64) -> Option<&T> {
        self.items.get(&id)
    }

    pub(super) fn remove(&mut self, id: u64) -> Option<T> {
        self.items.remove(&id)
    }

    pub(super) fn len(&self) -> usize {
        self.items.len()
    }
}
