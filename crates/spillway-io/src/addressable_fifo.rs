//! Insertion-ordered queue whose entries can be removed by key.
//!
//! Entries live in a slab-backed doubly linked list, with a hash index from
//! key to slab slot. Insert, erase-by-key and pop are O(1) expected; erase by
//! handle is O(1). Re-inserting a present key moves it to the back, which
//! makes the queue usable as a recency ring for eviction.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::error::EmptyQueue;

/// Handle to an entry of an [`AddressableFifoQueue`].
///
/// A handle stays valid while its key remains queued, including across
/// re-insertions of the same key. Once the key is erased or popped the handle
/// goes stale; handle-based calls then return `None` instead of touching an
/// unrelated entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FifoHandle {
    slot: usize,
    generation: u64,
}

#[derive(Debug)]
struct Node<K> {
    key: K,
    prev: Option<usize>,
    next: Option<usize>,
    generation: u64,
}

/// FIFO queue over unique keys with removal of arbitrary keys.
pub struct AddressableFifoQueue<K> {
    slots: Vec<Option<Node<K>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    next_generation: u64,
}

impl<K> AddressableFifoQueue<K>
where
    K: Eq + Hash + Clone,
{
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            next_generation: 0,
        }
    }

    /// Returns true if the queue holds no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Returns the number of queued keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns true if `key` is queued.
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Inserts `key` at the back of the queue.
    ///
    /// If the key is already queued it is moved to the back instead of being
    /// duplicated. Returns the entry's handle and whether the key was new.
    pub fn insert(&mut self, key: K) -> (FifoHandle, bool) {
        if let Some(&slot) = self.index.get(&key) {
            self.unlink(slot);
            self.link_back(slot);
            return (self.handle_of(slot), false);
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        let node = Node {
            key: key.clone(),
            prev: None,
            next: None,
            generation,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(node);
                slot
            }
            None => {
                self.slots.push(Some(node));
                self.slots.len() - 1
            }
        };
        self.link_back(slot);
        self.index.insert(key, slot);
        (FifoHandle { slot, generation }, true)
    }

    /// Removes `key` from the queue. Returns true if it was queued.
    pub fn erase(&mut self, key: &K) -> bool {
        match self.index.remove(key) {
            Some(slot) => {
                self.unlink(slot);
                self.vacate(slot);
                true
            }
            None => false,
        }
    }

    /// Removes the entry behind `handle` and returns its key.
    ///
    /// Returns `None` if the handle is stale.
    pub fn erase_handle(&mut self, handle: FifoHandle) -> Option<K> {
        if !self.is_live(handle) {
            return None;
        }
        self.unlink(handle.slot);
        let key = self.vacate(handle.slot)?;
        self.index.remove(&key);
        Some(key)
    }

    /// Returns the key behind `handle`, or `None` if the handle is stale.
    pub fn get(&self, handle: FifoHandle) -> Option<&K> {
        if self.is_live(handle) {
            self.node(handle.slot).map(|n| &n.key)
        } else {
            None
        }
    }

    /// Returns the handle of a queued key.
    pub fn handle(&self, key: &K) -> Option<FifoHandle> {
        self.index.get(key).map(|&slot| self.handle_of(slot))
    }

    /// Returns the oldest key.
    pub fn top(&self) -> Result<&K, EmptyQueue> {
        self.head
            .and_then(|slot| self.node(slot))
            .map(|n| &n.key)
            .ok_or(EmptyQueue)
    }

    /// Removes and returns the oldest key.
    pub fn pop(&mut self) -> Result<K, EmptyQueue> {
        let slot = self.head.ok_or(EmptyQueue)?;
        self.unlink(slot);
        let key = self.vacate(slot).ok_or(EmptyQueue)?;
        self.index.remove(&key);
        Ok(key)
    }

    /// Removes every key. Outstanding handles become stale.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.index.clear();
        self.head = None;
        self.tail = None;
    }

    /// Iterates keys from oldest to newest.
    pub fn iter(&self) -> Iter<'_, K> {
        Iter {
            queue: self,
            cursor: self.head,
        }
    }

    fn is_live(&self, handle: FifoHandle) -> bool {
        matches!(self.node(handle.slot), Some(n) if n.generation == handle.generation)
    }

    fn handle_of(&self, slot: usize) -> FifoHandle {
        let generation = self.node(slot).map(|n| n.generation).unwrap_or_default();
        FifoHandle { slot, generation }
    }

    fn node(&self, slot: usize) -> Option<&Node<K>> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, slot: usize) -> Option<&mut Node<K>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = match self.node_mut(slot) {
            Some(node) => (node.prev.take(), node.next.take()),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.node_mut(p) {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(nx) => {
                if let Some(n) = self.node_mut(nx) {
                    n.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn link_back(&mut self, slot: usize) {
        let old_tail = self.tail;
        if let Some(node) = self.node_mut(slot) {
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(t) => {
                if let Some(n) = self.node_mut(t) {
                    n.next = Some(slot);
                }
            }
            None => self.head = Some(slot),
        }
        self.tail = Some(slot);
    }

    /// Takes the node out of an unlinked slot and returns its key.
    fn vacate(&mut self, slot: usize) -> Option<K> {
        let node = self.slots.get_mut(slot)?.take()?;
        if self.head.is_none() {
            // Last entry gone: release the slab instead of keeping a free list.
            self.slots.clear();
            self.free.clear();
        } else {
            self.free.push(slot);
        }
        Some(node.key)
    }
}

impl<K> Default for AddressableFifoQueue<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> fmt::Debug for AddressableFifoQueue<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over the keys of an [`AddressableFifoQueue`], oldest first.
pub struct Iter<'a, K> {
    queue: &'a AddressableFifoQueue<K>,
    cursor: Option<usize>,
}

impl<'a, K> Iterator for Iter<'a, K>
where
    K: Eq + Hash + Clone,
{
    type Item = &'a K;

    fn next(&mut self) -> Option<&'a K> {
        let node = self.queue.node(self.cursor?)?;
        self.cursor = node.next;
        Some(&node.key)
    }
}
