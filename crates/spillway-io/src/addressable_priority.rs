//! Min-priority queue whose entries can be removed or reprioritised by key.
//!
//! Entries are kept in a `BTreeSet` ordered by `(priority, key)` and indexed
//! by key, so insert, erase, reprioritise and pop are all O(log n). Equal
//! priorities are broken by the key's own ordering, which makes the pop
//! sequence reproducible for identical inputs.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use crate::error::EmptyQueue;

/// Total order over priorities used by an [`AddressablePriorityQueue`].
/// The queue pops the entry that compares smallest.
pub trait PriorityOrder<P> {
    /// Compares two priorities.
    fn compare(a: &P, b: &P) -> Ordering;
}

/// Smallest priority first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ascending;

impl<P: Ord> PriorityOrder<P> for Ascending {
    #[inline]
    fn compare(a: &P, b: &P) -> Ordering {
        a.cmp(b)
    }
}

/// Largest priority first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Descending;

impl<P: Ord> PriorityOrder<P> for Descending {
    #[inline]
    fn compare(a: &P, b: &P) -> Ordering {
        b.cmp(a)
    }
}

/// Handle to an entry of an [`AddressablePriorityQueue`].
///
/// Valid while the key stays queued, including across priority updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriorityHandle<K> {
    key: K,
    generation: u64,
}

impl<K> PriorityHandle<K> {
    /// Returns the key this handle was issued for.
    pub fn key(&self) -> &K {
        &self.key
    }
}

struct Entry<P, K, C> {
    priority: P,
    key: K,
    _order: PhantomData<fn() -> C>,
}

impl<P, K, C> Entry<P, K, C> {
    fn new(priority: P, key: K) -> Self {
        Self {
            priority,
            key,
            _order: PhantomData,
        }
    }
}

impl<P, K: Ord, C: PriorityOrder<P>> Ord for Entry<P, K, C> {
    fn cmp(&self, other: &Self) -> Ordering {
        C::compare(&self.priority, &other.priority).then_with(|| self.key.cmp(&other.key))
    }
}

impl<P, K: Ord, C: PriorityOrder<P>> PartialOrd for Entry<P, K, C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P, K: Ord, C: PriorityOrder<P>> PartialEq for Entry<P, K, C> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<P, K: Ord, C: PriorityOrder<P>> Eq for Entry<P, K, C> {}

/// Priority queue over unique keys, popping the minimum under `C`.
pub struct AddressablePriorityQueue<K, P, C = Ascending> {
    entries: BTreeSet<Entry<P, K, C>>,
    index: HashMap<K, (P, u64)>,
    next_generation: u64,
}

impl<K, P, C> AddressablePriorityQueue<K, P, C>
where
    K: Ord + Hash + Clone,
    P: Clone,
    C: PriorityOrder<P>,
{
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            entries: BTreeSet::new(),
            index: HashMap::new(),
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

    /// Returns the current priority of `key`.
    pub fn priority(&self, key: &K) -> Option<&P> {
        self.index.get(key).map(|(p, _)| p)
    }

    /// Inserts `key` with `priority`.
    ///
    /// If the key is already queued its priority is replaced and the entry is
    /// relocated; no duplicate is created. Returns the entry's handle and
    /// whether the key was new.
    pub fn insert(&mut self, key: K, priority: P) -> (PriorityHandle<K>, bool) {
        if let Some((current, generation)) = self.index.get_mut(&key) {
            let generation = *generation;
            if C::compare(current, &priority) != Ordering::Equal {
                self.entries
                    .remove(&Entry::new(current.clone(), key.clone()));
                self.entries.insert(Entry::new(priority.clone(), key.clone()));
                *current = priority;
            }
            return (PriorityHandle { key, generation }, false);
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.entries.insert(Entry::new(priority.clone(), key.clone()));
        self.index.insert(key.clone(), (priority, generation));
        (PriorityHandle { key, generation }, true)
    }

    /// Removes `key`. Returns true if it was queued.
    pub fn erase(&mut self, key: &K) -> bool {
        match self.index.remove(key) {
            Some((priority, _)) => {
                self.entries.remove(&Entry::new(priority, key.clone()));
                true
            }
            None => false,
        }
    }

    /// Removes the entry behind `handle` and returns its priority.
    ///
    /// Returns `None` if the handle is stale, even when the same key has been
    /// inserted again since.
    pub fn erase_handle(&mut self, handle: &PriorityHandle<K>) -> Option<P> {
        match self.index.get(&handle.key) {
            Some((_, generation)) if *generation == handle.generation => {}
            _ => return None,
        }
        let (priority, _) = self.index.remove(&handle.key)?;
        self.entries
            .remove(&Entry::new(priority.clone(), handle.key.clone()));
        Some(priority)
    }

    /// Returns true if `handle` still refers to a queued entry.
    pub fn is_live(&self, handle: &PriorityHandle<K>) -> bool {
        matches!(self.index.get(&handle.key), Some((_, g)) if *g == handle.generation)
    }

    /// Returns the key with minimum priority.
    pub fn top(&self) -> Result<&K, EmptyQueue> {
        self.entries.first().map(|e| &e.key).ok_or(EmptyQueue)
    }

    /// Returns the key with minimum priority together with that priority.
    pub fn peek(&self) -> Result<(&K, &P), EmptyQueue> {
        self.entries
            .first()
            .map(|e| (&e.key, &e.priority))
            .ok_or(EmptyQueue)
    }

    /// Removes and returns the key with minimum priority.
    pub fn pop(&mut self) -> Result<K, EmptyQueue> {
        self.pop_with_priority().map(|(key, _)| key)
    }

    /// Removes and returns the minimum entry as `(key, priority)`.
    pub fn pop_with_priority(&mut self) -> Result<(K, P), EmptyQueue> {
        let entry = self.entries.pop_first().ok_or(EmptyQueue)?;
        self.index.remove(&entry.key);
        Ok((entry.key, entry.priority))
    }

    /// Removes every entry. Outstanding handles become stale.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Iterates `(key, priority)` pairs in pop order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &P)> + '_ {
        self.entries.iter().map(|e| (&e.key, &e.priority))
    }
}

impl<K, P, C> Default for AddressablePriorityQueue<K, P, C>
where
    K: Ord + Hash + Clone,
    P: Clone,
    C: PriorityOrder<P>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P, C> fmt::Debug for AddressablePriorityQueue<K, P, C>
where
    K: Ord + Hash + Clone + fmt::Debug,
    P: Clone + fmt::Debug,
    C: PriorityOrder<P>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_queue() {
        let mut q: AddressablePriorityQueue<u32, u32> = AddressablePriorityQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.top(), Err(EmptyQueue));
        assert_eq!(q.pop(), Err(EmptyQueue));
        assert!(!q.erase(&3));
    }

    #[test]
    fn test_pops_minimum_priority() {
        let mut q = AddressablePriorityQueue::<&str, u32>::new();
        q.insert("c", 30);
        q.insert("a", 10);
        q.insert("b", 20);
        assert_eq!(q.peek(), Ok((&"a", &10)));
        assert_eq!(q.pop(), Ok("a"));
        assert_eq!(q.pop(), Ok("b"));
        assert_eq!(q.pop(), Ok("c"));
        assert!(q.is_empty());
    }

    #[test]
    fn test_ties_broken_by_key_order() {
        let mut q = AddressablePriorityQueue::<u32, u8>::new();
        for k in [9, 3, 7, 1] {
            q.insert(k, 5);
        }
        let order: Vec<_> = std::iter::from_fn(|| q.pop().ok()).collect();
        assert_eq!(order, vec![1, 3, 7, 9]);
    }

    #[test]
    fn test_reinsert_relocates() {
        let mut q = AddressablePriorityQueue::<char, i32>::new();
        q.insert('x', 1);
        q.insert('y', 2);
        let (_, was_new) = q.insert('x', 3);
        assert!(!was_new);
        assert_eq!(q.len(), 2);
        assert_eq!(q.priority(&'x'), Some(&3));
        assert_eq!(q.pop_with_priority(), Ok(('y', 2)));
        assert_eq!(q.pop_with_priority(), Ok(('x', 3)));
    }

    #[test]
    fn test_reinsert_same_priority_is_idempotent() {
        let mut q = AddressablePriorityQueue::<u32, u32>::new();
        assert!(q.insert(4, 8).1);
        assert!(!q.insert(4, 8).1);
        assert!(!q.insert(4, 8).1);
        assert_eq!(q.len(), 1);
        assert_eq!(q.iter().count(), 1);
    }

    #[test]
    fn test_erase_by_key_and_handle() {
        let mut q = AddressablePriorityQueue::<u32, u32>::new();
        let (h1, _) = q.insert(1, 100);
        q.insert(2, 50);
        assert!(q.erase(&2));
        assert!(!q.erase(&2));
        assert!(q.is_live(&h1));
        assert_eq!(q.erase_handle(&h1), Some(100));
        assert_eq!(q.erase_handle(&h1), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_stale_handle_after_reinsert_of_same_key() {
        let mut q = AddressablePriorityQueue::<u32, u32>::new();
        let (old, _) = q.insert(1, 1);
        assert_eq!(q.pop(), Ok(1));
        let (fresh, was_new) = q.insert(1, 2);
        assert!(was_new);
        assert!(!q.is_live(&old));
        assert_eq!(q.erase_handle(&old), None);
        assert_eq!(q.len(), 1);
        assert_eq!(fresh.key(), &1);
        assert_eq!(q.erase_handle(&fresh), Some(2));
    }

    #[test]
    fn test_handle_survives_priority_update() {
        let mut q = AddressablePriorityQueue::<u32, u32>::new();
        let (h, _) = q.insert(7, 70);
        let (h2, _) = q.insert(7, 1);
        assert_eq!(h, h2);
        assert!(q.is_live(&h));
        assert_eq!(q.peek(), Ok((&7, &1)));
    }

    #[test]
    fn test_descending_order() {
        let mut q = AddressablePriorityQueue::<u32, u32, Descending>::new();
        q.insert(1, 10);
        q.insert(2, 30);
        q.insert(3, 20);
        assert_eq!(q.pop(), Ok(2));
        assert_eq!(q.pop(), Ok(3));
        assert_eq!(q.pop(), Ok(1));
    }

    #[test]
    fn test_debug_lists_in_pop_order() {
        let mut q = AddressablePriorityQueue::<u32, u32>::new();
        q.insert(1, 2);
        q.insert(2, 1);
        assert_eq!(format!("{:?}", q), "[(2, 1), (1, 2)]");
    }
}
