//! Property-based tests for the addressable queues, checked against simple
//! reference models.

use std::collections::BTreeMap;

use proptest::prelude::*;
use spillway_io::{AddressableFifoQueue, AddressablePriorityQueue, Descending, EmptyQueue};

#[derive(Debug, Clone)]
enum FifoOp {
    Insert(u8),
    Erase(u8),
    Pop,
}

fn fifo_op() -> impl Strategy<Value = FifoOp> {
    prop_oneof![
        3 => (0u8..32).prop_map(FifoOp::Insert),
        1 => (0u8..32).prop_map(FifoOp::Erase),
        1 => Just(FifoOp::Pop),
    ]
}

#[derive(Debug, Clone)]
enum PrioOp {
    Insert(u8, u8),
    Erase(u8),
    Pop,
}

fn prio_op() -> impl Strategy<Value = PrioOp> {
    prop_oneof![
        3 => (0u8..32, 0u8..8).prop_map(|(k, p)| PrioOp::Insert(k, p)),
        1 => (0u8..32).prop_map(PrioOp::Erase),
        1 => Just(PrioOp::Pop),
    ]
}

/// Minimum surviving (priority, key) of the model.
fn model_min(model: &BTreeMap<u8, u8>) -> Option<(u8, u8)> {
    model.iter().map(|(k, p)| (*p, *k)).min()
}

proptest! {
    /// Survivors and pop order match a recency-ordered list model.
    #[test]
    fn test_fifo_matches_model(ops in proptest::collection::vec(fifo_op(), 0..200)) {
        let mut queue = AddressableFifoQueue::new();
        let mut model: Vec<u8> = Vec::new();

        for op in ops {
            match op {
                FifoOp::Insert(k) => {
                    let present = model.contains(&k);
                    model.retain(|x| *x != k);
                    model.push(k);
                    let (_, was_new) = queue.insert(k);
                    prop_assert_eq!(was_new, !present);
                }
                FifoOp::Erase(k) => {
                    let present = model.contains(&k);
                    model.retain(|x| *x != k);
                    prop_assert_eq!(queue.erase(&k), present);
                }
                FifoOp::Pop => {
                    if model.is_empty() {
                        prop_assert_eq!(queue.pop(), Err(EmptyQueue));
                    } else {
                        let expected = model.remove(0);
                        prop_assert_eq!(queue.top().copied(), Ok(expected));
                        prop_assert_eq!(queue.pop(), Ok(expected));
                    }
                }
            }
            prop_assert_eq!(queue.len(), model.len());
            prop_assert_eq!(queue.is_empty(), model.is_empty());
        }

        let survivors: Vec<u8> = queue.iter().copied().collect();
        prop_assert_eq!(&survivors, &model);

        let mut drained = Vec::new();
        while let Ok(k) = queue.pop() {
            drained.push(k);
        }
        prop_assert_eq!(drained, model);
    }

    /// Handles stay usable across re-insertion and go stale after removal.
    #[test]
    fn test_fifo_handles(keys in proptest::collection::vec(0u8..16, 1..64)) {
        let mut queue = AddressableFifoQueue::new();
        let mut handles = BTreeMap::new();
        for k in &keys {
            let (handle, _) = queue.insert(*k);
            handles.insert(*k, handle);
        }
        for (k, handle) in &handles {
            prop_assert_eq!(queue.get(*handle), Some(k));
        }
        let (first_key, first_handle) = handles.iter().next().map(|(k, h)| (*k, *h)).unwrap();
        prop_assert_eq!(queue.erase_handle(first_handle), Some(first_key));
        prop_assert_eq!(queue.get(first_handle), None);
        prop_assert_eq!(queue.erase_handle(first_handle), None);
        prop_assert!(!queue.contains(&first_key));
    }

    /// Pop always yields the minimum priority, ties broken by key.
    #[test]
    fn test_priority_matches_model(ops in proptest::collection::vec(prio_op(), 0..200)) {
        let mut queue: AddressablePriorityQueue<u8, u8> = AddressablePriorityQueue::new();
        let mut model: BTreeMap<u8, u8> = BTreeMap::new();

        for op in ops {
            match op {
                PrioOp::Insert(k, p) => {
                    let (_, was_new) = queue.insert(k, p);
                    prop_assert_eq!(was_new, model.insert(k, p).is_none());
                }
                PrioOp::Erase(k) => {
                    prop_assert_eq!(queue.erase(&k), model.remove(&k).is_some());
                }
                PrioOp::Pop => match model_min(&model) {
                    None => prop_assert_eq!(queue.pop(), Err(EmptyQueue)),
                    Some((p, k)) => {
                        model.remove(&k);
                        prop_assert_eq!(queue.pop_with_priority(), Ok((k, p)));
                    }
                },
            }
            prop_assert_eq!(queue.len(), model.len());
            for (k, p) in &model {
                prop_assert_eq!(queue.priority(k), Some(p));
            }
        }

        let mut expected: Vec<(u8, u8)> = model.iter().map(|(k, p)| (*p, *k)).collect();
        expected.sort();
        let mut drained = Vec::new();
        while let Ok((k, p)) = queue.pop_with_priority() {
            drained.push((p, k));
        }
        prop_assert_eq!(drained, expected);
    }

    /// Identical inputs give identical pop sequences.
    #[test]
    fn test_priority_pop_order_reproducible(
        entries in proptest::collection::vec((0u8..64, 0u8..4), 0..64)
    ) {
        let run = || {
            let mut queue: AddressablePriorityQueue<u8, u8, Descending> = AddressablePriorityQueue::new();
            for (k, p) in &entries {
                queue.insert(*k, *p);
            }
            let mut out = Vec::new();
            while let Ok(k) = queue.pop() {
                out.push(k);
            }
            out
        };
        prop_assert_eq!(run(), run());
    }

    /// Re-inserting with the same priority never reports a new key.
    #[test]
    fn test_priority_reinsert_idempotent(key in 0u8..255, prio in 0u32..1000, repeats in 1usize..5) {
        let mut queue: AddressablePriorityQueue<u8, u32> = AddressablePriorityQueue::new();
        prop_assert!(queue.insert(key, prio).1);
        for _ in 0..repeats {
            prop_assert!(!queue.insert(key, prio).1);
        }
        prop_assert_eq!(queue.len(), 1);
    }
}
