use std::cell::Cell;
use std::rc::Rc;

use liso::server::registry::{ConnectionRegistry, RegistryFull, Teardown};
use mio::Token;

/// Counts how often it was torn down.
#[derive(Debug)]
struct Record {
    id: u32,
    teardowns: Rc<Cell<u32>>,
}

impl Teardown for Record {
    fn teardown(&mut self) {
        self.teardowns.set(self.teardowns.get() + 1);
    }
}

fn record(id: u32, counter: &Rc<Cell<u32>>) -> Record {
    Record {
        id,
        teardowns: Rc::clone(counter),
    }
}

#[test]
fn test_insert_and_lookup() {
    let counter = Rc::new(Cell::new(0));
    let mut registry = ConnectionRegistry::with_capacity(4);

    registry.insert(Token(7), record(1, &counter)).unwrap();

    assert!(registry.contains(Token(7)));
    assert_eq!(registry.get(Token(7)).map(|r| r.id), Some(1));
    assert!(registry.get(Token(8)).is_none());
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_reinsert_updates_without_growing() {
    let counter = Rc::new(Cell::new(0));
    let mut registry = ConnectionRegistry::with_capacity(4);

    assert!(registry.insert(Token(3), record(1, &counter)).unwrap().is_none());
    let previous = registry.insert(Token(3), record(2, &counter)).unwrap();

    assert_eq!(previous.map(|r| r.id), Some(1));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get(Token(3)).map(|r| r.id), Some(2));
    assert_eq!(counter.get(), 0);
}

#[test]
fn test_n_inserts_then_n_removes_leaves_empty() {
    let counter = Rc::new(Cell::new(0));
    let mut registry = ConnectionRegistry::with_capacity(64);

    for fd in 0..50 {
        registry.insert(Token(fd), record(fd as u32, &counter)).unwrap();
    }
    assert_eq!(registry.len(), 50);

    for fd in 0..50 {
        assert!(registry.remove(Token(fd)).is_some());
    }

    assert!(registry.is_empty());
    assert_eq!(counter.get(), 50);
}

#[test]
fn test_remove_missing_is_noop() {
    let mut registry: ConnectionRegistry<Record> = ConnectionRegistry::with_capacity(2);
    assert!(registry.remove(Token(1)).is_none());
}

#[test]
fn test_remove_tears_down_once() {
    let counter = Rc::new(Cell::new(0));
    let mut registry = ConnectionRegistry::with_capacity(2);
    registry.insert(Token(1), record(1, &counter)).unwrap();

    registry.remove(Token(1));
    registry.remove(Token(1));

    assert_eq!(counter.get(), 1);
}

#[test]
fn test_capacity_bound() {
    let counter = Rc::new(Cell::new(0));
    let mut registry = ConnectionRegistry::with_capacity(2);

    registry.insert(Token(1), record(1, &counter)).unwrap();
    registry.insert(Token(2), record(2, &counter)).unwrap();

    assert!(registry.is_full());
    assert_eq!(
        registry.insert(Token(3), record(3, &counter)).unwrap_err(),
        RegistryFull { capacity: 2 }
    );
    // existing keys can still be updated
    assert!(registry.insert(Token(2), record(4, &counter)).is_ok());
    assert_eq!(registry.capacity(), 2);
}

#[test]
fn test_clear_tears_down_everything() {
    let counter = Rc::new(Cell::new(0));
    let mut registry = ConnectionRegistry::with_capacity(8);
    for fd in 10..15 {
        registry.insert(Token(fd), record(0, &counter)).unwrap();
    }

    assert_eq!(registry.clear(), 5);
    assert!(registry.is_empty());
    assert_eq!(counter.get(), 5);
    assert_eq!(registry.clear(), 0);
}

#[test]
fn test_keys_and_iter() {
    let counter = Rc::new(Cell::new(0));
    let mut registry = ConnectionRegistry::with_capacity(8);
    registry.insert(Token(4), record(40, &counter)).unwrap();
    registry.insert(Token(5), record(50, &counter)).unwrap();

    let mut keys = registry.keys();
    keys.sort();
    assert_eq!(keys, vec![Token(4), Token(5)]);

    let total: u32 = registry.iter().map(|(_, r)| r.id).sum();
    assert_eq!(total, 90);

    for (_, r) in registry.iter_mut() {
        r.id += 1;
    }
    assert_eq!(registry.get(Token(4)).map(|r| r.id), Some(41));
}
