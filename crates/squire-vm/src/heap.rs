//! Reference-counted object heap
//!
//! A slab of generational cells. Freed slots go onto a free list and have
//! their generation bumped, so an [`ObjectRef`] held past the death of its
//! object simply stops resolving.
//!
//! Freeing never runs host code while the heap is borrowed: dead objects and
//! their release hooks are moved into a [`Graveyard`], which the caller
//! buries after the borrow ends. Host code run from a hook (or from the
//! `Drop` of a payload) is therefore free to touch the VM again.

use crate::object::{HeapObject, Payload, ReleaseHook};
use crate::value::{ObjectRef, Value};
use crate::{VmError, VmResult};

struct Entry {
    object: HeapObject,
    ref_count: u32,
    release_hook: Option<ReleaseHook>,
}

struct Cell {
    generation: u32,
    entry: Option<Entry>,
}

/// Objects that died during a release, waiting to be finalized.
#[derive(Default)]
#[must_use = "a graveyard must be buried to run release hooks"]
pub struct Graveyard {
    dead: Vec<(HeapObject, Option<ReleaseHook>)>,
}

impl Graveyard {
    /// Number of objects waiting to be finalized
    pub fn len(&self) -> usize {
        self.dead.len()
    }

    /// Whether nothing died
    pub fn is_empty(&self) -> bool {
        self.dead.is_empty()
    }

    /// Run release hooks and drop the dead objects.
    ///
    /// Must be called with no heap borrow outstanding.
    pub fn bury(self) {
        for (mut object, hook) in self.dead {
            let payload: Option<Payload> = object.take_payload();
            match hook {
                Some(hook) => {
                    tracing::trace!(kind = %object.value_type(), "running release hook");
                    hook(payload);
                }
                None => drop(payload),
            }
            drop(object);
        }
    }
}

/// Heap statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Live objects
    pub live_objects: usize,
    /// Total slots ever allocated (live + free)
    pub capacity: usize,
    /// Objects freed so far
    pub freed: u64,
}

/// The object heap
#[derive(Default)]
pub struct Heap {
    cells: Vec<Cell>,
    free: Vec<u32>,
    live: usize,
    freed: u64,
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an object with a reference count of one, owned by the caller.
    pub fn allocate(&mut self, object: HeapObject) -> ObjectRef {
        let entry = Entry {
            object,
            ref_count: 1,
            release_hook: None,
        };
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let cell = &mut self.cells[index as usize];
            cell.entry = Some(entry);
            ObjectRef::new(index, cell.generation)
        } else {
            let index = self.cells.len() as u32;
            self.cells.push(Cell {
                generation: 0,
                entry: Some(entry),
            });
            ObjectRef::new(index, 0)
        }
    }

    fn entry(&self, r: ObjectRef) -> Option<&Entry> {
        self.cells
            .get(r.index() as usize)
            .filter(|c| c.generation == r.generation())
            .and_then(|c| c.entry.as_ref())
    }

    fn entry_mut(&mut self, r: ObjectRef) -> Option<&mut Entry> {
        self.cells
            .get_mut(r.index() as usize)
            .filter(|c| c.generation == r.generation())
            .and_then(|c| c.entry.as_mut())
    }

    /// Whether `r` still refers to a live object
    pub fn contains(&self, r: ObjectRef) -> bool {
        self.entry(r).is_some()
    }

    /// Borrow a live object
    pub fn get(&self, r: ObjectRef) -> VmResult<&HeapObject> {
        self.entry(r)
            .map(|e| &e.object)
            .ok_or(VmError::StaleReference)
    }

    /// Mutably borrow a live object
    pub fn get_mut(&mut self, r: ObjectRef) -> VmResult<&mut HeapObject> {
        self.entry_mut(r)
            .map(|e| &mut e.object)
            .ok_or(VmError::StaleReference)
    }

    /// Current strong count (0 for primitives and dead references)
    pub fn ref_count(&self, value: Value) -> usize {
        match value {
            Value::Object(r) => self.entry(r).map_or(0, |e| e.ref_count as usize),
            _ => 0,
        }
    }

    /// Take one more strong reference
    pub fn add_ref(&mut self, value: Value) {
        if let Value::Object(r) = value {
            match self.entry_mut(r) {
                Some(entry) => entry.ref_count += 1,
                None => tracing::warn!(index = r.index(), "add_ref on a stale reference"),
            }
        }
    }

    /// Install (or replace) the release hook of a live object
    pub fn set_release_hook(&mut self, r: ObjectRef, hook: ReleaseHook) -> VmResult<()> {
        let entry = self.entry_mut(r).ok_or(VmError::StaleReference)?;
        entry.release_hook = Some(hook);
        Ok(())
    }

    /// Give back one strong reference.
    ///
    /// Objects reaching zero are freed along with anything only they kept
    /// alive; their finalization is queued in `grave`. Returns `false` if
    /// `value` referred to an object that was already gone.
    pub fn release(&mut self, value: Value, grave: &mut Graveyard) -> bool {
        let Value::Object(first) = value else {
            return true;
        };
        if !self.contains(first) {
            tracing::trace!(index = first.index(), "release of a stale reference ignored");
            return false;
        }

        let mut pending = vec![value];
        while let Some(v) = pending.pop() {
            let Value::Object(r) = v else {
                continue;
            };
            let Some(entry) = self.entry_mut(r) else {
                continue;
            };
            entry.ref_count = entry.ref_count.saturating_sub(1);
            if entry.ref_count == 0 {
                if let Some(mut dead) = self.free_slot(r) {
                    dead.object.drain_children(&mut pending);
                    grave.dead.push((dead.object, dead.release_hook));
                }
            }
        }
        true
    }

    fn free_slot(&mut self, r: ObjectRef) -> Option<Entry> {
        let cell = self.cells.get_mut(r.index() as usize)?;
        let entry = cell.entry.take()?;
        cell.generation = cell.generation.wrapping_add(1);
        self.free.push(r.index());
        self.live -= 1;
        self.freed += 1;
        Some(entry)
    }

    /// Free every live object regardless of its count (VM teardown).
    pub fn clear(&mut self, grave: &mut Graveyard) {
        for index in 0..self.cells.len() {
            let cell = &self.cells[index];
            if cell.entry.is_none() {
                continue;
            }
            let r = ObjectRef::new(index as u32, cell.generation);
            if let Some(mut dead) = self.free_slot(r) {
                // Children are being freed by this same sweep.
                let mut children = Vec::new();
                dead.object.drain_children(&mut children);
                grave.dead.push((dead.object, dead.release_hook));
            }
        }
    }

    /// Heap statistics
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live_objects: self.live,
            capacity: self.cells.len(),
            freed: self.freed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::TableObject;
    use std::cell::Cell as StdCell;
    use std::rc::Rc;

    fn string(heap: &mut Heap, s: &str) -> ObjectRef {
        heap.allocate(HeapObject::String(s.into()))
    }

    #[test]
    fn test_allocate_and_release() {
        let mut heap = Heap::new();
        let r = string(&mut heap, "hello");
        assert_eq!(heap.ref_count(Value::Object(r)), 1);

        let mut grave = Graveyard::default();
        assert!(heap.release(Value::Object(r), &mut grave));
        assert_eq!(grave.len(), 1);
        grave.bury();
        assert!(!heap.contains(r));
        assert_eq!(heap.stats().live_objects, 0);
    }

    #[test]
    fn test_stale_reference_after_reuse() {
        let mut heap = Heap::new();
        let old = string(&mut heap, "a");
        let mut grave = Graveyard::default();
        assert!(heap.release(Value::Object(old), &mut grave));
        grave.bury();

        let new = string(&mut heap, "b");
        assert_eq!(old.index(), new.index());
        assert_ne!(old.generation(), new.generation());
        assert!(heap.get(old).is_err());

        // Releasing the stale reference must not touch the new occupant.
        let mut grave = Graveyard::default();
        assert!(!heap.release(Value::Object(old), &mut grave));
        assert!(grave.is_empty());
        assert_eq!(heap.ref_count(Value::Object(new)), 1);
    }

    #[test]
    fn test_children_released_with_parent() {
        let mut heap = Heap::new();
        let child = string(&mut heap, "child");
        let mut table = TableObject::default();
        table.entries.insert("k".into(), Value::Object(child));
        let parent = heap.allocate(HeapObject::Table(table));

        let mut grave = Graveyard::default();
        heap.release(Value::Object(parent), &mut grave);
        assert_eq!(grave.len(), 2);
        grave.bury();
        assert!(!heap.contains(child));
    }

    #[test]
    fn test_release_hook_runs_once() {
        let mut heap = Heap::new();
        let r = string(&mut heap, "x");
        heap.add_ref(Value::Object(r));

        let calls = Rc::new(StdCell::new(0));
        let seen = calls.clone();
        heap.set_release_hook(r, Box::new(move |_| seen.set(seen.get() + 1)))
            .unwrap();

        let mut grave = Graveyard::default();
        heap.release(Value::Object(r), &mut grave);
        assert!(grave.is_empty());
        heap.release(Value::Object(r), &mut grave);
        grave.bury();
        assert_eq!(calls.get(), 1);

        let mut grave = Graveyard::default();
        heap.release(Value::Object(r), &mut grave);
        grave.bury();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_clear_frees_cycles() {
        let mut heap = Heap::new();
        let a = heap.allocate(HeapObject::Table(TableObject::default()));
        let b = heap.allocate(HeapObject::Table(TableObject::default()));
        if let HeapObject::Table(t) = heap.get_mut(a).unwrap() {
            t.entries.insert("b".into(), Value::Object(b));
        }
        if let HeapObject::Table(t) = heap.get_mut(b).unwrap() {
            t.entries.insert("a".into(), Value::Object(a));
        }
        heap.add_ref(Value::Object(a));
        heap.add_ref(Value::Object(b));

        let mut grave = Graveyard::default();
        heap.release(Value::Object(a), &mut grave);
        heap.release(Value::Object(b), &mut grave);
        assert!(grave.is_empty());
        assert_eq!(heap.stats().live_objects, 2);

        heap.clear(&mut grave);
        assert_eq!(grave.len(), 2);
        grave.bury();
        assert_eq!(heap.stats().live_objects, 0);
    }
}
