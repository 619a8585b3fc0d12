//! Save planning: grouping unsaved records into dependency-ordered waves.
//!
//! # Algorithm
//!
//! 1. Start from the values written by the roots' pending operations
//! 2. Collect the distinct unsaved records present at this level into a batch
//! 3. Descend one level: arrays and objects unwrap, unsaved records
//!    contribute the values of their own pending operations
//! 4. Repeat until nothing is left to descend into
//!
//! Batches are pushed shallow to deep, so popping yields the deepest
//! dependencies first. A record reachable at several depths lands in several
//! batches; the deepest copy saves it and later copies find it clean.

use crate::{
    error::{Error, Result},
    graph::dependent_records,
    Record, Value,
};
use std::collections::HashSet;

/// Records that can be written together in one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    records: Vec<Record>,
}

impl Batch {
    /// Create a batch, dropping duplicate handles.
    pub fn new(records: impl IntoIterator<Item = Record>) -> Self {
        let mut seen = HashSet::new();
        let records = records
            .into_iter()
            .filter(|r| seen.insert(r.clone()))
            .collect();
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, record: &Record) -> bool {
        self.records.contains(record)
    }

    /// Members that still need writing. Clean members were only part of the
    /// traversal.
    pub fn dirty_records(&self) -> Vec<Record> {
        self.records.iter().filter(|r| r.is_dirty()).cloned().collect()
    }
}

/// Batches in save order: [`WaveStack::pop`] yields the next batch to write.
#[derive(Debug, Clone, Default)]
pub struct WaveStack {
    batches: Vec<Batch>,
}

impl WaveStack {
    fn push(&mut self, batch: Batch) {
        self.batches.push(batch);
    }

    /// Take the next batch to save.
    pub fn pop(&mut self) -> Option<Batch> {
        self.batches.pop()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Plan the waves needed to save `roots`.
///
/// With `include_roots` the roots themselves form the last wave; otherwise
/// only their unsaved dependencies are planned. Fails with
/// [`Error::CircleReference`] if the unsaved records reference each other in
/// a loop, since the level walk would never end.
pub fn build_waves(roots: &[Record], include_roots: bool) -> Result<WaveStack> {
    ensure_terminates(roots)?;

    let mut stack = WaveStack::default();
    if include_roots {
        stack.push(Batch::new(roots.iter().cloned()));
    }

    let mut frontier: Vec<Value> = roots.iter().flat_map(Record::pending_values).collect();
    while !frontier.is_empty() {
        let mut next = Vec::new();
        let mut unsaved = Vec::new();
        let mut expanded: HashSet<Record> = HashSet::new();

        for value in frontier {
            match value {
                Value::Array(items) => next.extend(items),
                Value::Object(map) => next.extend(map.into_values()),
                Value::Record(record) if record.is_new() => {
                    if expanded.insert(record.clone()) {
                        next.extend(record.pending_values());
                        unsaved.push(record);
                    }
                }
                _ => {}
            }
        }

        if !unsaved.is_empty() {
            stack.push(Batch::new(unsaved));
        }
        frontier = next;
    }

    Ok(stack)
}

/// Depth-first search over the edges the level walk follows (pending values
/// of unsaved records), looking for a back edge.
fn ensure_terminates(roots: &[Record]) -> Result<()> {
    let mut on_path = HashSet::new();
    let mut finished = HashSet::new();
    for root in roots {
        for value in root.pending_values() {
            for dep in dependent_records(&value, false) {
                search(&dep, &mut on_path, &mut finished)?;
            }
        }
    }
    Ok(())
}

fn search(
    record: &Record,
    on_path: &mut HashSet<Record>,
    finished: &mut HashSet<Record>,
) -> Result<()> {
    if finished.contains(record) {
        return Ok(());
    }
    if !on_path.insert(record.clone()) {
        return Err(Error::CircleReference {
            class_name: record.class_name(),
        });
    }
    for value in record.pending_values() {
        for dep in dependent_records(&value, false) {
            search(&dep, on_path, finished)?;
        }
    }
    on_path.remove(record);
    finished.insert(record.clone());
    Ok(())
}
