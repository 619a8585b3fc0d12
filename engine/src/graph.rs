//! Object graph traversal and cycle detection.
//!
//! Records are nodes; a field value that holds a record, directly or inside
//! arrays and objects, is an edge.

use crate::{Record, Value};
use std::collections::HashSet;

/// Records directly reachable from `value`, descending through arrays and
/// objects but not into the records themselves.
///
/// When `count_saved` is false, records that already have an object ID are
/// skipped: they can be referenced by ID and need not be saved first.
pub fn dependent_records(value: &Value, count_saved: bool) -> Vec<Record> {
    let mut out = Vec::new();
    collect_records(value, count_saved, &mut out);
    out
}

fn collect_records(value: &Value, count_saved: bool, out: &mut Vec<Record>) {
    match value {
        Value::Record(record) => {
            if count_saved || record.is_new() {
                out.push(record.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_records(item, count_saved, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_records(item, count_saved, out);
            }
        }
        _ => {}
    }
}

/// Returns true if a path starting at `root` revisits one of its own
/// ancestors.
///
/// Only the ancestors on the current path are tracked, so a record reached
/// through two separate paths (a diamond) is not a cycle. The walk revisits
/// shared subgraphs once per path.
pub fn has_cycle(root: &Record) -> bool {
    let mut ancestors = HashSet::new();
    visit(root, &mut ancestors)
}

fn visit(record: &Record, ancestors: &mut HashSet<Record>) -> bool {
    if !ancestors.insert(record.clone()) {
        return true;
    }
    // Snapshot before recursing: the record lock is never held across the walk.
    let found = record
        .graph_values()
        .iter()
        .flat_map(|value| dependent_records(value, true))
        .any(|dep| visit(&dep, ancestors));
    ancestors.remove(record);
    found
}
