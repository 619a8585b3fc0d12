//! Operation types for expressing field changes.
//!
//! Changes to a record are expressed as operations, not direct mutations.
//! Each operation knows how to apply itself to the current value of a field
//! and how to fold itself onto the operation already pending for that field,
//! so a record carries at most one pending operation per key.

use crate::{
    error::{Error, Result},
    value::{Number, Relation},
    Record, Value,
};

/// A pending mutation of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Replace the field value
    Set(Value),
    /// Remove the field
    Delete,
    /// Add to a numeric field
    Increment(Number),
    /// Append to an array field
    ListAdd(Vec<Value>),
    /// Append values not already present in an array field
    ListAddUnique(Vec<Value>),
    /// Remove every occurrence of the values from an array field
    ListRemove(Vec<Value>),
    /// Add records to a relation
    RelationAdd(Vec<Record>),
    /// Remove records from a relation
    RelationRemove(Vec<Record>),
    /// Relation adds and removes that did not cancel out when merged
    RelationBatch {
        adds: Vec<Record>,
        removes: Vec<Record>,
    },
}

/// Outcome of applying an operation to a field.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// The field now holds this value
    Value(Value),
    /// The field is removed
    Deleted,
}

impl Operation {
    /// Name of the operation, as used on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Set(_) => "Set",
            Operation::Delete => "Delete",
            Operation::Increment(_) => "Increment",
            Operation::ListAdd(_) => "Add",
            Operation::ListAddUnique(_) => "AddUnique",
            Operation::ListRemove(_) => "Remove",
            Operation::RelationAdd(_) => "AddRelation",
            Operation::RelationRemove(_) => "RemoveRelation",
            Operation::RelationBatch { .. } => "Batch",
        }
    }

    fn is_relation(&self) -> bool {
        matches!(
            self,
            Operation::RelationAdd(_)
                | Operation::RelationRemove(_)
                | Operation::RelationBatch { .. }
        )
    }

    /// Apply this operation to the current value of `key`.
    pub fn apply(&self, old: Option<&Value>, key: &str) -> Result<Applied> {
        let old = old.filter(|v| !v.is_null());
        let value = match self {
            Operation::Set(value) => value.clone(),
            Operation::Delete => return Ok(Applied::Deleted),
            Operation::Increment(amount) => match old {
                None => Value::from(*amount),
                Some(current) => {
                    let current = current.as_number().ok_or_else(|| {
                        Error::invalid_operand(
                            key,
                            format!("cannot increment a {}", current.type_name()),
                        )
                    })?;
                    let sum = current
                        .checked_add(*amount)
                        .ok_or_else(|| Error::invalid_operand(key, "integer overflow"))?;
                    Value::from(sum)
                }
            },
            Operation::ListAdd(values) => {
                let mut list = list_of(old, key)?;
                list.extend(values.iter().cloned());
                Value::Array(list)
            }
            Operation::ListAddUnique(values) => {
                let mut list = list_of(old, key)?;
                for value in values {
                    if !list.contains(value) {
                        list.push(value.clone());
                    }
                }
                Value::Array(list)
            }
            Operation::ListRemove(values) => {
                let mut list = list_of(old, key)?;
                list.retain(|item| !values.contains(item));
                Value::Array(list)
            }
            Operation::RelationAdd(targets)
            | Operation::RelationRemove(targets)
            | Operation::RelationBatch { adds: targets, .. } => {
                let mut relation = match old {
                    None => Relation::default(),
                    Some(Value::Relation(relation)) => relation.clone(),
                    Some(other) => {
                        return Err(Error::invalid_operand(
                            key,
                            format!("cannot apply a relation change to a {}", other.type_name()),
                        ))
                    }
                };
                if relation.target_class.is_none() {
                    relation.target_class = self.relation_class(targets);
                }
                Value::Relation(relation)
            }
        };
        Ok(Applied::Value(value))
    }

    fn relation_class(&self, targets: &[Record]) -> Option<String> {
        match self {
            Operation::RelationBatch { adds, removes } => adds
                .first()
                .or_else(|| removes.first())
                .map(Record::class_name),
            _ => targets.first().map(Record::class_name),
        }
    }

    /// Fold this operation onto the one already pending for `key`.
    ///
    /// The result is equivalent to applying `previous` and then `self`.
    /// Pairs that cannot be expressed as a single operation are rejected.
    pub fn merge_with_previous(self, previous: &Operation, key: &str) -> Result<Operation> {
        match (self, previous) {
            (op @ Operation::Set(_), _) => Ok(op),
            (Operation::Delete, _) => Ok(Operation::Delete),
            (op, Operation::Set(_) | Operation::Delete) if op.is_relation() => Err(
                Error::invalid_operand(key, "a relation cannot be changed after it was set or unset"),
            ),
            (op, Operation::Set(value)) => Ok(Operation::Set(op.apply_as_value(Some(value), key)?)),
            (op, Operation::Delete) => Ok(Operation::Set(op.apply_as_value(None, key)?)),
            (Operation::Increment(amount), Operation::Increment(prev)) => prev
                .checked_add(amount)
                .map(Operation::Increment)
                .ok_or_else(|| Error::invalid_operand(key, "integer overflow")),
            (
                Operation::ListAdd(values),
                Operation::ListAdd(prev) | Operation::ListAddUnique(prev),
            ) => {
                let mut merged = prev.clone();
                merged.extend(values);
                Ok(Operation::ListAdd(merged))
            }
            (Operation::ListAddUnique(values), Operation::ListAddUnique(prev)) => {
                Ok(Operation::ListAddUnique(dedup(prev.iter().cloned().chain(values))))
            }
            (Operation::ListRemove(values), Operation::ListRemove(prev)) => {
                Ok(Operation::ListRemove(dedup(prev.iter().cloned().chain(values))))
            }
            (op, prev) if op.is_relation() && prev.is_relation() => {
                let (prev_adds, prev_removes) = prev.relation_parts();
                let (adds, removes) = op.relation_parts();
                Ok(relation_op(merge_relation(
                    (prev_adds, prev_removes),
                    (adds, removes),
                )))
            }
            (op, prev) => Err(Error::invalid_operand(
                key,
                format!("cannot merge {} after {}", op.name(), prev.name()),
            )),
        }
    }

    fn apply_as_value(&self, old: Option<&Value>, key: &str) -> Result<Value> {
        match self.apply(old, key)? {
            Applied::Value(value) => Ok(value),
            Applied::Deleted => Ok(Value::Null),
        }
    }

    fn relation_parts(&self) -> (&[Record], &[Record]) {
        let none: &[Record] = &[];
        match self {
            Operation::RelationAdd(adds) => (adds.as_slice(), none),
            Operation::RelationRemove(removes) => (none, removes.as_slice()),
            Operation::RelationBatch { adds, removes } => (adds.as_slice(), removes.as_slice()),
            _ => (none, none),
        }
    }

    /// Values this operation would write, used to discover records that
    /// must be saved before the operation can be encoded.
    pub fn pending_values(&self) -> Vec<Value> {
        match self {
            Operation::Set(value) => vec![value.clone()],
            Operation::ListAdd(values) | Operation::ListAddUnique(values) => values.clone(),
            Operation::RelationAdd(adds) | Operation::RelationBatch { adds, .. } => {
                adds.iter().map(Value::from).collect()
            }
            Operation::Delete
            | Operation::Increment(_)
            | Operation::ListRemove(_)
            | Operation::RelationRemove(_) => Vec::new(),
        }
    }
}

fn list_of(old: Option<&Value>, key: &str) -> Result<Vec<Value>> {
    match old {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(other) => Err(Error::invalid_operand(
            key,
            format!("expected an array, got {}", other.type_name()),
        )),
    }
}

fn dedup(values: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

fn contains_entity(records: &[Record], target: &Record) -> bool {
    records.iter().any(|r| r.same_entity(target))
}

fn union_entities<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<Record> {
    let mut out: Vec<Record> = Vec::new();
    for record in records {
        if !contains_entity(&out, record) {
            out.push(record.clone());
        }
    }
    out
}

/// An add cancels a pending remove of the same target and vice versa.
fn merge_relation(
    (prev_adds, prev_removes): (&[Record], &[Record]),
    (adds, removes): (&[Record], &[Record]),
) -> (Vec<Record>, Vec<Record>) {
    let merged_adds = union_entities(
        prev_adds
            .iter()
            .filter(|r| !contains_entity(removes, r))
            .chain(adds),
    );
    let merged_removes = union_entities(
        prev_removes
            .iter()
            .filter(|r| !contains_entity(adds, r))
            .chain(removes),
    );
    (merged_adds, merged_removes)
}

fn relation_op((adds, removes): (Vec<Record>, Vec<Record>)) -> Operation {
    match (adds.is_empty(), removes.is_empty()) {
        (_, true) => Operation::RelationAdd(adds),
        (true, false) => Operation::RelationRemove(removes),
        (false, false) => Operation::RelationBatch { adds, removes },
    }
}
