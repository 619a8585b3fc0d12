//! Record types for holding local entity state.
//!
//! A [`Record`] is a cheap, clonable handle to one remote entity. It keeps the
//! last server-confirmed fields, the operations pending since then, and the
//! estimated view (server fields with pending operations applied) that reads
//! go through.
//!
//! # Consistency
//!
//! Each record's state sits behind its own mutex. The lock is only held for
//! the duration of a single read or write and never across an await point,
//! so it protects against data races but provides no isolation: mutating a
//! record from elsewhere while a save is in flight has undefined ordering,
//! and operations added during that window are cleared by the merge of the
//! save response.

use crate::{
    error::{Error, Result},
    operation::{Applied, Operation},
    value::Number,
    Value,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Field names managed by the backend.
pub const RESERVED_KEYS: [&str; 5] = ["objectId", "createdAt", "updatedAt", "ACL", "className"];

/// Prefix reserved for internal fields.
pub const RESERVED_PREFIX: char = '_';

/// Server state for one record, as decoded from a response payload.
///
/// Only the fields present in the payload are set; save responses usually
/// carry just the object ID and a timestamp.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerState {
    pub class_name: Option<String>,
    pub object_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct RecordState {
    class_name: String,
    object_id: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    server_fields: BTreeMap<String, Value>,
    operations: BTreeMap<String, Operation>,
    estimated: BTreeMap<String, Value>,
}

/// A local handle for one remote record.
///
/// Cloning the handle does not copy the record. `==` and hashing compare
/// handle identity, which is what the save planner tracks.
#[derive(Clone)]
pub struct Record {
    inner: Arc<Mutex<RecordState>>,
}

impl Record {
    /// Create a new, unsaved record of the given class.
    pub fn new(class_name: impl Into<String>) -> Self {
        Self::from_state(RecordState {
            class_name: class_name.into(),
            ..RecordState::default()
        })
    }

    /// Create a reference to an existing remote record without fetching it.
    pub fn without_data(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self::from_state(RecordState {
            class_name: class_name.into(),
            object_id: Some(object_id.into()),
            ..RecordState::default()
        })
    }

    /// Build a clean record from server state.
    pub fn from_server(state: ServerState) -> Self {
        let record = Self::new(state.class_name.clone().unwrap_or_default());
        record.merge(state);
        record
    }

    fn from_state(state: RecordState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecordState> {
        self.inner.lock()
    }

    pub fn class_name(&self) -> String {
        self.lock().class_name.clone()
    }

    pub fn object_id(&self) -> Option<String> {
        self.lock().object_id.clone()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.lock().created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.lock().updated_at
    }

    /// A record is new until the server has assigned it an object ID.
    pub fn is_new(&self) -> bool {
        self.lock().object_id.is_none()
    }

    /// New records and records with pending operations need saving.
    pub fn is_dirty(&self) -> bool {
        let state = self.lock();
        state.object_id.is_none() || !state.operations.is_empty()
    }

    /// Read a field from the estimated view.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().estimated.get(key).cloned()
    }

    /// Field names present in the estimated view.
    pub fn keys(&self) -> Vec<String> {
        self.lock().estimated.keys().cloned().collect()
    }

    /// Snapshot of the estimated view.
    pub fn estimated(&self) -> BTreeMap<String, Value> {
        self.lock().estimated.clone()
    }

    /// Snapshot of the last server-confirmed fields.
    pub fn server_fields(&self) -> BTreeMap<String, Value> {
        self.lock().server_fields.clone()
    }

    /// Snapshot of the pending operations.
    pub fn operations(&self) -> BTreeMap<String, Operation> {
        self.lock().operations.clone()
    }

    /// Pending operation for one key.
    pub fn pending_operation(&self, key: &str) -> Option<Operation> {
        self.lock().operations.get(key).cloned()
    }

    /// Set a field.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        validate_key(key)?;
        self.apply_operation(key, Operation::Set(value.into()))
    }

    /// Remove a field.
    pub fn unset(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.apply_operation(key, Operation::Delete)
    }

    /// Atomically add `amount` to a numeric field.
    pub fn increment(&self, key: &str, amount: impl Into<Number>) -> Result<()> {
        validate_key(key)?;
        self.apply_operation(key, Operation::Increment(amount.into()))
    }

    /// Append values to an array field.
    pub fn add_to_list<I, V>(&self, key: &str, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        validate_key(key)?;
        let values = values.into_iter().map(Into::into).collect();
        self.apply_operation(key, Operation::ListAdd(values))
    }

    /// Append values to an array field, skipping those already present.
    pub fn add_unique_to_list<I, V>(&self, key: &str, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        validate_key(key)?;
        let values = values.into_iter().map(Into::into).collect();
        self.apply_operation(key, Operation::ListAddUnique(values))
    }

    /// Remove every occurrence of the values from an array field.
    pub fn remove_from_list<I, V>(&self, key: &str, values: I) -> Result<()>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        validate_key(key)?;
        let values = values.into_iter().map(Into::into).collect();
        self.apply_operation(key, Operation::ListRemove(values))
    }

    /// Add a record to a relation field.
    pub fn add_relation(&self, key: &str, target: &Record) -> Result<()> {
        validate_key(key)?;
        self.apply_operation(key, Operation::RelationAdd(vec![target.clone()]))
    }

    /// Remove a record from a relation field.
    pub fn remove_relation(&self, key: &str, target: &Record) -> Result<()> {
        validate_key(key)?;
        self.apply_operation(key, Operation::RelationRemove(vec![target.clone()]))
    }

    /// Apply `op` to the estimated view and fold it into the pending
    /// operations. Nothing is changed if either step fails.
    pub fn apply_operation(&self, key: &str, op: Operation) -> Result<()> {
        // Values are compared outside the lock: they may reference this record.
        let (current, previous) = {
            let state = self.lock();
            (
                state.estimated.get(key).cloned(),
                state.operations.get(key).cloned(),
            )
        };

        let applied = op.apply(current.as_ref(), key)?;
        let pending = match previous {
            Some(previous) => op.merge_with_previous(&previous, key)?,
            None => op,
        };

        let mut state = self.lock();
        match applied {
            Applied::Value(value) => {
                state.estimated.insert(key.to_string(), value);
            }
            Applied::Deleted => {
                state.estimated.remove(key);
            }
        }
        state.operations.insert(key.to_string(), pending);
        Ok(())
    }

    /// Merge server state into this record.
    ///
    /// The estimated view is overlaid with the payload's fields and becomes
    /// the new server state; pending operations are cleared. This is the
    /// only place operations are cleared.
    pub fn merge(&self, server: ServerState) {
        let mut state = self.lock();
        if let Some(class_name) = server.class_name {
            state.class_name = class_name;
        }
        if server.object_id.is_some() {
            state.object_id = server.object_id;
        }
        if server.created_at.is_some() {
            state.created_at = server.created_at;
        }
        if server.updated_at.is_some() {
            state.updated_at = server.updated_at;
        }

        let mut fields = std::mem::take(&mut state.estimated);
        fields.extend(server.fields);
        state.estimated = fields.clone();
        state.server_fields = fields;
        state.operations.clear();
    }

    /// Values written by pending operations. These are what a save
    /// payload encodes, so they are what the batch planner walks.
    pub fn pending_values(&self) -> Vec<Value> {
        self.lock()
            .operations
            .values()
            .flat_map(Operation::pending_values)
            .collect()
    }

    /// Every value this record points to: the estimated view plus relation
    /// targets that only exist in pending operations.
    pub fn graph_values(&self) -> Vec<Value> {
        let state = self.lock();
        let mut values: Vec<Value> = state.estimated.values().cloned().collect();
        for op in state.operations.values() {
            if let Operation::RelationAdd(adds) | Operation::RelationBatch { adds, .. } = op {
                values.extend(adds.iter().map(Value::from));
            }
        }
        values
    }

    /// True if both handles denote the same entity: the same handle, or the
    /// same class and object ID.
    pub fn same_entity(&self, other: &Record) -> bool {
        if self == other {
            return true;
        }
        let (class_a, id_a) = self.identity();
        let (class_b, id_b) = other.identity();
        id_a.is_some() && id_a == id_b && class_a == class_b
    }

    fn identity(&self) -> (String, Option<String>) {
        let state = self.lock();
        (state.class_name.clone(), state.object_id.clone())
    }

    /// Serialize the estimated view, with class, ID and timestamps, to JSON.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        crate::codec::encode_record(self)
    }

    /// Rebuild a clean record from [`Record::to_json`] output.
    pub fn parse_json(json: &str) -> Result<Record> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| Error::Codec(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::Codec("expected a JSON object".into()))?;
        let state = crate::codec::decode_server_state(object)?;
        if state.class_name.is_none() {
            return Err(Error::Codec("missing className".into()));
        }
        Ok(Record::from_server(state))
    }
}

/// Check that `key` may be written by a mutator.
pub fn validate_key(key: &str) -> Result<()> {
    let reason = if key.is_empty() {
        "empty field name"
    } else if RESERVED_KEYS.contains(&key) {
        "reserved field name"
    } else if key.starts_with(RESERVED_PREFIX) {
        "field names must not start with '_'"
    } else {
        return Ok(());
    };
    Err(Error::InvalidKey {
        key: key.to_string(),
        reason,
    })
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Record {}

impl Hash for Record {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::ptr::hash(Arc::as_ptr(&self.inner), state);
    }
}

// Fields are left out: they may point back at this record.
impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Record")
            .field("class_name", &state.class_name)
            .field("object_id", &state.object_id)
            .field("pending", &state.operations.len())
            .finish()
    }
}
