//! In-memory object storage.
//!
//! Objects are kept per `(class, objectId)` in a [`DashMap`]. Write bodies
//! use the same wire format the engine produces: plain JSON values replace a
//! field, `{"__op": ...}` objects are evaluated against the stored value.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{json, Map, Value as Json};
use std::collections::{BTreeMap, BTreeSet};
use tether_engine::codec::format_date;

/// A JSON object body.
pub type Fields = Map<String, Json>;

type ObjectKey = (String, String);

/// Fields a client may not write.
const RESERVED_KEYS: [&str; 4] = ["objectId", "createdAt", "updatedAt", "className"];

/// Storage errors, each carrying the backend error code clients see.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("object not found for {class_name}/{object_id}")]
    NotFound {
        class_name: String,
        object_id: String,
    },

    #[error("invalid key name '{0}'")]
    InvalidKey(String),

    #[error("invalid pointer in '{key}': {reason}")]
    InvalidPointer { key: String, reason: String },

    #[error("malformed request: {0}")]
    InvalidJson(String),

    #[error("invalid type for '{key}': {reason}")]
    InvalidType { key: String, reason: String },

    #[error("the save condition was not met")]
    ConditionFailed,
}

impl StoreError {
    /// Backend error code.
    pub fn code(&self) -> i64 {
        match self {
            StoreError::NotFound { .. } => 101,
            StoreError::InvalidKey(_) => 105,
            StoreError::InvalidPointer { .. } => 106,
            StoreError::InvalidJson(_) => 107,
            StoreError::InvalidType { .. } => 111,
            StoreError::ConditionFailed => 305,
        }
    }
}

type Result<T> = std::result::Result<T, StoreError>;

fn invalid_type(key: &str, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidType {
        key: key.to_string(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Default)]
struct RelationMembers {
    target_class: Option<String>,
    members: BTreeSet<String>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    fields: Fields,
    relations: BTreeMap<String, RelationMembers>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StoredObject {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            fields: Fields::new(),
            relations: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn render(&self, object_id: &str) -> Fields {
        let mut out = self.fields.clone();
        out.insert("objectId".into(), json!(object_id));
        out.insert("createdAt".into(), json!(format_date(&self.created_at)));
        out.insert("updatedAt".into(), json!(format_date(&self.updated_at)));
        out
    }

    fn apply(&mut self, body: &Fields) -> Result<()> {
        for (key, update) in body {
            if key.is_empty() || key.starts_with('_') || RESERVED_KEYS.contains(&key.as_str()) {
                return Err(StoreError::InvalidKey(key.clone()));
            }
            self.apply_field(key, update)?;
        }
        Ok(())
    }

    fn apply_field(&mut self, key: &str, update: &Json) -> Result<()> {
        let Some(op) = update
            .as_object()
            .and_then(|m| m.get("__op"))
            .and_then(Json::as_str)
        else {
            check_pointers(key, update)?;
            self.relations.remove(key);
            self.fields.insert(key.to_string(), update.clone());
            return Ok(());
        };

        match op {
            "Delete" => {
                self.fields.remove(key);
                self.relations.remove(key);
            }
            "Increment" => {
                let amount = update
                    .get("amount")
                    .filter(|a| a.is_number())
                    .ok_or_else(|| invalid_type(key, "Increment needs a numeric amount"))?;
                let sum = add_numbers(key, self.fields.get(key), amount)?;
                self.fields.insert(key.to_string(), sum);
            }
            "Add" | "AddUnique" | "Remove" => {
                let objects = objects_of(update)?;
                for value in objects {
                    check_pointers(key, value)?;
                }
                let mut list = match self.fields.get(key) {
                    None | Some(Json::Null) => Vec::new(),
                    Some(Json::Array(items)) => items.clone(),
                    Some(_) => return Err(invalid_type(key, "field is not an array")),
                };
                match op {
                    "Add" => list.extend(objects.iter().cloned()),
                    "AddUnique" => {
                        for value in objects {
                            if !list.contains(value) {
                                list.push(value.clone());
                            }
                        }
                    }
                    _ => list.retain(|item| !objects.contains(item)),
                }
                self.fields.insert(key.to_string(), Json::Array(list));
            }
            "AddRelation" | "RemoveRelation" => self.apply_relation(key, op, update)?,
            "Batch" => {
                let ops = update
                    .get("ops")
                    .and_then(Json::as_array)
                    .ok_or_else(|| StoreError::InvalidJson("Batch needs an 'ops' array".into()))?;
                for nested in ops {
                    match nested.get("__op").and_then(Json::as_str) {
                        Some(op @ ("AddRelation" | "RemoveRelation")) => {
                            self.apply_relation(key, op, nested)?
                        }
                        _ => {
                            return Err(StoreError::InvalidJson(
                                "Batch may only hold relation operations".into(),
                            ))
                        }
                    }
                }
            }
            other => return Err(StoreError::InvalidJson(format!("unknown operation '{other}'"))),
        }
        Ok(())
    }

    fn apply_relation(&mut self, key: &str, op: &str, update: &Json) -> Result<()> {
        match self.fields.get(key) {
            None | Some(Json::Null) => {}
            Some(existing) if is_type(existing, "Relation") => {}
            Some(_) => return Err(invalid_type(key, "field is not a relation")),
        }

        let relation = self.relations.entry(key.to_string()).or_default();
        for object in objects_of(update)? {
            let (class_name, object_id) = pointer_parts(key, object)?;
            match &relation.target_class {
                Some(target) if target != class_name => {
                    return Err(invalid_type(
                        key,
                        format!("relation holds {target}, got {class_name}"),
                    ))
                }
                Some(_) => {}
                None => relation.target_class = Some(class_name.to_string()),
            }
            if op == "AddRelation" {
                relation.members.insert(object_id.to_string());
            } else {
                relation.members.remove(object_id);
            }
        }

        self.fields.insert(
            key.to_string(),
            json!({ "__type": "Relation", "className": relation.target_class }),
        );
        Ok(())
    }

    fn matches(&self, object_id: &str, condition: &Fields) -> Result<bool> {
        for (key, expected) in condition {
            let is_operator = expected
                .as_object()
                .is_some_and(|m| m.keys().any(|k| k.starts_with('$')));
            if is_operator {
                return Err(StoreError::InvalidJson(
                    "only equality conditions are supported".into(),
                ));
            }
            let actual = match key.as_str() {
                "objectId" => Some(Json::String(object_id.to_string())),
                _ => self.fields.get(key).cloned(),
            };
            if actual.as_ref() != Some(expected) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn is_type(value: &Json, type_name: &str) -> bool {
    value.get("__type").and_then(Json::as_str) == Some(type_name)
}

fn objects_of(update: &Json) -> Result<&Vec<Json>> {
    update
        .get("objects")
        .and_then(Json::as_array)
        .ok_or_else(|| StoreError::InvalidJson("operation needs an 'objects' array".into()))
}

fn pointer_parts<'a>(key: &str, value: &'a Json) -> Result<(&'a str, &'a str)> {
    let invalid = |reason: &str| StoreError::InvalidPointer {
        key: key.to_string(),
        reason: reason.to_string(),
    };
    if !is_type(value, "Pointer") {
        return Err(invalid("expected a pointer"));
    }
    let class_name = value
        .get("className")
        .and_then(Json::as_str)
        .ok_or_else(|| invalid("pointer has no className"))?;
    let object_id = value
        .get("objectId")
        .and_then(Json::as_str)
        .ok_or_else(|| invalid("pointer has no objectId"))?;
    Ok((class_name, object_id))
}

/// Every pointer inside `value` must name a class and an object.
fn check_pointers(key: &str, value: &Json) -> Result<()> {
    match value {
        Json::Array(items) => items.iter().try_for_each(|item| check_pointers(key, item)),
        Json::Object(_) if is_type(value, "Pointer") => pointer_parts(key, value).map(|_| ()),
        Json::Object(map) => map.values().try_for_each(|item| check_pointers(key, item)),
        _ => Ok(()),
    }
}

fn add_numbers(key: &str, current: Option<&Json>, amount: &Json) -> Result<Json> {
    let current = match current {
        None | Some(Json::Null) => return Ok(amount.clone()),
        Some(value) if value.is_number() => value,
        Some(_) => return Err(invalid_type(key, "cannot increment a non-numeric field")),
    };
    if let (Some(a), Some(b)) = (current.as_i64(), amount.as_i64()) {
        return a
            .checked_add(b)
            .map(Json::from)
            .ok_or_else(|| invalid_type(key, "integer overflow"));
    }
    let sum = current.as_f64().unwrap_or_default() + amount.as_f64().unwrap_or_default();
    serde_json::Number::from_f64(sum)
        .map(Json::Number)
        .ok_or_else(|| invalid_type(key, "result is not a finite number"))
}

/// Thread-safe object storage shared by all handlers.
#[derive(Debug, Default)]
pub struct ObjectStore {
    objects: DashMap<ObjectKey, StoredObject>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Create an object. Returns `objectId` and `createdAt`, plus every field
    /// when `fetch_when_save` is set.
    pub fn create(&self, class_name: &str, body: &Fields, fetch_when_save: bool) -> Result<Fields> {
        let now = Utc::now();
        let mut object = StoredObject::new(now);
        object.apply(body)?;

        let object_id = uuid::Uuid::new_v4().simple().to_string();
        let mut response = if fetch_when_save {
            object.render(&object_id)
        } else {
            Fields::new()
        };
        response.insert("objectId".into(), json!(object_id));
        response.insert("createdAt".into(), json!(format_date(&now)));

        self.objects
            .insert((class_name.to_string(), object_id.clone()), object);
        tracing::debug!(class = %class_name, id = %object_id, "object created");
        Ok(response)
    }

    /// Update an object. With a `condition`, the update only happens if every
    /// listed field equals the given value.
    pub fn update(
        &self,
        class_name: &str,
        object_id: &str,
        body: &Fields,
        condition: Option<&Fields>,
        fetch_when_save: bool,
    ) -> Result<Fields> {
        let key = (class_name.to_string(), object_id.to_string());
        let mut entry = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| not_found(class_name, object_id))?;

        if let Some(condition) = condition {
            if !entry.matches(object_id, condition)? {
                return Err(StoreError::ConditionFailed);
            }
        }

        // Apply to a copy so a rejected field leaves the object untouched.
        let mut updated = StoredObject::clone(&entry);
        updated.apply(body)?;
        updated.updated_at = Utc::now();
        *entry = updated;

        let mut response = if fetch_when_save {
            entry.render(object_id)
        } else {
            Fields::new()
        };
        response.insert("objectId".into(), json!(object_id));
        response.insert("updatedAt".into(), json!(format_date(&entry.updated_at)));
        tracing::debug!(class = %class_name, id = %object_id, "object updated");
        Ok(response)
    }

    /// Every field of an object, with `objectId` and timestamps.
    pub fn get(&self, class_name: &str, object_id: &str) -> Result<Fields> {
        self.objects
            .get(&(class_name.to_string(), object_id.to_string()))
            .map(|object| object.render(object_id))
            .ok_or_else(|| not_found(class_name, object_id))
    }

    pub fn delete(&self, class_name: &str, object_id: &str) -> Result<()> {
        self.objects
            .remove(&(class_name.to_string(), object_id.to_string()))
            .ok_or_else(|| not_found(class_name, object_id))?;
        tracing::debug!(class = %class_name, id = %object_id, "object deleted");
        Ok(())
    }

    /// Object IDs currently in a relation field.
    pub fn relation_members(
        &self,
        class_name: &str,
        object_id: &str,
        key: &str,
    ) -> Result<Vec<String>> {
        let object = self
            .objects
            .get(&(class_name.to_string(), object_id.to_string()))
            .ok_or_else(|| not_found(class_name, object_id))?;
        Ok(object
            .relations
            .get(key)
            .map(|relation| relation.members.iter().cloned().collect())
            .unwrap_or_default())
    }
}

fn not_found(class_name: &str, object_id: &str) -> StoreError {
    StoreError::NotFound {
        class_name: class_name.to_string(),
        object_id: object_id.to_string(),
    }
}
