//! Object handlers - create, read, update and delete single objects.

use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::store::{Fields, ObjectStore};

/// Query parameters accepted by write requests.
#[derive(Debug, Default, Deserialize)]
pub struct SaveQuery {
    /// Return every field of the object after the write
    #[serde(rename = "fetchWhenSave", default)]
    pub fetch_when_save: bool,
    /// JSON object of field values the stored object must match
    #[serde(rename = "where")]
    pub condition: Option<String>,
}

impl SaveQuery {
    fn condition(&self) -> Result<Option<Fields>> {
        let Some(raw) = &self.condition else {
            return Ok(None);
        };
        match serde_json::from_str(raw) {
            Ok(serde_json::Value::Object(condition)) => Ok(Some(condition)),
            Ok(_) => Err(AppError::BadRequest("'where' must be a JSON object".into())),
            Err(e) => Err(AppError::BadRequest(format!("invalid 'where': {e}"))),
        }
    }
}

/// Create an object of `class_name`.
pub fn handle_create(
    store: &ObjectStore,
    class_name: &str,
    body: &Fields,
    query: &SaveQuery,
) -> Result<Fields> {
    Ok(store.create(class_name, body, query.fetch_when_save)?)
}

/// Update an existing object, honoring the `where` condition.
pub fn handle_update(
    store: &ObjectStore,
    class_name: &str,
    object_id: &str,
    body: &Fields,
    query: &SaveQuery,
) -> Result<Fields> {
    let condition = query.condition()?;
    Ok(store.update(
        class_name,
        object_id,
        body,
        condition.as_ref(),
        query.fetch_when_save,
    )?)
}

/// Read one object.
pub fn handle_get(store: &ObjectStore, class_name: &str, object_id: &str) -> Result<Fields> {
    Ok(store.get(class_name, object_id)?)
}

/// Delete one object.
pub fn handle_delete(store: &ObjectStore, class_name: &str, object_id: &str) -> Result<()> {
    Ok(store.delete(class_name, object_id)?)
}
