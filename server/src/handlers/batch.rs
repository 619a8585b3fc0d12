//! Batch handler - runs several object requests from one call.
//!
//! Each request succeeds or fails on its own; the response lists one
//! outcome per request, in request order.

use serde::{Deserialize, Serialize};
use tether_engine::{BackendError, BatchRequest, BatchResponseItem, Method};

use crate::store::{Fields, ObjectStore, StoreError};

/// Request body for a batch call.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchBody {
    pub requests: Vec<BatchRequest>,
}

/// Run every request in order against the store.
pub fn handle_batch(
    store: &ObjectStore,
    api_version: &str,
    requests: &[BatchRequest],
) -> Vec<BatchResponseItem> {
    let items: Vec<BatchResponseItem> = requests
        .iter()
        .map(|request| match run(store, api_version, request) {
            Ok(payload) => BatchResponseItem::Success(payload),
            Err(err) => BatchResponseItem::Error(BackendError {
                code: err.code(),
                message: err.to_string(),
            }),
        })
        .collect();

    let failed = items
        .iter()
        .filter(|item| matches!(item, BatchResponseItem::Error(_)))
        .count();
    tracing::debug!(requests = items.len(), failed, "batch processed");
    items
}

fn run(
    store: &ObjectStore,
    api_version: &str,
    request: &BatchRequest,
) -> Result<Fields, StoreError> {
    let (class_name, object_id) = parse_path(api_version, &request.path)?;
    let empty = Fields::new();
    let body = request.body.as_ref().unwrap_or(&empty);

    match (request.method, object_id) {
        (Method::Post, None) => store.create(class_name, body, false),
        (Method::Put, Some(id)) => store.update(class_name, id, body, None, false),
        (Method::Get, Some(id)) => store.get(class_name, id),
        (Method::Delete, Some(id)) => store.delete(class_name, id).map(|()| Fields::new()),
        (method, _) => Err(StoreError::InvalidJson(format!(
            "{method:?} is not supported on {}",
            request.path
        ))),
    }
}

/// Split `/{version}/classes/{class}[/{id}]`.
fn parse_path<'a>(
    api_version: &str,
    path: &'a str,
) -> Result<(&'a str, Option<&'a str>), StoreError> {
    let invalid = || StoreError::InvalidJson(format!("unsupported batch path '{path}'"));
    let rest = path
        .strip_prefix('/')
        .and_then(|p| p.strip_prefix(api_version))
        .and_then(|p| p.strip_prefix("/classes/"))
        .ok_or_else(invalid)?;

    let mut segments = rest.split('/');
    let class_name = segments.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
    let object_id = segments.next().filter(|s| !s.is_empty());
    if segments.next().is_some() {
        return Err(invalid());
    }
    Ok((class_name, object_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn paths() {
        assert_eq!(parse_path("1.1", "/1.1/classes/Post"), Ok(("Post", None)));
        assert_eq!(
            parse_path("1.1", "/1.1/classes/Post/p1"),
            Ok(("Post", Some("p1")))
        );
        assert!(parse_path("1.1", "/2/classes/Post").is_err());
        assert!(parse_path("1.1", "/1.1/classes/").is_err());
        assert!(parse_path("1.1", "/1.1/classes/Post/p1/extra").is_err());
    }

    #[test]
    fn items_fail_independently() {
        let store = ObjectStore::new();
        let requests = vec![
            BatchRequest {
                method: Method::Post,
                path: "/1.1/classes/Post".into(),
                body: json!({"title": "ok"}).as_object().cloned(),
            },
            BatchRequest {
                method: Method::Put,
                path: "/1.1/classes/Post/missing".into(),
                body: None,
            },
            BatchRequest {
                method: Method::Post,
                path: "/1.1/classes/Post/p1".into(),
                body: None,
            },
        ];

        let items = handle_batch(&store, "1.1", &requests);
        assert_eq!(items.len(), 3);
        assert!(matches!(&items[0], BatchResponseItem::Success(p) if p.contains_key("objectId")));
        assert!(matches!(&items[1], BatchResponseItem::Error(e) if e.code == 101));
        assert!(matches!(&items[2], BatchResponseItem::Error(e) if e.code == 107));
        assert_eq!(store.len(), 1);
    }
}
