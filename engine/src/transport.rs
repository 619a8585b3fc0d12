//! Transport layer abstraction for talking to the backend.
//!
//! The engine performs no I/O itself. A [`Transport`] carries encoded
//! payloads to the backend and returns decoded JSON responses; HTTP, a test
//! stub or anything else can sit behind it.

use crate::{
    codec::{self, Payload},
    error::{Error, Result},
};
use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;

/// HTTP method of a batched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// One request inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub method: Method,
    /// Absolute path, including the API version (`/1.1/classes/Post`)
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Payload>,
}

/// An error reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendError {
    pub code: i64,
    #[serde(alias = "error")]
    pub message: String,
}

/// Outcome of one batched request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchResponseItem {
    Success(Payload),
    Error(BackendError),
}

/// Options forwarded untouched to a direct save request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SaveOptions {
    /// Ask the backend to return every field after saving
    pub fetch_when_save: bool,
    /// Only save if the stored record matches this query condition
    pub condition: Option<Json>,
}

impl SaveOptions {
    pub fn fetch_when_save(mut self) -> Self {
        self.fetch_when_save = true;
        self
    }

    pub fn with_condition(mut self, condition: Json) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Query parameters for the save request.
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if self.fetch_when_save {
            params.push(("fetchWhenSave".to_string(), "true".to_string()));
        }
        if let Some(condition) = &self.condition {
            params.push(("where".to_string(), condition.to_string()));
        }
        params
    }
}

/// Backend operations the engine relies on.
///
/// Failures of the call itself are reported as [`Error::Transport`];
/// per-item rejections inside a batch are returned as
/// [`BatchResponseItem::Error`].
pub trait Transport: Send + Sync {
    /// Create a record, returning the server's response body.
    fn create(
        &self,
        class_name: &str,
        payload: Payload,
        options: &SaveOptions,
    ) -> impl Future<Output = Result<Payload>> + Send;

    /// Update an existing record.
    fn update(
        &self,
        class_name: &str,
        object_id: &str,
        payload: Payload,
        options: &SaveOptions,
    ) -> impl Future<Output = Result<Payload>> + Send;

    /// Fetch one record.
    fn fetch(&self, class_name: &str, object_id: &str)
        -> impl Future<Output = Result<Payload>> + Send;

    /// Delete one record.
    fn delete(&self, class_name: &str, object_id: &str) -> impl Future<Output = Result<()>> + Send;

    /// Submit several independent requests at once. The response has one
    /// item per request, in request order.
    fn batch(
        &self,
        requests: Vec<BatchRequest>,
    ) -> impl Future<Output = Result<Vec<BatchResponseItem>>> + Send;
}

/// A call observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create {
        class_name: String,
        payload: Payload,
        options: SaveOptions,
    },
    Update {
        class_name: String,
        object_id: String,
        payload: Payload,
        options: SaveOptions,
    },
    Fetch {
        class_name: String,
        object_id: String,
    },
    Delete {
        class_name: String,
        object_id: String,
    },
    Batch(Vec<BatchRequest>),
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<Call>,
    next_id: u64,
    objects: BTreeMap<(String, String), Payload>,
    rejected_classes: HashSet<String>,
    offline: bool,
}

/// An in-memory transport for tests.
///
/// Records every call, assigns sequential object IDs (`"<class>-<n>"`),
/// remembers plain field values so records can be fetched back, and can be
/// told to reject writes for a class or to fail every call.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Reject batched and direct writes of this class with a backend error.
    pub fn reject_class(&self, class_name: &str) {
        self.state
            .lock()
            .rejected_classes
            .insert(class_name.to_string());
    }

    /// Make every subsequent call fail at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Store a record as if it already existed on the backend.
    pub fn insert(&self, class_name: &str, object_id: &str, fields: Payload) {
        self.state
            .lock()
            .objects
            .insert((class_name.to_string(), object_id.to_string()), fields);
    }

    /// Fields stored for a record, if any.
    pub fn stored(&self, class_name: &str, object_id: &str) -> Option<Payload> {
        self.state
            .lock()
            .objects
            .get(&(class_name.to_string(), object_id.to_string()))
            .cloned()
    }

    fn record_call(&self, call: Call) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(call);
        if state.offline {
            return Err(Error::transport("mock transport is offline"));
        }
        Ok(())
    }

    fn write(
        state: &mut MockState,
        class_name: &str,
        object_id: Option<&str>,
        payload: &Payload,
        fetch_when_save: bool,
    ) -> std::result::Result<Payload, BackendError> {
        if state.rejected_classes.contains(class_name) {
            return Err(BackendError {
                code: 142,
                message: format!("writes to {class_name} are rejected"),
            });
        }
        let now = Json::String(codec::format_date(&Utc::now()));
        let (object_id, stamp) = match object_id {
            Some(id) => {
                let key = (class_name.to_string(), id.to_string());
                if !state.objects.contains_key(&key) {
                    return Err(BackendError {
                        code: 101,
                        message: format!("{class_name}/{id} not found"),
                    });
                }
                (id.to_string(), "updatedAt")
            }
            None => {
                state.next_id += 1;
                (format!("{class_name}-{}", state.next_id), "createdAt")
            }
        };

        let stored = state
            .objects
            .entry((class_name.to_string(), object_id.clone()))
            .or_default();
        for (key, value) in payload {
            // Operations are not evaluated; only plain values are kept.
            let is_op = value.as_object().is_some_and(|m| m.contains_key("__op"));
            if !is_op {
                stored.insert(key.clone(), value.clone());
            }
        }

        let mut response = if fetch_when_save {
            stored.clone()
        } else {
            Payload::new()
        };
        response.insert("objectId".into(), Json::String(object_id));
        response.insert(stamp.into(), now);
        Ok(response)
    }
}

fn parse_path(path: &str) -> Option<(String, Option<String>)> {
    let mut parts = path.trim_start_matches('/').split('/');
    let _version = parts.next()?;
    if parts.next()? != "classes" {
        return None;
    }
    let class_name = parts.next()?.to_string();
    let object_id = parts.next().map(String::from);
    Some((class_name, object_id))
}

impl Transport for MockTransport {
    async fn create(
        &self,
        class_name: &str,
        payload: Payload,
        options: &SaveOptions,
    ) -> Result<Payload> {
        self.record_call(Call::Create {
            class_name: class_name.to_string(),
            payload: payload.clone(),
            options: options.clone(),
        })?;
        let mut state = self.state.lock();
        Self::write(&mut state, class_name, None, &payload, options.fetch_when_save).map_err(|e| {
            Error::Transport {
                code: Some(e.code),
                message: e.message,
            }
        })
    }

    async fn update(
        &self,
        class_name: &str,
        object_id: &str,
        payload: Payload,
        options: &SaveOptions,
    ) -> Result<Payload> {
        self.record_call(Call::Update {
            class_name: class_name.to_string(),
            object_id: object_id.to_string(),
            payload: payload.clone(),
            options: options.clone(),
        })?;
        let mut state = self.state.lock();
        Self::write(
            &mut state,
            class_name,
            Some(object_id),
            &payload,
            options.fetch_when_save,
        )
        .map_err(|e| Error::Transport {
            code: Some(e.code),
            message: e.message,
        })
    }

    async fn fetch(&self, class_name: &str, object_id: &str) -> Result<Payload> {
        self.record_call(Call::Fetch {
            class_name: class_name.to_string(),
            object_id: object_id.to_string(),
        })?;
        let mut found = self.stored(class_name, object_id).ok_or(Error::Transport {
            code: Some(101),
            message: format!("{class_name}/{object_id} not found"),
        })?;
        found.insert("objectId".into(), json!(object_id));
        Ok(found)
    }

    async fn delete(&self, class_name: &str, object_id: &str) -> Result<()> {
        self.record_call(Call::Delete {
            class_name: class_name.to_string(),
            object_id: object_id.to_string(),
        })?;
        self.state
            .lock()
            .objects
            .remove(&(class_name.to_string(), object_id.to_string()));
        Ok(())
    }

    async fn batch(&self, requests: Vec<BatchRequest>) -> Result<Vec<BatchResponseItem>> {
        self.record_call(Call::Batch(requests.clone()))?;
        let mut state = self.state.lock();
        let items = requests
            .iter()
            .map(|request| {
                let Some((class_name, object_id)) = parse_path(&request.path) else {
                    return BatchResponseItem::Error(BackendError {
                        code: 107,
                        message: format!("bad path {}", request.path),
                    });
                };
                let body = request.body.clone().unwrap_or_default();
                let result = match (request.method, object_id.as_deref()) {
                    (Method::Post, None) => {
                        Self::write(&mut state, &class_name, None, &body, false)
                    }
                    (Method::Put, Some(id)) => {
                        Self::write(&mut state, &class_name, Some(id), &body, false)
                    }
                    (Method::Get, Some(id)) => state
                        .objects
                        .get(&(class_name.clone(), id.to_string()))
                        .cloned()
                        .map(|mut found| {
                            found.insert("objectId".into(), json!(id));
                            found
                        })
                        .ok_or(BackendError {
                            code: 101,
                            message: format!("{class_name}/{id} not found"),
                        }),
                    (Method::Delete, Some(id)) => {
                        if state.rejected_classes.contains(&class_name) {
                            Err(BackendError {
                                code: 142,
                                message: format!("writes to {class_name} are rejected"),
                            })
                        } else {
                            state.objects.remove(&(class_name.clone(), id.to_string()));
                            Ok(Payload::new())
                        }
                    }
                    _ => Err(BackendError {
                        code: 107,
                        message: format!("unsupported {:?} {}", request.method, request.path),
                    }),
                };
                match result {
                    Ok(payload) => BatchResponseItem::Success(payload),
                    Err(err) => BatchResponseItem::Error(err),
                }
            })
            .collect();
        Ok(items)
    }
}
