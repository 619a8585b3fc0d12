//! Save orchestration.
//!
//! A [`Session`] owns a [`Transport`] and drives saves:
//!
//! 1. Reject graphs with a circular reference before any I/O
//! 2. Plan the unsaved dependencies into waves ([`build_waves`])
//! 3. Write the waves one batch request at a time, deepest first
//! 4. For [`Session::save`], write the root itself with a direct request
//!
//! Every wave is awaited before the next one is encoded, so by the time a
//! record is encoded all of its dependencies have object IDs to point at.

use crate::{
    batch::{build_waves, WaveStack},
    codec::{self, MALFORMED_RESPONSE},
    error::{Error, ItemError, Result},
    graph::has_cycle,
    record::ServerState,
    transport::{BatchRequest, BatchResponseItem, Method, SaveOptions, Transport},
    Record,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// API version prefix used in batch paths (`/1.1/classes/...`)
    pub api_version: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_version: "1.1".to_string(),
        }
    }
}

/// Stops a running save before its next network call.
///
/// A token belongs to the call it is passed to; clones share the same flag,
/// so one can be handed to another task and tripped from there.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Entry point for persisting records through a [`Transport`].
#[derive(Debug)]
pub struct Session<T> {
    transport: T,
    config: SessionConfig,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    pub fn with_config(transport: T, config: SessionConfig) -> Self {
        Self { transport, config }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Save `record` and every unsaved record it references.
    pub async fn save(&self, record: &Record) -> Result<()> {
        self.save_with(record, &SaveOptions::default()).await
    }

    /// Save `record`, passing `options` to the final direct request.
    ///
    /// Dependencies are written first in batches; the root is always written
    /// with its own create or update request, even when it is clean.
    pub async fn save_with(&self, record: &Record, options: &SaveOptions) -> Result<()> {
        self.save_with_cancel(record, options, &CancelToken::new())
            .await
    }

    /// Like [`Session::save_with`], stopping before the next request once
    /// `cancel` is tripped.
    ///
    /// Records written before cancellation keep their new IDs.
    pub async fn save_with_cancel(
        &self,
        record: &Record,
        options: &SaveOptions,
        cancel: &CancelToken,
    ) -> Result<()> {
        reject_cycles(std::slice::from_ref(record))?;

        let waves = build_waves(std::slice::from_ref(record), false)?;
        self.execute_waves(waves, cancel).await?;

        cancel.checkpoint()?;
        let class_name = record.class_name();
        let payload = codec::encode_operations(&record.operations())?;
        let response = match record.object_id() {
            None => {
                debug!(class = %class_name, "creating record");
                self.transport
                    .create(&class_name, payload, options)
                    .await?
            }
            Some(id) => {
                debug!(class = %class_name, id = %id, "updating record");
                self.transport
                    .update(&class_name, &id, payload, options)
                    .await?
            }
        };
        record.merge(codec::decode_server_state(&response)?);
        Ok(())
    }

    /// Save several records and their unsaved dependencies.
    ///
    /// The records themselves are written in the final batch.
    pub async fn save_all(&self, records: &[Record]) -> Result<()> {
        self.save_all_with_cancel(records, &CancelToken::new())
            .await
    }

    /// Like [`Session::save_all`], stopping between batches once `cancel` is
    /// tripped.
    pub async fn save_all_with_cancel(
        &self,
        records: &[Record],
        cancel: &CancelToken,
    ) -> Result<()> {
        reject_cycles(records)?;
        let waves = build_waves(records, true)?;
        self.execute_waves(waves, cancel).await
    }

    /// Write planned waves, deepest first.
    ///
    /// Successful items are merged even when siblings fail; the failures are
    /// reported together once the batch is processed, and later waves are not
    /// written.
    pub async fn execute_waves(&self, mut waves: WaveStack, cancel: &CancelToken) -> Result<()> {
        let total = waves.len();
        let mut wave = 0;
        while let Some(batch) = waves.pop() {
            wave += 1;
            cancel.checkpoint()?;

            let dirty = batch.dirty_records();
            if dirty.is_empty() {
                debug!(wave, total, "wave is clean, skipping");
                continue;
            }

            let requests = dirty
                .iter()
                .map(|record| self.save_request(record))
                .collect::<Result<Vec<_>>>()?;
            debug!(wave, total, requests = requests.len(), "sending batch");

            let responses = self.transport.batch(requests).await?;
            let failures = merge_responses(&dirty, responses)?;
            if !failures.is_empty() {
                warn!(wave, failed = failures.len(), "batch had rejected writes");
                return Err(Error::PerItemBatchFailure(failures));
            }
        }
        Ok(())
    }

    /// Fetch the latest server state of `record` and merge it.
    pub async fn fetch(&self, record: &Record) -> Result<()> {
        let class_name = record.class_name();
        let id = record
            .object_id()
            .ok_or_else(|| Error::MissingObjectId {
                class_name: class_name.clone(),
            })?;
        let payload = self.transport.fetch(&class_name, &id).await?;
        record.merge(codec::decode_server_state(&payload)?);
        Ok(())
    }

    /// Fetch several records in one batch request.
    pub async fn fetch_all(&self, records: &[Record]) -> Result<()> {
        let records = distinct(records);
        let mut requests = Vec::with_capacity(records.len());
        for record in &records {
            let class_name = record.class_name();
            let id = record
                .object_id()
                .ok_or(Error::MissingObjectId {
                    class_name: class_name.clone(),
                })?;
            requests.push(BatchRequest {
                method: Method::Get,
                path: self.object_path(&class_name, &id),
                body: None,
            });
        }
        if requests.is_empty() {
            return Ok(());
        }

        let responses = self.transport.batch(requests).await?;
        let failures = merge_responses(&records, responses)?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::PerItemBatchFailure(failures))
        }
    }

    /// Delete `record` on the backend. Unsaved records are left alone.
    pub async fn delete(&self, record: &Record) -> Result<()> {
        let Some(id) = record.object_id() else {
            return Ok(());
        };
        let class_name = record.class_name();
        debug!(class = %class_name, id = %id, "deleting record");
        self.transport.delete(&class_name, &id).await
    }

    /// Delete the saved members of `records` in one batch request.
    pub async fn delete_all(&self, records: &[Record]) -> Result<()> {
        let saved: Vec<(Record, String)> = distinct(records)
            .into_iter()
            .filter_map(|record| record.object_id().map(|id| (record, id)))
            .collect();
        if saved.is_empty() {
            return Ok(());
        }

        let requests = saved
            .iter()
            .map(|(record, id)| BatchRequest {
                method: Method::Delete,
                path: self.object_path(&record.class_name(), id),
                body: None,
            })
            .collect::<Vec<_>>();

        let responses = self.transport.batch(requests).await?;
        check_len(saved.len(), responses.len())?;

        let failures: Vec<ItemError> = saved
            .iter()
            .zip(responses)
            .filter_map(|((record, id), response)| match response {
                BatchResponseItem::Success(_) => None,
                BatchResponseItem::Error(err) => Some(ItemError {
                    class_name: record.class_name(),
                    object_id: Some(id.clone()),
                    code: err.code,
                    message: err.message,
                }),
            })
            .collect();
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::PerItemBatchFailure(failures))
        }
    }

    fn save_request(&self, record: &Record) -> Result<BatchRequest> {
        let class_name = record.class_name();
        let body = codec::encode_operations(&record.operations())?;
        let (method, path) = match record.object_id() {
            None => (Method::Post, self.class_path(&class_name)),
            Some(id) => (Method::Put, self.object_path(&class_name, &id)),
        };
        Ok(BatchRequest {
            method,
            path,
            body: Some(body),
        })
    }

    fn class_path(&self, class_name: &str) -> String {
        format!("/{}/classes/{}", self.config.api_version, class_name)
    }

    fn object_path(&self, class_name: &str, object_id: &str) -> String {
        format!("{}/{}", self.class_path(class_name), object_id)
    }
}

fn reject_cycles(records: &[Record]) -> Result<()> {
    for record in records {
        if has_cycle(record) {
            let class_name = record.class_name();
            warn!(class = %class_name, "refusing to save a circular graph");
            return Err(Error::CircleReference { class_name });
        }
    }
    Ok(())
}

fn distinct(records: &[Record]) -> Vec<Record> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert((*r).clone()))
        .cloned()
        .collect()
}

fn check_len(sent: usize, received: usize) -> Result<()> {
    if sent == received {
        Ok(())
    } else {
        Err(Error::Transport {
            code: Some(MALFORMED_RESPONSE),
            message: format!("batch of {sent} request(s) got {received} response(s)"),
        })
    }
}

/// Merge successful batch items into their records, returning the items the
/// backend rejected.
///
/// A success whose body cannot be decoded is reported with
/// `MALFORMED_RESPONSE`. The write did happen, so any `objectId` in the body
/// is still merged and a retry updates that object instead of creating a
/// second one.
fn merge_responses(
    records: &[Record],
    responses: Vec<BatchResponseItem>,
) -> Result<Vec<ItemError>> {
    check_len(records.len(), responses.len())?;

    let mut failures = Vec::new();
    for (record, response) in records.iter().zip(responses) {
        let rejected = |code: i64, message: String| ItemError {
            class_name: record.class_name(),
            object_id: record.object_id(),
            code,
            message,
        };
        match response {
            BatchResponseItem::Success(payload) => match codec::decode_server_state(&payload) {
                Ok(state) => record.merge(state),
                Err(err) => {
                    if let Some(id) = payload.get("objectId").and_then(|id| id.as_str()) {
                        record.merge(ServerState {
                            object_id: Some(id.to_string()),
                            ..ServerState::default()
                        });
                    }
                    failures.push(rejected(MALFORMED_RESPONSE, err.to_string()));
                }
            },
            BatchResponseItem::Error(err) => {
                warn!(
                    class = %record.class_name(),
                    code = err.code,
                    message = %err.message,
                    "write rejected"
                );
                failures.push(rejected(err.code, err.message));
            }
        }
    }
    Ok(failures)
}
