//! Opened arrays.
//!
//! An [`Array`] names a stored array by URI and, while open, pins a snapshot
//! of its fragments and metadata. Metadata written through an array opened
//! for writing is staged and applied when the array closes.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::schema::ArraySchema;
use crate::store::{MetadataValue, Snapshot, Store, StoredArray};
use crate::types::{Datatype, QueryType};

#[derive(Debug)]
struct OpenState {
    stored: Arc<StoredArray>,
    query_type: QueryType,
    timestamp: Option<u64>,
    snapshot: Snapshot,
    metadata: BTreeMap<String, MetadataValue>,
    staged: Vec<(String, Option<MetadataValue>)>,
}

/// A handle to a stored array, open or closed.
#[derive(Debug)]
pub struct Array {
    uri: String,
    state: Option<OpenState>,
}

impl Array {
    /// Creates a closed handle for `uri`.
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            state: None,
        }
    }

    /// Returns the array URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Opens the array for reading or writing.
    pub fn open(&mut self, query_type: QueryType) -> EngineResult<()> {
        self.open_with(query_type, None)
    }

    /// Opens the array as of `timestamp`, in milliseconds since the epoch.
    ///
    /// Reads see the fragments written at or before `timestamp`; writes
    /// stamp their fragments with it.
    pub fn open_at(&mut self, query_type: QueryType, timestamp: u64) -> EngineResult<()> {
        self.open_with(query_type, Some(timestamp))
    }

    fn open_with(&mut self, query_type: QueryType, timestamp: Option<u64>) -> EngineResult<()> {
        if self.state.is_some() {
            return Err(EngineError::invalid_operation(format!(
                "array {} is already open",
                self.uri
            )));
        }
        let stored = Store::global().get(&self.uri)?;
        let snapshot = stored.snapshot_at(timestamp);
        let metadata = stored.metadata();
        tracing::debug!(uri = %self.uri, mode = %query_type, ?timestamp, "opened array");
        self.state = Some(OpenState {
            stored,
            query_type,
            timestamp,
            snapshot,
            metadata,
            staged: Vec::new(),
        });
        Ok(())
    }

    /// Refreshes the snapshot of an array open for reading. An array opened
    /// at a timestamp keeps it.
    pub fn reopen(&mut self) -> EngineResult<()> {
        let state = self.state_mut()?;
        if state.query_type != QueryType::Read {
            return Err(EngineError::invalid_operation(
                "only arrays opened for reading can be reopened",
            ));
        }
        state.snapshot = state.stored.snapshot_at(state.timestamp);
        state.metadata = state.stored.metadata();
        Ok(())
    }

    /// Closes the array, applying staged metadata. Closing a closed array
    /// does nothing.
    pub fn close(&mut self) {
        if let Some(state) = self.state.take() {
            if !state.staged.is_empty() {
                state.stored.apply_metadata(state.staged);
            }
            tracing::debug!(uri = %self.uri, "closed array");
        }
    }

    /// Returns true while open.
    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    fn state(&self) -> EngineResult<&OpenState> {
        self.state.as_ref().ok_or_else(|| {
            EngineError::invalid_operation(format!("array {} is not open", self.uri))
        })
    }

    fn state_mut(&mut self) -> EngineResult<&mut OpenState> {
        let uri = &self.uri;
        self.state.as_mut().ok_or_else(|| {
            EngineError::invalid_operation(format!("array {uri} is not open"))
        })
    }

    fn require_mode(&self, mode: QueryType) -> EngineResult<&OpenState> {
        let state = self.state()?;
        if state.query_type != mode {
            return Err(EngineError::invalid_operation(format!(
                "array {} must be opened in {mode} mode",
                self.uri
            )));
        }
        Ok(state)
    }

    /// Returns the mode the array was opened in.
    pub fn query_type(&self) -> EngineResult<QueryType> {
        Ok(self.state()?.query_type)
    }

    /// Returns the timestamp the array was opened at, if any.
    pub fn timestamp(&self) -> EngineResult<Option<u64>> {
        Ok(self.state()?.timestamp)
    }

    /// Returns the schema.
    pub fn schema(&self) -> EngineResult<Arc<ArraySchema>> {
        Ok(Arc::clone(self.state()?.stored.schema()))
    }

    /// Returns the stored array.
    pub fn stored(&self) -> EngineResult<&Arc<StoredArray>> {
        Ok(&self.state()?.stored)
    }

    /// Returns the fragments visible since open or reopen.
    pub fn snapshot(&self) -> EngineResult<&Snapshot> {
        Ok(&self.state()?.snapshot)
    }

    /// Returns the populated `[lo, hi]` of dimension `dim`, or `None` if
    /// nothing was written.
    pub fn non_empty_domain(&self, dim: usize) -> EngineResult<Option<(Vec<u8>, Vec<u8>)>> {
        let state = self.require_mode(QueryType::Read)?;
        state.stored.schema().domain()?.dimension(dim)?;
        Ok(state
            .snapshot
            .non_empty_bounds(dim)
            .map(|(lo, hi)| (lo.to_vec(), hi.to_vec())))
    }

    /// Same as [`Array::non_empty_domain`] with a dimension name.
    pub fn non_empty_domain_by_name(
        &self,
        name: &str,
    ) -> EngineResult<Option<(Vec<u8>, Vec<u8>)>> {
        let dim = self
            .state()?
            .stored
            .schema()
            .domain()?
            .dimension_by_name(name)
            .map(|(i, _)| i)
            .ok_or_else(|| EngineError::field_not_found(name))?;
        self.non_empty_domain(dim)
    }

    /// Stages a metadata value.
    pub fn put_metadata(&mut self, key: &str, value: MetadataValue) -> EngineResult<()> {
        self.require_mode(QueryType::Write)?;
        if key.is_empty() {
            return Err(EngineError::invalid_argument("metadata key must not be empty"));
        }
        if value.datatype == Datatype::Any {
            return Err(EngineError::invalid_argument(
                "metadata values of type ANY are not supported",
            ));
        }
        let expected = u64::from(value.count) * value.datatype.size();
        if value.count == 0 || value.bytes.len() as u64 != expected {
            return Err(EngineError::invalid_argument(format!(
                "metadata '{key}' needs {expected} bytes for {} {} values, got {}",
                value.count,
                value.datatype,
                value.bytes.len()
            )));
        }
        self.state_mut()?.staged.push((key.to_string(), Some(value)));
        Ok(())
    }

    /// Stages a metadata deletion.
    pub fn delete_metadata(&mut self, key: &str) -> EngineResult<()> {
        self.require_mode(QueryType::Write)?;
        self.state_mut()?.staged.push((key.to_string(), None));
        Ok(())
    }

    /// Returns the value stored under `key`, if any.
    pub fn get_metadata(&self, key: &str) -> EngineResult<Option<&MetadataValue>> {
        Ok(self.require_mode(QueryType::Read)?.metadata.get(key))
    }

    /// Returns the number of metadata entries.
    pub fn metadata_num(&self) -> EngineResult<u64> {
        Ok(self.require_mode(QueryType::Read)?.metadata.len() as u64)
    }

    /// Returns the entry at `index` in key order.
    pub fn metadata_from_index(&self, index: u64) -> EngineResult<(&str, &MetadataValue)> {
        let metadata = &self.require_mode(QueryType::Read)?.metadata;
        metadata
            .iter()
            .nth(index as usize)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or(EngineError::IndexOutOfBounds {
                what: "metadata",
                index,
                count: metadata.len() as u64,
            })
    }
}

impl Drop for Array {
    fn drop(&mut self) {
        self.close();
    }
}

/// Creates an array at `uri`.
pub fn create_array(uri: &str, schema: ArraySchema) -> EngineResult<()> {
    Store::global().create(uri, schema).map(|_| ())
}
