//! Process-wide array storage.
//!
//! Arrays live in memory for the lifetime of the process, keyed by URI.
//! Each successful write commits an immutable [`Fragment`]; readers work on
//! a [`Snapshot`] of the fragments committed when their array was opened.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::scalar::Scalar;
use crate::schema::ArraySchema;
use crate::stats;
use crate::types::Datatype;

/// One attribute value of a cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellValue {
    /// Encoded values.
    pub bytes: Vec<u8>,
    /// Validity; always true for non-nullable attributes.
    pub valid: bool,
}

/// A written cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// Decoded coordinates, one per dimension.
    pub key: Vec<Scalar>,
    /// Encoded coordinates, one per dimension.
    pub coords: Vec<Vec<u8>>,
    /// Values, one per attribute in schema order.
    pub values: Vec<CellValue>,
}

/// A dimension label value written for one coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelValue {
    /// Index of the label in the schema.
    pub label: usize,
    /// Encoded coordinate on the labelled dimension.
    pub coord: Vec<u8>,
    /// Encoded label value.
    pub bytes: Vec<u8>,
}

/// Everything one write commits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FragmentData {
    /// Written cells.
    pub cells: Vec<Cell>,
    /// Written dimension label values.
    pub labels: Vec<LabelValue>,
}

/// An immutable batch of cells from one write.
#[derive(Debug)]
pub struct Fragment {
    id: Uuid,
    seq: u64,
    timestamp: u64,
    cells: Vec<Cell>,
    labels: Vec<LabelValue>,
}

impl Fragment {
    /// Returns the fragment's unique id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the commit sequence number; later fragments win.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Returns the write timestamp, in milliseconds since the epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Returns the fragment's cells.
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Returns the dimension label values the fragment wrote.
    pub fn labels(&self) -> &[LabelValue] {
        &self.labels
    }

    /// Returns the fragment's URI under the array at `array_uri`.
    ///
    /// The name records the fragment's timestamp range (start and end are
    /// equal for a single write) and its id.
    pub fn uri(&self, array_uri: &str) -> String {
        let t = self.timestamp;
        format!(
            "{}/__fragments/__{t}_{t}_{}",
            array_uri.trim_end_matches('/'),
            self.id.simple()
        )
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// A typed metadata value.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataValue {
    /// Datatype of the values.
    pub datatype: Datatype,
    /// Number of values.
    pub count: u32,
    /// Encoded values.
    pub bytes: Vec<u8>,
}

/// The fragments visible to one opened array.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    fragments: Vec<Arc<Fragment>>,
}

impl Snapshot {
    /// Returns the visible fragments in commit order.
    pub fn fragments(&self) -> &[Arc<Fragment>] {
        &self.fragments
    }

    /// Merges all fragments, later writes replacing earlier ones.
    pub fn merged(&self) -> BTreeMap<&[Scalar], &Cell> {
        let mut cells = BTreeMap::new();
        for fragment in &self.fragments {
            for cell in fragment.cells() {
                cells.insert(cell.key.as_slice(), cell);
            }
        }
        cells
    }

    /// Returns the latest value of every coordinate of dimension label
    /// `label`, keyed by encoded coordinate.
    pub fn label_values(&self, label: usize) -> HashMap<&[u8], &[u8]> {
        let mut values = HashMap::new();
        for fragment in &self.fragments {
            for value in fragment.labels.iter().filter(|v| v.label == label) {
                values.insert(value.coord.as_slice(), value.bytes.as_slice());
            }
        }
        values
    }

    /// Returns true if no cell was ever written.
    pub fn is_empty(&self) -> bool {
        self.fragments.iter().all(|f| f.cells.is_empty())
    }

    /// Returns the inclusive bounds of written coordinates on one dimension.
    pub fn non_empty_bounds(&self, dim: usize) -> Option<(&[u8], &[u8])> {
        let mut lo: Option<(&Scalar, &[u8])> = None;
        let mut hi: Option<(&Scalar, &[u8])> = None;
        for cell in self.fragments.iter().flat_map(|f| f.cells.iter()) {
            let (key, raw) = (&cell.key[dim], cell.coords[dim].as_slice());
            if lo.map_or(true, |(k, _)| key < k) {
                lo = Some((key, raw));
            }
            if hi.map_or(true, |(k, _)| key > k) {
                hi = Some((key, raw));
            }
        }
        Some((lo?.1, hi?.1))
    }
}

/// An array held by the store.
#[derive(Debug)]
pub struct StoredArray {
    uri: String,
    schema: Arc<ArraySchema>,
    fragments: RwLock<Vec<Arc<Fragment>>>,
    metadata: RwLock<BTreeMap<String, MetadataValue>>,
}

impl StoredArray {
    /// Returns the array URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Returns the schema.
    pub fn schema(&self) -> &Arc<ArraySchema> {
        &self.schema
    }

    /// Captures the currently committed fragments.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_at(None)
    }

    /// Captures the fragments written at or before `timestamp`, or all of
    /// them for `None`. Fragments are ordered by timestamp, then commit
    /// order, so the latest write wins on merge.
    pub fn snapshot_at(&self, timestamp: Option<u64>) -> Snapshot {
        let mut fragments: Vec<Arc<Fragment>> = self
            .fragments
            .read()
            .iter()
            .filter(|f| timestamp.map_or(true, |t| f.timestamp <= t))
            .cloned()
            .collect();
        fragments.sort_by_key(|f| (f.timestamp, f.seq));
        Snapshot { fragments }
    }

    /// Commits one write as a new fragment, stamped with `timestamp` or the
    /// current time.
    pub fn commit(&self, data: FragmentData, timestamp: Option<u64>) -> Arc<Fragment> {
        let mut fragments = self.fragments.write();
        let seq = fragments.last().map_or(0, |f| f.seq + 1);
        let fragment = Arc::new(Fragment {
            id: Uuid::new_v4(),
            seq,
            timestamp: timestamp.unwrap_or_else(now_ms),
            cells: data.cells,
            labels: data.labels,
        });
        tracing::debug!(
            uri = %self.uri,
            fragment = %fragment.id,
            timestamp = fragment.timestamp,
            cells = fragment.cells.len(),
            labels = fragment.labels.len(),
            "committed fragment"
        );
        stats::global().record_fragment();
        fragments.push(Arc::clone(&fragment));
        fragment
    }

    /// Returns a copy of the current metadata.
    pub fn metadata(&self) -> BTreeMap<String, MetadataValue> {
        self.metadata.read().clone()
    }

    /// Applies pending metadata changes; `None` deletes the key.
    pub fn apply_metadata(&self, changes: Vec<(String, Option<MetadataValue>)>) {
        let mut metadata = self.metadata.write();
        for (key, value) in changes {
            match value {
                Some(value) => {
                    metadata.insert(key, value);
                }
                None => {
                    metadata.remove(&key);
                }
            }
        }
    }
}

/// Registry of arrays keyed by URI.
#[derive(Debug, Default)]
pub struct Store {
    arrays: RwLock<HashMap<String, Arc<StoredArray>>>,
}

impl Store {
    /// Returns the process-wide store.
    pub fn global() -> &'static Store {
        static STORE: OnceLock<Store> = OnceLock::new();
        STORE.get_or_init(Store::default)
    }

    /// Creates an array after validating its schema.
    pub fn create(&self, uri: &str, schema: ArraySchema) -> EngineResult<Arc<StoredArray>> {
        schema.check()?;
        let mut arrays = self.arrays.write();
        if arrays.contains_key(uri) {
            return Err(EngineError::ArrayExists {
                uri: uri.to_string(),
            });
        }
        let array = Arc::new(StoredArray {
            uri: uri.to_string(),
            schema: Arc::new(schema),
            fragments: RwLock::new(Vec::new()),
            metadata: RwLock::new(BTreeMap::new()),
        });
        arrays.insert(uri.to_string(), Arc::clone(&array));
        tracing::debug!(uri, "created array");
        Ok(array)
    }

    /// Looks up an array.
    pub fn get(&self, uri: &str) -> EngineResult<Arc<StoredArray>> {
        self.arrays
            .read()
            .get(uri)
            .cloned()
            .ok_or_else(|| EngineError::ArrayNotFound {
                uri: uri.to_string(),
            })
    }

    /// Removes an array. Open handles keep their snapshot alive.
    pub fn remove(&self, uri: &str) -> EngineResult<()> {
        self.arrays
            .write()
            .remove(uri)
            .map(|_| ())
            .ok_or_else(|| EngineError::ArrayNotFound {
                uri: uri.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Dimension, Domain};
    use crate::types::ArrayType;

    fn schema() -> ArraySchema {
        let mut domain = Domain::new();
        let mut bounds = 0u64.to_ne_bytes().to_vec();
        bounds.extend_from_slice(&100u64.to_ne_bytes());
        domain
            .add_dimension(Dimension::new("x", Datatype::UInt64, Some(&bounds), None).unwrap())
            .unwrap();
        let mut schema = ArraySchema::new(ArrayType::Sparse);
        schema.set_domain(domain);
        schema
            .add_attribute(Attribute::new("v", Datatype::UInt8).unwrap())
            .unwrap();
        schema
    }

    fn cell(x: u64, v: u8) -> Cell {
        Cell {
            key: vec![Scalar::UInt(x)],
            coords: vec![x.to_ne_bytes().to_vec()],
            values: vec![CellValue {
                bytes: vec![v],
                valid: true,
            }],
        }
    }

    fn cells(cells: Vec<Cell>) -> FragmentData {
        FragmentData {
            cells,
            labels: Vec::new(),
        }
    }

    fn unique_uri() -> String {
        format!("mem://store-test/{}", Uuid::new_v4())
    }

    #[test]
    fn create_and_get() {
        let store = Store::default();
        let uri = unique_uri();
        store.create(&uri, schema()).unwrap();
        assert!(matches!(
            store.create(&uri, schema()),
            Err(EngineError::ArrayExists { .. })
        ));
        assert_eq!(store.get(&uri).unwrap().uri(), uri);
        store.remove(&uri).unwrap();
        assert!(store.get(&uri).unwrap_err().is_not_found());
    }

    #[test]
    fn snapshots_are_isolated() {
        let store = Store::default();
        let array = store.create(&unique_uri(), schema()).unwrap();
        array.commit(cells(vec![cell(1, 10)]), None);
        let before = array.snapshot();
        array.commit(cells(vec![cell(1, 20), cell(5, 50)]), None);

        assert_eq!(before.merged().len(), 1);
        let after = array.snapshot();
        let merged = after.merged();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[[Scalar::UInt(1)].as_slice()].values[0].bytes, vec![20]);
    }

    #[test]
    fn non_empty_bounds() {
        let store = Store::default();
        let array = store.create(&unique_uri(), schema()).unwrap();
        assert!(array.snapshot().non_empty_bounds(0).is_none());

        array.commit(cells(vec![cell(7, 0), cell(3, 0), cell(42, 0)]), None);
        let snap = array.snapshot();
        let (lo, hi) = snap.non_empty_bounds(0).unwrap();
        assert_eq!(lo, 3u64.to_ne_bytes());
        assert_eq!(hi, 42u64.to_ne_bytes());
    }

    #[test]
    fn snapshots_at_a_timestamp_order_by_time() {
        let store = Store::default();
        let array = store.create(&unique_uri(), schema()).unwrap();
        let late = array.commit(cells(vec![cell(1, 30)]), Some(30));
        array.commit(cells(vec![cell(1, 10), cell(2, 10)]), Some(10));
        array.commit(cells(vec![cell(2, 20)]), Some(20));

        let at_15 = array.snapshot_at(Some(15));
        assert_eq!(at_15.fragments().len(), 1);
        assert_eq!(at_15.merged()[[Scalar::UInt(2)].as_slice()].values[0].bytes, vec![10]);

        let all = array.snapshot();
        let stamps: Vec<u64> = all.fragments().iter().map(|f| f.timestamp()).collect();
        assert_eq!(stamps, vec![10, 20, 30]);
        let merged = all.merged();
        assert_eq!(merged[[Scalar::UInt(1)].as_slice()].values[0].bytes, vec![30]);
        assert_eq!(merged[[Scalar::UInt(2)].as_slice()].values[0].bytes, vec![20]);

        let uri = late.uri("mem://a/");
        assert!(uri.starts_with("mem://a/__fragments/__30_30_"), "{uri}");
        assert!(array.commit(FragmentData::default(), None).timestamp() > 30);
    }

    #[test]
    fn later_label_values_win() {
        let store = Store::default();
        let array = store.create(&unique_uri(), schema()).unwrap();
        let label = |coord: u64, value: &[u8]| LabelValue {
            label: 0,
            coord: coord.to_ne_bytes().to_vec(),
            bytes: value.to_vec(),
        };
        array.commit(
            FragmentData {
                cells: Vec::new(),
                labels: vec![label(1, b"a"), label(2, b"b")],
            },
            Some(1),
        );
        array.commit(
            FragmentData {
                cells: Vec::new(),
                labels: vec![label(2, b"z")],
            },
            Some(2),
        );
        let snap = array.snapshot();
        let values = snap.label_values(0);
        assert_eq!(values[1u64.to_ne_bytes().as_slice()], b"a");
        assert_eq!(values[2u64.to_ne_bytes().as_slice()], b"z");
        assert!(snap.label_values(1).is_empty());
    }

    #[test]
    fn metadata_changes() {
        let store = Store::default();
        let array = store.create(&unique_uri(), schema()).unwrap();
        let value = MetadataValue {
            datatype: Datatype::Int32,
            count: 1,
            bytes: 5i32.to_ne_bytes().to_vec(),
        };
        array.apply_metadata(vec![("k".into(), Some(value.clone()))]);
        assert_eq!(array.metadata().get("k"), Some(&value));
        array.apply_metadata(vec![("k".into(), None)]);
        assert!(array.metadata().is_empty());
    }
}
