//! The buffers a query holds for each field.
//!
//! Every field a query touches has up to three buffers: offsets (var-sized
//! fields only), data, and validity (nullable fields only). Each is a
//! [`BoundBuffer`], so the memory and the size cell the engine writes
//! belong to the set for as long as the query can reach them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::array::Array;
use crate::buffer::BoundBuffer;
use crate::datatype::{Datatype, COORDS, VAR_NUM};
use crate::error::{Error, Result};
use crate::types::ArrayType;

/// Bytes per offset.
pub const OFFSET_SIZE: u64 = 8;

/// One of the three buffers of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Start offsets of var-sized values.
    Offsets,
    /// Values.
    Data,
    /// One byte per value, non-zero meaning valid.
    Validity,
}

impl Slot {
    /// Returns the lower-case slot name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Offsets => "offsets",
            Self::Data => "data",
            Self::Validity => "validity",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shape of a field as seen from a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    /// The field's datatype; the domain's for `__coords`.
    pub datatype: Datatype,
    /// True if values are var-sized and need offsets.
    pub var: bool,
    /// True if values carry validity.
    pub nullable: bool,
}

impl FieldInfo {
    /// Bytes per data element.
    pub fn width(&self) -> u64 {
        self.datatype.size()
    }
}

/// The fields of one array, resolved once when a query is created.
#[derive(Debug, Clone, Default)]
pub(crate) struct Catalog {
    dimensions: Vec<(String, FieldInfo)>,
    attributes: Vec<(String, FieldInfo)>,
    labels: Vec<(String, FieldInfo)>,
    coords: Option<FieldInfo>,
}

impl Catalog {
    pub(crate) fn load(array: &Array) -> Result<Self> {
        let schema = array.schema()?;
        let domain = schema.domain()?;
        let dimensions = domain
            .dimensions()?
            .iter()
            .map(|d| {
                let info = FieldInfo {
                    datatype: d.datatype()?,
                    var: d.is_var()?,
                    nullable: false,
                };
                Ok((d.name()?, info))
            })
            .collect::<Result<Vec<_>>>()?;
        let attributes = schema
            .attributes()?
            .iter()
            .map(|a| {
                let info = FieldInfo {
                    datatype: a.datatype()?,
                    var: a.cell_val_num()? == VAR_NUM,
                    nullable: a.nullable()?,
                };
                Ok((a.name()?, info))
            })
            .collect::<Result<Vec<_>>>()?;
        let labels = schema
            .dimension_labels()?
            .into_iter()
            .map(|l| {
                let info = FieldInfo {
                    datatype: l.datatype,
                    var: l.datatype.is_string(),
                    nullable: false,
                };
                (l.name, info)
            })
            .collect();

        // Zipped coordinates need one datatype across the domain.
        let coords = match schema.array_type()? {
            ArrayType::Sparse => domain.datatype().ok().map(|datatype| FieldInfo {
                datatype,
                var: false,
                nullable: false,
            }),
            ArrayType::Dense => None,
        };
        Ok(Self {
            dimensions,
            attributes,
            labels,
            coords,
        })
    }

    /// Resolves a dimension, then an attribute, then a dimension label,
    /// then `__coords`.
    pub(crate) fn resolve(&self, name: &str) -> Result<FieldInfo> {
        self.dimensions
            .iter()
            .chain(&self.attributes)
            .chain(&self.labels)
            .find(|(field, _)| field == name)
            .map(|(_, info)| *info)
            .or_else(|| self.coords.filter(|_| name == COORDS))
            .ok_or_else(|| Error::NotFound {
                operation: "resolve field",
                subject: name.to_string(),
                message: "no such dimension, attribute or dimension label".into(),
            })
    }

    /// Dimensions then attributes, in schema order.
    pub(crate) fn fields(&self) -> impl Iterator<Item = (&str, &FieldInfo)> {
        self.dimensions
            .iter()
            .chain(&self.attributes)
            .map(|(name, info)| (name.as_str(), info))
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        dimensions: Vec<(String, FieldInfo)>,
        attributes: Vec<(String, FieldInfo)>,
        labels: Vec<(String, FieldInfo)>,
        coords: Option<FieldInfo>,
    ) -> Self {
        Self {
            dimensions,
            attributes,
            labels,
            coords,
        }
    }
}

/// The buffers bound for one field.
#[derive(Debug, Default)]
pub struct QueryBufferEntry {
    offsets: Option<BoundBuffer>,
    data: Option<BoundBuffer>,
    validity: Option<BoundBuffer>,
}

impl QueryBufferEntry {
    /// Returns the buffer in `slot`.
    pub fn get(&self, slot: Slot) -> Option<&BoundBuffer> {
        match slot {
            Slot::Offsets => self.offsets.as_ref(),
            Slot::Data => self.data.as_ref(),
            Slot::Validity => self.validity.as_ref(),
        }
    }

    pub(crate) fn get_mut(&mut self, slot: Slot) -> Option<&mut BoundBuffer> {
        self.slot_mut(slot).as_mut()
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Option<BoundBuffer> {
        match slot {
            Slot::Offsets => &mut self.offsets,
            Slot::Data => &mut self.data,
            Slot::Validity => &mut self.validity,
        }
    }

    /// Installs `bound`, returning what it replaces.
    pub(crate) fn replace(&mut self, slot: Slot, bound: BoundBuffer) -> Option<BoundBuffer> {
        self.slot_mut(slot).replace(bound)
    }

    /// Returns `[offsets, values, validity]` element counts from the bytes
    /// the engine reported, with `width` bytes per value.
    pub fn element_counts(&self, width: u64) -> [u64; 3] {
        let count = |bound: &Option<BoundBuffer>, unit: u64| {
            bound.as_ref().map_or(0, |b| b.populated() / unit.max(1))
        };
        [
            count(&self.offsets, OFFSET_SIZE),
            count(&self.data, width),
            count(&self.validity, 1),
        ]
    }

    fn populated(&self) -> u64 {
        [&self.offsets, &self.data, &self.validity]
            .into_iter()
            .flatten()
            .map(BoundBuffer::populated)
            .sum()
    }

    fn reset(&self) {
        for bound in [&self.offsets, &self.data, &self.validity].into_iter().flatten() {
            bound.reset();
        }
    }

    /// Returns the buffers as `(offsets, data, validity)`.
    pub fn into_parts(self) -> (Option<BoundBuffer>, Option<BoundBuffer>, Option<BoundBuffer>) {
        (self.offsets, self.data, self.validity)
    }
}

/// Every buffer a query holds, by field name.
#[derive(Debug, Default)]
pub struct QueryBufferSet {
    entries: BTreeMap<String, QueryBufferEntry>,
}

impl QueryBufferSet {
    /// Returns the entry for `name`.
    pub fn get(&self, name: &str) -> Option<&QueryBufferEntry> {
        self.entries.get(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut QueryBufferEntry> {
        self.entries.get_mut(name)
    }

    pub(crate) fn entry(&mut self, name: &str) -> &mut QueryBufferEntry {
        self.entries.entry(name.to_string()).or_default()
    }

    /// Returns the bound buffer in `slot` of `name`.
    pub fn bound(&self, name: &str, slot: Slot) -> Option<&BoundBuffer> {
        self.get(name).and_then(|entry| entry.get(slot))
    }

    /// Returns the field names with at least one buffer.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Returns true if no buffer is bound.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks that every field has the buffers its shape needs.
    pub(crate) fn check_complete(&self, resolve: impl Fn(&str) -> Result<FieldInfo>) -> Result<()> {
        for (name, entry) in &self.entries {
            let info = resolve(name)?;
            let required = [
                (Slot::Data, true),
                (Slot::Offsets, info.var),
                (Slot::Validity, info.nullable),
            ];
            if let Some((slot, _)) = required
                .into_iter()
                .find(|&(slot, needed)| needed && entry.get(slot).is_none())
            {
                return Err(Error::BufferNotSet {
                    name: name.clone(),
                    slot: slot.as_str(),
                });
            }
        }
        Ok(())
    }

    /// Restores every size cell to its buffer's capacity.
    pub(crate) fn reset_sizes(&self) {
        self.entries.values().for_each(QueryBufferEntry::reset);
    }

    /// Returns the bytes the engine reported across every buffer.
    pub(crate) fn populated(&self) -> u64 {
        self.entries.values().map(QueryBufferEntry::populated).sum()
    }

    /// Converts reported byte counts into element counts per field.
    pub(crate) fn element_counts(
        &self,
        resolve: impl Fn(&str) -> Result<FieldInfo>,
    ) -> Result<HashMap<String, [u64; 3]>> {
        self.entries
            .iter()
            .map(|(name, entry)| Ok((name.clone(), entry.element_counts(resolve(name)?.width()))))
            .collect()
    }

    /// Returns the entries by field name.
    pub fn into_entries(self) -> BTreeMap<String, QueryBufferEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::TypedBuffer;

    fn info(datatype: Datatype, var: bool, nullable: bool) -> FieldInfo {
        FieldInfo {
            datatype,
            var,
            nullable,
        }
    }

    fn bound(slot: Slot, buffer: TypedBuffer, populated: u64) -> BoundBuffer {
        let bound = BoundBuffer::bind("a", slot.as_str(), buffer).unwrap();
        // Stand in for the engine reporting the bytes it wrote.
        unsafe { bound.size_ptr().write(populated) };
        bound
    }

    #[test]
    fn element_counts_divide_by_each_slot_width() {
        let mut entry = QueryBufferEntry::default();
        entry.replace(Slot::Offsets, bound(Slot::Offsets, TypedBuffer::UInt64(vec![0; 4]), 24));
        entry.replace(Slot::Data, bound(Slot::Data, TypedBuffer::Int32(vec![0; 16]), 40));
        entry.replace(Slot::Validity, bound(Slot::Validity, TypedBuffer::UInt8(vec![0; 4]), 3));
        assert_eq!(entry.element_counts(4), [3, 10, 3]);
        assert_eq!(entry.populated(), 67);

        entry.reset();
        assert_eq!(entry.element_counts(4), [4, 16, 4]);
    }

    #[test]
    fn fixed_fields_report_zero_offsets() {
        let mut set = QueryBufferSet::default();
        set.entry("x")
            .replace(Slot::Data, bound(Slot::Data, TypedBuffer::Float64(vec![0.0; 8]), 48));
        let counts = set.element_counts(|_| Ok(info(Datatype::Float64, false, false))).unwrap();
        assert_eq!(counts["x"], [0, 6, 0]);
    }

    #[test]
    fn replacing_returns_the_previous_binding() {
        let mut entry = QueryBufferEntry::default();
        assert!(entry
            .replace(Slot::Data, bound(Slot::Data, TypedBuffer::Int8(vec![1, 2]), 2))
            .is_none());
        let old = entry
            .replace(Slot::Data, bound(Slot::Data, TypedBuffer::Int8(vec![3]), 1))
            .unwrap();
        assert_eq!(old.into_buffer(), Some(TypedBuffer::Int8(vec![1, 2])));
        assert_eq!(entry.get(Slot::Data).unwrap().capacity(), 1);
    }

    #[test]
    fn missing_required_buffers_are_named() {
        let mut set = QueryBufferSet::default();
        set.entry("s")
            .replace(Slot::Data, bound(Slot::Data, TypedBuffer::UInt8(vec![0; 4]), 4));

        let err = set
            .check_complete(|_| Ok(info(Datatype::StringUtf8, true, false)))
            .unwrap_err();
        assert!(matches!(err, Error::BufferNotSet { slot: "offsets", .. }));

        let err = set
            .check_complete(|_| Ok(info(Datatype::UInt8, false, true)))
            .unwrap_err();
        assert_eq!(err.to_string(), "no validity buffer set for 's'");

        assert!(set.check_complete(|_| Ok(info(Datatype::UInt8, false, false))).is_ok());

        set.entry("t")
            .replace(Slot::Offsets, bound(Slot::Offsets, TypedBuffer::UInt64(vec![0]), 8));
        let err = set
            .check_complete(|name| Ok(info(Datatype::UInt8, name == "t", false)))
            .unwrap_err();
        assert!(matches!(err, Error::BufferNotSet { slot: "data", ref name } if name == "t"));
    }

    #[test]
    fn catalog_resolves_dimensions_attributes_then_labels() {
        let int = info(Datatype::Int32, false, false);
        let catalog = Catalog::from_parts(
            vec![("d".into(), int)],
            vec![("a".into(), info(Datatype::Float32, true, true))],
            vec![
                ("d_name".into(), info(Datatype::StringAscii, true, false)),
                ("a".into(), info(Datatype::Float64, false, false)),
            ],
            Some(int),
        );
        assert_eq!(catalog.resolve("d").unwrap(), int);
        assert!(catalog.resolve("a").unwrap().nullable);
        assert_eq!(catalog.resolve("a").unwrap().datatype, Datatype::Float32);
        assert!(catalog.resolve("d_name").unwrap().var);
        assert_eq!(catalog.resolve(COORDS).unwrap().width(), 4);
        assert!(catalog.resolve("missing").unwrap_err().is_not_found());
        assert_eq!(catalog.fields().map(|(name, _)| name).collect::<Vec<_>>(), ["d", "a"]);

        let dense = Catalog::from_parts(vec![("d".into(), int)], Vec::new(), Vec::new(), None);
        assert!(dense.resolve(COORDS).unwrap_err().is_not_found());
    }
}
