//! Subarrays: per-dimension range selections.
//!
//! Every dimension starts with one default range covering its whole domain
//! (empty start and end for string dimensions). The first explicit range on
//! a dimension replaces its default.

use std::sync::Arc;

use crate::config::{EngineConfig, OobPolicy};
use crate::error::{EngineError, EngineResult};
use crate::scalar::Scalar;
use crate::schema::{ArraySchema, Dimension};

/// An encoded inclusive range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeBytes {
    /// Encoded start value.
    pub start: Vec<u8>,
    /// Encoded end value.
    pub end: Vec<u8>,
}

#[derive(Debug, Clone)]
struct DimRanges {
    ranges: Vec<RangeBytes>,
    bounds: Vec<(Scalar, Scalar)>,
    is_default: bool,
}

/// A selection of ranges over an array's dimensions.
#[derive(Debug, Clone)]
pub struct Subarray {
    schema: Arc<ArraySchema>,
    dims: Vec<DimRanges>,
    coalesce: bool,
    config: EngineConfig,
}

impl Subarray {
    /// Creates a subarray selecting the whole domain.
    pub fn new(schema: Arc<ArraySchema>, config: EngineConfig) -> EngineResult<Self> {
        let dims = schema
            .domain()?
            .dimensions()
            .iter()
            .map(default_ranges)
            .collect::<EngineResult<Vec<_>>>()?;
        Ok(Self {
            schema,
            dims,
            coalesce: false,
            config,
        })
    }

    /// Returns the schema the subarray was created for.
    pub fn schema(&self) -> &Arc<ArraySchema> {
        &self.schema
    }

    /// Replaces the configuration used for later ranges.
    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// Enables merging of adjacent integer ranges.
    pub fn set_coalesce_ranges(&mut self, coalesce: bool) {
        self.coalesce = coalesce;
    }

    /// Resolves a dimension name to its index.
    pub fn dim_index(&self, name: &str) -> EngineResult<usize> {
        self.schema
            .domain()?
            .dimension_by_name(name)
            .map(|(i, _)| i)
            .ok_or_else(|| EngineError::field_not_found(name))
    }

    fn dimension(&self, dim: usize) -> EngineResult<&Dimension> {
        self.schema.domain()?.dimension(dim)
    }

    /// Adds a fixed-width range on dimension `dim`.
    pub fn add_range(&mut self, dim: usize, start: &[u8], end: &[u8]) -> EngineResult<()> {
        let dimension = self.dimension(dim)?.clone();
        if dimension.is_var() {
            return Err(EngineError::invalid_argument(format!(
                "dimension '{}' is var-sized; add a var range",
                dimension.name()
            )));
        }
        let datatype = dimension.datatype();
        let mut lo = Scalar::decode(datatype, start)?;
        let mut hi = Scalar::decode(datatype, end)?;
        if lo > hi {
            return Err(EngineError::invalid_argument(format!(
                "range start exceeds end on dimension '{}'",
                dimension.name()
            )));
        }
        if let Some((dom_lo, dom_hi)) = dimension.bounds() {
            if lo < dom_lo || hi > dom_hi {
                match self.config.read_range_oob {
                    OobPolicy::Error => {
                        return Err(EngineError::out_of_bounds(format!(
                            "range on dimension '{}' exceeds its domain",
                            dimension.name()
                        )))
                    }
                    OobPolicy::Warn => {
                        tracing::warn!(
                            dimension = dimension.name(),
                            "range exceeds domain; clamping"
                        );
                        lo = lo.max(dom_lo);
                        hi = hi.min(dom_hi);
                        if lo > hi {
                            return Err(EngineError::out_of_bounds(format!(
                                "range on dimension '{}' lies outside its domain",
                                dimension.name()
                            )));
                        }
                    }
                }
            }
        }

        let coalesce = self.coalesce && datatype.is_integral();
        let entry = &mut self.dims[dim];
        if entry.is_default {
            entry.ranges.clear();
            entry.bounds.clear();
            entry.is_default = false;
        }
        if coalesce {
            if let (Some(last), Some(start)) = (entry.bounds.last_mut(), lo.as_i128()) {
                if last.1.as_i128().map(|e| e + 1) == Some(start) {
                    last.1 = hi.clone();
                    if let Some(range) = entry.ranges.last_mut() {
                        range.end = hi.encode(datatype);
                    }
                    return Ok(());
                }
            }
        }
        entry.ranges.push(RangeBytes {
            start: lo.encode(datatype),
            end: hi.encode(datatype),
        });
        entry.bounds.push((lo, hi));
        Ok(())
    }

    /// Adds a fixed-width range on the named dimension.
    pub fn add_range_by_name(&mut self, name: &str, start: &[u8], end: &[u8]) -> EngineResult<()> {
        let dim = self.dim_index(name)?;
        self.add_range(dim, start, end)
    }

    /// Adds a string range on var-sized dimension `dim`.
    pub fn add_range_var(&mut self, dim: usize, start: &[u8], end: &[u8]) -> EngineResult<()> {
        let dimension = self.dimension(dim)?;
        if !dimension.is_var() {
            return Err(EngineError::invalid_argument(format!(
                "dimension '{}' is fixed-sized; add a fixed range",
                dimension.name()
            )));
        }
        if start > end {
            return Err(EngineError::invalid_argument(format!(
                "range start exceeds end on dimension '{}'",
                dimension.name()
            )));
        }
        let entry = &mut self.dims[dim];
        if entry.is_default {
            entry.ranges.clear();
            entry.bounds.clear();
            entry.is_default = false;
        }
        entry.ranges.push(RangeBytes {
            start: start.to_vec(),
            end: end.to_vec(),
        });
        entry
            .bounds
            .push((Scalar::Bytes(start.to_vec()), Scalar::Bytes(end.to_vec())));
        Ok(())
    }

    /// Adds a string range on the named dimension.
    pub fn add_range_var_by_name(
        &mut self,
        name: &str,
        start: &[u8],
        end: &[u8],
    ) -> EngineResult<()> {
        let dim = self.dim_index(name)?;
        self.add_range_var(dim, start, end)
    }

    fn entry(&self, dim: usize) -> EngineResult<&DimRanges> {
        self.dims.get(dim).ok_or(EngineError::IndexOutOfBounds {
            what: "dimension",
            index: dim as u64,
            count: self.dims.len() as u64,
        })
    }

    /// Returns the number of ranges on dimension `dim`.
    pub fn range_num(&self, dim: usize) -> EngineResult<u64> {
        Ok(self.entry(dim)?.ranges.len() as u64)
    }

    /// Returns range `index` of dimension `dim`.
    pub fn range(&self, dim: usize, index: u64) -> EngineResult<&RangeBytes> {
        let entry = self.entry(dim)?;
        entry
            .ranges
            .get(index as usize)
            .ok_or(EngineError::IndexOutOfBounds {
                what: "range",
                index,
                count: entry.ranges.len() as u64,
            })
    }

    /// Returns true while dimension `dim` still has its default range.
    pub fn is_default(&self, dim: usize) -> bool {
        self.dims.get(dim).map_or(false, |d| d.is_default)
    }

    /// Returns true if the cell key falls in some range of every dimension.
    pub fn matches(&self, key: &[Scalar]) -> bool {
        self.dims.iter().zip(key).all(|(entry, value)| {
            entry.is_default && entry.bounds.is_empty()
                || entry
                    .bounds
                    .iter()
                    .any(|(lo, hi)| lo <= value && value <= hi)
        })
    }

    /// Returns the integer ranges of dimension `dim`, for dense traversal.
    pub fn integer_ranges(&self, dim: usize) -> EngineResult<Vec<(i128, i128)>> {
        self.entry(dim)?
            .bounds
            .iter()
            .map(|(lo, hi)| match (lo.as_i128(), hi.as_i128()) {
                (Some(lo), Some(hi)) => Ok((lo, hi)),
                _ => Err(EngineError::invalid_operation(
                    "dense traversal requires integer ranges",
                )),
            })
            .collect()
    }
}

fn default_ranges(dimension: &Dimension) -> EngineResult<DimRanges> {
    match (dimension.domain(), dimension.bounds()) {
        (Some(domain), Some(bounds)) => {
            let width = dimension.datatype().size() as usize;
            Ok(DimRanges {
                ranges: vec![RangeBytes {
                    start: domain[..width].to_vec(),
                    end: domain[width..].to_vec(),
                }],
                bounds: vec![bounds],
                is_default: true,
            })
        }
        // String dimensions default to an unbounded range.
        _ => Ok(DimRanges {
            ranges: vec![RangeBytes {
                start: Vec::new(),
                end: Vec::new(),
            }],
            bounds: Vec::new(),
            is_default: true,
        }),
    }
}
