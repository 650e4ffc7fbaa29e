//! Subarrays: type-checked range selections over an array's dimensions.
//!
//! Every dimension starts with one range covering its whole domain (an
//! empty `("", "")` range for string dimensions). The first range added to
//! a dimension replaces that default.

use std::ffi::{c_void, CString};

use tessera_ffi::{
    tessera_subarray_add_range, tessera_subarray_add_range_by_name,
    tessera_subarray_add_range_var, tessera_subarray_add_range_var_by_name,
    tessera_subarray_alloc, tessera_subarray_free, tessera_subarray_get_range,
    tessera_subarray_get_range_from_name, tessera_subarray_get_range_num,
    tessera_subarray_get_range_num_from_name, tessera_subarray_get_range_var,
    tessera_subarray_get_range_var_from_name, tessera_subarray_get_range_var_size,
    tessera_subarray_get_range_var_size_from_name, tessera_subarray_set_coalesce_ranges,
    tessera_subarray_set_config, TesseraSubarray,
};

use crate::array::Array;
use crate::buffer::copy_native;
use crate::config::Config;
use crate::context::{c_string, Context};
use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::handle::{HandleGuard, NativeHandle};
use crate::range::Range;

/// What a subarray needs to know about each dimension.
#[derive(Debug, Clone)]
struct DimInfo {
    name: String,
    datatype: Datatype,
    var: bool,
}

/// A dimension addressed by index or by name.
enum At {
    Index(u32),
    Name(CString),
}

/// A selection of ranges over the dimensions of an open array.
#[derive(Debug)]
pub struct Subarray {
    ctx: Context,
    handle: NativeHandle<TesseraSubarray>,
    dims: Vec<DimInfo>,
}

impl Subarray {
    /// Creates a subarray covering the whole domain of an open array.
    pub fn new(array: &Array) -> Result<Self> {
        let ctx = array.ctx().clone();
        let dims = array
            .schema()?
            .domain()?
            .dimensions()?
            .iter()
            .map(|d| {
                Ok(DimInfo {
                    name: d.name()?,
                    datatype: d.datatype()?,
                    var: d.is_var()?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live handles; valid out-slot.
        let status = unsafe { tessera_subarray_alloc(*ctx.ptr()?, *array.ptr()?, &mut ptr) };
        ctx.check(status, "allocate subarray", "")?;
        // SAFETY: freshly handed out by the engine.
        let handle = unsafe { NativeHandle::acquire(ptr, tessera_subarray_free, "subarray") }?;
        Ok(Self { ctx, handle, dims })
    }

    pub(crate) fn ptr(&self) -> Result<HandleGuard<'_, TesseraSubarray>> {
        self.handle.get()
    }

    fn ptr_mut(&self) -> Result<HandleGuard<'_, TesseraSubarray>> {
        self.handle.get_mut()
    }

    fn dim_at(&self, index: u32) -> Result<(&DimInfo, At)> {
        let dim = self.dims.get(index as usize).ok_or_else(|| Error::NotFound {
            operation: "resolve dimension",
            subject: index.to_string(),
            message: format!("the domain has {} dimensions", self.dims.len()),
        })?;
        Ok((dim, At::Index(index)))
    }

    fn dim_named(&self, name: &str) -> Result<(&DimInfo, At)> {
        let dim = self
            .dims
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::NotFound {
                operation: "resolve dimension",
                subject: name.to_string(),
                message: "no such dimension".into(),
            })?;
        Ok((dim, At::Name(c_string(name, "dimension name")?)))
    }

    /// Applies a configuration: `sm.read_range_oob` governs later ranges.
    pub fn set_config(&self, config: &Config) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe {
            tessera_subarray_set_config(*self.ctx.ptr()?, *self.ptr_mut()?, *config.ptr()?)
        };
        self.ctx.check(status, "set subarray config", "")
    }

    /// Merges each new integer range into the previous one when they are
    /// adjacent.
    pub fn set_coalesce_ranges(&self, coalesce: bool) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe {
            tessera_subarray_set_coalesce_ranges(
                *self.ctx.ptr()?,
                *self.ptr_mut()?,
                u8::from(coalesce),
            )
        };
        self.ctx.check(status, "set coalesce ranges", "")
    }

    /// Adds a range on the dimension at `dim_idx`.
    ///
    /// Safe to call from several threads at once; each call appends its
    /// range whole.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the range's type differs from the
    /// dimension's, or a string range targets a fixed dimension and vice
    /// versa.
    pub fn add_range(&self, dim_idx: u32, range: Range) -> Result<()> {
        let (dim, at) = self.dim_at(dim_idx)?;
        self.add(dim, &at, &range)
    }

    /// Adds a range on the dimension called `name`.
    pub fn add_range_by_name(&self, name: &str, range: Range) -> Result<()> {
        let (dim, at) = self.dim_named(name)?;
        self.add(dim, &at, &range)
    }

    fn add(&self, dim: &DimInfo, at: &At, range: &Range) -> Result<()> {
        match range.kind() {
            None if !dim.var => {
                return Err(Error::type_mismatch(
                    &dim.name,
                    dim.datatype.value_kind(),
                    "string range",
                ));
            }
            Some(kind) if dim.var || kind != dim.datatype.value_kind() => {
                let expected = if dim.var {
                    "string range".to_string()
                } else {
                    dim.datatype.value_kind().to_string()
                };
                return Err(Error::type_mismatch(&dim.name, expected, kind));
            }
            _ => {}
        }
        let (start, end) = range.bytes();
        let (ctx, sub) = (self.ctx.ptr()?, self.ptr_mut()?);
        let start_ptr = start.as_ptr().cast::<c_void>();
        let end_ptr = end.as_ptr().cast::<c_void>();
        // SAFETY: live handles; both bounds outlive the call and hold the
        // dimension's width, or their stated sizes for var ranges.
        let status = unsafe {
            match (at, dim.var) {
                (At::Index(i), false) => {
                    tessera_subarray_add_range(*ctx, *sub, *i, start_ptr, end_ptr, std::ptr::null())
                }
                (At::Name(n), false) => tessera_subarray_add_range_by_name(
                    *ctx,
                    *sub,
                    n.as_ptr(),
                    start_ptr,
                    end_ptr,
                    std::ptr::null(),
                ),
                (At::Index(i), true) => tessera_subarray_add_range_var(
                    *ctx,
                    *sub,
                    *i,
                    start_ptr,
                    start.len() as u64,
                    end_ptr,
                    end.len() as u64,
                ),
                (At::Name(n), true) => tessera_subarray_add_range_var_by_name(
                    *ctx,
                    *sub,
                    n.as_ptr(),
                    start_ptr,
                    start.len() as u64,
                    end_ptr,
                    end.len() as u64,
                ),
            }
        };
        self.ctx.check(status, "add range", &dim.name)
    }

    /// Returns the number of ranges on the dimension at `dim_idx`.
    pub fn range_num(&self, dim_idx: u32) -> Result<u64> {
        let mut num = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_subarray_get_range_num(*self.ctx.ptr()?, *self.ptr()?, dim_idx, &mut num)
        };
        self.ctx.check(status, "get range number", &dim_idx.to_string())?;
        Ok(num)
    }

    /// Returns the number of ranges on the dimension called `name`.
    pub fn range_num_from_name(&self, name: &str) -> Result<u64> {
        let c_name = c_string(name, "dimension name")?;
        let mut num = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_subarray_get_range_num_from_name(
                *self.ctx.ptr()?,
                *self.ptr()?,
                c_name.as_ptr(),
                &mut num,
            )
        };
        self.ctx.check(status, "get range number", name)?;
        Ok(num)
    }

    /// Returns range `range_idx` of the dimension at `dim_idx`.
    pub fn range(&self, dim_idx: u32, range_idx: u64) -> Result<Range> {
        let (dim, at) = self.dim_at(dim_idx)?;
        self.get(dim, &at, range_idx)
    }

    /// Returns range `range_idx` of the dimension called `name`.
    pub fn range_from_name(&self, name: &str, range_idx: u64) -> Result<Range> {
        let (dim, at) = self.dim_named(name)?;
        self.get(dim, &at, range_idx)
    }

    /// Returns every range of the dimension at `dim_idx`.
    pub fn ranges(&self, dim_idx: u32) -> Result<Vec<Range>> {
        (0..self.range_num(dim_idx)?)
            .map(|i| self.range(dim_idx, i))
            .collect()
    }

    fn get(&self, dim: &DimInfo, at: &At, range_idx: u64) -> Result<Range> {
        if dim.var {
            self.get_var(dim, at, range_idx)
        } else {
            self.get_fixed(dim, at, range_idx)
        }
    }

    fn get_fixed(&self, dim: &DimInfo, at: &At, range_idx: u64) -> Result<Range> {
        let (ctx, sub) = (self.ctx.ptr()?, self.ptr()?);
        let (mut start, mut end) = (std::ptr::null(), std::ptr::null());
        let mut stride = std::ptr::null();
        // SAFETY: live handles; valid out-slots.
        let status = unsafe {
            match at {
                At::Index(i) => tessera_subarray_get_range(
                    *ctx,
                    *sub,
                    *i,
                    range_idx,
                    &mut start,
                    &mut end,
                    &mut stride,
                ),
                At::Name(n) => tessera_subarray_get_range_from_name(
                    *ctx,
                    *sub,
                    n.as_ptr(),
                    range_idx,
                    &mut start,
                    &mut end,
                    &mut stride,
                ),
            }
        };
        self.ctx.check(status, "get range", &dim.name)?;
        let width = dim.datatype.size();
        // SAFETY: both bounds hold one value of the dimension's width, owned
        // by the subarray and pinned by `sub`.
        let (start, end) = unsafe {
            (
                copy_native(start, width, &dim.name)?,
                copy_native(end, width, &dim.name)?,
            )
        };
        Range::from_fixed_bytes(dim.datatype.value_kind(), &start, &end)
            .ok_or(Error::UnsupportedDatatype { datatype: dim.datatype })
    }

    /// Fetches the bound sizes first, then exactly that many bytes. Both
    /// steps run under one guard so no range lands in between.
    fn get_var(&self, dim: &DimInfo, at: &At, range_idx: u64) -> Result<Range> {
        let (ctx, sub) = (self.ctx.ptr()?, self.ptr()?);
        let (mut start_size, mut end_size) = (0u64, 0u64);
        // SAFETY: live handles; valid out-slots.
        let status = unsafe {
            match at {
                At::Index(i) => tessera_subarray_get_range_var_size(
                    *ctx,
                    *sub,
                    *i,
                    range_idx,
                    &mut start_size,
                    &mut end_size,
                ),
                At::Name(n) => tessera_subarray_get_range_var_size_from_name(
                    *ctx,
                    *sub,
                    n.as_ptr(),
                    range_idx,
                    &mut start_size,
                    &mut end_size,
                ),
            }
        };
        self.ctx.check(status, "get range size", &dim.name)?;

        let to_len = |size: u64| {
            usize::try_from(size).map_err(|_| {
                Error::invalid_argument(format!("'{}': bound of {size} bytes", dim.name))
            })
        };
        let mut start = vec![0u8; to_len(start_size)?];
        let mut end = vec![0u8; to_len(end_size)?];
        let start_out = start.as_mut_ptr().cast::<c_void>();
        let end_out = end.as_mut_ptr().cast::<c_void>();
        // SAFETY: the buffers hold exactly the sizes the engine reported.
        let status = unsafe {
            match at {
                At::Index(i) => {
                    tessera_subarray_get_range_var(*ctx, *sub, *i, range_idx, start_out, end_out)
                }
                At::Name(n) => tessera_subarray_get_range_var_from_name(
                    *ctx,
                    *sub,
                    n.as_ptr(),
                    range_idx,
                    start_out,
                    end_out,
                ),
            }
        };
        self.ctx.check(status, "get range", &dim.name)?;
        Ok(Range::Var(start, end))
    }

    /// Releases the native subarray.
    pub fn free(&self) {
        self.handle.free();
    }
}
