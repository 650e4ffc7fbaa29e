//! Schema objects: dimensions, domains, attributes and array schemas.
//!
//! Each object owns one native handle and the [`Context`] it was created
//! in. Getters that return other schema objects hand out new handles to
//! copies; modifying a copy does not affect the original.

use std::ffi::c_void;

use tessera_ffi::{
    tessera_array_schema_add_attribute, tessera_array_schema_add_dimension_label,
    tessera_array_schema_alloc, tessera_array_schema_check, tessera_array_schema_free,
    tessera_array_schema_get_array_type, tessera_array_schema_get_dimension_label_from_index,
    tessera_array_schema_get_dimension_label_from_name,
    tessera_array_schema_get_dimension_label_num, tessera_array_schema_has_dimension_label,
    tessera_array_schema_get_attribute_from_index, tessera_array_schema_get_attribute_from_name,
    tessera_array_schema_get_attribute_num, tessera_array_schema_get_capacity,
    tessera_array_schema_get_cell_order, tessera_array_schema_get_domain,
    tessera_array_schema_get_tile_order, tessera_array_schema_has_attribute,
    tessera_array_schema_set_capacity, tessera_array_schema_set_cell_order,
    tessera_array_schema_set_domain, tessera_array_schema_set_tile_order,
    tessera_attribute_alloc, tessera_attribute_free, tessera_attribute_get_cell_size,
    tessera_attribute_get_cell_val_num, tessera_attribute_get_fill_value,
    tessera_attribute_get_fill_value_nullable, tessera_attribute_get_name,
    tessera_attribute_get_nullable, tessera_attribute_get_type,
    tessera_attribute_set_cell_val_num, tessera_attribute_set_fill_value,
    tessera_attribute_set_fill_value_nullable, tessera_attribute_set_nullable,
    tessera_dimension_alloc, tessera_dimension_free, tessera_dimension_get_cell_val_num,
    tessera_dimension_get_domain, tessera_dimension_get_name, tessera_dimension_get_tile_extent,
    tessera_dimension_get_type, tessera_dimension_set_cell_val_num, tessera_domain_add_dimension,
    tessera_domain_alloc, tessera_domain_free, tessera_domain_get_dimension_from_index,
    tessera_domain_get_dimension_from_name, tessera_domain_get_ndim, tessera_domain_get_type,
    tessera_domain_has_dimension, TesseraArraySchema, TesseraAttribute, TesseraDimension,
    TesseraDomain,
};

use crate::buffer::copy_native;
use crate::context::{c_string, from_c_string, Context};
use crate::datatype::{check_kind, decode_values, Datatype, Element, VAR_NUM};
use crate::error::{Error, Result};
use crate::handle::{HandleGuard, NativeHandle};
use crate::types::{ArrayType, DataOrder, Layout};

/// A dimension of an array domain.
#[derive(Debug, Clone)]
pub struct Dimension {
    ctx: Context,
    handle: NativeHandle<TesseraDimension>,
}

impl Dimension {
    /// Creates a fixed-width dimension over the inclusive `domain`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if `T` is not the element type of
    /// `datatype`.
    pub fn new<T: Element>(
        ctx: &Context,
        name: &str,
        datatype: Datatype,
        domain: [T; 2],
        extent: Option<T>,
    ) -> Result<Self> {
        check_kind::<T>(name, datatype)?;
        let domain = T::into_buffer(domain.to_vec());
        let extent = extent.map(|e| T::into_buffer(vec![e]));
        let extent_ptr = extent
            .as_ref()
            .map_or(std::ptr::null(), |e| e.as_bytes().as_ptr().cast::<c_void>());
        Self::alloc(ctx, name, datatype, domain.as_bytes().as_ptr().cast(), extent_ptr)
    }

    /// Creates a variable-length string dimension. String dimensions have
    /// no domain or tile extent.
    pub fn new_string(ctx: &Context, name: &str, datatype: Datatype) -> Result<Self> {
        Self::alloc(ctx, name, datatype, std::ptr::null(), std::ptr::null())
    }

    fn alloc(
        ctx: &Context,
        name: &str,
        datatype: Datatype,
        domain: *const c_void,
        extent: *const c_void,
    ) -> Result<Self> {
        let c_name = c_string(name, "dimension name")?;
        let mut ptr = std::ptr::null_mut();
        // SAFETY: `domain` and `extent` are null or point to values of the
        // datatype's width that outlive the call.
        let status = unsafe {
            tessera_dimension_alloc(
                *ctx.ptr()?,
                c_name.as_ptr(),
                datatype.as_u32(),
                domain,
                extent,
                &mut ptr,
            )
        };
        ctx.check(status, "allocate dimension", name)?;
        Self::from_raw(ctx, ptr)
    }

    fn from_raw(ctx: &Context, ptr: *mut TesseraDimension) -> Result<Self> {
        // SAFETY: freshly handed out by the engine.
        let handle = unsafe { NativeHandle::acquire(ptr, tessera_dimension_free, "dimension") }?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    pub(crate) fn ptr(&self) -> Result<HandleGuard<'_, TesseraDimension>> {
        self.handle.get()
    }

    fn ptr_mut(&self) -> Result<HandleGuard<'_, TesseraDimension>> {
        self.handle.get_mut()
    }

    /// Returns the name.
    pub fn name(&self) -> Result<String> {
        let dim = self.ptr()?;
        let mut name = std::ptr::null();
        // SAFETY: live handles; valid out-slot.
        let status = unsafe { tessera_dimension_get_name(*self.ctx.ptr()?, *dim, &mut name) };
        self.ctx.check(status, "get dimension name", "")?;
        // SAFETY: the name belongs to the dimension, pinned by `dim`.
        Ok(unsafe { from_c_string(name) })
    }

    /// Returns the datatype.
    pub fn datatype(&self) -> Result<Datatype> {
        let mut tag = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_dimension_get_type(*self.ctx.ptr()?, *self.ptr()?, &mut tag)
        };
        self.ctx.check(status, "get dimension type", "")?;
        Datatype::from_tag(tag)
    }

    /// Sets the number of values per cell.
    pub fn set_cell_val_num(&self, num: u32) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe {
            tessera_dimension_set_cell_val_num(*self.ctx.ptr()?, *self.ptr_mut()?, num)
        };
        self.ctx.check(status, "set dimension cell value number", "")
    }

    /// Returns the number of values per cell, [`VAR_NUM`] for strings.
    pub fn cell_val_num(&self) -> Result<u32> {
        let mut num = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_dimension_get_cell_val_num(*self.ctx.ptr()?, *self.ptr()?, &mut num)
        };
        self.ctx.check(status, "get dimension cell value number", "")?;
        Ok(num)
    }

    /// Returns true for variable-length dimensions.
    pub fn is_var(&self) -> Result<bool> {
        Ok(self.cell_val_num()? == VAR_NUM)
    }

    /// Returns the inclusive domain, or `None` for string dimensions.
    pub fn domain<T: Element>(&self) -> Result<Option<[T; 2]>> {
        let datatype = self.datatype()?;
        check_kind::<T>("dimension domain", datatype)?;
        let dim = self.ptr()?;
        let mut ptr = std::ptr::null();
        // SAFETY: live handles; valid out-slot.
        let status = unsafe { tessera_dimension_get_domain(*self.ctx.ptr()?, *dim, &mut ptr) };
        self.ctx.check(status, "get dimension domain", "")?;
        if ptr.is_null() {
            return Ok(None);
        }
        // SAFETY: a non-null domain holds two values of the datatype.
        let bytes = unsafe { copy_native(ptr, 2 * datatype.size(), "dimension domain") }?;
        match decode_values::<T>("dimension domain", datatype, &bytes)?.as_slice() {
            [lo, hi] => Ok(Some([*lo, *hi])),
            _ => Err(Error::invalid_argument("dimension domain is not two values")),
        }
    }

    /// Returns the tile extent, if one was set.
    pub fn extent<T: Element>(&self) -> Result<Option<T>> {
        let datatype = self.datatype()?;
        check_kind::<T>("tile extent", datatype)?;
        let dim = self.ptr()?;
        let mut ptr = std::ptr::null();
        // SAFETY: live handles; valid out-slot.
        let status =
            unsafe { tessera_dimension_get_tile_extent(*self.ctx.ptr()?, *dim, &mut ptr) };
        self.ctx.check(status, "get tile extent", "")?;
        if ptr.is_null() {
            return Ok(None);
        }
        // SAFETY: a non-null extent holds one value of the datatype.
        let bytes = unsafe { copy_native(ptr, datatype.size(), "tile extent") }?;
        Ok(decode_values::<T>("tile extent", datatype, &bytes)?.first().copied())
    }

    /// Releases the native dimension.
    pub fn free(&self) {
        self.handle.free();
    }
}

/// The dimensions of an array.
#[derive(Debug, Clone)]
pub struct Domain {
    ctx: Context,
    handle: NativeHandle<TesseraDomain>,
}

impl Domain {
    /// Creates an empty domain.
    pub fn new(ctx: &Context) -> Result<Self> {
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live context; valid out-slot.
        let status = unsafe { tessera_domain_alloc(*ctx.ptr()?, &mut ptr) };
        ctx.check(status, "allocate domain", "")?;
        Self::from_raw(ctx, ptr)
    }

    fn from_raw(ctx: &Context, ptr: *mut TesseraDomain) -> Result<Self> {
        // SAFETY: freshly handed out by the engine.
        let handle = unsafe { NativeHandle::acquire(ptr, tessera_domain_free, "domain") }?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    pub(crate) fn ptr(&self) -> Result<HandleGuard<'_, TesseraDomain>> {
        self.handle.get()
    }

    fn ptr_mut(&self) -> Result<HandleGuard<'_, TesseraDomain>> {
        self.handle.get_mut()
    }

    /// Appends a copy of `dimension`.
    pub fn add_dimension(&self, dimension: &Dimension) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe {
            tessera_domain_add_dimension(*self.ctx.ptr()?, *self.ptr_mut()?, *dimension.ptr()?)
        };
        self.ctx.check(status, "add dimension", "")
    }

    /// Appends copies of several dimensions in order.
    pub fn add_dimensions<'a>(
        &self,
        dimensions: impl IntoIterator<Item = &'a Dimension>,
    ) -> Result<()> {
        dimensions.into_iter().try_for_each(|d| self.add_dimension(d))
    }

    /// Returns the number of dimensions.
    pub fn ndim(&self) -> Result<u32> {
        let mut ndim = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe { tessera_domain_get_ndim(*self.ctx.ptr()?, *self.ptr()?, &mut ndim) };
        self.ctx.check(status, "get domain ndim", "")?;
        Ok(ndim)
    }

    /// Returns the datatype shared by every dimension.
    ///
    /// Fails for domains mixing datatypes.
    pub fn datatype(&self) -> Result<Datatype> {
        let mut tag = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe { tessera_domain_get_type(*self.ctx.ptr()?, *self.ptr()?, &mut tag) };
        self.ctx.check(status, "get domain type", "")?;
        Datatype::from_tag(tag)
    }

    /// Returns the dimension at `index`.
    pub fn dimension_from_index(&self, index: u32) -> Result<Dimension> {
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_domain_get_dimension_from_index(*self.ctx.ptr()?, *self.ptr()?, index, &mut ptr)
        };
        self.ctx.check(status, "get dimension", &index.to_string())?;
        Dimension::from_raw(&self.ctx, ptr)
    }

    /// Returns the dimension called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is none.
    pub fn dimension_from_name(&self, name: &str) -> Result<Dimension> {
        let c_name = c_string(name, "dimension name")?;
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_domain_get_dimension_from_name(
                *self.ctx.ptr()?,
                *self.ptr()?,
                c_name.as_ptr(),
                &mut ptr,
            )
        };
        self.ctx.check(status, "get dimension", name)?;
        Dimension::from_raw(&self.ctx, ptr)
    }

    /// Returns true if a dimension is called `name`.
    pub fn has_dimension(&self, name: &str) -> Result<bool> {
        let c_name = c_string(name, "dimension name")?;
        let mut has = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_domain_has_dimension(*self.ctx.ptr()?, *self.ptr()?, c_name.as_ptr(), &mut has)
        };
        self.ctx.check(status, "has dimension", name)?;
        Ok(has != 0)
    }

    /// Returns every dimension in order.
    pub fn dimensions(&self) -> Result<Vec<Dimension>> {
        (0..self.ndim()?).map(|i| self.dimension_from_index(i)).collect()
    }

    /// Releases the native domain.
    pub fn free(&self) {
        self.handle.free();
    }
}

/// A value stored in every cell of an array.
#[derive(Debug, Clone)]
pub struct Attribute {
    ctx: Context,
    handle: NativeHandle<TesseraAttribute>,
}

impl Attribute {
    /// Creates a single-valued, non-nullable attribute.
    pub fn new(ctx: &Context, name: &str, datatype: Datatype) -> Result<Self> {
        let c_name = c_string(name, "attribute name")?;
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live context; valid out-slot.
        let status = unsafe {
            tessera_attribute_alloc(*ctx.ptr()?, c_name.as_ptr(), datatype.as_u32(), &mut ptr)
        };
        ctx.check(status, "allocate attribute", name)?;
        Self::from_raw(ctx, ptr)
    }

    fn from_raw(ctx: &Context, ptr: *mut TesseraAttribute) -> Result<Self> {
        // SAFETY: freshly handed out by the engine.
        let handle = unsafe { NativeHandle::acquire(ptr, tessera_attribute_free, "attribute") }?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    pub(crate) fn ptr(&self) -> Result<HandleGuard<'_, TesseraAttribute>> {
        self.handle.get()
    }

    fn ptr_mut(&self) -> Result<HandleGuard<'_, TesseraAttribute>> {
        self.handle.get_mut()
    }

    /// Returns the name.
    pub fn name(&self) -> Result<String> {
        let attr = self.ptr()?;
        let mut name = std::ptr::null();
        // SAFETY: live handles; valid out-slot.
        let status = unsafe { tessera_attribute_get_name(*self.ctx.ptr()?, *attr, &mut name) };
        self.ctx.check(status, "get attribute name", "")?;
        // SAFETY: the name belongs to the attribute, pinned by `attr`.
        Ok(unsafe { from_c_string(name) })
    }

    /// Returns the datatype.
    pub fn datatype(&self) -> Result<Datatype> {
        let mut tag = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_attribute_get_type(*self.ctx.ptr()?, *self.ptr()?, &mut tag)
        };
        self.ctx.check(status, "get attribute type", "")?;
        Datatype::from_tag(tag)
    }

    /// Sets the number of values per cell; [`VAR_NUM`] for variable length.
    pub fn set_cell_val_num(&self, num: u32) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe {
            tessera_attribute_set_cell_val_num(*self.ctx.ptr()?, *self.ptr_mut()?, num)
        };
        self.ctx.check(status, "set attribute cell value number", "")
    }

    /// Returns the number of values per cell.
    pub fn cell_val_num(&self) -> Result<u32> {
        let mut num = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_attribute_get_cell_val_num(*self.ctx.ptr()?, *self.ptr()?, &mut num)
        };
        self.ctx.check(status, "get attribute cell value number", "")?;
        Ok(num)
    }

    /// Returns the byte size of one cell. Variable-length attributes
    /// report `u64::MAX`.
    pub fn cell_size(&self) -> Result<u64> {
        let mut size = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_attribute_get_cell_size(*self.ctx.ptr()?, *self.ptr()?, &mut size)
        };
        self.ctx.check(status, "get attribute cell size", "")?;
        Ok(size)
    }

    /// Sets whether cells may be null.
    pub fn set_nullable(&self, nullable: bool) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe {
            tessera_attribute_set_nullable(*self.ctx.ptr()?, *self.ptr_mut()?, u8::from(nullable))
        };
        self.ctx.check(status, "set attribute nullable", "")
    }

    /// Returns true if cells may be null.
    pub fn nullable(&self) -> Result<bool> {
        let mut nullable = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_attribute_get_nullable(*self.ctx.ptr()?, *self.ptr()?, &mut nullable)
        };
        self.ctx.check(status, "get attribute nullable", "")?;
        Ok(nullable != 0)
    }

    /// Sets the value read back for cells never written. Fixed-size
    /// attributes need exactly one cell's worth of values.
    pub fn set_fill_value<T: Element>(&self, value: &[T]) -> Result<()> {
        check_kind::<T>("fill value", self.datatype()?)?;
        let buffer = T::into_buffer(value.to_vec());
        let bytes = buffer.as_bytes();
        // SAFETY: live handles; `bytes` outlives the call.
        let status = unsafe {
            tessera_attribute_set_fill_value(
                *self.ctx.ptr()?,
                *self.ptr_mut()?,
                bytes.as_ptr().cast(),
                bytes.len() as u64,
            )
        };
        self.ctx.check(status, "set fill value", "")
    }

    /// Returns the fill value.
    pub fn fill_value<T: Element>(&self) -> Result<Vec<T>> {
        let datatype = self.datatype()?;
        check_kind::<T>("fill value", datatype)?;
        let attr = self.ptr()?;
        let (mut ptr, mut size) = (std::ptr::null(), 0);
        // SAFETY: live handles; valid out-slots.
        let status = unsafe {
            tessera_attribute_get_fill_value(*self.ctx.ptr()?, *attr, &mut ptr, &mut size)
        };
        self.ctx.check(status, "get fill value", "")?;
        // SAFETY: the engine reports `size` readable bytes owned by the
        // attribute, pinned by `attr`.
        let bytes = unsafe { copy_native(ptr, size, "fill value") }?;
        decode_values("fill value", datatype, &bytes)
    }

    /// Sets the fill value and its validity. The attribute must be nullable.
    pub fn set_fill_value_nullable<T: Element>(&self, value: &[T], valid: bool) -> Result<()> {
        check_kind::<T>("fill value", self.datatype()?)?;
        let buffer = T::into_buffer(value.to_vec());
        let bytes = buffer.as_bytes();
        // SAFETY: live handles; `bytes` outlives the call.
        let status = unsafe {
            tessera_attribute_set_fill_value_nullable(
                *self.ctx.ptr()?,
                *self.ptr_mut()?,
                bytes.as_ptr().cast(),
                bytes.len() as u64,
                u8::from(valid),
            )
        };
        self.ctx.check(status, "set nullable fill value", "")
    }

    /// Returns the fill value and its validity.
    pub fn fill_value_nullable<T: Element>(&self) -> Result<(Vec<T>, bool)> {
        let datatype = self.datatype()?;
        check_kind::<T>("fill value", datatype)?;
        let attr = self.ptr()?;
        let (mut ptr, mut size, mut valid) = (std::ptr::null(), 0, 0);
        // SAFETY: live handles; valid out-slots.
        let status = unsafe {
            tessera_attribute_get_fill_value_nullable(
                *self.ctx.ptr()?,
                *attr,
                &mut ptr,
                &mut size,
                &mut valid,
            )
        };
        self.ctx.check(status, "get nullable fill value", "")?;
        // SAFETY: as in `fill_value`.
        let bytes = unsafe { copy_native(ptr, size, "fill value") }?;
        Ok((decode_values("fill value", datatype, &bytes)?, valid != 0))
    }

    /// Releases the native attribute.
    pub fn free(&self) {
        self.handle.free();
    }
}

/// Values attached to the coordinates of one dimension.
///
/// Queries read and write a label by name, like an attribute. The label
/// holds one value per coordinate of its dimension, ordered by
/// [`DataOrder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionLabel {
    /// Label name.
    pub name: String,
    /// Index of the labelled dimension.
    pub dimension: u32,
    /// Order of the values along the dimension.
    pub order: DataOrder,
    /// Datatype of the values.
    pub datatype: Datatype,
}

/// The full description of an array.
#[derive(Debug, Clone)]
pub struct ArraySchema {
    ctx: Context,
    handle: NativeHandle<TesseraArraySchema>,
}

macro_rules! layout_accessors {
    ($set:ident, $get:ident, $ffi_set:ident, $ffi_get:ident, $what:literal) => {
        #[doc = concat!("Sets the ", $what, ".")]
        pub fn $set(&self, layout: Layout) -> Result<()> {
            // SAFETY: live handles.
            let status = unsafe { $ffi_set(*self.ctx.ptr()?, *self.ptr_mut()?, layout.as_u32()) };
            self.ctx.check(status, concat!("set ", $what), layout.as_str())
        }

        #[doc = concat!("Returns the ", $what, ".")]
        pub fn $get(&self) -> Result<Layout> {
            let mut tag = 0;
            // SAFETY: live handles; valid out-slot.
            let status = unsafe { $ffi_get(*self.ctx.ptr()?, *self.ptr()?, &mut tag) };
            self.ctx.check(status, concat!("get ", $what), "")?;
            Layout::from_tag(tag)
        }
    };
}

impl ArraySchema {
    /// Creates an empty schema. The capacity starts at the context's
    /// `sm.tile_capacity`.
    pub fn new(ctx: &Context, array_type: ArrayType) -> Result<Self> {
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live context; valid out-slot.
        let status = unsafe {
            tessera_array_schema_alloc(*ctx.ptr()?, array_type.as_u32(), &mut ptr)
        };
        ctx.check(status, "allocate array schema", array_type.as_str())?;
        Self::from_raw(ctx, ptr)
    }

    pub(crate) fn from_raw(ctx: &Context, ptr: *mut TesseraArraySchema) -> Result<Self> {
        // SAFETY: freshly handed out by the engine.
        let handle =
            unsafe { NativeHandle::acquire(ptr, tessera_array_schema_free, "array schema") }?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    pub(crate) fn ptr(&self) -> Result<HandleGuard<'_, TesseraArraySchema>> {
        self.handle.get()
    }

    fn ptr_mut(&self) -> Result<HandleGuard<'_, TesseraArraySchema>> {
        self.handle.get_mut()
    }

    /// Returns dense or sparse.
    pub fn array_type(&self) -> Result<ArrayType> {
        let mut tag = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_array_schema_get_array_type(*self.ctx.ptr()?, *self.ptr()?, &mut tag)
        };
        self.ctx.check(status, "get array type", "")?;
        ArrayType::from_tag(tag)
    }

    /// Sets a copy of `domain` as the schema's domain.
    pub fn set_domain(&self, domain: &Domain) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe {
            tessera_array_schema_set_domain(*self.ctx.ptr()?, *self.ptr_mut()?, *domain.ptr()?)
        };
        self.ctx.check(status, "set domain", "")
    }

    /// Returns a copy of the domain.
    pub fn domain(&self) -> Result<Domain> {
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_array_schema_get_domain(*self.ctx.ptr()?, *self.ptr()?, &mut ptr)
        };
        self.ctx.check(status, "get domain", "")?;
        Domain::from_raw(&self.ctx, ptr)
    }

    /// Appends a copy of `attribute`.
    pub fn add_attribute(&self, attribute: &Attribute) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe {
            tessera_array_schema_add_attribute(
                *self.ctx.ptr()?,
                *self.ptr_mut()?,
                *attribute.ptr()?,
            )
        };
        self.ctx.check(status, "add attribute", "")
    }

    /// Appends copies of several attributes in order.
    pub fn add_attributes<'a>(
        &self,
        attributes: impl IntoIterator<Item = &'a Attribute>,
    ) -> Result<()> {
        attributes.into_iter().try_for_each(|a| self.add_attribute(a))
    }

    /// Returns the number of attributes.
    pub fn attribute_num(&self) -> Result<u32> {
        let mut num = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_array_schema_get_attribute_num(*self.ctx.ptr()?, *self.ptr()?, &mut num)
        };
        self.ctx.check(status, "get attribute number", "")?;
        Ok(num)
    }

    /// Returns the attribute at `index`.
    pub fn attribute_from_index(&self, index: u32) -> Result<Attribute> {
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_array_schema_get_attribute_from_index(
                *self.ctx.ptr()?,
                *self.ptr()?,
                index,
                &mut ptr,
            )
        };
        self.ctx.check(status, "get attribute", &index.to_string())?;
        Attribute::from_raw(&self.ctx, ptr)
    }

    /// Returns the attribute called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is none.
    pub fn attribute_from_name(&self, name: &str) -> Result<Attribute> {
        let c_name = c_string(name, "attribute name")?;
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_array_schema_get_attribute_from_name(
                *self.ctx.ptr()?,
                *self.ptr()?,
                c_name.as_ptr(),
                &mut ptr,
            )
        };
        self.ctx.check(status, "get attribute", name)?;
        Attribute::from_raw(&self.ctx, ptr)
    }

    /// Returns true if an attribute is called `name`.
    pub fn has_attribute(&self, name: &str) -> Result<bool> {
        let c_name = c_string(name, "attribute name")?;
        let mut has = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_array_schema_has_attribute(
                *self.ctx.ptr()?,
                *self.ptr()?,
                c_name.as_ptr(),
                &mut has,
            )
        };
        self.ctx.check(status, "has attribute", name)?;
        Ok(has != 0)
    }

    /// Returns every attribute in order.
    pub fn attributes(&self) -> Result<Vec<Attribute>> {
        (0..self.attribute_num()?)
            .map(|i| self.attribute_from_index(i))
            .collect()
    }

    /// Labels dimension `dimension` with values of `datatype`. The domain
    /// must be set first, and `name` must not name a dimension or attribute.
    pub fn add_dimension_label(
        &self,
        dimension: u32,
        name: &str,
        order: DataOrder,
        datatype: Datatype,
    ) -> Result<()> {
        let c_name = c_string(name, "dimension label name")?;
        // SAFETY: live handles.
        let status = unsafe {
            tessera_array_schema_add_dimension_label(
                *self.ctx.ptr()?,
                *self.ptr_mut()?,
                dimension,
                c_name.as_ptr(),
                order.as_u32(),
                datatype.as_u32(),
            )
        };
        self.ctx.check(status, "add dimension label", name)
    }

    /// Returns the number of dimension labels.
    pub fn dimension_label_num(&self) -> Result<u32> {
        let mut num = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_array_schema_get_dimension_label_num(*self.ctx.ptr()?, *self.ptr()?, &mut num)
        };
        self.ctx.check(status, "get dimension label number", "")?;
        Ok(num)
    }

    /// Returns the dimension label at `index`.
    pub fn dimension_label_from_index(&self, index: u32) -> Result<DimensionLabel> {
        let schema = self.ptr()?;
        let mut name = std::ptr::null();
        let (mut dimension, mut order, mut datatype) = (0, 0, 0);
        // SAFETY: live handles; valid out-slots.
        let status = unsafe {
            tessera_array_schema_get_dimension_label_from_index(
                *self.ctx.ptr()?,
                *schema,
                index,
                &mut name,
                &mut dimension,
                &mut order,
                &mut datatype,
            )
        };
        self.ctx.check(status, "get dimension label", &index.to_string())?;
        Ok(DimensionLabel {
            // SAFETY: the name belongs to the schema, pinned by `schema`.
            name: unsafe { from_c_string(name) },
            dimension,
            order: DataOrder::from_tag(order)?,
            datatype: Datatype::from_tag(datatype)?,
        })
    }

    /// Returns the dimension label called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if there is none.
    pub fn dimension_label_from_name(&self, name: &str) -> Result<DimensionLabel> {
        let c_name = c_string(name, "dimension label name")?;
        let (mut dimension, mut order, mut datatype) = (0, 0, 0);
        // SAFETY: live handles; valid out-slots.
        let status = unsafe {
            tessera_array_schema_get_dimension_label_from_name(
                *self.ctx.ptr()?,
                *self.ptr()?,
                c_name.as_ptr(),
                &mut dimension,
                &mut order,
                &mut datatype,
            )
        };
        self.ctx.check(status, "get dimension label", name)?;
        Ok(DimensionLabel {
            name: name.to_string(),
            dimension,
            order: DataOrder::from_tag(order)?,
            datatype: Datatype::from_tag(datatype)?,
        })
    }

    /// Returns true if a dimension label is called `name`.
    pub fn has_dimension_label(&self, name: &str) -> Result<bool> {
        let c_name = c_string(name, "dimension label name")?;
        let mut has = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_array_schema_has_dimension_label(
                *self.ctx.ptr()?,
                *self.ptr()?,
                c_name.as_ptr(),
                &mut has,
            )
        };
        self.ctx.check(status, "has dimension label", name)?;
        Ok(has != 0)
    }

    /// Returns every dimension label in order.
    pub fn dimension_labels(&self) -> Result<Vec<DimensionLabel>> {
        (0..self.dimension_label_num()?)
            .map(|i| self.dimension_label_from_index(i))
            .collect()
    }

    layout_accessors!(
        set_cell_order,
        cell_order,
        tessera_array_schema_set_cell_order,
        tessera_array_schema_get_cell_order,
        "cell order"
    );

    layout_accessors!(
        set_tile_order,
        tile_order,
        tessera_array_schema_set_tile_order,
        tessera_array_schema_get_tile_order,
        "tile order"
    );

    /// Sets the number of cells per sparse data tile.
    pub fn set_capacity(&self, capacity: u64) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe {
            tessera_array_schema_set_capacity(*self.ctx.ptr()?, *self.ptr_mut()?, capacity)
        };
        self.ctx.check(status, "set capacity", "")
    }

    /// Returns the number of cells per sparse data tile.
    pub fn capacity(&self) -> Result<u64> {
        let mut capacity = 0;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe {
            tessera_array_schema_get_capacity(*self.ctx.ptr()?, *self.ptr()?, &mut capacity)
        };
        self.ctx.check(status, "get capacity", "")?;
        Ok(capacity)
    }

    /// Validates the schema as a whole.
    pub fn check(&self) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe { tessera_array_schema_check(*self.ctx.ptr()?, *self.ptr()?) };
        self.ctx.check(status, "check array schema", "")
    }

    /// Releases the native schema.
    pub fn free(&self) {
        self.handle.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_read_back_typed() {
        let ctx = Context::new(None).unwrap();
        let dim = Dimension::new(&ctx, "rows", Datatype::Int64, [-5i64, 5], Some(2)).unwrap();
        assert_eq!(dim.name().unwrap(), "rows");
        assert_eq!(dim.datatype().unwrap(), Datatype::Int64);
        assert_eq!(dim.cell_val_num().unwrap(), 1);
        assert_eq!(dim.domain::<i64>().unwrap(), Some([-5, 5]));
        assert_eq!(dim.extent::<i64>().unwrap(), Some(2));
        assert!(dim.domain::<i32>().unwrap_err().is_type_mismatch());

        let err = Dimension::new(&ctx, "x", Datatype::Float32, [0i32, 1], None).unwrap_err();
        assert!(err.is_type_mismatch());

        let key = Dimension::new_string(&ctx, "key", Datatype::StringAscii).unwrap();
        assert!(key.is_var().unwrap());
        assert_eq!(key.domain::<u8>().unwrap(), None);
        assert_eq!(key.extent::<u8>().unwrap(), None);
    }

    #[test]
    fn inverted_domains_fail_in_the_engine() {
        let ctx = Context::new(None).unwrap();
        let err = Dimension::new(&ctx, "d", Datatype::Int32, [10, 1], None).unwrap_err();
        assert!(matches!(err, Error::Native { .. }), "{err}");
        assert!(ctx.last_error().unwrap().is_some());
    }

    #[test]
    fn domains_hold_copies() {
        let ctx = Context::new(None).unwrap();
        let domain = Domain::new(&ctx).unwrap();
        let rows = Dimension::new(&ctx, "rows", Datatype::Int32, [1, 4], None).unwrap();
        let cols = Dimension::new(&ctx, "cols", Datatype::Int32, [1, 8], Some(4)).unwrap();
        domain.add_dimensions([&rows, &cols]).unwrap();
        rows.free();

        assert_eq!(domain.ndim().unwrap(), 2);
        assert_eq!(domain.datatype().unwrap(), Datatype::Int32);
        assert!(domain.has_dimension("cols").unwrap());
        assert!(!domain.has_dimension("depth").unwrap());
        assert_eq!(domain.dimension_from_index(0).unwrap().name().unwrap(), "rows");
        assert_eq!(
            domain.dimension_from_name("cols").unwrap().domain::<i32>().unwrap(),
            Some([1, 8])
        );
        assert!(domain.dimension_from_name("depth").unwrap_err().is_not_found());
        assert!(domain.dimension_from_index(2).unwrap_err().is_not_found());
        assert_eq!(domain.dimensions().unwrap().len(), 2);
    }

    #[test]
    fn attribute_settings() {
        let ctx = Context::new(None).unwrap();
        let attr = Attribute::new(&ctx, "v", Datatype::Float32).unwrap();
        assert_eq!(attr.name().unwrap(), "v");
        assert_eq!(attr.cell_size().unwrap(), 4);
        attr.set_cell_val_num(2).unwrap();
        assert_eq!(attr.cell_val_num().unwrap(), 2);
        attr.set_fill_value(&[1.5f32, -1.5]).unwrap();
        assert_eq!(attr.fill_value::<f32>().unwrap(), vec![1.5, -1.5]);
        assert!(attr.set_fill_value(&[1.5f32]).is_err());
        assert!(attr.set_fill_value(&[1i32, 2]).unwrap_err().is_type_mismatch());

        assert!(!attr.nullable().unwrap());
        assert!(attr.set_fill_value_nullable(&[0f32, 0.0], true).is_err());
        attr.set_nullable(true).unwrap();
        attr.set_fill_value_nullable(&[0f32, 0.0], true).unwrap();
        assert_eq!(attr.fill_value_nullable::<f32>().unwrap(), (vec![0.0, 0.0], true));

        let text = Attribute::new(&ctx, "s", Datatype::StringUtf8).unwrap();
        text.set_cell_val_num(VAR_NUM).unwrap();
        assert_eq!(text.cell_val_num().unwrap(), VAR_NUM);
    }

    #[test]
    fn schema_assembly() {
        let ctx = Context::new(None).unwrap();
        let schema = ArraySchema::new(&ctx, ArrayType::Sparse).unwrap();
        assert_eq!(schema.array_type().unwrap(), ArrayType::Sparse);
        assert_eq!(schema.capacity().unwrap(), 10_000);
        assert!(schema.check().is_err());

        let domain = Domain::new(&ctx).unwrap();
        domain
            .add_dimension(&Dimension::new(&ctx, "x", Datatype::Float64, [0.0, 1.0], None).unwrap())
            .unwrap();
        schema.set_domain(&domain).unwrap();
        let a = Attribute::new(&ctx, "a", Datatype::Int8).unwrap();
        let b = Attribute::new(&ctx, "b", Datatype::Bool).unwrap();
        schema.add_attributes([&a, &b]).unwrap();
        schema.set_capacity(64).unwrap();
        schema.set_cell_order(Layout::ColMajor).unwrap();
        schema.set_tile_order(Layout::RowMajor).unwrap();
        schema.check().unwrap();

        assert_eq!(schema.capacity().unwrap(), 64);
        assert_eq!(schema.cell_order().unwrap(), Layout::ColMajor);
        assert_eq!(schema.tile_order().unwrap(), Layout::RowMajor);
        assert_eq!(schema.attribute_num().unwrap(), 2);
        assert_eq!(schema.attribute_from_index(1).unwrap().name().unwrap(), "b");
        assert_eq!(
            schema.attribute_from_name("a").unwrap().datatype().unwrap(),
            Datatype::Int8
        );
        assert!(schema.has_attribute("b").unwrap());
        assert!(!schema.has_attribute("x").unwrap());
        assert!(schema.attribute_from_name("c").unwrap_err().is_not_found());
        assert_eq!(schema.domain().unwrap().ndim().unwrap(), 1);
        assert_eq!(schema.attributes().unwrap().len(), 2);
    }

    #[test]
    fn dimension_labels_describe_their_dimension() {
        let ctx = Context::new(None).unwrap();
        let schema = ArraySchema::new(&ctx, ArrayType::Dense).unwrap();
        let err = schema
            .add_dimension_label(0, "depth", DataOrder::Increasing, Datatype::Float64)
            .unwrap_err();
        assert!(matches!(err, Error::Native { .. }), "{err}");

        let domain = Domain::new(&ctx).unwrap();
        domain
            .add_dimension(&Dimension::new(&ctx, "z", Datatype::Int32, [1, 8], None).unwrap())
            .unwrap();
        schema.set_domain(&domain).unwrap();
        schema
            .add_attribute(&Attribute::new(&ctx, "t", Datatype::Float32).unwrap())
            .unwrap();
        schema
            .add_dimension_label(0, "depth", DataOrder::Decreasing, Datatype::Float64)
            .unwrap();
        assert!(schema
            .add_dimension_label(0, "t", DataOrder::Increasing, Datatype::Int32)
            .is_err());
        schema.check().unwrap();

        let depth = DimensionLabel {
            name: "depth".to_string(),
            dimension: 0,
            order: DataOrder::Decreasing,
            datatype: Datatype::Float64,
        };
        assert_eq!(schema.dimension_label_num().unwrap(), 1);
        assert_eq!(schema.dimension_label_from_index(0).unwrap(), depth);
        assert_eq!(schema.dimension_label_from_name("depth").unwrap(), depth);
        assert!(schema.has_dimension_label("depth").unwrap());
        assert!(!schema.has_dimension_label("t").unwrap());
        assert!(schema.dimension_label_from_name("t").unwrap_err().is_not_found());
        assert_eq!(schema.dimension_labels().unwrap(), vec![depth]);
    }
}
