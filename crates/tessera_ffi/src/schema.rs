//! Dimension, domain, attribute and array schema functions.
//!
//! Getters that return pointers hand out views into the object behind the
//! handle; they stay valid until the object is modified or freed.

use std::ffi::{c_char, c_void, CString};

use tessera_engine::{
    ArraySchema, ArrayType, Attribute, DataOrder, Dimension, DimensionLabel, Domain, EngineError,
    Layout,
};

use crate::buffer::{bytes_arg, str_arg, write_out};
use crate::context::{datatype_arg, enum_arg};
use crate::error::{guard, FfiError, FfiResult, TesseraResult};
use crate::types::{
    Opaque, TesseraArraySchema, TesseraAttribute, TesseraCtx, TesseraDimension, TesseraDomain,
};

fn c_name(name: &str) -> FfiResult<CString> {
    CString::new(name).map_err(|_| FfiError::invalid_argument("name contains NUL"))
}

fn flag(value: bool) -> i32 {
    i32::from(value)
}

/// The object behind a dimension handle.
#[derive(Debug)]
pub struct DimensionObject {
    dimension: Dimension,
    name: CString,
}

impl DimensionObject {
    pub(crate) fn new(dimension: Dimension) -> FfiResult<Self> {
        Ok(Self {
            name: c_name(dimension.name())?,
            dimension,
        })
    }
}

/// The object behind a domain handle.
#[derive(Debug, Default)]
pub struct DomainObject {
    domain: Domain,
}

/// The object behind an attribute handle.
#[derive(Debug)]
pub struct AttributeObject {
    attribute: Attribute,
    name: CString,
}

impl AttributeObject {
    fn new(attribute: Attribute) -> FfiResult<Self> {
        Ok(Self {
            name: c_name(attribute.name())?,
            attribute,
        })
    }
}

/// The object behind an array schema handle.
#[derive(Debug)]
pub struct SchemaObject {
    schema: ArraySchema,
    label_names: Vec<CString>,
}

impl SchemaObject {
    pub(crate) fn new(schema: ArraySchema) -> Self {
        // Label names were checked for NUL when they were added.
        let label_names = schema
            .dimension_labels()
            .iter()
            .map(|l| CString::new(l.name()).unwrap_or_default())
            .collect();
        Self {
            schema,
            label_names,
        }
    }

    pub(crate) fn schema(&self) -> &ArraySchema {
        &self.schema
    }
}

// === Dimension ===

/// Allocates a dimension.
///
/// # Arguments
///
/// * `ctx` - The context
/// * `name` - Dimension name
/// * `datatype` - Datatype tag
/// * `dim_domain` - Two values `[lo, hi]` of the datatype; null for string
///   dimensions
/// * `tile_extent` - One value of the datatype, or null
/// * `dim_out` - Output pointer for the dimension handle
///
/// # Safety
///
/// - `ctx` must be a valid context handle
/// - `dim_domain` and `tile_extent` must be null or point to values of the
///   datatype's width
/// - `dim_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_alloc(
    ctx: *mut TesseraCtx,
    name: *const c_char,
    datatype: u32,
    dim_domain: *const c_void,
    tile_extent: *const c_void,
    dim_out: *mut *mut TesseraDimension,
) -> TesseraResult {
    guard(ctx, "tessera_dimension_alloc", |_| {
        let name = str_arg(name, "name")?;
        let datatype = datatype_arg(datatype)?;
        let width = datatype.size();
        let domain = if dim_domain.is_null() {
            None
        } else {
            Some(bytes_arg(dim_domain, 2 * width, "dim_domain")?)
        };
        let extent = if tile_extent.is_null() {
            None
        } else {
            Some(bytes_arg(tile_extent, width, "tile_extent")?)
        };
        let dimension = Dimension::new(name, datatype, domain, extent)?;
        write_out(
            dim_out,
            "dim_out",
            TesseraDimension::wrap(DimensionObject::new(dimension)?),
        )
    })
}

/// Frees a dimension and nulls the handle.
///
/// # Safety
///
/// `dim` must be null or point to a handle from this library.
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_free(dim: *mut *mut TesseraDimension) {
    TesseraDimension::release(dim);
}

/// Returns the dimension name.
///
/// # Safety
///
/// - `ctx` and `dim` must be valid handles
/// - `name_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_get_name(
    ctx: *mut TesseraCtx,
    dim: *mut TesseraDimension,
    name_out: *mut *const c_char,
) -> TesseraResult {
    guard(ctx, "tessera_dimension_get_name", |_| {
        let dim = TesseraDimension::get_ref(dim)?;
        write_out(name_out, "name_out", dim.name.as_ptr())
    })
}

/// Returns the dimension datatype tag.
///
/// # Safety
///
/// - `ctx` and `dim` must be valid handles
/// - `type_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_get_type(
    ctx: *mut TesseraCtx,
    dim: *mut TesseraDimension,
    type_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_dimension_get_type", |_| {
        let dim = TesseraDimension::get_ref(dim)?;
        write_out(type_out, "type_out", dim.dimension.datatype().as_u32())
    })
}

/// Returns a pointer to the `[lo, hi]` domain, or null for string
/// dimensions.
///
/// # Safety
///
/// - `ctx` and `dim` must be valid handles
/// - `domain_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_get_domain(
    ctx: *mut TesseraCtx,
    dim: *mut TesseraDimension,
    domain_out: *mut *const c_void,
) -> TesseraResult {
    guard(ctx, "tessera_dimension_get_domain", |_| {
        let dim = TesseraDimension::get_ref(dim)?;
        let ptr = dim
            .dimension
            .domain()
            .map_or(std::ptr::null(), |d| d.as_ptr().cast());
        write_out(domain_out, "domain_out", ptr)
    })
}

/// Returns a pointer to the tile extent, or null if none was set.
///
/// # Safety
///
/// - `ctx` and `dim` must be valid handles
/// - `extent_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_get_tile_extent(
    ctx: *mut TesseraCtx,
    dim: *mut TesseraDimension,
    extent_out: *mut *const c_void,
) -> TesseraResult {
    guard(ctx, "tessera_dimension_get_tile_extent", |_| {
        let dim = TesseraDimension::get_ref(dim)?;
        let ptr = dim
            .dimension
            .tile_extent()
            .map_or(std::ptr::null(), |e| e.as_ptr().cast());
        write_out(extent_out, "extent_out", ptr)
    })
}

/// Sets the number of values per cell.
///
/// # Safety
///
/// `ctx` and `dim` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_set_cell_val_num(
    ctx: *mut TesseraCtx,
    dim: *mut TesseraDimension,
    cell_val_num: u32,
) -> TesseraResult {
    guard(ctx, "tessera_dimension_set_cell_val_num", |_| {
        TesseraDimension::get_mut(dim)?
            .dimension
            .set_cell_val_num(cell_val_num)?;
        Ok(())
    })
}

/// Returns the number of values per cell.
///
/// # Safety
///
/// - `ctx` and `dim` must be valid handles
/// - `num_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_dimension_get_cell_val_num(
    ctx: *mut TesseraCtx,
    dim: *mut TesseraDimension,
    num_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_dimension_get_cell_val_num", |_| {
        let dim = TesseraDimension::get_ref(dim)?;
        write_out(num_out, "num_out", dim.dimension.cell_val_num())
    })
}

// === Domain ===

/// Allocates an empty domain.
///
/// # Safety
///
/// - `ctx` must be a valid context handle
/// - `domain_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_alloc(
    ctx: *mut TesseraCtx,
    domain_out: *mut *mut TesseraDomain,
) -> TesseraResult {
    guard(ctx, "tessera_domain_alloc", |_| {
        write_out(
            domain_out,
            "domain_out",
            TesseraDomain::wrap(DomainObject::default()),
        )
    })
}

/// Frees a domain and nulls the handle.
///
/// # Safety
///
/// `domain` must be null or point to a handle from this library.
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_free(domain: *mut *mut TesseraDomain) {
    TesseraDomain::release(domain);
}

/// Appends a copy of a dimension to the domain.
///
/// # Safety
///
/// `ctx`, `domain` and `dim` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_add_dimension(
    ctx: *mut TesseraCtx,
    domain: *mut TesseraDomain,
    dim: *mut TesseraDimension,
) -> TesseraResult {
    guard(ctx, "tessera_domain_add_dimension", |_| {
        let dim = TesseraDimension::get_ref(dim)?.dimension.clone();
        TesseraDomain::get_mut(domain)?.domain.add_dimension(dim)?;
        Ok(())
    })
}

/// Returns the number of dimensions.
///
/// # Safety
///
/// - `ctx` and `domain` must be valid handles
/// - `ndim_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_get_ndim(
    ctx: *mut TesseraCtx,
    domain: *mut TesseraDomain,
    ndim_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_domain_get_ndim", |_| {
        let ndim = TesseraDomain::get_ref(domain)?.domain.ndim();
        write_out(ndim_out, "ndim_out", ndim as u32)
    })
}

/// Returns the datatype shared by every dimension. Fails for
/// heterogeneous domains.
///
/// # Safety
///
/// - `ctx` and `domain` must be valid handles
/// - `type_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_get_type(
    ctx: *mut TesseraCtx,
    domain: *mut TesseraDomain,
    type_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_domain_get_type", |_| {
        let datatype = TesseraDomain::get_ref(domain)?.domain.datatype()?;
        write_out(type_out, "type_out", datatype.as_u32())
    })
}

/// Returns a new handle to a copy of the dimension at `index`.
///
/// # Safety
///
/// - `ctx` and `domain` must be valid handles
/// - `dim_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_get_dimension_from_index(
    ctx: *mut TesseraCtx,
    domain: *mut TesseraDomain,
    index: u32,
    dim_out: *mut *mut TesseraDimension,
) -> TesseraResult {
    guard(ctx, "tessera_domain_get_dimension_from_index", |_| {
        let domain = &TesseraDomain::get_ref(domain)?.domain;
        let dim = domain.dimension(index as usize)?.clone();
        write_out(
            dim_out,
            "dim_out",
            TesseraDimension::wrap(DimensionObject::new(dim)?),
        )
    })
}

/// Returns a new handle to a copy of the named dimension.
///
/// # Safety
///
/// - `ctx` and `domain` must be valid handles
/// - `name` must be a valid NUL-terminated string
/// - `dim_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_get_dimension_from_name(
    ctx: *mut TesseraCtx,
    domain: *mut TesseraDomain,
    name: *const c_char,
    dim_out: *mut *mut TesseraDimension,
) -> TesseraResult {
    guard(ctx, "tessera_domain_get_dimension_from_name", |_| {
        let name = str_arg(name, "name")?;
        let domain = &TesseraDomain::get_ref(domain)?.domain;
        let (_, dim) = domain
            .dimension_by_name(name)
            .ok_or_else(|| EngineError::field_not_found(name))?;
        write_out(
            dim_out,
            "dim_out",
            TesseraDimension::wrap(DimensionObject::new(dim.clone())?),
        )
    })
}

/// Reports whether the domain has a dimension named `name`.
///
/// # Safety
///
/// - `ctx` and `domain` must be valid handles
/// - `name` must be a valid NUL-terminated string
/// - `has_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_domain_has_dimension(
    ctx: *mut TesseraCtx,
    domain: *mut TesseraDomain,
    name: *const c_char,
    has_out: *mut i32,
) -> TesseraResult {
    guard(ctx, "tessera_domain_has_dimension", |_| {
        let name = str_arg(name, "name")?;
        let domain = &TesseraDomain::get_ref(domain)?.domain;
        write_out(
            has_out,
            "has_out",
            flag(domain.dimension_by_name(name).is_some()),
        )
    })
}

// === Attribute ===

/// Allocates an attribute with one value per cell.
///
/// # Safety
///
/// - `ctx` must be a valid context handle
/// - `name` must be a valid NUL-terminated string
/// - `attr_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_alloc(
    ctx: *mut TesseraCtx,
    name: *const c_char,
    datatype: u32,
    attr_out: *mut *mut TesseraAttribute,
) -> TesseraResult {
    guard(ctx, "tessera_attribute_alloc", |_| {
        let attribute = Attribute::new(str_arg(name, "name")?, datatype_arg(datatype)?)?;
        write_out(
            attr_out,
            "attr_out",
            TesseraAttribute::wrap(AttributeObject::new(attribute)?),
        )
    })
}

/// Frees an attribute and nulls the handle.
///
/// # Safety
///
/// `attr` must be null or point to a handle from this library.
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_free(attr: *mut *mut TesseraAttribute) {
    TesseraAttribute::release(attr);
}

/// Returns the attribute name.
///
/// # Safety
///
/// - `ctx` and `attr` must be valid handles
/// - `name_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_get_name(
    ctx: *mut TesseraCtx,
    attr: *mut TesseraAttribute,
    name_out: *mut *const c_char,
) -> TesseraResult {
    guard(ctx, "tessera_attribute_get_name", |_| {
        let attr = TesseraAttribute::get_ref(attr)?;
        write_out(name_out, "name_out", attr.name.as_ptr())
    })
}

/// Returns the attribute datatype tag.
///
/// # Safety
///
/// - `ctx` and `attr` must be valid handles
/// - `type_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_get_type(
    ctx: *mut TesseraCtx,
    attr: *mut TesseraAttribute,
    type_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_attribute_get_type", |_| {
        let attr = TesseraAttribute::get_ref(attr)?;
        write_out(type_out, "type_out", attr.attribute.datatype().as_u32())
    })
}

/// Sets the number of values per cell; `u32::MAX` makes it var-sized.
/// Resets the fill value.
///
/// # Safety
///
/// `ctx` and `attr` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_set_cell_val_num(
    ctx: *mut TesseraCtx,
    attr: *mut TesseraAttribute,
    cell_val_num: u32,
) -> TesseraResult {
    guard(ctx, "tessera_attribute_set_cell_val_num", |_| {
        TesseraAttribute::get_mut(attr)?
            .attribute
            .set_cell_val_num(cell_val_num)?;
        Ok(())
    })
}

/// Returns the number of values per cell.
///
/// # Safety
///
/// - `ctx` and `attr` must be valid handles
/// - `num_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_get_cell_val_num(
    ctx: *mut TesseraCtx,
    attr: *mut TesseraAttribute,
    num_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_attribute_get_cell_val_num", |_| {
        let attr = TesseraAttribute::get_ref(attr)?;
        write_out(num_out, "num_out", attr.attribute.cell_val_num())
    })
}

/// Returns the byte size of one cell, or `u64::MAX` if var-sized.
///
/// # Safety
///
/// - `ctx` and `attr` must be valid handles
/// - `size_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_get_cell_size(
    ctx: *mut TesseraCtx,
    attr: *mut TesseraAttribute,
    size_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_attribute_get_cell_size", |_| {
        let attr = TesseraAttribute::get_ref(attr)?;
        write_out(
            size_out,
            "size_out",
            attr.attribute.cell_size().unwrap_or(u64::MAX),
        )
    })
}

/// Sets whether the attribute accepts nulls.
///
/// # Safety
///
/// `ctx` and `attr` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_set_nullable(
    ctx: *mut TesseraCtx,
    attr: *mut TesseraAttribute,
    nullable: u8,
) -> TesseraResult {
    guard(ctx, "tessera_attribute_set_nullable", |_| {
        TesseraAttribute::get_mut(attr)?
            .attribute
            .set_nullable(nullable != 0);
        Ok(())
    })
}

/// Reports whether the attribute accepts nulls.
///
/// # Safety
///
/// - `ctx` and `attr` must be valid handles
/// - `nullable_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_get_nullable(
    ctx: *mut TesseraCtx,
    attr: *mut TesseraAttribute,
    nullable_out: *mut u8,
) -> TesseraResult {
    guard(ctx, "tessera_attribute_get_nullable", |_| {
        let attr = TesseraAttribute::get_ref(attr)?;
        write_out(
            nullable_out,
            "nullable_out",
            u8::from(attr.attribute.nullable()),
        )
    })
}

/// Sets the value read back for unwritten dense cells.
///
/// # Safety
///
/// - `ctx` and `attr` must be valid handles
/// - `value` must point to `size` readable bytes
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_set_fill_value(
    ctx: *mut TesseraCtx,
    attr: *mut TesseraAttribute,
    value: *const c_void,
    size: u64,
) -> TesseraResult {
    guard(ctx, "tessera_attribute_set_fill_value", |_| {
        let value = bytes_arg(value, size, "value")?;
        TesseraAttribute::get_mut(attr)?
            .attribute
            .set_fill_value(value)?;
        Ok(())
    })
}

/// Returns the fill value.
///
/// # Safety
///
/// - `ctx` and `attr` must be valid handles
/// - `value_out` and `size_out` must be valid pointers
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_get_fill_value(
    ctx: *mut TesseraCtx,
    attr: *mut TesseraAttribute,
    value_out: *mut *const c_void,
    size_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_attribute_get_fill_value", |_| {
        let fill = TesseraAttribute::get_ref(attr)?.attribute.fill_value();
        write_out(value_out, "value_out", fill.as_ptr().cast())?;
        write_out(size_out, "size_out", fill.len() as u64)
    })
}

/// Sets the fill value and its validity for a nullable attribute.
///
/// # Safety
///
/// - `ctx` and `attr` must be valid handles
/// - `value` must point to `size` readable bytes
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_set_fill_value_nullable(
    ctx: *mut TesseraCtx,
    attr: *mut TesseraAttribute,
    value: *const c_void,
    size: u64,
    valid: u8,
) -> TesseraResult {
    guard(ctx, "tessera_attribute_set_fill_value_nullable", |_| {
        let value = bytes_arg(value, size, "value")?;
        TesseraAttribute::get_mut(attr)?
            .attribute
            .set_fill_value_nullable(value, valid != 0)?;
        Ok(())
    })
}

/// Returns the fill value and its validity for a nullable attribute.
///
/// # Safety
///
/// - `ctx` and `attr` must be valid handles
/// - `value_out`, `size_out` and `valid_out` must be valid pointers
#[no_mangle]
pub unsafe extern "C" fn tessera_attribute_get_fill_value_nullable(
    ctx: *mut TesseraCtx,
    attr: *mut TesseraAttribute,
    value_out: *mut *const c_void,
    size_out: *mut u64,
    valid_out: *mut u8,
) -> TesseraResult {
    guard(ctx, "tessera_attribute_get_fill_value_nullable", |_| {
        let attr = &TesseraAttribute::get_ref(attr)?.attribute;
        if !attr.nullable() {
            return Err(FfiError::invalid_argument(format!(
                "attribute '{}' is not nullable",
                attr.name()
            )));
        }
        let fill = attr.fill_value();
        write_out(value_out, "value_out", fill.as_ptr().cast())?;
        write_out(size_out, "size_out", fill.len() as u64)?;
        write_out(valid_out, "valid_out", u8::from(attr.fill_valid()))
    })
}

// === Array schema ===

/// Allocates an empty array schema.
///
/// The capacity starts at the context's `sm.tile_capacity`.
///
/// # Safety
///
/// - `ctx` must be a valid context handle
/// - `schema_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_alloc(
    ctx: *mut TesseraCtx,
    array_type: u32,
    schema_out: *mut *mut TesseraArraySchema,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_alloc", |ctx| {
        let array_type = enum_arg(array_type, "array type", ArrayType::from_u32)?;
        let mut schema = ArraySchema::new(array_type);
        schema.set_capacity(ctx.engine_config()?.tile_capacity)?;
        write_out(
            schema_out,
            "schema_out",
            TesseraArraySchema::wrap(SchemaObject::new(schema)),
        )
    })
}

/// Frees an array schema and nulls the handle.
///
/// # Safety
///
/// `schema` must be null or point to a handle from this library.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_free(schema: *mut *mut TesseraArraySchema) {
    TesseraArraySchema::release(schema);
}

/// Returns the array type tag.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `type_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_array_type(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    type_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_get_array_type", |_| {
        let schema = &TesseraArraySchema::get_ref(schema)?.schema;
        write_out(type_out, "type_out", schema.array_type().as_u32())
    })
}

/// Sets the schema's domain to a copy of `domain`.
///
/// # Safety
///
/// `ctx`, `schema` and `domain` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_set_domain(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    domain: *mut TesseraDomain,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_set_domain", |_| {
        let domain = TesseraDomain::get_ref(domain)?.domain.clone();
        TesseraArraySchema::get_mut(schema)?.schema.set_domain(domain);
        Ok(())
    })
}

/// Returns a new handle to a copy of the schema's domain.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `domain_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_domain(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    domain_out: *mut *mut TesseraDomain,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_get_domain", |_| {
        let domain = TesseraArraySchema::get_ref(schema)?.schema.domain()?.clone();
        write_out(
            domain_out,
            "domain_out",
            TesseraDomain::wrap(DomainObject { domain }),
        )
    })
}

/// Appends a copy of an attribute.
///
/// # Safety
///
/// `ctx`, `schema` and `attr` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_add_attribute(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    attr: *mut TesseraAttribute,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_add_attribute", |_| {
        let attr = TesseraAttribute::get_ref(attr)?.attribute.clone();
        TesseraArraySchema::get_mut(schema)?
            .schema
            .add_attribute(attr)?;
        Ok(())
    })
}

/// Returns the number of attributes.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `num_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_attribute_num(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    num_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_get_attribute_num", |_| {
        let schema = &TesseraArraySchema::get_ref(schema)?.schema;
        write_out(num_out, "num_out", schema.attributes().len() as u32)
    })
}

/// Returns a new handle to a copy of the attribute at `index`.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `attr_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_attribute_from_index(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    index: u32,
    attr_out: *mut *mut TesseraAttribute,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_get_attribute_from_index", |_| {
        let schema = &TesseraArraySchema::get_ref(schema)?.schema;
        let attr = schema.attribute(index as usize)?.clone();
        write_out(
            attr_out,
            "attr_out",
            TesseraAttribute::wrap(AttributeObject::new(attr)?),
        )
    })
}

/// Returns a new handle to a copy of the named attribute.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `name` must be a valid NUL-terminated string
/// - `attr_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_attribute_from_name(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    name: *const c_char,
    attr_out: *mut *mut TesseraAttribute,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_get_attribute_from_name", |_| {
        let name = str_arg(name, "name")?;
        let schema = &TesseraArraySchema::get_ref(schema)?.schema;
        let (_, attr) = schema
            .attribute_by_name(name)
            .ok_or_else(|| EngineError::field_not_found(name))?;
        write_out(
            attr_out,
            "attr_out",
            TesseraAttribute::wrap(AttributeObject::new(attr.clone())?),
        )
    })
}

/// Reports whether the schema has an attribute named `name`.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `name` must be a valid NUL-terminated string
/// - `has_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_has_attribute(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    name: *const c_char,
    has_out: *mut i32,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_has_attribute", |_| {
        let name = str_arg(name, "name")?;
        let schema = &TesseraArraySchema::get_ref(schema)?.schema;
        write_out(
            has_out,
            "has_out",
            flag(schema.attribute_by_name(name).is_some()),
        )
    })
}

unsafe fn write_label(
    label: &DimensionLabel,
    dim_index_out: *mut u32,
    order_out: *mut u32,
    type_out: *mut u32,
) -> FfiResult<()> {
    write_out(dim_index_out, "dim_index_out", label.dimension() as u32)?;
    write_out(order_out, "order_out", label.order().as_u32())?;
    write_out(type_out, "type_out", label.datatype().as_u32())
}

/// Adds a dimension label to the schema. The schema's domain must already
/// hold the labelled dimension.
///
/// # Arguments
///
/// * `dim_index` - Index of the labelled dimension
/// * `name` - Label name, distinct from every dimension and attribute
/// * `order` - Order the label values follow along the dimension
/// * `datatype` - Datatype of the label values
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `name` must be a valid NUL-terminated string
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_add_dimension_label(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    dim_index: u32,
    name: *const c_char,
    order: u32,
    datatype: u32,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_add_dimension_label", |_| {
        let name = str_arg(name, "name")?;
        let order = enum_arg(order, "data order", DataOrder::from_u32)?;
        let datatype = datatype_arg(datatype)?;
        let c = c_name(name)?;
        let object = TesseraArraySchema::get_mut(schema)?;
        object
            .schema
            .add_dimension_label(dim_index as usize, name, order, datatype)?;
        object.label_names.push(c);
        Ok(())
    })
}

/// Returns the number of dimension labels.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `num_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_dimension_label_num(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    num_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_get_dimension_label_num", |_| {
        let schema = &TesseraArraySchema::get_ref(schema)?.schema;
        write_out(num_out, "num_out", schema.dimension_labels().len() as u32)
    })
}

/// Describes the dimension label at `index`. The name is a view into the
/// schema object.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - every out pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_dimension_label_from_index(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    index: u32,
    name_out: *mut *const c_char,
    dim_index_out: *mut u32,
    order_out: *mut u32,
    type_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_get_dimension_label_from_index", |_| {
        let object = TesseraArraySchema::get_ref(schema)?;
        let label = object.schema.dimension_label(index as usize)?;
        let name = object
            .label_names
            .get(index as usize)
            .ok_or_else(|| FfiError::invalid_argument("label name missing"))?;
        write_out(name_out, "name_out", name.as_ptr())?;
        write_label(label, dim_index_out, order_out, type_out)
    })
}

/// Describes the dimension label named `name`.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `name` must be a valid NUL-terminated string
/// - every out pointer must be valid
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_dimension_label_from_name(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    name: *const c_char,
    dim_index_out: *mut u32,
    order_out: *mut u32,
    type_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_get_dimension_label_from_name", |_| {
        let name = str_arg(name, "name")?;
        let schema = &TesseraArraySchema::get_ref(schema)?.schema;
        let (_, label) = schema
            .dimension_label_by_name(name)
            .ok_or_else(|| EngineError::field_not_found(name))?;
        write_label(label, dim_index_out, order_out, type_out)
    })
}

/// Reports whether the schema has a dimension label named `name`.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `name` must be a valid NUL-terminated string
/// - `has_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_has_dimension_label(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    name: *const c_char,
    has_out: *mut i32,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_has_dimension_label", |_| {
        let name = str_arg(name, "name")?;
        let schema = &TesseraArraySchema::get_ref(schema)?.schema;
        write_out(
            has_out,
            "has_out",
            flag(schema.dimension_label_by_name(name).is_some()),
        )
    })
}

/// Sets the cell order (row- or column-major).
///
/// # Safety
///
/// `ctx` and `schema` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_set_cell_order(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    layout: u32,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_set_cell_order", |_| {
        let layout = enum_arg(layout, "layout", Layout::from_u32)?;
        TesseraArraySchema::get_mut(schema)?
            .schema
            .set_cell_order(layout)?;
        Ok(())
    })
}

/// Returns the cell order tag.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `layout_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_cell_order(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    layout_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_get_cell_order", |_| {
        let schema = &TesseraArraySchema::get_ref(schema)?.schema;
        write_out(layout_out, "layout_out", schema.cell_order().as_u32())
    })
}

/// Sets the tile order (row- or column-major).
///
/// # Safety
///
/// `ctx` and `schema` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_set_tile_order(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    layout: u32,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_set_tile_order", |_| {
        let layout = enum_arg(layout, "layout", Layout::from_u32)?;
        TesseraArraySchema::get_mut(schema)?
            .schema
            .set_tile_order(layout)?;
        Ok(())
    })
}

/// Returns the tile order tag.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `layout_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_tile_order(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    layout_out: *mut u32,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_get_tile_order", |_| {
        let schema = &TesseraArraySchema::get_ref(schema)?.schema;
        write_out(layout_out, "layout_out", schema.tile_order().as_u32())
    })
}

/// Sets the sparse tile capacity.
///
/// # Safety
///
/// `ctx` and `schema` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_set_capacity(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    capacity: u64,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_set_capacity", |_| {
        TesseraArraySchema::get_mut(schema)?
            .schema
            .set_capacity(capacity)?;
        Ok(())
    })
}

/// Returns the sparse tile capacity.
///
/// # Safety
///
/// - `ctx` and `schema` must be valid handles
/// - `capacity_out` must be a valid pointer
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_get_capacity(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
    capacity_out: *mut u64,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_get_capacity", |_| {
        let schema = &TesseraArraySchema::get_ref(schema)?.schema;
        write_out(capacity_out, "capacity_out", schema.capacity())
    })
}

/// Validates the schema as a whole.
///
/// # Safety
///
/// `ctx` and `schema` must be valid handles.
#[no_mangle]
pub unsafe extern "C" fn tessera_array_schema_check(
    ctx: *mut TesseraCtx,
    schema: *mut TesseraArraySchema,
) -> TesseraResult {
    guard(ctx, "tessera_array_schema_check", |_| {
        TesseraArraySchema::get_ref(schema)?.schema.check()?;
        Ok(())
    })
}
