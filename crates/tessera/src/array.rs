//! Arrays: lifecycle and metadata.

use std::collections::BTreeMap;

use tessera_ffi::{
    tessera_array_alloc, tessera_array_close, tessera_array_create, tessera_array_delete_metadata,
    tessera_array_free, tessera_array_get_metadata, tessera_array_get_metadata_from_index,
    tessera_array_get_metadata_num, tessera_array_get_query_type, tessera_array_get_schema,
    tessera_array_get_uri, tessera_array_has_metadata_key, tessera_array_is_open,
    tessera_array_open, tessera_array_open_at, tessera_array_put_metadata, tessera_array_reopen,
    TesseraArray,
};

use crate::buffer::copy_native;
use crate::context::{c_string, from_c_string, Context};
use crate::datatype::Datatype;
use crate::error::{Error, Result};
use crate::handle::{HandleGuard, NativeHandle};
use crate::schema::ArraySchema;
use crate::types::QueryType;
use crate::value::MetadataValue;

/// A handle to a stored array.
///
/// Reads observe the fragments committed before the array was opened or
/// last reopened. Metadata written while open for writing is applied when
/// the array closes.
#[derive(Debug)]
pub struct Array {
    ctx: Context,
    handle: NativeHandle<TesseraArray>,
}

impl Array {
    /// Creates a closed handle for `uri`.
    pub fn new(ctx: &Context, uri: &str) -> Result<Self> {
        let c_uri = c_string(uri, "array uri")?;
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live context; valid out-slot.
        let status = unsafe { tessera_array_alloc(*ctx.ptr()?, c_uri.as_ptr(), &mut ptr) };
        ctx.check(status, "allocate array", uri)?;
        // SAFETY: freshly handed out by the engine.
        let handle = unsafe { NativeHandle::acquire(ptr, tessera_array_free, "array") }?;
        Ok(Self {
            ctx: ctx.clone(),
            handle,
        })
    }

    pub(crate) fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub(crate) fn ptr(&self) -> Result<HandleGuard<'_, TesseraArray>> {
        self.handle.get()
    }

    fn ptr_mut(&self) -> Result<HandleGuard<'_, TesseraArray>> {
        self.handle.get_mut()
    }

    /// Creates the stored array at this handle's URI.
    pub fn create(&self, schema: &ArraySchema) -> Result<()> {
        let uri = self.uri()?;
        let c_uri = c_string(&uri, "array uri")?;
        // SAFETY: live handles; the URI outlives the call.
        let status =
            unsafe { tessera_array_create(*self.ctx.ptr()?, c_uri.as_ptr(), *schema.ptr()?) };
        self.ctx.check(status, "create array", &uri)?;
        tracing::debug!(uri = %uri, "created array");
        Ok(())
    }

    /// Opens the array for reading or writing.
    pub fn open(&self, query_type: QueryType) -> Result<()> {
        // SAFETY: live handles.
        let status =
            unsafe { tessera_array_open(*self.ctx.ptr()?, *self.ptr_mut()?, query_type.as_u32()) };
        self.ctx.check(status, "open array", query_type.as_str())
    }

    /// Opens the array as of `timestamp`, in milliseconds since the epoch.
    ///
    /// Reads see only fragments written at or before `timestamp`; writes
    /// stamp their fragments with it. [`Array::reopen`] keeps the timestamp.
    pub fn open_at(&self, query_type: QueryType, timestamp: u64) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe {
            tessera_array_open_at(
                *self.ctx.ptr()?,
                *self.ptr_mut()?,
                query_type.as_u32(),
                timestamp,
            )
        };
        self.ctx
            .check(status, "open array at timestamp", &timestamp.to_string())
    }

    /// Refreshes the view of an array open for reading.
    pub fn reopen(&self) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe { tessera_array_reopen(*self.ctx.ptr()?, *self.ptr_mut()?) };
        self.ctx.check(status, "reopen array", "")
    }

    /// Closes the array. Closing a closed array does nothing.
    pub fn close(&self) -> Result<()> {
        // SAFETY: live handles.
        let status = unsafe { tessera_array_close(*self.ctx.ptr()?, *self.ptr_mut()?) };
        self.ctx.check(status, "close array", "")
    }

    /// Returns true while open.
    pub fn is_open(&self) -> Result<bool> {
        let mut open = 0;
        // SAFETY: live handles; valid out-slot.
        let status =
            unsafe { tessera_array_is_open(*self.ctx.ptr()?, *self.ptr()?, &mut open) };
        self.ctx.check(status, "check array open", "")?;
        Ok(open != 0)
    }

    /// Returns the mode the array is open in.
    pub fn query_type(&self) -> Result<QueryType> {
        let mut tag = 0;
        // SAFETY: live handles; valid out-slot.
        let status =
            unsafe { tessera_array_get_query_type(*self.ctx.ptr()?, *self.ptr()?, &mut tag) };
        self.ctx.check(status, "get array query type", "")?;
        QueryType::from_tag(tag)
    }

    /// Returns a copy of the schema of an open array.
    pub fn schema(&self) -> Result<ArraySchema> {
        let mut ptr = std::ptr::null_mut();
        // SAFETY: live handles; valid out-slot.
        let status =
            unsafe { tessera_array_get_schema(*self.ctx.ptr()?, *self.ptr()?, &mut ptr) };
        self.ctx.check(status, "get array schema", "")?;
        ArraySchema::from_raw(&self.ctx, ptr)
    }

    /// Returns the URI.
    pub fn uri(&self) -> Result<String> {
        let mut uri = std::ptr::null();
        let array = self.ptr()?;
        // SAFETY: live handles; valid out-slot.
        let status = unsafe { tessera_array_get_uri(*self.ctx.ptr()?, *array, &mut uri) };
        self.ctx.check(status, "get array uri", "")?;
        // SAFETY: the URI belongs to the array handle, pinned by `array`.
        Ok(unsafe { from_c_string(uri) })
    }

    /// Closes the array if open, then releases the native handle.
    pub fn free(&self) {
        if self.handle.is_freed() {
            return;
        }
        if matches!(self.is_open(), Ok(true)) {
            if let Err(e) = self.close() {
                tracing::warn!(error = %e, "closing array before free failed");
            }
        }
        self.handle.free();
    }

    // === Metadata ===

    /// Stages a metadata value on an array open for writing.
    pub fn put_metadata(&self, key: &str, value: &MetadataValue) -> Result<()> {
        let c_key = c_string(key, "metadata key")?;
        let num = u32::try_from(value.len()).map_err(|_| {
            Error::invalid_argument(format!("metadata '{key}' has too many values"))
        })?;
        let bytes = value.data().as_bytes();
        // SAFETY: live handles; `bytes` holds `num` values and outlives the call.
        let status = unsafe {
            tessera_array_put_metadata(
                *self.ctx.ptr()?,
                *self.ptr_mut()?,
                c_key.as_ptr(),
                value.datatype().as_u32(),
                num,
                bytes.as_ptr().cast(),
            )
        };
        self.ctx.check(status, "put metadata", key)
    }

    /// Stages removal of a metadata key on an array open for writing.
    pub fn delete_metadata(&self, key: &str) -> Result<()> {
        let c_key = c_string(key, "metadata key")?;
        // SAFETY: live handles.
        let status = unsafe {
            tessera_array_delete_metadata(*self.ctx.ptr()?, *self.ptr_mut()?, c_key.as_ptr())
        };
        self.ctx.check(status, "delete metadata", key)
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the key is absent.
    pub fn get_metadata(&self, key: &str) -> Result<MetadataValue> {
        let c_key = c_string(key, "metadata key")?;
        let (mut tag, mut num, mut ptr) = (0, 0, std::ptr::null());
        let array = self.ptr()?;
        // SAFETY: live handles; valid out-slots.
        let status = unsafe {
            tessera_array_get_metadata(
                *self.ctx.ptr()?,
                *array,
                c_key.as_ptr(),
                &mut tag,
                &mut num,
                &mut ptr,
            )
        };
        self.ctx.check(status, "get metadata", key)?;
        if ptr.is_null() {
            return Err(Error::NotFound {
                operation: "get metadata",
                subject: key.to_string(),
                message: "no such key".into(),
            });
        }
        let datatype = Datatype::from_tag(tag)?;
        // SAFETY: the value holds `num` values of `datatype`, owned by the
        // open array and pinned by `array`.
        let bytes = unsafe { copy_native(ptr, u64::from(num) * datatype.size(), key) }?;
        MetadataValue::from_native(datatype, &bytes)
    }

    /// Returns the datatype stored under `key`, or `None` if absent.
    pub fn has_metadata_key(&self, key: &str) -> Result<Option<Datatype>> {
        let c_key = c_string(key, "metadata key")?;
        let (mut tag, mut has) = (0, 0);
        // SAFETY: live handles; valid out-slots.
        let status = unsafe {
            tessera_array_has_metadata_key(
                *self.ctx.ptr()?,
                *self.ptr()?,
                c_key.as_ptr(),
                &mut tag,
                &mut has,
            )
        };
        self.ctx.check(status, "has metadata key", key)?;
        if has == 0 {
            return Ok(None);
        }
        Datatype::from_tag(tag).map(Some)
    }

    /// Returns the number of metadata entries.
    pub fn metadata_num(&self) -> Result<u64> {
        let mut num = 0;
        // SAFETY: live handles; valid out-slot.
        let status =
            unsafe { tessera_array_get_metadata_num(*self.ctx.ptr()?, *self.ptr()?, &mut num) };
        self.ctx.check(status, "get metadata number", "")?;
        Ok(num)
    }

    /// Returns the entry at `index` in key order.
    pub fn metadata_from_index(&self, index: u64) -> Result<(String, MetadataValue)> {
        let (mut key, mut key_len, mut tag, mut num, mut ptr) =
            (std::ptr::null(), 0u32, 0, 0, std::ptr::null());
        let array = self.ptr()?;
        // SAFETY: live handles; valid out-slots.
        let status = unsafe {
            tessera_array_get_metadata_from_index(
                *self.ctx.ptr()?,
                *array,
                index,
                &mut key,
                &mut key_len,
                &mut tag,
                &mut num,
                &mut ptr,
            )
        };
        self.ctx.check(status, "get metadata", &index.to_string())?;
        // SAFETY: the key holds `key_len` bytes owned by the open array.
        let key = unsafe { copy_native(key.cast(), u64::from(key_len), "metadata key") }?;
        let key = String::from_utf8_lossy(&key).into_owned();
        let datatype = Datatype::from_tag(tag)?;
        // SAFETY: as in `get_metadata`.
        let bytes = unsafe { copy_native(ptr, u64::from(num) * datatype.size(), &key) }?;
        Ok((key, MetadataValue::from_native(datatype, &bytes)?))
    }

    /// Returns every metadata entry.
    pub fn metadata_map(&self) -> Result<BTreeMap<String, MetadataValue>> {
        (0..self.metadata_num()?)
            .map(|i| self.metadata_from_index(i))
            .collect()
    }
}

impl Drop for Array {
    fn drop(&mut self) {
        self.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ArrayType, Attribute, Dimension, Domain};

    fn create(ctx: &Context) -> Array {
        let uri = format!("mem://binding-array/{}", uuid::Uuid::new_v4());
        let domain = Domain::new(ctx).unwrap();
        domain
            .add_dimension(&Dimension::new(ctx, "d", Datatype::Int32, [1, 4], None).unwrap())
            .unwrap();
        let schema = ArraySchema::new(ctx, ArrayType::Dense).unwrap();
        schema.set_domain(&domain).unwrap();
        schema
            .add_attribute(&Attribute::new(ctx, "a", Datatype::Int32).unwrap())
            .unwrap();
        let array = Array::new(ctx, &uri).unwrap();
        array.create(&schema).unwrap();
        array
    }

    #[test]
    fn lifecycle() {
        let ctx = Context::new(None).unwrap();
        let array = create(&ctx);
        assert!(array.uri().unwrap().starts_with("mem://binding-array/"));
        assert!(!array.is_open().unwrap());
        assert!(array.schema().is_err());

        array.open(QueryType::Read).unwrap();
        assert!(array.is_open().unwrap());
        assert_eq!(array.query_type().unwrap(), QueryType::Read);
        assert_eq!(array.schema().unwrap().array_type().unwrap(), ArrayType::Dense);
        array.reopen().unwrap();
        assert!(array.open(QueryType::Read).is_err());
        array.close().unwrap();
        array.close().unwrap();

        array.open(QueryType::Write).unwrap();
        assert!(array.reopen().is_err());
        array.free();
        array.free();
        assert!(matches!(array.uri(), Err(Error::HandleFreed { what: "array" })));
    }

    #[test]
    fn missing_arrays_are_not_found() {
        let ctx = Context::new(None).unwrap();
        let array = Array::new(&ctx, "mem://binding-array/never-created").unwrap();
        let err = array.open(QueryType::Read).unwrap_err();
        assert!(err.is_not_found(), "{err}");
    }

    #[test]
    fn metadata_round_trip() {
        let ctx = Context::new(None).unwrap();
        let array = create(&ctx);
        array.open(QueryType::Write).unwrap();
        array
            .put_metadata("scale", &MetadataValue::scalar(Datatype::Float64, 0.5).unwrap())
            .unwrap();
        array
            .put_metadata("name", &MetadataValue::string("tiles").unwrap())
            .unwrap();
        array
            .put_metadata("gone", &MetadataValue::scalar(Datatype::Int8, 1i8).unwrap())
            .unwrap();
        array.delete_metadata("gone").unwrap();
        assert!(array.get_metadata("scale").is_err());
        array.close().unwrap();

        array.open(QueryType::Read).unwrap();
        assert_eq!(array.metadata_num().unwrap(), 2);
        assert_eq!(
            array.get_metadata("scale").unwrap().values::<f64>().unwrap(),
            vec![0.5]
        );
        assert_eq!(array.get_metadata("name").unwrap().as_str(), Some("tiles"));
        let err = array.get_metadata("gone").unwrap_err();
        assert!(err.is_not_found());
        assert!(!err.is_type_mismatch());
        assert_eq!(
            array.has_metadata_key("name").unwrap(),
            Some(Datatype::StringUtf8)
        );
        assert_eq!(array.has_metadata_key("gone").unwrap(), None);

        let (key, value) = array.metadata_from_index(0).unwrap();
        assert_eq!(key, "name");
        assert_eq!(value.len(), 5);
        assert!(array.metadata_from_index(2).unwrap_err().is_not_found());
        let map = array.metadata_map().unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["name", "scale"]);
    }
}
