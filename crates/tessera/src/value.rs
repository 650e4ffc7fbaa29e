//! Typed metadata values.

use crate::datatype::{check_kind, Datatype, Element, TypedBuffer};
use crate::error::{Error, Result};

/// A metadata value: a datatype and one or more values of it.
///
/// Strings are stored as their UTF-8 bytes under [`Datatype::StringUtf8`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataValue {
    datatype: Datatype,
    data: TypedBuffer,
}

impl MetadataValue {
    /// Creates a value from elements of `datatype`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if `T` is not the element type of
    /// `datatype`, and [`Error::InvalidArgument`] if `values` is empty.
    pub fn new<T: Element>(datatype: Datatype, values: Vec<T>) -> Result<Self> {
        check_kind::<T>("metadata value", datatype)?;
        if values.is_empty() {
            return Err(Error::invalid_argument("metadata values must not be empty"));
        }
        Ok(Self {
            datatype,
            data: T::into_buffer(values),
        })
    }

    /// Creates a single-element value.
    pub fn scalar<T: Element>(datatype: Datatype, value: T) -> Result<Self> {
        Self::new(datatype, vec![value])
    }

    /// Creates a UTF-8 string value.
    pub fn string(value: &str) -> Result<Self> {
        Self::new(Datatype::StringUtf8, value.as_bytes().to_vec())
    }

    /// Creates a blob value.
    pub fn blob(bytes: Vec<u8>) -> Result<Self> {
        Self::new(Datatype::Blob, bytes)
    }

    /// Rebuilds a value from engine bytes.
    pub(crate) fn from_native(datatype: Datatype, bytes: &[u8]) -> Result<Self> {
        if datatype == Datatype::Any {
            return Err(Error::UnsupportedDatatype { datatype });
        }
        let data = TypedBuffer::from_bytes(datatype.value_kind(), bytes)?;
        Ok(Self { datatype, data })
    }

    /// Returns the datatype.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the value has no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the underlying buffer.
    pub fn data(&self) -> &TypedBuffer {
        &self.data
    }

    /// Copies the elements out as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if `T` is not the element type.
    pub fn values<T: Element>(&self) -> Result<Vec<T>> {
        check_kind::<T>("metadata value", self.datatype)?;
        T::copy_from(&self.data, self.data.len())
            .ok_or_else(|| Error::type_mismatch("metadata value", self.data.kind(), T::KIND))
    }

    /// Returns the value as a string, for 8-bit string datatypes.
    pub fn as_str(&self) -> Option<&str> {
        if !matches!(
            self.datatype,
            Datatype::StringUtf8 | Datatype::StringAscii | Datatype::Char
        ) {
            return None;
        }
        std::str::from_utf8(self.data.as_bytes()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_check_kinds() {
        let value = MetadataValue::new(Datatype::Float64, vec![1.5, 2.5]).unwrap();
        assert_eq!(value.len(), 2);
        assert_eq!(value.values::<f64>().unwrap(), vec![1.5, 2.5]);
        assert!(value.values::<f32>().unwrap_err().is_type_mismatch());
        assert!(value.as_str().is_none());

        let err = MetadataValue::new(Datatype::Int32, vec![1i64]).unwrap_err();
        assert!(err.is_type_mismatch());
        assert!(MetadataValue::new::<i32>(Datatype::Int32, Vec::new()).is_err());

        let time = MetadataValue::scalar(Datatype::DateTimeMs, 1_700_000_000_000i64).unwrap();
        assert_eq!(time.values::<i64>().unwrap(), vec![1_700_000_000_000]);
    }

    #[test]
    fn strings_and_blobs() {
        let value = MetadataValue::string("héllo").unwrap();
        assert_eq!(value.datatype(), Datatype::StringUtf8);
        assert_eq!(value.len(), 6);
        assert_eq!(value.as_str(), Some("héllo"));

        let blob = MetadataValue::blob(vec![0, 255]).unwrap();
        assert_eq!(blob.datatype(), Datatype::Blob);
        assert_eq!(blob.values::<u8>().unwrap(), vec![0, 255]);
        assert!(blob.as_str().is_none());
    }

    #[test]
    fn native_bytes_decode() {
        let value = MetadataValue::from_native(Datatype::Int16, &[1, 0, 2, 0]).unwrap();
        assert_eq!(value.values::<i16>().unwrap(), vec![1, 2]);
        assert!(MetadataValue::from_native(Datatype::Any, &[1]).is_err());
    }
}
