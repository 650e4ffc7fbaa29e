//! Typed inclusive ranges over one dimension.

use crate::datatype::{TypedBuffer, ValueKind};
use crate::error::{Error, Result};

/// An inclusive `[start, end]` range.
///
/// Fixed variants carry values of the dimension's element type; `Var`
/// carries the bytes of a string range.
#[derive(Debug, Clone, PartialEq)]
pub enum Range {
    /// `i8` bounds.
    Int8(i8, i8),
    /// `i16` bounds.
    Int16(i16, i16),
    /// `i32` bounds.
    Int32(i32, i32),
    /// `i64` bounds.
    Int64(i64, i64),
    /// `u8` bounds.
    UInt8(u8, u8),
    /// `u16` bounds.
    UInt16(u16, u16),
    /// `u32` bounds.
    UInt32(u32, u32),
    /// `u64` bounds.
    UInt64(u64, u64),
    /// `f32` bounds.
    Float32(f32, f32),
    /// `f64` bounds.
    Float64(f64, f64),
    /// String bounds.
    Var(Vec<u8>, Vec<u8>),
}

/// A type a [`Range`] can be built from and extracted as.
pub trait RangeType: Sized {
    /// Wraps two bounds.
    fn into_range(start: Self, end: Self) -> Range;

    /// Unwraps the bounds of a range of this type.
    fn from_range(range: &Range) -> Option<(Self, Self)>;

    /// The stride reported next to the bounds.
    fn stride() -> Self;
}

macro_rules! numeric_range {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl RangeType for $ty {
                fn into_range(start: Self, end: Self) -> Range {
                    Range::$variant(start, end)
                }

                fn from_range(range: &Range) -> Option<(Self, Self)> {
                    match range {
                        Range::$variant(start, end) => Some((*start, *end)),
                        _ => None,
                    }
                }

                fn stride() -> Self {
                    Self::default()
                }
            }
        )+

        impl Range {
            /// Returns the element kind of a fixed range, `None` for `Var`.
            pub fn kind(&self) -> Option<ValueKind> {
                match self {
                    $(Self::$variant(..) => Some(ValueKind::$variant),)+
                    Self::Var(..) => None,
                }
            }

            /// Returns the native-endian bytes of both bounds.
            pub(crate) fn bytes(&self) -> (Vec<u8>, Vec<u8>) {
                match self {
                    $(Self::$variant(start, end) => {
                        (start.to_ne_bytes().to_vec(), end.to_ne_bytes().to_vec())
                    })+
                    Self::Var(start, end) => (start.clone(), end.clone()),
                }
            }

            /// Rebuilds a fixed range from two values of `kind`.
            pub(crate) fn from_fixed_bytes(
                kind: ValueKind,
                start: &[u8],
                end: &[u8],
            ) -> Option<Self> {
                let bounds = TypedBuffer::from_bytes(kind, &[start, end].concat()).ok()?;
                match bounds {
                    $(TypedBuffer::$variant(v) => match v.as_slice() {
                        &[start, end] => Some(Self::$variant(start, end)),
                        _ => None,
                    },)+
                    TypedBuffer::Bool(_) => None,
                }
            }
        }
    };
}

numeric_range! {
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => UInt8,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
    f32 => Float32,
    f64 => Float64,
}

impl RangeType for String {
    fn into_range(start: Self, end: Self) -> Range {
        Range::Var(start.into_bytes(), end.into_bytes())
    }

    fn from_range(range: &Range) -> Option<(Self, Self)> {
        match range {
            Range::Var(start, end) => Some((
                String::from_utf8_lossy(start).into_owned(),
                String::from_utf8_lossy(end).into_owned(),
            )),
            _ => None,
        }
    }

    fn stride() -> Self {
        String::new()
    }
}

impl Range {
    /// Builds a range from two bounds of the same type.
    pub fn new<T: RangeType>(start: T, end: T) -> Self {
        T::into_range(start, end)
    }

    /// Builds a string range.
    pub fn var(start: &str, end: &str) -> Self {
        Self::Var(start.as_bytes().to_vec(), end.as_bytes().to_vec())
    }

    /// Returns true for string ranges.
    pub fn is_var(&self) -> bool {
        matches!(self, Self::Var(..))
    }

    /// Returns `[start, end, stride]`; the stride is always zero.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if the range does not hold `T`.
    pub fn extract<T: RangeType>(&self) -> Result<[T; 3]> {
        let (start, end) = self.endpoints()?;
        Ok([start, end, T::stride()])
    }

    /// Returns `(start, end)`.
    pub fn endpoints<T: RangeType>(&self) -> Result<(T, T)> {
        T::from_range(self).ok_or_else(|| {
            Error::type_mismatch(
                "range",
                std::any::type_name::<T>(),
                self.kind().map_or("string", ValueKind::as_str),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn extract_checks_the_type() {
        let range = Range::new(1i32, 5);
        assert_eq!(range, Range::Int32(1, 5));
        assert_eq!(range.kind(), Some(ValueKind::Int32));
        assert_eq!(range.extract::<i32>().unwrap(), [1, 5, 0]);
        assert!(range.extract::<i64>().unwrap_err().is_type_mismatch());
        assert!(range.endpoints::<String>().is_err());

        let var = Range::var("a", "m");
        assert!(var.is_var());
        assert_eq!(var.kind(), None);
        assert_eq!(
            var.extract::<String>().unwrap(),
            ["a".to_string(), "m".to_string(), String::new()]
        );
        let empty = Range::new(String::new(), String::new());
        assert_eq!(empty, Range::var("", ""));
        assert_eq!(empty.endpoints::<String>().unwrap(), (String::new(), String::new()));
    }

    #[test]
    fn bytes_are_native_endian() {
        let (start, end) = Range::UInt16(1, 258).bytes();
        assert_eq!(start, 1u16.to_ne_bytes());
        assert_eq!(end, 258u16.to_ne_bytes());
        assert_eq!(Range::from_fixed_bytes(ValueKind::Bool, &[0], &[1]), None);
    }

    proptest! {
        #[test]
        fn fixed_bytes_rebuild_the_range(start in any::<i64>(), end in any::<i64>()) {
            let range = Range::new(start, end);
            let (lo, hi) = range.bytes();
            prop_assert_eq!(Range::from_fixed_bytes(ValueKind::Int64, &lo, &hi), Some(range));
        }

        #[test]
        fn endpoints_only_match_their_own_type(start in any::<f32>(), end in any::<f32>()) {
            let range = Range::new(start, end);
            prop_assert!(range.endpoints::<f64>().is_err());
            prop_assert!(range.endpoints::<u32>().is_err());
            let (lo, hi) = range.endpoints::<f32>().unwrap();
            prop_assert_eq!(lo.to_bits(), start.to_bits());
            prop_assert_eq!(hi.to_bits(), end.to_bits());
        }
    }
}
