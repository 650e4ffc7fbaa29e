//! The datatype registry.
//!
//! Every engine datatype maps to one byte width and one [`ValueKind`], the
//! concrete Rust element type its values are stored as. [`TypedBuffer`] is
//! the closed sum over those element types; [`Element`] connects each Rust
//! type to its variant.

use std::ffi::c_void;
use std::fmt;

use crate::error::{Error, Result};

/// Cell value number marking a variable-sized field.
pub const VAR_NUM: u32 = u32::MAX;

/// Name of the zipped-coordinates pseudo field of sparse arrays.
pub const COORDS: &str = "__coords";

/// Storage datatype of a dimension, attribute or metadata value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Datatype {
    /// 32-bit signed integer.
    Int32 = 0,
    /// 64-bit signed integer.
    Int64 = 1,
    /// 32-bit float.
    Float32 = 2,
    /// 64-bit float.
    Float64 = 3,
    /// Character.
    Char = 4,
    /// 8-bit signed integer.
    Int8 = 5,
    /// 8-bit unsigned integer.
    UInt8 = 6,
    /// 16-bit signed integer.
    Int16 = 7,
    /// 16-bit unsigned integer.
    UInt16 = 8,
    /// 32-bit unsigned integer.
    UInt32 = 9,
    /// 64-bit unsigned integer.
    UInt64 = 10,
    /// ASCII string.
    StringAscii = 11,
    /// UTF-8 string.
    StringUtf8 = 12,
    /// UTF-16 string.
    StringUtf16 = 13,
    /// UTF-32 string.
    StringUtf32 = 14,
    /// UCS2 string.
    StringUcs2 = 15,
    /// UCS4 string.
    StringUcs4 = 16,
    /// Untyped; has no element type.
    Any = 17,
    /// Datetime, years since epoch.
    DateTimeYear = 18,
    /// Datetime, months since epoch.
    DateTimeMonth = 19,
    /// Datetime, weeks since epoch.
    DateTimeWeek = 20,
    /// Datetime, days since epoch.
    DateTimeDay = 21,
    /// Datetime, hours since epoch.
    DateTimeHr = 22,
    /// Datetime, minutes since epoch.
    DateTimeMin = 23,
    /// Datetime, seconds since epoch.
    DateTimeSec = 24,
    /// Datetime, milliseconds since epoch.
    DateTimeMs = 25,
    /// Datetime, microseconds since epoch.
    DateTimeUs = 26,
    /// Datetime, nanoseconds since epoch.
    DateTimeNs = 27,
    /// Datetime, picoseconds since epoch.
    DateTimePs = 28,
    /// Datetime, femtoseconds since epoch.
    DateTimeFs = 29,
    /// Datetime, attoseconds since epoch.
    DateTimeAs = 30,
    /// Time of day, hours.
    TimeHr = 31,
    /// Time of day, minutes.
    TimeMin = 32,
    /// Time of day, seconds.
    TimeSec = 33,
    /// Time of day, milliseconds.
    TimeMs = 34,
    /// Time of day, microseconds.
    TimeUs = 35,
    /// Time of day, nanoseconds.
    TimeNs = 36,
    /// Time of day, picoseconds.
    TimePs = 37,
    /// Time of day, femtoseconds.
    TimeFs = 38,
    /// Time of day, attoseconds.
    TimeAs = 39,
    /// Binary blob.
    Blob = 40,
    /// Boolean.
    Bool = 41,
}

/// The concrete element type a datatype's values are stored as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `i8`.
    Int8,
    /// `i16`.
    Int16,
    /// `i32`.
    Int32,
    /// `i64`.
    Int64,
    /// `u8`.
    UInt8,
    /// `u16`.
    UInt16,
    /// `u32`.
    UInt32,
    /// `u64`.
    UInt64,
    /// `f32`.
    Float32,
    /// `f64`.
    Float64,
    /// `bool`, one byte per value.
    Bool,
    /// No concrete element type.
    Any,
}

impl ValueKind {
    /// Returns the width in bytes of one element, 0 for [`ValueKind::Any`].
    #[must_use]
    pub const fn width(self) -> u64 {
        match self {
            Self::Int8 | Self::UInt8 | Self::Bool => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
            Self::Any => 0,
        }
    }

    /// Returns the Rust name of the element type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int8 => "i8",
            Self::Int16 => "i16",
            Self::Int32 => "i32",
            Self::Int64 => "i64",
            Self::UInt8 => "u8",
            Self::UInt16 => "u16",
            Self::UInt32 => "u32",
            Self::UInt64 => "u64",
            Self::Float32 => "f32",
            Self::Float64 => "f64",
            Self::Bool => "bool",
            Self::Any => "any",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Datatype {
    /// All datatypes in tag order.
    pub const ALL: [Datatype; 42] = [
        Datatype::Int32,
        Datatype::Int64,
        Datatype::Float32,
        Datatype::Float64,
        Datatype::Char,
        Datatype::Int8,
        Datatype::UInt8,
        Datatype::Int16,
        Datatype::UInt16,
        Datatype::UInt32,
        Datatype::UInt64,
        Datatype::StringAscii,
        Datatype::StringUtf8,
        Datatype::StringUtf16,
        Datatype::StringUtf32,
        Datatype::StringUcs2,
        Datatype::StringUcs4,
        Datatype::Any,
        Datatype::DateTimeYear,
        Datatype::DateTimeMonth,
        Datatype::DateTimeWeek,
        Datatype::DateTimeDay,
        Datatype::DateTimeHr,
        Datatype::DateTimeMin,
        Datatype::DateTimeSec,
        Datatype::DateTimeMs,
        Datatype::DateTimeUs,
        Datatype::DateTimeNs,
        Datatype::DateTimePs,
        Datatype::DateTimeFs,
        Datatype::DateTimeAs,
        Datatype::TimeHr,
        Datatype::TimeMin,
        Datatype::TimeSec,
        Datatype::TimeMs,
        Datatype::TimeUs,
        Datatype::TimeNs,
        Datatype::TimePs,
        Datatype::TimeFs,
        Datatype::TimeAs,
        Datatype::Blob,
        Datatype::Bool,
    ];

    /// Converts a raw ABI tag into a datatype.
    #[must_use]
    pub fn from_u32(tag: u32) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Returns the raw ABI tag.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Returns the element type values of this datatype are stored as.
    #[must_use]
    pub const fn value_kind(self) -> ValueKind {
        match self {
            Self::Int8 => ValueKind::Int8,
            Self::Int16 => ValueKind::Int16,
            Self::Int32 => ValueKind::Int32,
            Self::Int64
            | Self::DateTimeYear
            | Self::DateTimeMonth
            | Self::DateTimeWeek
            | Self::DateTimeDay
            | Self::DateTimeHr
            | Self::DateTimeMin
            | Self::DateTimeSec
            | Self::DateTimeMs
            | Self::DateTimeUs
            | Self::DateTimeNs
            | Self::DateTimePs
            | Self::DateTimeFs
            | Self::DateTimeAs
            | Self::TimeHr
            | Self::TimeMin
            | Self::TimeSec
            | Self::TimeMs
            | Self::TimeUs
            | Self::TimeNs
            | Self::TimePs
            | Self::TimeFs
            | Self::TimeAs => ValueKind::Int64,
            Self::UInt8 | Self::Char | Self::StringAscii | Self::StringUtf8 | Self::Blob => {
                ValueKind::UInt8
            }
            Self::UInt16 | Self::StringUtf16 | Self::StringUcs2 => ValueKind::UInt16,
            Self::UInt32 | Self::StringUtf32 | Self::StringUcs4 => ValueKind::UInt32,
            Self::UInt64 => ValueKind::UInt64,
            Self::Float32 => ValueKind::Float32,
            Self::Float64 => ValueKind::Float64,
            Self::Bool => ValueKind::Bool,
            Self::Any => ValueKind::Any,
        }
    }

    /// Returns the width in bytes of one value.
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            // Untyped values are counted in bytes.
            Self::Any => 1,
            _ => self.value_kind().width(),
        }
    }

    /// Allocates a zeroed buffer of `len` elements of this datatype.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedDatatype`] for [`Datatype::Any`].
    pub fn make_buffer(self, len: usize) -> Result<TypedBuffer> {
        TypedBuffer::zeroed(self.value_kind(), len)
            .ok_or(Error::UnsupportedDatatype { datatype: self })
    }

    /// Returns true for the string encodings.
    #[must_use]
    pub const fn is_string(self) -> bool {
        matches!(
            self,
            Self::StringAscii
                | Self::StringUtf8
                | Self::StringUtf16
                | Self::StringUtf32
                | Self::StringUcs2
                | Self::StringUcs4
        )
    }

    /// Returns the canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Int32 => "INT32",
            Self::Int64 => "INT64",
            Self::Float32 => "FLOAT32",
            Self::Float64 => "FLOAT64",
            Self::Char => "CHAR",
            Self::Int8 => "INT8",
            Self::UInt8 => "UINT8",
            Self::Int16 => "INT16",
            Self::UInt16 => "UINT16",
            Self::UInt32 => "UINT32",
            Self::UInt64 => "UINT64",
            Self::StringAscii => "STRING_ASCII",
            Self::StringUtf8 => "STRING_UTF8",
            Self::StringUtf16 => "STRING_UTF16",
            Self::StringUtf32 => "STRING_UTF32",
            Self::StringUcs2 => "STRING_UCS2",
            Self::StringUcs4 => "STRING_UCS4",
            Self::Any => "ANY",
            Self::DateTimeYear => "DATETIME_YEAR",
            Self::DateTimeMonth => "DATETIME_MONTH",
            Self::DateTimeWeek => "DATETIME_WEEK",
            Self::DateTimeDay => "DATETIME_DAY",
            Self::DateTimeHr => "DATETIME_HR",
            Self::DateTimeMin => "DATETIME_MIN",
            Self::DateTimeSec => "DATETIME_SEC",
            Self::DateTimeMs => "DATETIME_MS",
            Self::DateTimeUs => "DATETIME_US",
            Self::DateTimeNs => "DATETIME_NS",
            Self::DateTimePs => "DATETIME_PS",
            Self::DateTimeFs => "DATETIME_FS",
            Self::DateTimeAs => "DATETIME_AS",
            Self::TimeHr => "TIME_HR",
            Self::TimeMin => "TIME_MIN",
            Self::TimeSec => "TIME_SEC",
            Self::TimeMs => "TIME_MS",
            Self::TimeUs => "TIME_US",
            Self::TimeNs => "TIME_NS",
            Self::TimePs => "TIME_PS",
            Self::TimeFs => "TIME_FS",
            Self::TimeAs => "TIME_AS",
            Self::Blob => "BLOB",
            Self::Bool => "BOOL",
        }
    }

    /// Parses a canonical name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|d| d.as_str() == name)
    }

    pub(crate) fn from_tag(tag: u32) -> Result<Self> {
        Self::from_u32(tag)
            .ok_or_else(|| Error::invalid_argument(format!("unknown datatype tag {tag}")))
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vector of one concrete element type.
///
/// Booleans are held as one byte per value, non-zero meaning true, so the
/// engine can write into them without producing invalid `bool`s.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedBuffer {
    /// `i8` values.
    Int8(Vec<i8>),
    /// `i16` values.
    Int16(Vec<i16>),
    /// `i32` values.
    Int32(Vec<i32>),
    /// `i64` values.
    Int64(Vec<i64>),
    /// `u8` values.
    UInt8(Vec<u8>),
    /// `u16` values.
    UInt16(Vec<u16>),
    /// `u32` values.
    UInt32(Vec<u32>),
    /// `u64` values.
    UInt64(Vec<u64>),
    /// `f32` values.
    Float32(Vec<f32>),
    /// `f64` values.
    Float64(Vec<f64>),
    /// Boolean bytes.
    Bool(Vec<u8>),
}

macro_rules! each_variant {
    ($buffer:expr, $values:ident => $body:expr) => {
        match $buffer {
            TypedBuffer::Int8($values) => $body,
            TypedBuffer::Int16($values) => $body,
            TypedBuffer::Int32($values) => $body,
            TypedBuffer::Int64($values) => $body,
            TypedBuffer::UInt8($values) => $body,
            TypedBuffer::UInt16($values) => $body,
            TypedBuffer::UInt32($values) => $body,
            TypedBuffer::UInt64($values) => $body,
            TypedBuffer::Float32($values) => $body,
            TypedBuffer::Float64($values) => $body,
            TypedBuffer::Bool($values) => $body,
        }
    };
}

macro_rules! map_variant {
    ($buffer:expr, $values:ident => $body:expr) => {
        match $buffer {
            TypedBuffer::Int8($values) => TypedBuffer::Int8($body),
            TypedBuffer::Int16($values) => TypedBuffer::Int16($body),
            TypedBuffer::Int32($values) => TypedBuffer::Int32($body),
            TypedBuffer::Int64($values) => TypedBuffer::Int64($body),
            TypedBuffer::UInt8($values) => TypedBuffer::UInt8($body),
            TypedBuffer::UInt16($values) => TypedBuffer::UInt16($body),
            TypedBuffer::UInt32($values) => TypedBuffer::UInt32($body),
            TypedBuffer::UInt64($values) => TypedBuffer::UInt64($body),
            TypedBuffer::Float32($values) => TypedBuffer::Float32($body),
            TypedBuffer::Float64($values) => TypedBuffer::Float64($body),
            TypedBuffer::Bool($values) => TypedBuffer::Bool($body),
        }
    };
}

impl TypedBuffer {
    /// Allocates `len` zeroed elements, or `None` for [`ValueKind::Any`].
    #[must_use]
    pub fn zeroed(kind: ValueKind, len: usize) -> Option<Self> {
        Some(match kind {
            ValueKind::Int8 => Self::Int8(vec![0; len]),
            ValueKind::Int16 => Self::Int16(vec![0; len]),
            ValueKind::Int32 => Self::Int32(vec![0; len]),
            ValueKind::Int64 => Self::Int64(vec![0; len]),
            ValueKind::UInt8 => Self::UInt8(vec![0; len]),
            ValueKind::UInt16 => Self::UInt16(vec![0; len]),
            ValueKind::UInt32 => Self::UInt32(vec![0; len]),
            ValueKind::UInt64 => Self::UInt64(vec![0; len]),
            ValueKind::Float32 => Self::Float32(vec![0.0; len]),
            ValueKind::Float64 => Self::Float64(vec![0.0; len]),
            ValueKind::Bool => Self::Bool(vec![0; len]),
            ValueKind::Any => return None,
        })
    }

    /// Decodes native-endian bytes into a buffer of `kind`.
    ///
    /// Fails for [`ValueKind::Any`] and when `bytes` is not a whole number
    /// of elements.
    pub fn from_bytes(kind: ValueKind, bytes: &[u8]) -> Result<Self> {
        fn decode<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
            bytes
                .chunks_exact(std::mem::size_of::<T>())
                .map(bytemuck::pod_read_unaligned)
                .collect()
        }
        let width = kind.width() as usize;
        if width > 0 && bytes.len() % width != 0 {
            return Err(Error::invalid_argument(format!(
                "{} bytes do not hold whole {kind} values",
                bytes.len()
            )));
        }
        Ok(match kind {
            ValueKind::Int8 => Self::Int8(decode(bytes)),
            ValueKind::Int16 => Self::Int16(decode(bytes)),
            ValueKind::Int32 => Self::Int32(decode(bytes)),
            ValueKind::Int64 => Self::Int64(decode(bytes)),
            ValueKind::UInt8 => Self::UInt8(bytes.to_vec()),
            ValueKind::UInt16 => Self::UInt16(decode(bytes)),
            ValueKind::UInt32 => Self::UInt32(decode(bytes)),
            ValueKind::UInt64 => Self::UInt64(decode(bytes)),
            ValueKind::Float32 => Self::Float32(decode(bytes)),
            ValueKind::Float64 => Self::Float64(decode(bytes)),
            ValueKind::Bool => Self::Bool(bytes.to_vec()),
            ValueKind::Any => {
                return Err(Error::invalid_argument("bytes of kind any have no element layout"))
            }
        })
    }

    /// Returns the element kind.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Int8(_) => ValueKind::Int8,
            Self::Int16(_) => ValueKind::Int16,
            Self::Int32(_) => ValueKind::Int32,
            Self::Int64(_) => ValueKind::Int64,
            Self::UInt8(_) => ValueKind::UInt8,
            Self::UInt16(_) => ValueKind::UInt16,
            Self::UInt32(_) => ValueKind::UInt32,
            Self::UInt64(_) => ValueKind::UInt64,
            Self::Float32(_) => ValueKind::Float32,
            Self::Float64(_) => ValueKind::Float64,
            Self::Bool(_) => ValueKind::Bool,
        }
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        each_variant!(self, v => v.len())
    }

    /// Returns true if the buffer has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the length in bytes: `len() * width`.
    #[must_use]
    pub fn byte_len(&self) -> u64 {
        self.len() as u64 * self.kind().width()
    }

    /// Returns the elements as native-endian bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        each_variant!(self, v => bytemuck::cast_slice(v.as_slice()))
    }

    /// Returns a pointer to the first element.
    pub fn as_mut_ptr(&mut self) -> *mut c_void {
        each_variant!(self, v => v.as_mut_ptr().cast())
    }

    /// Returns the first `len` elements as a new buffer.
    #[must_use]
    pub fn prefix(&self, len: usize) -> Self {
        map_variant!(self, v => v[..len.min(v.len())].to_vec())
    }
}

/// A Rust type that can be stored in a [`TypedBuffer`].
///
/// Implemented for the fixed-width integers, the floats and `bool`.
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// The kind this type stores.
    const KIND: ValueKind;

    /// Moves values into a buffer.
    fn into_buffer(values: Vec<Self>) -> TypedBuffer;

    /// Moves values out of a buffer of the same kind, handing back the
    /// buffer otherwise.
    fn from_buffer(buffer: TypedBuffer) -> std::result::Result<Vec<Self>, TypedBuffer>;

    /// Copies the first `len` values out of a buffer of the same kind.
    fn copy_from(buffer: &TypedBuffer, len: usize) -> Option<Vec<Self>>;

    /// Views a buffer of the same kind in place. Always `None` for `bool`.
    fn slice(buffer: &TypedBuffer) -> Option<&[Self]>;

    /// Mutably views a buffer of the same kind in place. Always `None` for
    /// `bool`.
    fn slice_mut(buffer: &mut TypedBuffer) -> Option<&mut [Self]>;
}

macro_rules! pod_element {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl Element for $ty {
                const KIND: ValueKind = ValueKind::$variant;

                fn into_buffer(values: Vec<Self>) -> TypedBuffer {
                    TypedBuffer::$variant(values)
                }

                fn from_buffer(buffer: TypedBuffer) -> std::result::Result<Vec<Self>, TypedBuffer> {
                    match buffer {
                        TypedBuffer::$variant(values) => Ok(values),
                        other => Err(other),
                    }
                }

                fn copy_from(buffer: &TypedBuffer, len: usize) -> Option<Vec<Self>> {
                    match buffer {
                        TypedBuffer::$variant(values) => {
                            Some(values[..len.min(values.len())].to_vec())
                        }
                        _ => None,
                    }
                }

                fn slice(buffer: &TypedBuffer) -> Option<&[Self]> {
                    match buffer {
                        TypedBuffer::$variant(values) => Some(values),
                        _ => None,
                    }
                }

                fn slice_mut(buffer: &mut TypedBuffer) -> Option<&mut [Self]> {
                    match buffer {
                        TypedBuffer::$variant(values) => Some(values),
                        _ => None,
                    }
                }
            }
        )+
    };
}

pod_element! {
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

impl Element for bool {
    const KIND: ValueKind = ValueKind::Bool;

    fn into_buffer(values: Vec<Self>) -> TypedBuffer {
        TypedBuffer::Bool(values.into_iter().map(u8::from).collect())
    }

    fn from_buffer(buffer: TypedBuffer) -> std::result::Result<Vec<Self>, TypedBuffer> {
        match buffer {
            TypedBuffer::Bool(bytes) => Ok(bytes.into_iter().map(|b| b != 0).collect()),
            other => Err(other),
        }
    }

    fn copy_from(buffer: &TypedBuffer, len: usize) -> Option<Vec<Self>> {
        match buffer {
            TypedBuffer::Bool(bytes) => Some(bytes.iter().take(len).map(|&b| b != 0).collect()),
            _ => None,
        }
    }

    fn slice(_: &TypedBuffer) -> Option<&[Self]> {
        None
    }

    fn slice_mut(_: &mut TypedBuffer) -> Option<&mut [Self]> {
        None
    }
}

/// Checks that `T` is the element type of `datatype`.
pub(crate) fn check_kind<T: Element>(name: &str, datatype: Datatype) -> Result<()> {
    if datatype.value_kind() == T::KIND {
        Ok(())
    } else {
        Err(Error::type_mismatch(
            name,
            format!("{} ({datatype})", datatype.value_kind()),
            T::KIND,
        ))
    }
}

/// Decodes engine bytes holding values of `datatype` as `T`.
pub(crate) fn decode_values<T: Element>(
    name: &str,
    datatype: Datatype,
    bytes: &[u8],
) -> Result<Vec<T>> {
    check_kind::<T>(name, datatype)?;
    if datatype == Datatype::Any {
        return Err(Error::UnsupportedDatatype { datatype });
    }
    let buffer = TypedBuffer::from_bytes(datatype.value_kind(), bytes)?;
    T::from_buffer(buffer).map_err(|other| Error::type_mismatch(name, other.kind(), T::KIND))
}
