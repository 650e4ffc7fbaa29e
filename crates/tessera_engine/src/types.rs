//! Core type definitions for the Tessera engine.
//!
//! Every enum here crosses the C ABI as a `u32` tag, so the discriminants
//! are part of the stable interface.

use std::fmt;

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
    /// Untyped bytes.
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

/// How a datatype's bytes decode into comparable values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarClass {
    /// Signed integer of the given width.
    Signed,
    /// Unsigned integer of the given width.
    Unsigned,
    /// IEEE float of the given width.
    Float,
    /// Opaque bytes compared lexicographically.
    Bytes,
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

    /// Returns the width in bytes of one value.
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            Self::Int8
            | Self::UInt8
            | Self::Char
            | Self::StringAscii
            | Self::StringUtf8
            | Self::Any
            | Self::Blob
            | Self::Bool => 1,
            Self::Int16 | Self::UInt16 | Self::StringUtf16 | Self::StringUcs2 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 | Self::StringUtf32 | Self::StringUcs4 => 4,
            _ => 8,
        }
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

    /// Returns how values of this type are compared.
    #[must_use]
    pub const fn scalar_class(self) -> ScalarClass {
        match self {
            Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64 | Self::Char => {
                ScalarClass::Signed
            }
            Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64 | Self::Bool => {
                ScalarClass::Unsigned
            }
            Self::Float32 | Self::Float64 => ScalarClass::Float,
            Self::StringAscii
            | Self::StringUtf8
            | Self::StringUtf16
            | Self::StringUtf32
            | Self::StringUcs2
            | Self::StringUcs4
            | Self::Any
            | Self::Blob => ScalarClass::Bytes,
            // Datetime and time values are signed 64-bit counts.
            _ => ScalarClass::Signed,
        }
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

    /// Returns true if the type may index a dense dimension.
    #[must_use]
    pub const fn is_integral(self) -> bool {
        matches!(
            self.scalar_class(),
            ScalarClass::Signed | ScalarClass::Unsigned
        ) && !matches!(self, Self::Bool | Self::Char)
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! abi_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal => $label:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $name {
            /// Converts a raw ABI tag.
            #[must_use]
            pub fn from_u32(tag: u32) -> Option<Self> {
                match tag {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Returns the raw ABI tag.
            #[must_use]
            pub const fn as_u32(self) -> u32 {
                self as u32
            }

            /// Returns the canonical upper-case name.
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

abi_enum! {
    /// Dense or sparse storage.
    ArrayType {
        /// Every cell of the domain exists.
        Dense = 0 => "DENSE",
        /// Only written cells exist.
        Sparse = 1 => "SPARSE",
    }
}

abi_enum! {
    /// Cell order of a query or schema.
    Layout {
        /// Last dimension varies fastest.
        RowMajor = 0 => "ROW_MAJOR",
        /// First dimension varies fastest.
        ColMajor = 1 => "COL_MAJOR",
        /// The array's physical order.
        GlobalOrder = 2 => "GLOBAL_ORDER",
        /// No particular order.
        Unordered = 3 => "UNORDERED",
        /// Hilbert curve order.
        Hilbert = 4 => "HILBERT",
    }
}

abi_enum! {
    /// Direction of a query, and the mode an array is opened in.
    QueryType {
        /// Read cells.
        Read = 0 => "READ",
        /// Write cells.
        Write = 1 => "WRITE",
    }
}

abi_enum! {
    /// Execution state of a query.
    QueryStatus {
        /// Last submission failed.
        Failed = 0 => "FAILED",
        /// All results delivered, or the write accepted.
        Completed = 1 => "COMPLETED",
        /// A submission is running.
        InProgress = 2 => "INPROGRESS",
        /// More read results remain; resubmit to continue.
        Incomplete = 3 => "INCOMPLETE",
        /// Never submitted.
        Uninitialized = 4 => "UNINITIALIZED",
    }
}

abi_enum! {
    /// Why a read stopped before delivering every result.
    StatusReason {
        /// Not incomplete.
        None = 0 => "NONE",
        /// The caller's buffers filled up.
        UserBufferSize = 1 => "USER_BUFFER_SIZE",
        /// The per-submission memory budget was reached.
        MemoryBudget = 2 => "MEMORY_BUDGET",
    }
}

abi_enum! {
    /// How the values of a dimension label relate to the dimension's
    /// coordinates.
    DataOrder {
        /// Values grow with the coordinate.
        Increasing = 0 => "INCREASING_DATA",
        /// Values shrink as the coordinate grows.
        Decreasing = 1 => "DECREASING_DATA",
    }
}

abi_enum! {
    /// Comparison applied by a query condition.
    ConditionOp {
        /// Less than.
        Lt = 0 => "LT",
        /// Less than or equal.
        Le = 1 => "LE",
        /// Greater than.
        Gt = 2 => "GT",
        /// Greater than or equal.
        Ge = 3 => "GE",
        /// Equal.
        Eq = 4 => "EQ",
        /// Not equal.
        Ne = 5 => "NE",
    }
}

abi_enum! {
    /// How query conditions combine.
    CombinationOp {
        /// Both hold.
        And = 0 => "AND",
        /// Either holds.
        Or = 1 => "OR",
        /// The operand does not hold.
        Not = 2 => "NOT",
    }
}
