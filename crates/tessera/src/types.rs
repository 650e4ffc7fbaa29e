//! Enumerations that cross the C ABI as `u32` tags.

use std::fmt;

use crate::error::{Error, Result};

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

            pub(crate) fn from_tag(tag: u32) -> Result<Self> {
                Self::from_u32(tag).ok_or_else(|| {
                    Error::invalid_argument(format!(
                        concat!("unknown ", stringify!($name), " tag {}"),
                        tag
                    ))
                })
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
    /// Order of dimension label values along their dimension.
    DataOrder {
        /// Values grow with the coordinate.
        Increasing = 0 => "INCREASING_DATA",
        /// Values shrink as the coordinate grows.
        Decreasing = 1 => "DECREASING_DATA",
    }
}

abi_enum! {
    /// Comparison in a query condition.
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
        /// The single operand does not hold.
        Not = 2 => "NOT",
    }
}
