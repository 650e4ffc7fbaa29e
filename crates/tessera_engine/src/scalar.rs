//! Comparable decoded values.
//!
//! Coordinates and range bounds arrive as native-endian bytes. `Scalar`
//! decodes them into a totally ordered value so cells can be keyed in a
//! `BTreeMap` and tested against ranges.

use std::cmp::Ordering;

use crate::error::{EngineError, EngineResult};
use crate::types::{Datatype, ScalarClass};

/// A decoded coordinate or bound.
#[derive(Debug, Clone)]
pub enum Scalar {
    /// Signed integers, datetimes and times.
    Int(i64),
    /// Unsigned integers and booleans.
    UInt(u64),
    /// Floats, compared with `total_cmp`.
    Float(f64),
    /// Strings and blobs, compared lexicographically.
    Bytes(Vec<u8>),
}

impl Scalar {
    /// Decodes one fixed-width value, or a whole var-sized value.
    pub fn decode(datatype: Datatype, bytes: &[u8]) -> EngineResult<Self> {
        let class = datatype.scalar_class();
        if class == ScalarClass::Bytes {
            return Ok(Self::Bytes(bytes.to_vec()));
        }
        let width = datatype.size() as usize;
        if bytes.len() != width {
            return Err(EngineError::invalid_argument(format!(
                "{datatype} value needs {width} bytes, got {}",
                bytes.len()
            )));
        }
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(bytes);
        Ok(match (class, width) {
            (ScalarClass::Signed, 1) => Self::Int(i64::from(i8::from_ne_bytes([raw[0]]))),
            (ScalarClass::Signed, 2) => {
                Self::Int(i64::from(i16::from_ne_bytes([raw[0], raw[1]])))
            }
            (ScalarClass::Signed, 4) => Self::Int(i64::from(i32::from_ne_bytes(first4(&raw)))),
            (ScalarClass::Signed, _) => Self::Int(i64::from_ne_bytes(raw)),
            (ScalarClass::Unsigned, 1) => Self::UInt(u64::from(raw[0])),
            (ScalarClass::Unsigned, 2) => {
                Self::UInt(u64::from(u16::from_ne_bytes([raw[0], raw[1]])))
            }
            (ScalarClass::Unsigned, 4) => {
                Self::UInt(u64::from(u32::from_ne_bytes(first4(&raw))))
            }
            (ScalarClass::Unsigned, _) => Self::UInt(u64::from_ne_bytes(raw)),
            (_, 4) => Self::Float(f64::from(f32::from_ne_bytes(first4(&raw)))),
            _ => Self::Float(f64::from_ne_bytes(raw)),
        })
    }

    /// Encodes the value back into `datatype`'s native representation.
    pub fn encode(&self, datatype: Datatype) -> Vec<u8> {
        match (self, datatype.size()) {
            (Self::Int(v), 1) => (*v as i8).to_ne_bytes().to_vec(),
            (Self::Int(v), 2) => (*v as i16).to_ne_bytes().to_vec(),
            (Self::Int(v), 4) => (*v as i32).to_ne_bytes().to_vec(),
            (Self::Int(v), _) => v.to_ne_bytes().to_vec(),
            (Self::UInt(v), 1) => vec![*v as u8],
            (Self::UInt(v), 2) => (*v as u16).to_ne_bytes().to_vec(),
            (Self::UInt(v), 4) => (*v as u32).to_ne_bytes().to_vec(),
            (Self::UInt(v), _) => v.to_ne_bytes().to_vec(),
            (Self::Float(v), 4) => (*v as f32).to_ne_bytes().to_vec(),
            (Self::Float(v), _) => v.to_ne_bytes().to_vec(),
            (Self::Bytes(b), _) => b.clone(),
        }
    }

    /// Returns the value as a wide integer, for dense traversal.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::Int(v) => Some(i128::from(*v)),
            Self::UInt(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    /// Builds the integer scalar matching `datatype`'s class.
    pub fn from_i128(datatype: Datatype, value: i128) -> Self {
        match datatype.scalar_class() {
            ScalarClass::Unsigned => Self::UInt(value as u64),
            _ => Self::Int(value as i64),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Int(_) => 0,
            Self::UInt(_) => 1,
            Self::Float(_) => 2,
            Self::Bytes(_) => 3,
        }
    }
}

fn first4(raw: &[u8; 8]) -> [u8; 4] {
    [raw[0], raw[1], raw[2], raw[3]]
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scalar {}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::UInt(a), Self::UInt(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Compares two cell keys in the given cell order.
pub fn cmp_keys(a: &[Scalar], b: &[Scalar], col_major: bool) -> Ordering {
    if col_major {
        a.iter().rev().cmp(b.iter().rev())
    } else {
        a.cmp(b)
    }
}
