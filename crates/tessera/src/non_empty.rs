//! The populated bounding box of an array.

use std::ffi::{c_void, CString};

use tessera_ffi::{
    tessera_array_get_non_empty_domain_from_index, tessera_array_get_non_empty_domain_from_name,
    tessera_array_get_non_empty_domain_var_from_index,
    tessera_array_get_non_empty_domain_var_from_name,
    tessera_array_get_non_empty_domain_var_size_from_index,
    tessera_array_get_non_empty_domain_var_size_from_name,
};

use crate::array::Array;
use crate::context::c_string;
use crate::datatype::{Datatype, Element, TypedBuffer};
use crate::error::{Error, Result};
use crate::schema::Dimension;

/// Inclusive bounds of one dimension.
#[derive(Debug, Clone, PartialEq)]
pub enum Bounds {
    /// Two values of the dimension's datatype: lower then upper.
    Fixed(TypedBuffer),
    /// Lower and upper bytes of a variable-length dimension.
    Var {
        /// Lower bound.
        start: Vec<u8>,
        /// Upper bound.
        end: Vec<u8>,
    },
}

/// The populated bounds of one dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct NonEmptyDomain {
    /// The dimension name.
    pub dimension: String,
    /// The dimension datatype.
    pub datatype: Datatype,
    /// The bounds.
    pub bounds: Bounds,
}

impl NonEmptyDomain {
    /// Returns fixed bounds as `[lower, upper]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeMismatch`] if `T` is not the dimension's element
    /// type or the dimension is variable-length.
    pub fn fixed<T: Element>(&self) -> Result<[T; 2]> {
        let mismatch =
            || Error::type_mismatch(&self.dimension, self.datatype.value_kind(), T::KIND);
        match &self.bounds {
            Bounds::Fixed(buffer) => match T::copy_from(buffer, 2).as_deref() {
                Some(&[lo, hi]) => Ok([lo, hi]),
                _ => Err(mismatch()),
            },
            Bounds::Var { .. } => Err(mismatch()),
        }
    }

    /// Returns variable-length bounds as strings, `None` for fixed bounds.
    pub fn strings(&self) -> Option<(String, String)> {
        match &self.bounds {
            Bounds::Var { start, end } => Some((
                String::from_utf8_lossy(start).into_owned(),
                String::from_utf8_lossy(end).into_owned(),
            )),
            Bounds::Fixed(_) => None,
        }
    }
}

/// The populated bounds of every dimension.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NonEmptyDomains {
    /// One entry per populated dimension, in domain order.
    pub domains: Vec<NonEmptyDomain>,
    /// True if nothing has been written.
    pub is_empty: bool,
}

impl NonEmptyDomains {
    /// Returns the entry for `dimension`.
    pub fn get(&self, dimension: &str) -> Option<&NonEmptyDomain> {
        self.domains.iter().find(|d| d.dimension == dimension)
    }
}

enum DimRef {
    Index(u32),
    Name(CString),
}

impl Array {
    /// Returns the populated bounds of every dimension of an array open for
    /// reading.
    ///
    /// The result is empty iff every dimension came back empty.
    pub fn non_empty_domain(&self) -> Result<NonEmptyDomains> {
        let domain = self.schema()?.domain()?;
        let mut domains = Vec::new();
        for index in 0..domain.ndim()? {
            let dimension = domain.dimension_from_index(index)?;
            if let Some(bounds) = self.resolve(&dimension, &DimRef::Index(index))? {
                domains.push(bounds);
            }
        }
        let is_empty = domains.is_empty();
        Ok(NonEmptyDomains { domains, is_empty })
    }

    /// Returns the populated bounds of the dimension at `index`, or `None`
    /// if nothing has been written.
    pub fn non_empty_domain_from_index(&self, index: u32) -> Result<Option<NonEmptyDomain>> {
        let dimension = self.schema()?.domain()?.dimension_from_index(index)?;
        self.resolve(&dimension, &DimRef::Index(index))
    }

    /// Returns the populated bounds of the dimension called `name`.
    pub fn non_empty_domain_from_name(&self, name: &str) -> Result<Option<NonEmptyDomain>> {
        let dimension = self.schema()?.domain()?.dimension_from_name(name)?;
        self.resolve(&dimension, &DimRef::Name(c_string(name, "dimension name")?))
    }

    fn resolve(&self, dimension: &Dimension, at: &DimRef) -> Result<Option<NonEmptyDomain>> {
        let name = dimension.name()?;
        let datatype = dimension.datatype()?;
        let bounds = if dimension.is_var()? {
            self.var_bounds(&name, at)?
        } else {
            self.fixed_bounds(&name, datatype, at)?
        };
        Ok(bounds.map(|bounds| NonEmptyDomain {
            dimension: name,
            datatype,
            bounds,
        }))
    }

    fn fixed_bounds(&self, name: &str, datatype: Datatype, at: &DimRef) -> Result<Option<Bounds>> {
        let mut buffer = datatype.make_buffer(2)?;
        let out = buffer.as_mut_ptr();
        let mut empty = 0;
        let (ctx, array) = (self.ctx().ptr()?, self.ptr()?);
        // SAFETY: live handles; `out` holds two values of the datatype.
        let status = unsafe {
            match at {
                DimRef::Index(i) => {
                    tessera_array_get_non_empty_domain_from_index(*ctx, *array, *i, out, &mut empty)
                }
                DimRef::Name(n) => tessera_array_get_non_empty_domain_from_name(
                    *ctx,
                    *array,
                    n.as_ptr(),
                    out,
                    &mut empty,
                ),
            }
        };
        self.ctx().check(status, "get non-empty domain", name)?;
        Ok((empty == 0).then_some(Bounds::Fixed(buffer)))
    }

    /// Fetches the bound sizes first, then exactly that many bytes. The array
    /// stays pinned between the two calls.
    fn var_bounds(&self, name: &str, at: &DimRef) -> Result<Option<Bounds>> {
        let (ctx, array) = (self.ctx().ptr()?, self.ptr()?);
        let (mut start_size, mut end_size, mut empty) = (0u64, 0u64, 0);
        // SAFETY: live handles; valid out-slots.
        let status = unsafe {
            match at {
                DimRef::Index(i) => tessera_array_get_non_empty_domain_var_size_from_index(
                    *ctx,
                    *array,
                    *i,
                    &mut start_size,
                    &mut end_size,
                    &mut empty,
                ),
                DimRef::Name(n) => tessera_array_get_non_empty_domain_var_size_from_name(
                    *ctx,
                    *array,
                    n.as_ptr(),
                    &mut start_size,
                    &mut end_size,
                    &mut empty,
                ),
            }
        };
        self.ctx().check(status, "get non-empty domain size", name)?;
        if empty != 0 {
            return Ok(None);
        }

        let to_len = |size: u64| {
            usize::try_from(size)
                .map_err(|_| Error::invalid_argument(format!("'{name}': bound of {size} bytes")))
        };
        let mut start = vec![0u8; to_len(start_size)?];
        let mut end = vec![0u8; to_len(end_size)?];
        let start_out = start.as_mut_ptr().cast::<c_void>();
        let end_out = end.as_mut_ptr().cast::<c_void>();
        // SAFETY: the buffers hold exactly the sizes the engine reported.
        let status = unsafe {
            match at {
                DimRef::Index(i) => tessera_array_get_non_empty_domain_var_from_index(
                    *ctx,
                    *array,
                    *i,
                    start_out,
                    end_out,
                    &mut empty,
                ),
                DimRef::Name(n) => tessera_array_get_non_empty_domain_var_from_name(
                    *ctx,
                    *array,
                    n.as_ptr(),
                    start_out,
                    end_out,
                    &mut empty,
                ),
            }
        };
        self.ctx().check(status, "get non-empty domain", name)?;
        Ok((empty == 0).then_some(Bounds::Var { start, end }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_accessor_checks_kind() {
        let domain = NonEmptyDomain {
            dimension: "d".into(),
            datatype: Datatype::Int32,
            bounds: Bounds::Fixed(TypedBuffer::Int32(vec![2, 9])),
        };
        assert_eq!(domain.fixed::<i32>().unwrap(), [2, 9]);
        assert!(domain.fixed::<i64>().unwrap_err().is_type_mismatch());
        assert_eq!(domain.strings(), None);

        let var = NonEmptyDomain {
            dimension: "k".into(),
            datatype: Datatype::StringAscii,
            bounds: Bounds::Var {
                start: b"aa".to_vec(),
                end: b"zz".to_vec(),
            },
        };
        assert_eq!(var.strings(), Some(("aa".into(), "zz".into())));
        assert!(var.fixed::<u8>().is_err());

        let all = NonEmptyDomains {
            domains: vec![domain, var],
            is_empty: false,
        };
        assert!(all.get("k").is_some());
        assert!(all.get("x").is_none());
    }
}
