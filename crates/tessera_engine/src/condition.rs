//! Query conditions.
//!
//! A [`QueryCondition`] filters the cells a read returns by comparing
//! attribute or dimension values against constants. Sparse reads drop the
//! cells that fail; dense reads return fill values for them.
//!
//! Nulls: a condition with no value tests for null. `EQ` matches null
//! cells, `NE` matches valid ones, and every other comparison rejects
//! null cells.

use std::cmp::Ordering;

use crate::error::{EngineError, EngineResult};
use crate::scalar::Scalar;
use crate::schema::{ArraySchema, Field};
use crate::store::CellValue;
use crate::types::{CombinationOp, ConditionOp, Datatype};

/// A filter on the cells of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryCondition {
    /// Compares one field against a value; `None` stands for null.
    Compare {
        /// Attribute or dimension name.
        field: String,
        /// The comparison.
        op: ConditionOp,
        /// Encoded comparison value.
        value: Option<Vec<u8>>,
    },
    /// Combines conditions. `Not` takes exactly one operand.
    Combine {
        /// How the operands combine.
        op: CombinationOp,
        /// The combined conditions.
        operands: Vec<QueryCondition>,
    },
}

impl QueryCondition {
    /// Creates a comparison of `field` against `value`.
    pub fn compare(field: &str, op: ConditionOp, value: Option<&[u8]>) -> EngineResult<Self> {
        if field.is_empty() {
            return Err(EngineError::invalid_argument(
                "query condition needs a field name",
            ));
        }
        if value.is_none() && !matches!(op, ConditionOp::Eq | ConditionOp::Ne) {
            return Err(EngineError::invalid_argument(format!(
                "null values can only be compared with EQ or NE, not {op}"
            )));
        }
        Ok(Self::Compare {
            field: field.to_string(),
            op,
            value: value.map(<[u8]>::to_vec),
        })
    }

    /// Combines `self` with `other`.
    pub fn combine(&self, other: &Self, op: CombinationOp) -> EngineResult<Self> {
        if op == CombinationOp::Not {
            return Err(EngineError::invalid_argument(
                "NOT takes a single condition; negate it instead",
            ));
        }
        Ok(Self::Combine {
            op,
            operands: vec![self.clone(), other.clone()],
        })
    }

    /// Returns the negation of `self`.
    pub fn negate(&self) -> Self {
        Self::Combine {
            op: CombinationOp::Not,
            operands: vec![self.clone()],
        }
    }

    /// Resolves field names against `schema` and checks value sizes.
    pub fn compile(&self, schema: &ArraySchema) -> EngineResult<CompiledCondition> {
        match self {
            Self::Compare { field, op, value } => compile_compare(schema, field, *op, value),
            Self::Combine { op, operands } => {
                let operands = operands
                    .iter()
                    .map(|c| c.compile(schema))
                    .collect::<EngineResult<Vec<_>>>()?;
                match (op, operands.len()) {
                    (CombinationOp::Not, 1) => Ok(CompiledCondition::Not(Box::new(
                        operands.into_iter().next().ok_or_else(|| {
                            EngineError::invalid_argument("NOT needs one condition")
                        })?,
                    ))),
                    (CombinationOp::Not, n) => Err(EngineError::invalid_argument(format!(
                        "NOT takes one condition, got {n}"
                    ))),
                    (CombinationOp::And, _) => Ok(CompiledCondition::All(operands)),
                    (CombinationOp::Or, _) => Ok(CompiledCondition::Any(operands)),
                }
            }
        }
    }
}

/// The field a compiled comparison reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// A coordinate, by dimension index.
    Dimension(usize),
    /// A value, by attribute index.
    Attribute(usize),
}

/// A condition bound to a schema, ready to test cells.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledCondition {
    /// One comparison.
    Compare {
        /// Where the compared value comes from.
        operand: Operand,
        /// Datatype of the compared values.
        datatype: Datatype,
        /// Whether the field is var-sized, compared bytewise.
        var: bool,
        /// The comparison.
        op: ConditionOp,
        /// The comparison value, `None` for null.
        value: Option<Scalar>,
    },
    /// Every operand holds.
    All(Vec<CompiledCondition>),
    /// At least one operand holds.
    Any(Vec<CompiledCondition>),
    /// The operand does not hold.
    Not(Box<CompiledCondition>),
}

fn compile_compare(
    schema: &ArraySchema,
    name: &str,
    op: ConditionOp,
    value: &Option<Vec<u8>>,
) -> EngineResult<CompiledCondition> {
    let field = schema
        .field(name)
        .ok_or_else(|| EngineError::field_not_found(name))?;
    let operand = match field {
        Field::Dimension(i, _) => Operand::Dimension(i),
        Field::Attribute(j, a) => {
            if !a.is_var() && a.cell_val_num() != 1 {
                return Err(EngineError::invalid_argument(format!(
                    "query condition on '{name}': multi-value attributes cannot be compared"
                )));
            }
            Operand::Attribute(j)
        }
        Field::Label(..) | Field::Coords(..) => {
            return Err(EngineError::invalid_argument(format!(
                "query condition on '{name}': only attributes and dimensions can be compared"
            )))
        }
    };
    if value.is_none() && !field.nullable() {
        return Err(EngineError::invalid_argument(format!(
            "query condition on '{name}': null comparison on a non-nullable field"
        )));
    }
    let datatype = field.datatype();
    let var = field.is_var();
    let value = match value {
        Some(bytes) if var => Some(Scalar::Bytes(bytes.clone())),
        Some(bytes) => Some(Scalar::decode(datatype, bytes).map_err(|_| {
            EngineError::invalid_argument(format!(
                "query condition on '{name}': value needs {} bytes, got {}",
                datatype.size(),
                bytes.len()
            ))
        })?),
        None => None,
    };
    Ok(CompiledCondition::Compare {
        operand,
        datatype,
        var,
        op,
        value,
    })
}

impl CompiledCondition {
    /// Tests one written cell.
    pub fn matches(&self, coords: &[Vec<u8>], values: &[CellValue]) -> bool {
        match self {
            Self::Compare {
                operand,
                datatype,
                var,
                op,
                value,
            } => {
                let (bytes, valid) = match operand {
                    Operand::Dimension(i) => (coords[*i].as_slice(), true),
                    Operand::Attribute(j) => (values[*j].bytes.as_slice(), values[*j].valid),
                };
                let Some(value) = value else {
                    return match op {
                        ConditionOp::Eq => !valid,
                        ConditionOp::Ne => valid,
                        _ => false,
                    };
                };
                if !valid {
                    return false;
                }
                let cell = if *var {
                    Scalar::Bytes(bytes.to_vec())
                } else {
                    match Scalar::decode(*datatype, bytes) {
                        Ok(cell) => cell,
                        Err(_) => return false,
                    }
                };
                let ordering = cell.cmp(value);
                match op {
                    ConditionOp::Lt => ordering == Ordering::Less,
                    ConditionOp::Le => ordering != Ordering::Greater,
                    ConditionOp::Gt => ordering == Ordering::Greater,
                    ConditionOp::Ge => ordering != Ordering::Less,
                    ConditionOp::Eq => ordering == Ordering::Equal,
                    ConditionOp::Ne => ordering != Ordering::Equal,
                }
            }
            Self::All(operands) => operands.iter().all(|c| c.matches(coords, values)),
            Self::Any(operands) => operands.iter().any(|c| c.matches(coords, values)),
            Self::Not(operand) => !operand.matches(coords, values),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, Dimension, Domain};
    use crate::types::{ArrayType, VAR_NUM};

    fn schema() -> ArraySchema {
        let mut bounds = 0i32.to_ne_bytes().to_vec();
        bounds.extend_from_slice(&99i32.to_ne_bytes());
        let mut domain = Domain::new();
        domain
            .add_dimension(Dimension::new("x", Datatype::Int32, Some(&bounds), None).unwrap())
            .unwrap();
        let mut schema = ArraySchema::new(ArrayType::Sparse);
        schema.set_domain(domain);
        schema
            .add_attribute(Attribute::new("score", Datatype::Float64).unwrap())
            .unwrap();
        let mut name = Attribute::new("name", Datatype::StringUtf8).unwrap();
        name.set_cell_val_num(VAR_NUM).unwrap();
        name.set_nullable(true);
        schema.add_attribute(name).unwrap();
        let mut pair = Attribute::new("pair", Datatype::Int8).unwrap();
        pair.set_cell_val_num(2).unwrap();
        schema.add_attribute(pair).unwrap();
        schema
    }

    fn cell(x: i32, score: f64, name: Option<&str>) -> (Vec<Vec<u8>>, Vec<CellValue>) {
        let values = vec![
            CellValue {
                bytes: score.to_ne_bytes().to_vec(),
                valid: true,
            },
            CellValue {
                bytes: name.unwrap_or("").as_bytes().to_vec(),
                valid: name.is_some(),
            },
            CellValue {
                bytes: vec![0, 0],
                valid: true,
            },
        ];
        (vec![x.to_ne_bytes().to_vec()], values)
    }

    fn score(op: ConditionOp, v: f64) -> QueryCondition {
        QueryCondition::compare("score", op, Some(&v.to_ne_bytes())).unwrap()
    }

    #[test]
    fn comparisons_and_combinations() {
        let schema = schema();
        let (coords, values) = cell(4, 2.5, Some("kiwi"));

        for (op, expected) in [
            (ConditionOp::Lt, false),
            (ConditionOp::Le, true),
            (ConditionOp::Gt, false),
            (ConditionOp::Ge, true),
            (ConditionOp::Eq, true),
            (ConditionOp::Ne, false),
        ] {
            let compiled = score(op, 2.5).compile(&schema).unwrap();
            assert_eq!(compiled.matches(&coords, &values), expected, "{op}");
        }

        let low_x =
            QueryCondition::compare("x", ConditionOp::Lt, Some(&5i32.to_ne_bytes())).unwrap();
        let both = score(ConditionOp::Gt, 1.0)
            .combine(&low_x, CombinationOp::And)
            .unwrap();
        assert!(both.compile(&schema).unwrap().matches(&coords, &values));
        assert!(!both.negate().compile(&schema).unwrap().matches(&coords, &values));

        let either = score(ConditionOp::Gt, 9.0)
            .combine(&low_x, CombinationOp::Or)
            .unwrap();
        assert!(either.compile(&schema).unwrap().matches(&coords, &values));
        assert!(score(ConditionOp::Eq, 0.0)
            .combine(&low_x, CombinationOp::Not)
            .is_err());

        let name = QueryCondition::compare("name", ConditionOp::Ge, Some(b"kiwi")).unwrap();
        assert!(name.compile(&schema).unwrap().matches(&coords, &values));
    }

    #[test]
    fn null_comparisons() {
        let schema = schema();
        let is_null = QueryCondition::compare("name", ConditionOp::Eq, None)
            .unwrap()
            .compile(&schema)
            .unwrap();
        let not_null = QueryCondition::compare("name", ConditionOp::Ne, None)
            .unwrap()
            .compile(&schema)
            .unwrap();
        let named = QueryCondition::compare("name", ConditionOp::Ne, Some(b"x"))
            .unwrap()
            .compile(&schema)
            .unwrap();

        let (coords, null_values) = cell(1, 0.0, None);
        assert!(is_null.matches(&coords, &null_values));
        assert!(!not_null.matches(&coords, &null_values));
        assert!(!named.matches(&coords, &null_values));

        let (coords, values) = cell(1, 0.0, Some("y"));
        assert!(!is_null.matches(&coords, &values));
        assert!(not_null.matches(&coords, &values));
        assert!(named.matches(&coords, &values));

        assert!(QueryCondition::compare("name", ConditionOp::Lt, None).is_err());
        assert!(QueryCondition::compare("score", ConditionOp::Eq, None)
            .unwrap()
            .compile(&schema)
            .is_err());
    }

    #[test]
    fn compile_rejects_bad_fields_and_values() {
        let schema = schema();
        let missing = QueryCondition::compare("nope", ConditionOp::Eq, Some(&[1])).unwrap();
        assert!(matches!(
            missing.compile(&schema),
            Err(EngineError::FieldNotFound { .. })
        ));
        let short = QueryCondition::compare("score", ConditionOp::Eq, Some(&[1, 2])).unwrap();
        assert!(short.compile(&schema).is_err());
        let pair = QueryCondition::compare("pair", ConditionOp::Eq, Some(&[1, 2])).unwrap();
        assert!(pair.compile(&schema).is_err());
        assert!(QueryCondition::compare("", ConditionOp::Eq, Some(&[1])).is_err());
    }
}
