//! Array schemas.
//!
//! A schema is built incrementally through the C ABI and validated once by
//! [`ArraySchema::check`] when the array is created. After creation it is
//! shared immutably behind an `Arc`.

use crate::error::{EngineError, EngineResult};
use crate::scalar::Scalar;
use crate::types::{ArrayType, DataOrder, Datatype, Layout, ScalarClass, COORDS, VAR_NUM};

/// One axis of an array's domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    name: String,
    datatype: Datatype,
    domain: Option<Vec<u8>>,
    tile_extent: Option<Vec<u8>>,
    cell_val_num: u32,
}

impl Dimension {
    /// Creates a dimension.
    ///
    /// Fixed-width dimensions need a `[lo, hi]` domain encoded as two native
    /// values; string dimensions take neither domain nor extent.
    pub fn new(
        name: &str,
        datatype: Datatype,
        domain: Option<&[u8]>,
        tile_extent: Option<&[u8]>,
    ) -> EngineResult<Self> {
        validate_name(name)?;
        if datatype.is_string() {
            if datatype != Datatype::StringAscii {
                return Err(EngineError::invalid_schema(format!(
                    "dimension '{name}': only STRING_ASCII string dimensions are supported"
                )));
            }
            if domain.is_some() || tile_extent.is_some() {
                return Err(EngineError::invalid_schema(format!(
                    "dimension '{name}': string dimensions take no domain or tile extent"
                )));
            }
            return Ok(Self {
                name: name.to_string(),
                datatype,
                domain: None,
                tile_extent: None,
                cell_val_num: VAR_NUM,
            });
        }

        if matches!(datatype, Datatype::Any | Datatype::Blob | Datatype::Bool) {
            return Err(EngineError::invalid_schema(format!(
                "dimension '{name}': datatype {datatype} cannot index a dimension"
            )));
        }
        let width = datatype.size() as usize;
        let domain = domain.ok_or_else(|| {
            EngineError::invalid_schema(format!("dimension '{name}': domain is required"))
        })?;
        if domain.len() != 2 * width {
            return Err(EngineError::invalid_schema(format!(
                "dimension '{name}': domain needs {} bytes, got {}",
                2 * width,
                domain.len()
            )));
        }
        let lo = Scalar::decode(datatype, &domain[..width])?;
        let hi = Scalar::decode(datatype, &domain[width..])?;
        if lo > hi {
            return Err(EngineError::invalid_schema(format!(
                "dimension '{name}': domain lower bound exceeds upper bound"
            )));
        }
        if let Some(extent) = tile_extent {
            let value = Scalar::decode(datatype, extent)?;
            let positive = match value {
                Scalar::Int(v) => v > 0,
                Scalar::UInt(v) => v > 0,
                Scalar::Float(v) => v > 0.0,
                Scalar::Bytes(_) => false,
            };
            if !positive {
                return Err(EngineError::invalid_schema(format!(
                    "dimension '{name}': tile extent must be positive"
                )));
            }
        }

        Ok(Self {
            name: name.to_string(),
            datatype,
            domain: Some(domain.to_vec()),
            tile_extent: tile_extent.map(<[u8]>::to_vec),
            cell_val_num: 1,
        })
    }

    /// Returns the dimension name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the coordinate datatype.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Returns 1 for fixed-width dimensions, [`VAR_NUM`] for strings.
    pub fn cell_val_num(&self) -> u32 {
        self.cell_val_num
    }

    /// Sets the number of values per coordinate.
    ///
    /// Only the value the dimension already has is accepted.
    pub fn set_cell_val_num(&mut self, num: u32) -> EngineResult<()> {
        if num != self.cell_val_num {
            return Err(EngineError::invalid_schema(format!(
                "dimension '{}': cell value number {num} is not supported for {}",
                self.name, self.datatype
            )));
        }
        Ok(())
    }

    /// Returns true for var-sized (string) dimensions.
    pub fn is_var(&self) -> bool {
        self.cell_val_num == VAR_NUM
    }

    /// Returns the encoded `[lo, hi]` domain, if fixed-width.
    pub fn domain(&self) -> Option<&[u8]> {
        self.domain.as_deref()
    }

    /// Returns the encoded tile extent, if one was given.
    pub fn tile_extent(&self) -> Option<&[u8]> {
        self.tile_extent.as_deref()
    }

    /// Returns the decoded domain bounds, if fixed-width.
    pub fn bounds(&self) -> Option<(Scalar, Scalar)> {
        let domain = self.domain.as_deref()?;
        let width = self.datatype.size() as usize;
        let lo = Scalar::decode(self.datatype, &domain[..width]).ok()?;
        let hi = Scalar::decode(self.datatype, &domain[width..]).ok()?;
        Some((lo, hi))
    }
}

/// The ordered set of dimensions of an array.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Domain {
    dimensions: Vec<Dimension>,
}

impl Domain {
    /// Creates an empty domain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a dimension; names must be unique.
    pub fn add_dimension(&mut self, dimension: Dimension) -> EngineResult<()> {
        if self.dimension_by_name(dimension.name()).is_some() {
            return Err(EngineError::invalid_schema(format!(
                "duplicate dimension name '{}'",
                dimension.name()
            )));
        }
        self.dimensions.push(dimension);
        Ok(())
    }

    /// Returns the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.dimensions.len()
    }

    /// Returns all dimensions in order.
    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    /// Returns the dimension at `index`.
    pub fn dimension(&self, index: usize) -> EngineResult<&Dimension> {
        self.dimensions
            .get(index)
            .ok_or(EngineError::IndexOutOfBounds {
                what: "dimension",
                index: index as u64,
                count: self.dimensions.len() as u64,
            })
    }

    /// Returns the dimension with `name` and its index.
    pub fn dimension_by_name(&self, name: &str) -> Option<(usize, &Dimension)> {
        self.dimensions
            .iter()
            .enumerate()
            .find(|(_, d)| d.name() == name)
    }

    /// Returns the shared datatype when every dimension has the same one.
    pub fn datatype(&self) -> EngineResult<Datatype> {
        let first = self
            .dimensions
            .first()
            .ok_or_else(|| EngineError::invalid_schema("domain has no dimensions"))?
            .datatype();
        if self.dimensions.iter().any(|d| d.datatype() != first) {
            return Err(EngineError::invalid_schema(
                "domain dimensions have heterogeneous datatypes",
            ));
        }
        Ok(first)
    }
}

/// A stored value column.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    name: String,
    datatype: Datatype,
    cell_val_num: u32,
    nullable: bool,
    fill: Vec<u8>,
    fill_valid: bool,
    custom_fill: bool,
}

impl Attribute {
    /// Creates a single-valued, non-nullable attribute.
    pub fn new(name: &str, datatype: Datatype) -> EngineResult<Self> {
        validate_name(name)?;
        if datatype == Datatype::Any {
            return Err(EngineError::invalid_schema(format!(
                "attribute '{name}': datatype ANY is not supported"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            datatype,
            cell_val_num: 1,
            nullable: false,
            fill: default_fill(datatype),
            fill_valid: false,
            custom_fill: false,
        })
    }

    /// Returns the attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value datatype.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Returns the number of values per cell, or [`VAR_NUM`].
    pub fn cell_val_num(&self) -> u32 {
        self.cell_val_num
    }

    /// Returns true if cells hold a variable number of values.
    pub fn is_var(&self) -> bool {
        self.cell_val_num == VAR_NUM
    }

    /// Returns true if cells carry a validity flag.
    pub fn nullable(&self) -> bool {
        self.nullable
    }

    /// Returns the byte size of one cell, if fixed.
    pub fn cell_size(&self) -> Option<u64> {
        (!self.is_var()).then(|| u64::from(self.cell_val_num) * self.datatype.size())
    }

    /// Sets the number of values per cell.
    pub fn set_cell_val_num(&mut self, num: u32) -> EngineResult<()> {
        if num == 0 {
            return Err(EngineError::invalid_schema(format!(
                "attribute '{}': cell value number must be positive",
                self.name
            )));
        }
        self.cell_val_num = num;
        if !self.custom_fill {
            self.fill = self.repeated_default_fill();
        } else if let Some(size) = self.cell_size() {
            if self.fill.len() as u64 != size {
                self.fill = self.repeated_default_fill();
                self.custom_fill = false;
            }
        }
        Ok(())
    }

    /// Sets whether cells may be null.
    pub fn set_nullable(&mut self, nullable: bool) {
        self.nullable = nullable;
    }

    /// Sets the value read back for cells never written.
    pub fn set_fill_value(&mut self, value: &[u8]) -> EngineResult<()> {
        let width = self.datatype.size() as usize;
        if value.is_empty() || value.len() % width != 0 {
            return Err(EngineError::invalid_schema(format!(
                "attribute '{}': fill value must be a non-empty multiple of {width} bytes",
                self.name
            )));
        }
        if let Some(size) = self.cell_size() {
            if value.len() as u64 != size {
                return Err(EngineError::invalid_schema(format!(
                    "attribute '{}': fill value must be {size} bytes",
                    self.name
                )));
            }
        }
        self.fill = value.to_vec();
        self.custom_fill = true;
        Ok(())
    }

    /// Sets the fill value and its validity for nullable attributes.
    pub fn set_fill_value_nullable(&mut self, value: &[u8], valid: bool) -> EngineResult<()> {
        if !self.nullable {
            return Err(EngineError::invalid_schema(format!(
                "attribute '{}' is not nullable",
                self.name
            )));
        }
        self.set_fill_value(value)?;
        self.fill_valid = valid;
        Ok(())
    }

    /// Returns the fill value bytes.
    pub fn fill_value(&self) -> &[u8] {
        &self.fill
    }

    /// Returns the validity of the fill value.
    pub fn fill_valid(&self) -> bool {
        self.fill_valid
    }

    fn repeated_default_fill(&self) -> Vec<u8> {
        let one = default_fill(self.datatype);
        let count = if self.is_var() { 1 } else { self.cell_val_num as usize };
        one.repeat(count)
    }
}

/// The default fill for one value of `datatype`.
fn default_fill(datatype: Datatype) -> Vec<u8> {
    let width = datatype.size();
    let value = match datatype.scalar_class() {
        ScalarClass::Signed if datatype == Datatype::Char => Scalar::Int(i64::from(i8::MIN)),
        ScalarClass::Signed => Scalar::Int(match width {
            1 => i64::from(i8::MIN),
            2 => i64::from(i16::MIN),
            4 => i64::from(i32::MIN),
            _ => i64::MIN,
        }),
        ScalarClass::Unsigned if datatype == Datatype::Bool => Scalar::UInt(0),
        ScalarClass::Unsigned => Scalar::UInt(match width {
            1 => u64::from(u8::MAX),
            2 => u64::from(u16::MAX),
            4 => u64::from(u32::MAX),
            _ => u64::MAX,
        }),
        ScalarClass::Float => Scalar::Float(f64::NAN),
        ScalarClass::Bytes => return vec![0; width as usize],
    };
    value.encode(datatype)
}

fn validate_name(name: &str) -> EngineResult<()> {
    if name.is_empty() {
        return Err(EngineError::invalid_schema("names must not be empty"));
    }
    if name == COORDS {
        return Err(EngineError::invalid_schema(format!(
            "'{COORDS}' is a reserved name"
        )));
    }
    Ok(())
}

/// Values attached to the coordinates of one dimension.
///
/// A label holds one value per coordinate of its dimension. Writes may set
/// label values alongside cells; reads return the value recorded for each
/// result cell's coordinate, or the label's fill when none was written.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionLabel {
    name: String,
    dimension: usize,
    datatype: Datatype,
    order: DataOrder,
    fill: Vec<u8>,
}

impl DimensionLabel {
    /// Creates a label on the dimension at index `dimension`.
    pub fn new(
        name: &str,
        dimension: usize,
        order: DataOrder,
        datatype: Datatype,
    ) -> EngineResult<Self> {
        validate_name(name)?;
        if datatype.is_string() && datatype != Datatype::StringAscii {
            return Err(EngineError::invalid_schema(format!(
                "dimension label '{name}': only STRING_ASCII string labels are supported"
            )));
        }
        if matches!(datatype, Datatype::Any | Datatype::Blob | Datatype::Bool) {
            return Err(EngineError::invalid_schema(format!(
                "dimension label '{name}': datatype {datatype} cannot label a dimension"
            )));
        }
        let fill = if datatype.is_string() {
            Vec::new()
        } else {
            default_fill(datatype)
        };
        Ok(Self {
            name: name.to_string(),
            dimension,
            datatype,
            order,
            fill,
        })
    }

    /// Returns the label name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the index of the labelled dimension.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Returns the datatype of the label values.
    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    /// Returns the order label values follow along the dimension.
    pub fn order(&self) -> DataOrder {
        self.order
    }

    /// Returns true for string labels.
    pub fn is_var(&self) -> bool {
        self.datatype.is_string()
    }

    /// Returns the value read back for coordinates with no label value.
    pub fn fill_value(&self) -> &[u8] {
        &self.fill
    }

    /// Returns the byte size of one value, if fixed.
    pub fn cell_size(&self) -> Option<u64> {
        (!self.is_var()).then(|| self.datatype.size())
    }
}

/// A dimension, attribute, dimension label or the zipped coordinates,
/// resolved by name.
#[derive(Debug, Clone, Copy)]
pub enum Field<'a> {
    /// A dimension and its index.
    Dimension(usize, &'a Dimension),
    /// An attribute and its index.
    Attribute(usize, &'a Attribute),
    /// A dimension label and its index.
    Label(usize, &'a DimensionLabel),
    /// The zipped coordinates: domain datatype and dimension count.
    Coords(Datatype, usize),
}

impl Field<'_> {
    /// Returns the datatype values are stored in.
    pub fn datatype(&self) -> Datatype {
        match self {
            Self::Dimension(_, d) => d.datatype(),
            Self::Attribute(_, a) => a.datatype(),
            Self::Label(_, l) => l.datatype(),
            Self::Coords(dt, _) => *dt,
        }
    }

    /// Returns true if the field needs an offsets buffer.
    pub fn is_var(&self) -> bool {
        match self {
            Self::Dimension(_, d) => d.is_var(),
            Self::Attribute(_, a) => a.is_var(),
            Self::Label(_, l) => l.is_var(),
            Self::Coords(..) => false,
        }
    }

    /// Returns true if the field needs a validity buffer.
    pub fn nullable(&self) -> bool {
        matches!(self, Self::Attribute(_, a) if a.nullable())
    }

    /// Returns the byte size of one cell for fixed fields.
    pub fn cell_size(&self) -> Option<u64> {
        match self {
            Self::Dimension(_, d) => (!d.is_var()).then(|| d.datatype().size()),
            Self::Attribute(_, a) => a.cell_size(),
            Self::Label(_, l) => l.cell_size(),
            Self::Coords(dt, ndim) => Some(dt.size() * *ndim as u64),
        }
    }
}

/// The full description of an array.
#[derive(Debug, Clone, PartialEq)]
pub struct ArraySchema {
    array_type: ArrayType,
    domain: Option<Domain>,
    attributes: Vec<Attribute>,
    labels: Vec<DimensionLabel>,
    cell_order: Layout,
    tile_order: Layout,
    capacity: u64,
}

impl ArraySchema {
    /// Creates an empty schema.
    pub fn new(array_type: ArrayType) -> Self {
        Self {
            array_type,
            domain: None,
            attributes: Vec::new(),
            labels: Vec::new(),
            cell_order: Layout::RowMajor,
            tile_order: Layout::RowMajor,
            capacity: 10_000,
        }
    }

    /// Returns dense or sparse.
    pub fn array_type(&self) -> ArrayType {
        self.array_type
    }

    /// Sets the domain, replacing any previous one.
    pub fn set_domain(&mut self, domain: Domain) {
        self.domain = Some(domain);
    }

    /// Returns the domain.
    pub fn domain(&self) -> EngineResult<&Domain> {
        self.domain
            .as_ref()
            .ok_or_else(|| EngineError::invalid_schema("schema has no domain"))
    }

    /// Appends an attribute; names must be unique.
    pub fn add_attribute(&mut self, attribute: Attribute) -> EngineResult<()> {
        if self.attributes.iter().any(|a| a.name() == attribute.name()) {
            return Err(EngineError::invalid_schema(format!(
                "duplicate attribute name '{}'",
                attribute.name()
            )));
        }
        self.attributes.push(attribute);
        Ok(())
    }

    /// Returns all attributes in order.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Returns the attribute at `index`.
    pub fn attribute(&self, index: usize) -> EngineResult<&Attribute> {
        self.attributes
            .get(index)
            .ok_or(EngineError::IndexOutOfBounds {
                what: "attribute",
                index: index as u64,
                count: self.attributes.len() as u64,
            })
    }

    /// Returns the attribute with `name` and its index.
    pub fn attribute_by_name(&self, name: &str) -> Option<(usize, &Attribute)> {
        self.attributes
            .iter()
            .enumerate()
            .find(|(_, a)| a.name() == name)
    }

    /// Adds a label to the dimension at `dimension`.
    ///
    /// The domain must already hold that dimension. Label names must not
    /// collide with other labels, dimensions or attributes.
    pub fn add_dimension_label(
        &mut self,
        dimension: usize,
        name: &str,
        order: DataOrder,
        datatype: Datatype,
    ) -> EngineResult<()> {
        let domain = self.domain()?;
        domain.dimension(dimension)?;
        let taken = domain.dimension_by_name(name).is_some()
            || self.attribute_by_name(name).is_some()
            || self.dimension_label_by_name(name).is_some();
        if taken {
            return Err(EngineError::invalid_schema(format!(
                "dimension label name '{name}' is already in use"
            )));
        }
        self.labels
            .push(DimensionLabel::new(name, dimension, order, datatype)?);
        Ok(())
    }

    /// Returns all dimension labels in order.
    pub fn dimension_labels(&self) -> &[DimensionLabel] {
        &self.labels
    }

    /// Returns the dimension label at `index`.
    pub fn dimension_label(&self, index: usize) -> EngineResult<&DimensionLabel> {
        self.labels.get(index).ok_or(EngineError::IndexOutOfBounds {
            what: "dimension label",
            index: index as u64,
            count: self.labels.len() as u64,
        })
    }

    /// Returns the dimension label with `name` and its index.
    pub fn dimension_label_by_name(&self, name: &str) -> Option<(usize, &DimensionLabel)> {
        self.labels
            .iter()
            .enumerate()
            .find(|(_, l)| l.name() == name)
    }

    /// Sets the cell order.
    pub fn set_cell_order(&mut self, layout: Layout) -> EngineResult<()> {
        match layout {
            Layout::RowMajor | Layout::ColMajor => {
                self.cell_order = layout;
                Ok(())
            }
            other => Err(EngineError::UnsupportedLayout {
                layout: other.as_str(),
                context: "schema cell order".to_string(),
            }),
        }
    }

    /// Returns the cell order.
    pub fn cell_order(&self) -> Layout {
        self.cell_order
    }

    /// Sets the tile order.
    pub fn set_tile_order(&mut self, layout: Layout) -> EngineResult<()> {
        match layout {
            Layout::RowMajor | Layout::ColMajor => {
                self.tile_order = layout;
                Ok(())
            }
            other => Err(EngineError::UnsupportedLayout {
                layout: other.as_str(),
                context: "schema tile order".to_string(),
            }),
        }
    }

    /// Returns the tile order.
    pub fn tile_order(&self) -> Layout {
        self.tile_order
    }

    /// Sets the sparse tile capacity.
    pub fn set_capacity(&mut self, capacity: u64) -> EngineResult<()> {
        if capacity == 0 {
            return Err(EngineError::invalid_schema("capacity must be positive"));
        }
        self.capacity = capacity;
        Ok(())
    }

    /// Returns the sparse tile capacity.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Resolves a field name.
    pub fn field(&self, name: &str) -> Option<Field<'_>> {
        let domain = self.domain.as_ref()?;
        if name == COORDS {
            let datatype = domain.datatype().ok()?;
            return (self.array_type == ArrayType::Sparse)
                .then_some(Field::Coords(datatype, domain.ndim()));
        }
        if let Some((i, d)) = domain.dimension_by_name(name) {
            return Some(Field::Dimension(i, d));
        }
        if let Some((i, a)) = self.attribute_by_name(name) {
            return Some(Field::Attribute(i, a));
        }
        self.dimension_label_by_name(name)
            .map(|(i, l)| Field::Label(i, l))
    }

    /// Validates the schema as a whole.
    pub fn check(&self) -> EngineResult<()> {
        let domain = self.domain()?;
        if domain.ndim() == 0 {
            return Err(EngineError::invalid_schema("domain has no dimensions"));
        }
        if self.attributes.is_empty() {
            return Err(EngineError::invalid_schema("schema has no attributes"));
        }
        for attribute in &self.attributes {
            if domain.dimension_by_name(attribute.name()).is_some() {
                return Err(EngineError::invalid_schema(format!(
                    "attribute '{}' shares its name with a dimension",
                    attribute.name()
                )));
            }
        }
        for label in &self.labels {
            domain.dimension(label.dimension())?;
            if self.attribute_by_name(label.name()).is_some() {
                return Err(EngineError::invalid_schema(format!(
                    "dimension label '{}' shares its name with an attribute",
                    label.name()
                )));
            }
        }
        if self.array_type == ArrayType::Dense {
            let datatype = domain.datatype()?;
            if !datatype.is_integral() {
                return Err(EngineError::invalid_schema(format!(
                    "dense arrays need integer dimensions, got {datatype}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_i32(lo: i32, hi: i32) -> Vec<u8> {
        let mut v = lo.to_ne_bytes().to_vec();
        v.extend_from_slice(&hi.to_ne_bytes());
        v
    }

    fn dense_schema() -> ArraySchema {
        let mut domain = Domain::new();
        domain
            .add_dimension(
                Dimension::new("rows", Datatype::Int32, Some(&bytes_i32(1, 4)), None).unwrap(),
            )
            .unwrap();
        let mut schema = ArraySchema::new(ArrayType::Dense);
        schema.set_domain(domain);
        schema
            .add_attribute(Attribute::new("a", Datatype::Int32).unwrap())
            .unwrap();
        schema
    }

    #[test]
    fn dimension_validation() {
        assert!(Dimension::new("d", Datatype::Int32, None, None).is_err());
        assert!(Dimension::new("d", Datatype::Int32, Some(&bytes_i32(5, 1)), None).is_err());
        assert!(Dimension::new("d", Datatype::Int32, Some(&[0u8; 3]), None).is_err());
        assert!(Dimension::new(COORDS, Datatype::Int32, Some(&bytes_i32(1, 2)), None).is_err());

        let extent = 0i32.to_ne_bytes();
        assert!(
            Dimension::new("d", Datatype::Int32, Some(&bytes_i32(1, 2)), Some(&extent)).is_err()
        );

        let d = Dimension::new("d", Datatype::StringAscii, None, None).unwrap();
        assert!(d.is_var());
        assert!(d.bounds().is_none());
    }

    #[test]
    fn attribute_fill_defaults() {
        let a = Attribute::new("a", Datatype::Int32).unwrap();
        assert_eq!(a.fill_value(), i32::MIN.to_ne_bytes());

        let mut a = Attribute::new("a", Datatype::UInt8).unwrap();
        a.set_cell_val_num(3).unwrap();
        assert_eq!(a.fill_value(), &[u8::MAX; 3]);

        let mut a = Attribute::new("s", Datatype::StringAscii).unwrap();
        a.set_cell_val_num(VAR_NUM).unwrap();
        assert_eq!(a.fill_value(), &[0]);
        assert_eq!(a.cell_size(), None);
    }

    #[test]
    fn attribute_custom_fill() {
        let mut a = Attribute::new("a", Datatype::Int16).unwrap();
        assert!(a.set_fill_value(&[1, 2, 3]).is_err());
        a.set_fill_value(&7i16.to_ne_bytes()).unwrap();
        assert_eq!(a.fill_value(), 7i16.to_ne_bytes());

        assert!(a.set_fill_value_nullable(&7i16.to_ne_bytes(), true).is_err());
        a.set_nullable(true);
        a.set_fill_value_nullable(&9i16.to_ne_bytes(), true).unwrap();
        assert!(a.fill_valid());
    }

    #[test]
    fn field_resolution() {
        let schema = dense_schema();
        assert!(matches!(schema.field("rows"), Some(Field::Dimension(0, _))));
        assert!(matches!(schema.field("a"), Some(Field::Attribute(0, _))));
        assert!(schema.field(COORDS).is_none());
        assert!(schema.field("missing").is_none());
    }

    #[test]
    fn dimension_labels_resolve_after_attributes() {
        let mut schema = dense_schema();
        schema
            .add_dimension_label(0, "row_names", DataOrder::Increasing, Datatype::StringAscii)
            .unwrap();
        schema
            .add_dimension_label(0, "row_pos", DataOrder::Decreasing, Datatype::Float64)
            .unwrap();
        assert!(schema
            .add_dimension_label(1, "depth", DataOrder::Increasing, Datatype::Int32)
            .is_err());
        assert!(schema
            .add_dimension_label(0, "a", DataOrder::Increasing, Datatype::Int32)
            .is_err());
        assert!(schema
            .add_dimension_label(0, "row_pos", DataOrder::Increasing, Datatype::Int32)
            .is_err());

        match schema.field("row_names") {
            Some(field @ Field::Label(0, label)) => {
                assert!(field.is_var());
                assert!(!field.nullable());
                assert_eq!(label.dimension(), 0);
                assert!(label.fill_value().is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        let pos = schema.field("row_pos").unwrap();
        assert_eq!(pos.datatype(), Datatype::Float64);
        assert_eq!(pos.cell_size(), Some(8));
        assert_eq!(schema.dimension_label(1).unwrap().order(), DataOrder::Decreasing);
        assert!(schema.dimension_label(2).is_err());
        schema.check().unwrap();

        let mut bare = ArraySchema::new(ArrayType::Dense);
        assert!(bare
            .add_dimension_label(0, "l", DataOrder::Increasing, Datatype::Int32)
            .is_err());
    }

    #[test]
    fn schema_check() {
        let schema = dense_schema();
        schema.check().unwrap();

        let mut domain = Domain::new();
        domain
            .add_dimension(Dimension::new("s", Datatype::StringAscii, None, None).unwrap())
            .unwrap();
        let mut dense = ArraySchema::new(ArrayType::Dense);
        dense.set_domain(domain.clone());
        dense
            .add_attribute(Attribute::new("a", Datatype::Int32).unwrap())
            .unwrap();
        assert!(dense.check().is_err());

        let mut sparse = ArraySchema::new(ArrayType::Sparse);
        sparse.set_domain(domain);
        sparse
            .add_attribute(Attribute::new("a", Datatype::Int32).unwrap())
            .unwrap();
        sparse.check().unwrap();

        assert!(ArraySchema::new(ArrayType::Sparse).check().is_err());
    }

    #[test]
    fn duplicate_names() {
        let mut schema = dense_schema();
        assert!(schema
            .add_attribute(Attribute::new("a", Datatype::Int64).unwrap())
            .is_err());
        schema
            .add_attribute(Attribute::new("rows", Datatype::Int64).unwrap())
            .unwrap();
        assert!(schema.check().is_err());
    }
}
