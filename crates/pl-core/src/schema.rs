use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PlangError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpretation {
    SignedByte,
    UnsignedByte,
    Float,
    SignedInteger,
    UnsignedInteger,
}

impl Interpretation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignedByte => "signed_byte",
            Self::UnsignedByte => "unsigned_byte",
            Self::Float => "float",
            Self::SignedInteger => "signed_integer",
            Self::UnsignedInteger => "unsigned_integer",
        }
    }
}

impl fmt::Display for Interpretation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One named column of a [`Schema`]. The byte offset is assigned when the
/// dimension is registered and never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    name: String,
    interpretation: Interpretation,
    byte_width: usize,
    byte_offset: usize,
}

impl Dimension {
    pub fn new(name: impl Into<String>, interpretation: Interpretation, byte_width: usize) -> Self {
        Self {
            name: name.into(),
            interpretation,
            byte_width,
            byte_offset: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interpretation(&self) -> Interpretation {
        self.interpretation
    }

    pub fn byte_width(&self) -> usize {
        self.byte_width
    }

    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    dimensions: Vec<Dimension>,
    index_by_name: HashMap<String, usize>,
    row_stride: usize,
}

impl Schema {
    /// Packs the dimensions back to back in declaration order.
    pub fn new(dimensions: Vec<Dimension>) -> Result<Self, PlangError> {
        let mut offset = 0usize;
        let mut placed = Vec::with_capacity(dimensions.len());
        for dimension in dimensions {
            let Some(next) = offset.checked_add(dimension.byte_width) else {
                return Err(layout_overflow(&dimension, offset));
            };
            placed.push((dimension, offset));
            offset = next;
        }
        Self::with_layout(placed, offset)
    }

    /// Registers dimensions at explicit offsets inside rows of `row_stride`
    /// bytes. Padding between columns is allowed, overlap is not.
    pub fn with_layout(
        placed: Vec<(Dimension, usize)>,
        row_stride: usize,
    ) -> Result<Self, PlangError> {
        let mut dimensions = Vec::with_capacity(placed.len());
        let mut index_by_name = HashMap::new();

        for (mut dimension, offset) in placed {
            if dimension.byte_width == 0 {
                return Err(PlangError::config(
                    "SCHEMA_DIMENSION_WIDTH",
                    format!("Dimension \"{}\" has zero width.", dimension.name),
                ));
            }
            let Some(end) = offset.checked_add(dimension.byte_width) else {
                return Err(layout_overflow(&dimension, offset));
            };
            if end > row_stride {
                return Err(PlangError::config(
                    "SCHEMA_DIMENSION_LAYOUT",
                    format!(
                        "Dimension \"{}\" at offset {} with {} bytes exceeds row stride {}.",
                        dimension.name, offset, dimension.byte_width, row_stride
                    ),
                ));
            }
            if index_by_name.contains_key(&dimension.name) {
                return Err(PlangError::config(
                    "SCHEMA_DIMENSION_DUPLICATE",
                    format!("Dimension \"{}\" is registered twice.", dimension.name),
                ));
            }
            dimension.byte_offset = offset;
            index_by_name.insert(dimension.name.clone(), dimensions.len());
            dimensions.push(dimension);
        }

        let mut spans = dimensions
            .iter()
            .map(|dimension| (dimension.byte_offset, dimension.byte_width, dimension.name()))
            .collect::<Vec<_>>();
        spans.sort_by_key(|(offset, _, _)| *offset);
        for pair in spans.windows(2) {
            let (offset, width, name) = pair[0];
            if offset + width > pair[1].0 {
                return Err(PlangError::config(
                    "SCHEMA_DIMENSION_OVERLAP",
                    format!("Dimension \"{}\" overlaps \"{}\".", name, pair[1].2),
                ));
            }
        }

        Ok(Self {
            dimensions,
            index_by_name,
            row_stride,
        })
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.index_by_name
            .get(name)
            .map(|index| &self.dimensions[*index])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(Dimension::name)
    }

    pub fn row_stride(&self) -> usize {
        self.row_stride
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }
}

fn layout_overflow(dimension: &Dimension, offset: usize) -> PlangError {
    PlangError::config(
        "SCHEMA_DIMENSION_LAYOUT",
        format!(
            "Dimension \"{}\" at offset {} with {} bytes overflows the row layout.",
            dimension.name, offset, dimension.byte_width
        ),
    )
}

#[cfg(test)]
mod schema_tests {
    use super::*;

    #[test]
    fn packed_schema_assigns_sequential_offsets() {
        let schema = Schema::new(vec![
            Dimension::new("X", Interpretation::Float, 8),
            Dimension::new("Classification", Interpretation::UnsignedByte, 1),
            Dimension::new("GpsTime", Interpretation::Float, 8),
        ])
        .expect("schema should build");

        assert_eq!(schema.row_stride(), 17);
        let offsets = schema
            .dimensions()
            .iter()
            .map(Dimension::byte_offset)
            .collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 8, 9]);
        assert_eq!(
            schema.dimension("GpsTime").map(Dimension::byte_offset),
            Some(9)
        );
        assert_eq!(schema.names().collect::<Vec<_>>(), vec!["X", "Classification", "GpsTime"]);
    }

    #[test]
    fn explicit_layout_allows_padding() {
        let schema = Schema::with_layout(
            vec![
                (Dimension::new("X", Interpretation::Float, 8), 0),
                (Dimension::new("Flag", Interpretation::UnsignedByte, 1), 8),
            ],
            16,
        )
        .expect("padded layout");
        assert_eq!(schema.row_stride(), 16);
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let error = Schema::new(vec![
            Dimension::new("X", Interpretation::Float, 8),
            Dimension::new("X", Interpretation::Float, 8),
        ])
        .expect_err("duplicate");
        assert_eq!(error.code, "SCHEMA_DIMENSION_DUPLICATE");
    }

    #[test]
    fn layout_violations_are_rejected() {
        let error = Schema::with_layout(
            vec![(Dimension::new("X", Interpretation::Float, 8), 4)],
            8,
        )
        .expect_err("past stride");
        assert_eq!(error.code, "SCHEMA_DIMENSION_LAYOUT");

        let error = Schema::with_layout(
            vec![
                (Dimension::new("X", Interpretation::Float, 8), 0),
                (Dimension::new("Y", Interpretation::Float, 8), 4),
            ],
            16,
        )
        .expect_err("overlap");
        assert_eq!(error.code, "SCHEMA_DIMENSION_OVERLAP");

        let error = Schema::new(vec![Dimension::new("Z", Interpretation::Float, 0)])
            .expect_err("zero width");
        assert_eq!(error.code, "SCHEMA_DIMENSION_WIDTH");
    }

    #[test]
    fn oversized_widths_fail_instead_of_overflowing() {
        let error = Schema::new(vec![
            Dimension::new("Huge", Interpretation::Float, usize::MAX),
            Dimension::new("Z", Interpretation::Float, 8),
        ])
        .expect_err("overflow");
        assert_eq!(error.code, "SCHEMA_DIMENSION_LAYOUT");

        let error = Schema::with_layout(
            vec![(Dimension::new("Z", Interpretation::Float, 8), usize::MAX - 2)],
            usize::MAX,
        )
        .expect_err("offset overflow");
        assert_eq!(error.code, "SCHEMA_DIMENSION_LAYOUT");
    }
}
