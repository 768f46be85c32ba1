use std::ops::Range;
use std::sync::Arc;

use crate::element::{element_type_of, Scalar};
use crate::error::PlangError;
use crate::schema::{Dimension, Schema};

/// Row-major storage for one chunk of points.
///
/// The backing allocation never moves while the buffer is alive, so a raw
/// base pointer taken from [`PointBuffer::as_mut_ptr`] stays valid for as
/// long as the buffer is exclusively borrowed.
#[derive(Debug, Clone, PartialEq)]
pub struct PointBuffer {
    schema: Arc<Schema>,
    data: Vec<u8>,
    point_count: usize,
}

impl PointBuffer {
    pub fn new(schema: Arc<Schema>, point_count: usize) -> Self {
        let data = vec![0u8; schema.row_stride() * point_count];
        Self {
            schema,
            data,
            point_count,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    pub fn is_empty(&self) -> bool {
        self.point_count == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data.as_mut_ptr()
    }

    pub fn scalar(&self, name: &str, index: usize) -> Result<Scalar, PlangError> {
        let dimension = self.dimension(name)?;
        let element_type = element_type_of(dimension)?;
        let start = self.field_start(dimension, index)?;
        Ok(element_type.decode(&self.data[start..]))
    }

    pub fn set_scalar(
        &mut self,
        name: &str,
        index: usize,
        value: Scalar,
    ) -> Result<(), PlangError> {
        let dimension = self.dimension(name)?.clone();
        let element_type = element_type_of(&dimension)?;
        let start = self.field_start(&dimension, index)?;
        element_type.encode(value, &mut self.data[start..]);
        Ok(())
    }

    /// Copies the rows in `range` into a new buffer sharing this schema.
    pub fn slice(&self, range: Range<usize>) -> Result<Self, PlangError> {
        if range.start > range.end || range.end > self.point_count {
            return Err(PlangError::config(
                "BUFFER_RANGE",
                format!(
                    "Rows {}..{} are outside a buffer of {} points.",
                    range.start, range.end, self.point_count
                ),
            ));
        }
        let stride = self.schema.row_stride();
        Ok(Self {
            schema: Arc::clone(&self.schema),
            data: self.data[range.start * stride..range.end * stride].to_vec(),
            point_count: range.len(),
        })
    }

    pub fn append(&mut self, other: &PointBuffer) -> Result<(), PlangError> {
        if !Arc::ptr_eq(&self.schema, &other.schema) && self.schema != other.schema {
            return Err(PlangError::config(
                "BUFFER_SCHEMA_MISMATCH",
                "Cannot append points laid out with a different schema.",
            ));
        }
        self.data.extend_from_slice(&other.data);
        self.point_count += other.point_count;
        Ok(())
    }

    fn dimension(&self, name: &str) -> Result<&Dimension, PlangError> {
        self.schema.dimension(name).ok_or_else(|| {
            PlangError::config(
                "BUFFER_DIMENSION_NOT_FOUND",
                format!("Dimension \"{}\" is not part of the schema.", name),
            )
        })
    }

    fn field_start(&self, dimension: &Dimension, index: usize) -> Result<usize, PlangError> {
        if index >= self.point_count {
            return Err(PlangError::config(
                "BUFFER_INDEX",
                format!(
                    "Point {} is outside a buffer of {} points.",
                    index, self.point_count
                ),
            ));
        }
        Ok(index * self.schema.row_stride() + dimension.byte_offset())
    }
}

#[cfg(test)]
mod buffer_tests {
    use super::*;
    use crate::schema::Interpretation;

    fn xyz_schema() -> Arc<Schema> {
        Arc::new(
            Schema::new(vec![
                Dimension::new("X", Interpretation::Float, 8),
                Dimension::new("Classification", Interpretation::UnsignedByte, 1),
                Dimension::new("PointSourceId", Interpretation::UnsignedInteger, 4),
            ])
            .expect("schema"),
        )
    }

    #[test]
    fn fields_are_laid_out_row_major() {
        let mut buffer = PointBuffer::new(xyz_schema(), 2);
        buffer.set_scalar("X", 1, Scalar::Float(4.5)).expect("set x");
        buffer
            .set_scalar("Classification", 1, Scalar::UInt(7))
            .expect("set class");

        assert_eq!(buffer.as_bytes().len(), 26);
        assert_eq!(buffer.as_bytes()[13..21], 4.5f64.to_ne_bytes());
        assert_eq!(buffer.as_bytes()[13 + 8], 7);
        assert_eq!(buffer.scalar("X", 0).expect("x"), Scalar::Float(0.0));
        let error = buffer.scalar("X", 2).expect_err("out of range");
        assert_eq!(error.code, "BUFFER_INDEX");
    }

    #[test]
    fn scalar_access_goes_through_the_type_mapping() {
        let mut buffer = PointBuffer::new(xyz_schema(), 1);
        buffer
            .set_scalar("PointSourceId", 0, Scalar::Float(12.0))
            .expect("set id");
        assert_eq!(
            buffer.scalar("PointSourceId", 0).expect("id"),
            Scalar::UInt(12)
        );
        let error = buffer.scalar("Missing", 0).expect_err("missing");
        assert_eq!(error.code, "BUFFER_DIMENSION_NOT_FOUND");
    }

    #[test]
    fn slice_and_append_round_trip_rows() {
        let schema = xyz_schema();
        let mut buffer = PointBuffer::new(Arc::clone(&schema), 5);
        for index in 0..5 {
            buffer
                .set_scalar("X", index, Scalar::Float(index as f64))
                .expect("set");
        }

        let head = buffer.slice(0..2).expect("head");
        let tail = buffer.slice(2..5).expect("tail");
        assert_eq!(tail.scalar("X", 0).expect("x"), Scalar::Float(2.0));

        let mut merged = head;
        merged.append(&tail).expect("append");
        assert_eq!(merged, buffer);
        assert!(buffer.slice(4..6).is_err());
    }
}
