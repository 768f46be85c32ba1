use std::fs;
use std::path::Path;
use std::sync::Arc;

use pl_core::{
    element_type_of, Dimension, ElementType, Interpretation, PlangError, PointBuffer, Scalar,
    Schema,
};
use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::error_map::{
    map_cli_input_invalid, map_cli_input_read, map_cli_output_encode, map_cli_output_write,
};

/// JSON point set: the dimension list followed by one row per point, each
/// row holding one number per dimension in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct PointFile {
    pub(crate) dimensions: Vec<DimensionEntry>,
    #[serde(default)]
    pub(crate) points: Vec<Vec<Number>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct DimensionEntry {
    pub(crate) name: String,
    pub(crate) interpretation: Interpretation,
    pub(crate) width: usize,
}

impl PointFile {
    pub(crate) fn to_buffer(&self) -> Result<PointBuffer, PlangError> {
        let schema = Schema::new(
            self.dimensions
                .iter()
                .map(|entry| Dimension::new(entry.name.clone(), entry.interpretation, entry.width))
                .collect(),
        )?;
        let element_types = schema
            .dimensions()
            .iter()
            .map(element_type_of)
            .collect::<Result<Vec<_>, _>>()?;

        let mut buffer = PointBuffer::new(Arc::new(schema), self.points.len());
        for (index, row) in self.points.iter().enumerate() {
            if row.len() != self.dimensions.len() {
                return Err(PlangError::config(
                    "CLI_INPUT_ROW",
                    format!(
                        "Point {} has {} values, expected {}.",
                        index,
                        row.len(),
                        self.dimensions.len()
                    ),
                ));
            }
            for ((entry, element_type), number) in
                self.dimensions.iter().zip(&element_types).zip(row)
            {
                let value = number_to_scalar(*element_type, number).ok_or_else(|| {
                    PlangError::config(
                        "CLI_INPUT_VALUE",
                        format!(
                            "Value {} of point {} does not fit dimension \"{}\" ({}).",
                            number, index, entry.name, element_type
                        ),
                    )
                })?;
                buffer.set_scalar(&entry.name, index, value)?;
            }
        }
        Ok(buffer)
    }

    pub(crate) fn from_buffer(buffer: &PointBuffer) -> Result<Self, PlangError> {
        let schema = buffer.schema();
        let dimensions = schema
            .dimensions()
            .iter()
            .map(|dimension| DimensionEntry {
                name: dimension.name().to_string(),
                interpretation: dimension.interpretation(),
                width: dimension.byte_width(),
            })
            .collect::<Vec<_>>();

        let mut points = Vec::with_capacity(buffer.point_count());
        for index in 0..buffer.point_count() {
            let row = dimensions
                .iter()
                .map(|entry| {
                    let value = buffer.scalar(&entry.name, index)?;
                    scalar_to_number(value).ok_or_else(|| {
                        PlangError::config(
                            "CLI_OUTPUT_VALUE",
                            format!(
                                "Dimension \"{}\" of point {} is not a finite number.",
                                entry.name, index
                            ),
                        )
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            points.push(row);
        }
        Ok(Self { dimensions, points })
    }
}

pub(crate) fn read_point_file(path: impl AsRef<Path>) -> Result<PointBuffer, PlangError> {
    let contents = fs::read_to_string(path).map_err(map_cli_input_read)?;
    let file: PointFile = serde_json::from_str(&contents).map_err(map_cli_input_invalid)?;
    file.to_buffer()
}

pub(crate) fn write_point_file(
    path: impl AsRef<Path>,
    buffer: &PointBuffer,
) -> Result<(), PlangError> {
    let path = path.as_ref();
    let file = PointFile::from_buffer(buffer)?;
    let json = serde_json::to_string_pretty(&file).map_err(map_cli_output_encode)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(map_cli_output_write)?;
    }
    fs::write(path, json).map_err(map_cli_output_write)
}

fn number_to_scalar(element_type: ElementType, number: &Number) -> Option<Scalar> {
    if element_type.is_float() {
        number.as_f64().map(Scalar::Float)
    } else if element_type.is_unsigned() {
        number.as_u64().map(Scalar::UInt)
    } else {
        number.as_i64().map(Scalar::Int)
    }
}

fn scalar_to_number(value: Scalar) -> Option<Number> {
    match value {
        Scalar::Int(value) => Some(Number::from(value)),
        Scalar::UInt(value) => Some(Number::from(value)),
        Scalar::Float(value) => Number::from_f64(value),
    }
}
