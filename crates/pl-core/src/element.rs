use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::PlangError;
use crate::schema::{Dimension, Interpretation};

/// Element tag of a numeric array as seen by scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Int8,
    UInt8,
    Float32,
    Float64,
    Int32,
    Int64,
    UInt32,
    UInt64,
}

pub const ALL_ELEMENT_TYPES: [ElementType; 8] = [
    ElementType::Int8,
    ElementType::UInt8,
    ElementType::Float32,
    ElementType::Float64,
    ElementType::Int32,
    ElementType::Int64,
    ElementType::UInt32,
    ElementType::UInt64,
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Scalar {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Int(value) => value as f64,
            Self::UInt(value) => value as f64,
            Self::Float(value) => value,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Self::Int(value) => value,
            Self::UInt(value) => value as i64,
            Self::Float(value) => value as i64,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Self::Int(value) => value as u64,
            Self::UInt(value) => value,
            Self::Float(value) => value as u64,
        }
    }
}

/// Maps a dimension's interpretation and byte width to an element tag.
///
/// Returns `None` for every pair without a defined mapping. A wrong width
/// here would make a view read into the neighbouring column, so there is no
/// fallback.
pub fn element_type_for(interpretation: Interpretation, byte_width: usize) -> Option<ElementType> {
    match (interpretation, byte_width) {
        (Interpretation::SignedByte, 1) => Some(ElementType::Int8),
        (Interpretation::UnsignedByte, 1) => Some(ElementType::UInt8),
        (Interpretation::Float, 4) => Some(ElementType::Float32),
        (Interpretation::Float, 8) => Some(ElementType::Float64),
        (Interpretation::SignedInteger, 4) => Some(ElementType::Int32),
        (Interpretation::SignedInteger, 8) => Some(ElementType::Int64),
        (Interpretation::UnsignedInteger, 4) => Some(ElementType::UInt32),
        (Interpretation::UnsignedInteger, 8) => Some(ElementType::UInt64),
        _ => None,
    }
}

pub fn element_type_of(dimension: &Dimension) -> Result<ElementType, PlangError> {
    element_type_for(dimension.interpretation(), dimension.byte_width()).ok_or_else(|| {
        PlangError::config(
            "BIND_DIMENSION_UNMAPPED",
            format!(
                "Dimension \"{}\" ({} with {} bytes) has no array element mapping.",
                dimension.name(),
                dimension.interpretation(),
                dimension.byte_width()
            ),
        )
    })
}

impl ElementType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_ELEMENT_TYPES
            .iter()
            .copied()
            .find(|element_type| element_type.name() == name)
    }

    pub fn width(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Float32 | Self::Int32 | Self::UInt32 => 4,
            Self::Float64 | Self::Int64 | Self::UInt64 => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt32 | Self::UInt64)
    }

    /// Only these element types can be copied from an output array back into
    /// a buffer column.
    pub fn supports_write_back(self) -> bool {
        matches!(self, Self::Float64 | Self::UInt64)
    }

    /// Decodes one element from native-endian bytes. `bytes` must hold at
    /// least `self.width()` bytes.
    pub fn decode(self, bytes: &[u8]) -> Scalar {
        match self {
            Self::Int8 => Scalar::Int(i8::from_ne_bytes([bytes[0]]) as i64),
            Self::UInt8 => Scalar::UInt(bytes[0] as u64),
            Self::Float32 => Scalar::Float(f32::from_ne_bytes(word4(bytes)) as f64),
            Self::Float64 => Scalar::Float(f64::from_ne_bytes(word8(bytes))),
            Self::Int32 => Scalar::Int(i32::from_ne_bytes(word4(bytes)) as i64),
            Self::Int64 => Scalar::Int(i64::from_ne_bytes(word8(bytes))),
            Self::UInt32 => Scalar::UInt(u32::from_ne_bytes(word4(bytes)) as u64),
            Self::UInt64 => Scalar::UInt(u64::from_ne_bytes(word8(bytes))),
        }
    }

    /// Encodes `value` with `as`-conversion semantics into the first
    /// `self.width()` bytes of `bytes`.
    pub fn encode(self, value: Scalar, bytes: &mut [u8]) {
        match self {
            Self::Int8 => bytes[..1].copy_from_slice(&(value.as_i64() as i8).to_ne_bytes()),
            Self::UInt8 => bytes[..1].copy_from_slice(&(value.as_u64() as u8).to_ne_bytes()),
            Self::Float32 => bytes[..4].copy_from_slice(&(value.as_f64() as f32).to_ne_bytes()),
            Self::Float64 => bytes[..8].copy_from_slice(&value.as_f64().to_ne_bytes()),
            Self::Int32 => bytes[..4].copy_from_slice(&(value.as_i64() as i32).to_ne_bytes()),
            Self::Int64 => bytes[..8].copy_from_slice(&value.as_i64().to_ne_bytes()),
            Self::UInt32 => bytes[..4].copy_from_slice(&(value.as_u64() as u32).to_ne_bytes()),
            Self::UInt64 => bytes[..8].copy_from_slice(&value.as_u64().to_ne_bytes()),
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn word4(bytes: &[u8]) -> [u8; 4] {
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn word8(bytes: &[u8]) -> [u8; 8] {
    [
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]
}
