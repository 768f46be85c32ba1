pub mod buffer;
pub mod element;
pub mod error;
pub mod result;
pub mod schema;

pub use buffer::PointBuffer;
pub use element::{element_type_for, element_type_of, ElementType, Scalar, ALL_ELEMENT_TYPES};
pub use error::{ErrorKind, PlangError};
pub use result::ScriptResult;
pub use schema::{Dimension, Interpretation, Schema};
