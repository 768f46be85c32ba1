mod api;
mod array;
mod chunk;
mod environment;
mod helpers;
mod invocation;
mod mapping;

pub use api::register_array_api;
pub use array::{TypedArray, MAX_ARRAY_LEN};
pub use chunk::{BoundChunk, ChunkState};
pub use environment::{EnvironmentOptions, ScriptEnvironment, FORMATTER_FUNCTION};
pub use invocation::{ScriptInvocation, ENTRY_FUNCTION};
pub use mapping::{ColumnMap, MappingRole};
