use std::sync::Arc;

use pl_core::{PlangError, PointBuffer, Schema};

pub const DEFAULT_CAPACITY: usize = 100_000;

/// Splits `buffer` into consecutive chunks of at most `capacity` points.
/// An empty buffer yields no chunks.
pub fn partition_by_capacity(
    buffer: &PointBuffer,
    capacity: usize,
) -> Result<Vec<PointBuffer>, PlangError> {
    if capacity == 0 {
        return Err(PlangError::config(
            "PARTITION_CAPACITY",
            "Chunk capacity must be greater than zero.",
        ));
    }
    let total = buffer.point_count();
    (0..total)
        .step_by(capacity)
        .map(|start| buffer.slice(start..(start + capacity).min(total)))
        .collect()
}

/// Concatenates chunks back into one buffer laid out with `schema`.
pub fn merge(schema: Arc<Schema>, chunks: &[PointBuffer]) -> Result<PointBuffer, PlangError> {
    let mut merged = PointBuffer::new(schema, 0);
    for chunk in chunks {
        merged.append(chunk)?;
    }
    Ok(merged)
}

/// Output file name for chunk `index` (counted from 1): `_<index>` goes in
/// front of the extension, or at the end when there is none.
pub fn chunk_file_name(file_name: &str, index: usize) -> String {
    let stem_start = file_name
        .rfind(std::path::is_separator)
        .map_or(0, |separator| separator + 1);
    match file_name[stem_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let dot = stem_start + dot;
            format!("{}_{}{}", &file_name[..dot], index, &file_name[dot..])
        }
        _ => format!("{}_{}", file_name, index),
    }
}
