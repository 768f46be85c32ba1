use std::marker::PhantomData;
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

use rhai::Dynamic;
use tracing::{debug, trace, warn};

use pl_core::{element_type_of, ElementType, PlangError, PointBuffer, Scalar, Schema, ScriptResult};

use crate::array::{TypedArray, ViewLease};
use crate::helpers::rhai_bridge::dynamic_to_script_result;
use crate::invocation::ScriptInvocation;
use crate::mapping::{ColumnMap, MappingRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Idle,
    Bound,
    Invoked,
    Unbinding,
}

enum Resource {
    InputView(String, TypedArray),
    InputMapping(ColumnMap),
    OutputMapping(ColumnMap),
    CallArguments(Dynamic, Dynamic),
    ScriptResult(Dynamic),
}

impl Resource {
    fn label(&self) -> &'static str {
        match self {
            Self::InputView(..) => "input-view",
            Self::InputMapping(_) => "input-mapping",
            Self::OutputMapping(_) => "output-mapping",
            Self::CallArguments(..) => "call-arguments",
            Self::ScriptResult(_) => "script-result",
        }
    }
}

/// Everything a chunk hands to the runtime, released in creation order.
#[derive(Default)]
struct ReleaseList {
    pending: Vec<Resource>,
    released: Vec<&'static str>,
}

impl ReleaseList {
    fn push(&mut self, resource: Resource) {
        self.pending.push(resource);
    }

    fn release_all(&mut self) -> usize {
        let count = self.pending.len();
        for resource in self.pending.drain(..) {
            let label = resource.label();
            match &resource {
                Resource::InputView(name, _) => trace!(resource = label, name = %name, "released"),
                Resource::InputMapping(mapping) | Resource::OutputMapping(mapping) => {
                    mapping.clear();
                    trace!(resource = label, "released");
                }
                _ => trace!(resource = label, "released"),
            }
            self.released.push(label);
        }
        count
    }
}

struct PlannedWrite {
    offset: usize,
    element_type: ElementType,
    values: Vec<Scalar>,
}

/// One chunk bound to a script invocation.
///
/// Holds the exclusive borrow of the point buffer until it is dropped, so
/// the storage behind the views cannot move or be touched by anyone else.
/// [`BoundChunk::unbind`] writes outputs back and releases every resource;
/// dropping a chunk that was never unbound releases without writing.
pub struct BoundChunk<'a, 'env> {
    invocation: &'a mut ScriptInvocation<'env>,
    buffer: PhantomData<&'a mut PointBuffer>,
    schema: Arc<Schema>,
    base: NonNull<u8>,
    point_count: usize,
    lease: Rc<ViewLease>,
    input: ColumnMap,
    output: ColumnMap,
    releases: ReleaseList,
    state: ChunkState,
    invoke_failed: bool,
}

impl<'a, 'env> BoundChunk<'a, 'env> {
    pub(crate) fn bind(
        invocation: &'a mut ScriptInvocation<'env>,
        buffer: &'a mut PointBuffer,
    ) -> Result<Self, PlangError> {
        let schema = Arc::clone(buffer.schema());
        let columns = schema
            .dimensions()
            .iter()
            .map(|dimension| {
                element_type_of(dimension).map(|element_type| (dimension, element_type))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let base = NonNull::new(buffer.as_mut_ptr()).ok_or_else(|| {
            PlangError::internal_fault("BIND_BUFFER_NULL", "Point buffer has no storage.")
        })?;
        invocation.environment().claim_chunk()?;

        let point_count = buffer.point_count();
        let stride = schema.row_stride();
        let lease = ViewLease::new();
        let names = schema.names().map(str::to_string).collect::<Vec<_>>();
        let input = ColumnMap::new(MappingRole::Input, names.clone());
        let output = ColumnMap::new(MappingRole::Output, names);
        let mut releases = ReleaseList::default();

        for (dimension, element_type) in columns {
            // Offsets were validated against the stride by the schema; the
            // pointer is only dereferenced for indices below `point_count`.
            let column_base = base.as_ptr().wrapping_add(dimension.byte_offset());
            let Some(column_base) = NonNull::new(column_base) else {
                invocation.environment().finish_chunk();
                return Err(PlangError::internal_fault(
                    "BIND_BUFFER_NULL",
                    "Column offset produced a null pointer.",
                ));
            };
            // SAFETY: `buffer` stays exclusively borrowed for `'a`, and the
            // lease is revoked before that borrow ends.
            let view = unsafe {
                TypedArray::view(
                    Rc::clone(&lease),
                    column_base,
                    stride,
                    point_count,
                    element_type,
                )
            };
            input.insert(dimension.name(), view.clone());
            releases.push(Resource::InputView(dimension.name().to_string(), view));
        }
        releases.push(Resource::InputMapping(input.clone()));
        releases.push(Resource::OutputMapping(output.clone()));

        debug!(points = point_count, dimensions = schema.len(), "chunk bound");
        Ok(Self {
            invocation,
            buffer: PhantomData,
            schema,
            base,
            point_count,
            lease,
            input,
            output,
            releases,
            state: ChunkState::Bound,
            invoke_failed: false,
        })
    }

    pub fn state(&self) -> ChunkState {
        self.state
    }

    pub fn point_count(&self) -> usize {
        self.point_count
    }

    /// Labels of the resources released so far, in release order.
    pub fn released_resources(&self) -> &[&'static str] {
        &self.releases.released
    }

    /// Calls the entry function with the input and output mappings.
    pub fn invoke(&mut self) -> Result<ScriptResult, PlangError> {
        match self.state {
            ChunkState::Bound => {}
            ChunkState::Invoked => {
                return Err(PlangError::internal_fault(
                    "CHUNK_ALREADY_INVOKED",
                    "This chunk was already invoked; unbind it first.",
                ))
            }
            ChunkState::Idle | ChunkState::Unbinding => {
                return Err(PlangError::internal_fault(
                    "CHUNK_NOT_BOUND",
                    "Cannot invoke a chunk that is not bound.",
                ))
            }
        }
        self.state = ChunkState::Invoked;

        let input = Dynamic::from(self.input.clone());
        let output = Dynamic::from(self.output.clone());
        self.releases.push(Resource::CallArguments(input.clone(), output.clone()));

        let outcome = self
            .invocation
            .call_entry(input, output)
            .and_then(|value| {
                let result = dynamic_to_script_result(&value)
                    .map_err(|message| PlangError::runtime_failure("SCRIPT_RESULT", message));
                self.releases.push(Resource::ScriptResult(value));
                result
            });
        if let Err(error) = &outcome {
            self.invoke_failed = true;
            warn!(code = %error.code, kind = %error.kind, "chunk invocation failed");
        }
        outcome
    }

    /// Writes outputs back (after a successful invoke) and releases the
    /// chunk. Calling it again is a no-op.
    pub fn unbind(&mut self) -> Result<(), PlangError> {
        let previous = self.state;
        if previous == ChunkState::Idle {
            return Ok(());
        }
        self.state = ChunkState::Unbinding;

        let outcome = if previous == ChunkState::Invoked && !self.invoke_failed {
            self.write_back()
        } else {
            if !self.output.is_empty() {
                debug!(
                    outputs = self.output.len(),
                    "discarding outputs of a failed invocation"
                );
            }
            Ok(())
        };
        self.release();
        outcome
    }

    fn write_back(&mut self) -> Result<(), PlangError> {
        // Validate every output before the first write so a rejected
        // output leaves the buffer unchanged.
        let mut planned = Vec::new();
        for (name, array) in self.output.entries() {
            let Some(dimension) = self.schema.dimension(&name) else {
                return Err(PlangError::internal_fault(
                    "UNBIND_OUTPUT_UNKNOWN",
                    format!("Output \"{}\" is not a dimension of the schema.", name),
                ));
            };
            let element_type = element_type_of(dimension)
                .map_err(|error| PlangError::internal_fault(error.code, error.message))?;
            if !element_type.supports_write_back() {
                return Err(PlangError::internal_fault(
                    "UNBIND_OUTPUT_UNSUPPORTED",
                    format!(
                        "Dimension \"{}\" holds {} values, which cannot be written back.",
                        name, element_type
                    ),
                ));
            }
            if array.element_type() != element_type {
                return Err(PlangError::internal_fault(
                    "UNBIND_OUTPUT_TYPE",
                    format!(
                        "Output \"{}\" is a {} array but the dimension holds {}.",
                        name,
                        array.element_type(),
                        element_type
                    ),
                ));
            }
            if array.len() != self.point_count {
                return Err(PlangError::internal_fault(
                    "UNBIND_OUTPUT_LENGTH",
                    format!(
                        "Output \"{}\" has {} elements, expected {}.",
                        name,
                        array.len(),
                        self.point_count
                    ),
                ));
            }
            let values = array
                .to_scalars()
                .map_err(|message| PlangError::internal_fault("UNBIND_OUTPUT_RELEASED", message))?;
            planned.push(PlannedWrite {
                offset: dimension.byte_offset(),
                element_type,
                values,
            });
        }

        let stride = self.schema.row_stride();
        for write in &planned {
            let width = write.element_type.width();
            for (index, value) in write.values.iter().enumerate() {
                // SAFETY: the buffer is still exclusively borrowed, the
                // dimension fits inside the row and `index < point_count`.
                let bytes = unsafe {
                    std::slice::from_raw_parts_mut(
                        self.base.as_ptr().add(index * stride + write.offset),
                        width,
                    )
                };
                write.element_type.encode(*value, bytes);
            }
        }
        debug!(
            columns = planned.len(),
            points = self.point_count,
            "outputs written back"
        );
        Ok(())
    }

    fn release(&mut self) {
        self.lease.revoke();
        let released = self.releases.release_all();
        self.invocation.environment().finish_chunk();
        self.state = ChunkState::Idle;
        debug!(released, "chunk released");
    }

    #[cfg(test)]
    pub(crate) fn input_view(&self, name: &str) -> Option<TypedArray> {
        self.input.get(name).ok().flatten()
    }
}

impl Drop for BoundChunk<'_, '_> {
    fn drop(&mut self) {
        if self.state != ChunkState::Idle {
            warn!(state = ?self.state, "chunk dropped without unbind; outputs discarded");
            self.release();
        }
    }
}
