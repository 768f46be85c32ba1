use pl_core::{PlangError, PointBuffer, ScriptResult};
use pl_runtime::{ScriptEnvironment, ScriptInvocation};
use tracing::{debug, error, info, warn};

use crate::config::FailurePolicy;

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Completed {
        index: usize,
        points: usize,
        result: ScriptResult,
    },
    Skipped {
        index: usize,
        points: usize,
        error: PlangError,
    },
}

impl ChunkOutcome {
    pub fn index(&self) -> usize {
        match self {
            Self::Completed { index, .. } | Self::Skipped { index, .. } => *index,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub outcomes: Vec<ChunkOutcome>,
}

impl RunSummary {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|outcome| outcome.is_completed()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.completed()
    }

    pub fn points_processed(&self) -> usize {
        self.outcomes
            .iter()
            .map(|outcome| match outcome {
                ChunkOutcome::Completed { points, .. } => *points,
                ChunkOutcome::Skipped { .. } => 0,
            })
            .sum()
    }
}

/// Drives one script over a sequence of chunks.
///
/// Chunk-local failures follow the failure policy. Compile, lookup and
/// internal faults always stop the run.
pub struct ChunkRunner<'env> {
    invocation: ScriptInvocation<'env>,
    policy: FailurePolicy,
}

impl<'env> ChunkRunner<'env> {
    pub fn new(
        env: &'env ScriptEnvironment,
        source: impl Into<String>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            invocation: ScriptInvocation::new(env, source),
            policy,
        }
    }

    pub fn run_chunk(
        &mut self,
        index: usize,
        buffer: &mut PointBuffer,
    ) -> Result<ChunkOutcome, PlangError> {
        let points = buffer.point_count();
        let mut chunk = match self.invocation.bind(buffer) {
            Ok(chunk) => chunk,
            Err(error) => return apply_policy(self.policy, index, points, error),
        };
        let invoked = chunk.invoke();
        let unbound = chunk.unbind();
        drop(chunk);

        match (invoked, unbound) {
            (_, Err(fault)) => Err(fault),
            (Ok(result), Ok(())) => {
                debug!(chunk = index, points, "chunk completed");
                Ok(ChunkOutcome::Completed {
                    index,
                    points,
                    result,
                })
            }
            (Err(error), Ok(())) => apply_policy(self.policy, index, points, error),
        }
    }

    pub fn run_all(&mut self, chunks: &mut [PointBuffer]) -> Result<RunSummary, PlangError> {
        let mut summary = RunSummary::default();
        for (index, chunk) in chunks.iter_mut().enumerate() {
            summary.outcomes.push(self.run_chunk(index, chunk)?);
        }
        info!(
            chunks = summary.outcomes.len(),
            completed = summary.completed(),
            skipped = summary.skipped(),
            "run finished"
        );
        Ok(summary)
    }
}

fn apply_policy(
    policy: FailurePolicy,
    index: usize,
    points: usize,
    error: PlangError,
) -> Result<ChunkOutcome, PlangError> {
    if error.kind.is_fatal_to_invocation() {
        error!(chunk = index, code = %error.code, "script cannot be invoked, stopping run");
        return Err(error);
    }
    if policy == FailurePolicy::Skip && error.kind.is_chunk_local() {
        warn!(chunk = index, code = %error.code, "skipping failed chunk");
        return Ok(ChunkOutcome::Skipped {
            index,
            points,
            error,
        });
    }
    Err(error)
}

#[cfg(test)]
mod runner_tests {
    use std::sync::Arc;

    use super::*;
    use pl_core::{Dimension, ErrorKind, Interpretation, Scalar, Schema};
    use pl_runtime::EnvironmentOptions;

    use crate::partition::{merge, partition_by_capacity};

    fn env() -> ScriptEnvironment {
        ScriptEnvironment::startup(EnvironmentOptions::default()).expect("startup")
    }

    fn buffer(values: &[f64]) -> PointBuffer {
        let schema = Schema::new(vec![Dimension::new("X", Interpretation::Float, 8)])
            .expect("schema");
        let mut buffer = PointBuffer::new(Arc::new(schema), values.len());
        for (index, value) in values.iter().enumerate() {
            buffer
                .set_scalar("X", index, Scalar::Float(*value))
                .expect("seed");
        }
        buffer
    }

    const THROW_ON_NEGATIVE: &str = r#"
        fn process(input, output) {
            if input["X"].min() < 0.0 { throw "negative input"; }
            output["X"] = input["X"] * 2.0;
            input["X"].len
        }
    "#;

    #[test]
    fn run_all_processes_every_chunk() {
        let env = env();
        let source = buffer(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let mut chunks = partition_by_capacity(&source, 2).expect("partition");
        let mut runner = ChunkRunner::new(&env, THROW_ON_NEGATIVE, FailurePolicy::Abort);

        let summary = runner.run_all(&mut chunks).expect("run");
        assert_eq!(summary.completed(), 3);
        assert_eq!(summary.points_processed(), 5);
        assert_eq!(
            summary.outcomes[2],
            ChunkOutcome::Completed {
                index: 2,
                points: 1,
                result: ScriptResult::Scalar { value: 1.0 },
            }
        );

        let merged = merge(Arc::clone(source.schema()), &chunks).expect("merge");
        assert_eq!(merged.scalar("X", 4).expect("x"), Scalar::Float(10.0));
    }

    #[test]
    fn skip_policy_continues_past_runtime_failures() {
        let env = env();
        let mut chunks = vec![buffer(&[1.0]), buffer(&[-1.0]), buffer(&[3.0])];
        let mut runner = ChunkRunner::new(&env, THROW_ON_NEGATIVE, FailurePolicy::Skip);

        let summary = runner.run_all(&mut chunks).expect("run");
        assert_eq!(summary.completed(), 2);
        assert_eq!(summary.skipped(), 1);
        assert!(!summary.outcomes[1].is_completed());
        assert_eq!(summary.outcomes[1].index(), 1);
        assert_eq!(chunks[1].scalar("X", 0).expect("x"), Scalar::Float(-1.0));
        assert_eq!(chunks[2].scalar("X", 0).expect("x"), Scalar::Float(6.0));
    }

    #[test]
    fn abort_policy_stops_at_the_first_failure() {
        let env = env();
        let mut chunks = vec![buffer(&[-1.0]), buffer(&[3.0])];
        let mut runner = ChunkRunner::new(&env, THROW_ON_NEGATIVE, FailurePolicy::Abort);

        let error = runner.run_all(&mut chunks).expect_err("abort");
        assert_eq!(error.kind, ErrorKind::RuntimeFailure);
        assert_eq!(chunks[1].scalar("X", 0).expect("x"), Scalar::Float(3.0));
    }

    #[test]
    fn invocation_failures_abort_even_when_skipping() {
        let env = env();
        let mut chunks = vec![buffer(&[1.0]), buffer(&[2.0])];
        let mut runner = ChunkRunner::new(&env, "fn process(", FailurePolicy::Skip);
        let error = runner.run_all(&mut chunks).expect_err("compile");
        assert_eq!(error.kind, ErrorKind::Compile);

        let mut runner = ChunkRunner::new(&env, "fn transform(input) {}", FailurePolicy::Skip);
        let error = runner.run_all(&mut chunks).expect_err("lookup");
        assert_eq!(error.kind, ErrorKind::Lookup);
        assert_eq!(chunks[1].scalar("X", 0).expect("x"), Scalar::Float(2.0));
    }

    #[test]
    fn internal_faults_abort_even_when_skipping() {
        let env = env();
        let mut chunks = vec![buffer(&[1.0])];
        let mut runner = ChunkRunner::new(
            &env,
            r#"fn process(input, output) { output["X"] = zeros(5); }"#,
            FailurePolicy::Skip,
        );
        let error = runner.run_all(&mut chunks).expect_err("fault");
        assert_eq!(error.kind, ErrorKind::InternalFault);
        assert_eq!(error.code, "UNBIND_OUTPUT_LENGTH");
    }

    #[test]
    fn unmappable_chunks_are_skipped_as_config_errors() {
        let env = env();
        let schema = Schema::new(vec![Dimension::new(
            "Intensity",
            Interpretation::UnsignedInteger,
            2,
        )])
        .expect("schema");
        let mut chunks = vec![PointBuffer::new(Arc::new(schema), 1)];
        let mut runner =
            ChunkRunner::new(&env, "fn process(input, output) {}", FailurePolicy::Skip);
        let summary = runner.run_all(&mut chunks).expect("run");
        assert!(matches!(
            &summary.outcomes[0],
            ChunkOutcome::Skipped { error, .. } if error.kind == ErrorKind::Config
        ));
    }
}
