pub mod config;
pub mod partition;
pub mod runner;

use pl_core::PlangError;
use pl_runtime::{EnvironmentOptions, ScriptEnvironment};
use tracing::warn;

pub use config::{BridgeConfig, ConfigError, EnvironmentConfig, FailurePolicy, RunnerConfig};
pub use partition::{chunk_file_name, merge, partition_by_capacity, DEFAULT_CAPACITY};
pub use runner::{ChunkOutcome, ChunkRunner, RunSummary};

/// Starts an environment, hands it to `body`, and shuts it down on every
/// exit path.
pub fn with_script_environment<T>(
    options: EnvironmentOptions,
    body: impl FnOnce(&ScriptEnvironment) -> Result<T, PlangError>,
) -> Result<T, PlangError> {
    let env = ScriptEnvironment::startup(options)?;
    let outcome = body(&env);
    if !env.shutdown() {
        warn!("script environment was already shut down");
    }
    outcome
}
