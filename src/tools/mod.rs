//! Tool Execution Subsystem
//!
//! Runs a fixed allow-list of `npm` and `gh` subcommands through the
//! platform shell without letting caller-supplied arguments become shell
//! syntax.
//!
//! # Security Features
//!
//! - **Command Allow-List**: Only registered subcommands of registered tools run
//! - **Argument Escaping**: Every token is escaped for the target shell dialect
//! - **Executable Resolution**: Overrides must be absolute, metacharacter-free files;
//!   Windows PATH lookup never consults the current directory
//! - **Timeout Enforcement**: Children that outlive their budget are killed and reaped
//! - **Output Ceiling**: Runaway output terminates the child
//! - **Serialization**: Rate-limited tools run one call at a time
//!
//! # Architecture
//!
//! - `validator.rs`: Tool and subcommand allow-list
//! - `escape.rs`: Shell dialects and argument escaping
//! - `resolver.rs`: Executable resolution
//! - `runner.rs`: Process spawning, capture and termination
//! - `timeout.rs`: Timeout race
//! - `outcome.rs`: Success/failure classification and the result envelope
//! - `serializer.rs`: Single-slot gate for rate-limited tools
//! - `cache.rs`: TTL result cache
//! - `gateway.rs`: The entry point wiring the above together
//!
//! # Example
//!
//! ```no_run
//! use toolwarden::tools::{Argument, ExecuteOptions, ExecutionEnvelope, ToolGateway};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let gateway = ToolGateway::default();
//!
//!     let args = [Argument::from("left-pad"), Argument::from("--json")];
//!     let result = gateway
//!         .execute_command("npm", "view", &args, ExecuteOptions::default())
//!         .await;
//!
//!     println!("{}", serde_json::to_string(&ExecutionEnvelope::from(&result))?);
//!     Ok(())
//! }
//! ```

mod cache;
mod error;
mod escape;
mod gateway;
mod outcome;
mod resolver;
mod runner;
mod serializer;
mod timeout;
mod validator;

pub use cache::{CacheKey, CacheStats, ResultCache, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
pub use error::ToolError;
pub use escape::{
    build_command_line, escape, escape_query, is_structured_query, Argument, ShellDialect,
};
pub use gateway::{ExecuteOptions, GatewayBuilder, ToolGateway, ToolSettings};
pub use outcome::{
    classify, default_benign_patterns, ExecutionEnvelope, ExecutionResult, Payload, RawOutput,
    ToolOutput,
};
pub use resolver::{
    default_known_locations, search_path, validate_override, ExecutableResolver, Provenance,
    ResolvedExecutable,
};
pub use runner::{Invocation, ProcessRunner, RunOptions, ShellProcessRunner, MAX_OUTPUT_SIZE};
pub use serializer::{CallSerializer, DEFAULT_ACQUIRE_TIMEOUT};
pub use timeout::ExecutionTimeout;
pub use validator::{AllowedCommand, CommandValidator, GhCommand, NpmCommand, Tool};
