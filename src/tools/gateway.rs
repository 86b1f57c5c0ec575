//! Tool Gateway
//!
//! Single entry point for running an allow-listed `npm` or `gh` subcommand.
//! A call flows through validation, the optional result cache, executable
//! resolution, the call serializer (for rate-limited tools), the process
//! runner and finally outcome classification.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::cache::{CacheKey, CacheStats, ResultCache};
use super::error::ToolError;
use super::escape::{build_command_line, Argument, ShellDialect};
use super::outcome::{classify, default_benign_patterns, ExecutionResult, ToolOutput};
use super::resolver::ExecutableResolver;
use super::runner::{Invocation, ProcessRunner, RunOptions, ShellProcessRunner, MAX_OUTPUT_SIZE};
use super::serializer::CallSerializer;
use super::timeout::ExecutionTimeout;
use super::validator::{AllowedCommand, CommandValidator, Tool};

/// Resolved per-tool limits and lookup hints
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    /// Default wall-clock budget
    pub timeout: Duration,

    /// Ceiling for each of stdout and stderr
    pub max_output_bytes: usize,

    /// Absolute executable override
    pub executable: Option<PathBuf>,

    /// Replacement for the built-in install locations
    pub known_locations: Option<Vec<PathBuf>>,

    /// Case-insensitive stderr substrings treated as warnings
    pub benign_patterns: Vec<String>,
}

impl ToolSettings {
    /// Built-in settings for a tool
    pub fn for_tool(tool: Tool) -> Self {
        Self {
            timeout: ExecutionTimeout::for_tool(tool).duration(),
            max_output_bytes: MAX_OUTPUT_SIZE,
            executable: None,
            known_locations: None,
            benign_patterns: default_benign_patterns(tool),
        }
    }
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Overrides the tool's default timeout
    pub timeout: Option<Duration>,

    /// Working directory of the child
    pub cwd: Option<PathBuf>,

    /// Extra environment (PATH is never overridden)
    pub env: HashMap<String, String>,

    /// Serve from and store into the result cache
    pub cache: bool,

    /// Requested dialect, honoured on Windows only
    pub dialect: Option<ShellDialect>,
}

impl ExecuteOptions {
    pub fn cached() -> Self {
        Self {
            cache: true,
            ..Default::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn dialect(mut self, dialect: ShellDialect) -> Self {
        self.dialect = Some(dialect);
        self
    }
}

/// Everything that makes two calls produce the same output
#[derive(Serialize)]
struct CacheParams<'a> {
    args: &'a [Argument],
    cwd: Option<&'a PathBuf>,
    env: BTreeMap<&'a str, &'a str>,
    dialect: ShellDialect,
}

/// Gateway for allow-listed CLI tools
pub struct ToolGateway {
    validator: CommandValidator,
    resolver: ExecutableResolver,
    runner: Arc<dyn ProcessRunner>,
    serializer: CallSerializer,
    cache: ResultCache<ToolOutput>,
    dialect: ShellDialect,
    settings: HashMap<Tool, ToolSettings>,
    sweeper: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for ToolGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolGateway")
            .field("dialect", &self.dialect)
            .field("resolver", &self.resolver)
            .field("serializer", &self.serializer)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Default for ToolGateway {
    fn default() -> Self {
        GatewayBuilder::new().build()
    }
}

impl ToolGateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    /// Dialect used when a call does not request one
    pub fn dialect(&self) -> ShellDialect {
        self.dialect
    }

    /// Settings in effect for `tool`
    pub fn settings(&self, tool: Tool) -> ToolSettings {
        self.settings
            .get(&tool)
            .cloned()
            .unwrap_or_else(|| ToolSettings::for_tool(tool))
    }

    pub fn resolver(&self) -> &ExecutableResolver {
        &self.resolver
    }

    pub fn cache(&self) -> &ResultCache<ToolOutput> {
        &self.cache
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Allow-listed subcommands of `tool`, or `None` for an unknown tool
    pub fn allowed_commands(&self, tool: &str) -> Option<&'static [&'static str]> {
        tool.parse::<Tool>().ok().map(|t| t.allowed_commands())
    }

    /// Start the periodic cache sweep
    ///
    /// Must be called from within a tokio runtime. The task is aborted when
    /// the gateway is dropped.
    pub fn start_sweeper(&mut self, interval: Duration) {
        if let Some(previous) = self.sweeper.replace(self.cache.start_sweeper(interval)) {
            previous.abort();
        }
    }

    /// Run one allow-listed subcommand
    ///
    /// Never panics and never returns an unclassified failure: every outcome
    /// is either a [`ToolOutput`] or a [`ToolError`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// use toolwarden::tools::{Argument, ExecuteOptions, ToolGateway};
    ///
    /// # async fn demo() {
    /// let gateway = ToolGateway::default();
    /// let result = gateway
    ///     .execute_command(
    ///         "npm",
    ///         "view",
    ///         &[Argument::from("left-pad"), Argument::from("--json")],
    ///         ExecuteOptions::cached(),
    ///     )
    ///     .await;
    /// assert!(result.is_ok());
    /// # }
    /// ```
    pub async fn execute_command(
        &self,
        tool: &str,
        command: &str,
        args: &[Argument],
        options: ExecuteOptions,
    ) -> ExecutionResult {
        let request_id = Uuid::new_v4();
        let span = info_span!(
            "execute_command",
            %request_id,
            tool = %tool,
            command = %command,
            args = args.len()
        );

        async move {
            let start = Instant::now();
            let result = self.dispatch(tool, command, args, &options).await;
            let duration_ms = start.elapsed().as_millis() as u64;
            match &result {
                Ok(output) => info!(
                    duration_ms,
                    warning = output.warning.is_some(),
                    "Command succeeded"
                ),
                Err(err) => warn!(duration_ms, kind = err.kind(), error = %err, "Command failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        tool: &str,
        command: &str,
        args: &[Argument],
        options: &ExecuteOptions,
    ) -> ExecutionResult {
        let allowed = self.validator.validate(tool, command)?;

        if !options.cache {
            return self.run_uncached(allowed, args, options).await;
        }

        let params = CacheParams {
            args,
            cwd: options.cwd.as_ref(),
            env: options
                .env
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            dialect: self.dialect.with_override(options.dialect),
        };
        let key = match CacheKey::derive(&allowed.operation(), &params) {
            Ok(key) => key,
            Err(e) => {
                // A non UTF-8 working directory has no JSON form
                warn!("Call parameters cannot be keyed, running uncached: {}", e);
                return self.run_uncached(allowed, args, options).await;
            }
        };
        self.cache
            .with_cache(key, || self.run_uncached(allowed, args, options))
            .await
    }

    async fn run_uncached(
        &self,
        allowed: AllowedCommand,
        args: &[Argument],
        options: &ExecuteOptions,
    ) -> ExecutionResult {
        let tool = allowed.tool();
        let settings = self.settings(tool);

        // Resolution failures never touch the serializer
        let executable = self.resolver.resolve(tool)?;
        debug!(
            path = %executable.path.display(),
            provenance = %executable.provenance,
            "Resolved executable"
        );

        let dialect = self.dialect.with_override(options.dialect);
        let command_line =
            build_command_line(&executable.program(), allowed.subcommand(), args, dialect);
        debug!(%dialect, command_line = %command_line, "Assembled command line");

        let invocation = Invocation::new(dialect, command_line);
        let run_options = RunOptions {
            timeout: ExecutionTimeout::new(options.timeout.unwrap_or(settings.timeout)),
            max_output_bytes: settings.max_output_bytes,
            cwd: options.cwd.clone(),
            env: options.env.clone(),
        };

        let run = || async {
            let raw = self.runner.run(&invocation, &run_options).await?;
            classify(raw, &settings.benign_patterns)
        };

        if tool.is_serialized() {
            self.serializer.with_exclusive(run).await
        } else {
            run().await
        }
    }
}

impl Drop for ToolGateway {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

/// Builder for [`ToolGateway`]
pub struct GatewayBuilder {
    runner: Arc<dyn ProcessRunner>,
    serializer: CallSerializer,
    cache: Option<ResultCache<ToolOutput>>,
    dialect: ShellDialect,
    settings: HashMap<Tool, ToolSettings>,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            runner: Arc::new(ShellProcessRunner::new()),
            serializer: CallSerializer::default(),
            cache: None,
            dialect: ShellDialect::detect(),
            settings: HashMap::new(),
        }
    }

    /// Replace the process runner
    pub fn runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn serializer(mut self, serializer: CallSerializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn cache(mut self, cache: ResultCache<ToolOutput>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Set the default dialect directly, bypassing platform detection
    pub fn dialect(mut self, dialect: ShellDialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn tool_settings(mut self, tool: Tool, settings: ToolSettings) -> Self {
        self.settings.insert(tool, settings);
        self
    }

    pub fn build(self) -> ToolGateway {
        let mut settings = self.settings;
        let mut resolver = ExecutableResolver::new();
        for tool in Tool::ALL {
            let entry = settings
                .entry(tool)
                .or_insert_with(|| ToolSettings::for_tool(tool));
            if let Some(ref path) = entry.executable {
                resolver = resolver.with_override(tool, path.clone());
            }
            if let Some(ref locations) = entry.known_locations {
                resolver = resolver.with_known_locations(tool, locations.clone());
            }
        }

        ToolGateway {
            validator: CommandValidator::new(),
            resolver,
            runner: self.runner,
            serializer: self.serializer,
            cache: self.cache.unwrap_or_default(),
            dialect: self.dialect,
            settings,
            sweeper: None,
        }
    }
}
