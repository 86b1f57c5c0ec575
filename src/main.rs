// Toolwarden - Main Entry Point
//
// Command-line front end for the tool gateway:
// - exec: run an allow-listed npm/gh subcommand and print the result envelope
// - escape: show how an argument is escaped for a shell dialect
// - resolve: show which executable a tool resolves to
// - commands: list the allow-list

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use toolwarden::config::Config;
use toolwarden::tools::{
    escape, escape_query, Argument, ExecuteOptions, ExecutionEnvelope, ShellDialect, Tool,
};
use tracing::{debug, Level};
use tracing_subscriber::EnvFilter;

/// Toolwarden: allow-listed npm and gh execution
#[derive(Parser, Debug)]
#[command(name = "toolwarden")]
#[command(author = "Toolwarden Contributors")]
#[command(version)]
#[command(
    about = "Run allow-listed npm and gh subcommands without shell injection",
    long_about = None
)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: <config dir>/toolwarden/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a tool subcommand and print the result as JSON
    Exec {
        /// Tool name (npm or gh)
        tool: String,

        /// Subcommand (e.g. view, search)
        command: String,

        /// Search query escaped as a single structured argument (repeatable)
        #[arg(long = "query")]
        queries: Vec<String>,

        /// Serve from and store into the result cache
        #[arg(long)]
        cache: bool,

        /// Override the tool's timeout
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Working directory for the tool
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Extra environment variable as KEY=VALUE (repeatable)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Shell dialect (honoured on Windows only)
        #[arg(long)]
        dialect: Option<ShellDialect>,

        /// Arguments passed to the subcommand
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Print an argument escaped for a shell dialect
    Escape {
        /// Dialect to escape for (default: this platform's)
        #[arg(long)]
        dialect: Option<ShellDialect>,

        /// Treat the argument as a structured search query
        #[arg(long)]
        query: bool,

        /// The argument to escape
        #[arg(allow_hyphen_values = true)]
        arg: String,
    },
    /// Print the executable a tool resolves to
    Resolve {
        /// Tool name (npm or gh)
        tool: String,
    },
    /// List allow-listed subcommands
    Commands {
        /// Only list this tool
        tool: Option<String>,
    },
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn parse_tool(name: &str) -> Result<Tool> {
    name.parse::<Tool>()
        .map_err(|()| anyhow::anyhow!("Unknown tool '{}'. Must be one of: npm, gh", name))
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => {
            anyhow::ensure!(path.exists(), "Config file {:?} does not exist", path);
            Config::load_from_path(path)
        }
        None => Config::load(),
    }
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    // stdout carries results; logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = load_config(args.config.as_ref()).context("Failed to load configuration")?;
    init_tracing(&config, args.verbose)?;
    debug!(?config, "Configuration loaded");

    match args.command {
        Commands::Exec {
            tool,
            command,
            queries,
            cache,
            timeout_secs,
            cwd,
            env,
            dialect,
            args,
        } => {
            let arguments: Vec<Argument> = args
                .into_iter()
                .map(Argument::Plain)
                .chain(queries.into_iter().map(Argument::Query))
                .collect();
            let options = ExecuteOptions {
                timeout: timeout_secs.map(Duration::from_secs),
                cwd,
                env: env.into_iter().collect(),
                cache,
                dialect,
            };
            exec(&config, &tool, &command, &arguments, options).await
        }
        Commands::Escape {
            dialect,
            query,
            arg,
        } => {
            let dialect = dialect.unwrap_or_else(ShellDialect::detect);
            let escaped = if query {
                escape_query(&arg, dialect)
            } else {
                escape(&arg, dialect)
            };
            println!("{}", escaped);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Resolve { tool } => {
            let tool = parse_tool(&tool)?;
            let gateway = config.gateway_builder()?.build();
            let resolved = gateway
                .resolver()
                .resolve(tool)
                .with_context(|| format!("Failed to resolve {}", tool))?;
            println!("{}\t{}", resolved.path.display(), resolved.provenance);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Commands { tool } => {
            let tools = match tool {
                Some(name) => vec![parse_tool(&name)?],
                None => Tool::ALL.to_vec(),
            };
            for tool in tools {
                for command in tool.allowed_commands() {
                    println!("{} {}", tool, command);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn exec(
    config: &Config,
    tool: &str,
    command: &str,
    arguments: &[Argument],
    options: ExecuteOptions,
) -> Result<ExitCode> {
    let mut gateway = config.gateway_builder()?.build();
    gateway.start_sweeper(config.sweep_interval());

    let result = gateway
        .execute_command(tool, command, arguments, options)
        .await;
    let envelope = ExecutionEnvelope::from(&result);
    println!(
        "{}",
        serde_json::to_string_pretty(&envelope).context("Failed to serialize result")?
    );

    Ok(if envelope.is_error() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("NPM_CONFIG_COLOR=false"),
            Ok(("NPM_CONFIG_COLOR".to_string(), "false".to_string()))
        );
        assert_eq!(
            parse_env_pair("A=b=c"),
            Ok(("A".to_string(), "b=c".to_string()))
        );
        assert!(parse_env_pair("novalue").is_err());
        assert!(parse_env_pair("=x").is_err());
    }

    #[test]
    fn test_exec_arguments_keep_hyphens() {
        let args = Args::try_parse_from([
            "toolwarden",
            "exec",
            "--cache",
            "npm",
            "view",
            "left-pad",
            "--json",
        ])
        .unwrap();
        match args.command {
            Commands::Exec {
                tool,
                command,
                cache,
                args,
                ..
            } => {
                assert_eq!(tool, "npm");
                assert_eq!(command, "view");
                assert!(cache);
                assert_eq!(args, vec!["left-pad", "--json"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_dialect_flag_parses() {
        let args =
            Args::try_parse_from(["toolwarden", "escape", "--dialect", "pwsh", "a b"]).unwrap();
        match args.command {
            Commands::Escape { dialect, arg, .. } => {
                assert_eq!(dialect, Some(ShellDialect::PowerShell));
                assert_eq!(arg, "a b");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
