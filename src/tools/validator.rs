//! Command Validation Module
//!
//! This module is the single choke point between a caller's request and the
//! rest of the pipeline. A request names a tool and a subcommand as plain
//! strings; only an exact, case-sensitive match against the static allow-list
//! yields an [`AllowedCommand`], and nothing downstream accepts anything else.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::ToolError;

/// Trusted external tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    /// The npm registry client
    Npm,
    /// The GitHub CLI (rate-limited upstream)
    Gh,
}

impl Tool {
    /// All trusted tools
    pub const ALL: [Tool; 2] = [Tool::Npm, Tool::Gh];

    /// Tool identifier as used in requests and configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Npm => "npm",
            Tool::Gh => "gh",
        }
    }

    /// Bare binary name used for lookup
    pub fn binary_name(&self) -> &'static str {
        match self {
            Tool::Npm => "npm",
            Tool::Gh => "gh",
        }
    }

    /// Whether calls must pass through the call serializer
    pub fn is_serialized(&self) -> bool {
        matches!(self, Tool::Gh)
    }

    /// Allow-listed subcommands, in declaration order
    pub fn allowed_commands(&self) -> &'static [&'static str] {
        match self {
            Tool::Npm => NpmCommand::NAMES,
            Tool::Gh => GhCommand::NAMES,
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tool {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "npm" => Ok(Tool::Npm),
            "gh" => Ok(Tool::Gh),
            _ => Err(()),
        }
    }
}

/// npm subcommands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NpmCommand {
    View,
    Search,
    Ping,
    Config,
    Whoami,
}

impl NpmCommand {
    const NAMES: &'static [&'static str] = &["view", "search", "ping", "config", "whoami"];

    pub fn as_str(&self) -> &'static str {
        match self {
            NpmCommand::View => "view",
            NpmCommand::Search => "search",
            NpmCommand::Ping => "ping",
            NpmCommand::Config => "config",
            NpmCommand::Whoami => "whoami",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "view" => Some(NpmCommand::View),
            "search" => Some(NpmCommand::Search),
            "ping" => Some(NpmCommand::Ping),
            "config" => Some(NpmCommand::Config),
            "whoami" => Some(NpmCommand::Whoami),
            _ => None,
        }
    }
}

/// GitHub CLI subcommands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GhCommand {
    Search,
    Api,
    Auth,
    Org,
    Pr,
    Repo,
}

impl GhCommand {
    const NAMES: &'static [&'static str] = &["search", "api", "auth", "org", "pr", "repo"];

    pub fn as_str(&self) -> &'static str {
        match self {
            GhCommand::Search => "search",
            GhCommand::Api => "api",
            GhCommand::Auth => "auth",
            GhCommand::Org => "org",
            GhCommand::Pr => "pr",
            GhCommand::Repo => "repo",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "search" => Some(GhCommand::Search),
            "api" => Some(GhCommand::Api),
            "auth" => Some(GhCommand::Auth),
            "org" => Some(GhCommand::Org),
            "pr" => Some(GhCommand::Pr),
            "repo" => Some(GhCommand::Repo),
            _ => None,
        }
    }
}

/// A tool/subcommand pair that passed the allow-list
///
/// Produced by [`CommandValidator::validate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowedCommand {
    Npm(NpmCommand),
    Gh(GhCommand),
}

impl AllowedCommand {
    /// The tool this command belongs to
    pub fn tool(&self) -> Tool {
        match self {
            AllowedCommand::Npm(_) => Tool::Npm,
            AllowedCommand::Gh(_) => Tool::Gh,
        }
    }

    /// The subcommand as passed on the command line
    pub fn subcommand(&self) -> &'static str {
        match self {
            AllowedCommand::Npm(c) => c.as_str(),
            AllowedCommand::Gh(c) => c.as_str(),
        }
    }

    /// Operation identity, e.g. `npm view`
    pub fn operation(&self) -> String {
        format!("{} {}", self.tool(), self.subcommand())
    }
}

/// Command validator enforcing the static allow-list
///
/// The validator is stateless; the allow-list lives in the [`Tool`],
/// [`NpmCommand`] and [`GhCommand`] declarations and cannot be extended at
/// runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandValidator;

impl CommandValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate a tool name and subcommand
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::RejectedCommand`] for any unknown tool or any
    /// subcommand that is not an exact match, including case variants and
    /// names carrying extra characters.
    ///
    /// # Example
    ///
    /// ```
    /// use toolwarden::tools::{CommandValidator, Tool};
    ///
    /// let validator = CommandValidator::new();
    /// let cmd = validator.validate("npm", "view").unwrap();
    /// assert_eq!(cmd.tool(), Tool::Npm);
    /// assert!(validator.validate("npm", "install").is_err());
    /// ```
    pub fn validate(&self, tool: &str, command: &str) -> Result<AllowedCommand, ToolError> {
        let parsed = match tool.parse::<Tool>() {
            Ok(Tool::Npm) => NpmCommand::parse(command).map(AllowedCommand::Npm),
            Ok(Tool::Gh) => GhCommand::parse(command).map(AllowedCommand::Gh),
            Err(()) => None,
        };

        parsed.ok_or_else(|| {
            tracing::warn!(tool = %tool, command = %command, "Rejected unregistered command");
            ToolError::rejected(tool, command)
        })
    }

    /// Check if a tool/subcommand pair is allowed
    pub fn is_allowed(&self, tool: &str, command: &str) -> bool {
        match tool.parse::<Tool>() {
            Ok(t) => t.allowed_commands().contains(&command),
            Err(()) => false,
        }
    }
}
