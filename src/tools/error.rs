//! Tool Execution Errors
//!
//! Every failure a gateway call can produce. Errors are returned as values to
//! the immediate caller and are never retried inside this crate.

use std::time::Duration;

/// Error types for tool execution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    /// Tool or subcommand is not on the static allow-list
    #[error("Command '{tool} {command}' is not registered")]
    RejectedCommand { tool: String, command: String },

    /// Explicit executable override failed validation
    #[error("Invalid executable path '{path}': {reason}")]
    InvalidExecutablePath { path: String, reason: String },

    /// No executable found on a safe search path
    #[error("Executable for '{tool}' not found on PATH")]
    ExecutableNotFound { tool: String },

    /// The shell interpreter could not be started
    #[error("Failed to spawn process '{program}': {reason}")]
    Spawn { program: String, reason: String },

    /// Non-zero exit or disqualifying stderr
    #[error("Process failed (exit code: {}): {diagnostic}", display_code(.exit_code))]
    ProcessError {
        exit_code: Option<i32>,
        diagnostic: String,
    },

    /// Wall-clock budget exceeded, process killed
    #[error("Command execution timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// Output ceiling exceeded, process killed
    #[error("Process output exceeded {limit} bytes")]
    OutputLimitExceeded { limit: usize },

    /// Serialized-call slot could not be acquired in time
    #[error("Timed out after {waited:?} waiting for exclusive access")]
    MutexTimeout { waited: Duration },
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "none".to_string(),
    }
}

impl ToolError {
    /// Stable category name, suitable for callers and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::RejectedCommand { .. } => "rejected_command",
            ToolError::InvalidExecutablePath { .. } => "invalid_executable_path",
            ToolError::ExecutableNotFound { .. } => "executable_not_found",
            ToolError::Spawn { .. } => "spawn",
            ToolError::ProcessError { .. } => "process_error",
            ToolError::Timeout { .. } => "timeout",
            ToolError::OutputLimitExceeded { .. } => "output_limit_exceeded",
            ToolError::MutexTimeout { .. } => "mutex_timeout",
        }
    }

    /// Whether repeating the identical call could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolError::ProcessError { .. }
                | ToolError::Timeout { .. }
                | ToolError::MutexTimeout { .. }
        )
    }

    pub(crate) fn rejected(tool: &str, command: &str) -> Self {
        ToolError::RejectedCommand {
            tool: tool.to_string(),
            command: command.to_string(),
        }
    }

    pub(crate) fn invalid_path(path: &str, reason: &str) -> Self {
        ToolError::InvalidExecutablePath {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_message_mentions_registration() {
        let err = ToolError::rejected("npm", "install");
        assert_eq!(err.to_string(), "Command 'npm install' is not registered");
        assert_eq!(err.kind(), "rejected_command");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_process_error_message() {
        let err = ToolError::ProcessError {
            exit_code: Some(1),
            diagnostic: "E404 not found".to_string(),
        };
        assert!(err.to_string().contains("exit code: 1"));
        assert!(err.to_string().contains("E404"));

        let killed = ToolError::ProcessError {
            exit_code: None,
            diagnostic: String::new(),
        };
        assert!(killed.to_string().contains("exit code: none"));
    }

    #[test]
    fn test_retryable_categories() {
        assert!(ToolError::Timeout {
            timeout: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(ToolError::MutexTimeout {
            waited: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!ToolError::invalid_path("/x", "missing").is_retryable());
        assert!(!ToolError::OutputLimitExceeded { limit: 10 }.is_retryable());
    }

    #[test]
    fn test_kinds_are_distinct() {
        let errors = vec![
            ToolError::rejected("a", "b"),
            ToolError::invalid_path("/x", "y"),
            ToolError::ExecutableNotFound { tool: "gh".into() },
            ToolError::Spawn {
                program: "sh".into(),
                reason: "r".into(),
            },
            ToolError::ProcessError {
                exit_code: Some(2),
                diagnostic: "d".into(),
            },
            ToolError::Timeout {
                timeout: Duration::from_millis(5),
            },
            ToolError::OutputLimitExceeded { limit: 1 },
            ToolError::MutexTimeout {
                waited: Duration::from_millis(5),
            },
        ];
        let mut kinds: Vec<_> = errors.iter().map(|e| e.kind()).collect();
        kinds.sort();
        kinds.dedup();
        assert_eq!(kinds.len(), errors.len());
    }
}
