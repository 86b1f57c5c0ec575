//! Execution Timeout Management
//!
//! This module provides the timer half of the race between a child process
//! and its wall-clock budget.

use std::future::Future;
use std::time::Duration;
use tokio::time;

use super::error::ToolError;
use super::validator::Tool;

/// Execution timeout configuration
///
/// Timeouts are enforced to prevent commands from hanging indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionTimeout {
    /// The timeout duration
    duration: Duration,
}

impl Default for ExecutionTimeout {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl ExecutionTimeout {
    /// Create a new execution timeout
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use toolwarden::tools::ExecutionTimeout;
    ///
    /// let timeout = ExecutionTimeout::new(Duration::from_secs(30));
    /// assert_eq!(timeout.duration(), Duration::from_secs(30));
    /// ```
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Get the timeout duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Create a timeout from seconds
    pub fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Default budget for a tool
    ///
    /// The GitHub CLI talks to a remote, rate-limited API and gets the
    /// longer budget.
    pub fn for_tool(tool: Tool) -> Self {
        match tool {
            Tool::Npm => Self::from_secs(30),
            Tool::Gh => Self::from_secs(60),
        }
    }

    /// Execute a future with a timeout
    ///
    /// Returns the future's own result if it completes first, or
    /// [`ToolError::Timeout`] if the timer wins. The losing future is
    /// dropped; callers owning a child process must kill it on timeout.
    pub async fn run<F, T>(&self, future: F) -> Result<T, ToolError>
    where
        F: Future<Output = Result<T, ToolError>>,
    {
        match time::timeout(self.duration, future).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                timeout: self.duration,
            }),
        }
    }
}
