//! Outcome Classification
//!
//! Turns a finished process into an [`ExecutionResult`]. Non-zero exit always
//! fails. With a zero exit, stderr is either benign noise (kept as a warning)
//! or a hard error. stdout is parsed as JSON when possible and carried as text
//! otherwise.

use serde::Serialize;

use super::error::ToolError;
use super::validator::Tool;

/// Noise printed by login shells and terminals, independent of the tool
const SHELL_STARTUP_NOISE: &[&str] = &[
    "setlocale",
    "no job control in this shell",
    "inappropriate ioctl for device",
    "stty:",
    "warning: could not set locale",
];

const NPM_BENIGN: &[&str] = &[
    "npm warn",
    "npm notice",
    "deprecated",
    "experimentalwarning",
    "(node:",
    "(use `node --trace-warnings",
];

const GH_BENIGN: &[&str] = &[
    "deprecated",
    "a new release of gh is available",
    "https://github.com/cli/cli/releases",
    "to upgrade, run:",
];

/// Built-in benign stderr patterns for a tool, lowercase
pub fn default_benign_patterns(tool: Tool) -> Vec<String> {
    let tool_patterns = match tool {
        Tool::Npm => NPM_BENIGN,
        Tool::Gh => GH_BENIGN,
    };
    tool_patterns
        .iter()
        .chain(SHELL_STARTUP_NOISE)
        .map(|p| p.to_string())
        .collect()
}

/// Raw output of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    /// Exit code (None if terminated by a signal)
    pub exit_code: Option<i32>,

    /// Captured stdout
    pub stdout: String,

    /// Captured stderr
    pub stderr: String,
}

impl RawOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }
}

/// Successful payload
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    /// stdout parsed as JSON
    Json(serde_json::Value),
    /// stdout that was not JSON
    Text(String),
}

impl Payload {
    /// Parse stdout, falling back to trimmed text
    pub fn parse(stdout: &str) -> Self {
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Payload::Text(String::new());
        }
        match serde_json::from_str(trimmed) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(trimmed.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Text(_) => None,
        }
    }
}

/// A successful tool call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolOutput {
    pub payload: Payload,

    /// Benign stderr, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Result of a gateway call
pub type ExecutionResult = Result<ToolOutput, ToolError>;

/// Classify a finished process
pub fn classify(raw: RawOutput, benign_patterns: &[String]) -> ExecutionResult {
    if raw.exit_code != Some(0) {
        let diagnostic = if raw.stderr.trim().is_empty() {
            raw.stdout.trim().to_string()
        } else {
            raw.stderr.trim().to_string()
        };
        return Err(ToolError::ProcessError {
            exit_code: raw.exit_code,
            diagnostic,
        });
    }

    let stderr_lines: Vec<&str> = raw
        .stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if let Some(line) = stderr_lines
        .iter()
        .find(|line| !is_benign(line, benign_patterns))
    {
        tracing::debug!(line = %line, "Disqualifying stderr line");
        return Err(ToolError::ProcessError {
            exit_code: raw.exit_code,
            diagnostic: raw.stderr.trim().to_string(),
        });
    }

    let warning = if stderr_lines.is_empty() {
        None
    } else {
        Some(stderr_lines.join("\n"))
    };

    Ok(ToolOutput {
        payload: Payload::parse(&raw.stdout),
        warning,
    })
}

fn is_benign(line: &str, patterns: &[String]) -> bool {
    let lower = line.to_lowercase();
    patterns.iter().any(|p| lower.contains(&p.to_lowercase()))
}

/// Tagged-union view of an [`ExecutionResult`] for callers
///
/// Serializes as `{"isError": false, "payload": ..., "warning"?: ...}` or
/// `{"isError": true, "kind": ..., "message": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExecutionEnvelope {
    #[serde(rename_all = "camelCase")]
    Success {
        is_error: bool,
        payload: Payload,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        is_error: bool,
        kind: String,
        message: String,
    },
}

impl ExecutionEnvelope {
    pub fn is_error(&self) -> bool {
        matches!(self, ExecutionEnvelope::Failure { .. })
    }
}

impl From<&ExecutionResult> for ExecutionEnvelope {
    fn from(result: &ExecutionResult) -> Self {
        match result {
            Ok(output) => ExecutionEnvelope::Success {
                is_error: false,
                payload: output.payload.clone(),
                warning: output.warning.clone(),
            },
            Err(err) => ExecutionEnvelope::Failure {
                is_error: true,
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_stdout_parsed() {
        let raw = RawOutput::success(r#"{"name":"left-pad","version":"1.3.0"}"#);
        let output = classify(raw, &default_benign_patterns(Tool::Npm)).unwrap();
        assert_eq!(
            output.payload,
            Payload::Json(json!({"name": "left-pad", "version": "1.3.0"}))
        );
        assert_eq!(output.warning, None);
    }

    #[test]
    fn test_text_stdout_falls_back() {
        let raw = RawOutput::success("Ping success: {\n");
        let output = classify(raw, &[]).unwrap();
        assert_eq!(output.payload, Payload::Text("Ping success: {".to_string()));
    }

    #[test]
    fn test_nonzero_exit_is_error() {
        let raw = RawOutput::success("{}").with_exit_code(1);
        let err = classify(raw, &default_benign_patterns(Tool::Npm)).unwrap_err();
        assert!(matches!(
            err,
            ToolError::ProcessError {
                exit_code: Some(1),
                ..
            }
        ));
    }

    #[test]
    fn test_nonzero_exit_even_with_benign_stderr() {
        let raw = RawOutput::success("")
            .with_stderr("npm warn config something")
            .with_exit_code(2);
        let err = classify(raw, &default_benign_patterns(Tool::Npm)).unwrap_err();
        assert!(err.to_string().contains("npm warn"));
    }

    #[test]
    fn test_signal_termination_is_error() {
        let raw = RawOutput {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(classify(raw, &[]).is_err());
    }

    #[test]
    fn test_benign_stderr_becomes_warning() {
        let raw = RawOutput::success(r#"{"ok":true}"#).with_stderr(concat!(
            "npm WARN deprecated request@2.88.2: request has been deprecated\n",
            "\n",
            "npm notice New minor version\n",
        ));
        let output = classify(raw, &default_benign_patterns(Tool::Npm)).unwrap();
        let warning = output.warning.unwrap();
        assert!(warning.contains("request has been deprecated"));
        assert!(warning.contains("New minor version"));
    }

    #[test]
    fn test_shell_noise_is_benign_for_every_tool() {
        for tool in Tool::ALL {
            let raw = RawOutput::success("ok")
                .with_stderr("bash: warning: setlocale: LC_ALL: cannot change locale");
            assert!(classify(raw, &default_benign_patterns(tool)).is_ok());
        }
    }

    #[test]
    fn test_unknown_stderr_is_error() {
        let raw = RawOutput::success("partial")
            .with_stderr("npm notice hi\nHTTP 403: API rate limit exceeded");
        let err = classify(raw, &default_benign_patterns(Tool::Gh)).unwrap_err();
        match err {
            ToolError::ProcessError { diagnostic, .. } => {
                assert!(diagnostic.contains("rate limit"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_blank_stderr_ignored() {
        let raw = RawOutput::success("[]").with_stderr("  \n\n");
        let output = classify(raw, &[]).unwrap();
        assert_eq!(output.payload, Payload::Json(json!([])));
        assert!(output.warning.is_none());
    }

    #[test]
    fn test_envelope_shapes() {
        let ok: ExecutionResult = Ok(ToolOutput {
            payload: Payload::Json(json!({"name": "left-pad"})),
            warning: None,
        });
        let value = serde_json::to_value(ExecutionEnvelope::from(&ok)).unwrap();
        assert_eq!(
            value,
            json!({"isError": false, "payload": {"name": "left-pad"}})
        );

        let err: ExecutionResult = Err(ToolError::rejected("npm", "install"));
        let envelope = ExecutionEnvelope::from(&err);
        assert!(envelope.is_error());
        let value = serde_json::to_value(envelope).unwrap();
        assert_eq!(value["isError"], json!(true));
        assert_eq!(value["kind"], json!("rejected_command"));
        assert!(value["message"].as_str().unwrap().contains("not registered"));
    }
}
