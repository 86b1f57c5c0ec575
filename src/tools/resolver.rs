//! Executable Resolution
//!
//! Determines which binary a tool name refers to, failing closed:
//!
//! 1. explicit override (absolute, no shell metacharacters, existing file)
//! 2. known per-platform install locations
//! 3. Windows only: PATH walk that skips the current directory and relative entries
//! 4. elsewhere: the bare name, looked up by the shell itself

use serde::Serialize;
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use super::error::ToolError;
use super::validator::Tool;

/// Characters never allowed in an override path
const PATH_METACHARACTERS: &[char] = &[
    ';', '|', '&', '$', '`', '\n', '\r', '(', ')', '<', '>', '"', '\'', '%', '!', '*', '?',
];

/// Extensions tried when PATHEXT is unset or unusable
const DEFAULT_PATH_EXTENSIONS: &[&str] = &[".exe", ".cmd", ".bat", ".com"];

/// Where a resolved executable came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Configured override path
    Override,
    /// Well-known install location
    KnownLocation,
    /// Safe PATH walk
    PathSearch,
    /// Bare name for the shell to look up
    ShellLookup,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provenance::Override => "override",
            Provenance::KnownLocation => "known-location",
            Provenance::PathSearch => "path-search",
            Provenance::ShellLookup => "shell-lookup",
        };
        f.write_str(s)
    }
}

/// A resolved executable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedExecutable {
    /// Absolute path, or the bare binary name for shell lookup
    pub path: PathBuf,

    /// How the path was found
    pub provenance: Provenance,
}

impl ResolvedExecutable {
    /// Program string for command-line assembly
    pub fn program(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Built-in install locations for the current platform
pub fn default_known_locations(tool: Tool) -> Vec<PathBuf> {
    let paths: &[&str] = if cfg!(windows) {
        match tool {
            Tool::Npm => &[
                r"C:\Program Files\nodejs\npm.cmd",
                r"C:\Program Files (x86)\nodejs\npm.cmd",
            ],
            Tool::Gh => &[
                r"C:\Program Files\GitHub CLI\gh.exe",
                r"C:\Program Files (x86)\GitHub CLI\gh.exe",
            ],
        }
    } else if cfg!(target_os = "macos") {
        match tool {
            Tool::Npm => &["/opt/homebrew/bin/npm", "/usr/local/bin/npm"],
            Tool::Gh => &["/opt/homebrew/bin/gh", "/usr/local/bin/gh"],
        }
    } else {
        match tool {
            Tool::Npm => &["/usr/local/bin/npm", "/usr/bin/npm"],
            Tool::Gh => &["/usr/local/bin/gh", "/usr/bin/gh"],
        }
    };
    paths.iter().map(PathBuf::from).collect()
}

/// Executable resolver
#[derive(Debug, Clone)]
pub struct ExecutableResolver {
    /// Explicit per-tool overrides
    overrides: HashMap<Tool, PathBuf>,

    /// Per-tool install locations, checked in order
    known_locations: HashMap<Tool, Vec<PathBuf>>,
}

impl Default for ExecutableResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutableResolver {
    /// Resolver with the platform's built-in install locations
    pub fn new() -> Self {
        let known_locations = Tool::ALL
            .iter()
            .map(|tool| (*tool, default_known_locations(*tool)))
            .collect();
        Self {
            overrides: HashMap::new(),
            known_locations,
        }
    }

    /// Set an explicit executable for a tool
    pub fn with_override(mut self, tool: Tool, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(tool, path.into());
        self
    }

    /// Replace the install locations checked for a tool
    pub fn with_known_locations(mut self, tool: Tool, locations: Vec<PathBuf>) -> Self {
        self.known_locations.insert(tool, locations);
        self
    }

    /// Resolve the executable for a tool
    ///
    /// # Errors
    ///
    /// - [`ToolError::InvalidExecutablePath`] if an override is configured and
    ///   fails validation. Later stages are never consulted in that case.
    /// - [`ToolError::ExecutableNotFound`] on Windows when no safe PATH entry
    ///   contains the binary.
    pub fn resolve(&self, tool: Tool) -> Result<ResolvedExecutable, ToolError> {
        if let Some(path) = self.overrides.get(&tool) {
            validate_override(path)?;
            tracing::debug!(tool = %tool, path = %path.display(), "Using executable override");
            return Ok(ResolvedExecutable {
                path: path.clone(),
                provenance: Provenance::Override,
            });
        }

        if let Some(found) = self
            .known_locations
            .get(&tool)
            .and_then(|locations| locations.iter().find(|p| p.is_file()))
        {
            tracing::debug!(
                tool = %tool,
                path = %found.display(),
                "Found executable at known location"
            );
            return Ok(ResolvedExecutable {
                path: found.clone(),
                provenance: Provenance::KnownLocation,
            });
        }

        if cfg!(windows) {
            let path_var = std::env::var_os("PATH").unwrap_or_default();
            let extensions = path_extensions(std::env::var_os("PATHEXT"));
            let cwd = std::env::current_dir().ok();
            return search_path(tool.binary_name(), &path_var, &extensions, cwd.as_deref())
                .map(|path| {
                    tracing::debug!(
                        tool = %tool,
                        path = %path.display(),
                        "Found executable on PATH"
                    );
                    ResolvedExecutable {
                        path,
                        provenance: Provenance::PathSearch,
                    }
                })
                .ok_or_else(|| ToolError::ExecutableNotFound {
                    tool: tool.to_string(),
                });
        }

        tracing::debug!(tool = %tool, "Deferring executable lookup to the shell");
        Ok(ResolvedExecutable {
            path: PathBuf::from(tool.binary_name()),
            provenance: Provenance::ShellLookup,
        })
    }
}

/// Check an override path
///
/// Prevents relative paths (resolved against an attacker-influenced working
/// directory), shell metacharacters, and anything that is not a regular file.
pub fn validate_override(path: &Path) -> Result<(), ToolError> {
    let display = path.to_string_lossy();

    if !path.is_absolute() {
        return Err(ToolError::invalid_path(&display, "path must be absolute"));
    }

    if let Some(c) = display.chars().find(|c| PATH_METACHARACTERS.contains(c)) {
        return Err(ToolError::invalid_path(
            &display,
            &format!("path contains shell metacharacter {:?}", c),
        ));
    }

    if !path.is_file() {
        return Err(ToolError::invalid_path(
            &display,
            "path does not exist or is not a regular file",
        ));
    }

    Ok(())
}

/// Walk a PATH value for `name`, trying each extension
///
/// Empty entries, relative entries, and the current directory are skipped so
/// a binary planted in the working directory can never shadow the real one.
pub fn search_path(
    name: &str,
    path_var: &std::ffi::OsStr,
    extensions: &[String],
    current_dir: Option<&Path>,
) -> Option<PathBuf> {
    let name_lower = name.to_ascii_lowercase();

    for directory in std::env::split_paths(path_var) {
        if directory.as_os_str().is_empty() || !directory.is_absolute() {
            continue;
        }
        if current_dir.is_some_and(|cwd| same_directory(&directory, cwd)) {
            continue;
        }

        let mut candidates = vec![name.to_string()];
        candidates.extend(
            extensions
                .iter()
                .filter(|ext| !name_lower.ends_with(ext.as_str()))
                .map(|ext| format!("{}{}", name, ext)),
        );

        for file_name in candidates {
            let candidate = directory.join(file_name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}

/// Parse PATHEXT into lowercase extensions, falling back to the defaults
pub fn path_extensions(raw: Option<OsString>) -> Vec<String> {
    let defaults = || -> Vec<String> {
        DEFAULT_PATH_EXTENSIONS
            .iter()
            .map(|s| s.to_string())
            .collect()
    };

    let Some(text) = raw.as_ref().and_then(|r| r.to_str()) else {
        return defaults();
    };

    let mut out: Vec<String> = Vec::new();
    for value in text.split(';') {
        let normalized = value.trim().to_ascii_lowercase();
        if normalized.is_empty() || !normalized.starts_with('.') {
            continue;
        }
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }

    if out.is_empty() {
        defaults()
    } else {
        out
    }
}

fn same_directory(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
