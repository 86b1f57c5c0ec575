//! Argument Escaping
//!
//! Renders raw arguments into tokens that the target shell re-parses into the
//! original string. One escaping rule cannot be safe for every interpreter, so
//! each [`ShellDialect`] has its own pure escaping function.
//!
//! Escaping is not idempotent: apply it exactly once per argument.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Characters cmd.exe treats specially outside of double quotes
const CMD_SPECIAL: &[char] = &['&', '<', '>', '|', '^', '"'];

/// Characters PowerShell treats specially in argument mode
const POWERSHELL_SPECIAL: &[char] = &[
    '&', '<', '>', '|', ';', '`', '$', '@', '"', '\'', '(', ')', '[', ']', '{', '}',
];

/// Boolean keywords recognised in structured search queries
const QUERY_KEYWORDS: &[&str] = &["AND", "OR", "NOT"];

/// Shell that re-parses the assembled command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellDialect {
    /// `sh -c`
    Posix,
    /// `cmd.exe /c`
    Cmd,
    /// `powershell.exe -Command`
    PowerShell,
}

impl ShellDialect {
    /// Dialect of the platform this process runs on
    pub fn detect() -> Self {
        if cfg!(windows) {
            ShellDialect::Cmd
        } else {
            ShellDialect::Posix
        }
    }

    /// Apply an override, honoured on Windows only
    ///
    /// Outside Windows the only interpreter is the POSIX shell, so any
    /// requested dialect other than the detected one is ignored.
    pub fn with_override(self, requested: Option<ShellDialect>) -> Self {
        match requested {
            Some(dialect) if cfg!(windows) && dialect != ShellDialect::Posix => dialect,
            Some(dialect) if dialect != self => {
                tracing::debug!(
                    requested = %dialect,
                    using = %self,
                    "Ignoring shell override on this platform"
                );
                self
            }
            _ => self,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ShellDialect::Posix => "posix",
            ShellDialect::Cmd => "cmd",
            ShellDialect::PowerShell => "powershell",
        }
    }
}

impl fmt::Display for ShellDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "posix" | "sh" => Ok(ShellDialect::Posix),
            "cmd" | "cmd.exe" => Ok(ShellDialect::Cmd),
            "powershell" | "pwsh" => Ok(ShellDialect::PowerShell),
            other => Err(format!(
                "Invalid shell dialect: {}. Must be one of: posix, cmd, powershell",
                other
            )),
        }
    }
}

/// A raw argument supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Argument {
    /// Ordinary argument
    Plain(String),
    /// Search query whose boolean keywords and quoted phrases must survive
    Query(String),
}

impl Argument {
    pub fn as_str(&self) -> &str {
        match self {
            Argument::Plain(s) | Argument::Query(s) => s,
        }
    }

    /// Escape for the given dialect
    pub fn escape(&self, dialect: ShellDialect) -> String {
        match self {
            Argument::Plain(s) => escape(s, dialect),
            Argument::Query(s) => escape_query(s, dialect),
        }
    }
}

impl From<&str> for Argument {
    fn from(s: &str) -> Self {
        Argument::Plain(s.to_string())
    }
}

impl From<String> for Argument {
    fn from(s: String) -> Self {
        Argument::Plain(s)
    }
}

/// Escape one argument for the given shell dialect
///
/// # Example
///
/// ```
/// use toolwarden::tools::{escape, ShellDialect};
///
/// assert_eq!(escape("left-pad", ShellDialect::Posix), "left-pad");
/// assert_eq!(escape("test; rm -rf /", ShellDialect::Posix), "'test; rm -rf /'");
/// ```
pub fn escape(arg: &str, dialect: ShellDialect) -> String {
    match dialect {
        ShellDialect::Posix => escape_posix(arg),
        ShellDialect::Cmd => escape_cmd(arg),
        ShellDialect::PowerShell => escape_powershell(arg),
    }
}

/// Escape a search query, keeping its keywords and quoted phrases intact
///
/// A structured query is always wrapped whole in the dialect's containing
/// quote so it reaches the tool as one token with its inner quotes literal.
/// Anything else is escaped like a plain argument.
pub fn escape_query(query: &str, dialect: ShellDialect) -> String {
    if !is_structured_query(query) {
        return escape(query, dialect);
    }
    match dialect {
        ShellDialect::Posix => single_quote_posix(query),
        ShellDialect::Cmd => double_quote_cmd(query),
        ShellDialect::PowerShell => single_quote_powershell(query),
    }
}

/// True when the query carries boolean keywords or a quoted phrase
pub fn is_structured_query(query: &str) -> bool {
    let has_keyword = query
        .split_whitespace()
        .any(|word| QUERY_KEYWORDS.contains(&word));
    let has_phrase = query.matches('"').count() >= 2;
    has_keyword || has_phrase
}

/// Join an escaped program, subcommand and arguments into one command line
///
/// PowerShell lines start with the call operator so a quoted program path is
/// invoked rather than evaluated as a string.
pub fn build_command_line(
    program: &str,
    subcommand: &str,
    args: &[Argument],
    dialect: ShellDialect,
) -> String {
    let mut tokens = Vec::with_capacity(args.len() + 3);
    if dialect == ShellDialect::PowerShell {
        tokens.push("&".to_string());
    }
    tokens.push(escape(program, dialect));
    tokens.push(escape(subcommand, dialect));
    tokens.extend(args.iter().map(|arg| arg.escape(dialect)));
    tokens.join(" ")
}

fn is_posix_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | ':' | '=' | '@' | '-')
}

fn escape_posix(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(is_posix_safe) {
        return arg.to_string();
    }
    single_quote_posix(arg)
}

/// `'...'` with each `'` rendered as close-quote, literal quote, reopen-quote
fn single_quote_posix(arg: &str) -> String {
    let mut escaped = String::with_capacity(arg.len() + 2);
    escaped.push('\'');
    for ch in arg.chars() {
        if ch == '\'' {
            escaped.push_str("'\"'\"'");
        } else {
            escaped.push(ch);
        }
    }
    escaped.push('\'');
    escaped
}

/// `%VAR%` is left alone: cmd.exe expands it even inside double quotes and
/// offers no escape for `%` on a `/c` command line.
fn escape_cmd(arg: &str) -> String {
    let needs_quoting =
        arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || CMD_SPECIAL.contains(&c));
    if !needs_quoting {
        return arg.to_string();
    }
    double_quote_cmd(arg)
}

fn double_quote_cmd(arg: &str) -> String {
    format!("\"{}\"", arg.replace('"', "\"\""))
}

fn escape_powershell(arg: &str) -> String {
    let needs_quoting = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || POWERSHELL_SPECIAL.contains(&c));
    if !needs_quoting {
        return arg.to_string();
    }
    single_quote_powershell(arg)
}

fn single_quote_powershell(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_posix_safe_strings_untouched() {
        let safe = vec![
            "left-pad",
            "@types/node",
            "react@18.2.0",
            "repos/cli/cli/pulls",
            "--json=name",
            "key=value",
            "https://registry.npmjs.org/",
        ];
        for arg in safe {
            assert_eq!(escape(arg, ShellDialect::Posix), arg);
        }
    }

    #[test]
    fn test_posix_injection_scenario() {
        assert_eq!(
            escape("test; rm -rf /", ShellDialect::Posix),
            "'test; rm -rf /'"
        );
        let words = shlex::split(&escape("test; rm -rf /", ShellDialect::Posix)).unwrap();
        assert_eq!(words, vec!["test; rm -rf /".to_string()]);
    }

    #[test]
    fn test_posix_embedded_single_quote() {
        assert_eq!(escape("it's", ShellDialect::Posix), "'it'\"'\"'s'");
        let words = shlex::split(&escape("it's", ShellDialect::Posix)).unwrap();
        assert_eq!(words, vec!["it's".to_string()]);
    }

    #[test]
    fn test_posix_substitution_is_quoted() {
        for arg in ["$(id)", "`id`", "$HOME", "a|b", "a&&b", "a>b", "a<b", "(a)"] {
            let escaped = escape(arg, ShellDialect::Posix);
            assert!(escaped.starts_with('\'') && escaped.ends_with('\''));
        }
    }

    #[test]
    fn test_empty_argument_survives() {
        assert_eq!(escape("", ShellDialect::Posix), "''");
        assert_eq!(escape("", ShellDialect::Cmd), "\"\"");
        assert_eq!(escape("", ShellDialect::PowerShell), "''");
    }

    #[test]
    fn test_cmd_escaping() {
        assert_eq!(escape("left-pad", ShellDialect::Cmd), "left-pad");
        assert_eq!(escape("hello world", ShellDialect::Cmd), "\"hello world\"");
        assert_eq!(escape("a&calc", ShellDialect::Cmd), "\"a&calc\"");
        assert_eq!(escape("a|b", ShellDialect::Cmd), "\"a|b\"");
        assert_eq!(escape("a^b", ShellDialect::Cmd), "\"a^b\"");
        assert_eq!(escape("say \"hi\"", ShellDialect::Cmd), "\"say \"\"hi\"\"\"");
        // Single quotes and semicolons are not special to cmd
        assert_eq!(escape("it's;ok", ShellDialect::Cmd), "it's;ok");
    }

    #[test]
    fn test_cmd_percent_passes_through() {
        // cmd.exe still expands these; the line carries them verbatim
        assert_eq!(escape("%PATH%", ShellDialect::Cmd), "%PATH%");
        assert_eq!(escape("50% off", ShellDialect::Cmd), "\"50% off\"");
        assert_eq!(
            escape_query("\"%USERNAME%\" OR x", ShellDialect::Cmd),
            "\"\"\"%USERNAME%\"\" OR x\""
        );
    }

    #[test]
    fn test_powershell_escaping() {
        assert_eq!(escape("left-pad", ShellDialect::PowerShell), "left-pad");
        assert_eq!(escape("a;b", ShellDialect::PowerShell), "'a;b'");
        assert_eq!(escape("$env:PATH", ShellDialect::PowerShell), "'$env:PATH'");
        assert_eq!(escape("@types/node", ShellDialect::PowerShell), "'@types/node'");
        assert_eq!(escape("it's", ShellDialect::PowerShell), "'it''s'");
        assert_eq!(escape("$(calc)", ShellDialect::PowerShell), "'$(calc)'");
        assert_eq!(escape("{x}", ShellDialect::PowerShell), "'{x}'");
    }

    #[test]
    fn test_structured_query_detection() {
        assert!(is_structured_query("react AND hooks"));
        assert!(is_structured_query("cli NOT archived"));
        assert!(is_structured_query("\"exact phrase\" language:rust"));
        assert!(!is_structured_query("react hooks"));
        assert!(!is_structured_query("ANDROID"));
        assert!(!is_structured_query("a \"dangling"));
    }

    #[test]
    fn test_query_keeps_phrases_literal() {
        let query = "\"state machine\" OR fsm language:rust";

        let posix = escape_query(query, ShellDialect::Posix);
        assert_eq!(posix, "'\"state machine\" OR fsm language:rust'");
        assert_eq!(shlex::split(&posix).unwrap(), vec![query.to_string()]);

        let cmd = escape_query(query, ShellDialect::Cmd);
        assert_eq!(cmd, "\"\"\"state machine\"\" OR fsm language:rust\"");

        let ps = escape_query(query, ShellDialect::PowerShell);
        assert_eq!(ps, "'\"state machine\" OR fsm language:rust'");
    }

    #[test]
    fn test_query_with_metacharacters_still_contained() {
        let query = "foo OR bar; rm -rf /";
        let posix = escape_query(query, ShellDialect::Posix);
        assert_eq!(shlex::split(&posix).unwrap(), vec![query.to_string()]);
        let ps = escape_query("x OR 'y'", ShellDialect::PowerShell);
        assert_eq!(ps, "'x OR ''y'''");
    }

    #[test]
    fn test_unstructured_query_falls_back() {
        assert_eq!(escape_query("left-pad", ShellDialect::Posix), "left-pad");
        assert_eq!(escape_query("a b", ShellDialect::Cmd), "\"a b\"");
    }

    #[test]
    fn test_build_command_line() {
        let args = vec![
            Argument::from("left-pad"),
            Argument::from("--json"),
            Argument::Query("a OR b".to_string()),
        ];
        assert_eq!(
            build_command_line("npm", "view", &args, ShellDialect::Posix),
            "npm view left-pad --json 'a OR b'"
        );
        assert_eq!(
            build_command_line(
                "C:\\Program Files\\nodejs\\npm.cmd",
                "view",
                &args[..1],
                ShellDialect::Cmd
            ),
            "\"C:\\Program Files\\nodejs\\npm.cmd\" view left-pad"
        );
        assert_eq!(
            build_command_line(
                "C:\\Program Files\\GitHub CLI\\gh.exe",
                "pr",
                &[Argument::from("list")],
                ShellDialect::PowerShell
            ),
            "& 'C:\\Program Files\\GitHub CLI\\gh.exe' pr list"
        );
    }

    #[test]
    fn test_dialect_parsing() {
        assert_eq!("posix".parse::<ShellDialect>(), Ok(ShellDialect::Posix));
        assert_eq!("PowerShell".parse::<ShellDialect>(), Ok(ShellDialect::PowerShell));
        assert_eq!("cmd.exe".parse::<ShellDialect>(), Ok(ShellDialect::Cmd));
        assert!("zsh".parse::<ShellDialect>().is_err());
    }

    #[cfg(not(windows))]
    #[test]
    fn test_override_ignored_off_windows() {
        let dialect = ShellDialect::detect();
        assert_eq!(dialect, ShellDialect::Posix);
        assert_eq!(
            dialect.with_override(Some(ShellDialect::PowerShell)),
            ShellDialect::Posix
        );
        assert_eq!(dialect.with_override(None), ShellDialect::Posix);
    }

    proptest! {
        #[test]
        fn prop_posix_round_trip(arg in "[ -~]{0,40}") {
            let escaped = escape(&arg, ShellDialect::Posix);
            let words = shlex::split(&escaped).unwrap();
            prop_assert_eq!(words, vec![arg]);
        }

        #[test]
        fn prop_posix_metacharacters_single_token(
            prefix in "[a-z ]{0,8}",
            meta in prop::sample::select(vec![";", "&", "|", "`", "$", "(", ")", "<", ">"]),
            suffix in "[a-z /-]{0,8}"
        ) {
            let arg = format!("{}{}{}", prefix, meta, suffix);
            let escaped = escape(&arg, ShellDialect::Posix);
            prop_assert!(escaped.starts_with('\''));
            let words = shlex::split(&escaped).unwrap();
            prop_assert_eq!(words, vec![arg]);
        }

        #[test]
        fn prop_cmd_quotes_are_balanced(arg in "[ -~]{0,40}") {
            let escaped = escape(&arg, ShellDialect::Cmd);
            prop_assert_eq!(escaped.matches('"').count() % 2, 0);
        }

        #[test]
        fn prop_powershell_quotes_are_balanced(arg in "[ -~]{0,40}") {
            let escaped = escape(&arg, ShellDialect::PowerShell);
            prop_assert_eq!(escaped.matches('\'').count() % 2, 0);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_posix_shell_reparses_single_token() {
        let nasty = "test; rm -rf / && echo $(whoami) `id` | cat > /tmp/x 'q'";
        let line = format!(
            "set -- {}; printf '%s' \"$#:$1\"",
            escape(nasty, ShellDialect::Posix)
        );
        let output = std::process::Command::new("sh")
            .arg("-c")
            .arg(&line)
            .output()
            .unwrap();
        let stdout = String::from_utf8_lossy(&output.stdout);
        assert_eq!(stdout, format!("1:{}", nasty));
    }
}
