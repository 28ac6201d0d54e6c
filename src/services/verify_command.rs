//! `verify_command` runner (spec §4.9.3): POSIX-shell-style, quoting-aware
//! tokenization of a task's optional `verify_command` string, an allowlist
//! check, and direct argv execution (never through a shell).

use thiserror::Error;
use tokio::process::Command;

use crate::adapters::verifier::tool_resolver::ToolResolver;

const ALLOWLIST: &[&str] = &["pytest", "python", "ruff", "mypy", "pip"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyCommandError {
    #[error("unterminated quote in verify_command")]
    UnterminatedQuote,
    #[error("empty verify_command")]
    Empty,
    #[error("command '{0}' is not in the allowlist {ALLOWLIST:?}")]
    NotAllowlisted(String),
}

/// Quoting-aware POSIX-shell-style tokenizer. Supports single and double
/// quotes and backslash escapes; does not support shell expansion,
/// pipelines, or redirection (none of which are valid here).
pub fn tokenize(command: &str) -> Result<Vec<String>, VerifyCommandError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' if !in_token => continue,
            ' ' | '\t' => {
                tokens.push(std::mem::take(&mut current));
                in_token = false;
            }
            '\'' => {
                in_token = true;
                for inner in chars.by_ref() {
                    if inner == '\'' {
                        break;
                    }
                    current.push(inner);
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') if matches!(chars.peek(), Some('"') | Some('\\')) => {
                            current.push(chars.next().unwrap());
                        }
                        Some(inner) => current.push(inner),
                        None => return Err(VerifyCommandError::UnterminatedQuote),
                    }
                }
            }
            '\\' if chars.peek().is_some() => {
                in_token = true;
                current.push(chars.next().unwrap());
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Strip conventional wrapper prefixes (`uv run`, `.venv/bin/`) so the
/// allowlist check and the executed argv agree on the underlying tool
/// name. Does not touch flags like `python -m <module>` — those are part
/// of the actual argv and must reach the process unmodified.
fn strip_wrapper_prefixes(mut tokens: Vec<String>) -> Vec<String> {
    if tokens.len() >= 2 && tokens[0] == "uv" && tokens[1] == "run" {
        tokens.drain(0..2);
    }
    if let Some(first) = tokens.first_mut() {
        if let Some(stripped) = first.strip_prefix(".venv/bin/") {
            *first = stripped.to_string();
        }
    }
    tokens
}

/// Result of a `verify_command` invocation.
#[derive(Debug, Clone, Default)]
pub struct VerifyCommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Parse and run a task's `verify_command` string. Log-only: callers never
/// block the pipeline on the result (spec §4.5 "post_verify_checks").
///
/// `resolver` resolves the tool to its configured venv path (spec §5 "Tool
/// path resolution"); the program is never looked up on `PATH`.
pub async fn run_verify_command(
    command: &str,
    cwd: &str,
    resolver: &ToolResolver,
) -> Result<VerifyCommandResult, VerifyCommandError> {
    let tokens = tokenize(command)?;
    if tokens.is_empty() {
        return Err(VerifyCommandError::Empty);
    }
    let tokens = strip_wrapper_prefixes(tokens);
    let program = tokens.first().cloned().ok_or(VerifyCommandError::Empty)?;
    if !ALLOWLIST.contains(&program.as_str()) {
        return Err(VerifyCommandError::NotAllowlisted(program));
    }
    let resolved = resolver.resolve(&program).ok_or_else(|| VerifyCommandError::NotAllowlisted(program.clone()))?;

    let output = Command::new(&resolved)
        .args(&tokens[1..])
        .current_dir(cwd)
        .output()
        .await
        .map_err(|_| VerifyCommandError::NotAllowlisted(program))?;

    Ok(VerifyCommandResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_simple_command() {
        assert_eq!(tokenize("pytest tests/test_foo.py -v").unwrap(), vec!["pytest", "tests/test_foo.py", "-v"]);
    }

    #[test]
    fn tokenizes_quoted_arguments_with_spaces() {
        let tokens = tokenize(r#"pytest -k "test with spaces""#).unwrap();
        assert_eq!(tokens, vec!["pytest", "-k", "test with spaces"]);
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        assert_eq!(tokenize("pytest \"unterminated"), Err(VerifyCommandError::UnterminatedQuote));
    }

    #[test]
    fn strips_uv_run_and_venv_prefixes_but_preserves_module_flag() {
        let tokens = strip_wrapper_prefixes(vec!["uv".into(), "run".into(), "pytest".into()]);
        assert_eq!(tokens, vec!["pytest"]);

        let tokens = strip_wrapper_prefixes(vec![".venv/bin/pytest".into()]);
        assert_eq!(tokens, vec!["pytest"]);

        let tokens = strip_wrapper_prefixes(vec!["python".into(), "-m".into(), "pytest".into(), "tests/".into()]);
        assert_eq!(tokens, vec!["python", "-m", "pytest", "tests/"]);
    }

    #[tokio::test]
    async fn rejects_non_allowlisted_command() {
        let resolver = ToolResolver::new("/nonexistent/venv");
        let err = run_verify_command("rm -rf /", "/tmp", &resolver).await.unwrap_err();
        assert_eq!(err, VerifyCommandError::NotAllowlisted("rm".to_string()));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let resolver = ToolResolver::new("/nonexistent/venv");
        let err = run_verify_command("   ", "/tmp", &resolver).await.unwrap_err();
        assert_eq!(err, VerifyCommandError::Empty);
    }

    #[tokio::test]
    async fn resolves_program_through_tool_resolver_not_path() {
        // An allowlisted program name that cannot resolve under a bogus
        // venv must fail as not-allowlisted rather than silently falling
        // back to a PATH lookup.
        let resolver = ToolResolver::new("/nonexistent/venv");
        let err = run_verify_command("pytest tests/", "/tmp", &resolver).await.unwrap_err();
        assert_eq!(err, VerifyCommandError::NotAllowlisted("pytest".to_string()));
    }

    #[tokio::test]
    async fn module_invocation_preserves_dash_m_flag_in_executed_argv() {
        let dir = tempfile::tempdir().unwrap();
        let bin_dir = dir.path().join("bin");
        tokio::fs::create_dir_all(&bin_dir).await.unwrap();
        let script = bin_dir.join("python");
        tokio::fs::write(&script, "#!/bin/sh\necho \"$@\"\n").await.unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = tokio::fs::metadata(&script).await.unwrap().permissions();
            perms.set_mode(0o755);
            tokio::fs::set_permissions(&script, perms).await.unwrap();
        }

        let resolver = ToolResolver::new(dir.path());
        let result = run_verify_command("python -m pytest tests/", "/tmp", &resolver).await.unwrap();
        assert_eq!(result.stdout.trim(), "-m pytest tests/");
    }
}
