use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use hopper_core::error::{HopperError, Result};
use hopper_core::tool::{
    string_arg, ArgType, Tool, ToolArguments, ToolContext, ToolParam, ToolSchema,
};

const MAX_OUTPUT_CHARS: usize = 4000;
const FORBIDDEN: &[char] = &[';', '|', '&', '>', '<', '`', '$', '(', ')', '\n', '\r'];

/// Runs one whitelisted program directly, never through a shell.
pub struct RunCommandTool {
    allowed: Vec<String>,
    workdir: PathBuf,
    timeout: Duration,
    schema: ToolSchema,
}

impl RunCommandTool {
    pub const NAME: &'static str = "run_command";

    pub fn new(allowed: Vec<String>, workdir: impl Into<PathBuf>, timeout: Duration) -> Self {
        let description = format!(
            "Run a read-only command in the workspace. Allowed programs: {}",
            allowed.join(", ")
        );
        Self {
            allowed,
            workdir: workdir.into(),
            timeout,
            schema: ToolSchema::new(
                Self::NAME,
                &description,
                vec![ToolParam::required("command", ArgType::String, "program and arguments, e.g. 'ls -la'")],
            ),
        }
    }

    /// Splits a command line into program and arguments after refusing shell
    /// syntax and programs outside the whitelist.
    pub fn check(&self, command_line: &str) -> Result<(String, Vec<String>)> {
        if let Some(c) = command_line.chars().find(|c| FORBIDDEN.contains(c)) {
            return Err(HopperError::tool(
                Self::NAME,
                format!("character '{}' is not allowed", c.escape_default()),
            ));
        }
        let mut parts = command_line.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| HopperError::tool(Self::NAME, "command is empty"))?;
        if program.contains('/') || !self.allowed.iter().any(|a| a == &program) {
            return Err(HopperError::tool(
                Self::NAME,
                format!("'{program}' is not an allowed program"),
            ));
        }
        Ok((program, parts.collect()))
    }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_OUTPUT_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_OUTPUT_CHARS).collect();
    out.push_str("\n[output truncated]");
    out
}

#[async_trait]
impl Tool for RunCommandTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn invoke(&self, args: &ToolArguments, _ctx: &ToolContext) -> Result<String> {
        let command_line = string_arg(Self::NAME, args, "command")?;
        let (program, arguments) = self.check(command_line)?;

        let start = Instant::now();
        let child = Command::new(&program)
            .args(&arguments)
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(HopperError::tool(Self::NAME, format!("failed to start '{program}': {e}")))
            }
            Err(_) => {
                warn!(program = %program, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(HopperError::tool(
                    Self::NAME,
                    format!("'{program}' did not finish within {}s", self.timeout.as_secs()),
                ));
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        debug!(
            program = %program,
            exit_code,
            duration_ms = start.elapsed().as_millis() as u64,
            "Command finished"
        );

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut report = format!("exit code {exit_code}\n{}", stdout.trim_end());
        if !stderr.trim().is_empty() {
            report.push_str("\nstderr:\n");
            report.push_str(stderr.trim_end());
        }
        Ok(truncate(&report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> ToolContext {
        ToolContext::for_user("alice")
    }

    fn tool(dir: &std::path::Path) -> RunCommandTool {
        RunCommandTool::new(
            vec!["echo".into(), "ls".into(), "sleep".into()],
            dir,
            Duration::from_millis(300),
        )
    }

    fn args(command: &str) -> ToolArguments {
        json!({ "command": command }).as_object().cloned().unwrap()
    }

    #[test]
    fn rejects_shell_syntax_and_unlisted_programs() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool(dir.path());
        for bad in ["echo hi; rm -rf /", "ls | wc", "echo $HOME", "rm file", "/bin/echo hi", "   "] {
            assert!(tool.check(bad).is_err(), "{bad}");
        }
        let (program, args) = tool.check("ls -la notes").unwrap();
        assert_eq!(program, "ls");
        assert_eq!(args, vec!["-la", "notes"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_without_a_shell() {
        let dir = tempfile::tempdir().unwrap();
        let out = tool(dir.path()).invoke(&args("echo bonjour *"), &ctx()).await.unwrap();
        assert_eq!(out, "exit code 0\nbonjour *");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_commands_time_out() {
        let dir = tempfile::tempdir().unwrap();
        let err = tool(dir.path()).invoke(&args("sleep 5"), &ctx()).await.unwrap_err();
        assert!(err.to_string().contains("did not finish"));
    }

    #[test]
    fn long_output_is_truncated() {
        let out = truncate(&"x".repeat(MAX_OUTPUT_CHARS + 50));
        assert!(out.ends_with("[output truncated]"));
    }
}
