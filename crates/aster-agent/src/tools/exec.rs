//! exec — owner-only shell execution behind the command safety gate.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use aster_core::types::AccessLevel;
use aster_guard::check_command_safety;

use super::{arg_i64, arg_str, arg_str_opt, ToolCtx, ToolEntry, ToolError, ToolHandler};

const DEFAULT_TIMEOUT_SECS: i64 = 30;
const DEFAULT_TIMEOUT_MAX_SECS: i64 = 300;
const DEFAULT_OUTPUT_MAX_CHARS: i64 = 10_000;

pub fn entry() -> ToolEntry {
    ToolEntry {
        name: "exec".to_string(),
        description: "Execute a shell command on the host. Returns stdout, stderr and \
                      the exit code. Commands run as the agent's process user."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command (bash)" },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 30, capped by exec.timeout_max)"
                },
                "workdir": { "type": "string", "description": "Working directory (optional)" }
            },
            "required": ["command"]
        }),
        required_access_level: AccessLevel::Owner,
        handler: Arc::new(Exec),
    }
}

struct Exec;

#[async_trait]
impl ToolHandler for Exec {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let command = arg_str(&args, "command")?;

        if let Err(reason) = check_command_safety(command) {
            warn!(command, reason, "exec blocked command");
            return Ok(format!("Error: command blocked: {reason}"));
        }

        let timeout_max = ctx
            .agent
            .store
            .get_config("exec.timeout_max", json!(DEFAULT_TIMEOUT_MAX_SECS))
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?
            .as_i64()
            .unwrap_or(DEFAULT_TIMEOUT_MAX_SECS);
        let timeout = arg_i64(&args, "timeout")
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(1, timeout_max.max(1)) as u64;

        let output_max = ctx
            .agent
            .store
            .get_config("exec.output_max_chars", json!(DEFAULT_OUTPUT_MAX_CHARS))
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?
            .as_i64()
            .unwrap_or(DEFAULT_OUTPUT_MAX_CHARS)
            .max(256) as usize;

        let mut cmd = tokio::process::Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(workdir) = arg_str_opt(&args, "workdir") {
            cmd.current_dir(workdir);
        } else {
            cmd.current_dir(&ctx.agent.workspace_dir);
        }

        info!(command, timeout, "exec running command");
        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::Failed(format!("spawn failed: {e}")))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        // Both pipes are drained concurrently so a full stderr buffer can't
        // stall a command that mostly writes stdout.
        let waited = tokio::time::timeout(Duration::from_secs(timeout), async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            let read_out = async {
                if let Some(pipe) = stdout_pipe.as_mut() {
                    let _ = pipe.read_to_string(&mut stdout).await;
                }
                stdout
            };
            let read_err = async {
                if let Some(pipe) = stderr_pipe.as_mut() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                stderr
            };
            let (stdout, stderr) = tokio::join!(read_out, read_err);
            let status = child.wait().await;
            (stdout, stderr, status)
        })
        .await;

        let (stdout, stderr, status) = match waited {
            Ok(done) => done,
            Err(_) => {
                return Ok(format!("Error: command timed out after {timeout}s"));
            }
        };

        let code = status
            .map(|s| s.code().unwrap_or(-1))
            .unwrap_or(-1);

        let mut out = format!("exit code: {code}\n");
        if !stdout.is_empty() {
            out.push_str("stdout:\n");
            out.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str("stderr:\n");
            out.push_str(&stderr);
        }
        if out.len() > output_max {
            let mut cut = output_max;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
            out.push_str("\n[... output truncated ...]");
        }
        Ok(out)
    }
}
