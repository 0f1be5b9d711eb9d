//! Local process framework.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::oneshot;

use crate::context::ExecutionContext;
use crate::error::{CoreError, CoreResult};
use crate::model::{ProcessPayload, Runnable};
use crate::registry::Framework;

use super::LOCAL;

/// Local framework configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Shell used to interpret the command line (default: "bash").
    #[serde(default = "default_shell")]
    pub shell: String,

    /// Lines of output kept for the completion report.
    #[serde(default = "default_tail_lines")]
    pub tail_lines: usize,
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_tail_lines() -> usize {
    20
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            tail_lines: default_tail_lines(),
        }
    }
}

/// `$0` of the shell script.
const SCRIPT_NAME: &str = "runhub";

/// Script handed to `shell -c`. Arguments travel as positional parameters
/// and are expanded quoted, so the shell never re-parses them.
fn script(payload: &ProcessPayload) -> String {
    if payload.args.is_empty() {
        payload.command.clone()
    } else {
        format!("{} \"$@\"", payload.command)
    }
}

fn forget(claimed: &Mutex<HashSet<String>>, run_id: &str) {
    match claimed.lock() {
        Ok(mut claimed) => claimed.remove(run_id),
        Err(poisoned) => poisoned.into_inner().remove(run_id),
    };
}

async fn read_tail<R: AsyncRead + Unpin>(stream: Option<R>, keep: usize) -> String {
    let mut lines = Vec::new();
    if let Some(stream) = stream {
        let mut reader = BufReader::new(stream).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if lines.len() == keep {
                lines.remove(0);
            }
            lines.push(line);
        }
    }
    lines.join("\n")
}

/// Runs process runnables as children of the dispatching node.
///
/// Each run id is spawned at most once while its process is alive. `stop`
/// kills the child; a killed child reports nothing.
pub struct LocalFramework {
    config: LocalConfig,
    claimed: Arc<Mutex<HashSet<String>>>,
    running: Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>,
}

impl LocalFramework {
    pub fn new(config: LocalConfig) -> Self {
        Self {
            config,
            claimed: Arc::new(Mutex::new(HashSet::new())),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn claim(&self, run_id: &str) -> bool {
        match self.claimed.lock() {
            Ok(mut claimed) => claimed.insert(run_id.to_string()),
            Err(poisoned) => poisoned.into_inner().insert(run_id.to_string()),
        }
    }

    fn release(&self, run_id: &str) {
        forget(&self.claimed, run_id);
    }

    /// Number of children still running.
    pub fn running(&self) -> usize {
        self.running.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Number of run ids currently claimed.
    pub fn tracked_runs(&self) -> usize {
        self.claimed.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for LocalFramework {
    fn default() -> Self {
        Self::new(LocalConfig::default())
    }
}

#[async_trait]
impl Framework for LocalFramework {
    fn name(&self) -> &'static str {
        LOCAL
    }

    async fn execute(&self, runnable: Runnable, ctx: ExecutionContext) -> CoreResult<()> {
        let payload = runnable.process().ok_or_else(|| {
            CoreError::Execution(format!("{} requires a process payload", LOCAL))
        })?;

        if !self.claim(&runnable.id) {
            tracing::debug!(run_id = %runnable.id, "Process already started, skipping");
            return Ok(());
        }

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(script(payload))
            .arg(SCRIPT_NAME)
            .args(&payload.args);
        if let Some(dir) = &payload.cwd {
            cmd.current_dir(dir);
        }
        cmd.envs(&payload.env);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.release(&runnable.id);
                return Err(CoreError::Execution(format!("Failed to spawn process: {}", e)));
            }
        };

        tracing::info!(
            run_id = %runnable.id,
            command = %payload.command,
            args = ?payload.args,
            pid = ?child.id(),
            "Process started"
        );

        let (kill_tx, kill_rx) = oneshot::channel();
        if let Ok(mut running) = self.running.lock() {
            running.insert(runnable.id.clone(), kill_tx);
        }

        let keep = self.config.tail_lines;
        let stdout = tokio::spawn(read_tail(child.stdout.take(), keep));
        let stderr = tokio::spawn(read_tail(child.stderr.take(), keep));
        let running = self.running.clone();
        let claimed = self.claimed.clone();

        tokio::spawn(async move {
            let outcome = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(run_id = %ctx.run_id, error = %e, "Failed to kill process");
                    }
                    None
                }
            };

            if let Ok(mut running) = running.lock() {
                running.remove(&ctx.run_id);
            }
            forget(&claimed, &ctx.run_id);

            let Some(status) = outcome else {
                tracing::info!(run_id = %ctx.run_id, "Process killed");
                return;
            };

            let stdout = stdout.await.unwrap_or_default();
            let stderr = stderr.await.unwrap_or_default();

            match status {
                Ok(status) if status.success() => {
                    let mut detail = Map::new();
                    detail.insert("exit_code".to_string(), Value::from(0));
                    detail.insert("stdout".to_string(), Value::String(stdout));
                    ctx.succeeded(detail).await;
                }
                Ok(status) => {
                    let code = status.code().unwrap_or(-1);
                    let message = if stderr.is_empty() {
                        format!("process exited with code {}", code)
                    } else {
                        format!("process exited with code {}: {}", code, stderr)
                    };
                    ctx.failed(message).await;
                }
                Err(e) => {
                    ctx.failed(format!("Failed to wait for process: {}", e)).await;
                }
            }
        });

        Ok(())
    }

    async fn stop(&self, run_id: &str) -> CoreResult<()> {
        self.release(run_id);
        let signal = self
            .running
            .lock()
            .ok()
            .and_then(|mut running| running.remove(run_id));

        match signal {
            Some(kill) => {
                // The monitor may have finished in between.
                let _ = kill.send(());
                Ok(())
            }
            None => {
                tracing::debug!(run_id = %run_id, "No running process to stop");
                Ok(())
            }
        }
    }
}
