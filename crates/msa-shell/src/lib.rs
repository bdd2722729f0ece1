//! Persistent Shell — runs shell commands as a sequence of independent
//! processes while presenting the illusion of one long-lived session: the
//! working directory and exported environment variables carry forward from
//! one `execute` call to the next.
//!
//! Each call spawns a fresh shell that (a) sources the caller's rc file and
//! a session-state script written by the previous call, (b) runs the user's
//! command, then (c) writes its exit code and `pwd` to sidecar files and
//! rewrites the session-state script itself with the post-command
//! environment. The parent reads the cwd sidecar and the rewritten
//! session-state script back to refresh its own in-memory view.
//!
//! On Unix the command runs inside a pseudo-terminal so interactive/ANSI
//! output behaves as it would in a real terminal; the trade-off is that a
//! pty merges stdout and stderr onto one stream, so [`PersistentShell`]
//! reports everything through `stdout` and leaves `stderr` empty. Platforms
//! without pty support, and the non-persistent [`OneShotShell`] fallback,
//! use plain pipes and keep the streams separate.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

mod sidecar;
#[cfg(unix)]
mod unix_pty;

pub use sidecar::quote_single;

/// Outcome of a single `execute` call.
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A shell session that carries `cwd` and exported env vars across calls.
pub struct PersistentShell {
    shell_bin: String,
    rc_file: Option<PathBuf>,
    cwd: PathBuf,
    env: HashMap<String, String>,
    state_script_path: PathBuf,
    cwd_sidecar_path: PathBuf,
    exit_sidecar_path: PathBuf,
}

impl PersistentShell {
    /// Starts a new session rooted at the current process's cwd and env.
    /// `shell_override` forces a specific shell binary instead of `$SHELL`.
    pub fn new(shell_override: Option<String>) -> anyhow::Result<Self> {
        let shell_bin = shell_override
            .or_else(|| env::var("SHELL").ok())
            .unwrap_or_else(|| "/bin/sh".to_string());
        let rc_file = default_rc_file(&shell_bin);
        let cwd = env::current_dir()?;
        let env_vars: HashMap<String, String> = env::vars().collect();

        let tag = format!(
            "{}_{}",
            std::process::id(),
            SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        let tmp = env::temp_dir();
        let state_script_path = tmp.join(format!("minishellagent_shell_state_{tag}.sh"));
        let cwd_sidecar_path = tmp.join(format!("minishellagent_shell_cwd_{tag}.txt"));
        let exit_sidecar_path = tmp.join(format!("minishellagent_exit_code_{tag}.txt"));

        Ok(Self {
            shell_bin,
            rc_file,
            cwd,
            env: env_vars,
            state_script_path,
            cwd_sidecar_path,
            exit_sidecar_path,
        })
    }

    pub fn cwd(&self) -> &std::path::Path {
        &self.cwd
    }

    pub fn env_snapshot(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Runs `command`, returning once it finishes or `timeout` elapses.
    /// `cwd`/`env` are only updated on a successful (non-timed-out) run.
    pub async fn execute(&mut self, command: &str, timeout: Duration) -> ExecResult {
        let wrapper = sidecar::build_wrapper_script(
            self.rc_file.as_deref(),
            &self.state_script_path,
            &self.cwd,
            command,
            &self.cwd_sidecar_path,
            &self.exit_sidecar_path,
        );

        let raw = run_wrapper(&self.shell_bin, &wrapper, timeout).await;

        if raw.timed_out {
            warn!(command, "persistent shell command timed out");
            self.cleanup_sidecars();
            return ExecResult {
                success: false,
                stdout: raw.stdout,
                stderr: "Timeout".to_string(),
                timed_out: true,
            };
        }

        let exit_code = sidecar::read_exit_code(&self.exit_sidecar_path);
        if let Some(new_cwd) = sidecar::read_cwd(&self.cwd_sidecar_path) {
            self.cwd = new_cwd;
        }
        if let Some(new_env) = sidecar::read_env_from_state_script(&self.state_script_path) {
            self.env = new_env;
        }
        self.cleanup_sidecars();

        let success = exit_code.unwrap_or_else(|| if raw.success { 0 } else { 1 }) == 0;
        debug!(command, success, "persistent shell command finished");
        ExecResult {
            success,
            stdout: raw.stdout,
            stderr: raw.stderr,
            timed_out: false,
        }
    }

    fn cleanup_sidecars(&self) {
        let _ = std::fs::remove_file(&self.cwd_sidecar_path);
        let _ = std::fs::remove_file(&self.exit_sidecar_path);
    }

    /// Idempotent teardown: removes the session-state script. Safe to call
    /// more than once, and safe to skip (a dropped session just leaves a
    /// harmless stale file in the temp dir).
    pub fn close(&mut self) {
        let _ = std::fs::remove_file(&self.state_script_path);
    }
}

impl Drop for PersistentShell {
    fn drop(&mut self) {
        self.close();
    }
}

struct RawOutput {
    success: bool,
    stdout: String,
    stderr: String,
    timed_out: bool,
}

#[cfg(unix)]
async fn run_wrapper(shell_bin: &str, wrapper: &str, timeout: Duration) -> RawOutput {
    unix_pty::run(shell_bin, wrapper, timeout).await
}

#[cfg(not(unix))]
async fn run_wrapper(shell_bin: &str, wrapper: &str, timeout: Duration) -> RawOutput {
    let mut cmd = tokio::process::Command::new(shell_bin);
    cmd.arg("-c").arg(wrapper);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => RawOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            timed_out: false,
        },
        Ok(Err(err)) => RawOutput {
            success: false,
            stdout: String::new(),
            stderr: err.to_string(),
            timed_out: false,
        },
        Err(_) => RawOutput {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        },
    }
}

fn default_rc_file(shell_bin: &str) -> Option<PathBuf> {
    let home = env::var("HOME").ok()?;
    let name = PathBuf::from(shell_bin);
    let name = name.file_name()?.to_str()?;
    let rc = match name {
        "bash" => ".bashrc",
        "zsh" => ".zshrc",
        _ => return None,
    };
    let path = PathBuf::from(home).join(rc);
    path.exists().then_some(path)
}

/// Fallback, non-persistent execution: every call spawns a fresh shell with
/// no inherited state beyond an explicitly tracked `cwd`. Directory changes
/// are tracked by appending `&& pwd` and parsing the trailing line; no
/// pty is used, so stdout/stderr stay cleanly separated.
pub struct OneShotShell {
    cwd: PathBuf,
}

impl OneShotShell {
    pub fn new(cwd: PathBuf) -> Self {
        Self { cwd }
    }

    pub fn cwd(&self) -> &std::path::Path {
        &self.cwd
    }

    pub async fn execute(&mut self, command: &str, timeout: Duration) -> ExecResult {
        let wrapped = format!("{command}\n__msa_status=$?; pwd; exit \"$__msa_status\"");
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&wrapped)
            .current_dir(&self.cwd)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let stdout_raw = String::from_utf8_lossy(&output.stdout).to_string();
                let (stdout, trailing_pwd) = split_trailing_line(&stdout_raw);
                if output.status.success() {
                    if let Some(pwd) = trailing_pwd {
                        let candidate = PathBuf::from(pwd.trim());
                        if candidate.is_absolute() {
                            self.cwd = candidate;
                        }
                    }
                }
                ExecResult {
                    success: output.status.success(),
                    stdout,
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    timed_out: false,
                }
            }
            Ok(Err(err)) => ExecResult {
                success: false,
                stdout: String::new(),
                stderr: err.to_string(),
                timed_out: false,
            },
            Err(_) => ExecResult {
                success: false,
                stdout: String::new(),
                stderr: "Timeout".to_string(),
                timed_out: true,
            },
        }
    }
}

/// Splits off the final non-empty line (the appended `pwd` output) from the
/// rest of the command's captured stdout.
fn split_trailing_line(raw: &str) -> (String, Option<String>) {
    let trimmed = raw.trim_end_matches('\n');
    match trimmed.rfind('\n') {
        Some(idx) => (
            trimmed[..idx].to_string(),
            Some(trimmed[idx + 1..].to_string()),
        ),
        None => {
            if trimmed.is_empty() {
                (String::new(), None)
            } else {
                (String::new(), Some(trimmed.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persistent_shell_tracks_cd_across_calls() {
        let mut shell = PersistentShell::new(Some("/bin/sh".to_string())).unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().to_path_buf();

        let result = shell
            .execute(&format!("cd {}", quote_single(&target.display().to_string())), Duration::from_secs(5))
            .await;
        assert!(result.success, "cd failed: {:?}", result);

        let result = shell.execute("pwd", Duration::from_secs(5)).await;
        assert!(result.success);
        assert_eq!(result.stdout.trim(), target.display().to_string());
    }

    #[tokio::test]
    async fn persistent_shell_tracks_exported_vars_across_calls() {
        let mut shell = PersistentShell::new(Some("/bin/sh".to_string())).unwrap();

        let result = shell
            .execute("export MSA_TEST_VAR=hello_world", Duration::from_secs(5))
            .await;
        assert!(result.success);

        let result = shell.execute("echo $MSA_TEST_VAR", Duration::from_secs(5)).await;
        assert!(result.success);
        assert!(result.stdout.trim().ends_with("hello_world"));
    }

    #[tokio::test]
    async fn persistent_shell_times_out_on_slow_command() {
        let mut shell = PersistentShell::new(Some("/bin/sh".to_string())).unwrap();
        let result = shell.execute("sleep 5", Duration::from_millis(200)).await;
        assert!(result.timed_out);
        assert!(!result.success);
    }

    #[tokio::test]
    async fn oneshot_shell_tracks_cd_via_appended_pwd() {
        let tmp = tempfile::tempdir().unwrap();
        let mut shell = OneShotShell::new(tmp.path().to_path_buf());
        let sub = tmp.path().join("child");
        std::fs::create_dir(&sub).unwrap();

        let result = shell
            .execute(&format!("cd {}", quote_single(&sub.display().to_string())), Duration::from_secs(5))
            .await;
        assert!(result.success);
        assert_eq!(shell.cwd(), sub);
    }

    #[tokio::test]
    async fn oneshot_shell_does_not_persist_exports() {
        let tmp = tempfile::tempdir().unwrap();
        let mut shell = OneShotShell::new(tmp.path().to_path_buf());
        let _ = shell
            .execute("export MSA_ONESHOT_VAR=nope", Duration::from_secs(5))
            .await;
        let result = shell.execute("echo $MSA_ONESHOT_VAR", Duration::from_secs(5)).await;
        assert!(result.success);
        assert!(result.stdout.trim().is_empty());
    }

    #[test]
    fn split_trailing_line_separates_output_from_pwd() {
        let (stdout, pwd) = split_trailing_line("hello\nworld\n/tmp/foo\n");
        assert_eq!(stdout, "hello\nworld");
        assert_eq!(pwd.as_deref(), Some("/tmp/foo"));
    }
}
