//! External stage processes: bounded waits, log capture and cancellation.

use super::error::StageError;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Lines of a stage log kept in failure details.
pub const LOG_TAIL_LINES: usize = 20;

/// Shared cancellation signal for one pipeline run.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Cancelled,
}

/// Run one stage command to completion.
///
/// stdout and stderr go to `log_path`. A non-zero exit, a timeout and a
/// cancellation all fail the stage. On unix the command leads its own process
/// group, and the whole group, forked descendants included, is killed on
/// timeout or cancellation.
pub async fn run_stage(
    mut command: Command,
    log_path: &Path,
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<(), StageError> {
    if cancel.is_cancelled() {
        return Err(StageError::Cancelled);
    }
    let program = command
        .as_std()
        .get_program()
        .to_string_lossy()
        .into_owned();

    let log = std::fs::File::create(log_path).map_err(|e| StageError::io(log_path, e))?;
    let log_err = log.try_clone().map_err(|e| StageError::io(log_path, e))?;
    command
        .stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err))
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    debug!(%program, log = %log_path.display(), "spawning stage process");
    let mut child = command.spawn().map_err(|source| StageError::Spawn {
        program: program.clone(),
        source,
    })?;

    let outcome = tokio::select! {
        status = child.wait() => Outcome::Exited(status),
        () = tokio::time::sleep(timeout) => Outcome::TimedOut,
        () = cancel.cancelled() => Outcome::Cancelled,
    };

    match outcome {
        Outcome::Exited(Ok(status)) if status.success() => Ok(()),
        Outcome::Exited(Ok(status)) => Err(StageError::Exit {
            program,
            code: status.code(),
            log_tail: log_tail(log_path, LOG_TAIL_LINES),
        }),
        Outcome::Exited(Err(e)) => Err(StageError::io(log_path, e)),
        Outcome::TimedOut => {
            kill(&mut child, &program).await;
            Err(StageError::Timeout {
                program,
                after: timeout,
                log_tail: log_tail(log_path, LOG_TAIL_LINES),
            })
        }
        Outcome::Cancelled => {
            kill(&mut child, &program).await;
            Err(StageError::Cancelled)
        }
    }
}

async fn kill(child: &mut tokio::process::Child, program: &str) {
    if kill_group(child, program).await {
        return;
    }
    if let Err(e) = child.kill().await {
        warn!(%program, error = %e, "failed to kill stage process");
    }
}

/// SIGKILL the child's process group and reap the child. False if the group
/// could not be signalled.
#[cfg(unix)]
async fn kill_group(child: &mut tokio::process::Child, program: &str) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    let signalled = Command::new("kill")
        .args(["-KILL", "--", &format!("-{pid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    match signalled {
        Ok(status) if status.success() => {
            if let Err(e) = child.wait().await {
                warn!(%program, error = %e, "failed to reap stage process");
            }
            true
        }
        Ok(status) => {
            warn!(%program, pgid = pid, %status, "kill did not signal stage process group");
            false
        }
        Err(e) => {
            warn!(%program, pgid = pid, error = %e, "failed to run kill for stage process group");
            false
        }
    }
}

#[cfg(not(unix))]
async fn kill_group(_child: &mut tokio::process::Child, _program: &str) -> bool {
    false
}

/// Last `lines` lines of a log file, empty if it cannot be read.
pub fn log_tail(path: &Path, lines: usize) -> String {
    let Ok(bytes) = std::fs::read(path) else {
        return String::new();
    };
    let text = String::from_utf8_lossy(&bytes);
    let all: Vec<&str> = text.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[tokio::test]
    async fn test_success_writes_log() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("stage.log");
        let script = sh("echo hello; echo oops >&2");
        run_stage(script, &log, Duration::from_secs(10), &CancelToken::new())
            .await
            .unwrap();
        let text = std::fs::read_to_string(&log).unwrap();
        assert!(text.contains("hello"));
        assert!(text.contains("oops"));
    }

    #[tokio::test]
    async fn test_failure_carries_exit_code_and_tail() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("stage.log");
        let script = sh("echo broken build; exit 3");
        let err = run_stage(script, &log, Duration::from_secs(10), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(
            matches!(
                &err,
                StageError::Exit { code: Some(3), log_tail, .. } if log_tail == "broken build"
            ),
            "unexpected error: {err}"
        );
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("stage.log");
        let started = std::time::Instant::now();
        let err = run_stage(sh("sleep 30"), &log, Duration::from_millis(200), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("stage.log");
        let cancel = CancelToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });
        let err = run_stage(sh("sleep 30"), &log, Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Cancelled));

        // Already cancelled: nothing is spawned.
        let late = dir.path().join("b.log");
        let err = run_stage(sh("touch never"), &late, Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Cancelled));
        assert!(!late.exists());
    }

    /// Runs a shell that forks a `sleep` and waits on it, recording the
    /// grandchild's pid in `gc.pid`.
    #[cfg(target_os = "linux")]
    fn forking_shell(dir: &Path) -> (Command, std::path::PathBuf) {
        let pid_file = dir.join("gc.pid");
        let script = format!("sleep 47 & echo $! > '{}'; wait", pid_file.display());
        (sh(&script), pid_file)
    }

    #[cfg(target_os = "linux")]
    async fn grandchild_pid(pid_file: &Path) -> u32 {
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(pid_file) {
                if let Ok(pid) = text.trim().parse() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        unreachable!("grandchild never reported its pid")
    }

    /// Running and not a zombie awaiting its reaper.
    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
            return false;
        };
        let state = stat.rsplit(") ").next().and_then(|rest| rest.chars().next());
        !matches!(state, Some('Z' | 'X'))
    }

    #[cfg(target_os = "linux")]
    async fn assert_gone(pid: u32) {
        for _ in 0..100 {
            if !is_running(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        unreachable!("grandchild {pid} still running");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancel_kills_grandchildren() {
        let dir = TempDir::new().unwrap();
        let (script, pid_file) = forking_shell(dir.path());
        let cancel = CancelToken::new();

        let trigger = cancel.clone();
        let watched = pid_file.clone();
        let grandchild = tokio::spawn(async move {
            let pid = grandchild_pid(&watched).await;
            trigger.cancel();
            pid
        });
        let err = run_stage(script, &dir.path().join("stage.log"), Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Cancelled));
        assert_gone(grandchild.await.unwrap()).await;
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_grandchildren() {
        let dir = TempDir::new().unwrap();
        let (script, pid_file) = forking_shell(dir.path());
        let log = dir.path().join("stage.log");
        let err = run_stage(script, &log, Duration::from_millis(500), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Timeout { .. }));
        assert_gone(grandchild_pid(&pid_file).await).await;
    }

    #[test]
    fn test_log_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.log");
        std::fs::write(&path, "a\nb\nc\nd\n").unwrap();
        assert_eq!(log_tail(&path, 2), "c\nd");
        assert_eq!(log_tail(&path, 10), "a\nb\nc\nd");
        assert_eq!(log_tail(&dir.path().join("missing"), 5), "");
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let dir = TempDir::new().unwrap();
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let err = rt
            .block_on(run_stage(
                Command::new("definitely-not-a-real-program-xyz"),
                &dir.path().join("x.log"),
                Duration::from_secs(1),
                &CancelToken::new(),
            ))
            .unwrap_err();
        assert!(matches!(err, StageError::Spawn { .. }));
    }
}
