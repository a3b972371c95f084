//! Subprocess execution for SETUP and BUILD
//!
//! Commands are handed to a shell (`/bin/sh -c` by default) with stdin
//! closed and stdout/stderr piped. Output is read line by line, optionally
//! echoed, and its tail retained so a failure can be reported with it.
//! Each command runs in its own process group; on timeout or Ctrl-C the
//! whole group is killed.

use crate::error::{ScriptistoError, ScriptistoResult};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Max number of output lines kept for error messages.
const ERROR_TAIL_LINES: usize = 50;

/// Exit code reported for a command stopped by Ctrl-C (`128 + SIGINT`)
const INTERRUPTED_CODE: i32 = 130;

/// One shell command to run
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub command: String,
    pub working_dir: PathBuf,
    /// Added on top of the inherited environment
    pub env: Vec<(String, OsString)>,
    pub timeout: Option<Duration>,
}

/// Result of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `128 + signal` when killed by a signal
    pub code: i32,
    /// Tail of combined stdout and stderr
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs shell commands on behalf of the build orchestrator
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `spec` to completion, passing each output line to `on_output`
    async fn run(
        &self,
        spec: &CommandSpec,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> ScriptistoResult<CommandOutput>;
}

/// [`ProcessRunner`] backed by `<shell> -c <command>`
#[derive(Debug, Clone)]
pub struct ShellRunner {
    shell: String,
}

impl ShellRunner {
    pub fn new(shell: impl Into<String>) -> Self {
        Self {
            shell: shell.into(),
        }
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new("/bin/sh")
    }
}

#[async_trait]
impl ProcessRunner for ShellRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        on_output: &(dyn Fn(String) + Send + Sync),
    ) -> ScriptistoResult<CommandOutput> {
        debug!(
            command = %spec.command,
            working_dir = %spec.working_dir.display(),
            "Running: {} -c", self.shell
        );

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&spec.command)
            .current_dir(&spec.working_dir)
            .envs(spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a timeout or interrupt takes down the
        // compiler the shell started and not only the shell
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            ScriptistoError::io(format!("spawning {} -c {}", self.shell, spec.command), e)
        })?;

        let mut tail = VecDeque::with_capacity(ERROR_TAIL_LINES);
        let outcome = {
            let run = async {
                stream_child_output(&mut child, &mut tail, on_output).await;
                child.wait().await
            };
            let bounded = async {
                match spec.timeout {
                    Some(limit) => tokio::time::timeout(limit, run).await.ok(),
                    None => Some(run.await),
                }
            };
            tokio::select! {
                finished = bounded => match finished {
                    Some(status) => Outcome::Exited(status),
                    None => Outcome::TimedOut,
                },
                Ok(()) = tokio::signal::ctrl_c() => Outcome::Interrupted,
            }
        };

        let code = match outcome {
            Outcome::Exited(status) => status_code(status.map_err(|e| {
                ScriptistoError::io(format!("waiting for {}", spec.command), e)
            })?),
            Outcome::TimedOut => {
                kill_process_group(&mut child).await;
                return Err(ScriptistoError::BuildTimeout {
                    command: spec.command.clone(),
                    timeout: spec.timeout.unwrap_or_default(),
                });
            }
            Outcome::Interrupted => {
                info!(command = %spec.command, "Interrupted, stopping command");
                kill_process_group(&mut child).await;
                INTERRUPTED_CODE
            }
        };
        debug!(command = %spec.command, exit_code = code, "Command finished");

        Ok(CommandOutput {
            code,
            output: error_tail(&tail),
        })
    }
}

/// How a supervised command ended
enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Interrupted,
}

/// SIGKILL the command's whole process group, then reap the shell
async fn kill_process_group(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: killpg has no memory-safety preconditions; the group was
        // created for this un-reaped child, so its id cannot be recycled.
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            warn!(pid, error = %std::io::Error::last_os_error(), "Could not kill process group");
        }
    }
    let _ = child.kill().await;
}

/// Exit code of a finished process, mapping signals to `128 + signal`
pub fn status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}

/// Retained output lines, joined
fn error_tail(lines: &VecDeque<String>) -> String {
    lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
}

/// Append `line`, dropping the oldest once `ERROR_TAIL_LINES` are kept
fn push_tail(tail: &mut VecDeque<String>, line: String) {
    if tail.len() == ERROR_TAIL_LINES {
        tail.pop_front();
    }
    tail.push_back(line);
}

/// Stream stdout+stderr from a child process, calling `on_output` for each line.
///
/// Both pipes are drained until EOF. Bytes that are not UTF-8 are replaced
/// rather than ending the stream, and the last `ERROR_TAIL_LINES` lines
/// land in `tail`.
async fn stream_child_output(
    child: &mut Child,
    tail: &mut VecDeque<String>,
    on_output: &(dyn Fn(String) + Send + Sync),
) {
    let mut stderr_reader = child.stderr.take().map(|s| BufReader::new(s).split(b'\n'));
    let mut stdout_reader = child.stdout.take().map(|s| BufReader::new(s).split(b'\n'));

    let mut stderr_done = stderr_reader.is_none();
    let mut stdout_done = stdout_reader.is_none();

    while !stderr_done || !stdout_done {
        tokio::select! {
            line = next_line(&mut stderr_reader), if !stderr_done => {
                match line {
                    Some(line) => {
                        on_output(line.clone());
                        push_tail(tail, line);
                    }
                    None => stderr_done = true,
                }
            }
            line = next_line(&mut stdout_reader), if !stdout_done => {
                match line {
                    Some(line) => {
                        on_output(line.clone());
                        push_tail(tail, line);
                    }
                    None => stdout_done = true,
                }
            }
        }
    }
}

/// Next line of a pipe, or `None` at EOF or on a read error
async fn next_line<R>(reader: &mut Option<Split<BufReader<R>>>) -> Option<String>
where
    R: AsyncRead + Unpin,
{
    let segments = reader.as_mut()?;
    match segments.next_segment().await {
        Ok(Some(mut bytes)) => {
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "Stopped reading command output");
            None
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn spec(command: &str, dir: &TempDir) -> CommandSpec {
        CommandSpec {
            command: command.to_string(),
            working_dir: dir.path().to_path_buf(),
            env: vec![("SCRIPTISTO_TEST_VAR".to_string(), OsString::from("hello"))],
            timeout: None,
        }
    }

    #[tokio::test]
    async fn captures_output_and_code() {
        let temp = TempDir::new().unwrap();
        let out = ShellRunner::default()
            .run(&spec("echo out; echo err >&2; exit 3", &temp), &|_| {})
            .await
            .unwrap();
        assert_eq!(out.code, 3);
        assert!(!out.success());
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[tokio::test]
    async fn runs_in_working_dir_with_env() {
        let temp = TempDir::new().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let out = ShellRunner::default()
            .run(
                &spec("pwd; echo $SCRIPTISTO_TEST_VAR", &temp),
                &move |line| sink.lock().unwrap().push(line),
            )
            .await
            .unwrap();
        assert!(out.success());
        let lines = seen.lock().unwrap().clone();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(temp.path().file_name().unwrap().to_str().unwrap()));
        assert_eq!(lines[1], "hello");
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let temp = TempDir::new().unwrap();
        let mut s = spec("exec sleep 5", &temp);
        s.timeout = Some(Duration::from_millis(100));
        let err = ShellRunner::default().run(&s, &|_| {}).await.unwrap_err();
        assert!(matches!(err, ScriptistoError::BuildTimeout { .. }));
    }

    #[tokio::test]
    async fn invalid_utf8_does_not_end_output() {
        let temp = TempDir::new().unwrap();
        let out = ShellRunner::default()
            .run(
                &spec(r"printf 'bad \377 byte\n' >&2; echo after-bad >&2; exit 1", &temp),
                &|_| {},
            )
            .await
            .unwrap();
        assert_eq!(out.code, 1);
        assert!(out.output.contains("bad \u{FFFD} byte"));
        assert!(out.output.contains("after-bad"));
    }

    #[tokio::test]
    async fn keeps_draining_after_invalid_utf8() {
        let temp = TempDir::new().unwrap();
        let command = r"printf '\377\n' >&2; head -c 300000 /dev/zero | tr '\0' a >&2; echo done";
        let out = tokio::time::timeout(
            Duration::from_secs(10),
            ShellRunner::default().run(&spec(command, &temp), &|_| {}),
        )
        .await
        .expect("command output was not drained")
        .unwrap();
        assert!(out.success());
        assert!(out.output.contains("done"));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_whole_process_group() {
        let temp = TempDir::new().unwrap();
        let mut s = spec("sleep 30 & echo $! > bg.pid; wait", &temp);
        s.timeout = Some(Duration::from_millis(300));
        let err = ShellRunner::default().run(&s, &|_| {}).await.unwrap_err();
        assert!(matches!(err, ScriptistoError::BuildTimeout { .. }));

        let pid = std::fs::read_to_string(temp.path().join("bg.pid")).unwrap();
        let stat = format!("/proc/{}/stat", pid.trim());
        let mut alive = true;
        for _ in 0..40 {
            // Gone, or a zombie waiting for init to reap it
            alive = std::fs::read_to_string(&stat)
                .map(|s| !s.contains(") Z "))
                .unwrap_or(false);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "background build process survived the timeout");
    }

    #[test]
    fn tail_keeps_last_lines() {
        let mut tail = VecDeque::new();
        for i in 0..60 {
            push_tail(&mut tail, i.to_string());
        }
        assert_eq!(tail.len(), ERROR_TAIL_LINES);
        let joined = error_tail(&tail);
        assert!(joined.starts_with("10\n"));
        assert!(joined.ends_with("59"));
    }
}
