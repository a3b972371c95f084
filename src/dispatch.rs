//! Execution dispatcher
//!
//! Launches the built artifact with the caller's stdio, waits for it and
//! returns its exit code. While the child runs, SIGINT, SIGTERM, SIGHUP and
//! SIGQUIT sent to scriptisto are either forwarded to the child (the
//! default) or make scriptisto exit immediately and leave the child running,
//! depending on [`CancelPolicy`].

use crate::build::process::status_code;
use crate::build::PreparedScript;
use crate::config::CancelPolicy;
use crate::error::{ScriptistoError, ScriptistoResult};
use std::ffi::OsString;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Final program and argument vector for a prepared script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl Invocation {
    /// `interpreter [interp args] binary args...` or `binary args...`
    pub fn for_script(prepared: &PreparedScript, user_args: &[OsString]) -> Self {
        let binary = prepared.binary_path.clone().into_os_string();
        let forwarded = user_args.iter().cloned();

        match &prepared.manifest.target_interpreter {
            Some(interp) => Self {
                program: OsString::from(&interp.program),
                args: interp
                    .args
                    .iter()
                    .map(OsString::from)
                    .chain(std::iter::once(binary))
                    .chain(forwarded)
                    .collect(),
            },
            None => Self {
                program: binary,
                args: forwarded.collect(),
            },
        }
    }

    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|s| s.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Runs invocations in the foreground
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher {
    policy: CancelPolicy,
}

impl Dispatcher {
    pub fn new(policy: CancelPolicy) -> Self {
        Self { policy }
    }

    /// Run `invocation` to completion and return its exit code
    ///
    /// A child killed by a signal yields `128 + signal`.
    pub async fn execute(&self, invocation: &Invocation) -> ScriptistoResult<i32> {
        #[cfg(unix)]
        let mut signals = unix::ForwardedSignals::install()?;

        debug!(command = %invocation.display(), "Executing");
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ScriptistoError::ExecutionFailed {
                program: invocation.program.to_string_lossy().into_owned(),
                source: e,
            })?;

        #[cfg(unix)]
        let code = self.supervise(&mut child, &mut signals).await?;
        #[cfg(not(unix))]
        let code = wait(&mut child).await?;

        debug!(exit_code = code, "Script exited");
        Ok(code)
    }

    #[cfg(unix)]
    async fn supervise(
        &self,
        child: &mut Child,
        signals: &mut unix::ForwardedSignals,
    ) -> ScriptistoResult<i32> {
        loop {
            tokio::select! {
                code = wait(child) => return code,
                signal = signals.next() => match self.policy {
                    CancelPolicy::Propagate => {
                        debug!(signal, "Forwarding signal to script");
                        unix::forward(child, signal);
                    }
                    CancelPolicy::Orphan => {
                        info!(signal, pid = child.id(), "Leaving script running");
                        return Ok(128 + signal);
                    }
                },
            }
        }
    }
}

async fn wait(child: &mut Child) -> ScriptistoResult<i32> {
    let status = child
        .wait()
        .await
        .map_err(|e| ScriptistoError::io("waiting for script", e))?;
    Ok(status_code(status))
}

#[cfg(unix)]
mod unix {
    use crate::error::{ScriptistoError, ScriptistoResult};
    use tokio::process::Child;
    use tokio::signal::unix::{signal, Signal, SignalKind};
    use tracing::warn;

    /// Handlers for the signals relayed to the child
    pub(super) struct ForwardedSignals {
        interrupt: Signal,
        terminate: Signal,
        hangup: Signal,
        quit: Signal,
    }

    impl ForwardedSignals {
        pub(super) fn install() -> ScriptistoResult<Self> {
            let listen = |kind: SignalKind| {
                signal(kind).map_err(|e| ScriptistoError::io("installing signal handler", e))
            };
            Ok(Self {
                interrupt: listen(SignalKind::interrupt())?,
                terminate: listen(SignalKind::terminate())?,
                hangup: listen(SignalKind::hangup())?,
                quit: listen(SignalKind::quit())?,
            })
        }

        /// Wait for the next relayed signal and return its number
        pub(super) async fn next(&mut self) -> i32 {
            tokio::select! {
                _ = self.interrupt.recv() => libc::SIGINT,
                _ = self.terminate.recv() => libc::SIGTERM,
                _ = self.hangup.recv() => libc::SIGHUP,
                _ = self.quit.recv() => libc::SIGQUIT,
            }
        }
    }

    pub(super) fn forward(child: &Child, signal: i32) {
        let Some(pid) = child.id() else {
            return;
        };
        // SAFETY: kill has no memory-safety preconditions; pid belongs to our
        // un-reaped child, so it cannot have been recycled.
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if rc != 0 {
            warn!(
                signal,
                pid,
                error = %std::io::Error::last_os_error(),
                "Could not forward signal"
            );
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::cache::CacheResolver;
    use crate::manifest::model::Interpreter;
    use crate::manifest::ScriptManifest;
    use serial_test::serial;
    use std::path::{Path, PathBuf};
    use std::time::{Duration, Instant};

    fn prepared(interpreter: Option<&str>) -> PreparedScript {
        let manifest = ScriptManifest {
            script_src: PathBuf::from("tool.py"),
            build_cmd: "true".into(),
            build_once_cmd: None,
            target_bin: PathBuf::from("tool.py"),
            target_interpreter: interpreter.map(|i| Interpreter::parse(i).unwrap()),
            files: vec![],
            replace_shebang_with: String::new(),
            build_in_script_dir: false,
            extra_src_paths: vec![],
        };
        let cache_dir = CacheResolver::new("/cache").resolve(Path::new("/s/tool.py"));
        PreparedScript {
            binary_path: cache_dir.path.join("tool.py"),
            manifest,
            cache_dir,
            content_hash: "h".into(),
            rebuilt: false,
        }
    }

    #[test]
    fn direct_invocation() {
        let inv = Invocation::for_script(&prepared(None), &["a".into(), "--b".into()]);
        assert_eq!(inv.program, OsString::from("/cache/bin/s/tool.py/tool.py"));
        assert_eq!(inv.args, vec![OsString::from("a"), OsString::from("--b")]);
    }

    #[test]
    fn interpreter_invocation() {
        let inv = Invocation::for_script(&prepared(Some("python3 -u")), &["x".into()]);
        assert_eq!(inv.program, OsString::from("python3"));
        assert_eq!(
            inv.display(),
            "python3 -u /cache/bin/s/tool.py/tool.py x".to_string()
        );
    }

    #[tokio::test]
    #[serial]
    async fn propagates_exit_code() {
        let inv = Invocation {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "exit 7".into()],
        };
        assert_eq!(Dispatcher::default().execute(&inv).await.unwrap(), 7);
    }

    #[tokio::test]
    #[serial]
    async fn missing_program_is_execution_failed() {
        let inv = Invocation {
            program: "/definitely/not/a/program".into(),
            args: vec![],
        };
        let err = Dispatcher::default().execute(&inv).await.unwrap_err();
        assert!(matches!(err, ScriptistoError::ExecutionFailed { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    #[serial]
    async fn signalled_child_maps_to_128_plus_signal() {
        let inv = Invocation {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), "kill -TERM $$".into()],
        };
        assert_eq!(Dispatcher::default().execute(&inv).await.unwrap(), 128 + 15);
    }

    /// SIGTERM this test process after `delay`
    fn terminate_self_after(delay: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // SAFETY: kill has no memory-safety preconditions.
            unsafe {
                libc::kill(libc::getpid(), libc::SIGTERM);
            }
        });
    }

    fn shell(script: &str) -> Invocation {
        Invocation {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), script.into()],
        }
    }

    #[tokio::test]
    #[serial]
    async fn propagate_forwards_terminate_to_script() {
        terminate_self_after(Duration::from_millis(300));
        let code = Dispatcher::new(CancelPolicy::Propagate)
            .execute(&shell("trap 'exit 42' TERM; sleep 5 & wait"))
            .await
            .unwrap();
        assert_eq!(code, 42);
    }

    #[tokio::test]
    #[serial]
    async fn orphan_returns_without_waiting_for_script() {
        let started = Instant::now();
        terminate_self_after(Duration::from_millis(300));
        let code = Dispatcher::new(CancelPolicy::Orphan)
            .execute(&shell("trap 'exit 42' TERM; sleep 3"))
            .await
            .unwrap();
        assert_eq!(code, 128 + libc::SIGTERM);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
