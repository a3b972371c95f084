//! Build orchestration
//!
//! Drives one script from source to a runnable artifact:
//!
//! ```text
//! START -> (fresh) -> READY
//! START -> (stale) -> MATERIALIZE -> SETUP? -> BUILD -> READY
//!                                                  \-> FAILED
//! ```
//!
//! The manifest is parsed before anything touches the cache, so a script
//! with a broken manifest never creates a cache directory. Every rebuild
//! happens under the per-script [`CacheLock`]; a caller that waited on the
//! lock re-checks freshness and skips straight to READY when the holder
//! already produced the artifact.

pub mod process;

pub use process::{CommandOutput, CommandSpec, ProcessRunner, ShellRunner};

use crate::cache::{
    absolute_script_path, check_freshness, content_hash_with_extras, CacheDir, CacheLock,
    CacheResolver, EntryState, Freshness, FreshnessMarker,
};
use crate::config::{Config, FailurePolicy};
use crate::error::{ScriptistoError, ScriptistoResult};
use crate::manifest::{self, ScriptManifest};
use clap::ValueEnum;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

/// Environment variable carrying the cache directory
pub const CACHE_DIR_VAR: &str = "SCRIPTISTO_CACHE_DIR";
/// Environment variable carrying the script's directory
pub const SOURCE_DIR_VAR: &str = "SCRIPTISTO_SOURCE_DIR";
/// Environment variable carrying the script's absolute path
pub const SOURCE_VAR: &str = "SCRIPTISTO_SOURCE";

/// When to rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum BuildMode {
    /// Build only when the cache is stale
    #[default]
    Default,
    /// Always rebuild, running SETUP only if the cache is cold
    Source,
    /// Always rebuild, including SETUP
    Full,
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Source => write!(f, "source"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Knobs for one orchestrator
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub mode: BuildMode,
    pub lock_timeout: Option<Duration>,
    pub build_timeout: Option<Duration>,
    pub on_failure: FailurePolicy,
    /// Echo SETUP/BUILD output to stderr as it arrives
    pub echo_output: bool,
}

impl BuildOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: BuildMode::Default,
            lock_timeout: config.cache.lock_timeout(),
            build_timeout: config.build.timeout(),
            on_failure: config.build.on_failure,
            echo_output: config.build.show_output,
        }
    }
}

/// Progress points reported to an observer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    WaitingForLock,
    Materialize,
    Setup,
    Build,
    Ready,
}

impl fmt::Display for BuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WaitingForLock => write!(f, "Waiting for concurrent build"),
            Self::Materialize => write!(f, "Writing sources"),
            Self::Setup => write!(f, "Running setup"),
            Self::Build => write!(f, "Building"),
            Self::Ready => write!(f, "Ready"),
        }
    }
}

/// Outcome of the BUILD step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub success: bool,
    pub exit_code: i32,
    pub binary_path: PathBuf,
    pub stderr_capture: String,
}

/// A script whose artifact is ready to run
#[derive(Debug, Clone)]
pub struct PreparedScript {
    pub manifest: ScriptManifest,
    pub cache_dir: CacheDir,
    pub binary_path: PathBuf,
    pub content_hash: String,
    /// Whether this invocation (re)built the artifact
    pub rebuilt: bool,
}

/// Everything known about a script before deciding whether to build
struct Inspection {
    manifest: ScriptManifest,
    cache_dir: CacheDir,
    binary_path: PathBuf,
    content_hash: String,
    source: Vec<u8>,
}

impl Inspection {
    fn ready(self, rebuilt: bool) -> PreparedScript {
        PreparedScript {
            manifest: self.manifest,
            cache_dir: self.cache_dir,
            binary_path: self.binary_path,
            content_hash: self.content_hash,
            rebuilt,
        }
    }
}

type PhaseObserver = Box<dyn Fn(BuildPhase) + Send + Sync>;

/// Turns scripts into ready-to-run artifacts
pub struct Orchestrator {
    resolver: CacheResolver,
    runner: Box<dyn ProcessRunner>,
    options: BuildOptions,
    observer: Option<PhaseObserver>,
}

impl Orchestrator {
    pub fn new(resolver: CacheResolver, runner: Box<dyn ProcessRunner>, options: BuildOptions) -> Self {
        Self {
            resolver,
            runner,
            options,
            observer: None,
        }
    }

    /// Report phase changes to `observer` (used for the progress spinner)
    pub fn with_observer(mut self, observer: impl Fn(BuildPhase) + Send + Sync + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    fn phase(&self, phase: BuildPhase) {
        debug!(%phase, "Build phase");
        if let Some(observer) = &self.observer {
            observer(phase);
        }
    }

    /// Read, parse and hash a script without touching the cache
    async fn inspect(&self, script: &Path) -> ScriptistoResult<Inspection> {
        let script_path = absolute_script_path(script)?;
        let source = fs::read(&script_path).await.map_err(|e| {
            ScriptistoError::io(format!("reading script {}", script_path.display()), e)
        })?;

        let manifest = manifest::parse(&String::from_utf8_lossy(&source))?;
        let cache_dir = self.resolver.resolve(&script_path);
        let content_hash =
            content_hash_with_extras(&source, cache_dir.script_dir(), &manifest.extra_src_paths)?;
        let binary_path = cache_dir.path.join(&manifest.target_bin);

        debug!(
            script = %script_path.display(),
            cache_dir = %cache_dir.path.display(),
            content_hash = %content_hash,
            "Inspected script"
        );

        Ok(Inspection {
            manifest,
            cache_dir,
            binary_path,
            content_hash,
            source,
        })
    }

    /// Cache location and freshness of a script, without building
    pub async fn status(&self, script: &Path) -> ScriptistoResult<(PreparedScript, Freshness)> {
        let inspection = self.inspect(script).await?;
        let freshness = check_freshness(
            &inspection.cache_dir,
            &inspection.content_hash,
            &inspection.binary_path,
        )
        .await?;
        Ok((inspection.ready(false), freshness))
    }

    /// Make sure the script's artifact is built and current
    pub async fn prepare(&self, script: &Path) -> ScriptistoResult<PreparedScript> {
        let inspection = self.inspect(script).await?;
        let mode = self.options.mode;

        if mode == BuildMode::Default
            && check_freshness(&inspection.cache_dir, &inspection.content_hash, &inspection.binary_path)
                .await?
                .is_fresh()
        {
            debug!(cache_dir = %inspection.cache_dir.path.display(), "Cache hit");
            return Ok(inspection.ready(false));
        }

        self.phase(BuildPhase::WaitingForLock);
        let _lock = CacheLock::acquire(inspection.cache_dir.lock_path(), self.options.lock_timeout).await?;

        let freshness = check_freshness(
            &inspection.cache_dir,
            &inspection.content_hash,
            &inspection.binary_path,
        )
        .await?;
        if mode == BuildMode::Default && freshness.is_fresh() {
            info!(cache_dir = %inspection.cache_dir.path.display(), "Built by a concurrent invocation");
            self.phase(BuildPhase::Ready);
            return Ok(inspection.ready(false));
        }

        info!(
            cache_dir = %inspection.cache_dir.path.display(),
            state = %freshness,
            mode = %mode,
            "Rebuilding"
        );
        self.rebuild(&inspection, &freshness).await?;
        self.phase(BuildPhase::Ready);
        Ok(inspection.ready(true))
    }

    /// MATERIALIZE, SETUP and BUILD under the held lock
    async fn rebuild(&self, inspection: &Inspection, freshness: &Freshness) -> ScriptistoResult<()> {
        let dir = &inspection.cache_dir;
        let cold = freshness.is_cold();

        if cold && fs::try_exists(&dir.path).await.unwrap_or(false) {
            debug!(cache_dir = %dir.path.display(), "Wiping stale cache directory");
            fs::remove_dir_all(&dir.path).await.map_err(|e| {
                ScriptistoError::io(format!("removing stale cache {}", dir.path.display()), e)
            })?;
        }

        FreshnessMarker::new(&inspection.content_hash, EntryState::Building, &dir.script_path)
            .save(&dir.path)
            .await?;

        let run_setup = cold || self.options.mode == BuildMode::Full;
        match self.run_stages(inspection, run_setup).await {
            Ok(()) => {
                FreshnessMarker::new(&inspection.content_hash, EntryState::Complete, &dir.script_path)
                    .save(&dir.path)
                    .await?;
                info!(cache_dir = %dir.path.display(), state = %EntryState::Complete, "Build finished");
                Ok(())
            }
            Err(err) => {
                if let Err(marker_err) =
                    FreshnessMarker::new(&inspection.content_hash, EntryState::Failed, &dir.script_path)
                        .save(&dir.path)
                        .await
                {
                    warn!(error = %marker_err, "Could not record failed build");
                }
                if self.options.on_failure == FailurePolicy::Clean {
                    self.remove_materialized(inspection).await;
                }
                Err(err)
            }
        }
    }

    async fn run_stages(&self, inspection: &Inspection, run_setup: bool) -> ScriptistoResult<()> {
        self.phase(BuildPhase::Materialize);
        self.materialize(inspection).await?;

        let manifest = &inspection.manifest;
        if run_setup {
            if let Some(setup_cmd) = &manifest.build_once_cmd {
                self.phase(BuildPhase::Setup);
                let spec = self.command_spec(inspection, setup_cmd, &inspection.cache_dir.path);
                let out = self.run_command(&spec).await?;
                if !out.success() {
                    return Err(ScriptistoError::SetupFailed {
                        command: setup_cmd.clone(),
                        code: out.code,
                        output: out.output,
                    });
                }
            }
        }

        self.phase(BuildPhase::Build);
        let result = self.build(inspection).await?;
        if !result.success {
            return Err(ScriptistoError::BuildFailed {
                command: manifest.build_cmd.clone(),
                code: result.exit_code,
                output: result.stderr_capture,
            });
        }

        if !fs::try_exists(&result.binary_path).await.unwrap_or(false) {
            return Err(ScriptistoError::BuildArtifactMissing(result.binary_path));
        }
        Ok(())
    }

    /// Run BUILD and capture its outcome
    async fn build(&self, inspection: &Inspection) -> ScriptistoResult<BuildResult> {
        let manifest = &inspection.manifest;
        let working_dir = if manifest.build_in_script_dir {
            inspection.cache_dir.script_dir().to_path_buf()
        } else {
            inspection.cache_dir.path.clone()
        };
        let spec = self.command_spec(inspection, &manifest.build_cmd, &working_dir);
        let out = self.run_command(&spec).await?;
        Ok(BuildResult {
            success: out.success(),
            exit_code: out.code,
            binary_path: inspection.binary_path.clone(),
            stderr_capture: out.output,
        })
    }

    async fn run_command(&self, spec: &CommandSpec) -> ScriptistoResult<CommandOutput> {
        if self.options.echo_output {
            self.runner.run(spec, &|line| eprintln!("{line}")).await
        } else {
            self.runner.run(spec, &|_| {}).await
        }
    }

    fn command_spec(&self, inspection: &Inspection, command: &str, working_dir: &Path) -> CommandSpec {
        let dir = &inspection.cache_dir;
        CommandSpec {
            command: command.to_string(),
            working_dir: working_dir.to_path_buf(),
            env: vec![
                (CACHE_DIR_VAR.to_string(), OsString::from(&dir.path)),
                (SOURCE_DIR_VAR.to_string(), OsString::from(dir.script_dir())),
                (SOURCE_VAR.to_string(), OsString::from(&dir.script_path)),
            ],
            timeout: self.options.build_timeout,
        }
    }

    /// Write auxiliary files, then the script source, into the cache directory
    async fn materialize(&self, inspection: &Inspection) -> ScriptistoResult<()> {
        let dir = &inspection.cache_dir.path;
        let manifest = &inspection.manifest;

        for file in &manifest.files {
            write_file(&dir.join(&file.path), file.content.as_bytes()).await?;
        }
        write_file(
            &dir.join(&manifest.script_src),
            &manifest.materialized_source(&inspection.source),
        )
        .await?;

        debug!(cache_dir = %dir.display(), files = manifest.files.len() + 1, "Materialized sources");
        Ok(())
    }

    async fn remove_materialized(&self, inspection: &Inspection) {
        let dir = &inspection.cache_dir.path;
        let paths = inspection
            .manifest
            .files
            .iter()
            .map(|f| &f.path)
            .chain(std::iter::once(&inspection.manifest.script_src));
        for path in paths {
            let full = dir.join(path);
            if let Err(e) = fs::remove_file(&full).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %full.display(), error = %e, "Could not remove materialized file");
                }
            }
        }
    }
}

async fn write_file(path: &Path, content: &[u8]) -> ScriptistoResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| ScriptistoError::io(format!("creating directory {}", parent.display()), e))?;
    }
    fs::write(path, content)
        .await
        .map_err(|e| ScriptistoError::io(format!("writing {}", path.display()), e))
}
