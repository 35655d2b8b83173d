//! Dependency preflight for the bundled interpreter
//!
//! Checks that the worker's critical module imports and, if not, makes one
//! best-effort install from the bundled manifest. Never fails the caller.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tether_config::{PreflightConfig, RuntimeMode};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::launcher::WorkerPaths;

/// Result of a preflight run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreflightOutcome {
    /// Development mode or disabled
    Skipped,
    /// Probe import succeeded
    Satisfied,
    /// Probe failed and there is nothing to install from
    ManifestMissing { manifest: PathBuf },
    /// Install completed
    Installed,
    /// Install failed or timed out
    InstallFailed { reason: String },
}

/// One-shot dependency check before the first spawn
#[derive(Debug, Clone)]
pub struct DependencyPreflight {
    config: PreflightConfig,
    mode: RuntimeMode,
    interpreter: PathBuf,
    runtime_dir: PathBuf,
}

impl DependencyPreflight {
    pub fn new(config: PreflightConfig, paths: &WorkerPaths) -> Self {
        Self {
            config,
            mode: paths.mode,
            interpreter: paths.executable.clone(),
            runtime_dir: paths.runtime_dir().to_path_buf(),
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.runtime_dir.join(&self.config.manifest_file)
    }

    /// Run the check; every failure is logged and swallowed
    pub async fn run(&self) -> PreflightOutcome {
        if self.mode.is_development() || !self.config.enabled {
            debug!("Dependency preflight skipped");
            return PreflightOutcome::Skipped;
        }

        info!(
            "Checking that {} can import {}",
            self.interpreter.display(),
            self.config.probe_module
        );

        match self.probe_import().await {
            Ok(true) => {
                info!("Worker dependencies available");
                return PreflightOutcome::Satisfied;
            }
            Ok(false) => warn!(
                "Module {} is not importable, attempting install",
                self.config.probe_module
            ),
            Err(e) => warn!("Dependency probe could not run: {}", e),
        }

        let manifest = self.manifest_path();
        if !manifest.is_file() {
            warn!("No dependency manifest at {}", manifest.display());
            return PreflightOutcome::ManifestMissing { manifest };
        }

        match self.install(&manifest).await {
            Ok(()) => {
                info!("Worker dependencies installed from {}", manifest.display());
                PreflightOutcome::Installed
            }
            Err(reason) => {
                warn!("Dependency install failed: {}", reason);
                PreflightOutcome::InstallFailed { reason }
            }
        }
    }

    async fn probe_import(&self) -> Result<bool, String> {
        let script = format!("import {}; print('OK')", self.config.probe_module);
        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-c")
            .arg(script)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = run_bounded(cmd, self.config.install_timeout).await?;
        Ok(output.status.success() && String::from_utf8_lossy(&output.stdout).contains("OK"))
    }

    async fn install(&self, manifest: &Path) -> Result<(), String> {
        let mut cmd = Command::new(&self.interpreter);
        cmd.args([
            "-m",
            "pip",
            "install",
            "--user",
            "--no-cache-dir",
            "--no-warn-script-location",
            "--disable-pip-version-check",
            "-r",
        ])
        .arg(manifest)
        .current_dir(&self.runtime_dir)
        .env("PYTHONUNBUFFERED", "1")
        .stdin(Stdio::null())
        .kill_on_drop(true);

        let output = run_bounded(cmd, self.config.install_timeout).await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(format!(
                "installer exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            ))
        }
    }
}

async fn run_bounded(
    mut cmd: Command,
    limit: Duration,
) -> Result<std::process::Output, String> {
    match timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("timed out after {:?}", limit)),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    /// Fake interpreter: `-c` probe succeeds iff `import_ok` exists,
    /// `-m pip` records its arguments and creates `import_ok`
    fn fake_runtime() -> (TempDir, WorkerPaths) {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();

        let interpreter = bin.join("python3");
        let script = format!(
            "#!/bin/sh\nDIR='{}'\nif [ \"$1\" = \"-c\" ]; then\n  [ -f \"$DIR/import_ok\" ] && echo OK && exit 0\n  echo 'ModuleNotFoundError' >&2; exit 1\nfi\necho \"$@\" > \"$DIR/pip_args\"\ntouch \"$DIR/import_ok\"\n",
            bin.display()
        );
        fs::write(&interpreter, script).unwrap();
        fs::set_permissions(&interpreter, fs::Permissions::from_mode(0o755)).unwrap();

        let paths = WorkerPaths {
            mode: RuntimeMode::Packaged,
            executable: interpreter,
            entry_script: dir.path().join("server.py"),
        };
        (dir, paths)
    }

    #[tokio::test]
    async fn test_satisfied_when_import_works() {
        let (dir, paths) = fake_runtime();
        fs::write(dir.path().join("bin/import_ok"), "").unwrap();

        let preflight = DependencyPreflight::new(PreflightConfig::default(), &paths);
        assert_eq!(preflight.run().await, PreflightOutcome::Satisfied);
    }

    #[tokio::test]
    async fn test_missing_manifest_is_swallowed() {
        let (_dir, paths) = fake_runtime();

        let preflight = DependencyPreflight::new(PreflightConfig::default(), &paths);
        assert!(matches!(
            preflight.run().await,
            PreflightOutcome::ManifestMissing { .. }
        ));
    }

    #[tokio::test]
    async fn test_installs_from_manifest() {
        let (dir, paths) = fake_runtime();
        fs::write(dir.path().join("bin/requirements.txt"), "yt-dlp\n").unwrap();

        let preflight = DependencyPreflight::new(PreflightConfig::default(), &paths);
        assert_eq!(preflight.run().await, PreflightOutcome::Installed);

        let args = fs::read_to_string(dir.path().join("bin/pip_args")).unwrap();
        assert!(args.starts_with("-m pip install --user --no-cache-dir"));
        assert!(args.contains("requirements.txt"));
    }

    #[tokio::test]
    async fn test_missing_interpreter_does_not_fail() {
        let (dir, mut paths) = fake_runtime();
        paths.executable = dir.path().join("bin/not-here");
        fs::write(dir.path().join("bin/requirements.txt"), "yt-dlp\n").unwrap();

        let preflight = DependencyPreflight::new(PreflightConfig::default(), &paths);
        assert!(matches!(
            preflight.run().await,
            PreflightOutcome::InstallFailed { .. }
        ));
    }

    #[tokio::test]
    async fn test_development_mode_skips() {
        let (_dir, mut paths) = fake_runtime();
        paths.mode = RuntimeMode::Development;

        let preflight = DependencyPreflight::new(PreflightConfig::default(), &paths);
        assert_eq!(preflight.run().await, PreflightOutcome::Skipped);
    }
}
