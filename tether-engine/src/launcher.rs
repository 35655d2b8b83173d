//! Worker path resolution and launch description
//!
//! Resolves the interpreter and entry script for the current platform and
//! runtime mode. No process management happens here.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tether_config::{EngineConfig, RuntimeMode};
use tokio::process::Command;

use crate::error::EngineError;

/// Supported operating systems
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Windows,
    MacOs,
    Linux,
}

/// Supported CPU architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X64,
    X86,
    Arm64,
}

/// Host platform identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    /// Platform of the running binary
    pub fn current() -> Result<Self, EngineError> {
        Self::from_identifiers(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// Parse Rust target identifiers (`std::env::consts` spelling)
    pub fn from_identifiers(os: &str, arch: &str) -> Result<Self, EngineError> {
        let unsupported = || EngineError::UnsupportedPlatform {
            os: os.to_string(),
            arch: arch.to_string(),
        };

        let parsed_os = match os {
            "windows" => Os::Windows,
            "macos" => Os::MacOs,
            "linux" => Os::Linux,
            _ => return Err(unsupported()),
        };
        let parsed_arch = match arch {
            "x86_64" => Arch::X64,
            "x86" => Arch::X86,
            "aarch64" => Arch::Arm64,
            _ => return Err(unsupported()),
        };

        Ok(Self {
            os: parsed_os,
            arch: parsed_arch,
        })
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let os = match self.os {
            Os::Windows => "windows",
            Os::MacOs => "macos",
            Os::Linux => "linux",
        };
        let arch = match self.arch {
            Arch::X64 => "x64",
            Arch::X86 => "x86",
            Arch::Arm64 => "arm64",
        };
        write!(f, "{}-{}", os, arch)
    }
}

/// Location of a bundled interpreter inside the runtime directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeLayout {
    /// Per-platform directory name
    pub dir: &'static str,
    /// Interpreter path relative to `dir`
    pub executable: &'static str,
}

/// Bundled interpreter table; `None` for platforms without a bundle
pub fn runtime_layout(platform: Platform) -> Option<RuntimeLayout> {
    let layout = match (platform.os, platform.arch) {
        (Os::Windows, Arch::X64) => RuntimeLayout {
            dir: "win32-x64",
            executable: "python.exe",
        },
        (Os::Windows, Arch::X86) => RuntimeLayout {
            dir: "win32-ia32",
            executable: "python.exe",
        },
        (Os::MacOs, Arch::Arm64) => RuntimeLayout {
            dir: "darwin-arm64",
            executable: "bin/python3",
        },
        (Os::MacOs, Arch::X64) => RuntimeLayout {
            dir: "darwin-x64",
            executable: "bin/python3",
        },
        (Os::Linux, Arch::X64) => RuntimeLayout {
            dir: "linux-x64",
            executable: "bin/python3",
        },
        _ => return None,
    };
    Some(layout)
}

/// Resolved and validated worker paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPaths {
    pub mode: RuntimeMode,
    pub executable: PathBuf,
    pub entry_script: PathBuf,
}

impl WorkerPaths {
    /// Directory of the entry script, used as the worker's cwd
    pub fn working_dir(&self) -> &Path {
        self.entry_script.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Directory holding the interpreter
    pub fn runtime_dir(&self) -> &Path {
        self.executable.parent().unwrap_or_else(|| Path::new("."))
    }

    /// Launch description: `<interpreter> <entry script>` with unbuffered output
    pub fn launch_spec(&self) -> LaunchSpec {
        let working_dir = self.working_dir().to_path_buf();
        LaunchSpec::new(&self.executable)
            .arg(self.entry_script.as_os_str())
            .current_dir(&working_dir)
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONPATH", working_dir.as_os_str())
    }
}

/// Resolves worker paths for a configuration and platform
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    config: EngineConfig,
    platform: Platform,
}

impl WorkerLauncher {
    /// Launcher for the host platform
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Ok(Self::with_platform(config, Platform::current()?))
    }

    pub fn with_platform(config: EngineConfig, platform: Platform) -> Self {
        Self { config, platform }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Resolve both paths and check the entry script exists
    pub fn resolve(&self) -> Result<WorkerPaths, EngineError> {
        let worker_dir = self.config.resources_path.join(&self.config.worker_dir);
        let entry_script = worker_dir.join(&self.config.entry_script);

        let executable = match self.config.mode {
            RuntimeMode::Development => {
                let venv = worker_dir.join(&self.config.venv_dir);
                match self.platform.os {
                    Os::Windows => venv.join("Scripts").join("python.exe"),
                    Os::MacOs | Os::Linux => venv.join("bin").join("python"),
                }
            }
            RuntimeMode::Packaged => {
                let layout = runtime_layout(self.platform).ok_or_else(|| {
                    EngineError::UnsupportedPlatform {
                        os: format!("{:?}", self.platform.os).to_lowercase(),
                        arch: format!("{:?}", self.platform.arch).to_lowercase(),
                    }
                })?;
                self.config
                    .resources_path
                    .join(&self.config.runtime_dir)
                    .join(layout.dir)
                    .join(layout.executable)
            }
        };

        if !entry_script.is_file() {
            tracing::error!("Worker entry script not found at {}", entry_script.display());
            return Err(EngineError::EnvironmentValidation { path: entry_script });
        }

        tracing::info!(
            platform = %self.platform,
            mode = %self.config.mode,
            "Resolved worker interpreter {} and entry script {}",
            executable.display(),
            entry_script.display()
        );

        Ok(WorkerPaths {
            mode: self.config.mode,
            executable,
            entry_script,
        })
    }
}

/// Everything needed to spawn a worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Command with piped output and kill-on-drop
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        cmd
    }
}
