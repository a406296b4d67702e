use std::{
    collections::HashMap,
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, StorageError};

pub const DEFAULT_LICENSE_FILENAME: &str = "LICENSE.TXT";
pub const DEFAULT_SHORT_URL_ROOT: &str = "http://scpyce.org/";
pub const DEFAULT_LIBRARY_MAX_SIZE: u64 = 25 * 1024 * 1024;
pub const COMMON_RCS_DIRS: [&str; 4] = [".hg", ".git", ".bzr", ".svn"];

#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Shadow `key` for everything read through this snapshot.
    #[must_use]
    pub fn with_override(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// Which version control tool backs submission repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Mercurial,
    Git,
    /// Declared so configuration can name it; selecting it fails.
    Bazaar,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mercurial => "hg",
            Self::Git => "git",
            Self::Bazaar => "bzr",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hg" | "mercurial" => Ok(Self::Mercurial),
            "git" => Ok(Self::Git),
            "bzr" | "bazaar" => Ok(Self::Bazaar),
            other => Err(StorageError::Config {
                reason: format!("unknown revisioning backend '{other}'"),
            }),
        }
    }
}

/// How the command runner treats text a tool writes to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StderrPolicy {
    /// Any stderr output is the result of the call, whatever the exit code.
    Legacy,
    /// Exit codes decide success; stderr from a successful call is only logged.
    #[default]
    ExitCode,
}

impl FromStr for StderrPolicy {
    type Err = StorageError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "legacy" | "stderr" => Ok(Self::Legacy),
            "exit-code" | "exit_code" | "exitcode" => Ok(Self::ExitCode),
            other => Err(StorageError::Config {
                reason: format!("unknown stderr policy '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    storage_dir: Option<PathBuf>,
    backend: Option<String>,
    executable: Option<PathBuf>,
    license_filename: Option<String>,
    short_url_root: Option<String>,
    stderr_policy: Option<String>,
    library_max_size: Option<u64>,
    blocklist: Option<Vec<String>>,
}

/// Everything the storage layer needs to know about its deployment.
///
/// Passed explicitly to every component that runs the version control tool;
/// nothing here is process-global.
#[derive(Debug, Clone, Serialize)]
pub struct StorageSettings {
    pub storage_dir: PathBuf,
    pub backend: BackendKind,
    /// Overrides the backend's executable lookup on `PATH`.
    pub executable: Option<PathBuf>,
    pub license_filename: String,
    pub short_url_root: String,
    pub stderr_policy: StderrPolicy,
    pub library_max_size: u64,
    /// Top-level archive directories never extracted into a repository.
    pub blocklist: Vec<String>,
}

impl StorageSettings {
    pub fn new(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            backend: BackendKind::Mercurial,
            executable: None,
            license_filename: DEFAULT_LICENSE_FILENAME.to_string(),
            short_url_root: DEFAULT_SHORT_URL_ROOT.to_string(),
            stderr_policy: StderrPolicy::default(),
            library_max_size: DEFAULT_LIBRARY_MAX_SIZE,
            blocklist: COMMON_RCS_DIRS.iter().map(|d| (*d).to_string()).collect(),
        }
    }

    #[must_use]
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    #[must_use]
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = Some(executable.into());
        self
    }

    #[must_use]
    pub fn with_stderr_policy(mut self, policy: StderrPolicy) -> Self {
        self.stderr_policy = policy;
        self
    }

    /// Settings from the process environment, layered over `SPC_CONFIG` if set.
    pub fn from_env() -> Result<Self> {
        let snapshot = EnvSnapshot::capture();
        Self::from_snapshot(&snapshot)
    }

    pub fn from_snapshot(snapshot: &EnvSnapshot) -> Result<Self> {
        let file = match snapshot.var("SPC_CONFIG") {
            Some(path) => read_file_settings(Path::new(path))?,
            None => FileSettings::default(),
        };
        Self::layer(file, snapshot)
    }

    /// Settings from a TOML file, with environment overrides still applied.
    pub fn load(path: &Path, snapshot: &EnvSnapshot) -> Result<Self> {
        let file = read_file_settings(path)?;
        Self::layer(file, snapshot)
    }

    fn layer(file: FileSettings, snapshot: &EnvSnapshot) -> Result<Self> {
        let storage_dir = snapshot
            .var("SPC_STORAGE_DIR")
            .map(PathBuf::from)
            .or(file.storage_dir)
            .ok_or_else(|| StorageError::Config {
                reason: "no storage directory configured (set SPC_STORAGE_DIR)".to_string(),
            })?;
        let mut settings = Self::new(storage_dir);

        if let Some(raw) = snapshot.var("SPC_VCS_BACKEND").or(file.backend.as_deref()) {
            settings.backend = raw.parse()?;
        }
        settings.executable = snapshot
            .var("SPC_VCS_EXECUTABLE")
            .map(PathBuf::from)
            .or(file.executable);
        if let Some(name) = snapshot
            .var("SPC_LICENSE_FILENAME")
            .map(ToOwned::to_owned)
            .or(file.license_filename)
        {
            settings.license_filename = name;
        }
        if let Some(root) = snapshot
            .var("SPC_SHORT_URL_ROOT")
            .map(ToOwned::to_owned)
            .or(file.short_url_root)
        {
            settings.short_url_root = root;
        }
        if let Some(raw) = snapshot
            .var("SPC_STDERR_POLICY")
            .or(file.stderr_policy.as_deref())
        {
            settings.stderr_policy = raw.parse()?;
        }
        if let Some(raw) = snapshot.var("SPC_LIBRARY_MAX_SIZE") {
            settings.library_max_size =
                raw.trim().parse().map_err(|_| StorageError::Config {
                    reason: format!("SPC_LIBRARY_MAX_SIZE must be a byte count, got '{raw}'"),
                })?;
        } else if let Some(size) = file.library_max_size {
            settings.library_max_size = size;
        }
        if let Some(blocklist) = file.blocklist {
            settings.blocklist = blocklist;
        }
        Ok(settings)
    }
}

fn read_file_settings(path: &Path) -> Result<FileSettings> {
    let contents =
        fs::read_to_string(path).map_err(|source| StorageError::io("read", path, source))?;
    toml_edit::de::from_str(&contents).map_err(|err| StorageError::Config {
        reason: format!("{}: {err}", path.display()),
    })
}
