use std::{fmt, io, path::PathBuf};

use serde_json::{json, Value};

use crate::core::vcs::Verb;

/// A version-control operation failed or produced output we could not use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoError {
    pub verb: Option<Verb>,
    pub message: String,
    /// Exit code reported by the tool, when there was one.
    pub code: Option<i32>,
    /// Reason looked up in the verb's error table for `code`.
    pub reason: Option<&'static str>,
    /// First line of the tool's own diagnostic text.
    pub diagnostic: Option<String>,
}

impl RepoError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            verb: None,
            message: message.into(),
            code: None,
            reason: None,
            diagnostic: None,
        }
    }

    #[must_use]
    pub fn for_verb(mut self, verb: Verb) -> Self {
        self.verb = Some(verb);
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: i32, reason: Option<&'static str>) -> Self {
        self.code = Some(code);
        self.reason = reason;
        self
    }

    #[must_use]
    pub fn with_diagnostic(mut self, text: &str) -> Self {
        let first = text
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or_default();
        if !first.is_empty() {
            self.diagnostic = Some(first.to_string());
        }
        self
    }
}

impl fmt::Display for RepoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(reason) = self.reason {
            write!(f, " ({reason})")?;
        }
        if let Some(diagnostic) = &self.diagnostic {
            write!(f, "; additional info = {diagnostic}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RepoError {}

/// Everything that can go wrong while storing or reading submissions.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("version control executable '{tool}' was not found: {detail}")]
    ToolNotFound { tool: String, detail: String },
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("{slug} license is not yet implemented")]
    UnsupportedLicense { slug: String },
    #[error("invalid package upload: {reason}")]
    InvalidPackage { reason: String },
    #[error("{message}")]
    TypeMismatch { message: String },
    #[error("submission {submission} is frozen; no further revisions can be stored")]
    Frozen { submission: u64 },
    #[error("the {name} revisioning backend is not implemented yet")]
    UnsupportedBackend { name: String },
    #[error("revision {hash} is not available: {reason}")]
    NotAvailable { hash: String, reason: String },
    #[error("invalid storage configuration: {reason}")]
    Config { reason: String },
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to process ZIP archive: {0}")]
    Archive(#[from] zip::result::ZipError),
}

pub type Result<T, E = StorageError> = std::result::Result<T, E>;

impl StorageError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn type_mismatch(message: impl Into<String>) -> Self {
        Self::TypeMismatch {
            message: message.into(),
        }
    }

    /// Whether the caller should treat this as a deployment problem rather
    /// than a rejected submission.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ToolNotFound { .. }
                | Self::UnsupportedBackend { .. }
                | Self::Config { .. }
                | Self::TypeMismatch { .. }
        )
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ToolNotFound { .. } => "SPC100",
            Self::Repo(_) => "SPC200",
            Self::UnsupportedLicense { .. } => "SPC300",
            Self::InvalidPackage { .. } => "SPC310",
            Self::TypeMismatch { .. } => "SPC400",
            Self::UnsupportedBackend { .. } => "SPC401",
            Self::Frozen { .. } => "SPC410",
            Self::NotAvailable { .. } => "SPC500",
            Self::Config { .. } => "SPC600",
            Self::Io { .. } | Self::Archive(_) => "SPC900",
        }
    }

    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ToolNotFound { .. } => "vcs_tool_not_found",
            Self::Repo(_) => "repository_error",
            Self::UnsupportedLicense { .. } => "unsupported_license",
            Self::InvalidPackage { .. } => "invalid_package",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::UnsupportedBackend { .. } => "unsupported_backend",
            Self::Frozen { .. } => "submission_frozen",
            Self::NotAvailable { .. } => "revision_not_available",
            Self::Config { .. } => "invalid_config",
            Self::Io { .. } => "io_error",
            Self::Archive(_) => "archive_error",
        }
    }

    #[must_use]
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ToolNotFound { .. } => Some(
                "Install the version control tool or set SPC_VCS_EXECUTABLE to its full path.",
            ),
            Self::UnsupportedLicense { .. } => Some("Choose the cc0 or bsd license."),
            Self::InvalidPackage { .. } => {
                Some("Upload a valid ZIP file within the configured size limit.")
            }
            Self::UnsupportedBackend { .. } => Some("Set SPC_VCS_BACKEND to 'hg' or 'git'."),
            Self::Repo(_) => Some("Check the tool diagnostic; the submission was not stored."),
            Self::NotAvailable { .. } => Some("This error has been logged; try again later."),
            _ => None,
        }
    }

    #[must_use]
    pub fn details(&self) -> Value {
        let mut details = json!({
            "code": self.code(),
            "reason": self.reason(),
        });
        if let Value::Object(map) = &mut details {
            if let Some(hint) = self.hint() {
                map.insert("hint".into(), json!(hint));
            }
            match self {
                Self::ToolNotFound { tool, detail } => {
                    map.insert("tool".into(), json!(tool));
                    map.insert("detail".into(), json!(detail));
                }
                Self::Repo(err) => {
                    if let Some(verb) = err.verb {
                        map.insert("verb".into(), json!(verb.as_str()));
                    }
                    if let Some(code) = err.code {
                        map.insert("exit_code".into(), json!(code));
                    }
                    if let Some(diagnostic) = &err.diagnostic {
                        map.insert("diagnostic".into(), json!(diagnostic));
                    }
                }
                Self::UnsupportedLicense { slug } => {
                    map.insert("license".into(), json!(slug));
                }
                Self::UnsupportedBackend { name } => {
                    map.insert("backend".into(), json!(name));
                }
                Self::NotAvailable { hash, .. } => {
                    map.insert("hash_id".into(), json!(hash));
                }
                Self::Frozen { submission } => {
                    map.insert("submission".into(), json!(submission));
                }
                Self::Io { path, .. } => {
                    map.insert("path".into(), json!(path.display().to_string()));
                }
                Self::InvalidPackage { .. }
                | Self::TypeMismatch { .. }
                | Self::Config { .. }
                | Self::Archive(_) => {}
            }
        }
        details
    }
}
