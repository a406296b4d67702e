use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, warn};

use super::{backend_for, process, OutputMode, Verb, VersionControlBackend};
use crate::core::{
    config::{StderrPolicy, StorageSettings},
    errors::{RepoError, Result, StorageError},
};

/// Classified result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exit code of a verb that reports by status.
    Code(i32),
    /// Captured stdout of a verb that reports by text.
    Output(String),
    /// The tool wrote to stderr and the policy says that is the answer.
    Diagnostic { code: i32, text: String },
}

impl CommandOutcome {
    pub fn code(&self) -> i32 {
        match self {
            Self::Code(code) | Self::Diagnostic { code, .. } => *code,
            Self::Output(_) => 0,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Code(0) | Self::Output(_))
    }
}

/// Runs allow-listed verbs against one backend's executable.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    backend: Arc<dyn VersionControlBackend>,
    executable: PathBuf,
    policy: StderrPolicy,
}

impl CommandRunner {
    /// Resolve the executable now so a missing tool fails before any work.
    pub fn new(
        backend: Arc<dyn VersionControlBackend>,
        executable: Option<&Path>,
        policy: StderrPolicy,
    ) -> Result<Self> {
        let executable = resolve_executable(backend.as_ref(), executable)?;
        debug!(
            backend = backend.name(),
            executable = %executable.display(),
            ?policy,
            "resolved version control executable"
        );
        Ok(Self {
            backend,
            executable,
            policy,
        })
    }

    pub fn from_settings(settings: &StorageSettings) -> Result<Self> {
        let backend = backend_for(settings.backend)?;
        Self::new(
            backend,
            settings.executable.as_deref(),
            settings.stderr_policy,
        )
    }

    pub fn backend(&self) -> &dyn VersionControlBackend {
        self.backend.as_ref()
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn policy(&self) -> StderrPolicy {
        self.policy
    }

    pub fn run(&self, verb: Verb, args: &[String], working_dir: &Path) -> Result<CommandOutcome> {
        self.run_with_env(verb, args, &[], working_dir)
    }

    pub fn run_with_env(
        &self,
        verb: Verb,
        args: &[String],
        extra_env: &[(String, String)],
        working_dir: &Path,
    ) -> Result<CommandOutcome> {
        if !working_dir.is_dir() {
            return Err(RepoError::new(format!(
                "working directory {} does not exist",
                working_dir.display()
            ))
            .for_verb(verb)
            .into());
        }
        let spec = self.backend.spec(verb);
        let mut argv: Vec<String> = spec.command.iter().map(|s| (*s).to_string()).collect();
        argv.extend(args.iter().cloned());
        let mut env = self.backend.base_env();
        env.extend(extra_env.iter().cloned());

        debug!(
            backend = self.backend.name(),
            %verb,
            cwd = %working_dir.display(),
            args = ?argv,
            "running version control command"
        );
        let output = process::run_command(&self.executable, &argv, &env, working_dir).map_err(
            |err| {
                if err.kind() == io::ErrorKind::NotFound {
                    StorageError::ToolNotFound {
                        tool: self.executable.display().to_string(),
                        detail: err.to_string(),
                    }
                } else {
                    StorageError::io("run", &self.executable, err)
                }
            },
        )?;
        let outcome = self.classify(verb, spec.output, output);
        debug!(%verb, code = outcome.code(), "version control command finished");
        Ok(outcome)
    }

    fn classify(
        &self,
        verb: Verb,
        mode: OutputMode,
        output: process::RunOutput,
    ) -> CommandOutcome {
        let has_stderr = !output.stderr.trim().is_empty();
        match self.policy {
            StderrPolicy::Legacy if has_stderr => {
                if output.code == 0 {
                    let stderr = output.stderr.trim();
                    warn!(%verb, stderr, "treating stderr as the command result");
                }
                return CommandOutcome::Diagnostic {
                    code: output.code,
                    text: output.stderr,
                };
            }
            StderrPolicy::ExitCode if has_stderr && output.code != 0 => {
                return CommandOutcome::Diagnostic {
                    code: output.code,
                    text: output.stderr,
                };
            }
            StderrPolicy::ExitCode if has_stderr => {
                let stderr = output.stderr.trim();
                debug!(%verb, stderr, "ignoring stderr from successful command");
            }
            _ => {}
        }
        match (mode, output.code) {
            (OutputMode::Stdout, 0) => CommandOutcome::Output(output.stdout),
            (_, code) => CommandOutcome::Code(code),
        }
    }
}

fn resolve_executable(
    backend: &dyn VersionControlBackend,
    configured: Option<&Path>,
) -> Result<PathBuf> {
    let candidate = configured.unwrap_or_else(|| Path::new(backend.default_executable()));
    if candidate.components().count() > 1 {
        if candidate.is_file() {
            return Ok(candidate.to_path_buf());
        }
        return Err(StorageError::ToolNotFound {
            tool: candidate.display().to_string(),
            detail: "configured path does not exist".to_string(),
        });
    }
    which::which(candidate).map_err(|err| StorageError::ToolNotFound {
        tool: candidate.display().to_string(),
        detail: err.to_string(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::vcs::Mercurial;

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    // `sh <verb> ...` runs the script named after the hg sub-command, so the
    // fake tool needs no executable bit.
    fn fake_tool(dir: &Path) -> io::Result<()> {
        fs::write(
            dir.join("summary"),
            format!("echo 'parent: 0:{HASH} tip'\necho 'warning: noisy extension' >&2\nexit 0\n"),
        )?;
        fs::write(dir.join("commit"), "echo 'nothing changed'\nexit 1\n")?;
        fs::write(
            dir.join("update"),
            "echo 'abort: untracked file differs' >&2\nexit 1\n",
        )?;
        fs::write(dir.join("heads"), "exit 0\n")?;
        Ok(())
    }

    fn runner(policy: StderrPolicy) -> Result<CommandRunner> {
        CommandRunner::new(Arc::new(Mercurial), Some(Path::new("/bin/sh")), policy)
    }

    #[test]
    fn exit_code_policy_ignores_stderr_on_success() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fake_tool(temp.path())?;
        let runner = runner(StderrPolicy::ExitCode)?;

        let outcome = runner.run(Verb::Summary, &[], temp.path())?;
        assert_eq!(outcome, CommandOutcome::Output(format!("parent: 0:{HASH} tip\n")));

        let outcome = runner.run(Verb::Commit, &[], temp.path())?;
        assert_eq!(outcome, CommandOutcome::Code(1));

        let outcome = runner.run(Verb::Checkout, &[], temp.path())?;
        assert!(matches!(outcome, CommandOutcome::Diagnostic { code: 1, .. }));
        Ok(())
    }

    #[test]
    fn legacy_policy_returns_any_stderr_verbatim() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        fake_tool(temp.path())?;
        let runner = runner(StderrPolicy::Legacy)?;

        let outcome = runner.run(Verb::Summary, &[], temp.path())?;
        assert_eq!(
            outcome,
            CommandOutcome::Diagnostic {
                code: 0,
                text: "warning: noisy extension\n".to_string()
            }
        );
        assert!(!outcome.is_success());

        let outcome = runner.run(Verb::Heads, &[], temp.path())?;
        assert_eq!(outcome, CommandOutcome::Output(String::new()));
        Ok(())
    }

    #[test]
    fn missing_executable_is_tool_not_found() {
        let err = CommandRunner::new(
            Arc::new(Mercurial),
            Some(Path::new("/nonexistent/bin/hg")),
            StderrPolicy::ExitCode,
        )
        .unwrap_err();
        assert!(matches!(err, StorageError::ToolNotFound { .. }));

        let err = CommandRunner::new(
            Arc::new(Mercurial),
            Some(Path::new("spc-definitely-not-installed")),
            StderrPolicy::ExitCode,
        )
        .unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn missing_working_dir_is_a_repo_error() -> anyhow::Result<()> {
        let runner = runner(StderrPolicy::ExitCode)?;
        let err = runner
            .run(Verb::Init, &[], Path::new("/nonexistent/spc/repo"))
            .unwrap_err();
        assert!(matches!(err, StorageError::Repo(_)));
        Ok(())
    }
}
