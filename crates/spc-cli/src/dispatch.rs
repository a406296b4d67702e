use std::{fs, path::Path};

use serde::Serialize;
use serde_json::{json, Value};
use spc_core::{
    EnvSnapshot, RepositoryStore, StorageError, StorageSettings, SubmissionStorage,
};
use spc_domain::{
    FileSet, License, PackageUpload, Revision, RevisionContent, Submission, SubmissionKind, UserRef,
};
use tracing::debug;

use crate::cli::{SpcCli, SpcCommand, StoreArgs, StoreCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub status: CommandStatus,
    pub message: String,
    pub details: Value,
}

impl ExecutionOutcome {
    pub fn success(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message: message.into(),
            details,
        }
    }

    pub fn user_error(message: impl Into<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::UserError,
            message: message.into(),
            details,
        }
    }

    /// Deployment problems are failures; everything else was the caller's input.
    pub fn from_error(err: &StorageError) -> Self {
        let status = if err.is_fatal() {
            CommandStatus::Failure
        } else {
            CommandStatus::UserError
        };
        Self {
            status,
            message: err.to_string(),
            details: err.details(),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.status {
            CommandStatus::Ok => 0,
            CommandStatus::UserError => 1,
            CommandStatus::Failure => 2,
        }
    }
}

pub fn execute(cli: &SpcCli) -> ExecutionOutcome {
    match run(cli) {
        Ok(outcome) => outcome,
        Err(err) => {
            debug!(code = err.code(), %err, "command failed");
            ExecutionOutcome::from_error(&err)
        }
    }
}

fn run(cli: &SpcCli) -> Result<ExecutionOutcome, StorageError> {
    let settings = load_settings(cli)?;
    match &cli.command {
        SpcCommand::Settings => {
            let details = serde_json::to_value(&settings).unwrap_or(Value::Null);
            Ok(ExecutionOutcome::success(
                format!(
                    "{} repositories under {}",
                    settings.backend,
                    settings.storage_dir.display()
                ),
                details,
            ))
        }
        SpcCommand::Store(StoreCommand::Snippet(args)) => {
            let store = RepositoryStore::new(settings)?;
            let code = read_input(&args.code_file)?;
            store_revision(
                &store,
                &args.common,
                SubmissionKind::Snippet,
                RevisionContent::Snippet { code },
            )
        }
        SpcCommand::Store(StoreCommand::Package(args)) => {
            let store = RepositoryStore::new(settings)?;
            let upload = PackageUpload::from_path(&args.zip);
            store_revision(
                &store,
                &args.common,
                SubmissionKind::Package,
                RevisionContent::Package {
                    upload: Some(upload),
                },
            )
        }
        SpcCommand::Revert(args) => {
            let store = RepositoryStore::new(settings)?;
            let fileset = bind_fileset(&store, &args.target.repo);
            let current = store.restore(&fileset, &args.hash)?;
            Ok(ExecutionOutcome::success(
                format!("reverted {fileset} to {current}"),
                json!({ "repo": repo_label(&fileset), "hash_id": current }),
            ))
        }
        SpcCommand::Checkout(args) => {
            let store = RepositoryStore::new(settings)?;
            let fileset = bind_fileset(&store, &args.target.repo);
            if store.checkout_revision(&fileset, &args.hash)? {
                Ok(ExecutionOutcome::success(
                    format!("checked out {} in {fileset}", args.hash),
                    json!({ "repo": repo_label(&fileset), "hash_id": args.hash }),
                ))
            } else {
                Ok(ExecutionOutcome::user_error(
                    format!("revision {} could not be checked out", args.hash),
                    json!({
                        "code": "SPC500",
                        "reason": "revision_not_available",
                        "repo": repo_label(&fileset),
                        "hash_id": args.hash,
                    }),
                ))
            }
        }
        SpcCommand::Ls(args) => {
            let store = RepositoryStore::new(settings)?;
            let fileset = bind_fileset(&store, &args.target.repo);
            let files = match &args.hash {
                Some(hash) => store.list_files_at(&bound_submission(fileset.clone()), hash)?,
                None => store.list_current_files(&fileset)?,
            };
            Ok(ExecutionOutcome::success(
                files.join("\n"),
                json!({ "repo": repo_label(&fileset), "files": files, "passthrough": true }),
            ))
        }
        SpcCommand::Tree(args) => {
            let store = RepositoryStore::new(settings)?;
            let fileset = bind_fileset(&store, &args.repo);
            let tree = store.file_tree(&fileset)?;
            let rendered = serde_json::to_string_pretty(&tree).unwrap_or_default();
            Ok(ExecutionOutcome::success(
                rendered,
                json!({ "repo": repo_label(&fileset), "tree": tree, "passthrough": true }),
            ))
        }
        SpcCommand::Export(args) => {
            let store = RepositoryStore::new(settings)?;
            let fileset = bind_fileset(&store, &args.revision.target.repo);
            let submission = bound_submission(fileset.clone());
            let files =
                store.build_download_archive(&submission, &args.revision.hash, &args.out)?;
            Ok(ExecutionOutcome::success(
                format!("wrote {} file(s) to {}", files.len(), args.out.display()),
                json!({
                    "repo": repo_label(&fileset),
                    "hash_id": args.revision.hash,
                    "archive": args.out.display().to_string(),
                    "files": files,
                }),
            ))
        }
    }
}

fn load_settings(cli: &SpcCli) -> Result<StorageSettings, StorageError> {
    let mut snapshot = EnvSnapshot::capture();
    if let Some(dir) = &cli.storage_dir {
        snapshot = snapshot.with_override("SPC_STORAGE_DIR", dir.display().to_string());
    }
    if let Some(backend) = &cli.backend {
        snapshot = snapshot.with_override("SPC_VCS_BACKEND", backend.as_str());
    }
    match &cli.config {
        Some(path) => StorageSettings::load(path, &snapshot),
        None => StorageSettings::from_snapshot(&snapshot),
    }
}

fn store_revision(
    store: &RepositoryStore,
    args: &StoreArgs,
    kind: SubmissionKind,
    content: RevisionContent,
) -> Result<ExecutionOutcome, StorageError> {
    let user = UserRef::new(args.user_id, args.username.as_str());
    let license = License::builtin(&args.license).unwrap_or_else(|| {
        License::new(args.license.as_str(), args.license.as_str(), "", "")
    });
    let revision = Revision::new(
        args.revision_id,
        args.title.as_str(),
        license,
        user.clone(),
        content,
    )
    .with_description(args.description.as_str());
    let mut submission = Submission::new(args.submission_id, kind, user);

    if let Some(repo) = &args.repo {
        submission.fileset = Some(bind_fileset(store, repo));
    }
    let is_new = submission.fileset.is_none();
    let hash = SubmissionStorage::new(store, &mut submission, &revision, is_new).store_or_revert()?;

    let repo = submission.fileset.as_ref().map(repo_label);
    Ok(ExecutionOutcome::success(
        format!("stored revision {} as {hash}", revision.id),
        json!({
            "hash_id": hash,
            "repo": repo,
            "kind": kind.as_str(),
            "new": is_new,
        }),
    ))
}

fn bind_fileset(store: &RepositoryStore, repo: &Path) -> FileSet {
    FileSet::new(repo, store.now())
}

// Read paths only need the submission for its fileset; with no stored
// hashes a scoped checkout returns the tree to where it was.
fn bound_submission(fileset: FileSet) -> Submission {
    let mut submission = Submission::new(0, SubmissionKind::Package, UserRef::new(0, "spc"));
    submission.fileset = Some(fileset);
    submission
}

fn repo_label(fileset: &FileSet) -> String {
    fileset.repo_path().display().to_string()
}

fn read_input(path: &Path) -> Result<String, StorageError> {
    fs::read_to_string(path).map_err(|source| StorageError::Io {
        action: "read",
        path: path.to_path_buf(),
        source,
    })
}
