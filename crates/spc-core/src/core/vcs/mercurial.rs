use std::{fs, io, path::Path};

use super::{is_full_hash, OutputMode, Verb, VerbSpec, VersionControlBackend};

const NO_ERRORS: &[(i32, &str)] = &[];

/// Mercurial, the backend every stored submission has used so far.
#[derive(Debug, Clone, Copy, Default)]
pub struct Mercurial;

impl VersionControlBackend for Mercurial {
    fn name(&self) -> &'static str {
        "hg"
    }

    fn default_executable(&self) -> &'static str {
        "hg"
    }

    fn metadata_dir(&self) -> &'static str {
        ".hg"
    }

    fn latest_alias(&self) -> &'static str {
        "tip"
    }

    fn spec(&self, verb: Verb) -> VerbSpec {
        use OutputMode::{ExitCode, Stdout};
        match verb {
            Verb::Pull => VerbSpec::new(&["pull", "-u"], ExitCode, NO_ERRORS),
            Verb::Checkout => VerbSpec::new(&["update"], ExitCode, &[(1, "Unresolved files.")]),
            Verb::Merge => VerbSpec::new(
                &["merge"],
                ExitCode,
                &[(1, "Conflicts during merge"), (255, "Conflicts during merge")],
            ),
            Verb::Clone => VerbSpec::new(&["clone"], ExitCode, NO_ERRORS),
            Verb::Init => VerbSpec::new(&["init"], ExitCode, NO_ERRORS),
            Verb::Add => VerbSpec::new(&["add"], ExitCode, NO_ERRORS),
            Verb::AddRemove => VerbSpec::new(&["addremove"], ExitCode, NO_ERRORS),
            Verb::Heads => VerbSpec::new(&["heads", "--template", "{node}\n"], Stdout, NO_ERRORS),
            Verb::Commit => VerbSpec::new(&["commit"], ExitCode, &[(1, "Nothing changed")]),
            Verb::Push => VerbSpec::new(&["push"], ExitCode, &[(1, "Nothing to push")]),
            Verb::Summary => VerbSpec::new(&["summary", "--debug"], Stdout, NO_ERRORS),
            Verb::Purge => VerbSpec::new(
                &["purge", "--all", "--config", "extensions.purge="],
                ExitCode,
                NO_ERRORS,
            ),
            Verb::Reset => VerbSpec::new(
                &["update", "--clean"],
                ExitCode,
                &[(1, "Unresolved files.")],
            ),
        }
    }

    fn base_env(&self) -> Vec<(String, String)> {
        vec![
            ("HGPLAIN".to_string(), "1".to_string()),
            ("HGENCODING".to_string(), "utf-8".to_string()),
        ]
    }

    fn commit_args(&self, message: &str, user: &str) -> Vec<String> {
        vec![
            "-m".to_string(),
            message.to_string(),
            "-u".to_string(),
            user.to_string(),
        ]
    }

    fn checkout_args(&self, revision: &str) -> Vec<String> {
        vec!["-r".to_string(), revision.to_string()]
    }

    fn reset_args(&self, revision: &str) -> Vec<String> {
        vec!["-r".to_string(), revision.to_string()]
    }

    /// First line reads `parent: <rev>:<node> [tags]`.
    fn parse_revision_id(&self, output: &str) -> Option<String> {
        let first = output.lines().next()?;
        let node = first.split(':').nth(2)?.split_whitespace().next()?;
        is_full_hash(node).then(|| node.to_ascii_lowercase())
    }

    fn read_remote(&self, repo_dir: &Path) -> Option<String> {
        let hgrc = fs::read_to_string(repo_dir.join(".hg").join("hgrc")).ok()?;
        let mut in_paths = false;
        for line in hgrc.lines() {
            let line = line.trim();
            if line.starts_with('[') {
                in_paths = line == "[paths]";
                continue;
            }
            if !in_paths {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == "default" && !value.trim().is_empty() {
                    return Some(value.trim().to_string());
                }
            }
        }
        None
    }

    fn write_remote(&self, repo_dir: &Path, location: &str) -> io::Result<()> {
        let path = repo_dir.join(".hg").join("hgrc");
        let existing = fs::read_to_string(&path).unwrap_or_default();
        let mut out = String::new();
        let mut skipping = false;
        for line in existing.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('[') {
                skipping = trimmed == "[paths]";
            }
            if !skipping {
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str(&format!("[paths]\ndefault = {location}\n"));
        fs::write(path, out)
    }
}
