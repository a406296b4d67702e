use std::{fs, io, path::Path};

use super::{is_full_hash, OutputMode, Verb, VerbSpec, VersionControlBackend};

const NO_ERRORS: &[(i32, &str)] = &[];
const BRANCH: &str = "main";
const REMOTE: &str = "origin";
const DEFAULT_IDENTITY: &str = "spc";

/// Git working trees on a single `main` branch.
///
/// `pull` merges as part of fetching, so a pulled repository always reports
/// a single head.
#[derive(Debug, Clone, Copy, Default)]
pub struct Git;

fn identity_env(name: &str) -> Vec<(String, String)> {
    let email = format!(
        "{}@localhost",
        name.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect::<String>()
    );
    vec![
        ("GIT_AUTHOR_NAME".to_string(), name.to_string()),
        ("GIT_AUTHOR_EMAIL".to_string(), email.clone()),
        ("GIT_COMMITTER_NAME".to_string(), name.to_string()),
        ("GIT_COMMITTER_EMAIL".to_string(), email),
    ]
}

impl VersionControlBackend for Git {
    fn name(&self) -> &'static str {
        "git"
    }

    fn default_executable(&self) -> &'static str {
        "git"
    }

    fn metadata_dir(&self) -> &'static str {
        ".git"
    }

    fn latest_alias(&self) -> &'static str {
        BRANCH
    }

    fn spec(&self, verb: Verb) -> VerbSpec {
        use OutputMode::{ExitCode, Stdout};
        match verb {
            Verb::Pull => VerbSpec::new(
                &["pull", "-q", "--no-rebase", "--no-edit", REMOTE, BRANCH],
                ExitCode,
                &[(1, "Conflicts during merge")],
            ),
            Verb::Checkout => {
                VerbSpec::new(&["checkout", "-q"], ExitCode, &[(1, "Unresolved files.")])
            }
            Verb::Merge => VerbSpec::new(
                &["merge", "-q", "--no-edit"],
                ExitCode,
                &[(1, "Conflicts during merge")],
            ),
            Verb::Clone => VerbSpec::new(&["clone", "-q"], ExitCode, NO_ERRORS),
            Verb::Init => VerbSpec::new(&["init", "-q", "-b", BRANCH], ExitCode, NO_ERRORS),
            Verb::Add => VerbSpec::new(&["add", "--"], ExitCode, NO_ERRORS),
            Verb::AddRemove => VerbSpec::new(&["add", "-A"], ExitCode, NO_ERRORS),
            Verb::Heads => VerbSpec::new(&["rev-parse", "HEAD"], Stdout, NO_ERRORS),
            Verb::Commit => VerbSpec::new(
                &["-c", "commit.gpgsign=false", "commit", "-q"],
                ExitCode,
                &[(1, "Nothing changed")],
            ),
            Verb::Push => VerbSpec::new(&["push", "-q", REMOTE, BRANCH], ExitCode, NO_ERRORS),
            Verb::Summary => VerbSpec::new(&["rev-parse", "HEAD"], Stdout, NO_ERRORS),
            Verb::Purge => VerbSpec::new(&["clean", "-q", "-f", "-d", "-x"], ExitCode, NO_ERRORS),
            Verb::Reset => VerbSpec::new(
                &["checkout", "-q", "-f", "-B", BRANCH],
                ExitCode,
                &[(1, "Unresolved files.")],
            ),
        }
    }

    fn base_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()),
            ("GIT_CONFIG_NOSYSTEM".to_string(), "1".to_string()),
            ("LC_ALL".to_string(), "C".to_string()),
        ];
        env.extend(identity_env(DEFAULT_IDENTITY));
        env
    }

    fn commit_args(&self, message: &str, _user: &str) -> Vec<String> {
        vec!["-m".to_string(), message.to_string()]
    }

    fn author_env(&self, user: &str) -> Vec<(String, String)> {
        identity_env(user)
    }

    fn parse_revision_id(&self, output: &str) -> Option<String> {
        let first = output.lines().next()?.trim();
        is_full_hash(first).then(|| first.to_ascii_lowercase())
    }

    fn read_remote(&self, repo_dir: &Path) -> Option<String> {
        let config = fs::read_to_string(repo_dir.join(".git").join("config")).ok()?;
        let section = format!("[remote \"{REMOTE}\"]");
        let mut in_remote = false;
        for line in config.lines() {
            let line = line.trim();
            if line.starts_with('[') {
                in_remote = line == section;
                continue;
            }
            if !in_remote {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == "url" && !value.trim().is_empty() {
                    return Some(value.trim().to_string());
                }
            }
        }
        None
    }

    fn write_remote(&self, repo_dir: &Path, location: &str) -> io::Result<()> {
        let path = repo_dir.join(".git").join("config");
        let existing = fs::read_to_string(&path)?;
        let section = format!("[remote \"{REMOTE}\"]");
        let mut out = String::new();
        let mut skipping = false;
        for line in existing.lines() {
            let trimmed = line.trim();
            if trimmed.starts_with('[') {
                skipping = trimmed == section;
            }
            if !skipping {
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push_str(&format!(
            "{section}\n\turl = {location}\n\tfetch = +refs/heads/*:refs/remotes/{REMOTE}/*\n"
        ));
        fs::write(path, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rev_parse_output_is_the_id() {
        let id = "5A0C1E2B9F6D4C3A2B1E0F9D8C7B6A5F4E3D2C1B";
        assert_eq!(
            Git.parse_revision_id(&format!("{id}\n")).as_deref(),
            Some(id.to_ascii_lowercase().as_str())
        );
        assert_eq!(Git.parse_revision_id("HEAD\n"), None);
    }

    #[test]
    fn author_identity_is_sanitized_into_an_email() {
        let env = Git.author_env("http://scpyce.org/user/4/");
        assert!(env.contains(&(
            "GIT_AUTHOR_NAME".to_string(),
            "http://scpyce.org/user/4/".to_string()
        )));
        let email = env
            .iter()
            .find(|(k, _)| k == "GIT_COMMITTER_EMAIL")
            .map(|(_, v)| v.as_str());
        assert_eq!(email, Some("http___scpyce.org_user_4_@localhost"));
    }

    #[test]
    fn remote_section_is_replaced() -> io::Result<()> {
        let temp = tempfile::tempdir()?;
        fs::create_dir(temp.path().join(".git"))?;
        fs::write(
            temp.path().join(".git/config"),
            "[core]\n\tbare = false\n[remote \"origin\"]\n\turl = /old\n",
        )?;
        Git.write_remote(temp.path(), "/srv/upstream.git")?;
        assert_eq!(
            Git.read_remote(temp.path()).as_deref(),
            Some("/srv/upstream.git")
        );
        let config = fs::read_to_string(temp.path().join(".git/config"))?;
        assert!(config.contains("bare = false"));
        assert!(!config.contains("/old"));
        Ok(())
    }
}
