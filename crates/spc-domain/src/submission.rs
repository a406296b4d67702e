use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::{fileset::FileSet, revision::Revision, revision::UserRef};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("submission {submission} is frozen; no further revisions are accepted")]
    Frozen { submission: u64 },
    #[error("revision {revision} of a {kind} submission {expectation}")]
    HashInvariant {
        revision: u64,
        kind: SubmissionKind,
        expectation: &'static str,
    },
    #[error("revision {revision} does not follow revision {previous}")]
    OutOfOrder { revision: u64, previous: u64 },
    #[error("unknown submission type '{0}' (expected snippet, package or link)")]
    UnknownKind(String),
}

/// Closed set of submission types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionKind {
    Snippet,
    Package,
    Link,
}

impl SubmissionKind {
    /// Whether revisions of this kind are stored in a repository.
    #[must_use]
    pub fn requires_storage(self) -> bool {
        match self {
            Self::Snippet | Self::Package => true,
            Self::Link => false,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Snippet => "snippet",
            Self::Package => "package",
            Self::Link => "link",
        }
    }
}

impl fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "snippet" => Ok(Self::Snippet),
            "package" => Ok(Self::Package),
            "link" => Ok(Self::Link),
            other => Err(DomainError::UnknownKind(other.to_string())),
        }
    }
}

/// A community-contributed item and its revision history.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: u64,
    kind: SubmissionKind,
    created_by: UserRef,
    pub fileset: Option<FileSet>,
    revisions: Vec<Revision>,
    pub downloads: u64,
    pub pageviews: u64,
    pub is_displayed: bool,
    pub frozen: bool,
}

impl Submission {
    #[must_use]
    pub fn new(id: u64, kind: SubmissionKind, created_by: UserRef) -> Self {
        Self {
            id,
            kind,
            created_by,
            fileset: None,
            revisions: Vec::new(),
            downloads: 0,
            pageviews: 0,
            is_displayed: false,
            frozen: false,
        }
    }

    #[must_use]
    pub fn kind(&self) -> SubmissionKind {
        self.kind
    }

    #[must_use]
    pub fn created_by(&self) -> &UserRef {
        &self.created_by
    }

    #[must_use]
    pub fn revisions(&self) -> &[Revision] {
        &self.revisions
    }

    #[must_use]
    pub fn num_revisions(&self) -> usize {
        self.revisions.len()
    }

    #[must_use]
    pub fn last_revision(&self) -> Option<&Revision> {
        self.revisions.last()
    }

    /// Hash of the most recent stored revision, if any.
    #[must_use]
    pub fn latest_hash(&self) -> Option<&str> {
        self.last_revision().and_then(Revision::hash_id)
    }

    /// Zero-based position of `revision` in this submission's history.
    #[must_use]
    pub fn revision_index(&self, revision_id: u64) -> Option<usize> {
        self.revisions.iter().position(|rev| rev.id == revision_id)
    }

    #[must_use]
    pub fn slug(&self) -> Option<String> {
        self.last_revision().map(Revision::slug)
    }

    /// Append a revision after its content has been stored.
    ///
    /// `hash_id` must be present exactly when the submission kind is backed by
    /// a repository.
    pub fn push_revision(
        &mut self,
        mut revision: Revision,
        hash_id: Option<String>,
    ) -> Result<&Revision, DomainError> {
        if self.frozen {
            return Err(DomainError::Frozen {
                submission: self.id,
            });
        }
        match (self.kind.requires_storage(), hash_id.is_some()) {
            (true, false) => {
                return Err(DomainError::HashInvariant {
                    revision: revision.id,
                    kind: self.kind,
                    expectation: "requires a stored hash",
                })
            }
            (false, true) => {
                return Err(DomainError::HashInvariant {
                    revision: revision.id,
                    kind: self.kind,
                    expectation: "must not carry a hash",
                })
            }
            _ => {}
        }
        if let Some(previous) = self.last_revision() {
            if revision.id <= previous.id {
                return Err(DomainError::OutOfOrder {
                    revision: revision.id,
                    previous: previous.id,
                });
            }
        }
        // the upload only matters while storing
        if let crate::RevisionContent::Package { upload } = &mut revision.content {
            *upload = None;
        }
        revision.hash_id = hash_id;
        self.revisions.push(revision);
        Ok(&self.revisions[self.revisions.len() - 1])
    }

    pub fn record_download(&mut self) {
        self.downloads += 1;
    }

    pub fn record_pageview(&mut self) {
        self.pageviews += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{License, RevisionContent};

    fn snippet_revision(id: u64) -> Revision {
        Revision::new(
            id,
            "Draw an ellipse",
            License::builtin("cc0").expect("cc0"),
            UserRef::new(7, "ada"),
            RevisionContent::Snippet {
                code: "print('hi')".into(),
            },
        )
    }

    #[test]
    fn kinds_parse_and_report_storage_needs() {
        assert_eq!("Snippet".parse::<SubmissionKind>(), Ok(SubmissionKind::Snippet));
        assert_eq!("link".parse::<SubmissionKind>(), Ok(SubmissionKind::Link));
        assert!(matches!(
            "gist".parse::<SubmissionKind>(),
            Err(DomainError::UnknownKind(_))
        ));
        assert!(SubmissionKind::Package.requires_storage());
        assert!(!SubmissionKind::Link.requires_storage());
    }

    #[test]
    fn storage_backed_revisions_require_a_hash() {
        let mut sub = Submission::new(1, SubmissionKind::Snippet, UserRef::new(7, "ada"));
        let err = sub.push_revision(snippet_revision(1), None).unwrap_err();
        assert!(matches!(err, DomainError::HashInvariant { .. }));

        let hash = "a".repeat(40);
        sub.push_revision(snippet_revision(1), Some(hash.clone()))
            .expect("push");
        assert_eq!(sub.latest_hash(), Some(hash.as_str()));
        assert_eq!(sub.num_revisions(), 1);
    }

    #[test]
    fn link_revisions_never_carry_a_hash() {
        let mut sub = Submission::new(2, SubmissionKind::Link, UserRef::new(7, "ada"));
        let rev = Revision::new(
            4,
            "Docs",
            License::builtin("cc0").expect("cc0"),
            UserRef::new(7, "ada"),
            RevisionContent::Link {
                url: "https://example.org".into(),
            },
        );
        assert!(sub.push_revision(rev.clone(), Some("f".repeat(40))).is_err());
        sub.push_revision(rev, None).expect("link push");
        assert_eq!(sub.latest_hash(), None);
    }

    #[test]
    fn revisions_are_strictly_ordered_and_frozen_blocks_more() {
        let mut sub = Submission::new(3, SubmissionKind::Snippet, UserRef::new(7, "ada"));
        sub.push_revision(snippet_revision(5), Some("1".repeat(40)))
            .expect("first");
        let err = sub
            .push_revision(snippet_revision(5), Some("2".repeat(40)))
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::OutOfOrder {
                revision: 5,
                previous: 5
            }
        );
        sub.push_revision(snippet_revision(6), Some("2".repeat(40)))
            .expect("second");
        assert_eq!(sub.revision_index(6), Some(1));

        sub.frozen = true;
        let err = sub
            .push_revision(snippet_revision(9), Some("3".repeat(40)))
            .unwrap_err();
        assert_eq!(err, DomainError::Frozen { submission: 3 });
    }
}
