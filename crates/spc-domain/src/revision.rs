use std::{
    fs::File,
    io::{self, Cursor, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::{license::License, slug};

const COPY_CHUNK_BYTES: usize = 64 * 1024;

/// The acting user, as far as storage cares about them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRef {
    pub id: u64,
    pub username: String,
    /// Site-relative profile URL (e.g. `/user/42/`), used as copyright holder.
    pub profile_url: String,
}

impl UserRef {
    #[must_use]
    pub fn new(id: u64, username: impl Into<String>) -> Self {
        let username = username.into();
        Self {
            id,
            profile_url: format!("/user/{id}/"),
            username,
        }
    }
}

/// Where the bytes of an uploaded archive currently live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// Small uploads held in memory.
    Memory(Vec<u8>),
    /// Large uploads spooled to a temporary file by the web layer.
    File(PathBuf),
}

/// A ZIP archive uploaded with a package revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageUpload {
    pub name: String,
    pub source: PackageSource,
}

impl PackageUpload {
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            source: PackageSource::Memory(bytes),
        }
    }

    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map_or_else(|| "package.zip".to_string(), |n| n.to_string_lossy().into_owned());
        Self {
            name,
            source: PackageSource::File(path),
        }
    }

    /// Size of the uploaded archive in bytes.
    pub fn size(&self) -> io::Result<u64> {
        match &self.source {
            PackageSource::Memory(bytes) => Ok(bytes.len() as u64),
            PackageSource::File(path) => Ok(std::fs::metadata(path)?.len()),
        }
    }

    pub fn open(&self) -> io::Result<PackageReader<'_>> {
        match &self.source {
            PackageSource::Memory(bytes) => Ok(PackageReader::Memory(Cursor::new(bytes))),
            PackageSource::File(path) => Ok(PackageReader::File(File::open(path)?)),
        }
    }

    /// Stream the upload to `dest` in fixed-size chunks.
    pub fn copy_to(&self, dest: &Path) -> io::Result<u64> {
        let mut reader = self.open()?;
        let mut out = File::create(dest)?;
        let mut chunk = vec![0_u8; COPY_CHUNK_BYTES];
        let mut written = 0_u64;
        loop {
            let read = reader.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            io::Write::write_all(&mut out, &chunk[..read])?;
            written += read as u64;
        }
        out.sync_all()?;
        Ok(written)
    }
}

pub enum PackageReader<'a> {
    Memory(Cursor<&'a Vec<u8>>),
    File(File),
}

impl Read for PackageReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Memory(cursor) => cursor.read(buf),
            Self::File(file) => file.read(buf),
        }
    }
}

impl Seek for PackageReader<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Memory(cursor) => cursor.seek(pos),
            Self::File(file) => file.seek(pos),
        }
    }
}

/// Type-specific payload of a revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevisionContent {
    Snippet { code: String },
    /// The upload is only present while the revision is being stored.
    Package { upload: Option<PackageUpload> },
    Link { url: String },
}

/// One immutable version of a submission's content and metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub license: License,
    pub tags: Vec<String>,
    pub created_by: UserRef,
    pub content: RevisionContent,
    pub(crate) hash_id: Option<String>,
}

impl Revision {
    #[must_use]
    pub fn new(
        id: u64,
        title: impl Into<String>,
        license: License,
        created_by: UserRef,
        content: RevisionContent,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            description: String::new(),
            license,
            tags: Vec::new(),
            created_by,
            content,
            hash_id: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn slug(&self) -> String {
        slug::slugify(&self.title)
    }

    #[must_use]
    pub fn snippet_file_name(&self) -> String {
        slug::snippet_file_name(&self.title)
    }

    /// Revision identifier produced by the commit that stored this revision.
    #[must_use]
    pub fn hash_id(&self) -> Option<&str> {
        self.hash_id.as_deref()
    }

    #[must_use]
    pub fn package_upload(&self) -> Option<&PackageUpload> {
        match &self.content {
            RevisionContent::Package { upload } => upload.as_ref(),
            _ => None,
        }
    }
}
