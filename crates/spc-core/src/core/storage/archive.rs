use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::Path,
};

use serde::Serialize;
use sha2::{Digest, Sha256};
use spc_domain::PackageUpload;
use tracing::{debug, warn};
use zip::{write::FileOptions, CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::core::{
    errors::{Result, StorageError},
    fs::list_files,
};

/// What landed in the working tree from one uploaded archive.
#[derive(Debug, Clone, Serialize)]
pub struct Extraction {
    /// Root-relative `/`-separated paths of extracted files.
    pub files: Vec<String>,
    /// Entries dropped because their top-level directory is blocklisted.
    pub skipped: Vec<String>,
    pub sha256: String,
}

fn invalid(reason: impl Into<String>) -> StorageError {
    StorageError::InvalidPackage {
        reason: reason.into(),
    }
}

fn is_unsafe_name(name: &str) -> bool {
    name.starts_with('/')
        || name.starts_with('\\')
        || name
            .split(['/', '\\'])
            .any(|component| component == "..")
}

fn top_level(name: &str) -> &str {
    name.split('/').next().unwrap_or(name)
}

/// Check an upload before any repository work: it must be a readable ZIP,
/// every entry must stay inside the extraction root and pass its CRC check,
/// and neither the archive nor its uncompressed content may exceed
/// `max_size` bytes.
pub fn validate_package(upload: &PackageUpload, max_size: u64) -> Result<()> {
    let size = upload
        .size()
        .map_err(|source| StorageError::io("inspect", &upload.name, source))?;
    if size > max_size {
        return Err(invalid(format!(
            "{} is {size} bytes; the limit is {max_size} bytes",
            upload.name
        )));
    }
    let reader = upload
        .open()
        .map_err(|source| StorageError::io("open", &upload.name, source))?;
    let mut archive = ZipArchive::new(reader)
        .map_err(|err| invalid(format!("{} is not a valid ZIP file: {err}", upload.name)))?;
    let mut total = 0_u64;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| invalid(format!("unreadable entry #{index}: {err}")))?;
        let name = entry.name().to_string();
        if is_unsafe_name(&name) || entry.enclosed_name().is_none() {
            return Err(invalid(format!("entry '{name}' escapes the package root")));
        }
        total = total.saturating_add(entry.size());
        if total > max_size {
            return Err(invalid(format!(
                "uncompressed content exceeds the {max_size} byte limit"
            )));
        }
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| invalid(format!("entry '{name}' failed its CRC check: {err}")))?;
    }
    Ok(())
}

/// Extract the upload into `repo_dir` from a temporary copy kept outside it.
///
/// Entries whose top-level directory is in `blocklist` are skipped, as are
/// entries whose names would land outside `repo_dir`.
pub fn extract_package(
    upload: &PackageUpload,
    repo_dir: &Path,
    blocklist: &[String],
) -> Result<Extraction> {
    let staged = tempfile::NamedTempFile::new()
        .map_err(|e| StorageError::io("stage", &upload.name, e))?;
    upload
        .copy_to(staged.path())
        .map_err(|source| StorageError::io("copy upload to", staged.path(), source))?;
    let extraction = unpack(staged.path(), repo_dir, blocklist)?;
    debug!(
        repo = %repo_dir.display(),
        files = extraction.files.len(),
        skipped = extraction.skipped.len(),
        sha256 = %extraction.sha256,
        "extracted package upload"
    );
    Ok(extraction)
}

fn unpack(archive_path: &Path, dest: &Path, blocklist: &[String]) -> Result<Extraction> {
    let sha256 =
        compute_sha256(archive_path).map_err(|e| StorageError::io("hash", archive_path, e))?;
    let file = File::open(archive_path).map_err(|e| StorageError::io("open", archive_path, e))?;
    let mut archive = ZipArchive::new(file)?;
    let mut files = Vec::new();
    let mut skipped = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();
        if blocklist.iter().any(|blocked| blocked == top_level(&name)) {
            skipped.push(name);
            continue;
        }
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(entry = %name, "skipping archive entry outside the package root");
            skipped.push(name);
            continue;
        };
        let target = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| StorageError::io("create", &target, e))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| StorageError::io("create", parent, e))?;
        }
        let mut outfile =
            File::create(&target).map_err(|e| StorageError::io("create", &target, e))?;
        io::copy(&mut entry, &mut outfile).map_err(|e| StorageError::io("write", &target, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                // owner must keep write access or later purges fail
                fs::set_permissions(&target, fs::Permissions::from_mode((mode & 0o777) | 0o600))
                    .map_err(|e| StorageError::io("set permissions on", &target, e))?;
            }
        }
        files.push(crate::core::fs::relative_slash_path(&relative));
    }
    files.sort();
    Ok(Extraction {
        files,
        skipped,
        sha256,
    })
}

fn compute_sha256(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 32 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Write every file under `root` into a deflated ZIP at `dest`.
///
/// Entries are sorted, use root-relative `/` paths, and carry a fixed
/// timestamp and `0o644` permissions so the same tree always produces the
/// same bytes. Directories named in `skip_dirs` are left out. The archive is
/// staged next to `dest` and renamed into place.
pub fn write_tree_zip(root: &Path, dest: &Path, skip_dirs: &[String]) -> Result<Vec<String>> {
    let files = list_files(root, skip_dirs).map_err(|e| StorageError::io("walk", root, e))?;
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|e| StorageError::io("create", parent, e))?;
    let staged = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| StorageError::io("create temporary file in", parent, e))?;

    let mut zip = ZipWriter::new(staged.as_file());
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);
    for relative in &files {
        let source = root.join(relative);
        let data = fs::read(&source).map_err(|e| StorageError::io("read", &source, e))?;
        zip.start_file(relative.as_str(), options)?;
        zip.write_all(&data)
            .map_err(|e| StorageError::io("write", dest, e))?;
    }
    zip.finish()?;
    drop(zip);
    staged
        .persist(dest)
        .map_err(|err| StorageError::io("persist", dest, err.error))?;
    Ok(files)
}
