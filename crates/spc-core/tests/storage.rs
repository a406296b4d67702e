use std::{
    fs,
    io::{Cursor, Write},
    path::Path,
    process::Command,
};

use spc_core::{
    BackendKind, FixedClock, RepositoryStore, StorageError, StorageSettings, SubmissionStorage,
    Verb,
};
use spc_domain::{
    FileSet, License, PackageUpload, Revision, RevisionContent, Submission, SubmissionKind, UserRef,
};
use time::macros::datetime;
use zip::{write::FileOptions, CompressionMethod, ZipWriter};

fn tool_available(program: &str) -> bool {
    Command::new(program)
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn git_store(root: &Path) -> anyhow::Result<RepositoryStore> {
    let settings = StorageSettings::new(root).with_backend(BackendKind::Git);
    Ok(RepositoryStore::new(settings)?.with_clock(FixedClock(datetime!(2024-03-05 12:00 UTC))))
}

fn user() -> UserRef {
    UserRef::new(4, "ada")
}

fn snippet(id: u64, title: &str, code: &str) -> Revision {
    Revision::new(
        id,
        title,
        License::builtin("cc0").expect("cc0 license"),
        user(),
        RevisionContent::Snippet { code: code.into() },
    )
}

fn package(id: u64, entries: &[(&str, &str)]) -> anyhow::Result<Revision> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, body) in entries {
        writer.start_file(*name, options)?;
        writer.write_all(body.as_bytes())?;
    }
    let bytes = writer.finish()?.into_inner();
    Ok(Revision::new(
        id,
        "Fancy plots",
        License::builtin("bsd").expect("bsd license"),
        user(),
        RevisionContent::Package {
            upload: Some(PackageUpload::from_bytes("fancy.zip", bytes)),
        },
    )
    .with_description("Plotting helpers"))
}

fn store_revision(
    store: &RepositoryStore,
    submission: &mut Submission,
    revision: Revision,
) -> anyhow::Result<String> {
    let is_new = submission.fileset.is_none();
    let hash = SubmissionStorage::new(store, submission, &revision, is_new).store_or_revert()?;
    submission.push_revision(revision, Some(hash.clone()))?;
    Ok(hash)
}

fn is_hex40(value: &str) -> bool {
    value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit())
}

#[test]
fn snippet_submission_round_trip() -> anyhow::Result<()> {
    if !tool_available("git") {
        eprintln!("skipping snippet round trip; git not available");
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;
    let mut sub = Submission::new(3, SubmissionKind::Snippet, user());

    let first = store_revision(&store, &mut sub, snippet(7, "Draw an ellipse", "print('hi')"))?;
    assert!(is_hex40(&first), "unexpected id {first}");

    let fileset = sub.fileset.clone().expect("fileset bound");
    assert_eq!(fileset.repo_path(), Path::new("2024/03/000007"));
    let root = store.full_path(&fileset);
    assert_eq!(
        store.list_current_files(&fileset)?,
        vec!["LICENSE.TXT".to_string(), "draw_an_ellipse.py".to_string()]
    );
    assert_eq!(fs::read_to_string(root.join("draw_an_ellipse.py"))?, "print('hi')");
    let license = fs::read_to_string(root.join("LICENSE.TXT"))?;

    let second = store_revision(&store, &mut sub, snippet(9, "Draw an ellipse", "print('bye')"))?;
    assert!(is_hex40(&second));
    assert_ne!(first, second);
    assert_eq!(fs::read_to_string(root.join("LICENSE.TXT"))?, license);
    assert_eq!(fs::read_to_string(root.join("draw_an_ellipse.py"))?, "print('bye')");

    assert!(store.checkout_revision(&fileset, &first)?);
    assert_eq!(fs::read_to_string(root.join("draw_an_ellipse.py"))?, "print('hi')");
    assert!(store.checkout_revision(&fileset, &second)?);
    assert_eq!(fs::read_to_string(root.join("draw_an_ellipse.py"))?, "print('bye')");
    Ok(())
}

#[test]
fn unchanged_content_keeps_the_same_id() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;
    let mut sub = Submission::new(3, SubmissionKind::Snippet, user());

    let first = store_revision(&store, &mut sub, snippet(7, "Same", "x = 1\n"))?;
    let again = store_revision(&store, &mut sub, snippet(8, "Same", "x = 1\n"))?;
    assert_eq!(first, again);
    Ok(())
}

#[test]
fn package_history_reads_back_without_moving_the_tree() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;
    let mut sub = Submission::new(11, SubmissionKind::Package, user());

    let first = store_revision(
        &store,
        &mut sub,
        package(20, &[("main.py", "run()\n"), (".git/config", "[core]\n")])?,
    )?;
    let second = store_revision(
        &store,
        &mut sub,
        package(21, &[("lib/util.py", "def f(): pass\n")])?,
    )?;
    let fileset = sub.fileset.clone().expect("fileset bound");
    let root = store.full_path(&fileset);

    let description = fs::read_to_string(root.join("DESCRIPTION.txt"))?;
    assert_eq!(description, "Plotting helpers");
    let license = fs::read_to_string(root.join("LICENSE.TXT"))?;
    assert!(license.contains("/user/4/"), "copyright holder missing: {license}");
    assert!(license.contains("2024"));

    assert_eq!(
        store.list_files_at(&sub, &first)?,
        vec!["DESCRIPTION.txt", "LICENSE.TXT", "main.py"]
    );
    assert_eq!(
        store.list_current_files(&fileset)?,
        vec!["DESCRIPTION.txt", "LICENSE.TXT", "lib/util.py"]
    );
    assert_eq!(store.open_repository(&fileset)?.revision_id()?, second);

    let unknown = "0".repeat(40);
    let err = store.list_files_at(&sub, &unknown).unwrap_err();
    assert!(matches!(err, StorageError::NotAvailable { .. }), "{err:?}");
    assert_eq!(store.open_repository(&fileset)?.revision_id()?, second);
    Ok(())
}

#[test]
fn download_archive_holds_the_old_revision() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(&temp.path().join("storage"))?;
    let mut sub = Submission::new(11, SubmissionKind::Package, user());
    let first = store_revision(&store, &mut sub, package(20, &[("main.py", "run()\n")])?)?;
    let second = store_revision(&store, &mut sub, package(21, &[("other.py", "pass\n")])?)?;

    let dest = temp.path().join("downloads/fancy-plots-11-1.zip");
    let files = store.build_download_archive(&sub, &first, &dest)?;
    assert_eq!(files, vec!["DESCRIPTION.txt", "LICENSE.TXT", "main.py"]);

    let mut archive = zip::ZipArchive::new(fs::File::open(&dest)?)?;
    let names: Vec<String> = archive.file_names().map(ToOwned::to_owned).collect();
    assert!(names.iter().all(|name| !name.starts_with(".git")));
    assert!(archive.by_name("main.py").is_ok());

    let fileset = sub.fileset.clone().expect("fileset bound");
    assert_eq!(store.open_repository(&fileset)?.revision_id()?, second);
    assert!(store.full_path(&fileset).join("other.py").is_file());
    Ok(())
}

#[test]
fn failed_new_package_removes_its_repository() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;
    let mut sub = Submission::new(5, SubmissionKind::Package, user());
    // "a" is written as a file, so "a/b" cannot be extracted beneath it
    let revision = package(30, &[("a", "file\n"), ("a/b", "nested\n")])?;

    let err = SubmissionStorage::new(&store, &mut sub, &revision, true)
        .store_or_revert()
        .unwrap_err();
    assert!(matches!(err, StorageError::Io { .. }), "{err:?}");
    assert!(sub.fileset.is_none());
    assert!(!temp.path().join("2024/03/000030").exists());
    Ok(())
}

#[test]
fn failed_edit_restores_the_previous_revision() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;
    let mut sub = Submission::new(5, SubmissionKind::Package, user());
    let first = store_revision(&store, &mut sub, package(30, &[("keep.py", "x = 1\n")])?)?;

    let broken = package(31, &[("a", "file\n"), ("a/b", "nested\n")])?;
    assert!(SubmissionStorage::new(&store, &mut sub, &broken, false)
        .store_or_revert()
        .is_err());

    let fileset = sub.fileset.clone().expect("fileset kept");
    assert_eq!(store.open_repository(&fileset)?.revision_id()?, first);
    assert_eq!(
        store.list_current_files(&fileset)?,
        vec!["DESCRIPTION.txt", "LICENSE.TXT", "keep.py"]
    );
    Ok(())
}

#[test]
fn unsupported_license_touches_nothing() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;
    let mut sub = Submission::new(6, SubmissionKind::Snippet, user());
    let mut revision = snippet(40, "Licensed", "pass");
    revision.license = License::new("GPL", "gpl", "GNU General Public License", "");

    let err = SubmissionStorage::new(&store, &mut sub, &revision, true)
        .store_or_revert()
        .unwrap_err();
    assert_eq!(err.code(), "SPC300");
    assert!(sub.fileset.is_none());
    assert_eq!(fs::read_dir(temp.path())?.count(), 0);
    Ok(())
}

#[test]
fn frozen_and_link_submissions_are_refused() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;

    let mut frozen = Submission::new(8, SubmissionKind::Snippet, user());
    frozen.frozen = true;
    let revision = snippet(50, "Frozen", "pass");
    let err = SubmissionStorage::new(&store, &mut frozen, &revision, true)
        .store()
        .unwrap_err();
    assert!(matches!(err, StorageError::Frozen { submission: 8 }));

    let mut link = Submission::new(9, SubmissionKind::Link, user());
    let revision = Revision::new(
        51,
        "Elsewhere",
        License::builtin("cc0").expect("cc0 license"),
        user(),
        RevisionContent::Link {
            url: "http://example.org".into(),
        },
    );
    let err = SubmissionStorage::new(&store, &mut link, &revision, true)
        .store()
        .unwrap_err();
    assert_eq!(err.code(), "SPC400");
    assert!(link.fileset.is_none());
    Ok(())
}

#[test]
fn colliding_paths_get_a_suffix() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;
    fs::create_dir_all(temp.path().join("2024/03/000012"))?;

    let mut sub = Submission::new(12, SubmissionKind::Snippet, user());
    store_revision(&store, &mut sub, snippet(12, "Clash", "pass"))?;
    let fileset = sub.fileset.expect("fileset bound");
    assert_eq!(fileset.repo_path(), Path::new("2024/03/000012_1"));
    Ok(())
}

#[test]
fn clones_push_and_pull_through_a_bare_remote() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(&temp.path().join("storage"))?;
    let mut sub = Submission::new(3, SubmissionKind::Snippet, user());
    store_revision(&store, &mut sub, snippet(7, "Shared", "a = 1\n"))?;
    let fileset = sub.fileset.clone().expect("fileset bound");

    let bare = temp.path().join("upstream.git");
    let status = Command::new("git")
        .args(["init", "-q", "--bare", "-b", "main"])
        .arg(&bare)
        .status()?;
    assert!(status.success());

    let mut origin = store.open_repository(&fileset)?;
    origin.set_remote(&bare.display().to_string())?;
    origin.push()?;

    let mut copy = origin.clone(&temp.path().join("copy"))?;
    assert!(copy.remote().is_some());
    fs::write(copy.dir().join("extra.py"), "b = 2\n")?;
    copy.add(&["extra.py"])?;
    copy.set_remote(&bare.display().to_string())?;
    let pushed = copy.commit_and_push_updates("add extra", "/user/9/")?;

    let pulled = origin.pull_update_and_merge()?;
    assert_eq!(pulled, pushed);
    assert!(origin.dir().join("extra.py").is_file());
    assert_eq!(origin.heads()?, 1);
    Ok(())
}

#[test]
fn edit_after_a_historical_checkout_builds_on_the_latest_revision() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;
    let mut sub = Submission::new(3, SubmissionKind::Snippet, user());
    let first = store_revision(&store, &mut sub, snippet(7, "Draw an ellipse", "a = 1\n"))?;
    let second = store_revision(&store, &mut sub, snippet(8, "Draw an ellipse", "a = 2\n"))?;
    let fileset = sub.fileset.clone().expect("fileset bound");
    assert!(store.checkout_revision(&fileset, &first)?);

    let third = store_revision(&store, &mut sub, snippet(9, "Draw an ellipse", "a = 3\n"))?;
    assert_ne!(third, second);
    let mut repo = store.open_repository(&fileset)?;
    assert_eq!(repo.check_out(None)?, third);
    let root = store.full_path(&fileset);
    assert_eq!(fs::read_to_string(root.join("draw_an_ellipse.py"))?, "a = 3\n");

    let scoped = store.scoped_checkout(&sub, &second)?;
    assert_eq!(fs::read_to_string(scoped.path().join("draw_an_ellipse.py"))?, "a = 2\n");
    assert_eq!(scoped.finish()?, third);
    Ok(())
}

#[test]
fn reads_without_stored_hashes_leave_the_tree_where_it_was() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;
    let mut sub = Submission::new(3, SubmissionKind::Snippet, user());
    let first = store_revision(&store, &mut sub, snippet(7, "Draw an ellipse", "a = 1\n"))?;
    let second = store_revision(&store, &mut sub, snippet(8, "Draw an ellipse", "a = 2\n"))?;
    let fileset = sub.fileset.clone().expect("fileset bound");
    assert!(store.checkout_revision(&fileset, &first)?);

    let mut unrecorded = Submission::new(3, SubmissionKind::Snippet, user());
    unrecorded.fileset = Some(fileset.clone());
    let scoped = store.scoped_checkout(&unrecorded, &second)?;
    assert_eq!(scoped.finish()?, first);
    assert_eq!(store.open_repository(&fileset)?.revision_id()?, first);
    Ok(())
}

#[test]
fn package_may_contain_an_entry_named_like_the_upload() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;
    let mut sub = Submission::new(11, SubmissionKind::Package, user());
    store_revision(
        &store,
        &mut sub,
        package(20, &[("main.py", "run()\n"), ("fancy.zip", "not really a zip")])?,
    )?;

    let fileset = sub.fileset.clone().expect("fileset bound");
    assert_eq!(
        store.list_current_files(&fileset)?,
        vec!["DESCRIPTION.txt", "LICENSE.TXT", "fancy.zip", "main.py"]
    );
    let root = store.full_path(&fileset);
    assert_eq!(fs::read_to_string(root.join("fancy.zip"))?, "not really a zip");
    Ok(())
}

#[test]
fn package_revision_without_an_upload_is_a_type_mismatch() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;
    let mut sub = Submission::new(11, SubmissionKind::Package, user());
    let revision = Revision::new(
        20,
        "Fancy plots",
        License::builtin("bsd").expect("bsd license"),
        user(),
        RevisionContent::Package { upload: None },
    );

    let err = SubmissionStorage::new(&store, &mut sub, &revision, true)
        .store_or_revert()
        .unwrap_err();
    assert!(matches!(err, StorageError::TypeMismatch { .. }), "{err:?}");
    assert_eq!(err.code(), "SPC400");
    assert!(sub.fileset.is_none());
    assert_eq!(fs::read_dir(temp.path())?.count(), 0);
    Ok(())
}

#[test]
fn conflicting_pull_is_reported_as_a_repo_error() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(&temp.path().join("storage"))?;
    let mut sub = Submission::new(3, SubmissionKind::Snippet, user());
    store_revision(&store, &mut sub, snippet(7, "Shared", "a = 1\n"))?;
    let fileset = sub.fileset.clone().expect("fileset bound");

    let bare = temp.path().join("upstream.git");
    let status = Command::new("git")
        .args(["init", "-q", "--bare", "-b", "main"])
        .arg(&bare)
        .status()?;
    assert!(status.success());
    let mut origin = store.open_repository(&fileset)?;
    origin.set_remote(&bare.display().to_string())?;
    origin.push()?;

    let mut copy = origin.clone(&temp.path().join("copy"))?;
    copy.set_remote(&bare.display().to_string())?;
    fs::write(copy.dir().join("shared.py"), "a = 2\n")?;
    copy.add(&["shared.py"])?;
    copy.commit_and_push_updates("change a upstream", "/user/9/")?;

    store_revision(&store, &mut sub, snippet(8, "Shared", "a = 3\n"))?;
    let mut origin = store.open_repository(&fileset)?;
    let err = origin.pull_update_and_merge().unwrap_err();
    match err {
        StorageError::Repo(repo_err) => assert_eq!(repo_err.verb, Some(Verb::Pull)),
        other => panic!("expected a repository error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn failed_checkout_aborts_commit_and_push() -> anyhow::Result<()> {
    if !tool_available("git") {
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = git_store(temp.path())?;
    // main is still unborn, so checking it out fails
    let fileset = FileSet::new("2024/03/000077", store.now());
    let mut repo = store.create_repository(&fileset)?;
    fs::write(repo.dir().join("pending.py"), "x = 1\n")?;
    repo.add(&["pending.py"])?;

    let err = repo
        .commit_and_push_updates("should not land", "/user/4/")
        .unwrap_err();
    assert!(matches!(err, StorageError::Repo(_)), "{err:?}");
    assert!(repo.revision_id().is_err(), "a commit was created");
    Ok(())
}

#[test]
fn mercurial_snippet_round_trip() -> anyhow::Result<()> {
    if !tool_available("hg") {
        eprintln!("skipping mercurial round trip; hg not available");
        return Ok(());
    }
    let temp = tempfile::tempdir()?;
    let store = RepositoryStore::new(StorageSettings::new(temp.path()))?
        .with_clock(FixedClock(datetime!(2024-03-05 12:00 UTC)));
    let mut sub = Submission::new(3, SubmissionKind::Snippet, user());

    let first = store_revision(&store, &mut sub, snippet(7, "Draw an ellipse", "print('hi')"))?;
    let second = store_revision(&store, &mut sub, snippet(8, "Draw an ellipse", "print('bye')"))?;
    assert!(is_hex40(&first) && is_hex40(&second));
    assert_ne!(first, second);

    let scoped = store.scoped_checkout(&sub, &first)?;
    assert_eq!(
        fs::read_to_string(scoped.path().join("draw_an_ellipse.py"))?,
        "print('hi')"
    );
    assert_eq!(scoped.finish()?, second);
    Ok(())
}
