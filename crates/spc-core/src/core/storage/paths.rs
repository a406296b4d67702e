use std::path::{Path, PathBuf};

use time::OffsetDateTime;

/// Source of "now" for path allocation and license years.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub OffsetDateTime);

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0
    }
}

/// Relative repository path `{YYYY}/{MM}/{pk:06}` for a new submission.
///
/// When that path already exists under `storage_dir`, `_1`, `_2`, ... is
/// appended until a free name is found. Nothing is created; a concurrent
/// writer could still claim the same name.
pub fn allocate_repo_path(storage_dir: &Path, pk: u64, now: OffsetDateTime) -> PathBuf {
    let base = PathBuf::from(format!("{:04}", now.year()))
        .join(format!("{:02}", u8::from(now.month())))
        .join(format!("{pk:06}"));
    let mut candidate = base.clone();
    let mut count = 1_u32;
    while storage_dir.join(&candidate).exists() {
        let mut name = base.as_os_str().to_os_string();
        name.push(format!("_{count}"));
        candidate = PathBuf::from(name);
        count += 1;
    }
    candidate
}
