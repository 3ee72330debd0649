use crate::sweep::month::EffectiveMonth;
use crate::sweep::walker::FileRecord;
use chrono::{Local, TimeZone};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Mid-month so the effective month is the same in every time zone.
pub fn mid_month(year: i32, month: u32) -> SystemTime {
    Local
        .with_ymd_and_hms(year, month, 15, 12, 0, 0)
        .single()
        .expect("unambiguous local time")
        .into()
}

/// Create `path` (and parents) with its own path as content and an mtime
/// inside the given month.
pub fn touch(path: &Path, year: i32, month: u32) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir parent");
    }
    fs::write(path, path.display().to_string()).expect("write file");
    let file = fs::File::options()
        .write(true)
        .open(path)
        .expect("open for mtime");
    file.set_modified(mid_month(year, month))
        .expect("set mtime");
}

pub fn record(name: &str, year: i32, month: u32) -> FileRecord {
    FileRecord {
        path: PathBuf::from("/sweep").join(name),
        relative: PathBuf::from(name),
        month: EffectiveMonth::new(year, month),
    }
}
