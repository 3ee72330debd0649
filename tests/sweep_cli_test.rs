use chrono::{Local, TimeZone};
use fs2::FileExt;
use predicates::str::contains;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::tempdir;

fn mid_month(year: i32, month: u32) -> SystemTime {
    Local
        .with_ymd_and_hms(year, month, 15, 12, 0, 0)
        .single()
        .expect("unambiguous local time")
        .into()
}

fn write_old(path: &Path, year: i32, month: u32) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir parent");
    fs::write(path, path.display().to_string()).expect("write file");
    File::options()
        .write(true)
        .open(path)
        .expect("open file")
        .set_modified(mid_month(year, month))
        .expect("set mtime");
}

fn write_fresh(path: &Path) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir parent");
    fs::write(path, "fresh").expect("write file");
}

fn layout() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().join("root");
    let target = tmp.path().join("target");
    fs::create_dir_all(&target).expect("mkdir target");
    write_old(&root.join("app/jan-1.log"), 2023, 1);
    write_old(&root.join("app/nested/jan-2.log"), 2023, 1);
    write_old(&root.join("app/feb.log"), 2023, 2);
    write_fresh(&root.join("app/today.log"));
    (tmp, root, target)
}

fn sweep(home: &Path) -> assert_cmd::Command {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("month-sweep");
    cmd.current_dir(home)
        .env("SWEEP_HOME", home)
        .env("RUST_LOG", "warn")
        .env_remove("SWEEP_CONFIG_PATH");
    cmd
}

fn names_in(dir: &Path) -> Vec<String> {
    let mut out = fs::read_dir(dir)
        .expect("read dir")
        .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
        .collect::<Vec<_>>();
    out.sort();
    out
}

#[test]
fn archive_mode_zips_past_months_and_keeps_the_current_one() {
    let (tmp, root, target) = layout();

    sweep(tmp.path())
        .arg(&root)
        .arg(&target)
        .arg("--json")
        .assert()
        .success()
        .stdout(contains("\"ok\": true"))
        .stdout(contains("batches_submitted=2"));

    assert!(!root.join("app/jan-1.log").exists());
    assert!(!root.join("app/nested/jan-2.log").exists());
    assert!(!root.join("app/feb.log").exists());
    assert!(root.join("app/today.log").exists());

    let names = names_in(&target);
    let january = names
        .iter()
        .find(|n| n.starts_with("2023-1-archive_") && n.ends_with(".zip"))
        .expect("january container");
    assert!(names.iter().any(|n| n.starts_with("2023-2-archive_")));

    let mut archive =
        zip::ZipArchive::new(File::open(target.join(january)).expect("open zip")).expect("zip");
    assert_eq!(archive.len(), 2);
    assert!(archive.by_name("app/nested/jan-2.log").is_ok());
}

#[test]
fn relocate_mode_is_safe_to_rerun() {
    let (tmp, root, target) = layout();

    for _ in 0..2 {
        sweep(tmp.path())
            .arg(&root)
            .arg(&target)
            .args(["--mode", "relocate"])
            .assert()
            .success();
    }

    assert_eq!(
        names_in(&target.join("2023-01-archive/app")),
        vec!["jan-1.log", "nested"]
    );
    assert!(target.join("2023-01-archive/app/nested/jan-2.log").is_file());
    assert_eq!(names_in(&target.join("2023-02-archive/app")), vec!["feb.log"]);
    assert!(root.join("app/today.log").exists());
}

#[test]
fn relocate_mode_keeps_equal_names_from_different_subdirectories() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path().join("root");
    let target = tmp.path().join("target");
    fs::create_dir_all(&target).expect("mkdir target");
    for subdir in ["api", "web", "worker"] {
        write_old(&root.join(subdir).join("app.log"), 2023, 1);
    }

    sweep(tmp.path())
        .arg(&root)
        .arg(&target)
        .args(["--mode", "relocate", "--workers", "3"])
        .assert()
        .success();

    for subdir in ["api", "web", "worker"] {
        let moved = target.join("2023-01-archive").join(subdir).join("app.log");
        assert!(moved.is_file(), "{} missing", moved.display());
        assert!(!root.join(subdir).join("app.log").exists());
    }
}

#[test]
fn dry_run_plans_split_batches_without_touching_files() {
    let (tmp, root, target) = layout();

    sweep(tmp.path())
        .arg(&root)
        .arg(&target)
        .arg("1")
        .arg("--dry-run")
        .assert()
        .success()
        .stdout(contains("plan: ok"))
        .stdout(contains("batches_planned=3"))
        .stdout(contains("files_held_back=1"));

    assert!(root.join("app/jan-1.log").exists());
    assert!(root.join("app/feb.log").exists());
    assert!(names_in(&target).is_empty());
}

#[test]
fn existing_container_fails_the_run_and_keeps_sources() {
    let (tmp, root, target) = layout();
    fs::write(target.join("2023-1-archive_sweep-worker-0-0.zip"), b"occupied")
        .expect("occupy container name");

    sweep(tmp.path())
        .arg(&root)
        .arg(&target)
        .args(["--suffix", "worker", "--workers", "1"])
        .assert()
        .failure()
        .stdout(contains("already exists"))
        .stderr(contains("error: sweep finished with"));

    assert!(root.join("app/jan-1.log").exists());
    assert!(root.join("app/nested/jan-2.log").exists());
}

#[test]
fn second_instance_on_same_target_is_refused() {
    let (tmp, root, target) = layout();
    let held = File::options()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(target.join(".month-sweep.lock"))
        .expect("open lock");
    held.try_lock_exclusive().expect("hold lock");

    sweep(tmp.path())
        .arg(&root)
        .arg(&target)
        .assert()
        .failure()
        .stderr(contains("held by another instance"));

    assert!(root.join("app/jan-1.log").exists());
}

#[test]
fn invalid_arguments_exit_non_zero() {
    let (tmp, root, target) = layout();

    sweep(tmp.path())
        .arg(&root)
        .arg(tmp.path().join("missing"))
        .assert()
        .failure()
        .stderr(contains("is not accessible"));

    sweep(tmp.path())
        .arg(&root)
        .arg(root.join("app"))
        .assert()
        .failure()
        .stderr(contains("inside root"));

    sweep(tmp.path())
        .arg(&root)
        .arg(&target)
        .args(["--mode", "copy"])
        .assert()
        .failure();
}
