use std::collections::BTreeSet;
use std::env;
use std::error::Error;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const ENV_PREFIX: &str = "SWEEP_";
const GENERATED_FILE: &str = "sweep_env_allowlist.rs";

fn rust_sources(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| path.extension().is_some_and(|ext| ext == "rs"))
        .collect()
}

/// Contents of the plain `"..."` literals in `source`, escapes left as written.
fn string_literals(source: &str) -> Vec<&str> {
    let bytes = source.as_bytes();
    let mut out = Vec::new();
    let mut open = None;
    let mut i = 0;
    while i < bytes.len() {
        match (bytes[i], open) {
            (b'\\', Some(_)) => i += 1,
            (b'"', Some(start)) => {
                out.push(&source[start..i]);
                open = None;
            }
            (b'"', None) => open = Some(i + 1),
            (b'\'', None) if bytes.get(i + 2) == Some(&b'\'') => i += 2,
            _ => {}
        }
        i += 1;
    }
    out
}

/// Whole `"SWEEP_NAME"` literals only; a prefix glued to a suffix at runtime
/// stays out of the allowlist.
fn is_env_key(literal: &str) -> bool {
    literal.len() > ENV_PREFIX.len()
        && literal.starts_with(ENV_PREFIX)
        && literal
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}

fn render_allowlist(keys: &BTreeSet<String>) -> String {
    let mut out = String::from("pub const GENERATED_SWEEP_ENV_ALLOWLIST: &[&str] = &[\n");
    for key in keys {
        let _ = writeln!(out, "    {key:?},");
    }
    out.push_str("];\n");
    out
}

fn main() -> Result<(), Box<dyn Error>> {
    println!("cargo:rerun-if-changed=build.rs");

    let mut keys = BTreeSet::new();
    for path in rust_sources(Path::new("src")) {
        println!("cargo:rerun-if-changed={}", path.display());
        let source = fs::read_to_string(&path)
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
        keys.extend(
            string_literals(&source)
                .into_iter()
                .filter(|literal| is_env_key(literal))
                .map(str::to_owned),
        );
    }

    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    fs::write(out_dir.join(GENERATED_FILE), render_allowlist(&keys))?;

    println!("cargo:rustc-env=BUILD_UUID={}", uuid::Uuid::new_v4());
    Ok(())
}
