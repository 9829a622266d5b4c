pub mod geometry;
pub mod mtl;

use std::io;
use std::path::{Component, Path, PathBuf};

pub use geometry::{FaceVertex, Geometry};
pub use mtl::{MaterialBinding, MaterialLibrary};

/// Return `path` as an absolute, lexically normalized path (no `.` or `..`
/// components). Unlike `fs::canonicalize` this does not require the path to
/// exist, which matters for output paths we are about to create.
pub fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    Ok(normalize(&std::path::absolute(path)?))
}

/// Resolve `rel_path` as if it had been read from the file at `file_path`,
/// i.e. relative to that file's directory.
pub fn abs_path_from_file(rel_path: &str, file_path: &Path) -> PathBuf {
    let dir = file_path.parent().unwrap_or_else(|| Path::new("."));
    normalize(&dir.join(rel_path))
}

/// Return a relative path that resolves to `target` when written into the
/// file at `file_path`. Relative references keep the tiler output
/// relocatable.
///
/// Both paths must be absolute (see [`absolute_path`]).
pub fn rel_path_from_file(target: &Path, file_path: &Path) -> PathBuf {
    let base = file_path.parent().unwrap_or_else(|| Path::new("/"));

    let target_comps: Vec<Component> = target.components().collect();
    let base_comps: Vec<Component> = base.components().collect();

    let common = target_comps
        .iter()
        .zip(base_comps.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base_comps.len() {
        rel.push("..");
    }
    for comp in &target_comps[common..] {
        rel.push(comp);
    }
    rel
}

/// Lexically resolve `.` and `..` components without touching the
/// filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}
