//! Path canonicalization.

use std::path::{Component, Path, PathBuf};

/// Lexically canonicalize a path against a base directory, producing an
/// absolute path without redundant components.
/// Does not access the disk, but only simplifies things like
/// "foo/./bar" => "<base>/foo/bar" and "foo/../bar" => "<base>/bar".
/// Symlinks are not resolved, so "link/.." may not name the same directory
/// the kernel would pick; that matches how build scripts spell their paths.
pub fn canon_path(base: &Path, path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    let joined;
    let path = if path.is_absolute() {
        path
    } else {
        joined = base.join(path);
        &joined
    };

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                // ".." at the root stays at the root.
                if out.parent().is_some() {
                    out.pop();
                }
            }
            Component::Normal(name) => out.push(name),
        }
    }
    out
}

/// Display a path relative to `base` when it lives beneath it.
pub fn display_path(base: &Path, path: &Path) -> String {
    match path.strip_prefix(base) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.display().to_string(),
        _ => path.display().to_string(),
    }
}
