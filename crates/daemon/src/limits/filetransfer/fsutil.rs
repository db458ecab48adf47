//! Filesystem predicates used by the file transfer policy.

use std::env;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

use nix::unistd::{Group, User};
use tracing::debug;

/// Lexically normalise a path.
///
/// Relative paths are resolved against the current directory; `.` and `..`
/// components are folded without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_relative() {
        match env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Returns whether `path` lies inside `chroot`. An empty chroot allows everything.
///
/// Containment is decided per path component, so `/srv/data2` is not inside
/// `/srv/data`.
pub fn is_in_chroot(path: &Path, chroot: &str) -> bool {
    if chroot.is_empty() {
        return true;
    }
    normalize(path).starts_with(normalize(Path::new(chroot)))
}

/// Returns whether something exists at `path`, following symbolic links.
pub fn file_exists(path: &Path) -> bool {
    path.exists()
}

/// Returns whether `path` is owned by the named user. An empty name always matches.
pub fn owner_matches(path: &Path, owner: &str) -> bool {
    if owner.is_empty() {
        return true;
    }
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    match User::from_name(owner) {
        Ok(Some(user)) => user.uid.as_raw() == metadata.uid(),
        Ok(None) => {
            debug!(owner, "Unknown user in ownership check");
            false
        }
        Err(e) => {
            debug!(owner, error = %e, "User lookup failed");
            false
        }
    }
}

/// Returns whether `path` belongs to the named group. An empty name always matches.
pub fn group_matches(path: &Path, group: &str) -> bool {
    if group.is_empty() {
        return true;
    }
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    match Group::from_name(group) {
        Ok(Some(found)) => found.gid.as_raw() == metadata.gid(),
        Ok(None) => {
            debug!(group, "Unknown group in ownership check");
            false
        }
        Err(e) => {
            debug!(group, error = %e, "Group lookup failed");
            false
        }
    }
}

/// Returns whether `path` is a regular file, following symbolic links.
pub fn is_regular_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.file_type().is_file())
        .unwrap_or(false)
}

/// On-disk size of `path`, if it can be read.
pub fn file_size(path: &Path) -> Option<u64> {
    fs::metadata(path).ok().map(|m| m.len())
}
