//! Path security.
//!
//! Any file path that originates in user space is screened and canonicalized
//! here before the core touches the filesystem. Canonicalization resolves
//! symlinks; confinement compares the canonical result against the configured
//! base directories.

use std::path::{Component, Path, PathBuf};

use crate::exception::{ErrorKind, RunError, RunResult};

/// Screens and canonicalizes a user-supplied path.
///
/// Rejections, in order:
/// - embedded null bytes or ASCII control characters,
/// - `..` components that climb above the base directory (checked lexically
///   before touching the filesystem, so the probe itself never escapes),
/// - after canonicalization, a result outside every configured base.
///
/// With no base directories configured only the byte screening applies.
/// The returned path is absolute with symlinks resolved; for paths that do
/// not exist yet (write targets) the parent is canonicalized instead and the
/// final component re-appended.
pub(crate) fn canonicalize_path(raw: &str, bases: &[PathBuf]) -> RunResult<PathBuf> {
    screen_bytes(raw)?;

    let candidate = Path::new(raw);
    if !bases.is_empty() && escapes_lexically(candidate) {
        return Err(violation(raw, "path traversal outside the allowed directory"));
    }

    let resolved = resolve(candidate).map_err(|err| {
        RunError::err(ErrorKind::IOError, format!("cannot resolve path {raw:?}: {err}"))
    })?;

    if !bases.is_empty() {
        let confined = bases.iter().any(|base| {
            std::fs::canonicalize(base)
                .map(|canon_base| resolved.starts_with(&canon_base))
                .unwrap_or(false)
        });
        if !confined {
            return Err(violation(raw, "path is outside the allowed directories"));
        }
    }

    Ok(resolved)
}

fn screen_bytes(raw: &str) -> RunResult<()> {
    if raw.bytes().any(|b| b == 0) {
        return Err(violation(raw, "path contains a null byte"));
    }
    if raw.chars().any(|c| c.is_ascii_control()) {
        return Err(violation(raw, "path contains control characters"));
    }
    Ok(())
}

/// True when the relative walk of `path` ever climbs above its starting
/// point. `a/../b` is fine; `../b` and `a/../../b` are not.
fn escapes_lexically(path: &Path) -> bool {
    if path.is_absolute() {
        // Absolute paths are judged by the canonical confinement check alone.
        return false;
    }
    let mut depth: i64 = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return true;
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    false
}

fn resolve(path: &Path) -> std::io::Result<PathBuf> {
    match std::fs::canonicalize(path) {
        Ok(resolved) => Ok(resolved),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            // Write target that doesn't exist yet: canonicalize the parent.
            let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
            let file_name = path
                .file_name()
                .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty file name"))?;
            let parent = match parent {
                Some(p) => std::fs::canonicalize(p)?,
                None => std::env::current_dir()?,
            };
            Ok(parent.join(file_name))
        }
        Err(err) => Err(err),
    }
}

fn violation(raw: &str, why: &str) -> RunError {
    RunError::err(ErrorKind::PathSecurityError, format!("{why}: {raw:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exception::ErrorKind;

    fn kind_of(result: RunResult<PathBuf>) -> ErrorKind {
        match result {
            Err(err) => err.kind().expect("expected a tagged error"),
            Ok(p) => panic!("expected an error, resolved {p:?}"),
        }
    }

    #[test]
    fn null_bytes_are_rejected() {
        assert_eq!(kind_of(canonicalize_path("a\0b", &[])), ErrorKind::PathSecurityError);
    }

    #[test]
    fn control_characters_are_rejected() {
        assert_eq!(kind_of(canonicalize_path("a\nb", &[])), ErrorKind::PathSecurityError);
    }

    #[test]
    fn traversal_out_of_base_is_rejected_before_io() {
        let base = tempfile::tempdir().unwrap();
        let bases = vec![base.path().to_path_buf()];
        assert_eq!(
            kind_of(canonicalize_path("../../etc/passwd", &bases)),
            ErrorKind::PathSecurityError
        );
    }

    #[test]
    fn absolute_path_outside_base_is_rejected() {
        let base = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let target = outside.path().join("f.txt");
        std::fs::write(&target, b"x").unwrap();
        let bases = vec![base.path().to_path_buf()];
        assert_eq!(
            kind_of(canonicalize_path(target.to_str().unwrap(), &bases)),
            ErrorKind::PathSecurityError
        );
    }

    #[test]
    fn inside_base_resolves() {
        let base = tempfile::tempdir().unwrap();
        let target = base.path().join("data.txt");
        std::fs::write(&target, b"x").unwrap();
        let bases = vec![base.path().to_path_buf()];
        let resolved = canonicalize_path(target.to_str().unwrap(), &bases).unwrap();
        assert!(resolved.ends_with("data.txt"));
    }

    #[test]
    fn missing_write_target_resolves_through_parent() {
        let base = tempfile::tempdir().unwrap();
        let target = base.path().join("new.txt");
        let bases = vec![base.path().to_path_buf()];
        let resolved = canonicalize_path(target.to_str().unwrap(), &bases).unwrap();
        assert!(resolved.ends_with("new.txt"));
    }

    #[test]
    fn interior_dotdot_that_stays_inside_is_fine() {
        assert!(!escapes_lexically(Path::new("a/../b")));
        assert!(escapes_lexically(Path::new("a/../../b")));
        assert!(escapes_lexically(Path::new("../b")));
    }
}
