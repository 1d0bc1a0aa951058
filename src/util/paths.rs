use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, ServerkeepError};

pub fn is_safe_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

pub fn has_parent_dir(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

pub fn server_lock_path(lock_dir: &Path, server_id: &str) -> Result<PathBuf> {
    if !is_safe_name(server_id) {
        return Err(ServerkeepError::message(format!(
            "server {} id must use only letters, digits, '.', '-', '_'",
            server_id
        )));
    }
    Ok(lock_dir.join(format!("serverkeep.{}.pid", server_id)))
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    if path.exists() {
        let meta = fs::metadata(path)
            .map_err(|e| ServerkeepError::message(format!("stat {}: {}", path.display(), e)))?;
        if !meta.is_dir() {
            return Err(ServerkeepError::message(format!(
                "{} is not a directory",
                path.display()
            )));
        }
        return Ok(());
    }
    fs::create_dir_all(path)
        .map_err(|e| ServerkeepError::message(format!("create {}: {}", path.display(), e)))
}

pub fn list_entries(path: &Path) -> io::Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(path)? {
        let name = entry?.file_name().to_string_lossy().to_string();
        if name == "." || name == ".." {
            continue;
        }
        out.push(name);
    }
    out.sort();
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_names() {
        assert!(is_safe_name("a1b2c3d4"));
        assert!(is_safe_name("alpha-world_2.x"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name("alpha/beta"));
        assert!(!is_safe_name("alpha beta"));
    }

    #[test]
    fn lock_path_rejects_unsafe_ids() {
        let dir = Path::new("/run/serverkeep");
        assert_eq!(
            server_lock_path(dir, "alpha").unwrap(),
            PathBuf::from("/run/serverkeep/serverkeep.alpha.pid")
        );
        assert!(server_lock_path(dir, "../alpha").is_err());
    }

    #[test]
    fn parent_dir_detection() {
        assert!(has_parent_dir(Path::new("cache/../../etc")));
        assert!(!has_parent_dir(Path::new("tmp/logs")));
    }
}
