//! Sysfs access helpers: root resolution, attribute reads, and prefixed
//! directory enumeration.
//!
//! Missing files and directories are not errors at this layer; callers
//! decide the policy. Files are opened with `O_CLOEXEC` (the Rust standard
//! library default).

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default sysfs mount point.
pub(crate) const DEFAULT_ROOT: &str = "/sys";

/// Environment variable overriding the sysfs root.
pub(crate) const ROOT_ENV: &str = "LIBTOPOLOGY_SYSFS_ROOT";

/// Relative path of the flat per-CPU directory.
pub(crate) const CPU_DIR: &str = "devices/system/cpu";

/// Relative path of the NUMA node directory.
pub(crate) const NODE_DIR: &str = "devices/system/node";

/// A read-only view of a sysfs tree rooted at a fixed path.
#[derive(Debug, Clone)]
pub(crate) struct Sysfs {
    root: PathBuf,
}

impl Sysfs {
    /// Resolve the root from `LIBTOPOLOGY_SYSFS_ROOT`, defaulting to `/sys`.
    pub(crate) fn from_env() -> Self {
        match env::var_os(ROOT_ENV) {
            Some(root) => Self { root: root.into() },
            None => Self {
                root: PathBuf::from(DEFAULT_ROOT),
            },
        }
    }

    pub(crate) fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn path(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.root.join(rel)
    }

    /// Read an attribute file, truncating at the first newline.
    pub(crate) fn read_attr(&self, rel: impl AsRef<Path>) -> io::Result<String> {
        let mut text = fs::read_to_string(self.path(rel))?;
        if let Some(nl) = text.find('\n') {
            text.truncate(nl);
        }
        Ok(text)
    }

    /// Like [`Sysfs::read_attr`], with a missing file mapped to `None`.
    pub(crate) fn read_attr_opt(&self, rel: impl AsRef<Path>) -> io::Result<Option<String>> {
        match self.read_attr(rel) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Enumerate entries named `{prefix}{N}` for a decimal N, returning the
    /// Ns sorted ascending.
    ///
    /// Regular files are skipped; directories, symlinks (NUMA node
    /// directories expose their CPUs as `cpuN` symlinks) and entries with an
    /// unreportable type are accepted.
    pub(crate) fn list_indexed(&self, rel: impl AsRef<Path>, prefix: &str) -> io::Result<Vec<u32>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.path(rel))? {
            let entry = entry?;
            if matches!(entry.file_type(), Ok(ft) if ft.is_file()) {
                continue;
            }
            let name = entry.file_name();
            if let Some(id) = parse_indexed_name(&name.to_string_lossy(), prefix) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

fn parse_indexed_name(name: &str, prefix: &str) -> Option<u32> {
    let suffix = name.strip_prefix(prefix)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    suffix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_attr_strips_first_newline() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("size"), "16K\nsecond line\n").unwrap();

        let sysfs = Sysfs::with_root(dir.path());
        assert_eq!(sysfs.read_attr("size").unwrap(), "16K");
    }

    #[test]
    fn test_read_attr_opt_missing_is_none() {
        let dir = tempdir().unwrap();
        let sysfs = Sysfs::with_root(dir.path());
        assert_eq!(sysfs.read_attr_opt("absent").unwrap(), None);
    }

    #[test]
    fn test_list_indexed_filters_and_sorts() {
        let dir = tempdir().unwrap();
        for name in ["cpu3", "cpu0", "cpu12", "cpufreq", "cpuidle", "node1"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        // Regular files never qualify, even with a matching name.
        fs::write(dir.path().join("cpu7"), "").unwrap();

        let sysfs = Sysfs::with_root(dir.path());
        assert_eq!(sysfs.list_indexed(".", "cpu").unwrap(), vec![0, 3, 12]);
        assert_eq!(sysfs.list_indexed(".", "node").unwrap(), vec![1]);
    }

    #[test]
    fn test_list_indexed_missing_dir_errors() {
        let dir = tempdir().unwrap();
        let sysfs = Sysfs::with_root(dir.path());
        let err = sysfs.list_indexed("no/such/dir", "cpu").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_parse_indexed_name() {
        assert_eq!(parse_indexed_name("cpu0", "cpu"), Some(0));
        assert_eq!(parse_indexed_name("index2", "index"), Some(2));
        assert_eq!(parse_indexed_name("cpu", "cpu"), None);
        assert_eq!(parse_indexed_name("cpu1a", "cpu"), None);
        assert_eq!(parse_indexed_name("online", "cpu"), None);
    }
}
