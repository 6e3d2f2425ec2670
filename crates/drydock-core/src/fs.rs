//! File operations confined to the sandbox root.
//!
//! Every caller-supplied path is relative to the root. Absolute paths and
//! `..` components are rejected before anything touches the filesystem.
//! Each existing component is then checked with `symlink_metadata`: a
//! symlink must have a relative target that exists and resolves inside the
//! root. Dangling links are refused, since writing through one would create
//! its target wherever it points.
//!
//! The root also holds [`STAGING_DIR`], where the orchestrator stages scripts
//! for in-flight executions. It is hidden from listings, cannot be addressed
//! by callers, and survives [`SandboxFs::cleanup`].

use crate::error::{CoreError, Result};
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Maximum file size for `read` (10 MB).
const MAX_READ_SIZE: u64 = 10 * 1024 * 1024;

/// Directory under the root reserved for staged execution scripts.
pub const STAGING_DIR: &str = ".drydock-exec";

/// File entry from directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// File or directory name.
    pub name: String,
    /// True if this is a directory.
    pub is_dir: bool,
    /// File size in bytes (0 for directories).
    pub size: u64,
}

/// Format a byte count for humans, e.g. `1.5 KB`.
pub fn format_size(bytes: u64) -> String {
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

/// The sandbox root and the operations allowed inside it.
#[derive(Debug, Clone)]
pub struct SandboxFs {
    root: PathBuf,
}

impl SandboxFs {
    /// Open (creating if needed) the sandbox root.
    ///
    /// The root is canonicalized so later containment checks compare
    /// resolved paths.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = root.canonicalize()?;
        tracing::debug!(root = %root.display(), "Sandbox root ready");
        Ok(Self { root })
    }

    /// Get the canonical sandbox root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a relative path to an absolute one inside the root.
    ///
    /// An empty path or `.` maps to the root itself. The returned path is the
    /// lexical join, so a validated symlink is still addressed as itself.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let rel = Path::new(relative);
        let mut first = true;
        for component in rel.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(name) => {
                    if first && name == STAGING_DIR {
                        return Err(CoreError::Validation(format!(
                            "'{STAGING_DIR}' is reserved for running executions"
                        )));
                    }
                    first = false;
                }
                Component::ParentDir => {
                    return Err(CoreError::Validation(
                        "path cannot contain '..' to navigate up directories".into(),
                    ))
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(CoreError::Validation(format!(
                        "absolute paths are not allowed: {relative}"
                    )))
                }
            }
        }

        // Walk the existing prefix, following each symlink to its canonical
        // target so later components are checked where they really live.
        let mut walked = self.root.clone();
        for name in rel.components().filter_map(|c| match c {
            Component::Normal(name) => Some(name),
            _ => None,
        }) {
            walked.push(name);
            match fs::symlink_metadata(&walked) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    walked = self.follow_link(&walked, relative)?;
                }
                Ok(_) => {}
                // Nothing below a missing component can exist.
                Err(e) if e.kind() == io::ErrorKind::NotFound => break,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(self.root.join(rel))
    }

    /// Resolve one symlink found while walking, refusing any that leaves the root.
    fn follow_link(&self, link: &Path, relative: &str) -> Result<PathBuf> {
        let escape = |reason: &str| {
            tracing::warn!(path = %relative, link = %link.display(), reason, "Symlink rejected");
            CoreError::Validation(format!(
                "path must stay within the code directory ({reason}): {relative}"
            ))
        };

        if fs::read_link(link)?.is_absolute() {
            return Err(escape("absolute symlink target"));
        }
        match link.canonicalize() {
            Ok(target) if target.starts_with(&self.root) => Ok(target),
            Ok(_) => Err(escape("symlink leaves the root")),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(escape("dangling symlink")),
            Err(e) => Err(e.into()),
        }
    }

    /// List a directory: directories first, then files, each sorted by name.
    pub fn list(&self, relative: &str) -> Result<Vec<FileEntry>> {
        let dir = self.resolve(relative)?;
        if !dir.is_dir() {
            return Err(CoreError::NotFound(format!(
                "Directory does not exist: {relative}"
            )));
        }

        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if dir == self.root && entry.file_name() == STAGING_DIR {
                continue;
            }
            let metadata = entry.metadata()?;
            entries.push(FileEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: if metadata.is_file() { metadata.len() } else { 0 },
            });
        }
        entries.sort_by(|a, b| b.is_dir.cmp(&a.is_dir).then_with(|| a.name.cmp(&b.name)));
        Ok(entries)
    }

    /// Read a text file. Files larger than 10 MB are rejected.
    pub fn read(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative)?;
        if !path.is_file() {
            return Err(CoreError::NotFound(format!(
                "File does not exist: {relative}"
            )));
        }

        let size = fs::metadata(&path)?.len();
        if size > MAX_READ_SIZE {
            return Err(CoreError::Validation(format!(
                "file '{relative}' is too large ({size} bytes, max {MAX_READ_SIZE} bytes)"
            )));
        }
        Ok(fs::read_to_string(&path)?)
    }

    /// Write a file, creating parent directories. Returns the bytes written.
    pub fn write(&self, relative: &str, content: &str) -> Result<usize> {
        let path = self.resolve(relative)?;
        if path == self.root || path.is_dir() {
            return Err(CoreError::Validation(format!(
                "cannot write to a directory: {relative}"
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        tracing::debug!(path = %relative, bytes = content.len(), "Wrote sandbox file");
        Ok(content.len())
    }

    /// Delete a regular file.
    pub fn delete(&self, relative: &str) -> Result<()> {
        let path = self.resolve(relative)?;
        if !path.is_file() {
            return Err(CoreError::NotFound(format!(
                "File does not exist: {relative}"
            )));
        }
        fs::remove_file(&path)?;
        tracing::debug!(path = %relative, "Deleted sandbox file");
        Ok(())
    }

    /// Render a directory as an ASCII tree, headed by the path itself.
    pub fn tree(&self, relative: &str) -> Result<String> {
        let dir = self.resolve(relative)?;
        if !dir.is_dir() {
            return Err(CoreError::NotFound(format!(
                "Directory does not exist: {relative}"
            )));
        }

        let display = match relative.trim() {
            "" | "." => ".",
            other => other,
        };
        let mut out = format!("{display}\n");
        render_tree(&dir, dir == self.root, "", &mut out)?;
        Ok(out)
    }

    /// Remove everything under the root except the staging directory.
    /// Returns the number of top-level entries removed.
    pub fn cleanup(&self) -> Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_name() == STAGING_DIR {
                continue;
            }
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
            removed += 1;
        }
        tracing::info!(removed, root = %self.root.display(), "Cleaned sandbox root");
        Ok(removed)
    }
}

fn render_tree(dir: &Path, is_root: bool, prefix: &str, out: &mut String) -> Result<()> {
    let mut items: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    if is_root {
        items.retain(|entry| entry.file_name() != STAGING_DIR);
    }
    items.sort_by_key(|entry| entry.file_name());

    let last = items.len().saturating_sub(1);
    for (i, entry) in items.iter().enumerate() {
        let is_last = i == last;
        let branch = if is_last { "└── " } else { "├── " };
        let name = entry.file_name().to_string_lossy().into_owned();
        // file_type does not follow symlinks, so a link to a directory cannot recurse.
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            let _ = writeln!(out, "{prefix}{branch}{name}/");
            let child_prefix = format!("{prefix}{}", if is_last { "    " } else { "│   " });
            render_tree(&entry.path(), false, &child_prefix, out)?;
        } else {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let _ = writeln!(out, "{prefix}{branch}{name} ({})", format_size(size));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_root() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir =
            std::env::temp_dir().join(format!("drydock-fs-test-{}-{}", std::process::id(), id));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.0 B");
        assert_eq!(format_size(1023), "1023.0 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(2 * 1024u64.pow(4)), "2.0 TB");
    }

    #[test]
    fn test_parent_segments_rejected_before_mutation() {
        let root = temp_root();
        let sandbox = SandboxFs::new(&root).unwrap();

        for path in ["../etc/passwd", "a/../../b", "a/b/..", ".."] {
            let err = sandbox.write(path, "x").unwrap_err();
            assert!(matches!(err, CoreError::Validation(_)), "{path}");
        }
        assert!(!root.parent().unwrap().join("etc/passwd").exists());
        assert!(fs::read_dir(&root).unwrap().next().is_none());

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_absolute_paths_rejected() {
        let root = temp_root();
        let sandbox = SandboxFs::new(&root).unwrap();
        let target = root.join("abs.txt");

        let err = sandbox
            .write(target.to_str().unwrap(), "x")
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(!target.exists());
        assert!(matches!(sandbox.read("/etc/hostname"), Err(CoreError::Validation(_))));

        fs::remove_dir_all(root).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let root = temp_root();
        let outside = temp_root();
        let sandbox = SandboxFs::new(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("escape")).unwrap();

        let err = sandbox.write("escape/owned.txt", "x").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(!outside.join("owned.txt").exists());

        fs::remove_dir_all(root).ok();
        fs::remove_dir_all(outside).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_rejected() {
        let root = temp_root();
        let outside = temp_root();
        let sandbox = SandboxFs::new(&root).unwrap();
        let target = outside.join("pwned.txt");
        std::os::unix::fs::symlink(&target, root.join("link")).unwrap();

        let err = sandbox.write("link", "escaped").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
        assert!(!target.exists());

        // A relative link that climbs out is refused the same way.
        std::os::unix::fs::symlink("../elsewhere/out.txt", root.join("rel")).unwrap();
        assert!(matches!(sandbox.write("rel", "x"), Err(CoreError::Validation(_))));
        assert!(matches!(sandbox.read("link"), Err(CoreError::Validation(_))));

        fs::remove_dir_all(root).ok();
        fs::remove_dir_all(outside).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_allowed() {
        let root = temp_root();
        let sandbox = SandboxFs::new(&root).unwrap();
        fs::create_dir(root.join("data")).unwrap();
        std::os::unix::fs::symlink("data", root.join("alias")).unwrap();

        assert_eq!(sandbox.write("alias/notes.txt", "hi").unwrap(), 2);
        assert_eq!(fs::read_to_string(root.join("data/notes.txt")).unwrap(), "hi");

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_staging_dir_is_reserved() {
        let root = temp_root();
        let sandbox = SandboxFs::new(&root).unwrap();
        fs::create_dir_all(root.join(STAGING_DIR).join("exec-1")).unwrap();
        sandbox.write("keep.txt", "x").unwrap();

        assert!(matches!(
            sandbox.write(&format!("{STAGING_DIR}/exec-1/script.py"), "x"),
            Err(CoreError::Validation(_))
        ));
        let names: Vec<_> = sandbox.list("").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["keep.txt"]);
        assert_eq!(sandbox.tree("").unwrap(), ".\n└── keep.txt (1.0 B)\n");

        assert_eq!(sandbox.cleanup().unwrap(), 1);
        assert!(root.join(STAGING_DIR).join("exec-1").is_dir());

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_write_read_delete() {
        let root = temp_root();
        let sandbox = SandboxFs::new(&root).unwrap();

        assert_eq!(sandbox.write("nested/dirs/data.csv", "a,b\n1,2\n").unwrap(), 8);
        assert_eq!(sandbox.read("nested/dirs/data.csv").unwrap(), "a,b\n1,2\n");

        sandbox.delete("nested/dirs/data.csv").unwrap();
        assert!(matches!(
            sandbox.read("nested/dirs/data.csv"),
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(sandbox.delete("nested"), Err(CoreError::NotFound(_))));

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_list_orders_dirs_first() {
        let root = temp_root();
        let sandbox = SandboxFs::new(&root).unwrap();
        sandbox.write("b.txt", "hello").unwrap();
        sandbox.write("a.txt", "").unwrap();
        fs::create_dir(root.join("zdir")).unwrap();

        let entries = sandbox.list("").unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zdir", "a.txt", "b.txt"]);
        assert!(entries[0].is_dir);
        assert_eq!(entries[2].size, 5);

        assert!(matches!(sandbox.list("missing"), Err(CoreError::NotFound(_))));
        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_tree_rendering() {
        let root = temp_root();
        let sandbox = SandboxFs::new(&root).unwrap();
        sandbox.write("src/main.py", "print(1)\n").unwrap();
        sandbox.write("src/util/helpers.py", "").unwrap();
        sandbox.write("readme.txt", "hi").unwrap();

        let tree = sandbox.tree("").unwrap();
        let expected = "\
.
├── readme.txt (2.0 B)
└── src/
    ├── main.py (9.0 B)
    └── util/
        └── helpers.py (0.0 B)
";
        assert_eq!(tree, expected);

        let sub = sandbox.tree("src/util").unwrap();
        assert_eq!(sub, "src/util\n└── helpers.py (0.0 B)\n");

        fs::remove_dir_all(root).ok();
    }

    #[test]
    fn test_cleanup_empties_root() {
        let root = temp_root();
        let sandbox = SandboxFs::new(&root).unwrap();
        sandbox.write("one.txt", "1").unwrap();
        sandbox.write("dir/two.txt", "2").unwrap();

        assert_eq!(sandbox.cleanup().unwrap(), 2);
        assert!(sandbox.list("").unwrap().is_empty());
        assert!(root.exists());

        fs::remove_dir_all(root).ok();
    }
}
