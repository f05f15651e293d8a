//! Source tree collaborator: project discovery, snapshot loading and atomic
//! multi-file commits.
//!
//! Snapshot paths are relative to the project root, so the same snapshot can
//! be mirrored into a scratch workspace for the test harness.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::core::config::IoConfig;
use crate::core::errors::{Result, SmellwrightError};
use crate::core::file_utils::{FileReader, FileWriter};
use crate::core::snapshot::ProjectSnapshot;
use crate::detectors::engine::ScanWarning;

/// A project on disk
#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
    /// Set when the project was opened on a single file
    single_file: Option<PathBuf>,
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
    max_file_size: u64,
}

/// Snapshot plus the files that could not be read
#[derive(Debug, Clone, Default)]
pub struct LoadedProject {
    /// Every Python file that could be read
    pub snapshot: ProjectSnapshot,
    /// Files skipped as unreadable, binary or too large
    pub warnings: Vec<ScanWarning>,
}

impl SourceTree {
    /// Open the project at `path`. A file path opens a one-file project
    /// rooted at its directory. Failure to find the path is fatal.
    pub fn open(path: impl AsRef<Path>, config: &IoConfig) -> Result<Self> {
        let path = path.as_ref();
        let canonical = fs::canonicalize(path).map_err(|e| {
            SmellwrightError::io(format!("Cannot open project {}", path.display()), e)
        })?;

        let (root, single_file) = if canonical.is_file() {
            let root = canonical
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| SmellwrightError::validation("File has no parent directory"))?;
            let name = canonical
                .file_name()
                .map(PathBuf::from)
                .ok_or_else(|| SmellwrightError::validation("File has no name"))?;
            (root, Some(name))
        } else {
            (canonical, None)
        };

        Ok(Self {
            root,
            single_file,
            include: compile_globset(&config.include_patterns)?,
            exclude: compile_globset(&config.exclude_patterns)?,
            max_file_size: config.max_file_size_bytes,
        })
    }

    /// Project root; snapshot paths are relative to it
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Project-relative paths of every included file, sorted
    pub fn discover(&self) -> Result<Vec<PathBuf>> {
        if let Some(file) = &self.single_file {
            return Ok(vec![file.clone()]);
        }

        let walker = WalkBuilder::new(&self.root)
            .standard_filters(true)
            .git_ignore(true)
            .git_exclude(true)
            .hidden(false)
            .build();

        let mut collected = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Failed to walk directory: {err}");
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if self.should_keep(entry.path(), relative) {
                collected.push(relative.to_path_buf());
            }
        }

        collected.sort();
        info!("File discovery completed: {} files selected", collected.len());
        Ok(collected)
    }

    fn should_keep(&self, absolute: &Path, relative: &Path) -> bool {
        if self.include.as_ref().is_some_and(|glob| !glob.is_match(relative)) {
            return false;
        }
        if self.exclude.as_ref().is_some_and(|glob| glob.is_match(relative)) {
            return false;
        }
        if self.max_file_size > 0 {
            if let Ok(metadata) = fs::metadata(absolute) {
                if metadata.len() > self.max_file_size {
                    debug!("Skipping large file {} ({} bytes)", relative.display(), metadata.len());
                    return false;
                }
            }
        }
        true
    }

    /// Read every discovered file. Unreadable files are skipped and reported;
    /// only a failure to walk the project is an error.
    pub fn load(&self) -> Result<LoadedProject> {
        let mut files = Vec::new();
        let mut warnings = Vec::new();
        for relative in self.discover()? {
            match FileReader::read_to_string(&self.root.join(&relative)) {
                Ok(source) => files.push((relative, source)),
                Err(err) => {
                    warn!("Skipping {}: {err}", relative.display());
                    warnings.push(ScanWarning {
                        file_path: relative,
                        analyzer: None,
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(LoadedProject {
            snapshot: ProjectSnapshot::from_files(files),
            warnings,
        })
    }

    /// Write every file that differs between `previous` and `next`.
    ///
    /// All new contents are staged next to their targets first; only then are
    /// they renamed into place. If a rename fails, the files already replaced
    /// are restored from `previous`, so either every file is updated or none.
    pub fn commit(
        &self,
        previous: &ProjectSnapshot,
        next: &ProjectSnapshot,
    ) -> Result<Vec<PathBuf>> {
        let changed: Vec<PathBuf> = next
            .diff_paths(previous)
            .into_iter()
            .filter(|path| next.contains(path))
            .collect();
        if changed.is_empty() {
            return Ok(changed);
        }

        let mut staged = Vec::with_capacity(changed.len());
        for path in &changed {
            let content = next.get(path).unwrap_or_default();
            staged.push((path.clone(), self.stage(path, content)?));
        }

        let mut replaced: Vec<PathBuf> = Vec::new();
        for (path, temp) in staged {
            let target = self.root.join(&path);
            if let Ok(metadata) = fs::metadata(&target) {
                if let Err(err) = fs::set_permissions(temp.path(), metadata.permissions()) {
                    warn!("Could not copy permissions onto {}: {err}", target.display());
                }
            }
            if let Err(err) = temp.persist(&target) {
                warn!("Commit of {} failed, restoring {} files", target.display(), replaced.len());
                self.restore(previous, &replaced);
                return Err(SmellwrightError::io(
                    format!("Failed to replace {}", target.display()),
                    err.error,
                ));
            }
            replaced.push(path);
        }

        info!("Committed {} files", replaced.len());
        Ok(replaced)
    }

    fn stage(&self, path: &Path, content: &str) -> Result<NamedTempFile> {
        let target = self.root.join(path);
        let parent = target
            .parent()
            .ok_or_else(|| {
                SmellwrightError::validation(format!("{} has no parent", target.display()))
            })?;
        let mut temp = NamedTempFile::new_in(parent).map_err(|e| {
            SmellwrightError::io(format!("Failed to stage {}", target.display()), e)
        })?;
        temp.write_all(content.as_bytes())
            .and_then(|()| temp.as_file().sync_all())
            .map_err(|e| SmellwrightError::io(format!("Failed to stage {}", target.display()), e))?;
        Ok(temp)
    }

    fn restore(&self, previous: &ProjectSnapshot, paths: &[PathBuf]) {
        for path in paths {
            let Some(original) = previous.get(path) else {
                continue;
            };
            if let Err(err) = FileWriter::write_atomic(&self.root.join(path), original) {
                warn!("Failed to restore {}: {err}", path.display());
            }
        }
    }
}

fn compile_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    let mut builder = GlobSetBuilder::new();
    let mut added = false;

    for pattern in patterns {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }

        let glob = GlobBuilder::new(pattern)
            .literal_separator(false)
            .build()
            .map_err(|err| {
                SmellwrightError::config(format!("Invalid glob pattern '{pattern}': {err}"))
            })?;
        builder.add(glob);
        added = true;
    }

    if added {
        builder
            .build()
            .map(Some)
            .map_err(|err| SmellwrightError::config(format!("Failed to build glob set: {err}")))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::snapshot::FileEdit;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pkg")).unwrap();
        fs::create_dir_all(dir.path().join(".venv/lib")).unwrap();
        fs::write(dir.path().join("main.py"), "import pkg.util\n").unwrap();
        fs::write(dir.path().join("pkg/util.py"), "x = 1\n").unwrap();
        fs::write(dir.path().join("pkg/notes.txt"), "not python\n").unwrap();
        fs::write(dir.path().join(".venv/lib/site.py"), "vendored = True\n").unwrap();
        dir
    }

    #[test]
    fn test_discover_applies_globs() {
        let dir = project();
        let tree = SourceTree::open(dir.path(), &IoConfig::default()).unwrap();
        assert_eq!(
            tree.discover().unwrap(),
            vec![PathBuf::from("main.py"), PathBuf::from("pkg/util.py")]
        );
    }

    #[test]
    fn test_missing_project_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = SourceTree::open(dir.path().join("nope"), &IoConfig::default()).unwrap_err();
        assert!(matches!(err, SmellwrightError::Io { .. }));
    }

    #[test]
    fn test_single_file_project() {
        let dir = project();
        let tree = SourceTree::open(dir.path().join("pkg/util.py"), &IoConfig::default()).unwrap();
        let loaded = tree.load().unwrap();
        assert_eq!(loaded.snapshot.get(Path::new("util.py")), Some("x = 1\n"));
        assert_eq!(loaded.snapshot.len(), 1);
    }

    #[test]
    fn test_binary_file_becomes_warning() {
        let dir = project();
        fs::write(dir.path().join("blob.py"), [0u8, 0, 0, 1]).unwrap();
        let tree = SourceTree::open(dir.path(), &IoConfig::default()).unwrap();
        let loaded = tree.load().unwrap();
        assert_eq!(loaded.snapshot.len(), 2);
        assert_eq!(loaded.warnings.len(), 1);
        assert_eq!(loaded.warnings[0].file_path, PathBuf::from("blob.py"));
    }

    #[test]
    fn test_commit_writes_only_changed_files() {
        let dir = project();
        let tree = SourceTree::open(dir.path(), &IoConfig::default()).unwrap();
        let before = tree.load().unwrap().snapshot;
        let after = before
            .apply(&[FileEdit {
                path: PathBuf::from("pkg/util.py"),
                new_source: "x = 2\n".to_string(),
            }])
            .unwrap();

        let written = tree.commit(&before, &after).unwrap();
        assert_eq!(written, vec![PathBuf::from("pkg/util.py")]);
        assert_eq!(fs::read_to_string(dir.path().join("pkg/util.py")).unwrap(), "x = 2\n");
        assert_eq!(fs::read_to_string(dir.path().join("main.py")).unwrap(), "import pkg.util\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_commit_keeps_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = project();
        let script = dir.path().join("pkg/util.py");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let tree = SourceTree::open(dir.path(), &IoConfig::default()).unwrap();
        let before = tree.load().unwrap().snapshot;
        let after = before
            .apply(&[FileEdit {
                path: PathBuf::from("pkg/util.py"),
                new_source: "x = 3\n".to_string(),
            }])
            .unwrap();

        tree.commit(&before, &after).unwrap();
        let mode = fs::metadata(&script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(fs::read_to_string(&script).unwrap(), "x = 3\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_commit_leaves_every_file_unchanged() {
        use std::os::unix::fs::PermissionsExt;

        let dir = project();
        let tree = SourceTree::open(dir.path(), &IoConfig::default()).unwrap();
        let before = tree.load().unwrap().snapshot;
        let after = before
            .apply(&[
                FileEdit {
                    path: PathBuf::from("main.py"),
                    new_source: "import pkg.util as u\n".to_string(),
                },
                FileEdit {
                    path: PathBuf::from("pkg/util.py"),
                    new_source: "x = 3\n".to_string(),
                },
            ])
            .unwrap();

        let pkg = dir.path().join("pkg");
        fs::set_permissions(&pkg, fs::Permissions::from_mode(0o555)).unwrap();
        let result = tree.commit(&before, &after);
        fs::set_permissions(&pkg, fs::Permissions::from_mode(0o755)).unwrap();

        // running as root ignores directory permissions
        if result.is_err() {
            assert_eq!(
                fs::read_to_string(dir.path().join("main.py")).unwrap(),
                "import pkg.util\n"
            );
            assert_eq!(fs::read_to_string(pkg.join("util.py")).unwrap(), "x = 1\n");
        }
    }
}
