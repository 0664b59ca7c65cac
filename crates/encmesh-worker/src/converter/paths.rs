//! Resolution of task paths against the worker's roots.

use std::path::{Path, PathBuf};

use encmesh_models::Task;

/// Maps the relative paths carried by tasks onto this node's filesystem.
///
/// Temp files live under the local temp root. Sources and final parts live
/// under the shared root; absolute paths are kept as they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePathManager {
    temp_root: PathBuf,
    shared_root: PathBuf,
}

impl FilePathManager {
    pub fn new(temp_root: impl Into<PathBuf>, shared_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
            shared_root: shared_root.into(),
        }
    }

    pub fn temp_root(&self) -> &Path {
        &self.temp_root
    }

    pub fn shared_root(&self) -> &Path {
        &self.shared_root
    }

    /// Encoder output of the task.
    pub fn temp_file(&self, task: &Task) -> PathBuf {
        self.temp_root.join(&task.temp_file)
    }

    /// Working directory of the task, removed once it finishes.
    pub fn temp_dir(&self, task: &Task) -> PathBuf {
        self.temp_root.join(task.work_dir())
    }

    /// Published part file.
    pub fn final_file(&self, task: &Task) -> PathBuf {
        self.shared(&task.final_file)
    }

    pub fn source_file(&self, source: &Path) -> PathBuf {
        self.shared(source)
    }

    fn shared(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.shared_root.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encmesh_models::{JobId, Unit};

    #[test]
    fn test_paths_resolve_against_roots() {
        let paths = FilePathManager::new("/tmp/enc", "/srv/shared");
        let task = Task::new(
            4,
            JobId::from_string("j1"),
            1,
            0,
            1000,
            1,
            Unit::Seconds,
            "j1/4/part-4.ogg",
            "out/parts/4/part-4.ogg",
        );

        assert_eq!(paths.temp_file(&task), PathBuf::from("/tmp/enc/j1/4/part-4.ogg"));
        assert_eq!(paths.temp_dir(&task), PathBuf::from("/tmp/enc/j1/4"));
        assert_eq!(
            paths.final_file(&task),
            PathBuf::from("/srv/shared/out/parts/4/part-4.ogg")
        );
        assert!(paths.temp_file(&task).starts_with(paths.temp_dir(&task)));
    }

    #[test]
    fn test_absolute_source_kept() {
        let paths = FilePathManager::new("/tmp/enc", "/srv/shared");
        assert_eq!(
            paths.source_file(Path::new("/media/in.mkv")),
            PathBuf::from("/media/in.mkv")
        );
        assert_eq!(
            paths.source_file(Path::new("in.mkv")),
            PathBuf::from("/srv/shared/in.mkv")
        );
    }
}
