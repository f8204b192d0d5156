use std::path::{Path, PathBuf};

use crate::{AvatarError, Result, StageCount};

const MEDIA_EXTENSION: &str = "mp4";

/// Directory holding one clip per stage, named by stage index (`0.mp4`,
/// `1.mp4`, ...).
#[derive(Debug, Clone)]
pub struct MediaLibrary {
    root: PathBuf,
}

impl MediaLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, stage_index: usize) -> PathBuf {
        self.root.join(format!("{stage_index}.{MEDIA_EXTENSION}"))
    }

    /// Clip paths for every stage of `count`, in stage order.
    pub fn paths_for(&self, count: StageCount) -> Vec<PathBuf> {
        (0..count.get()).map(|index| self.path_for(index)).collect()
    }

    /// Clips required by `count` that are not on disk.
    pub fn missing(&self, count: StageCount) -> Vec<PathBuf> {
        self.paths_for(count)
            .into_iter()
            .filter(|path| !path.is_file())
            .collect()
    }

    /// Fails with the first missing clip for `count`.
    pub fn ensure_available(&self, count: StageCount) -> Result<()> {
        match self.missing(count).into_iter().next() {
            Some(path) => Err(AvatarError::MissingFile(path)),
            None => Ok(()),
        }
    }

    /// Stage counts whose clips are all present.
    pub fn available_counts(&self) -> Vec<StageCount> {
        StageCount::ALL
            .into_iter()
            .filter(|count| self.missing(*count).is_empty())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn library_with(files: &[&str], tag: &str) -> MediaLibrary {
        let root = std::env::temp_dir().join(format!(
            "video-avatar-assets-{}-{tag}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        for file in files {
            fs::write(root.join(file), b"").unwrap();
        }
        MediaLibrary::new(root)
    }

    #[test]
    fn names_clips_by_stage_index() {
        let library = MediaLibrary::new("assets");
        let paths = library.paths_for(StageCount::Three);
        assert_eq!(
            paths,
            vec![
                PathBuf::from("assets/0.mp4"),
                PathBuf::from("assets/1.mp4"),
                PathBuf::from("assets/2.mp4"),
            ]
        );
    }

    #[test]
    fn resolves_present_clips() {
        let library = library_with(&["0.mp4", "1.mp4", "2.mp4"], "present");
        assert!(library.ensure_available(StageCount::Three).is_ok());
        assert_eq!(
            library.available_counts(),
            vec![StageCount::Two, StageCount::Three]
        );
        fs::remove_dir_all(library.root()).unwrap();
    }

    #[test]
    fn errors_on_missing_clips() {
        let library = library_with(&["0.mp4", "1.mp4", "2.mp4"], "missing");
        let err = library.ensure_available(StageCount::Four).unwrap_err();
        assert!(format!("{err}").contains("3.mp4"));
        assert_eq!(library.missing(StageCount::Four).len(), 1);
        fs::remove_dir_all(library.root()).unwrap();
    }
}
