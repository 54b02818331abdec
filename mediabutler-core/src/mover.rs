//! Single-file move execution with sibling handling.
//!
//! Pre-flight checks run before any mutation; sibling failures degrade to
//! warnings so one unreadable subtitle never strands a video mid-pipeline.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{ButlerError, Result};
use crate::fsx::FileSystem;
use crate::pathing::{component_errors, parent_usable};

/// Non-video companions moved along with the primary file.
pub const SIBLING_EXTENSIONS: &[&str] = &[".srt", ".sub", ".ass", ".nfo", ".jpg", ".png"];

/// Free space must cover the file plus this headroom factor.
pub const SPACE_HEADROOM: f64 = 1.1;

#[derive(Debug, Clone, PartialEq)]
pub struct MoveReceipt {
    pub target_path: PathBuf,
    pub file_size_bytes: u64,
    pub siblings_moved: Vec<PathBuf>,
    pub siblings_failed: Vec<(PathBuf, String)>,
    pub duration_ms: i64,
}

pub struct FileMover {
    fs: Arc<dyn FileSystem>,
}

impl std::fmt::Debug for FileMover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMover").finish()
    }
}

impl FileMover {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self { fs }
    }

    /// All checks before any mutation: source readable, parent reachable,
    /// space with headroom, and a character-clean target.
    pub async fn preflight(&self, source: &Path, target: &Path) -> Result<()> {
        let stat = match self.fs.stat(source).await {
            Ok(stat) => stat,
            Err(ButlerError::Io(err)) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ButlerError::Path(format!(
                    "source file {} does not exist",
                    source.display()
                )));
            }
            Err(other) => return Err(other),
        };
        if !stat.is_file {
            return Err(ButlerError::Validation(format!(
                "source {} is not a regular file",
                source.display()
            )));
        }
        // Readability probe; a stat can succeed where an open cannot.
        drop(self.fs.open_read(source).await?);

        let char_problems = component_errors(target);
        if !char_problems.is_empty() {
            return Err(ButlerError::Path(char_problems.join("; ")));
        }

        let parent = target
            .parent()
            .ok_or_else(|| ButlerError::Path("target has no parent directory".to_string()))?;
        if !parent_usable(self.fs.as_ref(), parent).await {
            return Err(ButlerError::Permission(format!(
                "target parent {} is not writable or creatable",
                parent.display()
            )));
        }

        let required = required_space(stat.len);
        let available = self.fs.free_space(target).await?;
        if available < required {
            return Err(ButlerError::Space {
                required,
                available,
            });
        }

        Ok(())
    }

    /// Files in the source directory sharing the basename with a companion
    /// extension.
    pub async fn discover_siblings(&self, source: &Path) -> Result<Vec<PathBuf>> {
        let Some(dir) = source.parent() else {
            return Ok(Vec::new());
        };
        let Some(stem) = source.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            return Ok(Vec::new());
        };

        let mut siblings = Vec::new();
        for entry in self.fs.list_dir(dir).await? {
            if entry == source {
                continue;
            }
            let name = entry
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let Some((entry_stem, entry_ext)) = name.rsplit_once('.') else {
                continue;
            };
            let dotted = format!(".{}", entry_ext.to_lowercase());
            if entry_stem == stem && SIBLING_EXTENSIONS.contains(&dotted.as_str()) {
                siblings.push(entry);
            }
        }
        Ok(siblings)
    }

    /// Move `source` to `target`, carrying siblings along. The primary move
    /// is fatal on failure; sibling failures are collected as warnings.
    pub async fn move_file(&self, source: &Path, target: &Path) -> Result<MoveReceipt> {
        let started = Instant::now();
        self.preflight(source, target).await?;

        let siblings = self.discover_siblings(source).await.unwrap_or_default();

        if let Some(parent) = target.parent() {
            self.fs.create_dir_all(parent).await?;
        }

        let size = self.fs.stat(source).await?.len;
        self.transfer(source, target).await?;
        debug!(source = %source.display(), target = %target.display(), "moved primary file");

        let target_stem = target
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target_parent = target.parent().unwrap_or(Path::new("/")).to_path_buf();

        let mut siblings_moved = Vec::new();
        let mut siblings_failed = Vec::new();
        for sibling in siblings {
            let extension = sibling
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            let sibling_target = target_parent.join(format!("{target_stem}.{extension}"));
            match self.transfer(&sibling, &sibling_target).await {
                Ok(()) => siblings_moved.push(sibling_target),
                Err(err) => {
                    warn!(
                        sibling = %sibling.display(),
                        error = %err,
                        "sibling move failed"
                    );
                    siblings_failed.push((sibling, err.to_string()));
                }
            }
        }

        Ok(MoveReceipt {
            target_path: target.to_path_buf(),
            file_size_bytes: size,
            siblings_moved,
            siblings_failed,
            duration_ms: started.elapsed().as_millis() as i64,
        })
    }

    /// Rename when the volumes match; otherwise stream-copy, flush, and
    /// delete the source. The copy path cleans up its own partial output.
    async fn transfer(&self, from: &Path, to: &Path) -> Result<()> {
        match self.fs.rename(from, to).await {
            Ok(()) => Ok(()),
            Err(ButlerError::Io(err)) if err.kind() == io::ErrorKind::CrossesDevices => {
                self.fs.copy_streaming(from, to).await?;
                self.fs.remove_file(from).await?;
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}

pub fn required_space(file_size: u64) -> u64 {
    (file_size as f64 * SPACE_HEADROOM).ceil() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsx::MemoryFs;

    fn mover(fs: &Arc<MemoryFs>) -> FileMover {
        FileMover::new(Arc::clone(fs) as Arc<dyn FileSystem>)
    }

    #[tokio::test]
    async fn moves_primary_and_siblings() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_file("/watch/ep.mkv", b"video".to_vec());
        fs.add_file("/watch/ep.srt", b"subs".to_vec());
        fs.add_file("/watch/ep.nfo", b"meta".to_vec());
        fs.add_file("/watch/other.srt", b"unrelated".to_vec());

        let receipt = mover(&fs)
            .move_file(Path::new("/watch/ep.mkv"), Path::new("/library/SHOW/ep.mkv"))
            .await
            .unwrap();

        assert_eq!(receipt.target_path, PathBuf::from("/library/SHOW/ep.mkv"));
        assert_eq!(receipt.file_size_bytes, 5);
        assert_eq!(receipt.siblings_moved.len(), 2);
        assert!(receipt.siblings_failed.is_empty());
        assert!(fs.contents(Path::new("/library/SHOW/ep.srt")).is_some());
        assert!(fs.contents(Path::new("/watch/other.srt")).is_some());
        assert!(fs.contents(Path::new("/watch/ep.mkv")).is_none());
    }

    #[tokio::test]
    async fn sibling_names_follow_a_conflict_renamed_primary() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_file("/watch/ep.mkv", b"video".to_vec());
        fs.add_file("/watch/ep.srt", b"subs".to_vec());

        let receipt = mover(&fs)
            .move_file(
                Path::new("/watch/ep.mkv"),
                Path::new("/library/SHOW/ep (1).mkv"),
            )
            .await
            .unwrap();

        assert_eq!(
            receipt.siblings_moved,
            vec![PathBuf::from("/library/SHOW/ep (1).srt")]
        );
    }

    #[tokio::test]
    async fn missing_source_is_a_path_error() {
        let fs = Arc::new(MemoryFs::new());
        let err = mover(&fs)
            .move_file(Path::new("/watch/gone.mkv"), Path::new("/library/S/gone.mkv"))
            .await
            .unwrap_err();
        assert!(matches!(err, ButlerError::Path(_)));
    }

    #[tokio::test]
    async fn insufficient_space_fails_preflight_without_mutation() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_sized_file("/watch/big.mkv", 1000);
        fs.set_free_space(1050); // below the 1.1x headroom

        let err = mover(&fs)
            .move_file(Path::new("/watch/big.mkv"), Path::new("/library/S/big.mkv"))
            .await
            .unwrap_err();
        assert!(matches!(err, ButlerError::Space { required: 1100, .. }));
        assert!(fs.contents(Path::new("/watch/big.mkv")).is_some());
        assert!(fs.contents(Path::new("/library/S/big.mkv")).is_none());
    }

    #[tokio::test]
    async fn cross_volume_move_falls_back_to_copy_and_delete() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_file("/watch/ep.mkv", b"video".to_vec());
        fs.set_cross_device(true);

        let receipt = mover(&fs)
            .move_file(Path::new("/watch/ep.mkv"), Path::new("/library/S/ep.mkv"))
            .await
            .unwrap();

        assert_eq!(receipt.target_path, PathBuf::from("/library/S/ep.mkv"));
        assert!(fs.contents(Path::new("/watch/ep.mkv")).is_none());
        assert_eq!(fs.contents(Path::new("/library/S/ep.mkv")).unwrap(), b"video");
    }

    #[tokio::test]
    async fn readonly_target_parent_is_a_permission_error() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_file("/watch/ep.mkv", b"video".to_vec());
        fs.set_readonly_dir("/frozen");

        let err = mover(&fs)
            .move_file(Path::new("/watch/ep.mkv"), Path::new("/frozen/S/ep.mkv"))
            .await
            .unwrap_err();
        assert!(matches!(err, ButlerError::Permission(_)));
    }
}
