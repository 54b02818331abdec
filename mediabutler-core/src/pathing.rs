//! Target path generation: sanitization, template substitution, validation,
//! and on-disk conflict resolution.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use mediabutler_model::TrackedFile;

use crate::clock::Clock;
use crate::error::{ButlerError, Result};
use crate::fsx::FileSystem;

pub const DEFAULT_TEMPLATE: &str = "{library_root}/{CATEGORY}/{filename}";

/// Above this length a warning is attached; beyond the platform maximum the
/// path is rejected outright.
pub const PATH_WARN_LENGTH: usize = 240;
pub const PATH_HARD_LENGTH: usize = 4096;

/// Numbered-suffix attempts before falling back to a timestamped name.
pub const MAX_CONFLICT_ATTEMPTS: u32 = 10;

const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7",
    "COM8", "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Structured outcome of target-path validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[derive(serde::Serialize, serde::Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedPath {
    pub target: PathBuf,
    pub report: ValidationReport,
}

/// Make one path component safe on every filesystem we care about.
///
/// Replaces reserved characters and control bytes with `_`, collapses `_`
/// runs, trims dots and spaces from the ends, and guards Windows reserved
/// device names. Total: every input produces a usable component.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = false;
    for c in raw.chars() {
        let mapped = if INVALID_CHARS.contains(&c) || c.is_control() {
            '_'
        } else {
            c
        };
        if mapped == '_' {
            if last_was_underscore {
                continue;
            }
            last_was_underscore = true;
        } else {
            last_was_underscore = false;
        }
        out.push(mapped);
    }

    let trimmed = out.trim_matches(|c| c == '.' || c == ' ').to_string();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }

    let stem = trimmed.split('.').next().unwrap_or(&trimmed);
    if RESERVED_NAMES.contains(&stem.to_uppercase().as_str()) {
        return format!("_{trimmed}");
    }
    trimmed
}

fn substitute(template: &str, var: &str, value: &str) -> String {
    template.replace(&format!("{{{var}}}"), value)
}

fn clean_absolute(path: &Path) -> Result<PathBuf> {
    if !path.is_absolute() {
        return Err(ButlerError::Path(format!(
            "target {} is not absolute",
            path.display()
        )));
    }
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => clean.push(component.as_os_str()),
            Component::Normal(seg) => clean.push(seg),
            Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(ButlerError::Path(format!(
                        "target {} escapes the filesystem root",
                        path.display()
                    )));
                }
            }
        }
    }
    Ok(clean)
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    }
}

/// Builds and validates target paths for confirmed files.
pub struct PathBuilder {
    fs: Arc<dyn FileSystem>,
    clock: Arc<dyn Clock>,
    library_root: PathBuf,
    template: String,
}

impl std::fmt::Debug for PathBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathBuilder")
            .field("library_root", &self.library_root)
            .field("template", &self.template)
            .finish()
    }
}

impl PathBuilder {
    pub fn new(fs: Arc<dyn FileSystem>, clock: Arc<dyn Clock>, library_root: PathBuf) -> Self {
        Self::with_template(fs, clock, library_root, DEFAULT_TEMPLATE)
    }

    pub fn with_template(
        fs: Arc<dyn FileSystem>,
        clock: Arc<dyn Clock>,
        library_root: PathBuf,
        template: impl Into<String>,
    ) -> Self {
        Self {
            fs,
            clock,
            library_root,
            template: template.into(),
        }
    }

    /// Pure template rendering: no existence checks, no conflict handling.
    pub fn render(&self, file: &TrackedFile, category: &str) -> Result<PathBuf> {
        let category = sanitize_component(category).to_uppercase();
        let filename = sanitize_component(&file.file_name);
        let (basename, extension) = split_name(&filename);

        let mut rendered = self.template.clone();
        rendered = substitute(&rendered, "library_root", &self.library_root.to_string_lossy());
        rendered = substitute(&rendered, "CATEGORY", &category);
        rendered = substitute(&rendered, "filename", &filename);
        rendered = substitute(&rendered, "hash", file.hash.as_str());
        rendered = substitute(&rendered, "basename", basename);
        rendered = substitute(&rendered, "extension", extension);

        clean_absolute(Path::new(&rendered))
    }

    /// Validation half of the build: character, length, and parent checks.
    pub async fn validate(&self, target: &Path) -> ValidationReport {
        let mut report = ValidationReport::default();
        report.errors.extend(component_errors(target));

        let length = target.to_string_lossy().chars().count();
        if length > PATH_HARD_LENGTH {
            report.errors.push(format!(
                "path length {length} exceeds the platform maximum {PATH_HARD_LENGTH}"
            ));
        } else if length > PATH_WARN_LENGTH {
            report
                .warnings
                .push(format!("path length {length} exceeds {PATH_WARN_LENGTH} characters"));
            report
                .recommendations
                .push("consider a shorter category name".to_string());
        }

        match target.parent() {
            Some(parent) => {
                if !parent_usable(self.fs.as_ref(), parent).await {
                    report.errors.push(format!(
                        "parent directory {} is not writable or creatable",
                        parent.display()
                    ));
                }
            }
            None => report.errors.push("target has no parent directory".to_string()),
        }

        report
    }

    /// Full build: render, validate, and pick a conflict-free final path.
    pub async fn build(&self, file: &TrackedFile, category: &str) -> Result<PlannedPath> {
        let target = self.render(file, category)?;
        let mut report = self.validate(&target).await;

        let target = if report.is_ok() {
            let resolved = self.resolve_conflict(&target).await?;
            if resolved != target {
                report
                    .warnings
                    .push(format!("target existed; renamed to {}", resolved.display()));
            }
            resolved
        } else {
            target
        };

        Ok(PlannedPath { target, report })
    }

    /// Finds a name that does not collide with an existing file: numbered
    /// suffixes first, a timestamped name once those are exhausted.
    pub async fn resolve_conflict(&self, target: &Path) -> Result<PathBuf> {
        if !self.fs.exists(target).await? {
            return Ok(target.to_path_buf());
        }

        let parent = target
            .parent()
            .ok_or_else(|| ButlerError::Path("target has no parent directory".to_string()))?;
        let name = target
            .file_name()
            .ok_or_else(|| ButlerError::Path("target has no file name".to_string()))?
            .to_string_lossy();
        let (basename, extension) = split_name(&name);

        for n in 1..=MAX_CONFLICT_ATTEMPTS {
            let candidate = parent.join(format!("{basename} ({n}){extension}"));
            if !self.fs.exists(&candidate).await? {
                return Ok(candidate);
            }
        }

        let stamp = self.clock.now_utc().format("%Y%m%d_%H%M%S");
        Ok(parent.join(format!("{basename}_{stamp}{extension}")))
    }
}

/// Character-level problems in a path's components, shared by the builder's
/// validation and the mover's pre-flight.
pub fn component_errors(target: &Path) -> Vec<String> {
    let mut errors = Vec::new();
    for component in target.components() {
        if let Component::Normal(seg) = component {
            let seg = seg.to_string_lossy();
            if seg.chars().any(|c| INVALID_CHARS.contains(&c) || c.is_control()) {
                errors.push(format!("path component {seg:?} contains invalid characters"));
            }
        }
    }
    errors
}

/// A parent is usable when it exists and is writable, or when its nearest
/// existing ancestor is writable so it can be created.
pub async fn parent_usable(fs: &dyn FileSystem, parent: &Path) -> bool {
    let mut current = parent.to_path_buf();
    loop {
        match fs.exists(&current).await {
            Ok(true) => return fs.is_writable_dir(&current).await.unwrap_or(false),
            Ok(false) => match current.parent() {
                Some(up) => current = up.to_path_buf(),
                None => return false,
            },
            Err(_) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::fsx::MemoryFs;
    use chrono::{TimeZone, Utc};
    use mediabutler_model::FileHash;

    fn tracked(name: &str) -> TrackedFile {
        TrackedFile::new(
            FileHash::from_digest("0".repeat(64)),
            PathBuf::from(format!("/watch/{name}")),
            1000,
            Utc::now(),
        )
    }

    fn builder(fs: Arc<MemoryFs>) -> PathBuilder {
        let clock = Arc::new(FixedClock(
            Utc.with_ymd_and_hms(2026, 8, 1, 12, 30, 0).unwrap(),
        ));
        PathBuilder::new(fs, clock, PathBuf::from("/library"))
    }

    #[test]
    fn sanitize_replaces_invalid_characters() {
        assert_eq!(sanitize_component("Doctor: Who?"), "Doctor_ Who_");
        assert_eq!(sanitize_component("a<b>c"), "a_b_c");
        assert_eq!(sanitize_component("  .name. "), "name");
        assert_eq!(sanitize_component("???"), "unknown");
        assert_eq!(sanitize_component("CON"), "_CON");
        assert_eq!(sanitize_component("lpt1.mkv"), "_lpt1.mkv");
    }

    #[test]
    fn sanitize_collapses_underscore_runs() {
        assert_eq!(sanitize_component("a??b"), "a_b");
        assert_eq!(sanitize_component("a::<>b"), "a_b");
    }

    #[tokio::test]
    async fn render_uppercases_category_and_keeps_filename() {
        let fs = Arc::new(MemoryFs::new());
        let builder = builder(fs);
        let file = tracked("The.Walking.Dead.S11E24.FINAL.ITA.ENG.1080p.mkv");
        let target = builder.render(&file, "THE WALKING DEAD").unwrap();
        assert_eq!(
            target,
            PathBuf::from(
                "/library/THE WALKING DEAD/The.Walking.Dead.S11E24.FINAL.ITA.ENG.1080p.mkv"
            )
        );
    }

    #[tokio::test]
    async fn invalid_category_characters_become_underscores() {
        let fs = Arc::new(MemoryFs::new());
        let builder = builder(fs);
        let file = tracked("ep.mkv");
        let target = builder.render(&file, "Doctor: Who?").unwrap();
        assert_eq!(target, PathBuf::from("/library/DOCTOR_ WHO_/ep.mkv"));
    }

    #[tokio::test]
    async fn conflicts_get_numbered_then_timestamped_names() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_file("/library/FRIENDS/ep.mkv", b"x".to_vec());
        let builder = builder(Arc::clone(&fs));

        let resolved = builder
            .resolve_conflict(Path::new("/library/FRIENDS/ep.mkv"))
            .await
            .unwrap();
        assert_eq!(resolved, PathBuf::from("/library/FRIENDS/ep (1).mkv"));

        fs.add_file("/library/FRIENDS/ep (1).mkv", b"x".to_vec());
        let resolved = builder
            .resolve_conflict(Path::new("/library/FRIENDS/ep.mkv"))
            .await
            .unwrap();
        assert_eq!(resolved, PathBuf::from("/library/FRIENDS/ep (2).mkv"));

        for n in 2..=10 {
            fs.add_file(format!("/library/FRIENDS/ep ({n}).mkv"), b"x".to_vec());
        }
        let resolved = builder
            .resolve_conflict(Path::new("/library/FRIENDS/ep.mkv"))
            .await
            .unwrap();
        assert_eq!(
            resolved,
            PathBuf::from("/library/FRIENDS/ep_20260801_123000.mkv")
        );
    }

    #[tokio::test]
    async fn validation_flags_long_paths_and_unwritable_parents() {
        let fs = Arc::new(MemoryFs::new());
        fs.add_dir("/library");
        let builder = builder(Arc::clone(&fs));

        let long_name = "x".repeat(260);
        let report = builder
            .validate(Path::new(&format!("/library/SHOW/{long_name}.mkv")))
            .await;
        assert!(report.is_ok());
        assert!(!report.warnings.is_empty());

        fs.set_readonly_dir("/frozen");
        let report = builder.validate(Path::new("/frozen/SHOW/ep.mkv")).await;
        assert!(!report.is_ok());
    }

    #[tokio::test]
    async fn template_variables_are_substituted_and_unknown_ones_kept() {
        let fs = Arc::new(MemoryFs::new());
        let clock = Arc::new(FixedClock(Utc::now()));
        let builder = PathBuilder::with_template(
            fs,
            clock,
            PathBuf::from("/library"),
            "{library_root}/{CATEGORY}/{basename}-{hash}{extension}/{mystery}",
        );
        let file = tracked("ep.mkv");
        let target = builder.render(&file, "friends").unwrap();
        let rendered = target.to_string_lossy();
        assert!(rendered.starts_with("/library/FRIENDS/ep-0000"));
        assert!(rendered.ends_with("{mystery}"));
    }
}
