//! Atomic artifact writer
//!
//! All files of one journey are staged into temp files next to their
//! destinations and only renamed into place once every one of them has been
//! written, so an interrupted run leaves old or new files but never a partial
//! one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::CompileResult;
use crate::managed::{merge, MergeMode, RenderedFile};
use crate::outcome::GenerationOutcome;

/// Directory under the output root holding run state
pub const STATE_DIR: &str = ".stepwright";

/// A merged file ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    /// Path relative to the output directory
    pub path: PathBuf,
    pub content: String,
    /// Content differs from what is on disk
    pub changed: bool,
}

#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    out_dir: PathBuf,
    dry_run: bool,
}

impl ArtifactWriter {
    pub fn new(out_dir: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            out_dir: out_dir.into(),
            dry_run,
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Merge a rendering with the file currently at `relative`
    pub fn prepare(&self, relative: &Path, rendered: &RenderedFile, mode: MergeMode) -> CompileResult<PlannedFile> {
        let target = self.out_dir.join(relative);
        let existing = match fs::read_to_string(&target) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        let content = match &existing {
            Some(text) => merge(text, rendered, mode, relative)?,
            None => rendered.render_fresh(),
        };
        let changed = existing.as_deref() != Some(content.as_str());
        Ok(PlannedFile {
            path: relative.to_path_buf(),
            content,
            changed,
        })
    }

    /// Write every changed file, or none of them. Returns the paths written.
    pub fn commit(&self, files: &[PlannedFile]) -> CompileResult<Vec<PathBuf>> {
        if self.dry_run {
            return Ok(Vec::new());
        }

        let mut staged = Vec::new();
        for file in files.iter().filter(|f| f.changed) {
            let target = self.out_dir.join(&file.path);
            let dir = target.parent().unwrap_or(&self.out_dir).to_path_buf();
            fs::create_dir_all(&dir)?;
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(file.content.as_bytes())?;
            tmp.as_file().sync_all()?;
            staged.push((tmp, target, file.path.clone()));
        }

        let mut written = Vec::new();
        for (tmp, target, relative) in staged {
            tmp.persist(&target).map_err(|e| e.error)?;
            debug!("Wrote {}", target.display());
            written.push(relative);
        }
        Ok(written)
    }

    /// Where the outcome of `journey_id` is recorded
    pub fn outcome_path(&self, journey_id: &str) -> PathBuf {
        let name: String = journey_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        self.out_dir
            .join(STATE_DIR)
            .join("outcomes")
            .join(format!("{}.json", name))
    }

    /// Persist an outcome; skipped in dry-run mode
    pub fn write_outcome(&self, outcome: &GenerationOutcome) -> CompileResult<Option<PathBuf>> {
        if self.dry_run {
            return Ok(None);
        }
        let path = self.outcome_path(&outcome.journey_id);
        let dir = path.parent().unwrap_or(&self.out_dir).to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(outcome.to_json()?.as_bytes())?;
        tmp.write_all(b"\n")?;
        tmp.persist(&path).map_err(|e| e.error)?;
        info!("Recorded outcome for {} ({})", outcome.journey_id, outcome.status);
        Ok(Some(path))
    }
}
