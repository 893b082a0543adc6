//! Scratch directory ownership and per-run input materialization.

use crate::config::SolverLayout;
use crate::config_file::ConfigFile;
use crate::error::{IoContext, Result, SweepError};
use crate::orchestrator::{run_paths, RunInstance};
use crate::results::ComparisonPoint;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Zero-byte sentinel proving the engine owns a working directory.
pub const MARKER_FILE: &str = "sweep.working.dir";

#[derive(Debug, Clone)]
pub struct WorkingDirectory {
    root: PathBuf,
}

impl WorkingDirectory {
    /// Claims `root`. An empty directory gets a marker; a non-empty one must
    /// already carry it.
    pub fn open(root: &Path) -> Result<Self> {
        let wd = Self {
            root: root.to_path_buf(),
        };
        if wd.is_empty()? {
            wd.write_marker()?;
        } else {
            wd.verify_owned()?;
        }
        Ok(wd)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn marker(&self) -> PathBuf {
        self.root.join(MARKER_FILE)
    }

    fn is_empty(&self) -> Result<bool> {
        if !self.root.is_dir() {
            return Err(SweepError::DirectoryState {
                path: self.root.clone(),
                reason: "does not exist".to_string(),
            });
        }
        let mut entries =
            fs::read_dir(&self.root).io_context(|| format!("listing {}", self.root.display()))?;
        Ok(entries.next().is_none())
    }

    fn verify_owned(&self) -> Result<()> {
        if self.is_empty()? || self.marker().is_file() {
            return Ok(());
        }
        Err(SweepError::DirectoryState {
            path: self.root.clone(),
            reason: "does not seem to be a working directory".to_string(),
        })
    }

    fn write_marker(&self) -> Result<()> {
        let marker = self.marker();
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&marker)
            .io_context(|| format!("creating {}", marker.display()))?;
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let entries =
            fs::read_dir(&self.root).io_context(|| format!("listing {}", self.root.display()))?;
        for entry in entries {
            let path = entry
                .io_context(|| format!("listing {}", self.root.display()))?
                .path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            removed.io_context(|| format!("removing {}", path.display()))?;
        }
        Ok(())
    }

    /// Rebuilds the directory from scratch: one `run<N>` per comparison
    /// point, each seeded with the solver inputs and its own temperature.
    pub fn setup(
        &self,
        layout: &SolverLayout,
        files: &BTreeMap<String, ConfigFile>,
        points: &[ComparisonPoint],
    ) -> Result<Vec<RunInstance>> {
        self.verify_owned()?;
        self.clear()?;
        self.write_marker()?;

        let template = self.run_instance(0).directory;
        self.materialize_inputs(&template, layout, files)?;
        for index in 1..points.len() {
            copy_dir(&template, &self.run_instance(index).directory)?;
        }
        for (index, point) in points.iter().enumerate() {
            self.patch_temperature(index, layout, point)?;
        }
        debug!(
            "materialized {} run directories under '{}'",
            points.len(),
            self.root.display()
        );
        Ok((0..points.len()).map(|i| self.run_instance(i)).collect())
    }

    /// Rebuilds a single run directory, e.g. before retrying it.
    pub fn rematerialize(
        &self,
        index: usize,
        layout: &SolverLayout,
        files: &BTreeMap<String, ConfigFile>,
        point: &ComparisonPoint,
    ) -> Result<()> {
        let dir = self.run_instance(index).directory;
        if dir.exists() {
            fs::remove_dir_all(&dir).io_context(|| format!("removing {}", dir.display()))?;
        }
        self.materialize_inputs(&dir, layout, files)?;
        self.patch_temperature(index, layout, point)
    }

    pub fn run_instance(&self, index: usize) -> RunInstance {
        let (dir, log, err) = run_paths(&self.root, index);
        RunInstance::new(index, dir, log, err)
    }

    fn materialize_inputs(
        &self,
        dir: &Path,
        layout: &SolverLayout,
        files: &BTreeMap<String, ConfigFile>,
    ) -> Result<()> {
        fs::create_dir_all(dir).io_context(|| format!("creating {}", dir.display()))?;
        for name in &layout.input_files {
            let dst = dir.join(name);
            match files.get(name) {
                Some(file) => file.save(&dst)?,
                None => {
                    let src = layout.dir.join(name);
                    fs::copy(&src, &dst).map_err(|e| match e.kind() {
                        ErrorKind::NotFound => SweepError::FileNotFound(src.clone()),
                        _ => SweepError::io(format!("copying {}", src.display()), e),
                    })?;
                }
            }
        }
        Ok(())
    }

    fn patch_temperature(
        &self,
        index: usize,
        layout: &SolverLayout,
        point: &ComparisonPoint,
    ) -> Result<()> {
        let patch = &layout.temperature_patch;
        let target = self.run_instance(index).directory.join(&patch.file);
        patch_line(&target, patch.line, &patch.render(point.temperature))
    }
}

/// Replaces 1-based line `line_no` of `path` with `text` (which should carry
/// its own newline), leaving every other byte untouched.
pub fn patch_line(path: &Path, line_no: usize, text: &str) -> Result<()> {
    let content = fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => SweepError::MissingTemplateFile {
            path: path.to_path_buf(),
            detail: "does not exist".to_string(),
        },
        _ => SweepError::io(format!("reading {}", path.display()), e),
    })?;
    let mut lines: Vec<&str> = content.split_inclusive('\n').collect();
    if line_no == 0 || line_no > lines.len() {
        return Err(SweepError::MissingTemplateFile {
            path: path.to_path_buf(),
            detail: format!("has no line {} ({} lines)", line_no, lines.len()),
        });
    }
    lines[line_no - 1] = text;
    fs::write(path, lines.concat()).io_context(|| format!("writing {}", path.display()))
}

pub(crate) fn copy_dir(src: &Path, dst: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| {
            SweepError::io(
                format!("walking {}", src.display()),
                e.into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(ErrorKind::Other, "walk failed")),
            )
        })?;
        let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).io_context(|| format!("creating {}", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .io_context(|| format!("creating {}", parent.display()))?;
            }
            fs::copy(entry.path(), &target)
                .io_context(|| format!("copying {}", entry.path().display()))?;
        }
    }
    Ok(())
}

/// Renames `src` to `dst`, copying and deleting when a rename is not
/// possible (different filesystems).
pub(crate) fn move_path(src: &Path, dst: &Path) -> Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    if src.is_dir() {
        copy_dir(src, dst)?;
        fs::remove_dir_all(src).io_context(|| format!("removing {}", src.display()))
    } else {
        fs::copy(src, dst).io_context(|| format!("copying {}", src.display()))?;
        fs::remove_file(src).io_context(|| format!("removing {}", src.display()))
    }
}
