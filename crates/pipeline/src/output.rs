//! Where a run writes its backup, checkpoints and final output, and how
//! those files are written.

use chrono::{DateTime, Local};
use slimmer_core::config::DEFAULT_OUTPUT_FOLDER;
use slimmer_core::{Error, Result, SlimConfig, StageKind, WorkbookFormat};
use slimmer_package::WorkbookPackage;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Upper bound on `_<n>` suffixes tried before giving up on a name.
const MAX_SUFFIX: u32 = 1000;

/// How a run lays out its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    /// One stage: output and backup next to the source (or in the output
    /// directory).
    BesideSource,
    /// Several stages: a fresh timestamped directory per run.
    RunDirectory,
}

/// Resolved file locations for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPlan {
    pub layout: OutputLayout,
    /// Directory receiving every file of the run.
    pub dir: PathBuf,
    pub backup: PathBuf,
    pub output: PathBuf,
    stem: String,
    extension: String,
}

fn timestamp(now: &DateTime<Local>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// `path` if free, else `<stem>_<stamp>.<ext>`, else `<stem>_<stamp>_<n>.<ext>`.
fn unique_path(path: PathBuf, stamp: &str) -> Result<PathBuf> {
    if !path.exists() {
        return Ok(path);
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let stamped = path.with_file_name(format!("{}_{}{}", stem, stamp, ext));
    if !stamped.exists() {
        return Ok(stamped);
    }
    (1..=MAX_SUFFIX)
        .map(|n| path.with_file_name(format!("{}_{}_{}{}", stem, stamp, n, ext)))
        .find(|p| !p.exists())
        .ok_or_else(|| Error::InvalidOptions(format!("No free file name near {}", path.display())))
}

impl OutputPlan {
    /// Plan the files for a run over `source` with the given stages.
    pub fn new(
        source: &Path,
        format: WorkbookFormat,
        stages: &[StageKind],
        config: &SlimConfig,
        now: DateTime<Local>,
    ) -> Result<Self> {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidOptions(format!("No file name in {}", source.display())))?;
        let extension = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| format.extension().to_string());
        let source_dir = match source.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stamp = timestamp(&now);

        let (layout, dir) = if stages.len() > 1 {
            let base = config
                .output_dir
                .clone()
                .unwrap_or_else(|| source_dir.join(DEFAULT_OUTPUT_FOLDER));
            let mut dir = base.join(format!("{}_{}", stem, stamp));
            let mut n = 1;
            while dir.exists() {
                if n > MAX_SUFFIX {
                    return Err(Error::InvalidOptions(format!(
                        "No free run directory in {}",
                        base.display()
                    )));
                }
                dir = base.join(format!("{}_{}_{}", stem, stamp, n));
                n += 1;
            }
            (OutputLayout::RunDirectory, dir)
        } else {
            (
                OutputLayout::BesideSource,
                config.output_dir.clone().unwrap_or(source_dir),
            )
        };

        let suffix = match stages {
            [StageKind::DefinedNames] => "clean",
            _ => "slimmed",
        };
        let output = unique_path(dir.join(format!("{}_{}.{}", stem, suffix, extension)), &stamp)?;
        let backup = unique_path(dir.join(format!("{}_backup.{}", stem, extension)), &stamp)?;
        if output == source || backup == source {
            return Err(Error::InvalidOptions(format!(
                "Output would overwrite the source {}",
                source.display()
            )));
        }

        Ok(Self {
            layout,
            dir,
            backup,
            output,
            stem,
            extension,
        })
    }

    /// Path of the checkpoint written after stage `index` (zero-based).
    pub fn checkpoint(&self, index: usize, stage: StageKind) -> PathBuf {
        self.dir.join(format!(
            "{}_step{}_{}.{}",
            self.stem,
            index + 1,
            stage.id(),
            self.extension
        ))
    }

    /// Create the run directory.
    pub fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::BackupFailed(format!("Cannot create {}: {}", self.dir.display(), e))
        })
    }
}

/// Write the backup copy. Never replaces an existing file.
pub fn write_backup(path: &Path, bytes: &[u8]) -> Result<()> {
    let fail = |e: std::io::Error| Error::BackupFailed(format!("{}: {}", path.display(), e));
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(fail)?;
    file.write_all(bytes).map_err(fail)?;
    file.sync_all().map_err(fail)?;
    log::info!("Backup written to {}", path.display());
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}.tmp", name))
}

/// Serialize `package` to `target` through a temporary sibling file.
///
/// Either `target` ends up holding the complete package or it is left as it
/// was; the temporary file never survives.
pub fn write_atomically(package: &WorkbookPackage, target: &Path) -> Result<u64> {
    let temp = temp_path_for(target);
    if temp.exists() {
        fs::remove_file(&temp)?;
    }

    if let Err(e) = package.serialize(&temp) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }

    let renamed = match fs::rename(&temp, target) {
        Ok(()) => Ok(()),
        Err(_) if target.exists() => {
            fs::remove_file(target).and_then(|_| fs::rename(&temp, target))
        }
        Err(e) => Err(e),
    };
    if let Err(e) = renamed {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }

    Ok(fs::metadata(target)?.len())
}
