//! Domain types for describing slimming runs and their results.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Path of the content-type manifest every package must carry.
pub const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

/// The format of the source workbook file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkbookFormat {
    /// Macro-free workbook (Office Open XML).
    Xlsx,
    /// Macro-enabled workbook (Office Open XML).
    Xlsm,
}

impl WorkbookFormat {
    /// Detect format from file extension.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "xlsx" => Some(Self::Xlsx),
            "xlsm" => Some(Self::Xlsm),
            _ => None,
        }
    }

    /// Detect format from a file path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Whether the bytes start like a ZIP container (PK\x03\x04).
    pub fn looks_like_package(bytes: &[u8]) -> bool {
        bytes.starts_with(&[0x50, 0x4B, 0x03, 0x04])
    }

    /// Canonical file extension, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Xlsm => "xlsm",
        }
    }
}

/// Role of a package entry, classified by its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryRole {
    /// The content-type manifest.
    ContentTypes,
    /// A relationship part (`*.rels`).
    Relationships,
    /// The workbook part holding sheets and defined names.
    WorkbookDefinitions,
    /// Embedded media (images).
    Media,
    /// Calculation-chain cache.
    CalcChain,
    /// Printer settings binaries.
    PrinterSettings,
    /// Document thumbnail image.
    Thumbnail,
    /// Custom document properties.
    CustomProperties,
    /// Custom XML data parts and their properties.
    CustomXml,
    /// Anything else.
    Other,
}

impl EntryRole {
    /// Classify an entry by its virtual path.
    pub fn classify(path: &str) -> Self {
        let lower = path.trim_start_matches('/').to_ascii_lowercase();

        if lower == "[content_types].xml" {
            return Self::ContentTypes;
        }
        if lower.starts_with("customxml/") {
            return Self::CustomXml;
        }
        if lower.starts_with("xl/printersettings/") {
            return Self::PrinterSettings;
        }
        if lower.ends_with(".rels") {
            return Self::Relationships;
        }

        match lower.as_str() {
            "xl/workbook.xml" => Self::WorkbookDefinitions,
            "xl/calcchain.xml" => Self::CalcChain,
            "docprops/custom.xml" => Self::CustomProperties,
            _ if lower.starts_with("docprops/thumbnail.") => Self::Thumbnail,
            _ if lower.contains("/media/") => Self::Media,
            _ => Self::Other,
        }
    }

    /// Whether the structural pruner always removes entries of this role.
    pub fn is_regenerable(&self) -> bool {
        matches!(
            self,
            Self::CalcChain | Self::PrinterSettings | Self::Thumbnail | Self::CustomProperties
        )
    }
}

/// One of the slimming stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageKind {
    /// Defined-name cleanup.
    DefinedNames,
    /// Image re-encoding.
    Images,
    /// Structural pruning (Precision Plus).
    Prune,
}

impl StageKind {
    /// Short identifier used in file names and logs.
    pub fn id(&self) -> &'static str {
        match self {
            Self::DefinedNames => "names",
            Self::Images => "images",
            Self::Prune => "prune",
        }
    }

    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::DefinedNames => "defined-name cleanup",
            Self::Images => "image re-encoding",
            Self::Prune => "structural pruning",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Which stages the user asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSelection {
    pub defined_names: bool,
    pub images: bool,
    pub precision: bool,
}

impl StageSelection {
    /// Selected stages in pipeline order.
    pub fn kinds(&self) -> Vec<StageKind> {
        let mut kinds = Vec::new();
        if self.defined_names {
            kinds.push(StageKind::DefinedNames);
        }
        if self.images {
            kinds.push(StageKind::Images);
        }
        if self.precision {
            kinds.push(StageKind::Prune);
        }
        kinds
    }

    /// Number of selected stages.
    pub fn count(&self) -> usize {
        self.kinds().len()
    }
}

/// Precision Plus sub-options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecisionOptions {
    /// Allow lossy format conversion of opaque images.
    pub aggressive: bool,
    /// Remove references to pruned parts from the manifest and relationships.
    pub xml_cleanup: bool,
    /// Remove the whole custom-XML subtree.
    pub remove_hidden_data: bool,
}

impl PrecisionOptions {
    pub fn any(&self) -> bool {
        self.aggressive || self.xml_cleanup || self.remove_hidden_data
    }
}

/// A request to slim one workbook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    /// Source workbook path.
    pub source: PathBuf,
    /// Selected stages.
    pub stages: StageSelection,
    /// Precision Plus sub-options.
    pub precision: PrecisionOptions,
}

impl RunRequest {
    pub fn new(
        source: impl Into<PathBuf>,
        stages: StageSelection,
        precision: PrecisionOptions,
    ) -> Self {
        Self {
            source: source.into(),
            stages,
            precision,
        }
    }

    /// Check the stage/option combination, without touching the disk.
    pub fn validate(&self) -> crate::Result<WorkbookFormat> {
        let format = WorkbookFormat::from_path(&self.source).ok_or_else(|| {
            crate::Error::UnsupportedFormat(format!(
                "{} (supported: .xlsx, .xlsm)",
                self.source.display()
            ))
        })?;

        if self.stages.count() == 0 {
            return Err(crate::Error::InvalidOptions(
                "select at least one stage".to_string(),
            ));
        }

        if self.stages.precision && !self.precision.any() {
            return Err(crate::Error::InvalidOptions(
                "Precision Plus needs at least one sub-option".to_string(),
            ));
        }
        if !self.stages.precision && self.precision.any() {
            return Err(crate::Error::InvalidOptions(
                "Precision Plus sub-options need the Precision Plus stage".to_string(),
            ));
        }

        Ok(format)
    }
}

/// Orchestrator state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunPhase {
    Idle,
    BackingUp,
    /// Running the stage at this zero-based position in the run.
    Staging(usize),
    Finalizing,
    Succeeded,
    Failed,
}

/// Terminal status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Every stage completed cleanly.
    Succeeded,
    /// The output was written, but some assets were skipped.
    Partial,
    /// The run aborted; the source is untouched.
    Failed,
}

/// What one stage did to the package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: StageKind,
    /// Entries removed from the package.
    pub removed_entries: Vec<String>,
    /// Entries whose bytes were rewritten (or renamed, as `old -> new`).
    pub rewritten_entries: Vec<String>,
    /// Defined names removed.
    pub removed_names: Vec<String>,
    /// Assets skipped because they could not be decoded.
    pub skipped_assets: Vec<String>,
    /// Bytes saved on rewritten media.
    pub bytes_saved: u64,
}

impl StageReport {
    pub fn new(stage: StageKind) -> Self {
        Self {
            stage,
            removed_entries: Vec::new(),
            rewritten_entries: Vec::new(),
            removed_names: Vec::new(),
            skipped_assets: Vec::new(),
            bytes_saved: 0,
        }
    }

    /// Whether the stage left the package unchanged.
    pub fn is_noop(&self) -> bool {
        self.removed_entries.is_empty()
            && self.rewritten_entries.is_empty()
            && self.removed_names.is_empty()
    }

    /// One-line summary for the progress log.
    pub fn summary(&self) -> String {
        match self.stage {
            StageKind::DefinedNames => {
                format!("removed {} defined name(s)", self.removed_names.len())
            }
            StageKind::Images => format!(
                "re-encoded {} image(s), saved {} bytes, skipped {}",
                self.rewritten_entries.len(),
                self.bytes_saved,
                self.skipped_assets.len()
            ),
            StageKind::Prune => format!(
                "removed {} part(s), updated {} part(s)",
                self.removed_entries.len(),
                self.rewritten_entries.len()
            ),
        }
    }
}

/// Final result of a run, handed to the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub source: PathBuf,
    pub status: RunStatus,
    /// Phase the state machine ended in.
    pub last_phase: RunPhase,
    /// Phase that was active when the run failed.
    pub failed_during: Option<RunPhase>,
    pub backup: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub stages: Vec<StageReport>,
    /// Accumulated progress lines.
    pub log: Vec<String>,
    pub error: Option<String>,
    pub source_bytes: u64,
    pub output_bytes: Option<u64>,
}

impl RunReport {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            status: RunStatus::Failed,
            last_phase: RunPhase::Idle,
            failed_during: None,
            backup: None,
            output: None,
            stages: Vec::new(),
            log: Vec::new(),
            error: None,
            source_bytes: 0,
            output_bytes: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status != RunStatus::Failed
    }

    /// Message for the user once the run has terminated.
    pub fn user_message(&self) -> String {
        match self.status {
            RunStatus::Failed => {
                let mut msg = format!(
                    "Slimming failed: {}. The original file was not modified.",
                    self.error.as_deref().unwrap_or("unknown error")
                );
                if let Some(backup) = &self.backup {
                    msg.push_str(&format!(" Backup: {}", backup.display()));
                }
                msg
            }
            RunStatus::Succeeded | RunStatus::Partial => {
                let output = self
                    .output
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                let mut msg = format!("Finished: {}", output);
                if let Some(after) = self.output_bytes {
                    msg.push_str(&format!(" ({} -> {} bytes)", self.source_bytes, after));
                }
                if self.status == RunStatus::Partial {
                    msg.push_str(" with skipped assets");
                }
                msg
            }
        }
    }
}

/// Messages sent from the worker to the presentation layer.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Coarse status with completion percentage (0-100).
    Status { text: String, percent: f32 },
    /// A free-form progress line.
    Log(String),
    StageStarted {
        index: usize,
        total: usize,
        stage: StageKind,
    },
    StageFinished {
        index: usize,
        total: usize,
        report: StageReport,
    },
    /// Terminal event; always the last one for a run.
    Finished(Box<RunReport>),
}

impl ProgressEvent {
    /// Human-readable line for this event.
    pub fn line(&self) -> String {
        match self {
            Self::Status { text, percent } => format!("[{:>3.0}%] {}", percent, text),
            Self::Log(line) => line.clone(),
            Self::StageStarted {
                index,
                total,
                stage,
            } => format!("({}/{}) {}: started", index + 1, total, stage),
            Self::StageFinished {
                index,
                total,
                report,
            } => format!(
                "({}/{}) {}: {}",
                index + 1,
                total,
                report.stage,
                report.summary()
            ),
            Self::Finished(report) => report.user_message(),
        }
    }
}
