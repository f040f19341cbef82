//! The common stage capability and the ordered stage list.

use crate::images::ImageReencoder;
use crate::names::DefinedNameCleaner;
use crate::prune::StructuralPruner;
use slimmer_core::{Result, RunRequest, SlimConfig, StageKind, StageReport, StageSelection};
use slimmer_package::WorkbookPackage;

/// A transformation applied to a workbook package in place.
///
/// Implementations hold only their settings; nothing carries over between
/// runs.
pub trait PackageTransform {
    fn kind(&self) -> StageKind;

    fn apply(&self, package: &mut WorkbookPackage) -> Result<StageReport>;
}

/// One pipeline stage.
#[derive(Debug)]
pub enum Stage {
    DefinedNames(DefinedNameCleaner),
    Images(ImageReencoder),
    Prune(StructuralPruner),
}

impl Stage {
    /// Every stage in pipeline order, configured for this request.
    pub fn pipeline(request: &RunRequest, config: &SlimConfig) -> Result<Vec<Stage>> {
        Ok(vec![
            Stage::DefinedNames(DefinedNameCleaner::new(&config.rules)?),
            Stage::Images(ImageReencoder::new(config.image, request.precision.aggressive)),
            Stage::Prune(StructuralPruner::new(
                request.precision.xml_cleanup,
                request.precision.remove_hidden_data,
            )),
        ])
    }

    /// Only the stages the user toggled on, still in pipeline order.
    pub fn selected(request: &RunRequest, config: &SlimConfig) -> Result<Vec<Stage>> {
        Ok(Self::pipeline(request, config)?
            .into_iter()
            .filter(|s| s.is_selected(&request.stages))
            .collect())
    }

    pub fn is_selected(&self, selection: &StageSelection) -> bool {
        match self {
            Stage::DefinedNames(_) => selection.defined_names,
            Stage::Images(_) => selection.images,
            Stage::Prune(_) => selection.precision,
        }
    }
}

impl PackageTransform for Stage {
    fn kind(&self) -> StageKind {
        match self {
            Stage::DefinedNames(s) => s.kind(),
            Stage::Images(s) => s.kind(),
            Stage::Prune(s) => s.kind(),
        }
    }

    fn apply(&self, package: &mut WorkbookPackage) -> Result<StageReport> {
        match self {
            Stage::DefinedNames(s) => s.apply(package),
            Stage::Images(s) => s.apply(package),
            Stage::Prune(s) => s.apply(package),
        }
    }
}
