//! Structural pruning: drops parts the spreadsheet host regenerates or
//! never needs.

use crate::references;
use crate::stage::PackageTransform;
use slimmer_core::{EntryRole, Result, StageKind, StageReport};
use slimmer_package::WorkbookPackage;

/// Removes regenerable parts and, optionally, hidden custom XML data.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralPruner {
    /// Also remove dangling references to pruned parts.
    xml_cleanup: bool,
    /// Also remove the `customXml/` subtree.
    remove_hidden_data: bool,
}

impl StructuralPruner {
    pub fn new(xml_cleanup: bool, remove_hidden_data: bool) -> Self {
        Self {
            xml_cleanup,
            remove_hidden_data,
        }
    }

    /// Whether entries of this role are pruned.
    pub fn prunes(&self, role: EntryRole) -> bool {
        role.is_regenerable() || (self.remove_hidden_data && role == EntryRole::CustomXml)
    }
}

impl PackageTransform for StructuralPruner {
    fn kind(&self) -> StageKind {
        StageKind::Prune
    }

    fn apply(&self, package: &mut WorkbookPackage) -> Result<StageReport> {
        let mut report = StageReport::new(self.kind());

        for path in package.paths() {
            if self.prunes(EntryRole::classify(&path)) && package.remove_entry(&path) {
                log::debug!("Pruned {}", path);
                report.removed_entries.push(path);
            }
        }

        if self.xml_cleanup {
            let cleanup = references::drop_references(package, |role| self.prunes(role))?;
            report.removed_entries.extend(cleanup.removed);
            report.rewritten_entries.extend(cleanup.rewritten);
        }

        log::info!(
            "Pruned {} part(s), updated {} part(s)",
            report.removed_entries.len(),
            report.rewritten_entries.len()
        );
        Ok(report)
    }
}
