//! Relationship parts (`*.rels`) and part-name resolution.

use crate::container::{normalize_part_name, WorkbookPackage};
use crate::xml::XmlPart;
use slimmer_core::Result;

/// One `Relationship` element of a relationship part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub id: String,
    pub rel_type: String,
    /// Target as written in the part.
    pub target: String,
    /// `TargetMode="External"`: the target is a URI, not a package part.
    pub external: bool,
}

impl Relationship {
    /// Whether the relationship type ends with the given suffix
    /// (`/officeDocument`, `/image`, ...).
    pub fn is_type(&self, suffix: &str) -> bool {
        self.rel_type.ends_with(suffix)
    }
}

/// The part a relationship part belongs to.
///
/// `_rels/.rels` belongs to the package root (`""`),
/// `xl/_rels/workbook.xml.rels` to `xl/workbook.xml`.
pub fn rels_owner(rels_path: &str) -> Option<String> {
    let path = normalize_part_name(rels_path);
    let file = path.strip_suffix(".rels")?;
    let (dir, name) = match file.rsplit_once('/') {
        Some((dir, name)) => (dir, name),
        None => return None,
    };
    let parent = if dir == "_rels" {
        ""
    } else {
        dir.strip_suffix("/_rels")?
    };
    if parent.is_empty() {
        Some(name.to_string())
    } else {
        Some(format!("{}/{}", parent, name))
    }
}

/// Path of the relationship part that belongs to `part`.
pub fn rels_path_for(part: &str) -> String {
    let part = normalize_part_name(part);
    match part.rsplit_once('/') {
        Some((dir, name)) => format!("{}/_rels/{}.rels", dir, name),
        None => format!("_rels/{}.rels", part),
    }
}

/// Resolve a relationship target against the part that owns it.
pub fn resolve_target(owner: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return normalize_part_name(absolute);
    }

    let mut segments: Vec<&str> = match owner.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Read every relationship of a relationship part.
pub fn read_relationships(package: &WorkbookPackage, rels_path: &str) -> Result<Vec<Relationship>> {
    let bytes = package.read_entry(rels_path)?.to_vec();
    let doc = XmlPart::parse(rels_path, bytes)?;
    Ok(doc
        .elements("Relationship")?
        .into_iter()
        .map(|e| Relationship {
            id: e.attr("Id").unwrap_or_default().to_string(),
            rel_type: e.attr("Type").unwrap_or_default().to_string(),
            target: e.attr("Target").unwrap_or_default().to_string(),
            external: e
                .attr("TargetMode")
                .map(|m| m.eq_ignore_ascii_case("External"))
                .unwrap_or(false),
        })
        .collect())
}
