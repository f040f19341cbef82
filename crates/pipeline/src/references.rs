//! Keeping the content-type manifest and relationship parts consistent
//! with the entries actually present in a package.

use slimmer_core::{EntryRole, Result, CONTENT_TYPES_PART};
use slimmer_package::{normalize_part_name, rels_owner, resolve_target, WorkbookPackage, XmlPart};
use std::collections::{HashMap, HashSet};

/// What a reference sweep changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReferenceCleanup {
    /// Parts whose XML was rewritten.
    pub rewritten: Vec<String>,
    /// Relationship parts removed because their owner is gone.
    pub removed: Vec<String>,
}

/// Every `.rels` part, including those inside subtrees classified by
/// another role such as `customXml/_rels/`.
fn relationship_parts(package: &WorkbookPackage) -> Vec<String> {
    package
        .paths()
        .into_iter()
        .filter(|p| !p.ends_with('/') && p.to_ascii_lowercase().ends_with(".rels"))
        .collect()
}

fn is_external(attrs: &[(String, String)]) -> bool {
    attrs
        .iter()
        .any(|(k, v)| k == "TargetMode" && v.eq_ignore_ascii_case("External"))
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Drop every reference to a part that is absent from the package and
/// whose role `dropped` selects.
///
/// Covers `Override` entries in the manifest, `Relationship` entries,
/// relationship-id attributes (`r:id`) in the owning part, and relationship
/// parts whose owner was removed.
pub fn drop_references<F>(package: &mut WorkbookPackage, dropped: F) -> Result<ReferenceCleanup>
where
    F: Fn(EntryRole) -> bool,
{
    let mut cleanup = ReferenceCleanup::default();
    let is_gone = |package: &WorkbookPackage, part: &str| {
        !part.is_empty() && !package.contains(part) && dropped(EntryRole::classify(part))
    };

    // Relationship parts first: an orphaned one goes entirely.
    for rels_path in relationship_parts(package) {
        let owner = match rels_owner(&rels_path) {
            Some(owner) => owner,
            None => continue,
        };
        if is_gone(package, &owner) {
            package.remove_entry(&rels_path);
            log::debug!("Removed orphaned relationship part {}", rels_path);
            cleanup.removed.push(rels_path);
            continue;
        }

        let mut doc = XmlPart::parse(rels_path.as_str(), package.read_entry(&rels_path)?.to_vec())?;
        let dangling: HashSet<String> = doc
            .elements("Relationship")?
            .into_iter()
            .filter(|rel| {
                let external = rel
                    .attr("TargetMode")
                    .map(|m| m.eq_ignore_ascii_case("External"))
                    .unwrap_or(false);
                let target = rel.attr("Target").unwrap_or_default();
                !external && is_gone(package, &resolve_target(&owner, target))
            })
            .filter_map(|rel| rel.attr("Id").map(str::to_string))
            .collect();
        if dangling.is_empty() {
            continue;
        }

        doc.remove_matching("Relationship", |rel| {
            rel.attr("Id").map(|id| dangling.contains(id)).unwrap_or(false)
        })?;
        if doc.is_modified() {
            package.replace_entry(&rels_path, doc.into_bytes())?;
            cleanup.rewritten.push(rels_path.clone());
        }

        if !owner.is_empty()
            && owner.to_ascii_lowercase().ends_with(".xml")
            && package.contains(&owner)
        {
            let bytes = package.read_entry(&owner)?.to_vec();
            let mut owner_doc = XmlPart::parse(owner.as_str(), bytes)?;
            owner_doc.strip_attributes(|_, key, value| {
                key.contains(':') && key.ends_with(":id") && dangling.contains(value)
            })?;
            if owner_doc.is_modified() {
                package.replace_entry(&owner, owner_doc.into_bytes())?;
                cleanup.rewritten.push(owner);
            }
        }
    }

    let bytes = package.read_entry(CONTENT_TYPES_PART)?.to_vec();
    let mut manifest = XmlPart::parse(CONTENT_TYPES_PART, bytes)?;
    manifest.remove_matching("Override", |o| {
        o.attr("PartName")
            .map(|name| is_gone(package, &normalize_part_name(name)))
            .unwrap_or(false)
    })?;
    if manifest.is_modified() {
        package.replace_entry(CONTENT_TYPES_PART, manifest.into_bytes())?;
        cleanup.rewritten.push(CONTENT_TYPES_PART.to_string());
    }

    Ok(cleanup)
}

/// Point every reference to part `from` at part `to`, which now holds
/// `content_type` data.
///
/// Relationship targets keep their relative form; only the file name
/// changes. The manifest gains a `Default` for the new extension when it
/// has none.
pub fn retarget_part(
    package: &mut WorkbookPackage,
    from: &str,
    to: &str,
    content_type: &str,
) -> Result<Vec<String>> {
    let from = normalize_part_name(from);
    let to = normalize_part_name(to);
    let new_file = to.rsplit('/').next().unwrap_or(&to).to_string();
    let mut rewritten = Vec::new();

    for rels_path in relationship_parts(package) {
        let owner = match rels_owner(&rels_path) {
            Some(owner) => owner,
            None => continue,
        };
        let mut doc = XmlPart::parse(rels_path.as_str(), package.read_entry(&rels_path)?.to_vec())?;
        doc.map_attributes("Relationship", |attrs| {
            if is_external(attrs) {
                return false;
            }
            let target = match attr(attrs, "Target") {
                Some(t) => t.to_string(),
                None => return false,
            };
            if !resolve_target(&owner, &target).eq_ignore_ascii_case(&from) {
                return false;
            }
            let retargeted = match target.rsplit_once('/') {
                Some((dir, _)) => format!("{}/{}", dir, new_file),
                None => new_file.clone(),
            };
            for (k, v) in attrs.iter_mut() {
                if k == "Target" {
                    *v = retargeted.clone();
                }
            }
            true
        })?;
        if doc.is_modified() {
            package.replace_entry(&rels_path, doc.into_bytes())?;
            rewritten.push(rels_path);
        }
    }

    let bytes = package.read_entry(CONTENT_TYPES_PART)?.to_vec();
    let mut manifest = XmlPart::parse(CONTENT_TYPES_PART, bytes)?;
    let old_name = format!("/{}", from);
    manifest.map_attributes("Override", |attrs| {
        let hit = attr(attrs, "PartName")
            .map(|name| name.eq_ignore_ascii_case(&old_name))
            .unwrap_or(false);
        if hit {
            for (k, v) in attrs.iter_mut() {
                match k.as_str() {
                    "PartName" => *v = format!("/{}", to),
                    "ContentType" => *v = content_type.to_string(),
                    _ => {}
                }
            }
        }
        hit
    })?;

    if let Some((_, ext)) = new_file.rsplit_once('.') {
        let defaults: HashMap<String, String> = manifest
            .elements("Default")?
            .into_iter()
            .filter_map(|d| {
                Some((
                    d.attr("Extension")?.to_ascii_lowercase(),
                    d.attr("ContentType").unwrap_or_default().to_string(),
                ))
            })
            .collect();
        if !defaults.contains_key(&ext.to_ascii_lowercase()) {
            manifest.append_child(
                "Types",
                "Default",
                &[("Extension", ext), ("ContentType", content_type)],
            )?;
        }
    }

    if manifest.is_modified() {
        package.replace_entry(CONTENT_TYPES_PART, manifest.into_bytes())?;
        rewritten.push(CONTENT_TYPES_PART.to_string());
    }

    Ok(rewritten)
}
