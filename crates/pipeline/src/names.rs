//! Defined-name cleanup.
//!
//! Removes names whose formula is broken (`#REF!`), that point at a sheet
//! which no longer exists, that are scoped to a sheet index past the end of
//! the sheet list, or that match a configured artifact pattern.

use crate::stage::PackageTransform;
use regex::Regex;
use slimmer_core::{CleanupRules, Error, Result, StageKind, StageReport};
use slimmer_package::{read_relationships, resolve_target, WorkbookPackage, XmlPart};
use std::collections::HashSet;
use std::sync::LazyLock;

/// Fallback location of the workbook part.
const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

/// A sheet qualifier in a formula: `'Quoted Name'!` or `Plain!`.
static SHEET_REF_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r##"'((?:[^']|'')+)'!|([^\s!'"#(),;:=+\-*/&^<>{}\[\]]+)!"##).unwrap()
});

/// A string literal in a formula.
static STRING_LITERAL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""(?:[^"]|"")*""#).unwrap());

/// An error literal such as `#DIV/0!` or `#N/A`.
static ERROR_LITERAL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)#(?:NULL!|DIV/0!|VALUE!|REF!|NAME\?|NUM!|N/A|SPILL!|CALC!|GETTING_DATA",
        r"|FIELD!|BLOCKED!|CONNECT!|BUSY!|EXTERNAL!|UNKNOWN!)",
    ))
    .unwrap()
});

/// One `definedName` element of the workbook part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedName {
    pub name: String,
    /// Zero-based sheet index the name is scoped to.
    pub local_sheet_id: Option<usize>,
    pub hidden: bool,
    pub formula: String,
}

/// Why a defined name was removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalReason {
    /// The formula contains `#REF!`.
    BrokenReference,
    /// The formula names a sheet that is not in the workbook.
    MissingSheet(String),
    /// `localSheetId` points past the last sheet.
    OrphanedScope(usize),
    /// The name matches a configured artifact pattern.
    Artifact,
}

/// Sheet names referenced by a formula, in order of appearance.
///
/// External references (`[1]Sheet!A1`, `'C:\[Book.xlsx]Sheet'!A1`) are not
/// reported; they cannot be checked against this workbook.
pub fn sheet_references(formula: &str) -> Vec<String> {
    let formula = STRING_LITERAL_REGEX.replace_all(formula, "\"\"");
    let formula = ERROR_LITERAL_REGEX.replace_all(&formula, "");
    let mut sheets = Vec::new();

    for caps in SHEET_REF_REGEX.captures_iter(&formula) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => continue,
        };
        if formula[..whole.start()].ends_with(']') {
            continue;
        }

        if let Some(quoted) = caps.get(1) {
            let name = quoted.as_str().replace("''", "'");
            if name.contains('[') {
                continue;
            }
            // A quoted 3-D reference: 'First:Last'!A1
            sheets.extend(name.split(':').map(str::to_string));
        } else if let Some(plain) = caps.get(2) {
            sheets.push(plain.as_str().to_string());
        }
    }

    sheets
}

/// Removes defined names that can no longer resolve.
#[derive(Debug)]
pub struct DefinedNameCleaner {
    patterns: Vec<Regex>,
}

impl DefinedNameCleaner {
    pub fn new(rules: &CleanupRules) -> Result<Self> {
        let patterns = rules
            .hidden_name_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    Error::InvalidOptions(format!("Invalid defined-name pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Decide whether a name should go, given the workbook's sheet names.
    pub fn removal_reason(&self, name: &DefinedName, sheets: &[String]) -> Option<RemovalReason> {
        if name.formula.to_ascii_uppercase().contains("#REF!") {
            return Some(RemovalReason::BrokenReference);
        }
        if self.patterns.iter().any(|p| p.is_match(&name.name)) {
            return Some(RemovalReason::Artifact);
        }
        if sheets.is_empty() {
            return None;
        }
        if let Some(id) = name.local_sheet_id {
            if id >= sheets.len() {
                return Some(RemovalReason::OrphanedScope(id));
            }
        }

        let known: HashSet<String> = sheets.iter().map(|s| s.to_lowercase()).collect();
        sheet_references(&name.formula)
            .into_iter()
            .find(|s| !known.contains(&s.to_lowercase()))
            .map(RemovalReason::MissingSheet)
    }

    /// Clean one workbook part.
    ///
    /// Returns the rewritten bytes, or `None` when nothing was removed, and
    /// the removed names.
    pub fn clean_part(&self, part: &str, bytes: Vec<u8>) -> Result<(Option<Vec<u8>>, Vec<String>)> {
        let mut doc = XmlPart::parse(part, bytes)?;

        let sheets: Vec<String> = doc
            .elements("sheet")?
            .iter()
            .filter_map(|s| s.attr("name").map(str::to_string))
            .collect();

        let names = doc.elements("definedName")?;
        let mut doomed = HashSet::new();
        let mut removed = Vec::new();
        for info in &names {
            let name = DefinedName {
                name: info.attr("name").unwrap_or_default().to_string(),
                local_sheet_id: info.attr("localSheetId").and_then(|v| v.trim().parse().ok()),
                hidden: matches!(info.attr("hidden"), Some("1") | Some("true")),
                formula: info.text.clone(),
            };
            if let Some(reason) = self.removal_reason(&name, &sheets) {
                log::debug!("Removing defined name '{}': {:?}", name.name, reason);
                doomed.insert(info.ordinal);
                removed.push(name.name);
            }
        }

        if doomed.is_empty() {
            return Ok((None, removed));
        }

        doc.remove_matching("definedName", |e| doomed.contains(&e.ordinal))?;
        if doomed.len() == names.len() {
            doc.remove_matching("definedNames", |_| true)?;
        }
        Ok((Some(doc.into_bytes()), removed))
    }
}

/// Locate the workbook part through the package-root relationships.
pub fn workbook_part(package: &WorkbookPackage) -> Result<String> {
    if package.contains("_rels/.rels") {
        let rels = read_relationships(package, "_rels/.rels")?;
        if let Some(rel) = rels
            .iter()
            .find(|r| !r.external && r.is_type("/officeDocument"))
        {
            let part = resolve_target("", &rel.target);
            if package.contains(&part) {
                return Ok(part);
            }
        }
    }

    if package.contains(DEFAULT_WORKBOOK_PART) {
        Ok(DEFAULT_WORKBOOK_PART.to_string())
    } else {
        Err(Error::EntryNotFound(DEFAULT_WORKBOOK_PART.to_string()))
    }
}

impl PackageTransform for DefinedNameCleaner {
    fn kind(&self) -> StageKind {
        StageKind::DefinedNames
    }

    fn apply(&self, package: &mut WorkbookPackage) -> Result<StageReport> {
        let mut report = StageReport::new(self.kind());
        let part = workbook_part(package)?;
        let bytes = package.read_entry(&part)?.to_vec();

        let (cleaned, removed) = self.clean_part(&part, bytes)?;
        if let Some(cleaned) = cleaned {
            package.replace_entry(&part, cleaned)?;
            report.rewritten_entries.push(part);
        }
        log::info!("Removed {} defined name(s)", removed.len());
        report.removed_names = removed;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slimmer_core::CONTENT_TYPES_PART;

    fn workbook(names: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets>
    <sheet name="Data" sheetId="1" r:id="rId1"/>
    <sheet name="Q1 Report" sheetId="2" r:id="rId2"/>
  </sheets>
  <definedNames>{}
  </definedNames>
  <calcPr calcId="191029"/>
</workbook>"#,
            names
        )
    }

    fn cleaner() -> DefinedNameCleaner {
        DefinedNameCleaner::new(&CleanupRules::default()).unwrap()
    }

    fn name(formula: &str) -> DefinedName {
        DefinedName {
            name: "Test".to_string(),
            local_sheet_id: None,
            hidden: false,
            formula: formula.to_string(),
        }
    }

    fn sheets() -> Vec<String> {
        vec!["Data".to_string(), "Q1 Report".to_string()]
    }

    #[test]
    fn test_sheet_references() {
        assert_eq!(sheet_references("Data!$A$1:$B$2"), vec!["Data"]);
        assert_eq!(sheet_references("'Q1 Report'!$A$1"), vec!["Q1 Report"]);
        assert_eq!(sheet_references("'It''s'!A1"), vec!["It's"]);
        assert_eq!(
            sheet_references("SUM(Data!A1,'Old Sheet'!B2)"),
            vec!["Data", "Old Sheet"]
        );
        assert_eq!(sheet_references("'Jan:Mar'!B2"), vec!["Jan", "Mar"]);
        assert_eq!(sheet_references("Data!A1:Data!B2"), vec!["Data", "Data"]);
    }

    #[test]
    fn test_sheet_references_skip_external_and_literals() {
        assert!(sheet_references("[1]Prices!$A$1").is_empty());
        assert!(sheet_references(r"'C:\files\[Book.xlsx]Prices'!$A$1").is_empty());
        assert!(sheet_references(r#"IF(A1="Gone!","x","y")"#).is_empty());
        assert!(sheet_references("0.5*2").is_empty());
    }

    #[test]
    fn test_sheet_references_skip_error_literals() {
        for literal in [
            "#NULL!",
            "#DIV/0!",
            "#VALUE!",
            "#NAME?",
            "#NUM!",
            "#N/A",
            "#SPILL!",
            "#CALC!",
            "#GETTING_DATA",
            "#div/0!",
        ] {
            let formula = format!("IFERROR(Data!$A$1,{})", literal);
            assert_eq!(sheet_references(&formula), vec!["Data"], "{}", formula);
        }
        assert_eq!(sheet_references("IF(ISNA(#N/A),Data!A1,0)"), vec!["Data"]);
    }

    #[test]
    fn test_error_literals_do_not_remove_names() {
        let c = cleaner();
        let sheets = vec!["Data".to_string()];
        for formula in [
            "IFERROR(Data!$A$1,#DIV/0!)",
            "IFERROR(Data!$A$1,#NUM!)",
            "IFERROR(Data!$A$1,#NULL!)",
            "IFERROR(Data!$A$1,#VALUE!)",
            "IF(Data!$A$1>0,#N/A,1)",
        ] {
            assert_eq!(c.removal_reason(&name(formula), &sheets), None, "{}", formula);
        }
    }

    #[test]
    fn test_removal_reasons() {
        let c = cleaner();
        let sheets = sheets();

        assert_eq!(
            c.removal_reason(&name("#REF!$A$1"), &sheets),
            Some(RemovalReason::BrokenReference)
        );
        assert_eq!(
            c.removal_reason(&name("'Deleted'!$A$1"), &sheets),
            Some(RemovalReason::MissingSheet("Deleted".to_string()))
        );
        assert_eq!(c.removal_reason(&name("data!$A$1"), &sheets), None);
        assert_eq!(c.removal_reason(&name("'q1 report'!$A$1"), &sheets), None);
        assert_eq!(c.removal_reason(&name("0.075"), &sheets), None);

        let mut scoped = name("Data!$A$1");
        scoped.local_sheet_id = Some(2);
        assert_eq!(
            c.removal_reason(&scoped, &sheets),
            Some(RemovalReason::OrphanedScope(2))
        );
        scoped.local_sheet_id = Some(1);
        assert_eq!(c.removal_reason(&scoped, &sheets), None);

        let mut artifact = name("Data!$A$1:$C$9");
        artifact.name = "Z_3F2504E0_4F89_11D3_9A0C_0305E82C3301_.wvu.PrintArea".to_string();
        assert_eq!(c.removal_reason(&artifact, &sheets), Some(RemovalReason::Artifact));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let rules = CleanupRules {
            hidden_name_patterns: vec!["(".to_string()],
        };
        let err = DefinedNameCleaner::new(&rules).unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }

    #[test]
    fn test_clean_part_removes_only_broken_names() {
        let xml = workbook(
            r#"
    <definedName name="Keep">Data!$A$1</definedName>
    <definedName name="Gone">Archive!$A$1</definedName>
    <definedName name="Scoped" localSheetId="1">'Q1 Report'!$B$2</definedName>"#,
        );
        let (out, removed) = cleaner().clean_part("xl/workbook.xml", xml.into_bytes()).unwrap();
        assert_eq!(removed, vec!["Gone"]);

        let out = String::from_utf8(out.unwrap()).unwrap();
        assert!(out.contains(r#"<definedName name="Keep">Data!$A$1</definedName>"#));
        assert!(out.contains(r#"localSheetId="1""#));
        assert!(!out.contains("Archive"));
        assert!(out.contains(r#"<calcPr calcId="191029"/>"#));
    }

    #[test]
    fn test_clean_part_drops_empty_container() {
        let xml = workbook(r#"<definedName name="Broken">#REF!</definedName>"#);
        let (out, removed) = cleaner().clean_part("xl/workbook.xml", xml.into_bytes()).unwrap();
        assert_eq!(removed, vec!["Broken"]);

        let out = String::from_utf8(out.unwrap()).unwrap();
        assert!(!out.contains("definedNames"));
        assert!(out.contains("<sheets>"));
        XmlPart::parse("xl/workbook.xml", out.into_bytes()).unwrap();
    }

    #[test]
    fn test_clean_part_leaves_clean_workbook_alone() {
        let xml = workbook(r#"<definedName name="Keep">Data!$A$1</definedName>"#);
        let (out, removed) = cleaner().clean_part("xl/workbook.xml", xml.into_bytes()).unwrap();
        assert!(out.is_none());
        assert!(removed.is_empty());
    }

    #[test]
    fn test_clean_part_rejects_malformed_xml() {
        let err = cleaner()
            .clean_part("xl/workbook.xml", b"<workbook><sheets></workbook>".to_vec())
            .unwrap_err();
        assert!(matches!(err, Error::MalformedXml { .. }));
    }

    #[test]
    fn test_workbook_part_follows_root_relationship() {
        let mut package = WorkbookPackage::default();
        package.write_entry(CONTENT_TYPES_PART, b"<Types/>".to_vec(), true);
        package.write_entry(
            "_rels/.rels",
            br#"<Relationships><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook2.xml"/></Relationships>"#.to_vec(),
            true,
        );
        package.write_entry("xl/workbook2.xml", workbook("").into_bytes(), true);
        assert_eq!(workbook_part(&package).unwrap(), "xl/workbook2.xml");

        package.remove_entry("_rels/.rels");
        assert!(matches!(
            workbook_part(&package).unwrap_err(),
            Error::EntryNotFound(_)
        ));
    }

    #[test]
    fn test_apply_reports_names() {
        let mut package = WorkbookPackage::default();
        package.write_entry(CONTENT_TYPES_PART, b"<Types/>".to_vec(), true);
        package.write_entry(
            "xl/workbook.xml",
            workbook(r#"<definedName name="Old">Removed!$A$1</definedName>"#).into_bytes(),
            true,
        );

        let report = cleaner().apply(&mut package).unwrap();
        assert_eq!(report.removed_names, vec!["Old"]);
        assert_eq!(report.rewritten_entries, vec!["xl/workbook.xml"]);

        let again = cleaner().apply(&mut package).unwrap();
        assert!(again.is_noop());
    }
}
