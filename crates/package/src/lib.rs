//! Workbook package container and XML part editor.
//!
//! Workbooks (.xlsx, .xlsm) are ZIP archives of XML parts and binary
//! resources. [`WorkbookPackage`] holds one fully in memory; [`XmlPart`]
//! applies targeted edits to a single part.

pub mod container;
pub mod rels;
pub mod xml;

pub use container::{normalize_part_name, PackageEntry, WorkbookPackage};
pub use rels::{read_relationships, rels_owner, rels_path_for, resolve_target, Relationship};
pub use xml::{local_name, ElementInfo, XmlPart};
