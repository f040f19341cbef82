//! Shared fixtures: a small but structurally complete workbook package.

#![allow(dead_code)]

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// Builds `.xlsx` bytes with optional regenerable and hidden parts.
#[derive(Debug, Default)]
pub struct WorkbookBuilder {
    sheets: Vec<String>,
    names: Vec<(String, Option<usize>, String)>,
    images: Vec<(String, Vec<u8>)>,
    calc_chain: bool,
    printer_settings: bool,
    thumbnail: bool,
    custom_properties: bool,
    custom_xml: bool,
}

impl WorkbookBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet(mut self, name: &str) -> Self {
        self.sheets.push(name.to_string());
        self
    }

    pub fn defined_name(mut self, name: &str, formula: &str) -> Self {
        self.names.push((name.to_string(), None, formula.to_string()));
        self
    }

    pub fn scoped_name(mut self, name: &str, sheet: usize, formula: &str) -> Self {
        self.names.push((name.to_string(), Some(sheet), formula.to_string()));
        self
    }

    /// Add an image under `xl/media/`, shown on the first sheet.
    pub fn image(mut self, file: &str, bytes: Vec<u8>) -> Self {
        self.images.push((file.to_string(), bytes));
        self
    }

    pub fn with_calc_chain(mut self) -> Self {
        self.calc_chain = true;
        self
    }

    pub fn with_printer_settings(mut self) -> Self {
        self.printer_settings = true;
        self
    }

    pub fn with_thumbnail(mut self) -> Self {
        self.thumbnail = true;
        self
    }

    pub fn with_custom_properties(mut self) -> Self {
        self.custom_properties = true;
        self
    }

    pub fn with_custom_xml(mut self) -> Self {
        self.custom_xml = true;
        self
    }

    /// Everything a pruning run can remove.
    pub fn with_all_extras(self) -> Self {
        self.with_calc_chain()
            .with_printer_settings()
            .with_thumbnail()
            .with_custom_properties()
            .with_custom_xml()
    }

    fn content_types(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Default Extension="png" ContentType="image/png"/><Default Extension="bin" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.printerSettings"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/styles.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml"/><Override PartName="/docProps/core.xml" ContentType="application/vnd.openxmlformats-package.core-properties+xml"/>"#,
        );
        for i in 1..=self.sheets.len() {
            xml.push_str(&format!(
                r#"<Override PartName="/xl/worksheets/sheet{}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#,
                i
            ));
        }
        if !self.images.is_empty() {
            xml.push_str(r#"<Override PartName="/xl/drawings/drawing1.xml" ContentType="application/vnd.openxmlformats-officedocument.drawing+xml"/>"#);
        }
        if self.calc_chain {
            xml.push_str(r#"<Override PartName="/xl/calcChain.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.calcChain+xml"/>"#);
        }
        if self.thumbnail {
            xml.push_str(r#"<Override PartName="/docProps/thumbnail.jpeg" ContentType="image/jpeg"/>"#);
        }
        if self.custom_properties {
            xml.push_str(r#"<Override PartName="/docProps/custom.xml" ContentType="application/vnd.openxmlformats-officedocument.custom-properties+xml"/>"#);
        }
        if self.custom_xml {
            xml.push_str(r#"<Override PartName="/customXml/itemProps1.xml" ContentType="application/vnd.openxmlformats-officedocument.customXmlProperties+xml"/>"#);
        }
        xml.push_str("</Types>");
        xml
    }

    fn root_rels(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/><Relationship Id="rId2" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties" Target="docProps/core.xml"/>"#,
        );
        if self.thumbnail {
            xml.push_str(r#"<Relationship Id="rId3" Type="http://schemas.openxmlformats.org/package/2006/relationships/metadata/thumbnail" Target="docProps/thumbnail.jpeg"/>"#);
        }
        if self.custom_properties {
            xml.push_str(r#"<Relationship Id="rId4" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/custom-properties" Target="docProps/custom.xml"/>"#);
        }
        xml.push_str("</Relationships>");
        xml
    }

    fn workbook(&self) -> String {
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="{}">
  <sheets>"#,
            REL_NS
        );
        for (i, sheet) in self.sheets.iter().enumerate() {
            xml.push_str(&format!(
                "\n    <sheet name=\"{}\" sheetId=\"{}\" r:id=\"rId{}\"/>",
                sheet,
                i + 1,
                i + 1
            ));
        }
        xml.push_str("\n  </sheets>");
        if !self.names.is_empty() {
            xml.push_str("\n  <definedNames>");
            for (name, scope, formula) in &self.names {
                let scope = scope
                    .map(|s| format!(" localSheetId=\"{}\"", s))
                    .unwrap_or_default();
                xml.push_str(&format!(
                    "\n    <definedName name=\"{}\"{}>{}</definedName>",
                    name,
                    scope,
                    escape(formula)
                ));
            }
            xml.push_str("\n  </definedNames>");
        }
        xml.push_str("\n  <calcPr calcId=\"191029\"/>\n</workbook>");
        xml
    }

    fn workbook_rels(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );
        for i in 1..=self.sheets.len() {
            xml.push_str(&format!(
                r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{}.xml"/>"#,
                i, i
            ));
        }
        xml.push_str(r#"<Relationship Id="rId100" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/styles" Target="styles.xml"/>"#);
        if self.calc_chain {
            xml.push_str(r#"<Relationship Id="rId101" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/>"#);
        }
        if self.custom_xml {
            xml.push_str(r#"<Relationship Id="rId102" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/customXml" Target="../customXml/item1.xml"/>"#);
        }
        xml.push_str("</Relationships>");
        xml
    }

    fn first_sheet(&self) -> String {
        let mut xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="{}"><sheetData><row r="1"><c r="A1"><v>42</v></c></row></sheetData><pageMargins left="0.7" right="0.7" top="0.75" bottom="0.75" header="0.3" footer="0.3"/>"#,
            REL_NS
        );
        if self.printer_settings {
            xml.push_str(r#"<pageSetup paperSize="9" orientation="portrait" r:id="rId2"/>"#);
        }
        if !self.images.is_empty() {
            xml.push_str(r#"<drawing r:id="rId1"/>"#);
        }
        xml.push_str("</worksheet>");
        xml
    }

    fn first_sheet_rels(&self) -> Option<String> {
        if self.images.is_empty() && !self.printer_settings {
            return None;
        }
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );
        if !self.images.is_empty() {
            xml.push_str(r#"<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/drawing" Target="../drawings/drawing1.xml"/>"#);
        }
        if self.printer_settings {
            xml.push_str(r#"<Relationship Id="rId2" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/printerSettings" Target="../printerSettings/printerSettings1.bin"/>"#);
        }
        xml.push_str("</Relationships>");
        Some(xml)
    }

    fn drawing_rels(&self) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
        );
        for (i, (file, _)) in self.images.iter().enumerate() {
            xml.push_str(&format!(
                r#"<Relationship Id="rId{}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/image" Target="../media/{}"/>"#,
                i + 1,
                file
            ));
        }
        xml.push_str("</Relationships>");
        xml
    }

    /// Serialize the workbook.
    pub fn build(&self) -> Vec<u8> {
        let mut parts: Vec<(String, Vec<u8>, bool)> = vec![
            ("[Content_Types].xml".into(), self.content_types().into_bytes(), true),
            ("_rels/.rels".into(), self.root_rels().into_bytes(), true),
            (
                "docProps/core.xml".into(),
                br#"<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties"/>"#.to_vec(),
                true,
            ),
            ("xl/workbook.xml".into(), self.workbook().into_bytes(), true),
            ("xl/_rels/workbook.xml.rels".into(), self.workbook_rels().into_bytes(), true),
            (
                "xl/styles.xml".into(),
                br#"<styleSheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"/>"#.to_vec(),
                true,
            ),
        ];

        for i in 1..=self.sheets.len() {
            let xml = if i == 1 {
                self.first_sheet()
            } else {
                r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData/></worksheet>"#.to_string()
            };
            parts.push((format!("xl/worksheets/sheet{}.xml", i), xml.into_bytes(), true));
        }
        if let Some(rels) = self.first_sheet_rels() {
            parts.push(("xl/worksheets/_rels/sheet1.xml.rels".into(), rels.into_bytes(), true));
        }
        if !self.images.is_empty() {
            parts.push((
                "xl/drawings/drawing1.xml".into(),
                br#"<xdr:wsDr xmlns:xdr="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing"/>"#.to_vec(),
                true,
            ));
            parts.push((
                "xl/drawings/_rels/drawing1.xml.rels".into(),
                self.drawing_rels().into_bytes(),
                true,
            ));
            for (file, bytes) in &self.images {
                parts.push((format!("xl/media/{}", file), bytes.clone(), false));
            }
        }
        if self.calc_chain {
            parts.push((
                "xl/calcChain.xml".into(),
                br#"<calcChain xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><c r="A1" i="1"/></calcChain>"#.to_vec(),
                true,
            ));
        }
        if self.printer_settings {
            parts.push((
                "xl/printerSettings/printerSettings1.bin".into(),
                vec![0x5A; 4096],
                true,
            ));
        }
        if self.thumbnail {
            parts.push(("docProps/thumbnail.jpeg".into(), jpeg(32, 24, 60), false));
        }
        if self.custom_properties {
            parts.push((
                "docProps/custom.xml".into(),
                br#"<Properties xmlns="http://schemas.openxmlformats.org/officeDocument/2006/custom-properties"><property fmtid="{D5CDD505-2E9C-101B-9397-08002B2CF9AE}" pid="2" name="Owner"><vt:lpwstr xmlns:vt="http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes">Finance</vt:lpwstr></property></Properties>"#.to_vec(),
                true,
            ));
        }
        if self.custom_xml {
            parts.push((
                "customXml/item1.xml".into(),
                br#"<b:Sources xmlns:b="http://schemas.openxmlformats.org/officeDocument/2006/bibliography"/>"#.to_vec(),
                true,
            ));
            parts.push((
                "customXml/itemProps1.xml".into(),
                br#"<ds:datastoreItem ds:itemID="{6F1B2C3D-0000-4000-8000-000000000001}" xmlns:ds="http://schemas.openxmlformats.org/officeDocument/2006/customXml"/>"#.to_vec(),
                true,
            ));
            parts.push((
                "customXml/_rels/item1.xml.rels".into(),
                br#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/customXmlProps" Target="itemProps1.xml"/></Relationships>"#.to_vec(),
                true,
            ));
        }

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data, deflate) in parts {
            let method = if deflate {
                CompressionMethod::Deflated
            } else {
                CompressionMethod::Stored
            };
            zip.start_file(name, FileOptions::default().compression_method(method))
                .unwrap();
            zip.write_all(&data).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    /// Write the workbook to `dir/file_name` and return its path.
    pub fn write(&self, dir: &Path, file_name: &str) -> PathBuf {
        let path = dir.join(file_name);
        fs::write(&path, self.build()).unwrap();
        path
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn noise(x: u32, y: u32, seed: u32) -> u8 {
    let mut v = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263) ^ seed;
    v = (v ^ (v >> 13)).wrapping_mul(1_274_126_177);
    (v >> 24) as u8
}

/// An opaque PNG that does not compress well.
pub fn noisy_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([noise(x, y, 7), noise(x, y, 11), noise(x, y, 13)])
    });
    let mut out = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
        .unwrap();
    out
}

/// A smooth gradient JPEG at the given quality.
pub fn jpeg(width: u32, height: u32, quality: u8) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
    });
    let mut out = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&img)
        .unwrap();
    out
}

/// Entry names of a ZIP file, in archive order.
pub fn entry_names(path: &Path) -> Vec<String> {
    let mut archive = ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

/// Bytes of one entry of a ZIP file.
pub fn entry_bytes(path: &Path, name: &str) -> Vec<u8> {
    let mut archive = ZipArchive::new(fs::File::open(path).unwrap()).unwrap();
    let mut file = archive.by_name(name).unwrap();
    let mut data = Vec::new();
    file.read_to_end(&mut data).unwrap();
    data
}

pub fn entry_text(path: &Path, name: &str) -> String {
    String::from_utf8(entry_bytes(path, name)).unwrap()
}

/// File names directly inside `dir`, sorted.
pub fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
