//! Targeted edits of a single XML package part.
//!
//! Edits are applied by re-streaming the part through a quick-xml writer.
//! Events that are not touched are copied verbatim, so an unmodified part
//! round-trips byte-for-byte.

use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use slimmer_core::{Error, Result};
use std::collections::HashSet;

/// An element found by [`XmlPart::elements`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInfo {
    /// Position among all elements with the same local name, in document order.
    pub ordinal: usize,
    /// Qualified element name as written (`x:definedName`).
    pub name: String,
    /// Attributes as (qualified key, unescaped value).
    pub attributes: Vec<(String, String)>,
    /// Concatenated, unescaped descendant text.
    pub text: String,
}

impl ElementInfo {
    /// Look up an attribute by qualified key, then by local name.
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .or_else(|| {
                self.attributes
                    .iter()
                    .find(|(k, _)| local_str(k) == key)
            })
            .map(|(_, v)| v.as_str())
    }
}

/// A parsed XML part.
#[derive(Debug, Clone)]
pub struct XmlPart {
    part: String,
    bytes: Vec<u8>,
    modified: bool,
}

impl XmlPart {
    /// Parse and validate a part. `part` names it in error messages.
    pub fn parse(part: impl Into<String>, bytes: Vec<u8>) -> Result<Self> {
        let doc = Self {
            part: part.into(),
            bytes,
            modified: false,
        };
        doc.validate()?;
        Ok(doc)
    }

    /// Name of the part this document came from.
    pub fn part(&self) -> &str {
        &self.part
    }

    /// Whether any edit changed the document.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Serialized document. Identical to the input if nothing was modified.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn reader(&self) -> Reader<&[u8]> {
        let mut reader = Reader::from_reader(self.bytes.as_slice());
        reader.trim_text(false);
        reader.check_end_names(true);
        reader
    }

    fn next<'a>(&self, reader: &mut Reader<&'a [u8]>) -> Result<Event<'a>> {
        reader.read_event().map_err(|e| {
            Error::malformed_xml(
                &self.part,
                format!("at byte {}: {}", reader.buffer_position(), e),
            )
        })
    }

    fn validate(&self) -> Result<()> {
        let mut reader = self.reader();
        let mut depth = 0usize;
        let mut saw_root = false;

        loop {
            match self.next(&mut reader)? {
                Event::Start(_) => {
                    depth += 1;
                    saw_root = true;
                }
                Event::Empty(_) => saw_root = true,
                Event::End(e) => {
                    if depth == 0 {
                        return Err(Error::malformed_xml(
                            &self.part,
                            format!(
                                "unexpected closing tag </{}>",
                                String::from_utf8_lossy(e.name().as_ref())
                            ),
                        ));
                    }
                    depth -= 1;
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if depth != 0 {
            return Err(Error::malformed_xml(&self.part, "unclosed element at end of document"));
        }
        if !saw_root {
            return Err(Error::malformed_xml(&self.part, "document has no root element"));
        }
        Ok(())
    }

    fn attributes_of(&self, e: &BytesStart) -> Result<Vec<(String, String)>> {
        let mut attrs = Vec::new();
        for attr in e.attributes() {
            let attr = attr.map_err(|err| Error::malformed_xml(&self.part, err))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| Error::malformed_xml(&self.part, err))?
                .into_owned();
            attrs.push((key, value));
        }
        Ok(attrs)
    }

    /// Every element with the given local name, in document order.
    pub fn elements(&self, local: &str) -> Result<Vec<ElementInfo>> {
        let mut reader = self.reader();
        let mut found: Vec<ElementInfo> = Vec::new();
        // (index into found, depth at which it was opened)
        let mut open: Vec<(usize, usize)> = Vec::new();
        let mut depth = 0usize;

        loop {
            match self.next(&mut reader)? {
                Event::Start(e) => {
                    depth += 1;
                    if local_name(e.name().as_ref()) == local.as_bytes() {
                        let info = self.info(found.len(), &e)?;
                        found.push(info);
                        open.push((found.len() - 1, depth));
                    }
                }
                Event::Empty(e) => {
                    if local_name(e.name().as_ref()) == local.as_bytes() {
                        let info = self.info(found.len(), &e)?;
                        found.push(info);
                    }
                }
                Event::Text(t) if !open.is_empty() => {
                    let text = t
                        .unescape()
                        .map_err(|err| Error::malformed_xml(&self.part, err))?;
                    for (i, _) in &open {
                        found[*i].text.push_str(&text);
                    }
                }
                Event::CData(c) if !open.is_empty() => {
                    let text = String::from_utf8_lossy(&c).into_owned();
                    for (i, _) in &open {
                        found[*i].text.push_str(&text);
                    }
                }
                Event::End(_) => {
                    if matches!(open.last(), Some(&(_, d)) if d == depth) {
                        open.pop();
                    }
                    depth = depth.saturating_sub(1);
                }
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(found)
    }

    fn info(&self, ordinal: usize, e: &BytesStart) -> Result<ElementInfo> {
        Ok(ElementInfo {
            ordinal,
            name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
            attributes: self.attributes_of(e)?,
            text: String::new(),
        })
    }

    /// Number of elements with the given local name.
    pub fn count(&self, local: &str) -> Result<usize> {
        Ok(self.elements(local)?.len())
    }

    /// Remove every element with the given local name that matches
    /// `predicate`, including its subtree and the whitespace right before it.
    pub fn remove_matching<F>(&mut self, local: &str, predicate: F) -> Result<usize>
    where
        F: Fn(&ElementInfo) -> bool,
    {
        let targets: HashSet<usize> = self
            .elements(local)?
            .iter()
            .filter(|e| predicate(e))
            .map(|e| e.ordinal)
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let mut reader = self.reader();
        let mut writer = Writer::new(Vec::with_capacity(self.bytes.len()));
        let mut ordinal = 0usize;
        let mut removed = 0usize;
        let mut skip_depth: Option<usize> = None;
        let mut pending_ws: Option<Event> = None;

        loop {
            let event = self.next(&mut reader)?;

            if let Some(depth) = skip_depth.as_mut() {
                match &event {
                    Event::Start(e) => {
                        if local_name(e.name().as_ref()) == local.as_bytes() {
                            ordinal += 1;
                        }
                        *depth += 1;
                    }
                    Event::Empty(e) => {
                        if local_name(e.name().as_ref()) == local.as_bytes() {
                            ordinal += 1;
                        }
                    }
                    Event::End(_) => {
                        *depth -= 1;
                        if *depth == 0 {
                            skip_depth = None;
                        }
                    }
                    Event::Eof => break,
                    _ => {}
                }
                continue;
            }

            let is_target = match &event {
                Event::Start(e) | Event::Empty(e)
                    if local_name(e.name().as_ref()) == local.as_bytes() =>
                {
                    let current = ordinal;
                    ordinal += 1;
                    targets.contains(&current)
                }
                _ => false,
            };
            if is_target {
                removed += 1;
                pending_ws = None;
                if matches!(event, Event::Start(_)) {
                    skip_depth = Some(1);
                }
                continue;
            }

            if matches!(&event, Event::Text(t) if t.iter().all(u8::is_ascii_whitespace)) {
                if let Some(ws) = pending_ws.take() {
                    self.write(&mut writer, ws)?;
                }
                pending_ws = Some(event);
                continue;
            }

            if let Some(ws) = pending_ws.take() {
                self.write(&mut writer, ws)?;
            }
            if matches!(event, Event::Eof) {
                break;
            }
            self.write(&mut writer, event)?;
        }

        self.finish(writer);
        Ok(removed)
    }

    /// Rewrite the attributes of every element with the given local name.
    ///
    /// `f` returns `true` when it changed the attribute list.
    pub fn map_attributes<F>(&mut self, local: &str, mut f: F) -> Result<usize>
    where
        F: FnMut(&mut Vec<(String, String)>) -> bool,
    {
        self.rewrite_starts(|element, attrs| element == local && f(attrs))
    }

    /// Remove attributes selected by `(element local name, attribute key, value)`.
    pub fn strip_attributes<F>(&mut self, mut predicate: F) -> Result<usize>
    where
        F: FnMut(&str, &str, &str) -> bool,
    {
        self.rewrite_starts(|element, attrs| {
            let before = attrs.len();
            attrs.retain(|(k, v)| !predicate(element, k, v));
            attrs.len() != before
        })
    }

    fn rewrite_starts<F>(&mut self, mut f: F) -> Result<usize>
    where
        F: FnMut(&str, &mut Vec<(String, String)>) -> bool,
    {
        let mut reader = self.reader();
        let mut writer = Writer::new(Vec::with_capacity(self.bytes.len()));
        let mut changed = 0usize;

        loop {
            let event = self.next(&mut reader)?;
            let rebuilt = match &event {
                Event::Start(e) | Event::Empty(e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let mut attrs = self.attributes_of(e)?;
                    if f(local_str(&name), &mut attrs) {
                        changed += 1;
                        Some(build_start(name, &attrs))
                    } else {
                        None
                    }
                }
                Event::Eof => break,
                _ => None,
            };

            match (rebuilt, event) {
                (Some(start), Event::Start(_)) => self.write(&mut writer, Event::Start(start))?,
                (Some(start), Event::Empty(_)) => self.write(&mut writer, Event::Empty(start))?,
                (_, event) => self.write(&mut writer, event)?,
            }
        }

        if changed > 0 {
            self.finish(writer);
        }
        Ok(changed)
    }

    /// Append an empty child element to the first element with local name
    /// `parent`. Returns `false` if no such parent exists.
    pub fn append_child(
        &mut self,
        parent: &str,
        name: &str,
        attrs: &[(&str, &str)],
    ) -> Result<bool> {
        let child: Vec<(String, String)> = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut reader = self.reader();
        let mut writer = Writer::new(Vec::with_capacity(self.bytes.len() + 128));
        let mut depth = 0usize;
        // Depth of the open parent, once found.
        let mut parent_depth: Option<usize> = None;
        let mut inserted = false;

        loop {
            let event = self.next(&mut reader)?;
            match event {
                Event::Start(e) => {
                    depth += 1;
                    if !inserted
                        && parent_depth.is_none()
                        && local_name(e.name().as_ref()) == parent.as_bytes()
                    {
                        parent_depth = Some(depth);
                    }
                    self.write(&mut writer, Event::Start(e))?;
                }
                Event::Empty(e)
                    if !inserted
                        && parent_depth.is_none()
                        && local_name(e.name().as_ref()) == parent.as_bytes() =>
                {
                    let parent_name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let parent_attrs = self.attributes_of(&e)?;
                    let open = build_start(parent_name.clone(), &parent_attrs);
                    self.write(&mut writer, Event::Start(open))?;
                    self.write(&mut writer, Event::Empty(build_start(name.to_string(), &child)))?;
                    self.write(
                        &mut writer,
                        Event::End(quick_xml::events::BytesEnd::new(parent_name)),
                    )?;
                    inserted = true;
                }
                Event::End(e) => {
                    if parent_depth == Some(depth) {
                        let start = build_start(name.to_string(), &child);
                        self.write(&mut writer, Event::Empty(start))?;
                        parent_depth = None;
                        inserted = true;
                    }
                    depth = depth.saturating_sub(1);
                    self.write(&mut writer, Event::End(e))?;
                }
                Event::Eof => break,
                event => self.write(&mut writer, event)?,
            }
        }

        if inserted {
            self.finish(writer);
        }
        Ok(inserted)
    }

    fn write(&self, writer: &mut Writer<Vec<u8>>, event: Event) -> Result<()> {
        writer
            .write_event(event)
            .map_err(|e| Error::malformed_xml(&self.part, format!("write failed: {}", e)))
    }

    fn finish(&mut self, writer: Writer<Vec<u8>>) {
        let bytes = writer.into_inner();
        if bytes != self.bytes {
            self.bytes = bytes;
            self.modified = true;
        }
    }
}

fn build_start(name: String, attrs: &[(String, String)]) -> BytesStart<'static> {
    let mut start = BytesStart::new(name);
    for (k, v) in attrs {
        start.push_attribute((k.as_str(), v.as_str()));
    }
    start
}

/// Extract the local name from a potentially namespaced XML element name.
pub fn local_name(name: &[u8]) -> &[u8] {
    if let Some(pos) = name.iter().position(|&b| b == b':') {
        &name[pos + 1..]
    } else {
        name
    }
}

fn local_str(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, l)| l).unwrap_or(name)
}
