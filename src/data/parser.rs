use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::{debug, info, warn};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use super::dtd::{AttributeDefault, AttributeType, ContentSpec, Dtd};
use super::model::{Dataset, Field, Record};
use crate::error::ParseError;

// ---------------------------------------------------------------------------
// Validation mode
// ---------------------------------------------------------------------------

/// How closely the document is checked against its DTD.
///
/// Both modes reject malformed XML, undefined entities, an undeclared root
/// and undeclared record elements. `Strict` additionally checks every
/// element, attribute, and placement against the declarations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Validation {
    #[default]
    Lenient,
    Strict,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validation::Lenient => write!(f, "lenient"),
            Validation::Strict => write!(f, "strict"),
        }
    }
}

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Parse an XML record database against its DTD.
///
/// Direct children of the root become [`Record`]s; their children become
/// [`Field`]s whose value is the element's text with nested markup flattened
/// and whitespace collapsed.
pub fn parse(xml_path: &Path, dtd_path: &Path, validation: Validation) -> Result<Dataset, ParseError> {
    let dtd_text = fs::read_to_string(dtd_path).map_err(|source| ParseError::Io {
        path: dtd_path.to_path_buf(),
        source,
    })?;
    let dtd = Dtd::parse(&dtd_text).map_err(|source| ParseError::Dtd {
        path: dtd_path.to_path_buf(),
        source,
    })?;
    debug!(
        "{}: {} element declarations",
        dtd_path.display(),
        dtd.element_count()
    );

    let file = File::open(xml_path).map_err(|source| ParseError::Io {
        path: xml_path.to_path_buf(),
        source,
    })?;
    let dataset = read_document(BufReader::new(file), xml_path, &dtd, validation)?;

    info!(
        "parsed {} records from {} ({validation})",
        dataset.len(),
        xml_path.display()
    );
    Ok(dataset)
}

fn read_document<R: BufRead>(
    source: R,
    path: &Path,
    dtd: &Dtd,
    validation: Validation,
) -> Result<Dataset, ParseError> {
    let mut reader = Reader::from_reader(source);
    let mut doc = DocumentBuilder::new(path, dtd, validation);
    let mut buf = Vec::new();

    loop {
        let position = reader.buffer_position();
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| doc.malformed(reader.buffer_position(), e))?;

        match event {
            Event::DocType(text) => {
                let text = reader
                    .decoder()
                    .decode(&text)
                    .map_err(|e| doc.malformed(position, e))?;
                doc.doctype(&text);
            }
            Event::Start(start) => {
                let (name, attributes) =
                    element_parts(&reader, &start, dtd).map_err(|e| doc.malformed(position, e))?;
                doc.open(name, attributes, position)?;
            }
            Event::Empty(start) => {
                let (name, attributes) =
                    element_parts(&reader, &start, dtd).map_err(|e| doc.malformed(position, e))?;
                doc.open(name, attributes, position)?;
                doc.close(position)?;
            }
            Event::End(_) => doc.close(position)?,
            Event::Text(text) => {
                let text = text
                    .unescape_with(|entity| dtd.entity(entity))
                    .map_err(|e| doc.malformed(position, e))?;
                doc.text(&text, position)?;
            }
            Event::CData(data) => {
                let text = reader
                    .decoder()
                    .decode(&data)
                    .map_err(|e| doc.malformed(position, e))?;
                doc.text(&text, position)?;
            }
            Event::Eof => break,
            // XML declaration, comments, processing instructions
            _ => {}
        }
        buf.clear();
    }

    doc.finish(reader.buffer_position())
}

/// Decode an element's name and its attributes, resolving entity references
/// in attribute values through the DTD.
fn element_parts<B>(
    reader: &Reader<B>,
    start: &BytesStart<'_>,
    dtd: &Dtd,
) -> quick_xml::Result<(String, BTreeMap<String, String>)> {
    let name = reader.decoder().decode(start.name().as_ref())?.into_owned();
    let mut attributes = BTreeMap::new();
    for attr in start.attributes() {
        let attr = attr?;
        let key = reader.decoder().decode(attr.key.as_ref())?.into_owned();
        let value = attr
            .decode_and_unescape_value_with(reader, |entity| dtd.entity(entity))?
            .into_owned();
        attributes.insert(key, value);
    }
    Ok((name, attributes))
}

// ---------------------------------------------------------------------------
// Document builder: element stack → records
// ---------------------------------------------------------------------------

struct DocumentBuilder<'a> {
    path: &'a Path,
    dtd: &'a Dtd,
    validation: Validation,
    doctype: Option<String>,
    root: Option<String>,
    /// Names of the currently open elements, root first.
    open: Vec<String>,
    record: Option<Record>,
    /// The field being read; its value accumulates raw text until it closes.
    field: Option<Field>,
    records: Vec<Record>,
    undeclared: BTreeSet<String>,
}

impl<'a> DocumentBuilder<'a> {
    fn new(path: &'a Path, dtd: &'a Dtd, validation: Validation) -> Self {
        DocumentBuilder {
            path,
            dtd,
            validation,
            doctype: None,
            root: None,
            open: Vec::new(),
            record: None,
            field: None,
            records: Vec::new(),
            undeclared: BTreeSet::new(),
        }
    }

    fn strict(&self) -> bool {
        self.validation == Validation::Strict
    }

    fn malformed(&self, position: usize, message: impl fmt::Display) -> ParseError {
        ParseError::Xml {
            path: self.path.to_path_buf(),
            position,
            message: message.to_string(),
        }
    }

    fn invalid(&self, position: usize, reason: impl Into<String>) -> ParseError {
        ParseError::Invalid {
            path: self.path.to_path_buf(),
            position,
            reason: reason.into(),
        }
    }

    fn doctype(&mut self, text: &str) {
        let name = text
            .split(|c: char| c.is_whitespace() || c == '[')
            .find(|t| !t.is_empty())
            .unwrap_or("");
        if text.contains('[') {
            warn!(
                "{}: internal DTD subset in DOCTYPE is ignored",
                self.path.display()
            );
        }
        self.doctype = Some(name.to_string());
    }

    fn open(
        &mut self,
        name: String,
        mut attributes: BTreeMap<String, String>,
        position: usize,
    ) -> Result<(), ParseError> {
        self.check_placement(&name, position)?;
        if self.strict() {
            self.check_attributes(&name, &attributes, position)?;
        }

        match self.open.len() {
            0 => self.root = Some(name.clone()),
            1 => {
                self.apply_defaults(&name, &mut attributes);
                self.record = Some(Record::new(name.clone(), attributes));
            }
            2 => {
                self.apply_defaults(&name, &mut attributes);
                self.field = Some(Field {
                    name: name.clone(),
                    attributes,
                    value: String::new(),
                });
            }
            _ => {}
        }
        self.open.push(name);
        Ok(())
    }

    fn check_placement(&mut self, name: &str, position: usize) -> Result<(), ParseError> {
        match self.open.len() {
            0 => {
                if self.root.is_some() {
                    return Err(self.malformed(position, format!("second root element <{name}>")));
                }
                if let Some(doctype) = &self.doctype {
                    if doctype != name {
                        return Err(self.invalid(
                            position,
                            format!("root element <{name}> does not match DOCTYPE `{doctype}`"),
                        ));
                    }
                }
                if !self.dtd.is_declared(name) {
                    return Err(self.invalid(position, format!("root element <{name}> is not declared")));
                }
            }
            1 => {
                let root = &self.open[0];
                if !self.dtd.is_declared(name) {
                    return Err(self.invalid(position, format!("record element <{name}> is not declared")));
                }
                if self.strict() && !self.dtd.allows_child(root, name) {
                    return Err(self.invalid(position, format!("<{name}> is not allowed in <{root}>")));
                }
            }
            depth => {
                if self.dtd.is_declared(name) {
                    let parent = &self.open[depth - 1];
                    if self.strict() && !self.dtd.allows_child(parent, name) {
                        return Err(self.invalid(position, format!("<{name}> is not allowed in <{parent}>")));
                    }
                } else if self.strict() {
                    return Err(self.invalid(position, format!("element <{name}> is not declared")));
                } else if self.undeclared.insert(name.to_string()) {
                    warn!(
                        "{}: <{name}> is not declared in the DTD; keeping its text",
                        self.path.display()
                    );
                }
            }
        }
        Ok(())
    }

    fn check_attributes(
        &self,
        element: &str,
        attributes: &BTreeMap<String, String>,
        position: usize,
    ) -> Result<(), ParseError> {
        for (key, value) in attributes {
            if key.starts_with("xmlns") || key.starts_with("xml:") {
                continue;
            }
            let Some(decl) = self.dtd.attribute(element, key) else {
                return Err(self.invalid(
                    position,
                    format!("attribute `{key}` of <{element}> is not declared"),
                ));
            };
            if let AttributeType::Enumerated(allowed) = &decl.kind {
                if !allowed.iter().any(|a| a == value) {
                    return Err(self.invalid(
                        position,
                        format!("attribute `{key}` of <{element}> is `{value}`, expected one of {allowed:?}"),
                    ));
                }
            }
            if let AttributeDefault::Fixed(fixed) = &decl.default {
                if fixed != value {
                    return Err(self.invalid(
                        position,
                        format!("attribute `{key}` of <{element}> must be `{fixed}`"),
                    ));
                }
            }
        }
        for decl in self.dtd.attributes_of(element) {
            if decl.default == AttributeDefault::Required && !attributes.contains_key(&decl.name) {
                return Err(self.invalid(
                    position,
                    format!("<{element}> lacks required attribute `{}`", decl.name),
                ));
            }
        }
        Ok(())
    }

    fn apply_defaults(&self, element: &str, attributes: &mut BTreeMap<String, String>) {
        for decl in self.dtd.attributes_of(element) {
            if let Some(value) = decl.default.value() {
                attributes
                    .entry(decl.name.clone())
                    .or_insert_with(|| value.to_string());
            }
        }
    }

    fn close(&mut self, position: usize) -> Result<(), ParseError> {
        if self.open.pop().is_none() {
            return Err(self.malformed(position, "closing tag without an open element"));
        }
        match self.open.len() {
            1 => {
                if let Some(record) = self.record.take() {
                    self.records.push(record);
                }
            }
            2 => {
                if let (Some(mut field), Some(record)) = (self.field.take(), self.record.as_mut()) {
                    field.value = collapse_whitespace(&field.value);
                    record.fields.push(field);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn text(&mut self, text: &str, position: usize) -> Result<(), ParseError> {
        let blank = text.trim().is_empty();
        let Some(element) = self.open.last() else {
            if blank {
                return Ok(());
            }
            return Err(self.malformed(position, "text outside the root element"));
        };
        if self.strict()
            && !blank
            && !self.dtd.content(element).is_some_and(ContentSpec::allows_text)
        {
            return Err(self.invalid(
                position,
                format!("character data is not allowed in <{element}>"),
            ));
        }
        // Text directly inside the root or a record is layout only.
        if self.open.len() > 2 {
            if let Some(field) = self.field.as_mut() {
                field.value.push_str(text);
            }
        }
        Ok(())
    }

    fn finish(self, position: usize) -> Result<Dataset, ParseError> {
        if let Some(open) = self.open.last() {
            return Err(self.malformed(position, format!("document ends inside <{open}>")));
        }
        let Some(root) = self.root.as_deref() else {
            return Err(self.malformed(position, "document has no root element"));
        };
        Ok(Dataset::from_records(root.to_owned(), self.records, self.undeclared))
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
