//! `.docx` package handling: unzip, parse templated parts, rezip.

use std::io::{Cursor, Read, Write};

use auditdoc_shared::{AuditDocError, Result};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::context::MergeContext;
use crate::eval::render_nodes;
use crate::parse::{Node, parse};
use crate::xml::{check_field_placement, clean_template_tags, expand_scoped_tags};

const MAIN_PART: &str = "word/document.xml";

/// One zip entry of the template package.
#[derive(Debug)]
struct Part {
    name: String,
    body: PartBody,
}

#[derive(Debug)]
enum PartBody {
    Template(Vec<Node>),
    Raw(Vec<u8>),
}

/// A template package parsed once and rendered many times.
#[derive(Debug)]
pub struct ParsedTemplate {
    id: String,
    parts: Vec<Part>,
}

impl ParsedTemplate {
    /// Parse `.docx` bytes. The main document, headers and footers are templated.
    pub fn parse(id: &str, bytes: &[u8]) -> Result<Self> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
            AuditDocError::rendering(format!("template '{id}' is not a .docx package: {e}"))
        })?;

        let mut parts = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).map_err(|e| {
                AuditDocError::rendering(format!("template '{id}': unreadable entry {i}: {e}"))
            })?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut contents = Vec::new();
            file.read_to_end(&mut contents).map_err(|e| {
                AuditDocError::rendering(format!("template '{id}': reading {name}: {e}"))
            })?;

            let body = if is_template_part(&name) {
                let xml = String::from_utf8(contents).map_err(|_| {
                    AuditDocError::rendering(format!("template '{id}': {name} is not UTF-8"))
                })?;
                let prepared = expand_scoped_tags(&clean_template_tags(&xml))
                    .and_then(|source| {
                        check_field_placement(&source)?;
                        parse(&source)
                    })
                    .map_err(|e| locate(id, &name, e))?;
                PartBody::Template(prepared)
            } else {
                PartBody::Raw(contents)
            };
            parts.push(Part { name, body });
        }

        if !parts.iter().any(|p| p.name == MAIN_PART) {
            return Err(AuditDocError::rendering(format!(
                "template '{id}' has no {MAIN_PART}"
            )));
        }

        debug!(template_id = id, parts = parts.len(), "template parsed");
        Ok(Self {
            id: id.to_string(),
            parts,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Names of the parts that carry template tags.
    pub fn templated_parts(&self) -> impl Iterator<Item = &str> {
        self.parts
            .iter()
            .filter(|p| matches!(p.body, PartBody::Template(_)))
            .map(|p| p.name.as_str())
    }

    /// Merge `ctx` into every templated part and repackage the document.
    ///
    /// Any part failing to render fails the whole document.
    pub fn render(&self, ctx: &MergeContext) -> Result<Vec<u8>> {
        let mut rendered: Vec<(&str, Vec<u8>)> = Vec::with_capacity(self.parts.len());
        for part in &self.parts {
            let bytes = match &part.body {
                PartBody::Template(nodes) => render_nodes(nodes, ctx)
                    .map_err(|e| locate(&self.id, &part.name, e))?
                    .into_bytes(),
                PartBody::Raw(bytes) => bytes.clone(),
            };
            rendered.push((part.name.as_str(), bytes));
        }
        write_package(&rendered)
    }
}

/// Prefix a rendering error with where it happened.
fn locate(id: &str, part: &str, err: AuditDocError) -> AuditDocError {
    match err {
        AuditDocError::Rendering(msg) => {
            AuditDocError::Rendering(format!("template '{id}', part {part}: {msg}"))
        }
        other => other,
    }
}

fn is_template_part(name: &str) -> bool {
    name == MAIN_PART
        || ((name.starts_with("word/header") || name.starts_with("word/footer"))
            && name.ends_with(".xml"))
}

/// Zip entries in their original order.
pub(crate) fn write_package(entries: &[(&str, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in entries {
        writer
            .start_file(*name, options)
            .map_err(|e| AuditDocError::rendering(format!("writing {name}: {e}")))?;
        writer
            .write_all(bytes)
            .map_err(|e| AuditDocError::rendering(format!("writing {name}: {e}")))?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| AuditDocError::rendering(format!("finalizing document: {e}")))?;
    Ok(cursor.into_inner())
}

/// Read one entry of a `.docx` package as text.
pub fn read_part(docx: &[u8], name: &str) -> Result<String> {
    let mut archive = ZipArchive::new(Cursor::new(docx))
        .map_err(|e| AuditDocError::rendering(format!("not a .docx package: {e}")))?;
    let mut file = archive
        .by_name(name)
        .map_err(|e| AuditDocError::rendering(format!("{name}: {e}")))?;
    let mut text = String::new();
    file.read_to_string(&mut text)
        .map_err(|e| AuditDocError::rendering(format!("{name}: {e}")))?;
    Ok(text)
}
