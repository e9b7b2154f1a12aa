use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const HEADER_TERM: &str = "Term";
pub const HEADER_DEFINITION: &str = "Definition";
pub const HEADER_CATEGORY: &str = "Category";

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct GlossaryRow {
    pub term: String,
    pub definition: String,
    pub category: String,
}

impl GlossaryRow {
    pub fn new(term: &str, definition: &str, category: &str) -> Self {
        Self {
            term: term.to_string(),
            definition: definition.to_string(),
            category: category.to_string(),
        }
    }
}

pub fn read_rows(path: &Path) -> Result<Vec<GlossaryRow>> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read glossary file {}", path.display()))?;
    let content = String::from_utf8(bytes)
        .with_context(|| format!("glossary file is not valid UTF-8: {}", path.display()))?;
    parse_rows(&content).with_context(|| format!("failed to parse {}", path.display()))
}

/// Parse delimited glossary text. The header row must name `Term`,
/// `Definition` and `Category` with exact casing; other columns are ignored.
pub fn parse_rows(content: &str) -> Result<Vec<GlossaryRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(strip_bom(content).as_bytes());

    let headers = reader.headers().context("failed to read header row")?.clone();
    let column = |name: &str| headers.iter().position(|header| header == name);
    let (Some(term_index), Some(definition_index), Some(category_index)) = (
        column(HEADER_TERM),
        column(HEADER_DEFINITION),
        column(HEADER_CATEGORY),
    ) else {
        bail!(
            "header row must contain {HEADER_TERM}, {HEADER_DEFINITION} and {HEADER_CATEGORY} (found: {})",
            headers.iter().collect::<Vec<_>>().join(", ")
        );
    };

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("failed to read data row {}", index + 1))?;
        let field = |position: usize| record.get(position).unwrap_or_default().to_string();
        rows.push(GlossaryRow {
            term: field(term_index),
            definition: field(definition_index),
            category: field(category_index),
        });
    }
    Ok(rows)
}

pub fn write_rows(path: &Path, rows: &[GlossaryRow]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let rendered = render_rows(rows)?;
    fs::write(path, rendered).with_context(|| format!("failed to write {}", path.display()))
}

/// Render rows as UTF-8 text without a byte-order mark.
pub fn render_rows(rows: &[GlossaryRow]) -> Result<String> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer
        .write_record([HEADER_TERM, HEADER_DEFINITION, HEADER_CATEGORY])
        .context("failed to write header row")?;
    for row in rows {
        writer
            .write_record([&row.term, &row.definition, &row.category])
            .with_context(|| format!("failed to write row for {}", row.term))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|error| anyhow::anyhow!("failed to flush glossary rows: {}", error.error()))?;
    String::from_utf8(bytes).context("rendered glossary is not valid UTF-8")
}

fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}
