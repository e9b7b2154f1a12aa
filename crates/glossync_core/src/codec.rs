//! Storage-format fragment codec for glossary definitions.
//!
//! A definition is stored as the single data cell of a one-column table
//! wrapped in a `details` macro. Decoding is tolerant: pages
//! edited by hand in the wiki editor wrap lines in `<p>` elements, while
//! encoder output uses `<br />` line breaks and no paragraphs.

use std::borrow::Cow;

use html_escape::{decode_html_entities, encode_quoted_attribute, encode_text};
use quick_xml::Reader;
use quick_xml::events::Event;
use thiserror::Error;

pub const DETAILS_MACRO_NAME: &str = "details";
pub const DEFINITION_HEADING: &str = "Definition";
pub const LINE_BREAK: &str = "<br />";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeMiss {
    #[error("fragment contains no table")]
    NoTable,
    #[error("first table contains no data cell")]
    NoCell,
}

/// Escape definition text for embedding as cell content.
pub fn escape_definition(text: &str) -> String {
    let escaped = encode_quoted_attribute(text);
    escaped
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\n', LINE_BREAK)
}

pub fn encode(definition: &str) -> String {
    format!(
        "<ac:structured-macro ac:name=\"{DETAILS_MACRO_NAME}\"><ac:rich-text-body><table><tr><th>{DEFINITION_HEADING}</th></tr><tr><td>{}</td></tr></table></ac:rich-text-body></ac:structured-macro>",
        escape_definition(definition)
    )
}

/// Recover definition text from a stored fragment.
///
/// Precedence: first table, then its first `td`, then every `<p>` inside that
/// cell; with no paragraphs the whole cell is used with tags stripped.
/// Tokenizer errors end the scan early and whatever was collected is used.
pub fn decode(fragment: &str) -> Result<String, DecodeMiss> {
    let cell = extract_first_cell(fragment)?;
    let text = if cell.paragraphs.is_empty() {
        clean_text(&cell.text)
    } else {
        cell.paragraphs
            .iter()
            .map(|paragraph| clean_text(paragraph))
            .collect::<Vec<_>>()
            .join("\n")
    };
    Ok(normalize_whitespace(&text))
}

/// Collapse space/tab runs, drop interior blank lines, trim.
pub fn normalize_whitespace(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines = Vec::new();
    for line in unified.split('\n') {
        let mut collapsed = String::with_capacity(line.len());
        let mut in_run = false;
        for ch in line.chars() {
            if ch == ' ' || ch == '\t' {
                if !in_run {
                    collapsed.push(' ');
                    in_run = true;
                }
                continue;
            }
            in_run = false;
            collapsed.push(ch);
        }
        if collapsed.trim().is_empty() {
            continue;
        }
        lines.push(collapsed);
    }
    lines.join("\n").trim().to_string()
}

#[derive(Debug, Default)]
struct CellContent {
    text: String,
    paragraphs: Vec<String>,
}

#[derive(Debug)]
struct OpenParagraph {
    depth: usize,
    text: String,
}

enum ScanState {
    SeekingTable,
    InTable,
    InCell {
        cell_depth: usize,
        paragraph: Option<OpenParagraph>,
    },
}

fn extract_first_cell(fragment: &str) -> Result<CellContent, DecodeMiss> {
    let mut reader = Reader::from_str(fragment);
    reader.check_end_names(false);
    reader.trim_text(false);
    reader.expand_empty_elements(false);

    let mut state = ScanState::SeekingTable;
    let mut stack: Vec<String> = Vec::new();
    let mut cell = CellContent::default();

    loop {
        let event = match reader.read_event() {
            Ok(Event::Eof) | Err(_) => break,
            Ok(event) => event,
        };

        match state {
            ScanState::SeekingTable => match event {
                Event::Start(start) if element_name(start.local_name().as_ref()) == "table" => {
                    stack.push(element_name(start.name().as_ref()));
                    state = ScanState::InTable;
                }
                Event::Empty(start) if element_name(start.local_name().as_ref()) == "table" => {
                    return Err(DecodeMiss::NoCell);
                }
                _ => {}
            },
            ScanState::InTable => match event {
                Event::Start(start) => {
                    let qualified = element_name(start.name().as_ref());
                    if is_void(&qualified) {
                        continue;
                    }
                    let is_cell = element_name(start.local_name().as_ref()) == "td";
                    stack.push(qualified);
                    if is_cell {
                        state = ScanState::InCell {
                            cell_depth: stack.len(),
                            paragraph: None,
                        };
                    }
                }
                Event::Empty(start) => {
                    if element_name(start.local_name().as_ref()) == "td" {
                        return Ok(cell);
                    }
                }
                Event::End(end) => {
                    close_element(&mut stack, &element_name(end.name().as_ref()));
                    if stack.is_empty() {
                        return Err(DecodeMiss::NoCell);
                    }
                }
                _ => {}
            },
            ScanState::InCell {
                cell_depth,
                ref mut paragraph,
            } => match event {
                Event::Text(text) => {
                    let raw = String::from_utf8_lossy(&text);
                    push_text(&mut cell, paragraph, &raw);
                }
                Event::CData(data) => {
                    let raw = String::from_utf8_lossy(&data);
                    let escaped = encode_text(&raw);
                    push_text(&mut cell, paragraph, &escaped);
                }
                Event::Empty(start) => {
                    if element_name(start.local_name().as_ref()) == "br" {
                        push_text(&mut cell, paragraph, "\n");
                    }
                }
                Event::Start(start) => {
                    let name = element_name(start.local_name().as_ref());
                    if name == "br" {
                        push_text(&mut cell, paragraph, "\n");
                        continue;
                    }
                    let qualified = element_name(start.name().as_ref());
                    if is_void(&qualified) {
                        continue;
                    }
                    let is_paragraph = name == "p";
                    stack.push(qualified);
                    if is_paragraph && paragraph.is_none() {
                        *paragraph = Some(OpenParagraph {
                            depth: stack.len(),
                            text: String::new(),
                        });
                    }
                }
                Event::End(end) => {
                    close_element(&mut stack, &element_name(end.name().as_ref()));
                    if paragraph
                        .as_ref()
                        .is_some_and(|open| stack.len() < open.depth)
                        && let Some(open) = paragraph.take()
                    {
                        cell.paragraphs.push(open.text);
                    }
                    if stack.len() < cell_depth {
                        return Ok(cell);
                    }
                }
                _ => {}
            },
        }
    }

    match state {
        ScanState::SeekingTable => Err(DecodeMiss::NoTable),
        ScanState::InTable => Err(DecodeMiss::NoCell),
        ScanState::InCell { paragraph, .. } => {
            if let Some(open) = paragraph {
                cell.paragraphs.push(open.text);
            }
            Ok(cell)
        }
    }
}

fn push_text(cell: &mut CellContent, paragraph: &mut Option<OpenParagraph>, raw: &str) {
    cell.text.push_str(raw);
    if let Some(open) = paragraph {
        open.text.push_str(raw);
    }
}

fn close_element(stack: &mut Vec<String>, name: &str) {
    if let Some(position) = stack.iter().rposition(|open| open == name) {
        stack.truncate(position);
    }
}

fn element_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

/// Only unprefixed names are HTML void elements; `ac:link` is a container.
fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

fn clean_text(raw: &str) -> String {
    let unescaped: Cow<'_, str> = decode_html_entities(raw);
    unescaped.trim().to_string()
}
