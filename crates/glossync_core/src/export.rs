use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::category::{CategoryEntry, CategoryMapping, CategoryResolver};
use crate::codec;
use crate::store::{ContentStore, PageRef};
use crate::table::{GlossaryRow, write_rows};

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub space_key: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExportCategoryResult {
    pub key: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub exported: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportReport {
    pub success: bool,
    pub rows: Vec<GlossaryRow>,
    pub categories: Vec<ExportCategoryResult>,
    pub unparseable: usize,
    pub errors: Vec<String>,
    pub request_count: usize,
}

/// Run the export and write the collected rows to `path`.
pub fn export_to_file<S>(
    store: &mut S,
    mapping: &CategoryMapping,
    path: &Path,
    options: &ExportOptions,
) -> Result<ExportReport>
where
    S: ContentStore + ?Sized,
{
    let report = run_export(store, mapping, options);
    write_rows(path, &report.rows)
        .with_context(|| format!("failed to write export to {}", path.display()))?;
    info!(path = %path.display(), rows = report.rows.len(), "wrote glossary export");
    Ok(report)
}

/// Walk every mapped category's child pages and rebuild glossary rows.
///
/// Category and page failures are recorded and skipped. A body whose
/// definition cannot be recovered still yields a row with an empty
/// definition.
pub fn run_export<S>(store: &mut S, mapping: &CategoryMapping, options: &ExportOptions) -> ExportReport
where
    S: ContentStore + ?Sized,
{
    let requests_before = store.request_count();
    let resolver = CategoryResolver::new(mapping, &options.space_key);
    let mut report = ExportReport {
        success: true,
        rows: Vec::new(),
        categories: Vec::with_capacity(mapping.len()),
        unparseable: 0,
        errors: Vec::new(),
        request_count: 0,
    };

    for entry in mapping.entries() {
        let result = export_category(store, &resolver, entry, &mut report);
        report.categories.push(result);
    }

    report.success = report.errors.is_empty();
    report.request_count = store.request_count().saturating_sub(requests_before);
    info!(
        rows = report.rows.len(),
        categories = report.categories.len(),
        unparseable = report.unparseable,
        errors = report.errors.len(),
        "export finished"
    );
    report
}

fn export_category<S>(
    store: &mut S,
    resolver: &CategoryResolver<'_>,
    entry: &CategoryEntry,
    report: &mut ExportReport,
) -> ExportCategoryResult
where
    S: ContentStore + ?Sized,
{
    let mut result = ExportCategoryResult {
        key: entry.key.clone(),
        title: entry.title.clone(),
        parent_id: None,
        exported: 0,
        error: None,
    };

    let parent = match resolver.resolve_entry(store, entry) {
        Ok(parent) => parent,
        Err(error) => {
            warn!(category = %entry.title, %error, "skipping category");
            report.errors.push(error.to_string());
            result.error = Some(error.to_string());
            return result;
        }
    };
    result.parent_id = Some(parent.id.clone());

    let children = match store.list_child_pages(&parent.id) {
        Ok(children) => children,
        Err(error) => {
            let message = format!("listing children of {} failed: {error:#}", entry.title);
            warn!(category = %entry.title, error = %format!("{error:#}"), "skipping category");
            report.errors.push(message.clone());
            result.error = Some(message);
            return result;
        }
    };
    debug!(category = %entry.title, children = children.len(), "listed child pages");

    for child in children {
        if let Some(row) = export_page(store, &child, entry, report) {
            report.rows.push(row);
            result.exported += 1;
        }
    }
    result
}

fn export_page<S>(
    store: &mut S,
    page: &PageRef,
    entry: &CategoryEntry,
    report: &mut ExportReport,
) -> Option<GlossaryRow>
where
    S: ContentStore + ?Sized,
{
    let body = match store.fetch_storage_body(&page.id) {
        Ok(body) => body,
        Err(error) => {
            warn!(page = %page.title, error = %format!("{error:#}"), "skipping page");
            report
                .errors
                .push(format!("fetching {} ({}) failed: {error:#}", page.title, page.id));
            return None;
        }
    };

    let definition = match codec::decode(&body) {
        Ok(definition) => definition,
        Err(miss) => {
            warn!(page = %page.title, %miss, "no definition found in page body");
            report.unparseable += 1;
            String::new()
        }
    };
    Some(GlossaryRow {
        term: page.title.clone(),
        definition,
        category: entry.title.clone(),
    })
}
