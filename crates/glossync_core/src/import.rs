use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::category::{CategoryMapping, CategoryResolver, ResolveError, normalize_category_key};
use crate::codec;
use crate::store::{ContentStore, Label, PageDraft};
use crate::table::{GlossaryRow, read_rows};

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub space_key: String,
    pub labels: Vec<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportRowAction {
    Created,
    CreatedWithoutLabel,
    WouldCreate,
    SkippedIncomplete,
    SkippedUnmapped,
    SkippedMissingParent,
    Failed,
}

impl ImportRowAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::CreatedWithoutLabel => "created_without_label",
            Self::WouldCreate => "would_create",
            Self::SkippedIncomplete => "skipped_incomplete",
            Self::SkippedUnmapped => "skipped_unmapped",
            Self::SkippedMissingParent => "skipped_missing_parent",
            Self::Failed => "failed",
        }
    }

    fn is_skip(self) -> bool {
        matches!(
            self,
            Self::SkippedIncomplete | Self::SkippedUnmapped | Self::SkippedMissingParent
        )
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ImportRowResult {
    /// 1-based data row number; the header row is not counted.
    pub row: usize,
    pub term: String,
    pub category: String,
    pub action: ImportRowAction,
    pub page_id: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub success: bool,
    pub dry_run: bool,
    pub rows_read: usize,
    pub processed: usize,
    pub created: usize,
    pub skipped: usize,
    pub failed: usize,
    pub label_failures: usize,
    pub rows: Vec<ImportRowResult>,
    pub request_count: usize,
}

pub fn import_from_file<S>(
    store: &mut S,
    mapping: &CategoryMapping,
    path: &Path,
    options: &ImportOptions,
) -> Result<ImportReport>
where
    S: ContentStore + ?Sized,
{
    let rows = read_rows(path)?;
    info!(path = %path.display(), rows = rows.len(), "read glossary rows");
    Ok(run_import(store, mapping, &rows, options))
}

/// Create one child page per row under its category's parent page.
///
/// Row failures never abort the run; each row's outcome lands in the report.
/// Nothing is rolled back and re-running creates duplicates.
pub fn run_import<S>(
    store: &mut S,
    mapping: &CategoryMapping,
    rows: &[GlossaryRow],
    options: &ImportOptions,
) -> ImportReport
where
    S: ContentStore + ?Sized,
{
    let requests_before = store.request_count();
    let resolver = CategoryResolver::new(mapping, &options.space_key);
    let labels = options
        .labels
        .iter()
        .map(|name| Label::global(name))
        .collect::<Vec<_>>();

    let mut report = ImportReport {
        success: true,
        dry_run: options.dry_run,
        rows_read: rows.len(),
        processed: 0,
        created: 0,
        skipped: 0,
        failed: 0,
        label_failures: 0,
        rows: Vec::with_capacity(rows.len()),
        request_count: 0,
    };

    for (index, row) in rows.iter().enumerate() {
        let result = import_row(store, &resolver, &labels, index + 1, row, options);
        match result.action {
            ImportRowAction::Created | ImportRowAction::WouldCreate => report.created += 1,
            ImportRowAction::CreatedWithoutLabel => {
                report.created += 1;
                report.label_failures += 1;
            }
            ImportRowAction::Failed => report.failed += 1,
            action if action.is_skip() => report.skipped += 1,
            _ => {}
        }
        if result.action != ImportRowAction::SkippedIncomplete {
            report.processed += 1;
        }
        report.rows.push(result);
    }

    report.success = report.failed == 0;
    report.request_count = store.request_count().saturating_sub(requests_before);
    info!(
        rows = report.rows_read,
        processed = report.processed,
        created = report.created,
        skipped = report.skipped,
        failed = report.failed,
        dry_run = report.dry_run,
        "import finished"
    );
    report
}

fn import_row<S>(
    store: &mut S,
    resolver: &CategoryResolver<'_>,
    labels: &[Label],
    row_number: usize,
    row: &GlossaryRow,
    options: &ImportOptions,
) -> ImportRowResult
where
    S: ContentStore + ?Sized,
{
    let term = html_escape::encode_quoted_attribute(row.term.trim()).into_owned();
    let definition = row.definition.trim();
    let category = normalize_category_key(&row.category);
    let outcome = |action, page_id: Option<String>, detail: Option<String>| ImportRowResult {
        row: row_number,
        term: term.clone(),
        category: category.clone(),
        action,
        page_id,
        detail,
    };

    if term.is_empty() || definition.is_empty() || category.is_empty() {
        warn!(row = row_number, "skipping row with a missing term, definition or category");
        return outcome(
            ImportRowAction::SkippedIncomplete,
            None,
            Some("term, definition and category are required".to_string()),
        );
    }

    let parent = match resolver.resolve(store, &category) {
        Ok(parent) => parent,
        Err(error) => {
            warn!(row = row_number, %term, %error, "skipping row");
            let action = match error {
                ResolveError::Unmapped(_) => ImportRowAction::SkippedUnmapped,
                ResolveError::ParentMissing { .. } | ResolveError::LookupFailed { .. } => {
                    ImportRowAction::SkippedMissingParent
                }
            };
            return outcome(action, None, Some(error.to_string()));
        }
    };

    let draft = PageDraft {
        title: term.clone(),
        parent_id: parent.id.clone(),
        space_key: options.space_key.clone(),
        body: codec::encode(definition),
    };
    if options.dry_run {
        info!(row = row_number, %term, parent = %parent.title, "would create page");
        return outcome(
            ImportRowAction::WouldCreate,
            None,
            Some(format!("under {} ({})", parent.title, parent.id)),
        );
    }

    let page_id = match store.create_page(&draft) {
        Ok(page_id) => page_id,
        Err(error) => {
            warn!(row = row_number, %term, error = %format!("{error:#}"), "page creation failed");
            return outcome(ImportRowAction::Failed, None, Some(format!("{error:#}")));
        }
    };
    info!(row = row_number, %term, %page_id, parent = %parent.title, "created page");

    if labels.is_empty() {
        return outcome(ImportRowAction::Created, Some(page_id), None);
    }
    match store.add_labels(&page_id, labels) {
        Ok(()) => outcome(ImportRowAction::Created, Some(page_id), None),
        Err(error) => {
            warn!(row = row_number, %page_id, error = %format!("{error:#}"), "label attach failed");
            outcome(
                ImportRowAction::CreatedWithoutLabel,
                Some(page_id),
                Some(format!("{error:#}")),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{ImportOptions, ImportRowAction, import_from_file, run_import};
    use crate::category::{CategoryEntry, CategoryMapping};
    use crate::codec;
    use crate::store::Label;
    use crate::table::GlossaryRow;
    use crate::test_support::{MockStore, SPACE};

    fn options() -> ImportOptions {
        ImportOptions {
            space_key: SPACE.to_string(),
            labels: vec!["glossary-terms".to_string()],
            dry_run: false,
        }
    }

    #[test]
    fn creates_labelled_page_under_resolved_parent() {
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore::default().with_page("77", "General Terms", None, "");
        let rows = vec![GlossaryRow::new(
            "Assessment Roll",
            "A list of taxable property.",
            "general terms",
        )];

        let report = run_import(&mut store, &mapping, &rows, &options());

        assert!(report.success);
        assert_eq!(report.created, 1);
        assert_eq!(report.processed, 1);
        let created = store.created_pages();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].title, "Assessment Roll");
        assert_eq!(created[0].parent_id.as_deref(), Some("77"));
        assert_eq!(created[0].space_key, SPACE);
        assert_eq!(created[0].body, codec::encode("A list of taxable property."));
        assert!(created[0].body.contains("A list of taxable property."));
        assert_eq!(
            store.labels.get(&created[0].id),
            Some(&vec![Label::global("glossary-terms")])
        );
        assert_eq!(
            store.calls,
            vec![
                "find:General Terms".to_string(),
                "create:Assessment Roll".to_string(),
                format!("label:{}", created[0].id),
            ]
        );
        assert_eq!(report.request_count, 3);
    }

    #[test]
    fn multi_line_definition_decodes_back_from_created_body() {
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore::default().with_page("77", "General Terms", None, "");
        let definition = "A list of taxable property.\nUpdated annually.";
        let rows = vec![GlossaryRow::new("Assessment Roll", definition, "General Terms")];

        let report = run_import(&mut store, &mapping, &rows, &options());

        assert_eq!(report.rows[0].action, ImportRowAction::Created);
        let created = store.created_pages();
        assert_eq!(created[0].title, "Assessment Roll");
        assert!(
            created[0]
                .body
                .contains("A list of taxable property.<br />Updated annually.")
        );
        assert_eq!(codec::decode(&created[0].body).expect("decode"), definition);
    }

    #[test]
    fn unmapped_row_after_valid_row_adds_no_store_calls() {
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore::default().with_page("77", "General Terms", None, "");
        let valid = vec![GlossaryRow::new("Assessment Roll", "A list", "General Terms")];
        run_import(&mut store, &mapping, &valid, &options());
        let calls_after_valid = store.calls.clone();
        assert_eq!(calls_after_valid.len(), 3);

        let mut store = MockStore::default().with_page("77", "General Terms", None, "");
        let rows = vec![
            GlossaryRow::new("Assessment Roll", "A list", "General Terms"),
            GlossaryRow::new("Foo", "Bar", "Unknown Bucket"),
        ];
        let report = run_import(&mut store, &mapping, &rows, &options());

        assert_eq!(report.rows[1].action, ImportRowAction::SkippedUnmapped);
        assert_eq!(store.calls, calls_after_valid);
        assert_eq!(report.request_count, 3);
        assert_eq!(store.created_pages().len(), 1);
    }

    #[test]
    fn configured_category_with_ampersand_resolves_unescaped() {
        let mapping = CategoryMapping::new(vec![CategoryEntry {
            key: String::new(),
            title: "Tax & Fees".to_string(),
        }])
        .expect("mapping");
        let mut store = MockStore::default().with_page("40", "Tax & Fees", None, "");
        let rows = vec![GlossaryRow::new("Levy & Charge", "A charge", "Tax & Fees")];

        let report = run_import(&mut store, &mapping, &rows, &options());

        assert_eq!(report.rows[0].action, ImportRowAction::Created);
        assert_eq!(report.rows[0].category, "tax & fees");
        assert_eq!(store.calls[0], "find:Tax & Fees");
        let created = store.created_pages();
        assert_eq!(created[0].parent_id.as_deref(), Some("40"));
        assert_eq!(created[0].title, "Levy &amp; Charge");
    }

    #[test]
    fn unmapped_category_is_skipped_without_store_calls() {
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore::default();
        let rows = vec![GlossaryRow::new("Foo", "Bar", "Unknown Bucket")];

        let report = run_import(&mut store, &mapping, &rows, &options());

        assert!(report.success);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.processed, 1);
        assert_eq!(report.rows[0].action, ImportRowAction::SkippedUnmapped);
        assert!(store.calls.is_empty());
        assert_eq!(report.request_count, 0);
    }

    #[test]
    fn incomplete_rows_are_not_processed() {
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore::default().with_page("1", "General Terms", None, "");
        let rows = vec![
            GlossaryRow::new("  ", "definition", "general terms"),
            GlossaryRow::new("Term", "   ", "general terms"),
            GlossaryRow::new("Term", "definition", ""),
            GlossaryRow::new("Kept", "definition", "General Terms"),
        ];

        let report = run_import(&mut store, &mapping, &rows, &options());

        assert_eq!(report.rows_read, 4);
        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.created, 1);
        assert_eq!(report.rows[0].row, 1);
        assert_eq!(report.rows[3].row, 4);
        assert!(
            report.rows[..3]
                .iter()
                .all(|row| row.action == ImportRowAction::SkippedIncomplete)
        );
    }

    #[test]
    fn missing_parent_and_lookup_failure_skip_the_row() {
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore::default();
        let rows = vec![GlossaryRow::new("Levy", "A charge", "enterprise tools")];

        let report = run_import(&mut store, &mapping, &rows, &options());
        assert_eq!(report.rows[0].action, ImportRowAction::SkippedMissingParent);
        assert!(report.success);

        let mut failing = MockStore {
            fail_lookups: true,
            ..MockStore::default()
        };
        let report = run_import(&mut failing, &mapping, &rows, &options());
        assert_eq!(report.rows[0].action, ImportRowAction::SkippedMissingParent);
        assert!(
            report.rows[0]
                .detail
                .as_deref()
                .is_some_and(|detail| detail.contains("HTTP 500"))
        );
        assert!(failing.created_pages().is_empty());
    }

    #[test]
    fn create_failure_is_recorded_and_run_continues() {
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore::default().with_page("5", "Enterprise Tools", None, "");
        store.fail_create_titles.insert("Duplicate".to_string());
        let rows = vec![
            GlossaryRow::new("Duplicate", "first", "Enterprise Tools"),
            GlossaryRow::new("Fresh", "second", "Enterprise Tools"),
        ];

        let report = run_import(&mut store, &mapping, &rows, &options());

        assert!(!report.success);
        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 1);
        assert_eq!(report.rows[0].action, ImportRowAction::Failed);
        let detail = report.rows[0].detail.as_deref().expect("detail");
        assert!(detail.contains("HTTP 400"));
        assert!(detail.contains("already exists"));
        assert_eq!(report.rows[1].action, ImportRowAction::Created);
    }

    #[test]
    fn label_failure_keeps_created_page() {
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore {
            fail_labels: true,
            ..MockStore::default()
        }
        .with_page("5", "Common Rolltypes", None, "");
        let rows = vec![GlossaryRow::new("Supplemental", "Late roll", "common rolltypes")];

        let report = run_import(&mut store, &mapping, &rows, &options());

        assert!(report.success);
        assert_eq!(report.created, 1);
        assert_eq!(report.label_failures, 1);
        assert_eq!(report.rows[0].action, ImportRowAction::CreatedWithoutLabel);
        assert!(report.rows[0].page_id.is_some());
        assert_eq!(store.created_pages().len(), 1);
    }

    #[test]
    fn dry_run_resolves_but_never_creates() {
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore::default().with_page("9", "General Terms", None, "");
        let rows = vec![GlossaryRow::new("Mill Rate", "Tax per 1000", "General Terms")];
        let options = ImportOptions {
            dry_run: true,
            ..options()
        };

        let report = run_import(&mut store, &mapping, &rows, &options);

        assert!(report.dry_run);
        assert_eq!(report.rows[0].action, ImportRowAction::WouldCreate);
        assert_eq!(store.calls, vec!["find:General Terms".to_string()]);
        assert!(store.created_pages().is_empty());
    }

    #[test]
    fn term_is_escaped_and_definition_newlines_become_breaks() {
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore::default().with_page("2", "General Terms", None, "");
        let rows = vec![GlossaryRow::new(
            "R&D <Credit>",
            "Line one\nLine two",
            "general terms",
        )];

        run_import(&mut store, &mapping, &rows, &options());

        let created = store.created_pages();
        assert_eq!(created[0].title, "R&amp;D &lt;Credit&gt;");
        assert!(created[0].body.contains("Line one<br />Line two"));
    }

    #[test]
    fn empty_label_list_skips_label_call() {
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore::default().with_page("2", "General Terms", None, "");
        let rows = vec![GlossaryRow::new("Term", "Def", "general terms")];
        let options = ImportOptions {
            labels: Vec::new(),
            ..options()
        };

        let report = run_import(&mut store, &mapping, &rows, &options);

        assert_eq!(report.rows[0].action, ImportRowAction::Created);
        assert!(store.calls.iter().all(|call| !call.starts_with("label:")));
    }

    #[test]
    fn import_from_file_reads_rows_and_runs_pipeline() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("glossary.csv");
        fs::write(
            &path,
            "\u{feff}Term,Definition,Category\nAssessment Roll,A list,General Terms\nFoo,Bar,Unknown Bucket\n",
        )
        .expect("write csv");
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore::default().with_page("1", "General Terms", None, "");

        let report = import_from_file(&mut store, &mapping, &path, &options()).expect("import");

        assert_eq!(report.rows_read, 2);
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn import_from_file_fails_on_bad_header() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("glossary.csv");
        fs::write(&path, "Name,Text\nA,B\n").expect("write csv");
        let mapping = CategoryMapping::builtin();
        let mut store = MockStore::default();

        let error =
            import_from_file(&mut store, &mapping, &path, &options()).expect_err("must fail");
        assert!(format!("{error:#}").contains("header row must contain"));
        assert!(store.calls.is_empty());
    }
}
