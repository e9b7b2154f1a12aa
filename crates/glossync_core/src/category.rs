use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::store::ContentStore;

const BUILTIN_CATEGORIES: &[(&str, &str)] = &[
    ("enterprise assessment", "Enterprise Assessment"),
    ("enterprise property tax", "Enterprise Property Tax"),
    ("enterprise tools", "Enterprise Tools"),
    ("common rolltypes", "Common Rolltypes"),
    ("general terms", "General Terms"),
];

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CategoryEntry {
    /// Lookup key; defaults to the lowercased title when omitted.
    #[serde(default)]
    pub key: String,
    /// Title of the parent page that holds this category's terms.
    pub title: String,
}

/// Ordered, immutable category key to parent-page title table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryMapping {
    entries: Vec<CategoryEntry>,
}

impl CategoryMapping {
    pub fn new(entries: Vec<CategoryEntry>) -> Result<Self> {
        let mut normalized: Vec<CategoryEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            let title = entry.title.trim().to_string();
            if title.is_empty() {
                bail!("category title cannot be empty");
            }
            let key = if entry.key.trim().is_empty() {
                normalize_category_key(&title)
            } else {
                normalize_category_key(&entry.key)
            };
            if normalized.iter().any(|existing| existing.key == key) {
                bail!("duplicate category key: {key}");
            }
            normalized.push(CategoryEntry { key, title });
        }
        Ok(Self {
            entries: normalized,
        })
    }

    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN_CATEGORIES
                .iter()
                .map(|(key, title)| CategoryEntry {
                    key: (*key).to_string(),
                    title: (*title).to_string(),
                })
                .collect(),
        }
    }

    pub fn get(&self, category: &str) -> Option<&CategoryEntry> {
        let key = normalize_category_key(category);
        self.entries.iter().find(|entry| entry.key == key)
    }

    pub fn entries(&self) -> &[CategoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn normalize_category_key(value: &str) -> String {
    value.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParentPage {
    pub key: String,
    pub title: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("category '{0}' is not mapped")]
    Unmapped(String),
    #[error("parent page '{title}' not found in space '{space_key}'")]
    ParentMissing { title: String, space_key: String },
    #[error("lookup of parent page '{title}' failed: {detail}")]
    LookupFailed { title: String, detail: String },
}

/// Turns category keys into parent page ids. Every call queries the store.
pub struct CategoryResolver<'a> {
    mapping: &'a CategoryMapping,
    space_key: &'a str,
}

impl<'a> CategoryResolver<'a> {
    pub fn new(mapping: &'a CategoryMapping, space_key: &'a str) -> Self {
        Self { mapping, space_key }
    }

    pub fn resolve<S>(&self, store: &mut S, category: &str) -> Result<ParentPage, ResolveError>
    where
        S: ContentStore + ?Sized,
    {
        let entry = self
            .mapping
            .get(category)
            .ok_or_else(|| ResolveError::Unmapped(category.trim().to_string()))?;
        self.resolve_entry(store, entry)
    }

    pub fn resolve_entry<S>(
        &self,
        store: &mut S,
        entry: &CategoryEntry,
    ) -> Result<ParentPage, ResolveError>
    where
        S: ContentStore + ?Sized,
    {
        let matches = store
            .find_pages_by_title(&entry.title, self.space_key)
            .map_err(|error| ResolveError::LookupFailed {
                title: entry.title.clone(),
                detail: format!("{error:#}"),
            })?;
        let Some(first) = matches.into_iter().next() else {
            return Err(ResolveError::ParentMissing {
                title: entry.title.clone(),
                space_key: self.space_key.to_string(),
            });
        };
        debug!(category = %entry.key, parent_id = %first.id, "resolved parent page");
        Ok(ParentPage {
            key: entry.key.clone(),
            title: entry.title.clone(),
            id: first.id,
        })
    }
}
