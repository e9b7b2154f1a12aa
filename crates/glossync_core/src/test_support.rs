use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, anyhow};

use crate::store::{ContentStore, Label, PageDraft, PageRef, RemoteCallError, UserProfile};

pub const SPACE: &str = "GLOSS";

#[derive(Debug, Clone)]
pub struct MockPage {
    pub id: String,
    pub title: String,
    pub parent_id: Option<String>,
    pub space_key: String,
    pub body: String,
}

#[derive(Default)]
pub struct MockStore {
    pub pages: Vec<MockPage>,
    pub next_id: u64,
    pub calls: Vec<String>,
    pub labels: BTreeMap<String, Vec<Label>>,
    pub fail_lookups: bool,
    pub fail_create_titles: BTreeSet<String>,
    pub fail_labels: bool,
    pub fail_list_ids: BTreeSet<String>,
    pub fail_fetch_ids: BTreeSet<String>,
    pub user: Option<UserProfile>,
    pub request_count: usize,
}

impl MockStore {
    pub fn with_page(mut self, id: &str, title: &str, parent_id: Option<&str>, body: &str) -> Self {
        self.pages.push(MockPage {
            id: id.to_string(),
            title: title.to_string(),
            parent_id: parent_id.map(ToString::to_string),
            space_key: SPACE.to_string(),
            body: body.to_string(),
        });
        self
    }

    pub fn created_pages(&self) -> Vec<&MockPage> {
        self.pages
            .iter()
            .filter(|page| page.id.starts_with("new-"))
            .collect()
    }

    fn record(&mut self, call: String) {
        self.request_count += 1;
        self.calls.push(call);
    }
}

fn server_error(operation: &'static str) -> anyhow::Error {
    RemoteCallError {
        operation,
        status: 500,
        body: "internal error".to_string(),
    }
    .into()
}

impl ContentStore for MockStore {
    fn find_pages_by_title(&mut self, title: &str, space_key: &str) -> Result<Vec<PageRef>> {
        self.record(format!("find:{title}"));
        if self.fail_lookups {
            return Err(server_error("page lookup"));
        }
        Ok(self
            .pages
            .iter()
            .filter(|page| page.title == title && page.space_key == space_key)
            .map(|page| PageRef {
                id: page.id.clone(),
                title: page.title.clone(),
            })
            .collect())
    }

    fn list_child_pages(&mut self, page_id: &str) -> Result<Vec<PageRef>> {
        self.record(format!("list:{page_id}"));
        if self.fail_list_ids.contains(page_id) {
            return Err(server_error("child page listing"));
        }
        Ok(self
            .pages
            .iter()
            .filter(|page| page.parent_id.as_deref() == Some(page_id))
            .map(|page| PageRef {
                id: page.id.clone(),
                title: page.title.clone(),
            })
            .collect())
    }

    fn fetch_storage_body(&mut self, page_id: &str) -> Result<String> {
        self.record(format!("fetch:{page_id}"));
        if self.fail_fetch_ids.contains(page_id) {
            return Err(server_error("page body fetch"));
        }
        self.pages
            .iter()
            .find(|page| page.id == page_id)
            .map(|page| page.body.clone())
            .ok_or_else(|| anyhow!("page {page_id} not found"))
    }

    fn create_page(&mut self, draft: &PageDraft) -> Result<String> {
        self.record(format!("create:{}", draft.title));
        if self.fail_create_titles.contains(&draft.title) {
            return Err(RemoteCallError {
                operation: "page creation",
                status: 400,
                body: "A page with this title already exists".to_string(),
            }
            .into());
        }
        self.next_id += 1;
        let id = format!("new-{}", self.next_id);
        self.pages.push(MockPage {
            id: id.clone(),
            title: draft.title.clone(),
            parent_id: Some(draft.parent_id.clone()),
            space_key: draft.space_key.clone(),
            body: draft.body.clone(),
        });
        Ok(id)
    }

    fn add_labels(&mut self, page_id: &str, labels: &[Label]) -> Result<()> {
        self.record(format!("label:{page_id}"));
        if self.fail_labels {
            return Err(server_error("label attach"));
        }
        self.labels
            .entry(page_id.to_string())
            .or_default()
            .extend(labels.iter().cloned());
        Ok(())
    }

    fn current_user(&mut self) -> Result<UserProfile> {
        self.record("user".to_string());
        self.user.clone().ok_or_else(|| {
            RemoteCallError {
                operation: "current user lookup",
                status: 401,
                body: "Unauthorized".to_string(),
            }
            .into()
        })
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}
