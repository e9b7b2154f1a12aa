use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};

pub const GLOBAL_LABEL_PREFIX: &str = "global";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    Cloud,
    Server,
}

impl AuthMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cloud => "cloud",
            Self::Server => "server",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("cloud") {
            return Ok(Self::Cloud);
        }
        if value.eq_ignore_ascii_case("server") || value.eq_ignore_ascii_case("on-prem") {
            return Ok(Self::Server);
        }
        bail!("unsupported store mode: {value} (expected cloud|server)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRef {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDraft {
    pub title: String,
    pub parent_id: String,
    pub space_key: String,
    pub body: String,
}

impl PageDraft {
    pub fn to_payload(&self) -> Value {
        json!({
            "type": "page",
            "title": self.title,
            "ancestors": [{ "id": self.parent_id }],
            "space": { "key": self.space_key },
            "body": {
                "storage": {
                    "value": self.body,
                    "representation": "storage",
                }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    pub prefix: String,
    pub name: String,
}

impl Label {
    pub fn global(name: &str) -> Self {
        Self {
            prefix: GLOBAL_LABEL_PREFIX.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserProfile {
    #[serde(default, rename = "accountId")]
    pub account_id: Option<String>,
    #[serde(default, rename = "emailAddress")]
    pub email_address: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,
}

impl UserProfile {
    /// First identifying field the store reported, if any.
    pub fn identity(&self) -> Option<&str> {
        self.username
            .as_deref()
            .or(self.email_address.as_deref())
            .or(self.account_id.as_deref())
    }
}

/// A non-2xx answer from the content store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed with HTTP {status}: {body}")]
pub struct RemoteCallError {
    pub operation: &'static str,
    pub status: u16,
    pub body: String,
}

/// Remote wiki content store. Every call is blocking.
pub trait ContentStore {
    fn find_pages_by_title(&mut self, title: &str, space_key: &str) -> Result<Vec<PageRef>>;
    fn list_child_pages(&mut self, page_id: &str) -> Result<Vec<PageRef>>;
    fn fetch_storage_body(&mut self, page_id: &str) -> Result<String>;
    fn create_page(&mut self, draft: &PageDraft) -> Result<String>;
    fn add_labels(&mut self, page_id: &str, labels: &[Label]) -> Result<()>;
    fn current_user(&mut self) -> Result<UserProfile>;
    fn request_count(&self) -> usize;
}

/// Attaches credentials to an outgoing request.
pub trait Authenticator {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder;
    fn scheme(&self) -> &'static str;
}

pub struct BasicAuth {
    email: String,
    token: String,
}

impl BasicAuth {
    pub fn new(email: &str, token: &str) -> Self {
        Self {
            email: email.to_string(),
            token: token.to_string(),
        }
    }
}

impl Authenticator for BasicAuth {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.email, Some(&self.token))
    }

    fn scheme(&self) -> &'static str {
        "basic"
    }
}

pub struct BearerAuth {
    token: String,
}

impl BearerAuth {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

impl Authenticator for BearerAuth {
    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.token)
    }

    fn scheme(&self) -> &'static str {
        "bearer"
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub email: Option<String>,
    pub token: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            email: read("GLOSSYNC_EMAIL"),
            token: read("GLOSSYNC_TOKEN"),
        }
    }
}

/// Pick the credential strategy for a mode, failing before any network call
/// when the mode's required fields are missing.
pub fn authenticator_for(mode: AuthMode, credentials: &Credentials) -> Result<Box<dyn Authenticator>> {
    match mode {
        AuthMode::Cloud => {
            let (Some(email), Some(token)) = (&credentials.email, &credentials.token) else {
                bail!("GLOSSYNC_EMAIL and GLOSSYNC_TOKEN (API token) are required for cloud mode");
            };
            Ok(Box::new(BasicAuth::new(email, token)))
        }
        AuthMode::Server => {
            let Some(token) = &credentials.token else {
                bail!("GLOSSYNC_TOKEN (personal access token) is required for server mode");
            };
            Ok(Box::new(BearerAuth::new(token)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfluenceClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_ms: u64,
    pub max_retries: usize,
    pub max_write_retries: usize,
    pub retry_delay_ms: u64,
}

pub struct ConfluenceClient {
    client: Client,
    config: ConfluenceClientConfig,
    auth: Box<dyn Authenticator>,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl ConfluenceClient {
    pub fn new(config: ConfluenceClientConfig, auth: Box<dyn Authenticator>) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            bail!("content store base URL is empty");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build content store HTTP client")?;
        debug!(
            base_url = %config.base_url,
            scheme = auth.scheme(),
            "content store client ready"
        );

        Ok(Self {
            client,
            config,
            auth,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/rest/api/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn send<F>(&mut self, operation: &'static str, is_write: bool, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let max_retries = if is_write {
            self.config.max_write_retries
        } else {
            self.config.max_retries
        };

        for attempt in 0..=max_retries {
            self.apply_rate_limit();
            let request = self
                .auth
                .authorize(build(&self.client))
                .header("User-Agent", self.config.user_agent.clone())
                .header("Accept", "application/json");

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    if attempt < max_retries && is_retryable_status(status) {
                        warn!(operation, status = status.as_u16(), attempt, "retrying content store call");
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    let body = response.text().unwrap_or_default();
                    return Err(RemoteCallError {
                        operation,
                        status: status.as_u16(),
                        body,
                    }
                    .into());
                }
                Err(error) => {
                    if attempt < max_retries && is_retryable_error(&error) {
                        warn!(operation, attempt, %error, "retrying content store call");
                        self.wait_before_retry(attempt, is_write);
                        continue;
                    }
                    return Err(error).context(format!("failed to call content store ({operation})"));
                }
            }
        }

        bail!("{operation} exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
        self.request_count += 1;
    }

    fn wait_before_retry(&self, attempt: usize, is_write: bool) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        let multiplier = if is_write { 2u64 } else { 1u64 };
        sleep(Duration::from_millis(
            base.saturating_mul(multiplier).saturating_add(jitter),
        ));
    }
}

impl ContentStore for ConfluenceClient {
    fn find_pages_by_title(&mut self, title: &str, space_key: &str) -> Result<Vec<PageRef>> {
        let url = self.endpoint("content");
        let query = [
            ("title", title.to_string()),
            ("spaceKey", space_key.to_string()),
            ("expand", "version".to_string()),
        ];
        let response = self.send("page lookup", false, |client| client.get(&url).query(&query))?;
        let parsed: ContentListResponse = response
            .json()
            .context("failed to decode page lookup response")?;
        Ok(parsed.results.into_iter().map(ContentItem::into_page_ref).collect())
    }

    fn list_child_pages(&mut self, page_id: &str) -> Result<Vec<PageRef>> {
        let url = self.endpoint(&format!("content/{page_id}/child/page"));
        let response = self.send("child page listing", false, |client| client.get(&url))?;
        let parsed: ContentListResponse = response
            .json()
            .context("failed to decode child page listing")?;
        Ok(parsed.results.into_iter().map(ContentItem::into_page_ref).collect())
    }

    fn fetch_storage_body(&mut self, page_id: &str) -> Result<String> {
        let url = self.endpoint(&format!("content/{page_id}"));
        let response = self.send("page body fetch", false, |client| {
            client.get(&url).query(&[("expand", "body.storage")])
        })?;
        let parsed: ContentItem = response
            .json()
            .context("failed to decode page body response")?;
        parsed
            .body
            .and_then(|body| body.storage)
            .map(|storage| storage.value)
            .ok_or_else(|| anyhow::anyhow!("page {page_id} has no storage body"))
    }

    fn create_page(&mut self, draft: &PageDraft) -> Result<String> {
        let url = self.endpoint("content");
        let payload = draft.to_payload();
        let response = self.send("page creation", true, |client| client.post(&url).json(&payload))?;
        let created: CreatedContent = response
            .json()
            .context("failed to decode page creation response")?;
        Ok(created.id)
    }

    fn add_labels(&mut self, page_id: &str, labels: &[Label]) -> Result<()> {
        let url = self.endpoint(&format!("content/{page_id}/label"));
        self.send("label attach", true, |client| client.post(&url).json(labels))?;
        Ok(())
    }

    fn current_user(&mut self) -> Result<UserProfile> {
        let url = self.endpoint("user/current");
        let response = self.send("current user lookup", false, |client| client.get(&url))?;
        response
            .json()
            .context("failed to decode current user response")
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

#[derive(Debug, Deserialize, Default)]
struct ContentListResponse {
    #[serde(default)]
    results: Vec<ContentItem>,
}

#[derive(Debug, Deserialize)]
struct ContentItem {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: Option<BodyPayload>,
}

impl ContentItem {
    fn into_page_ref(self) -> PageRef {
        PageRef {
            id: self.id,
            title: self.title,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BodyPayload {
    storage: Option<StoragePayload>,
}

#[derive(Debug, Deserialize)]
struct StoragePayload {
    value: String,
}

#[derive(Debug, Deserialize)]
struct CreatedContent {
    id: String,
}
