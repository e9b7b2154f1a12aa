use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::category::{CategoryEntry, CategoryMapping};
use crate::store::{AuthMode, ConfluenceClientConfig};

pub const DEFAULT_CONFIG_PATH: &str = ".glossync/config.toml";
pub const DEFAULT_USER_AGENT: &str = "glossync/0.1";
pub const DEFAULT_LABEL: &str = "glossary-terms";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_RETRIES: usize = 2;
pub const DEFAULT_MAX_WRITE_RETRIES: usize = 0;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;
pub const DEFAULT_RATE_LIMIT_MS: u64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLocation {
    pub path: PathBuf,
    pub source: ValueSource,
}

/// Config path precedence: flag > GLOSSYNC_CONFIG > `<cwd>/.glossync/config.toml`.
pub fn locate_config(flag: Option<&Path>, cwd: &Path) -> ConfigLocation {
    locate_config_with_lookup(flag, cwd, |key| env::var(key).ok())
}

pub fn locate_config_with_lookup<F>(flag: Option<&Path>, cwd: &Path, lookup: F) -> ConfigLocation
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = flag {
        return ConfigLocation {
            path: absolutize(path, cwd),
            source: ValueSource::Flag,
        };
    }
    if let Some(value) = lookup("GLOSSYNC_CONFIG")
        && !value.trim().is_empty()
    {
        return ConfigLocation {
            path: absolutize(Path::new(value.trim()), cwd),
            source: ValueSource::Env,
        };
    }
    ConfigLocation {
        path: cwd.join(DEFAULT_CONFIG_PATH),
        source: ValueSource::Default,
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct GlossyncConfig {
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub glossary: GlossarySection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct StoreSection {
    pub mode: Option<AuthMode>,
    pub cloud_url: Option<String>,
    pub server_url: Option<String>,
    pub space_key: Option<String>,
    pub user_agent: Option<String>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub max_write_retries: Option<usize>,
    pub retry_delay_ms: Option<u64>,
    pub rate_limit_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct GlossarySection {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub categories: Vec<CategoryEntry>,
}

/// Everything a pipeline run needs, with env overrides applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSettings {
    pub mode: AuthMode,
    pub space_key: String,
    pub labels: Vec<String>,
    pub mapping: CategoryMapping,
    pub client: ConfluenceClientConfig,
}

impl GlossyncConfig {
    pub fn category_mapping(&self) -> Result<CategoryMapping> {
        if self.glossary.categories.is_empty() {
            return Ok(CategoryMapping::builtin());
        }
        CategoryMapping::new(self.glossary.categories.clone())
    }

    pub fn labels(&self) -> Vec<String> {
        let labels = self
            .glossary
            .labels
            .iter()
            .map(|label| label.trim().to_string())
            .filter(|label| !label.is_empty())
            .collect::<Vec<_>>();
        if labels.is_empty() {
            vec![DEFAULT_LABEL.to_string()]
        } else {
            labels
        }
    }

    pub fn resolve(&self, mode_override: Option<AuthMode>) -> Result<ResolvedSettings> {
        self.resolve_with_lookup(mode_override, |key| env::var(key).ok())
    }

    /// Resolve settings: flag > env > config file > default.
    pub fn resolve_with_lookup<F>(
        &self,
        mode_override: Option<AuthMode>,
        lookup: F,
    ) -> Result<ResolvedSettings>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let read_number = |key: &str| -> Result<Option<u64>> {
            match read(key) {
                Some(value) => value
                    .parse::<u64>()
                    .map(Some)
                    .with_context(|| format!("{key} must be a non-negative integer")),
                None => Ok(None),
            }
        };
        let store = &self.store;

        let mode = match mode_override {
            Some(mode) => mode,
            None => match read("GLOSSYNC_MODE") {
                Some(value) => AuthMode::parse(&value)?,
                None => store.mode.unwrap_or(AuthMode::Cloud),
            },
        };

        let base_url = match mode {
            AuthMode::Cloud => read("GLOSSYNC_CLOUD_URL").or_else(|| store.cloud_url.clone()),
            AuthMode::Server => read("GLOSSYNC_SERVER_URL").or_else(|| store.server_url.clone()),
        };
        let Some(base_url) = base_url.filter(|value| !value.trim().is_empty()) else {
            let (env_key, config_key) = match mode {
                AuthMode::Cloud => ("GLOSSYNC_CLOUD_URL", "cloud_url"),
                AuthMode::Server => ("GLOSSYNC_SERVER_URL", "server_url"),
            };
            bail!(
                "no base URL configured for {} mode (set {env_key} or [store].{config_key})",
                mode.as_str()
            );
        };

        let Some(space_key) = read("GLOSSYNC_SPACE_KEY")
            .or_else(|| store.space_key.clone())
            .filter(|value| !value.trim().is_empty())
        else {
            bail!("no space key configured (set GLOSSYNC_SPACE_KEY or [store].space_key)");
        };

        let max_retries = match read_number("GLOSSYNC_HTTP_RETRIES")? {
            Some(value) => usize::try_from(value).context("GLOSSYNC_HTTP_RETRIES is too large")?,
            None => store.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        };

        Ok(ResolvedSettings {
            mode,
            space_key: space_key.trim().to_string(),
            labels: self.labels(),
            mapping: self.category_mapping()?,
            client: ConfluenceClientConfig {
                base_url: base_url.trim().trim_end_matches('/').to_string(),
                user_agent: store
                    .user_agent
                    .clone()
                    .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
                timeout_ms: read_number("GLOSSYNC_HTTP_TIMEOUT_MS")?
                    .or(store.timeout_ms)
                    .unwrap_or(DEFAULT_TIMEOUT_MS),
                rate_limit_ms: store.rate_limit_ms.unwrap_or(DEFAULT_RATE_LIMIT_MS),
                max_retries,
                max_write_retries: store
                    .max_write_retries
                    .unwrap_or(DEFAULT_MAX_WRITE_RETRIES),
                retry_delay_ms: store.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
            },
        })
    }
}

/// Load and parse a config file. Returns default if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<GlossyncConfig> {
    if !config_path.exists() {
        return Ok(GlossyncConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: GlossyncConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Starter config listing the built-in categories.
pub fn render_default_config() -> String {
    let mut output = String::new();
    output.push_str("[store]\n");
    output.push_str("# cloud: email + API token (basic auth); server: personal access token (bearer)\n");
    output.push_str("mode = \"cloud\"\n");
    output.push_str("cloud_url = \"https://your-site.atlassian.net/wiki\"\n");
    output.push_str("server_url = \"https://confluence.example.org\"\n");
    output.push_str("space_key = \"GLOSSARY\"\n");
    output.push_str(&format!("timeout_ms = {DEFAULT_TIMEOUT_MS}\n"));
    output.push_str(&format!("max_retries = {DEFAULT_MAX_RETRIES}\n"));
    output.push_str(&format!("max_write_retries = {DEFAULT_MAX_WRITE_RETRIES}\n"));
    output.push_str("\n[glossary]\n");
    output.push_str(&format!("labels = [\"{DEFAULT_LABEL}\"]\n"));
    for entry in CategoryMapping::builtin().entries() {
        output.push_str("\n[[glossary.categories]]\n");
        output.push_str(&format!("key = \"{}\"\n", entry.key));
        output.push_str(&format!("title = \"{}\"\n", entry.title));
    }
    output
}

/// Write the starter config. Returns `true` when a write occurred.
pub fn write_default_config(config_path: &Path, force: bool) -> Result<bool> {
    if config_path.exists() && !force {
        return Ok(false);
    }
    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    fs::write(config_path, render_default_config())
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
