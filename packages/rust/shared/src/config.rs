//! Application configuration for NoticeHarvest.
//!
//! User config lives at `~/.noticeharvest/noticeharvest.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{NoticeHarvestError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "noticeharvest.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".noticeharvest";

// ---------------------------------------------------------------------------
// Config structs (matching noticeharvest.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Target website endpoints.
    #[serde(default)]
    pub site: SiteConfig,

    /// Crawl pacing and termination settings.
    #[serde(default)]
    pub crawl: CrawlSettings,

    /// Headless browser rendering settings.
    #[serde(default)]
    pub render: RenderConfig,

    /// Summarization and embedding service settings.
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// Vector index settings.
    #[serde(default)]
    pub pinecone: PineconeConfig,

    /// Chunking and batch settings for the indexer.
    #[serde(default)]
    pub index: IndexConfig,

    /// System-of-record location.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Notice-board categories to crawl.
    #[serde(default = "default_categories")]
    pub categories: Vec<CategoryConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            crawl: CrawlSettings::default(),
            render: RenderConfig::default(),
            openai: OpenAiConfig::default(),
            pinecone: PineconeConfig::default(),
            index: IndexConfig::default(),
            database: DatabaseConfig::default(),
            categories: default_categories(),
        }
    }
}

/// `[site]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Scheme + host of the notice-board site.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path of the paginated listing endpoint.
    #[serde(default = "default_list_path")]
    pub list_path: String,

    /// Path of the detail endpoint.
    #[serde(default = "default_view_path")]
    pub view_path: String,

    /// User-Agent sent with every plain HTTP request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// TCP connect timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-response timeout.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            list_path: default_list_path(),
            view_path: default_view_path(),
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl SiteConfig {
    /// Absolute URL of the listing endpoint.
    pub fn list_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.list_path)
    }

    /// Absolute URL of the detail endpoint.
    pub fn view_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.view_path)
    }

    /// Canonical link for a post; deterministic in `list_id` and `seq`.
    pub fn detail_link(&self, list_id: &str, seq: u64) -> String {
        format!("{}?list_id={list_id}&seq={seq}", self.view_url())
    }
}

fn default_base_url() -> String {
    "https://www.uos.ac.kr".into()
}
fn default_list_path() -> String {
    "/korNotice/list.do".into()
}
fn default_view_path() -> String {
    "/korNotice/view.do".into()
}
fn default_user_agent() -> String {
    "Mozilla/5.0".into()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    20
}

/// Which content acquisition strategy a deployment uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Extracted text + sliced full-page screenshot, merged by one summarize call.
    #[default]
    TextScreenshot,
    /// Full-page PDF rendering summarized directly.
    Document,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TextScreenshot => "text-screenshot",
            Self::Document => "document",
        }
    }
}

impl FromStr for StrategyKind {
    type Err = NoticeHarvestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "text-screenshot" => Ok(Self::TextScreenshot),
            "document" => Ok(Self::Document),
            other => Err(NoticeHarvestError::validation(format!(
                "unknown strategy '{other}' (expected text-screenshot or document)"
            ))),
        }
    }
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Acquisition strategy for this deployment.
    #[serde(default)]
    pub strategy: StrategyKind,

    /// Pause between successive posts.
    #[serde(default = "default_request_sleep")]
    pub request_sleep_ms: u64,

    /// Consecutive NOT_FOUND outcomes that end a sequential scan.
    #[serde(default = "default_missing_break")]
    pub missing_break: u32,

    /// How many recent candidates bounded discovery collects.
    #[serde(default = "default_recent_window")]
    pub recent_window: usize,

    /// Listing page budget per category.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Pause between listing pages.
    #[serde(default = "default_page_sleep")]
    pub page_sleep_ms: u64,

    /// Character cap on extracted main text.
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            request_sleep_ms: default_request_sleep(),
            missing_break: default_missing_break(),
            recent_window: default_recent_window(),
            max_pages: default_max_pages(),
            page_sleep_ms: default_page_sleep(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

fn default_request_sleep() -> u64 {
    1000
}
fn default_missing_break() -> u32 {
    3
}
fn default_recent_window() -> usize {
    100
}
fn default_max_pages() -> u32 {
    10
}
fn default_page_sleep() -> u64 {
    200
}
fn default_max_content_chars() -> usize {
    12_000
}

/// `[render]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Navigation / wait timeout.
    #[serde(default = "default_render_timeout")]
    pub timeout_ms: u64,

    /// Browser viewport width.
    #[serde(default = "default_viewport_width")]
    pub viewport_width: u32,

    /// Viewport height and the height of each screenshot slice.
    #[serde(default = "default_slice_height")]
    pub slice_height: u32,

    /// Scroll-to-bottom steps used to trigger lazy content.
    #[serde(default = "default_scroll_steps")]
    pub scroll_steps: u32,

    /// Pause after each scroll step.
    #[serde(default = "default_scroll_pause")]
    pub scroll_pause_ms: u64,

    /// Final settle delay before capture.
    #[serde(default = "default_settle")]
    pub settle_ms: u64,

    /// Element that marks the post body as loaded (best-effort wait).
    #[serde(default = "default_content_selector")]
    pub content_selector: String,

    /// Budget for each best-effort wait (content marker, network quiet).
    /// Capped at a quarter of `timeout_ms`.
    #[serde(default = "default_marker_timeout")]
    pub marker_timeout_ms: u64,

    /// How long the resource count must hold still to count as network idle.
    #[serde(default = "default_network_idle")]
    pub network_idle_ms: u64,

    /// When set, full-page screenshots are also written here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug_dir: Option<String>,

    /// Explicit Chrome/Chromium binary; autodetected when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chrome_executable: Option<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_render_timeout(),
            viewport_width: default_viewport_width(),
            slice_height: default_slice_height(),
            scroll_steps: default_scroll_steps(),
            scroll_pause_ms: default_scroll_pause(),
            settle_ms: default_settle(),
            content_selector: default_content_selector(),
            marker_timeout_ms: default_marker_timeout(),
            network_idle_ms: default_network_idle(),
            debug_dir: None,
            chrome_executable: None,
        }
    }
}

fn default_render_timeout() -> u64 {
    90_000
}
fn default_viewport_width() -> u32 {
    1200
}
fn default_slice_height() -> u32 {
    1800
}
fn default_scroll_steps() -> u32 {
    6
}
fn default_scroll_pause() -> u64 {
    700
}
fn default_settle() -> u64 {
    800
}
fn default_content_selector() -> String {
    "div.vw-tibx".into()
}
fn default_marker_timeout() -> u64 {
    10_000
}
fn default_network_idle() -> u64 {
    500
}

/// `[openai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_openai_key_env")]
    pub api_key_env: String,

    /// API base URL (OpenAI-compatible).
    #[serde(default = "default_openai_base")]
    pub base_url: String,

    /// Model used for summaries.
    #[serde(default = "default_summarize_model")]
    pub summarize_model: String,

    /// Model used for rendered-document summaries.
    #[serde(default = "default_document_model")]
    pub document_model: String,

    /// Model used for embeddings.
    #[serde(default = "default_embed_model")]
    pub embed_model: String,

    /// Output dimension of `embed_model`.
    #[serde(default = "default_embed_dimension")]
    pub embed_dimension: usize,

    /// Sampling temperature for summaries.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout.
    #[serde(default = "default_openai_timeout")]
    pub timeout_secs: u64,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_openai_key_env(),
            base_url: default_openai_base(),
            summarize_model: default_summarize_model(),
            document_model: default_document_model(),
            embed_model: default_embed_model(),
            embed_dimension: default_embed_dimension(),
            temperature: default_temperature(),
            timeout_secs: default_openai_timeout(),
        }
    }
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_openai_base() -> String {
    "https://api.openai.com/v1".into()
}
fn default_summarize_model() -> String {
    "gpt-4o".into()
}
fn default_document_model() -> String {
    "gpt-4o-mini".into()
}
fn default_embed_model() -> String {
    "text-embedding-3-small".into()
}
fn default_embed_dimension() -> usize {
    1536
}
fn default_temperature() -> f32 {
    0.2
}
fn default_openai_timeout() -> u64 {
    180
}

/// `[pinecone]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PineconeConfig {
    /// Name of the env var holding the API key.
    #[serde(default = "default_pinecone_key_env")]
    pub api_key_env: String,

    /// Control-plane base URL.
    #[serde(default = "default_pinecone_control")]
    pub control_url: String,

    /// Index name.
    #[serde(default = "default_index_name")]
    pub index_name: String,

    /// Namespace; empty means the default namespace.
    #[serde(default)]
    pub namespace: String,

    /// Serverless cloud, required only when the index must be created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud: Option<String>,

    /// Serverless region, required only when the index must be created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Similarity metric used on creation.
    #[serde(default = "default_metric")]
    pub metric: String,
}

impl Default for PineconeConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_pinecone_key_env(),
            control_url: default_pinecone_control(),
            index_name: default_index_name(),
            namespace: String::new(),
            cloud: None,
            region: None,
            metric: default_metric(),
        }
    }
}

impl PineconeConfig {
    /// The configured namespace, or `None` for the default namespace.
    pub fn namespace(&self) -> Option<&str> {
        let ns = self.namespace.trim();
        if ns.is_empty() { None } else { Some(ns) }
    }
}

fn default_pinecone_key_env() -> String {
    "PINECONE_API_KEY".into()
}
fn default_pinecone_control() -> String {
    "https://api.pinecone.io".into()
}
fn default_index_name() -> String {
    "uos-notices".into()
}
fn default_metric() -> String {
    "cosine".into()
}

/// `[index]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Maximum chunk length in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between neighbouring chunks.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Summary length cap applied before chunking.
    #[serde(default = "default_max_doc_len")]
    pub max_doc_len: usize,

    /// Chunks per upsert batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches.
    #[serde(default = "default_batch_sleep")]
    pub batch_sleep_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_doc_len: default_max_doc_len(),
            batch_size: default_batch_size(),
            batch_sleep_ms: default_batch_sleep(),
        }
    }
}

fn default_chunk_size() -> usize {
    900
}
fn default_chunk_overlap() -> usize {
    150
}
fn default_max_doc_len() -> usize {
    12_000
}
fn default_batch_size() -> usize {
    200
}
fn default_batch_sleep() -> u64 {
    800
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// libSQL database file; `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    /// The database path with a leading `~` expanded.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        expand_home(&self.path)
    }
}

fn default_db_path() -> String {
    "~/.noticeharvest/notices.db".into()
}

/// `[[categories]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryConfig {
    /// Category name used as the first key component.
    pub name: String,
    /// Site list identifier for this board.
    pub list_id: String,
    /// Extra query parameters for listing requests.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_params: BTreeMap<String, String>,
    /// First seq for sequential scanning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_seq: Option<u64>,
}

impl CategoryConfig {
    pub fn new(name: &str, list_id: &str) -> Self {
        Self {
            name: name.into(),
            list_id: list_id.into(),
            extra_params: BTreeMap::new(),
            start_seq: None,
        }
    }

    /// A category is usable only with a real list identifier.
    pub fn is_configured(&self) -> bool {
        let id = self.list_id.trim();
        !id.is_empty() && !id.to_ascii_lowercase().contains("todo")
    }
}

fn default_categories() -> Vec<CategoryConfig> {
    let mut engineering = CategoryConfig::new("COLLEGE_ENGINEERING", "20013DA1");
    engineering
        .extra_params
        .insert("cate_id2".into(), "000010383".into());
    engineering.start_seq = Some(15410);

    vec![
        engineering,
        CategoryConfig::new("COLLEGE_HUMANITIES", "human01"),
        CategoryConfig::new("COLLEGE_SOCIAL_SCIENCES", "econo01"),
        CategoryConfig::new("COLLEGE_URBAN_SCIENCE", "urbansciences01"),
        CategoryConfig::new("COLLEGE_ARTS_SPORTS", "artandsport01"),
        CategoryConfig::new("COLLEGE_BUSINESS", "20008N2"),
        CategoryConfig::new("COLLEGE_NATURAL_SCIENCES", "scien01"),
        CategoryConfig::new("COLLEGE_LIBERAL_CONVERGENCE", "clacds01"),
        CategoryConfig::new("GENERAL", "FA1"),
        CategoryConfig::new("ACADEMIC", "FA2"),
    ]
}

impl AppConfig {
    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.index.chunk_size == 0 {
            return Err(NoticeHarvestError::validation("index.chunk_size must be > 0"));
        }
        if self.index.chunk_overlap >= self.index.chunk_size {
            return Err(NoticeHarvestError::validation(format!(
                "index.chunk_overlap ({}) must be smaller than index.chunk_size ({})",
                self.index.chunk_overlap, self.index.chunk_size
            )));
        }
        if self.index.batch_size == 0 {
            return Err(NoticeHarvestError::validation("index.batch_size must be > 0"));
        }
        if self.render.slice_height == 0 {
            return Err(NoticeHarvestError::validation("render.slice_height must be > 0"));
        }
        if self.crawl.missing_break == 0 {
            return Err(NoticeHarvestError::validation("crawl.missing_break must be > 0"));
        }
        Ok(())
    }

    /// Look up a category by name.
    pub fn category(&self, name: &str) -> Option<&CategoryConfig> {
        self.categories.iter().find(|c| c.name == name)
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.noticeharvest/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| NoticeHarvestError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.noticeharvest/noticeharvest.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| NoticeHarvestError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        NoticeHarvestError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Write a default config file at `path` (or the default location).
/// Returns the path to the created file.
pub fn init_config(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_file_path()?,
    };
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| NoticeHarvestError::io(dir, e))?;
    }

    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| NoticeHarvestError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| NoticeHarvestError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read a secret from the env var named in config.
///
/// Returns a config error naming the variable when it is unset or empty.
pub fn resolve_api_key(var_name: &str, service: &str) -> Result<String> {
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val.trim().to_string()),
        _ => Err(NoticeHarvestError::config(format!(
            "{service} API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Expand a leading `~/` to the user's home directory.
fn expand_home(path: &str) -> Result<PathBuf> {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| NoticeHarvestError::config("could not determine home directory"))?;
        Ok(home.join(rest))
    } else {
        Ok(PathBuf::from(path))
    }
}
