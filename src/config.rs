//! Configuration types for intake and analysis.
//!
//! All behaviour is controlled through [`StudyConfig`], built via its
//! [`StudyConfigBuilder`]. The intake ceilings live in a separate
//! [`IntakeBudget`] because they are copied into every intake and must not
//! change while one is running.

use crate::error::StudyError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Default vision model when a provider is named without a model.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Ceilings applied to a single intake.
///
/// Immutable for the lifetime of one intake: the session copies the budget
/// when the intake starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeBudget {
    /// Maximum number of PDF pages. Default: 50.
    pub max_pages: usize,

    /// Pages wider than this are scaled down (aspect ratio kept). Default: 1536.
    pub max_page_width: u32,

    /// Vertical gap between stacked pages, in pixels. Default: 10.
    pub inter_page_spacing: u32,

    /// Ceiling on the running height of scaled pages plus spacing. Default: 30 000.
    pub max_total_height: u32,

    /// Ceiling on the composite buffer size at 4 bytes per pixel. Default: 100 MiB.
    pub max_total_bytes: u64,
}

impl Default for IntakeBudget {
    fn default() -> Self {
        Self {
            max_pages: 50,
            max_page_width: 1536,
            inter_page_spacing: 10,
            max_total_height: 30_000,
            max_total_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Configuration for a study session.
///
/// Built via [`StudyConfig::builder()`] or [`StudyConfig::default()`].
///
/// # Example
/// ```rust
/// use studydesk::{Language, StudyConfig};
///
/// let config = StudyConfig::builder()
///     .language(Language::Hindi)
///     .model("gemini-2.5-flash")
///     .max_pages(20)
///     .build()
///     .unwrap();
/// assert_eq!(config.budget.max_pages, 20);
/// ```
#[derive(Clone)]
pub struct StudyConfig {
    /// Intake ceilings.
    pub budget: IntakeBudget,

    /// LLM model identifier, e.g. "gemini-2.5-flash", "gpt-4.1-mini".
    pub model: Option<String>,

    /// LLM provider name (e.g. "gemini", "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.4.
    pub temperature: f32,

    /// Maximum tokens the model may generate per answer. Default: 4096.
    pub max_tokens: usize,

    /// Language the explanation should be written in. Default: English.
    pub language: Language,

    /// SQLite file backing the note store.
    pub database_path: PathBuf,

    /// Base URL of the realtime database holding `app_updates/latest`.
    /// `None` disables update checks.
    pub update_endpoint: Option<String>,

    /// Version code of this build, compared against the published one.
    pub current_version_code: u32,

    /// URL probed to decide whether the network is usable. Any 2xx counts.
    pub connectivity_probe_url: String,

    /// Timeout for a single connectivity probe, in seconds. Default: 5.
    pub connectivity_timeout_secs: u64,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Timeout for one generation call in seconds. Default: 60.
    pub api_timeout_secs: u64,

    /// Optional intake progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            budget: IntakeBudget::default(),
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.4,
            max_tokens: 4096,
            language: Language::default(),
            database_path: PathBuf::from("studydesk.db"),
            update_endpoint: None,
            current_version_code: 1,
            connectivity_probe_url: "https://clients3.google.com/generate_204".to_string(),
            connectivity_timeout_secs: 5,
            download_timeout_secs: 120,
            api_timeout_secs: 60,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for StudyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StudyConfig")
            .field("budget", &self.budget)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("language", &self.language)
            .field("database_path", &self.database_path)
            .field("update_endpoint", &self.update_endpoint)
            .field("current_version_code", &self.current_version_code)
            .field("progress_callback", &self.progress_callback.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl StudyConfig {
    /// Create a new builder for `StudyConfig`.
    pub fn builder() -> StudyConfigBuilder {
        StudyConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`StudyConfig`].
#[derive(Debug)]
pub struct StudyConfigBuilder {
    config: StudyConfig,
}

impl StudyConfigBuilder {
    pub fn budget(mut self, budget: IntakeBudget) -> Self {
        self.config.budget = budget;
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.budget.max_pages = n.max(1);
        self
    }

    pub fn max_page_width(mut self, px: u32) -> Self {
        self.config.budget.max_page_width = px.max(16);
        self
    }

    pub fn inter_page_spacing(mut self, px: u32) -> Self {
        self.config.budget.inter_page_spacing = px;
        self
    }

    pub fn max_total_height(mut self, px: u32) -> Self {
        self.config.budget.max_total_height = px;
        self
    }

    pub fn max_total_bytes(mut self, bytes: u64) -> Self {
        self.config.budget.max_total_bytes = bytes;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.config.language = language;
        self
    }

    pub fn database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.database_path = path.into();
        self
    }

    pub fn update_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.update_endpoint = Some(url.into());
        self
    }

    pub fn current_version_code(mut self, code: u32) -> Self {
        self.config.current_version_code = code;
        self
    }

    pub fn connectivity_probe_url(mut self, url: impl Into<String>) -> Self {
        self.config.connectivity_probe_url = url.into();
        self
    }

    pub fn connectivity_timeout_secs(mut self, secs: u64) -> Self {
        self.config.connectivity_timeout_secs = secs.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<StudyConfig, StudyError> {
        let b = &self.config.budget;
        if b.max_pages == 0 {
            return Err(StudyError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if b.max_total_height == 0 || b.max_total_bytes == 0 {
            return Err(StudyError::InvalidConfig(
                "height and byte ceilings must be non-zero".into(),
            ));
        }
        if self.config.api_timeout_secs == 0 {
            return Err(StudyError::InvalidConfig("api_timeout_secs must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Output languages offered for explanations and notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    English,
    Hindi,
    Malayalam,
    Spanish,
    French,
    German,
    Italian,
    Japanese,
    Korean,
    Chinese,
}

impl Language {
    pub const ALL: [Language; 10] = [
        Language::English,
        Language::Hindi,
        Language::Malayalam,
        Language::Spanish,
        Language::French,
        Language::German,
        Language::Italian,
        Language::Japanese,
        Language::Korean,
        Language::Chinese,
    ];

    /// ISO 639-1 code.
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Hindi => "hi",
            Language::Malayalam => "ml",
            Language::Spanish => "es",
            Language::French => "fr",
            Language::German => "de",
            Language::Italian => "it",
            Language::Japanese => "ja",
            Language::Korean => "ko",
            Language::Chinese => "zh",
        }
    }

    /// English name, used inside prompts and stored with notes.
    pub fn name(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Hindi => "Hindi",
            Language::Malayalam => "Malayalam",
            Language::Spanish => "Spanish",
            Language::French => "French",
            Language::German => "German",
            Language::Italian => "Italian",
            Language::Japanese => "Japanese",
            Language::Korean => "Korean",
            Language::Chinese => "Chinese",
        }
    }

    /// Parse an ISO code or an English name, case-insensitively.
    /// Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Language> {
        let s = s.trim();
        Language::ALL
            .into_iter()
            .find(|l| l.code().eq_ignore_ascii_case(s) || l.name().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_defaults() {
        let b = IntakeBudget::default();
        assert_eq!(b.max_pages, 50);
        assert_eq!(b.max_page_width, 1536);
        assert_eq!(b.inter_page_spacing, 10);
        assert_eq!(b.max_total_height, 30_000);
        assert_eq!(b.max_total_bytes, 104_857_600);
    }

    #[test]
    fn builder_clamps_and_validates() {
        let config = StudyConfig::builder()
            .temperature(5.0)
            .max_pages(0)
            .build()
            .unwrap();
        assert_eq!(config.temperature, 2.0);
        assert_eq!(config.budget.max_pages, 1);

        let err = StudyConfig::builder().max_total_bytes(0).build().unwrap_err();
        assert!(matches!(err, StudyError::InvalidConfig(_)));
    }

    #[test]
    fn language_parse_accepts_code_and_name() {
        assert_eq!(Language::parse("hi"), Some(Language::Hindi));
        assert_eq!(Language::parse("malayalam"), Some(Language::Malayalam));
        assert_eq!(Language::parse(" ZH "), Some(Language::Chinese));
        assert_eq!(Language::parse("klingon"), None);
    }

    #[test]
    fn debug_hides_provider() {
        let s = format!("{:?}", StudyConfig::default());
        assert!(s.contains("budget"));
        assert!(!s.contains("api_key"));
    }
}
