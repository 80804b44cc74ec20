use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::formats::{Audience, ContentDepth};

fn default_max_retries() -> u32 {
    2
}

fn default_enrichment_enabled() -> bool {
    true
}

fn default_max_snippets_per_section() -> usize {
    3
}

fn default_per_source_timeout_ms() -> u64 {
    5_000
}

fn default_total_timeout_ms() -> u64 {
    8_000
}

fn default_wikipedia_base_url() -> String {
    "https://en.wikipedia.org".to_owned()
}

fn default_arxiv_base_url() -> String {
    "https://export.arxiv.org".to_owned()
}

fn default_preview_max_chars() -> usize {
    500
}

fn default_max_concurrency() -> usize {
    2
}

fn default_flagged_terms() -> Vec<String> {
    [
        "hate",
        "violence",
        "discrimination",
        "profanity",
        "dangerous",
        "illegal",
        "inappropriate",
        "adult",
        "nsfw",
        "explicit",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
}

/// Inclusive word-count range accepted for one depth level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordBand {
    pub min: u32,
    pub max: u32,
}

impl WordBand {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, words: u32) -> bool {
        (self.min..=self.max).contains(&words)
    }

    /// Midpoint, used as the composition target.
    pub fn target(&self) -> u32 {
        self.min + (self.max - self.min) / 2
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordBands {
    #[serde(default = "WordBands::default_shallow")]
    pub shallow: WordBand,
    #[serde(default = "WordBands::default_medium")]
    pub medium: WordBand,
    #[serde(default = "WordBands::default_deep")]
    pub deep: WordBand,
}

impl WordBands {
    fn default_shallow() -> WordBand {
        WordBand::new(50, 300)
    }
    fn default_medium() -> WordBand {
        WordBand::new(150, 600)
    }
    fn default_deep() -> WordBand {
        WordBand::new(400, 1200)
    }

    pub fn for_depth(&self, depth: ContentDepth) -> WordBand {
        match depth {
            ContentDepth::Shallow => self.shallow,
            ContentDepth::Medium => self.medium,
            ContentDepth::Deep => self.deep,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shallow.min == 0 {
            return Err(ConfigError::Invalid(
                "word_bands.shallow.min must be positive".to_owned(),
            ));
        }
        for (name, band) in [
            ("shallow", self.shallow),
            ("medium", self.medium),
            ("deep", self.deep),
        ] {
            if band.min > band.max {
                return Err(ConfigError::Invalid(format!(
                    "word_bands.{name}: min {} exceeds max {}",
                    band.min, band.max
                )));
            }
        }
        let increasing = self.shallow.min < self.medium.min
            && self.medium.min < self.deep.min
            && self.shallow.max < self.medium.max
            && self.medium.max < self.deep.max;
        if !increasing {
            return Err(ConfigError::Invalid(
                "word_bands must increase strictly from shallow to deep".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for WordBands {
    fn default() -> Self {
        Self {
            shallow: Self::default_shallow(),
            medium: Self::default_medium(),
            deep: Self::default_deep(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnrichmentConfig {
    #[serde(default = "default_enrichment_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_snippets_per_section")]
    pub max_snippets_per_section: usize,
    #[serde(default = "default_per_source_timeout_ms")]
    pub per_source_timeout_ms: u64,
    #[serde(default = "default_total_timeout_ms")]
    pub total_timeout_ms: u64,
    #[serde(default = "default_wikipedia_base_url")]
    pub wikipedia_base_url: String,
    #[serde(default = "default_arxiv_base_url")]
    pub arxiv_base_url: String,
}

impl EnrichmentConfig {
    pub fn per_source_timeout(&self) -> Duration {
        Duration::from_millis(self.per_source_timeout_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: default_enrichment_enabled(),
            max_snippets_per_section: default_max_snippets_per_section(),
            per_source_timeout_ms: default_per_source_timeout_ms(),
            total_timeout_ms: default_total_timeout_ms(),
            wikipedia_base_url: default_wikipedia_base_url(),
            arxiv_base_url: default_arxiv_base_url(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_max_chars")]
    pub max_chars: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            max_chars: default_preview_max_chars(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GenerationConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Ceiling on average words per sentence, per audience.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SentenceLimits {
    pub elementary: u32,
    pub middle_school: u32,
    pub high_school: u32,
    pub undergraduate: u32,
    pub graduate: u32,
    pub professional: u32,
    pub general: u32,
}

impl SentenceLimits {
    pub fn for_audience(&self, audience: Audience) -> u32 {
        match audience {
            Audience::Elementary => self.elementary,
            Audience::MiddleSchool => self.middle_school,
            Audience::HighSchool => self.high_school,
            Audience::Undergraduate => self.undergraduate,
            Audience::Graduate => self.graduate,
            Audience::Professional => self.professional,
            Audience::General => self.general,
        }
    }
}

impl Default for SentenceLimits {
    fn default() -> Self {
        Self {
            elementary: 30,
            middle_school: 32,
            high_school: 34,
            undergraduate: 38,
            graduate: 42,
            professional: 42,
            general: 36,
        }
    }
}

/// Content-quality rules applied to generated prose on top of the word bands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QualityConfig {
    /// Whole words or phrases that reject a unit, unless the topic itself names them.
    #[serde(default = "default_flagged_terms")]
    pub flagged_terms: Vec<String>,
    #[serde(default)]
    pub max_avg_sentence_words: SentenceLimits,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            flagged_terms: default_flagged_terms(),
            max_avg_sentence_words: SentenceLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    #[serde(default)]
    pub word_bands: WordBands,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub quality: QualityConfig,
}

impl PipelineConfig {
    /// Loads `path` (YAML) when given, applies `TEXTBOOKIFY_*` overrides, validates.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("read config: {}", path.display()))?;
                Self::from_yaml(&raw).with_context(|| format!("parse config: {}", path.display()))?
            }
            None => Self::default(),
        };
        config
            .apply_overrides(|key| std::env::var(key).ok())
            .context("apply environment overrides")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(raw).context("parse yaml")?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("TEXTBOOKIFY_MAX_RETRIES") {
            self.retry.max_retries = parse_override("TEXTBOOKIFY_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("TEXTBOOKIFY_ENRICHMENT_ENABLED") {
            self.enrichment.enabled = parse_override("TEXTBOOKIFY_ENRICHMENT_ENABLED", &v)?;
        }
        if let Some(v) = get("TEXTBOOKIFY_MAX_SNIPPETS") {
            self.enrichment.max_snippets_per_section =
                parse_override("TEXTBOOKIFY_MAX_SNIPPETS", &v)?;
        }
        if let Some(v) = get("TEXTBOOKIFY_SOURCE_TIMEOUT_MS") {
            self.enrichment.per_source_timeout_ms =
                parse_override("TEXTBOOKIFY_SOURCE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("TEXTBOOKIFY_ENRICH_TIMEOUT_MS") {
            self.enrichment.total_timeout_ms = parse_override("TEXTBOOKIFY_ENRICH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("TEXTBOOKIFY_WIKIPEDIA_URL") {
            self.enrichment.wikipedia_base_url = v;
        }
        if let Some(v) = get("TEXTBOOKIFY_ARXIV_URL") {
            self.enrichment.arxiv_base_url = v;
        }
        if let Some(v) = get("TEXTBOOKIFY_PREVIEW_MAX_CHARS") {
            self.preview.max_chars = parse_override("TEXTBOOKIFY_PREVIEW_MAX_CHARS", &v)?;
        }
        if let Some(v) = get("TEXTBOOKIFY_MAX_CONCURRENCY") {
            self.generation.max_concurrency = parse_override("TEXTBOOKIFY_MAX_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("TEXTBOOKIFY_FLAGGED_TERMS") {
            self.quality.flagged_terms = v
                .split(',')
                .map(|term| term.trim().to_lowercase())
                .filter(|term| !term.is_empty())
                .collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.word_bands.validate()?;
        if self.preview.max_chars == 0 {
            return Err(ConfigError::Invalid(
                "preview.max_chars must be positive".to_owned(),
            ));
        }
        if self.generation.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "generation.max_concurrency must be positive".to_owned(),
            ));
        }
        if self.enrichment.per_source_timeout_ms == 0 || self.enrichment.total_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "enrichment timeouts must be positive".to_owned(),
            ));
        }
        if let Some(audience) = Audience::ALL
            .into_iter()
            .find(|a| self.quality.max_avg_sentence_words.for_audience(*a) == 0)
        {
            return Err(ConfigError::Invalid(format!(
                "quality.max_avg_sentence_words.{} must be positive",
                audience.as_str()
            )));
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key}={value:?} is not valid")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.preview.max_chars, 500);
        assert_eq!(config.word_bands.medium, WordBand::new(150, 600));
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = PipelineConfig::from_yaml("retry:\n  max_retries: 5\n").unwrap();
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.enrichment, EnrichmentConfig::default());
    }

    #[test]
    fn non_monotonic_bands_are_rejected() {
        let mut bands = WordBands::default();
        bands.medium = WordBand::new(40, 600);
        assert!(bands.validate().is_err());

        let mut bands = WordBands::default();
        bands.shallow.min = 0;
        assert!(bands.validate().is_err());
    }

    #[test]
    fn overrides_replace_fields() {
        let mut config = PipelineConfig::default();
        config
            .apply_overrides(|key| match key {
                "TEXTBOOKIFY_MAX_RETRIES" => Some("4".to_owned()),
                "TEXTBOOKIFY_WIKIPEDIA_URL" => Some(" http://127.0.0.1:9 ".to_owned()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.retry.max_retries, 4);
        assert_eq!(config.enrichment.wikipedia_base_url, "http://127.0.0.1:9");

        let err = config
            .apply_overrides(|key| (key == "TEXTBOOKIFY_MAX_RETRIES").then(|| "many".to_owned()))
            .unwrap_err();
        assert!(err.to_string().contains("TEXTBOOKIFY_MAX_RETRIES"));
    }

    #[test]
    fn quality_rules_load_from_yaml_and_env() {
        let mut config = PipelineConfig::from_yaml(
            "quality:\n  max_avg_sentence_words:\n    elementary: 12\n",
        )
        .unwrap();
        assert_eq!(config.quality.max_avg_sentence_words.elementary, 12);
        assert_eq!(config.quality.max_avg_sentence_words.graduate, 42);
        assert!(config.quality.flagged_terms.contains(&"nsfw".to_owned()));

        config
            .apply_overrides(|key| {
                (key == "TEXTBOOKIFY_FLAGGED_TERMS").then(|| "Gore, , spoilers".to_owned())
            })
            .unwrap();
        assert_eq!(config.quality.flagged_terms, vec!["gore", "spoilers"]);

        config.quality.max_avg_sentence_words.general = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("general"), "{err}");
    }
}
