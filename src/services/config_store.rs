// Configuration Storage Service
// Refinement/scoring configuration, validation, and config file read/write with backups

use crate::models::Classification;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid composite weights: {0}")]
    InvalidWeights(String),
    #[error("Invalid classification thresholds: human={human} unclear={unclear} ai={ai} (need 0 <= human < unclear < ai <= 100)")]
    InvalidThresholds { human: f64, unclear: f64, ai: f64 },
    #[error("Invalid value for {field}: {message}")]
    InvalidRange { field: String, message: String },
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidRange {
        field: field.to_string(),
        message: message.into(),
    }
}

// ============ Refinement ============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinementConfig {
    #[serde(default = "default_target_score")]
    pub target_score: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_improvement_threshold")]
    pub improvement_threshold: f64,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            target_score: default_target_score(),
            max_iterations: default_max_iterations(),
            improvement_threshold: default_improvement_threshold(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl RefinementConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.target_score.is_finite() || !(0.0..=100.0).contains(&self.target_score) {
            return Err(invalid("targetScore", format!("{} is outside 0-100", self.target_score)));
        }
        if !self.improvement_threshold.is_finite() || self.improvement_threshold < 0.0 {
            return Err(invalid(
                "improvementThreshold",
                format!("{} must be a non-negative number", self.improvement_threshold),
            ));
        }
        self.scoring.validate()
    }
}

fn default_target_score() -> f64 { 30.0 }
fn default_max_iterations() -> usize { 3 }
fn default_improvement_threshold() -> f64 { 1.0 }

// ============ Composite Scoring ============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub weights: CompositeWeights,
    #[serde(default)]
    pub thresholds: ClassificationThresholds,
    #[serde(default)]
    pub sentence_distribution: SentenceDistributionConfig,
    #[serde(default = "default_readability_bands")]
    pub readability_bands: Vec<ReadabilityBand>,
    #[serde(default = "default_readability_neutral")]
    pub readability_neutral: f64,
    #[serde(default)]
    pub authenticity: AuthenticityConfig,
    #[serde(default = "default_density_bands")]
    pub density_bands: Vec<DensityBand>,
    #[serde(default)]
    pub domain: DomainConfig,
    #[serde(default = "default_baseline_floor")]
    pub baseline_floor: f64,
    #[serde(default)]
    pub confidence: ConfidenceConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weights: CompositeWeights::default(),
            thresholds: ClassificationThresholds::default(),
            sentence_distribution: SentenceDistributionConfig::default(),
            readability_bands: default_readability_bands(),
            readability_neutral: default_readability_neutral(),
            authenticity: AuthenticityConfig::default(),
            density_bands: default_density_bands(),
            domain: DomainConfig::default(),
            baseline_floor: default_baseline_floor(),
            confidence: ConfidenceConfig::default(),
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        self.thresholds.validate()?;

        for band in &self.readability_bands {
            if !(band.min < band.max) {
                return Err(invalid("readabilityBands", format!("band [{}, {}) is empty", band.min, band.max)));
            }
            if !(0.0..=100.0).contains(&band.score) {
                return Err(invalid("readabilityBands", format!("score {} is outside 0-100", band.score)));
            }
        }
        for band in &self.density_bands {
            if !(band.min < band.max) {
                return Err(invalid("densityBands", format!("band [{}, {}) is empty", band.min, band.max)));
            }
        }
        if !(0.0..=100.0).contains(&self.readability_neutral) {
            return Err(invalid("readabilityNeutral", "must be within 0-100"));
        }
        if !(0.0..=100.0).contains(&self.baseline_floor) {
            return Err(invalid("baselineFloor", "must be within 0-100"));
        }
        if self.sentence_distribution.variance_scale <= 0.0 {
            return Err(invalid("sentenceDistribution.varianceScale", "must be positive"));
        }
        if self.confidence.agreement_scale <= 0.0 {
            return Err(invalid("confidence.agreementScale", "must be positive"));
        }
        self.domain.validate()
    }
}

/// Weights of the five composite components; must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompositeWeights {
    pub sentence_distribution: f64,
    pub readability: f64,
    pub content_authenticity: f64,
    pub domain: f64,
    pub baseline: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            sentence_distribution: 0.30,
            readability: 0.15,
            content_authenticity: 0.25,
            domain: 0.15,
            baseline: 0.15,
        }
    }
}

impl CompositeWeights {
    pub fn as_pairs(&self) -> [(&'static str, f64); 5] {
        [
            ("sentence_distribution", self.sentence_distribution),
            ("readability", self.readability),
            ("content_authenticity", self.content_authenticity),
            ("domain", self.domain),
            ("baseline", self.baseline),
        ]
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pairs = self.as_pairs();
        for (name, w) in pairs {
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::InvalidWeights(format!("{} has weight {}", name, w)));
            }
        }
        let sum: f64 = pairs.iter().map(|(_, w)| w).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::InvalidWeights(format!("weights sum to {:.4}, expected 1.0", sum)));
        }
        Ok(())
    }
}

/// Score boundaries under lower-is-more-human polarity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationThresholds {
    pub human: f64,
    pub unclear: f64,
    pub ai: f64,
}

impl Default for ClassificationThresholds {
    fn default() -> Self {
        Self {
            human: 30.0,
            unclear: 50.0,
            ai: 70.0,
        }
    }
}

impl ClassificationThresholds {
    /// Map a canonical score to a classification. Between `unclear` and `ai`
    /// the call leans AI only when the signal is confident.
    pub fn classify(&self, score: f64, confidence: f64) -> Classification {
        if score <= self.human {
            Classification::Human
        } else if score >= self.ai {
            Classification::Ai
        } else if score > self.unclear && confidence >= 0.5 {
            Classification::Ai
        } else {
            Classification::Unclear
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ordered = 0.0 <= self.human
            && self.human < self.unclear
            && self.unclear < self.ai
            && self.ai <= 100.0;
        if !ordered {
            return Err(ConfigError::InvalidThresholds {
                human: self.human,
                unclear: self.unclear,
                ai: self.ai,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SentenceDistributionConfig {
    pub variance_scale: f64,
    pub max_variance_credit: f64,
    pub extreme_penalty: f64,
    pub average_bonus: f64,
    pub reasonable_avg_min: f64,
    pub reasonable_avg_max: f64,
}

impl Default for SentenceDistributionConfig {
    fn default() -> Self {
        Self {
            variance_scale: 20.0,
            max_variance_credit: 30.0,
            extreme_penalty: 40.0,
            average_bonus: 10.0,
            reasonable_avg_min: 20.0,
            reasonable_avg_max: 80.0,
        }
    }
}

/// Flesch reading-ease range `[min, max)` mapped to a canonical score.
/// Values outside every band take the nearest band.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReadabilityBand {
    pub min: f64,
    pub max: f64,
    pub score: f64,
}

fn default_readability_bands() -> Vec<ReadabilityBand> {
    vec![
        ReadabilityBand { min: -100.0, max: 30.0, score: 60.0 },
        ReadabilityBand { min: 30.0, max: 50.0, score: 35.0 },
        ReadabilityBand { min: 50.0, max: 70.0, score: 20.0 },
        ReadabilityBand { min: 70.0, max: 90.0, score: 35.0 },
        ReadabilityBand { min: 90.0, max: 130.0, score: 55.0 },
    ]
}

fn default_readability_neutral() -> f64 { 50.0 }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthenticityConfig {
    pub attack_free_bonus: f64,
    pub attack_penalty: f64,
    pub repetition_penalty: f64,
    pub uniform_structure_penalty: f64,
}

impl Default for AuthenticityConfig {
    fn default() -> Self {
        Self {
            attack_free_bonus: 15.0,
            attack_penalty: 25.0,
            repetition_penalty: 20.0,
            uniform_structure_penalty: 15.0,
        }
    }
}

/// Technical density range `[min, max)` with an additive adjustment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DensityBand {
    pub min: f64,
    pub max: f64,
    pub adjustment: f64,
}

fn default_density_bands() -> Vec<DensityBand> {
    vec![
        DensityBand { min: 0.0, max: 0.02, adjustment: 10.0 },
        DensityBand { min: 0.02, max: 0.08, adjustment: -15.0 },
        DensityBand { min: 0.08, max: 0.15, adjustment: 0.0 },
        DensityBand { min: 0.15, max: 1.01, adjustment: 15.0 },
    ]
}

fn default_baseline_floor() -> f64 { 5.0 }

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DomainConfig {
    pub keywords: Vec<String>,
    pub units: Vec<String>,
    pub domain_base: f64,
    pub per_indicator_credit: f64,
    pub max_indicator_credit: f64,
    pub adjustment_cap: f64,
    pub saturation_raw_score: f64,
    pub saturation_indicators: usize,
    pub partial_factor: f64,
    pub long_form_words: usize,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            keywords: default_keywords(),
            units: default_units(),
            domain_base: 50.0,
            per_indicator_credit: 5.0,
            max_indicator_credit: 40.0,
            adjustment_cap: 15.0,
            saturation_raw_score: 80.0,
            saturation_indicators: 6,
            partial_factor: 0.5,
            long_form_words: 150,
        }
    }
}

impl DomainConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.adjustment_cap) {
            return Err(invalid("domain.adjustmentCap", "must be within 0-100"));
        }
        if self.saturation_indicators == 0 {
            return Err(invalid("domain.saturationIndicators", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.partial_factor) {
            return Err(invalid("domain.partialFactor", "must be within 0-1"));
        }
        Ok(())
    }
}

fn default_keywords() -> Vec<String> {
    [
        "alloy", "ablation", "annealing", "ceramic", "composite", "conductivity",
        "contamination", "corrosion", "crystalline", "density", "fatigue", "fluence",
        "hardness", "laser", "metallurgy", "microstructure", "modulus", "oxide",
        "polymer", "porosity", "substrate", "tensile", "thermal", "wavelength", "yield",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_units() -> Vec<String> {
    [
        "MPa", "GPa", "°C", "K", "nm", "μm", "mm", "cm", "g/cm³", "kg/m³", "W/m·K",
        "J/cm²", "J/g", "kHz", "ns", "W", "%",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfidenceConfig {
    pub agreement_scale: f64,
    pub detail_bonus: f64,
    pub min_sentences_for_bonus: usize,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            agreement_scale: 50.0,
            detail_bonus: 0.1,
            min_sentences_for_bonus: 3,
        }
    }
}

// ============ Classifier ============

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_language")]
    pub language: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            url: None,
            timeout_secs: default_timeout_secs(),
            language: default_language(),
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(invalid("classifier.timeoutSecs", "must be at least 1 second"));
        }
        if self.provider.trim().is_empty() {
            return Err(invalid("classifier.provider", "must not be empty"));
        }
        Ok(())
    }
}

fn default_provider() -> String { "winston".to_string() }
fn default_timeout_secs() -> u64 { 30 }
fn default_language() -> String { "en".to_string() }
fn default_true() -> bool { true }

// ============ Application Config File ============

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub refinement: RefinementConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub generator: Option<GeneratorConfig>,
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorConfig {
    pub url: String,
    pub model: String,
    #[serde(default = "default_generator_temperature")]
    pub temperature: f64,
    #[serde(default = "default_generator_max_tokens")]
    pub max_tokens: i32,
}

fn default_generator_temperature() -> f64 { 0.8 }
fn default_generator_max_tokens() -> i32 { 1200 }

pub struct ConfigStore {
    config_dir: PathBuf,
    config_file: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: PathBuf) -> Self {
        let config_file = config_dir.join("config.json");
        Self { config_dir, config_file }
    }

    /// Get default config directory
    pub fn default_config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("content-refiner"))
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Load configuration from file; missing file yields defaults
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        if !self.config_file.exists() {
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_file)?;
        let config: AppConfig = serde_json::from_str(&content)?;
        config.refinement.validate()?;
        config.classifier.validate()?;
        Ok(config)
    }

    /// Save configuration to file, backing up the previous version
    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        config.refinement.validate()?;
        config.classifier.validate()?;
        fs::create_dir_all(&self.config_dir)?;

        if self.config_file.exists() {
            self.create_backup()?;
        }

        let content = serde_json::to_string_pretty(config)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    fn create_backup(&self) -> Result<(), ConfigError> {
        let backup_dir = self.config_dir.join("backups");
        fs::create_dir_all(&backup_dir)?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S%3f");
        let backup_file = backup_dir.join(format!("config_{}.json", timestamp));
        fs::copy(&self.config_file, &backup_file)?;

        self.cleanup_old_backups(&backup_dir, 10)
    }

    /// Remove old backups, keeping only the most recent N
    fn cleanup_old_backups(&self, backup_dir: &Path, keep: usize) -> Result<(), ConfigError> {
        let mut entries: Vec<_> = fs::read_dir(backup_dir)?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
            .collect();

        if entries.len() <= keep {
            return Ok(());
        }

        entries.sort_by_key(|e| {
            e.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        });

        let remove_count = entries.len() - keep;
        for entry in entries.iter().take(remove_count) {
            let _ = fs::remove_file(entry.path());
        }

        Ok(())
    }

    /// Get classifier/generator API key from config file
    pub fn get_api_key(&self, provider: &str) -> Result<Option<String>, ConfigError> {
        let config = self.load()?;
        Ok(config.api_keys.get(provider).cloned())
    }

    pub fn set_api_key(&self, provider: &str, key: &str) -> Result<(), ConfigError> {
        let mut config = self.load()?;
        config.api_keys.insert(provider.to_string(), key.to_string());
        self.save(&config)
    }
}
