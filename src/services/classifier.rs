// AI Detection Classifier Service
// Wraps third-party text-authenticity APIs and normalizes every response to the
// canonical polarity (0 = human-like, 100 = AI-like).
//
// Polarity mapping per provider:
// - winston: `score` is 0-100 where higher = more human; canonical = 100 - score.
//   Sentence scores use the same scale and are flipped the same way.
// - sapling: `score` is a 0-1 AI probability; canonical = score * 100.
//   Sentence scores use the same scale and are scaled the same way.

use crate::models::{AIDetectionResult, AttackFlags, DetectionDetail, SentenceScore};
use crate::services::config_store::{ClassificationThresholds, ClassifierConfig, ConfigStore};
use crate::services::text_processor::{
    flesch_reading_ease, has_duplicate_sentence, preview, sentence_length_cv, split_sentences,
    trigram_repeat_rate,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::env;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

const WINSTON_DEFAULT_URL: &str = "https://api.gowinston.ai/v2/ai-content-detection";
const SAPLING_DEFAULT_URL: &str = "https://api.sapling.ai/api/v1/aidetect";

const REPEAT_RATE_LIMIT: f64 = 0.15;
const UNIFORM_CV_LIMIT: f64 = 0.15;
const UNIFORM_MIN_SENTENCES: usize = 4;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Malformed response: {0}")]
    JsonError(String),
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    #[error("API key not configured for {0}")]
    MissingApiKey(String),
    #[error("Unknown classifier provider: {0}")]
    UnknownProvider(String),
    #[error("Empty input text")]
    EmptyInput,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ClassifierProvider {
    Winston,
    Sapling,
}

impl ClassifierProvider {
    pub fn parse(name: &str) -> Result<Self, ClassifierError> {
        match name.trim().to_lowercase().as_str() {
            "winston" | "winstonai" => Ok(Self::Winston),
            "sapling" => Ok(Self::Sapling),
            other => Err(ClassifierError::UnknownProvider(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Winston => "winston",
            Self::Sapling => "sapling",
        }
    }

    fn default_url(&self) -> String {
        let (var, fallback) = match self {
            Self::Winston => ("WINSTON_API_URL", WINSTON_DEFAULT_URL),
            Self::Sapling => ("SAPLING_API_URL", SAPLING_DEFAULT_URL),
        };
        env::var(var).unwrap_or_else(|_| fallback.to_string())
    }
}

/// A text-authenticity classifier. Implementations never fail: any error is
/// reported as `AIDetectionResult::fail_safe`.
#[async_trait]
pub trait Classifier: Send + Sync {
    fn name(&self) -> &str;

    async fn analyze(&self, text: &str) -> AIDetectionResult;
}

#[derive(Debug, Serialize)]
struct WinstonRequest<'a> {
    text: &'a str,
    sentences: bool,
    language: &'a str,
}

#[derive(Debug, Serialize)]
struct SaplingRequest<'a> {
    key: &'a str,
    text: &'a str,
    sent_scores: bool,
}

pub struct HttpClassifier {
    client: Client,
    provider: ClassifierProvider,
    url: String,
    api_key: String,
    language: String,
    timeout_secs: u64,
    thresholds: ClassificationThresholds,
}

impl HttpClassifier {
    pub fn new(
        provider: ClassifierProvider,
        api_key: impl Into<String>,
        config: &ClassifierConfig,
    ) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            provider,
            url: config.url.clone().unwrap_or_else(|| provider.default_url()),
            api_key: api_key.into(),
            language: config.language.clone(),
            timeout_secs: config.timeout_secs,
            thresholds: ClassificationThresholds::default(),
        })
    }

    /// Build a classifier for `config.provider`, looking the key up via `get_api_key`
    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let provider = ClassifierProvider::parse(&config.provider)?;
        let api_key = get_api_key(provider.name())
            .ok_or_else(|| ClassifierError::MissingApiKey(provider.name().to_string()))?;
        Self::new(provider, api_key, config)
    }

    pub fn with_thresholds(mut self, thresholds: ClassificationThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn provider(&self) -> ClassifierProvider {
        self.provider
    }

    async fn request(&self, text: &str) -> Result<(Value, i64), ClassifierError> {
        if text.trim().is_empty() {
            return Err(ClassifierError::EmptyInput);
        }

        let builder = match self.provider {
            ClassifierProvider::Winston => self
                .client
                .post(&self.url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&WinstonRequest {
                    text,
                    sentences: true,
                    language: &self.language,
                }),
            ClassifierProvider::Sapling => self
                .client
                .post(&self.url)
                .header("x-api-key", &self.api_key)
                .json(&SaplingRequest {
                    key: &self.api_key,
                    text,
                    sent_scores: true,
                }),
        };

        let start = Instant::now();
        let send = builder.send();
        let response = tokio::time::timeout(Duration::from_secs(self.timeout_secs), send)
            .await
            .map_err(|_| ClassifierError::Timeout(self.timeout_secs))?
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifierError::Timeout(self.timeout_secs)
                } else {
                    ClassifierError::HttpError(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| ClassifierError::JsonError(e.to_string()))?;
        let latency_ms = start.elapsed().as_millis() as i64;

        Ok((data, latency_ms))
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    fn name(&self) -> &str {
        self.provider.name()
    }

    async fn analyze(&self, text: &str) -> AIDetectionResult {
        let start = Instant::now();
        let outcome = self.request(text).await.and_then(|(data, latency_ms)| {
            normalize_response(self.provider, &data, text, latency_ms, &self.thresholds)
        });

        match outcome {
            Ok(result) => {
                info!(
                    "[CLASSIFIER] {} score={:.1} class={} latency_ms={} text={}",
                    self.provider.name(),
                    result.score,
                    result.classification,
                    result.latency_ms,
                    preview(text, 60)
                );
                result
            }
            Err(e) => {
                let latency_ms = start.elapsed().as_millis() as i64;
                warn!(
                    "[CLASSIFIER] {} failed after {}ms, using fail-safe score: {}",
                    self.provider.name(),
                    latency_ms,
                    e
                );
                AIDetectionResult::fail_safe(self.provider.name(), e.to_string(), latency_ms)
            }
        }
    }
}

/// Convert a provider response into a canonical `AIDetectionResult`.
pub fn normalize_response(
    provider: ClassifierProvider,
    data: &Value,
    text: &str,
    latency_ms: i64,
    thresholds: &ClassificationThresholds,
) -> Result<AIDetectionResult, ClassifierError> {
    let (score, sentences, readability, attack) = match provider {
        ClassifierProvider::Winston => {
            let raw = require_score(data, "score", 100.0)?;
            let list = match &data["sentences"] {
                Value::Array(items) => items.as_slice(),
                Value::Object(obj) => obj
                    .get("sentences")
                    .and_then(|v| v.as_array())
                    .map(|v| v.as_slice())
                    .unwrap_or(&[]),
                _ => &[],
            };
            let sentences = parse_sentences(list, "text", |s| (100.0 - s).clamp(0.0, 100.0));
            let attack = AttackFlags {
                zero_width_space: data["attack_detected"]["zero_width_space"].as_bool().unwrap_or(false),
                homoglyph: data["attack_detected"]["homoglyph_attack"].as_bool().unwrap_or(false),
            };
            (100.0 - raw, sentences, data["readability_score"].as_f64(), attack)
        }
        ClassifierProvider::Sapling => {
            let raw = require_score(data, "score", 1.0)?;
            let list = data["sentence_scores"].as_array().map(|v| v.as_slice()).unwrap_or(&[]);
            let sentences = parse_sentences(list, "sentence", |s| (s * 100.0).clamp(0.0, 100.0));
            (raw * 100.0, sentences, None, AttackFlags::default())
        }
    };

    let confidence = data["confidence"]
        .as_f64()
        .filter(|c| (0.0..=1.0).contains(c))
        .unwrap_or_else(|| ((score - 50.0).abs() / 50.0).clamp(0.0, 1.0));

    let text_sentences = split_sentences(text);
    let repetition_detected =
        has_duplicate_sentence(&text_sentences) || trigram_repeat_rate(text) > REPEAT_RATE_LIMIT;
    let uniform_structure = text_sentences.len() >= UNIFORM_MIN_SENTENCES
        && sentence_length_cv(&text_sentences).map_or(false, |cv| cv < UNIFORM_CV_LIMIT);

    debug!(
        "[CLASSIFIER] {} normalized raw->canonical score={:.1} sentences={} repetition={} uniform={}",
        provider.name(),
        score,
        sentences.len(),
        repetition_detected,
        uniform_structure
    );

    Ok(AIDetectionResult {
        score,
        confidence,
        classification: thresholds.classify(score, confidence),
        detail: Some(DetectionDetail {
            sentences,
            readability: readability.or_else(|| flesch_reading_ease(text)),
            attack,
            repetition_detected,
            uniform_structure,
            technical_density: None,
            input_text: text.to_string(),
        }),
        latency_ms,
        provider: provider.name().to_string(),
        error: None,
    })
}

fn require_score(data: &Value, field: &str, max: f64) -> Result<f64, ClassifierError> {
    let score = data[field]
        .as_f64()
        .ok_or_else(|| ClassifierError::JsonError(format!("missing numeric `{}`", field)))?;
    if !(0.0..=max).contains(&score) {
        return Err(ClassifierError::JsonError(format!(
            "`{}`={} outside 0-{}",
            field, score, max
        )));
    }
    Ok(score)
}

fn parse_sentences(items: &[Value], text_field: &str, to_canonical: impl Fn(f64) -> f64) -> Vec<SentenceScore> {
    items
        .iter()
        .filter_map(|item| {
            let score = item["score"].as_f64()?;
            Some(SentenceScore {
                text: item[text_field].as_str().unwrap_or_default().to_string(),
                score: to_canonical(score),
            })
        })
        .collect()
}

/// Get API key from environment or config file
pub fn get_api_key(provider: &str) -> Option<String> {
    let upper = provider.to_uppercase();
    let env_keys = [
        format!("CONTENT_REFINER_{}_API_KEY", upper),
        format!("{}_API_KEY", upper),
    ];

    for key in &env_keys {
        if let Ok(val) = env::var(key) {
            let v = val.trim();
            if !v.is_empty() {
                return Some(v.to_string());
            }
        }
    }

    if let Some(config_dir) = ConfigStore::default_config_dir() {
        let store = ConfigStore::new(config_dir);
        if let Ok(Some(key)) = store.get_api_key(provider) {
            return Some(key);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classification;
    use serde_json::json;

    const TEXT: &str = "Laser cleaning removes rust from steel. It works at 1064 nm. Operators like it.";

    fn thresholds() -> ClassificationThresholds {
        ClassificationThresholds::default()
    }

    #[test]
    fn test_parse_provider() {
        assert_eq!(ClassifierProvider::parse("Winston").unwrap(), ClassifierProvider::Winston);
        assert_eq!(ClassifierProvider::parse("sapling").unwrap(), ClassifierProvider::Sapling);
        assert!(matches!(
            ClassifierProvider::parse("gptzero"),
            Err(ClassifierError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_winston_polarity_is_flipped() {
        let data = json!({
            "score": 82.0,
            "readability_score": 55.0,
            "sentences": {"sentences": [
                {"text": "Laser cleaning removes rust from steel.", "score": 90.0},
                {"text": "It works at 1064 nm.", "score": 10.0}
            ]},
            "attack_detected": {"zero_width_space": false, "homoglyph_attack": true}
        });
        let result = normalize_response(ClassifierProvider::Winston, &data, TEXT, 120, &thresholds()).unwrap();
        assert!((result.score - 18.0).abs() < 1e-9);
        assert_eq!(result.classification, Classification::Human);

        let detail = result.detail.unwrap();
        assert_eq!(detail.sentences.len(), 2);
        assert!((detail.sentences[0].score - 10.0).abs() < 1e-9);
        assert!((detail.sentences[1].score - 90.0).abs() < 1e-9);
        assert_eq!(detail.readability, Some(55.0));
        assert!(detail.attack.homoglyph);
        assert_eq!(detail.input_text, TEXT);
    }

    #[test]
    fn test_sapling_probability_is_scaled() {
        let data = json!({
            "score": 0.91,
            "sentence_scores": [
                {"sentence": "Laser cleaning removes rust from steel.", "score": 0.95},
                {"sentence": "Operators like it.", "score": 0.4}
            ]
        });
        let result = normalize_response(ClassifierProvider::Sapling, &data, TEXT, 80, &thresholds()).unwrap();
        assert!((result.score - 91.0).abs() < 1e-9);
        assert_eq!(result.classification, Classification::Ai);

        let detail = result.detail.unwrap();
        assert!((detail.sentences[1].score - 40.0).abs() < 1e-9);
        // Sapling has no readability metric; it is estimated locally
        assert!(detail.readability.is_some());
    }

    #[test]
    fn test_malformed_response_rejected() {
        let missing = json!({"result": "ok"});
        assert!(matches!(
            normalize_response(ClassifierProvider::Winston, &missing, TEXT, 0, &thresholds()),
            Err(ClassifierError::JsonError(_))
        ));

        let out_of_range = json!({"score": 7.5});
        assert!(normalize_response(ClassifierProvider::Sapling, &out_of_range, TEXT, 0, &thresholds()).is_err());
    }

    #[test]
    fn test_repetition_flag_derived_from_text() {
        let text = "The coating is removed. The coating is removed. The coating is removed.";
        let data = json!({"score": 40.0});
        let result = normalize_response(ClassifierProvider::Winston, &data, text, 0, &thresholds()).unwrap();
        assert!(result.detail.unwrap().repetition_detected);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_fail_safe() {
        let config = ClassifierConfig {
            url: Some("http://127.0.0.1:9/detect".to_string()),
            timeout_secs: 2,
            ..ClassifierConfig::default()
        };
        let classifier = HttpClassifier::new(ClassifierProvider::Winston, "test-key", &config).unwrap();
        let result = classifier.analyze(TEXT).await;
        assert_eq!(result.score, 100.0);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.classification, Classification::Error);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_empty_text_is_fail_safe() {
        let classifier =
            HttpClassifier::new(ClassifierProvider::Sapling, "test-key", &ClassifierConfig::default()).unwrap();
        let result = classifier.analyze("   ").await;
        assert!(result.is_error());
        assert_eq!(result.provider, "sapling");
    }
}
