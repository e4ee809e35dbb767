// Content Refiner Data Models
// Canonical polarity everywhere: score 0 = human-like, 100 = AI-like

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

// ============ Classification ============

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Human,
    Ai,
    Unclear,
    Error,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Human => "human",
            Self::Ai => "ai",
            Self::Unclear => "unclear",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

// ============ Classifier Output ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SentenceScore {
    pub text: String,
    /// Canonical polarity, 0-100.
    pub score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AttackFlags {
    pub zero_width_space: bool,
    pub homoglyph: bool,
}

impl AttackFlags {
    pub fn any(&self) -> bool {
        self.zero_width_space || self.homoglyph
    }
}

/// Sub-signals from a detailed classifier response.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectionDetail {
    #[serde(default)]
    pub sentences: Vec<SentenceScore>,
    pub readability: Option<f64>,
    #[serde(default)]
    pub attack: AttackFlags,
    #[serde(default)]
    pub repetition_detected: bool,
    #[serde(default)]
    pub uniform_structure: bool,
    pub technical_density: Option<f64>,
    #[serde(default)]
    pub input_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AIDetectionResult {
    pub score: f64,
    pub confidence: f64,
    pub classification: Classification,
    pub detail: Option<DetectionDetail>,
    pub latency_ms: i64,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AIDetectionResult {
    /// Worst-case result used whenever the classifier could not answer.
    pub fn fail_safe(provider: &str, reason: impl Into<String>, latency_ms: i64) -> Self {
        Self {
            score: 100.0,
            confidence: 0.0,
            classification: Classification::Error,
            detail: None,
            latency_ms,
            provider: provider.to_string(),
            error: Some(reason.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.classification == Classification::Error
    }
}

// ============ Composite Scoring ============

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompositeResult {
    pub original_score: f64,
    pub composite_score: f64,
    pub confidence: f64,
    pub classification: Classification,
    pub component_scores: BTreeMap<String, f64>,
    pub bias_adjustments: BTreeMap<String, f64>,
    pub reasoning: Vec<String>,
}

// ============ Content Generation ============

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthorInfo {
    pub name: String,
    pub country: Option<String>,
    pub expertise: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub material: String,
    #[serde(default)]
    pub material_data: serde_json::Value,
    #[serde(default)]
    pub author_info: AuthorInfo,
    pub current_content: String,
    #[serde(default)]
    pub directives: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub success: bool,
    pub content: String,
    pub error_message: String,
}

impl GenerationOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error_message: String::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error_message: message.into(),
        }
    }
}

// ============ Refinement Run ============

/// What the content is about; passed to every strategy.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RefinementContext {
    pub material: String,
    #[serde(default)]
    pub material_data: serde_json::Value,
    #[serde(default)]
    pub author_info: AuthorInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRecord {
    pub index: usize,
    pub content: String,
    pub score: f64,
    /// None for the baseline.
    pub strategy: Option<String>,
    pub improvement: f64,
    pub accepted: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite: Option<CompositeResult>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustReason {
    NoStrategies,
    AllStrategiesErrored,
    BelowImprovementThreshold,
    BudgetSpent,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum Termination {
    TargetMet,
    Exhausted(ExhaustReason),
}

impl Termination {
    pub fn is_target_met(&self) -> bool {
        matches!(self, Self::TargetMet)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefinementOutcome {
    pub run_id: Uuid,
    pub content: String,
    pub score: f64,
    pub baseline_score: f64,
    pub termination: Termination,
    pub history: Vec<IterationRecord>,
    pub strategies_invoked: usize,
}

impl RefinementOutcome {
    pub fn accepted_iterations(&self) -> usize {
        self.history
            .iter()
            .filter(|r| r.accepted && r.strategy.is_some())
            .count()
    }
}
