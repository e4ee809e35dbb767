// Composite Scorer
// Derives a bias-corrected score from a classifier's detailed sub-signals.
//
// Single aggregate classifier scores over-penalize dense technical prose. The
// composite blends five components (all in canonical polarity, 0 = human-like):
// sentence distribution, readability, content authenticity, domain indicators,
// and the retained raw score, then applies a bounded domain correction.
// Pure: the same detection result always yields the same composite.

use crate::models::{AIDetectionResult, Classification, CompositeResult, DetectionDetail};
use crate::services::config_store::{ConfigError, ScoringConfig};
use crate::services::text_processor::count_words;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::debug;

pub const SENTENCE_DISTRIBUTION: &str = "sentence_distribution";
pub const READABILITY: &str = "readability";
pub const CONTENT_AUTHENTICITY: &str = "content_authenticity";
pub const DOMAIN: &str = "domain";
pub const BASELINE: &str = "baseline";

const EXTREME_EPSILON: f64 = 0.5;
const MIN_CONFIDENCE: f64 = 0.1;

fn equation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9)\]]\s?[=≈]\s?[-A-Za-z0-9(]").expect("equation regex")
    })
}

const RANGE: &str = r"\d+(?:\.\d+)?\s?(?:-|–|to)\s?\d+(?:\.\d+)?";

/// Numeric ranges with a decimal on either side ("0.5-1.2"); bare integer
/// ranges such as years or part numbers need a unit instead
fn decimal_range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:\d+\.\d+\s?(?:-|–|to)\s?\d+(?:\.\d+)?|\d+\s?(?:-|–|to)\s?\d+\.\d+)\b")
            .expect("range regex")
    })
}

/// Indicator counts found in the raw text
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DomainIndicators {
    pub keyword_hits: usize,
    pub has_units: bool,
    pub has_equation: bool,
    pub has_range: bool,
    pub long_form: bool,
    pub word_count: usize,
}

impl DomainIndicators {
    pub fn total(&self) -> usize {
        self.keyword_hits
            + self.has_units as usize
            + self.has_equation as usize
            + self.has_range as usize
            + self.long_form as usize
    }
}

pub struct CompositeScorer {
    config: ScoringConfig,
    keyword_re: Option<Regex>,
    unit_re: Option<Regex>,
    unit_range_re: Option<Regex>,
}

impl CompositeScorer {
    pub fn new(config: ScoringConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let keyword_re = alternation(&config.domain.keywords)
            .map(|alt| Regex::new(&format!(r"(?i)\b(?:{})\b", alt)))
            .transpose()
            .map_err(|e| regex_error("domain.keywords", e))?;

        let mut units: Vec<&String> = config.domain.units.iter().collect();
        units.sort_by_key(|u| std::cmp::Reverse(u.chars().count()));
        let unit_alt = alternation(units);
        let unit_re = unit_alt
            .as_ref()
            .map(|alt| Regex::new(&format!(r"\d\s?(?:{})(?:[^A-Za-z]|$)", alt)))
            .transpose()
            .map_err(|e| regex_error("domain.units", e))?;
        let unit_range_re = unit_alt
            .as_ref()
            .map(|alt| Regex::new(&format!(r"{}\s?(?:{})(?:[^A-Za-z]|$)", RANGE, alt)))
            .transpose()
            .map_err(|e| regex_error("domain.units", e))?;

        Ok(Self {
            config,
            keyword_re,
            unit_re,
            unit_range_re,
        })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn domain_indicators(&self, text: &str) -> DomainIndicators {
        let word_count = count_words(text);
        DomainIndicators {
            keyword_hits: self.keyword_re.as_ref().map_or(0, |re| re.find_iter(text).count()),
            has_units: self.unit_re.as_ref().map_or(false, |re| re.is_match(text)),
            has_equation: equation_re().is_match(text),
            has_range: decimal_range_re().is_match(text)
                || self.unit_range_re.as_ref().map_or(false, |re| re.is_match(text)),
            long_form: word_count >= self.config.domain.long_form_words,
            word_count,
        }
    }

    /// Compute the composite result for one classifier response
    pub fn score(&self, result: &AIDetectionResult) -> CompositeResult {
        if result.is_error() {
            return self.fail_safe(result);
        }

        let raw = sanitize_score(result.score);
        let empty = DetectionDetail::default();
        let detail = result.detail.as_ref().unwrap_or(&empty);
        let mut reasoning: Vec<String> = Vec::new();

        let sentence = self.sentence_distribution(detail, raw, &mut reasoning);
        let readability = self.readability(detail, &mut reasoning);
        let indicators = self.domain_indicators(&detail.input_text);
        let (authenticity, density_adjustment) =
            self.content_authenticity(detail, &indicators, &mut reasoning);
        let domain = self.domain_component(&indicators);
        let domain_adjustment = self.domain_adjustment(raw, &indicators, &mut reasoning);
        let baseline = raw.max(self.config.baseline_floor);

        let mut component_scores = BTreeMap::new();
        component_scores.insert(SENTENCE_DISTRIBUTION.to_string(), sentence);
        component_scores.insert(READABILITY.to_string(), readability);
        component_scores.insert(CONTENT_AUTHENTICITY.to_string(), authenticity);
        component_scores.insert(DOMAIN.to_string(), domain);
        component_scores.insert(BASELINE.to_string(), baseline);

        let weighted: f64 = self
            .config
            .weights
            .as_pairs()
            .iter()
            .map(|(name, w)| w * component_scores.get(*name).copied().unwrap_or(raw))
            .sum();

        let composite = (weighted + domain_adjustment).clamp(0.0, 100.0);
        let composite = if composite.is_finite() { composite } else { 100.0 };

        let confidence = self.confidence(&component_scores, detail);
        let classification = self.config.thresholds.classify(composite, confidence);

        reasoning.push(format!(
            "raw={:.1} weighted={:.1} adjustment={:.1} composite={:.1}",
            raw, weighted, domain_adjustment, composite
        ));

        debug!(
            "[COMPOSITE] raw={:.1} composite={:.1} confidence={:.2} class={} indicators={}",
            raw,
            composite,
            confidence,
            classification,
            indicators.total()
        );

        let mut bias_adjustments = BTreeMap::new();
        bias_adjustments.insert("domain_adjustment".to_string(), domain_adjustment);
        bias_adjustments.insert("density_adjustment".to_string(), density_adjustment);
        bias_adjustments.insert("net_shift".to_string(), composite - raw);

        CompositeResult {
            original_score: raw,
            composite_score: composite,
            confidence,
            classification,
            component_scores,
            bias_adjustments,
            reasoning,
        }
    }

    fn fail_safe(&self, result: &AIDetectionResult) -> CompositeResult {
        let component_scores = [SENTENCE_DISTRIBUTION, READABILITY, CONTENT_AUTHENTICITY, DOMAIN, BASELINE]
            .iter()
            .map(|name| (name.to_string(), 100.0))
            .collect();

        CompositeResult {
            original_score: 100.0,
            composite_score: 100.0,
            confidence: MIN_CONFIDENCE,
            classification: Classification::Error,
            component_scores,
            bias_adjustments: BTreeMap::new(),
            reasoning: vec![format!(
                "classifier error ({}); fail-safe score kept",
                result.error.as_deref().unwrap_or("unknown")
            )],
        }
    }

    // ========================================================================
    // Components
    // ========================================================================

    fn sentence_distribution(&self, detail: &DetectionDetail, raw: f64, reasoning: &mut Vec<String>) -> f64 {
        let cfg = &self.config.sentence_distribution;
        let scores: Vec<f64> = detail
            .sentences
            .iter()
            .map(|s| s.score)
            .filter(|s| s.is_finite())
            .map(|s| s.clamp(0.0, 100.0))
            .collect();

        if scores.len() < 2 {
            reasoning.push("too few sentence scores; distribution falls back to raw score".to_string());
            return raw;
        }

        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        let extremes = scores
            .iter()
            .filter(|s| **s <= EXTREME_EPSILON || **s >= 100.0 - EXTREME_EPSILON)
            .count();
        let extreme_fraction = extremes as f64 / n;

        let mut value = 50.0;
        value -= (variance / cfg.variance_scale).min(cfg.max_variance_credit);
        value += extreme_fraction * cfg.extreme_penalty;
        if (cfg.reasonable_avg_min..=cfg.reasonable_avg_max).contains(&mean) {
            value -= cfg.average_bonus;
        }

        reasoning.push(format!(
            "sentences n={} mean={:.1} variance={:.1} extremes={:.0}%",
            scores.len(),
            mean,
            variance,
            extreme_fraction * 100.0
        ));
        value.clamp(0.0, 100.0)
    }

    fn readability(&self, detail: &DetectionDetail, reasoning: &mut Vec<String>) -> f64 {
        let Some(metric) = detail.readability.filter(|r| r.is_finite()) else {
            return self.config.readability_neutral;
        };

        let bands = &self.config.readability_bands;
        let band = bands
            .iter()
            .find(|b| metric >= b.min && metric < b.max)
            .or_else(|| {
                bands.iter().min_by(|a, b| {
                    band_distance(metric, a.min, a.max)
                        .partial_cmp(&band_distance(metric, b.min, b.max))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
            });

        match band {
            Some(b) => {
                reasoning.push(format!("readability={:.1} band=[{}, {}) -> {:.0}", metric, b.min, b.max, b.score));
                b.score
            }
            None => self.config.readability_neutral,
        }
    }

    /// Returns (component value, density adjustment applied)
    fn content_authenticity(
        &self,
        detail: &DetectionDetail,
        indicators: &DomainIndicators,
        reasoning: &mut Vec<String>,
    ) -> (f64, f64) {
        let cfg = &self.config.authenticity;
        let mut value: f64 = 50.0;

        if detail.attack.any() {
            value += cfg.attack_penalty;
            reasoning.push("adversarial pattern flagged".to_string());
        } else {
            value -= cfg.attack_free_bonus;
        }
        if detail.repetition_detected {
            value += cfg.repetition_penalty;
            reasoning.push("repetition detected".to_string());
        }
        if detail.uniform_structure {
            value += cfg.uniform_structure_penalty;
            reasoning.push("uniform sentence structure".to_string());
        }

        let density = detail
            .technical_density
            .filter(|d| d.is_finite())
            .unwrap_or_else(|| {
                if indicators.word_count == 0 {
                    0.0
                } else {
                    indicators.keyword_hits as f64 / indicators.word_count as f64
                }
            });
        let density_adjustment = self
            .config
            .density_bands
            .iter()
            .find(|b| density >= b.min && density < b.max)
            .map_or(0.0, |b| b.adjustment);
        value += density_adjustment;
        if density_adjustment != 0.0 {
            reasoning.push(format!("technical density={:.3} adjustment={:+.0}", density, density_adjustment));
        }

        (value.clamp(0.0, 100.0), density_adjustment)
    }

    fn domain_component(&self, indicators: &DomainIndicators) -> f64 {
        let cfg = &self.config.domain;
        let credit = (indicators.total() as f64 * cfg.per_indicator_credit).min(cfg.max_indicator_credit);
        (cfg.domain_base - credit).clamp(0.0, 100.0)
    }

    /// Non-positive correction for classifiers that over-penalize technical prose
    fn domain_adjustment(&self, raw: f64, indicators: &DomainIndicators, reasoning: &mut Vec<String>) -> f64 {
        let cfg = &self.config.domain;
        let count = indicators.total();
        if count == 0 || cfg.adjustment_cap == 0.0 {
            return 0.0;
        }

        if raw >= cfg.saturation_raw_score && count >= cfg.saturation_indicators {
            reasoning.push(format!(
                "dense technical text ({} indicators) with raw={:.1}; correction saturated at -{:.1}",
                count, raw, cfg.adjustment_cap
            ));
            return -cfg.adjustment_cap;
        }

        let coverage = (count as f64 / cfg.saturation_indicators as f64).min(1.0);
        let adjustment = -(cfg.adjustment_cap * coverage * (raw / 100.0) * cfg.partial_factor);
        if adjustment < 0.0 {
            reasoning.push(format!("{} domain indicators; correction {:.1}", count, adjustment));
        }
        adjustment.max(-cfg.adjustment_cap)
    }

    fn confidence(&self, components: &BTreeMap<String, f64>, detail: &DetectionDetail) -> f64 {
        let cfg = &self.config.confidence;
        let values: Vec<f64> = components.values().copied().collect();
        let n = values.len().max(1) as f64;
        let mean = values.iter().sum::<f64>() / n;
        let std_dev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();

        let mut confidence = 1.0 - std_dev / cfg.agreement_scale;
        if detail.sentences.len() >= cfg.min_sentences_for_bonus {
            confidence += cfg.detail_bonus;
        }
        if !confidence.is_finite() {
            return MIN_CONFIDENCE;
        }
        confidence.clamp(MIN_CONFIDENCE, 1.0)
    }
}

fn sanitize_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        100.0
    }
}

fn band_distance(value: f64, min: f64, max: f64) -> f64 {
    if value < min {
        min - value
    } else if value >= max {
        value - max
    } else {
        0.0
    }
}

fn alternation<I, S>(items: I) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let parts: Vec<String> = items
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty())
        .map(|s| regex::escape(&s))
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("|"))
    }
}

fn regex_error(field: &str, e: regex::Error) -> ConfigError {
    ConfigError::InvalidRange {
        field: field.to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttackFlags, SentenceScore};
    use proptest::prelude::*;

    const TECHNICAL: &str = "Laser ablation at 1064 nm removes the oxide layer from the alloy substrate. \
        Fluence between 2-4 J/cm² keeps the microstructure intact, and E = 200 GPa for the steel. \
        Thermal conductivity and hardness stay within spec after annealing.";

    fn scorer() -> CompositeScorer {
        CompositeScorer::new(ScoringConfig::default()).unwrap()
    }

    fn sentences(scores: &[f64]) -> Vec<SentenceScore> {
        scores
            .iter()
            .enumerate()
            .map(|(i, s)| SentenceScore {
                text: format!("Sentence {}.", i),
                score: *s,
            })
            .collect()
    }

    fn result(score: f64, detail: DetectionDetail) -> AIDetectionResult {
        AIDetectionResult {
            score,
            confidence: 0.8,
            classification: Classification::Unclear,
            detail: Some(detail),
            latency_ms: 10,
            provider: "test".to_string(),
            error: None,
        }
    }

    #[test]
    fn test_components_are_named() {
        let out = scorer().score(&result(50.0, DetectionDetail::default()));
        let names: Vec<&str> = out.component_scores.keys().map(|k| k.as_str()).collect();
        assert_eq!(
            names,
            vec![BASELINE, CONTENT_AUTHENTICITY, DOMAIN, READABILITY, SENTENCE_DISTRIBUTION]
        );
        assert_eq!(out.original_score, 50.0);
    }

    #[test]
    fn test_error_result_keeps_fail_safe_score() {
        let failed = AIDetectionResult::fail_safe("winston", "timeout", 30_000);
        let out = scorer().score(&failed);
        assert_eq!(out.composite_score, 100.0);
        assert_eq!(out.confidence, MIN_CONFIDENCE);
        assert_eq!(out.classification, Classification::Error);
        assert!(out.reasoning[0].contains("timeout"));
    }

    #[test]
    fn test_readability_is_non_monotonic() {
        let s = scorer();
        let mut reasons = Vec::new();
        let at = |r: f64, reasons: &mut Vec<String>| {
            s.readability(
                &DetectionDetail {
                    readability: Some(r),
                    ..DetectionDetail::default()
                },
                reasons,
            )
        };
        let complex = at(10.0, &mut reasons);
        let moderate = at(60.0, &mut reasons);
        let simple = at(95.0, &mut reasons);
        assert!(moderate < complex);
        assert!(moderate < simple);
        // Outside every band: nearest band applies
        assert_eq!(at(500.0, &mut reasons), simple);
    }

    #[test]
    fn test_extreme_sentence_scores_penalized() {
        let s = scorer();
        let mut reasons = Vec::new();
        let natural = DetectionDetail {
            sentences: sentences(&[35.0, 60.0, 20.0, 55.0, 45.0]),
            ..DetectionDetail::default()
        };
        let polarized = DetectionDetail {
            sentences: sentences(&[100.0, 100.0, 100.0, 0.0, 100.0]),
            ..DetectionDetail::default()
        };
        let natural_score = s.sentence_distribution(&natural, 50.0, &mut reasons);
        let polarized_score = s.sentence_distribution(&polarized, 50.0, &mut reasons);
        assert!(natural_score < polarized_score);
    }

    #[test]
    fn test_single_sentence_falls_back_to_raw() {
        let s = scorer();
        let mut reasons = Vec::new();
        let detail = DetectionDetail {
            sentences: sentences(&[12.0]),
            ..DetectionDetail::default()
        };
        assert_eq!(s.sentence_distribution(&detail, 73.0, &mut reasons), 73.0);
    }

    #[test]
    fn test_density_sweet_spot_scores_best() {
        let s = scorer();
        let indicators = DomainIndicators::default();
        let mut reasons = Vec::new();
        let at = |d: f64, reasons: &mut Vec<String>| {
            s.content_authenticity(
                &DetectionDetail {
                    technical_density: Some(d),
                    ..DetectionDetail::default()
                },
                &indicators,
                reasons,
            )
            .0
        };
        let sparse = at(0.005, &mut reasons);
        let sweet = at(0.05, &mut reasons);
        let dense = at(0.3, &mut reasons);
        assert!(sweet < sparse);
        assert!(sweet < dense);
    }

    #[test]
    fn test_attack_and_repetition_penalized() {
        let s = scorer();
        let indicators = DomainIndicators::default();
        let mut reasons = Vec::new();
        let clean = s
            .content_authenticity(&DetectionDetail::default(), &indicators, &mut reasons)
            .0;
        let flagged = s
            .content_authenticity(
                &DetectionDetail {
                    attack: AttackFlags {
                        zero_width_space: true,
                        homoglyph: false,
                    },
                    repetition_detected: true,
                    ..DetectionDetail::default()
                },
                &indicators,
                &mut reasons,
            )
            .0;
        assert!(flagged > clean);
    }

    #[test]
    fn test_domain_indicators_detected() {
        let indicators = scorer().domain_indicators(TECHNICAL);
        assert!(indicators.keyword_hits >= 8);
        assert!(indicators.has_units);
        assert!(indicators.has_equation);
        assert!(indicators.has_range);
        assert!(!indicators.long_form);

        let plain = scorer().domain_indicators("We went to the beach and had a lovely day.");
        assert_eq!(plain.total(), 0);
    }

    #[test]
    fn test_ranges_need_unit_or_decimal() {
        let s = scorer();
        assert!(!s.domain_indicators("The program ran from 2020-2021 under part 4410-220.").has_range);
        assert!(s.domain_indicators("Pulses of 10-20 ns were used.").has_range);
        assert!(s.domain_indicators("Roughness fell from 0.8 to 1.2 after polishing.").has_range);
        assert!(s.domain_indicators("Porosity stayed at 5-8% throughout.").has_range);
    }

    #[test]
    fn test_domain_correction_saturates_for_dense_technical_text() {
        let s = scorer();
        let cap = s.config().domain.adjustment_cap;
        let detail = DetectionDetail {
            input_text: TECHNICAL.to_string(),
            ..DetectionDetail::default()
        };
        let high = s.score(&result(92.0, detail.clone()));
        assert_eq!(high.bias_adjustments["domain_adjustment"], -cap);

        let low = s.score(&result(40.0, detail));
        let partial = low.bias_adjustments["domain_adjustment"];
        assert!(partial < 0.0 && partial > -cap);
    }

    #[test]
    fn test_technical_text_scores_below_raw() {
        let s = scorer();
        let detail = DetectionDetail {
            sentences: sentences(&[70.0, 40.0, 85.0]),
            readability: Some(45.0),
            input_text: TECHNICAL.to_string(),
            ..DetectionDetail::default()
        };
        let out = s.score(&result(88.0, detail));
        assert!(out.composite_score < 88.0);
        assert!(out.bias_adjustments["net_shift"] < 0.0);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let s = scorer();
        let detail = DetectionDetail {
            sentences: sentences(&[10.0, 80.0, 50.0, 0.0]),
            readability: Some(62.0),
            repetition_detected: true,
            input_text: TECHNICAL.to_string(),
            ..DetectionDetail::default()
        };
        let input = result(66.0, detail);
        assert_eq!(s.score(&input), s.score(&input));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ScoringConfig::default();
        config.weights.domain = 0.9;
        assert!(CompositeScorer::new(config).is_err());
    }

    fn detail_strategy() -> impl Strategy<Value = (f64, DetectionDetail)> {
        (
            0.0f64..=100.0,
            prop::collection::vec(0.0f64..=100.0, 0..12),
            prop::option::of(-60.0f64..160.0),
            prop::option::of(0.0f64..1.0),
            any::<(bool, bool, bool, bool)>(),
            "[a-zA-Z0-9 .=%-]{0,300}",
        )
            .prop_map(|(raw, scores, readability, density, flags, text)| {
                let (zw, homoglyph, repetition, uniform) = flags;
                (
                    raw,
                    DetectionDetail {
                        sentences: sentences(&scores),
                        readability,
                        attack: AttackFlags {
                            zero_width_space: zw,
                            homoglyph,
                        },
                        repetition_detected: repetition,
                        uniform_structure: uniform,
                        technical_density: density,
                        input_text: text,
                    },
                )
            })
    }

    proptest! {
        #[test]
        fn composite_and_confidence_stay_in_range((raw, detail) in detail_strategy()) {
            let out = scorer().score(&result(raw, detail));
            prop_assert!((0.0..=100.0).contains(&out.composite_score));
            prop_assert!((0.1..=1.0).contains(&out.confidence));
            prop_assert_eq!(out.component_scores.len(), 5);
        }

        #[test]
        fn identical_detail_gives_identical_score((raw, detail) in detail_strategy()) {
            let s = scorer();
            let input = result(raw, detail);
            prop_assert_eq!(s.score(&input).composite_score, s.score(&input).composite_score);
        }

        #[test]
        fn custom_weights_keep_range(
            w in prop::collection::vec(0.01f64..1.0, 5),
            (raw, detail) in detail_strategy(),
        ) {
            let sum: f64 = w.iter().sum();
            let mut config = ScoringConfig::default();
            config.weights.sentence_distribution = w[0] / sum;
            config.weights.readability = w[1] / sum;
            config.weights.content_authenticity = w[2] / sum;
            config.weights.domain = w[3] / sum;
            config.weights.baseline = w[4] / sum;
            let s = CompositeScorer::new(config).unwrap();
            let out = s.score(&result(raw, detail));
            prop_assert!((0.0..=100.0).contains(&out.composite_score));
            prop_assert!((0.1..=1.0).contains(&out.confidence));
        }
    }
}
