// Strategy Registry
// Ordered candidate rewrites explored once per refinement pass.
// - Regenerate strategies ask the content generator for a rewrite with extra directives
// - Local strategies rewrite the string directly (contractions, conversational phrasing)
// Each strategy carries a `requires_generator` tag so incompatible ones are skipped.

use crate::models::{CompositeResult, GenerationRequest, RefinementContext};
use crate::services::text_processor::preview;
use async_trait::async_trait;
use futures::FutureExt;
use regex::{Captures, Regex};
use serde_json::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use super::generator::ContentGenerator;

pub const EMPHASIZE_VOICE: &str = "emphasize_voice";
pub const INJECT_IMPERFECTION: &str = "inject_imperfection";
pub const CONVERSATIONAL_PHRASING: &str = "conversational_phrasing";
pub const CONTRACTIONS: &str = "contractions";

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("content is empty")]
    EmptyInput,
    #[error("no content generator configured")]
    GeneratorUnavailable,
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    #[error("{0}")]
    Internal(String),
}

/// Inputs shared by every strategy in one pass
pub struct StrategyContext<'a> {
    pub refinement: &'a RefinementContext,
    pub generator: Option<&'a dyn ContentGenerator>,
    pub iteration: usize,
    pub last_score: Option<&'a CompositeResult>,
}

#[derive(Debug, Clone, Default)]
pub struct StrategyCandidate {
    pub content: String,
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    pub strategy: String,
    pub candidate: String,
    pub metadata: BTreeMap<String, Value>,
    pub errored: bool,
    pub error: Option<String>,
    pub latency_ms: i64,
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn requires_generator(&self) -> bool;

    async fn apply(&self, content: &str, ctx: &StrategyContext<'_>) -> Result<StrategyCandidate, StrategyError>;
}

// ============ Regenerate Strategies ============

pub struct RegenerateStrategy {
    name: String,
    directives: Vec<String>,
}

impl RegenerateStrategy {
    pub fn new(name: impl Into<String>, directives: Vec<String>) -> Self {
        Self {
            name: name.into(),
            directives,
        }
    }

    pub fn emphasize_voice() -> Self {
        Self::new(
            EMPHASIZE_VOICE,
            vec![
                "Write in the author's own voice, drawing on their country and hands-on experience".to_string(),
                "Prefer concrete observations from the shop floor over generic claims".to_string(),
                "Vary sentence length; mix short remarks with longer explanations".to_string(),
            ],
        )
    }

    pub fn inject_imperfection() -> Self {
        Self::new(
            INJECT_IMPERFECTION,
            vec![
                "Allow small natural imperfections: an aside, a hedge, a sentence that starts with 'And' or 'But'".to_string(),
                "Avoid symmetric lists and perfectly parallel sentence structure".to_string(),
                "Keep all technical values exactly as written".to_string(),
            ],
        )
    }

    /// Directives plus hints taken from the last composite result
    fn directives_for(&self, last_score: Option<&CompositeResult>) -> Vec<String> {
        let mut directives = self.directives.clone();
        if let Some(score) = last_score {
            if score.reasoning.iter().any(|r| r.contains("uniform sentence structure")) {
                directives.push("Break up the uniform sentence rhythm".to_string());
            }
            if score.reasoning.iter().any(|r| r.contains("repetition detected")) {
                directives.push("Remove repeated phrases".to_string());
            }
        }
        directives
    }
}

#[async_trait]
impl Strategy for RegenerateStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn requires_generator(&self) -> bool {
        true
    }

    async fn apply(&self, content: &str, ctx: &StrategyContext<'_>) -> Result<StrategyCandidate, StrategyError> {
        if content.trim().is_empty() {
            return Err(StrategyError::EmptyInput);
        }
        let generator = ctx.generator.ok_or(StrategyError::GeneratorUnavailable)?;

        let directives = self.directives_for(ctx.last_score);
        let request = GenerationRequest {
            material: ctx.refinement.material.clone(),
            material_data: ctx.refinement.material_data.clone(),
            author_info: ctx.refinement.author_info.clone(),
            current_content: content.to_string(),
            directives,
        };

        let outcome = generator.generate(&request).await;
        if !outcome.success {
            return Err(StrategyError::GenerationFailed(outcome.error_message));
        }
        if outcome.content.trim().is_empty() {
            return Err(StrategyError::GenerationFailed("generator returned empty content".to_string()));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("directives".to_string(), Value::from(request.directives.len()));
        metadata.insert("iteration".to_string(), Value::from(ctx.iteration));
        Ok(StrategyCandidate {
            content: outcome.content,
            metadata,
        })
    }
}

// ============ Local Strategies ============

pub struct RewriteRule {
    pattern: Regex,
    replacement: &'static str,
}

impl RewriteRule {
    fn new(pattern: &str, replacement: &'static str) -> Self {
        Self {
            pattern: Regex::new(&format!(r"(?i)\b{}\b", pattern)).expect("rewrite rule regex"),
            replacement,
        }
    }
}

fn contraction_rules() -> &'static [RewriteRule] {
    static RULES: OnceLock<Vec<RewriteRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            RewriteRule::new("do not", "don't"),
            RewriteRule::new("does not", "doesn't"),
            RewriteRule::new("did not", "didn't"),
            RewriteRule::new("is not", "isn't"),
            RewriteRule::new("are not", "aren't"),
            RewriteRule::new("was not", "wasn't"),
            RewriteRule::new("cannot", "can't"),
            RewriteRule::new("can not", "can't"),
            RewriteRule::new("will not", "won't"),
            RewriteRule::new("would not", "wouldn't"),
            RewriteRule::new("should not", "shouldn't"),
            RewriteRule::new("has not", "hasn't"),
            RewriteRule::new("have not", "haven't"),
            RewriteRule::new("it is", "it's"),
            RewriteRule::new("that is", "that's"),
            RewriteRule::new("there is", "there's"),
            RewriteRule::new("we are", "we're"),
            RewriteRule::new("they are", "they're"),
            RewriteRule::new("you are", "you're"),
        ]
    })
}

fn conversational_rules() -> &'static [RewriteRule] {
    static RULES: OnceLock<Vec<RewriteRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        vec![
            RewriteRule::new("it is important to note that", "note that"),
            RewriteRule::new("in order to", "to"),
            RewriteRule::new("utilizes", "uses"),
            RewriteRule::new("utilize", "use"),
            RewriteRule::new("utilization", "use"),
            RewriteRule::new("furthermore", "plus"),
            RewriteRule::new("moreover", "what's more"),
            RewriteRule::new("additionally", "also"),
            RewriteRule::new("approximately", "about"),
            RewriteRule::new("commence", "start"),
            RewriteRule::new("facilitate", "help"),
            RewriteRule::new("demonstrates", "shows"),
            RewriteRule::new("a wide range of", "all kinds of"),
            RewriteRule::new("prior to", "before"),
            RewriteRule::new("in addition", "on top of that"),
        ]
    })
}

fn match_case(matched: &str, replacement: &str) -> String {
    let starts_upper = matched.chars().next().map_or(false, |c| c.is_uppercase());
    if !starts_upper {
        return replacement.to_string();
    }
    let mut chars = replacement.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Apply rules in order; returns rewritten text and replacement count
pub fn apply_rules(text: &str, rules: &[RewriteRule]) -> (String, usize) {
    let mut out = text.to_string();
    let mut replacements = 0;
    for rule in rules {
        let hits = rule.pattern.find_iter(&out).count();
        if hits == 0 {
            continue;
        }
        replacements += hits;
        out = rule
            .pattern
            .replace_all(&out, |caps: &Captures| match_case(&caps[0], rule.replacement))
            .into_owned();
    }
    (out, replacements)
}

pub struct LocalRewriteStrategy {
    name: &'static str,
    rules: fn() -> &'static [RewriteRule],
}

impl LocalRewriteStrategy {
    pub fn contractions() -> Self {
        Self {
            name: CONTRACTIONS,
            rules: contraction_rules,
        }
    }

    pub fn conversational_phrasing() -> Self {
        Self {
            name: CONVERSATIONAL_PHRASING,
            rules: conversational_rules,
        }
    }
}

#[async_trait]
impl Strategy for LocalRewriteStrategy {
    fn name(&self) -> &str {
        self.name
    }

    fn requires_generator(&self) -> bool {
        false
    }

    async fn apply(&self, content: &str, _ctx: &StrategyContext<'_>) -> Result<StrategyCandidate, StrategyError> {
        if content.trim().is_empty() {
            return Err(StrategyError::EmptyInput);
        }
        let (rewritten, replacements) = apply_rules(content, (self.rules)());

        let mut metadata = BTreeMap::new();
        metadata.insert("replacements".to_string(), Value::from(replacements));
        Ok(StrategyCandidate {
            content: rewritten,
            metadata,
        })
    }
}

// ============ Registry ============

#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Regenerate strategies first, then local rewrites
    pub fn standard() -> Self {
        Self::new()
            .with(Arc::new(RegenerateStrategy::emphasize_voice()))
            .with(Arc::new(RegenerateStrategy::inject_imperfection()))
            .with(Arc::new(LocalRewriteStrategy::conversational_phrasing()))
            .with(Arc::new(LocalRewriteStrategy::contractions()))
    }

    pub fn with(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.register(strategy);
        self
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) {
        if self.strategies.iter().any(|s| s.name() == strategy.name()) {
            warn!("[STRATEGY] duplicate strategy name '{}' registered", strategy.name());
        }
        self.strategies.push(strategy);
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Strategies whose capability tag is satisfied, in registration order
    pub fn applicable(&self, generator_available: bool) -> Vec<Arc<dyn Strategy>> {
        self.strategies
            .iter()
            .filter(|s| generator_available || !s.requires_generator())
            .cloned()
            .collect()
    }

    /// Run one strategy. Failures and panics come back as `errored` with the content unchanged.
    pub async fn run(strategy: &dyn Strategy, content: &str, ctx: &StrategyContext<'_>) -> StrategyOutcome {
        let start = Instant::now();
        let result = match AssertUnwindSafe(strategy.apply(content, ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(StrategyError::Internal(format!("panicked: {}", panic_message(panic.as_ref())))),
        };
        let latency_ms = start.elapsed().as_millis() as i64;

        match result {
            Ok(candidate) => {
                debug!(
                    "[STRATEGY] {} ok latency_ms={} candidate={}",
                    strategy.name(),
                    latency_ms,
                    preview(&candidate.content, 60)
                );
                StrategyOutcome {
                    strategy: strategy.name().to_string(),
                    candidate: candidate.content,
                    metadata: candidate.metadata,
                    errored: false,
                    error: None,
                    latency_ms,
                }
            }
            Err(e) => {
                warn!("[STRATEGY] {} errored after {}ms: {}", strategy.name(), latency_ms, e);
                StrategyOutcome {
                    strategy: strategy.name().to_string(),
                    candidate: content.to_string(),
                    metadata: BTreeMap::new(),
                    errored: true,
                    error: Some(e.to_string()),
                    latency_ms,
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::GenerationOutcome;

    struct EchoGenerator {
        suffix: &'static str,
    }

    #[async_trait]
    impl ContentGenerator for EchoGenerator {
        async fn generate(&self, request: &GenerationRequest) -> GenerationOutcome {
            GenerationOutcome::ok(format!("{}{}", request.current_content, self.suffix))
        }
    }

    struct BrokenGenerator;

    #[async_trait]
    impl ContentGenerator for BrokenGenerator {
        async fn generate(&self, _request: &GenerationRequest) -> GenerationOutcome {
            GenerationOutcome::failed("rate limited")
        }
    }

    fn ctx<'a>(refinement: &'a RefinementContext, generator: Option<&'a dyn ContentGenerator>) -> StrategyContext<'a> {
        StrategyContext {
            refinement,
            generator,
            iteration: 1,
            last_score: None,
        }
    }

    #[test]
    fn test_contractions_preserve_case() {
        let (out, n) = apply_rules("It is clean. We do not sand it. Cannot fail.", contraction_rules());
        assert_eq!(out, "It's clean. We don't sand it. Can't fail.");
        assert_eq!(n, 3);
    }

    #[test]
    fn test_conversational_phrasing() {
        let (out, n) = apply_rules(
            "Furthermore, we utilize a laser in order to remove approximately 5 μm.",
            conversational_rules(),
        );
        assert_eq!(out, "Plus, we use a laser to remove about 5 μm.");
        assert_eq!(n, 4);
    }

    #[test]
    fn test_rules_respect_word_boundaries() {
        let (out, n) = apply_rules("Visit the island; this isn't changed.", contraction_rules());
        assert_eq!(n, 0);
        assert_eq!(out, "Visit the island; this isn't changed.");
    }

    #[tokio::test]
    async fn test_local_strategy_is_deterministic() {
        let refinement = RefinementContext::default();
        let strategy = LocalRewriteStrategy::contractions();
        let text = "It is what it is, and we are fine.";
        let a = strategy.apply(text, &ctx(&refinement, None)).await.unwrap();
        let b = strategy.apply(text, &ctx(&refinement, None)).await.unwrap();
        assert_eq!(a.content, b.content);
        assert_eq!(a.content, "It's what it's, and we're fine.");
        assert_eq!(a.metadata["replacements"], Value::from(3));
    }

    #[tokio::test]
    async fn test_local_strategy_rejects_empty_input() {
        let refinement = RefinementContext::default();
        let outcome = StrategyRegistry::run(&LocalRewriteStrategy::contractions(), "  ", &ctx(&refinement, None)).await;
        assert!(outcome.errored);
        assert_eq!(outcome.candidate, "  ");
    }

    #[tokio::test]
    async fn test_regenerate_without_generator_errors_unchanged() {
        let refinement = RefinementContext::default();
        let strategy = RegenerateStrategy::emphasize_voice();
        let outcome = StrategyRegistry::run(&strategy, "Original text.", &ctx(&refinement, None)).await;
        assert!(outcome.errored);
        assert_eq!(outcome.candidate, "Original text.");
        assert!(outcome.error.unwrap().contains("no content generator"));
    }

    #[tokio::test]
    async fn test_regenerate_uses_generator() {
        let refinement = RefinementContext {
            material: "Copper".to_string(),
            ..RefinementContext::default()
        };
        let generator = EchoGenerator { suffix: " Honestly." };
        let strategy = RegenerateStrategy::inject_imperfection();
        let outcome = StrategyRegistry::run(&strategy, "Copper is soft.", &ctx(&refinement, Some(&generator))).await;
        assert!(!outcome.errored);
        assert_eq!(outcome.candidate, "Copper is soft. Honestly.");
        assert_eq!(outcome.metadata["directives"], Value::from(3));
    }

    #[tokio::test]
    async fn test_generator_failure_is_contained() {
        let refinement = RefinementContext::default();
        let generator = BrokenGenerator;
        let outcome = StrategyRegistry::run(
            &RegenerateStrategy::emphasize_voice(),
            "Text.",
            &ctx(&refinement, Some(&generator)),
        )
        .await;
        assert!(outcome.errored);
        assert!(outcome.error.unwrap().contains("rate limited"));
    }

    struct PanickingStrategy;

    #[async_trait]
    impl Strategy for PanickingStrategy {
        fn name(&self) -> &str {
            "panicking"
        }

        fn requires_generator(&self) -> bool {
            false
        }

        async fn apply(&self, _content: &str, _ctx: &StrategyContext<'_>) -> Result<StrategyCandidate, StrategyError> {
            let empty: Vec<String> = Vec::new();
            let index = empty.len() + 3;
            Ok(StrategyCandidate {
                content: empty[index].clone(),
                ..StrategyCandidate::default()
            })
        }
    }

    #[tokio::test]
    async fn test_panicking_strategy_is_contained() {
        let refinement = RefinementContext::default();
        let outcome = StrategyRegistry::run(&PanickingStrategy, "Original text.", &ctx(&refinement, None)).await;
        assert!(outcome.errored);
        assert_eq!(outcome.candidate, "Original text.");
        let error = outcome.error.unwrap();
        assert!(error.contains("panicked"));
        assert!(error.contains("index out of bounds"));
    }

    #[test]
    fn test_directives_follow_last_score() {
        let strategy = RegenerateStrategy::emphasize_voice();
        let last = CompositeResult {
            original_score: 80.0,
            composite_score: 70.0,
            confidence: 0.5,
            classification: crate::models::Classification::Ai,
            component_scores: BTreeMap::new(),
            bias_adjustments: BTreeMap::new(),
            reasoning: vec!["uniform sentence structure".to_string()],
        };
        let directives = strategy.directives_for(Some(&last));
        assert_eq!(directives.len(), 4);
        assert!(directives[3].contains("rhythm"));
    }

    #[test]
    fn test_standard_registry_order_and_capabilities() {
        let registry = StrategyRegistry::standard();
        assert_eq!(
            registry.names(),
            vec![EMPHASIZE_VOICE, INJECT_IMPERFECTION, CONVERSATIONAL_PHRASING, CONTRACTIONS]
        );
        let local_only: Vec<String> = registry
            .applicable(false)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(local_only, vec![CONVERSATIONAL_PHRASING, CONTRACTIONS]);
        assert_eq!(registry.applicable(true).len(), 4);
    }
}
