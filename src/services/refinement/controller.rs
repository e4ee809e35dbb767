// Iteration Controller
// Drives one content item through score -> rewrite -> re-score passes.
//
// State machine:
//   Initial -> Analyzing -> TargetMet
//                        -> TryingStrategies -> Improved -> Analyzing
//                                            -> Exhausted
// The returned content is always the best accepted content of the run.

use crate::models::{
    AIDetectionResult, CompositeResult, ExhaustReason, IterationRecord, RefinementContext, RefinementOutcome,
    Termination,
};
use crate::services::classifier::Classifier;
use crate::services::config_store::{ConfigError, RefinementConfig};
use crate::services::text_processor::preview;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::composite::CompositeScorer;
use super::generator::ContentGenerator;
use super::strategies::{StrategyContext, StrategyRegistry};

/// A scored piece of content
#[derive(Debug, Clone)]
struct Scored {
    content: String,
    score: f64,
    /// Canonical classifier score before composite correction
    raw: f64,
    composite: Option<CompositeResult>,
}

/// Winning candidate of one pass
#[derive(Debug, Clone)]
struct Candidate {
    strategy: String,
    scored: Scored,
}

#[derive(Debug)]
enum RefinementState {
    Initial,
    Analyzing,
    TryingStrategies,
    Improved(Candidate),
    Rejected(Candidate),
    Done(Termination),
}

pub struct RefinementController<C: Classifier> {
    classifier: C,
    registry: StrategyRegistry,
    generator: Option<Arc<dyn ContentGenerator>>,
    scorer: CompositeScorer,
    config: RefinementConfig,
}

impl<C: Classifier> RefinementController<C> {
    pub fn new(
        classifier: C,
        registry: StrategyRegistry,
        generator: Option<Arc<dyn ContentGenerator>>,
        config: RefinementConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let scorer = CompositeScorer::new(config.scoring.clone())?;
        Ok(Self {
            classifier,
            registry,
            generator,
            scorer,
            config,
        })
    }

    pub fn config(&self) -> &RefinementConfig {
        &self.config
    }

    /// Score one text. Classifier errors always come back as 100.
    async fn evaluate(&self, content: &str) -> Scored {
        let result = self.classifier.analyze(content).await;
        let composite = if self.config.scoring.enabled {
            Some(self.scorer.score(&result))
        } else {
            None
        };

        Scored {
            content: content.to_string(),
            score: self.effective_score(&result, composite.as_ref()),
            raw: raw_score(&result),
            composite,
        }
    }

    /// The classifier's own score counts for the target even when the composite is higher
    fn meets_target(&self, scored: &Scored) -> bool {
        scored.score <= self.config.target_score || scored.raw <= self.config.target_score
    }

    fn effective_score(&self, result: &AIDetectionResult, composite: Option<&CompositeResult>) -> f64 {
        if result.is_error() || !result.score.is_finite() {
            return 100.0;
        }
        match composite {
            Some(c) if result.detail.is_some() => c.composite_score,
            _ => raw_score(result),
        }
    }

    fn record(index: usize, scored: &Scored, strategy: Option<&str>, improvement: f64, accepted: bool) -> IterationRecord {
        IterationRecord {
            index,
            content: scored.content.clone(),
            score: scored.score,
            strategy: strategy.map(|s| s.to_string()),
            improvement,
            accepted,
            timestamp: Utc::now(),
            composite: scored.composite.clone(),
        }
    }

    /// Run every applicable strategy once and keep the lowest-scoring candidate.
    /// Returns (best candidate, strategies invoked, all errored).
    async fn try_strategies(
        &self,
        current: &Scored,
        refinement: &RefinementContext,
        iteration: usize,
    ) -> (Option<Candidate>, usize, bool) {
        let strategies = self.registry.applicable(self.generator.is_some());
        let ctx = StrategyContext {
            refinement,
            generator: self.generator.as_deref(),
            iteration,
            last_score: current.composite.as_ref(),
        };

        let mut best: Option<Candidate> = None;
        let mut invoked = 0;
        let mut errored = 0;

        for strategy in &strategies {
            invoked += 1;
            let outcome = StrategyRegistry::run(strategy.as_ref(), &current.content, &ctx).await;
            if outcome.errored {
                errored += 1;
                continue;
            }
            if outcome.candidate == current.content {
                debug!("[REFINE] {} produced no change, skipping", outcome.strategy);
                continue;
            }

            let scored = self.evaluate(&outcome.candidate).await;
            info!(
                "[REFINE] iteration={} strategy={} candidate_score={:.1} current={:.1}",
                iteration, outcome.strategy, scored.score, current.score
            );

            let better = best.as_ref().map_or(true, |b| scored.score < b.scored.score);
            if better {
                best = Some(Candidate {
                    strategy: outcome.strategy,
                    scored,
                });
            }
        }

        (best, invoked, invoked > 0 && errored == invoked)
    }

    pub async fn refine(&self, seed: &str, refinement: &RefinementContext) -> RefinementOutcome {
        let run_id = Uuid::new_v4();
        let mut history: Vec<IterationRecord> = Vec::new();
        let mut strategies_invoked = 0;
        let mut accepted_passes = 0;
        let mut current = Scored {
            content: seed.to_string(),
            score: 100.0,
            raw: 100.0,
            composite: None,
        };
        let mut baseline_score = 100.0;
        let mut state = RefinementState::Initial;

        info!(
            "[REFINE] run={} material={} target={:.1} max_iterations={} classifier={}",
            run_id,
            refinement.material,
            self.config.target_score,
            self.config.max_iterations,
            self.classifier.name()
        );

        let termination = loop {
            state = match state {
                RefinementState::Initial => {
                    current = self.evaluate(seed).await;
                    baseline_score = current.score;
                    history.push(Self::record(history.len(), &current, None, 0.0, true));
                    info!("[REFINE] run={} baseline score={:.1}", run_id, baseline_score);
                    RefinementState::Analyzing
                }
                RefinementState::Analyzing => {
                    if self.meets_target(&current) {
                        RefinementState::Done(Termination::TargetMet)
                    } else if accepted_passes >= self.config.max_iterations {
                        RefinementState::Done(Termination::Exhausted(ExhaustReason::BudgetSpent))
                    } else if self.registry.applicable(self.generator.is_some()).is_empty() {
                        RefinementState::Done(Termination::Exhausted(ExhaustReason::NoStrategies))
                    } else {
                        RefinementState::TryingStrategies
                    }
                }
                RefinementState::TryingStrategies => {
                    let iteration = history.len();
                    let (best, invoked, all_errored) = self.try_strategies(&current, refinement, iteration).await;
                    strategies_invoked += invoked;

                    match best {
                        Some(candidate) if current.score - candidate.scored.score >= self.config.improvement_threshold => {
                            RefinementState::Improved(candidate)
                        }
                        Some(candidate) => RefinementState::Rejected(candidate),
                        None if all_errored => {
                            warn!("[REFINE] run={} iteration={} every strategy errored", run_id, iteration);
                            RefinementState::Done(Termination::Exhausted(ExhaustReason::AllStrategiesErrored))
                        }
                        None => {
                            debug!("[REFINE] run={} iteration={} no usable candidate", run_id, iteration);
                            RefinementState::Done(Termination::Exhausted(ExhaustReason::BelowImprovementThreshold))
                        }
                    }
                }
                RefinementState::Improved(candidate) => {
                    let improvement = current.score - candidate.scored.score;
                    info!(
                        "[REFINE] run={} accepted {} {:.1} -> {:.1} ({})",
                        run_id,
                        candidate.strategy,
                        current.score,
                        candidate.scored.score,
                        preview(&candidate.scored.content, 60)
                    );
                    history.push(Self::record(
                        history.len(),
                        &candidate.scored,
                        Some(&candidate.strategy),
                        improvement,
                        true,
                    ));
                    current = candidate.scored;
                    accepted_passes += 1;
                    RefinementState::Analyzing
                }
                RefinementState::Rejected(candidate) => {
                    let improvement = current.score - candidate.scored.score;
                    info!(
                        "[REFINE] run={} best candidate {} scored {:.1}, improvement {:.1} below threshold {:.1}",
                        run_id, candidate.strategy, candidate.scored.score, improvement, self.config.improvement_threshold
                    );
                    history.push(Self::record(
                        history.len(),
                        &candidate.scored,
                        Some(&candidate.strategy),
                        improvement,
                        false,
                    ));
                    RefinementState::Done(Termination::Exhausted(ExhaustReason::BelowImprovementThreshold))
                }
                RefinementState::Done(termination) => break termination,
            };
        };

        info!(
            "[REFINE] run={} finished: {:?} score {:.1} -> {:.1}, {} records, {} strategy runs",
            run_id,
            termination,
            baseline_score,
            current.score,
            history.len(),
            strategies_invoked
        );

        RefinementOutcome {
            run_id,
            content: current.content,
            score: current.score,
            baseline_score,
            termination,
            history,
            strategies_invoked,
        }
    }
}

fn raw_score(result: &AIDetectionResult) -> f64 {
    if result.is_error() || !result.score.is_finite() {
        100.0
    } else {
        result.score.clamp(0.0, 100.0)
    }
}
