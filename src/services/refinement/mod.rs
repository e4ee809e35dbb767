// Refinement Module
// Iterative rewrite loop driven by classifier scores
//
// Modules:
// - composite: bias-corrected composite score from detailed classifier signals
// - strategies: registry of candidate rewrites (regenerate and local)
// - generator: content generator collaborator used by regenerate strategies
// - controller: state machine that runs passes until target, budget, or exhaustion

pub mod composite;
pub mod controller;
pub mod generator;
pub mod strategies;

pub use composite::{CompositeScorer, DomainIndicators};
pub use controller::RefinementController;
pub use generator::{build_prompt, ChatCompletionGenerator, ContentGenerator, GeneratorError};
pub use strategies::{
    LocalRewriteStrategy, RegenerateStrategy, Strategy, StrategyCandidate, StrategyContext, StrategyError,
    StrategyOutcome, StrategyRegistry,
};
