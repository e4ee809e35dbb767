// Content Refiner Core Services

pub mod text_processor;
pub mod config_store;
pub mod classifier;
pub mod refinement;

pub use text_processor::*;
pub use config_store::*;
pub use classifier::{Classifier, ClassifierError, ClassifierProvider, HttpClassifier};

pub use refinement::{
    CompositeScorer,
    ContentGenerator,
    ChatCompletionGenerator,
    RefinementController,
    Strategy,
    StrategyRegistry,
};
