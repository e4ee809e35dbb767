use anyhow::{bail, Context};
use content_refiner::models::{AuthorInfo, RefinementContext};
use content_refiner::services::classifier::{get_api_key, HttpClassifier};
use content_refiner::services::config_store::ConfigStore;
use content_refiner::services::refinement::{ChatCompletionGenerator, ContentGenerator, RefinementController, StrategyRegistry};
use content_refiner::services::text_processor::preview;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

const USAGE: &str = "Usage:
  cargo run --bin refine_text -- <path.txt> [--material <name>] [--author <name>] [--country <name>]
                                 [--provider <winston|sapling>] [--target <score>] [--max-iterations <n>]
                                 [--config-dir <dir>] [--no-composite] [--out <json_path>]

Notes:
  - Classifier keys come from CONTENT_REFINER_<PROVIDER>_API_KEY, <PROVIDER>_API_KEY, or config.json.
  - Regenerate strategies run only when config.json has a `generator` section and a generator key.";

fn parse_arg_value(args: &[String], key: &str) -> Option<String> {
    args.iter()
        .position(|a| a == key)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn has_flag(args: &[String], key: &str) -> bool {
    args.iter().any(|a| a == key)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || has_flag(&args, "--help") {
        eprintln!("{}", USAGE);
        return Ok(());
    }

    content_refiner::init_logging();

    let path = args[1].clone();
    let seed = std::fs::read_to_string(&path).with_context(|| format!("read file failed: {}", path))?;
    if seed.trim().is_empty() {
        bail!("{} is empty", path);
    }

    let config_dir = match parse_arg_value(&args, "--config-dir") {
        Some(dir) => PathBuf::from(dir),
        None => ConfigStore::default_config_dir().context("no config directory available")?,
    };
    let store = ConfigStore::new(config_dir);
    let mut config = store
        .load()
        .with_context(|| format!("load config failed: {}", store.config_file().display()))?;

    if let Some(provider) = parse_arg_value(&args, "--provider") {
        config.classifier.provider = provider;
    }
    if let Some(target) = parse_arg_value(&args, "--target") {
        config.refinement.target_score = target.parse().context("--target must be a number")?;
    }
    if let Some(max) = parse_arg_value(&args, "--max-iterations") {
        config.refinement.max_iterations = max.parse().context("--max-iterations must be an integer")?;
    }
    if has_flag(&args, "--no-composite") {
        config.refinement.scoring.enabled = false;
    }

    let classifier = HttpClassifier::from_config(&config.classifier)?
        .with_thresholds(config.refinement.scoring.thresholds);

    let generator: Option<Arc<dyn ContentGenerator>> = match config.generator.clone() {
        Some(generator_config) => match get_api_key("generator") {
            Some(key) => Some(Arc::new(ChatCompletionGenerator::new(generator_config, key)?)),
            None => {
                warn!("Generator configured but no generator API key found; regenerate strategies disabled");
                None
            }
        },
        None => None,
    };

    let context = RefinementContext {
        material: parse_arg_value(&args, "--material").unwrap_or_else(|| "General".to_string()),
        material_data: serde_json::Value::Null,
        author_info: AuthorInfo {
            name: parse_arg_value(&args, "--author").unwrap_or_default(),
            country: parse_arg_value(&args, "--country"),
            expertise: None,
        },
    };

    println!("File: {}", path);
    println!("Words: {}", content_refiner::services::text_processor::count_words(&seed));
    println!("Classifier: {}", config.classifier.provider);
    println!("Generator: {}", if generator.is_some() { "on" } else { "off" });
    println!(
        "Target: {:.1}  Max iterations: {}  Composite: {}",
        config.refinement.target_score,
        config.refinement.max_iterations,
        if config.refinement.scoring.enabled { "on" } else { "off" }
    );
    println!();

    let controller = RefinementController::new(classifier, StrategyRegistry::standard(), generator, config.refinement)?;
    let outcome = controller.refine(&seed, &context).await;

    for record in &outcome.history {
        println!(
            "[I{:02}] score={:6.1} improvement={:+6.1} {:<8} strategy={:<24} {}",
            record.index,
            record.score,
            record.improvement,
            if record.accepted { "accepted" } else { "rejected" },
            record.strategy.as_deref().unwrap_or("(baseline)"),
            preview(&record.content, 80)
        );
    }
    println!();
    println!("Termination: {:?}", outcome.termination);
    println!("Score: {:.1} -> {:.1}", outcome.baseline_score, outcome.score);
    println!();
    println!("{}", outcome.content);

    if let Some(out_path) = parse_arg_value(&args, "--out") {
        let json = serde_json::to_string_pretty(&outcome)?;
        std::fs::write(&out_path, json).with_context(|| format!("write out failed: {}", out_path))?;
        println!();
        println!("Wrote JSON: {}", out_path);
    }

    Ok(())
}
