//! Classify a small mixed quiz and print one line per question.
//!
//! Uses `quizrec.toml` (or the user config) when present, so pointing
//! `QUIZREC_MODEL_PATH` / `QUIZREC_CALIBRATION_PATH` at trained artifacts
//! enables the statistical fallback.
//!
//! ```sh
//! RUST_LOG=quizrec=debug cargo run -p quizrec-models --example classify_document
//! ```

use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use quizrec_core::config::load_config;
use quizrec_core::model::DocumentInput;
use quizrec_core::pipeline::Pipeline;
use quizrec_models::ArtifactStore;

const QUIZ: &[&str] = &[
    "1. 下列哪些属于个人防护用品？",
    "A. 安全帽",
    "B. 防护手套",
    "C. 绝缘鞋",
    "D. 手机",
    "答案：ABC",
    "2. 隔离操作必须由两人进行。(√)",
    "3. 安全电压一般不超过____伏。",
    "答案：36",
    "解析：依据国家标准。",
    "4. Which of the following is correct?",
    "A. Work alone on live equipment B. Lock out before servicing",
    "Answer: B",
    "5. Briefly describe the basic safety requirements.",
    "Answer: Wear protective gear, cut the power, and always work in pairs.",
    "6. Name the capital city of France.",
    "Answer: Paris",
];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quizrec=info")),
        )
        .init();

    let config = load_config()?;
    let store = Arc::new(ArtifactStore::from_config(&config));
    let mut pipeline = Pipeline::new(config, store)?;

    let document = DocumentInput::from_lines("demo", QUIZ);
    for result in pipeline.process_document(&document) {
        println!(
            "{:<10} {:<16} {:.2}{}  {}",
            result.source_id,
            result.question_type().to_string(),
            result.confidence(),
            if result.final_result.needs_review { " (review)" } else { "" },
            result.question.question
        );
    }

    let stats = pipeline.stats();
    println!(
        "\n{} questions, rule hit rate {:.0}%, model invocations {}, avg latency {:.0}µs",
        stats.total_processed,
        stats.rule_hit_rate() * 100.0,
        stats.model_invocations,
        stats.avg_latency_us()
    );
    Ok(())
}
