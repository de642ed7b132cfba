use std::{io::Write, time::Instant};

use futures::StreamExt;
use tracing::info;

use streamchat_core::{
    build_prompt, resolve_parameters, GenerationDefaults, GenerationSession, History, ModelLimits,
    ParameterOverrides,
};

use crate::{commands::load_echo_model, config::AppConfig};

/// Render one prompt and stream the generation to stdout.
pub async fn run(
    prompt: &str,
    history: Option<&str>,
    overrides: ParameterOverrides,
    stats: bool,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let history: History = match history {
        Some(raw) => serde_json::from_str(raw)?,
        None => History::new(),
    };

    let model = load_echo_model(&config.model)?;
    let defaults = GenerationDefaults::from(&config.generation);
    let params = resolve_parameters(&defaults, &overrides, ModelLimits::of(model.as_ref()))?;

    let query = prompt.trim_start_matches('\n');
    let rendered = build_prompt(query, &history);
    info!(history_turns = history.len(), max_length = params.max_length, "Generating response");

    let gen_start = Instant::now();
    let mut session = GenerationSession::start(model, &rendered, params)?;
    let prompt_tokens = session.prompt_tokens();
    let mut finish_reason = None;

    let mut stdout = std::io::stdout();
    while let Some(fragment) = session.next().await {
        let fragment = fragment?;
        write!(stdout, "{}", fragment.text)?;
        stdout.flush()?;
        finish_reason = fragment.finish_reason;
    }
    writeln!(stdout)?;

    if stats {
        let elapsed = gen_start.elapsed().as_secs_f64();
        let generated = session.completion_tokens();
        let tok_per_sec = if elapsed > 0.0 { generated as f64 / elapsed } else { 0.0 };
        eprintln!(
            "\n[stats] {} prompt tokens | {} tokens generated | finish: {} | {:.1} tok/s",
            prompt_tokens,
            generated,
            finish_reason.map_or("none", |r| r.as_str()),
            tok_per_sec,
        );
    }

    Ok(())
}
