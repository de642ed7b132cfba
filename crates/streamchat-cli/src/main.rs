use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use streamchat_core::ParameterOverrides;

mod commands;
mod config;

use config::load_config;

/// streamchat: streaming chat-completion gateway
#[derive(Debug, Parser)]
#[command(name = "streamchat", version, about, long_about = None, arg_required_else_help = true)]
struct Cli {
    /// Path to a custom configuration file (TOML).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log format: "pretty" (default) or "json".
    #[arg(long, global = true, default_value = "pretty", value_name = "FORMAT")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the HTTP chat gateway.
    Serve {
        /// Address to bind to.
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on.
        #[arg(long, short = 'p')]
        port: Option<u16>,

        /// Tokenizer file (`tokenizer.json`) for the bundled backend.
        #[arg(long, value_name = "FILE")]
        tokenizer: Option<PathBuf>,

        /// Maximum number of generations running at once.
        #[arg(long)]
        max_concurrent_sessions: Option<usize>,
    },

    /// Run one generation locally and stream it to stdout.
    Run {
        /// Prompt text.
        #[arg(long)]
        prompt: String,

        /// Prior turns as JSON, e.g. '[["hi","hello"]]'.
        #[arg(long)]
        history: Option<String>,

        /// Tokenizer file (`tokenizer.json`) for the bundled backend.
        #[arg(long, value_name = "FILE")]
        tokenizer: Option<PathBuf>,

        /// Maximum tokens kept from the rendered prompt.
        #[arg(long)]
        max_input_length: Option<usize>,

        /// Total token budget, prompt included.
        #[arg(long)]
        max_generate_length: Option<usize>,

        /// Top-p nucleus sampling threshold, in (0, 1].
        #[arg(long)]
        top_p: Option<f64>,

        /// Sampling temperature.
        #[arg(long)]
        temperature: Option<f64>,

        /// Print token counts and throughput after generation.
        #[arg(long)]
        stats: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_format);

    let mut cfg = load_config(cli.config.as_ref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve { host, port, tokenizer, max_concurrent_sessions } => {
            if let Some(path) = tokenizer {
                cfg.model.tokenizer_path = path;
            }
            commands::serve::run(host.as_deref(), port, max_concurrent_sessions, &cfg).await?;
        }
        Commands::Run {
            prompt,
            history,
            tokenizer,
            max_input_length,
            max_generate_length,
            top_p,
            temperature,
            stats,
        } => {
            if let Some(path) = tokenizer {
                cfg.model.tokenizer_path = path;
            }
            let overrides = ParameterOverrides { max_input_length, max_generate_length, top_p, temperature };
            commands::run::run(&prompt, history.as_deref(), overrides, stats, &cfg).await?;
        }
    }

    Ok(())
}

fn init_tracing(log_format: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().pretty()).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_overrides() {
        let cli = Cli::try_parse_from([
            "streamchat", "run", "--prompt", "hello", "--top-p", "0.5", "--max-generate-length", "64",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { prompt, top_p, max_generate_length, .. } => {
                assert_eq!(prompt, "hello");
                assert_eq!(top_p, Some(0.5));
                assert_eq!(max_generate_length, Some(64));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["streamchat", "serve", "--port", "9000", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, "json");
        assert!(matches!(cli.command, Commands::Serve { port: Some(9000), .. }));
    }
}
