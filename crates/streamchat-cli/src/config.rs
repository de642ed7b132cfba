use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use streamchat_core::GenerationDefaults;

/// Full runtime configuration loaded from TOML + env vars.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub server: ServerSection,
    pub generation: GenerationSection,
    pub model: ModelSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub max_concurrent_sessions: usize,
}

/// Process-wide generation defaults; requests may override each value.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationSection {
    pub max_input_length: usize,
    pub max_generate_length: usize,
    pub top_p: f64,
    pub temperature: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelSection {
    pub id: String,
    pub owned_by: String,
    pub tokenizer_path: PathBuf,
    pub context_window: usize,
    pub echo_delay_ms: u64,
}

impl From<&GenerationSection> for GenerationDefaults {
    fn from(section: &GenerationSection) -> Self {
        Self {
            max_input_length: section.max_input_length,
            max_generate_length: section.max_generate_length,
            top_p: section.top_p,
            temperature: section.temperature,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSection {
                host: "0.0.0.0".to_string(),
                port: 8000,
                request_timeout_secs: 300,
                max_concurrent_sessions: 1,
            },
            generation: GenerationSection {
                max_input_length: 512,
                max_generate_length: 1024,
                top_p: 0.95,
                temperature: 0.8,
            },
            model: ModelSection {
                id: "streamchat-echo".to_string(),
                owned_by: "streamchat".to_string(),
                tokenizer_path: PathBuf::from("tokenizer.json"),
                context_window: 2048,
                echo_delay_ms: 0,
            },
        }
    }
}

/// Load configuration from:
/// 1. Built-in defaults
/// 2. `config/default.toml` (if present)
/// 3. A custom config file path (if provided)
/// 4. Environment variables such as `STREAMCHAT_SERVER__PORT`
pub fn load_config(config_file: Option<&PathBuf>) -> Result<AppConfig, ConfigError> {
    let defaults = AppConfig::default();
    let mut builder = Config::builder()
        .set_default("server.host", defaults.server.host)?
        .set_default("server.port", i64::from(defaults.server.port))?
        .set_default("server.request_timeout_secs", defaults.server.request_timeout_secs)?
        .set_default("server.max_concurrent_sessions", defaults.server.max_concurrent_sessions as u64)?
        .set_default("generation.max_input_length", defaults.generation.max_input_length as u64)?
        .set_default("generation.max_generate_length", defaults.generation.max_generate_length as u64)?
        .set_default("generation.top_p", defaults.generation.top_p)?
        .set_default("generation.temperature", defaults.generation.temperature)?
        .set_default("model.id", defaults.model.id)?
        .set_default("model.owned_by", defaults.model.owned_by)?
        .set_default("model.tokenizer_path", defaults.model.tokenizer_path.to_string_lossy().into_owned())?
        .set_default("model.context_window", defaults.model.context_window as u64)?
        .set_default("model.echo_delay_ms", defaults.model.echo_delay_ms)?
        .add_source(File::with_name("config/default").required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    // Double underscore separates sections so keys may contain `_`.
    builder = builder.add_source(
        Environment::with_prefix("STREAMCHAT")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
