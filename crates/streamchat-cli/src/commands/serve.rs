use tracing::info;

use streamchat_api::{serve, ModelCard, ServerConfig};
use streamchat_core::GenerationDefaults;

use crate::{commands::load_echo_model, config::AppConfig};

/// Start the chat gateway.
pub async fn run(
    host: Option<&str>,
    port: Option<u16>,
    max_concurrent_sessions: Option<usize>,
    config: &AppConfig,
) -> anyhow::Result<()> {
    let model = load_echo_model(&config.model)?;
    let card = ModelCard::new(config.model.id.clone(), config.model.owned_by.clone());
    let defaults = GenerationDefaults::from(&config.generation);

    let server_config = ServerConfig {
        host: host.unwrap_or(&config.server.host).to_string(),
        port: port.unwrap_or(config.server.port),
        request_timeout_secs: config.server.request_timeout_secs,
        max_concurrent_sessions: max_concurrent_sessions
            .unwrap_or(config.server.max_concurrent_sessions),
    };

    info!(
        host = %server_config.host,
        port = server_config.port,
        model = %config.model.id,
        "Server starting"
    );

    serve(model, card, defaults, server_config).await
}
