pub mod run;
pub mod serve;

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use tracing::info;

use streamchat_core::{EchoModel, LanguageModel, Tokenizer};

use crate::config::ModelSection;

/// Build the bundled loopback backend from the `[model]` section.
pub(crate) fn load_echo_model(model: &ModelSection) -> anyhow::Result<Arc<dyn LanguageModel>> {
    let tokenizer = Tokenizer::from_file(&model.tokenizer_path, model.context_window)
        .with_context(|| format!("Failed to load tokenizer from {}", model.tokenizer_path.display()))?;
    info!(
        tokenizer = %model.tokenizer_path.display(),
        vocab_size = tokenizer.vocab_size(),
        context_window = model.context_window,
        "Tokenizer loaded"
    );
    let echo = EchoModel::new(Arc::new(tokenizer), Duration::from_millis(model.echo_delay_ms))?;
    Ok(Arc::new(echo))
}
