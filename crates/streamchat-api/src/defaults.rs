use std::sync::{PoisonError, RwLock};

use tracing::info;

use streamchat_core::{CoreResult, GenerationDefaults};

/// Server-wide generation defaults.
///
/// Requests only ever read a snapshot; an in-flight generation is never
/// affected by a later update.
#[derive(Debug)]
pub struct DefaultsStore {
    inner: RwLock<GenerationDefaults>,
}

impl DefaultsStore {
    pub fn new(defaults: GenerationDefaults) -> Self {
        Self { inner: RwLock::new(defaults) }
    }

    pub fn snapshot(&self) -> GenerationDefaults {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Validate and install new defaults.
    pub fn replace(&self, defaults: GenerationDefaults) -> CoreResult<GenerationDefaults> {
        defaults.validate()?;
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = defaults.clone();
        info!(
            max_input_length = defaults.max_input_length,
            max_generate_length = defaults.max_generate_length,
            top_p = defaults.top_p,
            temperature = defaults.temperature,
            "Generation defaults updated"
        );
        Ok(defaults)
    }
}

impl Default for DefaultsStore {
    fn default() -> Self {
        Self::new(GenerationDefaults::default())
    }
}
