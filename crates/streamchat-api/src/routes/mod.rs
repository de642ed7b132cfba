pub mod chat;
pub mod defaults;
pub mod legacy;
pub mod models;

use std::sync::Arc;

use streamchat_core::{
    resolve_parameters, GenerationParameters, GenerationSession, LanguageModel, ModelLimits,
    ParameterOverrides,
};

use crate::{
    defaults::DefaultsStore,
    error::{ApiError, ApiResult},
    sessions::SessionLimiter,
};

/// Resolve `overrides` against the current defaults and this model's limits.
pub(crate) fn request_parameters(
    model: &dyn LanguageModel,
    defaults: &DefaultsStore,
    overrides: &ParameterOverrides,
) -> ApiResult<GenerationParameters> {
    Ok(resolve_parameters(&defaults.snapshot(), overrides, ModelLimits::of(model))?)
}

/// Admit a request and start its generation. Fails fast with 503 when full.
pub(crate) fn start_generation(
    model: &Arc<dyn LanguageModel>,
    limiter: &SessionLimiter,
    prompt: &str,
    params: GenerationParameters,
) -> ApiResult<GenerationSession> {
    let slot = limiter.try_acquire().ok_or(ApiError::ServiceUnavailable)?;
    Ok(GenerationSession::start_holding(model.clone(), prompt, params, slot)?)
}
