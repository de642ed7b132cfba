use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CoreError, CoreResult};

/// Fallbacks used when neither the request nor the configured defaults set a value.
pub const FALLBACK_MAX_INPUT_LENGTH: usize = 512;
pub const FALLBACK_MAX_LENGTH: usize = 1024;
pub const FALLBACK_TOP_P: f64 = 0.95;
pub const FALLBACK_TEMPERATURE: f64 = 0.8;

/// Why a generation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    /// The model emitted its end-of-sequence token.
    Stop,
    /// The length budget was exhausted.
    Length,
}

impl FinishReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
        }
    }
}

/// Model-facing parameters for a single generation.
///
/// `max_length` is the total sequence budget (prompt plus generated tokens).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    pub max_input_length: usize,
    pub max_length: usize,
    pub top_p: f64,
    pub temperature: f64,
    pub eos_token_id: Option<u32>,
    pub pad_token_id: Option<u32>,
}

impl GenerationParameters {
    /// Number of tokens the model may still produce after a prompt of `prompt_len` tokens.
    pub fn new_token_budget(&self, prompt_len: usize) -> usize {
        self.max_length.saturating_sub(prompt_len)
    }
}

/// Process-wide baseline the per-request overrides are resolved against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationDefaults {
    pub max_input_length: usize,
    pub max_generate_length: usize,
    pub top_p: f64,
    pub temperature: f64,
}

impl Default for GenerationDefaults {
    fn default() -> Self {
        Self {
            max_input_length: FALLBACK_MAX_INPUT_LENGTH,
            max_generate_length: FALLBACK_MAX_LENGTH,
            top_p: FALLBACK_TOP_P,
            temperature: FALLBACK_TEMPERATURE,
        }
    }
}

impl GenerationDefaults {
    pub fn validate(&self) -> CoreResult<()> {
        check_length("max_input_length", self.max_input_length)?;
        check_length("max_generate_length", self.max_generate_length)?;
        check_top_p(self.top_p)?;
        check_temperature(self.temperature)
    }
}

/// Values a single request may override. `None` falls back to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterOverrides {
    pub max_input_length: Option<usize>,
    pub max_generate_length: Option<usize>,
    pub top_p: Option<f64>,
    pub temperature: Option<f64>,
}

/// Token ids and capacity the resolved parameters must respect.
#[derive(Debug, Clone, Copy)]
pub struct ModelLimits {
    /// Hard capacity of the model, in tokens.
    pub context_window: usize,
    pub eos_token_id: Option<u32>,
    pub pad_token_id: Option<u32>,
}

impl ModelLimits {
    pub fn of(model: &dyn LanguageModel) -> Self {
        Self {
            context_window: model.context_window(),
            eos_token_id: model.eos_token_id(),
            pad_token_id: model.pad_token_id(),
        }
    }
}

/// Resolve request overrides against a defaults snapshot.
///
/// The requested length is honoured up to the model capacity; the input
/// bound never exceeds the resolved total length.
pub fn resolve_parameters(
    defaults: &GenerationDefaults,
    overrides: &ParameterOverrides,
    limits: ModelLimits,
) -> CoreResult<GenerationParameters> {
    let requested_length = overrides
        .max_generate_length
        .unwrap_or(defaults.max_generate_length);
    check_length("max_generate_length", requested_length)?;

    let max_length = if requested_length > limits.context_window {
        warn!(
            requested = requested_length,
            capacity = limits.context_window,
            "Requested length exceeds model capacity, clamping"
        );
        limits.context_window
    } else {
        requested_length
    };

    let max_input_length = overrides
        .max_input_length
        .unwrap_or(defaults.max_input_length);
    check_length("max_input_length", max_input_length)?;

    let top_p = overrides.top_p.unwrap_or(defaults.top_p);
    check_top_p(top_p)?;
    let temperature = overrides.temperature.unwrap_or(defaults.temperature);
    check_temperature(temperature)?;

    Ok(GenerationParameters {
        max_input_length: max_input_length.min(max_length),
        max_length,
        top_p,
        temperature,
        eos_token_id: limits.eos_token_id,
        pad_token_id: limits.pad_token_id,
    })
}

fn check_length(name: &'static str, value: usize) -> CoreResult<()> {
    if value == 0 {
        return Err(CoreError::InvalidParameter {
            name,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn check_top_p(top_p: f64) -> CoreResult<()> {
    if !(top_p > 0.0 && top_p <= 1.0) {
        return Err(CoreError::InvalidParameter {
            name: "top_p",
            reason: format!("must be in (0, 1], got {top_p}"),
        });
    }
    Ok(())
}

fn check_temperature(temperature: f64) -> CoreResult<()> {
    if !(temperature >= 0.0 && temperature.is_finite()) {
        return Err(CoreError::InvalidParameter {
            name: "temperature",
            reason: format!("must be a non-negative number, got {temperature}"),
        });
    }
    Ok(())
}

/// Input to the model for a single generation request.
#[derive(Debug, Clone)]
pub struct GenerateInput {
    /// Pre-tokenized prompt ids, already truncated.
    pub token_ids: Vec<u32>,
}

/// The capability the gateway drives. Loading and placement are the
/// implementor's business.
///
/// Methods take `&self` so one instance can be shared behind an `Arc` by
/// concurrent sessions; implementations own their interior synchronization.
pub trait LanguageModel: Send + Sync {
    /// Encode text to token ids.
    ///
    /// Implementations may cut the result to their own context window by
    /// dropping the oldest tokens; callers apply `max_input_length` on top.
    fn tokenize(&self, text: &str) -> CoreResult<Vec<u32>>;

    /// Decode a single token id to its text fragment.
    fn decode(&self, id: u32) -> CoreResult<String>;

    fn eos_token_id(&self) -> Option<u32>;

    fn pad_token_id(&self) -> Option<u32> {
        None
    }

    /// Maximum total sequence length the model supports.
    fn context_window(&self) -> usize;

    /// Blocking generation loop.
    ///
    /// Every produced token id (including EOS) is handed to `emit`. When `emit`
    /// returns `ControlFlow::Break` the implementation must stop at its next
    /// checkpoint and return [`CoreError::Cancelled`].
    fn generate(
        &self,
        input: GenerateInput,
        params: &GenerationParameters,
        emit: &mut dyn FnMut(u32) -> ControlFlow<()>,
    ) -> CoreResult<FinishReason>;

    /// Best-effort reclamation pass, called after every session.
    fn release_resources(&self) {}
}
