//! Loopback [`LanguageModel`] that answers with the pending instruction.
//!
//! Useful for exercising the gateway end to end without model weights: it
//! tokenizes with a real `tokenizer.json`, replays the tokens of the last
//! instruction block one by one, then emits EOS.

use std::{ops::ControlFlow, sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    error::{CoreError, CoreResult},
    model::{FinishReason, GenerateInput, GenerationParameters, LanguageModel},
    tokenizer::Tokenizer,
};

const INSTRUCTION_MARKER: &str = "### Instruction:";
const RESPONSE_MARKER: &str = "### Response:";

#[derive(Debug)]
pub struct EchoModel {
    tokenizer: Arc<Tokenizer>,
    delay: Duration,
    instruction_ids: Vec<u32>,
    response_ids: Vec<u32>,
}

impl EchoModel {
    pub fn new(tokenizer: Arc<Tokenizer>, delay: Duration) -> CoreResult<Self> {
        let instruction_ids = tokenizer.encode(INSTRUCTION_MARKER, false)?;
        let response_ids = tokenizer.encode(RESPONSE_MARKER, false)?;
        Ok(Self { tokenizer, delay, instruction_ids, response_ids })
    }

    /// Tokens between the last instruction marker and the response marker that
    /// follows it. Without markers the whole input is replayed.
    fn answer<'a>(&self, ids: &'a [u32]) -> &'a [u32] {
        let start = rfind(ids, &self.instruction_ids)
            .map(|i| i + self.instruction_ids.len())
            .unwrap_or(0);
        let tail = &ids[start..];
        let end = find(tail, &self.response_ids).unwrap_or(tail.len());
        &tail[..end]
    }
}

impl LanguageModel for EchoModel {
    fn tokenize(&self, text: &str) -> CoreResult<Vec<u32>> {
        self.tokenizer.encode(text, true)
    }

    fn decode(&self, id: u32) -> CoreResult<String> {
        self.tokenizer.decode_token(id)
    }

    fn eos_token_id(&self) -> Option<u32> {
        self.tokenizer.eos_token_id()
    }

    fn pad_token_id(&self) -> Option<u32> {
        self.tokenizer.pad_token_id()
    }

    fn context_window(&self) -> usize {
        self.tokenizer.model_max_length()
    }

    fn generate(
        &self,
        input: GenerateInput,
        params: &GenerationParameters,
        emit: &mut dyn FnMut(u32) -> ControlFlow<()>,
    ) -> CoreResult<FinishReason> {
        let budget = params.new_token_budget(input.token_ids.len());
        let answer = self.answer(&input.token_ids);
        debug!(prompt_tokens = input.token_ids.len(), answer_tokens = answer.len(), budget, "Echo generation");

        for (produced, &id) in answer.iter().enumerate() {
            if produced >= budget {
                return Ok(FinishReason::Length);
            }
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            if emit(id).is_break() {
                return Err(CoreError::Cancelled);
            }
        }

        if answer.len() >= budget {
            return Ok(FinishReason::Length);
        }
        if let Some(eos) = params.eos_token_id {
            if emit(eos).is_break() {
                return Err(CoreError::Cancelled);
            }
        }
        Ok(FinishReason::Stop)
    }
}

fn find(haystack: &[u32], needle: &[u32]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u32], needle: &[u32]) -> Option<usize> {
    if needle.is_empty() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
