//! One in-flight generation exposed as a lazy, cancellable fragment stream.
//!
//! The model runs on a blocking worker and hands decoded text to the async
//! side through a bounded channel. The session holds one fragment back so the
//! last piece of text can be marked final together with the finish reason.
//! Dropping the session cancels the worker at its next token.

use std::{
    any::Any,
    ops::ControlFlow,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, instrument};

use crate::{
    error::{CoreError, CoreResult},
    model::{FinishReason, GenerateInput, GenerationParameters, LanguageModel},
    tokenizer::truncate_left,
};

/// Capacity of the worker → stream handoff.
pub const HANDOFF_CAPACITY: usize = 32;

/// One piece of generated text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamFragment {
    pub text: String,
    pub is_final: bool,
    /// Set on the final fragment only.
    pub finish_reason: Option<FinishReason>,
}

impl StreamFragment {
    fn partial(text: String) -> Self {
        Self { text, is_final: false, finish_reason: None }
    }

    fn last(text: String, reason: FinishReason) -> Self {
        Self { text, is_final: true, finish_reason: Some(reason) }
    }
}

/// Aggregate result for non-streaming callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
}

enum WorkerEvent {
    Text(String),
    Finished { reason: FinishReason, generated: usize },
    Failed(CoreError),
}

pub struct GenerationSession {
    rx: mpsc::Receiver<WorkerEvent>,
    pending: Option<String>,
    failure: Option<CoreError>,
    done: bool,
    prompt_tokens: usize,
    completion_tokens: usize,
    _cancel_on_drop: DropGuard,
}

impl GenerationSession {
    /// Tokenize `prompt` and start generating on a blocking worker.
    pub fn start(
        model: Arc<dyn LanguageModel>,
        prompt: &str,
        params: GenerationParameters,
    ) -> CoreResult<Self> {
        Self::start_holding(model, prompt, params, ())
    }

    /// Like [`start`](Self::start), but `slot` is owned by the worker and
    /// released only when the model has actually stopped.
    #[instrument(skip_all, fields(max_input_length = params.max_input_length, max_length = params.max_length))]
    pub fn start_holding<S: Send + 'static>(
        model: Arc<dyn LanguageModel>,
        prompt: &str,
        params: GenerationParameters,
        slot: S,
    ) -> CoreResult<Self> {
        let mut token_ids = model.tokenize(prompt)?;
        let original_len = token_ids.len();
        truncate_left(&mut token_ids, params.max_input_length);
        if token_ids.len() < original_len {
            debug!(
                dropped = original_len - token_ids.len(),
                kept = token_ids.len(),
                "Prompt truncated from the left"
            );
        }
        let prompt_tokens = token_ids.len();

        let cancel = CancellationToken::new();
        let worker_cancel = cancel.clone();
        let (tx, rx) = mpsc::channel(HANDOFF_CAPACITY);

        tokio::task::spawn_blocking(move || {
            let input = GenerateInput { token_ids };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                run_worker(model.as_ref(), input, &params, &tx, &worker_cancel)
            }))
            .unwrap_or_else(|payload| Err(CoreError::WorkerPanicked(panic_message(payload.as_ref()))));
            model.release_resources();
            // The slot must be free before the consumer sees the terminal event.
            drop(slot);

            match outcome {
                Ok((reason, generated)) => {
                    debug!(reason = reason.as_str(), generated, "Generation finished");
                    let _ = tx.blocking_send(WorkerEvent::Finished { reason, generated });
                }
                Err(CoreError::Cancelled) => {
                    debug!("Generation cancelled by consumer");
                }
                Err(e) => {
                    error!(error = %e, "Generation failed");
                    let _ = tx.blocking_send(WorkerEvent::Failed(e));
                }
            }
        });

        Ok(Self {
            rx,
            pending: None,
            failure: None,
            done: false,
            prompt_tokens,
            completion_tokens: 0,
            _cancel_on_drop: cancel.drop_guard(),
        })
    }

    /// Prompt length after truncation.
    pub fn prompt_tokens(&self) -> usize {
        self.prompt_tokens
    }

    /// Tokens generated so far; final once the last fragment was yielded.
    pub fn completion_tokens(&self) -> usize {
        self.completion_tokens
    }

    /// Drain the session into a single [`Completion`].
    pub async fn collect_completion(mut self) -> CoreResult<Completion> {
        let mut text = String::new();
        let mut finish_reason = FinishReason::Stop;
        while let Some(fragment) = self.next().await {
            let fragment = fragment?;
            text.push_str(&fragment.text);
            if let Some(reason) = fragment.finish_reason {
                finish_reason = reason;
            }
        }
        Ok(Completion {
            text,
            finish_reason,
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
        })
    }

    fn fail(&mut self, err: CoreError) -> Option<StreamFragment> {
        self.failure = Some(err);
        self.pending.take().map(StreamFragment::partial)
    }
}

impl Stream for GenerationSession {
    type Item = CoreResult<StreamFragment>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(err) = this.failure.take() {
                this.done = true;
                return Poll::Ready(Some(Err(err)));
            }
            if this.done {
                return Poll::Ready(None);
            }

            match ready!(this.rx.poll_recv(cx)) {
                Some(WorkerEvent::Text(text)) => {
                    if let Some(prev) = this.pending.replace(text) {
                        return Poll::Ready(Some(Ok(StreamFragment::partial(prev))));
                    }
                }
                Some(WorkerEvent::Finished { reason, generated }) => {
                    this.done = true;
                    this.completion_tokens = generated;
                    let text = this.pending.take().unwrap_or_default();
                    return Poll::Ready(Some(Ok(StreamFragment::last(text, reason))));
                }
                Some(WorkerEvent::Failed(err)) => {
                    if let Some(fragment) = this.fail(err) {
                        return Poll::Ready(Some(Ok(fragment)));
                    }
                }
                None => {
                    let err = CoreError::WorkerPanicked(
                        "worker exited without a finish signal".to_string(),
                    );
                    if let Some(fragment) = this.fail(err) {
                        return Poll::Ready(Some(Ok(fragment)));
                    }
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "model panicked".to_string())
}

fn run_worker(
    model: &dyn LanguageModel,
    input: GenerateInput,
    params: &GenerationParameters,
    tx: &mpsc::Sender<WorkerEvent>,
    cancel: &CancellationToken,
) -> CoreResult<(FinishReason, usize)> {
    let mut generated = 0usize;
    let mut decode_error = None;

    let outcome = model.generate(input, params, &mut |id| {
        if cancel.is_cancelled() {
            return ControlFlow::Break(());
        }
        if Some(id) == params.eos_token_id {
            return ControlFlow::Continue(());
        }
        generated += 1;
        let text = match model.decode(id) {
            Ok(text) => text,
            Err(e) => {
                decode_error = Some(e);
                return ControlFlow::Break(());
            }
        };
        if text.is_empty() {
            return ControlFlow::Continue(());
        }
        // A closed channel means the session was dropped.
        if tx.blocking_send(WorkerEvent::Text(text)).is_err() {
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    });

    if let Some(e) = decode_error {
        return Err(e);
    }
    outcome.map(|reason| (reason, generated))
}
