use std::sync::Arc;

use axum::{
    response::{sse::KeepAlive, IntoResponse, Response, Sse},
    Extension, Json,
};
use tracing::{debug, info, instrument};

use streamchat_core::{build_prompt, History, LanguageModel, ParameterOverrides, Turn};

use crate::{
    defaults::DefaultsStore,
    error::{ApiError, ApiResult},
    routes::{request_parameters, start_generation},
    sessions::SessionLimiter,
    streaming::{completion_response, encode_openai_chunks},
    types::{ChatCompletionRequest, ChatMessage, Role},
};

/// Split OpenAI messages into the pending query and the prior history.
///
/// The last message must come from the user. A leading system message is
/// prepended to the query. The remaining messages are folded into
/// `(user, assistant)` turns; an odd count yields no history at all and
/// misaligned pairs are skipped.
pub(crate) fn messages_to_query(messages: &[ChatMessage]) -> ApiResult<(String, History)> {
    let (last, mut prior) = messages
        .split_last()
        .ok_or_else(|| ApiError::BadRequest("messages array must not be empty".to_string()))?;

    if last.role != Role::User {
        return Err(ApiError::BadRequest(format!(
            "last message must have role `user`, got `{}`",
            last.role.as_str()
        )));
    }

    let mut query = last.content.clone();
    if let Some((first, rest)) = prior.split_first() {
        if first.role == Role::System {
            query = format!("{}{}", first.content, query);
            prior = rest;
        }
    }

    let mut history = History::new();
    if prior.len() % 2 == 1 {
        debug!(count = prior.len(), "Odd number of prior messages, history ignored");
        return Ok((query, history));
    }
    for pair in prior.chunks_exact(2) {
        match (&pair[0], &pair[1]) {
            (user, assistant) if user.role == Role::User && assistant.role == Role::Assistant => {
                history.push(Turn::new(user.content.clone(), assistant.content.clone()));
            }
            (a, b) => debug!(first = a.role.as_str(), second = b.role.as_str(), "Skipping misaligned message pair"),
        }
    }

    Ok((query, history))
}

/// `POST /v1/chat/completions`
#[instrument(skip_all, fields(model = %req.model, stream = req.stream))]
pub async fn create_chat_completion(
    Extension(model): Extension<Arc<dyn LanguageModel>>,
    Extension(limiter): Extension<Arc<SessionLimiter>>,
    Extension(defaults): Extension<Arc<DefaultsStore>>,
    Json(req): Json<ChatCompletionRequest>,
) -> ApiResult<Response> {
    let (query, history) = messages_to_query(&req.messages)?;

    let overrides = ParameterOverrides {
        max_input_length: None,
        max_generate_length: req.max_length,
        top_p: req.top_p,
        temperature: req.temperature,
    };
    let params = request_parameters(model.as_ref(), &defaults, &overrides)?;

    let prompt = build_prompt(&query, &history);
    let session = start_generation(&model, &limiter, &prompt, params)?;

    if req.stream {
        let events = encode_openai_chunks(session, req.model);
        return Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response());
    }

    let completion = session.collect_completion().await?;
    info!(
        prompt_tokens = completion.prompt_tokens,
        completion_tokens = completion.completion_tokens,
        finish_reason = completion.finish_reason.as_str(),
        "Chat completion finished"
    );
    Ok(Json(completion_response(req.model, completion)).into_response())
}
