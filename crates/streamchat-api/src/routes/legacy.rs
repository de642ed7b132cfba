use std::sync::Arc;

use axum::{
    response::{sse::KeepAlive, IntoResponse, Sse},
    Extension, Json,
};
use chrono::Local;
use tracing::{info, instrument};

use streamchat_core::{build_prompt, LanguageModel, Turn};

use crate::{
    defaults::DefaultsStore,
    error::ApiResult,
    routes::{request_parameters, start_generation},
    sessions::SessionLimiter,
    streaming::encode_simple_sse,
    types::{LegacyChatRequest, LegacyChatResponse},
};

pub const GREETING: &str = "Hello! This is the streamchat API.";

/// `GET /`
pub async fn root() -> Json<&'static str> {
    Json(GREETING)
}

/// `POST /chat`: run a whole generation and return it with the updated history.
#[instrument(skip_all, fields(history_turns = req.history.as_ref().map_or(0, Vec::len)))]
pub async fn chat(
    Extension(model): Extension<Arc<dyn LanguageModel>>,
    Extension(limiter): Extension<Arc<SessionLimiter>>,
    Extension(defaults): Extension<Arc<DefaultsStore>>,
    Json(req): Json<LegacyChatRequest>,
) -> ApiResult<Json<LegacyChatResponse>> {
    let params = request_parameters(model.as_ref(), &defaults, &req.overrides())?;
    let query = req.prompt.trim_start_matches('\n').to_string();
    let mut history = req.history.unwrap_or_default();

    let prompt = build_prompt(&query, &history);
    let completion = start_generation(&model, &limiter, &prompt, params)?
        .collect_completion()
        .await?;

    let response = completion.text.trim_start_matches('\n').to_string();
    info!(
        prompt_tokens = completion.prompt_tokens,
        completion_tokens = completion.completion_tokens,
        finish_reason = completion.finish_reason.as_str(),
        "Chat completed"
    );
    history.push(Turn::new(query, response.clone()));

    Ok(Json(LegacyChatResponse {
        response,
        history,
        status: 200,
        time: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    }))
}

/// `GET /stream_chat` (JSON body) and `POST /stream_chat`.
#[instrument(skip_all, fields(history_turns = req.history.as_ref().map_or(0, Vec::len)))]
pub async fn stream_chat(
    Extension(model): Extension<Arc<dyn LanguageModel>>,
    Extension(limiter): Extension<Arc<SessionLimiter>>,
    Extension(defaults): Extension<Arc<DefaultsStore>>,
    Json(req): Json<LegacyChatRequest>,
) -> ApiResult<impl IntoResponse> {
    let params = request_parameters(model.as_ref(), &defaults, &req.overrides())?;
    let query = req.prompt.trim_start_matches('\n').to_string();
    let history = req.history.unwrap_or_default();

    let prompt = build_prompt(&query, &history);
    let session = start_generation(&model, &limiter, &prompt, params)?;

    Ok(Sse::new(encode_simple_sse(session, query, history)).keep_alive(KeepAlive::default()))
}
