//! Encoders that turn a stream of [`StreamFragment`]s into SSE frames.
//!
//! Both encoders end the stream after the final fragment. A generation
//! failure is reported in-band as a last frame, since the HTTP status has
//! already been sent by then.

use std::time::Duration;

use axum::response::sse::Event;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, error};
use uuid::Uuid;

use streamchat_core::{Completion, CoreResult, FinishReason, History, StreamFragment, Turn};

use crate::{
    error::ApiError,
    types::{
        ChatChoice, ChatCompletionChunk, ChatCompletionResponse, ChatDelta, ChatMessage, Role,
        StreamChatPayload, StreamingChatChoice, Usage,
    },
};

/// Client reconnection delay advertised on `/stream_chat` events.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(15_000);

/// Serialize a value as a JSON SSE data event.
pub fn sse_event<T: Serialize>(value: &T) -> Result<Event, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(Event::default().data(json))
}

/// The terminal SSE message that signals the end of an OpenAI stream.
pub fn sse_done() -> Event {
    Event::default().data("[DONE]")
}

fn named_event(name: &str, id: &str, payload: &StreamChatPayload) -> Result<Event, serde_json::Error> {
    Ok(sse_event(payload)?.event(name).id(id).retry(RETRY_INTERVAL))
}

fn history_with(history: &History, query: &str, response: &str) -> History {
    let mut updated = history.clone();
    updated.push(Turn::new(query, response));
    updated
}

/// `/stream_chat` framing: one `new_message` event per fragment, then a
/// single `finish` event.
///
/// Each `new_message` carries the history extended with the text generated
/// *before* that fragment; the `finish` event carries the complete reply.
pub fn encode_simple_sse<S>(
    fragments: S,
    query: String,
    history: History,
) -> impl Stream<Item = Result<Event, serde_json::Error>> + Send + 'static
where
    S: Stream<Item = CoreResult<StreamFragment>> + Send + 'static,
{
    async_stream::stream! {
        let mut fragments = Box::pin(fragments);
        let mut accumulated = String::new();

        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) if fragment.is_final => {
                    accumulated.push_str(&fragment.text);
                    let payload = StreamChatPayload {
                        response: fragment.text,
                        history: history_with(&history, &query, &accumulated),
                        finish: true,
                        error: None,
                    };
                    debug!(chars = accumulated.len(), "Stream chat finished");
                    yield named_event("finish", "finish_id", &payload);
                    return;
                }
                Ok(fragment) => {
                    let payload = StreamChatPayload {
                        history: history_with(&history, &query, &accumulated),
                        response: fragment.text,
                        finish: false,
                        error: None,
                    };
                    accumulated.push_str(&payload.response);
                    yield named_event("new_message", "message_id", &payload);
                }
                Err(e) => {
                    error!(error = %e, "Stream chat generation failed");
                    let payload = StreamChatPayload {
                        response: String::new(),
                        history: history_with(&history, &query, &accumulated),
                        finish: true,
                        error: Some(e.to_string()),
                    };
                    yield named_event("error", "error_id", &payload);
                    return;
                }
            }
        }
    }
}

fn chunk(
    id: &str,
    created: i64,
    model: &str,
    delta: ChatDelta,
    finish_reason: Option<FinishReason>,
) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk".to_string(),
        created,
        model: model.to_string(),
        choices: vec![StreamingChatChoice { index: 0, delta, finish_reason }],
    }
}

/// OpenAI `chat.completion.chunk` framing: a role chunk, one content chunk
/// per fragment, a closing chunk carrying the finish reason, then `[DONE]`.
pub fn encode_openai_chunks<S>(
    fragments: S,
    model: String,
) -> impl Stream<Item = Result<Event, serde_json::Error>> + Send + 'static
where
    S: Stream<Item = CoreResult<StreamFragment>> + Send + 'static,
{
    let id = format!("chatcmpl-{}", Uuid::new_v4());
    let created = Utc::now().timestamp();

    async_stream::stream! {
        let mut fragments = Box::pin(fragments);

        let opening = ChatDelta { role: Some(Role::Assistant), content: Some(String::new()) };
        yield sse_event(&chunk(&id, created, &model, opening, None));

        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => {
                    if !fragment.text.is_empty() {
                        let delta = ChatDelta { role: None, content: Some(fragment.text) };
                        yield sse_event(&chunk(&id, created, &model, delta, None));
                    }
                    if let Some(reason) = fragment.finish_reason {
                        yield sse_event(&chunk(&id, created, &model, ChatDelta::default(), Some(reason)));
                    }
                }
                Err(e) => {
                    error!(error = %e, "Chat completion stream failed");
                    yield sse_event(&ApiError::from(e).body());
                    break;
                }
            }
        }

        yield Ok(sse_done());
    }
}

/// Non-streaming `chat.completion` body for a finished generation.
pub fn completion_response(model: String, completion: Completion) -> ChatCompletionResponse {
    let content = completion.text.trim_start_matches('\n').to_string();
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model,
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage { role: Role::Assistant, content },
            finish_reason: completion.finish_reason,
        }],
        usage: Usage {
            prompt_tokens: completion.prompt_tokens,
            completion_tokens: completion.completion_tokens,
            total_tokens: completion.prompt_tokens + completion.completion_tokens,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::{sse::Sse, IntoResponse};
    use futures::stream;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use streamchat_core::CoreError;

    fn fragment(text: &str, finish: Option<FinishReason>) -> CoreResult<StreamFragment> {
        Ok(StreamFragment { text: text.to_string(), is_final: finish.is_some(), finish_reason: finish })
    }

    async fn render<S>(events: S) -> String
    where
        S: Stream<Item = Result<Event, serde_json::Error>> + Send + 'static,
    {
        let bytes = Sse::new(events).into_response().into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// (event name, data json) pairs, in order.
    fn parse(body: &str) -> Vec<(Option<String>, String)> {
        body.split("\n\n")
            .filter(|block| !block.trim().is_empty())
            .map(|block| {
                let mut name = None;
                let mut data = String::new();
                for line in block.lines() {
                    if let Some(v) = line.strip_prefix("event:") {
                        name = Some(v.trim_start().to_string());
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data.push_str(v.trim_start());
                    }
                }
                (name, data)
            })
            .collect()
    }

    #[tokio::test]
    async fn simple_sse_accumulates_history() {
        let fragments = stream::iter(vec![
            fragment("Hi", None),
            fragment(" there", None),
            fragment("!", Some(FinishReason::Stop)),
        ]);
        let body = render(encode_simple_sse(fragments, "Hello".into(), vec![])).await;
        let events = parse(&body);
        assert_eq!(events.len(), 3);

        let names: Vec<_> = events.iter().map(|(n, _)| n.clone().unwrap()).collect();
        assert_eq!(names, vec!["new_message", "new_message", "finish"]);

        let first: Value = serde_json::from_str(&events[0].1).unwrap();
        assert_eq!(first["response"], "Hi");
        assert_eq!(first["history"], serde_json::json!([["Hello", ""]]));
        assert_eq!(first["finish"], false);

        let second: Value = serde_json::from_str(&events[1].1).unwrap();
        assert_eq!(second["history"], serde_json::json!([["Hello", "Hi"]]));

        let last: Value = serde_json::from_str(&events[2].1).unwrap();
        assert_eq!(last["finish"], true);
        assert_eq!(last["response"], "!");
        assert_eq!(last["history"], serde_json::json!([["Hello", "Hi there!"]]));
        let field = |name: &str| -> Vec<String> {
            body.lines()
                .filter_map(|l| l.strip_prefix(name))
                .map(|v| v.trim_start().to_string())
                .collect()
        };
        assert_eq!(field("retry:"), vec!["15000"; 3]);
        assert_eq!(field("id:"), vec!["message_id", "message_id", "finish_id"]);
    }

    #[tokio::test]
    async fn simple_sse_reports_failure_in_band() {
        let fragments = stream::iter(vec![
            fragment("partial", None),
            Err(CoreError::Generation("boom".to_string())),
        ]);
        let events = parse(&render(encode_simple_sse(fragments, "q".into(), vec![])).await);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].0.as_deref(), Some("error"));
        let v: Value = serde_json::from_str(&events[1].1).unwrap();
        assert_eq!(v["finish"], true);
        assert!(v["error"].as_str().unwrap().contains("boom"));
        assert_eq!(v["history"], serde_json::json!([["q", "partial"]]));
    }

    #[tokio::test]
    async fn openai_chunks_are_framed() {
        let fragments = stream::iter(vec![
            fragment("Hel", None),
            fragment("lo", Some(FinishReason::Length)),
        ]);
        let events = parse(&render(encode_openai_chunks(fragments, "m".into())).await);
        let data: Vec<&str> = events.iter().map(|(_, d)| d.as_str()).collect();
        assert_eq!(data.len(), 5);
        assert_eq!(*data.last().unwrap(), "[DONE]");

        let opening: Value = serde_json::from_str(data[0]).unwrap();
        assert_eq!(opening["object"], "chat.completion.chunk");
        assert_eq!(opening["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(opening["choices"][0]["delta"]["content"], "");

        let text: String = data[1..3]
            .iter()
            .map(|d| serde_json::from_str::<Value>(d).unwrap()["choices"][0]["delta"]["content"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(text, "Hello");

        let closing: Value = serde_json::from_str(data[3]).unwrap();
        assert_eq!(closing["choices"][0]["finish_reason"], "length");
        assert_eq!(closing["choices"][0]["delta"], serde_json::json!({}));

        let ids: Vec<String> = data[..4]
            .iter()
            .map(|d| serde_json::from_str::<Value>(d).unwrap()["id"].as_str().unwrap().to_string())
            .collect();
        assert!(ids.iter().all(|id| id == &ids[0] && id.starts_with("chatcmpl-")));
    }

    #[tokio::test]
    async fn openai_chunks_end_with_error_then_done() {
        let fragments = stream::iter(vec![Err(CoreError::Generation("boom".to_string()))]);
        let events = parse(&render(encode_openai_chunks(fragments, "m".into())).await);
        let data: Vec<&str> = events.iter().map(|(_, d)| d.as_str()).collect();
        assert_eq!(data.len(), 3);
        let err: Value = serde_json::from_str(data[1]).unwrap();
        assert_eq!(err["error"]["type"], "model_error");
        assert_eq!(data[2], "[DONE]");
    }

    #[test]
    fn completion_response_reports_usage() {
        let resp = completion_response(
            "m".to_string(),
            Completion {
                text: "\n\nanswer".to_string(),
                finish_reason: FinishReason::Stop,
                prompt_tokens: 7,
                completion_tokens: 3,
            },
        );
        assert_eq!(resp.object, "chat.completion");
        assert_eq!(resp.choices[0].message.content, "answer");
        assert_eq!(resp.usage.total_tokens, 10);
    }
}
