//! # streamchat-api
//!
//! HTTP chat gateway in front of a single [`LanguageModel`](streamchat_core::LanguageModel).
//!
//! ## Endpoints
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | `GET` | `/` | Greeting |
//! | `GET` | `/health` | Liveness check |
//! | `POST` | `/chat` | Full generation with prompt/history |
//! | `GET`/`POST` | `/stream_chat` | Named-event SSE stream (`new_message`, `finish`) |
//! | `GET` | `/v1/models` | The served model |
//! | `POST` | `/v1/chat/completions` | OpenAI chat completions (streaming + non-streaming) |
//! | `GET`/`PUT` | `/v1/generation/defaults` | Read or replace the generation defaults |

pub mod defaults;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod sessions;
pub mod streaming;
pub mod types;


pub use defaults::DefaultsStore;
pub use error::{ApiError, ApiResult};
pub use server::{build_router, serve, ModelCard, ServerConfig};
pub use sessions::{SessionLimiter, SessionSlot};
