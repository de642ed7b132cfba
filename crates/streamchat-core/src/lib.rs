//! # streamchat-core
//!
//! Prompt rendering, generation parameters, the language-model capability
//! boundary, and the streaming generation session used by the gateway.
//!
//! | Module | Role |
//! |---|---|
//! | [`chat_template`] | instruction/response prompt rendering from a history |
//! | [`model`] | [`LanguageModel`] trait and parameter resolution |
//! | [`session`] | [`GenerationSession`], a cancellable stream of fragments |
//! | [`tokenizer`] | HF `tokenizer.json` wrapper with left truncation |
//! | [`echo`] | loopback backend for running without weights |

pub mod chat_template;
pub mod echo;
pub mod error;
pub mod model;
pub mod session;
pub mod tokenizer;

pub use chat_template::{build_prompt, History, Turn};
pub use echo::EchoModel;
pub use error::{CoreError, CoreResult};
pub use model::{
    resolve_parameters, FinishReason, GenerateInput, GenerationDefaults, GenerationParameters,
    LanguageModel, ModelLimits, ParameterOverrides,
};
pub use session::{Completion, GenerationSession, StreamFragment};
pub use tokenizer::Tokenizer;
