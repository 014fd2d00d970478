//! Text-completion backends used to phrase answers.
mod openai;

pub use openai::OpenAiCompatibleBackend;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("completion endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("completion response contained no text")]
    EmptyResponse,
}

/// Request envelope shared by completion backends.
#[derive(Debug, Clone, Copy)]
pub struct CompletionRequest<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// Trait implemented by concrete completion providers.
pub trait CompletionBackend: Send + Sync {
    fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, LlmError>;
}
