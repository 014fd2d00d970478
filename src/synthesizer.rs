//! Turns retrieved passages and a question into a natural-language answer.
//!
//! The synthesizer never returns `Err`: backend failures become `Failed`
//! answers carrying an error message for the user.
use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use crate::llm::{CompletionBackend, CompletionRequest};
use crate::models::Passage;

pub const SYSTEM_PROMPT: &str =
    "You are a helpful document assistant that provides clear, formatted answers.";

pub const NOT_FOUND_TEXT: &str = "I couldn't find relevant information in the indexed corpus.";

pub const TRUNCATION_MARKER: &str = "[passage truncated]";

const INSTRUCTIONS: &str = "Instructions:
- Provide a clear, well-formatted answer
- Use bullet points for lists
- If the answer isn't in the context, say so
- Be professional and concise

Answer:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerOutcome {
    /// Text produced by the completion backend.
    Generated,
    /// The engine has no indexed corpus.
    NoDocuments,
    /// Retrieval returned nothing.
    NotFound,
    /// Ingestion has not finished yet.
    NotReady,
    /// Retrieval or generation failed; `text` explains why.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    pub outcome: AnswerOutcome,
    /// Sources of the passages that went into the prompt, in order.
    pub sources: Vec<String>,
}

impl Answer {
    pub fn new(question: &str, text: impl Into<String>, outcome: AnswerOutcome) -> Self {
        Self {
            question: question.to_string(),
            text: text.into(),
            outcome,
            sources: Vec::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, AnswerOutcome::Failed | AnswerOutcome::NotReady)
    }
}

/// Approximate token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisOptions {
    /// Sampling temperature. Non-zero, so answers are not reproducible.
    pub temperature: f32,
    pub max_tokens: usize,
    /// Upper bound on the user prompt, in characters.
    pub max_prompt_chars: usize,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 500,
            max_prompt_chars: 12_000,
        }
    }
}

pub struct AnswerSynthesizer {
    backend: Arc<dyn CompletionBackend>,
    options: SynthesisOptions,
}

/// The user prompt plus the passages that made it in.
#[derive(Debug)]
struct FittedPrompt {
    prompt: String,
    sources: Vec<String>,
}

impl AnswerSynthesizer {
    pub fn new(backend: Arc<dyn CompletionBackend>, options: SynthesisOptions) -> Self {
        Self { backend, options }
    }

    pub fn options(&self) -> &SynthesisOptions {
        &self.options
    }

    /// Answer `question` from `passages`, given most similar first.
    pub fn generate(&self, question: &str, passages: &[Passage]) -> Answer {
        if passages.is_empty() {
            return Answer::new(question, NOT_FOUND_TEXT, AnswerOutcome::NotFound);
        }

        let Some(fitted) = self.fit_prompt(question, passages) else {
            error!(
                "Question does not fit the prompt budget of {} characters",
                self.options.max_prompt_chars
            );
            return Answer::new(
                question,
                format!(
                    "Error generating answer: the question is too long to fit the prompt budget of {} characters.",
                    self.options.max_prompt_chars
                ),
                AnswerOutcome::Failed,
            );
        };
        info!(
            "Generating answer from {} passages (~{} prompt tokens)",
            fitted.sources.len(),
            estimate_tokens(&fitted.prompt)
        );

        let request = CompletionRequest {
            system: SYSTEM_PROMPT,
            prompt: &fitted.prompt,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };
        match self.backend.complete(&request) {
            Ok(text) => {
                let mut seen = HashSet::new();
                let mut sources = fitted.sources;
                sources.retain(|source| seen.insert(source.clone()));
                Answer {
                    question: question.to_string(),
                    text,
                    outcome: AnswerOutcome::Generated,
                    sources,
                }
            }
            Err(e) => {
                error!("Completion failed: {e}");
                Answer::new(
                    question,
                    format!("Error generating answer: {e}"),
                    AnswerOutcome::Failed,
                )
            }
        }
    }

    /// Drop passages from the end until the prompt fits. If the first one
    /// alone is too long it is truncated. `None` when nothing fits.
    fn fit_prompt(&self, question: &str, passages: &[Passage]) -> Option<FittedPrompt> {
        let budget = self.options.max_prompt_chars;
        if render_prompt(question, &[]).chars().count() > budget {
            return None;
        }

        for n in (1..=passages.len()).rev() {
            let prompt = render_prompt(question, &passages[..n]);
            if prompt.chars().count() <= budget {
                return Some(FittedPrompt {
                    prompt,
                    sources: passages[..n].iter().map(|p| p.source.clone()).collect(),
                });
            }
        }

        let first = &passages[0];
        let overhead = render_prompt(
            question,
            &[Passage {
                text: format!(" {TRUNCATION_MARKER}"),
                source: first.source.clone(),
            }],
        )
        .chars()
        .count();
        let available = budget.checked_sub(overhead)?;
        let prefix: String = first.text.chars().take(available).collect();
        let truncated = Passage {
            text: format!("{prefix} {TRUNCATION_MARKER}"),
            source: first.source.clone(),
        };
        Some(FittedPrompt {
            prompt: render_prompt(question, std::slice::from_ref(&truncated)),
            sources: vec![truncated.source],
        })
    }
}

fn render_prompt(question: &str, passages: &[Passage]) -> String {
    let context = passages
        .iter()
        .enumerate()
        .map(|(i, p)| format!("Passage {} (source: {}):\n{}", i + 1, p.source, p.text))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "You are a helpful document assistant. Answer the question based on the context below.\n\n\
         Context from the indexed corpus:\n{context}\n\n\
         Question: {question}\n\n\
         {INSTRUCTIONS}"
    )
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::llm::{CompletionBackend, CompletionRequest, LlmError};

    /// Records every prompt; replies with `reply`, or fails when it is `None`.
    pub(crate) struct RecordingBackend {
        pub reply: Option<String>,
        pub calls: AtomicUsize,
        pub prompts: Mutex<Vec<String>>,
    }

    impl RecordingBackend {
        pub(crate) fn replying(reply: &str) -> Self {
            Self {
                reply: Some(reply.to_string()),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                reply: None,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn last_prompt(&self) -> Option<String> {
            self.prompts.lock().unwrap().last().cloned()
        }
    }

    impl CompletionBackend for RecordingBackend {
        fn complete(&self, request: &CompletionRequest<'_>) -> Result<String, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(request.prompt.to_string());
            self.reply.clone().ok_or(LlmError::Status {
                status: 503,
                body: "service unavailable".into(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingBackend;
    use super::*;

    fn passage(source: &str, text: &str) -> Passage {
        Passage {
            text: text.into(),
            source: source.into(),
        }
    }

    fn synthesizer(backend: &Arc<RecordingBackend>, max_prompt_chars: usize) -> AnswerSynthesizer {
        AnswerSynthesizer::new(
            backend.clone(),
            SynthesisOptions {
                max_prompt_chars,
                ..SynthesisOptions::default()
            },
        )
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens("日本語"), 1);
    }

    #[test]
    fn test_no_passages_skips_backend() {
        let backend = Arc::new(RecordingBackend::replying("unused"));
        let answer = synthesizer(&backend, 12_000).generate("What color is the sky?", &[]);

        assert_eq!(answer.outcome, AnswerOutcome::NotFound);
        assert_eq!(answer.text, NOT_FOUND_TEXT);
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn test_prompt_layout() {
        let backend = Arc::new(RecordingBackend::replying("Blue."));
        let answer = synthesizer(&backend, 12_000).generate(
            "What color is the sky?",
            &[
                passage("sky.txt", "The sky is blue."),
                passage("water.txt", "Water is wet."),
            ],
        );

        assert_eq!(answer.outcome, AnswerOutcome::Generated);
        assert_eq!(answer.text, "Blue.");
        assert_eq!(answer.sources, vec!["sky.txt", "water.txt"]);

        let prompt = backend.last_prompt().unwrap();
        assert!(prompt.contains("Context from the indexed corpus:"));
        assert!(prompt.contains("Question: What color is the sky?"));
        let first = prompt.find("Passage 1 (source: sky.txt):\nThe sky is blue.").unwrap();
        let second = prompt.find("Passage 2 (source: water.txt):\nWater is wet.").unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_budget_drops_least_similar_passages() {
        let backend = Arc::new(RecordingBackend::replying("ok"));
        let question = "What color is the sky?";
        let passages = vec![
            passage("a.txt", &"a".repeat(100)),
            passage("b.txt", &"b".repeat(100)),
            passage("c.txt", &"c".repeat(100)),
        ];
        let two = render_prompt(question, &passages[..2]).chars().count();

        let answer = synthesizer(&backend, two).generate(question, &passages);
        assert_eq!(answer.sources, vec!["a.txt", "b.txt"]);
        let prompt = backend.last_prompt().unwrap();
        assert!(prompt.chars().count() <= two);
        assert!(!prompt.contains("c.txt"));
    }

    #[test]
    fn test_budget_truncates_first_passage() {
        let backend = Arc::new(RecordingBackend::replying("ok"));
        let question = "Why?";
        let base = render_prompt(question, &[]).chars().count();
        let budget = base + 80;

        let answer = synthesizer(&backend, budget)
            .generate(question, &[passage("long.txt", &"word ".repeat(100))]);
        assert_eq!(answer.outcome, AnswerOutcome::Generated);

        let prompt = backend.last_prompt().unwrap();
        assert!(prompt.chars().count() <= budget);
        assert!(prompt.contains(TRUNCATION_MARKER));
        assert!(prompt.contains("Passage 1 (source: long.txt)"));
    }

    #[test]
    fn test_oversized_question_fails_without_backend() {
        let backend = Arc::new(RecordingBackend::replying("unused"));
        let question = "why ".repeat(200);
        let answer = synthesizer(&backend, 300).generate(&question, &[passage("a.txt", "text")]);

        assert_eq!(answer.outcome, AnswerOutcome::Failed);
        assert!(answer.text.contains("too long"));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn test_backend_error_becomes_failed_answer() {
        let backend = Arc::new(RecordingBackend::failing());
        let answer = synthesizer(&backend, 12_000).generate("q", &[passage("a.txt", "text")]);

        assert_eq!(answer.outcome, AnswerOutcome::Failed);
        assert!(answer.is_error());
        assert!(answer.text.starts_with("Error generating answer:"));
        assert!(answer.text.contains("503"));
    }

    #[test]
    fn test_sources_keep_first_seen_order_without_repeats() {
        let backend = Arc::new(RecordingBackend::replying("ok"));
        let answer = synthesizer(&backend, 12_000).generate(
            "q",
            &[
                passage("a.txt", "first"),
                passage("b.txt", "second"),
                passage("a.txt", "third"),
            ],
        );

        assert_eq!(answer.outcome, AnswerOutcome::Generated);
        assert_eq!(answer.sources, vec!["a.txt".to_string(), "b.txt".to_string()]);
    }
}
