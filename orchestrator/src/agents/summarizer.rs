// Summarizer Agent: grounded answer generation with page citations

use std::sync::Arc;

use tracing::{info, instrument};

use crate::context::{resolve_citations, AssembledContext};
use crate::error::GenerationError;
use crate::llm::GenerationClient;
use crate::models::{ChatMessage, Citation};
use crate::prompts::RAG_SYSTEM_PROMPT;

const HISTORY_WINDOW: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub citations: Vec<Citation>,
}

pub struct SummarizerAgent {
    llm: Arc<GenerationClient>,
}

impl SummarizerAgent {
    pub fn new(llm: Arc<GenerationClient>) -> Self {
        Self { llm }
    }

    #[instrument(skip_all, fields(segments = context.sources.len(), history = history.len()))]
    pub async fn summarize(
        &self,
        question: &str,
        context: &AssembledContext,
        history: &[ChatMessage],
    ) -> Result<Answer, GenerationError> {
        let context_block = context_block(context, history);
        let user_text = format!("USER QUESTION: {}", question);

        let text = self
            .llm
            .generate(RAG_SYSTEM_PROMPT, &context_block, &user_text)
            .await?;
        let citations = resolve_citations(&text, context);
        info!(citations = citations.len(), "Summarizer: answer generated");

        Ok(Answer { text, citations })
    }
}

/// `CONTEXT:` followed by the assembled passages and, when present, the most
/// recent chat turns.
pub fn context_block(context: &AssembledContext, history: &[ChatMessage]) -> String {
    let mut block = format!("CONTEXT:\n{}", context.text);

    let recent = &history[history.len().saturating_sub(HISTORY_WINDOW)..];
    if !recent.is_empty() {
        block.push_str("\n\nCHAT HISTORY:");
        for message in recent {
            block.push('\n');
            block.push_str(&message.role);
            block.push_str(": ");
            block.push_str(message.content.trim());
        }
    }

    block
}
