// Refiner Agent: rewrites the user question into retrieval-friendly search queries

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::RefineMode;
use crate::llm::GenerationClient;
use crate::prompts::{QUERY_GEN_PROMPT, QUERY_REWRITE_PROMPT};

pub const MAX_QUERY_VARIANTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinedQuery {
    /// Never empty. Holds only the original question when refinement failed.
    pub variants: Vec<String>,
    pub fell_back: bool,
}

impl RefinedQuery {
    fn fallback(original: &str) -> Self {
        Self {
            variants: vec![original.to_string()],
            fell_back: true,
        }
    }

    /// The variants one per line, the form shown to users.
    pub fn joined(&self) -> String {
        self.variants.join("\n")
    }
}

pub struct RefinerAgent {
    llm: Arc<GenerationClient>,
    mode: RefineMode,
}

impl RefinerAgent {
    pub fn new(llm: Arc<GenerationClient>, mode: RefineMode) -> Self {
        Self { llm, mode }
    }

    /// Never fails: any generation problem degrades to the original question.
    #[instrument(skip_all, fields(mode = ?self.mode))]
    pub async fn refine(&self, question: &str) -> RefinedQuery {
        let (instruction, max_variants) = match self.mode {
            RefineMode::Single => (QUERY_REWRITE_PROMPT, 1),
            RefineMode::Multi => (QUERY_GEN_PROMPT, MAX_QUERY_VARIANTS),
        };
        let user_text = format!("User Question: {}", question);

        let raw = match self.llm.generate(instruction, "", &user_text).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "Refiner: generation failed, using the original question");
                return RefinedQuery::fallback(question);
            }
        };

        let variants = parse_queries(&raw, max_variants);
        if variants.is_empty() {
            warn!("Refiner: model returned no usable queries, using the original question");
            return RefinedQuery::fallback(question);
        }

        info!(count = variants.len(), "Refiner: generated search queries");
        RefinedQuery {
            variants,
            fell_back: false,
        }
    }

    pub async fn generate_refined_query(&self, question: &str) -> String {
        self.refine(question).await.joined()
    }
}

/// One query per non-empty line, with list markers and wrapping quotes
/// removed. Case-insensitive duplicates are dropped.
pub fn parse_queries(raw: &str, max_variants: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.lines()
        .map(strip_marker)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_lowercase()))
        .map(str::to_string)
        .take(max_variants)
        .collect()
}

fn strip_marker(line: &str) -> &str {
    let mut line = line.trim();

    // "1. " or "2) ", never "1.5" or "2023:"
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if (1..=2).contains(&digits) {
        if let Some(rest) = line[digits..].strip_prefix(['.', ')']) {
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                line = rest.trim_start();
            }
        }
    }
    line = line.trim_start_matches(['-', '*', '•']).trim();

    line.trim_matches(|c| c == '"' || c == '\'' || c == '`').trim()
}
