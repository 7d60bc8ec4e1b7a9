//! Builds the bounded, citation-tagged context handed to the answer model and
//! reads citations back out of the generated answer.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::models::{Candidate, Chunk, Citation};

pub const DEFAULT_CONTEXT_TOP_K: usize = 10;
pub const DEFAULT_CONTEXT_MAX_CHARS: usize = 12_000;

const SEGMENT_SEPARATOR: &str = "\n\n";
const CITATION_EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    pub top_k: usize,
    pub max_chars: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_CONTEXT_TOP_K,
            max_chars: DEFAULT_CONTEXT_MAX_CHARS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    /// Candidates whose segments made it into `text`, in the same order.
    pub sources: Vec<Candidate>,
    /// Segments left out because of the character budget.
    pub dropped: usize,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn pages(&self) -> BTreeSet<u32> {
        self.sources
            .iter()
            .filter_map(|candidate| candidate.chunk.source_page)
            .collect()
    }
}

pub fn render_segment(chunk: &Chunk) -> String {
    format!("{}: {}", chunk.citation_tag(), chunk.content.trim())
}

/// Concatenates the top `budget.top_k` candidates in ranking order.
///
/// Segments are never cut: once a segment would push the text past
/// `budget.max_chars`, it and every lower-ranked segment are dropped.
pub fn assemble(candidates: &[Candidate], budget: &ContextBudget) -> AssembledContext {
    let considered = &candidates[..candidates.len().min(budget.top_k)];
    let mut assembled = AssembledContext::default();
    let mut used_chars = 0usize;

    for (position, candidate) in considered.iter().enumerate() {
        let segment = render_segment(&candidate.chunk);
        let separator = if assembled.text.is_empty() { "" } else { SEGMENT_SEPARATOR };
        let needed = separator.len() + segment.chars().count();

        if used_chars + needed > budget.max_chars {
            assembled.dropped = considered.len() - position;
            break;
        }

        assembled.text.push_str(separator);
        assembled.text.push_str(&segment);
        assembled.sources.push(candidate.clone());
        used_chars += needed;
    }

    debug!(
        segments = assembled.sources.len(),
        dropped = assembled.dropped,
        chars = used_chars,
        "context assembled"
    );
    assembled
}

/// Pages cited in `answer` as `[Page N]`, `[Page N, M]` or `[Pages N-M]`.
pub fn cited_pages(answer: &str) -> BTreeSet<u32> {
    let mut pages = BTreeSet::new();
    let mut rest = answer;

    while let Some(open) = rest.find('[') {
        rest = &rest[open + 1..];
        let Some(close) = rest.find(']') else { break };
        let inside = rest[..close].trim();
        rest = &rest[close + 1..];

        let body = if let Some(body) = inside.strip_prefix("Pages") {
            body
        } else if let Some(body) = inside.strip_prefix("Page") {
            body
        } else {
            continue;
        };

        for part in body.split([',', ';']) {
            let part = part.trim();
            match part.split_once('-') {
                Some((from, to)) => {
                    if let (Ok(from), Ok(to)) = (from.trim().parse::<u32>(), to.trim().parse::<u32>()) {
                        if from <= to && to - from <= 50 {
                            pages.extend(from..=to);
                        }
                    }
                }
                None => {
                    if let Ok(page) = part.parse::<u32>() {
                        pages.insert(page);
                    }
                }
            }
        }
    }

    pages
}

/// Matches the answer's citations against the context it was generated from.
/// Citations to pages that were not in the context are dropped.
pub fn resolve_citations(answer: &str, context: &AssembledContext) -> Vec<Citation> {
    let available = context.pages();
    let mut citations = Vec::new();

    for page in cited_pages(answer) {
        if !available.contains(&page) {
            warn!(page, "answer cites a page that was not in the context");
            continue;
        }
        if let Some(source) = context
            .sources
            .iter()
            .find(|candidate| candidate.chunk.source_page == Some(page))
        {
            citations.push(Citation {
                page,
                text: excerpt(&source.chunk.content),
                relevance_score: source.score,
            });
        }
    }

    citations
}

fn excerpt(content: &str) -> String {
    let trimmed = content.trim();
    match trimmed.char_indices().nth(CITATION_EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}
