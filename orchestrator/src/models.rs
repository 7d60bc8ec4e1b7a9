use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unit of ingested text as stored in the vector collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub source_page: Option<u32>,
}

impl Chunk {
    pub fn new(id: impl Into<String>, content: impl Into<String>, source_page: Option<u32>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source_page,
        }
    }

    /// `[Page P]`, or `[Page ?]` when the page is unknown.
    pub fn citation_tag(&self) -> String {
        match self.source_page {
            Some(page) => format!("[Page {}]", page),
            None => "[Page ?]".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    pub fn is_well_formed(&self) -> bool {
        self.indices.len() == self.values.len()
    }
}

/// A chunk together with the vectors it is indexed under. Only exists during ingestion.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
}

/// A retrieval hit. `rank` is 1-based within the list that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk: Chunk,
    pub score: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreScheme {
    Similarity,
    Fusion,
    Rerank,
}

/// Ordered, de-duplicated and bounded list of candidates.
///
/// Scores never increase down the list. Exact ties keep the order the
/// candidates were supplied in, so producers decide how ties break.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSet {
    candidates: Vec<Candidate>,
    scheme: ScoreScheme,
}

impl RetrievalSet {
    pub fn new(mut candidates: Vec<Candidate>, scheme: ScoreScheme, limit: usize) -> Self {
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut seen = HashSet::with_capacity(candidates.len());
        candidates.retain(|candidate| seen.insert(candidate.chunk.id.clone()));
        candidates.truncate(limit);

        for (position, candidate) in candidates.iter_mut().enumerate() {
            candidate.rank = position + 1;
        }

        Self { candidates, scheme }
    }

    pub fn empty(scheme: ScoreScheme) -> Self {
        Self {
            candidates: Vec::new(),
            scheme,
        }
    }

    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    pub fn scheme(&self) -> ScoreScheme {
        self.scheme
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub page: Option<u32>,
    pub score: f64,
}

impl From<&Candidate> for RetrievedDocument {
    fn from(candidate: &Candidate) -> Self {
        Self {
            content: candidate.chunk.content.clone(),
            page: candidate.chunk.source_page,
            score: candidate.score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceDocument {
    pub content: String,
    pub page: Option<u32>,
}

impl From<&Chunk> for SourceDocument {
    fn from(chunk: &Chunk) -> Self {
        Self {
            content: chunk.content.clone(),
            page: chunk.source_page,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub page: u32,
    pub text: String,
    pub relevance_score: f64,
}

pub const REFINE_QUERY_MS: &str = "refine_query_ms";
pub const RETRIEVE_DOCS_MS: &str = "retrieve_docs_ms";
pub const TOTAL_MS: &str = "total_ms";

/// Stage name → elapsed milliseconds. Entries only ever grow.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct StageTimings(BTreeMap<String, f64>);

impl StageTimings {
    pub fn record(&mut self, stage: &str, elapsed: Duration) {
        self.record_ms(stage, elapsed.as_secs_f64() * 1000.0);
    }

    pub fn record_ms(&mut self, stage: &str, millis: f64) {
        *self.0.entry(stage.to_string()).or_insert(0.0) += millis.max(0.0);
    }

    pub fn get(&self, stage: &str) -> Option<f64> {
        self.0.get(stage).copied()
    }

    pub fn stages(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(stage, millis)| (stage.as_str(), *millis))
    }

    /// Stores `total_ms` as the sum of every other recorded stage and returns it.
    pub fn finalize(&mut self) -> f64 {
        let total = self
            .0
            .iter()
            .filter(|(stage, _)| stage.as_str() != TOTAL_MS)
            .fold(0.0, |acc, (_, millis)| acc + millis);
        self.0.insert(TOTAL_MS.to_string(), total);
        total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Answered,
    NotIngested,
    NoMatches,
    ResourceUnavailable,
    GenerationFailed,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Answered => "answered",
            TurnStatus::NotIngested => "not_ingested",
            TurnStatus::NoMatches => "no_matches",
            TurnStatus::ResourceUnavailable => "resource_unavailable",
            TurnStatus::GenerationFailed => "generation_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ComplianceVerdict {
    Compliant,
    MinorIssues,
    NonCompliant,
}

impl ComplianceVerdict {
    /// Reads the verdict out of an audit report. The last verdict emoji
    /// wins; without one, the last `Verdict:` or `Status:` line decides.
    /// Anything unrecognised is treated as non-compliant.
    pub fn from_report(report: &str) -> Self {
        let marked = report.chars().rev().find_map(|c| match c {
            '❌' => Some(ComplianceVerdict::NonCompliant),
            '⚠' => Some(ComplianceVerdict::MinorIssues),
            '✅' => Some(ComplianceVerdict::Compliant),
            _ => None,
        });
        if let Some(verdict) = marked {
            return verdict;
        }

        report
            .lines()
            .rev()
            .find_map(|line| {
                let lowered = line.to_lowercase();
                let (label, value) = lowered.split_once(':')?;
                if !(label.contains("verdict") || label.contains("status")) {
                    return None;
                }
                Self::from_label(value.trim_start_matches(|c: char| !c.is_alphanumeric()))
            })
            .unwrap_or(ComplianceVerdict::NonCompliant)
    }

    fn from_label(label: &str) -> Option<Self> {
        if label.starts_with("non-compliant") || label.starts_with("non compliant") {
            Some(ComplianceVerdict::NonCompliant)
        } else if label.starts_with("minor issues") {
            Some(ComplianceVerdict::MinorIssues)
        } else if label.starts_with("compliant") {
            Some(ComplianceVerdict::Compliant)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleAuditResult {
    pub drafted_rules: String,
    pub compliance_report: String,
    pub verdict: ComplianceVerdict,
    pub sources: Vec<Chunk>,
    pub generated_at: DateTime<Utc>,
}

// API Request/Response models
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub chat_history: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    pub request_id: Uuid,
    pub answer: String,
    pub status: TurnStatus,
    pub documents: Vec<RetrievedDocument>,
    pub citations: Vec<Citation>,
    pub timings: StageTimings,
    pub refined_queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct RuleRequest {
    pub organization_context: String,
    pub custom_rules: String,
}

#[derive(Debug, Serialize)]
pub struct RuleResponse {
    pub request_id: Uuid,
    pub drafted_rules: String,
    pub compliance_report: String,
    pub verdict: ComplianceVerdict,
    pub source_documents: Vec<SourceDocument>,
    pub generated_at: DateTime<Utc>,
}

impl RuleResponse {
    pub fn from_audit(request_id: Uuid, audit: RuleAuditResult) -> Self {
        Self {
            request_id,
            source_documents: audit.sources.iter().map(SourceDocument::from).collect(),
            drafted_rules: audit.drafted_rules,
            compliance_report: audit.compliance_report,
            verdict: audit.verdict,
            generated_at: audit.generated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub collection: String,
    pub filename: String,
    pub pages: usize,
    pub chunks_indexed: usize,
}
