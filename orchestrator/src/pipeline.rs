//! Per-turn orchestration: refine, retrieve and answer, finalize.
//!
//! A turn owns its `PipelineState` and moves it through the stage functions
//! in order. Operational failures end in a `TurnStatus` with a user-facing
//! message; only contract violations surface as `PipelineError`.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::agents::{RefinerAgent, RetrieverAgent, SummarizerAgent};
use crate::context::{assemble, ContextBudget};
use crate::error::{PipelineError, RetrievalError, GENERATION_FAILED_MESSAGE};
use crate::metrics;
use crate::models::{
    ChatMessage, Citation, RetrievedDocument, StageTimings, TurnStatus, REFINE_QUERY_MS, RETRIEVE_DOCS_MS,
    TOTAL_MS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Refining,
    Retrieving,
    Retrieved,
    Failed,
    Finalizing,
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutcome {
    pub answer: String,
    pub documents: Vec<RetrievedDocument>,
    pub timings: StageTimings,
    pub refined_queries: Vec<String>,
    pub citations: Vec<Citation>,
    pub status: TurnStatus,
    /// True when refinement failed and the original question was searched.
    pub refinement_fell_back: bool,
    /// Every stage the turn passed through, in order.
    pub stages: Vec<Stage>,
}

struct PipelineState<'h> {
    stage: Stage,
    question: String,
    history: &'h [ChatMessage],
    refined_queries: Vec<String>,
    refinement_fell_back: bool,
    answer: String,
    documents: Vec<RetrievedDocument>,
    citations: Vec<Citation>,
    status: TurnStatus,
    timings: StageTimings,
    stages: Vec<Stage>,
}

impl<'h> PipelineState<'h> {
    fn new(question: &str, history: &'h [ChatMessage]) -> Self {
        Self {
            stage: Stage::Start,
            question: question.to_string(),
            history,
            refined_queries: Vec::new(),
            refinement_fell_back: false,
            answer: String::new(),
            documents: Vec::new(),
            citations: Vec::new(),
            status: TurnStatus::Answered,
            timings: StageTimings::default(),
            stages: vec![Stage::Start],
        }
    }

    fn advance(&mut self, stage: Stage) {
        debug!(from = ?self.stage, to = ?stage, "stage transition");
        self.stage = stage;
        self.stages.push(stage);
    }

    fn fail(mut self, status: TurnStatus, message: String) -> Self {
        self.advance(Stage::Failed);
        self.status = status;
        self.answer = message;
        self
    }
}

pub struct RagPipeline {
    refiner: RefinerAgent,
    retriever: Arc<RetrieverAgent>,
    summarizer: SummarizerAgent,
    budget: ContextBudget,
}

impl RagPipeline {
    pub fn new(
        refiner: RefinerAgent,
        retriever: Arc<RetrieverAgent>,
        summarizer: SummarizerAgent,
        budget: ContextBudget,
    ) -> Self {
        Self {
            refiner,
            retriever,
            summarizer,
            budget,
        }
    }

    #[instrument(skip_all, fields(query_len = query.len(), history = chat_history.len()))]
    pub async fn run(&self, query: &str, chat_history: &[ChatMessage]) -> Result<PipelineOutcome, PipelineError> {
        let state = PipelineState::new(query, chat_history);
        let state = self.refine(state).await;
        let state = self.retrieve(state).await?;
        Ok(self.finalize(state))
    }

    async fn refine<'h>(&self, mut state: PipelineState<'h>) -> PipelineState<'h> {
        state.advance(Stage::Refining);
        let started = Instant::now();

        let refined = self.refiner.refine(&state.question).await;
        if refined.fell_back {
            info!("refinement fell back to the original question");
        }
        state.refinement_fell_back = refined.fell_back;
        state.refined_queries = refined.variants;

        record(&mut state.timings, REFINE_QUERY_MS, started);
        state
    }

    async fn retrieve<'h>(&self, mut state: PipelineState<'h>) -> Result<PipelineState<'h>, PipelineError> {
        state.advance(Stage::Retrieving);
        let started = Instant::now();

        let mut state = self.retrieve_and_answer(state).await?;
        record(&mut state.timings, RETRIEVE_DOCS_MS, started);
        Ok(state)
    }

    async fn retrieve_and_answer<'h>(&self, mut state: PipelineState<'h>) -> Result<PipelineState<'h>, PipelineError> {
        let retrieved = match self
            .retriever
            .retrieve(&state.question, &state.refined_queries)
            .await
        {
            Ok(set) => set,
            Err(RetrievalError::Contract(message)) => return Err(PipelineError::Contract(message)),
            Err(err) => {
                warn!(error = %err, "retrieval produced no candidates");
                let message = err.user_message();
                return Ok(state.fail(err.status(), message));
            }
        };

        let context = assemble(retrieved.candidates(), &self.budget);
        if context.is_empty() {
            warn!(dropped = context.dropped, "no candidate fits the context budget");
            let err = RetrievalError::NoMatches;
            let message = err.user_message();
            return Ok(state.fail(err.status(), message));
        }
        state.documents = context.sources.iter().map(RetrievedDocument::from).collect();

        match self
            .summarizer
            .summarize(&state.question, &context, state.history)
            .await
        {
            Ok(answer) => {
                state.answer = answer.text;
                state.citations = answer.citations;
                state.status = TurnStatus::Answered;
                state.advance(Stage::Retrieved);
                Ok(state)
            }
            Err(err) => {
                warn!(error = %err, "answer generation exhausted its retries");
                Ok(state.fail(TurnStatus::GenerationFailed, GENERATION_FAILED_MESSAGE.to_string()))
            }
        }
    }

    fn finalize(&self, mut state: PipelineState<'_>) -> PipelineOutcome {
        let settled = state.stage;
        state.advance(Stage::Finalizing);
        let total = state.timings.finalize();
        metrics::observe_stage(TOTAL_MS, total);
        metrics::count_turn(state.status);

        state.advance(Stage::Done);
        info!(
            status = state.status.as_str(),
            stage = ?settled,
            total_ms = total,
            documents = state.documents.len(),
            citations = state.citations.len(),
            "turn complete"
        );

        PipelineOutcome {
            answer: state.answer,
            documents: state.documents,
            timings: state.timings,
            refined_queries: state.refined_queries,
            citations: state.citations,
            status: state.status,
            refinement_fell_back: state.refinement_fell_back,
            stages: state.stages,
        }
    }
}

fn record(timings: &mut StageTimings, stage: &str, started: Instant) {
    let elapsed = started.elapsed();
    timings.record(stage, elapsed);
    metrics::observe_stage(stage, elapsed.as_secs_f64() * 1000.0);
}
