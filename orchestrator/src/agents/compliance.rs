// Compliance Agent: drafts organizational rules and audits them against retrieved law

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::agents::retriever::RetrieverAgent;
use crate::context::{assemble, ContextBudget};
use crate::error::{PipelineError, RetrievalError, GENERATION_FAILED_MESSAGE};
use crate::llm::GenerationClient;
use crate::models::{Chunk, ComplianceVerdict, RuleAuditResult};
use crate::prompts::{COMPLIANCE_CHECK_PROMPT, RULE_GENERATION_PROMPT};

pub struct ComplianceAgent {
    retriever: Arc<RetrieverAgent>,
    llm: Arc<GenerationClient>,
    budget: ContextBudget,
}

impl ComplianceAgent {
    pub fn new(retriever: Arc<RetrieverAgent>, llm: Arc<GenerationClient>, budget: ContextBudget) -> Self {
        Self { retriever, llm, budget }
    }

    #[instrument(skip_all)]
    pub async fn generate_compliant_rules(
        &self,
        organization_context: &str,
        custom_rules: &str,
    ) -> Result<RuleAuditResult, PipelineError> {
        let query = format!("{}\n{}", organization_context.trim(), custom_rules.trim());

        let retrieved = match self.retriever.retrieve(&query, &[query.clone()]).await {
            Ok(set) => set,
            Err(RetrievalError::Contract(message)) => return Err(PipelineError::Contract(message)),
            Err(err) => {
                warn!(error = %err, "Compliance: no legal grounding available");
                return Ok(unavailable(&err));
            }
        };

        let context = assemble(retrieved.candidates(), &self.budget);
        if context.is_empty() {
            return Ok(unavailable(&RetrievalError::NoMatches));
        }

        let draft_input = format!(
            "User Context:\n{}\n\nUser Custom Rules:\n{}\n\nLegal Context:\n{}",
            organization_context.trim(),
            custom_rules.trim(),
            context.text
        );
        let drafted_rules = match self
            .llm
            .generate(RULE_GENERATION_PROMPT, &draft_input, "Draft the organizational rules.")
            .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "Compliance: rule drafting failed");
                return Ok(generation_failed(context.sources.iter().map(|c| c.chunk.clone()).collect()));
            }
        };

        let audit_input = format!(
            "Drafted Rules:\n{}\n\nLegal Context:\n{}",
            drafted_rules, context.text
        );
        let compliance_report = match self
            .llm
            .generate(COMPLIANCE_CHECK_PROMPT, &audit_input, "Audit the drafted rules.")
            .await
        {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "Compliance: audit failed");
                GENERATION_FAILED_MESSAGE.to_string()
            }
        };

        let verdict = ComplianceVerdict::from_report(&compliance_report);
        info!(?verdict, sources = context.sources.len(), "Compliance: audit complete");

        Ok(RuleAuditResult {
            drafted_rules,
            compliance_report,
            verdict,
            sources: context.sources.into_iter().map(|c| c.chunk).collect(),
            generated_at: Utc::now(),
        })
    }
}

fn unavailable(err: &RetrievalError) -> RuleAuditResult {
    let message = err.user_message();
    RuleAuditResult {
        drafted_rules: message.clone(),
        compliance_report: message,
        verdict: ComplianceVerdict::NonCompliant,
        sources: Vec::new(),
        generated_at: Utc::now(),
    }
}

fn generation_failed(sources: Vec<Chunk>) -> RuleAuditResult {
    RuleAuditResult {
        drafted_rules: GENERATION_FAILED_MESSAGE.to_string(),
        compliance_report: GENERATION_FAILED_MESSAGE.to_string(),
        verdict: ComplianceVerdict::NonCompliant,
        sources,
        generated_at: Utc::now(),
    }
}
