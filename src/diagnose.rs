//! Diagnosis generation from the first record of a finished search.

use crate::error::{AgentError, Result};
use crate::llm::{prompts, ChatModel, ChatRequest, Message};
use crate::query::Intent;
use crate::search::ResultSet;
use serde::Serialize;

/// Returned instead of a model reply when the search found nothing.
pub const NO_RESULTS_TEXT: &str = "No Splunk results found to analyze.";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosisReport {
    /// The model's reply, unparsed, or [`NO_RESULTS_TEXT`].
    pub text: String,
    /// False when the empty-result short circuit skipped the model.
    pub from_model: bool,
}

impl DiagnosisReport {
    fn no_results() -> Self {
        Self {
            text: NO_RESULTS_TEXT.to_string(),
            from_model: false,
        }
    }
}

/// Ask the model for a root cause and fix for `results`.
///
/// An empty result set never reaches the model. Otherwise only the first
/// record's raw text is sent; parsing the reply is left to remediation.
pub async fn diagnose(
    model: &dyn ChatModel,
    target: &str,
    intent: Intent,
    query: &str,
    results: &ResultSet,
    temperature: f32,
) -> Result<DiagnosisReport> {
    let Some(raw_log) = results.first_raw_text() else {
        tracing::info!(target_app = target, "no search results, skipping diagnosis");
        return Ok(DiagnosisReport::no_results());
    };

    let prompt = prompts::diagnostic_prompt(target, intent.name(), query, &raw_log);
    let request = ChatRequest::new(vec![Message::user(prompt)]).with_temperature(temperature);

    tracing::debug!(target_app = target, %intent, "requesting diagnosis");
    let reply = model
        .complete(request)
        .await
        .map_err(|e| AgentError::Model(format!("{:#}", e)))?;
    let text = reply
        .text_content()
        .ok_or_else(|| AgentError::Model("the model returned an empty diagnosis".to_string()))?
        .to_string();

    Ok(DiagnosisReport {
        text,
        from_model: true,
    })
}
