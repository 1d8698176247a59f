//! Answer Synthesizer: the pipeline's final LLM-touching node. Takes the
//! aggregated terminal frames and turns them into a human-readable answer.
//! Failure here is never fatal to the run — a query that executed correctly
//! but couldn't be summarized should still return its `aggregator_resp` data.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::domain::ResultFrame;
use crate::error::Result;
use crate::llm::StructuredLlmExt;

const MAX_ROWS_PER_FRAME: usize = 50;

fn response_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "answer": {"type": "string"}
        },
        "required": ["answer"],
        "additionalProperties": false
    })
}

#[derive(Debug, Deserialize)]
struct SynthesisResponse {
    answer: String,
}

/// Summarize `terminal_results` against `user_query`, noting any subqueries
/// whose results never made it into an aggregated frame. Truncates each
/// frame to `MAX_ROWS_PER_FRAME` rows before it goes into the prompt so a
/// wide result set doesn't blow the LLM's context budget.
pub async fn synthesize(
    llm: &dyn crate::llm::StructuredLlm,
    user_query: &str,
    terminal_results: &BTreeMap<String, ResultFrame>,
    unmapped_subqueries: &[String],
) -> Result<String> {
    let truncated: BTreeMap<&str, serde_json::Value> = terminal_results
        .iter()
        .map(|(id, frame)| {
            let rows: Vec<&Vec<serde_json::Value>> = frame.rows.iter().take(MAX_ROWS_PER_FRAME).collect();
            (
                id.as_str(),
                serde_json::json!({
                    "columns": frame.columns,
                    "rows": rows,
                    "row_count": frame.row_count,
                    "truncated": frame.rows.len() > MAX_ROWS_PER_FRAME,
                }),
            )
        })
        .collect();

    let prompt = serde_json::json!({
        "user_query": user_query,
        "terminal_results": truncated,
        "unmapped_subqueries": unmapped_subqueries,
        "instruction": "Write a concise, direct natural-language answer to user_query using only the data in terminal_results. Call out unmapped_subqueries if any are present.",
    })
    .to_string();

    let response: SynthesisResponse = llm.invoke_typed(&prompt, &response_schema()).await?;
    Ok(response.answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::fakes::ScriptedLlm;

    #[tokio::test]
    async fn synthesize_returns_llm_answer() {
        let llm = ScriptedLlm::new(vec![serde_json::json!({"answer": "there were 3 orders"})]);
        let mut results = BTreeMap::new();
        results.insert("n1".to_string(), ResultFrame::ok(vec!["count".into()], vec![vec![serde_json::json!(3)]]));

        let answer = synthesize(&llm, "how many orders?", &results, &[]).await.unwrap();
        assert_eq!(answer, "there were 3 orders");
    }

    #[tokio::test]
    async fn malformed_llm_response_is_an_error_not_a_panic() {
        let llm = ScriptedLlm::new(vec![serde_json::json!({"wrong_field": "x"})]);
        let results = BTreeMap::new();
        let result = synthesize(&llm, "q", &results, &[]).await;
        assert!(result.is_err());
    }
}
