//! Readers for the stage outputs the coordinator branches on.
use crate::runner::Verdict;
use crate::workspace::{read_json, CandidatePaths, EvaluationDecision};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;

/// Interpret `outputs/gate.json`; `fail` is a hard deal-breaker.
pub fn gate_verdict(paths: &CandidatePaths) -> Result<Verdict> {
    let value: Value = read_json(&paths.gate_verdict_path())?;
    let verdict = value
        .get("verdict")
        .or_else(|| value.get("status"))
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("gate.json has no verdict"))?;
    match verdict.trim().to_ascii_lowercase().as_str() {
        "pass" => Ok(Verdict::Accept),
        "fail" => {
            let reasons: Vec<&str> = value
                .get("reasons")
                .and_then(Value::as_array)
                .map(|reasons| reasons.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let detail = if reasons.is_empty() {
                "screened out by gate".to_string()
            } else {
                format!("screened out by gate: {}", reasons.join("; "))
            };
            Ok(Verdict::ScreenOut(detail))
        }
        other => Err(anyhow!("unknown gate verdict {other:?}")),
    }
}

/// Read the decision from `outputs/evaluation.json`.
pub fn read_decision(paths: &CandidatePaths) -> Result<EvaluationDecision> {
    let value: Value = read_json(&paths.evaluation_path())?;
    let raw = value
        .get("decision")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("evaluation.json has no decision"))?;
    let normalized = raw.trim().to_ascii_uppercase().replace([' ', '-'], "_");
    serde_json::from_value(Value::String(normalized))
        .with_context(|| format!("unknown evaluation decision {raw:?}"))
}

