//! Turning model output into an [`InvoiceAnalysis`].

use serde_json::Value;
use thiserror::Error;

use crate::error::LlmError;
use crate::models::{InvoiceAnalysis, ReimbursementStatus};

#[derive(Debug, Error, PartialEq)]
pub enum AnalysisParseError {
    #[error("no JSON object found in model output")]
    NoJson,

    #[error("malformed JSON in model output: {0}")]
    Malformed(String),

    #[error("missing or invalid field {0}")]
    Field(&'static str),
}

/// Parse the model's answer. Code fences and surrounding prose are tolerated,
/// amounts may be numbers or strings such as `"$1,250.50"`.
pub fn parse_analysis(raw: &str) -> Result<InvoiceAnalysis, AnalysisParseError> {
    let json = extract_json_object(raw).ok_or(AnalysisParseError::NoJson)?;
    let value: Value =
        serde_json::from_str(json).map_err(|e| AnalysisParseError::Malformed(e.to_string()))?;

    let status = value
        .get("status")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<ReimbursementStatus>().ok())
        .ok_or(AnalysisParseError::Field("status"))?;

    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("No reason provided")
        .to_string();

    let policy_violations = match value.get("policy_violations") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };

    let invoice_date = value
        .get("invoice_date")
        .and_then(Value::as_str)
        .and_then(|s| chrono::NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
        .map(|d| d.format("%Y-%m-%d").to_string());

    Ok(InvoiceAnalysis {
        status,
        reason,
        reimbursable_amount: amount_field(&value, "reimbursable_amount"),
        total_amount: amount_field(&value, "total_amount"),
        policy_violations,
        compliance_notes: value
            .get("compliance_notes")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string(),
        invoice_date,
        raw_response: None,
    })
}

impl InvoiceAnalysis {
    /// Placeholder for model output that could not be parsed
    pub fn unparsed(raw: String, error: &AnalysisParseError) -> Self {
        InvoiceAnalysis {
            status: ReimbursementStatus::PendingAnalysis,
            reason: format!("LLM analysis completed but the response could not be parsed: {}", error),
            reimbursable_amount: 0.0,
            total_amount: 0.0,
            policy_violations: Vec::new(),
            compliance_notes: "Manual review required".to_string(),
            invoice_date: None,
            raw_response: Some(raw),
        }
    }

    /// Result recorded when the model could not be reached
    pub fn failed(error: &LlmError) -> Self {
        InvoiceAnalysis {
            status: ReimbursementStatus::AnalysisFailed,
            reason: format!("LLM analysis error: {}", error),
            reimbursable_amount: 0.0,
            total_amount: 0.0,
            policy_violations: vec!["Technical error".to_string()],
            compliance_notes: "System error occurred".to_string(),
            invoice_date: None,
            raw_response: None,
        }
    }

    /// Make amounts consistent with the status.
    pub fn normalized(mut self) -> Self {
        self.total_amount = clean_amount(self.total_amount);
        self.reimbursable_amount = clean_amount(self.reimbursable_amount);

        if self.total_amount > 0.0 && self.reimbursable_amount > self.total_amount {
            self.reimbursable_amount = self.total_amount;
        }

        match self.status {
            ReimbursementStatus::Declined => self.reimbursable_amount = 0.0,
            ReimbursementStatus::FullyReimbursed if self.reimbursable_amount == 0.0 => {
                self.reimbursable_amount = self.total_amount;
            }
            _ => {}
        }
        self
    }
}

fn clean_amount(amount: f64) -> f64 {
    if amount.is_finite() && amount > 0.0 {
        (amount * 100.0).round() / 100.0
    } else {
        0.0
    }
}

fn amount_field(value: &Value, field: &str) -> f64 {
    match value.get(field) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_amount(s).unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Parse amounts like `"$1,250.50"`, `"125.5 USD"` or `"€ 80"`.
pub fn parse_amount(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().ok()
}

/// Slice out the outermost `{ ... }` of `raw`, skipping braces inside strings.
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
