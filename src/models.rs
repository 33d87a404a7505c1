//! Domain types shared by the pipelines, the vector store and the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Outcome of a reimbursement analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReimbursementStatus {
    #[serde(rename = "Fully Reimbursed")]
    FullyReimbursed,
    #[serde(rename = "Partially Reimbursed")]
    PartiallyReimbursed,
    #[serde(rename = "Declined")]
    Declined,
    #[serde(rename = "Pending Analysis")]
    PendingAnalysis,
    #[serde(rename = "Analysis Failed")]
    AnalysisFailed,
}

impl ReimbursementStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReimbursementStatus::FullyReimbursed => "Fully Reimbursed",
            ReimbursementStatus::PartiallyReimbursed => "Partially Reimbursed",
            ReimbursementStatus::Declined => "Declined",
            ReimbursementStatus::PendingAnalysis => "Pending Analysis",
            ReimbursementStatus::AnalysisFailed => "Analysis Failed",
        }
    }
}

impl fmt::Display for ReimbursementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReimbursementStatus {
    type Err = String;

    /// Lenient parsing: LLMs paraphrase status labels.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', '-'], " ");
        let status = if normalized.starts_with("partial") {
            ReimbursementStatus::PartiallyReimbursed
        } else if normalized.starts_with("full") || normalized == "approved" {
            ReimbursementStatus::FullyReimbursed
        } else if normalized.starts_with("declin") || normalized.starts_with("reject") {
            ReimbursementStatus::Declined
        } else if normalized.starts_with("pending") {
            ReimbursementStatus::PendingAnalysis
        } else if normalized.contains("failed") {
            ReimbursementStatus::AnalysisFailed
        } else {
            return Err(format!("unknown reimbursement status: {}", s));
        };
        Ok(status)
    }
}

/// Result of analysing one invoice against the policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceAnalysis {
    pub status: ReimbursementStatus,
    pub reason: String,
    pub reimbursable_amount: f64,
    pub total_amount: f64,
    #[serde(default)]
    pub policy_violations: Vec<String>,
    #[serde(default)]
    pub compliance_notes: String,
    /// Invoice date as reported by the model, `YYYY-MM-DD`
    #[serde(default)]
    pub invoice_date: Option<String>,
    /// Raw model output, kept when it could not be parsed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

/// Metadata stored alongside every chunk of an invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceMetadata {
    /// Identifier shared by all chunks of one stored invoice
    pub document_id: String,
    pub invoice_id: String,
    pub employee_name: String,
    pub status: ReimbursementStatus,
    pub date: String,
    pub reimbursable_amount: f64,
    pub total_amount: f64,
    pub file_name: String,
}

/// Per-invoice entry in the analysis response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedInvoice {
    pub invoice_id: String,
    pub employee_name: String,
    pub file_name: String,
    pub status: ReimbursementStatus,
    pub reason: String,
    pub reimbursable_amount: f64,
    pub total_amount: f64,
    pub date: String,
    pub policy_violations: Vec<String>,
    pub compliance_notes: String,
    /// `None` when the invoice could not be stored
    pub document_id: Option<String>,
}

/// Metadata filters for search and listing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub employee_name: Option<String>,
    pub status: Option<ReimbursementStatus>,
    pub date: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.employee_name.is_none() && self.status.is_none() && self.date.is_none()
    }

    /// Whether `metadata` satisfies every set filter. Employee names compare case-insensitively.
    pub fn matches(&self, metadata: &InvoiceMetadata) -> bool {
        if let Some(name) = &self.employee_name {
            if employee_key(name) != employee_key(&metadata.employee_name) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if status != metadata.status {
                return false;
            }
        }
        if let Some(date) = &self.date {
            if date != &metadata.date {
                return false;
            }
        }
        true
    }
}

/// Normalized form of an employee name used for filtering
pub fn employee_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One stored invoice returned by a search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub document: String,
    pub metadata: InvoiceMetadata,
    /// Cosine similarity, absent for metadata-only listings
    pub score: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStats {
    pub collection_name: String,
    pub invoice_count: u64,
    pub chunk_count: u64,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        ChatMessage {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(employee: &str, status: ReimbursementStatus) -> InvoiceMetadata {
        InvoiceMetadata {
            document_id: "doc".into(),
            invoice_id: "inv_001".into(),
            employee_name: employee.into(),
            status,
            date: "2024-01-15".into(),
            reimbursable_amount: 45.0,
            total_amount: 45.0,
            file_name: "inv_001.pdf".into(),
        }
    }

    #[test]
    fn test_status_parsing() {
        let cases = [
            ("Fully Reimbursed", ReimbursementStatus::FullyReimbursed),
            ("fully_reimbursed", ReimbursementStatus::FullyReimbursed),
            ("Partially Reimbursed", ReimbursementStatus::PartiallyReimbursed),
            ("partial", ReimbursementStatus::PartiallyReimbursed),
            ("DECLINED", ReimbursementStatus::Declined),
            ("Rejected", ReimbursementStatus::Declined),
            ("Pending Analysis", ReimbursementStatus::PendingAnalysis),
            ("Analysis Failed", ReimbursementStatus::AnalysisFailed),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<ReimbursementStatus>().unwrap(), expected, "{input}");
        }
        assert!("maybe".parse::<ReimbursementStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_as_label() {
        let json = serde_json::to_string(&ReimbursementStatus::PartiallyReimbursed).unwrap();
        assert_eq!(json, "\"Partially Reimbursed\"");
    }

    #[test]
    fn test_filters_match() {
        let meta = metadata("John Smith", ReimbursementStatus::Declined);

        assert!(SearchFilters::default().matches(&meta));
        let by_name = SearchFilters {
            employee_name: Some("  john   SMITH ".into()),
            ..Default::default()
        };
        assert!(by_name.matches(&meta));

        let wrong_status = SearchFilters {
            status: Some(ReimbursementStatus::FullyReimbursed),
            ..Default::default()
        };
        assert!(!wrong_status.matches(&meta));

        let by_date = SearchFilters {
            date: Some("2024-01-15".into()),
            ..Default::default()
        };
        assert!(by_date.matches(&meta));
    }
}
