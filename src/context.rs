//! Chat context: filters guessed from the question, retrieved invoices and the
//! final prompt.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::llm::GenerationRequest;
use crate::models::{ChatMessage, ReimbursementStatus, SearchFilters, SearchHit};
use crate::prompts::{chat_prompt, CHAT_SYSTEM_PROMPT};

/// Previous messages included in the chat prompt
pub const HISTORY_WINDOW: usize = 4;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:for|by|employee)\s+([a-z]+(?:\s+[a-z]+)*)")
        .expect("NAME_PATTERN regex is valid")
});

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").expect("DATE_PATTERN regex is valid")
});

/// Words that end or rule out an employee name
const STOP_WORDS: &[&str] = &[
    "a", "all", "an", "and", "any", "are", "did", "during", "each", "every", "expenses",
    "from", "in", "invoice", "invoices", "is", "last", "me", "my", "next", "of", "on", "or",
    "our", "over", "reimbursement", "since", "that", "the", "their", "these", "this", "those",
    "to", "us", "was", "were", "what", "which", "who", "with",
];

/// Checked in order; `partial` must win over `approved` in "partially approved".
const STATUS_KEYWORDS: &[(&str, ReimbursementStatus)] = &[
    ("partial", ReimbursementStatus::PartiallyReimbursed),
    ("approved", ReimbursementStatus::FullyReimbursed),
    ("fully reimbursed", ReimbursementStatus::FullyReimbursed),
    ("declined", ReimbursementStatus::Declined),
    ("rejected", ReimbursementStatus::Declined),
    ("pending", ReimbursementStatus::PendingAnalysis),
    ("failed", ReimbursementStatus::AnalysisFailed),
];

/// Guess metadata filters from a free-text question.
pub fn extract_filters(query: &str) -> SearchFilters {
    let lower = query.to_lowercase();

    let employee_name = NAME_PATTERN
        .captures_iter(&lower)
        .filter_map(|caps| caps.get(1))
        .find_map(|m| name_from_words(m.as_str()));

    let status = STATUS_KEYWORDS
        .iter()
        .find(|(keyword, _)| lower.contains(keyword))
        .map(|(_, status)| *status);

    let date = DATE_PATTERN
        .captures(&lower)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    SearchFilters {
        employee_name,
        status,
        date,
    }
}

fn name_from_words(words: &str) -> Option<String> {
    let name: Vec<String> = words
        .split_whitespace()
        .take_while(|w| !STOP_WORDS.contains(w))
        .take(2)
        .map(title_case)
        .collect();

    let joined = name.join(" ");
    (joined.len() > 1).then_some(joined)
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Retrieved invoice as presented to the model and returned as a source
#[derive(Debug, Clone, Serialize)]
pub struct ContextItem {
    pub document_id: String,
    pub invoice_id: String,
    pub employee_name: String,
    pub status: ReimbursementStatus,
    pub reimbursable_amount: f64,
    pub total_amount: f64,
    pub date: String,
    pub summary: String,
    pub similarity: Option<f32>,
}

impl From<SearchHit> for ContextItem {
    fn from(hit: SearchHit) -> Self {
        let meta = hit.metadata;
        ContextItem {
            document_id: meta.document_id,
            invoice_id: meta.invoice_id,
            employee_name: meta.employee_name,
            status: meta.status,
            reimbursable_amount: meta.reimbursable_amount,
            total_amount: meta.total_amount,
            date: meta.date,
            summary: hit.document,
            similarity: hit.score,
        }
    }
}

fn format_context(items: &[ContextItem]) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "Invoice {} | employee: {} | status: {} | reimbursable: ${:.2} of ${:.2} | date: {}\n{}",
                item.invoice_id,
                item.employee_name,
                item.status,
                item.reimbursable_amount,
                item.total_amount,
                item.date,
                item.summary
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn format_history(history: &[ChatMessage]) -> String {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    history[start..]
        .iter()
        .map(|msg| format!("{}: {}", msg.role, msg.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Build the chat request. `history` holds the messages before `query`.
pub fn build_chat_prompt(
    query: &str,
    history: &[ChatMessage],
    context: &[ContextItem],
) -> GenerationRequest {
    let prompt = chat_prompt(&format_history(history), &format_context(context), query);
    GenerationRequest::new(prompt).with_system(CHAT_SYSTEM_PROMPT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InvoiceMetadata, Role};

    #[test]
    fn test_extracts_employee_and_status() {
        let filters = extract_filters("Show me declined invoices for john smith please");
        assert_eq!(filters.employee_name.as_deref(), Some("John Smith"));
        assert_eq!(filters.status, Some(ReimbursementStatus::Declined));
    }

    #[test]
    fn test_extracts_iso_date() {
        let filters = extract_filters("What did Jane spend on 2024-03-05?");
        assert_eq!(filters.date.as_deref(), Some("2024-03-05"));
        assert_eq!(extract_filters("Anything from March?").date, None);
    }

    #[test]
    fn test_name_stops_at_stop_words() {
        let filters = extract_filters("What was submitted by Sarah in March?");
        assert_eq!(filters.employee_name.as_deref(), Some("Sarah"));

        let filters = extract_filters("Show invoices for the last month");
        assert_eq!(filters.employee_name, None);
    }

    #[test]
    fn test_partial_wins_over_approved() {
        let filters = extract_filters("Which invoices were partially approved?");
        assert_eq!(filters.status, Some(ReimbursementStatus::PartiallyReimbursed));
        assert_eq!(filters.employee_name, None);
    }

    #[test]
    fn test_no_filters() {
        assert!(extract_filters("What is the total spend?").is_empty());
    }

    #[test]
    fn test_prompt_uses_recent_history_and_context() {
        let history: Vec<ChatMessage> = (0..6)
            .map(|i| ChatMessage::new(Role::User, format!("message {}", i)))
            .collect();
        let hit = SearchHit {
            id: "p1".into(),
            document: "Taxi to airport".into(),
            metadata: InvoiceMetadata {
                document_id: "doc-1".into(),
                invoice_id: "inv_007".into(),
                employee_name: "Jane Doe".into(),
                status: ReimbursementStatus::FullyReimbursed,
                date: "2024-04-02".into(),
                reimbursable_amount: 32.5,
                total_amount: 32.5,
                file_name: "inv_007.pdf".into(),
            },
            score: Some(0.8),
        };

        let request = build_chat_prompt("Who took a taxi?", &history, &[hit.into()]);
        assert_eq!(request.system.as_deref(), Some(CHAT_SYSTEM_PROMPT));
        assert!(!request.prompt.contains("message 1"));
        assert!(request.prompt.contains("user: message 2"));
        assert!(request.prompt.contains("user: message 5"));
        assert!(request.prompt.contains("Invoice inv_007"));
        assert!(request.prompt.contains("$32.50"));
        assert!(request.prompt.contains("Taxi to airport"));
    }

    #[test]
    fn test_prompt_without_context() {
        let request = build_chat_prompt("Anything?", &[], &[]);
        assert!(request.prompt.contains("No processed invoices matched"));
    }
}
