//! Invoice analysis pipeline: archive, extraction, LLM analysis, chunking,
//! embedding and storage.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use log::{info, warn};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::analysis::parse_analysis;
use crate::archive::{extract_invoices, ArchiveEntry};
use crate::chunking::{split_into_chunks, ChunkerConfig};
use crate::database::{InvoicePoint, VectorStore};
use crate::document::{extract_document, file_stem};
use crate::embeddings::{Embedder, EmbeddingTask};
use crate::error::AppError;
use crate::llm::{GenerationRequest, LanguageModel};
use crate::models::{InvoiceAnalysis, InvoiceMetadata, ProcessedInvoice, ReimbursementStatus};
use crate::policy::{PolicyContext, DEFAULT_POLICY_TOKEN_BUDGET};
use crate::prompts::{analysis_prompt, ANALYSIS_SYSTEM_PROMPT};

/// An uploaded file held in memory
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Outcome of one analysis request
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub employee_name: String,
    pub policy_source: String,
    pub invoices: Vec<ProcessedInvoice>,
}

impl AnalysisReport {
    pub fn total_reimbursable(&self) -> f64 {
        self.invoices.iter().map(|i| i.reimbursable_amount).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.invoices
            .iter()
            .filter(|i| i.status == ReimbursementStatus::AnalysisFailed)
            .count()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingStats {
    pub total_processed: u64,
    pub chunk_count: u64,
    pub collection_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_updated: DateTime<Utc>,
}

pub struct InvoiceService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    chunker: ChunkerConfig,
    concurrency: usize,
    max_entry_bytes: u64,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
    ) -> Self {
        InvoiceService {
            store,
            embedder,
            llm,
            chunker: ChunkerConfig::default(),
            concurrency: 4,
            max_entry_bytes: 50 * 1024 * 1024,
        }
    }

    /// Number of invoices analysed at the same time
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Largest accepted uncompressed invoice
    pub fn with_max_entry_bytes(mut self, max_entry_bytes: u64) -> Self {
        self.max_entry_bytes = max_entry_bytes;
        self
    }

    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    /// Analyse every invoice in `zip_bytes` for `employee_name` and store the
    /// results. Failures of single invoices are reported in their records.
    pub async fn process_invoices(
        &self,
        zip_bytes: Vec<u8>,
        employee_name: &str,
        policy: Option<Upload>,
    ) -> Result<AnalysisReport, AppError> {
        let employee_name = employee_name.trim();
        if employee_name.is_empty() {
            return Err(AppError::Validation("Employee name cannot be empty".to_string()));
        }

        let max_entry_bytes = self.max_entry_bytes;
        let entries =
            tokio::task::spawn_blocking(move || extract_invoices(&zip_bytes, max_entry_bytes))
                .await
                .map_err(|e| AppError::Processing(e.to_string()))??;
        info!(
            "Extracted {} invoices from archive for {}",
            entries.len(),
            employee_name
        );

        let policy = self.load_policy(policy).await?;

        let policy_ref = &policy;
        let invoices: Vec<ProcessedInvoice> = stream::iter(entries)
            .map(move |entry| self.process_one(entry, employee_name, policy_ref))
            .buffered(self.concurrency)
            .collect()
            .await;

        let report = AnalysisReport {
            employee_name: employee_name.to_string(),
            policy_source: policy.source().to_string(),
            invoices,
        };
        info!(
            "Processed {} invoices for {} ({} failed)",
            report.invoices.len(),
            employee_name,
            report.failed_count()
        );
        Ok(report)
    }

    async fn load_policy(&self, policy: Option<Upload>) -> Result<PolicyContext, AppError> {
        let Some(upload) = policy else {
            return Ok(PolicyContext::default_policy());
        };

        let document = extract_document(&upload.file_name, upload.bytes).await?;
        info!(
            "Loaded policy {} ({} words)",
            upload.file_name,
            document.word_count()
        );

        Ok(PolicyContext::build(
            &document.content,
            &upload.file_name,
            self.embedder.as_ref(),
            &self.chunker,
            DEFAULT_POLICY_TOKEN_BUDGET,
        )
        .await?)
    }

    async fn process_one(
        &self,
        entry: ArchiveEntry,
        employee_name: &str,
        policy: &PolicyContext,
    ) -> ProcessedInvoice {
        let file_name = entry.file_name.clone();
        match self.analyse_and_store(entry, employee_name, policy).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to process invoice {}: {}", file_name, e);
                ProcessedInvoice {
                    invoice_id: file_stem(&file_name).to_string(),
                    employee_name: employee_name.to_string(),
                    file_name,
                    status: ReimbursementStatus::AnalysisFailed,
                    reason: format!("Processing error: {}", e),
                    reimbursable_amount: 0.0,
                    total_amount: 0.0,
                    date: today(),
                    policy_violations: Vec::new(),
                    compliance_notes: "Error".to_string(),
                    document_id: None,
                }
            }
        }
    }

    async fn analyse_and_store(
        &self,
        entry: ArchiveEntry,
        employee_name: &str,
        policy: &PolicyContext,
    ) -> Result<ProcessedInvoice, AppError> {
        let document = extract_document(&entry.file_name, entry.bytes).await?;
        let analysis = self.analyse(&document.content, employee_name, policy).await;
        info!("Invoice {} analysed: {}", entry.file_name, analysis.status);

        let document_id = Uuid::new_v4().to_string();
        let metadata = InvoiceMetadata {
            document_id: document_id.clone(),
            invoice_id: document.stem().to_string(),
            employee_name: employee_name.to_string(),
            status: analysis.status,
            date: analysis.invoice_date.clone().unwrap_or_else(today),
            reimbursable_amount: analysis.reimbursable_amount,
            total_amount: analysis.total_amount,
            file_name: entry.file_name.clone(),
        };

        let record = record_text(&metadata, &analysis, &document.content);
        let chunks = split_into_chunks(&record, &document_id, &self.chunker);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts, EmbeddingTask::RetrievalDocument)
            .await?;

        let points: Vec<InvoicePoint> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| InvoicePoint {
                id: Uuid::new_v4().to_string(),
                embedding,
                document: chunk.text,
                metadata: metadata.clone(),
                chunk_index: chunk.chunk_index,
            })
            .collect();
        let chunk_count = points.len();
        self.store.upsert(points).await?;
        info!("Stored {} chunks for invoice {}", chunk_count, entry.file_name);

        Ok(ProcessedInvoice {
            invoice_id: metadata.invoice_id,
            employee_name: metadata.employee_name,
            file_name: metadata.file_name,
            status: analysis.status,
            reason: analysis.reason,
            reimbursable_amount: analysis.reimbursable_amount,
            total_amount: analysis.total_amount,
            date: metadata.date,
            policy_violations: analysis.policy_violations,
            compliance_notes: analysis.compliance_notes,
            document_id: Some(document_id),
        })
    }

    /// Ask the model for a decision; never fails, errors become the result.
    async fn analyse(
        &self,
        invoice_text: &str,
        employee_name: &str,
        policy: &PolicyContext,
    ) -> InvoiceAnalysis {
        let policy_text = match policy
            .relevant_text(invoice_text, self.embedder.as_ref())
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!("Policy retrieval failed: {}", e);
                return InvoiceAnalysis::failed(&e);
            }
        };

        let request = GenerationRequest::new(analysis_prompt(&policy_text, employee_name, invoice_text))
            .with_system(ANALYSIS_SYSTEM_PROMPT)
            .json();

        match self.llm.generate(request).await {
            Ok(raw) => match parse_analysis(&raw) {
                Ok(analysis) => analysis.normalized(),
                Err(e) => {
                    warn!("Could not parse analysis: {}", e);
                    InvoiceAnalysis::unparsed(raw, &e)
                }
            },
            Err(e) => {
                warn!("LLM analysis failed: {}", e);
                InvoiceAnalysis::failed(&e)
            }
        }
    }

    /// Remove a stored invoice
    pub async fn delete_invoice(&self, document_id: &str) -> Result<(), AppError> {
        if self.store.delete_invoice(document_id).await? {
            info!("Deleted invoice {}", document_id);
            Ok(())
        } else {
            Err(AppError::NotFound(format!("Invoice {}", document_id)))
        }
    }

    pub async fn processing_stats(&self) -> ProcessingStats {
        match self.store.stats().await {
            Ok(stats) => ProcessingStats {
                total_processed: stats.invoice_count,
                chunk_count: stats.chunk_count,
                collection_status: stats.status,
                error: None,
                last_updated: Utc::now(),
            },
            Err(e) => ProcessingStats {
                total_processed: 0,
                chunk_count: 0,
                collection_status: "error".to_string(),
                error: Some(e.to_string()),
                last_updated: Utc::now(),
            },
        }
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Text stored for an invoice: analysis summary first, then the invoice itself.
fn record_text(metadata: &InvoiceMetadata, analysis: &InvoiceAnalysis, invoice_text: &str) -> String {
    let violations = if analysis.policy_violations.is_empty() {
        "None".to_string()
    } else {
        analysis.policy_violations.join("; ")
    };

    format!(
        "Invoice ID: {}\nEmployee: {}\nFile: {}\nDate: {}\nStatus: {}\n\
         Reimbursable Amount: ${:.2}\nTotal Amount: ${:.2}\nReason: {}\n\
         Policy Violations: {}\nCompliance Notes: {}\n\nInvoice Text:\n{}",
        metadata.invoice_id,
        metadata.employee_name,
        metadata.file_name,
        metadata.date,
        metadata.status,
        metadata.reimbursable_amount,
        metadata.total_amount,
        analysis.reason,
        violations,
        analysis.compliance_notes,
        invoice_text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_text_leads_with_summary() {
        let metadata = InvoiceMetadata {
            document_id: "doc".into(),
            invoice_id: "inv_003".into(),
            employee_name: "Jane Doe".into(),
            status: ReimbursementStatus::Declined,
            date: "2024-05-01".into(),
            reimbursable_amount: 0.0,
            total_amount: 75.0,
            file_name: "inv_003.pdf".into(),
        };
        let analysis = InvoiceAnalysis {
            status: ReimbursementStatus::Declined,
            reason: "Personal groceries".into(),
            reimbursable_amount: 0.0,
            total_amount: 75.0,
            policy_violations: vec!["Personal expense".into()],
            compliance_notes: String::new(),
            invoice_date: None,
            raw_response: None,
        };

        let text = record_text(&metadata, &analysis, "Groceries $75");
        assert!(text.starts_with("Invoice ID: inv_003\nEmployee: Jane Doe"));
        assert!(text.contains("Status: Declined"));
        assert!(text.contains("Total Amount: $75.00"));
        assert!(text.contains("Policy Violations: Personal expense"));
        assert!(text.ends_with("Groceries $75"));
    }
}
