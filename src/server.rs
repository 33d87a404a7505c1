//! HTTP API.

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::database::VectorStore;
use crate::embeddings::Embedder;
use crate::error::AppError;
use crate::invoice::{InvoiceService, Upload};
use crate::llm::LanguageModel;
use crate::models::{ReimbursementStatus, SearchFilters};
use crate::rag::{ChatHistory, ChatReply, RagEngine};
use crate::search::{SearchService, DEFAULT_LIST_LIMIT};

const MAX_LIST_LIMIT: usize = 500;

/// Shared handles for the request handlers
#[derive(Clone)]
pub struct AppState {
    pub invoices: Arc<InvoiceService>,
    pub search: SearchService,
    pub rag: Arc<RagEngine>,
    pub store: Arc<dyn VectorStore>,
    pub max_file_size_mb: usize,
}

impl AppState {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        config: &ServerConfig,
    ) -> Self {
        let search = SearchService::new(store.clone(), embedder.clone());
        let invoices = InvoiceService::new(store.clone(), embedder, llm.clone())
            .with_concurrency(config.analysis_concurrency)
            .with_max_entry_bytes(config.max_file_size_bytes() as u64);
        let rag = RagEngine::new(search.clone(), llm);

        AppState {
            invoices: Arc::new(invoices),
            search,
            rag: Arc::new(rag),
            store,
            max_file_size_mb: config.max_file_size_mb,
        }
    }

    fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }
}

pub fn router(state: AppState) -> Router {
    // Room for the ZIP, the policy file and the form overhead
    let body_limit = state.max_file_size_bytes() * 2 + 1024 * 1024;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/v1/analyze-invoices", post(analyze_invoices))
        .route("/api/v1/chat", post(chat))
        .route(
            "/api/v1/chat/history/{session_id}",
            get(chat_history).delete(clear_chat_history),
        )
        .route("/api/v1/chat/sessions", get(chat_sessions))
        .route("/api/v1/invoices", get(list_invoices))
        .route("/api/v1/invoices/search", post(search_invoices))
        .route("/api/v1/invoices/{document_id}", delete(delete_invoice))
        .route("/api/v1/stats", get(stats))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(log_requests))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    info!(
        "{} {} {} {}ms",
        method,
        path,
        response.status().as_u16(),
        started.elapsed().as_millis()
    );
    response
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Invoice Reimbursement System is running",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "health": "GET /health",
            "analyze_invoices": "POST /api/v1/analyze-invoices",
            "chat": "POST /api/v1/chat",
            "chat_history": "GET|DELETE /api/v1/chat/history/{session_id}",
            "chat_sessions": "GET /api/v1/chat/sessions",
            "invoices": "GET /api/v1/invoices",
            "search": "POST /api/v1/invoices/search",
            "delete_invoice": "DELETE /api/v1/invoices/{document_id}",
            "stats": "GET /api/v1/stats",
        }
    }))
}

async fn health(State(state): State<AppState>) -> Response {
    let checked = match state.store.health_check().await {
        Ok(_) => state.store.stats().await,
        Err(e) => Err(e),
    };

    match checked {
        Ok(stats) => Json(json!({
            "status": "healthy",
            "vector_store": stats,
            "timestamp": Utc::now(),
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "error": e.to_string(),
                "timestamp": Utc::now(),
            })),
        )
            .into_response(),
    }
}

fn multipart_error(e: MultipartError, limit_mb: usize) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge { limit_mb }
    } else {
        AppError::Validation(format!("Invalid multipart request: {}", e.body_text()))
    }
}

fn has_extension(file_name: &str, extensions: &[&str]) -> bool {
    let lower = file_name.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext))
}

async fn analyze_invoices(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let limit_mb = state.max_file_size_mb;
    let mut invoices_zip: Option<Upload> = None;
    let mut employee_name: Option<String> = None;
    let mut policy_file: Option<Upload> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit_mb))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "invoices_zip" | "policy_file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| multipart_error(e, limit_mb))?;
                // Browsers send an empty part for an unselected optional file
                if name == "policy_file" && file_name.is_empty() && bytes.is_empty() {
                    continue;
                }
                let upload = Upload {
                    file_name,
                    bytes: bytes.to_vec(),
                };
                if name == "invoices_zip" {
                    invoices_zip = Some(upload);
                } else {
                    policy_file = Some(upload);
                }
            }
            "employee_name" => {
                employee_name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| multipart_error(e, limit_mb))?,
                );
            }
            other => debug!("Ignoring unknown form field {}", other),
        }
    }

    let invoices_zip = invoices_zip
        .ok_or_else(|| AppError::Validation("invoices_zip file is required".to_string()))?;
    if !has_extension(&invoices_zip.file_name, &[".zip"]) {
        return Err(AppError::Validation(
            "Invoices must be submitted as ZIP file".to_string(),
        ));
    }
    if invoices_zip.bytes.len() > state.max_file_size_bytes() {
        return Err(AppError::PayloadTooLarge { limit_mb });
    }

    let employee_name = employee_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::Validation("Employee name is required".to_string()))?;

    if let Some(policy) = &policy_file {
        if !has_extension(&policy.file_name, &[".pdf", ".txt"]) {
            return Err(AppError::Validation(
                "Policy file must be a PDF or text file".to_string(),
            ));
        }
        if policy.bytes.len() > state.max_file_size_bytes() {
            return Err(AppError::PayloadTooLarge { limit_mb });
        }
    }

    let report = state
        .invoices
        .process_invoices(invoices_zip.bytes, &employee_name, policy_file)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": format!(
            "Successfully processed {} invoices for {}",
            report.invoices.len(),
            report.employee_name
        ),
        "employee_name": report.employee_name,
        "policy_source": report.policy_source,
        "processed_count": report.invoices.len(),
        "failed_count": report.failed_count(),
        "total_reimbursable": report.total_reimbursable(),
        "invoices": report.invoices,
    })))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

async fn chat(
    State(state): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, AppError> {
    let Json(request) = request?;
    let reply = state
        .rag
        .process_message(&request.message, request.session_id.as_deref())
        .await?;
    Ok(Json(reply))
}

async fn chat_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<ChatHistory> {
    Json(state.rag.history(&session_id).await)
}

async fn clear_chat_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Value> {
    let message = if state.rag.clear_history(&session_id).await {
        format!("Chat history cleared for session {}", session_id)
    } else {
        format!("No history found for session {}", session_id)
    };
    Json(json!({ "message": message, "session_id": session_id }))
}

async fn chat_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.rag.active_sessions().await;
    Json(json!({ "count": sessions.len(), "sessions": sessions }))
}

fn parse_status(status: Option<&str>) -> Result<Option<ReimbursementStatus>, AppError> {
    status
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<ReimbursementStatus>().map_err(AppError::Validation))
        .transpose()
}

fn parse_date(date: Option<&str>) -> Result<Option<String>, AppError> {
    let Some(date) = date.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map(|d| Some(d.format("%Y-%m-%d").to_string()))
        .map_err(|_| AppError::Validation(format!("Invalid date {}, expected YYYY-MM-DD", date)))
}

fn clamp_limit(limit: Option<usize>, default: usize) -> usize {
    limit.unwrap_or(default).clamp(1, MAX_LIST_LIMIT)
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    employee_name: Option<String>,
    status: Option<String>,
    date: Option<String>,
    limit: Option<usize>,
}

async fn list_invoices(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query?;
    let filters = SearchFilters {
        employee_name: query.employee_name.filter(|n| !n.trim().is_empty()),
        status: parse_status(query.status.as_deref())?,
        date: parse_date(query.date.as_deref())?,
    };
    let invoices = state
        .search
        .search_by_metadata(&filters, clamp_limit(query.limit, DEFAULT_LIST_LIMIT))
        .await?;

    Ok(Json(json!({
        "count": invoices.len(),
        "filters": filters,
        "invoices": invoices,
    })))
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    employee_name: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

async fn search_invoices(
    State(state): State<AppState>,
    request: Result<Json<SearchRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(request) = request?;
    let filters = SearchFilters {
        employee_name: request.employee_name.filter(|n| !n.trim().is_empty()),
        status: parse_status(request.status.as_deref())?,
        date: parse_date(request.date.as_deref())?,
    };
    let results = state
        .search
        .search_by_text(&request.query, clamp_limit(request.limit, 5), &filters)
        .await?;

    Ok(Json(json!({
        "query": request.query,
        "count": results.len(),
        "results": results,
    })))
}

async fn delete_invoice(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    state.invoices.delete_invoice(&document_id).await?;
    Ok(Json(json!({
        "message": format!("Invoice {} deleted", document_id),
        "document_id": document_id,
    })))
}

async fn stats(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let search = state.search.statistics().await?;
    let processing = state.invoices.processing_stats().await;
    let sessions = state.rag.active_sessions().await;

    Ok(Json(json!({
        "search": search,
        "processing": processing,
        "active_sessions": sessions.len(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_extension() {
        assert!(has_extension("Invoices.ZIP", &[".zip"]));
        assert!(has_extension("policy.txt", &[".pdf", ".txt"]));
        assert!(!has_extension("invoices.tar.gz", &[".zip"]));
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status(None).unwrap(), None);
        assert_eq!(parse_status(Some(" ")).unwrap(), None);
        assert_eq!(
            parse_status(Some("declined")).unwrap(),
            Some(ReimbursementStatus::Declined)
        );
        assert!(parse_status(Some("whatever")).is_err());
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date(None).unwrap(), None);
        assert_eq!(parse_date(Some("")).unwrap(), None);
        assert_eq!(
            parse_date(Some(" 2024-03-05 ")).unwrap().as_deref(),
            Some("2024-03-05")
        );
        assert!(parse_date(Some("2024-02-30")).is_err());
        assert!(parse_date(Some("05/03/2024")).is_err());
    }

    #[test]
    fn test_clamp_limit() {
        assert_eq!(clamp_limit(None, 50), 50);
        assert_eq!(clamp_limit(Some(0), 50), 1);
        assert_eq!(clamp_limit(Some(10_000), 50), MAX_LIST_LIMIT);
    }
}
