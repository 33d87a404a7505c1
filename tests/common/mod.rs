#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use invoice_rag::config::ServerConfig;
use invoice_rag::database::{MemoryStore, VectorStore};
use invoice_rag::embeddings::{Embedder, Embedding, EmbeddingTask};
use invoice_rag::error::LlmError;
use invoice_rag::llm::{GenerationRequest, LanguageModel};
use invoice_rag::server::{router, AppState};

pub const DIMENSION: usize = 32;

/// Bag-of-words embedder: every word is hashed into one of `DIMENSION` buckets.
pub struct HashingEmbedder;

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str, _task: EmbeddingTask) -> Result<Embedding, LlmError> {
        let mut values = vec![0.0f32; DIMENSION];
        values[0] = 0.1;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = word
                .to_lowercase()
                .bytes()
                .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619));
            values[hash as usize % DIMENSION] += 1.0;
        }
        Ok(Embedding::new(values))
    }

    fn model_name(&self) -> &str {
        "hashing-test"
    }
}

/// Language model that answers from markers in the invoice text and records
/// every request it receives.
#[derive(Default)]
pub struct FakeLlm {
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeLlm {
    pub fn analysis_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.json_output)
            .map(|r| r.prompt.clone())
            .collect()
    }

    pub fn chat_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !r.json_output)
            .map(|r| r.prompt.clone())
            .collect()
    }
}

fn invoice_section(prompt: &str) -> &str {
    let start = prompt.find("INVOICE DETAILS:").unwrap_or(0);
    let end = prompt[start..]
        .find("Analyze this invoice")
        .map(|i| start + i)
        .unwrap_or(prompt.len());
    &prompt[start..end]
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<String, LlmError> {
        self.requests.lock().unwrap().push(request.clone());

        if !request.json_output {
            let with_context = request.prompt.contains("Invoice inv_");
            return Ok(format!("Found context: {}", with_context));
        }

        let invoice = invoice_section(&request.prompt);
        if invoice.contains("LLM_DOWN") {
            return Err(LlmError::Api {
                status: 500,
                message: "backend unavailable".into(),
            });
        }
        if invoice.contains("UNPARSEABLE") {
            return Ok("I am not sure what to say about this one.".into());
        }
        if invoice.contains("groceries") {
            return Ok(r#"{"status": "Declined", "reason": "Personal expense", "reimbursable_amount": 75, "total_amount": 75, "invoice_date": "2024-02-10", "policy_violations": ["Personal expenses are not reimbursable"], "compliance_notes": "Do not resubmit"}"#.into());
        }
        Ok(r#"```json
{"status": "Fully Reimbursed", "reason": "Business meal within limit", "reimbursable_amount": 45.0, "total_amount": "$45.00", "invoice_date": "2024-03-05", "policy_violations": [], "compliance_notes": "Compliant"}
```"#
            .into())
    }

    fn model_name(&self) -> &str {
        "fake-llm"
    }
}

pub struct TestApp {
    pub router: Router,
    pub llm: Arc<FakeLlm>,
    pub store: Arc<MemoryStore>,
}

pub fn test_app() -> TestApp {
    test_app_with_limit(5)
}

pub fn test_app_with_limit(max_file_size_mb: usize) -> TestApp {
    let store = Arc::new(MemoryStore::new("invoice_analysis_test", DIMENSION));
    let llm = Arc::new(FakeLlm::default());
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        max_file_size_mb,
        log_level: "debug".into(),
        analysis_concurrency: 2,
    };

    let store_handle: Arc<dyn VectorStore> = store.clone();
    let state = AppState::new(store_handle, Arc::new(HashingEmbedder), llm.clone(), &config);

    TestApp {
        router: router(state),
        llm,
        store,
    }
}

/// Build a ZIP archive in memory
pub fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(bytes).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Minimal multipart/form-data encoder
pub struct MultipartForm {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartForm {
    pub fn new() -> Self {
        MultipartForm {
            boundary: "invoice-rag-test-boundary".into(),
            body: Vec::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        let header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n",
            self.boundary, name
        );
        self.body.extend_from_slice(header.as_bytes());
        self.body.extend_from_slice(value.as_bytes());
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn file(mut self, name: &str, file_name: &str, bytes: &[u8]) -> Self {
        let header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            self.boundary, name, file_name
        );
        self.body.extend_from_slice(header.as_bytes());
        self.body.extend_from_slice(bytes);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    pub fn into_request(mut self, uri: &str) -> Request<Body> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", self.boundary),
            )
            .body(Body::from(self.body))
            .unwrap()
    }
}

pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Send a request through the router and decode the JSON response
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

pub const MEAL_INVOICE: &[u8] =
    b"Restaurant ABC\nDate: 2024-03-05\nLunch with client John Doe\nTotal: $45.00";
pub const GROCERY_INVOICE: &[u8] =
    b"SuperMart\nDate: 2024-02-10\nWeekly groceries for home\nTotal: $75.00";

/// Upload the two standard invoices for `employee`
pub async fn upload_standard_invoices(app: &TestApp, employee: &str) -> Value {
    let zip = zip_of(&[("inv_001.txt", MEAL_INVOICE), ("inv_002.txt", GROCERY_INVOICE)]);
    let request = MultipartForm::new()
        .file("invoices_zip", "invoices.zip", &zip)
        .text("employee_name", employee)
        .into_request("/api/v1/analyze-invoices");
    let (status, body) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}
