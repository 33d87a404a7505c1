use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::context::{build_chat_prompt, extract_filters, ContextItem};
use crate::error::AppError;
use crate::llm::LanguageModel;
use crate::models::{ChatMessage, Role, SearchFilters};
use crate::search::SearchService;

pub const DEFAULT_SESSION: &str = "default";

/// Invoices retrieved per question
const TOP_K: usize = 5;

/// Messages kept per session; older ones are dropped first
const MAX_SESSION_MESSAGES: usize = 200;

const APOLOGY: &str = "I apologize, but I encountered an error while processing your request. \
Please try again or rephrase your question.";

#[derive(Debug, Default)]
struct ChatSession {
    messages: Vec<ChatMessage>,
    last_query: Option<String>,
    retrieved_count: usize,
}

impl ChatSession {
    fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
        if self.messages.len() > MAX_SESSION_MESSAGES {
            let excess = self.messages.len() - MAX_SESSION_MESSAGES;
            self.messages.drain(..excess);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
    pub query: String,
    pub timestamp: DateTime<Utc>,
    pub context_used: bool,
    pub retrieved_count: usize,
    pub sources: Vec<ContextItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatHistory {
    pub session_id: String,
    pub history: Vec<ChatMessage>,
    pub message_count: usize,
    pub last_query: Option<String>,
    pub retrieved_count: usize,
}

/// RAG (Retrieval-Augmented Generation) chat over stored invoices
pub struct RagEngine {
    search: SearchService,
    llm: Arc<dyn LanguageModel>,
    sessions: RwLock<HashMap<String, ChatSession>>,
}

impl RagEngine {
    pub fn new(search: SearchService, llm: Arc<dyn LanguageModel>) -> Self {
        RagEngine {
            search,
            llm,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Answer `message` within a session, recording both sides of the exchange.
    pub async fn process_message(
        &self,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<ChatReply, AppError> {
        let query = message.trim();
        if query.is_empty() {
            return Err(AppError::Validation("Message cannot be empty".to_string()));
        }
        let session_id = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SESSION)
            .to_string();

        let previous = {
            let mut sessions = self.sessions.write().await;
            let session = sessions.entry(session_id.clone()).or_default();
            let previous = session.messages.clone();
            session.push(ChatMessage::new(Role::User, query));
            previous
        };

        let context = self.retrieve_context(query).await;
        let request = build_chat_prompt(query, &previous, &context);

        let response = match self.llm.generate(request).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Chat generation failed: {}", e);
                APOLOGY.to_string()
            }
        };

        {
            let mut sessions = self.sessions.write().await;
            let session = sessions.entry(session_id.clone()).or_default();
            session.push(ChatMessage::new(Role::Assistant, response.clone()));
            session.last_query = Some(query.to_string());
            session.retrieved_count = context.len();
        }
        info!(
            "Answered message in session {} using {} invoices",
            session_id,
            context.len()
        );

        Ok(ChatReply {
            response,
            session_id,
            query: query.to_string(),
            timestamp: Utc::now(),
            context_used: !context.is_empty(),
            retrieved_count: context.len(),
            sources: context,
        })
    }

    /// Find invoices relevant to `query`. Retrieval problems leave the answer
    /// without context instead of failing the message.
    async fn retrieve_context(&self, query: &str) -> Vec<ContextItem> {
        let filters = extract_filters(query);
        debug!("Filters extracted from query: {:?}", filters);

        let embedding = match self.search.embed_query(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Context retrieval failed: {}", e);
                return Vec::new();
            }
        };

        let mut hits = self.search.search_similar(&embedding, TOP_K, &filters).await;
        if matches!(&hits, Ok(found) if found.is_empty()) && !filters.is_empty() {
            debug!("No invoices matched the filters, retrying without them");
            hits = self
                .search
                .search_similar(&embedding, TOP_K, &SearchFilters::default())
                .await;
        }

        match hits {
            Ok(hits) => hits.into_iter().map(ContextItem::from).collect(),
            Err(e) => {
                warn!("Context retrieval failed: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn history(&self, session_id: &str) -> ChatHistory {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(session) => ChatHistory {
                session_id: session_id.to_string(),
                history: session.messages.clone(),
                message_count: session.messages.len(),
                last_query: session.last_query.clone(),
                retrieved_count: session.retrieved_count,
            },
            None => ChatHistory {
                session_id: session_id.to_string(),
                history: Vec::new(),
                message_count: 0,
                last_query: None,
                retrieved_count: 0,
            },
        }
    }

    /// Forget a session. Returns false when it did not exist.
    pub async fn clear_history(&self, session_id: &str) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}
