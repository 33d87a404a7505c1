//! Semantic and metadata search over stored invoices.

use log::debug;
use serde::Serialize;
use std::sync::Arc;

use crate::database::VectorStore;
use crate::embeddings::{Embedder, Embedding, EmbeddingTask};
use crate::error::AppError;
use crate::models::{CollectionStats, ReimbursementStatus, SearchFilters, SearchHit};

pub const DEFAULT_LIST_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize)]
pub struct SearchStatistics {
    pub collection: CollectionStats,
    pub embedding_model: String,
    pub supported_filters: Vec<&'static str>,
}

#[derive(Clone)]
pub struct SearchService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl SearchService {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        SearchService { store, embedder }
    }

    /// Embed `query` and return the closest invoices
    pub async fn search_by_text(
        &self,
        query: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, AppError> {
        let embedding = self.embed_query(query).await?;
        self.search_similar(&embedding, limit, filters).await
    }

    pub async fn embed_query(&self, query: &str) -> Result<Embedding, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::Validation("Search query cannot be empty".to_string()));
        }
        Ok(self
            .embedder
            .embed(query, EmbeddingTask::RetrievalQuery)
            .await?)
    }

    pub async fn search_similar(
        &self,
        embedding: &Embedding,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, AppError> {
        let hits = self.store.search(embedding, limit.max(1), filters).await?;
        debug!("Vector search returned {} invoices ({:?})", hits.len(), filters);
        Ok(hits)
    }

    pub async fn search_by_metadata(
        &self,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        Ok(self.store.list(filters, limit.max(1)).await?)
    }

    pub async fn search_by_employee(
        &self,
        employee_name: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        let filters = SearchFilters {
            employee_name: Some(employee_name.to_string()),
            ..Default::default()
        };
        self.search_by_metadata(&filters, limit).await
    }

    pub async fn search_by_status(
        &self,
        status: ReimbursementStatus,
        limit: usize,
    ) -> Result<Vec<SearchHit>, AppError> {
        let filters = SearchFilters {
            status: Some(status),
            ..Default::default()
        };
        self.search_by_metadata(&filters, limit).await
    }

    pub async fn all_invoices(&self, limit: usize) -> Result<Vec<SearchHit>, AppError> {
        self.search_by_metadata(&SearchFilters::default(), limit)
            .await
    }

    pub async fn statistics(&self) -> Result<SearchStatistics, AppError> {
        Ok(SearchStatistics {
            collection: self.store.stats().await?,
            embedding_model: self.embedder.model_name().to_string(),
            supported_filters: vec!["employee_name", "status", "date"],
        })
    }
}
