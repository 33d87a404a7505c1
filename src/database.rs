//! Vector storage for analysed invoices.
//!
//! Every stored invoice is split into chunks; each chunk is one point carrying
//! the invoice metadata, so filters work on any chunk and chunk 0 stands for the
//! whole invoice in listings.

mod memory;
mod qdrant;

pub use memory::MemoryStore;
pub use qdrant::QdrantStore;

use async_trait::async_trait;
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{invalid, parse_or};
use crate::embeddings::Embedding;
use crate::error::{ConfigError, VectorStoreError};
use crate::models::{CollectionStats, InvoiceMetadata, SearchFilters, SearchHit};

/// Which vector store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    Memory,
    Qdrant,
}

impl FromStr for VectorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(VectorBackend::Memory),
            "qdrant" => Ok(VectorBackend::Qdrant),
            other => Err(format!("unknown vector store {:?}, expected memory or qdrant", other)),
        }
    }
}

/// Configuration for the vector store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: VectorBackend,
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub collection_name: String,
    pub embedding_dimension: usize,
}

impl StoreConfig {
    /// Read the store settings. Qdrant is chosen when `QDRANT_URL` is set and
    /// `VECTOR_STORE` does not say otherwise.
    pub fn from_lookup<F>(lookup: &F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("QDRANT_URL").filter(|v| !v.trim().is_empty());
        let api_key = lookup("QDRANT_API_KEY").filter(|v| !v.trim().is_empty());

        let backend = match lookup("VECTOR_STORE").filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw
                .parse::<VectorBackend>()
                .map_err(|reason| invalid("VECTOR_STORE", &raw, &reason))?,
            None if url.is_some() => VectorBackend::Qdrant,
            None => VectorBackend::Memory,
        };
        if backend == VectorBackend::Qdrant && url.is_none() {
            return Err(ConfigError::Missing("QDRANT_URL"));
        }

        let collection_name = lookup("COLLECTION_NAME")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "invoice_analysis".to_string());

        let embedding_dimension = parse_or("EMBEDDING_DIMENSION", lookup, 768)?;
        if embedding_dimension == 0 {
            return Err(invalid("EMBEDDING_DIMENSION", "0", "must be greater than 0"));
        }

        Ok(StoreConfig {
            backend,
            url,
            api_key,
            collection_name,
            embedding_dimension,
        })
    }

    /// In-memory configuration, mostly for tests
    pub fn memory(collection_name: &str, embedding_dimension: usize) -> Self {
        StoreConfig {
            backend: VectorBackend::Memory,
            url: None,
            api_key: None,
            collection_name: collection_name.to_string(),
            embedding_dimension,
        }
    }
}

/// One chunk of a stored invoice
#[derive(Debug, Clone)]
pub struct InvoicePoint {
    pub id: String,
    pub embedding: Embedding,
    /// Chunk text
    pub document: String,
    pub metadata: InvoiceMetadata,
    pub chunk_index: usize,
}

/// Storage and retrieval of invoice chunks.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Check that the backend is reachable.
    async fn health_check(&self) -> Result<bool, VectorStoreError>;

    /// Create the collection if it does not exist yet.
    async fn ensure_collection(&self) -> Result<(), VectorStoreError>;

    async fn upsert(&self, points: Vec<InvoicePoint>) -> Result<(), VectorStoreError>;

    /// Nearest invoices to `query`, at most one hit per invoice, best score first.
    async fn search(
        &self,
        query: &Embedding,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, VectorStoreError>;

    /// Stored invoices matching `filters`, one hit per invoice, without scores.
    async fn list(
        &self,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, VectorStoreError>;

    /// Remove every chunk of one invoice. Returns false when nothing matched.
    async fn delete_invoice(&self, document_id: &str) -> Result<bool, VectorStoreError>;

    /// Drop all stored invoices, leaving an empty collection.
    async fn clear(&self) -> Result<(), VectorStoreError>;

    async fn stats(&self) -> Result<CollectionStats, VectorStoreError>;

    fn collection(&self) -> &str;
}

/// Connect to the configured backend.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn VectorStore>, VectorStoreError> {
    match config.backend {
        VectorBackend::Memory => Ok(Arc::new(MemoryStore::new(
            &config.collection_name,
            config.embedding_dimension,
        ))),
        VectorBackend::Qdrant => Ok(Arc::new(QdrantStore::new(config)?)),
    }
}

/// Keep the first (best scored) hit of every invoice, up to `limit` invoices.
pub(crate) fn best_per_invoice(hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| seen.insert(hit.metadata.document_id.clone()))
        .take(limit)
        .collect()
}
