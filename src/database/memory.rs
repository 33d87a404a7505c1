//! Process-local vector store with brute-force cosine search.

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{best_per_invoice, InvoicePoint, VectorStore};
use crate::embeddings::{cosine_similarity, Embedding};
use crate::error::VectorStoreError;
use crate::models::{CollectionStats, SearchFilters, SearchHit};

pub struct MemoryStore {
    collection: String,
    dimension: usize,
    points: RwLock<Vec<InvoicePoint>>,
}

impl MemoryStore {
    pub fn new(collection: &str, dimension: usize) -> Self {
        MemoryStore {
            collection: collection.to_string(),
            dimension,
            points: RwLock::new(Vec::new()),
        }
    }

    fn check_dimension(&self, embedding: &Embedding) -> Result<(), VectorStoreError> {
        if embedding.dimension() != self.dimension {
            return Err(VectorStoreError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.dimension(),
            });
        }
        Ok(())
    }
}

fn to_hit(point: &InvoicePoint, score: Option<f32>) -> SearchHit {
    SearchHit {
        id: point.id.clone(),
        document: point.document.clone(),
        metadata: point.metadata.clone(),
        score,
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        Ok(true)
    }

    async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        Ok(())
    }

    async fn upsert(&self, points: Vec<InvoicePoint>) -> Result<(), VectorStoreError> {
        for point in &points {
            self.check_dimension(&point.embedding)?;
        }

        let mut stored = self.points.write().await;
        for point in points {
            match stored.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point,
                None => stored.push(point),
            }
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &Embedding,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        self.check_dimension(query)?;

        let stored = self.points.read().await;
        let mut scored: Vec<(f32, &InvoicePoint)> = stored
            .iter()
            .filter(|p| filters.matches(&p.metadata))
            .map(|p| (cosine_similarity(query, &p.embedding), p))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        // A long invoice can own most of the top chunks, so de-duplicate before truncating
        let hits = scored
            .into_iter()
            .map(|(score, p)| to_hit(p, Some(score)))
            .collect();
        Ok(best_per_invoice(hits, limit))
    }

    async fn list(
        &self,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        let stored = self.points.read().await;
        Ok(stored
            .iter()
            .filter(|p| p.chunk_index == 0 && filters.matches(&p.metadata))
            .take(limit)
            .map(|p| to_hit(p, None))
            .collect())
    }

    async fn delete_invoice(&self, document_id: &str) -> Result<bool, VectorStoreError> {
        let mut stored = self.points.write().await;
        let before = stored.len();
        stored.retain(|p| p.metadata.document_id != document_id);
        Ok(stored.len() != before)
    }

    async fn clear(&self) -> Result<(), VectorStoreError> {
        self.points.write().await.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<CollectionStats, VectorStoreError> {
        let stored = self.points.read().await;
        Ok(CollectionStats {
            collection_name: self.collection.clone(),
            invoice_count: stored.iter().filter(|p| p.chunk_index == 0).count() as u64,
            chunk_count: stored.len() as u64,
            status: "ready".to_string(),
        })
    }

    fn collection(&self) -> &str {
        &self.collection
    }
}
