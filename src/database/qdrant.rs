use async_trait::async_trait;
use log::{debug, info};
use qdrant_client::qdrant::point_id::PointIdOptions;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointId, PointStruct, ScrollPointsBuilder, SearchPointGroupsBuilder, UpsertPointsBuilder,
    Value, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;

use super::{best_per_invoice, InvoicePoint, StoreConfig, VectorStore};
use crate::embeddings::Embedding;
use crate::error::VectorStoreError;
use crate::models::{employee_key, CollectionStats, InvoiceMetadata, SearchFilters, SearchHit};

/// Client for storing invoice chunks in Qdrant
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    dimension: u64,
}

impl QdrantStore {
    /// Create a new Qdrant client
    pub fn new(config: &StoreConfig) -> Result<Self, VectorStoreError> {
        let url = config
            .url
            .as_deref()
            .ok_or_else(|| VectorStoreError::Connection("QDRANT_URL is not set".to_string()))?;

        let mut builder = Qdrant::from_url(url);
        if let Some(api_key) = &config.api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| VectorStoreError::Connection(e.to_string()))?;

        Ok(QdrantStore {
            client,
            collection: config.collection_name.clone(),
            dimension: config.embedding_dimension as u64,
        })
    }

    async fn count(&self, filter: Option<Filter>) -> Result<u64, VectorStoreError> {
        let mut request = CountPointsBuilder::new(&self.collection).exact(true);
        if let Some(filter) = filter {
            request = request.filter(filter);
        }
        let response = self
            .client
            .count(request)
            .await
            .map_err(|e| VectorStoreError::Search(e.to_string()))?;
        Ok(response.result.map(|r| r.count).unwrap_or(0))
    }
}

/// Translate metadata filters into Qdrant conditions
fn filter_conditions(filters: &SearchFilters) -> Vec<Condition> {
    let mut conditions = Vec::new();
    if let Some(name) = &filters.employee_name {
        conditions.push(Condition::matches("employee_key", employee_key(name)));
    }
    if let Some(status) = filters.status {
        conditions.push(Condition::matches("status", status.as_str().to_string()));
    }
    if let Some(date) = &filters.date {
        conditions.push(Condition::matches("date", date.clone()));
    }
    conditions
}

fn to_payload(point: &InvoicePoint) -> HashMap<String, Value> {
    let meta = &point.metadata;
    let mut payload: HashMap<String, Value> = HashMap::new();
    payload.insert("document".to_string(), point.document.clone().into());
    payload.insert("chunk_index".to_string(), (point.chunk_index as i64).into());
    payload.insert("document_id".to_string(), meta.document_id.clone().into());
    payload.insert("invoice_id".to_string(), meta.invoice_id.clone().into());
    payload.insert("employee_name".to_string(), meta.employee_name.clone().into());
    payload.insert("employee_key".to_string(), employee_key(&meta.employee_name).into());
    payload.insert("status".to_string(), meta.status.as_str().to_string().into());
    payload.insert("date".to_string(), meta.date.clone().into());
    payload.insert("reimbursable_amount".to_string(), meta.reimbursable_amount.into());
    payload.insert("total_amount".to_string(), meta.total_amount.into());
    payload.insert("file_name".to_string(), meta.file_name.clone().into());
    payload
}

/// Qdrant takes `u32` limits
fn qdrant_limit(limit: usize) -> u32 {
    u32::try_from(limit).unwrap_or(u32::MAX)
}

fn point_id_string(id: Option<PointId>) -> String {
    match id.and_then(|id| id.point_id_options) {
        Some(PointIdOptions::Uuid(uuid)) => uuid,
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

/// Rebuild a hit from a stored payload; points missing metadata are skipped.
fn hit_from_payload(
    id: String,
    payload: &HashMap<String, Value>,
    score: Option<f32>,
) -> Option<SearchHit> {
    let text = |key: &str| payload.get(key).and_then(|v| v.as_str()).cloned();
    let number = |key: &str| {
        payload
            .get(key)
            .and_then(|v| v.as_double().or_else(|| v.as_integer().map(|i| i as f64)))
            .unwrap_or(0.0)
    };

    let metadata = InvoiceMetadata {
        document_id: text("document_id")?,
        invoice_id: text("invoice_id").unwrap_or_default(),
        employee_name: text("employee_name").unwrap_or_default(),
        status: text("status")?.parse().ok()?,
        date: text("date").unwrap_or_default(),
        reimbursable_amount: number("reimbursable_amount"),
        total_amount: number("total_amount"),
        file_name: text("file_name").unwrap_or_default(),
    };

    Some(SearchHit {
        id,
        document: text("document").unwrap_or_default(),
        metadata,
        score,
    })
}

#[async_trait]
impl VectorStore for QdrantStore {
    async fn health_check(&self) -> Result<bool, VectorStoreError> {
        self.client
            .health_check()
            .await
            .map(|_| true)
            .map_err(|e| VectorStoreError::Connection(e.to_string()))
    }

    async fn ensure_collection(&self) -> Result<(), VectorStoreError> {
        let exists = self
            .client
            .collection_exists(self.collection.clone())
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;
        if exists {
            return Ok(());
        }

        let create_collection = CreateCollectionBuilder::new(&self.collection)
            .vectors_config(VectorParamsBuilder::new(self.dimension, Distance::Cosine));

        self.client
            .create_collection(create_collection)
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;

        info!("Created collection {}", self.collection);
        Ok(())
    }

    async fn upsert(&self, points: Vec<InvoicePoint>) -> Result<(), VectorStoreError> {
        if points.is_empty() {
            return Ok(());
        }

        let mut qdrant_points = Vec::with_capacity(points.len());
        for point in points {
            let actual = point.embedding.dimension();
            if actual as u64 != self.dimension {
                return Err(VectorStoreError::DimensionMismatch {
                    expected: self.dimension as usize,
                    actual,
                });
            }
            let payload = to_payload(&point);
            qdrant_points.push(PointStruct::new(point.id, point.embedding.values, payload));
        }

        debug!("Upserting {} points into {}", qdrant_points.len(), self.collection);
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, qdrant_points).wait(true))
            .await
            .map_err(|e| VectorStoreError::Upsert(e.to_string()))?;

        Ok(())
    }

    async fn search(
        &self,
        query: &Embedding,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        // One group per invoice holding its best chunk
        let mut request = SearchPointGroupsBuilder::new(
            &self.collection,
            query.values.clone(),
            qdrant_limit(limit),
            "document_id",
            1,
        )
        .with_payload(true);

        let conditions = filter_conditions(filters);
        if !conditions.is_empty() {
            request = request.filter(Filter::must(conditions));
        }

        let response = self
            .client
            .search_groups(request)
            .await
            .map_err(|e| VectorStoreError::Search(e.to_string()))?;

        let hits = response
            .result
            .map(|r| r.groups)
            .unwrap_or_default()
            .into_iter()
            .flat_map(|group| group.hits)
            .filter_map(|point| {
                hit_from_payload(point_id_string(point.id), &point.payload, Some(point.score))
            })
            .collect();

        Ok(best_per_invoice(hits, limit))
    }

    async fn list(
        &self,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<SearchHit>, VectorStoreError> {
        let mut conditions = filter_conditions(filters);
        conditions.push(Condition::matches("chunk_index", 0i64));

        let request = ScrollPointsBuilder::new(&self.collection)
            .filter(Filter::must(conditions))
            .limit(qdrant_limit(limit))
            .with_payload(true)
            .with_vectors(false);

        let response = self
            .client
            .scroll(request)
            .await
            .map_err(|e| VectorStoreError::Search(e.to_string()))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(|point| hit_from_payload(point_id_string(point.id), &point.payload, None))
            .collect())
    }

    async fn delete_invoice(&self, document_id: &str) -> Result<bool, VectorStoreError> {
        let filter = Filter::must([Condition::matches("document_id", document_id.to_string())]);

        if self.count(Some(filter.clone())).await? == 0 {
            return Ok(false);
        }

        self.client
            .delete_points(DeletePointsBuilder::new(&self.collection).points(filter).wait(true))
            .await
            .map_err(|e| VectorStoreError::Delete(e.to_string()))?;

        Ok(true)
    }

    async fn clear(&self) -> Result<(), VectorStoreError> {
        let exists = self
            .client
            .collection_exists(self.collection.clone())
            .await
            .map_err(|e| VectorStoreError::Collection(e.to_string()))?;

        if exists {
            self.client
                .delete_collection(&self.collection)
                .await
                .map_err(|e| VectorStoreError::Delete(e.to_string()))?;
            info!("Deleted collection {}", self.collection);
        }

        self.ensure_collection().await
    }

    async fn stats(&self) -> Result<CollectionStats, VectorStoreError> {
        let chunk_count = self.count(None).await?;
        let invoice_count = self
            .count(Some(Filter::must([Condition::matches("chunk_index", 0i64)])))
            .await?;

        Ok(CollectionStats {
            collection_name: self.collection.clone(),
            invoice_count,
            chunk_count,
            status: "ready".to_string(),
        })
    }

    fn collection(&self) -> &str {
        &self.collection
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReimbursementStatus;

    fn sample_point() -> InvoicePoint {
        InvoicePoint {
            id: "4f6c3c1e-0c4a-4f0e-9b57-3d0f1b0e8a11".into(),
            embedding: Embedding::new(vec![0.1, 0.2]),
            document: "Invoice ID: inv_001".into(),
            metadata: InvoiceMetadata {
                document_id: "doc-1".into(),
                invoice_id: "inv_001".into(),
                employee_name: "Sarah  Johnson".into(),
                status: ReimbursementStatus::PartiallyReimbursed,
                date: "2024-03-05".into(),
                reimbursable_amount: 100.0,
                total_amount: 120.0,
                file_name: "inv_001.pdf".into(),
            },
            chunk_index: 0,
        }
    }

    #[test]
    fn test_payload_round_trip() {
        let point = sample_point();
        let payload = to_payload(&point);
        assert_eq!(
            payload.get("employee_key").and_then(|v| v.as_str()).map(String::as_str),
            Some("sarah johnson")
        );

        let hit = hit_from_payload(point.id.clone(), &payload, Some(0.5)).unwrap();
        assert_eq!(hit.metadata, point.metadata);
        assert_eq!(hit.document, point.document);
    }

    #[test]
    fn test_payload_without_metadata_is_skipped() {
        let mut payload = to_payload(&sample_point());
        payload.remove("document_id");
        assert!(hit_from_payload("x".into(), &payload, None).is_none());
    }

    #[test]
    fn test_filter_conditions() {
        assert!(filter_conditions(&SearchFilters::default()).is_empty());
        let filters = SearchFilters {
            employee_name: Some("Sarah Johnson".into()),
            status: Some(ReimbursementStatus::Declined),
            date: None,
        };
        assert_eq!(filter_conditions(&filters).len(), 2);
    }

    #[test]
    fn test_limit_saturates() {
        assert_eq!(qdrant_limit(5), 5);
        assert_eq!(qdrant_limit(usize::MAX), u32::MAX);
    }
}
