//! MongoDB Adapter
//!
//! Implements DocumentAdapter with the official driver. Pipelines arrive as JSON
//! and go through extended JSON so `{"$date": ...}` style literals survive.

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Database};
use serde_json::Value;
use std::time::Instant;
use tracing::debug;

use super::{AdapterError, AdapterResult, DocumentAdapter, ResultSet, Row};

pub struct MongoAdapter {
    db: Database,
    display: String,
}

impl MongoAdapter {
    /// Connect with typed client options. `shown` is the password-free description.
    pub fn connect(options: ClientOptions, database: &str, shown: &str) -> AdapterResult<Self> {
        let client = Client::with_options(options).map_err(|e| AdapterError::Connection(e.to_string()))?;

        debug!(connection = %shown, "mongodb client ready");
        Ok(Self {
            db: client.database(database),
            display: shown.to_string(),
        })
    }

    /// Convert one pipeline stage from JSON into a BSON document
    pub fn stage_to_bson(stage: &Value) -> AdapterResult<Document> {
        let bson = Bson::try_from(stage.clone())
            .map_err(|e| AdapterError::Validation(format!("invalid pipeline stage: {}", e)))?;
        match bson {
            Bson::Document(d) => Ok(d),
            other => Err(AdapterError::Validation(format!(
                "pipeline stage must be an object, got {}",
                other
            ))),
        }
    }

    /// Convert a result document into a JSON row
    pub fn document_to_row(doc: Document) -> Row {
        match Bson::Document(doc).into_relaxed_extjson() {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }
}

#[async_trait]
impl DocumentAdapter for MongoAdapter {
    fn describe(&self) -> String {
        self.display.clone()
    }

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> AdapterResult<ResultSet> {
        let start = Instant::now();
        let stages = pipeline
            .iter()
            .map(Self::stage_to_bson)
            .collect::<AdapterResult<Vec<Document>>>()?;

        let cursor = self
            .db
            .collection::<Document>(collection)
            .aggregate(stages)
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?;

        let docs: Vec<Document> = cursor
            .try_collect()
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?;

        let rows: Vec<Row> = docs.into_iter().map(Self::document_to_row).collect();
        Ok(ResultSet::from_rows(rows, start.elapsed().as_millis() as u64))
    }

    async fn replace_collection(&self, name: &str, docs: Vec<Value>) -> AdapterResult<u64> {
        let collection = self.db.collection::<Document>(name);
        collection
            .drop()
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?;

        if docs.is_empty() {
            return Ok(0);
        }

        let bson_docs = docs
            .iter()
            .map(Self::stage_to_bson)
            .collect::<AdapterResult<Vec<Document>>>()?;

        let result = collection
            .insert_many(bson_docs)
            .await
            .map_err(|e| AdapterError::Query(e.to_string()))?;
        Ok(result.inserted_ids.len() as u64)
    }

    async fn test_connection(&self) -> AdapterResult<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AdapterError::Connection(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_to_bson_keeps_operators() {
        let stage = json!({"$match": {"year": {"$gte": 2020}}});
        let doc = MongoAdapter::stage_to_bson(&stage).unwrap();
        assert!(doc.contains_key("$match"));
    }

    #[test]
    fn test_stage_to_bson_rejects_scalars() {
        let err = MongoAdapter::stage_to_bson(&json!(42)).unwrap_err();
        assert!(matches!(err, AdapterError::Validation(_)));
    }

    #[test]
    fn test_document_to_row_relaxed_numbers() {
        let row = MongoAdapter::document_to_row(doc! { "_id": "Italy", "total": 12.5, "n": 3_i32 });
        assert_eq!(row["_id"], json!("Italy"));
        assert_eq!(row["total"], json!(12.5));
        assert_eq!(row["n"], json!(3));
    }
}
