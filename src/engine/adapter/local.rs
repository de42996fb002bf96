//! Local Document Adapter
//!
//! File-backed document store: each collection is a JSON array at
//! `<dir>/<collection>.json`. Pipelines run through the in-process evaluator.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Instant;
use tracing::debug;

use super::{AdapterError, AdapterResult, DocumentAdapter, ResultSet, Row};
use crate::engine::pipeline;

pub struct LocalDocumentAdapter {
    dir: Option<PathBuf>,
    /// Loaded collections, keyed by name
    collections: RwLock<HashMap<String, Vec<Value>>>,
}

impl LocalDocumentAdapter {
    /// Collections live as JSON files in `dir`
    pub fn open(dir: &Path) -> AdapterResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| AdapterError::Connection(e.to_string()))?;
        Ok(Self {
            dir: Some(dir.to_path_buf()),
            collections: RwLock::new(HashMap::new()),
        })
    }

    /// Collections held only in memory
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn collection_path(&self, name: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{}.json", name)))
    }

    fn load_collection(&self, name: &str) -> AdapterResult<Vec<Value>> {
        if let Some(docs) = self.read_cache()?.get(name) {
            return Ok(docs.clone());
        }

        let path = self
            .collection_path(name)
            .filter(|p| p.exists())
            .ok_or_else(|| AdapterError::NotFound(format!("collection '{}'", name)))?;

        let content = std::fs::read_to_string(&path).map_err(|e| AdapterError::Internal(e.to_string()))?;
        let docs = match serde_json::from_str::<Value>(&content)
            .map_err(|e| AdapterError::Validation(format!("{}: {}", path.display(), e)))?
        {
            Value::Array(items) => items,
            _ => {
                return Err(AdapterError::Validation(format!(
                    "{}: expected a JSON array of documents",
                    path.display()
                )))
            }
        };

        debug!(collection = name, documents = docs.len(), "loaded local collection");
        self.write_cache()?.insert(name.to_string(), docs.clone());
        Ok(docs)
    }

    fn read_cache(&self) -> AdapterResult<std::sync::RwLockReadGuard<'_, HashMap<String, Vec<Value>>>> {
        self.collections
            .read()
            .map_err(|e| AdapterError::Internal(e.to_string()))
    }

    fn write_cache(&self) -> AdapterResult<std::sync::RwLockWriteGuard<'_, HashMap<String, Vec<Value>>>> {
        self.collections
            .write()
            .map_err(|e| AdapterError::Internal(e.to_string()))
    }

    /// Names of collections available on disk or in memory
    pub fn list_collections(&self) -> AdapterResult<Vec<String>> {
        let mut names: Vec<String> = self.read_cache()?.keys().cloned().collect();
        if let Some(dir) = &self.dir {
            let entries = std::fs::read_dir(dir).map_err(|e| AdapterError::Internal(e.to_string()))?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}

#[async_trait]
impl DocumentAdapter for LocalDocumentAdapter {
    fn describe(&self) -> String {
        match &self.dir {
            Some(dir) => format!("local://{}", dir.display()),
            None => "local://memory".to_string(),
        }
    }

    async fn aggregate(&self, collection: &str, pipeline: &[Value]) -> AdapterResult<ResultSet> {
        let start = Instant::now();
        let docs = self.load_collection(collection)?;

        let output = pipeline::run(docs, pipeline).map_err(|e| AdapterError::Query(e.to_string()))?;

        let rows: Vec<Row> = output
            .into_iter()
            .map(|doc| match doc {
                Value::Object(map) => map,
                other => {
                    let mut row = Row::new();
                    row.insert("value".to_string(), other);
                    row
                }
            })
            .collect();

        Ok(ResultSet::from_rows(rows, start.elapsed().as_millis() as u64))
    }

    async fn replace_collection(&self, name: &str, docs: Vec<Value>) -> AdapterResult<u64> {
        let count = docs.len() as u64;
        if let Some(path) = self.collection_path(name) {
            let content = serde_json::to_string(&docs).map_err(|e| AdapterError::Internal(e.to_string()))?;
            std::fs::write(&path, content).map_err(|e| AdapterError::Internal(e.to_string()))?;
        }
        self.write_cache()?.insert(name.to_string(), docs);
        Ok(count)
    }

    async fn test_connection(&self) -> AdapterResult<()> {
        match &self.dir {
            Some(dir) if !dir.is_dir() => Err(AdapterError::Connection(format!(
                "document directory {} does not exist",
                dir.display()
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_replace_then_aggregate_in_memory() {
        let adapter = LocalDocumentAdapter::in_memory();
        let docs = vec![
            json!({"country_code": "DE", "power_kw": 150}),
            json!({"country_code": "DE", "power_kw": 50}),
            json!({"country_code": "FR", "power_kw": 22}),
        ];
        assert_eq!(adapter.replace_collection("charging_stations", docs).await.unwrap(), 3);

        let pipeline = vec![
            json!({"$group": {"_id": "$country_code", "stations": {"$sum": 1}}}),
            json!({"$sort": {"_id": 1}}),
        ];
        let result = adapter.aggregate("charging_stations", &pipeline).await.unwrap();
        assert_eq!(result.columns, vec!["_id", "stations"]);
        assert_eq!(result.rows[0]["stations"], json!(2));
    }

    #[tokio::test]
    async fn test_reads_collections_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ev_sales_data.json"),
            r#"[{"region": "Norway", "value": 1}, {"region": "Italy", "value": 2}]"#,
        )
        .unwrap();

        let adapter = LocalDocumentAdapter::open(dir.path()).unwrap();
        assert_eq!(adapter.list_collections().unwrap(), vec!["ev_sales_data"]);

        let result = adapter
            .aggregate("ev_sales_data", &[json!({"$match": {"value": {"$gt": 1}}})])
            .await
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.rows[0]["region"], json!("Italy"));
    }

    #[tokio::test]
    async fn test_missing_collection_and_bad_pipeline() {
        let adapter = LocalDocumentAdapter::in_memory();
        let err = adapter.aggregate("nope", &[]).await.unwrap_err();
        assert!(matches!(err, AdapterError::NotFound(_)));

        adapter.replace_collection("c", vec![json!({"a": 1})]).await.unwrap();
        let err = adapter.aggregate("c", &[json!({"$lookup": {}})]).await.unwrap_err();
        assert!(matches!(err, AdapterError::Query(_)));
    }
}
