//! Query file loader

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{collection_for, Engine, QueryError, QueryRef};

/// Query names per engine and phase, sorted
#[derive(Debug, Clone, Default, Serialize)]
pub struct Catalog {
    pub sql: BTreeMap<String, Vec<String>>,
    pub mongodb: BTreeMap<String, Vec<String>>,
}

impl Catalog {
    pub fn total(&self) -> usize {
        self.sql.values().chain(self.mongodb.values()).map(Vec::len).sum()
    }
}

/// One query file found on disk
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct QueryFile {
    pub phase: String,
    pub name: String,
    pub engine: Engine,
}

impl QueryFile {
    pub fn query_ref(&self) -> QueryRef {
        QueryRef::new(&self.phase, &self.name)
    }
}

/// A loaded aggregation query and the collection it runs on
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineQuery {
    pub collection: String,
    pub pipeline: Vec<Value>,
}

pub struct QueryLoader {
    queries_dir: PathBuf,
}

impl QueryLoader {
    pub fn new(queries_dir: &Path) -> Self {
        Self {
            queries_dir: queries_dir.to_path_buf(),
        }
    }

    pub fn queries_dir(&self) -> &Path {
        &self.queries_dir
    }

    fn query_path(&self, engine: Engine, query: &QueryRef) -> PathBuf {
        self.queries_dir
            .join(engine.dir_name())
            .join(&query.phase)
            .join(format!("{}.{}", query.name, engine.extension()))
    }

    pub fn exists(&self, engine: Engine, query: &QueryRef) -> bool {
        self.query_path(engine, query).is_file()
    }

    fn read(&self, path: &Path) -> Result<String, QueryError> {
        if !path.is_file() {
            return Err(QueryError::NotFound(path.to_path_buf()));
        }
        std::fs::read_to_string(path).map_err(|source| QueryError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load SQL text for a query
    pub fn load_sql(&self, query: &QueryRef) -> Result<String, QueryError> {
        let path = self.query_path(Engine::Sql, query);
        debug!(path = %path.display(), "loading sql query");
        self.read(&path)
    }

    /// Load an aggregation pipeline. The file is either a stage array, run on
    /// the mapped collection, or `{"collection": ..., "pipeline": [...]}`.
    pub fn load_pipeline(&self, query: &QueryRef) -> Result<PipelineQuery, QueryError> {
        let path = self.query_path(Engine::Mongodb, query);
        debug!(path = %path.display(), "loading pipeline query");
        let content = self.read(&path)?;

        let format_err = |message: String| QueryError::Format {
            path: path.clone(),
            message,
        };

        let parsed: Value = serde_json::from_str(&content).map_err(|e| format_err(e.to_string()))?;
        let default_collection = collection_for(&query.name).to_string();

        match parsed {
            Value::Array(stages) => Ok(PipelineQuery {
                collection: default_collection,
                pipeline: stages,
            }),
            Value::Object(mut obj) => {
                let pipeline = match obj.remove("pipeline") {
                    Some(Value::Array(stages)) => stages,
                    _ => return Err(format_err("expected a \"pipeline\" array".into())),
                };
                let collection = match obj.remove("collection") {
                    Some(Value::String(c)) if !c.is_empty() => c,
                    None => default_collection,
                    _ => return Err(format_err("\"collection\" must be a non-empty string".into())),
                };
                Ok(PipelineQuery { collection, pipeline })
            }
            _ => Err(format_err("expected a JSON array of pipeline stages".into())),
        }
    }

    /// Names per engine and phase, for every phase directory present
    pub fn list_queries(&self) -> Catalog {
        let mut catalog = Catalog::default();
        for engine in [Engine::Sql, Engine::Mongodb] {
            let target = match engine {
                Engine::Sql => &mut catalog.sql,
                Engine::Mongodb => &mut catalog.mongodb,
            };
            for (phase, names) in self.scan_engine(engine, false) {
                if !names.is_empty() {
                    target.insert(phase, names);
                }
            }
        }
        catalog
    }

    /// Every query file under `phase_*` directories, sorted by phase, name, engine
    pub fn discover(&self) -> Vec<QueryFile> {
        let mut files: Vec<QueryFile> = Vec::new();
        for engine in [Engine::Sql, Engine::Mongodb] {
            for (phase, names) in self.scan_engine(engine, true) {
                files.extend(names.into_iter().map(|name| QueryFile {
                    phase: phase.clone(),
                    name,
                    engine,
                }));
            }
        }
        files.sort();
        files
    }

    fn scan_engine(&self, engine: Engine, phases_only: bool) -> BTreeMap<String, Vec<String>> {
        let mut result = BTreeMap::new();
        let engine_dir = self.queries_dir.join(engine.dir_name());
        let Ok(entries) = std::fs::read_dir(&engine_dir) else {
            return result;
        };

        for entry in entries.flatten() {
            let phase_dir = entry.path();
            if !phase_dir.is_dir() {
                continue;
            }
            let Some(phase) = phase_dir.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            if phases_only && !phase.starts_with("phase_") {
                continue;
            }

            let mut names: Vec<String> = std::fs::read_dir(&phase_dir)
                .into_iter()
                .flatten()
                .flatten()
                .map(|f| f.path())
                .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(engine.extension()))
                .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
                .collect();
            names.sort();
            result.insert(phase, names);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn corpus() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "sql/phase_1/Q1_1_market_growth_trajectory.sql", "SELECT 1;");
        write(root, "sql/phase_1/Q2_1_infrastructure_density.sql", "SELECT 2;");
        write(root, "sql/common/helpers.sql", "SELECT 3;");
        write(root, "mongodb/phase_1/Q1_1_market_growth_trajectory.json", r#"[{"$limit": 5}]"#);
        write(
            root,
            "mongodb/phase_2/Q9_custom.json",
            r#"{"collection": "charging_stations", "pipeline": [{"$count": "n"}]}"#,
        );
        write(root, "mongodb/phase_2/Q9_broken.json", r#"{"$match": {}}"#);
        write(root, "mongodb/phase_2/notes.txt", "ignored");
        dir
    }

    #[test]
    fn test_load_sql_and_missing_file() {
        let dir = corpus();
        let loader = QueryLoader::new(dir.path());
        let sql = loader
            .load_sql(&QueryRef::new("phase_1", "Q1_1_market_growth_trajectory"))
            .unwrap();
        assert_eq!(sql, "SELECT 1;");

        let err = loader.load_sql(&QueryRef::new("phase_9", "nope")).unwrap_err();
        assert!(matches!(err, QueryError::NotFound(_)));
    }

    #[test]
    fn test_load_pipeline_forms() {
        let dir = corpus();
        let loader = QueryLoader::new(dir.path());

        let plain = loader
            .load_pipeline(&QueryRef::new("phase_1", "Q1_1_market_growth_trajectory"))
            .unwrap();
        assert_eq!(plain.collection, "ev_sales_data");
        assert_eq!(plain.pipeline, vec![json!({"$limit": 5})]);

        let custom = loader.load_pipeline(&QueryRef::new("phase_2", "Q9_custom")).unwrap();
        assert_eq!(custom.collection, "charging_stations");

        let err = loader.load_pipeline(&QueryRef::new("phase_2", "Q9_broken")).unwrap_err();
        assert!(matches!(err, QueryError::Format { .. }));
    }

    #[test]
    fn test_list_queries_includes_all_dirs() {
        let dir = corpus();
        let catalog = QueryLoader::new(dir.path()).list_queries();
        assert_eq!(
            catalog.sql["phase_1"],
            vec!["Q1_1_market_growth_trajectory", "Q2_1_infrastructure_density"]
        );
        assert!(catalog.sql.contains_key("common"));
        assert_eq!(catalog.mongodb["phase_2"], vec!["Q9_broken", "Q9_custom"]);
        assert_eq!(catalog.total(), 6);
    }

    #[test]
    fn test_discover_only_phase_dirs_sorted() {
        let dir = corpus();
        let files = QueryLoader::new(dir.path()).discover();
        assert_eq!(files.len(), 5);
        assert!(files.iter().all(|f| f.phase.starts_with("phase_")));
        assert_eq!(files[0].name, "Q1_1_market_growth_trajectory");
        assert_eq!(files[0].engine, Engine::Sql);
        assert_eq!(files[1].engine, Engine::Mongodb);
    }
}
