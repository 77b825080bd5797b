//! Definitions assembled from the built-in registry and run end to end
#![allow(clippy::unwrap_used, clippy::expect_used)]

use sluice_common::ComponentConfig;
use sluice_components::builtin_registry;
use sluice_components::datasources::SqlDatasource;
use sluice_engine::component::{Datasource, SqlDialect};
use sluice_engine::definition::{assemble, validate, PipelineDefinition};
use sluice_engine::files::{ConfigResolver, LocalFileStore, NoopResolver};
use sluice_engine::variables::{resolve_variables, substitute};
use sluice_engine::{AssemblyError, PipelineError, RunReport, RunState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const PEOPLE: &str = "id,name,email\n1,ada,ada@example.com\n2,grace,grace@example.com\n3,alan,\n";

async fn run(
    definition: &PipelineDefinition,
    resolver: Arc<dyn ConfigResolver>,
) -> Result<RunReport, PipelineError> {
    let registry = builtin_registry().unwrap();
    let assembled = assemble(&registry, definition, resolver).await.unwrap();
    assembled
        .pipeline
        .run(&CancellationToken::new(), assembled.configs)
        .await
}

async fn query_all(db: &Path, sql: &str) -> Vec<(i64, String)> {
    let mut ds = SqlDatasource::new(SqlDialect::Sqlite);
    ds.init(&ComponentConfig::from_pairs([("file_path", db.to_string_lossy())]))
        .await
        .unwrap();
    let conn = ds.connection().unwrap().into_sql().unwrap();
    let rows: Vec<(i64, String)> = sqlx::query_as(sql).fetch_all(&conn.pool).await.unwrap();
    ds.close().await.unwrap();
    rows
}

/// Output files written under a file store, excluding metadata sidecars
fn output_files(store: &LocalFileStore) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(store.output_dir()) else {
        return Vec::new();
    };
    entries
        .map(|e| e.unwrap().path())
        .filter(|p| !p.to_string_lossy().ends_with(".meta.json"))
        .collect()
}

#[tokio::test]
async fn test_csv_through_processors_to_json() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("people.csv");
    let output = dir.path().join("people.json");
    std::fs::write(&input, PEOPLE).unwrap();

    let yaml = format!(
        r#"
options: {{ batch_size: 2 }}
source: {{ type: csv, params: {{ file_path: "{input}" }} }}
processors:
  - {{ type: convert_type, params: {{ column: id, type: int }} }}
  - {{ type: filter_rows, params: {{ column: id, operator: "<", value: 3 }} }}
  - {{ type: mask_data, params: {{ column: email, method: md5 }} }}
  - {{ type: rename_column, params: {{ mapping: '{{"name":"full_name"}}' }} }}
  - {{ type: select_columns, params: {{ columns: '["id","full_name","email"]' }} }}
sink: {{ type: json, params: {{ file_path: "{output}" }} }}
"#,
        input = input.display(),
        output = output.display(),
    );
    let definition = PipelineDefinition::from_yaml(&yaml).unwrap();

    let report = run(&definition, Arc::new(NoopResolver)).await.unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.records_read, 3);
    assert_eq!(report.records_written, 2);

    let written: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(
        written,
        vec![
            serde_json::json!({
                "id": 1,
                "full_name": "ada",
                "email": "3e3417d7ef77d5932a6734b916515ed5",
            }),
            serde_json::json!({
                "id": 2,
                "full_name": "grace",
                "email": "9f528ceb410182ebd9d490172948f11f",
            }),
        ]
    );
}

#[tokio::test]
async fn test_sqlite_load_with_variables_and_executors() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("warehouse.db");
    let store = LocalFileStore::new(dir.path().join("files"));
    std::fs::create_dir_all(store.input_dir()).unwrap();
    std::fs::write(store.input_dir().join("people.csv"), PEOPLE).unwrap();

    let yaml = format!(
        r#"
id: nightly-load
datasources:
  warehouse: {{ type: sqlite, params: {{ file_path: "{db}" }} }}
variables:
  floor: {{ type: sqlite, datasource: warehouse, params: {{ query: "SELECT 1" }} }}
pre_execute:
  type: sqlite
  datasource: warehouse
  params: {{ sql: "CREATE TABLE people (id INTEGER, name TEXT)" }}
source: {{ type: csv, params: {{ file_id: people }} }}
processors:
  - {{ type: filter_rows, params: {{ column: id, operator: ">", value: "${{floor}}" }} }}
  - {{ type: select_columns, params: {{ columns: '["id","name"]' }} }}
sink: {{ type: sqlite, datasource: warehouse, params: {{ table: people }} }}
post_execute:
  type: sqlite
  datasource: warehouse
  params: {{ sql: "UPDATE people SET name = upper(name)" }}
"#,
        db = db.display(),
    );
    let mut definition = PipelineDefinition::from_yaml(&yaml).unwrap();

    let registry = builtin_registry().unwrap();
    let values = resolve_variables(&registry, &definition, &store).await.unwrap();
    assert_eq!(values.get("floor").map(String::as_str), Some("1"));
    substitute(&mut definition, &values).unwrap();

    let report = run(&definition, Arc::new(store)).await.unwrap();
    assert_eq!(report.run_id.as_str(), "nightly-load");
    assert_eq!(report.records_written, 2);

    let rows = query_all(&db, "SELECT id, name FROM people ORDER BY id").await;
    assert_eq!(rows, vec![(2, "GRACE".to_string()), (3, "ALAN".to_string())]);
}

#[tokio::test]
async fn test_output_file_is_removed_when_run_fails() {
    let dir = TempDir::new().unwrap();
    let store = LocalFileStore::new(dir.path());
    std::fs::create_dir_all(store.input_dir()).unwrap();
    std::fs::write(store.input_dir().join("people.csv"), PEOPLE).unwrap();

    let failing = PipelineDefinition::from_yaml(
        r#"
source: { type: csv, params: { file_id: people } }
processors:
  - { type: convert_type, params: { column: name, type: int } }
sink: { type: csv, params: { file_name: report } }
"#,
    )
    .unwrap();
    let err = run(&failing, Arc::new(store.clone())).await.unwrap_err();
    assert!(format!("{}", err).contains("convert_type"), "{}", err);
    assert!(output_files(&store).is_empty());

    let working = PipelineDefinition::from_yaml(
        r#"
source: { type: csv, params: { file_id: people } }
sink: { type: csv, params: { file_name: report } }
"#,
    )
    .unwrap();
    run(&working, Arc::new(store.clone())).await.unwrap();

    let files = output_files(&store);
    assert_eq!(files.len(), 1);
    assert!(files[0].to_string_lossy().ends_with(".csv"));
    let written = std::fs::read_to_string(&files[0]).unwrap();
    assert!(written.starts_with("email,id,name\n"), "{}", written);
    assert_eq!(written.lines().count(), 4);
}

#[test]
fn test_validation_errors() {
    let registry = builtin_registry().unwrap();

    let mismatch = PipelineDefinition::from_yaml(
        r#"
datasources:
  fe: { type: doris, params: { host: fe, port: "8030", user: root, database: dw } }
source: { type: csv, params: { file_path: in.csv } }
sink: { type: sqlite, datasource: fe, params: { table: t } }
"#,
    )
    .unwrap();
    assert!(matches!(
        validate(&registry, &mismatch),
        Err(AssemblyError::DatasourceMismatch { .. })
    ));

    let missing = PipelineDefinition::from_yaml(
        r#"
source: { type: csv, params: { file_path: in.csv } }
sink: { type: postgres, params: { table: t } }
"#,
    )
    .unwrap();
    assert!(matches!(
        validate(&registry, &missing),
        Err(AssemblyError::MissingDatasource { .. })
    ));

    let unknown = PipelineDefinition::from_yaml(
        r#"
source: { type: parquet, params: {} }
sink: { type: json, params: { file_path: out.json } }
"#,
    )
    .unwrap();
    assert!(matches!(
        validate(&registry, &unknown),
        Err(AssemblyError::Registry(_))
    ));
}
