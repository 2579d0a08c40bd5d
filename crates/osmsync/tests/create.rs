//! Project creation from the supported dump sources

mod helpers;

use helpers::*;
use osmsync::replication::DumpClient;
use osmsync::storage::memory::MemoryStore;
use osmsync::{CreateManager, DumpSource, SyncError};
use reqwest::header::HeaderMap;
use std::path::Path;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn create_manager(
    store: MemoryStore,
    tools: Arc<FakeTools>,
    work_dir: &Path,
    headers: HeaderMap,
) -> CreateManager {
    let dumps = DumpClient::new(&http_config(), headers).unwrap();
    CreateManager::new(Arc::new(store), dumps, tools, work_dir)
}

fn store_with_script() -> MemoryStore {
    let store = MemoryStore::new(BUCKET);
    store.insert("proj/roads.lua", "return {}");
    store
}

#[tokio::test]
async fn test_create_from_dump_server() {
    let server = MockServer::start().await;
    let dumps = serde_json::json!([{
        "id": "7",
        "name": "israel",
        "timestamp": "2023-01-01T00:00:00Z",
        "url": format!("{}/files/israel.osm.pbf", server.uri()),
    }]);

    Mock::given(method("GET"))
        .and(path("/dumps"))
        .and(query_param("limit", "1"))
        .and(query_param("sort", "desc"))
        .and(header("x-api-key", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(dumps))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/israel.osm.pbf"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"pbf".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let work_dir = tempfile::tempdir().unwrap();
    let tools = FakeTools::new();
    let headers = osmsync::replication::dump::parse_headers(&["x-api-key=secret"]).unwrap();
    let manager = create_manager(store_with_script(), tools.clone(), work_dir.path(), headers);

    let source = DumpSource::DumpServer(server.uri());
    manager.create("proj", "roads.lua", &source).await.unwrap();

    let dump = work_dir.path().join("dump.osm.pbf");
    assert_eq!(std::fs::read(&dump).unwrap(), b"pbf");
    assert_eq!(
        tools.calls(),
        vec![ToolCall::Create {
            style: work_dir.path().join("proj/roads.lua"),
            dump,
        }]
    );
}

#[tokio::test]
async fn test_create_from_local_file() {
    let work_dir = tempfile::tempdir().unwrap();
    let dump = work_dir.path().join("local.osm.pbf");
    std::fs::write(&dump, b"pbf").unwrap();

    let tools = FakeTools::new();
    let manager = create_manager(store_with_script(), tools.clone(), work_dir.path(), HeaderMap::new());

    manager
        .create("proj", "roads.lua", &DumpSource::LocalFile(dump.clone()))
        .await
        .unwrap();

    assert_eq!(
        tools.calls(),
        vec![ToolCall::Create {
            style: work_dir.path().join("proj/roads.lua"),
            dump,
        }]
    );
}

#[tokio::test]
async fn test_empty_dump_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/dumps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;

    let work_dir = tempfile::tempdir().unwrap();
    let tools = FakeTools::new();
    let manager = create_manager(store_with_script(), tools.clone(), work_dir.path(), HeaderMap::new());

    let err = manager
        .create("proj", "roads.lua", &DumpSource::DumpServer(server.uri()))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::DumpServerEmptyResponse(_)));
    assert!(tools.calls().is_empty());
}

#[tokio::test]
async fn test_create_requires_bucket() {
    let work_dir = tempfile::tempdir().unwrap();
    let tools = FakeTools::new();
    let manager = create_manager(
        MemoryStore::without_bucket(BUCKET),
        tools.clone(),
        work_dir.path(),
        HeaderMap::new(),
    );

    let err = manager
        .create("proj", "roads.lua", &DumpSource::RemoteUrl("http://127.0.0.1:1/dump.osm.pbf".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::BucketDoesNotExist(ref bucket) if bucket == BUCKET));
    assert!(tools.calls().is_empty());
}
