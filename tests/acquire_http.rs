//! Source acquisition against a mocked OSF

use reprocheck::acquire::{archive, AcquireError, AcquireOutcome, OsfClient, RetryPolicy, SourceAcquirer};
use reprocheck::descriptor::MetadataSource;
use reprocheck::{ProjectId, Workspace};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARCHIVE_PATH: &str = "/v1/resources/abc12/providers/osfstorage/";
const FILES_PATH: &str = "/v2/nodes/abc12/files/osfstorage/";

fn id() -> ProjectId {
    ProjectId::new("abc12").unwrap()
}

fn create_client(mock_server: &MockServer, attempts: u32) -> OsfClient {
    OsfClient::new(
        mock_server.uri(),
        mock_server.uri(),
        RetryPolicy::fixed(attempts, Duration::from_millis(10)),
        Duration::from_secs(10),
    )
    .unwrap()
    .with_progress(false)
}

/// ZIP bytes of a small project with one script
fn project_zip() -> Vec<u8> {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("code")).unwrap();
    fs::write(src.join("code/main.R"), "print('hi')\n").unwrap();
    fs::write(src.join("data.csv"), "a,b\n1,2\n").unwrap();

    let zip = dir.path().join("project.zip");
    archive::pack_directory(&src, &zip).unwrap();
    fs::read(zip).unwrap()
}

#[tokio::test]
async fn test_archive_download_retries_after_rate_limit() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(project_zip()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let workspace = Workspace::new(dir.path());
    let client = Arc::new(create_client(&mock_server, 3));
    let acquirer = SourceAcquirer::new(workspace.clone(), Arc::clone(&client));

    let outcome = acquirer.acquire(&id()).await.unwrap();

    assert!(matches!(outcome, AcquireOutcome::Downloaded { .. }));
    assert!(outcome.used_network());
    assert_eq!(client.backoff_count(), 2);
    assert!(workspace.archive_path(&id()).is_file());
    assert!(workspace.source_dir(&id()).join("code/main.R").is_file());
}

#[tokio::test]
async fn test_rate_limit_exhausts_attempts() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let workspace = Workspace::new(dir.path());
    let client = Arc::new(create_client(&mock_server, 3));
    let acquirer = SourceAcquirer::new(workspace.clone(), Arc::clone(&client));

    let err = acquirer.acquire(&id()).await.unwrap_err();

    assert!(err.is_rate_limited());
    match err {
        AcquireError::RateLimited { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("Expected RateLimited, got {:?}", other),
    }
    assert_eq!(client.backoff_count(), 2);
    assert!(!workspace.archive_path(&id()).exists());
    assert!(!archive::is_populated(&workspace.source_dir(&id())));
}

#[tokio::test]
async fn test_refused_archive_falls_back_to_traversal() {
    let mock_server = MockServer::start().await;
    let base = mock_server.uri();

    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(FILES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {
                    "attributes": { "kind": "file", "name": "main.R" },
                    "links": { "download": format!("{}/download/main", base) }
                },
                {
                    "attributes": { "kind": "folder", "name": "data" },
                    "relationships": {
                        "files": { "links": { "related": { "href": format!("{}{}data/", base, FILES_PATH) } } }
                    }
                },
                {
                    "attributes": { "kind": "file", "name": ".." },
                    "links": { "download": format!("{}/download/evil", base) }
                }
            ],
            "links": { "next": null }
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{}data/", FILES_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [
                {
                    "attributes": { "kind": "file", "name": "input.csv" },
                    "links": { "download": format!("{}/download/input", base) }
                }
            ]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/download/main"))
        .respond_with(ResponseTemplate::new(200).set_body_string("source('helpers.R')\n"))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/download/input"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x\n1\n"))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let workspace = Workspace::new(dir.path());
    let acquirer = SourceAcquirer::new(workspace.clone(), Arc::new(create_client(&mock_server, 1)));

    let outcome = acquirer.acquire(&id()).await.unwrap();

    match outcome {
        AcquireOutcome::Traversed { files, .. } => assert_eq!(files, 2),
        other => panic!("Expected Traversed, got {:?}", other),
    }
    let src = workspace.source_dir(&id());
    assert_eq!(fs::read_to_string(src.join("main.R")).unwrap(), "source('helpers.R')\n");
    assert!(src.join("data/input.csv").is_file());
    // traversal leaves a snapshot behind for later restores
    assert!(workspace.archive_path(&id()).is_file());
}

#[tokio::test]
async fn test_corrupt_archive_is_not_cached() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let workspace = Workspace::new(dir.path());
    let acquirer = SourceAcquirer::new(workspace.clone(), Arc::new(create_client(&mock_server, 1)));

    assert!(acquirer.acquire(&id()).await.is_err());
    assert!(!workspace.archive_path(&id()).exists());
    assert!(!archive::is_populated(&workspace.source_dir(&id())));
}

#[tokio::test]
async fn test_prefetch_skips_existing_archive() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(ARCHIVE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(project_zip()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let dir = TempDir::new().unwrap();
    let workspace = Workspace::new(dir.path());
    let acquirer = SourceAcquirer::new(workspace.clone(), Arc::new(create_client(&mock_server, 1)));

    assert!(acquirer.prefetch(&id()).await.unwrap());
    assert!(!acquirer.prefetch(&id()).await.unwrap());
    assert!(!workspace.source_dir(&id()).exists());
}

#[tokio::test]
async fn test_node_metadata() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/nodes/abc12/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": {
                "attributes": {
                    "title": "Replication of Study 4",
                    "description": ""
                }
            }
        })))
        .mount(&mock_server)
        .await;

    let client = create_client(&mock_server, 1);
    let metadata = client.project_metadata(&id()).await.unwrap();

    assert_eq!(metadata.title, "Replication of Study 4");
    assert_eq!(metadata.description, "No description provided.");
}
