//! Timeseries read paths against fixture SQLite sources.

use cvl_client::CvlClient;
use cvl_server::CvlServer;
use rusqlite::Connection;
use serde_json::json;
use std::path::{Path, PathBuf};

fn fixture(dir: &Path, name: &str, rows: &[(f64, Option<&str>, &str)]) -> PathBuf {
    let path = dir.join(name);
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE resources (ts REAL PRIMARY KEY NOT NULL, modified REAL, \
                                 path TEXT, type TEXT, content TEXT); \
         CREATE TABLE meta (id INTEGER PRIMARY KEY, version INTEGER, properties TEXT);",
    )
    .unwrap();
    for (ts, row_path, content) in rows {
        conn.execute(
            "INSERT INTO resources (ts, modified, path, type, content) \
             VALUES (?1, ?1, ?2, 'geojson', ?3)",
            rusqlite::params![ts, row_path, content],
        )
        .unwrap();
    }
    conn.execute(
        "INSERT INTO meta (id, version, properties) VALUES (1, 1, ?1)",
        [format!("{{\"title\": \"{name}\"}}")],
    )
    .unwrap();
    path
}

async fn start_with_sources(sources: Vec<PathBuf>) -> (CvlClient, String) {
    let mut builder = CvlServer::builder().port(0);
    for source in sources {
        builder = builder.timeseries(source);
    }
    let server = builder.build().await.unwrap();
    let base = format!("http://{}", server.local_addr());
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    (CvlClient::new(&base), base)
}

#[tokio::test]
async fn test_window_spans_all_sources() {
    let dir = tempfile::tempdir().unwrap();
    let a = fixture(
        dir.path(),
        "a.db",
        &[(1.0, Some("a/one"), "{\"n\": 1}"), (2.0, None, "{\"n\": 2}")],
    );
    let b = fixture(dir.path(), "b.db", &[(3.0, Some("b/three"), "{\"n\": 3}")]);
    let (client, _base) = start_with_sources(vec![a, b]).await;

    let events = client.timeseries(1.0, 3.0).await.unwrap();
    assert_eq!(events.len(), 2);
    // Lower bound is exclusive: ts == 1.0 is not in the window.
    assert_eq!(events[0]["ts"], json!(2.0));
    assert_eq!(events[0]["db"], json!("a.db"));
    assert_eq!(events[0]["path"], json!("a.db/2.0"));
    assert_eq!(events[0]["content"], json!({"n": 2}));
    assert_eq!(events[1]["ts"], json!(3.0));
    assert_eq!(events[1]["db"], json!("b.db"));
    assert_eq!(events[1]["path"], json!("b/three"));
}

#[tokio::test]
async fn test_startts_endts_aliases() {
    let dir = tempfile::tempdir().unwrap();
    let a = fixture(dir.path(), "a.db", &[(5.0, None, "{}")]);
    let (_client, base) = start_with_sources(vec![a]).await;

    // The typed client always sends t0/t1; exercise the aliases raw.
    let events: Vec<serde_json::Value> = reqwest::Client::new()
        .get(format!("{base}/ts?startts=0&endts=10"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["ts"], json!(5.0));
}

#[tokio::test]
async fn test_missing_bound_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let a = fixture(dir.path(), "a.db", &[(5.0, None, "{}")]);
    let (_client, base) = start_with_sources(vec![a]).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/ts?t0=1"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "Not found");
}

#[tokio::test]
async fn test_info_tags_each_source() {
    let dir = tempfile::tempdir().unwrap();
    let a = fixture(dir.path(), "a.db", &[]);
    let b = fixture(dir.path(), "b.db", &[]);
    let (client, _base) = start_with_sources(vec![a, b]).await;

    let info = client.info().await.unwrap();
    assert_eq!(info.len(), 2);
    assert_eq!(info[0]["db"], json!("a.db"));
    assert_eq!(info[0]["title"], json!("a.db"));
    assert_eq!(info[1]["db"], json!("b.db"));
}

#[tokio::test]
async fn test_no_sources_yields_empty_results() {
    let (client, _base) = start_with_sources(vec![]).await;
    assert!(client.timeseries(0.0, 100.0).await.unwrap().is_empty());
    assert!(client.info().await.unwrap().is_empty());
}
