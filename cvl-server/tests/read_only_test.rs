//! Read-only mode: every mutating verb is refused before it is enqueued.

use cvl_client::CvlClient;
use cvl_core::{Error, Operation};
use cvl_server::CvlServer;
use serde_json::json;
use std::time::Duration;

async fn start_read_only() -> CvlClient {
    let server = CvlServer::builder()
        .port(0)
        .read_only(true)
        .build()
        .await
        .unwrap();
    let addr = server.local_addr();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    CvlClient::new(format!("http://{addr}"))
}

#[tokio::test]
async fn test_every_mutating_endpoint_is_not_found() {
    let client = start_read_only().await;

    assert!(matches!(
        client.publish_metadata("x", &json!({})).await,
        Err(Error::NotFound)
    ));
    assert!(matches!(
        client.publish_data("x", vec![1]).await,
        Err(Error::NotFound)
    ));
    assert!(matches!(client.delete("x").await, Err(Error::NotFound)));
    assert!(matches!(
        client.control(&json!({})).await,
        Err(Error::NotFound)
    ));
    assert!(matches!(client.query().await, Err(Error::NotFound)));
    assert!(matches!(
        client.report_state(&json!({})).await,
        Err(Error::NotFound)
    ));
}

#[tokio::test]
async fn test_store_stays_empty_and_subscribers_stay_silent() {
    let client = start_read_only().await;
    let mut events = client.subscribe().await.unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), events.next_frame())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(frame.operation, Operation::Id);

    let _ = client.publish_metadata("x", &json!({"a": 1})).await;
    assert!(matches!(
        client.object_metadata("x").await,
        Err(Error::NotFound)
    ));
    assert!(client.list().await.unwrap().is_empty());
    assert!(
        tokio::time::timeout(Duration::from_millis(300), events.next_frame())
            .await
            .is_err(),
        "no frames expected after a refused publish"
    );
}
