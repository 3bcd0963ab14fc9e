use bytes::Bytes;
use mockito::Matcher;
use plate_uplink::{PlateRecognizer, RecognitionClient, UploadError, UplinkConfig};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

fn client(url: &str) -> RecognitionClient {
    let mut headers = BTreeMap::new();
    headers.insert("api-key".to_string(), "k-123".to_string());
    RecognitionClient::new(&UplinkConfig { base_url: url.to_string(), timeout_s: 10, headers }).unwrap()
}

fn jpeg() -> Bytes {
    Bytes::from_static(&[0xff, 0xd8, 0xff, 0xe0, 0x00, 0x10, 0xff, 0xd9])
}

#[tokio::test]
async fn recognized_plate_is_returned() {
    let mut server = mockito::Server::new_async().await;
    let id = Uuid::new_v4();
    let m = server
        .mock("POST", "/ocr/read_lp")
        .match_header("api-key", "k-123")
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex("name=\"request_code\"".into()),
            Matcher::Regex(id.to_string()),
            Matcher::Regex("name=\"image\"; filename=\"plate.jpg\"".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"result":"MH12AB1234","show_alert":true}"#)
        .create_async()
        .await;

    let c = client(&server.url());
    let reading = c.submit(jpeg(), "plate.jpg", id).await.unwrap();
    assert_eq!(reading.plate_number, "MH12AB1234");
    assert!(reading.alert);
    m.assert_async().await;

    let h = c.link_health();
    assert_eq!((h.submitted, h.recognized, h.consecutive_failures), (1, 1, 0));
}

#[tokio::test]
async fn empty_result_is_unrecognized() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("POST", "/ocr/read_lp")
        .with_status(200)
        .with_body(r#"{"result":"  ","show_alert":true}"#)
        .create_async()
        .await;

    assert!(client(&server.url()).submit(jpeg(), "plate.jpg", Uuid::new_v4()).await.is_none());
}

#[tokio::test]
async fn server_error_is_unrecognized() {
    let mut server = mockito::Server::new_async().await;
    let _m = server.mock("POST", "/ocr/read_lp").with_status(500).create_async().await;

    let c = client(&server.url());
    match c.read_lp(jpeg(), "plate.jpg", Uuid::new_v4()).await {
        Err(UploadError::Status(s)) => assert_eq!(s.as_u16(), 500),
        other => panic!("unexpected {:?}", other),
    }
    assert!(c.submit(jpeg(), "plate.jpg", Uuid::new_v4()).await.is_none());
    assert_eq!(c.link_health().consecutive_failures, 1);
}

#[tokio::test]
async fn malformed_body_is_unrecognized() {
    let mut server = mockito::Server::new_async().await;
    let _m = server.mock("POST", "/ocr/read_lp").with_status(200).with_body("<html>").create_async().await;

    let c = client(&server.url());
    assert!(matches!(c.read_lp(jpeg(), "plate.jpg", Uuid::new_v4()).await, Err(UploadError::Body(_))));
}

#[tokio::test]
async fn unanswered_request_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let _hold = tokio::spawn(async move {
        let mut open = Vec::new();
        loop {
            if let Ok((sock, _)) = listener.accept().await {
                open.push(sock);
            }
        }
    });

    let timeout = Duration::from_millis(300);
    let http = reqwest::Client::builder().timeout(timeout).build().unwrap();
    let c = RecognitionClient::with_client(http, &format!("http://{}", addr), timeout);

    let started = std::time::Instant::now();
    assert!(matches!(
        c.read_lp(jpeg(), "plate.jpg", Uuid::new_v4()).await,
        Err(UploadError::Timeout(_))
    ));
    assert!(c.submit(jpeg(), "plate.jpg", Uuid::new_v4()).await.is_none());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn unreachable_server_is_unrecognized() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(client(&format!("http://{}", addr)).submit(jpeg(), "plate.jpg", Uuid::new_v4()).await.is_none());
}

#[tokio::test]
async fn access_check_reads_flag() {
    let mut server = mockito::Server::new_async().await;
    let _m = server
        .mock("GET", "/ocr/is_allowed")
        .with_status(200)
        .with_body(r#"{"is_allowed":true}"#)
        .create_async()
        .await;
    assert!(client(&server.url()).is_allowed().await.unwrap());

    let mut denied = mockito::Server::new_async().await;
    let _m = denied.mock("GET", "/ocr/is_allowed").with_status(200).with_body("{}").create_async().await;
    assert!(!client(&denied.url()).is_allowed().await.unwrap());
}
