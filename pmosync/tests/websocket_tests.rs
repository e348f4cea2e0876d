//! WebSocketConnector against a local tungstenite server

use futures::{SinkExt, StreamExt};
use pmosync::{Error, PushConnector, SyncClient, WebSocketConnector};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[tokio::test]
async fn test_connector_reads_text_frames_until_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cookie = Arc::new(Mutex::new(None::<String>));

    let seen_cookie = Arc::clone(&cookie);
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |req: &Request, resp: Response| {
            *seen_cookie.lock().unwrap() = req
                .headers()
                .get("cookie")
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            Ok::<Response, ErrorResponse>(resp)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .unwrap();

        let frame = r#"{"type":"SongChange","data":{"id":1,"title":"A","started_at_ms":0}}"#;
        ws.send(Message::Ping(vec![1, 2, 3].into())).await.unwrap();
        ws.send(Message::Text(frame.to_string().into())).await.unwrap();
        ws.close(None).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let url = Url::parse(&format!("ws://{addr}/api/ws")).unwrap();
    let connector = WebSocketConnector::new(url).with_session_token("id=listener-1");
    let mut frames = connector.connect().await.unwrap();

    let first = frames.next().await.unwrap().unwrap();
    assert!(first.contains("SongChange"));

    // The close frame ends the connection as a transport error
    match frames.next().await {
        Some(Err(Error::Transport(_))) | None => {}
        other => panic!("unexpected frame after close: {other:?}"),
    }

    drop(frames);
    server.await.unwrap();
    assert_eq!(cookie.lock().unwrap().as_deref(), Some("id=listener-1"));
}

#[tokio::test]
async fn test_connector_refused() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
    let result = WebSocketConnector::new(url).connect().await;
    assert!(matches!(result, Err(Error::Transport(_))));
}

#[tokio::test]
async fn test_connector_handshake_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // Accept the TCP connection but never answer the upgrade
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let url = Url::parse(&format!("ws://{addr}/ws")).unwrap();
    let connector =
        WebSocketConnector::new(url).with_handshake_timeout(Duration::from_millis(200));
    let result = tokio::time::timeout(Duration::from_secs(3), connector.connect())
        .await
        .expect("handshake timeout not applied");

    match result {
        Err(Error::Transport(msg)) => assert!(msg.contains("timed out")),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("handshake should not succeed"),
    }
    server.abort();
}

#[test]
fn test_connector_from_client() {
    let client = SyncClient::builder()
        .api_base("https://radio.example.com/api")
        .session_token("id=abc")
        .build()
        .unwrap();
    let connector = WebSocketConnector::from_client(&client).unwrap();
    assert_eq!(connector.url().as_str(), "wss://radio.example.com/api/ws");
}
