//! End-to-end: an HTTP-mode rendezvous whose handler writes nothing back
//! must still produce a well-formed 200 response with zero body bytes, and
//! the response envelope's `body` flag must say so.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use relay_listener::control::ControlMessage;
use relay_listener::{EndpointAddress, HttpRequestContext, HttpResponseWriter, Listener, RequestHandler, TokenProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;

struct EmptyGetHandler;

#[async_trait]
impl RequestHandler for EmptyGetHandler {
    async fn handle(&self, request: HttpRequestContext, response: HttpResponseWriter) {
        assert!(request.read_body_chunk().await.is_none(), "GET request must carry no body");
        response.finish().await.unwrap();
    }
}

async fn fake_rendezvous_peer_get(listener: TcpListener) {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

    // Signal "no request body" immediately, as a real relay would for GET.
    ws.send(Message::Binary(Vec::new().into())).await.unwrap();

    let Some(Ok(Message::Text(text))) = ws.next().await else {
        panic!("expected the response metadata message");
    };
    let parsed: ControlMessage = serde_json::from_str(&text).unwrap();
    let ControlMessage::Response(response) = parsed else {
        panic!("expected a Response envelope, got {parsed:?}");
    };
    assert_eq!(response.status_code, 200);
    assert!(!response.body, "a handler that writes nothing must report body: false");

    let mut body_bytes = Vec::new();
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => {
                body_bytes.extend_from_slice(&data);
                if data.is_empty() {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            _ => {}
        }
    }
    assert!(body_bytes.is_empty(), "empty-write handler must produce zero response body bytes");
}

async fn fake_control_plane(listener: TcpListener, rendezvous_port: u16) {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();

    let accept = format!(
        r#"{{"accept":{{"id":"r1","address":"ws://127.0.0.1:{rendezvous_port}/","requestInfo":{{"method":"GET","target":"/foo","headers":[]}}}}}}"#
    );
    ws.send(Message::Text(accept.into())).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn http_get_with_empty_body_yields_200_with_no_response_body() {
    let rendezvous_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let rendezvous_port = rendezvous_listener.local_addr().unwrap().port();

    let control_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_port = control_listener.local_addr().unwrap().port();

    let peer_handle = tokio::spawn(fake_rendezvous_peer_get(rendezvous_listener));
    tokio::spawn(fake_control_plane(control_listener, rendezvous_port));

    let endpoint = EndpointAddress::insecure("127.0.0.1", "myendpoint", control_port);
    let provider = Arc::new(TokenProvider::from_sas_key("name", "a-test-signing-key").unwrap());
    let listener = Listener::new(endpoint, provider);

    listener.set_request_handler(Arc::new(EmptyGetHandler)).await;
    listener.open(Duration::from_secs(5)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), peer_handle)
        .await
        .expect("fake rendezvous peer timed out")
        .unwrap();

    listener.close(Duration::from_secs(5)).await.unwrap();
}
