//! A handler-chosen non-2xx status code and reason phrase must pass through
//! to the rendezvous peer unchanged.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use relay_listener::control::ControlMessage;
use relay_listener::{EndpointAddress, HttpRequestContext, HttpResponseWriter, Listener, RequestHandler, TokenProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;

struct TeapotHandler;

#[async_trait]
impl RequestHandler for TeapotHandler {
    async fn handle(&self, _request: HttpRequestContext, response: HttpResponseWriter) {
        response
            .start(418, Some("I'm a teapot".to_string()), vec![("x-brew".to_string(), "no".to_string())])
            .await
            .unwrap();
        response.finish().await.unwrap();
    }
}

async fn fake_rendezvous_peer(listener: TcpListener) {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
    ws.send(Message::Binary(Vec::new().into())).await.unwrap();

    let Some(Ok(Message::Text(text))) = ws.next().await else {
        panic!("expected the response metadata message");
    };
    let parsed: ControlMessage = serde_json::from_str(&text).unwrap();
    let ControlMessage::Response(response) = parsed else {
        panic!("expected a Response envelope, got {parsed:?}");
    };
    assert_eq!(response.status_code, 418);
    assert_eq!(response.reason.as_deref(), Some("I'm a teapot"));
    assert!(response.headers.iter().any(|(k, v)| k == "x-brew" && v == "no"));
}

async fn fake_control_plane(listener: TcpListener, rendezvous_port: u16) {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
    let accept = format!(
        r#"{{"accept":{{"id":"r1","address":"ws://127.0.0.1:{rendezvous_port}/","requestInfo":{{"method":"GET","target":"/brew","headers":[]}}}}}}"#
    );
    ws.send(Message::Text(accept.into())).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
}

#[tokio::test]
async fn handler_status_code_and_reason_pass_through() {
    let rendezvous_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let rendezvous_port = rendezvous_listener.local_addr().unwrap().port();

    let control_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_port = control_listener.local_addr().unwrap().port();

    let peer_handle = tokio::spawn(fake_rendezvous_peer(rendezvous_listener));
    tokio::spawn(fake_control_plane(control_listener, rendezvous_port));

    let endpoint = EndpointAddress::insecure("127.0.0.1", "myendpoint", control_port);
    let provider = Arc::new(TokenProvider::from_sas_key("name", "a-test-signing-key").unwrap());
    let listener = Listener::new(endpoint, provider);

    listener.set_request_handler(Arc::new(TeapotHandler)).await;
    listener.open(Duration::from_secs(5)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), peer_handle)
        .await
        .expect("fake rendezvous peer timed out")
        .unwrap();

    listener.close(Duration::from_secs(5)).await.unwrap();
}
